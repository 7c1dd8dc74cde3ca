//! Sitzung – Verwaltet eine einzelne Client-Verbindung
//!
//! Jede akzeptierte Verbindung bekommt eine `Session` in einem eigenen
//! tokio-Task. Die Sitzung liest Frames, reicht Nachrichten beim Hub ein
//! und schreibt die Eintraege ihrer ausgehenden Queue auf den Socket.
//!
//! ## State Machine
//! ```text
//! Verbindend --Identity--> Aktiv --Fehler/EOF/Shutdown--> Schliessend --> Geschlossen
//!     |                                                       ^
//!     +------------- Protokollverletzung / Timeout -----------+
//! ```
//!
//! Beim Verlassen von `Aktiv` wird die Sitzung genau einmal beim Hub
//! abgemeldet. Eine Sitzung die nie `Aktiv` war erzeugt keine Broadcasts.

use futures_util::{SinkExt, StreamExt};
use lanchat_core::SessionId;
use lanchat_protocol::{Frame, FrameCodec, Identity, Message, MessageKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::codec::Framed;

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::hub::{BroadcastHub, SessionEmpfaenger, SessionSender};

/// Inhalt der Abschiedsnachricht beim Herunterfahren
pub const ABSCHIED_TEXT: &str = "Server is shutting down";

/// Zustand einer Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionZustand {
    /// Verbunden, Identity-Frame steht noch aus
    Verbindend,
    /// Beim Hub registriert
    Aktiv,
    /// Abmeldung und Socket-Abbau laufen
    Schliessend,
    Geschlossen,
}

/// Verarbeitet eine einzelne Verbindung
pub struct Session {
    id: SessionId,
    hub: BroadcastHub,
    peer_addr: SocketAddr,
    config: Arc<RelayConfig>,
    zustand: SessionZustand,
    identity: Option<Identity>,
}

type SessionFramed<S> = Framed<S, FrameCodec>;

impl Session {
    pub fn neu(hub: BroadcastHub, peer_addr: SocketAddr, config: Arc<RelayConfig>) -> Self {
        Self {
            id: SessionId::new(),
            hub,
            peer_addr,
            config,
            zustand: SessionZustand::Verbindend,
            identity: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn zustand(&self) -> SessionZustand {
        self.zustand
    }

    /// Gebundene Identitaet, gesetzt nach erfolgreichem Handshake
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn zustand_setzen(&mut self, neu: SessionZustand) {
        tracing::trace!(session = %self.id, von = ?self.zustand, nach = ?neu, "Zustandswechsel");
        self.zustand = neu;
    }

    /// Fuehrt die Sitzung bis zum Verbindungsende aus
    ///
    /// Normales Ende (EOF, Reset, Shutdown) liefert `Ok(())`. Fehler bleiben
    /// auf diese Sitzung beschraenkt und werden nur zurueckgegeben.
    pub async fn ausfuehren<S>(
        mut self,
        stream: S,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> RelayResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        tracing::info!(session = %self.id, peer = %self.peer_addr, "Neue Verbindung");

        let mut framed = Framed::new(
            stream,
            FrameCodec::with_max_size(self.config.max_frame_groesse),
        );

        let identity = match self.handshake(&mut framed, &mut shutdown_rx).await {
            Ok(identity) => identity,
            Err(fehler) => {
                self.fehler_protokollieren(&fehler, "Handshake fehlgeschlagen");
                self.zustand_setzen(SessionZustand::Schliessend);
                self.verbindung_schliessen(&mut framed).await;
                self.zustand_setzen(SessionZustand::Geschlossen);
                return ende_einordnen(fehler);
            }
        };

        let (sender, mut ausgang_rx) = SessionSender::kanal(
            self.id,
            identity.clone(),
            self.config.send_queue_groesse,
            self.config.schreib_timeout,
        );
        self.identity = Some(identity.clone());

        if let Err(fehler) = self.hub.registrieren(sender) {
            tracing::debug!(session = %self.id, fehler = %fehler, "Registrierung abgelehnt");
            self.zustand_setzen(SessionZustand::Schliessend);
            self.verbindung_schliessen(&mut framed).await;
            self.zustand_setzen(SessionZustand::Geschlossen);
            return Err(fehler);
        }
        self.zustand_setzen(SessionZustand::Aktiv);
        tracing::info!(session = %self.id, username = %identity, "Sitzung aktiv");

        let ergebnis = self
            .aktiv_schleife(&mut framed, &mut ausgang_rx, &mut shutdown_rx, &identity)
            .await;

        self.zustand_setzen(SessionZustand::Schliessend);
        self.hub.entfernen(&self.id);
        drop(ausgang_rx);

        if let Err(ref fehler) = ergebnis {
            self.fehler_protokollieren(fehler, "Sitzung beendet");
        }

        self.verbindung_schliessen(&mut framed).await;
        self.zustand_setzen(SessionZustand::Geschlossen);
        tracing::info!(session = %self.id, username = %identity, "Verbindung geschlossen");

        match ergebnis {
            Ok(()) => Ok(()),
            Err(fehler) => ende_einordnen(fehler),
        }
    }

    /// Wartet auf den Identity-Frame
    async fn handshake<S>(
        &self,
        framed: &mut SessionFramed<S>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> RelayResult<Identity>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let erster = tokio::select! {
            ergebnis = tokio::time::timeout(self.config.handshake_timeout, framed.next()) => {
                ergebnis.map_err(|_| RelayError::Timeout("Identity-Frame"))?
            }
            _ = shutdown_abwarten(shutdown_rx) => {
                return Err(RelayError::VerbindungGetrennt);
            }
        };

        match erster {
            Some(Ok(Frame::Identity(identity))) => {
                let username = identity.username.trim();
                if username.is_empty() {
                    return Err(RelayError::protokoll("leerer Benutzername"));
                }
                Ok(Identity::new(username))
            }
            Some(Ok(Frame::Message(_))) => Err(RelayError::protokoll(
                "erster Frame muss ein Identity-Frame sein",
            )),
            Some(Err(e)) => Err(RelayError::aus_lesefehler(e)),
            None => Err(RelayError::VerbindungGetrennt),
        }
    }

    /// Lese-/Schreibschleife einer registrierten Sitzung
    ///
    /// `Ok(())` bedeutet Shutdown, alles andere ist der Grund des Endes.
    async fn aktiv_schleife<S>(
        &self,
        framed: &mut SessionFramed<S>,
        ausgang_rx: &mut SessionEmpfaenger,
        shutdown_rx: &mut watch::Receiver<bool>,
        identity: &Identity,
    ) -> RelayResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                // Eingehender Frame vom Client
                frame = framed.next() => match frame {
                    Some(Ok(Frame::Message(eingehend))) => {
                        self.eingehend_verarbeiten(eingehend, identity)?;
                    }
                    Some(Ok(Frame::Identity(_))) => {
                        return Err(RelayError::protokoll("Identity-Frame nach dem Handshake"));
                    }
                    Some(Err(e)) => return Err(RelayError::aus_lesefehler(e)),
                    None => return Err(RelayError::VerbindungGetrennt),
                },

                // Ausgehende Nachricht vom Hub
                ausgehend = ausgang_rx.recv() => match ausgehend {
                    Some(nachricht) => {
                        self.schreiben(framed, nachricht).await?;
                        ausgang_rx.fortschritt_melden();
                    }
                    None => {
                        return Err(RelayError::SchreibFehler("vom Hub entfernt".into()));
                    }
                },

                _ = shutdown_abwarten(shutdown_rx) => {
                    tracing::info!(session = %self.id, "Shutdown-Signal – Sitzung wird beendet");
                    let abschied = Message::system(Identity::system(), ABSCHIED_TEXT);
                    if let Err(e) = self.schreiben(framed, abschied).await {
                        tracing::debug!(session = %self.id, fehler = %e, "Abschied nicht zugestellt");
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Reicht eine Client-Nachricht unter der gebundenen Identitaet ein
    fn eingehend_verarbeiten(&self, eingehend: Message, identity: &Identity) -> RelayResult<()> {
        if eingehend.kind != MessageKind::Text {
            tracing::warn!(
                session = %self.id,
                kind = ?eingehend.kind,
                "Client-Nachricht mit reserviertem Typ verworfen"
            );
            return Ok(());
        }

        if eingehend.sender != *identity {
            tracing::debug!(
                session = %self.id,
                angegeben = %eingehend.sender,
                "Absender durch gebundene Identitaet ersetzt"
            );
        }

        self.hub
            .einreichen(Message::text(identity.clone(), eingehend.content), Some(self.id))
    }

    async fn schreiben<S>(&self, framed: &mut SessionFramed<S>, nachricht: Message) -> RelayResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match tokio::time::timeout(self.config.schreib_timeout, framed.send(Frame::Message(nachricht)))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RelayError::SchreibFehler(e.to_string())),
            Err(_) => Err(RelayError::Timeout("Schreiben")),
        }
    }

    async fn verbindung_schliessen<S>(&self, framed: &mut SessionFramed<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match tokio::time::timeout(self.config.schreib_timeout, framed.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(session = %self.id, fehler = %e, "Socket-Abbau fehlerhaft"),
            Err(_) => tracing::debug!(session = %self.id, "Socket-Abbau: Timeout"),
        }
    }

    fn fehler_protokollieren(&self, fehler: &RelayError, kontext: &str) {
        if fehler.ist_protokollverletzung() {
            self.hub.metriken().protocol_violations_total.inc();
            tracing::warn!(session = %self.id, peer = %self.peer_addr, fehler = %fehler, "{kontext}");
        } else if fehler.ist_normales_ende() {
            tracing::debug!(session = %self.id, peer = %self.peer_addr, "{kontext}: Verbindung getrennt");
        } else {
            tracing::warn!(session = %self.id, peer = %self.peer_addr, fehler = %fehler, "{kontext}");
        }
    }
}

fn ende_einordnen(fehler: RelayError) -> RelayResult<()> {
    if fehler.ist_normales_ende() {
        Ok(())
    } else {
        Err(fehler)
    }
}

/// Kehrt zurueck sobald Shutdown signalisiert oder der Sender verworfen wurde
async fn shutdown_abwarten(shutdown_rx: &mut watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZustellRichtlinie;
    use lanchat_observability::RelayMetrics;
    use lanchat_protocol::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    struct Aufbau {
        hub: BroadcastHub,
        client: DuplexStream,
        shutdown_tx: watch::Sender<bool>,
        task: JoinHandle<RelayResult<()>>,
    }

    fn sitzung_starten(config: RelayConfig) -> Aufbau {
        let hub = BroadcastHub::neu(ZustellRichtlinie::EchoAnAbsender, RelayMetrics::neu().unwrap());
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = Session::neu(hub.clone(), "127.0.0.1:40000".parse().unwrap(), Arc::new(config));
        assert_eq!(session.zustand(), SessionZustand::Verbindend);
        let task = tokio::spawn(session.ausfuehren(server, shutdown_rx));
        Aufbau { hub, client, shutdown_tx, task }
    }

    fn beobachter_kanal() -> (SessionSender, SessionEmpfaenger) {
        SessionSender::kanal(
            SessionId::new(),
            Identity::new("beobachter"),
            64,
            Duration::from_secs(5),
        )
    }

    async fn senden(client: &mut DuplexStream, frame: impl Into<Frame>) {
        write_frame(client, &frame.into(), DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
    }

    async fn lesen(client: &mut DuplexStream) -> Message {
        let frame = tokio::time::timeout(
            Duration::from_secs(2),
            read_frame(client, DEFAULT_MAX_FRAME_SIZE),
        )
        .await
        .expect("Timeout beim Lesen")
        .unwrap();
        match frame {
            Frame::Message(m) => m,
            anders => panic!("unerwarteter Frame: {anders:?}"),
        }
    }

    async fn task_ende(task: JoinHandle<RelayResult<()>>) -> RelayResult<()> {
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("Sitzung endet nicht")
            .unwrap()
    }

    #[tokio::test]
    async fn handshake_registriert_und_verteilt_beitritt() {
        let mut a = sitzung_starten(RelayConfig::default());
        senden(&mut a.client, Identity::new("  alice  ")).await;

        let join = lesen(&mut a.client).await;
        assert_eq!(join.kind, MessageKind::UserJoin);
        assert_eq!(join.sender.username, "alice");
        assert_eq!(join.content, "alice joined the chat");

        let roster = lesen(&mut a.client).await;
        assert_eq!(roster.roster(), Some(&["alice".to_string()][..]));
        assert_eq!(a.hub.roster(), vec!["alice"]);
    }

    #[tokio::test]
    async fn nachricht_vor_identity_ist_protokollverletzung() {
        let mut a = sitzung_starten(RelayConfig::default());
        let (beobachter, mut rx) =
            beobachter_kanal();
        a.hub.registrieren(beobachter).unwrap();
        // Eigenes JOIN + Roster
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        senden(&mut a.client, Message::text(Identity::new("mallory"), "hallo")).await;

        let ergebnis = task_ende(a.task).await;
        assert!(matches!(ergebnis, Err(RelayError::Protokollverletzung(_))));
        assert_eq!(a.hub.sitzungs_anzahl(), 1);
        assert_eq!(a.hub.metriken().protocol_violations_total.get(), 1);

        // Kein Broadcast: die naechste Nachricht ist die Markierung
        a.hub
            .einreichen(Message::system(Identity::system(), "markierung"), None)
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().content, "markierung");
    }

    #[tokio::test]
    async fn leerer_benutzername_wird_abgelehnt() {
        let mut a = sitzung_starten(RelayConfig::default());
        senden(&mut a.client, Identity::new("   ")).await;

        let ergebnis = task_ende(a.task).await;
        assert!(matches!(ergebnis, Err(RelayError::Protokollverletzung(_))));
        assert_eq!(a.hub.sitzungs_anzahl(), 0);
    }

    #[tokio::test]
    async fn handshake_timeout() {
        let config = RelayConfig {
            handshake_timeout: Duration::from_millis(50),
            ..RelayConfig::default()
        };
        let a = sitzung_starten(config);

        let ergebnis = task_ende(a.task).await;
        assert!(matches!(ergebnis, Err(RelayError::Timeout(_))));
        assert_eq!(a.hub.sitzungs_anzahl(), 0);
    }

    #[tokio::test]
    async fn absender_und_zeit_werden_neu_gesetzt() {
        let mut a = sitzung_starten(RelayConfig::default());
        senden(&mut a.client, Identity::new("alice")).await;
        lesen(&mut a.client).await;
        lesen(&mut a.client).await;

        let mut gefaelscht = Message::text(Identity::new("bob"), "hallo");
        gefaelscht.created_at = chrono_epoche();
        senden(&mut a.client, gefaelscht).await;

        let echo = lesen(&mut a.client).await;
        assert_eq!(echo.kind, MessageKind::Text);
        assert_eq!(echo.sender.username, "alice");
        assert_eq!(echo.content, "hallo");
        assert_ne!(echo.created_at, chrono_epoche());
    }

    fn chrono_epoche() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap()
    }

    #[tokio::test]
    async fn reservierte_typen_vom_client_werden_verworfen() {
        let mut a = sitzung_starten(RelayConfig::default());
        senden(&mut a.client, Identity::new("alice")).await;
        lesen(&mut a.client).await;
        lesen(&mut a.client).await;

        senden(&mut a.client, Message::user_join(Identity::new("geist"))).await;
        senden(&mut a.client, Message::text(Identity::new("alice"), "echt")).await;

        let naechste = lesen(&mut a.client).await;
        assert_eq!(naechste.kind, MessageKind::Text);
        assert_eq!(naechste.content, "echt");
    }

    #[tokio::test]
    async fn zweite_identity_beendet_sitzung() {
        let mut a = sitzung_starten(RelayConfig::default());
        senden(&mut a.client, Identity::new("alice")).await;
        lesen(&mut a.client).await;
        lesen(&mut a.client).await;

        senden(&mut a.client, Identity::new("alice2")).await;
        let ergebnis = task_ende(a.task).await;
        assert!(matches!(ergebnis, Err(RelayError::Protokollverletzung(_))));
        assert_eq!(a.hub.sitzungs_anzahl(), 0);
    }

    #[tokio::test]
    async fn eof_meldet_ab_mit_einem_austritt() {
        let mut a = sitzung_starten(RelayConfig::default());
        let (beobachter, mut rx) =
            beobachter_kanal();
        a.hub.registrieren(beobachter).unwrap();

        senden(&mut a.client, Identity::new("alice")).await;
        lesen(&mut a.client).await;
        lesen(&mut a.client).await;
        drop(a.client);

        assert!(task_ende(a.task).await.is_ok());
        assert_eq!(a.hub.sitzungs_anzahl(), 1);

        a.hub
            .einreichen(Message::system(Identity::system(), "markierung"), None)
            .unwrap();
        let mut austritte = 0;
        loop {
            let m = rx.recv().await.unwrap();
            if m.content == "markierung" {
                break;
            }
            if m.kind == MessageKind::UserLeave {
                assert_eq!(m.sender.username, "alice");
                austritte += 1;
            }
        }
        assert_eq!(austritte, 1);
    }

    #[tokio::test]
    async fn shutdown_sendet_abschied() {
        let mut a = sitzung_starten(RelayConfig::default());
        senden(&mut a.client, Identity::new("alice")).await;
        lesen(&mut a.client).await;
        lesen(&mut a.client).await;

        a.shutdown_tx.send_replace(true);

        let abschied = lesen(&mut a.client).await;
        assert_eq!(abschied.kind, MessageKind::System);
        assert_eq!(abschied.content, ABSCHIED_TEXT);
        assert!(task_ende(a.task).await.is_ok());

        // Danach EOF
        let rest = read_frame(&mut a.client, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(rest.is_err());
    }

    #[tokio::test]
    async fn nicht_lesender_client_laeuft_in_schreib_timeout() {
        let hub = BroadcastHub::neu(ZustellRichtlinie::EchoAnAbsender, RelayMetrics::neu().unwrap());
        let (beobachter, mut rx) = beobachter_kanal();
        hub.registrieren(beobachter).unwrap();

        // Kleiner Puffer: der Socket ist nach wenigen Frames voll
        let (mut client, server) = tokio::io::duplex(256);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = RelayConfig {
            schreib_timeout: Duration::from_millis(100),
            ..RelayConfig::default()
        };
        let session = Session::neu(hub.clone(), "127.0.0.1:40001".parse().unwrap(), Arc::new(config));
        let id = session.id();
        let task = tokio::spawn(session.ausfuehren(server, shutdown_rx));

        // Identity senden, danach nie lesen
        senden(&mut client, Identity::new("stumm")).await;
        for n in 0..50 {
            hub.einreichen(Message::text(Identity::new("beobachter"), format!("n{n}")), None)
                .unwrap();
        }

        let ergebnis = task_ende(task).await;
        assert!(matches!(ergebnis, Err(RelayError::Timeout(_))));
        assert!(!hub.ist_registriert(&id));
        assert_eq!(hub.roster(), vec!["beobachter"]);

        hub.einreichen(Message::system(Identity::system(), "markierung"), None)
            .unwrap();
        let mut austritte = 0;
        loop {
            let m = rx.recv().await.unwrap();
            if m.content == "markierung" {
                break;
            }
            if m.kind == MessageKind::UserLeave {
                assert_eq!(m.sender.username, "stumm");
                austritte += 1;
            }
        }
        assert_eq!(austritte, 1);
        drop(client);
    }
}
