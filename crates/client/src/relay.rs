//! Client-seitige TCP-Verbindung zum Lanchat-Relay
//!
//! Nutzt den FrameCodec aus lanchat-protocol fuer das Wire-Format
//! (u32 BE length + JSON payload). Ein Lese-Task legt alle empfangenen
//! Nachrichten in eine lokale Queue; `next_event` liefert sie in
//! Empfangsreihenfolge.
//!
//! Endet die Verbindung, liefert die Queue genau ein synthetisches
//! SYSTEM-Ereignis `"Disconnected from server"` und danach `None`.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lanchat_core::MAX_NACHRICHTEN_LAENGE;
use lanchat_protocol::{Frame, FrameCodec, Identity, Message};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::codec::Framed;

use crate::error::{ClientError, ClientResult};

/// Inhalt des synthetischen Ereignisses beim Verbindungsende
pub const TRENNUNGS_TEXT: &str = "Disconnected from server";

/// Maximale Dauer eines Sendevorgangs, bevor die Verbindung als tot gilt
pub const STANDARD_SENDE_TIMEOUT: Duration = Duration::from_secs(5);

type Senke = SplitSink<Framed<TcpStream, FrameCodec>, Frame>;
type Quelle = SplitStream<Framed<TcpStream, FrameCodec>>;

/// Verbindung eines Clients zum Relay
///
/// Alle Methoden nehmen `&self`; Senden und Empfangen koennen aus
/// verschiedenen Tasks erfolgen (z.B. hinter einem `Arc`).
pub struct ClientRelay {
    identity: Identity,
    senke: Mutex<Option<Senke>>,
    ereignisse: Mutex<mpsc::UnboundedReceiver<Message>>,
    verbunden: Arc<AtomicBool>,
    trennen_tx: watch::Sender<bool>,
    sende_timeout: Duration,
}

impl ClientRelay {
    /// Baut die Verbindung auf und sendet den Identity-Frame
    pub async fn connect(host: &str, port: u16, username: &str) -> ClientResult<Self> {
        tracing::info!(host, port, username, "Verbinde mit Relay");
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;

        let mut framed = Framed::new(stream, FrameCodec::new());
        let identity = Identity::new(username);
        framed.send(Frame::Identity(identity.clone())).await?;
        tracing::info!(host, port, "Verbindung hergestellt");

        let (senke, quelle) = framed.split();
        let (ereignis_tx, ereignis_rx) = mpsc::unbounded_channel();
        let verbunden = Arc::new(AtomicBool::new(true));
        let (trennen_tx, trennen_rx) = watch::channel(false);

        tokio::spawn(lese_schleife(
            quelle,
            ereignis_tx,
            identity.clone(),
            Arc::clone(&verbunden),
            trennen_rx,
        ));

        Ok(Self {
            identity,
            senke: Mutex::new(Some(senke)),
            ereignisse: Mutex::new(ereignis_rx),
            verbunden,
            trennen_tx,
            sende_timeout: STANDARD_SENDE_TIMEOUT,
        })
    }

    /// Setzt die Frist fuer einzelne Sendevorgaenge
    pub fn mit_sende_timeout(mut self, timeout: Duration) -> Self {
        self.sende_timeout = timeout;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.verbunden.load(Ordering::SeqCst)
    }

    /// Sendet einen Text als TEXT-Nachricht
    pub async fn send_user_message(&self, text: &str) -> ClientResult<()> {
        if !self.is_connected() {
            return Err(ClientError::NichtVerbunden);
        }

        let laenge = text.chars().count();
        if laenge > MAX_NACHRICHTEN_LAENGE {
            return Err(ClientError::NachrichtZuLang {
                laenge,
                max: MAX_NACHRICHTEN_LAENGE,
            });
        }

        let mut senke = self.senke.lock().await;
        let Some(offen) = senke.as_mut() else {
            return Err(ClientError::NichtVerbunden);
        };

        let nachricht = Message::text(self.identity.clone(), text);
        let fehler = match tokio::time::timeout(self.sende_timeout, offen.send(Frame::Message(nachricht)))
            .await
        {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => io::Error::new(
                io::ErrorKind::TimedOut,
                format!("Senden dauerte laenger als {:?}", self.sende_timeout),
            ),
        };

        tracing::warn!(fehler = %fehler, "Senden fehlgeschlagen – Verbindung wird getrennt");
        // Halb geschriebener Frame: die Senke ist nicht mehr verwendbar
        *senke = None;
        self.verbunden.store(false, Ordering::SeqCst);
        self.trennen_tx.send_replace(true);
        Err(ClientError::Io(fehler))
    }

    /// Wartet auf das naechste Ereignis
    ///
    /// `None` sobald die Verbindung beendet und alle Ereignisse
    /// abgeholt sind.
    pub async fn next_event(&self) -> Option<Message> {
        self.ereignisse.lock().await.recv().await
    }

    /// Liefert ein bereits empfangenes Ereignis, ohne zu warten
    pub fn try_next_event(&self) -> Option<Message> {
        self.ereignisse.try_lock().ok()?.try_recv().ok()
    }

    /// Trennt die Verbindung (idempotent)
    pub async fn disconnect(&self) {
        if self.verbunden.swap(false, Ordering::SeqCst) {
            tracing::info!(username = %self.identity, "Trenne Verbindung");
        }
        self.trennen_tx.send_replace(true);

        if let Some(mut senke) = self.senke.lock().await.take() {
            if let Err(e) = senke.close().await {
                tracing::debug!(fehler = %e, "Schliessen der Verbindung fehlerhaft");
            }
        }
    }
}

impl Drop for ClientRelay {
    fn drop(&mut self) {
        self.trennen_tx.send_replace(true);
    }
}

/// Liest Frames bis EOF, Fehler oder Trennsignal
async fn lese_schleife(
    mut quelle: Quelle,
    ereignis_tx: mpsc::UnboundedSender<Message>,
    identity: Identity,
    verbunden: Arc<AtomicBool>,
    mut trennen_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = quelle.next() => match frame {
                Some(Ok(Frame::Message(nachricht))) => {
                    if ereignis_tx.send(nachricht).is_err() {
                        break;
                    }
                }
                Some(Ok(Frame::Identity(unerwartet))) => {
                    tracing::warn!(username = %unerwartet, "Unerwarteter Identity-Frame ignoriert");
                }
                Some(Err(e)) => {
                    tracing::warn!(fehler = %e, "Frame-Lesefehler");
                    break;
                }
                None => {
                    tracing::info!("Verbindung vom Server getrennt");
                    break;
                }
            },

            _ = trennen_abwarten(&mut trennen_rx) => break,
        }
    }

    verbunden.store(false, Ordering::SeqCst);
    let _ = ereignis_tx.send(Message::system(identity, TRENNUNGS_TEXT));
}

async fn trennen_abwarten(trennen_rx: &mut watch::Receiver<bool>) {
    if *trennen_rx.borrow() {
        return;
    }
    while trennen_rx.changed().await.is_ok() {
        if *trennen_rx.borrow() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanchat_protocol::{read_frame, write_frame, MessageKind, DEFAULT_MAX_FRAME_SIZE};
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn ereignis(relay: &ClientRelay) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(2), relay.next_event())
            .await
            .expect("Timeout beim Warten auf Ereignis")
    }

    #[tokio::test]
    async fn connect_sendet_identity_zuerst() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE).await.unwrap()
        });

        let relay = ClientRelay::connect("127.0.0.1", port, "alice").await.unwrap();
        assert_eq!(server.await.unwrap(), Frame::Identity(Identity::new("alice")));
        assert_eq!(relay.identity().username, "alice");
    }

    #[tokio::test]
    async fn server_eof_liefert_ein_trennungsereignis() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
            let gruss = Message::text(Identity::new("server"), "willkommen");
            write_frame(&mut stream, &gruss.into(), DEFAULT_MAX_FRAME_SIZE)
                .await
                .unwrap();
        });

        let relay = ClientRelay::connect("127.0.0.1", port, "alice").await.unwrap();
        server.await.unwrap();

        let gruss = ereignis(&relay).await.unwrap();
        assert_eq!(gruss.content, "willkommen");

        let trennung = ereignis(&relay).await.unwrap();
        assert_eq!(trennung.kind, MessageKind::System);
        assert_eq!(trennung.content, TRENNUNGS_TEXT);
        assert_eq!(trennung.sender.username, "alice");

        assert!(ereignis(&relay).await.is_none());
        assert!(!relay.is_connected());
        assert!(matches!(
            relay.send_user_message("zu spaet").await,
            Err(ClientError::NichtVerbunden)
        ));
    }

    #[tokio::test]
    async fn zu_lange_nachricht_wird_abgelehnt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let relay = ClientRelay::connect("127.0.0.1", port, "alice").await.unwrap();
        let text = "x".repeat(MAX_NACHRICHTEN_LAENGE + 1);
        match relay.send_user_message(&text).await {
            Err(ClientError::NachrichtZuLang { laenge, max }) => {
                assert_eq!(laenge, MAX_NACHRICHTEN_LAENGE + 1);
                assert_eq!(max, MAX_NACHRICHTEN_LAENGE);
            }
            anders => panic!("unerwartet: {anders:?}"),
        }

        // Genau an der Grenze ist erlaubt
        let grenze = "x".repeat(MAX_NACHRICHTEN_LAENGE);
        relay.send_user_message(&grenze).await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_ist_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let relay = ClientRelay::connect("127.0.0.1", port, "alice").await.unwrap();
        relay.disconnect().await;
        relay.disconnect().await;

        assert!(!relay.is_connected());
        let trennung = ereignis(&relay).await.unwrap();
        assert_eq!(trennung.content, TRENNUNGS_TEXT);
        assert!(ereignis(&relay).await.is_none());
        assert!(relay.try_next_event().is_none());
    }

    #[tokio::test]
    async fn connect_ohne_server_schlaegt_fehl() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let ergebnis = ClientRelay::connect("127.0.0.1", port, "alice").await;
        assert!(matches!(ergebnis, Err(ClientError::Io(_))));
    }

    #[tokio::test]
    async fn haengender_server_loest_sende_timeout_aus() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Nimmt an, liest aber nie
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let relay = ClientRelay::connect("127.0.0.1", port, "alice")
            .await
            .unwrap()
            .mit_sende_timeout(Duration::from_millis(100));
        let text = "x".repeat(MAX_NACHRICHTEN_LAENGE);

        let fehler = tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                if let Err(e) = relay.send_user_message(&text).await {
                    return e;
                }
            }
        })
        .await
        .expect("Senden blockiert ohne Timeout");

        match fehler {
            ClientError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            anders => panic!("unerwartet: {anders:?}"),
        }
        assert!(!relay.is_connected());
        assert!(matches!(
            relay.send_user_message("danach").await,
            Err(ClientError::NichtVerbunden)
        ));
        let trennung = ereignis(&relay).await.unwrap();
        assert_eq!(trennung.content, TRENNUNGS_TEXT);
    }
}
