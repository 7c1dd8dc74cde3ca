//! Broadcast-Hub – Serialisiert und verteilt alle Nachrichten
//!
//! Der Hub besitzt die Registry aller aktiven Sitzungen und eine einzige
//! FIFO-Queue fuer eingereichte Nachrichten. Genau ein Dispatcher-Task
//! entnimmt die Nachrichten in Einreichungsreihenfolge und reiht sie in die
//! ausgehende Queue jeder registrierten Sitzung ein.
//!
//! ## Garantien
//! - Eine globale Reihenfolge: alle Empfaenger sehen M vor M', wenn M vor M'
//!   eingereicht wurde
//! - `einreichen` blockiert nie (unbegrenzte Queue)
//! - Der Dispatcher blockiert nie auf einer Sitzung. Ein Rueckstau allein
//!   entfernt keine Sitzung; erst eine geschlossene Queue oder ein Peer,
//!   dessen Schreiber laenger als die Frist keinen Fortschritt meldet
//! - Keine rueckwirkende Zustellung an spaeter registrierte Sitzungen

use dashmap::DashMap;
use lanchat_core::SessionId;
use lanchat_observability::RelayMetrics;
use lanchat_protocol::{Identity, Message};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ZustellRichtlinie;
use crate::error::{RelayError, RelayResult};

// ---------------------------------------------------------------------------
// SessionSender / SessionEmpfaenger
// ---------------------------------------------------------------------------

/// Fuellstand und Schreibfortschritt einer ausgehenden Queue
#[derive(Debug)]
struct AusgangStatus {
    /// Eingereihte, noch nicht entnommene Nachrichten
    ausstehend: AtomicUsize,
    /// Letzter abgeschlossener Schreibvorgang oder Beginn des Rueckstaus
    fortschritt: Mutex<Instant>,
    /// Ab diesem Fuellstand wird der Fortschritt geprueft
    grenze: usize,
    /// Maximale Zeit ohne Fortschritt bei vollem Rueckstau
    frist: Duration,
}

/// Sendeseite der ausgehenden Queue einer Sitzung
///
/// Der Hub haelt pro Sitzung genau einen `SessionSender` in der Registry.
/// Wird der Eintrag entfernt, schliesst sich die Queue und die Sitzung
/// beendet sich.
#[derive(Clone, Debug)]
pub struct SessionSender {
    id: SessionId,
    identity: Identity,
    tx: mpsc::UnboundedSender<Message>,
    status: Arc<AusgangStatus>,
}

/// Empfangsseite der ausgehenden Queue, gehalten von der Sitzung
#[derive(Debug)]
pub struct SessionEmpfaenger {
    rx: mpsc::UnboundedReceiver<Message>,
    status: Arc<AusgangStatus>,
}

impl SessionSender {
    /// Erstellt die ausgehende Queue einer Sitzung
    ///
    /// `grenze` ist der Fuellstand, ab dem ein Peer ohne Schreibfortschritt
    /// seit mehr als `frist` als haengend gilt.
    pub fn kanal(
        id: SessionId,
        identity: Identity,
        grenze: usize,
        frist: Duration,
    ) -> (Self, SessionEmpfaenger) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(AusgangStatus {
            ausstehend: AtomicUsize::new(0),
            fortschritt: Mutex::new(Instant::now()),
            grenze: grenze.max(1),
            frist,
        });
        (
            Self {
                id,
                identity,
                tx,
                status: Arc::clone(&status),
            },
            SessionEmpfaenger { rx, status },
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Reiht eine Nachricht nicht-blockierend ein
    ///
    /// Scheitert nur bei geschlossener Queue oder wenn der Rueckstau die
    /// Grenze erreicht hat und der Schreiber seit `frist` nichts geschafft hat.
    pub fn senden(&self, nachricht: Message) -> RelayResult<()> {
        if self.tx.is_closed() {
            return Err(RelayError::VerbindungGetrennt);
        }

        let status = &self.status;
        if status.ausstehend.load(Ordering::Acquire) >= status.grenze
            && status.fortschritt.lock().elapsed() > status.frist
        {
            return Err(RelayError::SchreibFehler(
                "Send-Queue voll, Peer ohne Schreibfortschritt".into(),
            ));
        }

        // Zaehler vor dem Senden erhoehen, damit er nie unter den echten
        // Fuellstand faellt
        if status.ausstehend.fetch_add(1, Ordering::AcqRel) == 0 {
            *status.fortschritt.lock() = Instant::now();
        }
        if self.tx.send(nachricht).is_err() {
            status.ausstehend.fetch_sub(1, Ordering::AcqRel);
            return Err(RelayError::VerbindungGetrennt);
        }
        Ok(())
    }
}

impl SessionEmpfaenger {
    /// Naechste ausgehende Nachricht; `None` sobald der Hub die Sitzung
    /// entfernt hat und die Queue leer ist
    pub async fn recv(&mut self) -> Option<Message> {
        let nachricht = self.rx.recv().await?;
        self.status.ausstehend.fetch_sub(1, Ordering::AcqRel);
        Some(nachricht)
    }

    /// Meldet einen abgeschlossenen Schreibvorgang auf den Socket
    pub fn fortschritt_melden(&self) {
        *self.status.fortschritt.lock() = Instant::now();
    }

    pub fn ausstehend(&self) -> usize {
        self.status.ausstehend.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// BroadcastHub
// ---------------------------------------------------------------------------

/// Eine eingereichte Nachricht samt Herkunft
struct Zustellung {
    nachricht: Message,
    absender: Option<SessionId>,
}

struct RegistryEintrag {
    sender: SessionSender,
    /// Beitrittsnummer, nur fuer die Roster-Reihenfolge
    beitritt: u64,
}

/// Zentrale Broadcast-Instanz eines laufenden Relays
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    registry: DashMap<SessionId, RegistryEintrag>,
    einreichung_tx: mpsc::UnboundedSender<Zustellung>,
    /// Serialisiert Registry-Aenderung + Roster-Snapshot + Einreichung,
    /// damit Roster-Nachrichten in Aenderungsreihenfolge in der Queue landen
    mitglieder: Mutex<()>,
    beitritt_zaehler: AtomicU64,
    richtlinie: ZustellRichtlinie,
    /// Gesetzt sobald das Stoppen beginnt: keine Beitritte, keine
    /// Austritts-Broadcasts mehr
    schliessend: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    metriken: RelayMetrics,
}

impl BroadcastHub {
    /// Erstellt einen neuen Hub und startet seinen Dispatcher-Task
    ///
    /// Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub fn neu(richtlinie: ZustellRichtlinie, metriken: RelayMetrics) -> Self {
        let (einreichung_tx, einreichung_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(HubInner {
            registry: DashMap::new(),
            einreichung_tx,
            mitglieder: Mutex::new(()),
            beitritt_zaehler: AtomicU64::new(0),
            richtlinie,
            schliessend: AtomicBool::new(false),
            shutdown_tx,
            dispatcher: Mutex::new(None),
            metriken,
        });

        let handle = tokio::spawn(dispatcher_schleife(
            Arc::downgrade(&inner),
            einreichung_rx,
            shutdown_rx,
        ));
        *inner.dispatcher.lock() = Some(handle);

        Self { inner }
    }

    /// Registriert eine Sitzung und verteilt USER_JOIN + Roster
    pub fn registrieren(&self, sender: SessionSender) -> RelayResult<()> {
        let _mitglieder = self.inner.mitglieder.lock();
        if self.ist_schliessend() {
            return Err(RelayError::HubGestoppt);
        }

        let id = sender.id();
        let identity = sender.identity().clone();
        let beitritt = self.inner.beitritt_zaehler.fetch_add(1, Ordering::Relaxed);

        if self
            .inner
            .registry
            .insert(id, RegistryEintrag { sender, beitritt })
            .is_none()
        {
            self.inner.metriken.active_sessions.inc();
        }

        tracing::info!(
            session = %id,
            username = %identity,
            anzahl = self.inner.registry.len(),
            "Sitzung registriert"
        );

        self.zustellung_einreihen(Message::user_join(identity), Some(id))?;
        self.zustellung_einreihen(Message::roster_update(self.roster()), None)
    }

    /// Entfernt eine Sitzung und verteilt USER_LEAVE + Roster
    ///
    /// Idempotent: nur der erste Aufruf pro Sitzung erzeugt Ereignisse.
    /// Gibt zurueck ob die Sitzung registriert war.
    pub fn entfernen(&self, id: &SessionId) -> bool {
        let _mitglieder = self.inner.mitglieder.lock();

        let Some((_, eintrag)) = self.inner.registry.remove(id) else {
            tracing::trace!(session = %id, "Sitzung war nicht registriert");
            return false;
        };
        self.inner.metriken.active_sessions.dec();

        let identity = eintrag.sender.identity().clone();
        tracing::info!(
            session = %id,
            username = %identity,
            anzahl = self.inner.registry.len(),
            "Sitzung entfernt"
        );

        // Schliesst die ausgehende Queue der Sitzung
        drop(eintrag);

        if !self.ist_schliessend() {
            let ergebnis = self
                .zustellung_einreihen(Message::user_leave(identity), None)
                .and_then(|()| {
                    self.zustellung_einreihen(Message::roster_update(self.roster()), None)
                });
            if let Err(e) = ergebnis {
                tracing::debug!(session = %id, fehler = %e, "Austritt nicht mehr verteilt");
            }
        }
        true
    }

    /// Reicht eine Nachricht zur Verteilung ein
    ///
    /// Blockiert nie. `absender` ist die Sitzung, von der die Nachricht
    /// stammt (fuer `ZustellRichtlinie::OhneAbsender`).
    pub fn einreichen(&self, nachricht: Message, absender: Option<SessionId>) -> RelayResult<()> {
        if self.ist_gestoppt() {
            return Err(RelayError::HubGestoppt);
        }
        self.zustellung_einreihen(nachricht, absender)
    }

    fn zustellung_einreihen(&self, nachricht: Message, absender: Option<SessionId>) -> RelayResult<()> {
        self.inner
            .einreichung_tx
            .send(Zustellung { nachricht, absender })
            .map_err(|_| RelayError::HubGestoppt)?;
        self.inner.metriken.messages_submitted_total.inc();
        Ok(())
    }

    /// Aktuelle Benutzernamen in Beitrittsreihenfolge
    pub fn roster(&self) -> Vec<String> {
        let mut eintraege: Vec<(u64, String)> = self
            .inner
            .registry
            .iter()
            .map(|e| (e.beitritt, e.sender.identity().username.clone()))
            .collect();
        eintraege.sort_unstable_by_key(|(beitritt, _)| *beitritt);
        eintraege.into_iter().map(|(_, name)| name).collect()
    }

    pub fn sitzungs_anzahl(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn ist_registriert(&self, id: &SessionId) -> bool {
        self.inner.registry.contains_key(id)
    }

    pub fn ist_gestoppt(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Stoppen eingeleitet oder abgeschlossen
    pub fn ist_schliessend(&self) -> bool {
        self.inner.schliessend.load(Ordering::Acquire)
    }

    /// Leitet das Stoppen ein, bevor die Sitzungen beendet werden
    ///
    /// Danach werden keine Sitzungen mehr registriert und Abmeldungen
    /// erzeugen kein USER_LEAVE mehr. Nachrichten werden weiter verteilt.
    pub fn stoppen_einleiten(&self) {
        let _mitglieder = self.inner.mitglieder.lock();
        if !self.inner.schliessend.swap(true, Ordering::AcqRel) {
            tracing::debug!("Broadcast-Hub: Stoppen eingeleitet");
        }
    }

    pub fn metriken(&self) -> &RelayMetrics {
        &self.inner.metriken
    }

    /// Stoppt den Dispatcher und leert die Registry
    ///
    /// Alle ausgehenden Queues werden dadurch geschlossen. Es wird kein
    /// USER_LEAVE mehr verteilt. Idempotent.
    pub async fn stoppen(&self) {
        self.stoppen_einleiten();
        self.inner.shutdown_tx.send_replace(true);

        let handle = self.inner.dispatcher.lock().take();
        let Some(handle) = handle else {
            return;
        };

        if let Err(e) = handle.await {
            tracing::error!(fehler = %e, "Dispatcher-Task abgebrochen");
        }

        {
            let _mitglieder = self.inner.mitglieder.lock();
            let anzahl = self.inner.registry.len();
            self.inner.registry.clear();
            self.inner.metriken.active_sessions.sub(anzahl as i64);
        }

        tracing::info!("Broadcast-Hub gestoppt");
    }

    /// Stellt eine Nachricht an alle registrierten Sitzungen zu
    fn zustellen(&self, zustellung: Zustellung) {
        let Zustellung { nachricht, absender } = zustellung;

        // Copy-on-iterate: keine Shard-Locks waehrend Senden/Entfernen
        let empfaenger: Vec<SessionSender> = self
            .inner
            .registry
            .iter()
            .map(|e| e.sender.clone())
            .collect();

        tracing::debug!(
            kind = ?nachricht.kind,
            empfaenger = empfaenger.len(),
            "Broadcast: {}",
            nachricht.display_text()
        );

        let mut fehlgeschlagen = Vec::new();
        for sender in &empfaenger {
            if self.inner.richtlinie == ZustellRichtlinie::OhneAbsender
                && absender == Some(sender.id())
            {
                continue;
            }

            match sender.senden(nachricht.clone()) {
                Ok(()) => self.inner.metriken.deliveries_total.inc(),
                Err(e) => {
                    self.inner.metriken.delivery_failures_total.inc();
                    tracing::warn!(
                        session = %sender.id(),
                        username = %sender.identity(),
                        fehler = %e,
                        "Zustellung fehlgeschlagen – Sitzung wird entfernt"
                    );
                    fehlgeschlagen.push(sender.id());
                }
            }
        }
        drop(empfaenger);

        for id in fehlgeschlagen {
            self.entfernen(&id);
        }
    }
}

/// Einziger Konsument der Einreichungs-Queue
///
/// Haelt nur eine schwache Referenz: wird der letzte Hub-Handle ohne
/// `stoppen` verworfen, endet die Queue und damit der Task.
async fn dispatcher_schleife(
    inner: Weak<HubInner>,
    mut einreichung_rx: mpsc::UnboundedReceiver<Zustellung>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!("Dispatcher gestartet");

    loop {
        tokio::select! {
            zustellung = einreichung_rx.recv() => {
                let Some(zustellung) = zustellung else { break };
                let Some(inner) = inner.upgrade() else { break };
                BroadcastHub { inner }.zustellen(zustellung);
            }

            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Dispatcher beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
