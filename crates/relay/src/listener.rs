//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! `Listener::starten` bindet den Socket synchron zum Aufrufer: schlaegt
//! das fehl, kommt `RelayError::BindFehler` zurueck und es laeuft kein Task.
//! Danach akzeptiert ein eigener Task Verbindungen und startet pro
//! Verbindung eine `Session` in einem `JoinSet`.
//!
//! ## Stoppen
//! `ListenerHandle::stoppen` versetzt den Hub in den Stopp-Zustand (keine
//! Beitritte, keine Austritts-Broadcasts) und signalisiert Shutdown. Der
//! Accept-Task schliesst den Listen-Socket, wartet `schliessen_timeout` auf
//! die Sitzungen und bricht den Rest ab. Anschliessend wird der Hub gestoppt.

use lanchat_observability::RelayMetrics;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::hub::BroadcastHub;
use crate::session::Session;

/// Relay-Listener vor dem Start
pub struct Listener {
    config: Arc<RelayConfig>,
    metriken: RelayMetrics,
}

impl Listener {
    pub fn neu(config: RelayConfig, metriken: RelayMetrics) -> Self {
        Self {
            config: Arc::new(config),
            metriken,
        }
    }

    /// Bindet den Socket und startet Hub und Accept-Task
    pub async fn starten(self) -> RelayResult<ListenerHandle> {
        let listener = socket_binden(&self.config)?;
        let local_addr = listener.local_addr()?;

        let hub = BroadcastHub::neu(self.config.zustellung, self.metriken.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_schleife(
            listener,
            hub.clone(),
            Arc::clone(&self.config),
            self.metriken,
            shutdown_rx,
        ));

        tracing::info!(
            adresse = %local_addr,
            backlog = self.config.backlog,
            "Relay-Listener gestartet"
        );

        Ok(ListenerHandle {
            local_addr,
            hub,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }
}

/// Erstellt, bindet und oeffnet den Listen-Socket
fn socket_binden(config: &RelayConfig) -> RelayResult<TcpListener> {
    let adresse = config.bind_addr;
    let bind_fehler = |quelle: std::io::Error| RelayError::BindFehler { adresse, quelle };

    let socket = if adresse.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_fehler)?;

    // Schneller Neustart auf demselben Port
    #[cfg(unix)]
    socket.set_reuseaddr(true).map_err(bind_fehler)?;

    socket.bind(adresse).map_err(bind_fehler)?;
    socket.listen(config.backlog).map_err(bind_fehler)
}

async fn accept_schleife(
    listener: TcpListener,
    hub: BroadcastHub,
    config: Arc<RelayConfig>,
    metriken: RelayMetrics,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut sitzungen: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            // Neue eingehende Verbindung
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        metriken.connections_total.inc();
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(peer = %peer_addr, fehler = %e, "TCP_NODELAY nicht gesetzt");
                        }

                        let session = Session::neu(hub.clone(), peer_addr, Arc::clone(&config));
                        let session_rx = shutdown_rx.clone();
                        sitzungen.spawn(async move {
                            let id = session.id();
                            if let Err(e) = session.ausfuehren(stream, session_rx).await {
                                tracing::debug!(session = %id, fehler = %e, "Sitzung mit Fehler beendet");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }

            // Beendete Sitzungen einsammeln
            Some(beendet) = sitzungen.join_next(), if !sitzungen.is_empty() => {
                if let Err(e) = beendet {
                    if e.is_panic() {
                        tracing::error!(fehler = %e, "Sitzungs-Task abgestuerzt");
                    }
                }
            }

            // Shutdown-Signal
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Relay-Listener: Shutdown-Signal empfangen");
                    break;
                }
            }
        }
    }

    drop(listener);
    tracing::debug!(offen = sitzungen.len(), "Listen-Socket geschlossen, warte auf Sitzungen");

    let warten = async { while sitzungen.join_next().await.is_some() {} };
    if tokio::time::timeout(config.schliessen_timeout, warten).await.is_err() {
        tracing::warn!(
            offen = sitzungen.len(),
            "Sitzungen nicht rechtzeitig beendet – werden abgebrochen"
        );
        sitzungen.abort_all();
        while sitzungen.join_next().await.is_some() {}
    }

    tracing::info!("Relay-Listener gestoppt");
}

// ---------------------------------------------------------------------------
// ListenerHandle
// ---------------------------------------------------------------------------

/// Handle auf ein laufendes Relay
///
/// Verwerfen ohne `stoppen` signalisiert nur den Shutdown.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    hub: BroadcastHub,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerHandle {
    /// Tatsaechlich gebundene Adresse (relevant bei Port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn ist_gestoppt(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stoppt Listener, alle Sitzungen und den Hub
    ///
    /// Kehrt zurueck wenn der Accept-Task beendet und der Hub gestoppt ist.
    /// Weitere Aufrufe sind wirkungslos.
    pub async fn stoppen(&self) {
        // Hub zuerst: endende Sitzungen erzeugen kein USER_LEAVE mehr
        self.hub.stoppen_einleiten();
        self.shutdown_tx.send_replace(true);

        let task = self.accept_task.lock().take();
        let Some(task) = task else {
            return;
        };

        if let Err(e) = task.await {
            tracing::error!(fehler = %e, "Accept-Task abgebrochen");
        }
        self.hub.stoppen().await;

        tracing::info!(adresse = %self.local_addr, "Relay gestoppt");
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.hub.stoppen_einleiten();
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdTcpListener;

    fn lokal() -> RelayConfig {
        RelayConfig::mit_adresse("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn starten_bindet_ephemeren_port() {
        let handle = Listener::neu(lokal(), RelayMetrics::neu().unwrap())
            .starten()
            .await
            .unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert!(!handle.ist_gestoppt());
        handle.stoppen().await;
        assert!(handle.ist_gestoppt());
        assert!(handle.hub().ist_gestoppt());
    }

    #[tokio::test]
    async fn belegter_port_liefert_bindfehler() {
        let belegt = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let adresse = belegt.local_addr().unwrap();

        let ergebnis = Listener::neu(RelayConfig::mit_adresse(adresse), RelayMetrics::neu().unwrap())
            .starten()
            .await;
        match ergebnis {
            Err(RelayError::BindFehler { adresse: a, .. }) => assert_eq!(a, adresse),
            Err(anders) => panic!("falscher Fehler: {anders}"),
            Ok(_) => panic!("Bind haette fehlschlagen muessen"),
        }
    }

    #[tokio::test]
    async fn stoppen_ist_idempotent() {
        let handle = Listener::neu(lokal(), RelayMetrics::neu().unwrap())
            .starten()
            .await
            .unwrap();
        handle.stoppen().await;
        handle.stoppen().await;
        assert!(handle.ist_gestoppt());
    }

    #[tokio::test]
    async fn nach_stoppen_keine_verbindungen_mehr() {
        let handle = Listener::neu(lokal(), RelayMetrics::neu().unwrap())
            .starten()
            .await
            .unwrap();
        let adresse = handle.local_addr();
        handle.stoppen().await;

        assert!(tokio::net::TcpStream::connect(adresse).await.is_err());
    }
}
