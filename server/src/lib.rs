//! lanchat-server – Bibliotheks-Root
//!
//! Verbindet Konfiguration, Relay und Observability zu einem Prozess und
//! stellt den Einstiegspunkt fuer Tests bereit.

pub mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use lanchat_observability::{observability_server_starten, RelayMetrics};
use lanchat_relay::Listener;
use std::future::Future;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        self.starten_bis(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(fehler = %e, "Ctrl-C-Handler nicht verfuegbar");
            }
        })
        .await
    }

    /// Startet alle Subsysteme und laeuft bis `shutdown` fertig ist
    ///
    /// Reihenfolge:
    /// 1. Relay-Socket binden (Fehler beendet den Start)
    /// 2. Observability-Server starten (optional)
    /// 3. Auf Shutdown warten, dann Relay und Observability stoppen
    pub async fn starten_bis<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let relay_config = self.config.relay_config()?;
        let metriken = RelayMetrics::neu().context("Metriken konnten nicht erstellt werden")?;

        tracing::info!(
            server_name = %self.config.server.name,
            relay = %relay_config.bind_addr,
            zustellung = ?relay_config.zustellung,
            "Server startet"
        );

        let relay = Listener::neu(relay_config, metriken.clone())
            .starten()
            .await
            .context("Relay konnte nicht gestartet werden")?;

        let (obs_shutdown_tx, obs_shutdown_rx) = watch::channel(false);
        let obs_task = if self.config.observability.aktiviert {
            let adresse = self.config.observability_bind_adresse()?;
            Some(tokio::spawn(async move {
                if let Err(e) = observability_server_starten(adresse, metriken, obs_shutdown_rx).await {
                    tracing::error!(fehler = %e, "Observability-Server fehlgeschlagen");
                }
            }))
        } else {
            None
        };

        tracing::info!(
            adresse = %relay.local_addr(),
            "Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)..."
        );
        shutdown.await;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        relay.stoppen().await;
        obs_shutdown_tx.send_replace(true);
        if let Some(task) = obs_task {
            if let Err(e) = task.await {
                tracing::warn!(fehler = %e, "Observability-Task abgebrochen");
            }
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}
