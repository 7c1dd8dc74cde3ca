//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use anyhow::{bail, Context};
use lanchat_core::{STANDARD_BACKLOG, STANDARD_PORT};
use lanchat_observability::logging::{log_format_gueltig, log_level_gueltig};
use lanchat_protocol::DEFAULT_MAX_FRAME_SIZE;
use lanchat_relay::{RelayConfig, ZustellRichtlinie};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Relay-Einstellungen (Queues, Timeouts, Zustellung)
    pub relay: RelayEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers (nur fuer Logs)
    pub name: String,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Lanchat Relay".into(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer den Relay-Socket
    pub bind_adresse: String,
    pub port: u16,
    /// Backlog fuer den Listen-Socket
    pub backlog: u32,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: STANDARD_PORT,
            backlog: STANDARD_BACKLOG,
        }
    }
}

/// Relay-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayEinstellungen {
    /// Rueckstau pro Sitzung, ab dem ein Peer ohne Schreibfortschritt
    /// (laenger als der Schreib-Timeout) entfernt wird
    pub send_queue_groesse: usize,
    pub schreib_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Frist fuer das Beenden aller Sitzungen beim Herunterfahren
    pub schliessen_timeout_ms: u64,
    /// Maximale Frame-Payload in Bytes
    pub max_frame_groesse: usize,
    /// Nachrichten auch an den Absender zurueckschicken
    pub echo_an_absender: bool,
}

impl Default for RelayEinstellungen {
    fn default() -> Self {
        Self {
            send_queue_groesse: 256,
            schreib_timeout_ms: 5_000,
            handshake_timeout_ms: 10_000,
            schliessen_timeout_ms: 2_000,
            max_frame_groesse: DEFAULT_MAX_FRAME_SIZE,
            echo_an_absender: true,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: false,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.validieren()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte die serde nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        if self.relay.send_queue_groesse == 0 {
            bail!("relay.send_queue_groesse muss groesser als 0 sein");
        }
        if self.relay.max_frame_groesse < 1024 {
            bail!(
                "relay.max_frame_groesse ({}) muss mindestens 1024 Bytes sein",
                self.relay.max_frame_groesse
            );
        }
        if !log_level_gueltig(&self.logging.level) {
            bail!("Ungueltiges Log-Level: '{}'", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("Ungueltiges Log-Format: '{}'", self.logging.format);
        }
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse fuer das Relay zurueck
    pub fn relay_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        self.bind_adresse(self.netzwerk.port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        self.bind_adresse(self.observability.port)
    }

    fn bind_adresse(&self, port: u16) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .netzwerk
            .bind_adresse
            .parse()
            .with_context(|| format!("Ungueltige Bind-Adresse '{}'", self.netzwerk.bind_adresse))?;
        Ok(SocketAddr::new(ip, port))
    }

    /// Leitet die Laufzeit-Konfiguration des Relays ab
    pub fn relay_config(&self) -> anyhow::Result<RelayConfig> {
        let zustellung = if self.relay.echo_an_absender {
            ZustellRichtlinie::EchoAnAbsender
        } else {
            ZustellRichtlinie::OhneAbsender
        };

        Ok(RelayConfig {
            bind_addr: self.relay_bind_adresse()?,
            backlog: self.netzwerk.backlog,
            send_queue_groesse: self.relay.send_queue_groesse,
            schreib_timeout: Duration::from_millis(self.relay.schreib_timeout_ms),
            handshake_timeout: Duration::from_millis(self.relay.handshake_timeout_ms),
            schliessen_timeout: Duration::from_millis(self.relay.schliessen_timeout_ms),
            max_frame_groesse: self.relay.max_frame_groesse,
            zustellung,
        })
    }
}
