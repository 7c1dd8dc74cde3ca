//! Laufzeit-Konfiguration des Relays
//!
//! Wird vom Server aus der TOML-Konfiguration abgeleitet. Tests bauen sie
//! direkt, meist mit `bind_addr = 127.0.0.1:0`.

use lanchat_core::{STANDARD_BACKLOG, STANDARD_PORT};
use lanchat_protocol::DEFAULT_MAX_FRAME_SIZE;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// An wen der Dispatcher eine Nachricht zustellt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZustellRichtlinie {
    /// An alle registrierten Sitzungen, auch an den Absender
    #[default]
    EchoAnAbsender,
    /// An alle registrierten Sitzungen ausser dem Absender
    OhneAbsender,
}

/// Konfiguration fuer Listener, Sitzungen und Hub
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Adresse des Listen-Sockets
    pub bind_addr: SocketAddr,
    /// Backlog fuer `listen(2)`
    pub backlog: u32,
    /// Rueckstau pro Sitzung, ab dem ein Peer ohne Schreibfortschritt
    /// (laenger als der Schreib-Timeout) entfernt wird
    pub send_queue_groesse: usize,
    /// Maximale Dauer eines einzelnen Socket-Schreibvorgangs
    pub schreib_timeout: Duration,
    /// Frist fuer den Identity-Frame nach dem Verbindungsaufbau
    pub handshake_timeout: Duration,
    /// Frist fuer das Beenden aller Sitzungen beim Stoppen
    pub schliessen_timeout: Duration,
    /// Maximale Payload-Groesse eines Frames
    pub max_frame_groesse: usize,
    pub zustellung: ZustellRichtlinie,
}

impl RelayConfig {
    /// Standardkonfiguration mit anderer Bind-Adresse
    pub fn mit_adresse(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, STANDARD_PORT)),
            backlog: STANDARD_BACKLOG,
            send_queue_groesse: 256,
            schreib_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            schliessen_timeout: Duration::from_secs(2),
            max_frame_groesse: DEFAULT_MAX_FRAME_SIZE,
            zustellung: ZustellRichtlinie::EchoAnAbsender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardwerte() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:12345");
        assert_eq!(cfg.backlog, 50);
        assert_eq!(cfg.zustellung, ZustellRichtlinie::EchoAnAbsender);
    }

    #[test]
    fn mit_adresse_behaelt_rest() {
        let cfg = RelayConfig::mit_adresse("127.0.0.1:0".parse().unwrap());
        assert_eq!(cfg.bind_addr.port(), 0);
        assert_eq!(cfg.send_queue_groesse, 256);
    }
}
