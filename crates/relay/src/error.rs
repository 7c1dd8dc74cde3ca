//! Fehlertypen fuer das Relay

use std::net::SocketAddr;
use thiserror::Error;

/// Fehlertyp fuer Listener, Sitzungen und Hub
#[derive(Debug, Error)]
pub enum RelayError {
    /// Listen-Socket konnte nicht gebunden werden (fatal beim Start)
    #[error("Bind auf {adresse} fehlgeschlagen: {quelle}")]
    BindFehler {
        adresse: SocketAddr,
        #[source]
        quelle: std::io::Error,
    },

    /// Erster Frame keine Identity oder Frame nicht dekodierbar
    #[error("Protokollverletzung: {0}")]
    Protokollverletzung(String),

    /// Gegenstelle hat die Verbindung beendet
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Schreiben an die Gegenstelle fehlgeschlagen (oder Send-Queue voll)
    #[error("Schreibfehler: {0}")]
    SchreibFehler(String),

    /// Zeitlimit ueberschritten (Handshake, Schreiben)
    #[error("Timeout: {0}")]
    Timeout(&'static str),

    /// Hub wurde gestoppt, keine Einreichung mehr moeglich
    #[error("Hub gestoppt")]
    HubGestoppt,

    /// Sonstiger IO-Fehler auf dem Socket
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Erstellt eine Protokollverletzung
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokollverletzung(msg.into())
    }

    /// Ordnet einen Lesefehler des Frame-Codecs ein
    ///
    /// `InvalidData` (ungueltiges JSON, zu grosser Frame) ist eine
    /// Protokollverletzung, alles andere ein Verbindungsfehler.
    pub fn aus_lesefehler(fehler: std::io::Error) -> Self {
        match fehler.kind() {
            std::io::ErrorKind::InvalidData => Self::Protokollverletzung(fehler.to_string()),
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::VerbindungGetrennt,
            _ => Self::Io(fehler),
        }
    }

    pub fn ist_protokollverletzung(&self) -> bool {
        matches!(self, Self::Protokollverletzung(_))
    }

    /// Normale Beendigung durch die Gegenstelle oder den Server
    pub fn ist_normales_ende(&self) -> bool {
        matches!(self, Self::VerbindungGetrennt)
    }
}

/// Result-Typ fuer das Relay
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn ungueltige_daten_sind_protokollverletzung() {
        let e = RelayError::aus_lesefehler(io::Error::new(io::ErrorKind::InvalidData, "kaputt"));
        assert!(e.ist_protokollverletzung());
    }

    #[test]
    fn reset_ist_normales_ende() {
        let e = RelayError::aus_lesefehler(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(e.ist_normales_ende());
        assert!(!e.ist_protokollverletzung());
    }

    #[test]
    fn sonstige_io_fehler_bleiben_io() {
        let e = RelayError::aus_lesefehler(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(e, RelayError::Io(_)));
    }

    #[test]
    fn bind_fehler_anzeige() {
        let e = RelayError::BindFehler {
            adresse: "0.0.0.0:12345".parse().unwrap(),
            quelle: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(e.to_string().starts_with("Bind auf 0.0.0.0:12345 fehlgeschlagen"));
    }
}
