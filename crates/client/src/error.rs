//! Fehlertypen fuer die Client-Seite

use thiserror::Error;

/// Fehler die bei der Server-Verbindung auftreten koennen
#[derive(Debug, Error)]
pub enum ClientError {
    /// Verbindungsaufbau oder Schreiben fehlgeschlagen
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Verbindung ist bereits geschlossen
    #[error("Nicht mit Server verbunden")]
    NichtVerbunden,

    #[error("Nachricht zu lang: {laenge} Zeichen (max {max})")]
    NachrichtZuLang { laenge: usize, max: usize },
}

/// Result-Typ fuer die Client-Seite
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anzeige_nachricht_zu_lang() {
        let fehler = ClientError::NachrichtZuLang {
            laenge: 1001,
            max: 1000,
        };
        assert_eq!(fehler.to_string(), "Nachricht zu lang: 1001 Zeichen (max 1000)");
    }

    #[test]
    fn io_fehler_konvertierung() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "abgelehnt");
        let fehler: ClientError = io.into();
        assert!(matches!(fehler, ClientError::Io(_)));
    }
}
