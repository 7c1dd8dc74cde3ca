//! Gemeinsame Identifikationstypen und Konstanten fuer Lanchat
//!
//! IDs verwenden das Newtype-Pattern, damit Sitzungs-IDs nicht mit
//! anderen UUIDs verwechselt werden koennen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard-TCP-Port des Relays
pub const STANDARD_PORT: u16 = 12345;

/// Standard-Backlog des Listen-Sockets
pub const STANDARD_BACKLOG: u32 = 50;

/// Maximale Laenge einer Chat-Nachricht in Zeichen
pub const MAX_NACHRICHTEN_LAENGE: usize = 1000;

/// Benutzername fuer vom Relay erzeugte Systemnachrichten
pub const SYSTEM_BENUTZER: &str = "System";

/// Opake ID einer Server-Sitzung (eine pro TCP-Verbindung)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}
