//! lanchat-core – Gemeinsame Typen und Konstanten
//!
//! Dieses Crate stellt die Bausteine bereit, die von Protokoll, Relay,
//! Client und Server gemeinsam genutzt werden.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{SessionId, MAX_NACHRICHTEN_LAENGE, STANDARD_BACKLOG, STANDARD_PORT, SYSTEM_BENUTZER};
