//! lanchat-relay – TCP-Relay fuer den LAN-Chat
//!
//! Nimmt Client-Verbindungen an, bindet jede an eine Identitaet und
//! verteilt alle Nachrichten in einer globalen Reihenfolge an alle
//! verbundenen Clients.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (Listener / ListenerHandle)
//!     |
//!     v
//! Session (pro Verbindung ein Task)
//!     |  State Machine: Verbindend -> Aktiv -> Schliessend -> Geschlossen
//!     |
//!     v  einreichen()
//! BroadcastHub
//!     |  FIFO-Queue -> ein Dispatcher-Task
//!     v
//! SessionSender (Queue pro Sitzung, Fortschrittskontrolle) -> Session -> Socket
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod listener;
pub mod session;

// Bequeme Re-Exporte
pub use config::{RelayConfig, ZustellRichtlinie};
pub use error::{RelayError, RelayResult};
pub use hub::{BroadcastHub, SessionEmpfaenger, SessionSender};
pub use listener::{Listener, ListenerHandle};
pub use session::{Session, SessionZustand, ABSCHIED_TEXT};
