//! lanchat-client – Client-Seite des LAN-Chats
//!
//! `ClientRelay` baut die TCP-Verbindung auf, sendet die Identitaet als
//! ersten Frame und liefert alle vom Relay verteilten Nachrichten in
//! Empfangsreihenfolge.
//!
//! ```no_run
//! # async fn beispiel() -> lanchat_client::ClientResult<()> {
//! let relay = lanchat_client::ClientRelay::connect("127.0.0.1", 12345, "alice").await?;
//! relay.send_user_message("hallo").await?;
//! while let Some(nachricht) = relay.next_event().await {
//!     println!("{}", nachricht.display_text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod relay;

pub use error::{ClientError, ClientResult};
pub use relay::{ClientRelay, STANDARD_SENDE_TIMEOUT, TRENNUNGS_TEXT};
