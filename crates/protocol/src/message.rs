//! Nachrichten-Modell des Chat-Protokolls
//!
//! Definiert die beiden Wire-Entitaeten (`Identity`, `Message`) sowie den
//! `Frame`-Umschlag, der ueber die TCP-Verbindung laeuft.
//!
//! ## Design
//! - `MessageKind` ist ein geschlossenes Enum, jeder Konsument matcht
//!   exhaustiv statt Strings zu vergleichen
//! - Roster-Updates tragen die Namensliste strukturiert im Feld `roster`;
//!   `content` enthaelt zusaetzlich die kompatible `USER_LIST_UPDATE:`-Form
//! - JSON-Serialisierung via serde, Zeitstempel als RFC 3339 (UTC)

use chrono::{DateTime, Local, Utc};
use lanchat_core::SYSTEM_BENUTZER;
use serde::{Deserialize, Serialize};

/// Praefix der kompatiblen Roster-Darstellung im `content`-Feld
pub const ROSTER_PRAEFIX: &str = "USER_LIST_UPDATE:";

/// Trennzeichen der Benutzernamen in der kompatiblen Roster-Darstellung
pub const ROSTER_TRENNER: char = ',';

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identitaet eines Chat-Teilnehmers
///
/// Wird als Wert in jeder Nachricht mitgefuehrt. Eine spaetere Umbenennung
/// aendert bereits versendete Nachrichten nicht.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }

    /// Absender-Identitaet fuer vom Relay erzeugte Nachrichten
    pub fn system() -> Self {
        Self::new(SYSTEM_BENUTZER)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.username)
    }
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Art einer Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Vom Benutzer geschriebener Text
    Text,
    /// Systemhinweis (Roster-Update, Trennung, Shutdown)
    System,
    /// Ein Benutzer ist beigetreten
    UserJoin,
    /// Ein Benutzer hat den Chat verlassen
    UserLeave,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Eine Chat-Nachricht
///
/// Wird beim Einreichen erzeugt und danach nicht mehr veraendert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Identity,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub kind: MessageKind,
    /// Strukturierte Namensliste, nur bei Roster-Updates gesetzt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roster: Option<Vec<String>>,
}

impl Message {
    /// Erstellt eine Nachricht mit dem aktuellen Zeitstempel
    pub fn new(sender: Identity, content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            sender,
            content: content.into(),
            created_at: Utc::now(),
            kind,
            roster: None,
        }
    }

    pub fn text(sender: Identity, content: impl Into<String>) -> Self {
        Self::new(sender, content, MessageKind::Text)
    }

    pub fn system(sender: Identity, content: impl Into<String>) -> Self {
        Self::new(sender, content, MessageKind::System)
    }

    /// Beitritts-Ereignis fuer `identity`
    pub fn user_join(identity: Identity) -> Self {
        let content = format!("{} joined the chat", identity.username);
        Self::new(identity, content, MessageKind::UserJoin)
    }

    /// Austritts-Ereignis fuer `identity`
    pub fn user_leave(identity: Identity) -> Self {
        let content = format!("{} left the chat", identity.username);
        Self::new(identity, content, MessageKind::UserLeave)
    }

    /// Roster-Update mit allen aktuell verbundenen Benutzernamen
    pub fn roster_update(namen: Vec<String>) -> Self {
        let mut content = String::from(ROSTER_PRAEFIX);
        content.push_str(&namen.join(&ROSTER_TRENNER.to_string()));

        let mut nachricht = Self::system(Identity::system(), content);
        nachricht.roster = Some(namen);
        nachricht
    }

    /// Gibt die Namensliste zurueck, falls dies ein Roster-Update ist
    pub fn roster(&self) -> Option<&[String]> {
        match self.kind {
            MessageKind::System => self.roster.as_deref(),
            MessageKind::Text | MessageKind::UserJoin | MessageKind::UserLeave => None,
        }
    }

    /// Prueft ob die Nachricht ein Roster-Update ist
    pub fn ist_roster_update(&self) -> bool {
        self.roster().is_some()
    }

    /// Anzeigetext fuer die Praesentationsschicht
    pub fn display_text(&self) -> String {
        match self.kind {
            MessageKind::System => format!("[System] {}", self.content),
            MessageKind::UserJoin => format!("→ {} joined the chat", self.sender.username),
            MessageKind::UserLeave => format!("← {} left the chat", self.sender.username),
            MessageKind::Text => format!("[{}]: {}", self.sender.username, self.content),
        }
    }

    /// Zeitstempel als `HH:MM:SS` in lokaler Zeit
    pub fn formatted_time(&self) -> String {
        self.created_at
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ein Datensatz auf der Leitung
///
/// Intern getaggt ueber das Feld `"frame"`:
///
/// ```text
/// {"frame":"identity","username":"alice"}
/// {"frame":"message","sender":{"username":"alice"},"content":"hi",
///  "created_at":"2026-10-19T12:00:00.123456789Z","kind":"TEXT"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    /// Erster Frame jeder Client-Verbindung
    Identity(Identity),
    /// Alle weiteren Frames
    Message(Message),
}

impl From<Identity> for Frame {
    fn from(identity: Identity) -> Self {
        Frame::Identity(identity)
    }
}

impl From<Message> for Frame {
    fn from(nachricht: Message) -> Self {
        Frame::Message(nachricht)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
