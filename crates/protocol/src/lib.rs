//! lanchat-protocol – Wire-Format des Chat-Relays
//!
//! Dieses Crate definiert die Datensaetze (`Identity`, `Message`), die
//! zwischen Client und Relay ausgetauscht werden, und den Frame-Codec
//! (u32 big-endian Laenge + JSON-Payload).

pub mod message;
pub mod wire;

pub use message::{Frame, Identity, Message, MessageKind};
pub use wire::{read_frame, write_frame, FrameCodec, DEFAULT_MAX_FRAME_SIZE};
