//! Wire-Format fuer die Relay-Verbindung
//!
//! Jeder Frame besteht aus einer Laenge (u32 big-endian) gefolgt von genau
//! so vielen Bytes UTF-8-JSON (ein `Frame`-Objekt).
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | JSON       |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge zaehlt nur die Payload-Bytes. Frames ueber der maximalen
//! Groesse werden beim Kodieren und Dekodieren mit `InvalidData` abgelehnt.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::Frame;

/// Standard-maximale Payload-Groesse (64 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// Payload-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn zu_gross(laenge: usize, max: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Frame zu gross: {laenge} Bytes (Maximum: {max} Bytes)"),
    )
}

fn payload_kodieren(frame: &Frame, max_frame_size: usize) -> io::Result<Vec<u8>> {
    let json = serde_json::to_vec(frame).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("JSON-Serialisierung fehlgeschlagen: {e}"),
        )
    })?;

    if json.len() > max_frame_size {
        return Err(zu_gross(json.len(), max_frame_size));
    }
    Ok(json)
}

fn payload_dekodieren(payload: &[u8]) -> io::Result<Frame> {
    serde_json::from_slice(payload).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("JSON-Deserialisierung fehlgeschlagen: {e}"),
        )
    })
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer `Frame`s
///
/// Wird mit `tokio_util::codec::Framed` auf Server- und Client-Seite
/// verwendet.
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use lanchat_protocol::wire::FrameCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, FrameCodec::new());
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen `FrameCodec` mit Standard-Limit
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit eigener maximaler Payload-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen ohne den Buffer zu veraendern
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(zu_gross(length, self.max_frame_size));
        }

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        payload_dekodieren(&payload).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = payload_kodieren(&item, self.max_frame_size)?;

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Direktes async Lesen/Schreiben
// ---------------------------------------------------------------------------
//
// Hilfsfunktionen fuer Tests und Werkzeuge (rohe Peers, Lasttests).
// Relay und Client selbst nutzen `FrameCodec` ueber `Framed`.

/// Liest einen einzelnen Frame aus einem `AsyncRead`
///
/// Test- und Werkzeug-Hilfe; Produktivcode liest ueber `FrameCodec`.
///
/// # Fehler
/// - `UnexpectedEof` wenn die Verbindung mitten im Frame endet
/// - `InvalidData` bei ungueltigem JSON oder zu grossem Frame
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> io::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_FIELD_SIZE];
    reader.read_exact(&mut len_buf).await?;
    let length = u32::from_be_bytes(len_buf) as usize;

    if length > max_frame_size {
        return Err(zu_gross(length, max_frame_size));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    payload_dekodieren(&payload)
}

/// Schreibt einen einzelnen Frame in einen `AsyncWrite` und flusht
///
/// Test- und Werkzeug-Hilfe; Produktivcode schreibt ueber `FrameCodec`.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, max_frame_size: usize) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = payload_kodieren(frame, max_frame_size)?;

    writer.write_all(&(json.len() as u32).to_be_bytes()).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
