//! Length-prefixed wire framing for encoded units.
//!
//! Each access unit travels as:
//!
//! ```text
//! length:   u32  (4, big-endian) — byte count of the payload only
//! payload:  [u8] (length bytes)  — raw compressed bitstream
//! ```
//!
//! No checksum, no sequence number, no handshake. The receiver splits
//! the byte stream into `length`-sized chunks in arrival order and
//! feeds each payload to its decoder. There is no resynchronization
//! marker: if framing is ever violated the stream is unrecoverable,
//! which is why the transport writes units through a single writer.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CastError;
use crate::frame::EncodedUnit;

// ── Constants ────────────────────────────────────────────────────

/// Size of the length prefix on the wire.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Sanity ceiling on a single unit's payload. A real-time access unit
/// is far smaller; anything above this indicates a desynchronized or
/// hostile peer.
pub const MAX_UNIT_SIZE: usize = 16 * 1024 * 1024;

// ── WireCodec ────────────────────────────────────────────────────

/// Codec for the length-prefixed unit stream.
///
/// The encoder half serializes one [`EncodedUnit`] per call; the
/// decoder half yields one payload [`Bytes`] per complete frame
/// (zero-length payloads are legal and are reproduced).
#[derive(Debug, Clone)]
pub struct WireCodec {
    max_unit_size: usize,
}

impl WireCodec {
    pub fn new() -> Self {
        Self {
            max_unit_size: MAX_UNIT_SIZE,
        }
    }

    /// Override the per-unit size ceiling (tests, constrained links).
    pub fn with_max_unit_size(max_unit_size: usize) -> Self {
        Self { max_unit_size }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<EncodedUnit> for WireCodec {
    type Error = CastError;

    fn encode(&mut self, unit: EncodedUnit, dst: &mut BytesMut) -> Result<(), CastError> {
        let len = unit.payload.len();
        if len > self.max_unit_size {
            return Err(CastError::UnitTooLarge {
                size: len,
                max: self.max_unit_size,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + len);
        dst.extend_from_slice(&(len as u32).to_be_bytes());
        dst.extend_from_slice(&unit.payload);
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = Bytes;
    type Error = CastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CastError> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > self.max_unit_size {
            return Err(CastError::UnitTooLarge {
                size: len,
                max: self.max_unit_size,
            });
        }

        if src.len() < LENGTH_PREFIX_SIZE + len {
            // Wait for the rest of the payload.
            src.reserve(LENGTH_PREFIX_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(len).freeze()))
    }
}

// ── Tests ────────────────────────────────────────────────────────
