//! Frame types shared between pipeline stages.
//!
//! [`RawFrame`] is the uncompressed capture buffer handed to the
//! encoder; [`EncodedUnit`] is one compressed access unit handed to
//! the transport. The encoder only *borrows* a `RawFrame` for the
//! duration of [`submit`](crate::encoder::Encoder::submit); the
//! source is free to recycle the underlying buffer afterwards.

use std::time::Duration;

use bytes::Bytes;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// A raw, uncompressed video frame obtained from the capture source.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
/// `stride` may exceed `width * bytes_per_pixel` due to row-alignment
/// padding imposed by the capture backend.
///
/// `pts` is the presentation timestamp, measured from stream start.
/// Sources must deliver frames with non-decreasing `pts`.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in **bytes** (may exceed `width * bpp`).
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data, `stride * height` bytes.
    pub data: Vec<u8>,
    /// Presentation timestamp.
    pub pts: Duration,
}

impl RawFrame {
    /// Total byte size the raw bitmap occupies, padding included.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Byte size of the image with row padding stripped.
    pub fn packed_len(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel() * self.height as usize
    }

    /// Copies the pixel rows into a tightly packed buffer, dropping
    /// any per-row alignment padding. This is the copy that ends the
    /// encoder's borrow of the frame.
    pub fn packed_rows(&self) -> Vec<u8> {
        let row_len = self.width as usize * self.format.bytes_per_pixel();
        let stride = self.stride as usize;
        if stride == row_len {
            return self.data.clone();
        }
        let mut out = Vec::with_capacity(self.packed_len());
        for y in 0..self.height as usize {
            let start = y * stride;
            out.extend_from_slice(&self.data[start..start + row_len]);
        }
        out
    }
}

// ── EncodedUnit ──────────────────────────────────────────────────

/// One compressed access unit, ready for transmission.
///
/// Produced by the encoder's completion path; ownership transfers to
/// the transport, which releases it after transmission or failure.
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    /// Presentation timestamp of the source frame.
    pub pts: Duration,
    /// Compressed payload. May legally be empty.
    pub payload: Bytes,
}

impl EncodedUnit {
    /// Payload byte count (the value that goes into the length prefix).
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty. Zero-length units are legal on
    /// the wire.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_stride(width: u32, height: u32, stride: u32) -> RawFrame {
        let mut data = vec![0u8; (stride * height) as usize];
        // Tag each row's first pixel byte so packing is checkable.
        for y in 0..height {
            data[(y * stride) as usize] = y as u8 + 1;
        }
        RawFrame {
            width,
            height,
            stride,
            format: PixelFormat::Bgra8,
            data,
            pts: Duration::ZERO,
        }
    }

    #[test]
    fn packed_rows_strips_padding() {
        let frame = frame_with_stride(2, 3, 16); // 8 bytes of pixels, 8 of padding
        assert_eq!(frame.byte_len(), 48);
        assert_eq!(frame.packed_len(), 24);

        let packed = frame.packed_rows();
        assert_eq!(packed.len(), 24);
        assert_eq!(packed[0], 1);
        assert_eq!(packed[8], 2);
        assert_eq!(packed[16], 3);
    }

    #[test]
    fn packed_rows_without_padding_is_identity() {
        let frame = frame_with_stride(4, 2, 16); // stride == width * 4
        assert_eq!(frame.packed_rows(), frame.data);
    }

    #[test]
    fn zero_length_unit_is_legal() {
        let unit = EncodedUnit {
            pts: Duration::from_millis(33),
            payload: Bytes::new(),
        };
        assert!(unit.is_empty());
        assert_eq!(unit.len(), 0);
    }
}
