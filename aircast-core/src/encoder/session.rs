//! The compression session seam.
//!
//! A [`VideoSession`] owns the stateful compression context. Frames go
//! in through [`submit`](VideoSession::submit), which returns as soon
//! as the session has accepted the frame; the compressed result comes
//! back later as a [`Completion`] on an explicit channel. Completions
//! are **not** guaranteed to arrive in submission order; the encoder's
//! ledger re-orders them.
//!
//! The shipped backend is [`ZstdSession`]: per-frame zstd compression
//! on the blocking thread pool, pipelined up to a small in-flight cap.
//! A hardware codec session slots in behind the same trait.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::CastError;
use crate::frame::RawFrame;

// ── Constants ────────────────────────────────────────────────────

/// Largest supported session dimension (8K).
const MAX_DIMENSION: u32 = 7680;

/// Frames that may be compressing concurrently. Submissions beyond
/// this are rejected so memory stays bounded when the pool lags.
const MAX_INFLIGHT_ENCODES: usize = 4;

/// Compression level in real-time mode: fastest, no lookahead.
const REALTIME_LEVEL: i32 = 1;

/// Compression level when latency is not the priority.
const THROUGHPUT_LEVEL: i32 = 3;

// ── Configuration ────────────────────────────────────────────────

/// Codec profile requested for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecProfile {
    /// Lowest decode complexity; the default for screen mirroring.
    #[default]
    Baseline,
    Main,
    High,
}

impl std::fmt::Display for CodecProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Main => write!(f, "main"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Fixed configuration of one compression session.
///
/// Resolution, profile, bitrate and the real-time flag hold for the
/// session's whole lifetime; changing any of them means tearing the
/// session down and creating a new one.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second. Fixed; no adaptation.
    pub bitrate_bps: u32,
    pub profile: CodecProfile,
    /// Minimize per-frame latency at the cost of bitstream size.
    pub realtime: bool,
}

impl SessionConfig {
    pub fn new(width: u32, height: u32, bitrate_bps: u32) -> Self {
        Self {
            width,
            height,
            bitrate_bps,
            profile: CodecProfile::default(),
            realtime: true,
        }
    }
}

// ── Completion ───────────────────────────────────────────────────

/// Result of one asynchronous encode, tagged with the submission
/// sequence number the encoder assigned.
#[derive(Debug)]
pub struct Completion {
    pub seq: u64,
    pub pts: Duration,
    pub result: Result<Bytes, CastError>,
}

// ── VideoSession ─────────────────────────────────────────────────

/// A stateful compression context.
///
/// Implementations deliver [`Completion`]s on the channel supplied at
/// construction, possibly out of submission order, possibly from a
/// different execution context than the submitter's.
pub trait VideoSession: Send + Sync + 'static {
    /// Hand one frame to the session.
    ///
    /// Must return within a bounded, small amount of time: it
    /// acknowledges acceptance, it never waits for the encode. The
    /// frame is only borrowed for the duration of the call; the
    /// session copies what it needs.
    fn submit(&self, seq: u64, frame: &RawFrame) -> Result<(), CastError>;

    /// Stop accepting frames. In-flight encodes still complete.
    fn close(&self);
}

// ── ZstdSession ──────────────────────────────────────────────────

/// Software compression session backed by per-frame zstd.
///
/// Each accepted frame is packed (row padding stripped) and compressed
/// on the blocking pool, so `submit` costs one buffer copy regardless
/// of encode latency. Because frames compress concurrently they can
/// complete out of submission order.
pub struct ZstdSession {
    width: u32,
    height: u32,
    level: i32,
    /// `None` once closed. Dropping the sender lets the completion
    /// channel end after in-flight workers finish.
    completions: Mutex<Option<mpsc::Sender<Completion>>>,
    runtime: Handle,
    in_flight: Arc<AtomicUsize>,
}

impl ZstdSession {
    /// Create the session, validating the configuration.
    ///
    /// Must be called from within a tokio runtime; the captured handle
    /// lets capture threads submit without entering the runtime.
    pub fn create(
        config: &SessionConfig,
        completions: mpsc::Sender<Completion>,
    ) -> Result<Self, CastError> {
        if config.width == 0 || config.height == 0 {
            return Err(CastError::Configuration(format!(
                "invalid resolution {}x{}",
                config.width, config.height
            )));
        }
        if config.width > MAX_DIMENSION || config.height > MAX_DIMENSION {
            return Err(CastError::Configuration(format!(
                "resolution {}x{} exceeds {}x{}",
                config.width, config.height, MAX_DIMENSION, MAX_DIMENSION
            )));
        }
        if config.bitrate_bps == 0 {
            return Err(CastError::Configuration(
                "bitrate target must be non-zero".into(),
            ));
        }
        let runtime = Handle::try_current().map_err(|_| {
            CastError::Configuration("no async runtime available for encode workers".into())
        })?;

        let level = if config.realtime {
            REALTIME_LEVEL
        } else {
            THROUGHPUT_LEVEL
        };
        debug!(
            width = config.width,
            height = config.height,
            bitrate_bps = config.bitrate_bps,
            profile = %config.profile,
            level,
            "compression session created"
        );

        Ok(Self {
            width: config.width,
            height: config.height,
            level,
            completions: Mutex::new(Some(completions)),
            runtime,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn completion_sender(&self) -> Option<mpsc::Sender<Completion>> {
        match self.completions.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl VideoSession for ZstdSession {
    fn submit(&self, seq: u64, frame: &RawFrame) -> Result<(), CastError> {
        let Some(completions) = self.completion_sender() else {
            return Err(CastError::EncodeSubmission("session closed"));
        };
        if frame.width != self.width || frame.height != self.height {
            return Err(CastError::EncodeSubmission(
                "frame does not match session resolution",
            ));
        }

        if self.in_flight.fetch_add(1, Ordering::AcqRel) >= MAX_INFLIGHT_ENCODES {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(CastError::EncodeSubmission("session pipeline saturated"));
        }

        // This copy ends the borrow: the caller may recycle the frame
        // buffer as soon as submit returns.
        let packed = frame.packed_rows();
        let pts = frame.pts;
        let level = self.level;
        let in_flight = Arc::clone(&self.in_flight);

        self.runtime.spawn_blocking(move || {
            let result = zstd::encode_all(packed.as_slice(), level)
                .map(Bytes::from)
                .map_err(|e| CastError::Encoding(e.to_string()));
            let _ = completions.blocking_send(Completion { seq, pts, result });
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });

        Ok(())
    }

    fn close(&self) {
        match self.completions.lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn test_frame(width: u32, height: u32, pts_ms: u64) -> RawFrame {
        let stride = width * 4;
        RawFrame {
            width,
            height,
            stride,
            format: PixelFormat::Bgra8,
            data: vec![0xAB; (stride * height) as usize],
            pts: Duration::from_millis(pts_ms),
        }
    }

    #[test]
    fn create_rejects_bad_configs() {
        tokio_test::block_on(async {
            let (tx, _rx) = mpsc::channel(4);
            let zero = SessionConfig::new(0, 1080, 5_000_000);
            assert!(matches!(
                ZstdSession::create(&zero, tx.clone()),
                Err(CastError::Configuration(_))
            ));

            let huge = SessionConfig::new(10_000, 1080, 5_000_000);
            assert!(matches!(
                ZstdSession::create(&huge, tx.clone()),
                Err(CastError::Configuration(_))
            ));

            let no_bitrate = SessionConfig::new(640, 480, 0);
            assert!(matches!(
                ZstdSession::create(&no_bitrate, tx),
                Err(CastError::Configuration(_))
            ));
        });
    }

    #[tokio::test]
    async fn compresses_and_completes() {
        let (tx, mut rx) = mpsc::channel(4);
        let session = ZstdSession::create(&SessionConfig::new(64, 64, 5_000_000), tx).unwrap();

        let frame = test_frame(64, 64, 33);
        session.submit(7, &frame).unwrap();

        let done = rx.recv().await.unwrap();
        assert_eq!(done.seq, 7);
        assert_eq!(done.pts, Duration::from_millis(33));
        let payload = done.result.unwrap();
        // Repetitive pixels compress well and decompress losslessly.
        assert!(payload.len() < frame.packed_len());
        let restored = zstd::decode_all(&payload[..]).unwrap();
        assert_eq!(restored, frame.packed_rows());
    }

    #[tokio::test]
    async fn rejects_after_close_and_on_geometry_change() {
        let (tx, _rx) = mpsc::channel(4);
        let session = ZstdSession::create(&SessionConfig::new(64, 64, 5_000_000), tx).unwrap();

        let wrong_size = test_frame(32, 32, 0);
        assert!(matches!(
            session.submit(0, &wrong_size),
            Err(CastError::EncodeSubmission(_))
        ));

        session.close();
        let frame = test_frame(64, 64, 0);
        assert!(matches!(
            session.submit(1, &frame),
            Err(CastError::EncodeSubmission(_))
        ));
    }

    #[tokio::test]
    async fn submit_works_from_a_plain_thread() {
        let (tx, mut rx) = mpsc::channel(4);
        let session =
            Arc::new(ZstdSession::create(&SessionConfig::new(16, 16, 1_000_000), tx).unwrap());

        // Capture sources deliver from their own context, never the
        // completion context.
        let worker = {
            let session = Arc::clone(&session);
            std::thread::spawn(move || session.submit(0, &test_frame(16, 16, 0)))
        };
        worker.join().unwrap().unwrap();

        let done = rx.recv().await.unwrap();
        assert_eq!(done.seq, 0);
        assert!(done.result.is_ok());
    }
}
