//! The frame source contract.
//!
//! Capture backends are external collaborators: the pipeline only
//! defines the contract they must satisfy. A source pushes frames
//! into the [`FrameSink`] it was given at start, from its own
//! delivery context (thread, queue, callback; never assumed to be
//! the encoder's completion context), with non-decreasing timestamps,
//! until it is explicitly stopped.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::debug;

use crate::encoder::SubmitHandle;
use crate::error::CastError;
use crate::frame::RawFrame;
use crate::stats::PipelineStats;

// ── FrameSource ──────────────────────────────────────────────────

/// Contract for frame producers.
pub trait FrameSource: Send {
    /// Begin capture, delivering every frame into `sink` until
    /// [`stop`](Self::stop) is called.
    fn start(&mut self, sink: FrameSink) -> Result<(), CastError>;

    /// Stop capture. Must not block indefinitely.
    fn stop(&mut self);
}

// ── FrameSink ────────────────────────────────────────────────────

/// The pipeline's ingest handle, handed to the frame source.
///
/// Cloneable and cheap; [`deliver`](Self::deliver) is bounded-time so
/// it may be called from a capture callback without stalling it. The
/// frame is only borrowed for the duration of the call.
#[derive(Clone)]
pub struct FrameSink {
    encoder: SubmitHandle,
    stats: Arc<PipelineStats>,
}

impl FrameSink {
    pub(crate) fn new(encoder: SubmitHandle, stats: Arc<PipelineStats>) -> Self {
        Self { encoder, stats }
    }

    /// Submit one frame to the pipeline.
    ///
    /// A rejected frame is counted and dropped. Non-fatal: the next
    /// frame may well succeed. The error is still returned for
    /// sources that want to react (a fault-state session rejects
    /// everything, for instance).
    pub fn deliver(&self, frame: &RawFrame) -> Result<(), CastError> {
        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);
        match self.encoder.submit(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(pts = ?frame.pts, error = %e, "frame rejected at ingest");
                Err(e)
            }
        }
    }

    /// Current pipeline counters, for sources that pace or report on
    /// drop rates.
    pub fn stats(&self) -> crate::stats::StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the encoder session behind this sink.
    pub(crate) fn close(&self) {
        self.encoder.close();
    }
}
