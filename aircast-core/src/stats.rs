//! Pipeline counters.
//!
//! Dropped frames are part of normal operation under pressure; these
//! counters make the drops observable without making them fatal.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared atomic counters, updated from every pipeline stage.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Frames delivered by the source.
    pub frames_in: AtomicU64,
    /// Frames the encoder refused at submission.
    pub frames_rejected: AtomicU64,
    /// Units accepted by the transport.
    pub units_sent: AtomicU64,
    /// Units shed to backpressure.
    pub units_dropped: AtomicU64,
    /// Payload bytes accepted by the transport.
    pub bytes_sent: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            units_sent: self.units_sent.load(Ordering::Relaxed),
            units_dropped: self.units_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_in: u64,
    pub frames_rejected: u64,
    pub units_sent: u64,
    pub units_dropped: u64,
    pub bytes_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = PipelineStats::default();
        stats.frames_in.fetch_add(3, Ordering::Relaxed);
        stats.units_dropped.fetch_add(1, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.frames_in, 3);
        assert_eq!(snap.units_dropped, 1);
        assert_eq!(snap.units_sent, 0);
    }
}
