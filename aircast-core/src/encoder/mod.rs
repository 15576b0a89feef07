//! Frame encoder with an ordered completion stream.
//!
//! The encoder owns a [`VideoSession`] and the outstanding-submission
//! ledger that matches submissions to completions. Submissions may be
//! pipelined and the session may complete them in any order; units
//! leave through [`next_unit`](Encoder::next_unit) strictly in
//! submission order. A frame that fails to encode is dropped (that
//! frame only) and the ledger advances past it without stalling.
//!
//! [`submit`](Encoder::submit) is safe to call from the capture
//! delivery context while completions are being pumped on the runtime;
//! the ledger is the only state shared between the two.

pub mod session;

pub use session::{CodecProfile, Completion, SessionConfig, VideoSession, ZstdSession};

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Notify, mpsc};
use tracing::debug;

use crate::error::CastError;
use crate::frame::{EncodedUnit, RawFrame};

// ── EncoderConfig ────────────────────────────────────────────────

/// Configuration for [`Encoder`].
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Fixed session parameters (resolution, bitrate, profile).
    pub session: SessionConfig,
    /// Depth of the completion and output channels.
    pub completion_depth: usize,
}

impl EncoderConfig {
    pub fn new(width: u32, height: u32, bitrate_bps: u32) -> Self {
        Self {
            session: SessionConfig::new(width, height, bitrate_bps),
            completion_depth: 8,
        }
    }
}

// ── Ledger ───────────────────────────────────────────────────────

/// The outstanding-submission record.
///
/// `pending` holds submission sequence numbers in order; `early`
/// holds completions that arrived ahead of an older outstanding
/// submission. A `None` entry marks a frame that was lost (rejected
/// or failed) and must be skipped during flush.
#[derive(Default)]
struct Ledger {
    next_seq: u64,
    pending: VecDeque<u64>,
    early: BTreeMap<u64, Option<EncodedUnit>>,
}

impl Ledger {
    /// Reserve the next sequence number and register it outstanding.
    fn register(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(seq);
        seq
    }

    /// Record the outcome for `seq` and return every unit that is now
    /// deliverable in submission order.
    fn complete(&mut self, seq: u64, unit: Option<EncodedUnit>) -> Vec<EncodedUnit> {
        self.early.insert(seq, unit);
        self.flush()
    }

    /// Pop deliverable units off the front of the pending queue.
    fn flush(&mut self) -> Vec<EncodedUnit> {
        let mut ready = Vec::new();
        while let Some(&front) = self.pending.front() {
            match self.early.remove(&front) {
                Some(Some(unit)) => {
                    self.pending.pop_front();
                    ready.push(unit);
                }
                Some(None) => {
                    // Lost frame: skip without emitting.
                    self.pending.pop_front();
                }
                None => break,
            }
        }
        ready
    }

    fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

fn lock(ledger: &Mutex<Ledger>) -> MutexGuard<'_, Ledger> {
    match ledger.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── Encoder ──────────────────────────────────────────────────────

struct Shared {
    session: Box<dyn VideoSession>,
    ledger: Arc<Mutex<Ledger>>,
    notify: Arc<Notify>,
}

impl Shared {
    fn submit(&self, frame: &RawFrame) -> Result<(), CastError> {
        let seq = lock(&self.ledger).register();
        match self.session.submit(seq, frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Unblock anything queued behind the rejected frame.
                lock(&self.ledger).early.insert(seq, None);
                self.notify.notify_one();
                Err(e)
            }
        }
    }
}

/// Converts a sequence of raw frames into an ordered sequence of
/// [`EncodedUnit`]s via an asynchronous compression session.
pub struct Encoder {
    shared: Arc<Shared>,
    units: mpsc::Receiver<EncodedUnit>,
}

impl Encoder {
    /// Create an encoder backed by the zstd session.
    ///
    /// Fails with [`CastError::Configuration`] if the parameters are
    /// unsupported; that is fatal to the pipeline, there is no
    /// fallback backend.
    pub fn initialize(config: EncoderConfig) -> Result<Self, CastError> {
        let (completion_tx, completion_rx) = mpsc::channel(config.completion_depth.max(1));
        let session = ZstdSession::create(&config.session, completion_tx)?;
        Ok(Self::with_session(
            Box::new(session),
            completion_rx,
            config.completion_depth,
        ))
    }

    /// Wire the encoder around a caller-supplied session.
    ///
    /// The session must deliver its [`Completion`]s on the sending
    /// half of `completions`. This is the seam tests use to slot in
    /// passthrough or scripted sessions.
    pub fn with_session(
        session: Box<dyn VideoSession>,
        completions: mpsc::Receiver<Completion>,
        depth: usize,
    ) -> Self {
        let ledger = Arc::new(Mutex::new(Ledger::default()));
        let notify = Arc::new(Notify::new());
        let (units_tx, units_rx) = mpsc::channel(depth.max(1));

        tokio::spawn(pump(
            Arc::clone(&ledger),
            Arc::clone(&notify),
            completions,
            units_tx,
        ));

        Self {
            shared: Arc::new(Shared {
                session,
                ledger,
                notify,
            }),
            units: units_rx,
        }
    }

    /// Enqueue one frame for compression.
    ///
    /// Returns once the session acknowledges acceptance: bounded
    /// time, never waiting for the encode itself. The frame is only
    /// borrowed for the duration of the call.
    pub fn submit(&self, frame: &RawFrame) -> Result<(), CastError> {
        self.shared.submit(frame)
    }

    /// A cloneable submission handle for the capture delivery context.
    pub fn submit_handle(&self) -> SubmitHandle {
        SubmitHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Receive the next unit, in submission order.
    ///
    /// Returns `None` once the session is closed and every in-flight
    /// completion has drained.
    pub async fn next_unit(&mut self) -> Option<EncodedUnit> {
        self.units.recv().await
    }

    /// Stop accepting submissions. In-flight encodes drain into the
    /// unit stream, which then ends.
    pub fn close(&self) {
        self.shared.session.close();
    }

    /// Submissions currently outstanding inside the session.
    pub fn in_flight(&self) -> usize {
        lock(&self.shared.ledger).outstanding()
    }
}

/// Cheap handle for submitting frames from the capture context.
#[derive(Clone)]
pub struct SubmitHandle {
    shared: Arc<Shared>,
}

impl SubmitHandle {
    /// See [`Encoder::submit`].
    pub fn submit(&self, frame: &RawFrame) -> Result<(), CastError> {
        self.shared.submit(frame)
    }

    /// See [`Encoder::close`].
    pub fn close(&self) {
        self.shared.session.close();
    }
}

// ── Completion pump ──────────────────────────────────────────────

async fn pump(
    ledger: Arc<Mutex<Ledger>>,
    notify: Arc<Notify>,
    mut completions: mpsc::Receiver<Completion>,
    units: mpsc::Sender<EncodedUnit>,
) {
    loop {
        let ready = tokio::select! {
            maybe = completions.recv() => match maybe {
                Some(Completion { seq, pts, result }) => {
                    let mut guard = lock(&ledger);
                    match result {
                        Ok(payload) => guard.complete(seq, Some(EncodedUnit { pts, payload })),
                        Err(e) => {
                            debug!(seq, error = %e, "dropping frame that failed to encode");
                            guard.complete(seq, None)
                        }
                    }
                }
                // Session closed and fully drained.
                None => return,
            },
            // A rejected submission may have left a deliverable run
            // behind its tombstone.
            _ = notify.notified() => lock(&ledger).flush(),
        };

        for unit in ready {
            if units.send(unit).await.is_err() {
                return;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Session whose completions are driven by the test through the
    /// channel it was given.
    struct ManualSession {
        reject: AtomicBool,
        closed: AtomicBool,
    }

    impl ManualSession {
        fn new() -> Self {
            Self {
                reject: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }
        }
    }

    impl VideoSession for ManualSession {
        fn submit(&self, _seq: u64, _frame: &RawFrame) -> Result<(), CastError> {
            if self.closed.load(Ordering::Acquire) {
                return Err(CastError::EncodeSubmission("session closed"));
            }
            if self.reject.load(Ordering::Acquire) {
                return Err(CastError::EncodeSubmission("session pipeline saturated"));
            }
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    fn frame(pts_ms: u64) -> RawFrame {
        RawFrame {
            width: 2,
            height: 2,
            stride: 8,
            format: PixelFormat::Bgra8,
            data: vec![0; 16],
            pts: Duration::from_millis(pts_ms),
        }
    }

    fn completion(seq: u64, pts_ms: u64) -> Completion {
        Completion {
            seq,
            pts: Duration::from_millis(pts_ms),
            result: Ok(Bytes::from(vec![seq as u8])),
        }
    }

    fn manual_encoder() -> (Encoder, mpsc::Sender<Completion>, Arc<ManualSession>) {
        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(ManualSession::new());
        let encoder = Encoder::with_session(Box::new(SharedSession(Arc::clone(&session))), rx, 16);
        (encoder, tx, session)
    }

    /// Box-able wrapper so the test keeps a handle on the session.
    struct SharedSession(Arc<ManualSession>);

    impl VideoSession for SharedSession {
        fn submit(&self, seq: u64, frame: &RawFrame) -> Result<(), CastError> {
            self.0.submit(seq, frame)
        }
        fn close(&self) {
            self.0.close();
        }
    }

    #[tokio::test]
    async fn out_of_order_completions_are_reordered() {
        let (mut encoder, tx, _session) = manual_encoder();

        for pts in [0u64, 33, 66] {
            encoder.submit(&frame(pts)).unwrap();
        }

        // Completions arrive scrambled: 2, 0, 1.
        tx.send(completion(2, 66)).await.unwrap();
        tx.send(completion(0, 0)).await.unwrap();
        tx.send(completion(1, 33)).await.unwrap();

        let mut pts_out = Vec::new();
        for _ in 0..3 {
            pts_out.push(encoder.next_unit().await.unwrap().pts);
        }
        assert_eq!(
            pts_out,
            vec![
                Duration::from_millis(0),
                Duration::from_millis(33),
                Duration::from_millis(66)
            ]
        );
    }

    #[tokio::test]
    async fn failed_frame_is_skipped_without_stalling() {
        let (mut encoder, tx, _session) = manual_encoder();

        for pts in [0u64, 33, 66] {
            encoder.submit(&frame(pts)).unwrap();
        }

        tx.send(completion(2, 66)).await.unwrap();
        tx.send(Completion {
            seq: 0,
            pts: Duration::ZERO,
            result: Err(CastError::Encoding("scripted failure".into())),
        })
        .await
        .unwrap();
        tx.send(completion(1, 33)).await.unwrap();

        // Frame 0 is gone; 1 and 2 still flow, in order.
        assert_eq!(
            encoder.next_unit().await.unwrap().pts,
            Duration::from_millis(33)
        );
        assert_eq!(
            encoder.next_unit().await.unwrap().pts,
            Duration::from_millis(66)
        );
    }

    #[tokio::test]
    async fn rejected_submission_does_not_block_later_frames() {
        let (mut encoder, tx, session) = manual_encoder();

        encoder.submit(&frame(0)).unwrap();
        tx.send(completion(0, 0)).await.unwrap();
        assert_eq!(encoder.next_unit().await.unwrap().pts, Duration::ZERO);

        // The session rejects the next frame; its tombstone must not
        // dam the ledger.
        session.reject.store(true, Ordering::Release);
        assert!(encoder.submit(&frame(33)).is_err());
        session.reject.store(false, Ordering::Release);

        encoder.submit(&frame(66)).unwrap();
        tx.send(completion(2, 66)).await.unwrap();
        assert_eq!(
            encoder.next_unit().await.unwrap().pts,
            Duration::from_millis(66)
        );
        assert_eq!(encoder.in_flight(), 0);
    }

    #[tokio::test]
    async fn unit_stream_ends_when_completions_end() {
        let (mut encoder, tx, _session) = manual_encoder();
        encoder.submit(&frame(0)).unwrap();
        tx.send(completion(0, 0)).await.unwrap();
        assert!(encoder.next_unit().await.is_some());

        drop(tx);
        assert!(encoder.next_unit().await.is_none());
    }

    #[tokio::test]
    async fn submit_after_close_is_rejected() {
        let (encoder, _tx, _session) = manual_encoder();
        encoder.close();
        assert!(matches!(
            encoder.submit(&frame(0)),
            Err(CastError::EncodeSubmission(_))
        ));
    }
}
