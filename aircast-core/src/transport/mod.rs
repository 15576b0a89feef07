//! TCP transport for compressed units with strict write ordering.
//!
//! One [`Transport`] owns one outbound connection. Units are admitted
//! into a small bounded queue and drained by a single writer task that
//! fully writes and flushes each unit's length prefix and payload
//! before dequeuing the next. That single-writer discipline is the one
//! true mutual-exclusion point in the pipeline: interleaving two
//! units' bytes would desynchronize the receiver's framing with no
//! way to recover (the wire format carries no resync marker).
//!
//! Backpressure is the admission control: when the queue is full,
//! [`send`](Transport::send) fails with
//! [`CastError::Backpressure`] and the caller drops that unit.
//! Real-time video tolerates a dropped frame far better than a
//! latency spike, so the bound is kept small.
//!
//! A failed link is terminal: all queued units are released and the
//! owning pipeline decides whether to rebuild the transport.

pub mod codec;

pub use codec::{LENGTH_PREFIX_SIZE, MAX_UNIT_SIZE, WireCodec};

use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CastError;
use crate::frame::EncodedUnit;

// ── LinkState ────────────────────────────────────────────────────

/// Lifecycle of the single outbound connection.
///
/// ```text
///  Unstarted ──► Connecting ──► Ready ──► Closed
///                    │            │
///                    ▼            ▼
///                  Failed ◄───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No connection attempt yet. Initial state.
    #[default]
    Unstarted,

    /// TCP connection initiated but not yet established.
    Connecting,

    /// Link is up; sends are admitted.
    Ready,

    /// The connection dropped or could not be established. Terminal;
    /// the transport never reconnects on its own.
    Failed,

    /// The transport was closed deliberately. Terminal.
    Closed,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unstarted => write!(f, "Unstarted"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl LinkState {
    /// Sends are only valid in this state.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Terminal states; the link will never carry another unit.
    pub fn is_down(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

// ── TransportConfig ──────────────────────────────────────────────

/// Configuration for [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Send queue bound. Units beyond this depth are shed with
    /// [`CastError::Backpressure`]. Small on purpose.
    pub queue_depth: usize,
    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Per-unit payload ceiling enforced at admission and framing.
    pub max_unit_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            connect_timeout: Duration::from_secs(5),
            max_unit_size: MAX_UNIT_SIZE,
        }
    }
}

// ── Transport ────────────────────────────────────────────────────

/// Single-connection sender for encoded units.
///
/// Created by [`connect`](Self::connect). Exclusively owns the
/// underlying connection; nothing else may write to it.
#[derive(Debug)]
pub struct Transport {
    queue: mpsc::Sender<EncodedUnit>,
    state: watch::Receiver<LinkState>,
    cancel: CancellationToken,
    writer: JoinHandle<()>,
    queue_depth: usize,
    max_unit_size: usize,
}

impl Transport {
    /// Establish the connection to `host:port`.
    ///
    /// Drives `Unstarted → Connecting → Ready` and spawns the writer
    /// task. An unreachable or refusing endpoint leaves the link
    /// `Failed` and returns the error; there is no retry.
    pub async fn connect(
        host: &str,
        port: u16,
        config: TransportConfig,
    ) -> Result<Self, CastError> {
        let (state_tx, state_rx) = watch::channel(LinkState::Unstarted);
        let _ = state_tx.send(LinkState::Connecting);

        let stream = match timeout(config.connect_timeout, TcpStream::connect((host, port))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let _ = state_tx.send(LinkState::Failed);
                return Err(CastError::Connection(e));
            }
            Err(_) => {
                let _ = state_tx.send(LinkState::Failed);
                return Err(CastError::Timeout(config.connect_timeout));
            }
        };
        // Latency over throughput: never batch small units in the kernel.
        stream.set_nodelay(true)?;

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_depth);
        let cancel = CancellationToken::new();
        let _ = state_tx.send(LinkState::Ready);
        debug!(host, port, "transport ready");

        let writer = tokio::spawn(write_loop(
            stream,
            queue_rx,
            state_tx,
            cancel.clone(),
            config.max_unit_size,
        ));

        Ok(Self {
            queue: queue_tx,
            state: state_rx,
            cancel,
            writer,
            queue_depth: config.queue_depth,
            max_unit_size: config.max_unit_size,
        })
    }

    /// Admit one unit for transmission.
    ///
    /// Never blocks: the unit is either queued behind the writer or
    /// rejected. Units are written to the wire in the exact order
    /// `send` accepted them.
    pub fn send(&self, unit: EncodedUnit) -> Result<(), CastError> {
        match *self.state.borrow() {
            LinkState::Ready => {}
            LinkState::Failed => return Err(CastError::ConnectionLost),
            LinkState::Closed => return Err(CastError::Cancelled),
            LinkState::Unstarted | LinkState::Connecting => {
                return Err(CastError::InvalidState("transport not connected"));
            }
        }

        if unit.len() > self.max_unit_size {
            return Err(CastError::UnitTooLarge {
                size: unit.len(),
                max: self.max_unit_size,
            });
        }

        self.queue.try_send(unit).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CastError::Backpressure {
                depth: self.queue_depth,
            },
            mpsc::error::TrySendError::Closed(_) => CastError::ConnectionLost,
        })
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// A watcher for link state changes, for callers that react to
    /// failure from another task.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Wait until the link reaches a terminal state and return it.
    pub async fn until_down(&self) -> LinkState {
        let mut rx = self.state.clone();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_down() {
                return state;
            }
            if rx.changed().await.is_err() {
                return LinkState::Closed;
            }
        }
    }

    /// Graceful close: stop admitting units, let the writer flush
    /// everything already queued, then drop the connection.
    pub async fn close(self) {
        let Transport { queue, writer, .. } = self;
        drop(queue);
        let _ = writer.await;
    }

    /// Immediate shutdown: queued units are released without
    /// attempting delivery.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let Transport { writer, queue, .. } = self;
        drop(queue);
        let _ = writer.await;
    }
}

// ── Writer task ──────────────────────────────────────────────────

async fn write_loop(
    stream: TcpStream,
    mut queue: mpsc::Receiver<EncodedUnit>,
    state: watch::Sender<LinkState>,
    cancel: CancellationToken,
    max_unit_size: usize,
) {
    let mut wire = FramedWrite::new(stream, WireCodec::with_max_unit_size(max_unit_size));

    loop {
        let unit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let discarded = drain(&mut queue);
                if discarded > 0 {
                    debug!(discarded, "released queued units at shutdown");
                }
                let _ = state.send(LinkState::Closed);
                return;
            }
            unit = queue.recv() => match unit {
                Some(unit) => unit,
                None => {
                    // All handles dropped and the queue is drained.
                    let _ = state.send(LinkState::Closed);
                    return;
                }
            },
        };

        // Exactly one unit in flight: `send` does not resolve until
        // this unit's prefix and payload are fed and flushed, so the
        // next dequeue cannot interleave bytes onto the wire.
        if let Err(e) = wire.send(unit).await {
            warn!(error = %e, "transport write failed, link is down");
            let _ = state.send(LinkState::Failed);
            let dropped = drain(&mut queue);
            if dropped > 0 {
                debug!(dropped, "dropped queued units after link failure");
            }
            return;
        }
    }
}

/// Close the queue and discard everything still buffered.
fn drain(queue: &mut mpsc::Receiver<EncodedUnit>) -> usize {
    queue.close();
    let mut n = 0;
    while queue.try_recv().is_ok() {
        n += 1;
    }
    n
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn unit(byte: u8, len: usize) -> EncodedUnit {
        EncodedUnit {
            pts: Duration::ZERO,
            payload: Bytes::from(vec![byte; len]),
        }
    }

    #[tokio::test]
    async fn connect_send_and_close_flushes_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport =
            Transport::connect(&addr.ip().to_string(), addr.port(), TransportConfig::default())
                .await
                .unwrap();
        assert!(transport.state().is_ready());

        let (mut peer, _) = listener.accept().await.unwrap();

        transport.send(unit(0x11, 3)).unwrap();
        transport.send(unit(0x22, 0)).unwrap();
        transport.close().await;

        let mut wire = Vec::new();
        peer.read_to_end(&mut wire).await.unwrap();
        assert_eq!(
            wire,
            vec![0x00, 0x00, 0x00, 0x03, 0x11, 0x11, 0x11, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[tokio::test]
    async fn connect_refused_reports_failure() {
        // Bind then drop to obtain a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result =
            Transport::connect(&addr.ip().to_string(), addr.port(), TransportConfig::default())
                .await;
        assert!(matches!(result, Err(CastError::Connection(_))));
    }

    #[tokio::test]
    async fn shutdown_discards_queued_units() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport =
            Transport::connect(&addr.ip().to_string(), addr.port(), TransportConfig::default())
                .await
                .unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        // Queue a unit the writer has not necessarily picked up yet,
        // then shut down immediately.
        transport.send(unit(0x33, 4)).unwrap();
        transport.shutdown().await;

        // The peer observes a clean stream end: either nothing at all
        // or the complete frame, never a truncated one.
        let mut wire = Vec::new();
        peer.read_to_end(&mut wire).await.unwrap();
        assert!(wire.is_empty() || wire.len() == LENGTH_PREFIX_SIZE + 4);
    }

    #[tokio::test]
    async fn oversized_unit_is_rejected_at_admission() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = TransportConfig {
            max_unit_size: 8,
            ..Default::default()
        };
        let transport = Transport::connect(&addr.ip().to_string(), addr.port(), config)
            .await
            .unwrap();

        let err = transport.send(unit(0xFF, 9)).unwrap_err();
        assert!(matches!(err, CastError::UnitTooLarge { size: 9, max: 8 }));
        transport.close().await;
    }
}
