//! Pipeline orchestration: source → encoder → transport.
//!
//! [`StreamPipeline::start`] connects the transport, creates the
//! compression session, and spawns the forward task that moves
//! ordered units from the encoder into the transport. Backpressure
//! sheds are absorbed and counted; connection-level failures
//! terminate the pipeline and surface through
//! [`join`](StreamPipeline::join); the owner decides whether to
//! build a new pipeline, nothing restarts itself.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::encoder::{CodecProfile, Encoder, EncoderConfig};
use crate::error::CastError;
use crate::source::FrameSink;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::transport::{Transport, TransportConfig};

// ── PipelineConfig ───────────────────────────────────────────────

/// Everything the pipeline consumes from outside, supplied once at
/// startup. There is no runtime renegotiation and no ambient global
/// state: the destination lives here and only here.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Destination host (pre-known; discovery is out of scope).
    pub host: String,
    /// Destination port.
    pub port: u16,
    /// Capture width in pixels, fixed for the session.
    pub width: u32,
    /// Capture height in pixels, fixed for the session.
    pub height: u32,
    /// Target bitrate in bits per second, fixed for the session.
    pub bitrate_bps: u32,
    /// Codec profile for the session.
    pub profile: CodecProfile,
    /// Transport tuning (queue bound, connect timeout).
    pub transport: TransportConfig,
}

impl PipelineConfig {
    pub fn new(host: impl Into<String>, port: u16, width: u32, height: u32) -> Self {
        Self {
            host: host.into(),
            port,
            width,
            height,
            bitrate_bps: 5_000_000,
            profile: CodecProfile::default(),
            transport: TransportConfig::default(),
        }
    }
}

// ── StreamPipeline ───────────────────────────────────────────────

/// A running capture → encode → send pipeline.
pub struct StreamPipeline {
    sink: FrameSink,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    forward: JoinHandle<Result<(), CastError>>,
}

impl StreamPipeline {
    /// Connect and bring the pipeline up.
    ///
    /// Fails fast: an unreachable destination or an unsupported
    /// encoder configuration is returned here, before any frame is
    /// accepted.
    pub async fn start(config: PipelineConfig) -> Result<Self, CastError> {
        let transport =
            Transport::connect(&config.host, config.port, config.transport.clone()).await?;

        let mut encoder_config =
            EncoderConfig::new(config.width, config.height, config.bitrate_bps);
        encoder_config.session.profile = config.profile;
        let encoder = Encoder::initialize(encoder_config)?;

        let stats = Arc::new(PipelineStats::default());
        let sink = FrameSink::new(encoder.submit_handle(), Arc::clone(&stats));
        let cancel = CancellationToken::new();

        let forward = tokio::spawn(forward_loop(
            encoder,
            transport,
            Arc::clone(&stats),
            cancel.clone(),
        ));

        info!(host = %config.host, port = config.port,
              width = config.width, height = config.height, "pipeline started");

        Ok(Self {
            sink,
            stats,
            cancel,
            forward,
        })
    }

    /// The ingest handle for the frame source.
    pub fn frame_sink(&self) -> FrameSink {
        self.sink.clone()
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// A cloneable handle that can stop the pipeline from anywhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            sink: self.sink.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Stop the pipeline: the session stops accepting frames, queued
    /// sends are released without delivery, the connection closes.
    /// Bounded; never waits on the network.
    pub fn stop(&self) {
        self.sink.close();
        self.cancel.cancel();
    }

    /// Wait for the pipeline to finish and return why it stopped:
    /// `Ok` after a deliberate stop or drained session, `Err` when
    /// the connection failed mid-stream.
    pub async fn join(self) -> Result<(), CastError> {
        self.forward.await?
    }
}

/// Stops a [`StreamPipeline`] from another task or thread.
#[derive(Clone)]
pub struct StopHandle {
    sink: FrameSink,
    cancel: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.sink.close();
        self.cancel.cancel();
    }
}

// ── Forward task ─────────────────────────────────────────────────

enum Exit {
    Cancelled,
    Drained,
    Fatal(CastError),
}

async fn forward_loop(
    mut encoder: Encoder,
    transport: Transport,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) -> Result<(), CastError> {
    let exit = loop {
        let unit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Exit::Cancelled,
            state = transport.until_down() => {
                warn!(%state, "link went down while streaming");
                break Exit::Fatal(CastError::ConnectionLost);
            }
            maybe = encoder.next_unit() => match maybe {
                Some(unit) => unit,
                None => break Exit::Drained,
            },
        };

        let len = unit.len() as u64;
        match transport.send(unit) {
            Ok(()) => {
                stats.units_sent.fetch_add(1, Ordering::Relaxed);
                stats.bytes_sent.fetch_add(len, Ordering::Relaxed);
            }
            Err(CastError::Backpressure { depth }) => {
                // The designed degradation mode: shed, count, move on.
                stats.units_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(depth, "unit shed to backpressure");
            }
            Err(e) => {
                warn!(error = %e, "transport rejected unit, stopping pipeline");
                break Exit::Fatal(e);
            }
        }
    };

    encoder.close();
    match exit {
        Exit::Cancelled => {
            transport.shutdown().await;
            Ok(())
        }
        Exit::Drained => {
            transport.close().await;
            Ok(())
        }
        Exit::Fatal(e) => {
            transport.shutdown().await;
            Err(e)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn start_fails_on_unreachable_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = PipelineConfig::new(addr.ip().to_string(), addr.port(), 640, 480);
        let result = StreamPipeline::start(config).await;
        assert!(matches!(result, Err(CastError::Connection(_))));
    }

    #[tokio::test]
    async fn start_fails_on_bad_encoder_config() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = PipelineConfig::new(addr.ip().to_string(), addr.port(), 0, 480);
        let result = StreamPipeline::start(config).await;
        assert!(matches!(result, Err(CastError::Configuration(_))));
    }

    #[tokio::test]
    async fn stop_then_join_is_clean() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = PipelineConfig::new(addr.ip().to_string(), addr.port(), 64, 64);
        let pipeline = StreamPipeline::start(config).await.unwrap();
        let _peer = listener.accept().await.unwrap();

        pipeline.stop();
        tokio::time::timeout(Duration::from_secs(5), pipeline.join())
            .await
            .expect("join timed out")
            .expect("clean stop must not error");
    }
}
