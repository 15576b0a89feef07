//! aircast-sender: stream a synthetic test pattern to a receiver.
//!
//! Stands in for a real capture backend: a dedicated thread produces
//! moving-gradient frames at a fixed cadence and pushes them through
//! the pipeline, exactly the way a screen-capture callback would.
//! Useful for bring-up of a receiver without capture hardware.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use aircast_core::{
    CastError, FrameSink, FrameSource, PipelineConfig, PixelFormat, RawFrame, StreamPipeline,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "aircast-sender",
    about = "Stream a synthetic test pattern to an aircast receiver",
    version
)]
struct Cli {
    /// Receiver host or IP (pre-known; there is no discovery).
    host: String,

    /// Receiver port.
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Frame width in pixels.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Target bitrate in bits per second.
    #[arg(long, default_value_t = 5_000_000)]
    bitrate: u32,

    /// Frames per second of the synthetic source.
    #[arg(long, default_value_t = 30)]
    fps: u32,
}

// ── Synthetic source ─────────────────────────────────────────────

/// Test-pattern frame source on its own delivery thread.
///
/// The frame buffer is recycled between deliveries; the sink only
/// borrows it for the duration of each call.
struct SyntheticSource {
    width: u32,
    height: u32,
    fps: u32,
    running: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SyntheticSource {
    fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn start(&mut self, sink: FrameSink) -> Result<(), CastError> {
        if self.worker.is_some() {
            return Err(CastError::InvalidState("source already started"));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let (width, height, fps) = (self.width, self.height, self.fps);

        self.worker = Some(std::thread::spawn(move || {
            let interval = Duration::from_secs_f64(1.0 / fps as f64);
            let started = Instant::now();
            let stride = width * 4;
            let mut frame = RawFrame {
                width,
                height,
                stride,
                format: PixelFormat::Bgra8,
                data: vec![0u8; (stride * height) as usize],
                pts: Duration::ZERO,
            };

            let mut tick = 0u64;
            while running.load(Ordering::SeqCst) {
                fill_test_pattern(&mut frame.data, width, height, tick);
                frame.pts = started.elapsed();
                // Rejections are the pipeline shedding load; keep going.
                let _ = sink.deliver(&frame);
                tick += 1;
                std::thread::sleep(interval);
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Diagonal gradient scrolling one step per tick (BGRA).
fn fill_test_pattern(data: &mut [u8], width: u32, height: u32, tick: u64) {
    let shift = (tick * 4) as u32;
    for y in 0..height {
        for x in 0..width {
            let i = ((y * width + x) * 4) as usize;
            let v = ((x + y + shift) & 0xFF) as u8;
            data[i] = v;
            data[i + 1] = v.wrapping_add(85);
            data[i + 2] = v.wrapping_add(170);
            data[i + 3] = 0xFF;
        }
    }
}

// ── Entry point ──────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), CastError> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = PipelineConfig::new(cli.host.clone(), cli.port, cli.width, cli.height);
    config.bitrate_bps = cli.bitrate;

    let pipeline = StreamPipeline::start(config).await?;
    info!(host = %cli.host, port = cli.port, fps = cli.fps, "streaming, ctrl-c to stop");

    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stopping on ctrl-c");
            stop.stop();
        }
    });

    // Periodic counters so drop rates are visible while streaming.
    let sink = pipeline.frame_sink();
    let reporter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = sink.stats();
            info!(
                frames_in = stats.frames_in,
                units_sent = stats.units_sent,
                units_dropped = stats.units_dropped,
                bytes_sent = stats.bytes_sent,
                "pipeline counters"
            );
        }
    });

    let mut source = SyntheticSource::new(cli.width, cli.height, cli.fps);
    source.start(pipeline.frame_sink())?;

    let stats_sink = pipeline.frame_sink();
    let result = pipeline.join().await;
    reporter.abort();
    source.stop();

    let stats = stats_sink.stats();
    match result {
        Ok(()) => {
            info!(units_sent = stats.units_sent, "stream ended");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, units_sent = stats.units_sent, "stream failed");
            Err(e)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}
