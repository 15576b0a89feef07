//! # aircast-core
//!
//! Real-time screen streaming pipeline: raw frames in, length-prefixed
//! compressed units out over a single TCP connection.
//!
//! This crate contains:
//! - **Frame model**: `RawFrame`, `EncodedUnit`, `PixelFormat`
//! - **Encoder**: `Encoder` over a pluggable `VideoSession`, with the
//!   ordering ledger that keeps units in submission order across
//!   out-of-order completions
//! - **Transport**: `Transport` — bounded send queue, single writer,
//!   `WireCodec` length-prefixed framing
//! - **Pipeline**: `StreamPipeline` wiring source → encoder →
//!   transport, with `PipelineStats` drop counters
//! - **Source**: the `FrameSource` contract capture backends satisfy
//! - **Error**: `CastError` — typed, `thiserror`-based error hierarchy

pub mod encoder;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use encoder::{
    CodecProfile, Completion, Encoder, EncoderConfig, SessionConfig, SubmitHandle, VideoSession,
    ZstdSession,
};
pub use error::CastError;
pub use frame::{EncodedUnit, PixelFormat, RawFrame};
pub use pipeline::{PipelineConfig, StopHandle, StreamPipeline};
pub use source::{FrameSink, FrameSource};
pub use stats::{PipelineStats, StatsSnapshot};
pub use transport::{
    LENGTH_PREFIX_SIZE, LinkState, MAX_UNIT_SIZE, Transport, TransportConfig, WireCodec,
};
