//! # avpipe
//!
//! A codec buffer-pipeline engine. A [`CodecPipeline`] sits between a client
//! and an encode/decode [`CodecEngine`], moving fixed pools of buffer slots
//! between them on background worker threads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use avpipe::prelude::*;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl Callback for Printer {
//!     fn on_input_buffer_available(&self, index: u32) {
//!         println!("input {index} free");
//!     }
//!     fn on_output_buffer_available(&self, index: u32, attrs: BufferAttrs) {
//!         println!("output {index}: {} bytes", attrs.size);
//!     }
//!     fn on_error(&self, kind: ErrorKind, code: i32) {
//!         eprintln!("pipeline failed: {kind} ({code})");
//!     }
//! }
//!
//! fn main() -> avpipe::Result<()> {
//!     let format = FormatMap::new()
//!         .with_int(keys::CHANNEL_COUNT, 2)
//!         .with_int(keys::SAMPLE_RATE, 48000);
//!     let pipeline = CodecPipeline::from_registry(
//!         &EngineRegistry::with_defaults(),
//!         MediaKind::Audio,
//!         Direction::Decoder,
//!         &format,
//!         PipelineConfig::audio(),
//!     )?;
//!     let printer: Arc<dyn Callback> = Arc::new(Printer);
//!     pipeline.configure(&format)?;
//!     pipeline.set_callback(Arc::downgrade(&printer))?;
//!     pipeline.start()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `avpipe-core`: errors, buffer slots, pools, worker tasks, format maps
//! - `avpipe-pipeline`: lifecycle state machine, feeder/drainer/renderer
//!   workers, engine trait and registry

mod logging;
pub mod prelude;

pub use avpipe_core::format::keys;
pub use avpipe_core::{
    AcquireMode, BufferAttrs, BufferFlags, BufferPool, BufferSlot, Error, ErrorKind, FormatMap,
    FormatValue, MemoryKind, OwnedBuffer, Owner, PoolConfig, PoolPolicy, PoolStats, Result,
    WorkerTask,
};
pub use avpipe_pipeline::{
    negotiate, BufferGeometry, Callback, CodecEngine, CodecPipeline, Direction, EngineFactory,
    EngineInfo, EngineKind, EngineRegistry, MediaKind, PassthroughEngine, PipelineConfig,
    PipelineState, Port, Surface,
};
pub use logging::{init_tracing, LoggingError};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string.
pub fn version() -> &'static str {
    VERSION
}

/// Get build information.
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION,
        target: std::env::consts::ARCH,
        os: std::env::consts::OS,
        debug: cfg!(debug_assertions),
        metrics: cfg!(feature = "metrics"),
    }
}

/// Build information.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Library version.
    pub version: &'static str,
    /// Target architecture.
    pub target: &'static str,
    /// Operating system.
    pub os: &'static str,
    /// Debug build.
    pub debug: bool,
    /// Built with the `metrics` feature.
    pub metrics: bool,
}
