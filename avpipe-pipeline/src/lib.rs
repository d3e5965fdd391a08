//! # avpipe pipeline
//!
//! A threaded codec pipeline: client-filled input slots are fed to a
//! [`CodecEngine`] by a feeder task, results are pulled into output slots by
//! a drainer task, and an optional renderer task returns rendered slots from
//! a [`Surface`].
//!
//! ```no_run
//! use avpipe_pipeline::{CodecPipeline, MediaKind, PassthroughEngine, PipelineConfig};
//! use avpipe_core::FormatMap;
//! use avpipe_core::format::keys;
//!
//! let pipeline = CodecPipeline::new(
//!     Box::new(PassthroughEngine::new(MediaKind::Audio)),
//!     PipelineConfig::audio(),
//! );
//! let format = FormatMap::new()
//!     .with_int(keys::CHANNEL_COUNT, 2)
//!     .with_int(keys::SAMPLE_RATE, 48000);
//! pipeline.configure(&format)?;
//! # Ok::<(), avpipe_core::Error>(())
//! ```

mod callback;
mod config;
mod engine;
mod negotiate;
mod pipeline;
mod state;
mod surface;
mod worker;

pub use callback::Callback;
pub use config::PipelineConfig;
pub use engine::{
    CodecEngine, Direction, EngineFactory, EngineInfo, EngineKind, EngineRegistry, MediaKind,
    PassthroughEngine,
};
pub use negotiate::{negotiate, BufferGeometry, MAX_BUFFER_COUNT, MAX_DIMENSION};
pub use pipeline::{CodecPipeline, Port};
pub use state::PipelineState;
pub use surface::Surface;

pub use avpipe_core::{Error, ErrorKind, Result};
