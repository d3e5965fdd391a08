//! Prelude module for convenient imports.
//!
//! ```rust
//! use avpipe::prelude::*;
//! ```

// Errors
pub use crate::{Error, ErrorKind, Result};

// Buffers and formats
pub use crate::{BufferAttrs, BufferFlags, FormatMap, Owner};
pub use crate::keys;

// Pipeline
pub use crate::{Callback, CodecPipeline, PipelineConfig, PipelineState, Port, Surface};

// Engines
pub use crate::{CodecEngine, Direction, EngineInfo, EngineRegistry, MediaKind};
