//! Encode/decode engines driven by a pipeline.
//!
//! An engine is any software or hardware codec behind the [`CodecEngine`]
//! trait. The pipeline never inspects engine names to decide behavior; what
//! it needs to know is carried by [`EngineInfo`].

mod passthrough;
mod registry;

pub use passthrough::PassthroughEngine;
pub use registry::{EngineFactory, EngineRegistry};

use avpipe_core::{BufferAttrs, Error, FormatMap, Result};
use std::fmt;

/// Where the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Software,
    Hardware,
}

impl EngineKind {
    pub fn is_hardware(self) -> bool {
        self == EngineKind::Hardware
    }
}

/// Media type an engine handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Whether an engine decodes or encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Decoder,
    Encoder,
}

/// Static description of an engine implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    pub name: String,
    pub kind: EngineKind,
    pub media: MediaKind,
    pub direction: Direction,
    /// MIME types accepted. Empty means any.
    pub mime_types: Vec<String>,
}

impl EngineInfo {
    pub fn new(
        name: impl Into<String>,
        kind: EngineKind,
        media: MediaKind,
        direction: Direction,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            media,
            direction,
            mime_types: Vec::new(),
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime_types.push(mime.into());
        self
    }

    /// Check if this engine accepts `mime`.
    pub fn accepts(&self, mime: &str) -> bool {
        self.mime_types.is_empty() || self.mime_types.iter().any(|m| m == mime)
    }
}

impl fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?} {:?} {:?})",
            self.name, self.kind, self.media, self.direction
        )
    }
}

/// An encode/decode engine.
///
/// Engines are not required to be thread-safe; the pipeline serializes every
/// call behind one lock. Return conventions:
///
/// - `send` returns `Err(Error::NotEnoughData)` when it cannot take input
///   yet; the same buffer is offered again later.
/// - `receive` returns `Err(Error::NotEnoughData)` when no output is ready
///   and `Err(Error::EndOfStream)` once the stream is fully drained.
/// - Any other error is fatal for the session.
pub trait CodecEngine: Send {
    fn info(&self) -> &EngineInfo;

    /// Open a session for `format`.
    fn open(&mut self, format: &FormatMap) -> Result<()>;

    /// Submit one input payload.
    fn send(&mut self, data: &[u8], attrs: &BufferAttrs) -> Result<()>;

    /// Write the next output payload into `out` and describe it.
    fn receive(&mut self, out: &mut [u8]) -> Result<BufferAttrs>;

    /// Drop all buffered data; the session stays open.
    fn flush(&mut self) -> Result<()>;

    /// Close the session.
    fn close(&mut self) -> Result<()>;

    /// No further input will be sent; drain what is buffered.
    fn signal_end_of_stream(&mut self) -> Result<()>;

    /// Adjust parameters of a running session.
    fn set_parameter(&mut self, format: &FormatMap) -> Result<()> {
        let _ = format;
        Err(Error::unsupported(format!(
            "{} does not accept runtime parameters",
            self.info().name
        )))
    }

    /// Output format announced since the last call, if any.
    fn take_format_change(&mut self) -> Option<FormatMap> {
        None
    }
}

impl fmt::Debug for dyn CodecEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecEngine")
            .field("info", self.info())
            .finish()
    }
}
