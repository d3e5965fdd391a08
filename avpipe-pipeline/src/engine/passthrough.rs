//! Software engine that forwards input payloads unchanged.

use super::{CodecEngine, Direction, EngineInfo, EngineKind, MediaKind};
use avpipe_core::{BufferAttrs, BufferFlags, Error, FormatMap, Result};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Default number of payloads buffered before `send` pushes back.
const DEFAULT_DEPTH: usize = 4;

struct Frame {
    data: Vec<u8>,
    timestamp: i64,
    flags: BufferFlags,
}

/// Reference engine: every sent payload comes back out, in order.
///
/// Useful for exercising the pipeline without a real codec. It reports its
/// configured format as the output format with the first output buffer.
pub struct PassthroughEngine {
    info: EngineInfo,
    depth: usize,
    opened: bool,
    frames: VecDeque<Frame>,
    eos_pending: bool,
    format: FormatMap,
    announced: bool,
    format_change: Option<FormatMap>,
}

impl PassthroughEngine {
    pub fn new(media: MediaKind) -> Self {
        Self {
            info: EngineInfo::new(
                "passthrough",
                EngineKind::Software,
                media,
                Direction::Decoder,
            ),
            depth: DEFAULT_DEPTH,
            opened: false,
            frames: VecDeque::new(),
            eos_pending: false,
            format: FormatMap::new(),
            announced: false,
            format_change: None,
        }
    }

    /// Payloads buffered before `send` returns `NotEnoughData`.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }

    fn check_open(&self) -> Result<()> {
        if self.opened {
            Ok(())
        } else {
            Err(Error::invalid_state("passthrough session not open"))
        }
    }
}

impl CodecEngine for PassthroughEngine {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn open(&mut self, format: &FormatMap) -> Result<()> {
        self.format = format.clone();
        self.frames.clear();
        self.eos_pending = false;
        self.announced = false;
        self.format_change = None;
        self.opened = true;
        debug!(media = ?self.info.media, %format, "passthrough opened");
        Ok(())
    }

    fn send(&mut self, data: &[u8], attrs: &BufferAttrs) -> Result<()> {
        self.check_open()?;
        if self.eos_pending {
            return Err(Error::invalid_state("input after end of stream"));
        }
        if self.frames.len() >= self.depth {
            return Err(Error::NotEnoughData);
        }
        self.frames.push_back(Frame {
            data: data.to_vec(),
            timestamp: attrs.timestamp,
            flags: attrs.flags - BufferFlags::EOS,
        });
        trace!(size = data.len(), ts = attrs.timestamp, "passthrough queued");
        Ok(())
    }

    fn receive(&mut self, out: &mut [u8]) -> Result<BufferAttrs> {
        self.check_open()?;
        let Some(frame) = self.frames.front() else {
            return Err(if self.eos_pending {
                Error::EndOfStream
            } else {
                Error::NotEnoughData
            });
        };
        if frame.data.len() > out.len() {
            return Err(Error::engine(
                -1,
                format!(
                    "output buffer of {} bytes too small for {} byte frame",
                    out.len(),
                    frame.data.len()
                ),
            ));
        }
        let Some(frame) = self.frames.pop_front() else {
            return Err(Error::NotEnoughData);
        };
        out[..frame.data.len()].copy_from_slice(&frame.data);
        if !self.announced {
            self.announced = true;
            self.format_change = Some(self.format.clone());
        }
        Ok(BufferAttrs {
            timestamp: frame.timestamp,
            size: frame.data.len() as i32,
            offset: 0,
            flags: frame.flags,
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        self.frames.clear();
        self.eos_pending = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.frames.clear();
        self.eos_pending = false;
        self.opened = false;
        debug!("passthrough closed");
        Ok(())
    }

    fn signal_end_of_stream(&mut self) -> Result<()> {
        self.check_open()?;
        self.eos_pending = true;
        Ok(())
    }

    fn set_parameter(&mut self, format: &FormatMap) -> Result<()> {
        self.check_open()?;
        self.format.merge(format);
        Ok(())
    }

    fn take_format_change(&mut self) -> Option<FormatMap> {
        self.format_change.take()
    }
}
