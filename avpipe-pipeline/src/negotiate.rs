//! Buffer count and size negotiation at configure time.

use crate::config::PipelineConfig;
use crate::engine::MediaKind;
use avpipe_core::format::keys;
use avpipe_core::pool::{DEFAULT_BUFFER_COUNT, MIN_BUFFER_COUNT};
use avpipe_core::{Error, FormatMap, Result};
use tracing::warn;

/// Largest buffer count a format may request.
pub const MAX_BUFFER_COUNT: usize = 64;

/// Exclusive upper bound on width and height.
pub const MAX_DIMENSION: i32 = 15360;

const DEFAULT_AUDIO_INPUT_SIZE: usize = 8192;
const AUDIO_FRAME_SAMPLES: usize = 4096;
const AUDIO_SAMPLE_BYTES: usize = 2;

/// Negotiated pool geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    pub input_count: usize,
    pub output_count: usize,
    pub input_size: usize,
    pub output_size: usize,
}

/// Validate `format` for `media` and derive pool geometry.
///
/// `surface` selects the larger RGBA output layout for video.
pub fn negotiate(
    format: &FormatMap,
    media: MediaKind,
    config: &PipelineConfig,
    surface: bool,
) -> Result<BufferGeometry> {
    let input_count = buffer_count(format, keys::INPUT_BUFFER_COUNT, config.input.count)?;
    let output_count = buffer_count(format, keys::OUTPUT_BUFFER_COUNT, config.output.count)?;
    let max_input = match format.get_int(keys::MAX_INPUT_SIZE) {
        Some(v) if v > 0 => v as usize,
        Some(v) => {
            return Err(Error::invalid_value(format!("max_input_size {v} must be positive")))
        }
        None => 0,
    };

    let (input_size, output_size) = match media {
        MediaKind::Video => {
            let width = dimension(format, keys::WIDTH)?;
            let height = dimension(format, keys::HEIGHT)?;
            let yuv = align16(width) * height * 3 / 2;
            let output = if surface {
                align16(width) * height * 4
            } else {
                yuv
            };
            (yuv.max(max_input), output)
        }
        MediaKind::Audio => {
            let channels = positive(format, keys::CHANNEL_COUNT)?;
            positive(format, keys::SAMPLE_RATE)?;
            let input = if max_input > 0 {
                max_input
            } else {
                DEFAULT_AUDIO_INPUT_SIZE
            };
            (input, channels * AUDIO_SAMPLE_BYTES * AUDIO_FRAME_SAMPLES)
        }
    };

    Ok(BufferGeometry {
        input_count,
        output_count,
        input_size,
        output_size,
    })
}

fn buffer_count(format: &FormatMap, key: &str, fallback: usize) -> Result<usize> {
    let fallback = if fallback < MIN_BUFFER_COUNT {
        DEFAULT_BUFFER_COUNT
    } else {
        fallback
    };
    let Some(requested) = format.get_int(key) else {
        return Ok(fallback);
    };
    if requested < MIN_BUFFER_COUNT as i32 {
        warn!(key, requested, fallback, "buffer count below minimum, using default");
        return Ok(fallback);
    }
    if requested as usize > MAX_BUFFER_COUNT {
        return Err(Error::invalid_value(format!(
            "{key} {requested} exceeds maximum {MAX_BUFFER_COUNT}"
        )));
    }
    Ok(requested as usize)
}

fn dimension(format: &FormatMap, key: &str) -> Result<usize> {
    let v = format.require_int(key)?;
    if v <= 0 || v >= MAX_DIMENSION {
        return Err(Error::invalid_value(format!(
            "{key} {v} outside 1..{MAX_DIMENSION}"
        )));
    }
    Ok(v as usize)
}

fn positive(format: &FormatMap, key: &str) -> Result<usize> {
    let v = format.require_int(key)?;
    if v <= 0 {
        return Err(Error::invalid_value(format!("{key} {v} must be positive")));
    }
    Ok(v as usize)
}

fn align16(v: usize) -> usize {
    (v + 15) & !15
}
