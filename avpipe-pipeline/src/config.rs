//! Pipeline configuration.

use avpipe_core::pool::DEFAULT_BUFFER_COUNT;
use avpipe_core::task::DEFAULT_PAUSE_TIMEOUT;
use avpipe_core::{PoolConfig, PoolPolicy};
use std::time::Duration;

/// Tuning knobs of a [`CodecPipeline`](crate::CodecPipeline).
///
/// Buffer counts here are defaults; the `input_buffer_cnt` and
/// `output_buffer_cnt` format keys override them at configure time. Buffer
/// sizes are always derived from the format.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Used in worker thread names and logs.
    pub name: String,
    pub input: PoolConfig,
    pub output: PoolConfig,
    /// Longest a drainer waits for a free output slot per iteration.
    pub acquire_timeout: Duration,
    /// Longest any worker waits per iteration when there is nothing to do.
    pub idle_interval: Duration,
    /// Wait between attempts after the engine reports `NotEnoughData`.
    pub retry_backoff: Duration,
    /// Longest the renderer waits for the surface to return one buffer.
    pub render_timeout: Duration,
    /// Interval at which paused workers re-check their state.
    pub pause_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "avpipe".to_string(),
            input: PoolConfig::default(),
            output: PoolConfig::default(),
            acquire_timeout: Duration::from_millis(50),
            idle_interval: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(5),
            render_timeout: Duration::from_millis(500),
            pause_timeout: DEFAULT_PAUSE_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Audio preset: output slots are allocated on demand up to 4x the
    /// default count.
    pub fn audio() -> Self {
        Self {
            name: "avpipe-audio".to_string(),
            output: PoolConfig::default().with_policy(PoolPolicy::Growable {
                max: DEFAULT_BUFFER_COUNT * 4,
            }),
            ..Self::default()
        }
    }

    /// Video preset: both pools fixed.
    pub fn video() -> Self {
        Self {
            name: "avpipe-video".to_string(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input_pool(mut self, input: PoolConfig) -> Self {
        self.input = input;
        self
    }

    pub fn with_output_pool(mut self, output: PoolConfig) -> Self {
        self.output = output;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn with_pause_timeout(mut self, timeout: Duration) -> Self {
        self.pause_timeout = timeout;
        self
    }
}
