//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use avpipe_core::format::keys;
use avpipe_core::{BufferAttrs, Error, ErrorKind, FormatMap, OwnedBuffer, Result};
use avpipe_pipeline::{
    Callback, CodecEngine, CodecPipeline, EngineInfo, MediaKind, PassthroughEngine,
    PipelineConfig, Surface,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub fn fast_config(name: &str) -> PipelineConfig {
    PipelineConfig::audio()
        .with_name(name)
        .with_idle_interval(Duration::from_millis(2))
        .with_retry_backoff(Duration::from_millis(1))
        .with_acquire_timeout(Duration::from_millis(10))
        .with_pause_timeout(Duration::from_millis(20))
        .with_render_timeout(Duration::from_millis(20))
}

pub fn audio_format() -> FormatMap {
    FormatMap::new()
        .with_string(keys::MIME, "audio/raw")
        .with_int(keys::CHANNEL_COUNT, 2)
        .with_int(keys::SAMPLE_RATE, 48000)
        .with_int(keys::INPUT_BUFFER_COUNT, 4)
}

pub fn video_format() -> FormatMap {
    FormatMap::new()
        .with_string(keys::MIME, "video/raw")
        .with_int(keys::WIDTH, 16)
        .with_int(keys::HEIGHT, 16)
}

// ============================================================================
// Recording callback
// ============================================================================

#[derive(Default)]
pub struct Recorder {
    inputs: Mutex<VecDeque<u32>>,
    input_ready: Condvar,
    pub announced: Mutex<Vec<u32>>,
    pub outputs: Mutex<Vec<(u32, BufferAttrs)>>,
    pub formats: Mutex<Vec<FormatMap>>,
    pub errors: Mutex<Vec<(ErrorKind, i32)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn weak(self: &Arc<Self>) -> Weak<dyn Callback> {
        let weak: Weak<Recorder> = Arc::downgrade(self);
        weak
    }

    /// Next input index handed to the client.
    pub fn take_input(&self) -> Option<u32> {
        let mut inputs = self.inputs.lock();
        let deadline = Instant::now() + TIMEOUT;
        while inputs.is_empty() {
            if self.input_ready.wait_until(&mut inputs, deadline).timed_out() {
                break;
            }
        }
        inputs.pop_front()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.lock().len()
    }

    pub fn eos_count(&self) -> usize {
        self.outputs
            .lock()
            .iter()
            .filter(|(_, attrs)| attrs.is_eos())
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }
}

impl Callback for Recorder {
    fn on_input_buffer_available(&self, index: u32) {
        self.announced.lock().push(index);
        self.inputs.lock().push_back(index);
        self.input_ready.notify_all();
    }

    fn on_output_buffer_available(&self, index: u32, attrs: BufferAttrs) {
        self.outputs.lock().push((index, attrs));
    }

    fn on_output_format_changed(&self, format: &FormatMap) {
        self.formats.lock().push(format.clone());
    }

    fn on_error(&self, kind: ErrorKind, code: i32) {
        self.errors.lock().push((kind, code));
    }
}

// ============================================================================
// Observable engine
// ============================================================================

/// What a [`ProbeEngine`] saw, plus knobs for injecting failures.
#[derive(Debug, Default)]
pub struct Probe {
    pub opens: usize,
    pub closes: usize,
    pub flushes: usize,
    pub eos_signals: usize,
    pub sent: Vec<i64>,
    /// Every call to `send`, including refused ones.
    pub send_calls: usize,
    pub block_send: bool,
    /// Stall each `send` this long before answering.
    pub send_delay: Option<Duration>,
    pub fail_send: Option<Error>,
    pub fail_receive: Option<Error>,
    pub fail_flush: bool,
    /// Refuse this many end-of-stream signals with `NotEnoughData`.
    pub defer_eos: usize,
}

/// Passthrough engine that reports its calls to a shared [`Probe`].
pub struct ProbeEngine {
    inner: PassthroughEngine,
    probe: Arc<Mutex<Probe>>,
}

impl ProbeEngine {
    pub fn new(media: MediaKind) -> (Self, Arc<Mutex<Probe>>) {
        let probe = Arc::new(Mutex::new(Probe::default()));
        let engine = Self {
            inner: PassthroughEngine::new(media).with_depth(16),
            probe: Arc::clone(&probe),
        };
        (engine, probe)
    }
}

impl CodecEngine for ProbeEngine {
    fn info(&self) -> &EngineInfo {
        self.inner.info()
    }

    fn open(&mut self, format: &FormatMap) -> Result<()> {
        self.probe.lock().opens += 1;
        self.inner.open(format)
    }

    fn send(&mut self, data: &[u8], attrs: &BufferAttrs) -> Result<()> {
        let (delay, failure) = {
            let mut probe = self.probe.lock();
            probe.send_calls += 1;
            if probe.block_send {
                return Err(Error::NotEnoughData);
            }
            (probe.send_delay, probe.fail_send.take())
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if let Some(err) = failure {
            return Err(err);
        }
        self.inner.send(data, attrs)?;
        self.probe.lock().sent.push(attrs.timestamp);
        Ok(())
    }

    fn receive(&mut self, out: &mut [u8]) -> Result<BufferAttrs> {
        if let Some(err) = self.probe.lock().fail_receive.take() {
            return Err(err);
        }
        self.inner.receive(out)
    }

    fn flush(&mut self) -> Result<()> {
        let mut probe = self.probe.lock();
        probe.flushes += 1;
        if probe.fail_flush {
            return Err(Error::engine(-9, "flush refused"));
        }
        drop(probe);
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.probe.lock().closes += 1;
        self.inner.close()
    }

    fn signal_end_of_stream(&mut self) -> Result<()> {
        let mut probe = self.probe.lock();
        probe.eos_signals += 1;
        if probe.defer_eos > 0 {
            probe.defer_eos -= 1;
            return Err(Error::NotEnoughData);
        }
        drop(probe);
        self.inner.signal_end_of_stream()
    }

    fn set_parameter(&mut self, format: &FormatMap) -> Result<()> {
        self.inner.set_parameter(format)
    }

    fn take_format_change(&mut self) -> Option<FormatMap> {
        self.inner.take_format_change()
    }
}

/// An audio pipeline around a [`ProbeEngine`].
pub fn audio_pipeline(name: &str) -> (CodecPipeline, Arc<Mutex<Probe>>) {
    let (engine, probe) = ProbeEngine::new(MediaKind::Audio);
    (CodecPipeline::new(Box::new(engine), fast_config(name)), probe)
}

/// Configure, attach `recorder` and start.
pub fn running(pipeline: &CodecPipeline, recorder: &Arc<Recorder>) {
    pipeline.configure(&audio_format()).unwrap();
    pipeline.set_callback(recorder.weak()).unwrap();
    pipeline.start().unwrap();
}

/// Fill the next client input slot with `payload` and queue it.
pub fn queue_payload(
    pipeline: &CodecPipeline,
    recorder: &Recorder,
    timestamp: i64,
    payload: &[u8],
) -> u32 {
    let index = recorder.take_input().expect("no input slot offered");
    pipeline
        .get_input_buffer(index)
        .unwrap()
        .write(0, payload)
        .unwrap();
    pipeline
        .queue_input(index, BufferAttrs::new(timestamp, payload.len() as i32))
        .unwrap();
    index
}

// ============================================================================
// Surface
// ============================================================================

#[derive(Default)]
pub struct MockSurface {
    pub enqueued: Mutex<Vec<u32>>,
    pub reject: AtomicBool,
}

impl Surface for MockSurface {
    fn enqueue(&self, index: u32, buffer: &OwnedBuffer, attrs: &BufferAttrs) -> Result<()> {
        if self.reject.load(Ordering::Acquire) {
            return Err(Error::engine(-5, "surface rejected buffer"));
        }
        buffer.read(attrs)?;
        self.enqueued.lock().push(index);
        Ok(())
    }

    fn wait_returned(&self, _index: u32, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }
}
