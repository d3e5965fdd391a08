//! Drive a passthrough audio pipeline from the main thread.
//!
//! Callbacks only forward events over a channel; all pipeline calls happen
//! on the main thread.
//!
//! ```sh
//! RUST_LOG=avpipe_pipeline=debug cargo run --example decode_loop
//! ```

use avpipe::prelude::*;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

const FRAMES: i64 = 16;
const FRAME_US: i64 = 21_333;

enum Event {
    Input(u32),
    Output(u32, BufferAttrs),
    Format(FormatMap),
    Failed(ErrorKind, i32),
}

struct Forwarder(Sender<Event>);

impl Callback for Forwarder {
    fn on_input_buffer_available(&self, index: u32) {
        let _ = self.0.send(Event::Input(index));
    }

    fn on_output_buffer_available(&self, index: u32, attrs: BufferAttrs) {
        let _ = self.0.send(Event::Output(index, attrs));
    }

    fn on_output_format_changed(&self, format: &FormatMap) {
        let _ = self.0.send(Event::Format(format.clone()));
    }

    fn on_error(&self, kind: ErrorKind, code: i32) {
        let _ = self.0.send(Event::Failed(kind, code));
    }
}

fn run(pipeline: &CodecPipeline, events: &Receiver<Event>) -> Result<()> {
    let mut next_ts = 0;
    let mut eos_queued = false;
    let mut bytes_out = 0usize;

    loop {
        let event = events
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| Error::invalid_state("pipeline stalled"))?;
        match event {
            Event::Input(index) if !eos_queued => {
                if next_ts == FRAMES {
                    pipeline.queue_input(index, BufferAttrs::eos(next_ts * FRAME_US))?;
                    eos_queued = true;
                    continue;
                }
                let payload = vec![next_ts as u8; 1024];
                pipeline.get_input_buffer(index)?.write(0, &payload)?;
                pipeline.queue_input(
                    index,
                    BufferAttrs::new(next_ts * FRAME_US, payload.len() as i32),
                )?;
                next_ts += 1;
            }
            Event::Input(_) => {}
            Event::Format(format) => println!("output format: {format}"),
            Event::Output(index, attrs) => {
                bytes_out += attrs.size as usize;
                pipeline.release_output(index)?;
                if attrs.is_eos() {
                    println!("end of stream after {bytes_out} bytes");
                    return Ok(());
                }
                println!("frame ts={}us size={}", attrs.timestamp, attrs.size);
            }
            Event::Failed(kind, code) => {
                return Err(Error::engine(code, format!("pipeline reported {kind}")));
            }
        }
    }
}

fn main() -> Result<()> {
    if let Err(e) = avpipe::init_tracing("avpipe_pipeline=info") {
        eprintln!("logging disabled: {e}");
    }
    let info = avpipe::build_info();
    println!("avpipe {} ({}/{})", info.version, info.os, info.target);

    let format = FormatMap::new()
        .with_string(keys::MIME, "audio/raw")
        .with_int(keys::CHANNEL_COUNT, 2)
        .with_int(keys::SAMPLE_RATE, 48000)
        .with_int(keys::INPUT_BUFFER_COUNT, 4);
    let pipeline = CodecPipeline::from_registry(
        &EngineRegistry::with_defaults(),
        MediaKind::Audio,
        Direction::Decoder,
        &format,
        PipelineConfig::audio().with_name("demo"),
    )?;

    let (tx, rx) = channel();
    let callback: Arc<dyn Callback> = Arc::new(Forwarder(tx));
    pipeline.configure(&format)?;
    pipeline.set_callback(Arc::downgrade(&callback))?;
    pipeline.start()?;

    let outcome = run(&pipeline, &rx);
    pipeline.stop()?;
    pipeline.release()?;
    outcome
}
