//! Buffer ownership and data flow through a running pipeline.

mod common;

use avpipe_core::{BufferAttrs, BufferFlags, Error, MemoryKind, Owner};
use avpipe_pipeline::{CodecPipeline, MediaKind, PipelineState, Port};
use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_inputs_come_out_in_order() {
    let (pipeline, probe) = audio_pipeline("order");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);

    let payloads: [&[u8]; 4] = [b"alpha", b"bravo", b"charlie", b"delta"];
    for (ts, payload) in payloads.iter().enumerate() {
        queue_payload(&pipeline, &recorder, ts as i64 * 1000, payload);
    }
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 4));

    let outputs = recorder.outputs.lock().clone();
    for (i, (index, attrs)) in outputs.iter().enumerate() {
        assert_eq!(attrs.timestamp, i as i64 * 1000);
        assert_eq!(pipeline.buffer_owner(Port::Output, *index).unwrap(), Owner::User);
        let data = pipeline.get_output_buffer(*index).unwrap().read(attrs).unwrap();
        assert_eq!(data, payloads[i]);
        pipeline.release_output(*index).unwrap();
        assert_eq!(pipeline.buffer_owner(Port::Output, *index).unwrap(), Owner::Codec);
    }
    assert_eq!(probe.lock().sent, vec![0, 1000, 2000, 3000]);
    assert_eq!(recorder.formats.lock().len(), 1);
}

#[test]
fn test_engine_backpressure_preserves_order() {
    let (pipeline, probe) = audio_pipeline("backpressure");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);

    probe.lock().block_send = true;
    for ts in 0..3 {
        queue_payload(&pipeline, &recorder, ts, &[ts as u8; 8]);
    }
    thread::sleep(Duration::from_millis(30));
    assert_eq!(recorder.output_count(), 0);
    assert_eq!(pipeline.pending_inputs(), 3);

    probe.lock().block_send = false;
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 3));
    let timestamps: Vec<i64> = recorder
        .outputs
        .lock()
        .iter()
        .map(|(_, attrs)| attrs.timestamp)
        .collect();
    assert_eq!(timestamps, vec![0, 1, 2]);
    assert_eq!(probe.lock().sent, vec![0, 1, 2]);
}

// ============================================================================
// Ownership
// ============================================================================

#[test]
fn test_queued_input_leaves_client() {
    let (pipeline, probe) = audio_pipeline("ownership");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);
    probe.lock().block_send = true;

    let index = queue_payload(&pipeline, &recorder, 0, b"held");
    assert_eq!(pipeline.buffer_owner(Port::Input, index).unwrap(), Owner::Codec);
    assert!(matches!(
        pipeline.queue_input(index, BufferAttrs::new(0, 4)),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(
        pipeline.get_input_buffer(index),
        Err(Error::InvalidValue(_))
    ));

    probe.lock().block_send = false;
    assert!(wait_until(TIMEOUT, || {
        pipeline.buffer_owner(Port::Input, index).unwrap() == Owner::User
    }));
    assert!(wait_until(TIMEOUT, || {
        recorder.announced.lock().iter().filter(|i| **i == index).count() == 2
    }));
}

#[test]
fn test_out_of_range_and_bad_windows() {
    let (pipeline, _probe) = audio_pipeline("bounds");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);

    assert!(matches!(
        pipeline.queue_input(99, BufferAttrs::new(0, 1)),
        Err(Error::InvalidValue(_))
    ));
    assert!(matches!(
        pipeline.get_input_buffer(99),
        Err(Error::InvalidValue(_))
    ));
    assert!(matches!(
        pipeline.get_output_buffer(99),
        Err(Error::InvalidValue(_))
    ));
    assert!(matches!(
        pipeline.release_output(99),
        Err(Error::InvalidValue(_))
    ));
    assert!(matches!(
        pipeline.render_output(99),
        Err(Error::InvalidValue(_))
    ));

    let index = recorder.take_input().unwrap();
    let capacity = pipeline.get_input_buffer(index).unwrap().capacity() as i32;
    let too_big = BufferAttrs::new(0, capacity + 1);
    assert!(matches!(
        pipeline.queue_input(index, too_big),
        Err(Error::InvalidValue(_))
    ));
    let negative = BufferAttrs {
        offset: -1,
        ..BufferAttrs::new(0, 4)
    };
    assert!(matches!(
        pipeline.queue_input(index, negative),
        Err(Error::InvalidValue(_))
    ));
    assert_eq!(pipeline.buffer_owner(Port::Input, index).unwrap(), Owner::User);

    // output slots still owned by the codec cannot be released
    assert!(matches!(
        pipeline.release_output(0),
        Err(Error::InvalidValue(_))
    ));
}

#[test]
fn test_flush_reclaims_client_outputs() {
    let (pipeline, _probe) = audio_pipeline("reclaim");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);
    queue_payload(&pipeline, &recorder, 0, b"keep");
    queue_payload(&pipeline, &recorder, 1, b"me");
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 2));

    let held: Vec<u32> = recorder.outputs.lock().iter().map(|(i, _)| *i).collect();
    for index in &held {
        assert_eq!(pipeline.buffer_owner(Port::Output, *index).unwrap(), Owner::User);
    }

    pipeline.flush().unwrap();
    for index in &held {
        assert_eq!(pipeline.buffer_owner(Port::Output, *index).unwrap(), Owner::Codec);
        assert!(matches!(
            pipeline.release_output(*index),
            Err(Error::InvalidValue(_))
        ));
    }
    let stats = pipeline.pool_stats(Port::Output).unwrap();
    assert_eq!(stats.ready, stats.total);
}

#[test]
fn test_growable_output_pool_expands() {
    let (pipeline, _probe) = audio_pipeline("grow");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);

    // hold every output so the drainer has to allocate more slots
    for ts in 0..12 {
        queue_payload(&pipeline, &recorder, ts, b"x");
    }
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 12));
    let stats = pipeline.pool_stats(Port::Output).unwrap();
    assert!(stats.total >= 12);
    assert!(stats.total <= stats.max);
}

// ============================================================================
// End of stream
// ============================================================================

#[test]
fn test_eos_flag_emitted_exactly_once() {
    let (pipeline, probe) = audio_pipeline("eos-flag");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);

    queue_payload(&pipeline, &recorder, 0, b"first");
    queue_payload(&pipeline, &recorder, 1, b"second");
    let index = recorder.take_input().unwrap();
    pipeline.queue_input(index, BufferAttrs::eos(2)).unwrap();

    assert!(wait_until(TIMEOUT, || {
        pipeline.state() == PipelineState::EndOfStream
    }));
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 3));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(recorder.output_count(), 3);
    assert_eq!(recorder.eos_count(), 1);
    assert_eq!(probe.lock().eos_signals, 1);

    let (last, attrs) = *recorder.outputs.lock().last().unwrap();
    assert!(attrs.is_eos());
    assert!(matches!(
        pipeline.queue_input(index, BufferAttrs::new(3, 1)),
        Err(Error::InvalidState(_))
    ));
    pipeline.release_output(last).unwrap();

    pipeline.flush().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Flushed);
}

#[test]
fn test_notify_eos_after_pending_input() {
    let (pipeline, probe) = audio_pipeline("eos-notify");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);

    probe.lock().block_send = true;
    queue_payload(&pipeline, &recorder, 0, b"tail");
    pipeline.notify_eos().unwrap();
    assert_eq!(pipeline.pending_inputs(), 2);
    assert_eq!(probe.lock().eos_signals, 0);

    probe.lock().block_send = false;
    assert!(wait_until(TIMEOUT, || {
        pipeline.state() == PipelineState::EndOfStream
    }));
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 2));
    let outputs = recorder.outputs.lock().clone();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].1.timestamp, 0);
    assert!(!outputs[0].1.is_eos());
    assert!(outputs[1].1.is_eos());
    assert!(matches!(pipeline.notify_eos(), Err(Error::InvalidState(_))));
}

#[test]
fn test_deferred_eos_does_not_resend_payload() {
    let (pipeline, probe) = audio_pipeline("eos-deferred");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);
    probe.lock().defer_eos = 1;

    let index = recorder.take_input().unwrap();
    pipeline
        .get_input_buffer(index)
        .unwrap()
        .write(0, b"last")
        .unwrap();
    pipeline
        .queue_input(index, BufferAttrs::new(42, 4).with_flags(BufferFlags::EOS))
        .unwrap();

    assert!(wait_until(TIMEOUT, || {
        pipeline.state() == PipelineState::EndOfStream
    }));
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 2));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(recorder.output_count(), 2);
    assert_eq!(recorder.eos_count(), 1);

    let probe = probe.lock();
    assert_eq!(probe.sent, vec![42]);
    assert_eq!(probe.eos_signals, 2);
    drop(probe);
    // the slot went back to the client as soon as its payload was taken
    assert_eq!(pipeline.buffer_owner(Port::Input, index).unwrap(), Owner::User);
    assert_eq!(pipeline.pending_inputs(), 0);
}

// ============================================================================
// Format changes
// ============================================================================

#[test]
fn test_format_change_updates_output_format() {
    let (pipeline, _probe) = audio_pipeline("format");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);

    queue_payload(&pipeline, &recorder, 0, b"a");
    queue_payload(&pipeline, &recorder, 1, b"b");
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 2));

    let formats = recorder.formats.lock().clone();
    assert_eq!(formats.len(), 1);
    assert_eq!(formats[0], pipeline.output_format().unwrap());
}

// ============================================================================
// Rendering
// ============================================================================

fn video_pipeline(name: &str, surface: &Arc<MockSurface>) -> (CodecPipeline, Arc<Recorder>) {
    let (engine, _probe) = ProbeEngine::new(MediaKind::Video);
    let pipeline = CodecPipeline::new(Box::new(engine), fast_config(name));
    pipeline.set_output_surface(surface.clone()).unwrap();
    pipeline.configure(&video_format()).unwrap();
    let recorder = Recorder::new();
    pipeline.set_callback(recorder.weak()).unwrap();
    pipeline.start().unwrap();
    (pipeline, recorder)
}

#[test]
fn test_render_returns_slot_to_codec() {
    let surface = Arc::new(MockSurface::default());
    let (pipeline, recorder) = video_pipeline("render", &surface);

    queue_payload(&pipeline, &recorder, 0, &[0x80; 64]);
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 1));
    let (index, _) = recorder.outputs.lock()[0];
    assert_eq!(
        pipeline.get_output_buffer(index).unwrap().kind(),
        MemoryKind::Surface
    );

    pipeline.render_output(index).unwrap();
    assert!(wait_until(TIMEOUT, || {
        pipeline.buffer_owner(Port::Output, index).unwrap() == Owner::Codec
    }));
    assert_eq!(*surface.enqueued.lock(), vec![index]);
    assert!(matches!(
        pipeline.render_output(index),
        Err(Error::InvalidValue(_))
    ));
}

#[test]
fn test_rejected_render_reclaims_slot() {
    let surface = Arc::new(MockSurface::default());
    surface.reject.store(true, Ordering::Release);
    let (pipeline, recorder) = video_pipeline("render-reject", &surface);

    queue_payload(&pipeline, &recorder, 0, &[1; 16]);
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 1));
    let (index, _) = recorder.outputs.lock()[0];

    pipeline.render_output(index).unwrap();
    assert_eq!(pipeline.buffer_owner(Port::Output, index).unwrap(), Owner::Codec);
    assert!(surface.enqueued.lock().is_empty());
    assert_eq!(pipeline.state(), PipelineState::Running);
}

#[test]
fn test_render_without_surface_releases() {
    let (pipeline, _probe) = audio_pipeline("render-none");
    let recorder = Recorder::new();
    running(&pipeline, &recorder);

    queue_payload(&pipeline, &recorder, 0, b"pcm");
    assert!(wait_until(TIMEOUT, || recorder.output_count() == 1));
    let (index, _) = recorder.outputs.lock()[0];
    pipeline.render_output(index).unwrap();
    assert_eq!(pipeline.buffer_owner(Port::Output, index).unwrap(), Owner::Codec);
}

// ============================================================================
// Four-slot scenario
// ============================================================================

#[test]
fn test_four_slot_pipeline_recycles_inputs_in_order() {
    use avpipe_core::format::keys;

    let (pipeline, probe) = audio_pipeline("four");
    let recorder = Recorder::new();
    let format = audio_format().with_int(keys::OUTPUT_BUFFER_COUNT, 4);
    pipeline.configure(&format).unwrap();
    pipeline.set_callback(recorder.weak()).unwrap();
    pipeline.start().unwrap();
    assert_eq!(*recorder.announced.lock(), vec![0, 1, 2, 3]);

    for ts in 0..4 {
        let index = queue_payload(&pipeline, &recorder, ts, b"pkt");
        assert_eq!(index, ts as u32);
    }
    assert!(wait_until(TIMEOUT, || recorder.announced.lock().len() == 8));
    assert_eq!(recorder.announced.lock()[4..], [0, 1, 2, 3]);
    assert_eq!(pipeline.pending_inputs(), 0);
    assert_eq!(probe.lock().sent, vec![0, 1, 2, 3]);
}
