//! Worker loop bodies. Each function is one iteration of its task.

use crate::engine::CodecEngine;
use crate::pipeline::{PendingInput, Pools, Shared};
use crate::state::PipelineState;
use avpipe_core::metrics::timed;
use avpipe_core::{
    record_counter, AcquireMode, BufferAttrs, Error, FormatMap, OwnedBuffer, Owner, Result,
};
use tracing::{debug, info, trace, warn};

const ENGINE_CALL: &str = "avpipe.engine.call_ns";

/// Idle until the state moves away from `state`, at most one idle interval.
fn idle(shared: &Shared, state: PipelineState) {
    shared
        .state
        .wait_while_eq(state, shared.config.idle_interval);
}

fn backoff(shared: &Shared) {
    shared
        .state
        .wait_while_eq(PipelineState::Running, shared.config.retry_backoff);
}

// ============================================================================
// Feeder
// ============================================================================

/// Send the oldest pending input to the engine.
pub(crate) fn feed(shared: &Shared) {
    let state = shared.state.get();
    if state != PipelineState::Running {
        idle(shared, state);
        return;
    }
    let Some(item) = shared.pending.wait_front(shared.config.idle_interval) else {
        return;
    };
    match item {
        PendingInput::EndOfStream => {
            let result = {
                let mut engine = shared.engine.lock();
                timed(ENGINE_CALL, || engine.signal_end_of_stream())
            };
            match result {
                Ok(()) | Err(Error::EndOfStream) => {
                    shared.pending.pop_front();
                    debug!(pipeline = %shared.config.name, "end of stream signalled");
                }
                Err(e) if e.is_retryable() => backoff(shared),
                Err(e) => {
                    shared.pending.pop_front();
                    shared.fail(e);
                }
            }
        }
        PendingInput::Slot(index) => feed_slot(shared, index),
    }
}

fn feed_slot(shared: &Shared, index: u32) {
    let Some(pools) = shared.pools() else {
        return;
    };
    let prepared = pools
        .input
        .attrs(index)
        .and_then(|attrs| Ok((attrs, pools.input.memory(index)?)));
    let (attrs, memory) = match prepared {
        Ok(v) => v,
        Err(e) => {
            shared.pending.pop_front();
            shared.fail(e);
            return;
        }
    };

    let result = {
        let mut engine = shared.engine.lock();
        timed(ENGINE_CALL, || send_slot(&mut **engine, &memory, &attrs))
    };

    let sent = match result {
        Ok(sent) => sent,
        Err(Error::EndOfStream) => Sent::Complete,
        Err(e) if e.is_retryable() => {
            trace!(pipeline = %shared.config.name, index, "engine input full, retrying");
            backoff(shared);
            return;
        }
        Err(e) => {
            shared.pending.pop_front();
            let _ = pools.input.release_from(index, Owner::Codec);
            shared.fail(e);
            return;
        }
    };
    match sent {
        Sent::Complete => {
            shared.pending.pop_front();
        }
        Sent::EndOfStreamDeferred => {
            // payload is with the engine; only the end-of-stream signal is retried
            shared.pending.replace_front(PendingInput::EndOfStream);
            debug!(pipeline = %shared.config.name, index, "end of stream deferred");
        }
    }
    if let Err(e) = pools.input.release_from(index, Owner::Codec) {
        warn!(pipeline = %shared.config.name, index, error = %e, "input slot already reclaimed");
        return;
    }
    record_counter!("avpipe.pipeline.input_sent", 1);
    trace!(pipeline = %shared.config.name, index, ts = attrs.timestamp, size = attrs.size, "input sent");
    shared.notify(|cb| cb.on_input_buffer_available(index));
}

/// How much of an input slot the engine has taken.
enum Sent {
    Complete,
    /// The payload was accepted but the engine could not yet take the
    /// end-of-stream signal.
    EndOfStreamDeferred,
}

fn send_slot(engine: &mut dyn CodecEngine, memory: &OwnedBuffer, attrs: &BufferAttrs) -> Result<Sent> {
    if attrs.is_eos() && attrs.size == 0 {
        return engine.signal_end_of_stream().map(|()| Sent::Complete);
    }
    memory.with(|data| {
        let start = attrs.offset as usize;
        let end = start + attrs.size as usize;
        let payload = data
            .get(start..end)
            .ok_or_else(|| Error::invalid_value(format!("payload {start}..{end} out of bounds")))?;
        engine.send(payload, attrs)
    })?;
    if !attrs.is_eos() {
        return Ok(Sent::Complete);
    }
    match engine.signal_end_of_stream() {
        Ok(()) | Err(Error::EndOfStream) => Ok(Sent::Complete),
        Err(e) if e.is_retryable() => Ok(Sent::EndOfStreamDeferred),
        Err(e) => Err(e),
    }
}

// ============================================================================
// Drainer
// ============================================================================

/// Pull one result from the engine into a free output slot.
pub(crate) fn drain(shared: &Shared) {
    let state = shared.state.get();
    if state != PipelineState::Running {
        idle(shared, state);
        return;
    }
    let Some(pools) = shared.pools() else {
        idle(shared, state);
        return;
    };
    let index = match pools
        .output
        .acquire(AcquireMode::Blocking(shared.config.acquire_timeout))
    {
        Ok(index) => index,
        Err(Error::WouldBlock) | Err(Error::Closed) => return,
        Err(e) => {
            shared.fail(e);
            return;
        }
    };
    let memory = match pools.output.memory(index) {
        Ok(memory) => memory,
        Err(e) => {
            let _ = pools.output.release(index);
            shared.fail(e);
            return;
        }
    };

    let (result, change) = {
        let mut engine = shared.engine.lock();
        let result = timed(ENGINE_CALL, || memory.with_mut(|buf| engine.receive(buf)));
        let change = match result {
            Ok(_) => engine.take_format_change(),
            Err(_) => None,
        };
        (result, change)
    };

    match result {
        Ok(attrs) => {
            if let Err(e) = attrs.validate(memory.capacity()) {
                let _ = pools.output.release(index);
                shared.fail(e);
                return;
            }
            deliver(shared, &pools, index, attrs, change);
        }
        Err(Error::EndOfStream) => deliver(shared, &pools, index, BufferAttrs::eos(0), None),
        Err(e) if e.is_retryable() => {
            let _ = pools.output.release(index);
            backoff(shared);
        }
        Err(e) => {
            let _ = pools.output.release(index);
            shared.fail(e);
        }
    }
}

fn deliver(
    shared: &Shared,
    pools: &Pools,
    index: u32,
    attrs: BufferAttrs,
    change: Option<FormatMap>,
) {
    if let Some(change) = change {
        let format = shared.apply_format_change(&change);
        info!(pipeline = %shared.config.name, %format, "output format changed");
        shared.notify(|cb| cb.on_output_format_changed(&format));
    }
    if let Err(e) = pools
        .output
        .transfer_with(index, Owner::Codec, Owner::User, attrs)
    {
        shared.fail(e);
        return;
    }
    if attrs.is_eos()
        && shared
            .state
            .transition(PipelineState::Running, PipelineState::EndOfStream)
    {
        info!(pipeline = %shared.config.name, index, "end of stream reached");
    }
    record_counter!("avpipe.pipeline.output_emitted", 1);
    trace!(pipeline = %shared.config.name, index, ts = attrs.timestamp, size = attrs.size, "output ready");
    shared.notify(|cb| cb.on_output_buffer_available(index, attrs));
}

// ============================================================================
// Renderer
// ============================================================================

/// Wait for the surface to hand back the oldest rendered slot.
pub(crate) fn render(shared: &Shared) {
    let state = shared.state.get();
    if !matches!(state, PipelineState::Running | PipelineState::EndOfStream) {
        idle(shared, state);
        return;
    }
    let (Some(surface), Some(pools)) = (shared.surface(), shared.pools()) else {
        idle(shared, state);
        return;
    };
    let Some(index) = shared.rendering.wait_front(shared.config.idle_interval) else {
        return;
    };
    match surface.wait_returned(index, shared.config.render_timeout) {
        Ok(true) => {
            shared.rendering.pop_front();
            reclaim(shared, &pools, index);
        }
        Ok(false) => trace!(pipeline = %shared.config.name, index, "surface still holds buffer"),
        Err(e) => {
            warn!(pipeline = %shared.config.name, index, error = %e, "surface wait failed, reclaiming");
            shared.rendering.pop_front();
            reclaim(shared, &pools, index);
        }
    }
}

fn reclaim(shared: &Shared, pools: &Pools, index: u32) {
    match pools.output.release_from(index, Owner::Surface) {
        Ok(()) => trace!(pipeline = %shared.config.name, index, "rendered buffer returned"),
        Err(e) => warn!(pipeline = %shared.config.name, index, error = %e, "rendered buffer not reclaimed"),
    }
}
