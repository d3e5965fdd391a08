//! The codec pipeline: lifecycle, control API and data-plane API.

use crate::callback::Callback;
use crate::config::PipelineConfig;
use crate::engine::{CodecEngine, Direction, EngineInfo, EngineRegistry, MediaKind};
use crate::negotiate::negotiate;
use crate::state::{Op, PipelineState, StateCell};
use crate::surface::Surface;
use crate::worker;
use avpipe_core::{
    BufferAttrs, BufferPool, Error, FormatMap, MemoryKind, Owner, OwnedBuffer, PoolConfig,
    PoolStats, Result, SignalQueue, WorkerTask,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, error, info, warn};

/// Which of the two buffer pools an index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Input,
    Output,
}

/// Entry of the feeder's pending FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingInput {
    Slot(u32),
    EndOfStream,
}

#[derive(Clone)]
pub(crate) struct Pools {
    pub(crate) input: BufferPool,
    pub(crate) output: BufferPool,
}

impl Pools {
    fn get(&self, port: Port) -> &BufferPool {
        match port {
            Port::Input => &self.input,
            Port::Output => &self.output,
        }
    }

    fn close(&self) {
        self.input.close();
        self.output.close();
    }

    fn reopen(&self) {
        self.input.reopen();
        self.output.reopen();
    }

    fn reset_all(&self) {
        self.input.reset_all();
        self.output.reset_all();
    }
}

struct Tasks {
    feeder: WorkerTask,
    drainer: WorkerTask,
    renderer: Option<WorkerTask>,
}

impl Tasks {
    fn iter(&self) -> impl Iterator<Item = &WorkerTask> {
        [&self.feeder, &self.drainer]
            .into_iter()
            .chain(self.renderer.as_ref())
    }
}

/// State serialized by the control lock.
struct Control {
    /// Last configured format, kept across release for reset.
    format: Option<FormatMap>,
    engine_open: bool,
    tasks: Option<Tasks>,
}

/// Everything shared between the client-facing handle and the workers.
pub(crate) struct Shared {
    pub(crate) config: PipelineConfig,
    pub(crate) state: StateCell,
    media: MediaKind,
    control: Mutex<Control>,
    /// Held only for the duration of a single engine call.
    pub(crate) engine: Mutex<Box<dyn CodecEngine>>,
    callback: RwLock<Option<Weak<dyn Callback>>>,
    surface: RwLock<Option<Arc<dyn Surface>>>,
    pools: RwLock<Option<Pools>>,
    pub(crate) pending: SignalQueue<PendingInput>,
    pub(crate) rendering: SignalQueue<u32>,
    output_format: Mutex<FormatMap>,
    error_reported: AtomicBool,
}

impl Shared {
    pub(crate) fn pools(&self) -> Option<Pools> {
        self.pools.read().clone()
    }

    pub(crate) fn surface(&self) -> Option<Arc<dyn Surface>> {
        self.surface.read().clone()
    }

    fn live_callback(&self) -> Option<Arc<dyn Callback>> {
        self.callback.read().as_ref().and_then(Weak::upgrade)
    }

    /// Invoke the client callback if it is still alive.
    pub(crate) fn notify(&self, f: impl FnOnce(&dyn Callback)) {
        match self.live_callback() {
            Some(cb) => f(cb.as_ref()),
            None => debug!(pipeline = %self.config.name, "callback dropped, notification lost"),
        }
    }

    /// Merge an engine-reported format into the output format.
    pub(crate) fn apply_format_change(&self, change: &FormatMap) -> FormatMap {
        let mut format = self.output_format.lock();
        format.merge(change);
        format.clone()
    }

    /// Record an asynchronous failure: enter the error state and tell the
    /// client once per session.
    pub(crate) fn fail(&self, err: Error) {
        let state = self.state.get();
        if matches!(
            state,
            PipelineState::Uninitialized | PipelineState::Releasing | PipelineState::Stopping
        ) {
            warn!(pipeline = %self.config.name, %state, error = %err, "error during teardown not reported");
            return;
        }
        error!(pipeline = %self.config.name, %state, error = %err, "pipeline failed");
        self.state.set(PipelineState::Error);
        avpipe_core::record_counter!("avpipe.pipeline.errors", 1);
        self.pending.wake_all();
        self.rendering.wake_all();
        if !self.error_reported.swap(true, Ordering::AcqRel) {
            self.notify(|cb| cb.on_error(err.kind(), err.code()));
        }
    }

    fn require_pools(&self) -> Result<Pools> {
        self.pools()
            .ok_or_else(|| Error::invalid_state("buffer pools not allocated"))
    }

    fn make_task<F>(self: &Arc<Self>, role: &str, body: F) -> WorkerTask
    where
        F: Fn(&Shared) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let idle = self.config.idle_interval;
        let task = WorkerTask::with_pause_timeout(
            format!("{}-{role}", self.config.name),
            self.config.pause_timeout,
        );
        task.register_handler(move || match weak.upgrade() {
            Some(shared) => body(&shared),
            None => thread::sleep(idle),
        });
        task
    }

    fn make_tasks(self: &Arc<Self>, with_renderer: bool) -> Tasks {
        Tasks {
            feeder: self.make_task("feeder", worker::feed),
            drainer: self.make_task("drainer", worker::drain),
            renderer: with_renderer.then(|| self.make_task("renderer", worker::render)),
        }
    }

    fn configure_locked(self: &Arc<Self>, control: &mut Control, format: &FormatMap) -> Result<()> {
        self.state.set(PipelineState::Initialized);
        match self.try_configure(control, format) {
            Ok(()) => {
                self.state.set(PipelineState::Configured);
                info!(pipeline = %self.config.name, %format, "configured");
                Ok(())
            }
            Err(e) => {
                self.state.set(PipelineState::Uninitialized);
                warn!(pipeline = %self.config.name, error = %e, "configure failed");
                Err(e)
            }
        }
    }

    fn try_configure(self: &Arc<Self>, control: &mut Control, format: &FormatMap) -> Result<()> {
        let with_surface = self.surface.read().is_some();
        let geometry = negotiate(format, self.media, &self.config, with_surface)?;
        debug!(pipeline = %self.config.name, ?geometry, "buffer geometry negotiated");

        let input = BufferPool::new(
            format!("{}.input", self.config.name),
            Owner::User,
            MemoryKind::Host,
            PoolConfig::new(geometry.input_count, geometry.input_size)
                .with_policy(self.config.input.policy),
        )?;
        let output = BufferPool::new(
            format!("{}.output", self.config.name),
            Owner::Codec,
            if with_surface {
                MemoryKind::Surface
            } else {
                MemoryKind::Host
            },
            PoolConfig::new(geometry.output_count, geometry.output_size)
                .with_policy(self.config.output.policy),
        )?;

        self.engine.lock().open(format)?;
        control.engine_open = true;

        *self.pools.write() = Some(Pools { input, output });
        *self.output_format.lock() = format.clone();
        control.format = Some(format.clone());
        control.tasks = Some(self.make_tasks(with_surface));
        self.error_reported.store(false, Ordering::Release);
        Ok(())
    }

    fn try_start(&self, control: &mut Control) -> Result<()> {
        if !control.engine_open {
            let format = control
                .format
                .clone()
                .ok_or_else(|| Error::invalid_state("no format to reopen the engine with"))?;
            self.engine.lock().open(&format)?;
            control.engine_open = true;
        }
        let pools = self.require_pools()?;
        pools.reopen();
        self.error_reported.store(false, Ordering::Release);

        self.state.set(PipelineState::Running);
        let tasks = control
            .tasks
            .as_ref()
            .ok_or_else(|| Error::invalid_state("worker tasks missing"))?;
        for task in tasks.iter() {
            if let Err(e) = task.start() {
                for task in tasks.iter() {
                    task.stop();
                }
                return Err(e);
            }
        }

        for index in pools.input.ready_indices() {
            self.notify(|cb| cb.on_input_buffer_available(index));
        }
        Ok(())
    }

    /// Close the pools, wake every waiter and stop all workers.
    fn halt_workers(&self, control: &mut Control) {
        if let Some(pools) = self.pools() {
            pools.close();
        }
        self.pending.wake_all();
        self.rendering.wake_all();
        if let Some(tasks) = control.tasks.as_ref() {
            for task in tasks.iter() {
                task.stop();
            }
        }
    }

    fn close_engine(&self, control: &mut Control) {
        if control.engine_open {
            if let Err(e) = self.engine.lock().close() {
                warn!(pipeline = %self.config.name, error = %e, "engine close failed");
            }
            control.engine_open = false;
        }
    }

    fn release_locked(&self, control: &mut Control) {
        if self.state.get() == PipelineState::Uninitialized {
            return;
        }
        self.state.set(PipelineState::Releasing);
        self.halt_workers(control);
        control.tasks = None;
        self.close_engine(control);
        self.pending.clear();
        self.rendering.clear();
        *self.pools.write() = None;
        *self.output_format.lock() = FormatMap::new();
        self.error_reported.store(false, Ordering::Release);
        self.state.set(PipelineState::Uninitialized);
        info!(pipeline = %self.config.name, "released");
    }
}

/// A codec wrapped in input/output buffer pools and worker threads.
///
/// All methods take `&self`; the pipeline can be shared between threads.
/// Control operations must not be called from inside [`Callback`] methods.
pub struct CodecPipeline {
    shared: Arc<Shared>,
}

impl CodecPipeline {
    pub fn new(engine: Box<dyn CodecEngine>, config: PipelineConfig) -> Self {
        let media = engine.info().media;
        info!(pipeline = %config.name, engine = %engine.info(), "pipeline created");
        Self {
            shared: Arc::new(Shared {
                config,
                state: StateCell::new(PipelineState::Uninitialized),
                media,
                control: Mutex::new(Control {
                    format: None,
                    engine_open: false,
                    tasks: None,
                }),
                engine: Mutex::new(engine),
                callback: RwLock::new(None),
                surface: RwLock::new(None),
                pools: RwLock::new(None),
                pending: SignalQueue::new(),
                rendering: SignalQueue::new(),
                output_format: Mutex::new(FormatMap::new()),
                error_reported: AtomicBool::new(false),
            }),
        }
    }

    /// Create a pipeline around the best registered engine for `format`.
    pub fn from_registry(
        registry: &EngineRegistry,
        media: MediaKind,
        direction: Direction,
        format: &FormatMap,
        config: PipelineConfig,
    ) -> Result<Self> {
        let engine = registry.create_best(media, direction, format)?;
        Ok(Self::new(engine, config))
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state.get()
    }

    pub fn engine_info(&self) -> EngineInfo {
        self.shared.engine.lock().info().clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    // ------------------------------------------------------------------
    // Control API
    // ------------------------------------------------------------------

    /// Validate `format`, allocate both pools and open the engine session.
    pub fn configure(&self, format: &FormatMap) -> Result<()> {
        let mut control = self.shared.control.lock();
        Op::Configure.check(self.state())?;
        self.shared.configure_locked(&mut control, format)
    }

    /// Start from `Configured`, or resume from `Flushed`.
    ///
    /// Every input slot available to the client is announced through
    /// `on_input_buffer_available`.
    pub fn start(&self) -> Result<()> {
        let mut control = self.shared.control.lock();
        let previous = self.state();
        Op::Start.check(previous)?;
        if self.shared.live_callback().is_none() {
            return Err(Error::invalid_operation("start requires a callback"));
        }
        self.shared.state.set(if previous == PipelineState::Flushed {
            PipelineState::Resuming
        } else {
            PipelineState::Starting
        });
        match self.shared.try_start(&mut control) {
            Ok(()) => {
                info!(pipeline = %self.shared.config.name, from = %previous, "running");
                Ok(())
            }
            Err(e) => {
                self.shared.state.set(previous);
                warn!(pipeline = %self.shared.config.name, error = %e, "start failed");
                Err(e)
            }
        }
    }

    /// Stop all workers and close the engine session. Buffers are reclaimed
    /// but stay allocated; a stopped pipeline can be started again.
    pub fn stop(&self) -> Result<()> {
        let mut control = self.shared.control.lock();
        let state = self.state();
        Op::Stop.check(state)?;
        if state == PipelineState::Configured {
            return Ok(());
        }
        let shared = &self.shared;
        shared.state.set(PipelineState::Stopping);
        shared.halt_workers(&mut control);
        shared.close_engine(&mut control);
        shared.pending.clear();
        shared.rendering.clear();
        if let Some(pools) = shared.pools() {
            pools.reset_all();
        }
        shared.state.set(PipelineState::Configured);
        info!(pipeline = %shared.config.name, from = %state, "stopped");
        Ok(())
    }

    /// Pause the workers, flush the engine and hand every slot back to its
    /// pool's home owner. Pending input is discarded.
    pub fn flush(&self) -> Result<()> {
        let control = self.shared.control.lock();
        let state = self.state();
        Op::Flush.check(state)?;
        let shared = &self.shared;
        shared.state.set(PipelineState::Flushing);
        if let Some(tasks) = control.tasks.as_ref() {
            for task in tasks.iter() {
                task.pause();
            }
        }
        // a worker may have failed before it paused
        if shared.state.get() == PipelineState::Error {
            warn!(pipeline = %shared.config.name, "worker failed during flush");
            return Err(Error::invalid_state("pipeline failed while flushing"));
        }
        let flushed = shared.engine.lock().flush();
        shared.pending.clear();
        shared.rendering.clear();
        if let Some(pools) = shared.pools() {
            pools.reset_all();
        }
        match flushed {
            Ok(()) => {
                if !shared
                    .state
                    .transition(PipelineState::Flushing, PipelineState::Flushed)
                {
                    return Err(Error::invalid_state("pipeline failed while flushing"));
                }
                info!(pipeline = %shared.config.name, from = %state, "flushed");
                Ok(())
            }
            Err(e) => {
                shared.state.set(PipelineState::Error);
                error!(pipeline = %shared.config.name, error = %e, "engine flush failed");
                Err(e)
            }
        }
    }

    /// Release everything, then configure again with the last format.
    pub fn reset(&self) -> Result<()> {
        let mut control = self.shared.control.lock();
        let format = control
            .format
            .clone()
            .ok_or_else(|| Error::invalid_state("reset before any configure"))?;
        self.shared.release_locked(&mut control);
        self.shared.configure_locked(&mut control, &format)
    }

    /// Stop workers, close the engine and free both pools.
    pub fn release(&self) -> Result<()> {
        let mut control = self.shared.control.lock();
        self.shared.release_locked(&mut control);
        Ok(())
    }

    /// Forward runtime parameters to the engine.
    pub fn set_parameter(&self, format: &FormatMap) -> Result<()> {
        let _control = self.shared.control.lock();
        Op::SetParameter.check(self.state())?;
        self.shared.engine.lock().set_parameter(format)?;
        debug!(pipeline = %self.shared.config.name, %format, "parameters applied");
        Ok(())
    }

    /// Signal that no more input follows. The engine is told once all
    /// previously queued input has been sent.
    ///
    /// Safe to call from inside callbacks.
    pub fn notify_eos(&self) -> Result<()> {
        Op::NotifyEos.check(self.state())?;
        self.shared.pending.push(PendingInput::EndOfStream);
        debug!(pipeline = %self.shared.config.name, "end of stream queued");
        Ok(())
    }

    /// Current output format.
    pub fn output_format(&self) -> Result<FormatMap> {
        Op::OutputFormat.check(self.state())?;
        Ok(self.shared.output_format.lock().clone())
    }

    pub fn set_callback(&self, callback: Weak<dyn Callback>) -> Result<()> {
        let _control = self.shared.control.lock();
        Op::SetCallback.check(self.state())?;
        *self.shared.callback.write() = Some(callback);
        Ok(())
    }

    /// Route rendered output to `surface`. Set before configure to get
    /// surface-backed output buffers.
    pub fn set_output_surface(&self, surface: Arc<dyn Surface>) -> Result<()> {
        let mut control = self.shared.control.lock();
        let state = self.state();
        Op::SetSurface.check(state)?;
        *self.shared.surface.write() = Some(surface);
        if let Some(tasks) = control.tasks.as_mut() {
            if tasks.renderer.is_none() {
                let renderer = self.shared.make_task("renderer", worker::render);
                if state == PipelineState::Running {
                    renderer.start()?;
                }
                tasks.renderer = Some(renderer);
            }
        }
        debug!(pipeline = %self.shared.config.name, "output surface set");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data-plane API
    // ------------------------------------------------------------------

    /// Submit a filled input slot.
    ///
    /// `InvalidValue` for an out-of-range index or bad payload window,
    /// `InvalidOperation` if the client does not own the slot.
    pub fn queue_input(&self, index: u32, attrs: BufferAttrs) -> Result<()> {
        Op::QueueInput.check(self.state())?;
        let pools = self.shared.require_pools()?;
        let input = &pools.input;
        if index as usize >= input.len() {
            return Err(Error::invalid_value(format!(
                "input index {index} out of range ({})",
                input.len()
            )));
        }
        attrs.validate(input.config().buffer_size)?;
        input
            .transfer_with(index, Owner::User, Owner::Codec, attrs)
            .map_err(|e| match e {
                Error::InvalidValue(msg) => Error::InvalidOperation(msg),
                other => other,
            })?;
        self.shared.pending.push(PendingInput::Slot(index));
        debug!(pipeline = %self.shared.config.name, index, ts = attrs.timestamp, size = attrs.size, "input queued");
        Ok(())
    }

    /// Memory of an input slot the client owns.
    pub fn get_input_buffer(&self, index: u32) -> Result<OwnedBuffer> {
        Op::GetInputBuffer.check(self.state())?;
        self.shared.require_pools()?.input.memory_for(index, Owner::User)
    }

    /// Memory of an output slot the client owns.
    pub fn get_output_buffer(&self, index: u32) -> Result<OwnedBuffer> {
        Op::GetOutputBuffer.check(self.state())?;
        self.shared.require_pools()?.output.memory_for(index, Owner::User)
    }

    /// Return an output slot to the codec without rendering it.
    pub fn release_output(&self, index: u32) -> Result<()> {
        Op::ReleaseOutput.check(self.state())?;
        self.shared
            .require_pools()?
            .output
            .release_from(index, Owner::User)?;
        debug!(pipeline = %self.shared.config.name, index, "output released");
        Ok(())
    }

    /// Hand an output slot to the surface. Without a surface this is
    /// [`release_output`](Self::release_output).
    pub fn render_output(&self, index: u32) -> Result<()> {
        Op::RenderOutput.check(self.state())?;
        let Some(surface) = self.shared.surface() else {
            return self.release_output(index);
        };
        let pools = self.shared.require_pools()?;
        let output = &pools.output;
        output.transfer(index, Owner::User, Owner::Surface)?;
        let memory = output.memory(index)?;
        let attrs = output.attrs(index)?;
        match surface.enqueue(index, &memory, &attrs) {
            Ok(()) => {
                self.shared.rendering.push(index);
                debug!(pipeline = %self.shared.config.name, index, "output queued for render");
            }
            Err(e) => {
                warn!(pipeline = %self.shared.config.name, index, error = %e, "surface rejected buffer, reclaiming");
                output.release_from(index, Owner::Surface)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Current owner of a slot.
    pub fn buffer_owner(&self, port: Port, index: u32) -> Result<Owner> {
        self.shared.require_pools()?.get(port).owner(index)
    }

    pub fn pool_stats(&self, port: Port) -> Result<PoolStats> {
        Ok(self.shared.require_pools()?.get(port).stats())
    }

    /// Indices ready for the next acquirer of `port`, front first.
    pub fn ready_indices(&self, port: Port) -> Result<Vec<u32>> {
        Ok(self.shared.require_pools()?.get(port).ready_indices())
    }

    /// Number of queued inputs (and end-of-stream markers) not yet sent.
    pub fn pending_inputs(&self) -> usize {
        self.shared.pending.len()
    }
}

impl Drop for CodecPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(pipeline = %self.shared.config.name, error = %e, "release on drop failed");
        }
    }
}

impl std::fmt::Debug for CodecPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecPipeline")
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .finish()
    }
}
