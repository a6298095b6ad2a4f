//! Capture-to-listener pipeline
//!
//! ```text
//! capture callback ──► capture buffer ──► Processor ──┬─► compressed master ──► Duplicator ──► listener buffers
//!                                       (normalize,   │
//!                                        resample)    └─► raw master ────────► Duplicator ──► listener buffers
//! ```
//!
//! Every arrow is a [`ByteChannel`](crate::audio::ByteChannel). Stages run
//! on their own threads and only ever park inside a channel (or on the
//! activity gate while nobody listens). Stopping closes every channel, so
//! parked threads return and observe the stop flag.

pub mod duplicator;
pub mod events;
pub mod process;
pub mod stats;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crate::audio::capture::{CaptureSink, CaptureSource, NativeFormat};
use crate::audio::channel::{create_shared_channel, SharedByteChannel};
use crate::config::{PcmFormat, PipelineConfig};
use crate::constants::EVENT_QUEUE_CAPACITY;
use crate::error::{AudioError, Error, Result, SessionError};
use crate::session::gate::{Activity, ActivityGate};
use crate::session::listener::{ListenerStream, SessionId, StreamFormat};
use crate::session::registry::SessionRegistry;

use duplicator::Duplicator;
use events::{event_channel, EventSender};
use process::Processor;
use stats::{PipelineCounters, PipelineStats};

pub use events::PipelineEvent;

/// State shared by every stage
pub(crate) struct Shared {
    pub(crate) config: PipelineConfig,
    stopping: AtomicBool,
    pub(crate) capture_buffer: SharedByteChannel,
    pub(crate) compressed_master: SharedByteChannel,
    pub(crate) raw_master: SharedByteChannel,
    pub(crate) gate: Arc<ActivityGate>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) counters: PipelineCounters,
    events: EventSender,
    fatal: Mutex<Option<Error>>,
}

impl Shared {
    fn new(config: PipelineConfig, events: EventSender) -> Arc<Self> {
        let gate = Arc::new(ActivityGate::new());
        let registry = Arc::new(SessionRegistry::new(
            config.buffers.listener_bytes,
            gate.clone(),
            events.clone(),
        ));

        Arc::new(Self {
            capture_buffer: create_shared_channel(config.buffers.capture_bytes),
            compressed_master: create_shared_channel(config.buffers.master_bytes),
            raw_master: create_shared_channel(config.buffers.master_bytes),
            config,
            stopping: AtomicBool::new(false),
            gate,
            registry,
            counters: PipelineCounters::default(),
            events,
            fatal: Mutex::new(None),
        })
    }

    pub(crate) fn master(&self, format: StreamFormat) -> &SharedByteChannel {
        match format {
            StreamFormat::Compressed => &self.compressed_master,
            StreamFormat::Raw => &self.raw_master,
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Set the stop flag and close every channel so parked threads return
    fn halt(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.capture_buffer.close();
        self.compressed_master.close();
        self.raw_master.close();
        self.registry.close_all();
        self.gate.close();
    }

    /// Record a fatal stage error and halt. Errors arriving after a stop
    /// was requested are shutdown noise.
    fn fail(&self, error: Error) {
        if self.is_stopping() {
            tracing::debug!("Ignoring error during shutdown: {}", error);
            return;
        }
        tracing::error!("Pipeline failed: {}", error);
        self.events.emit(PipelineEvent::Fatal {
            message: error.to_string(),
        });
        self.fatal.lock().get_or_insert(error);
        self.halt();
    }
}

fn spawn_stage(
    name: &'static str,
    shared: &Arc<Shared>,
    body: impl FnOnce() -> Result<()> + Send + 'static,
) -> Result<JoinHandle<()>> {
    let shared = shared.clone();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || match body() {
            Ok(()) => {
                if !shared.is_stopping() {
                    shared.fail(Error::StageTerminated(name));
                }
            }
            Err(e) if shared.is_stopping() => {
                tracing::debug!("{} ended during shutdown: {}", name, e);
            }
            Err(e) => shared.fail(e),
        })?;
    Ok(handle)
}

/// Cloneable handle for the delivery layer
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Register a network listener; the returned stream yields its bytes
    pub fn register_listener(&self, id: SessionId, format: StreamFormat) -> Result<ListenerStream> {
        if id.is_local_capture() {
            return Err(SessionError::ReservedId(id.to_string()).into());
        }
        Ok(self.shared.registry.register(id, format)?)
    }

    /// Register the single local (non-network) consumer
    pub fn register_local_capture(&self, format: StreamFormat) -> Result<ListenerStream> {
        Ok(self
            .shared
            .registry
            .register(SessionId::local_capture(), format)?)
    }

    /// Called on client disconnect
    pub fn unregister_listener(&self, id: &SessionId) {
        self.shared.registry.unregister(id);
    }

    pub fn target_format(&self) -> PcmFormat {
        self.shared.config.target
    }

    pub fn activity(&self) -> Activity {
        self.shared.gate.current()
    }

    pub fn is_running(&self) -> bool {
        !self.shared.is_stopping()
    }

    pub fn stats(&self) -> PipelineStats {
        let registry = &self.shared.registry;
        PipelineStats {
            running: self.is_running(),
            activity: self.activity(),
            compressed_listeners: registry.count(StreamFormat::Compressed),
            raw_listeners: registry.count(StreamFormat::Raw),
            local_capture: registry.has_local_capture(),
            capture_backlog_bytes: self.shared.capture_buffer.len(),
            counters: self.shared.counters.snapshot(),
        }
    }
}

/// A running capture-to-listener pipeline
pub struct Pipeline {
    handle: PipelineHandle,
    capture: Box<dyn CaptureSource>,
    workers: Vec<JoinHandle<()>>,
    events: Receiver<PipelineEvent>,
    native: NativeFormat,
    stopped: bool,
}

impl Pipeline {
    /// Spawn every stage, then start the capture adapter
    pub fn start(config: PipelineConfig, capture: Box<dyn CaptureSource>) -> Result<Self> {
        config.validate()?;
        let native = capture.native_format();
        if native.channels == 0 || native.sample_rate == 0 {
            return Err(AudioError::UnsupportedFormat(native.to_string()).into());
        }

        let (events, events_rx) = event_channel(EVENT_QUEUE_CAPACITY);
        let shared = Shared::new(config, events);

        let processor = Processor::new(shared.clone(), native)?;

        let mut pipeline = Self {
            handle: PipelineHandle {
                shared: shared.clone(),
            },
            capture,
            workers: Vec::new(),
            events: events_rx,
            native,
            stopped: false,
        };

        if let Err(e) = pipeline.spawn_workers(processor) {
            pipeline.shutdown();
            return Err(e);
        }

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let sink = CaptureSink::new(
            shared.capture_buffer.clone(),
            native,
            shared.counters.capture.clone(),
            move |error| {
                if let Some(shared) = weak.upgrade() {
                    shared.fail(Error::Capture(error));
                }
            },
        );
        if let Err(e) = pipeline.capture.start(sink) {
            pipeline.shutdown();
            return Err(e.into());
        }

        tracing::info!(
            "Pipeline started: capture {} -> target {}Hz {}ch",
            native,
            shared.config.target.sample_rate,
            shared.config.target.channels
        );
        Ok(pipeline)
    }

    fn spawn_workers(&mut self, processor: Processor) -> Result<()> {
        let shared = self.handle.shared.clone();
        self.workers
            .push(spawn_stage("process", &shared, move || processor.run())?);

        for (name, format) in [
            ("duplicate-compressed", StreamFormat::Compressed),
            ("duplicate-raw", StreamFormat::Raw),
        ] {
            let duplicator = Duplicator::new(shared.clone(), format);
            self.workers
                .push(spawn_stage(name, &shared, move || duplicator.run())?);
        }
        Ok(())
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub fn register_listener(&self, id: SessionId, format: StreamFormat) -> Result<ListenerStream> {
        self.handle.register_listener(id, format)
    }

    pub fn unregister_listener(&self, id: &SessionId) {
        self.handle.unregister_listener(id)
    }

    /// Lifecycle feedback (listener churn, fatal errors)
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.handle.stats()
    }

    pub fn native_format(&self) -> NativeFormat {
        self.native
    }

    /// False once stopped or halted by a fatal error
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Stop capture, close every channel and join all stages.
    ///
    /// Returns the error that halted the pipeline, if one did.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown();
        match self.handle.shared.fatal.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let shared = &self.handle.shared;
        shared.stopping.store(true, Ordering::SeqCst);
        self.capture.stop();
        shared.halt();

        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("stage").to_string();
            if worker.join().is_err() {
                tracing::error!("{} panicked", name);
            }
        }
        tracing::info!("Pipeline stopped");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
