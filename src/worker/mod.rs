mod dispatcher;
mod executor;
mod protocol;
mod retained;

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::cluster::ClusterOutcome;
use crate::config::{CoordinatorConfig, EngineConfig};
use crate::engine::{LayoutEngine, LayoutFrame, LayoutResult};
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::optimize::{OptimizeOptions, OptimizeOutcome};
use dispatcher::{Control, Dispatcher, ResumeRequest, Submission};
pub use executor::{EngineExecutor, Executor, JobContext};
use executor::JobSink;
pub use protocol::{Job, Pending, PinUpdate, RequestId, Response};
use retained::{LayoutStore, SharedLayouts, lock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    BackgroundCapable,
    SynchronousOnly,
}

impl ExecutionMode {
    /// Checks once whether background threads can be started at all.
    pub fn probe(config: &CoordinatorConfig) -> Self {
        if config.force_synchronous {
            return Self::SynchronousOnly;
        }
        let probe = thread::Builder::new()
            .name("layout-probe".to_owned())
            .spawn(|| ());
        match probe.map(JoinHandle::join) {
            Ok(Ok(())) => Self::BackgroundCapable,
            Ok(Err(_)) => Self::SynchronousOnly,
            Err(error) => {
                warn!("background threads unavailable: {error}");
                Self::SynchronousOnly
            }
        }
    }
}

struct InlineSink {
    progress: Sender<LayoutFrame>,
}

impl JobSink for InlineSink {
    fn report(&mut self, frame: LayoutFrame) {
        let _ = self.progress.send(frame);
    }

    fn take_pins(&mut self) -> Vec<PinUpdate> {
        Vec::new()
    }
}

/// Keeps layout work off the caller's thread, falling back to inline execution when
/// background workers are unavailable.
pub struct Coordinator {
    config: EngineConfig,
    executor: Arc<dyn Executor>,
    mode: ExecutionMode,
    next_id: AtomicU64,
    control: Option<Sender<Control>>,
    dispatcher: Option<JoinHandle<()>>,
    degraded: Arc<AtomicBool>,
    layouts: SharedLayouts,
    closed: bool,
}

impl Coordinator {
    pub fn start(config: EngineConfig) -> Self {
        let executor = Arc::new(EngineExecutor::new(LayoutEngine::new(config.clone())));
        Self::with_executor(config, executor)
    }

    pub fn with_executor(config: EngineConfig, executor: Arc<dyn Executor>) -> Self {
        let config = config.sanitized();
        let mut mode = ExecutionMode::probe(&config.coordinator);
        let degraded = Arc::new(AtomicBool::new(false));
        let layouts = Arc::new(Mutex::new(LayoutStore::new(
            config.coordinator.retained_layouts,
        )));
        let mut control = None;
        let mut dispatcher = None;

        if mode == ExecutionMode::BackgroundCapable {
            let (control_tx, control_rx) = mpsc::channel();
            let events = control_tx.clone();
            let workers = config.coordinator.workers;
            let worker_executor = Arc::clone(&executor);
            let worker_degraded = Arc::clone(&degraded);
            let worker_layouts = Arc::clone(&layouts);
            let spawned = thread::Builder::new()
                .name("layout-dispatcher".to_owned())
                .spawn(move || {
                    Dispatcher::new(
                        worker_executor,
                        workers,
                        control_rx,
                        events,
                        worker_degraded,
                        worker_layouts,
                    )
                    .run();
                });
            match spawned {
                Ok(handle) => {
                    control = Some(control_tx);
                    dispatcher = Some(handle);
                }
                Err(error) => {
                    warn!("failed to start layout dispatcher: {error}");
                    mode = ExecutionMode::SynchronousOnly;
                }
            }
        }
        info!("layout coordinator running in {mode:?} mode");

        Self {
            config,
            executor,
            mode,
            next_id: AtomicU64::new(1),
            control,
            dispatcher,
            degraded,
            layouts,
            closed: false,
        }
    }

    /// Current mode; drops to synchronous once workers fail to spawn.
    pub fn mode(&self) -> ExecutionMode {
        if self.degraded.load(Ordering::Acquire) {
            ExecutionMode::SynchronousOnly
        } else {
            self.mode
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calculate_layout(&self, graph: Graph, width: f32, height: f32) -> Pending<LayoutResult> {
        self.submit(Job::Layout {
            graph,
            width,
            height,
        })
    }

    pub fn cluster_nodes(&self, graph: Graph, distance: Option<f32>) -> Pending<ClusterOutcome> {
        self.submit(Job::Cluster { graph, distance })
    }

    pub fn optimize_network(&self, graph: Graph, options: OptimizeOptions) -> Pending<OptimizeOutcome> {
        self.submit(Job::Optimize { graph, options })
    }

    /// Forwards a pin change to the worker running layout `id`. Once that layout has
    /// finished, the change is recorded on its retained graph for the next [`Self::resume`].
    pub fn pin(&self, id: RequestId, update: PinUpdate) -> Result<()> {
        if self.closed {
            return Err(EngineError::ShutDown);
        }
        match &self.control {
            Some(control) => control
                .send(Control::Pin { id, update })
                .map_err(|_| EngineError::ShutDown),
            None => {
                if !lock(&self.layouts).record_pin(id, &update) {
                    debug!("dropping pin change for unknown request {id}");
                }
                Ok(())
            }
        }
    }

    /// Relaxes the retained result of layout `id` again after applying `updates`,
    /// starting from the restart alpha. The new request's result is retained in turn.
    pub fn resume(&self, id: RequestId, updates: Vec<PinUpdate>) -> Pending<LayoutResult> {
        let control = match &self.control {
            Some(control) if !self.closed && self.mode() == ExecutionMode::BackgroundCapable => {
                control
            }
            _ => {
                let job = lock(&self.layouts).resume_job(id, &updates);
                return match job {
                    Ok(job) => self.submit(job),
                    Err(error) => {
                        let (reply_tx, reply_rx) = mpsc::channel();
                        let (_, progress_rx) = mpsc::channel();
                        let _ = reply_tx.send(Err(error));
                        Pending::new(self.next_request_id(), reply_rx, progress_rx)
                    }
                };
            }
        };

        let request_id = self.next_request_id();
        let (reply_tx, reply_rx) = mpsc::channel();
        let (progress_tx, progress_rx) = mpsc::channel();
        let pending = Pending::new(request_id, reply_rx, progress_rx);
        let request = ResumeRequest {
            layout: id,
            updates,
            id: request_id,
            reply: reply_tx,
            progress: progress_tx,
            timeout: self.config.coordinator.request_timeout,
        };
        if let Err(mpsc::SendError(returned)) = control.send(Control::Resume(request))
            && let Control::Resume(request) = returned
        {
            let _ = request.reply.send(Err(EngineError::ShutDown));
        }
        pending
    }

    /// Drops the retained graph of layout `id`. Returns whether one was kept.
    pub fn release_layout(&self, id: RequestId) -> bool {
        lock(&self.layouts).forget(id)
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn submit<T>(&self, job: Job) -> Pending<T>
    where
        T: TryFrom<Response, Error = EngineError>,
    {
        let id = self.next_request_id();
        let (reply_tx, reply_rx) = mpsc::channel();
        let (progress_tx, progress_rx) = mpsc::channel();
        let pending = Pending::new(id, reply_rx, progress_rx);

        if self.closed {
            let _ = reply_tx.send(Err(EngineError::ShutDown));
            return pending;
        }
        let control = match &self.control {
            Some(control) if self.mode() == ExecutionMode::BackgroundCapable => control,
            _ => {
                let mut sink = InlineSink {
                    progress: progress_tx,
                };
                let result = self
                    .executor
                    .execute(&job, &mut JobContext::new(id, &mut sink));
                lock(&self.layouts).remember(id, &job, &result);
                let _ = reply_tx.send(result);
                return pending;
            }
        };

        let submission = Submission {
            id,
            job: Arc::new(job),
            reply: reply_tx,
            progress: progress_tx,
            timeout: self.config.coordinator.request_timeout,
        };
        if let Err(mpsc::SendError(returned)) = control.send(Control::Submit(submission))
            && let Control::Submit(submission) = returned
        {
            let _ = submission.reply.send(Err(EngineError::ShutDown));
        }
        pending
    }

    /// Rejects outstanding requests and stops the dispatcher. Workers still busy with a
    /// job are left to finish on their own.
    pub fn shutdown(&mut self) {
        self.closed = true;
        let Some(control) = self.control.take() else {
            return;
        };
        let _ = control.send(Control::Shutdown);
        drop(control);
        if let Some(handle) = self.dispatcher.take()
            && handle.join().is_err()
        {
            warn!("layout dispatcher panicked during shutdown");
        }
        info!("layout coordinator shut down");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
