use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::executor::{Executor, JobContext, JobSink};
use super::protocol::{Job, PinUpdate, RequestId, Response};
use super::retained::{SharedLayouts, lock};
use crate::engine::LayoutFrame;
use crate::error::{EngineError, Result};

pub(super) enum Control {
    Submit(Submission),
    Resume(ResumeRequest),
    Pin { id: RequestId, update: PinUpdate },
    Worker(WorkerEvent),
    Shutdown,
}

pub(super) struct Submission {
    pub(super) id: RequestId,
    pub(super) job: Arc<Job>,
    pub(super) reply: Sender<Result<Response>>,
    pub(super) progress: Sender<LayoutFrame>,
    pub(super) timeout: Duration,
}

/// Continues a retained layout. Built on the dispatcher so earlier pins are already recorded.
pub(super) struct ResumeRequest {
    pub(super) layout: RequestId,
    pub(super) updates: Vec<PinUpdate>,
    pub(super) id: RequestId,
    pub(super) reply: Sender<Result<Response>>,
    pub(super) progress: Sender<LayoutFrame>,
    pub(super) timeout: Duration,
}

pub(super) enum WorkerEvent {
    Finished {
        slot: usize,
        generation: u64,
        id: RequestId,
        result: Result<Response>,
    },
    Exited {
        slot: usize,
        generation: u64,
        panicked: bool,
    },
}

enum WorkerMessage {
    Run(Run),
    Pin { id: RequestId, update: PinUpdate },
}

struct Run {
    id: RequestId,
    job: Arc<Job>,
    progress: Sender<LayoutFrame>,
}

/// Reports the worker's exit, including unwinding out of a panicking executor.
struct ExitGuard {
    slot: usize,
    generation: u64,
    events: Sender<Control>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.events.send(Control::Worker(WorkerEvent::Exited {
            slot: self.slot,
            generation: self.generation,
            panicked: thread::panicking(),
        }));
    }
}

struct WorkerSink<'a> {
    id: RequestId,
    inbox: &'a Receiver<WorkerMessage>,
    queue: &'a mut VecDeque<Run>,
    held_pins: &'a mut HashMap<RequestId, Vec<PinUpdate>>,
    pins: Vec<PinUpdate>,
    progress: &'a Sender<LayoutFrame>,
}

impl JobSink for WorkerSink<'_> {
    fn report(&mut self, frame: LayoutFrame) {
        let _ = self.progress.send(frame);
    }

    fn take_pins(&mut self) -> Vec<PinUpdate> {
        loop {
            match self.inbox.try_recv() {
                Ok(WorkerMessage::Run(run)) => self.queue.push_back(run),
                Ok(WorkerMessage::Pin { id, update }) if id == self.id => self.pins.push(update),
                Ok(WorkerMessage::Pin { id, update }) => {
                    hold_pin(self.queue, self.held_pins, id, update);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        std::mem::take(&mut self.pins)
    }
}

/// Keeps a pin for a job still waiting in `queue`. A pin for any other id belongs to a
/// job this worker already finished.
fn hold_pin(
    queue: &VecDeque<Run>,
    held_pins: &mut HashMap<RequestId, Vec<PinUpdate>>,
    id: RequestId,
    update: PinUpdate,
) {
    if queue.iter().any(|run| run.id == id) {
        held_pins.entry(id).or_default().push(update);
    } else {
        debug!("dropping pin change for finished request {id}");
    }
}

struct WorkerHandle {
    slot: usize,
    generation: u64,
    inbox: Receiver<WorkerMessage>,
    events: Sender<Control>,
    executor: Arc<dyn Executor>,
    retired: Arc<AtomicBool>,
}

impl WorkerHandle {
    fn run(self) {
        let _guard = ExitGuard {
            slot: self.slot,
            generation: self.generation,
            events: self.events.clone(),
        };
        let mut queue = VecDeque::new();
        let mut held_pins: HashMap<RequestId, Vec<PinUpdate>> = HashMap::new();

        loop {
            let run = match queue.pop_front() {
                Some(run) => run,
                None => match self.inbox.recv() {
                    Ok(WorkerMessage::Run(run)) => run,
                    Ok(WorkerMessage::Pin { id, update }) => {
                        hold_pin(&queue, &mut held_pins, id, update);
                        continue;
                    }
                    Err(_) => break,
                },
            };
            if self.retired.load(Ordering::Acquire) {
                break;
            }

            let mut sink = WorkerSink {
                id: run.id,
                inbox: &self.inbox,
                queue: &mut queue,
                pins: held_pins.remove(&run.id).unwrap_or_default(),
                held_pins: &mut held_pins,
                progress: &run.progress,
            };
            let result = self
                .executor
                .execute(&run.job, &mut JobContext::new(run.id, &mut sink));

            let finished = WorkerEvent::Finished {
                slot: self.slot,
                generation: self.generation,
                id: run.id,
                result,
            };
            if self.events.send(Control::Worker(finished)).is_err() {
                break;
            }
        }
    }
}

struct Slot {
    generation: u64,
    inbox: Option<Sender<WorkerMessage>>,
    retired: Arc<AtomicBool>,
}

struct InFlight {
    slot: usize,
    generation: u64,
    job: Arc<Job>,
    reply: Sender<Result<Response>>,
    progress: Sender<LayoutFrame>,
    deadline: Instant,
    timeout: Duration,
}

impl InFlight {
    fn run(&self, id: RequestId) -> Run {
        Run {
            id,
            job: Arc::clone(&self.job),
            progress: self.progress.clone(),
        }
    }
}

pub(super) struct Dispatcher {
    executor: Arc<dyn Executor>,
    control: Receiver<Control>,
    events: Sender<Control>,
    slots: Vec<Slot>,
    in_flight: HashMap<RequestId, InFlight>,
    next_slot: usize,
    degraded: Arc<AtomicBool>,
    layouts: SharedLayouts,
}

impl Dispatcher {
    pub(super) fn new(
        executor: Arc<dyn Executor>,
        workers: usize,
        control: Receiver<Control>,
        events: Sender<Control>,
        degraded: Arc<AtomicBool>,
        layouts: SharedLayouts,
    ) -> Self {
        let mut dispatcher = Self {
            executor,
            control,
            events,
            slots: Vec::with_capacity(workers),
            in_flight: HashMap::new(),
            next_slot: 0,
            degraded,
            layouts,
        };
        for slot in 0..workers.max(1) {
            dispatcher.slots.push(Slot {
                generation: 0,
                inbox: None,
                retired: Arc::new(AtomicBool::new(false)),
            });
            dispatcher.spawn_worker(slot);
        }
        dispatcher
    }

    fn spawn_worker(&mut self, slot: usize) -> bool {
        let (inbox_tx, inbox_rx) = mpsc::channel();
        let retired = Arc::new(AtomicBool::new(false));
        let state = &mut self.slots[slot];
        state.generation += 1;

        let handle = WorkerHandle {
            slot,
            generation: state.generation,
            inbox: inbox_rx,
            events: self.events.clone(),
            executor: Arc::clone(&self.executor),
            retired: Arc::clone(&retired),
        };
        let spawned = thread::Builder::new()
            .name(format!("layout-worker-{slot}"))
            .spawn(move || handle.run());

        match spawned {
            Ok(_) => {
                debug!("spawned layout worker {slot} (generation {})", state.generation);
                state.inbox = Some(inbox_tx);
                state.retired = retired;
                true
            }
            Err(error) => {
                warn!("failed to spawn layout worker {slot}: {error}; falling back to synchronous mode");
                state.inbox = None;
                self.degraded.store(true, Ordering::Release);
                self.reject_slot(slot, None, |_| EngineError::WorkerUnavailable);
                false
            }
        }
    }

    /// Rejects the slot's requests, optionally only those of one generation.
    fn reject_slot<F>(&mut self, slot: usize, generation: Option<u64>, error: F)
    where
        F: Fn(RequestId) -> EngineError,
    {
        let ids = self
            .in_flight
            .iter()
            .filter(|(_, request)| {
                request.slot == slot && generation.is_none_or(|g| request.generation == g)
            })
            .map(|(&id, _)| id)
            .collect::<Vec<_>>();
        for id in ids {
            if let Some(request) = self.in_flight.remove(&id) {
                let _ = request.reply.send(Err(error(id)));
            }
        }
    }

    fn pick_slot(&mut self) -> Option<usize> {
        let count = self.slots.len();
        for step in 0..count {
            let slot = (self.next_slot + step) % count;
            if self.slots[slot].inbox.is_some() {
                self.next_slot = (slot + 1) % count;
                return Some(slot);
            }
        }
        None
    }

    fn submit(&mut self, submission: Submission) {
        let Submission {
            id,
            job,
            reply,
            progress,
            timeout,
        } = submission;
        let Some(slot) = self.pick_slot() else {
            let _ = reply.send(Err(EngineError::WorkerUnavailable));
            return;
        };

        let request = InFlight {
            slot,
            generation: self.slots[slot].generation,
            job,
            reply,
            progress,
            deadline: Instant::now() + timeout,
            timeout,
        };
        let run = request.run(id);
        debug!("dispatching {} request {id} to worker {slot}", request.job.kind());
        self.in_flight.insert(id, request);
        self.send_run(slot, run);
    }

    fn resume(&mut self, request: ResumeRequest) {
        let ResumeRequest {
            layout,
            updates,
            id,
            reply,
            progress,
            timeout,
        } = request;
        let job = lock(&self.layouts).resume_job(layout, &updates);
        match job {
            Ok(job) => self.submit(Submission {
                id,
                job: Arc::new(job),
                reply,
                progress,
                timeout,
            }),
            Err(error) => {
                let _ = reply.send(Err(error));
            }
        }
    }

    fn send_run(&mut self, slot: usize, run: Run) {
        let delivered = self.slots[slot]
            .inbox
            .as_ref()
            .is_some_and(|inbox| inbox.send(WorkerMessage::Run(run)).is_ok());
        if !delivered {
            let generation = self.slots[slot].generation;
            warn!("layout worker {slot} is gone; restarting it");
            self.handle_lost_worker(slot, generation);
        }
    }

    fn route_pin(&mut self, id: RequestId, update: PinUpdate) {
        let Some(request) = self.in_flight.get(&id) else {
            if lock(&self.layouts).record_pin(id, &update) {
                debug!("recorded pin change for finished request {id}; resume it to relax");
            } else {
                debug!("dropping pin change for unknown request {id}");
            }
            return;
        };
        let slot = request.slot;
        if let Some(inbox) = &self.slots[slot].inbox {
            let _ = inbox.send(WorkerMessage::Pin { id, update });
        }
    }

    fn finish(&mut self, slot: usize, generation: u64, id: RequestId, result: Result<Response>) {
        match self.in_flight.get(&id) {
            Some(request) if request.slot == slot && request.generation == generation => {
                if let Some(request) = self.in_flight.remove(&id) {
                    lock(&self.layouts).remember(id, &request.job, &result);
                    let _ = request.reply.send(result);
                }
            }
            _ => debug!("discarding late response for request {id}"),
        }
    }

    fn handle_lost_worker(&mut self, slot: usize, generation: u64) {
        if self.slots[slot].generation != generation {
            return;
        }
        self.reject_slot(slot, Some(generation), |id| EngineError::WorkerCrashed { id });
        self.spawn_worker(slot);
    }

    fn handle_exit(&mut self, slot: usize, generation: u64, panicked: bool) {
        if self.slots.get(slot).is_none_or(|state| state.generation != generation) {
            return;
        }
        if panicked {
            warn!("layout worker {slot} panicked; restarting it");
        } else {
            warn!("layout worker {slot} exited unexpectedly; restarting it");
        }
        self.handle_lost_worker(slot, generation);
    }

    fn expire(&mut self, now: Instant) {
        let expired = self
            .in_flight
            .iter()
            .filter(|(_, request)| request.deadline <= now)
            .map(|(&id, _)| id)
            .collect::<Vec<_>>();

        for id in expired {
            let Some(request) = self.in_flight.remove(&id) else {
                continue;
            };
            warn!("request {id} timed out after {:?}", request.timeout);
            let _ = request.reply.send(Err(EngineError::RequestTimeout {
                id,
                timeout: request.timeout,
            }));
            if request.generation == self.slots[request.slot].generation {
                self.retire(request.slot);
            }
        }
    }

    /// Abandons a stalled worker and moves its queued requests to a fresh one.
    fn retire(&mut self, slot: usize) {
        let old_generation = self.slots[slot].generation;
        self.slots[slot].retired.store(true, Ordering::Release);
        self.slots[slot].inbox = None;
        info!("retiring layout worker {slot} (generation {old_generation})");
        if !self.spawn_worker(slot) {
            return;
        }

        let generation = self.slots[slot].generation;
        let mut moved = self
            .in_flight
            .iter_mut()
            .filter(|(_, request)| request.slot == slot && request.generation == old_generation)
            .map(|(&id, request)| {
                request.generation = generation;
                (id, request.run(id))
            })
            .collect::<Vec<_>>();
        moved.sort_by_key(|(id, _)| *id);
        for (_, run) in moved {
            self.send_run(slot, run);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|request| request.deadline).min()
    }

    pub(super) fn run(mut self) {
        loop {
            let now = Instant::now();
            if self.next_deadline().is_some_and(|deadline| deadline <= now) {
                self.expire(now);
            }
            let message = match self.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match self.control.recv_timeout(wait) {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => {
                            self.expire(Instant::now());
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.control.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };

            match message {
                Control::Submit(submission) => self.submit(submission),
                Control::Resume(request) => self.resume(request),
                Control::Pin { id, update } => self.route_pin(id, update),
                Control::Worker(WorkerEvent::Finished {
                    slot,
                    generation,
                    id,
                    result,
                }) => self.finish(slot, generation, id, result),
                Control::Worker(WorkerEvent::Exited {
                    slot,
                    generation,
                    panicked,
                }) => self.handle_exit(slot, generation, panicked),
                Control::Shutdown => break,
            }
        }

        for (_, request) in self.in_flight.drain() {
            let _ = request.reply.send(Err(EngineError::ShutDown));
        }
        for slot in &mut self.slots {
            slot.retired.store(true, Ordering::Release);
            slot.inbox = None;
        }
        info!("layout dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn queued(id: u64) -> (Run, Receiver<LayoutFrame>) {
        let (progress, frames) = mpsc::channel();
        let job = Job::Cluster {
            graph: Graph::from_trusted(Vec::new(), Vec::new()),
            distance: None,
        };
        let run = Run {
            id: RequestId(id),
            job: Arc::new(job),
            progress,
        };
        (run, frames)
    }

    fn release(node: &str) -> PinUpdate {
        PinUpdate::Release {
            node: node.to_owned(),
        }
    }

    #[test]
    fn pins_are_held_only_for_queued_requests() {
        let (run, _frames) = queued(2);
        let queue = VecDeque::from([run]);
        let mut held_pins = HashMap::new();

        hold_pin(&queue, &mut held_pins, RequestId(2), release("a"));
        hold_pin(&queue, &mut held_pins, RequestId(1), release("b"));
        hold_pin(&queue, &mut held_pins, RequestId(2), release("c"));

        assert_eq!(held_pins.len(), 1);
        assert_eq!(held_pins[&RequestId(2)], vec![release("a"), release("c")]);

        hold_pin(&VecDeque::new(), &mut held_pins, RequestId(3), release("d"));
        assert!(!held_pins.contains_key(&RequestId(3)));
    }
}
