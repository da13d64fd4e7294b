//! # Worker Threads
//!
//! Every worker is one OS thread owning a disjoint set of instances. Nothing
//! an instance owns (routes, keyed state, queue receivers) is touched from
//! any other thread; the rest of the runtime reaches a worker only through
//! its command channel and the queues of its instances.
//!
//! ## Scheduling
//! Instances are visited in placement order. For each one, up to `weight`
//! data messages are processed, and before each of them all pending control
//! commands of that instance are applied, so a command enqueued ahead of a
//! message always takes effect first. A pass that finds nothing
//! to do parks the thread on its doorbell until an enqueue or a command
//! rings it, or until `idle_wait` elapses. Each park counts as one context
//! switch of the worker (`ContextSwitches`, item = worker index).

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use flume::{Receiver, Sender};
use tracing::{debug, error, info};
use weave_api::{InitData, MsuId, MsuTypeId, StatKind};

use crate::control;
use crate::dispatch;
use crate::error::{CreateError, SystemError};
use crate::logging;
use crate::msu::{panic_message, LocalMsu};
use crate::queue::{doorbell, Doorbell, DoorbellWaiter};
use crate::runtime::RuntimeShared;

/// Requests served by a worker between scheduling passes.
pub(crate) enum WorkerCommand {
    Create {
        type_id: MsuTypeId,
        msu_id: MsuId,
        init: InitData,
        reply: Sender<Result<(), CreateError>>,
    },
    Destroy {
        msu_id: MsuId,
        reply: Sender<bool>,
    },
    Shutdown,
}

/// States a worker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Stopping,
    Stopped,
}

/// The runtime's handle on one worker thread.
pub(crate) struct WorkerHandle {
    index: usize,
    commands: Sender<WorkerCommand>,
    doorbell: Doorbell,
    state: Mutex<WorkerState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    pub(crate) fn spawn(index: usize, shared: Arc<RuntimeShared>) -> Result<Self, SystemError> {
        let (commands, command_rx) = flume::unbounded();
        let (bell, waiter) = doorbell();
        let dispatch = logging::current_subscriber();

        let worker = Worker {
            index,
            shared,
            commands: command_rx,
            doorbell: bell.clone(),
            waiter,
            instances: Vec::new(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("weave-worker-{}", index))
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || worker.run()))
            .map_err(|e| SystemError::ThreadSetup(format!("failed to spawn worker {}: {}", index, e)))?;

        Ok(Self {
            index,
            commands,
            doorbell: bell,
            state: Mutex::new(WorkerState::Running),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub(crate) fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: WorkerCommand) -> Result<(), SystemError> {
        self.commands
            .send(command)
            .map_err(|_| SystemError::ShuttingDown)?;
        self.doorbell.ring();
        Ok(())
    }

    /// Creates an instance on this worker and waits for the outcome.
    pub(crate) fn create(&self, type_id: MsuTypeId, msu_id: MsuId, init: InitData) -> Result<(), SystemError> {
        let (reply, outcome) = flume::bounded(1);
        self.send(WorkerCommand::Create {
            type_id,
            msu_id,
            init,
            reply,
        })?;
        outcome.recv().map_err(|_| SystemError::ShuttingDown)??;
        Ok(())
    }

    /// Destroys an instance of this worker. Returns whether it existed.
    pub(crate) fn destroy(&self, msu_id: MsuId) -> Result<bool, SystemError> {
        let (reply, outcome) = flume::bounded(1);
        self.send(WorkerCommand::Destroy { msu_id, reply })?;
        outcome.recv().map_err(|_| SystemError::ShuttingDown)
    }

    /// Asks the thread to destroy its instances and exit. Does not wait.
    pub(crate) fn request_stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == WorkerState::Running {
            *state = WorkerState::Stopping;
            // A closed channel means the thread is already gone.
            let _ = self.send(WorkerCommand::Shutdown);
        }
    }

    /// Waits for the thread to exit, reporting a panic as an error.
    pub(crate) fn join(&self) -> Result<(), SystemError> {
        let thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = WorkerState::Stopped;
        let Some(thread) = thread else {
            return Ok(());
        };
        thread.join().map_err(|panic| {
            let message = panic_message(panic.as_ref());
            error!(worker = self.index, panic = %message, "worker thread panicked");
            SystemError::ThreadSetup(format!("worker {} panicked: {}", self.index, message))
        })
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("index", &self.index)
            .field("state", &self.state())
            .finish()
    }
}

struct Worker {
    index: usize,
    shared: Arc<RuntimeShared>,
    commands: Receiver<WorkerCommand>,
    doorbell: Doorbell,
    waiter: DoorbellWaiter,
    instances: Vec<LocalMsu>,
}

impl Worker {
    fn run(mut self) {
        info!(worker = self.index, "worker started");
        loop {
            if !self.serve_commands() {
                break;
            }
            let mut busy = false;
            for msu in self.instances.iter_mut() {
                busy |= run_instance(&self.shared, msu);
            }
            if !busy {
                // Parking gives up the CPU; counted per worker.
                self.shared
                    .stats()
                    .increment(StatKind::ContextSwitches, self.index as u32, 1.0);
                self.waiter.wait(self.shared.config().idle_wait);
            }
        }
        self.destroy_all();
        info!(worker = self.index, "worker stopped");
    }

    /// Serves every pending command. Returns false once the worker must stop.
    fn serve_commands(&mut self) -> bool {
        loop {
            let command = match self.commands.try_recv() {
                Ok(command) => command,
                Err(flume::TryRecvError::Empty) => return true,
                Err(flume::TryRecvError::Disconnected) => return false,
            };
            match command {
                WorkerCommand::Create {
                    type_id,
                    msu_id,
                    init,
                    reply,
                } => {
                    let outcome = LocalMsu::create(&self.shared, self.index, type_id, msu_id, &init, &self.doorbell)
                        .map(|msu| self.instances.push(msu));
                    let _ = reply.send(outcome);
                }
                WorkerCommand::Destroy { msu_id, reply } => {
                    let found = match self.instances.iter().position(|msu| msu.id == msu_id) {
                        Some(at) => {
                            self.instances.remove(at).destroy(&self.shared);
                            true
                        }
                        None => false,
                    };
                    let _ = reply.send(found);
                }
                WorkerCommand::Shutdown => return false,
            }
        }
    }

    fn destroy_all(&mut self) {
        debug!(worker = self.index, instances = self.instances.len(), "destroying instances");
        for msu in self.instances.drain(..) {
            msu.destroy(&self.shared);
        }
    }
}

/// One scheduling turn of `msu`. Returns whether anything was processed.
fn run_instance(shared: &RuntimeShared, msu: &mut LocalMsu) -> bool {
    let mut busy = false;
    let mut processed = 0u32;
    loop {
        let next = if processed < msu.weight { msu.data.try_pop() } else { None };
        // Commands enqueued before `next` are applied before it.
        while let Some(cmd) = msu.ctrl.try_pop() {
            control::apply(shared, msu, cmd);
            busy = true;
        }
        let Some(msg) = next else {
            break;
        };
        // Failures are counted and logged by the engine.
        let _ = dispatch::receive(shared, msu, msg);
        processed += 1;
        busy = true;
    }
    shared.stats().periodic_record_value(
        StatKind::QueueLen,
        msu.id.get(),
        msu.data.len() as f64,
        shared.config().queue_len_period_ms,
    );
    shared.stats().periodic_record_value(
        StatKind::MemoryAllocated,
        msu.id.get(),
        msu.data.bytes() as f64,
        shared.config().queue_len_period_ms,
    );
    busy
}
