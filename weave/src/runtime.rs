//! # Runtime
//!
//! The façade a host process drives: it starts the worker threads, places
//! and removes instances on them, hands control commands and data to
//! instances, accepts frames from peer runtimes and exposes the statistics.
//!
//! ## Shared state
//! Everything process-scoped (type registry, statistics, directory,
//! transport, profiler) lives in one [`RuntimeShared`] behind an `Arc`,
//! handed to every worker when it is spawned.

use bytes::Bytes;
use flume::{Receiver, Sender, TrySendError};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use weave_api::stats::encode_samples;
use weave_api::{
    ControlMsg, InitData, MsuId, MsuMessage, MsuTypeId, PeerHeader, PeerMsgType, RemoteEnvelope, RuntimeId,
    StatKind, StatSample,
};

use crate::config::RuntimeConfig;
use crate::directory::Directory;
use crate::error::{StatsError, SystemError};
use crate::profiler::Profiler;
use crate::registry::TypeRegistry;
use crate::stats::StatsEngine;
use crate::transport::{PeerFrame, PeerTransport};
use crate::worker::{WorkerHandle, WorkerState};

/// Capacity of the lifecycle event channel. Events beyond it are dropped.
pub const EVENT_CAPACITY: usize = 1024;

/// Instance lifecycle notifications for the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Created {
        msu: MsuId,
        type_id: MsuTypeId,
        worker: usize,
    },
    /// Published for every failed creation, including those rejected before
    /// an instance existed.
    CreationFailed {
        msu: MsuId,
        type_id: MsuTypeId,
        reason: String,
    },
    Destroyed {
        msu: MsuId,
        type_id: MsuTypeId,
    },
}

/// Process-scoped state shared by the façade and every worker.
pub struct RuntimeShared {
    config: RuntimeConfig,
    registry: Arc<TypeRegistry>,
    stats: StatsEngine,
    transport: Arc<dyn PeerTransport>,
    directory: Directory,
    profiler: Profiler,
    events: Sender<RuntimeEvent>,
}

impl RuntimeShared {
    pub(crate) fn new(
        config: RuntimeConfig,
        registry: Arc<TypeRegistry>,
        transport: Arc<dyn PeerTransport>,
    ) -> (Self, Receiver<RuntimeEvent>) {
        let (events, event_rx) = flume::bounded(EVENT_CAPACITY);
        let shared = Self {
            stats: StatsEngine::new(&config.stats),
            profiler: Profiler::new(config.profiler_tag_probability),
            directory: Directory::new(),
            registry,
            transport,
            events,
            config,
        };
        (shared, event_rx)
    }

    pub fn runtime_id(&self) -> RuntimeId {
        self.config.runtime_id
    }

    pub fn address(&self) -> Ipv4Addr {
        self.config.address
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &StatsEngine {
        &self.stats
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn transport(&self) -> &dyn PeerTransport {
        self.transport.as_ref()
    }

    pub(crate) fn publish(&self, event: RuntimeEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!(?event, "event channel full, dropping event"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Decodes a frame from a peer and enqueues the message it carries.
    pub(crate) fn deliver_peer_frame(&self, header: PeerHeader, frame: Bytes) -> Result<(), SystemError> {
        if header.kind == PeerMsgType::Nil {
            warn!(runtime_id = %self.runtime_id(), "ignoring nil peer frame");
            return Ok(());
        }
        if header.data_size != frame.len() as u64 {
            return Err(weave_api::EnvelopeError::LengthMismatch {
                declared: header.data_size as usize,
                actual: frame.len(),
            }
            .into());
        }
        let envelope = RemoteEnvelope::decode(&frame)?;
        let entry = self
            .directory
            .get(envelope.dst)
            .ok_or(SystemError::UnknownMsu(envelope.dst))?;
        let expected = self
            .registry
            .lookup(entry.type_id)
            .map(|msu_type| msu_type.proto_number())
            .ok_or(SystemError::UnknownMsu(envelope.dst))?;
        if envelope.proto != expected {
            let err = SystemError::ProtoMismatch {
                msu: envelope.dst,
                expected,
                got: envelope.proto,
            };
            error!(runtime_id = %self.runtime_id(), src = %envelope.src, error = %err, "rejecting peer frame");
            return Err(err);
        }
        let (dst, msg) = envelope.into_message();
        let queue = entry.data;
        self.stats.increment(StatKind::BytesReceived, dst.get(), frame.len() as f64);
        self.profiler.record(&self.stats, StatKind::ProfRemoteRecv, &msg.header);
        queue.try_push(msg)?;
        Ok(())
    }
}

impl std::fmt::Debug for RuntimeShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeShared")
            .field("runtime_id", &self.config.runtime_id)
            .field("address", &self.config.address)
            .field("registry", &self.registry)
            .field("instances", &self.directory.len())
            .finish()
    }
}

/// A running runtime: worker threads plus the shared state.
pub struct Runtime {
    shared: Arc<RuntimeShared>,
    workers: Vec<WorkerHandle>,
    events: Receiver<RuntimeEvent>,
}

impl Runtime {
    /// Validates `config`, freezes `registry` and spawns the workers.
    pub fn start(
        config: RuntimeConfig,
        registry: TypeRegistry,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self, SystemError> {
        config.validate()?;
        let worker_count = config.worker_count;
        let (shared, events) = RuntimeShared::new(config, Arc::new(registry), transport);
        let shared = Arc::new(shared);

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            match WorkerHandle::spawn(index, shared.clone()) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    stop_workers(&workers);
                    return Err(err);
                }
            }
        }

        info!(
            runtime_id = %shared.runtime_id(),
            address = %shared.address(),
            workers = worker_count,
            types = shared.registry().len(),
            "runtime started"
        );
        Ok(Self {
            shared,
            workers,
            events,
        })
    }

    pub fn runtime_id(&self) -> RuntimeId {
        self.shared.runtime_id()
    }

    pub fn address(&self) -> Ipv4Addr {
        self.shared.address()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    pub fn stats(&self) -> &StatsEngine {
        self.shared.stats()
    }

    /// Lifecycle notifications, in the order they were published.
    pub fn events(&self) -> &Receiver<RuntimeEvent> {
        &self.events
    }

    /// Ids of the instances hosted here, sorted.
    pub fn msu_ids(&self) -> Vec<MsuId> {
        self.shared.directory().msu_ids()
    }

    fn worker(&self, index: usize) -> Result<&WorkerHandle, SystemError> {
        let worker = self.workers.get(index).ok_or(SystemError::NoSuchWorker(index))?;
        if worker.state() != WorkerState::Running {
            return Err(SystemError::ShuttingDown);
        }
        Ok(worker)
    }

    /// Creates instance `msu_id` of `type_id` on worker `worker` and waits
    /// until it is initialized.
    pub fn place_msu(
        &self,
        worker: usize,
        type_id: MsuTypeId,
        msu_id: MsuId,
        init: InitData,
    ) -> Result<(), SystemError> {
        self.worker(worker)?.create(type_id, msu_id, init)
    }

    /// Destroys instance `msu_id`, releasing everything queued for it.
    pub fn remove_msu(&self, msu_id: MsuId) -> Result<(), SystemError> {
        let entry = self
            .shared
            .directory()
            .get(msu_id)
            .ok_or(SystemError::UnknownMsu(msu_id))?;
        if self.worker(entry.worker)?.destroy(msu_id)? {
            Ok(())
        } else {
            Err(SystemError::UnknownMsu(msu_id))
        }
    }

    /// Queues a control command for the instance it names.
    pub fn send_control(&self, cmd: ControlMsg) -> Result<(), SystemError> {
        let queue = self
            .shared
            .directory()
            .ctrl_queue(cmd.msu)
            .ok_or(SystemError::UnknownMsu(cmd.msu))?;
        queue.try_push(cmd)?;
        Ok(())
    }

    /// Injects a message entering the system at instance `msu_id`. The
    /// profiler decides here whether the flow is traced.
    pub fn enqueue(&self, msu_id: MsuId, mut msg: MsuMessage) -> Result<(), SystemError> {
        let queue = self
            .shared
            .directory()
            .data_queue(msu_id)
            .ok_or(SystemError::UnknownMsu(msu_id))?;
        let profiler = self.shared.profiler();
        if profiler.tag(&mut msg.header) {
            profiler.record(self.shared.stats(), StatKind::ProfEntry, &msg.header);
        }
        queue.try_push(msg)?;
        Ok(())
    }

    /// Accepts one frame received from a peer runtime.
    pub fn handle_peer_frame(&self, header: PeerHeader, frame: Bytes) -> Result<(), SystemError> {
        self.shared.deliver_peer_frame(header, frame)
    }

    /// Feeds every frame arriving on `frames` into this runtime, on a
    /// dedicated thread, until all senders are gone.
    pub fn spawn_peer_listener(&self, frames: Receiver<PeerFrame>) -> Result<JoinHandle<()>, SystemError> {
        let shared = self.shared.clone();
        let dispatch = crate::logging::current_subscriber();
        std::thread::Builder::new()
            .name(format!("weave-peer-{}", shared.runtime_id()))
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    for PeerFrame { from, header, frame } in frames.iter() {
                        if let Err(err) = shared.deliver_peer_frame(header, frame) {
                            warn!(peer = %from, error = %err, "dropping peer frame");
                        }
                    }
                    debug!(runtime_id = %shared.runtime_id(), "peer listener stopped");
                })
            })
            .map_err(|e| SystemError::ThreadSetup(format!("failed to spawn peer listener: {}", e)))
    }

    /// Samples every item of `kind` over the trailing `duration`.
    pub fn sample_stats(
        &self,
        kind: StatKind,
        duration: Duration,
        count: usize,
    ) -> Result<Vec<StatSample>, StatsError> {
        self.shared.stats().sample(kind, duration, count)
    }

    /// Samples `kinds` and encodes the records for the telemetry stream.
    /// Disabled kinds are skipped.
    pub fn encode_stats(&self, kinds: &[StatKind], duration: Duration, count: usize) -> Result<Bytes, StatsError> {
        let mut samples = Vec::new();
        for kind in kinds {
            match self.sample_stats(*kind, duration, count) {
                Ok(batch) => samples.extend(batch),
                Err(StatsError::Disabled(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(encode_samples(&samples)?)
    }

    /// Stops the workers, destroying the instances they still own, then
    /// tears down every registered type.
    pub fn shutdown(mut self) -> Result<(), SystemError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), SystemError> {
        if self.workers.is_empty() {
            return Ok(());
        }
        let result = stop_workers(&self.workers);
        self.workers.clear();
        self.shared.registry().destroy_all();
        info!(runtime_id = %self.shared.runtime_id(), "runtime stopped");
        result
    }
}

fn stop_workers(workers: &[WorkerHandle]) -> Result<(), SystemError> {
    for worker in workers {
        worker.request_stop();
    }
    let mut result = Ok(());
    for worker in workers {
        if let Err(err) = worker.join() {
            result = Err(err);
        }
    }
    result
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "runtime stopped with errors");
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("shared", &self.shared)
            .field("workers", &self.workers)
            .finish()
    }
}
