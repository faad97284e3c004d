//! Test doubles and an engine harness for unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use halt_common::config::HaltConfig;
use halt_common::error::{HaltError, Result};
use halt_common::types::{ContainerId, ContainerState};
use halt_core::probe::LivenessProbe;
use halt_core::signal::Signal;
use tempfile::TempDir;

use crate::container::{Container, ContainerSpec};
use crate::engine::Engine;
use crate::events::BroadcastEventLog;
use crate::metrics::RuntimeMetrics;
use crate::services::StatsCollector;
use crate::storage::{Filesystem, HostFilesystem, LayerHandle, LayerService, LeaseService};
use crate::store::{ContainerRecord, JsonStore, MetadataStore};
use crate::task::RuntimeTask;

/// A pid above the kernel's `pid_max`, so direct signals always miss.
pub(crate) const FAKE_PID: u32 = 4_194_401;

/// How a [`FakeTask`] reacts to signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskBehavior {
    /// Every signal makes the process exit with `128 + signal`.
    Exit,
    /// Only SIGKILL makes the process exit.
    ExitOnKill,
    /// Signals are accepted and ignored.
    Ignore,
    /// The task reports the process gone.
    Gone,
    /// Delivery fails.
    Fail,
}

#[derive(Debug)]
pub(crate) struct FakeTask {
    pid: u32,
    behavior: TaskBehavior,
    signals: Mutex<Vec<Signal>>,
    resumes: AtomicUsize,
    engine: Weak<Engine>,
    container: Weak<Container>,
}

impl FakeTask {
    fn new(
        pid: u32,
        behavior: TaskBehavior,
        engine: &Arc<Engine>,
        container: &Arc<Container>,
    ) -> Self {
        Self {
            pid,
            behavior,
            signals: Mutex::new(Vec::new()),
            resumes: AtomicUsize::new(0),
            engine: Arc::downgrade(engine),
            container: Arc::downgrade(container),
        }
    }

    pub(crate) fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    fn exit_later(&self, code: i32) {
        let (Some(engine), Some(container)) = (self.engine.upgrade(), self.container.upgrade())
        else {
            return;
        };
        let _ = tokio::spawn(async move {
            let _ = engine.handle_exit(&container, Some(code)).await;
        });
    }
}

#[async_trait]
impl RuntimeTask for FakeTask {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn kill(&self, signal: Signal) -> Result<()> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner).push(signal);
        match self.behavior {
            TaskBehavior::Exit => self.exit_later(128 + signal as i32),
            TaskBehavior::ExitOnKill if signal == Signal::SIGKILL => self.exit_later(137),
            TaskBehavior::ExitOnKill | TaskBehavior::Ignore => {}
            TaskBehavior::Gone => {
                return Err(HaltError::NoSuchProcess {
                    pid: self.pid,
                    signal: signal as i32,
                });
            }
            TaskBehavior::Fail => return Err(HaltError::system_msg("task rejected the signal")),
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let _ = self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Probe answering from a table; unknown pids are dead.
#[derive(Debug, Default)]
pub(crate) struct FakeProbe {
    alive: Mutex<HashMap<u32, bool>>,
}

impl FakeProbe {
    pub(crate) fn set_alive(&self, pid: u32, alive: bool) {
        let _ = self
            .alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid, alive);
    }
}

impl LivenessProbe for FakeProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pid)
            .copied()
            .unwrap_or(false)
    }
}

/// Layer service recording successful releases.
#[derive(Debug, Default)]
pub(crate) struct FakeLayers {
    released: Mutex<Vec<String>>,
    failures: AtomicUsize,
}

impl FakeLayers {
    pub(crate) fn released(&self) -> Vec<String> {
        self.released.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Makes the next `count` releases fail.
    pub(crate) fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl LayerService for FakeLayers {
    async fn release_layer(&self, layer: &LayerHandle) -> Result<()> {
        let pending = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(HaltError::system_msg(format!("layer {} is busy", layer.id)));
        }
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(layer.id.clone());
        Ok(())
    }
}

/// Lease service recording deletions.
#[derive(Debug, Default)]
pub(crate) struct FakeLeases {
    deleted: Mutex<Vec<String>>,
}

impl FakeLeases {
    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl LeaseService for FakeLeases {
    async fn delete(&self, lease: &str, _synchronous: bool) -> Result<()> {
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(lease.to_owned());
        Ok(())
    }
}

/// One root removal seen by [`RecordingFs`].
#[derive(Debug, Clone)]
pub(crate) struct FsCall {
    pub(crate) path: PathBuf,
    /// Status of the tracked container at call time.
    pub(crate) status: Option<ContainerState>,
    /// Whether the tracked container's lock was held.
    pub(crate) lock_held: bool,
}

/// Host filesystem that records calls and can be made to fail.
#[derive(Debug, Default)]
pub(crate) struct RecordingFs {
    calls: Mutex<Vec<FsCall>>,
    fail: AtomicBool,
    tracked: Mutex<Weak<Container>>,
}

impl RecordingFs {
    pub(crate) fn calls(&self) -> Vec<FsCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn track(&self, container: &Arc<Container>) {
        *self.tracked.lock().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(container);
    }
}

impl Filesystem for RecordingFs {
    fn ensure_remove_all(&self, path: &Path) -> Result<()> {
        let tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner).upgrade();
        let (status, lock_held) = tracked
            .map(|c| (Some(c.state().status), c.try_lock().is_none()))
            .unwrap_or((None, false));
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FsCall {
                path: path.to_path_buf(),
                status,
                lock_held,
            });
        if self.fail.load(Ordering::SeqCst) {
            return Err(HaltError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::other("device or resource busy"),
            });
        }
        HostFilesystem.ensure_remove_all(path)
    }
}

/// JSON store whose next checkpoint can be made to fail.
#[derive(Debug)]
pub(crate) struct FlakyStore {
    inner: JsonStore,
    next_failure: Mutex<Option<HaltError>>,
}

impl FlakyStore {
    fn new(dir: PathBuf) -> Self {
        Self {
            inner: JsonStore::new(dir),
            next_failure: Mutex::new(None),
        }
    }

    /// Makes the next checkpoint return `err` without writing.
    pub(crate) fn fail_next_checkpoint(&self, err: HaltError) {
        *self.next_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
    }
}

impl MetadataStore for FlakyStore {
    fn checkpoint(&self, record: &ContainerRecord) -> Result<()> {
        if let Some(err) = self.next_failure.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(err);
        }
        self.inner.checkpoint(record)
    }

    fn delete(&self, id: &ContainerId) -> Result<()> {
        self.inner.delete(id)
    }

    fn load_all(&self) -> Result<Vec<ContainerRecord>> {
        self.inner.load_all()
    }
}

/// Stats collector that can park the next caller until released.
#[derive(Debug, Default)]
pub(crate) struct HoldingStats {
    gate: Mutex<Gate>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct Gate {
    armed: bool,
    parked: bool,
    released: bool,
}

impl HoldingStats {
    /// Parks the next `stop_collection` caller. Later callers pass through.
    pub(crate) fn hold_next(&self) {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        gate.armed = true;
        gate.released = false;
    }

    /// Blocks until a caller is parked.
    pub(crate) fn wait_parked(&self) {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let (_gate, timeout) = self
            .changed
            .wait_timeout_while(gate, Duration::from_secs(5), |g| !g.parked)
            .unwrap_or_else(PoisonError::into_inner);
        assert!(!timeout.timed_out(), "no caller parked");
    }

    /// Lets the parked caller continue.
    pub(crate) fn release(&self) {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner).released = true;
        self.changed.notify_all();
    }
}

impl StatsCollector for HoldingStats {
    fn stop_collection(&self, _id: &ContainerId) {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !gate.armed {
            return;
        }
        gate.armed = false;
        gate.parked = true;
        self.changed.notify_all();
        let mut gate = self
            .changed
            .wait_while(gate, |g| !g.released)
            .unwrap_or_else(PoisonError::into_inner);
        gate.parked = false;
    }
}

/// An engine wired to fakes inside a scratch directory.
#[derive(Debug)]
pub(crate) struct Harness {
    pub(crate) dir: TempDir,
    pub(crate) engine: Arc<Engine>,
    pub(crate) store: Arc<FlakyStore>,
    pub(crate) stats: Arc<HoldingStats>,
    pub(crate) probe: Arc<FakeProbe>,
    pub(crate) metrics: Arc<RuntimeMetrics>,
    pub(crate) events: BroadcastEventLog,
    pub(crate) layers: Arc<FakeLayers>,
    pub(crate) leases: Arc<FakeLeases>,
    pub(crate) filesystem: Arc<RecordingFs>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Builds a harness with short waits, adjusted by `f`.
    pub(crate) fn with_config(f: impl FnOnce(&mut HaltConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = HaltConfig::with_data_dir(dir.path().join("data"));
        config.kill.wait_ms = 200;
        config.kill.direct_wait_ms = 100;
        config.stop.kill_grace_ms = 100;
        config.monitor.interval_ms = 10;
        f(&mut config);

        let store = Arc::new(FlakyStore::new(config.containers_dir()));
        let stats = Arc::new(HoldingStats::default());
        let probe = Arc::new(FakeProbe::default());
        let metrics = Arc::new(RuntimeMetrics::new());
        let events = BroadcastEventLog::default();
        let layers = Arc::new(FakeLayers::default());
        let leases = Arc::new(FakeLeases::default());
        let filesystem = Arc::new(RecordingFs::default());
        let engine = wire(
            config,
            &store,
            &stats,
            &probe,
            &metrics,
            &events,
            &layers,
            &leases,
            &filesystem,
        );
        Self {
            dir,
            engine,
            store,
            stats,
            probe,
            metrics,
            events,
            layers,
            leases,
            filesystem,
        }
    }

    /// A second engine over the same store and fakes, after restore.
    pub(crate) async fn restart(&self) -> Arc<Engine> {
        let engine = wire(
            self.engine.config().clone(),
            &self.store,
            &self.stats,
            &self.probe,
            &Arc::new(RuntimeMetrics::new()),
            &self.events,
            &self.layers,
            &self.leases,
            &self.filesystem,
        );
        let _ = engine.restore().await.expect("restore");
        engine
    }

    pub(crate) async fn create(&self, name: &str) -> Arc<Container> {
        self.create_with(name, |_| {}).await
    }

    /// Registers a container with a populated root and a writable layer.
    pub(crate) async fn create_with(
        &self,
        name: &str,
        f: impl FnOnce(&mut ContainerSpec),
    ) -> Arc<Container> {
        let root = self.dir.path().join("roots").join(name);
        std::fs::create_dir_all(&root).expect("root");
        std::fs::write(root.join("config.json"), "{}").expect("root file");

        let id = ContainerId::new(format!("{name}-0123456789ab"));
        let mut spec = ContainerSpec::new(id, name, root);
        spec.rw_layer = Some(LayerHandle {
            id: format!("{name}-rw"),
        });
        f(&mut spec);
        self.engine.register(spec).await.expect("register")
    }

    pub(crate) async fn start(&self, container: &Arc<Container>, pid: u32) -> Arc<FakeTask> {
        self.start_with(container, pid, TaskBehavior::Exit).await
    }

    pub(crate) async fn start_with(
        &self,
        container: &Arc<Container>,
        pid: u32,
        behavior: TaskBehavior,
    ) -> Arc<FakeTask> {
        let task = Arc::new(FakeTask::new(pid, behavior, &self.engine, container));
        self.engine
            .mark_started(container, Arc::clone(&task) as Arc<dyn RuntimeTask>)
            .await
            .expect("start");
        task
    }

    pub(crate) async fn set_status(&self, container: &Container, status: ContainerState) {
        let mut inner = container.lock().await;
        container.update_state(&mut inner, |s| s.status = status);
    }
}

#[allow(clippy::too_many_arguments)]
fn wire(
    config: HaltConfig,
    store: &Arc<FlakyStore>,
    stats: &Arc<HoldingStats>,
    probe: &Arc<FakeProbe>,
    metrics: &Arc<RuntimeMetrics>,
    events: &BroadcastEventLog,
    layers: &Arc<FakeLayers>,
    leases: &Arc<FakeLeases>,
    filesystem: &Arc<RecordingFs>,
) -> Arc<Engine> {
    Engine::builder(config)
        .store(Arc::clone(store) as Arc<dyn MetadataStore>)
        .stats(Arc::clone(stats) as Arc<dyn StatsCollector>)
        .probe(Arc::clone(probe) as Arc<dyn LivenessProbe>)
        .metrics(Arc::clone(metrics) as Arc<dyn crate::metrics::MetricsSink>)
        .events(Arc::new(events.clone()))
        .layers(Arc::clone(layers) as Arc<dyn LayerService>)
        .leases(Arc::clone(leases) as Arc<dyn LeaseService>)
        .filesystem(Arc::clone(filesystem) as Arc<dyn Filesystem>)
        .build()
        .expect("engine")
}
