//! Runtime engine that owns containers and their collaborators.
//!
//! The termination operations themselves live next to their concerns in
//! [`crate::kill`], [`crate::stop`], [`crate::cleanup`], [`crate::remove`]
//! and [`crate::exit`]; they are all methods on [`Engine`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use halt_common::config::{GuardMode, HaltConfig};
use halt_common::constants;
use halt_common::error::{HaltError, Result};
use halt_common::types::{ContainerId, ContainerState};
use halt_core::label::LabelRegistry;
use halt_core::probe::{self, LivenessProbe};
use halt_core::signal::{Signal, parse_signal};

use crate::container::{Container, ContainerInner, ContainerSpec};
use crate::events::{BroadcastEventLog, Event, EventLog};
use crate::links::LinkIndex;
use crate::metrics::{MetricsSink, RuntimeMetrics};
use crate::names::NameRegistrar;
use crate::registry::ContainerRegistry;
use crate::services::{
    LocalVolumes, NetworkUpdater, NoopNetwork, NoopStats, StatsCollector, VolumeService,
};
use crate::storage::{
    DirLayerStore, FileLeaseStore, Filesystem, HostFilesystem, LayerService, LeaseService,
};
use crate::store::{JsonStore, LinkRecord, MetadataStore};
use crate::task::{ProcessTask, RuntimeTask};

/// The runtime engine that coordinates container termination.
#[derive(Debug)]
pub struct Engine {
    pub(crate) config: HaltConfig,
    pub(crate) default_stop_signal: Signal,
    pub(crate) containers: ContainerRegistry,
    pub(crate) names: NameRegistrar,
    pub(crate) links: LinkIndex,
    pub(crate) labels: Arc<LabelRegistry>,
    pub(crate) probe: Arc<dyn LivenessProbe>,
    pub(crate) layers: Arc<dyn LayerService>,
    pub(crate) leases: Arc<dyn LeaseService>,
    pub(crate) filesystem: Arc<dyn Filesystem>,
    pub(crate) store: Arc<dyn MetadataStore>,
    pub(crate) stats: Arc<dyn StatsCollector>,
    pub(crate) events: Arc<dyn EventLog>,
    pub(crate) volumes: Arc<dyn VolumeService>,
    pub(crate) network: Arc<dyn NetworkUpdater>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    shutting_down: AtomicBool,
}

impl Engine {
    /// Starts building an engine from `config`.
    #[must_use]
    pub fn builder(config: HaltConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &HaltConfig {
        &self.config
    }

    /// Liveness probe in use.
    #[must_use]
    pub fn probe(&self) -> &Arc<dyn LivenessProbe> {
        &self.probe
    }

    /// Whether removals run with the in-progress guard.
    #[must_use]
    pub fn guard_mode(&self) -> GuardMode {
        self.config.removal.guard
    }

    /// Registers a new container, reserving its name and label.
    ///
    /// # Errors
    ///
    /// Returns a conflict if the name is taken, or an invalid-parameter
    /// error for an unparseable stop signal.
    pub async fn register(&self, spec: ContainerSpec) -> Result<Arc<Container>> {
        let container = Arc::new(Container::new(spec)?);
        self.names.reserve(container.name(), container.id())?;
        if !self.labels.reserve(container.process_label()) {
            tracing::debug!(id = %container.id(), "process label shared with another container");
        }
        self.containers.add(Arc::clone(&container));
        self.metrics.container_registered();

        let inner = container.lock().await;
        if let Err(e) = self.checkpoint(&container, &inner) {
            drop(inner);
            let _ = self.containers.delete(container.id());
            let _ = self.names.release(container.name());
            self.labels.release(container.process_label());
            self.metrics.container_removed();
            return Err(e);
        }
        drop(inner);
        tracing::info!(id = %container.id(), name = container.name(), "container registered");
        Ok(container)
    }

    /// Attaches a live task and marks the container running.
    ///
    /// # Errors
    ///
    /// Returns a conflict for containers that are dead or removed.
    pub async fn mark_started(
        &self,
        container: &Container,
        task: Arc<dyn RuntimeTask>,
    ) -> Result<()> {
        let mut inner = container.lock().await;
        let status = container.state().status;
        if matches!(status, ContainerState::Dead | ContainerState::Removed) {
            return Err(HaltError::conflict(format!(
                "cannot start container {}: it is {status}",
                container.id()
            )));
        }
        container.mark_running(&mut inner, task);
        inner.manually_stopped = false;
        if let Err(e) = self.checkpoint(container, &inner) {
            tracing::warn!(
                id = %container.id(),
                error = %e,
                "failed to checkpoint started container"
            );
        }
        drop(inner);
        self.emit(container, "start", BTreeMap::new());
        Ok(())
    }

    /// Links `child` into `parent` under `alias`, reserving
    /// `/<parent>/<alias>` for the child.
    ///
    /// # Errors
    ///
    /// Returns a conflict if the link name is taken.
    pub async fn link(&self, parent: &Container, child: &Container, alias: &str) -> Result<()> {
        let name = format!("/{}/{}", parent.name(), alias.trim_start_matches('/'));
        self.names.reserve(&name, child.id())?;
        self.links.link(parent.id(), child.id(), &name);
        let inner = parent.lock().await;
        self.checkpoint(parent, &inner)
    }

    /// Resolves a name, link name, full id or unique id prefix.
    ///
    /// # Errors
    ///
    /// Returns not-found when nothing matches, or invalid-parameter for an
    /// ambiguous prefix.
    pub fn get_container(&self, name_or_id: &str) -> Result<Arc<Container>> {
        if name_or_id.is_empty() {
            return Err(HaltError::invalid_parameter("no container name or ID supplied"));
        }
        if let Some(found) = self.containers.get(&ContainerId::new(name_or_id)) {
            return Ok(found);
        }
        if let Some(found) = self
            .names
            .get(name_or_id)
            .and_then(|id| self.containers.get(&id))
        {
            return Ok(found);
        }
        self.containers.find_by_prefix(name_or_id)
    }

    /// All registered containers, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Container>> {
        self.containers.list()
    }

    /// Returns `true` while `id` is registered.
    #[must_use]
    pub fn is_registered(&self, id: &ContainerId) -> bool {
        self.containers.contains(id)
    }

    /// Rebuilds the registry from the metadata store.
    ///
    /// Running records whose process is still alive get a process-backed
    /// task; those whose process is gone are marked exited. Returns the
    /// containers that are running after restore.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    pub async fn restore(&self) -> Result<Vec<Arc<Container>>> {
        let records = self.store.load_all()?;
        let mut restored = Vec::with_capacity(records.len());
        let mut pending_links = Vec::new();

        for record in records {
            let links = record.links.clone();
            let container = match Container::from_record(record) {
                Ok(c) => Arc::new(c),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping container record");
                    continue;
                }
            };
            if let Err(e) = self.names.reserve(container.name(), container.id()) {
                tracing::warn!(
                    id = %container.id(),
                    error = %e,
                    "skipping container with duplicate name"
                );
                continue;
            }
            let _ = self.labels.reserve(container.process_label());
            self.containers.add(Arc::clone(&container));
            self.metrics.container_registered();
            pending_links.push((container.id().clone(), links));
            restored.push(container);
        }

        for (parent, links) in pending_links {
            for LinkRecord { name, child } in links {
                if !self.containers.contains(&child) {
                    continue;
                }
                match self.names.reserve(&name, &child) {
                    Ok(()) => self.links.link(&parent, &child, &name),
                    Err(e) => {
                        tracing::warn!(%parent, link = %name, error = %e, "dropping restored link");
                    }
                }
            }
        }

        let mut running = Vec::new();
        for container in restored {
            let snapshot = container.state();
            if !snapshot.is_running() {
                continue;
            }
            if snapshot.pid != 0 && self.probe.is_alive(snapshot.pid) {
                let mut inner = container.lock().await;
                container.mark_running(&mut inner, Arc::new(ProcessTask::new(snapshot.pid)));
                drop(inner);
                running.push(container);
            } else {
                tracing::info!(
                    id = %container.id(),
                    pid = snapshot.pid,
                    "process gone while away, marking exited"
                );
                let _ = self.handle_exit(&container, None).await;
            }
        }
        tracing::info!(
            total = self.containers.list().len(),
            running = running.len(),
            "containers restored"
        );
        Ok(running)
    }

    /// Marks the host as shutting down; stops no longer record a manual stop.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    /// Returns `true` after [`Engine::begin_shutdown`].
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Persists `container`. `inner` proves the container lock is held.
    pub(crate) fn checkpoint(&self, container: &Container, inner: &ContainerInner) -> Result<()> {
        let links = self
            .links
            .children(container.id())
            .into_iter()
            .map(|(name, child)| LinkRecord { name, child })
            .collect();
        self.store.checkpoint(&container.to_record(inner, links))
    }

    /// Logs a lifecycle event for `container`.
    pub(crate) fn emit(
        &self,
        container: &Container,
        action: &str,
        attributes: BTreeMap<String, String>,
    ) {
        self.events.log(Event {
            id: container.id().clone(),
            name: container.name().to_owned(),
            action: action.to_owned(),
            attributes,
            time: Utc::now(),
        });
    }
}

/// Assembles an [`Engine`], defaulting every collaborator from config.
#[derive(Debug)]
pub struct EngineBuilder {
    config: HaltConfig,
    probe: Option<Arc<dyn LivenessProbe>>,
    layers: Option<Arc<dyn LayerService>>,
    leases: Option<Arc<dyn LeaseService>>,
    filesystem: Option<Arc<dyn Filesystem>>,
    store: Option<Arc<dyn MetadataStore>>,
    stats: Option<Arc<dyn StatsCollector>>,
    events: Option<Arc<dyn EventLog>>,
    volumes: Option<Arc<dyn VolumeService>>,
    network: Option<Arc<dyn NetworkUpdater>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    labels: Option<Arc<LabelRegistry>>,
}

impl EngineBuilder {
    /// Creates a builder for `config`.
    #[must_use]
    pub fn new(config: HaltConfig) -> Self {
        Self {
            config,
            probe: None,
            layers: None,
            leases: None,
            filesystem: None,
            store: None,
            stats: None,
            events: None,
            volumes: None,
            network: None,
            metrics: None,
            labels: None,
        }
    }

    /// Overrides the liveness probe.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Overrides the layer service.
    #[must_use]
    pub fn layers(mut self, layers: Arc<dyn LayerService>) -> Self {
        self.layers = Some(layers);
        self
    }

    /// Overrides the lease service.
    #[must_use]
    pub fn leases(mut self, leases: Arc<dyn LeaseService>) -> Self {
        self.leases = Some(leases);
        self
    }

    /// Overrides root directory removal.
    #[must_use]
    pub fn filesystem(mut self, filesystem: Arc<dyn Filesystem>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    /// Overrides the metadata store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Overrides the statistics collector.
    #[must_use]
    pub fn stats(mut self, stats: Arc<dyn StatsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Overrides the event log.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    /// Overrides the volume service.
    #[must_use]
    pub fn volumes(mut self, volumes: Arc<dyn VolumeService>) -> Self {
        self.volumes = Some(volumes);
        self
    }

    /// Overrides the network updater.
    #[must_use]
    pub fn network(mut self, network: Arc<dyn NetworkUpdater>) -> Self {
        self.network = Some(network);
        self
    }

    /// Overrides the metrics sink.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shares a label registry with other components.
    #[must_use]
    pub fn labels(mut self, labels: Arc<LabelRegistry>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Validates the configuration and builds the engine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid values, including a
    /// default stop signal this platform cannot parse.
    pub fn build(self) -> Result<Arc<Engine>> {
        self.config.validate()?;
        let default_stop_signal = parse_signal(&self.config.stop.default_signal).map_err(|e| {
            HaltError::Config {
                message: format!("stop.default_signal: {e}"),
            }
        })?;
        let data_dir = self.config.data_dir.clone();

        let engine = Engine {
            default_stop_signal,
            containers: ContainerRegistry::new(),
            names: NameRegistrar::new(),
            links: LinkIndex::new(),
            labels: self.labels.unwrap_or_default(),
            probe: self.probe.unwrap_or_else(|| probe::probe_for(self.config.probe)),
            layers: self
                .layers
                .unwrap_or_else(|| Arc::new(DirLayerStore::new(self.config.layers_dir()))),
            leases: self
                .leases
                .unwrap_or_else(|| Arc::new(FileLeaseStore::new(self.config.leases_dir()))),
            filesystem: self.filesystem.unwrap_or_else(|| Arc::new(HostFilesystem)),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(JsonStore::new(self.config.containers_dir()))),
            stats: self.stats.unwrap_or_else(|| Arc::new(NoopStats)),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(BroadcastEventLog::default())),
            volumes: self
                .volumes
                .unwrap_or_else(|| Arc::new(LocalVolumes::new(self.config.volumes_dir()))),
            network: self.network.unwrap_or_else(|| Arc::new(NoopNetwork)),
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(RuntimeMetrics::new())),
            config: self.config,
            shutting_down: AtomicBool::new(false),
        };
        tracing::debug!(
            data_dir = %data_dir.display(),
            guard = ?engine.config.removal.guard,
            app = constants::APP_NAME,
            "engine built"
        );
        Ok(Arc::new(engine))
    }
}
