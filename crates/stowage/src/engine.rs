//! Engine facade: owns the services, the loadable arena and the scheduler.

use std::fs;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use futures_lite::future;
use stowage_core::FrameBudget;
use stowage_core::profiling::profile_function;
use stowage_net::{HttpTransport, NetOptions, Transport, TransportExt};
use tracing::{debug, info, warn};

use crate::bundle::{BundleLocation, BundleResolver};
use crate::config::EngineConfig;
use crate::download::{DownloadInfo, DownloadOperation, GetDownloadSizeOperation};
use crate::error::{StowageError, StowageResult};
use crate::event::{EngineEvent, EventBuffer};
use crate::history::ClearHistoryOperation;
use crate::host::{ArchiveHost, PassthroughHost, SceneTransition};
use crate::loadable::{
    LoadCallback, LoadOutcome, LoadState, LoadableEntry, LoadableFactory, LoadableId, LoadableKind,
    Loadables,
};
use crate::manifest::{
    Catalog, InitManifestOperation, Manifest, UpdateManifestOperation, read_json, write_json,
};
use crate::operation::{Operation, OperationHandle, OperationStatus, Scheduler};
use crate::task_pool::TaskPool;

/// How long synchronous waits sleep between ticks.
const WAIT_INTERVAL: Duration = Duration::from_millis(1);

/// Everything operations and load tasks can reach during a tick.
pub struct Services {
    pub config: Arc<EngineConfig>,
    pub catalog: Catalog,
    pub resolver: BundleResolver,
    /// Local archive reads.
    pub pool: TaskPool,
    /// Blocking transfers.
    pub transfers: TaskPool,
    pub transport: Arc<dyn Transport>,
    pub host: Arc<dyn ArchiveHost>,
    pub budget: FrameBudget,
    pub events: EventBuffer,
}

/// Client side bundle streaming engine.
///
/// All state lives on the thread that calls [`Engine::tick`]. Background
/// I/O runs on the engine's task pool and is picked up by later ticks.
///
/// ```no_run
/// use stowage::{Engine, EngineConfig, LoadableKind};
///
/// let config = EngineConfig::new("content/build_in", "content/downloads", "content/tmp")
///     .with_download_url("https://cdn.example.com/content");
/// let mut engine = Engine::builder(config).build()?;
///
/// let init = engine.init_manifest();
/// engine.block_on(init.completion())?;
///
/// let id = engine.load(LoadableKind::Asset, "ui/logo.png")?;
/// assert!(engine.loadable(id).is_some());
/// # Ok::<(), stowage::StowageError>(())
/// ```
pub struct Engine {
    services: Services,
    loadables: Loadables,
    scheduler: Scheduler,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Advance operations, then loadables, within one budget slice.
    pub fn tick(&mut self) {
        profile_function!();

        self.services.budget.begin_tick();
        self.scheduler.tick(&mut self.services);
        self.loadables.update(&mut self.services);
    }

    /// Wrap `operation` in a handle and schedule it.
    pub fn submit<T: Operation>(&mut self, operation: T) -> OperationHandle<T> {
        let handle = OperationHandle::new(operation);
        self.start(&handle);
        handle
    }

    /// Schedule an operation created elsewhere. Returns `false` if it was
    /// already scheduled or has started.
    pub fn start<T: Operation>(&mut self, handle: &OperationHandle<T>) -> bool {
        self.scheduler.submit(handle.erased())
    }

    pub fn init_manifest(&mut self) -> OperationHandle<InitManifestOperation> {
        self.submit(InitManifestOperation::new())
    }

    pub fn update_manifest(&mut self) -> OperationHandle<UpdateManifestOperation> {
        self.submit(UpdateManifestOperation::new())
    }

    /// Apply a successful update check whose manifests are all on disk.
    ///
    /// The remote version file is persisted into the download directory, the
    /// catalog is rebuilt from the new manifest set and every memoized
    /// location is dropped.
    pub fn commit_update(&mut self, update: &OperationHandle<UpdateManifestOperation>) -> StowageResult<()> {
        let update = update.get();
        if update.core().status() != OperationStatus::Successful {
            return Err(StowageError::invalid_state("update check has not succeeded"));
        }
        let Some(remote) = update.remote_version().filter(|_| update.has_update()) else {
            return Err(StowageError::invalid_state("no update to commit"));
        };

        let config = &self.services.config;
        let mut manifests = Vec::with_capacity(remote.manifests.len());
        for descriptor in &remote.manifests {
            let manifest: Manifest = read_json(&config.download_path(&descriptor.file))?;
            manifests.push(manifest);
        }
        write_json(&config.download_path(&config.version_file), remote)?;

        let catalog = &mut self.services.catalog;
        catalog.clear();
        for manifest in manifests {
            catalog.register(manifest);
        }
        catalog.set_version(remote.clone());
        self.services.resolver.clear();
        info!(
            timestamp = remote.timestamp,
            version = %remote.version,
            "catalog update committed"
        );
        Ok(())
    }

    pub fn download(&mut self, infos: Vec<DownloadInfo>) -> OperationHandle<DownloadOperation> {
        self.submit(DownloadOperation::new(infos))
    }

    /// Re-submit only the failed transfers of a finished batch.
    pub fn retry_download(&mut self, batch: &OperationHandle<DownloadOperation>) -> OperationHandle<DownloadOperation> {
        let retry = batch.get().retry();
        self.submit(retry)
    }

    /// `None` sizes the whole catalog.
    pub fn download_size(&mut self, bundles: Option<Vec<String>>) -> OperationHandle<GetDownloadSizeOperation> {
        self.submit(GetDownloadSizeOperation::new(bundles))
    }

    pub fn clear_history(&mut self) -> OperationHandle<ClearHistoryOperation> {
        self.submit(ClearHistoryOperation::new())
    }

    /// Copy build-in archives into the download directory.
    ///
    /// Only archives whose location is not memoized yet are copied, which
    /// under encryption means they have not been unpacked. Without
    /// encryption the batch is empty: build-in archives are read in place.
    pub fn unpack_build_in(&mut self) -> StowageResult<OperationHandle<DownloadOperation>> {
        let services = &self.services;
        let mut bundles: Vec<_> = services.catalog.bundles().cloned().collect();
        bundles.sort_by(|a, b| a.name.cmp(&b.name));

        let mut infos = Vec::new();
        if services.config.uses_cipher() {
            for bundle in bundles {
                if services.resolver.is_cached(&bundle.name) {
                    continue;
                }
                let path = services.config.build_in_path(&bundle.save_name());
                if !path.is_file() {
                    continue;
                }
                let url = services.config.file_url(&path)?;
                infos.push(DownloadInfo::for_bundle(&bundle, url, &services.config));
            }
        }
        debug!(archives = infos.len(), "unpacking build-in archives");
        Ok(self.download(infos))
    }

    /// Request a loadable without waiting for it.
    ///
    /// The returned id holds one reference; call [`Engine::release`] when
    /// done with it.
    pub fn load_async(&mut self, kind: LoadableKind, address: &str) -> StowageResult<LoadableId> {
        self.loadables.request(kind, address, None, &mut self.services)
    }

    /// Like [`Engine::load_async`], calling `callback` once the loadable
    /// reaches a terminal state.
    pub fn load_async_with(
        &mut self,
        kind: LoadableKind,
        address: &str,
        callback: impl FnOnce(&LoadOutcome) + 'static,
    ) -> StowageResult<LoadableId> {
        let callback: LoadCallback = Box::new(callback);
        self.loadables.request(kind, address, Some(callback), &mut self.services)
    }

    /// Request a loadable and tick until it is loaded.
    ///
    /// Blocks the calling thread for at most `load_timeout_ms`.
    pub fn load(&mut self, kind: LoadableKind, address: &str) -> StowageResult<LoadableId> {
        let id = self.load_async(kind, address)?;
        self.wait(id)?;
        Ok(id)
    }

    /// Tick until `id` is loaded or failed.
    pub fn wait(&mut self, id: LoadableId) -> StowageResult<()> {
        let deadline = Instant::now() + self.services.config.load_timeout();
        loop {
            let Some(entry) = self.loadables.get(id) else {
                return Err(StowageError::invalid_state("loadable was unloaded while waiting"));
            };
            match entry.state() {
                LoadState::Loaded => return Ok(()),
                LoadState::Failed => {
                    return Err(StowageError::LoadFailed {
                        key: entry.key().to_string(),
                        message: entry.error().unwrap_or("unknown error").to_string(),
                    });
                }
                LoadState::Unloaded | LoadState::Loading => {
                    if Instant::now() >= deadline {
                        warn!(key = entry.key(), "synchronous load timed out");
                        return Err(StowageError::Timeout {
                            key: entry.key().to_string(),
                        });
                    }
                }
            }
            self.tick();
            if self.loadables.get(id).is_some_and(|e| !e.state().is_terminal()) {
                thread::sleep(WAIT_INTERVAL);
            }
        }
    }

    /// Drive ticks until `future` resolves, typically an operation's
    /// [`completion`](OperationHandle::completion).
    ///
    /// Gives up after `load_timeout_ms`.
    pub fn block_on<F: Future>(&mut self, future: F) -> StowageResult<F::Output> {
        let deadline = Instant::now() + self.services.config.load_timeout();
        let mut pinned = std::pin::pin!(future);
        loop {
            if let Some(output) = future::block_on(future::poll_once(pinned.as_mut())) {
                return Ok(output);
            }
            if Instant::now() >= deadline {
                return Err(StowageError::Timeout {
                    key: "operation".to_string(),
                });
            }
            self.tick();
            thread::sleep(WAIT_INTERVAL);
        }
    }

    pub fn loadable(&self, id: LoadableId) -> Option<&LoadableEntry> {
        self.loadables.get(id)
    }

    pub fn loadables(&self) -> &Loadables {
        &self.loadables
    }

    pub fn retain(&mut self, id: LoadableId) -> bool {
        self.loadables.retain(id)
    }

    /// Drop one reference. Unused loadables are evicted by a later tick.
    pub fn release(&mut self, id: LoadableId) -> bool {
        self.loadables.release(id)
    }

    pub fn remove_cache(&mut self, kind: LoadableKind, key: &str) -> Option<LoadableId> {
        self.loadables.remove_cache(kind, key)
    }

    /// Unload every loadable of `kind` now, regardless of references.
    pub fn clear_cache(&mut self, kind: LoadableKind) {
        self.loadables.clear_cache(kind, &mut self.services);
    }

    pub fn clear_all_caches(&mut self) {
        self.loadables.clear_all(&mut self.services);
    }

    /// Loaded, failed and unloaded notifications since the last drain.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.services.events.drain().collect()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.services.catalog
    }

    pub fn resolver(&self) -> &BundleResolver {
        &self.services.resolver
    }

    /// Where `bundle` currently resolves.
    pub fn locate(&mut self, bundle: &str) -> StowageResult<BundleLocation> {
        let services = &mut self.services;
        let info = services.catalog.bundle(bundle).cloned().ok_or_else(|| StowageError::NotFound {
            kind: LoadableKind::Bundle,
            address: bundle.to_string(),
        })?;
        services.resolver.resolve(&info, &services.config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn budget(&self) -> &FrameBudget {
        &self.services.budget
    }

    /// Veto eviction while `transition` is in flight.
    pub fn track_transition(&mut self, transition: Rc<dyn SceneTransition>) {
        self.loadables.track_transition(transition);
    }

    pub fn is_scene_transition_in_flight(&self) -> bool {
        self.loadables.transition_in_flight()
    }

    pub fn pending_operations(&self) -> usize {
        self.scheduler.len()
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Unload everything and stop the I/O threads.
    pub fn shutdown(mut self) {
        self.clear_all_caches();
        let Engine { services, .. } = self;
        services.pool.shutdown();
        services.transfers.shutdown();
        info!("engine shut down");
    }
}

/// Configures and builds an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    host: Option<Arc<dyn ArchiveHost>>,
    transport: Option<Arc<dyn Transport>>,
    factories: Vec<(LoadableKind, Box<dyn LoadableFactory>)>,
    budget: Option<FrameBudget>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            host: None,
            transport: None,
            factories: Vec::new(),
            budget: None,
        }
    }

    /// Host that turns archive bytes into engine objects. Defaults to
    /// [`PassthroughHost`].
    pub fn host(self, host: impl ArchiveHost + 'static) -> Self {
        self.host_arc(Arc::new(host))
    }

    pub fn host_arc(mut self, host: Arc<dyn ArchiveHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Transport for remote and `file://` transfers. Defaults to an HTTP
    /// client with the configured retry policy.
    pub fn transport(self, transport: impl Transport + 'static) -> Self {
        self.transport_arc(Arc::new(transport))
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace how loadables of `kind` are created.
    pub fn factory(mut self, kind: LoadableKind, factory: Box<dyn LoadableFactory>) -> Self {
        self.factories.push((kind, factory));
        self
    }

    /// Override the budget derived from `frame_budget_ms`.
    pub fn budget(mut self, budget: FrameBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn build(self) -> StowageResult<Engine> {
        let config = self.config;
        for dir in [&config.download_dir, &config.temp_dir] {
            fs::create_dir_all(dir).map_err(|e| StowageError::io(dir.clone(), e))?;
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let http = HttpTransport::new(NetOptions::default())?;
                Arc::new(http.with_retry(config.retry.policy()))
            }
        };
        let host = self.host.unwrap_or_else(|| Arc::new(PassthroughHost));
        let budget = self
            .budget
            .unwrap_or_else(|| FrameBudget::from_millis(config.frame_budget_ms));
        let pool = TaskPool::new(config.worker_threads.max(1));
        let transfers = TaskPool::named("stowage-transfer", config.max_concurrent_downloads.max(1));

        let mut loadables = Loadables::new();
        for (kind, factory) in self.factories {
            loadables.set_factory(kind, factory);
        }

        info!(
            profile = ?config.profile,
            platform = ?config.platform,
            encryption = config.encryption,
            workers = pool.thread_count(),
            transfer_workers = transfers.thread_count(),
            "engine built"
        );

        Ok(Engine {
            services: Services {
                config: Arc::new(config),
                catalog: Catalog::new(),
                resolver: BundleResolver::new(),
                pool,
                transfers,
                transport,
                host,
                budget,
                events: EventBuffer::new(),
            },
            loadables,
            scheduler: Scheduler::new(),
        })
    }
}
