//! Default load tasks of every kind.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use async_executor::Task;
use tracing::debug;

use super::{
    LoadContext, LoadState, LoadTask, LoadableFactory, LoadableId, LoadableKind, Payload, TaskPoll,
};
use crate::bundle::{BundleLocation, ReadMode, read_bundle};
use crate::download::{Download, DownloadInfo, DownloadStatus};
use crate::engine::Services;
use crate::error::{StowageError, StowageResult};
use crate::host::SceneTransition;
use crate::manifest::BundleInfo;
use crate::task_pool::poll_task;

pub(super) fn default_factory(kind: LoadableKind) -> Box<dyn LoadableFactory> {
    match kind {
        LoadableKind::Bundle => Box::new(BundleFactory),
        LoadableKind::Dependency => Box::new(DependencyFactory),
        LoadableKind::Asset => Box::new(AssetFactory),
        LoadableKind::Scene => Box::new(SceneFactory),
        LoadableKind::RawFile => Box::new(RawFileFactory),
        LoadableKind::Instance => Box::new(InstanceFactory),
    }
}

fn not_found(kind: LoadableKind, key: &str) -> StowageError {
    StowageError::NotFound {
        kind,
        address: key.to_string(),
    }
}

/// Result of checking on a dependency from inside a task.
fn poll_dependency(cx: &LoadContext<'_>, id: LoadableId) -> TaskPoll {
    match cx.entry(id) {
        None => TaskPoll::Failed("dependency was unloaded".to_string()),
        Some(entry) => match entry.state() {
            LoadState::Loaded => TaskPoll::Ready(entry.payload().clone()),
            LoadState::Failed => TaskPoll::Failed(format!(
                "{} '{}' failed: {}",
                entry.kind(),
                entry.key(),
                entry.error().unwrap_or("unknown error")
            )),
            LoadState::Unloaded | LoadState::Loading => TaskPoll::Pending(entry.progress()),
        },
    }
}

pub struct BundleFactory;

impl LoadableFactory for BundleFactory {
    fn create(&self, key: &str, services: &Services) -> StowageResult<Box<dyn LoadTask>> {
        let info = services
            .catalog
            .bundle_by_save_name(key)
            .ok_or_else(|| not_found(LoadableKind::Bundle, key))?;
        Ok(Box::new(FileTask::new(info.clone())))
    }
}

pub struct RawFileFactory;

impl LoadableFactory for RawFileFactory {
    fn create(&self, key: &str, services: &Services) -> StowageResult<Box<dyn LoadTask>> {
        let info = services
            .catalog
            .bundle(key)
            .ok_or_else(|| not_found(LoadableKind::RawFile, key))?;
        Ok(Box::new(FileTask::new(info.clone())))
    }
}

pub struct DependencyFactory;

impl LoadableFactory for DependencyFactory {
    fn create(&self, key: &str, services: &Services) -> StowageResult<Box<dyn LoadTask>> {
        let info = services
            .catalog
            .bundle(key)
            .ok_or_else(|| not_found(LoadableKind::Dependency, key))?;
        let mut bundles = vec![info.clone()];
        bundles.extend(services.catalog.dependencies_of(key));
        Ok(Box::new(DependencyTask {
            bundles,
            acquired: Vec::new(),
        }))
    }
}

pub struct AssetFactory;

impl LoadableFactory for AssetFactory {
    fn create(&self, key: &str, services: &Services) -> StowageResult<Box<dyn LoadTask>> {
        let bundle = services
            .catalog
            .bundle_for_asset(key)
            .ok_or_else(|| not_found(LoadableKind::Asset, key))?;
        Ok(Box::new(AssetTask {
            path: key.to_string(),
            bundle: bundle.name.clone(),
            dependency: None,
        }))
    }
}

pub struct SceneFactory;

impl LoadableFactory for SceneFactory {
    fn create(&self, key: &str, services: &Services) -> StowageResult<Box<dyn LoadTask>> {
        let bundle = services
            .catalog
            .bundle_for_scene(key)
            .ok_or_else(|| not_found(LoadableKind::Scene, key))?;
        Ok(Box::new(SceneTask {
            path: key.to_string(),
            bundle: bundle.name.clone(),
            dependency: None,
            transition: None,
        }))
    }
}

pub struct InstanceFactory;

impl LoadableFactory for InstanceFactory {
    fn create(&self, key: &str, _services: &Services) -> StowageResult<Box<dyn LoadTask>> {
        let path = key.rsplit_once('#').map(|(path, _)| path).unwrap_or(key);
        Ok(Box::new(InstanceTask {
            path: path.to_string(),
            asset: None,
        }))
    }
}

enum FilePhase {
    Resolve,
    Download(Download),
    Read(Task<StowageResult<Payload>>),
    Done,
}

/// Brings one archive or raw file into memory, fetching it first if needed.
struct FileTask {
    info: Arc<BundleInfo>,
    phase: FilePhase,
}

impl FileTask {
    fn new(info: Arc<BundleInfo>) -> Self {
        Self {
            info,
            phase: FilePhase::Resolve,
        }
    }

    fn start_read(&mut self, path: PathBuf, services: &Services) {
        let mode = ReadMode::for_bundle(&self.info, &services.config);
        let info = self.info.clone();
        let host = services.host.clone();
        debug!(bundle = %info.name, path = %path.display(), "reading archive");
        self.phase = FilePhase::Read(services.pool.spawn_blocking(move || {
            let bytes = read_bundle(&path, mode)?;
            if info.raw_file {
                Ok(Payload::Bytes(bytes.into()))
            } else {
                host.open_archive(&info, bytes).map(Payload::Archive)
            }
        }));
    }
}

impl LoadTask for FileTask {
    fn update(&mut self, cx: &mut LoadContext<'_>) -> TaskPoll {
        let services = cx.services_mut();
        match &mut self.phase {
            FilePhase::Resolve => {
                match services.resolver.resolve(&self.info, &services.config) {
                    Ok(BundleLocation::Remote(url)) => {
                        let info = DownloadInfo::for_bundle(&self.info, url, &services.config);
                        let mut download = Download::new(info);
                        download.start(&services.transfers, services.transport.clone());
                        self.phase = FilePhase::Download(download);
                    }
                    Ok(BundleLocation::BuildIn(path)) | Ok(BundleLocation::Downloaded(path)) => {
                        self.start_read(path, services);
                    }
                    Err(error) => return TaskPoll::Failed(error.to_string()),
                }
                TaskPoll::Pending(0.0)
            }
            FilePhase::Download(download) => match download.poll() {
                DownloadStatus::Successful => {
                    let path = download.info().path.clone();
                    services.resolver.mark_downloaded(&self.info.name, path.clone());
                    self.start_read(path, services);
                    TaskPoll::Pending(0.9)
                }
                DownloadStatus::Failed => {
                    TaskPoll::Failed(download.error().unwrap_or("download failed").to_string())
                }
                DownloadStatus::Pending | DownloadStatus::Running => {
                    TaskPoll::Pending(0.9 * download.fraction())
                }
            },
            FilePhase::Read(task) => match poll_task(task) {
                None => TaskPoll::Pending(0.95),
                Some(Ok(payload)) => {
                    self.phase = FilePhase::Done;
                    TaskPoll::Ready(payload)
                }
                Some(Err(error)) => {
                    self.phase = FilePhase::Resolve;
                    TaskPoll::Failed(error.to_string())
                }
            },
            FilePhase::Done => TaskPoll::Failed("archive already loaded".to_string()),
        }
    }

    fn unload(&mut self, payload: Payload, cx: &mut LoadContext<'_>) {
        self.phase = FilePhase::Resolve;
        if let Payload::Archive(archive) = payload {
            cx.services().host.close_archive(&self.info, archive);
        }
    }
}

/// A bundle and everything it depends on, flattened.
struct DependencyTask {
    bundles: Vec<Arc<BundleInfo>>,
    acquired: Vec<LoadableId>,
}

impl LoadTask for DependencyTask {
    fn update(&mut self, cx: &mut LoadContext<'_>) -> TaskPoll {
        if self.acquired.is_empty() {
            for bundle in &self.bundles {
                match cx.acquire(LoadableKind::Bundle, &bundle.save_name()) {
                    Ok(id) => self.acquired.push(id),
                    Err(error) => return TaskPoll::Failed(error.to_string()),
                }
            }
        }

        let mut progress = 0.0;
        let mut failure = None;
        for id in &self.acquired {
            match poll_dependency(cx, *id) {
                TaskPoll::Failed(error) => {
                    failure = Some(error);
                    break;
                }
                TaskPoll::Pending(p) => progress += p,
                TaskPoll::Ready(_) => progress += 1.0,
            }
        }
        if let Some(error) = failure {
            self.acquired.clear();
            return TaskPoll::Failed(error);
        }
        if progress < self.acquired.len() as f32 {
            return TaskPoll::Pending(progress / self.acquired.len() as f32);
        }

        // The aggregate exposes the main archive.
        match poll_dependency(cx, self.acquired[0]) {
            TaskPoll::Ready(payload) => TaskPoll::Ready(payload),
            other => other,
        }
    }

    fn unload(&mut self, _payload: Payload, _cx: &mut LoadContext<'_>) {
        self.acquired.clear();
    }
}

struct AssetTask {
    path: String,
    bundle: String,
    dependency: Option<LoadableId>,
}

impl LoadTask for AssetTask {
    fn update(&mut self, cx: &mut LoadContext<'_>) -> TaskPoll {
        let dependency = match self.dependency {
            Some(id) => id,
            None => match cx.acquire(LoadableKind::Dependency, &self.bundle) {
                Ok(id) => *self.dependency.insert(id),
                Err(error) => return TaskPoll::Failed(error.to_string()),
            },
        };
        match poll_dependency(cx, dependency) {
            TaskPoll::Ready(Payload::Archive(archive)) => {
                match cx.services().host.load_asset(&archive, &self.path) {
                    Ok(asset) => TaskPoll::Ready(Payload::Asset(asset)),
                    Err(error) => {
                        self.dependency = None;
                        TaskPoll::Failed(error.to_string())
                    }
                }
            }
            TaskPoll::Ready(_) => TaskPoll::Failed(format!("bundle '{}' has no archive", self.bundle)),
            TaskPoll::Pending(p) => TaskPoll::Pending(0.9 * p),
            TaskPoll::Failed(error) => {
                self.dependency = None;
                TaskPoll::Failed(error)
            }
        }
    }

    fn unload(&mut self, payload: Payload, cx: &mut LoadContext<'_>) {
        self.dependency = None;
        if let Payload::Asset(asset) = payload {
            cx.services().host.unload_asset(&self.path, asset);
        }
    }
}

struct SceneTask {
    path: String,
    bundle: String,
    dependency: Option<LoadableId>,
    transition: Option<Rc<dyn SceneTransition>>,
}

impl LoadTask for SceneTask {
    fn update(&mut self, cx: &mut LoadContext<'_>) -> TaskPoll {
        if let Some(transition) = &self.transition {
            return if transition.is_done() {
                self.transition = None;
                TaskPoll::Ready(Payload::Scene)
            } else {
                TaskPoll::Pending(0.95)
            };
        }

        let dependency = match self.dependency {
            Some(id) => id,
            None => match cx.acquire(LoadableKind::Dependency, &self.bundle) {
                Ok(id) => *self.dependency.insert(id),
                Err(error) => return TaskPoll::Failed(error.to_string()),
            },
        };
        match poll_dependency(cx, dependency) {
            TaskPoll::Ready(Payload::Archive(archive)) => {
                match cx.services().host.load_scene(&archive, &self.path) {
                    Ok(transition) => {
                        let transition: Rc<dyn SceneTransition> = Rc::from(transition);
                        debug!(scene = %self.path, "scene transition started");
                        cx.track_transition(transition.clone());
                        self.transition = Some(transition);
                        TaskPoll::Pending(0.9)
                    }
                    Err(error) => {
                        self.dependency = None;
                        TaskPoll::Failed(error.to_string())
                    }
                }
            }
            TaskPoll::Ready(_) => TaskPoll::Failed(format!("bundle '{}' has no archive", self.bundle)),
            TaskPoll::Pending(p) => TaskPoll::Pending(0.9 * p),
            TaskPoll::Failed(error) => {
                self.dependency = None;
                TaskPoll::Failed(error)
            }
        }
    }

    fn unload(&mut self, payload: Payload, cx: &mut LoadContext<'_>) {
        self.dependency = None;
        self.transition = None;
        if let Payload::Scene = payload {
            let transition: Rc<dyn SceneTransition> =
                Rc::from(cx.services().host.unload_scene(&self.path));
            debug!(scene = %self.path, "scene unload started");
            cx.track_transition(transition);
        }
    }
}

struct InstanceTask {
    path: String,
    asset: Option<LoadableId>,
}

impl LoadTask for InstanceTask {
    fn update(&mut self, cx: &mut LoadContext<'_>) -> TaskPoll {
        let asset = match self.asset {
            Some(id) => id,
            None => match cx.acquire(LoadableKind::Asset, &self.path) {
                Ok(id) => *self.asset.insert(id),
                Err(error) => return TaskPoll::Failed(error.to_string()),
            },
        };
        match poll_dependency(cx, asset) {
            TaskPoll::Ready(Payload::Asset(object)) => match cx.services().host.instantiate(&object) {
                Ok(instance) => TaskPoll::Ready(Payload::Instance(instance)),
                Err(error) => {
                    self.asset = None;
                    TaskPoll::Failed(error.to_string())
                }
            },
            TaskPoll::Ready(_) => TaskPoll::Failed(format!("'{}' is not an asset", self.path)),
            TaskPoll::Pending(p) => TaskPoll::Pending(0.9 * p),
            TaskPoll::Failed(error) => {
                self.asset = None;
                TaskPoll::Failed(error)
            }
        }
    }

    fn unload(&mut self, payload: Payload, cx: &mut LoadContext<'_>) {
        self.asset = None;
        if let Payload::Instance(instance) = payload {
            cx.services().host.destroy_instance(instance);
        }
    }
}
