//! Reference counted loadables.
//!
//! Every loaded resource (archive, dependency aggregate, asset, scene, raw
//! file, instance) is a [`LoadableEntry`] in one arena. Per-kind caches map
//! canonical keys to entries so each key is loaded at most once. Entries
//! whose reference count drops to zero wait in an eviction queue and are only
//! unloaded if still unused when the coordinator gets to them.

mod coordinator;
mod handler;
mod kinds;

pub use kinds::{
    AssetFactory, BundleFactory, DependencyFactory, InstanceFactory, RawFileFactory, SceneFactory,
};

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use stowage_core::alloc::HashMap;
use stowage_core::alloc::sparse_set::{IndexSlot, SparseSet};

use crate::engine::Services;
use crate::error::StowageResult;
use crate::host::{HostObject, SceneTransition};

/// Stable id of a loadable. Ids of unloaded entries never alias new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadableId(IndexSlot);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadableKind {
    /// One physical archive, keyed `name_hash`.
    Bundle,
    /// An archive plus its transitive dependencies, keyed by bundle name.
    Dependency,
    /// A logical asset path.
    Asset,
    /// A scene path.
    Scene,
    /// A plain file listed as a raw bundle.
    RawFile,
    /// An instantiated asset, keyed `path#n`.
    Instance,
}

impl LoadableKind {
    pub const ALL: [LoadableKind; 6] = [
        LoadableKind::Bundle,
        LoadableKind::Dependency,
        LoadableKind::Asset,
        LoadableKind::Scene,
        LoadableKind::RawFile,
        LoadableKind::Instance,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for LoadableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadableKind::Bundle => "bundle",
            LoadableKind::Dependency => "dependency",
            LoadableKind::Asset => "asset",
            LoadableKind::Scene => "scene",
            LoadableKind::RawFile => "raw file",
            LoadableKind::Instance => "instance",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Failed)
    }
}

/// Active-use counter of a loadable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reference {
    count: u32,
}

impl Reference {
    pub fn retain(&mut self) {
        self.count += 1;
    }

    /// Returns `true` when this release brought the count to zero.
    pub fn release(&mut self) -> bool {
        match self.count {
            0 => false,
            n => {
                self.count = n - 1;
                self.count == 0
            }
        }
    }

    /// Drop every outstanding retain.
    pub fn fully_release(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_unused(&self) -> bool {
        self.count == 0
    }
}

/// What a finished load produced.
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    None,
    Archive(HostObject),
    Asset(HostObject),
    Instance(HostObject),
    Bytes(Arc<[u8]>),
    Scene,
}

impl Payload {
    /// The host object behind an archive, asset or instance payload.
    pub fn object(&self) -> Option<&HostObject> {
        match self {
            Payload::Archive(obj) | Payload::Asset(obj) | Payload::Instance(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::None => f.write_str("None"),
            Payload::Archive(_) => f.write_str("Archive(..)"),
            Payload::Asset(_) => f.write_str("Asset(..)"),
            Payload::Instance(_) => f.write_str("Instance(..)"),
            Payload::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Payload::Scene => f.write_str("Scene"),
        }
    }
}

/// Snapshot handed to load callbacks.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub id: LoadableId,
    pub kind: LoadableKind,
    pub key: String,
    pub state: LoadState,
    pub error: Option<String>,
    pub payload: Payload,
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }
}

pub type LoadCallback = Box<dyn FnOnce(&LoadOutcome)>;

/// Result of one step of a [`LoadTask`].
pub enum TaskPoll {
    Pending(f32),
    Ready(Payload),
    Failed(String),
}

/// Kind specific load and unload logic of one loadable.
pub trait LoadTask {
    /// Advance the load. Called every tick until it returns a terminal poll.
    fn update(&mut self, cx: &mut LoadContext<'_>) -> TaskPoll;

    /// Release what the load produced. Dependencies are released afterwards
    /// by the coordinator.
    fn unload(&mut self, payload: Payload, cx: &mut LoadContext<'_>);
}

/// Creates the load task for a canonical key of one kind.
pub trait LoadableFactory {
    fn create(&self, key: &str, services: &Services) -> StowageResult<Box<dyn LoadTask>>;
}

pub struct LoadableEntry {
    kind: LoadableKind,
    key: String,
    state: LoadState,
    reference: Reference,
    progress: f32,
    error: Option<String>,
    payload: Payload,
    dependencies: Vec<LoadableId>,
    callbacks: Vec<LoadCallback>,
    task: Option<Box<dyn LoadTask>>,
    load_count: u32,
    in_loading: bool,
    in_unused: bool,
}

impl LoadableEntry {
    fn new(kind: LoadableKind, key: String, task: Box<dyn LoadTask>) -> Self {
        Self {
            kind,
            key,
            state: LoadState::Unloaded,
            reference: Reference::default(),
            progress: 0.0,
            error: None,
            payload: Payload::None,
            dependencies: Vec::new(),
            callbacks: Vec::new(),
            task: Some(task),
            load_count: 0,
            in_loading: false,
            in_unused: false,
        }
    }

    pub fn kind(&self) -> LoadableKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn reference_count(&self) -> u32 {
        self.reference.count()
    }

    pub fn dependencies(&self) -> &[LoadableId] {
        &self.dependencies
    }

    /// How many times a load was issued for this entry.
    pub fn load_count(&self) -> u32 {
        self.load_count
    }

    fn outcome(&self, id: LoadableId) -> LoadOutcome {
        LoadOutcome {
            id,
            kind: self.kind,
            key: self.key.clone(),
            state: self.state,
            error: self.error.clone(),
            payload: self.payload.clone(),
        }
    }
}

impl fmt::Debug for LoadableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadableEntry")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("state", &self.state)
            .field("references", &self.reference.count())
            .field("progress", &self.progress)
            .field("error", &self.error)
            .finish()
    }
}

struct Handler {
    cache: HashMap<String, LoadableId>,
    factory: Box<dyn LoadableFactory>,
}

/// Loadable arena, per-kind caches and the coordinator queues.
pub struct Loadables {
    entries: SparseSet<LoadableEntry>,
    handlers: Vec<Handler>,
    loading: Vec<LoadableId>,
    unused: Vec<LoadableId>,
    transitions: Vec<Rc<dyn SceneTransition>>,
    instance_counter: u64,
}

impl Loadables {
    /// Arena using the default factory of every kind.
    pub fn new() -> Self {
        let handlers = LoadableKind::ALL
            .iter()
            .map(|kind| Handler {
                cache: HashMap::default(),
                factory: kinds::default_factory(*kind),
            })
            .collect();
        Self {
            entries: SparseSet::new(),
            handlers,
            loading: Vec::new(),
            unused: Vec::new(),
            transitions: Vec::new(),
            instance_counter: 0,
        }
    }

    /// Replace the factory used for new entries of `kind`.
    pub fn set_factory(&mut self, kind: LoadableKind, factory: Box<dyn LoadableFactory>) {
        self.handlers[kind.index()].factory = factory;
    }

    pub fn get(&self, id: LoadableId) -> Option<&LoadableEntry> {
        self.entries.try_get(id.0)
    }

    /// Cached entry for a canonical key.
    pub fn lookup(&self, kind: LoadableKind, key: &str) -> Option<LoadableId> {
        self.handlers[kind.index()]
            .cache
            .get(key)
            .copied()
            .filter(|id| self.entries.contains(id.0))
    }

    pub fn cached_keys(&self, kind: LoadableKind) -> impl Iterator<Item = &str> {
        self.handlers[kind.index()].cache.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn loading_len(&self) -> usize {
        self.loading.len()
    }

    pub fn unused_len(&self) -> usize {
        self.unused.len()
    }

    /// Track a host scene transition; eviction waits while any is in flight.
    pub fn track_transition(&mut self, transition: Rc<dyn SceneTransition>) {
        self.transitions.push(transition);
    }

    pub fn transition_in_flight(&self) -> bool {
        self.transitions.iter().any(|t| !t.is_done())
    }

    pub fn retain(&mut self, id: LoadableId) -> bool {
        match self.entries.try_get_mut(id.0) {
            Some(entry) => {
                entry.reference.retain();
                true
            }
            None => false,
        }
    }

    /// Drop one reference. At zero the entry is queued for eviction.
    pub fn release(&mut self, id: LoadableId) -> bool {
        let Some(entry) = self.entries.try_get_mut(id.0) else {
            return false;
        };
        if entry.reference.release() && !entry.in_unused {
            tracing::trace!(key = %entry.key, "loadable unused");
            entry.in_unused = true;
            self.unused.push(id);
        }
        true
    }
}

impl Default for Loadables {
    fn default() -> Self {
        Self::new()
    }
}

/// What a [`LoadTask`] can reach while it runs.
pub struct LoadContext<'a> {
    id: LoadableId,
    loadables: &'a mut Loadables,
    services: &'a mut Services,
}

impl<'a> LoadContext<'a> {
    fn new(id: LoadableId, loadables: &'a mut Loadables, services: &'a mut Services) -> Self {
        Self {
            id,
            loadables,
            services,
        }
    }

    /// Id of the loadable being driven.
    pub fn id(&self) -> LoadableId {
        self.id
    }

    pub fn services(&self) -> &Services {
        &*self.services
    }

    pub fn services_mut(&mut self) -> &mut Services {
        &mut *self.services
    }

    /// Request another loadable and keep a reference to it as a dependency.
    ///
    /// The reference is dropped when this loadable unloads or fails.
    pub fn acquire(&mut self, kind: LoadableKind, address: &str) -> StowageResult<LoadableId> {
        let dependency = self.loadables.request(kind, address, None, &mut *self.services)?;
        if let Some(entry) = self.loadables.entries.try_get_mut(self.id.0) {
            entry.dependencies.push(dependency);
        }
        Ok(dependency)
    }

    pub fn entry(&self, id: LoadableId) -> Option<&LoadableEntry> {
        self.loadables.get(id)
    }

    pub fn track_transition(&mut self, transition: Rc<dyn SceneTransition>) {
        self.loadables.track_transition(transition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_counting() {
        let mut reference = Reference::default();
        assert!(reference.is_unused());
        assert!(!reference.release());

        reference.retain();
        reference.retain();
        assert!(!reference.release());
        assert!(reference.release());
        assert!(reference.is_unused());

        reference.retain();
        reference.retain();
        reference.fully_release();
        assert_eq!(reference.count(), 0);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(LoadableKind::RawFile.to_string(), "raw file");
        assert_eq!(LoadableKind::ALL.len(), 6);
        for (index, kind) in LoadableKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), index);
        }
    }
}
