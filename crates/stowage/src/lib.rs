//! Stowage - client side bundle streaming and caching
//!
//! Stowage decides where each content archive lives (shipped build-in
//! directory, download directory or remote server), downloads and resumes
//! archives, keeps the local catalog in sync with the server and loads
//! archives, assets, scenes and instances through reference counted caches.
//!
//! # Architecture
//!
//! - **Engine**: single threaded facade driven by [`Engine::tick`]
//! - **Operations**: multi-tick jobs (downloads, catalog bootstrap, update
//!   checks, history cleanup) with progress and completion callbacks
//! - **Loadables**: per-kind caches, reference counting and deferred eviction
//! - **Host**: [`ArchiveHost`] turns archive bytes into engine objects
//!
//! Every tick shares one [`FrameBudget`]; long steps yield once it is spent.

pub mod bundle;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod event;
pub mod history;
pub mod host;
pub mod loadable;
pub mod manifest;
pub mod operation;
pub mod task_pool;

pub use stowage_core::{BudgetLimit, FrameBudget};
pub use stowage_net as net;

pub use bundle::{BundleLocation, BundleResolver, ReadMode};
pub use config::{EngineConfig, Platform, Profile, RetryConfig};
pub use download::{Download, DownloadInfo, DownloadOperation, DownloadStatus, GetDownloadSizeOperation};
pub use engine::{Engine, EngineBuilder, Services};
pub use error::{StowageError, StowageResult};
pub use event::EngineEvent;
pub use history::ClearHistoryOperation;
pub use host::{ArchiveHost, HostObject, PassthroughHost, RawArchive, RawAsset, SceneSignal, SceneTransition};
pub use loadable::{
    LoadOutcome, LoadState, LoadableEntry, LoadableFactory, LoadableId, LoadableKind, Payload,
};
pub use manifest::{
    BundleInfo, CatalogSource, InitManifestOperation, Manifest, ManifestDescriptor,
    UpdateManifestOperation, VersionContainer,
};
pub use operation::{Operation, OperationHandle, OperationOutcome, OperationStatus};
pub use task_pool::TaskPool;
