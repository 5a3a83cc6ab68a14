//! Boundary to the host engine.
//!
//! The engine never interprets archive, asset or scene data itself. It hands
//! bytes to an [`ArchiveHost`] and keeps whatever opaque objects come back.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{StowageError, StowageResult};
use crate::manifest::BundleInfo;

/// An opaque object owned by the host: an opened archive, an asset or an instance.
pub type HostObject = Arc<dyn Any + Send + Sync>;

/// An asynchronous scene load or unload running inside the host.
///
/// While any transition is in flight the coordinator does not evict unused
/// archives.
pub trait SceneTransition {
    fn is_done(&self) -> bool;
}

/// A shareable completion flag, usable as a [`SceneTransition`].
#[derive(Debug, Clone, Default)]
pub struct SceneSignal {
    done: Arc<AtomicBool>,
}

impl SceneSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that is already complete.
    pub fn completed() -> Self {
        let signal = Self::new();
        signal.complete();
        signal
    }

    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
    }
}

impl SceneTransition for SceneSignal {
    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Native primitives the host engine provides.
///
/// `open_archive` runs on a worker thread; every other method is called from
/// the tick thread.
pub trait ArchiveHost: Send + Sync {
    /// Turn decoded archive bytes into a host archive.
    fn open_archive(&self, bundle: &BundleInfo, bytes: Vec<u8>) -> StowageResult<HostObject>;

    fn close_archive(&self, bundle: &BundleInfo, archive: HostObject);

    fn load_asset(&self, archive: &HostObject, path: &str) -> StowageResult<HostObject>;

    fn unload_asset(&self, path: &str, asset: HostObject);

    fn instantiate(&self, asset: &HostObject) -> StowageResult<HostObject>;

    fn destroy_instance(&self, instance: HostObject);

    fn load_scene(&self, archive: &HostObject, path: &str)
    -> StowageResult<Box<dyn SceneTransition>>;

    fn unload_scene(&self, path: &str) -> Box<dyn SceneTransition>;
}

/// Archive bytes kept as-is by [`PassthroughHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArchive {
    pub bundle: String,
    pub bytes: Vec<u8>,
}

/// Asset produced by [`PassthroughHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAsset {
    pub bundle: String,
    pub path: String,
}

/// Host that keeps archives as their decoded bytes and assets as their path.
///
/// Useful for tools and headless clients that only need the content on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughHost;

impl ArchiveHost for PassthroughHost {
    fn open_archive(&self, bundle: &BundleInfo, bytes: Vec<u8>) -> StowageResult<HostObject> {
        Ok(Arc::new(RawArchive {
            bundle: bundle.name.clone(),
            bytes,
        }))
    }

    fn close_archive(&self, _bundle: &BundleInfo, _archive: HostObject) {}

    fn load_asset(&self, archive: &HostObject, path: &str) -> StowageResult<HostObject> {
        let archive = archive
            .downcast_ref::<RawArchive>()
            .ok_or_else(|| StowageError::host("archive was not opened by PassthroughHost"))?;
        Ok(Arc::new(RawAsset {
            bundle: archive.bundle.clone(),
            path: path.to_string(),
        }))
    }

    fn unload_asset(&self, _path: &str, _asset: HostObject) {}

    fn instantiate(&self, asset: &HostObject) -> StowageResult<HostObject> {
        Ok(asset.clone())
    }

    fn destroy_instance(&self, _instance: HostObject) {}

    fn load_scene(
        &self,
        _archive: &HostObject,
        _path: &str,
    ) -> StowageResult<Box<dyn SceneTransition>> {
        Ok(Box::new(SceneSignal::completed()))
    }

    fn unload_scene(&self, _path: &str) -> Box<dyn SceneTransition> {
        Box::new(SceneSignal::completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_signal_is_shared() {
        let signal = SceneSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_done());
        signal.complete();
        assert!(observer.is_done());
    }

    #[test]
    fn test_passthrough_asset_references_archive() {
        let host = PassthroughHost;
        let info = BundleInfo::new("ui", "00ff", 3);
        let archive = host.open_archive(&info, vec![1, 2, 3]).unwrap();
        let asset = host.load_asset(&archive, "ui/icon.png").unwrap();
        let asset = asset.downcast_ref::<RawAsset>().unwrap();
        assert_eq!(asset.bundle, "ui");
        assert_eq!(asset.path, "ui/icon.png");

        let foreign: HostObject = Arc::new(5u32);
        assert!(host.load_asset(&foreign, "ui/icon.png").is_err());
    }
}
