//! Archive host that records every call.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use stowage::{
    ArchiveHost, BundleInfo, HostObject, RawArchive, RawAsset, SceneSignal, SceneTransition,
    StowageError, StowageResult,
};

/// Records a host call for verification in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    OpenArchive { bundle: String, len: usize },
    CloseArchive { bundle: String },
    LoadAsset { path: String },
    UnloadAsset { path: String },
    Instantiate,
    DestroyInstance,
    LoadScene { path: String },
    UnloadScene { path: String },
}

/// [`ArchiveHost`] keeping archives as bytes, like
/// [`stowage::PassthroughHost`], while logging what the engine asks for.
///
/// With [`RecordingHost::hold_scenes`] enabled, scene loads and unloads stay
/// in flight until [`RecordingHost::finish_scenes`] is called.
#[derive(Default)]
pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
    broken_archives: Mutex<HashSet<String>>,
    hold_scenes: AtomicBool,
    scenes: Mutex<Vec<SceneSignal>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// How many times `bundle` was opened.
    pub fn open_count(&self, bundle: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, HostCall::OpenArchive { bundle: b, .. } if b == bundle))
            .count()
    }

    pub fn close_count(&self, bundle: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, HostCall::CloseArchive { bundle: b } if b == bundle))
            .count()
    }

    /// Reject the archive of `bundle` on open.
    pub fn break_archive(&self, bundle: impl Into<String>) {
        self.broken_archives.lock().insert(bundle.into());
    }

    pub fn hold_scenes(&self, hold: bool) {
        self.hold_scenes.store(hold, Ordering::SeqCst);
    }

    /// Complete every held scene transition.
    pub fn finish_scenes(&self) {
        for signal in self.scenes.lock().drain(..) {
            signal.complete();
        }
    }

    pub fn scenes_in_flight(&self) -> usize {
        self.scenes.lock().iter().filter(|s| !s.is_done()).count()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().push(call);
    }

    fn transition(&self) -> Box<dyn SceneTransition> {
        if self.hold_scenes.load(Ordering::SeqCst) {
            let signal = SceneSignal::new();
            self.scenes.lock().push(signal.clone());
            Box::new(signal)
        } else {
            Box::new(SceneSignal::completed())
        }
    }
}

impl ArchiveHost for RecordingHost {
    fn open_archive(&self, bundle: &BundleInfo, bytes: Vec<u8>) -> StowageResult<HostObject> {
        self.record(HostCall::OpenArchive {
            bundle: bundle.name.clone(),
            len: bytes.len(),
        });
        if self.broken_archives.lock().contains(&bundle.name) {
            return Err(StowageError::host(format!("corrupt archive {}", bundle.name)));
        }
        Ok(Arc::new(RawArchive {
            bundle: bundle.name.clone(),
            bytes,
        }))
    }

    fn close_archive(&self, bundle: &BundleInfo, _archive: HostObject) {
        self.record(HostCall::CloseArchive {
            bundle: bundle.name.clone(),
        });
    }

    fn load_asset(&self, archive: &HostObject, path: &str) -> StowageResult<HostObject> {
        self.record(HostCall::LoadAsset {
            path: path.to_string(),
        });
        let archive = archive
            .downcast_ref::<RawArchive>()
            .ok_or_else(|| StowageError::host("unknown archive object"))?;
        Ok(Arc::new(RawAsset {
            bundle: archive.bundle.clone(),
            path: path.to_string(),
        }))
    }

    fn unload_asset(&self, path: &str, _asset: HostObject) {
        self.record(HostCall::UnloadAsset {
            path: path.to_string(),
        });
    }

    fn instantiate(&self, asset: &HostObject) -> StowageResult<HostObject> {
        self.record(HostCall::Instantiate);
        Ok(asset.clone())
    }

    fn destroy_instance(&self, _instance: HostObject) {
        self.record(HostCall::DestroyInstance);
    }

    fn load_scene(&self, _archive: &HostObject, path: &str) -> StowageResult<Box<dyn SceneTransition>> {
        self.record(HostCall::LoadScene {
            path: path.to_string(),
        });
        Ok(self.transition())
    }

    fn unload_scene(&self, path: &str) -> Box<dyn SceneTransition> {
        self.record(HostCall::UnloadScene {
            path: path.to_string(),
        });
        self.transition()
    }
}
