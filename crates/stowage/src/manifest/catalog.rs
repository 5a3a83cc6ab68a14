use std::sync::Arc;

use stowage_core::alloc::{HashMap, HashSet};
use tracing::{debug, warn};

use super::{BundleInfo, Manifest, VersionContainer};

/// Registry of every archive, asset and scene known to the active manifests.
#[derive(Debug, Default)]
pub struct Catalog {
    version: Option<VersionContainer>,
    manifests: Vec<String>,
    bundles: HashMap<String, Arc<BundleInfo>>,
    save_names: HashMap<String, String>,
    assets: HashMap<String, String>,
    scenes: HashMap<String, String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every bundle of a manifest. Later registrations win on name clashes.
    pub fn register(&mut self, manifest: Manifest) {
        debug!(manifest = %manifest.name, bundles = manifest.bundles.len(), "registering manifest");
        for bundle in manifest.bundles {
            for asset in &bundle.assets {
                self.assets.insert(normalize_path(asset), bundle.name.clone());
            }
            for scene in &bundle.scenes {
                self.scenes.insert(normalize_path(scene), bundle.name.clone());
            }
            self.save_names.insert(bundle.save_name(), bundle.name.clone());
            if let Some(previous) = self.bundles.insert(bundle.name.clone(), Arc::new(bundle)) {
                warn!(bundle = %previous.name, "bundle registered by more than one manifest");
            }
        }
        self.manifests.push(manifest.name);
    }

    pub fn set_version(&mut self, version: VersionContainer) {
        self.version = Some(version);
    }

    /// The version container the registered manifests came from.
    pub fn version(&self) -> Option<&VersionContainer> {
        self.version.as_ref()
    }

    pub fn manifest_names(&self) -> &[String] {
        &self.manifests
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn bundle(&self, name: &str) -> Option<&Arc<BundleInfo>> {
        self.bundles.get(name)
    }

    pub fn bundle_by_save_name(&self, save_name: &str) -> Option<&Arc<BundleInfo>> {
        self.save_names
            .get(save_name)
            .and_then(|name| self.bundles.get(name))
    }

    /// Bundle holding the asset at `path`.
    pub fn bundle_for_asset(&self, path: &str) -> Option<&Arc<BundleInfo>> {
        self.assets
            .get(&normalize_path(path))
            .and_then(|name| self.bundles.get(name))
    }

    /// Bundle holding the scene at `path`.
    pub fn bundle_for_scene(&self, path: &str) -> Option<&Arc<BundleInfo>> {
        self.scenes
            .get(&normalize_path(path))
            .and_then(|name| self.bundles.get(name))
    }

    pub fn bundles(&self) -> impl Iterator<Item = &Arc<BundleInfo>> {
        self.bundles.values()
    }

    /// Transitive dependencies of `name` in depth-first order, without `name`
    /// itself. Cycles and unknown names are skipped.
    pub fn dependencies_of(&self, name: &str) -> Vec<Arc<BundleInfo>> {
        let mut seen = HashSet::default();
        seen.insert(name.to_string());
        let mut out = Vec::new();
        let mut stack: Vec<&str> = match self.bundles.get(name) {
            Some(bundle) => bundle.dependencies.iter().rev().map(String::as_str).collect(),
            None => return out,
        };

        while let Some(next) = stack.pop() {
            if !seen.insert(next.to_string()) {
                continue;
            }
            let Some(bundle) = self.bundles.get(next) else {
                warn!(bundle = name, dependency = next, "unknown dependency");
                continue;
            };
            out.push(bundle.clone());
            stack.extend(bundle.dependencies.iter().rev().map(String::as_str));
        }
        out
    }
}

/// Canonical form of a logical path: forward slashes, no surrounding whitespace.
pub fn normalize_path(path: &str) -> String {
    path.trim().replace('\\', "/")
}
