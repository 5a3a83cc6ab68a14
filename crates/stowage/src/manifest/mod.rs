//! Catalog file formats and reconciliation.
//!
//! A version container lists the manifests of one content build; each
//! manifest lists the archives of one content category.

mod catalog;
mod init;
mod update;

pub use catalog::{Catalog, normalize_path};
pub use init::{CatalogSource, InitManifestOperation};
pub use update::UpdateManifestOperation;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StowageError, StowageResult};

/// Top level index of a content build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionContainer {
    /// Build timestamp, compared to pick the authoritative catalog.
    pub timestamp: u64,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub manifests: Vec<ManifestDescriptor>,
}

/// Where to find one manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDescriptor {
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub bundles: Vec<BundleInfo>,
}

/// One physical archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleInfo {
    pub name: String,
    pub hash: String,
    pub size: u64,
    /// Plain file stored under its own name, never ciphered or offset.
    #[serde(default)]
    pub raw_file: bool,
    /// Shipped in the build-in directory.
    #[serde(default)]
    pub build_in: bool,
    /// Names of the bundles this one needs loaded first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub scenes: Vec<String>,
}

impl BundleInfo {
    pub fn new(name: impl Into<String>, hash: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            size,
            raw_file: false,
            build_in: false,
            dependencies: Vec::new(),
            assets: Vec::new(),
            scenes: Vec::new(),
        }
    }

    pub fn raw(mut self) -> Self {
        self.raw_file = true;
        self
    }

    pub fn build_in(mut self) -> Self {
        self.build_in = true;
        self
    }

    pub fn with_dependencies<S: Into<String>>(mut self, deps: impl IntoIterator<Item = S>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_assets<S: Into<String>>(mut self, assets: impl IntoIterator<Item = S>) -> Self {
        self.assets = assets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scenes<S: Into<String>>(mut self, scenes: impl IntoIterator<Item = S>) -> Self {
        self.scenes = scenes.into_iter().map(Into::into).collect();
        self
    }

    /// File name on disk and on the server.
    ///
    /// Archives are content addressed as `name_hash`; raw files keep their name.
    pub fn save_name(&self) -> String {
        if self.raw_file {
            self.name.clone()
        } else {
            format!("{}_{}", self.name, self.hash)
        }
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> StowageResult<T> {
    let bytes = std::fs::read(path).map_err(|e| StowageError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| StowageError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> StowageResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StowageError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StowageError::io(parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| StowageError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_name() {
        let archive = BundleInfo::new("ui", "9ab3", 10);
        assert_eq!(archive.save_name(), "ui_9ab3");
        assert_eq!(archive.raw().save_name(), "ui");
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest: Manifest = serde_json::from_str(
            r#"{ "name": "core", "bundles": [ { "name": "ui", "hash": "9ab3", "size": 10 } ] }"#,
        )
        .unwrap();
        let bundle = &manifest.bundles[0];
        assert!(!bundle.raw_file);
        assert!(!bundle.build_in);
        assert!(bundle.assets.is_empty());
    }

    #[test]
    fn test_json_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("version.json");
        let container = VersionContainer {
            timestamp: 42,
            version: "1.0.3".into(),
            manifests: vec![ManifestDescriptor {
                name: "core".into(),
                file: "core_aa.json".into(),
                size: 120,
                hash: "aa".into(),
            }],
        };
        write_json(&path, &container).unwrap();
        let read: VersionContainer = read_json(&path).unwrap();
        assert_eq!(read, container);

        let missing = read_json::<VersionContainer>(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(StowageError::Io { .. })));
    }
}
