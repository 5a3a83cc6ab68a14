//! On-disk content layouts for engine tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stowage::bundle::encode_bundle;
use stowage::{
    BundleInfo, Engine, EngineConfig, Manifest, ManifestDescriptor, ReadMode, VersionContainer,
};
use tempfile::TempDir;

use crate::{MockTransport, RecordingHost};

/// Download URL of [`ContentFixture::config`].
pub const REMOTE_BASE: &str = "http://cdn.test/content";

/// Temporary `build_in`, `downloads` and `tmp` directories.
///
/// Helpers panic on I/O errors; they are meant for tests only.
pub struct ContentFixture {
    _root: TempDir,
    pub build_in: PathBuf,
    pub downloads: PathBuf,
    pub tmp: PathBuf,
}

impl Default for ContentFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentFixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("failed to create fixture root");
        let build_in = root.path().join("build_in");
        let downloads = root.path().join("downloads");
        let tmp = root.path().join("tmp");
        for dir in [&build_in, &downloads, &tmp] {
            fs::create_dir_all(dir).expect("failed to create fixture directory");
        }
        Self {
            _root: root,
            build_in,
            downloads,
            tmp,
        }
    }

    /// Online desktop configuration without encryption, an unlimited budget
    /// and a single worker.
    pub fn config(&self) -> EngineConfig {
        EngineConfig::new(&self.build_in, &self.downloads, &self.tmp)
            .with_download_url(REMOTE_BASE)
            .with_frame_budget_ms(0)
            .with_worker_threads(1)
            .with_load_timeout_ms(5_000)
    }

    pub fn engine(
        &self,
        config: EngineConfig,
        transport: Arc<MockTransport>,
        host: Arc<RecordingHost>,
    ) -> Engine {
        Engine::builder(config)
            .transport_arc(transport)
            .host_arc(host)
            .build()
            .expect("failed to build engine")
    }

    /// `{REMOTE_BASE}/{file}`
    pub fn remote_url(file: &str) -> String {
        format!("{REMOTE_BASE}/{file}")
    }

    /// Bundle description whose size matches its encoded archive.
    pub fn bundle(name: &str, hash: &str, plain: &[u8], config: &EngineConfig) -> (BundleInfo, Vec<u8>) {
        let info = BundleInfo::new(name, hash, 0);
        let encoded = encode_bundle(plain, ReadMode::for_bundle(&info, config));
        let info = BundleInfo {
            size: encoded.len() as u64,
            ..info
        };
        (info, encoded)
    }

    /// Raw file bundle, stored as-is under its own name.
    pub fn raw_bundle(name: &str, plain: &[u8]) -> (BundleInfo, Vec<u8>) {
        (BundleInfo::new(name, "", plain.len() as u64).raw(), plain.to_vec())
    }

    /// Write an encoded archive into `dir` under its save name.
    pub fn write_bundle(&self, dir: &Path, info: &BundleInfo, encoded: &[u8]) -> PathBuf {
        let path = dir.join(info.save_name());
        fs::write(&path, encoded).expect("failed to write bundle");
        path
    }

    pub fn manifest_bytes(manifest: &Manifest) -> Vec<u8> {
        serde_json::to_vec_pretty(manifest).expect("failed to encode manifest")
    }

    /// Write `manifest` as `file` into `dir` and describe it.
    pub fn write_manifest(&self, dir: &Path, file: &str, manifest: &Manifest) -> ManifestDescriptor {
        let bytes = Self::manifest_bytes(manifest);
        fs::write(dir.join(file), &bytes).expect("failed to write manifest");
        ManifestDescriptor {
            name: manifest.name.clone(),
            file: file.to_string(),
            size: bytes.len() as u64,
            hash: String::new(),
        }
    }

    pub fn version(timestamp: u64, manifests: Vec<ManifestDescriptor>) -> VersionContainer {
        VersionContainer {
            timestamp,
            version: format!("1.0.{timestamp}"),
            manifests,
        }
    }

    pub fn version_bytes(version: &VersionContainer) -> Vec<u8> {
        serde_json::to_vec_pretty(version).expect("failed to encode version")
    }

    /// Write `version.json` into `dir`.
    pub fn write_version(&self, dir: &Path, version: &VersionContainer) {
        fs::write(dir.join("version.json"), Self::version_bytes(version)).expect("failed to write version file");
    }

    /// Build-in content in one step: archives, one manifest and the version
    /// file.
    pub fn install_build_in(&self, timestamp: u64, bundles: &[(BundleInfo, Vec<u8>)]) -> VersionContainer {
        for (info, encoded) in bundles {
            self.write_bundle(&self.build_in, info, encoded);
        }
        let manifest = Manifest {
            name: "main".to_string(),
            bundles: bundles.iter().map(|(info, _)| info.clone()).collect(),
        };
        let descriptor = self.write_manifest(&self.build_in, "main.json", &manifest);
        let version = Self::version(timestamp, vec![descriptor]);
        self.write_version(&self.build_in, &version);
        version
    }
}
