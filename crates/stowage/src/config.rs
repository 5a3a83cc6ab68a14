//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stowage_net::{NetError, RetryPolicy, Url};

use crate::error::{StowageError, StowageResult};

/// Leading bytes every archive carries on platforms that support it.
pub const BUNDLE_OFFSET: u64 = 16;

/// Which local content the client may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Profile {
    /// Content may be fetched from the download URL.
    #[default]
    Online,
    /// Everything ships in the build-in directory.
    Offline,
    /// Like [`Profile::Offline`], and build-in files are read in place.
    OfflineDesktop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Platform {
    #[default]
    Desktop,
    Mobile,
    /// Sandboxed target: no encryption, no byte offset, everything remote.
    Web,
}

impl Platform {
    pub fn supports_encryption(self) -> bool {
        !matches!(self, Platform::Web)
    }
}

/// Transport retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Configuration for an [`crate::Engine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Read-only content shipped with the client.
    pub build_in_dir: PathBuf,
    /// Writable directory for downloads and unpacked build-in archives.
    pub download_dir: PathBuf,
    /// Staging area for catalog bootstrap.
    pub temp_dir: PathBuf,
    /// Base URL that archives, manifests and the version file are served from.
    pub download_url: String,
    pub version_file: String,
    pub profile: Profile,
    pub platform: Platform,
    pub encryption: bool,
    pub max_concurrent_downloads: usize,
    /// Per tick work budget, `0` disables the limit.
    pub frame_budget_ms: u64,
    pub worker_threads: usize,
    pub load_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            build_in_dir: PathBuf::from("build_in"),
            download_dir: PathBuf::from("downloads"),
            temp_dir: std::env::temp_dir().join("stowage"),
            download_url: String::new(),
            version_file: "version.json".to_string(),
            profile: Profile::Online,
            platform: Platform::Desktop,
            encryption: false,
            max_concurrent_downloads: 5,
            frame_budget_ms: 16,
            worker_threads: 2,
            load_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(
        build_in_dir: impl Into<PathBuf>,
        download_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            build_in_dir: build_in_dir.into(),
            download_dir: download_dir.into(),
            temp_dir: temp_dir.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> StowageResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StowageError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| StowageError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = url.into();
        self
    }

    pub fn with_version_file(mut self, file: impl Into<String>) -> Self {
        self.version_file = file.into();
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_encryption(mut self, encryption: bool) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max;
        self
    }

    pub fn with_frame_budget_ms(mut self, ms: u64) -> Self {
        self.frame_budget_ms = ms;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_load_timeout_ms(mut self, ms: u64) -> Self {
        self.load_timeout_ms = ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Whether archives go through the stream cipher.
    pub fn uses_cipher(&self) -> bool {
        self.encryption && self.platform.supports_encryption()
    }

    /// Leading bytes to skip when reading a non-raw archive.
    pub fn byte_offset(&self) -> u64 {
        if self.platform.supports_encryption() {
            BUNDLE_OFFSET
        } else {
            0
        }
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn build_in_path(&self, file: &str) -> PathBuf {
        self.build_in_dir.join(file)
    }

    pub fn download_path(&self, file: &str) -> PathBuf {
        self.download_dir.join(file)
    }

    pub fn temp_path(&self, file: &str) -> PathBuf {
        self.temp_dir.join(file)
    }

    /// `{download_url}/{file}`
    pub fn remote_url(&self, file: &str) -> StowageResult<Url> {
        let raw = format!("{}/{}", self.download_url.trim_end_matches('/'), file);
        Url::parse(&raw).map_err(|e| StowageError::Net(NetError::InvalidUrl(format!("{raw}: {e}"))))
    }

    /// `file://` URL of a local path, made absolute first.
    pub fn file_url(&self, path: &Path) -> StowageResult<Url> {
        let absolute = std::path::absolute(path).map_err(|e| StowageError::io(path, e))?;
        Url::from_file_path(&absolute)
            .map_err(|_| StowageError::Net(NetError::InvalidUrl(absolute.display().to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stowage.json");
        std::fs::write(
            &path,
            r#"{ "download_url": "https://cdn.example/content/", "encryption": true, "profile": "OfflineDesktop" }"#,
        )
        .unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.profile, Profile::OfflineDesktop);
        assert!(config.encryption);
        assert_eq!(config.max_concurrent_downloads, 5);
        assert_eq!(config.version_file, "version.json");
        assert_eq!(
            config.remote_url("a_1f2e.bundle").unwrap().as_str(),
            "https://cdn.example/content/a_1f2e.bundle"
        );
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stowage.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(StowageError::Parse { .. })
        ));
    }

    #[test]
    fn test_web_platform_disables_cipher_and_offset() {
        let config = EngineConfig::default()
            .with_encryption(true)
            .with_platform(Platform::Web);
        assert!(!config.uses_cipher());
        assert_eq!(config.byte_offset(), 0);

        let config = config.with_platform(Platform::Mobile);
        assert!(config.uses_cipher());
        assert_eq!(config.byte_offset(), BUNDLE_OFFSET);
    }

    #[test]
    fn test_missing_base_url_is_rejected() {
        let config = EngineConfig::default();
        assert!(matches!(
            config.remote_url("x"),
            Err(StowageError::Net(NetError::InvalidUrl(_)))
        ));
    }
}
