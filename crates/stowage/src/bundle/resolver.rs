use std::path::{Path, PathBuf};

use stowage_core::alloc::HashMap;
use stowage_core::profiling::profile_function;
use stowage_net::Url;
use tracing::{debug, trace};

use crate::config::{EngineConfig, Profile};
use crate::error::StowageResult;
use crate::manifest::BundleInfo;

/// Physical source of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleLocation {
    /// Shipped with the client.
    BuildIn(PathBuf),
    /// Previously fetched or unpacked into the download directory.
    Downloaded(PathBuf),
    /// Must be fetched first.
    Remote(Url),
}

impl BundleLocation {
    pub fn is_remote(&self) -> bool {
        matches!(self, BundleLocation::Remote(_))
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            BundleLocation::BuildIn(path) | BundleLocation::Downloaded(path) => Some(path),
            BundleLocation::Remote(_) => None,
        }
    }
}

/// Decides where each archive is read from.
///
/// Decisions are memoized per bundle name. Under encryption, a build-in
/// archive resolved while online is deliberately left unmemoized: it still
/// has to be unpacked into the download directory, and
/// [`BundleResolver::is_cached`] is how callers find out.
#[derive(Debug, Default)]
pub struct BundleResolver {
    table: HashMap<String, BundleLocation>,
}

impl BundleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, info: &BundleInfo, config: &EngineConfig) -> StowageResult<BundleLocation> {
        profile_function!();

        if let Some(location) = self.table.get(&info.name) {
            return Ok(location.clone());
        }

        let save_name = info.save_name();
        let (location, memoize) = if !config.platform.supports_encryption() {
            (BundleLocation::Remote(config.remote_url(&save_name)?), true)
        } else if config.encryption {
            let downloaded = config.download_path(&save_name);
            if is_complete(&downloaded, info) {
                (BundleLocation::Downloaded(downloaded), true)
            } else if config.profile == Profile::OfflineDesktop {
                (BundleLocation::BuildIn(config.build_in_path(&save_name)), true)
            } else if config.profile == Profile::Offline || info.build_in {
                (BundleLocation::BuildIn(config.build_in_path(&save_name)), false)
            } else {
                (BundleLocation::Remote(config.remote_url(&save_name)?), false)
            }
        } else {
            let downloaded = config.download_path(&save_name);
            let build_in = config.build_in_path(&save_name);
            // Offline builds ship archives without flagging them.
            let shipped = info.build_in || (config.profile != Profile::Online && build_in.is_file());
            if shipped {
                (BundleLocation::BuildIn(build_in), true)
            } else if is_complete(&downloaded, info) {
                (BundleLocation::Downloaded(downloaded), true)
            } else {
                (BundleLocation::Remote(config.remote_url(&save_name)?), false)
            }
        };

        if memoize {
            debug!(bundle = %info.name, ?location, "bundle resolved");
            self.table.insert(info.name.clone(), location.clone());
        } else {
            trace!(bundle = %info.name, ?location, "bundle resolved, not memoized");
        }
        Ok(location)
    }

    /// Whether the decision for `bundle` is memoized.
    pub fn is_cached(&self, bundle: &str) -> bool {
        self.table.contains_key(bundle)
    }

    /// Record that `bundle` now lives at `path` in the download directory.
    pub fn mark_downloaded(&mut self, bundle: &str, path: PathBuf) {
        debug!(bundle, path = %path.display(), "bundle marked downloaded");
        self.table
            .insert(bundle.to_string(), BundleLocation::Downloaded(path));
    }

    pub fn forget(&mut self, bundle: &str) {
        self.table.remove(bundle);
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// A downloaded file counts once it reached its declared size.
fn is_complete(path: &Path, info: &BundleInfo) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && (info.size == 0 || meta.len() == info.size),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Platform;

    struct Dirs {
        _root: tempfile::TempDir,
        config: EngineConfig,
    }

    fn dirs() -> Dirs {
        let root = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(
            root.path().join("build_in"),
            root.path().join("downloads"),
            root.path().join("tmp"),
        )
        .with_download_url("https://cdn.example/content");
        std::fs::create_dir_all(&config.build_in_dir).unwrap();
        std::fs::create_dir_all(&config.download_dir).unwrap();
        Dirs {
            _root: root,
            config,
        }
    }

    fn write(path: PathBuf, len: usize) {
        std::fs::write(path, vec![0u8; len]).unwrap();
    }

    #[test]
    fn test_web_is_always_remote_and_memoized() {
        let dirs = dirs();
        let config = dirs.config.clone().with_platform(Platform::Web).with_encryption(true);
        let info = BundleInfo::new("ui", "aa", 4).build_in();
        let mut resolver = BundleResolver::new();

        let location = resolver.resolve(&info, &config).unwrap();
        assert_eq!(
            location,
            BundleLocation::Remote(Url::parse("https://cdn.example/content/ui_aa").unwrap())
        );
        assert!(resolver.is_cached("ui"));
    }

    #[test]
    fn test_encrypted_prefers_downloaded_copy() {
        let dirs = dirs();
        let config = dirs.config.clone().with_encryption(true);
        let info = BundleInfo::new("ui", "aa", 4).build_in();
        write(config.download_path("ui_aa"), 4);

        let mut resolver = BundleResolver::new();
        assert_eq!(
            resolver.resolve(&info, &config).unwrap(),
            BundleLocation::Downloaded(config.download_path("ui_aa"))
        );
        assert!(resolver.is_cached("ui"));
    }

    #[test]
    fn test_encrypted_partial_download_is_ignored() {
        let dirs = dirs();
        let config = dirs.config.clone().with_encryption(true);
        let info = BundleInfo::new("ui", "aa", 4);
        write(config.download_path("ui_aa"), 2);

        let mut resolver = BundleResolver::new();
        assert!(resolver.resolve(&info, &config).unwrap().is_remote());
        assert!(!resolver.is_cached("ui"));
    }

    #[test]
    fn test_encrypted_build_in_is_not_memoized_until_unpacked() {
        let dirs = dirs();
        let config = dirs.config.clone().with_encryption(true);
        let info = BundleInfo::new("ui", "aa", 4).build_in();
        let mut resolver = BundleResolver::new();

        assert_eq!(
            resolver.resolve(&info, &config).unwrap(),
            BundleLocation::BuildIn(config.build_in_path("ui_aa"))
        );
        assert!(!resolver.is_cached("ui"));

        resolver.mark_downloaded("ui", config.download_path("ui_aa"));
        assert_eq!(
            resolver.resolve(&info, &config).unwrap(),
            BundleLocation::Downloaded(config.download_path("ui_aa"))
        );
    }

    #[test]
    fn test_encrypted_offline_desktop_memoizes_build_in() {
        let dirs = dirs();
        let config = dirs
            .config
            .clone()
            .with_encryption(true)
            .with_profile(Profile::OfflineDesktop);
        let info = BundleInfo::new("ui", "aa", 4);
        let mut resolver = BundleResolver::new();

        assert_eq!(
            resolver.resolve(&info, &config).unwrap(),
            BundleLocation::BuildIn(config.build_in_path("ui_aa"))
        );
        assert!(resolver.is_cached("ui"));
    }

    #[test]
    fn test_encrypted_offline_resolves_build_in_without_memoizing() {
        let dirs = dirs();
        let config = dirs
            .config
            .clone()
            .with_encryption(true)
            .with_profile(Profile::Offline);
        let info = BundleInfo::new("ui", "aa", 4);
        let mut resolver = BundleResolver::new();

        assert!(matches!(
            resolver.resolve(&info, &config).unwrap(),
            BundleLocation::BuildIn(_)
        ));
        assert!(!resolver.is_cached("ui"));
    }

    #[test]
    fn test_plain_prefers_build_in_then_download_then_remote() {
        let dirs = dirs();
        let config = dirs.config.clone();
        let mut resolver = BundleResolver::new();

        let shipped = BundleInfo::new("ui", "aa", 4).build_in();
        write(config.download_path("ui_aa"), 4);
        assert!(matches!(
            resolver.resolve(&shipped, &config).unwrap(),
            BundleLocation::BuildIn(_)
        ));

        let fetched = BundleInfo::new("town", "bb", 4);
        write(config.download_path("town_bb"), 4);
        assert!(matches!(
            resolver.resolve(&fetched, &config).unwrap(),
            BundleLocation::Downloaded(_)
        ));

        let remote = BundleInfo::new("forest", "cc", 4);
        assert!(resolver.resolve(&remote, &config).unwrap().is_remote());
        assert!(!resolver.is_cached("forest"));
        assert_eq!(resolver.len(), 2);

        resolver.clear();
        assert!(resolver.is_empty());
    }

    const OFFLINE: [Profile; 2] = [Profile::Offline, Profile::OfflineDesktop];

    #[test]
    fn test_plain_offline_reads_shipped_archives_in_place() {
        for profile in OFFLINE {
            let dirs = dirs();
            let config = dirs.config.clone().with_profile(profile);
            let mut resolver = BundleResolver::new();

            let flagged = BundleInfo::new("ui", "aa", 4).build_in();
            assert_eq!(
                resolver.resolve(&flagged, &config).unwrap(),
                BundleLocation::BuildIn(config.build_in_path("ui_aa"))
            );

            let unflagged = BundleInfo::new("town", "bb", 4);
            write(config.build_in_path("town_bb"), 4);
            assert_eq!(
                resolver.resolve(&unflagged, &config).unwrap(),
                BundleLocation::BuildIn(config.build_in_path("town_bb"))
            );
            assert!(resolver.is_cached("ui"));
            assert!(resolver.is_cached("town"));
        }
    }

    #[test]
    fn test_plain_offline_uses_downloaded_copy() {
        for profile in OFFLINE {
            let dirs = dirs();
            let config = dirs.config.clone().with_profile(profile);
            let info = BundleInfo::new("dlc", "ff00", 4);
            write(config.download_path("dlc_ff00"), 4);

            let mut resolver = BundleResolver::new();
            let location = resolver.resolve(&info, &config).unwrap();
            assert_eq!(location, BundleLocation::Downloaded(config.download_path("dlc_ff00")));
            assert!(location.local_path().unwrap().is_file());
            assert!(resolver.is_cached("dlc"));
        }
    }

    #[test]
    fn test_plain_offline_missing_archive_is_remote_and_not_memoized() {
        for profile in OFFLINE {
            let dirs = dirs();
            let config = dirs.config.clone().with_profile(profile);
            let info = BundleInfo::new("forest", "cc", 4);
            let mut resolver = BundleResolver::new();

            assert!(resolver.resolve(&info, &config).unwrap().is_remote());
            assert!(!resolver.is_cached("forest"));

            write(config.download_path("forest_cc"), 4);
            assert!(matches!(
                resolver.resolve(&info, &config).unwrap(),
                BundleLocation::Downloaded(_)
            ));
        }
    }
}
