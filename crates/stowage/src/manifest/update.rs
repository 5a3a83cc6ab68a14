use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{VersionContainer, read_json};
use crate::config::EngineConfig;
use crate::download::{Download, DownloadInfo, DownloadOperation, DownloadStatus};
use crate::error::StowageResult;
use crate::operation::{Operation, OperationContext, OperationCore};

/// Checks the remote content server for a newer catalog.
///
/// The operation only discovers work: missing manifests of a newer remote
/// catalog are exposed through [`UpdateManifestOperation::pending`] and
/// [`UpdateManifestOperation::download_operation`]. Nothing is applied until
/// the host commits the update after the batch has succeeded.
pub struct UpdateManifestOperation {
    core: OperationCore,
    download: Option<Download>,
    staged_path: PathBuf,
    remote: Option<VersionContainer>,
    has_update: bool,
    pending: Vec<DownloadInfo>,
}

impl Default for UpdateManifestOperation {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateManifestOperation {
    pub fn new() -> Self {
        Self {
            core: OperationCore::new(),
            download: None,
            staged_path: PathBuf::new(),
            remote: None,
            has_update: false,
            pending: Vec::new(),
        }
    }

    pub fn has_update(&self) -> bool {
        self.has_update
    }

    /// The fetched remote version container.
    pub fn remote_version(&self) -> Option<&VersionContainer> {
        self.remote.as_ref()
    }

    /// Manifests of the remote catalog that are not present locally.
    pub fn pending(&self) -> &[DownloadInfo] {
        &self.pending
    }

    /// Batch fetching every pending manifest.
    pub fn download_operation(&self) -> DownloadOperation {
        DownloadOperation::new(self.pending.clone())
    }

    /// Where the remote version file was staged.
    pub fn staged_path(&self) -> &Path {
        &self.staged_path
    }

    fn evaluate(&mut self, config: &EngineConfig, active: Option<u64>) -> StowageResult<()> {
        let remote: VersionContainer = read_json(&self.staged_path)?;
        let build_in: VersionContainer = read_json(&config.build_in_path(&config.version_file))?;

        self.has_update = remote.timestamp > build_in.timestamp && active != Some(remote.timestamp);
        if self.has_update {
            for manifest in &remote.manifests {
                let path = config.download_path(&manifest.file);
                if path.is_file() {
                    continue;
                }
                let url = config.remote_url(&manifest.file)?;
                self.pending.push(
                    DownloadInfo::new(url, path)
                        .with_size(manifest.size)
                        .with_hash(manifest.hash.clone()),
                );
            }
        }
        info!(
            remote = remote.timestamp,
            build_in = build_in.timestamp,
            has_update = self.has_update,
            pending = self.pending.len(),
            "update check finished"
        );
        self.remote = Some(remote);
        Ok(())
    }
}

impl Operation for UpdateManifestOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn name(&self) -> &'static str {
        "update_manifest"
    }

    fn on_start(&mut self, cx: &mut OperationContext<'_>) {
        let config = &cx.services.config;
        let url = match config.remote_url(&config.version_file) {
            Ok(url) => url,
            Err(error) => {
                self.core.finish(Some(error.to_string()));
                return;
            }
        };
        self.staged_path = config.temp_path(&format!("remote_{}", config.version_file));
        debug!(%url, "fetching remote version file");

        let info = DownloadInfo::new(url, self.staged_path.clone()).raw(true);
        let mut download = Download::new(info);
        download.start(&cx.services.transfers, cx.services.transport.clone());
        self.download = Some(download);
    }

    fn on_update(&mut self, cx: &mut OperationContext<'_>) {
        let Some(download) = self.download.as_mut() else {
            return;
        };
        match download.poll() {
            DownloadStatus::Pending | DownloadStatus::Running => {
                self.core.set_progress(download.fraction() * 0.9);
            }
            DownloadStatus::Failed => {
                let error = download.error().unwrap_or("unknown error").to_string();
                warn!(%error, "remote version file unavailable");
                self.core
                    .finish(Some(format!("failed to fetch remote version file: {error}")));
            }
            DownloadStatus::Successful => {
                self.download = None;
                let active = cx.services.catalog.version().map(|v| v.timestamp);
                let config = cx.services.config.clone();
                match self.evaluate(&config, active) {
                    Ok(()) => {
                        self.core.finish(None);
                    }
                    Err(error) => {
                        self.core.finish(Some(error.to_string()));
                    }
                }
            }
        }
    }
}
