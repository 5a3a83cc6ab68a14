use std::collections::VecDeque;
use std::path::PathBuf;

use stowage_core::profiling::profile_function;
use tracing::{debug, info, warn};

use super::{Manifest, ManifestDescriptor, VersionContainer, read_json};
use crate::config::{EngineConfig, Profile};
use crate::download::{Download, DownloadInfo, DownloadStatus};
use crate::engine::Services;
use crate::error::StowageResult;
use crate::operation::{Operation, OperationContext, OperationCore};

/// Progress shares of the three steps.
const BOOTSTRAP_SHARE: f32 = 0.5;
const COPY_SHARE: f32 = 0.4;

/// Which version container won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSource {
    BuildIn,
    Downloaded,
}

enum Phase {
    StageVersion(Download),
    Choose,
    Copy {
        queue: VecDeque<ManifestDescriptor>,
        active: Option<Download>,
        total: usize,
    },
    Parse {
        index: usize,
        parsed: Vec<Manifest>,
    },
}

/// First run catalog bootstrap.
///
/// Stages the build-in version file, compares it with a previously downloaded
/// one, copies missing build-in manifests into the download directory and
/// registers every manifest of the winning set with the catalog.
pub struct InitManifestOperation {
    core: OperationCore,
    phase: Option<Phase>,
    build_in: Option<VersionContainer>,
    chosen: Option<VersionContainer>,
    source: Option<CatalogSource>,
    manifest_dir: PathBuf,
}

impl Default for InitManifestOperation {
    fn default() -> Self {
        Self::new()
    }
}

impl InitManifestOperation {
    pub fn new() -> Self {
        Self {
            core: OperationCore::new(),
            phase: None,
            build_in: None,
            chosen: None,
            source: None,
            manifest_dir: PathBuf::new(),
        }
    }

    /// The version container that was registered.
    pub fn version(&self) -> Option<&VersionContainer> {
        self.chosen.as_ref()
    }

    pub fn build_in_version(&self) -> Option<&VersionContainer> {
        self.build_in.as_ref()
    }

    pub fn source(&self) -> Option<CatalogSource> {
        self.source
    }

    fn fail(&mut self, message: String) {
        warn!(error = %message, "catalog bootstrap failed");
        self.core.finish(Some(message));
    }

    fn stage(&mut self, cx: &mut OperationContext<'_>) -> StowageResult<()> {
        let config = &cx.services.config;
        let file = &config.version_file;
        let url = config.file_url(&config.build_in_path(file))?;
        let info = DownloadInfo::new(url, config.temp_path(file)).raw(true);
        let mut download = Download::new(info);
        download.start(&cx.services.transfers, cx.services.transport.clone());
        self.phase = Some(Phase::StageVersion(download));
        Ok(())
    }

    fn choose(&mut self, services: &Services, build_in: VersionContainer) -> Phase {
        let config = &services.config;
        let downloaded = read_downloaded_version(config);

        let (chosen, source) = match downloaded {
            Some(downloaded) if downloaded.timestamp > build_in.timestamp => {
                let missing = downloaded
                    .manifests
                    .iter()
                    .find(|m| !config.download_path(&m.file).is_file());
                match missing {
                    None => (downloaded, CatalogSource::Downloaded),
                    Some(missing) => {
                        warn!(
                            manifest = %missing.file,
                            "downloaded catalog references a missing manifest, using build-in"
                        );
                        (build_in.clone(), CatalogSource::BuildIn)
                    }
                }
            }
            _ => (build_in.clone(), CatalogSource::BuildIn),
        };
        info!(
            source = ?source,
            timestamp = chosen.timestamp,
            version = %chosen.version,
            "catalog selected"
        );

        let in_place = source == CatalogSource::BuildIn && config.profile == Profile::OfflineDesktop;
        self.manifest_dir = if in_place {
            config.build_in_dir.clone()
        } else {
            config.download_dir.clone()
        };

        let queue: VecDeque<_> = if source == CatalogSource::BuildIn && !in_place {
            chosen
                .manifests
                .iter()
                .filter(|m| !config.download_path(&m.file).is_file())
                .cloned()
                .collect()
        } else {
            VecDeque::new()
        };
        let total = queue.len();

        self.build_in = Some(build_in);
        self.chosen = Some(chosen);
        self.source = Some(source);
        Phase::Copy {
            queue,
            active: None,
            total,
        }
    }
}

fn read_downloaded_version(config: &EngineConfig) -> Option<VersionContainer> {
    let path = config.download_path(&config.version_file);
    if !path.is_file() {
        return None;
    }
    match read_json(&path) {
        Ok(version) => Some(version),
        Err(error) => {
            warn!(%error, "ignoring unreadable downloaded version file");
            None
        }
    }
}

impl Operation for InitManifestOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn name(&self) -> &'static str {
        "init_manifest"
    }

    fn on_start(&mut self, cx: &mut OperationContext<'_>) {
        if let Err(error) = self.stage(cx) {
            self.fail(format!("failed to stage build-in version file: {error}"));
        }
    }

    fn on_update(&mut self, cx: &mut OperationContext<'_>) {
        profile_function!();

        loop {
            let Some(phase) = self.phase.take() else {
                return;
            };
            match phase {
                Phase::StageVersion(mut download) => match download.poll() {
                    DownloadStatus::Successful => {
                        match read_json::<VersionContainer>(&download.info().path) {
                            Ok(build_in) => {
                                debug!(timestamp = build_in.timestamp, "build-in catalog staged");
                                self.build_in = Some(build_in);
                                self.core.set_progress(BOOTSTRAP_SHARE);
                                self.phase = Some(Phase::Choose);
                            }
                            Err(error) => return self.fail(error.to_string()),
                        }
                    }
                    DownloadStatus::Failed => {
                        let error = download.error().unwrap_or("unknown error").to_string();
                        return self.fail(format!("failed to stage build-in version file: {error}"));
                    }
                    DownloadStatus::Pending | DownloadStatus::Running => {
                        self.phase = Some(Phase::StageVersion(download));
                        return;
                    }
                },
                Phase::Choose => {
                    let Some(build_in) = self.build_in.take() else {
                        return self.fail("build-in catalog missing".to_string());
                    };
                    self.phase = Some(self.choose(cx.services, build_in));
                }
                Phase::Copy {
                    mut queue,
                    active,
                    total,
                } => {
                    if let Some(mut download) = active {
                        match download.poll() {
                            DownloadStatus::Successful => {}
                            DownloadStatus::Failed => {
                                let error = download.error().unwrap_or("unknown error").to_string();
                                return self.fail(format!(
                                    "failed to copy manifest {}: {error}",
                                    download.info().path.display()
                                ));
                            }
                            DownloadStatus::Pending | DownloadStatus::Running => {
                                self.phase = Some(Phase::Copy {
                                    queue,
                                    active: Some(download),
                                    total,
                                });
                                return;
                            }
                        }
                    }
                    let done = total - queue.len();
                    if total > 0 {
                        self.core
                            .set_progress(BOOTSTRAP_SHARE + COPY_SHARE * done as f32 / total as f32);
                    }

                    match queue.pop_front() {
                        Some(manifest) => {
                            let config = &cx.services.config;
                            let url = match config.file_url(&config.build_in_path(&manifest.file)) {
                                Ok(url) => url,
                                Err(error) => return self.fail(error.to_string()),
                            };
                            let info = DownloadInfo::new(url, config.download_path(&manifest.file))
                                .with_size(manifest.size)
                                .with_hash(manifest.hash.clone());
                            let mut download = Download::new(info);
                            download.start(&cx.services.transfers, cx.services.transport.clone());
                            debug!(manifest = %manifest.file, "copying build-in manifest");
                            self.phase = Some(Phase::Copy {
                                queue,
                                active: Some(download),
                                total,
                            });
                            return;
                        }
                        None => {
                            self.core.set_progress(BOOTSTRAP_SHARE + COPY_SHARE);
                            self.phase = Some(Phase::Parse {
                                index: 0,
                                parsed: Vec::new(),
                            });
                        }
                    }
                }
                Phase::Parse { mut index, mut parsed } => {
                    let Some(chosen) = self.chosen.clone() else {
                        return self.fail("no catalog selected".to_string());
                    };
                    let count = chosen.manifests.len();
                    while index < count {
                        if cx.is_busy() {
                            self.phase = Some(Phase::Parse { index, parsed });
                            return;
                        }
                        let descriptor = &chosen.manifests[index];
                        match read_json::<Manifest>(&self.manifest_dir.join(&descriptor.file)) {
                            Ok(manifest) => parsed.push(manifest),
                            Err(error) => return self.fail(error.to_string()),
                        }
                        index += 1;
                        let share = 1.0 - BOOTSTRAP_SHARE - COPY_SHARE;
                        self.core.set_progress(
                            BOOTSTRAP_SHARE + COPY_SHARE + share * index as f32 / count as f32,
                        );
                    }

                    let services = &mut *cx.services;
                    services.catalog.clear();
                    for manifest in parsed {
                        services.catalog.register(manifest);
                    }
                    services.catalog.set_version(chosen);
                    services.resolver.clear();
                    info!(manifests = count, "catalog registered");
                    self.core.finish(None);
                    return;
                }
            }
        }
    }
}
