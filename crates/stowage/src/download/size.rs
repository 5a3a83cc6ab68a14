use std::sync::Arc;

use tracing::debug;

use super::{DownloadInfo, DownloadOperation};
use crate::bundle::BundleLocation;
use crate::error::StowageError;
use crate::loadable::LoadableKind;
use crate::manifest::BundleInfo;
use crate::operation::{Operation, OperationContext, OperationCore};

/// Computes what still has to be fetched for a set of bundles.
///
/// Only bundles that currently resolve remote are counted; resumable bytes
/// already on disk are subtracted.
pub struct GetDownloadSizeOperation {
    core: OperationCore,
    requested: Option<Vec<String>>,
    candidates: Vec<Arc<BundleInfo>>,
    cursor: usize,
    infos: Vec<DownloadInfo>,
    download_size: u64,
}

impl GetDownloadSizeOperation {
    /// `None` checks every bundle in the catalog.
    pub fn new(bundles: Option<Vec<String>>) -> Self {
        Self {
            core: OperationCore::new(),
            requested: bundles,
            candidates: Vec::new(),
            cursor: 0,
            infos: Vec::new(),
            download_size: 0,
        }
    }

    /// Remaining bytes to download.
    pub fn download_size(&self) -> u64 {
        self.download_size
    }

    pub fn infos(&self) -> &[DownloadInfo] {
        &self.infos
    }

    pub fn into_download(&self) -> DownloadOperation {
        DownloadOperation::new(self.infos.clone())
    }
}

impl Operation for GetDownloadSizeOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn name(&self) -> &'static str {
        "download_size"
    }

    fn on_start(&mut self, cx: &mut OperationContext<'_>) {
        let catalog = &cx.services.catalog;
        match self.requested.take() {
            Some(names) => {
                for name in names {
                    match catalog.bundle(&name) {
                        Some(info) => self.candidates.push(info.clone()),
                        None => {
                            let error = StowageError::NotFound {
                                kind: LoadableKind::Bundle,
                                address: name,
                            };
                            self.core.finish(Some(error.to_string()));
                            return;
                        }
                    }
                }
            }
            None => {
                self.candidates = catalog.bundles().cloned().collect();
                self.candidates.sort_by(|a, b| a.name.cmp(&b.name));
            }
        }
    }

    fn on_update(&mut self, cx: &mut OperationContext<'_>) {
        while self.cursor < self.candidates.len() {
            if cx.is_busy() {
                return;
            }
            let info = self.candidates[self.cursor].clone();
            self.cursor += 1;

            let services = &mut *cx.services;
            match services.resolver.resolve(&info, &services.config) {
                Ok(BundleLocation::Remote(url)) => {
                    let download = DownloadInfo::for_bundle(&info, url, &services.config);
                    self.download_size += download.remaining_bytes();
                    self.infos.push(download);
                }
                Ok(_) => {}
                Err(e) => {
                    self.core.finish(Some(e.to_string()));
                    return;
                }
            }
            let progress = self.cursor as f32 / self.candidates.len() as f32;
            self.core.set_progress(progress);
        }

        debug!(files = self.infos.len(), bytes = self.download_size, "download size computed");
        self.core.finish(None);
    }
}
