use std::collections::VecDeque;

use stowage_core::profiling::profile_function;
use tracing::{debug, info};

use super::{Download, DownloadInfo, DownloadStatus};
use crate::operation::{Operation, OperationContext, OperationCore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDownload {
    pub info: DownloadInfo,
    pub error: String,
}

/// Batch transfer of many files with bounded concurrency.
///
/// Individual failures do not stop the batch. When it ends with failures the
/// operation fails with a summary, while [`DownloadOperation::succeeded`]
/// still lists every completed file. [`DownloadOperation::retry`] builds a
/// follow-up batch for the failed subset only.
pub struct DownloadOperation {
    core: OperationCore,
    pending: VecDeque<DownloadInfo>,
    active: Vec<Download>,
    succeeded: Vec<DownloadInfo>,
    failed: Vec<FailedDownload>,
    max_concurrent: Option<usize>,
    total_bytes: u64,
    total_count: usize,
}

impl DownloadOperation {
    pub fn new(infos: Vec<DownloadInfo>) -> Self {
        let total_bytes = infos.iter().map(|info| info.size).sum();
        let total_count = infos.len();
        Self {
            core: OperationCore::new(),
            pending: infos.into(),
            active: Vec::new(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            max_concurrent: None,
            total_bytes,
            total_count,
        }
    }

    /// Override the configured concurrency limit.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max.max(1));
        self
    }

    /// A new batch for the failed files, carrying over the completed ones.
    pub fn retry(&self) -> DownloadOperation {
        let infos: Vec<_> = self.failed.iter().map(|f| f.info.clone()).collect();
        let mut op = DownloadOperation::new(infos);
        op.total_bytes += self.succeeded.iter().map(|info| info.size).sum::<u64>();
        op.total_count += self.succeeded.len();
        op.succeeded = self.succeeded.clone();
        op.max_concurrent = self.max_concurrent;
        op
    }

    pub fn succeeded(&self) -> &[DownloadInfo] {
        &self.succeeded
    }

    pub fn failed(&self) -> &[FailedDownload] {
        &self.failed
    }

    /// Sum of declared sizes, including files carried over by a retry.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn downloaded_bytes(&self) -> u64 {
        let done: u64 = self.succeeded.iter().map(|info| info.size).sum();
        done + self.active.iter().map(Download::bytes).sum::<u64>()
    }

    fn progress(&self) -> f32 {
        if self.total_bytes > 0 {
            self.downloaded_bytes() as f32 / self.total_bytes as f32
        } else if self.total_count > 0 {
            (self.succeeded.len() + self.failed.len()) as f32 / self.total_count as f32
        } else {
            1.0
        }
    }
}

impl Operation for DownloadOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn name(&self) -> &'static str {
        "download"
    }

    fn on_start(&mut self, cx: &mut OperationContext<'_>) {
        let max = self
            .max_concurrent
            .unwrap_or(cx.services.config.max_concurrent_downloads)
            .max(1);
        self.max_concurrent = Some(max);
        info!(
            files = self.pending.len(),
            bytes = self.total_bytes,
            max_concurrent = max,
            "starting downloads"
        );
    }

    fn on_update(&mut self, cx: &mut OperationContext<'_>) {
        profile_function!();

        let mut index = 0;
        while index < self.active.len() {
            match self.active[index].poll() {
                DownloadStatus::Successful => {
                    let download = self.active.swap_remove(index);
                    let info = download.into_info();
                    if let Some(bundle) = &info.bundle {
                        cx.services.resolver.mark_downloaded(bundle, info.path.clone());
                    }
                    debug!(url = %info.url, "file downloaded");
                    self.succeeded.push(info);
                }
                DownloadStatus::Failed => {
                    let download = self.active.swap_remove(index);
                    let error = download.error().unwrap_or("unknown error").to_string();
                    self.failed.push(FailedDownload {
                        info: download.into_info(),
                        error,
                    });
                }
                DownloadStatus::Pending | DownloadStatus::Running => index += 1,
            }
        }

        let max = self.max_concurrent.unwrap_or(1);
        while self.active.len() < max {
            let Some(info) = self.pending.pop_front() else {
                break;
            };
            let mut download = Download::new(info);
            download.start(&cx.services.transfers, cx.services.transport.clone());
            self.active.push(download);
        }

        let progress = self.progress();
        self.core.set_progress(progress);

        if self.pending.is_empty() && self.active.is_empty() {
            if self.failed.is_empty() {
                info!(files = self.succeeded.len(), "downloads complete");
                self.core.finish(None);
            } else {
                let message = format!(
                    "{} of {} downloads failed: {}",
                    self.failed.len(),
                    self.total_count,
                    self.failed[0].error
                );
                self.core.finish(Some(message));
            }
        }
    }
}
