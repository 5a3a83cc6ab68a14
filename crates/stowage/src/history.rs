//! Removal of stale downloaded content.

use std::fs;
use std::path::PathBuf;

use stowage_core::alloc::HashSet;
use tracing::{debug, info, warn};

use crate::error::StowageError;
use crate::operation::{Operation, OperationContext, OperationCore};

/// Deletes files in the download directory that the active catalog no longer
/// references.
///
/// Archives of registered bundles, the active manifest files and the version
/// file survive. Subdirectories are left alone.
pub struct ClearHistoryOperation {
    core: OperationCore,
    stale: Vec<PathBuf>,
    cursor: usize,
    removed: Vec<PathBuf>,
}

impl Default for ClearHistoryOperation {
    fn default() -> Self {
        Self::new()
    }
}

impl ClearHistoryOperation {
    pub fn new() -> Self {
        Self {
            core: OperationCore::new(),
            stale: Vec::new(),
            cursor: 0,
            removed: Vec::new(),
        }
    }

    /// Files deleted so far.
    pub fn removed(&self) -> &[PathBuf] {
        &self.removed
    }
}

impl Operation for ClearHistoryOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn name(&self) -> &'static str {
        "clear_history"
    }

    fn on_start(&mut self, cx: &mut OperationContext<'_>) {
        let services = &*cx.services;
        let Some(version) = services.catalog.version() else {
            let error = StowageError::invalid_state("catalog is not initialized");
            self.core.finish(Some(error.to_string()));
            return;
        };

        let mut keep: HashSet<String> = services.catalog.bundles().map(|b| b.save_name()).collect();
        keep.extend(version.manifests.iter().map(|m| m.file.clone()));
        keep.insert(services.config.version_file.clone());

        let dir = &services.config.download_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                self.core
                    .finish(Some(StowageError::io(dir.clone(), error).to_string()));
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !keep.contains(&name) {
                self.stale.push(path);
            }
        }
        self.stale.sort();
        debug!(stale = self.stale.len(), kept = keep.len(), "history scan finished");
    }

    fn on_update(&mut self, cx: &mut OperationContext<'_>) {
        while self.cursor < self.stale.len() {
            if cx.is_busy() {
                return;
            }
            let path = &self.stale[self.cursor];
            self.cursor += 1;
            match fs::remove_file(path) {
                Ok(()) => self.removed.push(path.clone()),
                Err(error) => warn!(path = %path.display(), %error, "failed to remove stale file"),
            }
            self.core
                .set_progress(self.cursor as f32 / self.stale.len() as f32);
        }
        info!(removed = self.removed.len(), "download history cleared");
        self.core.finish(None);
    }
}
