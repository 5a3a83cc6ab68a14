//! Resumable single-file transfers and batch operations built on them.

mod operation;
mod size;

pub use operation::{DownloadOperation, FailedDownload};
pub use size::GetDownloadSizeOperation;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_executor::Task;
use stowage_net::{FetchRequest, NetError, RangeSpec, Transport, Url};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{StowageError, StowageResult};
use crate::manifest::BundleInfo;
use crate::task_pool::{TaskPool, poll_task};

/// One file to transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadInfo {
    pub url: Url,
    pub path: PathBuf,
    pub hash: String,
    /// Declared size, `0` when unknown.
    pub size: u64,
    /// Not content addressed: partial data is never trusted.
    pub raw_file: bool,
    /// Bundle whose resolution should point at `path` once complete.
    pub bundle: Option<String>,
}

impl DownloadInfo {
    pub fn new(url: Url, path: impl Into<PathBuf>) -> Self {
        Self {
            url,
            path: path.into(),
            hash: String::new(),
            size: 0,
            raw_file: false,
            bundle: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = hash.into();
        self
    }

    pub fn raw(mut self, raw_file: bool) -> Self {
        self.raw_file = raw_file;
        self
    }

    /// Transfer of `info` from `url` into the download directory.
    pub fn for_bundle(info: &BundleInfo, url: Url, config: &EngineConfig) -> Self {
        Self {
            url,
            path: config.download_path(&info.save_name()),
            hash: info.hash.clone(),
            size: info.size,
            raw_file: info.raw_file,
            bundle: Some(info.name.clone()),
        }
    }

    /// Bytes already on disk that a transfer would keep.
    pub fn resumable_bytes(&self) -> u64 {
        if self.raw_file {
            return 0;
        }
        let on_disk = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if self.size > 0 && on_disk > self.size {
            0
        } else {
            on_disk
        }
    }

    /// Bytes a transfer still has to fetch.
    pub fn remaining_bytes(&self) -> u64 {
        self.size.saturating_sub(self.resumable_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Running,
    Successful,
    Failed,
}

impl DownloadStatus {
    pub fn is_done(self) -> bool {
        matches!(self, DownloadStatus::Successful | DownloadStatus::Failed)
    }
}

/// A single transfer running on the I/O pool.
pub struct Download {
    info: DownloadInfo,
    status: DownloadStatus,
    transferred: Arc<AtomicU64>,
    task: Option<Task<Result<u64, String>>>,
    error: Option<String>,
}

impl Download {
    pub fn new(info: DownloadInfo) -> Self {
        Self {
            info,
            status: DownloadStatus::Pending,
            transferred: Arc::new(AtomicU64::new(0)),
            task: None,
            error: None,
        }
    }

    pub fn start(&mut self, pool: &TaskPool, transport: Arc<dyn Transport>) {
        if self.status != DownloadStatus::Pending {
            return;
        }
        let info = self.info.clone();
        let counter = self.transferred.clone();
        self.task = Some(pool.spawn_blocking(move || {
            transfer(&info, transport.as_ref(), &counter).map_err(|e| e.to_string())
        }));
        self.status = DownloadStatus::Running;
    }

    /// Advance without blocking and report the current status.
    pub fn poll(&mut self) -> DownloadStatus {
        if self.status != DownloadStatus::Running {
            return self.status;
        }
        let Some(task) = self.task.as_mut() else {
            return self.status;
        };
        if let Some(result) = poll_task(task) {
            self.task = None;
            match result {
                Ok(len) => {
                    self.transferred.store(len, Ordering::Relaxed);
                    self.status = DownloadStatus::Successful;
                }
                Err(error) => {
                    warn!(url = %self.info.url, %error, "download failed");
                    self.error = Some(error);
                    self.status = DownloadStatus::Failed;
                }
            }
        }
        self.status
    }

    pub fn info(&self) -> &DownloadInfo {
        &self.info
    }

    pub fn into_info(self) -> DownloadInfo {
        self.info
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Bytes of the file present so far, never above the declared size.
    pub fn bytes(&self) -> u64 {
        let bytes = self.transferred.load(Ordering::Relaxed);
        if self.info.size > 0 {
            bytes.min(self.info.size)
        } else {
            bytes
        }
    }

    /// Fraction complete; unknown sizes report 0 until done.
    pub fn fraction(&self) -> f32 {
        if self.status == DownloadStatus::Successful {
            1.0
        } else if self.info.size == 0 {
            0.0
        } else {
            self.bytes() as f32 / self.info.size as f32
        }
    }
}

/// Blocking transfer of one file, resuming where the content allows.
///
/// Returns the final file length.
pub fn transfer(info: &DownloadInfo, transport: &dyn Transport, counter: &AtomicU64) -> StowageResult<u64> {
    if let Some(parent) = info.path.parent() {
        fs::create_dir_all(parent).map_err(|e| StowageError::io(parent, e))?;
    }

    if info.raw_file && info.path.exists() {
        debug!(path = %info.path.display(), "raw file restarts from zero");
        remove(&info.path)?;
    }
    let mut start = info.resumable_bytes();
    if start == 0 && info.path.exists() {
        remove(&info.path)?;
    }
    if info.size > 0 && start == info.size {
        counter.store(start, Ordering::Relaxed);
        debug!(path = %info.path.display(), "already complete");
        return Ok(start);
    }
    if start > 0 {
        info!(url = %info.url, offset = start, size = info.size, "resuming download");
    }

    let written = match fetch_from(info, transport, counter, start) {
        Err(StowageError::Net(NetError::RangeIgnored { .. })) => {
            warn!(url = %info.url, "range ignored by server, restarting");
            remove(&info.path)?;
            start = 0;
            fetch_from(info, transport, counter, 0)?
        }
        other => other?,
    };

    let len = start + written;
    if info.size > 0 && len != info.size {
        return Err(StowageError::invalid_state(format!(
            "size mismatch for {}: expected {} bytes, got {}",
            info.path.display(),
            info.size,
            len
        )));
    }
    debug!(url = %info.url, bytes = len, "download complete");
    Ok(len)
}

fn fetch_from(
    info: &DownloadInfo,
    transport: &dyn Transport,
    counter: &AtomicU64,
    start: u64,
) -> StowageResult<u64> {
    let file = open_for(&info.path, start)?;
    let mut sink = BufWriter::new(file);
    let mut request = FetchRequest::new(info.url.clone());
    if start > 0 {
        request = request.with_range(RangeSpec::from_start(start));
    }
    counter.store(start, Ordering::Relaxed);
    let written = transport.fetch(&request, &mut sink, &mut |bytes| {
        counter.store(start + bytes, Ordering::Relaxed);
    })?;
    sink.flush().map_err(|e| StowageError::io(&info.path, e))?;
    Ok(written)
}

fn open_for(path: &Path, start: u64) -> StowageResult<File> {
    let result = if start > 0 {
        OpenOptions::new().append(true).open(path)
    } else {
        File::create(path)
    };
    result.map_err(|e| StowageError::io(path, e))
}

fn remove(path: &Path) -> StowageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StowageError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use stowage_net::NetResult;

    /// Serves a fixed body and records requested ranges.
    struct Body {
        bytes: Vec<u8>,
        ignore_ranges: bool,
        ranges: Mutex<Vec<Option<RangeSpec>>>,
    }

    impl Body {
        fn new(len: usize) -> Self {
            Self {
                bytes: (0..len).map(|i| i as u8).collect(),
                ignore_ranges: false,
                ranges: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for Body {
        fn fetch(
            &self,
            request: &FetchRequest,
            sink: &mut dyn Write,
            progress: &mut dyn FnMut(u64),
        ) -> NetResult<u64> {
            self.ranges.lock().unwrap().push(request.range.clone());
            let start = request.start_offset() as usize;
            if start > 0 && self.ignore_ranges {
                return Err(NetError::RangeIgnored {
                    url: request.url.to_string(),
                });
            }
            let body = &self.bytes[start..];
            sink.write_all(body)?;
            progress(body.len() as u64);
            Ok(body.len() as u64)
        }
    }

    fn info(dir: &Path, size: u64) -> DownloadInfo {
        DownloadInfo::new(Url::parse("https://cdn.example/a_ff").unwrap(), dir.join("a_ff")).with_size(size)
    }

    #[test]
    fn test_fresh_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let body = Body::new(64);
        let counter = AtomicU64::new(0);
        let len = transfer(&info(dir.path(), 64), &body, &counter).unwrap();
        assert_eq!(len, 64);
        assert_eq!(counter.load(Ordering::Relaxed), 64);
        assert_eq!(fs::read(dir.path().join("a_ff")).unwrap(), body.bytes);
        assert_eq!(*body.ranges.lock().unwrap(), vec![None]);
    }

    #[test]
    fn test_range_ignored_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = Body::new(64);
        body.ignore_ranges = true;
        fs::write(dir.path().join("a_ff"), &body.bytes[..10]).unwrap();

        let len = transfer(&info(dir.path(), 64), &body, &AtomicU64::new(0)).unwrap();
        assert_eq!(len, 64);
        assert_eq!(fs::read(dir.path().join("a_ff")).unwrap(), body.bytes);
        assert_eq!(
            *body.ranges.lock().unwrap(),
            vec![Some(RangeSpec::from_start(10)), None]
        );
    }

    #[test]
    fn test_complete_file_is_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let body = Body::new(64);
        fs::write(dir.path().join("a_ff"), &body.bytes).unwrap();
        assert_eq!(transfer(&info(dir.path(), 64), &body, &AtomicU64::new(0)).unwrap(), 64);
        assert!(body.ranges.lock().unwrap().is_empty());
    }

    #[test]
    fn test_oversized_partial_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let body = Body::new(64);
        fs::write(dir.path().join("a_ff"), vec![9u8; 100]).unwrap();
        assert_eq!(transfer(&info(dir.path(), 64), &body, &AtomicU64::new(0)).unwrap(), 64);
        assert_eq!(*body.ranges.lock().unwrap(), vec![None]);
    }

    #[test]
    fn test_size_mismatch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let body = Body::new(10);
        let err = transfer(&info(dir.path(), 64), &body, &AtomicU64::new(0)).unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
    }

    #[test]
    fn test_remaining_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let archive = info(dir.path(), 5000);
        fs::write(&archive.path, vec![0u8; 1000]).unwrap();
        assert_eq!(archive.remaining_bytes(), 4000);
        assert_eq!(archive.clone().raw(true).remaining_bytes(), 5000);
    }
}
