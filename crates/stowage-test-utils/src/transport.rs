//! Scripted in-memory transport.

use std::collections::{HashMap, HashSet};
use std::io::Write;

use parking_lot::{Condvar, Mutex};
use stowage_net::{FetchRequest, FileTransport, NetError, NetResult, RangeSpec, Transport};

/// One call to [`Transport::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub range: Option<RangeSpec>,
    /// Body bytes written, `0` for failed requests.
    pub bytes: u64,
}

#[derive(Default)]
struct State {
    files: HashMap<String, Vec<u8>>,
    failures: HashMap<String, u32>,
    requests: Vec<RecordedRequest>,
    ignore_ranges: bool,
    held: HashSet<String>,
    waiting: usize,
}

/// Serves registered bodies by URL and records every request.
///
/// `file://` URLs are served from disk through [`FileTransport`] and are
/// recorded as well.
///
/// # Example
///
/// ```rust
/// use stowage_net::{FetchRequest, Transport, Url};
/// use stowage_test_utils::MockTransport;
///
/// let transport = MockTransport::new();
/// transport.insert("http://cdn.test/a", b"hello".to_vec());
///
/// let mut body = Vec::new();
/// let request = FetchRequest::new(Url::parse("http://cdn.test/a").unwrap());
/// transport.fetch(&request, &mut body, &mut |_| {}).unwrap();
/// assert_eq!(body, b"hello");
/// assert_eq!(transport.fetch_count("http://cdn.test/a"), 1);
/// ```
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<State>,
    released: Condvar,
    file: FileTransport,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`.
    pub fn insert(&self, url: impl Into<String>, body: Vec<u8>) {
        self.state.lock().files.insert(url.into(), body);
    }

    pub fn remove(&self, url: &str) {
        self.state.lock().files.remove(url);
    }

    /// Answer the next `times` requests for `url` with HTTP 503.
    pub fn fail(&self, url: impl Into<String>, times: u32) {
        self.state.lock().failures.insert(url.into(), times);
    }

    /// Behave like a server that does not support range requests.
    pub fn ignore_ranges(&self, ignore: bool) {
        self.state.lock().ignore_ranges = ignore;
    }

    /// Block fetches of `url` on the calling thread until released.
    pub fn hold(&self, url: impl Into<String>) {
        self.state.lock().held.insert(url.into());
    }

    pub fn release(&self, url: &str) {
        self.state.lock().held.remove(url);
        self.released.notify_all();
    }

    pub fn release_all(&self) {
        self.state.lock().held.clear();
        self.released.notify_all();
    }

    /// Fetches currently blocked by [`MockTransport::hold`].
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn requests_for(&self, url: &str) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.state.lock().requests.iter().filter(|r| r.url == url).count()
    }

    /// Requests that did not use the `file` scheme.
    pub fn remote_requests(&self) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| !r.url.starts_with("file:"))
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    fn record(&self, request: &FetchRequest, bytes: u64) {
        self.state.lock().requests.push(RecordedRequest {
            url: request.url.to_string(),
            range: request.range.clone(),
            bytes,
        });
    }

    fn serve(&self, request: &FetchRequest) -> NetResult<Vec<u8>> {
        let url = request.url.to_string();
        let mut state = self.state.lock();
        if state.held.contains(&url) {
            state.waiting += 1;
            while state.held.contains(&url) {
                self.released.wait(&mut state);
            }
            state.waiting -= 1;
        }
        if let Some(remaining) = state.failures.get_mut(&url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NetError::http_status(503, url));
            }
        }
        let body = state
            .files
            .get(&url)
            .ok_or_else(|| NetError::NotFound { url: url.clone() })?;

        let start = request.start_offset();
        if start > 0 && state.ignore_ranges {
            return Err(NetError::RangeIgnored { url });
        }
        let len = body.len() as u64;
        let end = request
            .range
            .as_ref()
            .and_then(|r| r.end)
            .map(|end| (end + 1).min(len))
            .unwrap_or(len);
        if start > end {
            return Err(NetError::http_status(416, url));
        }
        Ok(body[start as usize..end as usize].to_vec())
    }
}

impl Transport for MockTransport {
    fn fetch(
        &self,
        request: &FetchRequest,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64),
    ) -> NetResult<u64> {
        if request.url.scheme() == "file" {
            let result = self.file.fetch(request, sink, progress);
            self.record(request, *result.as_ref().unwrap_or(&0));
            return result;
        }

        let body = match self.serve(request) {
            Ok(body) => body,
            Err(error) => {
                self.record(request, 0);
                return Err(error);
            }
        };
        sink.write_all(&body)?;
        let written = body.len() as u64;
        progress(written);
        self.record(request, written);
        Ok(written)
    }

    fn content_length(&self, request: &FetchRequest) -> NetResult<Option<u64>> {
        let state = self.state.lock();
        Ok(state.files.get(request.url.as_str()).map(|b| b.len() as u64))
    }
}
