use std::io::{Read, Write};

use reqwest::{
    StatusCode,
    blocking::Client,
    header::{CONTENT_LENGTH, RANGE},
};
use tracing::{debug, trace};

use crate::{
    error::{NetError, NetResult},
    file::FileTransport,
    traits::Transport,
    types::{FetchRequest, NetOptions},
};

const CHUNK_SIZE: usize = 64 * 1024;

/// Blocking HTTP(S) transport backed by reqwest.
///
/// `file://` requests are served by [`FileTransport`] so a single transport
/// covers both remote content and build-in copies.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    file: FileTransport,
}

impl HttpTransport {
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent)
            .build()?;
        Ok(Self {
            client,
            file: FileTransport::new(),
        })
    }

    fn check_status(request: &FetchRequest, status: StatusCode) -> NetResult<()> {
        if status == StatusCode::NOT_FOUND {
            return Err(NetError::NotFound {
                url: request.url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(NetError::http_status(status.as_u16(), request.url.as_str()));
        }
        // A plain 200 for a non-zero range means the body starts at byte 0.
        if request.start_offset() > 0 && status != StatusCode::PARTIAL_CONTENT {
            return Err(NetError::RangeIgnored {
                url: request.url.to_string(),
            });
        }
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn fetch(
        &self,
        request: &FetchRequest,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64),
    ) -> NetResult<u64> {
        if request.url.scheme() == "file" {
            return self.file.fetch(request, sink, progress);
        }

        let mut builder = self.client.get(request.url.clone());
        if let Some(range) = &request.range {
            builder = builder.header(RANGE, range.to_header_value());
        }
        debug!(url = %request.url, range = ?request.range, "http fetch");

        let mut response = builder.send()?;
        Self::check_status(request, response.status())?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let read = response
                .read(&mut buf)
                .map_err(|err| NetError::Http(err.to_string()))?;
            if read == 0 {
                break;
            }
            sink.write_all(&buf[..read])?;
            written += read as u64;
            progress(written);
        }
        sink.flush()?;
        trace!(url = %request.url, bytes = written, "http fetch complete");
        Ok(written)
    }

    fn content_length(&self, request: &FetchRequest) -> NetResult<Option<u64>> {
        if request.url.scheme() == "file" {
            return self.file.content_length(request);
        }
        let response = self.client.head(request.url.clone()).send()?;
        Self::check_status(&FetchRequest::new(request.url.clone()), response.status())?;
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RangeSpec;
    use url::Url;

    fn request(range: Option<RangeSpec>) -> FetchRequest {
        let mut request = FetchRequest::new(Url::parse("http://cdn.example/a").unwrap());
        request.range = range;
        request
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            HttpTransport::check_status(&request(None), StatusCode::NOT_FOUND),
            Err(NetError::NotFound {
                url: "http://cdn.example/a".into()
            })
        );
        assert_eq!(
            HttpTransport::check_status(&request(None), StatusCode::BAD_GATEWAY)
                .unwrap_err()
                .status_code(),
            Some(502)
        );
        assert!(HttpTransport::check_status(&request(None), StatusCode::OK).is_ok());
    }

    #[test]
    fn test_ignored_range_is_detected() {
        let ranged = request(Some(RangeSpec::from_start(1000)));
        assert!(matches!(
            HttpTransport::check_status(&ranged, StatusCode::OK),
            Err(NetError::RangeIgnored { .. })
        ));
        assert!(HttpTransport::check_status(&ranged, StatusCode::PARTIAL_CONTENT).is_ok());
        // Range starting at zero is equivalent to the full body
        let zero = request(Some(RangeSpec::from_start(0)));
        assert!(HttpTransport::check_status(&zero, StatusCode::OK).is_ok());
    }

    #[test]
    fn test_file_urls_are_delegated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.json");
        std::fs::write(&path, b"{}").unwrap();

        let transport = HttpTransport::new(NetOptions::default()).unwrap();
        let mut out = Vec::new();
        let req = FetchRequest::new(Url::from_file_path(&path).unwrap());
        assert_eq!(transport.fetch(&req, &mut out, &mut |_| {}).unwrap(), 2);
        assert_eq!(transport.content_length(&req).unwrap(), Some(2));
    }
}
