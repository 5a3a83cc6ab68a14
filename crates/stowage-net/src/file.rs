use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    path::PathBuf,
};

use tracing::trace;

use crate::{
    error::{NetError, NetResult},
    traits::Transport,
    types::FetchRequest,
};

const CHUNK_SIZE: usize = 64 * 1024;

/// Serves `file://` URLs from the local file system.
///
/// Used to copy build-in content into the writable download directory
/// through the same code path as remote downloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTransport;

impl FileTransport {
    pub fn new() -> Self {
        Self
    }

    fn path_of(request: &FetchRequest) -> NetResult<PathBuf> {
        if request.url.scheme() != "file" {
            return Err(NetError::UnsupportedScheme(request.url.scheme().to_string()));
        }
        request
            .url
            .to_file_path()
            .map_err(|_| NetError::InvalidUrl(request.url.to_string()))
    }

    fn open(request: &FetchRequest) -> NetResult<File> {
        let path = Self::path_of(request)?;
        File::open(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => NetError::NotFound {
                url: request.url.to_string(),
            },
            _ => NetError::from(err),
        })
    }
}

impl Transport for FileTransport {
    fn fetch(
        &self,
        request: &FetchRequest,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64),
    ) -> NetResult<u64> {
        let mut file = Self::open(request)?;
        let start = request.start_offset();
        if start > 0 {
            file.seek(SeekFrom::Start(start))?;
        }
        let mut remaining = request
            .range
            .as_ref()
            .and_then(|range| range.end)
            .map(|end| end.saturating_sub(start) + 1);

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let want = match remaining {
                Some(0) => break,
                Some(left) => (left as usize).min(CHUNK_SIZE),
                None => CHUNK_SIZE,
            };
            let read = file.read(&mut buf[..want])?;
            if read == 0 {
                break;
            }
            sink.write_all(&buf[..read])?;
            written += read as u64;
            if let Some(left) = remaining.as_mut() {
                *left -= read as u64;
            }
            progress(written);
        }
        sink.flush()?;
        trace!(url = %request.url, bytes = written, "file fetch complete");
        Ok(written)
    }

    fn content_length(&self, request: &FetchRequest) -> NetResult<Option<u64>> {
        let file = Self::open(request)?;
        Ok(Some(file.metadata()?.len()))
    }
}
