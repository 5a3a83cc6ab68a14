//! Archive byte obfuscation.
//!
//! Archives may carry a fixed leading offset and a repeating XOR stream keyed
//! by a per-archive selector. This hides content from casual inspection and
//! is not a cryptographic guarantee.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::config::EngineConfig;
use crate::error::{StowageError, StowageResult};
use crate::manifest::BundleInfo;

pub const BUNDLE_KEY: [u8; 32] = [
    0x5a, 0x13, 0xc7, 0x8e, 0x21, 0xf4, 0x9b, 0x06, 0x3d, 0xa2, 0x71, 0xe8, 0x4f, 0xb5, 0x1c, 0x97,
    0x62, 0x0b, 0xd9, 0x35, 0xae, 0x48, 0xf1, 0x7c, 0x03, 0xbe, 0x56, 0xe2, 0x29, 0x8d, 0xc4, 0x6f,
];

/// Key index derived from the archive hash: sum of the bytes of the first
/// half of the uppercase hash, modulo the key length.
pub fn selector_for(hash: &str) -> usize {
    let upper = hash.to_ascii_uppercase();
    let half = &upper.as_bytes()[..upper.len() / 2];
    half.iter().map(|&b| b as usize).sum::<usize>() % BUNDLE_KEY.len()
}

/// How the physical bytes of one archive map to its logical bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadMode {
    pub offset: u64,
    pub selector: Option<usize>,
}

impl ReadMode {
    /// Bytes are read as they are on disk.
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn for_bundle(info: &BundleInfo, config: &EngineConfig) -> Self {
        if info.raw_file {
            return Self::plain();
        }
        Self {
            offset: config.byte_offset(),
            selector: config.uses_cipher().then(|| selector_for(&info.hash)),
        }
    }
}

/// Reader presenting the logical bytes of an archive stored with `mode`.
pub struct BundleReader<R> {
    inner: R,
    mode: ReadMode,
    position: u64,
    started: bool,
}

impl<R: Read + Seek> BundleReader<R> {
    pub fn new(inner: R, mode: ReadMode) -> Self {
        Self {
            inner,
            mode,
            position: 0,
            started: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn ensure_started(&mut self) -> io::Result<()> {
        if !self.started {
            self.inner.seek(SeekFrom::Start(self.mode.offset))?;
            self.started = true;
        }
        Ok(())
    }
}

impl<R: Read + Seek> Read for BundleReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_started()?;
        let read = self.inner.read(buf)?;
        if let Some(selector) = self.mode.selector {
            apply_key(&mut buf[..read], selector, self.position);
        }
        self.position += read as u64;
        Ok(read)
    }
}

impl<R: Read + Seek> Seek for BundleReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let physical = match pos {
            SeekFrom::Start(n) => self.inner.seek(SeekFrom::Start(n + self.mode.offset))?,
            SeekFrom::Current(delta) => {
                let target = self.position as i64 + delta;
                if target < 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "seek before start of archive",
                    ));
                }
                self.inner
                    .seek(SeekFrom::Start(target as u64 + self.mode.offset))?
            }
            SeekFrom::End(delta) => self.inner.seek(SeekFrom::End(delta))?,
        };
        if physical < self.mode.offset {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek into archive header",
            ));
        }
        self.started = true;
        self.position = physical - self.mode.offset;
        Ok(self.position)
    }
}

fn apply_key(bytes: &mut [u8], selector: usize, position: u64) {
    let len = BUNDLE_KEY.len();
    let start = (selector + (position % len as u64) as usize) % len;
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte ^= BUNDLE_KEY[(start + i) % len];
    }
}

/// Produce the physical bytes for `plain` under `mode`.
pub fn encode_bundle(plain: &[u8], mode: ReadMode) -> Vec<u8> {
    let mut out = vec![0u8; mode.offset as usize];
    let start = out.len();
    out.extend_from_slice(plain);
    if let Some(selector) = mode.selector {
        apply_key(&mut out[start..], selector, 0);
    }
    out
}

/// Read the logical bytes of the archive stored at `path`.
pub fn read_bundle(path: &Path, mode: ReadMode) -> StowageResult<Vec<u8>> {
    let file = File::open(path).map_err(|e| StowageError::io(path, e))?;
    let capacity = file
        .metadata()
        .map(|m| m.len().saturating_sub(mode.offset) as usize)
        .unwrap_or(0);
    let mut reader = BundleReader::new(BufReader::new(file), mode);
    let mut bytes = Vec::with_capacity(capacity);
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| StowageError::io(path, e))?;
    Ok(bytes)
}
