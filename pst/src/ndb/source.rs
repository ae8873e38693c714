//! Byte sources for the page store.
//!
//! The reader never interprets bytes here; it only asks for ranges. Both
//! implementations take `&self` so one open store can be shared by many
//! threads without a lock around the file cursor (on unix).

use std::fs::File;
#[cfg(not(unix))]
use std::io::{Read, Seek, SeekFrom};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::Path;
#[cfg(not(unix))]
use std::sync::Mutex;

use crate::error::Error;

/// Random-access byte source.
///
/// # Implementation Notes
///
/// Implementations must:
/// - return exactly `len` bytes or an `IoFault`
/// - be safe to call concurrently from several threads
pub trait ReadRange: Send + Sync {
    /// Read `len` bytes starting at `offset`.
    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error>;

    /// Total size of the source in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn out_of_bounds(offset: u64, len: usize, total: u64) -> Error {
    Error::IoFault {
        offset,
        len,
        source: std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("range ends past end of source ({total} bytes)"),
        ),
    }
}

/// A store file on disk.
pub struct FileSource {
    #[cfg(unix)]
    file: File,
    #[cfg(not(unix))]
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    /// Open a file for reading.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|source| Error::IoFault {
            offset: 0,
            len: 0,
            source,
        })?;
        let len = file
            .metadata()
            .map_err(|source| Error::IoFault {
                offset: 0,
                len: 0,
                source,
            })?
            .len();

        Ok(Self {
            #[cfg(unix)]
            file,
            #[cfg(not(unix))]
            file: Mutex::new(file),
            len,
        })
    }
}

impl ReadRange for FileSource {
    /// Uses `pread` on unix, which leaves the file cursor alone.
    #[cfg(unix)]
    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        if offset.saturating_add(len as u64) > self.len {
            return Err(out_of_bounds(offset, len, self.len));
        }
        let mut buf = vec![0u8; len];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|source| Error::IoFault {
                offset,
                len,
                source,
            })?;
        Ok(buf)
    }

    #[cfg(not(unix))]
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        if offset.saturating_add(len as u64) > self.len {
            return Err(out_of_bounds(offset, len, self.len));
        }
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().expect("lock poisoned");
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|source| Error::IoFault {
                offset,
                len,
                source,
            })?;
        Ok(buf)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// An in-memory byte source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    bytes: Vec<u8>,
}

impl MemorySource {
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ReadRange for MemorySource {
    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        let total = self.bytes.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > total {
            return Err(out_of_bounds(offset, len, total));
        }
        #[allow(clippy::cast_possible_truncation)] // bounded by the buffer length
        let range = offset as usize..end as usize;
        Ok(self.bytes[range].to_vec())
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}
