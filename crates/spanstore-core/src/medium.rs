//! Byte-addressable backing media.
//!
//! The store owns all format interpretation; a [`Medium`] only moves bytes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

/// A linear, randomly addressable byte store.
///
/// Implementations must satisfy:
/// - `read_exact_at` fills the whole buffer or fails with
///   [`io::ErrorKind::UnexpectedEof`]; it never returns short.
/// - `write_all_at` past the current end extends the medium.
/// - `sync` returns only once previous writes are as durable as the medium
///   can make them.
pub trait Medium {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Current size in bytes.
    fn len(&self) -> io::Result<u64>;

    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Resize to `len` bytes. Media that cannot shrink may ignore a smaller size.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    fn sync(&mut self) -> io::Result<()>;

    fn read_vec_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Big-endian u64 at `offset`.
    fn read_u64_at(&self, offset: u64) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn write_u64_at(&mut self, offset: u64, value: u64) -> io::Result<()> {
        self.write_all_at(offset, &value.to_be_bytes())
    }
}

fn lock_err() -> io::Error {
    io::Error::other("medium lock poisoned")
}

fn to_usize(value: u64) -> io::Result<usize> {
    usize::try_from(value)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset exceeds address space"))
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// A medium backed by a file on disk.
#[derive(Debug)]
pub struct FileMedium {
    file: File,
    path: Option<PathBuf>,
}

impl FileMedium {
    /// Open a file for reading and writing, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        debug!(path = %path.display(), "opened file medium");
        Ok(Self {
            file,
            path: Some(path.to_path_buf()),
        })
    }

    /// Wrap an already open file.
    pub fn from_file(file: File) -> Self {
        Self { file, path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

impl Medium for FileMedium {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// An in-memory medium.
///
/// Clones are further handles onto the same bytes, so two stores can be
/// opened over one `MemoryMedium` the way two handles open one file.
#[derive(Clone, Default)]
pub struct MemoryMedium {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> io::Result<Vec<u8>> {
        Ok(self.bytes.read().map_err(|_| lock_err())?.clone())
    }
}

impl Medium for MemoryMedium {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let bytes = self.bytes.read().map_err(|_| lock_err())?;
        let start = to_usize(offset)?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of medium")
            })?;
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut bytes = self.bytes.write().map_err(|_| lock_err())?;
        let start = to_usize(offset)?;
        let end = start.checked_add(data.len()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "write overflows address space")
        })?;
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.bytes.read().map_err(|_| lock_err())?.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = to_usize(len)?;
        self.bytes.write().map_err(|_| lock_err())?.resize(len, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for MemoryMedium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.len().unwrap_or_default();
        f.debug_struct("MemoryMedium").field("len", &len).finish()
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// A medium over any seekable read/write stream.
///
/// Streams cannot be truncated, so shrinking is ignored; the store simply
/// stops referencing the tail.
#[derive(Debug)]
pub struct StreamMedium<S> {
    inner: Mutex<S>,
}

impl<S: Read + Write + Seek> StreamMedium<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: Mutex::new(stream),
        }
    }

    pub fn into_inner(self) -> io::Result<S> {
        self.inner.into_inner().map_err(|_| lock_err())
    }
}

impl<S: Read + Write + Seek> Medium for StreamMedium<S> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut stream = self.inner.lock().map_err(|_| lock_err())?;
        stream.seek(SeekFrom::Start(offset))?;
        stream.read_exact(buf)
    }

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let stream = self.inner.get_mut().map_err(|_| lock_err())?;
        stream.seek(SeekFrom::Start(offset))?;
        stream.write_all(data)
    }

    fn len(&self) -> io::Result<u64> {
        let mut stream = self.inner.lock().map_err(|_| lock_err())?;
        stream.seek(SeekFrom::End(0))
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let current = self.len()?;
        if len > current {
            let zeros = vec![0u8; to_usize(len - current)?];
            self.write_all_at(current, &zeros)?;
        } else if len < current {
            debug!(current, requested = len, "stream medium cannot shrink, ignoring");
        }
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.inner.get_mut().map_err(|_| lock_err())?.flush()
    }
}
