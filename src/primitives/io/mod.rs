#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::types::{KestrelError, Result};

/// Positioned I/O over a flat byte file.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from offset `off`; short reads are `UnexpectedEof`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at offset `off`, extending the file if needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Synchronizes file contents to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current length in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// File-backed [`FileIo`] using `pread`/`pwrite` style calls.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens or creates `path` for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }

    #[cfg(unix)]
    fn read_chunk(&self, dst: &mut [u8], off: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self.inner.as_ref(), dst, off)
    }

    #[cfg(unix)]
    fn write_chunk(&self, src: &[u8], off: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self.inner.as_ref(), src, off)
    }

    #[cfg(windows)]
    fn read_chunk(&self, dst: &mut [u8], off: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self.inner.as_ref(), dst, off)
    }

    #[cfg(windows)]
    fn write_chunk(&self, src: &[u8], off: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(self.inner.as_ref(), src, off)
    }

    #[cfg(not(any(unix, windows)))]
    fn read_chunk(&self, _dst: &mut [u8], _off: u64) -> io::Result<usize> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn write_chunk(&self, _src: &[u8], _off: u64) -> io::Result<usize> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        while !dst.is_empty() {
            let read = self.read_chunk(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(ErrorKind::UnexpectedEof, "read_at reached EOF").into());
            }
            dst = &mut std::mem::take(&mut dst)[read..];
            off += read as u64;
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            let written = self.write_chunk(src, off)?;
            if written == 0 {
                return Err(io::Error::new(ErrorKind::WriteZero, "write_at wrote zero bytes").into());
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all().map_err(KestrelError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }
}

/// In-memory [`FileIo`], mainly for tests. Counts writes.
#[derive(Default)]
pub struct MemoryIo {
    bytes: Mutex<Vec<u8>>,
    writes: AtomicU64,
    syncs: AtomicU64,
}

impl MemoryIo {
    /// Creates an empty in-memory file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `write_at` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of `sync_all` calls so far.
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    /// Copy of the whole file contents.
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl FileIo for MemoryIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let start = usize::try_from(off).map_err(|_| KestrelError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(dst.len())
            .ok_or(KestrelError::Invalid("offset overflow"))?;
        if end > bytes.len() {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "read past end of memory file").into());
        }
        dst.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let start = usize::try_from(off).map_err(|_| KestrelError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(src.len())
            .ok_or(KestrelError::Invalid("offset overflow"))?;
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(src);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.lock().len() as u64)
    }
}
