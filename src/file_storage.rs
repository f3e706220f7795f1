use crate::checksum::Crc32;
use crate::error::{EbmlError, Result};
use crate::storage::{Backend, Receipt, Storage};

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const DEFAULT_CACHE_SIZE: usize = 4096;
const CHECKSUM_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
    /// Creates the file, truncating any existing content.
    Create,
}

impl AccessMode {
    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Self::Read => options.read(true),
            Self::ReadWrite => options.read(true).write(true),
            Self::Create => options.read(true).write(true).create(true).truncate(true),
        };
        options
    }

    fn writable(self) -> bool {
        self != Self::Read
    }
}

// window of file content starting at `start`
#[derive(Debug)]
struct WindowCache {
    start: u64,
    data: Vec<u8>,
    capacity: usize,
    reached_eof: bool,
}

impl WindowCache {
    fn new(capacity: usize) -> Self {
        Self {
            start: 0,
            data: Vec::with_capacity(capacity),
            capacity,
            reached_eof: false,
        }
    }

    fn invalidate(&mut self) {
        self.data.clear();
        self.reached_eof = false;
    }

    fn get(&self, position: u64, len: usize) -> Option<&[u8]> {
        let end = self.start + self.data.len() as u64;
        if self.data.is_empty() || position < self.start || position > end {
            return None;
        }
        let offset = (position - self.start) as usize;
        let available = self.data.len() - offset;
        if available >= len {
            Some(&self.data[offset..offset + len])
        } else if self.reached_eof {
            Some(&self.data[offset..])
        } else {
            None
        }
    }
}

fn read_full(file: &mut File, position: u64, dst: &mut [u8]) -> io::Result<usize> {
    file.seek(SeekFrom::Start(position))?;
    let mut filled = 0;
    while filled < dst.len() {
        match file.read(&mut dst[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[derive(Debug)]
struct FileBackend {
    file: Option<File>,
    path: PathBuf,
    mode: AccessMode,
    cursor: u64,
    session: u64,
    cache: WindowCache,
}

impl FileBackend {
    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(EbmlError::Closed)
    }

    fn read_at(&mut self, position: u64, dst: &mut [u8]) -> Result<usize> {
        let file = self.file.as_mut().ok_or(EbmlError::Closed)?;
        let cache = &mut self.cache;
        if dst.len() >= cache.capacity {
            return read_full(file, position, dst).map_err(EbmlError::io("read"));
        }

        if cache.get(position, dst.len()).is_none() {
            cache.data.resize(cache.capacity, 0);
            let filled = match read_full(file, position, &mut cache.data) {
                Ok(filled) => filled,
                Err(e) => {
                    cache.invalidate();
                    return Err(EbmlError::io("read")(e));
                }
            };
            cache.data.truncate(filled);
            cache.start = position;
            cache.reached_eof = filled < cache.capacity;
        }

        let cached = cache.get(position, dst.len()).unwrap_or(&[]);
        let n = cached.len();
        dst[..n].copy_from_slice(cached);
        Ok(n)
    }
}

impl Backend for FileBackend {
    fn write_at(&mut self, position: u64, bytes: &[u8]) -> Result<()> {
        if !self.mode.writable() {
            return Err(EbmlError::Io {
                op: "write",
                source: io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "storage was opened read-only",
                ),
            });
        }
        self.cache.invalidate();
        let file = self.file()?;
        file.seek(SeekFrom::Start(position))
            .and_then(|_| file.write_all(bytes))
            .map_err(EbmlError::io("write"))
    }

    fn session(&self) -> u64 {
        self.session
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// File-backed storage. Clones share one handle: closing or reopening any clone affects all.
#[derive(Debug, Clone)]
pub struct FileStorage {
    inner: Rc<RefCell<FileBackend>>,
}

impl FileStorage {
    pub fn open<P: AsRef<Path>>(path: P, mode: AccessMode) -> Result<Self> {
        Self::open_with_cache(path, mode, DEFAULT_CACHE_SIZE)
    }

    pub fn open_with_cache<P: AsRef<Path>>(
        path: P,
        mode: AccessMode,
        cache_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = mode.options().open(&path).map_err(EbmlError::io("open"))?;
        log::debug!("EBML: opened {} ({:?})", path.display(), mode);

        Ok(Self {
            inner: Rc::new(RefCell::new(FileBackend {
                file: Some(file),
                path,
                mode,
                cursor: 0,
                session: 0,
                cache: WindowCache::new(std::cmp::max(1, cache_size)),
            })),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.inner.borrow().path.clone()
    }

    pub fn mode(&self) -> AccessMode {
        self.inner.borrow().mode
    }

    pub fn is_open(&self) -> bool {
        self.inner.borrow().is_open()
    }

    /// Flushes and releases the file; receipts issued so far go stale.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.cache.invalidate();
        if let Some(mut file) = inner.file.take() {
            file.flush().map_err(EbmlError::io("close"))?;
            log::debug!("EBML: closed {}", inner.path.display());
        }
        Ok(())
    }

    /// Opens the same path again in a new session, rewinding the cursor.
    pub fn reopen(&self, mode: AccessMode) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let file = mode.options().open(&inner.path).map_err(EbmlError::io("open"))?;
        inner.file = Some(file);
        inner.mode = mode;
        inner.cursor = 0;
        inner.session += 1;
        inner.cache.invalidate();
        log::debug!(
            "EBML: reopened {} ({:?}, session {})",
            inner.path.display(),
            mode,
            inner.session
        );
        Ok(())
    }

    /// CRC-32 over `len` bytes starting at `start`; the cursor does not move.
    pub fn checksum_range(&self, start: u64, len: u64) -> Result<u32> {
        let mut inner = self.inner.borrow_mut();
        let file = inner.file()?;
        let mut crc = Crc32::new();
        let mut chunk = vec![0u8; CHECKSUM_CHUNK];
        let mut done = 0u64;
        while done < len {
            let want = std::cmp::min(CHECKSUM_CHUNK as u64, len - done) as usize;
            let n = read_full(file, start + done, &mut chunk[..want]).map_err(EbmlError::io("checksum"))?;
            if n < want {
                return Err(EbmlError::Io {
                    op: "checksum",
                    source: io::Error::new(io::ErrorKind::UnexpectedEof, "range ends past the end of the file"),
                });
            }
            crc.update(&chunk[..n]);
            done += n as u64;
        }
        Ok(crc.finalize())
    }
}

impl Storage for FileStorage {
    fn save(&mut self, bytes: &[u8]) -> Result<Receipt> {
        let position = {
            let mut inner = self.inner.borrow_mut();
            let position = inner.cursor;
            inner.write_at(position, bytes)?;
            inner.cursor += bytes.len() as u64;
            position
        };

        Ok(Receipt::new(&self.inner, position, bytes.len() as u64))
    }

    fn load(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.borrow_mut();
        let position = inner.cursor;
        let n = inner.read_at(position, dst)?;
        inner.cursor += n as u64;
        Ok(n)
    }

    fn peek(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.borrow_mut();
        let position = inner.cursor;
        inner.read_at(position, dst)
    }

    fn position(&self) -> u64 {
        self.inner.borrow().cursor
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.file()?;
        inner.cursor = position;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let inner = self.inner.borrow();
        let file = inner.file.as_ref().ok_or(EbmlError::Closed)?;
        file.metadata()
            .map(|metadata| metadata.len())
            .map_err(EbmlError::io("size"))
    }

    fn set_size(&mut self, size: u64) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.mode.writable() {
            return Err(EbmlError::Io {
                op: "set_size",
                source: io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "storage was opened read-only",
                ),
            });
        }
        inner.cache.invalidate();
        inner.file()?.set_len(size).map_err(EbmlError::io("set_size"))
    }

    fn receipt(&self, position: u64, length: u64) -> Result<Receipt> {
        if !self.inner.borrow().is_open() {
            return Err(EbmlError::Closed);
        }
        Ok(Receipt::new(&self.inner, position, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;
    use rstest::*;

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.mkv");
        (dir, path)
    }

    #[test]
    fn test_write_then_read_back() {
        let (_dir, path) = scratch();
        let mut storage = FileStorage::open(&path, AccessMode::Create).unwrap();
        storage.save(b"hello, world").unwrap();
        storage.close().unwrap();

        let mut storage = FileStorage::open(&path, AccessMode::Read).unwrap();
        let mut buffer = [0u8; 5];
        assert_eq!(storage.peek(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer, b"hello");
        assert_eq!(storage.position(), 0);
        assert_eq!(storage.load(&mut buffer).unwrap(), 5);
        assert_eq!(storage.position(), 5);
        assert_eq!(storage.size().unwrap(), 12);
    }

    #[rstest(name, case("ünïcødé.mkv"), case("日本語 track.webm"))]
    fn test_non_ascii_path(name: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut storage = FileStorage::open(&path, AccessMode::Create).unwrap();
        assert_eq!(storage.path(), path);
        storage.save(&[0xEC, 0x80]).unwrap();
        storage.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![0xEC, 0x80]);
        let mut storage = FileStorage::open(path.as_os_str(), AccessMode::Read).unwrap();
        let mut buffer = [0u8; 2];
        assert_eq!(storage.load(&mut buffer).unwrap(), 2);
        assert_eq!(buffer, [0xEC, 0x80]);
    }

    #[rstest(cache_size, case(1), case(3), case(DEFAULT_CACHE_SIZE))]
    fn test_cache_invalidated_by_writes(cache_size: usize) {
        let (_dir, path) = scratch();
        let mut storage = FileStorage::open_with_cache(&path, AccessMode::Create, cache_size).unwrap();
        let receipt = storage.save(&[1, 2, 3, 4]).unwrap();

        storage.seek(0).unwrap();
        let mut buffer = [0u8; 2];
        storage.peek(&mut buffer).unwrap();
        assert_eq!(buffer, [1, 2]);

        receipt.save_again(&[9, 9]).unwrap();
        storage.load(&mut buffer).unwrap();
        assert_eq!(buffer, [9, 9]);
        storage.load(&mut buffer).unwrap();
        assert_eq!(buffer, [3, 4]);
        assert_eq!(storage.load(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let (_dir, path) = scratch();
        FileStorage::open(&path, AccessMode::Create).unwrap();
        let mut storage = FileStorage::open(&path, AccessMode::Read).unwrap();
        match storage.save(&[1]) {
            Err(EbmlError::Io { op, source }) => {
                assert_eq!(op, "write");
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let (_dir, path) = scratch();
        assert!(matches!(
            FileStorage::open(&path, AccessMode::Read),
            Err(EbmlError::Io { op: "open", .. })
        ));
    }

    #[test]
    fn test_close_shared_by_clones() {
        let (_dir, path) = scratch();
        let mut storage = FileStorage::open(&path, AccessMode::Create).unwrap();
        let receipt = storage.save(&[0; 4]).unwrap();
        let clone = storage.clone();
        clone.close().unwrap();

        assert!(!storage.is_open());
        assert!(matches!(storage.save(&[1]), Err(EbmlError::Closed)));
        assert!(matches!(receipt.save_again(&[1]), Err(EbmlError::StaleReceipt)));
    }

    #[test]
    fn test_reopen_starts_new_session() {
        let (_dir, path) = scratch();
        let mut storage = FileStorage::open(&path, AccessMode::Create).unwrap();
        let receipt = storage.save(&[0; 4]).unwrap();
        storage.reopen(AccessMode::ReadWrite).unwrap();

        assert_eq!(storage.position(), 0);
        assert!(matches!(receipt.save_again(&[1]), Err(EbmlError::StaleReceipt)));
        let fresh = storage.receipt(0, 4).unwrap();
        fresh.save_again(&[5, 6]).unwrap();

        let mut buffer = [0u8; 4];
        storage.load(&mut buffer).unwrap();
        assert_eq!(buffer, [5, 6, 0, 0]);
    }

    #[test]
    fn test_checksum_range() {
        let (_dir, path) = scratch();
        let mut storage = FileStorage::open(&path, AccessMode::Create).unwrap();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        storage.save(&payload).unwrap();
        storage.seek(17).unwrap();

        assert_eq!(
            storage.checksum_range(100, 9_000).unwrap(),
            checksum(&payload[100..9_100])
        );
        assert_eq!(storage.position(), 17);
        assert!(storage.checksum_range(9_000, 2_000).is_err());
    }

    #[test]
    fn test_set_size() {
        let (_dir, path) = scratch();
        let mut storage = FileStorage::open(&path, AccessMode::Create).unwrap();
        storage.save(&[1, 2, 3]).unwrap();
        storage.set_size(8).unwrap();
        assert_eq!(storage.size().unwrap(), 8);
        storage.set_size(2).unwrap();
        storage.seek(0).unwrap();
        let mut buffer = [0u8; 4];
        assert_eq!(storage.load(&mut buffer).unwrap(), 2);
    }
}
