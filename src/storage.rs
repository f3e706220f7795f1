use crate::checksum::Crc32;
use crate::error::{EbmlError, Result};

use std::cell::RefCell;
use std::io;
use std::rc::{Rc, Weak};

/// Sequential byte storage that elements are saved to and loaded from.
pub trait Storage {
    /// Writes `bytes` at the cursor and advances it.
    fn save(&mut self, bytes: &[u8]) -> Result<Receipt>;
    /// Reads up to `dst.len()` bytes at the cursor and advances it; returns the amount read.
    fn load(&mut self, dst: &mut [u8]) -> Result<usize>;
    /// Like `load`, without moving the cursor.
    fn peek(&mut self, dst: &mut [u8]) -> Result<usize>;
    fn position(&self) -> u64;
    fn seek(&mut self, position: u64) -> Result<()>;
    fn size(&self) -> Result<u64>;
    fn set_size(&mut self, size: u64) -> Result<()>;
    /// A receipt over an already written range.
    fn receipt(&self, position: u64, length: u64) -> Result<Receipt>;
}

/// Positional writes backing a [`Receipt`].
pub(crate) trait Backend {
    /// Writes without moving the storage cursor.
    fn write_at(&mut self, position: u64, bytes: &[u8]) -> Result<()>;
    fn session(&self) -> u64;
    fn is_open(&self) -> bool;
}

/// A written region that can be overwritten in place later.
#[derive(Clone)]
pub struct Receipt {
    backend: Weak<RefCell<dyn Backend>>,
    session: u64,
    position: u64,
    length: u64,
}

impl Receipt {
    pub(crate) fn new<B: Backend + 'static>(
        backend: &Rc<RefCell<B>>,
        position: u64,
        length: u64,
    ) -> Self {
        let session = backend.borrow().session();
        let weak: Weak<RefCell<B>> = Rc::downgrade(backend);
        Self {
            backend: weak,
            session,
            position,
            length,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Overwrites the start of the region; `bytes` may not be longer than the region.
    pub fn save_again(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 > self.length {
            return Err(EbmlError::ReceiptOverflow {
                capacity: self.length,
                len: bytes.len(),
            });
        }
        let backend = self.backend.upgrade().ok_or(EbmlError::StaleReceipt)?;
        let mut backend = backend.borrow_mut();
        if !backend.is_open() || backend.session() != self.session {
            return Err(EbmlError::StaleReceipt);
        }

        backend.write_at(self.position, bytes)
    }

    /// A receipt over `length` bytes starting `offset` bytes into this one.
    pub fn narrow(&self, offset: u64, length: u64) -> Result<Receipt> {
        if offset.saturating_add(length) > self.length {
            return Err(EbmlError::ReceiptOverflow {
                capacity: self.length.saturating_sub(offset),
                len: length as usize,
            });
        }

        Ok(Receipt {
            backend: self.backend.clone(),
            session: self.session,
            position: self.position + offset,
            length,
        })
    }
}

impl std::fmt::Debug for Receipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receipt")
            .field("session", &self.session)
            .field("position", &self.position)
            .field("length", &self.length)
            .finish()
    }
}

pub(crate) fn write_folded(
    storage: &mut dyn Storage,
    bytes: &[u8],
    crc: Option<&mut Crc32>,
) -> Result<Receipt> {
    let receipt = storage.save(bytes)?;
    if let Some(crc) = crc {
        crc.update(bytes);
    }
    Ok(receipt)
}

pub(crate) fn read_folded(
    storage: &mut dyn Storage,
    dst: &mut [u8],
    crc: Option<&mut Crc32>,
) -> Result<usize> {
    let n = storage.load(dst)?;
    if let Some(crc) = crc {
        crc.update(&dst[..n]);
    }
    Ok(n)
}

#[derive(Debug, Default)]
struct MemoryBackend {
    data: Vec<u8>,
    cursor: u64,
    session: u64,
    open: bool,
}

impl MemoryBackend {
    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(EbmlError::Closed)
        }
    }

    // grows the buffer to `len` bytes, failing instead of aborting when it cannot
    fn grow_to(&mut self, len: u64, op: &'static str) -> Result<usize> {
        let len = usize::try_from(len).map_err(|_| out_of_range(op))?;
        if len > self.data.len() {
            self.data
                .try_reserve(len - self.data.len())
                .map_err(|e| EbmlError::Io {
                    op,
                    source: io::Error::new(io::ErrorKind::OutOfMemory, e),
                })?;
            self.data.resize(len, 0);
        }
        Ok(len)
    }

    fn copy_out(&self, dst: &mut [u8]) -> usize {
        let start = std::cmp::min(self.cursor, self.data.len() as u64) as usize;
        let n = std::cmp::min(dst.len(), self.data.len() - start);
        dst[..n].copy_from_slice(&self.data[start..start + n]);
        n
    }
}

impl Backend for MemoryBackend {
    fn write_at(&mut self, position: u64, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        let end = position
            .checked_add(bytes.len() as u64)
            .ok_or_else(|| out_of_range("write"))?;
        let end = self.grow_to(end, "write")?;
        self.data[end - bytes.len()..end].copy_from_slice(bytes);
        Ok(())
    }

    fn session(&self) -> u64 {
        self.session
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn out_of_range(op: &'static str) -> EbmlError {
    EbmlError::Io {
        op,
        source: io::Error::new(io::ErrorKind::InvalidInput, "offset out of range for an in-memory buffer"),
    }
}

/// In-memory storage; clones share the same buffer and cursor.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: Rc<RefCell<MemoryBackend>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::from_bytes(Vec::new())
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemoryBackend {
                data,
                open: true,
                ..MemoryBackend::default()
            })),
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.inner.borrow().data.clone()
    }

    /// Closes every clone of this handle; outstanding receipts go stale.
    pub fn close(&self) {
        self.inner.borrow_mut().open = false;
    }

    pub fn is_open(&self) -> bool {
        self.inner.borrow().open
    }
}

impl Storage for MemoryStorage {
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
        inner.check_open()?;
        let n = inner.copy_out(dst);
        inner.cursor += n as u64;
        Ok(n)
    }

    fn peek(&mut self, dst: &mut [u8]) -> Result<usize> {
        let inner = self.inner.borrow();
        inner.check_open()?;
        Ok(inner.copy_out(dst))
    }

    fn position(&self) -> u64 {
        self.inner.borrow().cursor
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.check_open()?;
        inner.cursor = position;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let inner = self.inner.borrow();
        inner.check_open()?;
        Ok(inner.data.len() as u64)
    }

    fn set_size(&mut self, size: u64) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.check_open()?;
        let size = inner.grow_to(size, "set_size")?;
        inner.data.truncate(size);
        Ok(())
    }

    fn receipt(&self, position: u64, length: u64) -> Result<Receipt> {
        self.inner.borrow().check_open()?;
        Ok(Receipt::new(&self.inner, position, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[test]
    fn test_save_load_peek() {
        let mut storage = MemoryStorage::new();
        let receipt = storage.save(&[1, 2, 3, 4]).unwrap();
        assert_eq!((receipt.position(), receipt.length()), (0, 4));
        assert_eq!(storage.position(), 4);

        storage.seek(1).unwrap();
        let mut buffer = [0u8; 2];
        assert_eq!(storage.peek(&mut buffer).unwrap(), 2);
        assert_eq!(buffer, [2, 3]);
        assert_eq!(storage.position(), 1);

        let mut buffer = [0u8; 8];
        assert_eq!(storage.load(&mut buffer).unwrap(), 3);
        assert_eq!(&buffer[..3], &[2, 3, 4]);
        assert_eq!(storage.position(), 4);
        assert_eq!(storage.load(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_seek_past_end_zero_fills() {
        let mut storage = MemoryStorage::new();
        storage.seek(3).unwrap();
        storage.save(&[0xAA]).unwrap();
        assert_eq!(storage.bytes(), vec![0, 0, 0, 0xAA]);
    }

    #[rstest(position, case(u64::MAX - 1), case(u64::MAX))]
    fn test_far_write_fails_cleanly(position: u64) {
        let mut storage = MemoryStorage::new();
        storage.seek(position).unwrap();
        assert!(matches!(storage.save(&[1, 2, 3]), Err(EbmlError::Io { op: "write", .. })));
        assert!(storage.bytes().is_empty());
        assert_eq!(storage.position(), position);
    }

    #[test]
    fn test_set_size_out_of_range() {
        let mut storage = MemoryStorage::from_bytes(vec![1, 2, 3]);
        assert!(matches!(storage.set_size(u64::MAX), Err(EbmlError::Io { op: "set_size", .. })));
        assert_eq!(storage.bytes(), vec![1, 2, 3]);
    }

    #[test]
    fn test_set_size() {
        let mut storage = MemoryStorage::from_bytes(vec![1, 2, 3]);
        storage.set_size(5).unwrap();
        assert_eq!(storage.bytes(), vec![1, 2, 3, 0, 0]);
        storage.set_size(1).unwrap();
        assert_eq!(storage.size().unwrap(), 1);
    }

    #[test]
    fn test_receipt_patch_touches_only_its_range() {
        let mut storage = MemoryStorage::new();
        storage.save(&[0x11; 3]).unwrap();
        let receipt = storage.save(&[0x22; 4]).unwrap();
        storage.save(&[0x33; 3]).unwrap();

        receipt.save_again(&[0xA0, 0xA1]).unwrap();
        assert_eq!(
            storage.bytes(),
            vec![0x11, 0x11, 0x11, 0xA0, 0xA1, 0x22, 0x22, 0x33, 0x33, 0x33]
        );
        assert_eq!(storage.position(), 10);
    }

    #[rstest(len, case(5), case(64))]
    fn test_receipt_overflow(len: usize) {
        let mut storage = MemoryStorage::new();
        let receipt = storage.save(&[0; 4]).unwrap();
        assert!(matches!(
            receipt.save_again(&vec![0xFF; len]),
            Err(EbmlError::ReceiptOverflow { capacity: 4, .. })
        ));
        assert_eq!(storage.bytes(), vec![0; 4]);
    }

    #[test]
    fn test_narrow() {
        let mut storage = MemoryStorage::new();
        let receipt = storage.save(&[0; 6]).unwrap();
        let inner = receipt.narrow(2, 3).unwrap();
        assert_eq!((inner.position(), inner.length()), (2, 3));
        inner.save_again(&[7, 8, 9]).unwrap();
        assert_eq!(storage.bytes(), vec![0, 0, 7, 8, 9, 0]);
        assert!(receipt.narrow(4, 3).is_err());
    }

    #[test]
    fn test_stale_after_close() {
        let mut storage = MemoryStorage::new();
        let receipt = storage.save(&[0; 4]).unwrap();
        let clone = storage.clone();
        clone.close();

        assert!(!storage.is_open());
        assert!(matches!(receipt.save_again(&[1]), Err(EbmlError::StaleReceipt)));
        assert!(matches!(storage.save(&[1]), Err(EbmlError::Closed)));
    }

    #[test]
    fn test_stale_after_drop() {
        let receipt = {
            let mut storage = MemoryStorage::new();
            storage.save(&[0; 4]).unwrap()
        };
        assert!(matches!(receipt.save_again(&[1]), Err(EbmlError::StaleReceipt)));
    }

    #[test]
    fn test_folded_helpers() {
        let mut storage = MemoryStorage::new();
        let mut crc = Crc32::new();
        write_folded(&mut storage, b"1234", Some(&mut crc)).unwrap();
        write_folded(&mut storage, b"56789", Some(&mut crc)).unwrap();
        assert_eq!(crc.finalize(), 0xCBF4_3926);

        storage.seek(0).unwrap();
        let mut crc = Crc32::new();
        let mut buffer = [0u8; 16];
        let n = read_folded(&mut storage, &mut buffer, Some(&mut crc)).unwrap();
        assert_eq!(n, 9);
        assert_eq!(crc.finalize(), 0xCBF4_3926);
    }
}
