//! In-memory region with an undo log.

use alloc::{vec, vec::Vec};
use core::ops::Range;

use platform_cast::CastFrom as _;
use snafu::{OptionExt as _, ensure};

use crate::{
    Address, Store, StoreError,
    store::{AlreadyInTransactionSnafu, NotInTransactionSnafu, OutOfBoundsSnafu},
};

/// Bytes overwritten by a write, kept until the transaction ends.
#[derive(Debug)]
struct UndoRecord {
    start: usize,
    bytes: Vec<u8>,
}

/// A [`Store`] backed by a byte vector.
///
/// Every write made inside a transaction first saves the bytes it replaces.
/// [`crash`](Store::crash) replays those records newest-first, which
/// restores the image exactly as it was at [`begin`](Store::begin).
///
/// [`into_bytes`](Self::into_bytes) and [`from_bytes`](Self::from_bytes)
/// model a process restart: whatever was committed survives, an open
/// transaction does not.
#[derive(Debug)]
pub struct MemStore {
    image: Vec<u8>,
    undo: Option<Vec<UndoRecord>>,
}

impl MemStore {
    /// Creates a zero-filled region of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    /// Wraps an existing region image.
    #[must_use]
    pub fn from_bytes(image: Vec<u8>) -> Self {
        Self { image, undo: None }
    }

    /// Returns the current region image.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    /// Returns the durable region image, rolling back any open transaction.
    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.crash();
        self.image
    }

    fn range(&self, address: Address, length: usize) -> Result<Range<usize>, StoreError> {
        let size = self.size();
        let length = u64::cast_from(length);
        let end = address.checked_add(length).context(OutOfBoundsSnafu {
            address,
            length,
            size,
        })?;
        ensure!(
            end.value() <= size,
            OutOfBoundsSnafu {
                address,
                length,
                size,
            }
        );
        Ok(address.to_index()..end.to_index())
    }
}

impl Store for MemStore {
    fn size(&self) -> u64 {
        u64::cast_from(self.image.len())
    }

    fn read(&self, address: Address, buf: &mut [u8]) -> Result<(), StoreError> {
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.image[range]);
        Ok(())
    }

    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<(), StoreError> {
        let range = self.range(address, bytes.len())?;
        let undo = self.undo.as_mut().context(NotInTransactionSnafu)?;
        undo.push(UndoRecord {
            start: range.start,
            bytes: self.image[range.clone()].to_vec(),
        });
        self.image[range].copy_from_slice(bytes);
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        ensure!(self.undo.is_none(), AlreadyInTransactionSnafu);
        self.undo = Some(Vec::new());
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.undo.is_some()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.undo.take().context(NotInTransactionSnafu)?;
        Ok(())
    }

    fn crash(&mut self) {
        let Some(undo) = self.undo.take() else {
            return;
        };
        for record in undo.into_iter().rev() {
            let end = record.start + record.bytes.len();
            self.image[record.start..end].copy_from_slice(&record.bytes);
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn read_vec(store: &MemStore, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        store.read(Address::new(addr), &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_write_requires_transaction() {
        let mut store = MemStore::new(64);
        let err = store.write(Address::new(0), &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::NotInTransaction { .. }));
        assert_eq!(read_vec(&store, 0, 3), [0, 0, 0]);
    }

    #[test]
    fn test_commit_keeps_writes() {
        let mut store = MemStore::new(64);
        store.begin().unwrap();
        assert!(store.in_transaction());
        store.write(Address::new(8), &[7; 4]).unwrap();
        store.commit().unwrap();
        assert!(!store.in_transaction());
        assert_eq!(read_vec(&store, 8, 4), [7; 4]);
    }

    #[test]
    fn test_crash_restores_overlapping_writes() {
        let mut store = MemStore::new(64);
        store.begin().unwrap();
        store.write(Address::new(0), &[1; 8]).unwrap();
        store.commit().unwrap();

        store.begin().unwrap();
        store.write(Address::new(4), &[2; 8]).unwrap();
        store.write(Address::new(0), &[3; 6]).unwrap();
        store.crash();
        assert!(!store.in_transaction());
        assert_eq!(read_vec(&store, 0, 12), [1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_nested_begin_rejected() {
        let mut store = MemStore::new(16);
        store.begin().unwrap();
        let err = store.begin().unwrap_err();
        assert!(matches!(err, StoreError::AlreadyInTransaction { .. }));
    }

    #[test]
    fn test_out_of_bounds() {
        let mut store = MemStore::new(16);
        let mut buf = [0; 4];
        let err = store.read(Address::new(14), &mut buf).unwrap_err();
        assert!(matches!(err, StoreError::OutOfBounds { length: 4, size: 16, .. }));
        let err = store.read(Address::new(u64::MAX), &mut buf).unwrap_err();
        assert!(matches!(err, StoreError::OutOfBounds { .. }));

        store.begin().unwrap();
        let err = store.write(Address::new(16), &[0]).unwrap_err();
        assert!(matches!(err, StoreError::OutOfBounds { .. }));
    }

    #[test]
    fn test_into_bytes_drops_open_transaction() {
        let mut store = MemStore::new(8);
        store.begin().unwrap();
        store.write(Address::new(0), &[9; 8]).unwrap();
        assert_eq!(store.as_bytes(), &[9; 8]);
        let image = store.into_bytes();
        assert_eq!(image, vec![0; 8]);

        let store = MemStore::from_bytes(image);
        assert_eq!(store.size(), 8);
    }
}
