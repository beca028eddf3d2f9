use alloc::collections::BTreeMap;

use platform_cast::CastFrom as _;
use region::{Address, MemStore, Store, StoreError};
use snafu_utils::Location;

use crate::{Heap, HeapConfig, large};

pub(crate) fn test_heap(config: HeapConfig) -> Heap<MemStore> {
    let store = MemStore::new(usize::cast_from(config.region_size()));
    Heap::format(store, &config).unwrap()
}

pub(crate) fn with_test_heap(config: HeapConfig, f: impl FnOnce(&mut Heap<MemStore>)) {
    let mut heap = test_heap(config);
    f(&mut heap);
}

/// Free large blocks as `(bucket, leader, size)`, in list order.
pub(crate) fn large_free_blocks<S: Store, T>(heap: &Heap<S, T>) -> Vec<(usize, Address, u64)> {
    let mut blocks = Vec::new();
    large::for_each_free_block(&heap.store, &heap.map, |bucket, leader, size| {
        blocks.push((bucket, leader, size));
    })
    .unwrap();
    blocks
}

/// A region of any reported size that keeps only the bytes written to it.
#[derive(Debug)]
pub(crate) struct SparseStore {
    size: u64,
    bytes: BTreeMap<u64, u8>,
    snapshot: Option<BTreeMap<u64, u8>>,
}

impl SparseStore {
    pub(crate) fn new(size: u64) -> Self {
        Self {
            size,
            bytes: BTreeMap::new(),
            snapshot: None,
        }
    }

    fn check(&self, address: Address, length: usize) -> Result<(), StoreError> {
        let length = u64::cast_from(length);
        if address
            .checked_add(length)
            .is_some_and(|end| end.value() <= self.size)
        {
            return Ok(());
        }
        Err(StoreError::OutOfBounds {
            address,
            length,
            size: self.size,
            location: Location::default(),
        })
    }
}

impl Store for SparseStore {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, address: Address, buf: &mut [u8]) -> Result<(), StoreError> {
        self.check(address, buf.len())?;
        for (at, byte) in (address.value()..).zip(buf.iter_mut()) {
            *byte = self.bytes.get(&at).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<(), StoreError> {
        self.check(address, bytes.len())?;
        if self.snapshot.is_none() {
            return Err(StoreError::NotInTransaction {
                location: Location::default(),
            });
        }
        for (at, byte) in (address.value()..).zip(bytes) {
            self.bytes.insert(at, *byte);
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::AlreadyInTransaction {
                location: Location::default(),
            });
        }
        self.snapshot = Some(self.bytes.clone());
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        match self.snapshot.take() {
            Some(_) => Ok(()),
            None => Err(StoreError::NotInTransaction {
                location: Location::default(),
            }),
        }
    }

    fn crash(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.bytes = snapshot;
        }
    }
}

/// A [`MemStore`] that refuses every write of exactly `reject_len` bytes.
#[derive(Debug)]
pub(crate) struct RejectingStore {
    inner: MemStore,
    reject_len: usize,
}

impl RejectingStore {
    pub(crate) fn new(size: usize, reject_len: usize) -> Self {
        Self {
            inner: MemStore::new(size),
            reject_len,
        }
    }
}

impl Store for RejectingStore {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn read(&self, address: Address, buf: &mut [u8]) -> Result<(), StoreError> {
        self.inner.read(address, buf)
    }

    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<(), StoreError> {
        if bytes.len() == self.reject_len {
            return Err(StoreError::OutOfBounds {
                address,
                length: u64::cast_from(bytes.len()),
                size: self.size(),
                location: Location::default(),
            });
        }
        self.inner.write(address, bytes)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.inner.begin()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit()
    }

    fn crash(&mut self) {
        self.inner.crash();
    }
}
