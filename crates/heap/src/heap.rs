use region::{Address, Store};
use snafu::ResultExt as _;
use snafu_utils::Report;

use crate::{
    config::{HeapConfig, HeapFlags},
    error::{ConfigSnafu, HeapError, StoreSnafu},
    map::Map,
    scale::{self, ObjectScale},
    trace::{NoTrace, TraceSink},
    transaction::Transaction,
    usage::{self, UsageSummary},
};

/// A persistent heap laid over a [`Store`].
///
/// All allocator state lives in the region itself; the `Heap` only caches
/// the root structure. Dropping a `Heap` and calling [`Heap::open`] on the
/// same region later yields the same heap.
#[derive(Debug)]
pub struct Heap<S, T = NoTrace> {
    pub(crate) store: S,
    pub(crate) map: Map,
    pub(crate) trace: T,
}

impl<S> Heap<S>
where
    S: Store,
{
    /// Formats `store` as an empty heap.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or does not match
    /// the store, or if the store rejects the write.
    pub fn format(mut store: S, config: &HeapConfig) -> Result<Self, HeapError> {
        config.validate_for(store.size()).context(ConfigSnafu)?;
        store.begin().context(StoreSnafu)?;
        let map = match Map::format(&mut store, config) {
            Ok(map) => map,
            Err(err) => {
                store.crash();
                return Err(err);
            }
        };
        store.commit().context(StoreSnafu)?;
        log::debug!(
            "formatted heap: size={}, flags={:?}",
            config.region_size(),
            config.flags()
        );
        Ok(Self {
            store,
            map,
            trace: NoTrace,
        })
    }

    /// Opens a heap previously formatted on `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the region does not hold a valid heap map.
    pub fn open(store: S) -> Result<Self, HeapError> {
        let map = Map::load(&store)?;
        log::debug!(
            "opened heap: size={}, small pool={}, large pool={}, unassigned={}",
            map.region_size(),
            map.small_pool_size(),
            map.large_pool_size(),
            map.unassigned_space()
        );
        Ok(Self {
            store,
            map,
            trace: NoTrace,
        })
    }
}

impl<S, T> Heap<S, T>
where
    S: Store,
    T: TraceSink,
{
    /// Replaces the trace sink.
    #[must_use]
    pub fn with_trace<U: TraceSink>(self, trace: U) -> Heap<S, U> {
        Heap {
            store: self.store,
            map: self.map,
            trace,
        }
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is already in a transaction or the map
    /// can no longer be read.
    pub fn begin(&mut self) -> Result<Transaction<'_, S, T>, HeapError> {
        self.store.begin().context(StoreSnafu)?;
        if let Err(err) = self.map.refresh(&self.store) {
            log::error!("cannot start transaction\n{}", Report::new(&err));
            self.store.crash();
            return Err(err);
        }
        Ok(Transaction::new(self))
    }

    #[must_use]
    pub fn flags(&self) -> HeapFlags {
        self.map.flags()
    }

    #[must_use]
    pub fn region_size(&self) -> u64 {
        self.map.region_size()
    }

    /// Tells what lives at `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if a header cannot be read.
    pub fn classify(&self, address: Address) -> Result<ObjectScale, HeapError> {
        scale::classify(&self.store, &self.map, address)
    }

    /// Returns the usable size of the object at `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if a header cannot be read.
    pub fn object_length(&self, address: Address) -> Result<Option<u64>, HeapError> {
        self.classify(address).map(ObjectScale::length)
    }

    /// Reads committed bytes at `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range lies outside the region.
    pub fn read(&self, address: Address, into: &mut [u8]) -> Result<(), HeapError> {
        self.store.read(address, into).context(StoreSnafu)
    }

    /// Returns a usage snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a free list is corrupt.
    pub fn usage(&self) -> Result<UsageSummary, HeapError> {
        usage::summarize(&self.store, &self.map)
    }

    /// Space not yet assigned to either pool.
    #[must_use]
    pub fn unused(&self) -> u64 {
        usage::unused(&self.map)
    }

    /// Returns `true` when little free or unassigned space remains.
    ///
    /// # Errors
    ///
    /// Returns an error if a free list is corrupt.
    pub fn heap_depleted(&self) -> Result<bool, HeapError> {
        self.usage().map(|usage| usage.is_depleted())
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    #[must_use]
    pub fn trace(&self) -> &T {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut T {
        &mut self.trace
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use platform_cast::CastFrom as _;
    use region::MemStore;

    use crate::{ConfigError, LogTrace, map::MAP_SIZE, testing::test_heap};

    use super::*;

    #[test]
    fn test_format_rejects_bad_config() {
        let err = Heap::format(MemStore::new(4096), &HeapConfig::new(8192)).unwrap_err();
        assert!(matches!(
            err,
            HeapError::Config {
                source: ConfigError::StoreSizeMismatch { .. },
                ..
            }
        ));
        let err = Heap::format(MemStore::new(64), &HeapConfig::new(64)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_open_rejects_unformatted_region() {
        let err = Heap::open(MemStore::new(4096)).unwrap_err();
        assert!(err.is_corrupt_map());
    }

    #[test]
    fn test_reopen_preserves_heap() {
        let config = HeapConfig::new(16 * 1024).bounded(true);
        let mut heap = test_heap(config.clone());
        let mut xn = heap.begin().unwrap();
        let object = xn.insert(b"persistent").unwrap();
        let private = xn.alloc_private(32).unwrap();
        let freed = xn.malloc(300).unwrap();
        xn.free(freed).unwrap();
        xn.commit().unwrap();
        let usage = heap.usage().unwrap();

        let image = heap.into_store().into_bytes();
        assert_eq!(image.len(), usize::cast_from(config.region_size()));
        let heap = Heap::open(MemStore::from_bytes(image)).unwrap();
        assert_eq!(heap.flags(), HeapFlags::BOUNDED);
        assert_eq!(heap.region_size(), 16 * 1024);
        assert_eq!(heap.usage().unwrap(), usage);
        assert_eq!(heap.object_length(object.address()).unwrap(), Some(16));
        assert_eq!(heap.object_length(private).unwrap(), Some(32));
        assert!(heap.classify(freed.address()).unwrap().is_not_an_object());

        let mut buf = [0; 10];
        heap.read(object.address(), &mut buf).unwrap();
        assert_eq!(&buf, b"persistent");
    }

    #[test]
    fn test_uncommitted_work_lost_on_restart() {
        let mut heap = test_heap(HeapConfig::new(4096));
        let mut xn = heap.begin().unwrap();
        xn.malloc(100).unwrap();
        core::mem::forget(xn);

        let heap = Heap::open(MemStore::from_bytes(heap.into_store().into_bytes())).unwrap();
        assert_eq!(heap.unused(), 4096 - MAP_SIZE);
    }

    #[test]
    fn test_begin_twice_rejected() {
        let mut heap = test_heap(HeapConfig::new(4096));
        let xn = heap.begin().unwrap();
        core::mem::forget(xn);
        let err = heap.begin().unwrap_err();
        assert!(matches!(
            err,
            HeapError::Store {
                source: region::StoreError::AlreadyInTransaction { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_log_trace_is_transparent() {
        let mut heap = test_heap(HeapConfig::new(4096)).with_trace(LogTrace);
        let mut xn = heap.begin().unwrap();
        let object = xn.malloc(48).unwrap();
        xn.free(object).unwrap();
        xn.commit().unwrap();
        assert_eq!(heap.usage().unwrap().large_pool_free, 48);
    }
}
