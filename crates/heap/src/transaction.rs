//! Allocation inside a store transaction.
//!
//! Every operation on a [`Transaction`] writes through to the store
//! immediately. If one of them fails, the whole transaction is rolled
//! back before the error is returned, and the transaction refuses any
//! further work. Dropping a transaction without committing it also rolls
//! it back.

use platform_cast::CastFrom as _;
use region::{Address, Store};
use snafu::{ResultExt as _, ensure};
use snafu_utils::{Location, Report};

use crate::{
    config::HeapFlags,
    error::{
        BoundaryViolationSnafu, FreePrivateObjectSnafu, HeapError, NotAnObjectSnafu,
        NotInTransactionSnafu, RangeOutOfBoundsSnafu, StoreSnafu,
    },
    heap::Heap,
    known::KnownObjects,
    large,
    object::Object,
    scale::{self, ObjectScale},
    small,
    trace::{NoTrace, TraceSink},
    usage::{self, UsageSummary},
};

/// An open transaction on a [`Heap`].
#[derive(Debug)]
pub struct Transaction<'h, S, T = NoTrace>
where
    S: Store,
    T: TraceSink,
{
    heap: &'h mut Heap<S, T>,
    known: KnownObjects,
    active: bool,
}

impl<'h, S, T> Transaction<'h, S, T>
where
    S: Store,
    T: TraceSink,
{
    pub(crate) fn new(heap: &'h mut Heap<S, T>) -> Self {
        Self {
            heap,
            known: KnownObjects::new(),
            active: true,
        }
    }

    /// Returns `false` once the transaction has been rolled back.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Objects this transaction may write to when the heap is bounded.
    #[must_use]
    pub fn known_objects(&self) -> &KnownObjects {
        &self.known
    }

    fn bounded(&self) -> bool {
        self.heap.map.flags().contains(HeapFlags::BOUNDED)
    }

    fn run<R>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<R, HeapError>,
    ) -> Result<R, HeapError> {
        ensure!(self.active, NotInTransactionSnafu);
        op(self).inspect_err(|err| self.crash(err))
    }

    fn crash(&mut self, err: &HeapError) {
        log::error!("transaction rolled back\n{}", Report::new(err));
        self.rollback();
    }

    fn rollback(&mut self) {
        self.active = false;
        self.known.clear();
        self.heap.store.crash();
        if let Err(err) = self.heap.map.refresh(&self.heap.store) {
            log::error!("cannot reload heap map\n{}", Report::new(&err));
        }
    }

    fn allocate_object(&mut self, nbytes: u64) -> Result<Address, HeapError> {
        let allocation = large::allocate(&mut self.heap.store, &mut self.heap.map, nbytes)?;
        if self.bounded() {
            self.known.note(allocation.address, allocation.size);
        }
        Ok(allocation.address)
    }

    /// Allocates a user object of at least `nbytes` bytes.
    ///
    /// The object's contents are unspecified.
    ///
    /// # Errors
    ///
    /// Fails for a zero or oversized request, or when the large pool cannot
    /// grow any further.
    #[track_caller]
    pub fn malloc(&mut self, nbytes: u64) -> Result<Object, HeapError> {
        let location = Location::default();
        self.run(|xn| {
            let address = xn.allocate_object(nbytes)?;
            xn.heap.trace.alloc(address, nbytes, location);
            Ok(Object::from_address(address))
        })
    }

    /// Allocates a user object holding a copy of `bytes`.
    ///
    /// # Errors
    ///
    /// See [`malloc`](Self::malloc).
    #[track_caller]
    pub fn insert(&mut self, bytes: &[u8]) -> Result<Object, HeapError> {
        let location = Location::default();
        self.run(|xn| {
            let nbytes = u64::cast_from(bytes.len());
            let address = xn.allocate_object(nbytes)?;
            xn.heap.store.write(address, bytes).context(StoreSnafu)?;
            xn.heap.trace.alloc(address, nbytes, location);
            Ok(Object::from_address(address))
        })
    }

    /// Allocates a small bookkeeping block of at most 512 bytes.
    ///
    /// # Errors
    ///
    /// Fails for a zero or oversized request, or when the small pool cannot
    /// grow any further.
    #[track_caller]
    pub fn alloc_private(&mut self, nbytes: u64) -> Result<Address, HeapError> {
        let location = Location::default();
        self.run(|xn| {
            let address = small::allocate(&mut xn.heap.store, &mut xn.heap.map, nbytes)?;
            xn.heap.trace.alloc(address, nbytes, location);
            Ok(address)
        })
    }

    fn release(
        &mut self,
        address: Address,
        private: bool,
        location: Location,
    ) -> Result<(), HeapError> {
        let Heap { store, map, trace } = &mut *self.heap;
        match scale::classify(store, map, address)? {
            ObjectScale::Small { words } if private => small::free(store, map, address, words)?,
            ObjectScale::Small { .. } => {
                trace.memo(address, "attempt to free a private object", location);
                return FreePrivateObjectSnafu { object: address }.fail();
            }
            ObjectScale::Large(leading) => {
                large::free(store, map, address, leading)?;
                self.known.forget(address);
            }
            ObjectScale::NotAnObject => {
                trace.memo(address, "attempt to free a nonexistent object", location);
                return NotAnObjectSnafu {
                    address,
                    operation: "free",
                }
                .fail();
            }
        }
        trace.free(address, location);
        Ok(())
    }

    /// Frees a user object.
    ///
    /// # Errors
    ///
    /// Fails if `object` is not a live user object.
    #[track_caller]
    pub fn free(&mut self, object: Object) -> Result<(), HeapError> {
        let location = Location::default();
        self.run(|xn| xn.release(object.address(), false, location))
    }

    /// Frees a block from either pool.
    ///
    /// # Errors
    ///
    /// Fails if nothing is allocated at `address`.
    #[track_caller]
    pub fn free_private(&mut self, address: Address) -> Result<(), HeapError> {
        let location = Location::default();
        self.run(|xn| xn.release(address, true, location))
    }

    /// Reads the start of `object` and, on a bounded heap, allows this
    /// transaction to write anywhere inside it.
    ///
    /// A zero-length `into` only registers the object.
    ///
    /// # Errors
    ///
    /// On a bounded heap, fails if the range leaves the region or `object`
    /// is not a live user object.
    pub fn stage(&mut self, object: Object, into: &mut [u8]) -> Result<(), HeapError> {
        self.run(|xn| {
            let address = object.address();
            if xn.bounded() {
                let length = u64::cast_from(into.len());
                let size = xn.heap.store.size();
                ensure!(
                    address
                        .checked_add(length)
                        .is_some_and(|end| end.value() <= size),
                    RangeOutOfBoundsSnafu {
                        address,
                        length,
                        size,
                    }
                );
                let ObjectScale::Large(leading) =
                    scale::classify(&xn.heap.store, &xn.heap.map, address)?
                else {
                    return NotAnObjectSnafu {
                        address,
                        operation: "stage",
                    }
                    .fail();
                };
                if !xn.known.is_known(address) {
                    xn.known.note(address, leading.user_data_size);
                }
            }
            if into.is_empty() {
                return Ok(());
            }
            xn.heap.store.read(address, into).context(StoreSnafu)
        })
    }

    /// Reads bytes at `address`, including this transaction's own writes.
    ///
    /// # Errors
    ///
    /// Fails if the range lies outside the region.
    pub fn read(&mut self, address: Address, into: &mut [u8]) -> Result<(), HeapError> {
        self.run(|xn| xn.heap.store.read(address, into).context(StoreSnafu))
    }

    /// Writes `bytes` at `address`.
    ///
    /// # Errors
    ///
    /// On a bounded heap, fails unless the whole range lies inside one
    /// object this transaction allocated or staged.
    pub fn write(&mut self, address: Address, bytes: &[u8]) -> Result<(), HeapError> {
        self.run(|xn| {
            let length = u64::cast_from(bytes.len());
            ensure!(
                !xn.boundary_violated(address, length),
                BoundaryViolationSnafu { address, length }
            );
            xn.heap.store.write(address, bytes).context(StoreSnafu)
        })
    }

    /// Returns `true` if a write of `length` bytes at `from` would be
    /// rejected. Always `false` on an unbounded heap.
    #[must_use]
    pub fn boundary_violated(&self, from: Address, length: u64) -> bool {
        self.bounded() && self.known.boundary_violated(from, length)
    }

    /// Returns the usable size of the object at `address`.
    ///
    /// # Errors
    ///
    /// Fails if a header cannot be read.
    pub fn object_length(&mut self, address: Address) -> Result<Option<u64>, HeapError> {
        self.run(|xn| {
            scale::classify(&xn.heap.store, &xn.heap.map, address).map(ObjectScale::length)
        })
    }

    /// Returns a usage snapshot including this transaction's changes.
    ///
    /// # Errors
    ///
    /// Fails if a free list is corrupt.
    pub fn usage(&mut self) -> Result<UsageSummary, HeapError> {
        self.run(|xn| usage::summarize(&xn.heap.store, &xn.heap.map))
    }

    /// Makes every change of this transaction durable.
    ///
    /// # Errors
    ///
    /// Fails if the transaction was already rolled back or the store
    /// cannot commit.
    pub fn commit(mut self) -> Result<(), HeapError> {
        self.run(|xn| xn.heap.store.commit().context(StoreSnafu))?;
        self.active = false;
        Ok(())
    }

    /// Rolls back every change of this transaction.
    pub fn abort(mut self) {
        if self.active {
            self.rollback();
        }
    }
}

impl<S, T> Drop for Transaction<'_, S, T>
where
    S: Store,
    T: TraceSink,
{
    fn drop(&mut self) {
        if self.active {
            log::warn!("transaction dropped without commit, rolling back");
            self.rollback();
        }
    }
}
