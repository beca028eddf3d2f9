//! Persistent heap allocator for a recorder region.
//!
//! A region is a fixed-size block of non-volatile memory accessed through a
//! [`Store`]. This crate manages that region as a heap whose every piece
//! of bookkeeping lives inside the region, so the heap survives a restart
//! as long as the region does.
//!
//! # Layout
//!
//! ```text
//! 0        MAP_SIZE                                              region_size
//! +--------+-------------------+-------------------+---------------------+
//! |  map   | small pool  -->   |    unassigned     |   <--  large pool   |
//! +--------+-------------------+-------------------+---------------------+
//! ```
//!
//! ## Small pool
//!
//! Private bookkeeping blocks of up to 512 bytes, in 64 word-sized
//! categories. Each block has a one-word header. Freed blocks go on a LIFO
//! list per category and are never split or merged.
//!
//! ## Large pool
//!
//! User objects of up to 2 GiB, rounded to 16 bytes and framed by 16-byte
//! leading and trailing headers. Free blocks are kept on doubly linked
//! lists by power-of-two bucket and are merged with free neighbours when
//! freed.
//!
//! # Transactions
//!
//! Allocation happens inside a [`Transaction`]. Changes are written
//! through at once; a failed operation rolls back the whole transaction.
//! On a heap formatted with [`HeapFlags::BOUNDED`], user writes are only
//! accepted inside objects the transaction allocated or
//! [staged](Transaction::stage).
//!
//! ```rust
//! use heap::{Heap, HeapConfig, MemStore};
//!
//! let config = HeapConfig::new(64 * 1024).bounded(true);
//! let mut heap = Heap::format(MemStore::new(64 * 1024), &config).unwrap();
//!
//! let mut xn = heap.begin().unwrap();
//! let object = xn.insert(b"hello").unwrap();
//! xn.commit().unwrap();
//!
//! let store = heap.into_store();
//! let heap = Heap::open(store).unwrap();
//! let mut buf = [0; 5];
//! heap.read(object.address(), &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//! assert_eq!(heap.object_length(object.address()).unwrap(), Some(16));
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use region::{Address, MemStore, Store, StoreError};

pub use self::{
    config::{ConfigError, HeapConfig, HeapFlags, MIN_REGION_SIZE},
    error::HeapError,
    header::{
        LARGE_BLOCK_LIMIT, LARGE_BLOCK_OHD, LARGE_HEADER_SIZE, LARGE_ORDERS, LeadingHeader,
        LeadingLink, MIN_LARGE_BLOCK, SMALL_BLOCK_LIMIT, SMALL_BLOCK_OHD, SMALL_SIZES,
        bucket_min_size, bucket_of,
    },
    heap::Heap,
    known::{KnownObjects, ObjectExtent},
    map::MAP_SIZE,
    object::Object,
    scale::ObjectScale,
    trace::{LogTrace, NoTrace, TraceBuffer, TraceEvent, TraceSink},
    transaction::Transaction,
    usage::UsageSummary,
    word::WORD_SIZE,
};

mod config;
mod error;
mod header;
mod heap;
mod known;
mod large;
mod map;
mod object;
mod scale;
mod small;
#[cfg(test)]
mod testing;
mod trace;
mod transaction;
mod usage;
mod word;

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{large_free_blocks, test_heap};

    #[test]
    fn test_reuses_reclaimed_space() {
        let mut heap = test_heap(HeapConfig::new(64 * 1024));
        let mut xn = heap.begin().unwrap();
        let a = xn.malloc(100).unwrap();
        let b = xn.malloc(4000).unwrap();
        let c = xn.malloc(100).unwrap();
        xn.free(b).unwrap();
        xn.commit().unwrap();
        let unused = heap.unused();

        let mut xn = heap.begin().unwrap();
        let d = xn.malloc(3000).unwrap();
        xn.commit().unwrap();

        assert_eq!(d, b);
        assert_eq!(heap.unused(), unused);
        assert_eq!(heap.object_length(d.address()).unwrap(), Some(3008));
        assert_eq!(heap.object_length(a.address()).unwrap(), Some(112));
        assert_eq!(heap.object_length(c.address()).unwrap(), Some(112));
        assert_eq!(
            large_free_blocks(&heap),
            [(bucket_of(960), d.address() + 3008 + 16, 960)]
        );
    }

    #[test]
    fn test_private_and_user_pools_do_not_meet() {
        let mut heap = test_heap(HeapConfig::new(MIN_REGION_SIZE + 64));
        let mut xn = heap.begin().unwrap();
        let object = xn.malloc(64).unwrap();
        let private = xn.alloc_private(48).unwrap();
        let err = xn.alloc_private(8).unwrap_err();
        assert!(err.is_exhaustion());
        drop(xn);

        let usage = heap.usage().unwrap();
        assert_eq!(usage.unused_size, MIN_REGION_SIZE + 64 - MAP_SIZE);
        assert!(heap.classify(object.address()).unwrap().is_not_an_object());
        assert!(heap.classify(private).unwrap().is_not_an_object());
    }
}
