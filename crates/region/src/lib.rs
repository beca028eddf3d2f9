//! Storage substrate for the recorder heap.
//!
//! A region is a fixed-size, flat, byte-addressable area of notionally
//! non-volatile memory. This crate defines how the heap talks to it:
//!
//! - [`Address`]: a byte offset into the region, used instead of pointers
//! - [`Store`]: atomic read/write of byte ranges plus transaction
//!   begin/commit/crash
//! - [`MemStore`]: a `Vec<u8>`-backed store with an undo log, used by the
//!   tests and by anything that keeps its region in ordinary memory
//!
//! ```rust
//! use region::{Address, MemStore, Store};
//!
//! let mut store = MemStore::new(4096);
//! store.begin().unwrap();
//! store.write(Address::new(64), b"hello").unwrap();
//! store.crash(); // rolled back
//!
//! let mut buf = [0; 5];
//! store.read(Address::new(64), &mut buf).unwrap();
//! assert_eq!(buf, [0; 5]);
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use self::{
    address::Address,
    memory::MemStore,
    store::{Store, StoreError},
};

mod address;
mod memory;
mod store;
