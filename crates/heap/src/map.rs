//! The heap's root structure.
//!
//! The map sits at address zero of the region and records where both
//! pools start and end, how much space is still unassigned, and the head
//! of every free list. [`Map`] keeps a cached copy; every change goes
//! through [`Map::patch`], which writes the field back to the store
//! before updating the cache.

use core::mem::offset_of;

use dataview::{Pod, PodMethods as _};
use platform_cast::CastFrom as _;
use region::{Address, Store};
use snafu::ensure;

use crate::{
    config::{HeapConfig, HeapFlags},
    error::{CorruptMapSnafu, HeapError},
    header::{LARGE_ORDERS, SMALL_SIZES},
    word::{Word, read_pod, write_pod},
};

const MAGIC: u64 = u64::from_le_bytes(*b"RECHEAP1");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod)]
pub(crate) struct MapImage {
    magic: Word,
    region_size: Word,
    flags: Word,
    start_of_small_pool: Word,
    end_of_small_pool: Word,
    start_of_large_pool: Word,
    end_of_large_pool: Word,
    unassigned_space: Word,
    first_small_free: [Word; SMALL_SIZES],
    first_large_free: [Word; LARGE_ORDERS],
}

/// Size of the root structure at the start of the region.
pub const MAP_SIZE: u64 = size_of::<MapImage>() as u64;

const MAP_ADDRESS: Address = Address::NULL;

/// A map field that changes after formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MapField {
    EndOfSmallPool,
    StartOfLargePool,
    UnassignedSpace,
    FirstSmallFree(usize),
    FirstLargeFree(usize),
}

impl MapField {
    fn offset(self) -> usize {
        match self {
            Self::EndOfSmallPool => offset_of!(MapImage, end_of_small_pool),
            Self::StartOfLargePool => offset_of!(MapImage, start_of_large_pool),
            Self::UnassignedSpace => offset_of!(MapImage, unassigned_space),
            Self::FirstSmallFree(index) => {
                offset_of!(MapImage, first_small_free) + index * size_of::<Word>()
            }
            Self::FirstLargeFree(bucket) => {
                offset_of!(MapImage, first_large_free) + bucket * size_of::<Word>()
            }
        }
    }

    fn slot(self, image: &mut MapImage) -> &mut Word {
        match self {
            Self::EndOfSmallPool => &mut image.end_of_small_pool,
            Self::StartOfLargePool => &mut image.start_of_large_pool,
            Self::UnassignedSpace => &mut image.unassigned_space,
            Self::FirstSmallFree(index) => &mut image.first_small_free[index],
            Self::FirstLargeFree(bucket) => &mut image.first_large_free[bucket],
        }
    }
}

/// Cached copy of the map.
#[derive(Debug, Clone)]
pub(crate) struct Map {
    image: MapImage,
}

impl Map {
    /// Writes a fresh map describing an empty heap.
    pub(crate) fn format<S: Store>(store: &mut S, config: &HeapConfig) -> Result<Self, HeapError> {
        let region_size = config.region_size();
        let mut image = MapImage::zeroed();
        image.magic.set(MAGIC);
        image.region_size.set(region_size);
        image.flags.set(config.flags().bits());
        image.start_of_small_pool.set(MAP_SIZE);
        image.end_of_small_pool.set(MAP_SIZE);
        image.start_of_large_pool.set(region_size);
        image.end_of_large_pool.set(region_size);
        image.unassigned_space.set(region_size - MAP_SIZE);
        write_pod(store, MAP_ADDRESS, &image)?;
        Ok(Self { image })
    }

    /// Reads and validates the map of a formatted region.
    pub(crate) fn load<S: Store>(store: &S) -> Result<Self, HeapError> {
        ensure!(
            store.size() >= MAP_SIZE,
            CorruptMapSnafu {
                reason: "region smaller than the map",
            }
        );
        let map = Self {
            image: read_pod(store, MAP_ADDRESS)?,
        };
        map.validate(store.size())?;
        Ok(map)
    }

    /// Re-reads the cached image from the store.
    pub(crate) fn refresh<S: Store>(&mut self, store: &S) -> Result<(), HeapError> {
        *self = Self::load(store)?;
        Ok(())
    }

    fn validate(&self, store_size: u64) -> Result<(), HeapError> {
        let image = &self.image;
        ensure!(
            image.magic.get() == MAGIC,
            CorruptMapSnafu {
                reason: "bad magic",
            }
        );
        ensure!(
            image.region_size.get() == store_size,
            CorruptMapSnafu {
                reason: "region size does not match the store",
            }
        );
        let small_start = image.start_of_small_pool.get();
        let small_end = image.end_of_small_pool.get();
        let large_start = image.start_of_large_pool.get();
        let large_end = image.end_of_large_pool.get();
        ensure!(
            small_start == MAP_SIZE
                && small_start <= small_end
                && small_end <= large_start
                && large_start <= large_end
                && large_end == store_size,
            CorruptMapSnafu {
                reason: "pool bounds out of order",
            }
        );
        ensure!(
            image.unassigned_space.get() == large_start - small_end,
            CorruptMapSnafu {
                reason: "unassigned space does not match the pool bounds",
            }
        );
        Ok(())
    }

    /// Writes `value` into `field`, then updates the cache.
    pub(crate) fn patch<S: Store>(
        &mut self,
        store: &mut S,
        field: MapField,
        value: u64,
    ) -> Result<(), HeapError> {
        let at = MAP_ADDRESS + u64::cast_from(field.offset());
        write_pod(store, at, &Word::new(value))?;
        field.slot(&mut self.image).set(value);
        Ok(())
    }

    pub(crate) fn region_size(&self) -> u64 {
        self.image.region_size.get()
    }

    pub(crate) fn flags(&self) -> HeapFlags {
        HeapFlags::from_bits_retain(self.image.flags.get())
    }

    pub(crate) fn start_of_small_pool(&self) -> Address {
        Address::new(self.image.start_of_small_pool.get())
    }

    pub(crate) fn end_of_small_pool(&self) -> Address {
        Address::new(self.image.end_of_small_pool.get())
    }

    pub(crate) fn start_of_large_pool(&self) -> Address {
        Address::new(self.image.start_of_large_pool.get())
    }

    pub(crate) fn end_of_large_pool(&self) -> Address {
        Address::new(self.image.end_of_large_pool.get())
    }

    pub(crate) fn small_pool_size(&self) -> u64 {
        self.end_of_small_pool() - self.start_of_small_pool()
    }

    pub(crate) fn large_pool_size(&self) -> u64 {
        self.end_of_large_pool() - self.start_of_large_pool()
    }

    pub(crate) fn unassigned_space(&self) -> u64 {
        self.image.unassigned_space.get()
    }

    pub(crate) fn first_small_free(&self, index: usize) -> Option<Address> {
        Address::from_link(self.image.first_small_free[index].get())
    }

    pub(crate) fn first_large_free(&self, bucket: usize) -> Option<Address> {
        Address::from_link(self.image.first_large_free[bucket].get())
    }
}
