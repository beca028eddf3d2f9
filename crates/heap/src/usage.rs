//! Space accounting.

use core::fmt;

use platform_cast::CastFrom as _;
use region::Store;

use crate::{
    error::{CorruptFreeListSnafu, HeapError},
    header::{LARGE_ORDERS, SMALL_SIZES, bucket_min_size},
    large,
    map::{MAP_SIZE, Map},
    small,
    word::WORD_SIZE,
};

/// Snapshot of how the region is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSummary {
    pub region_size: u64,
    pub small_pool_size: u64,
    /// Free small blocks by category (`words - 1`).
    pub small_pool_free_block_count: [u64; SMALL_SIZES],
    pub small_pool_free: u64,
    pub small_pool_allocated: u64,
    pub large_pool_size: u64,
    /// Free large blocks by bucket.
    pub large_pool_free_block_count: [u64; LARGE_ORDERS],
    pub large_pool_free: u64,
    pub large_pool_allocated: u64,
    /// Space not yet assigned to either pool.
    pub unused_size: u64,
}

impl UsageSummary {
    /// Returns `true` once the free and unassigned space together drop
    /// below a sixteenth of the region.
    #[must_use]
    pub fn is_depleted(&self) -> bool {
        self.small_pool_free + self.large_pool_free + self.unused_size < self.region_size / 16
    }
}

/// Walks every free list and totals the result.
pub(crate) fn summarize<S: Store>(store: &S, map: &Map) -> Result<UsageSummary, HeapError> {
    let small_pool_size = map.small_pool_size();
    let mut small_counts = [0; SMALL_SIZES];
    let mut small_free = 0;
    let mut overrun = None;
    small::for_each_free_block(store, map, |index, block| {
        small_counts[index] += 1;
        small_free += u64::cast_from(index + 1) * WORD_SIZE;
        if small_free > small_pool_size {
            overrun.get_or_insert((index, block));
        }
    })?;
    if let Some((index, address)) = overrun {
        return CorruptFreeListSnafu {
            pool: "small",
            index,
            address,
        }
        .fail();
    }

    let large_pool_size = map.large_pool_size();
    let mut large_counts = [0; LARGE_ORDERS];
    let mut large_free = 0;
    large::for_each_free_block(store, map, |bucket, leader, size| {
        large_counts[bucket] += 1;
        large_free += size;
        if large_free > large_pool_size {
            overrun.get_or_insert((bucket, leader));
        }
    })?;
    if let Some((index, address)) = overrun {
        return CorruptFreeListSnafu {
            pool: "large",
            index,
            address,
        }
        .fail();
    }

    Ok(UsageSummary {
        region_size: map.region_size(),
        small_pool_size,
        small_pool_free_block_count: small_counts,
        small_pool_free: small_free,
        small_pool_allocated: small_pool_size - small_free,
        large_pool_size,
        large_pool_free_block_count: large_counts,
        large_pool_free: large_free,
        large_pool_allocated: large_pool_size - large_free,
        unused_size: unused(map),
    })
}

/// Space never assigned to either pool.
pub(crate) fn unused(map: &Map) -> u64 {
    map.region_size() - (MAP_SIZE + map.small_pool_size() + map.large_pool_size())
}

impl fmt::Display for UsageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-- heap usage report --")?;
        writeln!(f, "small pool free blocks:")?;
        for (index, count) in self.small_pool_free_block_count.iter().enumerate() {
            if *count > 0 {
                let size = u64::cast_from(index + 1) * WORD_SIZE;
                writeln!(f, "   {count:>10} of size {size:>10}")?;
            }
        }
        writeln!(f, "        total avbl: {:>10}", self.small_pool_free)?;
        writeln!(f, "      total unavbl: {:>10}", self.small_pool_allocated)?;
        writeln!(f, "        total size: {:>10}", self.small_pool_size)?;
        writeln!(f, "large pool free blocks:")?;
        for (bucket, count) in self.large_pool_free_block_count.iter().enumerate() {
            if *count > 0 {
                let order = bucket_min_size(bucket);
                writeln!(f, "   {count:>10} of order {order:>10}")?;
            }
        }
        writeln!(f, "        total avbl: {:>10}", self.large_pool_free)?;
        writeln!(f, "      total unavbl: {:>10}", self.large_pool_allocated)?;
        writeln!(f, "        total size: {:>10}", self.large_pool_size)?;
        writeln!(f, "total heap size:    {:>10}", self.region_size)?;
        write!(f, "total unused:       {:>10}", self.unused_size)
    }
}
