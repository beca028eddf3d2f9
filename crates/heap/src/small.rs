//! Small pool: one LIFO free list per word count.
//!
//! Small blocks are never split or merged. A freed block waits on the list
//! of its own category until a request of the same rounded size reuses it.

use platform_cast::CastFrom as _;
use region::{Address, Store};
use snafu::ensure;

use crate::{
    error::{
        CorruptFreeListSnafu, HeapError, InvalidSizeSnafu, SmallPoolAddressLimitSnafu,
        SmallPoolExhaustedSnafu,
    },
    header::{
        SMALL_BLOCK_LIMIT, SMALL_BLOCK_OHD, SMALL_MAX_ADDR, SMALL_SIZES, SmallHeader, read_small,
        write_small,
    },
    map::{Map, MapField},
    word::WORD_SIZE,
};

fn category(words: u64) -> usize {
    usize::cast_from(words - 1)
}

fn corrupt_list(index: usize, address: Address) -> HeapError {
    CorruptFreeListSnafu {
        pool: "small",
        index,
        address,
    }
    .build()
}

/// Returns `true` if a block of `words` words at `block` lies inside the pool.
fn in_pool(map: &Map, block: Address, words: u64) -> bool {
    block >= map.start_of_small_pool()
        && block.is_aligned(WORD_SIZE)
        && block
            .checked_add((words + 1) * WORD_SIZE)
            .is_some_and(|end| end <= map.end_of_small_pool())
}

/// Reads the free block at `block` on list `index`, returning its link.
fn read_free_block<S: Store>(
    store: &S,
    map: &Map,
    index: usize,
    block: Address,
) -> Result<Option<Address>, HeapError> {
    let words = u64::cast_from(index) + 1;
    if !in_pool(map, block, words) {
        return Err(corrupt_list(index, block));
    }
    match read_small(store, block)? {
        SmallHeader::Free { next, words: found } if found == words => Ok(next),
        _ => Err(corrupt_list(index, block)),
    }
}

/// Allocates a small block of at least `nbytes` bytes.
///
/// The block's contents are left as they were.
pub(crate) fn allocate<S: Store>(
    store: &mut S,
    map: &mut Map,
    nbytes: u64,
) -> Result<Address, HeapError> {
    ensure!(
        (1..=SMALL_BLOCK_LIMIT).contains(&nbytes),
        InvalidSizeSnafu {
            size: nbytes,
            limit: SMALL_BLOCK_LIMIT,
        }
    );
    let words = nbytes.div_ceil(WORD_SIZE);
    let index = category(words);

    if let Some(block) = map.first_small_free(index) {
        let next = read_free_block(store, map, index, block)?;
        if let Some(next) = next.filter(|&next| !in_pool(map, next, words)) {
            return Err(corrupt_list(index, next));
        }
        map.patch(store, MapField::FirstSmallFree(index), Address::to_link(next))?;
        write_small(store, block, SmallHeader::InUse { words })?;
        return Ok(block + SMALL_BLOCK_OHD);
    }

    let increment = words * WORD_SIZE + SMALL_BLOCK_OHD;
    let unassigned = map.unassigned_space();
    ensure!(
        unassigned >= increment,
        SmallPoolExhaustedSnafu {
            requested: increment,
            unassigned,
        }
    );
    let block = map.end_of_small_pool();
    let end = block + increment;
    ensure!(
        end.value() <= SMALL_MAX_ADDR,
        SmallPoolAddressLimitSnafu {
            end,
            limit: SMALL_MAX_ADDR,
        }
    );
    map.patch(store, MapField::EndOfSmallPool, end.value())?;
    map.patch(store, MapField::UnassignedSpace, unassigned - increment)?;
    write_small(store, block, SmallHeader::InUse { words })?;
    Ok(block + SMALL_BLOCK_OHD)
}

/// Returns the in-use small block at `address` to its free list.
pub(crate) fn free<S: Store>(
    store: &mut S,
    map: &mut Map,
    address: Address,
    words: u64,
) -> Result<(), HeapError> {
    let index = category(words);
    let block = address - SMALL_BLOCK_OHD;
    let next = map.first_small_free(index);
    write_small(store, block, SmallHeader::Free { next, words })?;
    map.patch(store, MapField::FirstSmallFree(index), block.value())
}

/// Calls `f` with the category and header address of every free block.
///
/// A list longer than the pool could possibly hold, or one that leads
/// outside the pool, is reported as corrupt instead of being walked.
pub(crate) fn for_each_free_block<S, F>(store: &S, map: &Map, mut f: F) -> Result<(), HeapError>
where
    S: Store,
    F: FnMut(usize, Address),
{
    let capacity = map.small_pool_size() / (SMALL_BLOCK_OHD + WORD_SIZE);
    let mut seen = 0;
    for index in 0..SMALL_SIZES {
        let mut cursor = map.first_small_free(index);
        while let Some(block) = cursor {
            seen += 1;
            if seen > capacity {
                return Err(corrupt_list(index, block));
            }
            let next = read_free_block(store, map, index, block)?;
            f(index, block);
            cursor = next;
        }
    }
    Ok(())
}
