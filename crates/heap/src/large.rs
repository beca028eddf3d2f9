//! Large pool: boundary-tagged blocks on segregated free lists.
//!
//! Every large block is framed by a leading and a trailing header. Free
//! blocks sit on a doubly linked list per power-of-two bucket: the
//! forward link lives in the leading header, the backward link in the
//! trailing header, and the list head in the map. Freeing a block merges
//! it with whichever physical neighbours are free, so two free blocks are
//! never adjacent.

use region::{Address, Store};
use snafu::{OptionExt as _, ensure};

use crate::{
    error::{
        AddressOverflowSnafu, CorruptFreeListSnafu, HeapError, InvalidSizeSnafu,
        LargePoolExhaustedSnafu,
    },
    header::{
        LARGE_BLOCK_LIMIT, LARGE_BLOCK_OHD, LARGE_HEADER_SIZE, LARGE_ORDERS, LeadingHeader,
        LeadingLink, MIN_LARGE_BLOCK, TrailingHeader, TrailingLink, bucket_min_size, bucket_of,
        read_leading, read_trailing, write_leading, write_trailing,
    },
    map::{Map, MapField},
};

/// A block handed out by [`allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Allocation {
    pub(crate) address: Address,
    /// User bytes granted, possibly more than requested.
    pub(crate) size: u64,
}

/// A free block with both of its list links.
#[derive(Debug, Clone, Copy)]
struct FreeBlock {
    leader: Address,
    size: u64,
    trailer: Address,
    next: Option<Address>,
    prev: Option<Address>,
}

impl FreeBlock {
    fn bucket(&self) -> usize {
        bucket_of(self.size)
    }
}

fn corrupt_list(bucket: usize, address: Address) -> HeapError {
    CorruptFreeListSnafu {
        pool: "large",
        index: bucket,
        address,
    }
    .build()
}

/// Returns the trailing header address of the block led at `leader`.
fn trailer_of(map: &Map, leader: Address, size: u64) -> Result<Address, HeapError> {
    let end = map.end_of_large_pool();
    leader
        .checked_add(LARGE_HEADER_SIZE)
        .and_then(|data| data.checked_add(size))
        .filter(|trailer| {
            trailer
                .checked_add(LARGE_HEADER_SIZE)
                .is_some_and(|block_end| block_end <= end)
        })
        .context(AddressOverflowSnafu { leader })
}

fn read_free_block<S: Store>(
    store: &S,
    map: &Map,
    leader: Address,
) -> Result<FreeBlock, HeapError> {
    let leading = read_leading(store, leader)?;
    let size = leading.user_data_size;
    let LeadingLink::Free { next } = leading.link else {
        return Err(corrupt_list(bucket_of(size), leader));
    };
    if leader < map.start_of_large_pool() || !leader.is_aligned(LARGE_HEADER_SIZE) {
        return Err(corrupt_list(bucket_of(size), leader));
    }
    let trailer = trailer_of(map, leader, size)?;
    let trailing = read_trailing(store, trailer)?;
    let TrailingLink::Free { prev } = trailing.link else {
        return Err(corrupt_list(bucket_of(size), leader));
    };
    if trailing.start != leader {
        return Err(corrupt_list(bucket_of(size), leader));
    }
    Ok(FreeBlock {
        leader,
        size,
        trailer,
        next,
        prev,
    })
}

fn set_next<S: Store>(
    store: &mut S,
    leader: Address,
    next: Option<Address>,
) -> Result<(), HeapError> {
    let leading = read_leading(store, leader)?;
    write_leading(
        store,
        leader,
        LeadingHeader {
            user_data_size: leading.user_data_size,
            link: LeadingLink::Free { next },
        },
    )
}

fn set_prev<S: Store>(
    store: &mut S,
    map: &Map,
    leader: Address,
    prev: Option<Address>,
) -> Result<(), HeapError> {
    let leading = read_leading(store, leader)?;
    let trailer = trailer_of(map, leader, leading.user_data_size)?;
    write_trailing(
        store,
        trailer,
        TrailingHeader {
            start: leader,
            link: TrailingLink::Free { prev },
        },
    )
}

/// Unlinks a free block from its bucket and marks it in use.
fn remove_from_bucket<S: Store>(
    store: &mut S,
    map: &mut Map,
    block: &FreeBlock,
) -> Result<(), HeapError> {
    if let Some(next) = block.next {
        set_prev(store, map, next, block.prev)?;
    }
    match block.prev {
        Some(prev) => set_next(store, prev, block.next)?,
        None => map.patch(
            store,
            MapField::FirstLargeFree(block.bucket()),
            Address::to_link(block.next),
        )?,
    }
    write_leading(store, block.leader, LeadingHeader::in_use(block.size))?;
    write_trailing(store, block.trailer, TrailingHeader::in_use(block.leader))
}

/// Pushes the block spanning `leader..=trailer` on the head of its bucket.
fn insert_free_block<S: Store>(
    store: &mut S,
    map: &mut Map,
    leader: Address,
    size: u64,
    trailer: Address,
) -> Result<(), HeapError> {
    let bucket = bucket_of(size);
    let next = map.first_large_free(bucket);
    if let Some(next) = next {
        set_prev(store, map, next, Some(leader))?;
    }
    write_leading(
        store,
        leader,
        LeadingHeader {
            user_data_size: size,
            link: LeadingLink::Free { next },
        },
    )?;
    write_trailing(
        store,
        trailer,
        TrailingHeader {
            start: leader,
            link: TrailingLink::Free { prev: None },
        },
    )?;
    map.patch(store, MapField::FirstLargeFree(bucket), leader.value())
}

/// Finds the first block in `bucket` holding at least `nbytes`.
fn first_fit<S: Store>(
    store: &S,
    map: &Map,
    bucket: usize,
    nbytes: u64,
) -> Result<Option<FreeBlock>, HeapError> {
    let capacity = map.large_pool_size() / MIN_LARGE_BLOCK;
    let mut seen = 0;
    let mut cursor = map.first_large_free(bucket);
    while let Some(leader) = cursor {
        seen += 1;
        ensure!(seen <= capacity, CorruptFreeListSnafu {
            pool: "large",
            index: bucket,
            address: leader,
        });
        let block = read_free_block(store, map, leader)?;
        if block.size >= nbytes {
            return Ok(Some(block));
        }
        cursor = block.next;
    }
    Ok(None)
}

/// Allocates a large block of at least `nbytes` bytes.
///
/// Looks for a free block in the first bucket whose every block is big
/// enough, then in any higher bucket. Failing that, the request's own
/// bucket is searched first-fit before the pool grows downward into
/// unassigned space.
pub(crate) fn allocate<S: Store>(
    store: &mut S,
    map: &mut Map,
    nbytes: u64,
) -> Result<Allocation, HeapError> {
    ensure!(
        (1..=LARGE_BLOCK_LIMIT).contains(&nbytes),
        InvalidSizeSnafu {
            size: nbytes,
            limit: LARGE_BLOCK_LIMIT,
        }
    );
    let nbytes = nbytes.next_multiple_of(LARGE_HEADER_SIZE);
    let home = bucket_of(nbytes);
    let first = if nbytes == bucket_min_size(home) {
        home
    } else {
        home + 1
    };

    let block = match (first..LARGE_ORDERS).find_map(|b| map.first_large_free(b).map(|l| (b, l))) {
        Some((bucket, leader)) => {
            let block = read_free_block(store, map, leader)?;
            if block.bucket() != bucket || block.size < nbytes {
                return Err(corrupt_list(bucket, leader));
            }
            Some(block)
        }
        None if first > home => first_fit(store, map, home, nbytes)?,
        None => None,
    };
    let Some(block) = block else {
        return extend(store, map, nbytes);
    };

    remove_from_bucket(store, map, &block)?;
    let surplus = block.size - nbytes;
    if surplus < MIN_LARGE_BLOCK {
        return Ok(Allocation {
            address: block.leader + LARGE_HEADER_SIZE,
            size: block.size,
        });
    }

    let trailer = block.leader + LARGE_HEADER_SIZE + nbytes;
    write_leading(store, block.leader, LeadingHeader::in_use(nbytes))?;
    write_trailing(store, trailer, TrailingHeader::in_use(block.leader))?;
    let remainder = trailer + LARGE_HEADER_SIZE;
    insert_free_block(store, map, remainder, surplus - LARGE_BLOCK_OHD, block.trailer)?;
    Ok(Allocation {
        address: block.leader + LARGE_HEADER_SIZE,
        size: nbytes,
    })
}

fn extend<S: Store>(store: &mut S, map: &mut Map, nbytes: u64) -> Result<Allocation, HeapError> {
    let increment = nbytes + LARGE_BLOCK_OHD;
    let unassigned = map.unassigned_space();
    ensure!(
        unassigned >= increment,
        LargePoolExhaustedSnafu {
            requested: increment,
            unassigned,
        }
    );
    let leader = map.start_of_large_pool() - increment;
    map.patch(store, MapField::StartOfLargePool, leader.value())?;
    map.patch(store, MapField::UnassignedSpace, unassigned - increment)?;
    let address = leader + LARGE_HEADER_SIZE;
    write_leading(store, leader, LeadingHeader::in_use(nbytes))?;
    write_trailing(store, address + nbytes, TrailingHeader::in_use(leader))?;
    Ok(Allocation {
        address,
        size: nbytes,
    })
}

/// Frees the in-use large block at `address`, described by `leading`.
pub(crate) fn free<S: Store>(
    store: &mut S,
    map: &mut Map,
    address: Address,
    leading: LeadingHeader,
) -> Result<(), HeapError> {
    let mut leader = address - LARGE_HEADER_SIZE;
    let mut size = leading.user_data_size;
    let own_trailer = trailer_of(map, leader, size)?;
    let mut trailer = own_trailer;

    let following = own_trailer + LARGE_HEADER_SIZE;
    if following < map.end_of_large_pool()
        && matches!(read_leading(store, following)?.link, LeadingLink::Free { .. })
    {
        let block = read_free_block(store, map, following)?;
        remove_from_bucket(store, map, &block)?;
        size += LARGE_BLOCK_OHD + block.size;
        trailer = block.trailer;
        // stale tag inside the merged block
        write_trailing(
            store,
            own_trailer,
            TrailingHeader {
                start: Address::NULL,
                link: TrailingLink::Free { prev: None },
            },
        )?;
    }

    if leader > map.start_of_large_pool() {
        let preceding = leader - LARGE_HEADER_SIZE;
        let trailing = read_trailing(store, preceding)?;
        if matches!(trailing.link, TrailingLink::Free { .. }) {
            let block = read_free_block(store, map, trailing.start)?;
            if block.trailer != preceding {
                return Err(corrupt_list(block.bucket(), block.leader));
            }
            remove_from_bucket(store, map, &block)?;
            size += LARGE_BLOCK_OHD + block.size;
            leader = block.leader;
        }
    }

    insert_free_block(store, map, leader, size, trailer)
}

/// Calls `f` with the bucket, leader address and size of every free
/// block, checking the links of each list on the way.
pub(crate) fn for_each_free_block<S, F>(store: &S, map: &Map, mut f: F) -> Result<(), HeapError>
where
    S: Store,
    F: FnMut(usize, Address, u64),
{
    let capacity = map.large_pool_size() / MIN_LARGE_BLOCK;
    let mut seen = 0;
    for bucket in 0..LARGE_ORDERS {
        let mut prev = None;
        let mut cursor = map.first_large_free(bucket);
        while let Some(leader) = cursor {
            seen += 1;
            ensure!(seen <= capacity, CorruptFreeListSnafu {
                pool: "large",
                index: bucket,
                address: leader,
            });
            let block = read_free_block(store, map, leader)?;
            if block.bucket() != bucket || block.prev != prev {
                return Err(corrupt_list(bucket, leader));
            }
            f(bucket, leader, block.size);
            prev = Some(leader);
            cursor = block.next;
        }
    }
    Ok(())
}
