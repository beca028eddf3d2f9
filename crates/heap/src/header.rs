//! Block header encodings.
//!
//! A small block carries a single word before its user data. A large
//! block is framed by a leading and a trailing header of two words each
//! (boundary tags), so both physical neighbours of any block can be found
//! from its own address.

use dataview::Pod;
use region::{Address, Store};

use crate::{
    error::HeapError,
    word::{WORD_SIZE, Word, read_pod, write_pod},
};

/// Number of small block categories, one per word of user data.
pub const SMALL_SIZES: usize = 64;
/// Per-block overhead of a small block.
pub const SMALL_BLOCK_OHD: u64 = WORD_SIZE;
/// Largest user size served by the small pool.
pub const SMALL_BLOCK_LIMIT: u64 = 64 * WORD_SIZE;
/// The small pool may not grow past this address; free links keep the
/// top byte of the header clear.
pub const SMALL_MAX_ADDR: u64 = 1 << 56;

const SMALL_IN_USE: u64 = 0xffff_ffff_ffff_ff00;
const SMALL_NEXT_MASK: u64 = 0x00ff_ffff_ffff_ffff;
const SMALL_WORDS_MASK: u64 = 0xff;

const LARGE_ORDER1: u32 = 4;
const LARGE_ORDER_MAX: u32 = 31;
/// Size of one large block header; also the large pool granularity.
pub const LARGE_HEADER_SIZE: u64 = 1 << LARGE_ORDER1;
/// Per-block overhead of a large block.
pub const LARGE_BLOCK_OHD: u64 = 2 * LARGE_HEADER_SIZE;
/// Smallest large block worth splitting off, overhead included.
pub const MIN_LARGE_BLOCK: u64 = 3 * LARGE_HEADER_SIZE;
/// Largest user size served by the large pool.
pub const LARGE_BLOCK_LIMIT: u64 = 1 << LARGE_ORDER_MAX;
/// Number of large free-list buckets.
pub const LARGE_ORDERS: usize = 28;

const LARGE_IN_USE: u64 = u64::MAX;

/// Returns the bucket of a large free block of `size` user bytes.
///
/// Bucket `b` holds blocks with `16 << b <= size < 16 << (b + 1)`. Blocks
/// grown past the last bucket by coalescing all land in the last one.
#[must_use]
pub fn bucket_of(size: u64) -> usize {
    let high = size >> (LARGE_ORDER1 + 1);
    let bits = u64::BITS - high.leading_zeros();
    usize::try_from(bits).map_or(LARGE_ORDERS - 1, |b| b.min(LARGE_ORDERS - 1))
}

/// Returns the smallest block size kept in `bucket`.
#[must_use]
pub const fn bucket_min_size(bucket: usize) -> u64 {
    LARGE_HEADER_SIZE << bucket
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SmallHeader {
    InUse { words: u64 },
    Free { next: Option<Address>, words: u64 },
}

impl SmallHeader {
    fn decode(raw: u64) -> Self {
        let words = raw & SMALL_WORDS_MASK;
        if raw & SMALL_IN_USE == SMALL_IN_USE {
            Self::InUse { words }
        } else {
            let next = Address::from_link((raw >> 8) & SMALL_NEXT_MASK);
            Self::Free { next, words }
        }
    }

    fn encode(self) -> u64 {
        match self {
            Self::InUse { words } => SMALL_IN_USE | (words & SMALL_WORDS_MASK),
            Self::Free { next, words } => {
                ((Address::to_link(next) & SMALL_NEXT_MASK) << 8) | (words & SMALL_WORDS_MASK)
            }
        }
    }
}

/// State of a large block as recorded in its leading header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadingLink {
    InUse,
    /// Free; `next` is the following block in the same bucket.
    Free { next: Option<Address> },
}

/// Leading header of a large block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadingHeader {
    /// Bytes of user data between the two headers.
    pub user_data_size: u64,
    pub link: LeadingLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrailingLink {
    InUse,
    Free { prev: Option<Address> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrailingHeader {
    /// Address of the block's leading header.
    pub(crate) start: Address,
    pub(crate) link: TrailingLink,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod)]
struct RawLeading {
    user_data_size: Word,
    next: Word,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod)]
struct RawTrailing {
    start: Word,
    prev: Word,
}

impl LeadingHeader {
    pub(crate) const fn in_use(user_data_size: u64) -> Self {
        Self {
            user_data_size,
            link: LeadingLink::InUse,
        }
    }

    fn decode(raw: RawLeading) -> Self {
        let link = match raw.next.get() {
            LARGE_IN_USE => LeadingLink::InUse,
            next => LeadingLink::Free {
                next: Address::from_link(next),
            },
        };
        Self {
            user_data_size: raw.user_data_size.get(),
            link,
        }
    }

    fn encode(self) -> RawLeading {
        let next = match self.link {
            LeadingLink::InUse => LARGE_IN_USE,
            LeadingLink::Free { next } => Address::to_link(next),
        };
        RawLeading {
            user_data_size: Word::new(self.user_data_size),
            next: Word::new(next),
        }
    }
}

impl TrailingHeader {
    pub(crate) const fn in_use(start: Address) -> Self {
        Self {
            start,
            link: TrailingLink::InUse,
        }
    }

    fn decode(raw: RawTrailing) -> Self {
        let link = match raw.prev.get() {
            LARGE_IN_USE => TrailingLink::InUse,
            prev => TrailingLink::Free {
                prev: Address::from_link(prev),
            },
        };
        Self {
            start: Address::new(raw.start.get()),
            link,
        }
    }

    fn encode(self) -> RawTrailing {
        let prev = match self.link {
            TrailingLink::InUse => LARGE_IN_USE,
            TrailingLink::Free { prev } => Address::to_link(prev),
        };
        RawTrailing {
            start: Word::new(self.start.value()),
            prev: Word::new(prev),
        }
    }
}

pub(crate) fn read_small<S: Store>(store: &S, at: Address) -> Result<SmallHeader, HeapError> {
    let raw: Word = read_pod(store, at)?;
    Ok(SmallHeader::decode(raw.get()))
}

pub(crate) fn write_small<S: Store>(
    store: &mut S,
    at: Address,
    header: SmallHeader,
) -> Result<(), HeapError> {
    write_pod(store, at, &Word::new(header.encode()))
}

pub(crate) fn read_leading<S: Store>(store: &S, at: Address) -> Result<LeadingHeader, HeapError> {
    read_pod(store, at).map(LeadingHeader::decode)
}

pub(crate) fn write_leading<S: Store>(
    store: &mut S,
    at: Address,
    header: LeadingHeader,
) -> Result<(), HeapError> {
    write_pod(store, at, &header.encode())
}

pub(crate) fn read_trailing<S: Store>(
    store: &S,
    at: Address,
) -> Result<TrailingHeader, HeapError> {
    read_pod(store, at).map(TrailingHeader::decode)
}

pub(crate) fn write_trailing<S: Store>(
    store: &mut S,
    at: Address,
    header: TrailingHeader,
) -> Result<(), HeapError> {
    write_pod(store, at, &header.encode())
}
