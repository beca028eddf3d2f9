//! Recovering what an address refers to from header bytes alone.

use region::{Address, Store};

use crate::{
    error::HeapError,
    header::{
        LARGE_HEADER_SIZE, LeadingHeader, LeadingLink, SMALL_BLOCK_LIMIT, SMALL_BLOCK_OHD,
        SmallHeader, TrailingLink, read_leading, read_small, read_trailing,
    },
    map::Map,
    word::WORD_SIZE,
};

/// What lives at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum ObjectScale {
    NotAnObject,
    /// An in-use small block of `words` words.
    Small { words: u64 },
    /// An in-use large block.
    Large(LeadingHeader),
}

impl ObjectScale {
    /// Returns the usable length of the object in bytes.
    #[must_use]
    pub const fn length(self) -> Option<u64> {
        match self {
            Self::NotAnObject => None,
            Self::Small { words } => Some(words * WORD_SIZE),
            Self::Large(leading) => Some(leading.user_data_size),
        }
    }
}

/// Classifies `address`.
///
/// Only the first user byte of an in-use block is an object. Addresses in
/// the middle of a block, in a header, in a free block, in the map or in
/// unassigned space are all `NotAnObject`.
pub(crate) fn classify<S: Store>(
    store: &S,
    map: &Map,
    address: Address,
) -> Result<ObjectScale, HeapError> {
    let small_start = map.start_of_small_pool() + SMALL_BLOCK_OHD;
    if address >= small_start
        && address < map.end_of_small_pool()
        && address.is_aligned(WORD_SIZE)
    {
        let header = read_small(store, address - SMALL_BLOCK_OHD)?;
        let max_words = SMALL_BLOCK_LIMIT / WORD_SIZE;
        return Ok(match header {
            SmallHeader::InUse { words } if (1..=max_words).contains(&words) => {
                ObjectScale::Small { words }
            }
            _ => ObjectScale::NotAnObject,
        });
    }

    let large_start = map.start_of_large_pool() + LARGE_HEADER_SIZE;
    let large_end = map.end_of_large_pool();
    if address < large_start || address >= large_end || !address.is_aligned(LARGE_HEADER_SIZE) {
        return Ok(ObjectScale::NotAnObject);
    }
    let leader = address - LARGE_HEADER_SIZE;
    let leading = read_leading(store, leader)?;
    if leading.link != LeadingLink::InUse {
        return Ok(ObjectScale::NotAnObject);
    }
    let Some(trailer) = address
        .checked_add(leading.user_data_size)
        .filter(|trailer| {
            trailer
                .checked_add(LARGE_HEADER_SIZE)
                .is_some_and(|end| end <= large_end)
        })
    else {
        return Ok(ObjectScale::NotAnObject);
    };
    let trailing = read_trailing(store, trailer)?;
    if trailing.start != leader || trailing.link != TrailingLink::InUse {
        return Ok(ObjectScale::NotAnObject);
    }
    Ok(ObjectScale::Large(leading))
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use crate::{HeapConfig, header::LARGE_BLOCK_OHD, map::MAP_SIZE, testing::with_test_heap};

    use super::*;

    #[test]
    fn test_length() {
        assert_eq!(ObjectScale::NotAnObject.length(), None);
        assert_eq!(ObjectScale::Small { words: 3 }.length(), Some(24));
        let leading = LeadingHeader::in_use(112);
        assert_eq!(ObjectScale::Large(leading).length(), Some(112));
    }

    #[test]
    fn test_classify_live_objects() {
        with_test_heap(HeapConfig::new(4096), |heap| {
            let mut xn = heap.begin().unwrap();
            let private = xn.alloc_private(10).unwrap();
            let object = xn.malloc(100).unwrap();
            xn.commit().unwrap();

            assert_eq!(private, Address::new(MAP_SIZE + 8));
            assert_eq!(heap.classify(private).unwrap(), ObjectScale::Small { words: 2 });
            assert_eq!(object.address(), Address::new(4096 - 112 - LARGE_BLOCK_OHD + 16));
            assert_eq!(
                heap.classify(object.address()).unwrap(),
                ObjectScale::Large(LeadingHeader::in_use(112))
            );
        });
    }

    #[test]
    fn test_classify_rejects_non_objects() {
        with_test_heap(HeapConfig::new(4096), |heap| {
            let mut xn = heap.begin().unwrap();
            let private = xn.alloc_private(16).unwrap();
            let object = xn.malloc(64).unwrap();
            let freed = xn.malloc(64).unwrap();
            xn.free(freed).unwrap();
            xn.commit().unwrap();

            let candidates = [
                Address::NULL,
                Address::new(MAP_SIZE),
                private - 8,
                private + 4,
                private + 8,
                object.address() - 16,
                object.address() + 16,
                object.address() + 64,
                freed.address(),
                Address::new(2048),
                Address::new(4096),
                Address::new(u64::MAX - 15),
            ];
            for address in candidates {
                assert!(
                    heap.classify(address).unwrap().is_not_an_object(),
                    "{address} classified as an object"
                );
            }
        });
    }

    #[test]
    fn test_classify_rejects_oversized_header() {
        with_test_heap(HeapConfig::new(4096), |heap| {
            let mut xn = heap.begin().unwrap();
            let object = xn.malloc(64).unwrap();
            let leader = object.address() - 16;
            xn.write(leader, &u64::MAX.to_le_bytes()).unwrap();
            xn.commit().unwrap();
            assert!(heap.classify(object.address()).unwrap().is_not_an_object());
        });
    }
}
