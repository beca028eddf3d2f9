use region::{Address, StoreError};
use snafu::Snafu;
use snafu_utils::{Located, Location};

use crate::config::ConfigError;

/// Errors reported by the heap.
///
/// Any error raised inside a transaction crashes it: every write the
/// transaction made is rolled back before the error reaches the caller.
#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(visibility(pub(crate)))]
pub enum HeapError {
    #[snafu(display("no transaction in progress"))]
    NotInTransaction {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid allocation size {size}, must be between 1 and {limit}"))]
    InvalidSize {
        size: u64,
        limit: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("attempt to free a private object at {object} as a user object"))]
    FreePrivateObject {
        object: Address,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{operation}: no object at {address}"))]
    NotAnObject {
        address: Address,
        operation: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("range out of region bounds: address={address}, length={length}, size={size}"))]
    RangeOutOfBounds {
        address: Address,
        length: u64,
        size: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no space left in small pool: requested={requested}, unassigned={unassigned}"))]
    SmallPoolExhausted {
        requested: u64,
        unassigned: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("small pool cannot grow past {limit:#x}: new end would be {end}"))]
    SmallPoolAddressLimit {
        end: Address,
        limit: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no space left in large pool: requested={requested}, unassigned={unassigned}"))]
    LargePoolExhausted {
        requested: u64,
        unassigned: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("write of {length} bytes at {address} crosses an object boundary"))]
    BoundaryViolation {
        address: Address,
        length: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("corrupt heap map: {reason}"))]
    CorruptMap {
        reason: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("corrupt {pool} pool free list {index} at {address}"))]
    CorruptFreeList {
        pool: &'static str,
        index: usize,
        address: Address,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("large block at {leader} extends past the end of the pool"))]
    AddressOverflow {
        leader: Address,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid heap configuration"))]
    Config {
        #[snafu(source)]
        source: ConfigError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("region access failed"))]
    Store {
        #[snafu(source)]
        source: StoreError,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for HeapError {
    fn location(&self) -> Location {
        match self {
            Self::NotInTransaction { location }
            | Self::InvalidSize { location, .. }
            | Self::FreePrivateObject { location, .. }
            | Self::NotAnObject { location, .. }
            | Self::RangeOutOfBounds { location, .. }
            | Self::SmallPoolExhausted { location, .. }
            | Self::SmallPoolAddressLimit { location, .. }
            | Self::LargePoolExhausted { location, .. }
            | Self::BoundaryViolation { location, .. }
            | Self::CorruptMap { location, .. }
            | Self::CorruptFreeList { location, .. }
            | Self::AddressOverflow { location, .. }
            | Self::Config { location, .. }
            | Self::Store { location, .. } => *location,
        }
    }
}

impl HeapError {
    /// Returns `true` if the error reports that a pool ran out of space.
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::SmallPoolExhausted { .. }
                | Self::SmallPoolAddressLimit { .. }
                | Self::LargePoolExhausted { .. }
        )
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use snafu::ResultExt as _;
    use snafu_utils::Report;

    use super::*;

    #[test]
    fn test_report_includes_store_cause() {
        let mut store = region::MemStore::new(16);
        let err = region::Store::write(&mut store, Address::new(0), &[0])
            .context(StoreSnafu)
            .unwrap_err();
        assert!(err.is_store());
        let text = Report::new(&err).to_string();
        assert!(text.starts_with("Error: region access failed\n  at "));
        assert!(text.ends_with("   0: write attempted outside of a transaction"));
    }

    #[test]
    fn test_exhaustion_kinds() {
        let err = LargePoolExhaustedSnafu {
            requested: 64_u64,
            unassigned: 16_u64,
        }
        .build();
        assert!(err.is_exhaustion());
        assert_eq!(
            err.to_string(),
            "no space left in large pool: requested=64, unassigned=16"
        );
        assert!(!NotInTransactionSnafu.build().is_exhaustion());
    }
}
