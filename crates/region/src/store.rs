use snafu::Snafu;
use snafu_utils::{Located, Location};

use crate::Address;

/// Errors reported by a [`Store`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display(
        "byte range out of region bounds: address={address}, length={length}, size={size}"
    ))]
    OutOfBounds {
        address: Address,
        length: u64,
        size: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("write attempted outside of a transaction"))]
    NotInTransaction {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("transaction already in progress"))]
    AlreadyInTransaction {
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for StoreError {
    fn location(&self) -> Location {
        match self {
            Self::OutOfBounds { location, .. }
            | Self::NotInTransaction { location }
            | Self::AlreadyInTransaction { location } => *location,
        }
    }
}

/// Durable, byte-addressable storage with all-or-nothing transactions.
///
/// Reads are allowed at any time. Writes are only valid between
/// [`begin`](Self::begin) and [`commit`](Self::commit); a
/// [`crash`](Self::crash) discards every write made since `begin`.
pub trait Store {
    /// Returns the total size of the region in bytes.
    fn size(&self) -> u64;

    /// Reads `buf.len()` bytes starting at `address`.
    fn read(&self, address: Address, buf: &mut [u8]) -> Result<(), StoreError>;

    /// Writes `bytes` starting at `address`.
    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<(), StoreError>;

    /// Starts a transaction.
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Returns `true` while a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Makes every write of the current transaction durable.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Aborts the current transaction, rolling back all of its writes.
    ///
    /// Does nothing if no transaction is open.
    fn crash(&mut self);
}
