//! Persisted words and typed access to the region.

use core::fmt;

use dataview::{Pod, PodMethods as _};
use region::{Address, Store};
use snafu::ResultExt as _;

use crate::error::{HeapError, StoreSnafu};

/// Size of a persisted word in bytes.
pub const WORD_SIZE: u64 = 8;

/// A 64-bit integer stored in little-endian byte order.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Word(u64);

// SAFETY: `Word` is a transparent wrapper around `u64`, which is `Pod`.
unsafe impl Pod for Word {}

impl Word {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value.to_le())
    }

    pub(crate) const fn get(self) -> u64 {
        u64::from_le(self.0)
    }

    pub(crate) fn set(&mut self, value: u64) {
        *self = Self::new(value);
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.get())
    }
}

/// Reads a plain-data value stored at `at`.
pub(crate) fn read_pod<S, P>(store: &S, at: Address) -> Result<P, HeapError>
where
    S: Store + ?Sized,
    P: Pod,
{
    let mut value = P::zeroed();
    store.read(at, value.as_bytes_mut()).context(StoreSnafu)?;
    Ok(value)
}

/// Writes a plain-data value at `at`.
pub(crate) fn write_pod<S, P>(store: &mut S, at: Address, value: &P) -> Result<(), HeapError>
where
    S: Store + ?Sized,
    P: Pod,
{
    store.write(at, value.as_bytes()).context(StoreSnafu)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use region::MemStore;

    use super::*;

    #[test]
    fn test_word_is_little_endian() {
        let word = Word::new(0x0102_0304_0506_0708);
        assert_eq!(word.as_bytes(), &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(word.get(), 0x0102_0304_0506_0708);
        assert_eq!(format!("{word:?}"), "0x102030405060708");
    }

    #[test]
    fn test_pod_access() {
        let mut store = MemStore::new(32);
        store.begin().unwrap();
        write_pod(&mut store, Address::new(8), &Word::new(0xdead_beef)).unwrap();
        store.commit().unwrap();

        let word: Word = read_pod(&store, Address::new(8)).unwrap();
        assert_eq!(word.get(), 0xdead_beef);
        assert_eq!(&store.as_bytes()[8..12], &[0xef, 0xbe, 0xad, 0xde]);

        let err = read_pod::<_, Word>(&store, Address::new(28)).unwrap_err();
        assert!(err.is_store());
    }
}
