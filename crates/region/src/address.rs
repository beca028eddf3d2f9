use core::{
    fmt,
    ops::{Add, Sub},
};

use platform_cast::CastInto as _;

macro_rules! impl_hex {
    ($ty:ty) => {
        impl fmt::LowerHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl fmt::UpperHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::UpperHex::fmt(&self.0, f)
            }
        }
    };
}

/// Byte offset into a region.
///
/// Addresses are plain offsets from the start of the region, never
/// in-process pointers, so they stay meaningful across restarts. Address
/// zero is the location of the heap's root structure and doubles as the
/// null link in persisted lists.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(u64);
impl_hex!(Address);

impl Address {
    /// The null address.
    pub const NULL: Self = Self(0);

    /// Creates an address from a raw region offset.
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw region offset.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns `true` for the null address.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Converts a raw link value into an address, mapping zero to `None`.
    #[must_use]
    pub const fn from_link(link: u64) -> Option<Self> {
        if link == 0 { None } else { Some(Self(link)) }
    }

    /// Converts an optional address into a raw link value.
    #[must_use]
    pub const fn to_link(addr: Option<Self>) -> u64 {
        match addr {
            Some(addr) => addr.0,
            None => 0,
        }
    }

    /// Returns `true` if the address is a multiple of `align`.
    ///
    /// # Panics
    ///
    /// Panics if `align` is zero.
    #[must_use]
    pub const fn is_aligned(self, align: u64) -> bool {
        assert!(align > 0, "alignment must be non-zero");
        self.0.is_multiple_of(align)
    }

    /// Adds a byte count, returning `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Subtracts a byte count, returning `None` on underflow.
    #[must_use]
    pub const fn checked_sub(self, bytes: u64) -> Option<Self> {
        match self.0.checked_sub(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Returns the distance from `base` up to this address.
    ///
    /// Returns `None` if `base` lies above this address.
    #[must_use]
    pub const fn offset_from(self, base: Self) -> Option<u64> {
        self.0.checked_sub(base.0)
    }

    /// Converts the address into an index into an in-memory image.
    #[must_use]
    pub fn to_index(self) -> usize {
        self.0.cast_into()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Add<u64> for Address {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        self.checked_add(rhs).unwrap()
    }
}

impl Sub<u64> for Address {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self::Output {
        self.checked_sub(rhs).unwrap()
    }
}

impl Sub<Self> for Address {
    type Output = u64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.offset_from(rhs).unwrap()
    }
}
