use core::fmt;

use region::Address;

/// Handle to a user object in the large pool.
///
/// The handle is the address of the object's first user byte. It is plain
/// data and stays valid across restarts until the object is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Object(Address);

impl Object {
    /// Reinterprets a region address as an object handle.
    ///
    /// Nothing is checked here; operations taking an `Object` classify it
    /// first.
    #[must_use]
    pub const fn from_address(address: Address) -> Self {
        Self(address)
    }

    #[must_use]
    pub const fn address(self) -> Address {
        self.0
    }
}

impl From<Object> for Address {
    fn from(object: Object) -> Self {
        object.0
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
