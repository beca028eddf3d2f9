//! Objects a transaction may write to.

use alloc::vec::Vec;

use region::Address;

/// Byte range `from..to` of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectExtent {
    pub from: Address,
    pub to: Address,
}

impl ObjectExtent {
    /// Returns `true` if `from..to` lies entirely inside this extent.
    #[must_use]
    pub fn contains(&self, from: Address, to: Address) -> bool {
        self.from <= from && to <= self.to
    }
}

/// Extents of the objects allocated or staged by the current transaction.
///
/// Lookups are linear; a transaction touches few objects.
#[derive(Debug, Default, Clone)]
pub struct KnownObjects {
    extents: Vec<ObjectExtent>,
}

impl KnownObjects {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            extents: Vec::new(),
        }
    }

    pub(crate) fn note(&mut self, from: Address, size: u64) {
        self.extents.push(ObjectExtent {
            from,
            to: from + size,
        });
    }

    /// Returns `true` if an extent starts at `from`.
    #[must_use]
    pub fn is_known(&self, from: Address) -> bool {
        self.extents.iter().any(|extent| extent.from == from)
    }

    pub(crate) fn forget(&mut self, from: Address) -> Option<ObjectExtent> {
        let index = self.extents.iter().position(|extent| extent.from == from)?;
        Some(self.extents.remove(index))
    }

    pub(crate) fn clear(&mut self) {
        self.extents.clear();
    }

    /// Returns `true` unless one extent holds all of `from..from + length`.
    #[must_use]
    pub fn boundary_violated(&self, from: Address, length: u64) -> bool {
        let Some(to) = from.checked_add(length) else {
            return true;
        };
        !self.extents.iter().any(|extent| extent.contains(from, to))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectExtent> {
        self.extents.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn known(extents: &[(u64, u64)]) -> KnownObjects {
        let mut known = KnownObjects::new();
        for &(from, size) in extents {
            known.note(Address::new(from), size);
        }
        known
    }

    #[test]
    fn test_containment() {
        let known = known(&[(0x100, 0x40), (0x140, 0x40)]);
        let at = Address::new;
        assert!(!known.boundary_violated(at(0x100), 0x40));
        assert!(!known.boundary_violated(at(0x110), 0x10));
        assert!(!known.boundary_violated(at(0x140), 0));
        assert!(!known.boundary_violated(at(0x180), 0));
        // straddles two adjacent objects
        assert!(known.boundary_violated(at(0x130), 0x20));
        assert!(known.boundary_violated(at(0xf0), 0x20));
        assert!(known.boundary_violated(at(0x170), 0x20));
        assert!(known.boundary_violated(at(0x200), 1));
        assert!(known.boundary_violated(at(u64::MAX), 2));
        assert!(KnownObjects::new().boundary_violated(at(0x100), 1));
    }

    #[test]
    fn test_forget() {
        let mut known = known(&[(0x100, 0x40), (0x200, 0x10)]);
        assert!(known.is_known(Address::new(0x200)));
        assert_eq!(
            known.forget(Address::new(0x100)),
            Some(ObjectExtent {
                from: Address::new(0x100),
                to: Address::new(0x140),
            })
        );
        assert_eq!(known.forget(Address::new(0x100)), None);
        assert!(known.boundary_violated(Address::new(0x100), 1));
        assert_eq!(known.len(), 1);
        assert_eq!(known.iter().next().map(|e| e.to), Some(Address::new(0x210)));
        known.clear();
        assert!(known.is_empty());
    }
}
