use bitflags::bitflags;
use snafu::{Snafu, ensure};
use snafu_utils::{Located, Location};

use crate::{
    header::{LARGE_HEADER_SIZE, MIN_LARGE_BLOCK},
    map::MAP_SIZE,
};

bitflags! {
    /// Options persisted in the map when a region is formatted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeapFlags: u64 {
        /// Check every user write against the extents of the objects the
        /// transaction allocated or staged.
        const BOUNDED = 1 << 0;
    }
}

/// Smallest region that can hold the map and a couple of large blocks.
pub const MIN_REGION_SIZE: u64 = MAP_SIZE + 2 * MIN_LARGE_BLOCK;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("region size {size} is not a multiple of {align}"))]
    MisalignedRegionSize {
        size: u64,
        align: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("region size {size} is smaller than the minimum {min}"))]
    RegionTooSmall {
        size: u64,
        min: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("configured region size {configured} does not match the store size {actual}"))]
    StoreSizeMismatch {
        configured: u64,
        actual: u64,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for ConfigError {
    fn location(&self) -> Location {
        match self {
            Self::MisalignedRegionSize { location, .. }
            | Self::RegionTooSmall { location, .. }
            | Self::StoreSizeMismatch { location, .. } => *location,
        }
    }
}

/// Parameters for formatting a region.
///
/// ```rust
/// use heap::{HeapConfig, HeapFlags};
///
/// let config = HeapConfig::new(64 * 1024).bounded(true);
/// assert!(config.flags().contains(HeapFlags::BOUNDED));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    region_size: u64,
    flags: HeapFlags,
}

impl HeapConfig {
    #[must_use]
    pub const fn new(region_size: u64) -> Self {
        Self {
            region_size,
            flags: HeapFlags::empty(),
        }
    }

    /// Enables or disables write boundary checks.
    #[must_use]
    pub fn bounded(mut self, bounded: bool) -> Self {
        self.flags.set(HeapFlags::BOUNDED, bounded);
        self
    }

    #[must_use]
    pub const fn flags(&self) -> HeapFlags {
        self.flags
    }

    #[must_use]
    pub const fn region_size(&self) -> u64 {
        self.region_size
    }

    /// Checks that the region size can be formatted.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is not a multiple of the large block
    /// granularity or too small to hold the map.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let size = self.region_size;
        ensure!(
            size.is_multiple_of(LARGE_HEADER_SIZE),
            MisalignedRegionSizeSnafu {
                size,
                align: LARGE_HEADER_SIZE,
            }
        );
        ensure!(
            size >= MIN_REGION_SIZE,
            RegionTooSmallSnafu {
                size,
                min: MIN_REGION_SIZE,
            }
        );
        Ok(())
    }

    pub(crate) fn validate_for(&self, store_size: u64) -> Result<(), ConfigError> {
        self.validate()?;
        ensure!(
            self.region_size == store_size,
            StoreSizeMismatchSnafu {
                configured: self.region_size,
                actual: store_size,
            }
        );
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = HeapConfig::new(4096);
        assert_eq!(config.flags(), HeapFlags::empty());
        let config = config.bounded(true);
        assert_eq!(config.flags(), HeapFlags::BOUNDED);
        assert_eq!(config.clone().bounded(false).flags(), HeapFlags::empty());
        assert_eq!(config.region_size(), 4096);
    }

    #[test]
    fn test_validate() {
        assert!(HeapConfig::new(MIN_REGION_SIZE).validate().is_ok());

        let err = HeapConfig::new(4100).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MisalignedRegionSize {
                size: 4100,
                align: 16,
                ..
            }
        ));

        let err = HeapConfig::new(MIN_REGION_SIZE - 16).validate().unwrap_err();
        assert!(matches!(err, ConfigError::RegionTooSmall { .. }));

        let err = HeapConfig::new(4096).validate_for(8192).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::StoreSizeMismatch {
                configured: 4096,
                actual: 8192,
                ..
            }
        ));
        assert_eq!(err.location().file(), file!());
    }
}
