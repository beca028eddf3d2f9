//! Error plumbing shared by the recorder crates.
//!
//! [`Location`] is captured implicitly by `snafu` error variants, and
//! [`Report`] renders an error, the place it was raised and its chain of
//! causes in a form suitable for a single diagnostic log record.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::{error::Error, fmt};

use snafu::GenerateImplicitData;

/// Source location where an error value was constructed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl Location {
    /// Returns the source file name.
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    /// Returns the line number.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Errors that remember where they were raised.
pub trait Located {
    /// Returns the location the error was constructed at.
    fn location(&self) -> Location;
}

/// Multi-line rendering of an error and its causes.
///
/// ```text
/// Error: no space left in large pool: requested=4128, unassigned=64
///   at crates/heap/src/large.rs:120:9
///
/// Caused by:
///    0: ...
/// ```
pub struct Report<'a, E> {
    error: &'a E,
}

impl<'a, E> Report<'a, E> {
    pub fn new(error: &'a E) -> Self {
        Self { error }
    }
}

impl<E> fmt::Debug for Report<'_, E>
where
    E: Error + Located,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<'_, E>
where
    E: Error + Located,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        write!(f, "  at {}", self.error.location())?;
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f)?;
            write!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f)?;
            write!(f, "{index:4}: {s}")?;
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use snafu::{ResultExt as _, Snafu};

    use super::*;

    #[derive(Debug, Snafu)]
    enum Inner {
        #[snafu(display("inner failure"))]
        Failure {
            #[snafu(implicit)]
            location: Location,
        },
    }

    #[derive(Debug, Snafu)]
    enum Outer {
        #[snafu(display("outer failure"))]
        Wrapped {
            #[snafu(source)]
            source: Inner,
            #[snafu(implicit)]
            location: Location,
        },
    }

    impl Located for Outer {
        fn location(&self) -> Location {
            match self {
                Self::Wrapped { location, .. } => *location,
            }
        }
    }

    fn fail() -> Result<(), Inner> {
        FailureSnafu.fail()
    }

    #[test]
    fn test_location_points_at_caller() {
        let location = Location::default();
        assert_eq!(location.file(), file!());
        assert_eq!(location.line(), line!() - 2);
    }

    #[test]
    fn test_report_lists_causes() {
        let err = fail().context(WrappedSnafu).unwrap_err();
        let text = Report::new(&err).to_string();
        assert!(text.starts_with("Error: outer failure\n  at "));
        assert!(text.contains("Caused by:"));
        assert!(text.ends_with("   0: inner failure"));
    }
}
