//! Allocation tracing.
//!
//! A [`TraceSink`] sees every successful allocation and free, plus a memo
//! for each rejected free, tagged with the caller's source location.
//! Sinks cannot fail and never change what the allocator does.
//!
//! An event is sent once its operation has succeeded. Events are not
//! retracted when the enclosing transaction is later rolled back.

use arrayvec::ArrayVec;
use region::Address;
use snafu_utils::Location;

pub trait TraceSink {
    fn alloc(&mut self, object: Address, size: u64, location: Location);
    fn free(&mut self, object: Address, location: Location);
    fn memo(&mut self, address: Address, message: &'static str, location: Location);
}

impl<T> TraceSink for &mut T
where
    T: TraceSink + ?Sized,
{
    fn alloc(&mut self, object: Address, size: u64, location: Location) {
        (**self).alloc(object, size, location);
    }

    fn free(&mut self, object: Address, location: Location) {
        (**self).free(object, location);
    }

    fn memo(&mut self, address: Address, message: &'static str, location: Location) {
        (**self).memo(address, message, location);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrace;

impl TraceSink for NoTrace {
    fn alloc(&mut self, _object: Address, _size: u64, _location: Location) {}

    fn free(&mut self, _object: Address, _location: Location) {}

    fn memo(&mut self, _address: Address, _message: &'static str, _location: Location) {}
}

/// Emits each event as a `log` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTrace;

impl TraceSink for LogTrace {
    fn alloc(&mut self, object: Address, size: u64, location: Location) {
        log::trace!("alloc {object} size={size} at {location}");
    }

    fn free(&mut self, object: Address, location: Location) {
        log::trace!("free {object} at {location}");
    }

    fn memo(&mut self, address: Address, message: &'static str, location: Location) {
        log::warn!("{message}: {address} at {location}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum TraceEvent {
    Alloc {
        object: Address,
        size: u64,
        location: Location,
    },
    Free {
        object: Address,
        location: Location,
    },
    Memo {
        address: Address,
        message: &'static str,
        location: Location,
    },
}

/// Records up to `CAP` events in memory.
///
/// Once full, further events are counted in [`dropped`](Self::dropped)
/// and otherwise ignored.
#[derive(Debug, Default)]
pub struct TraceBuffer<const CAP: usize> {
    events: ArrayVec<TraceEvent, CAP>,
    dropped: usize,
}

impl<const CAP: usize> TraceBuffer<CAP> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: ArrayVec::new(),
            dropped: 0,
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Number of events lost because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Starts a new episode.
    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    /// Allocations recorded in this episode that have not been freed since.
    pub fn outstanding(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter().enumerate().filter_map(|(index, event)| {
            let TraceEvent::Alloc { object, .. } = event else {
                return None;
            };
            let freed = self.events[index + 1..]
                .iter()
                .any(|later| matches!(later, TraceEvent::Free { object: o, .. } if o == object));
            (!freed).then_some(event)
        })
    }

    fn record(&mut self, event: TraceEvent) {
        if self.events.try_push(event).is_err() {
            self.dropped += 1;
        }
    }
}

impl<const CAP: usize> TraceSink for TraceBuffer<CAP> {
    fn alloc(&mut self, object: Address, size: u64, location: Location) {
        self.record(TraceEvent::Alloc {
            object,
            size,
            location,
        });
    }

    fn free(&mut self, object: Address, location: Location) {
        self.record(TraceEvent::Free { object, location });
    }

    fn memo(&mut self, address: Address, message: &'static str, location: Location) {
        self.record(TraceEvent::Memo {
            address,
            message,
            location,
        });
    }
}
