//! Time source for reassembly timeouts.
//!
//! Production code uses `std::time::Instant`. Unit tests use
//! `mock_instant::thread_local::Instant`, advanced through `MockClock`, so
//! slot expiry can be checked without sleeping.
//!
//! ```ignore
//! MockClock::set_time(Duration::ZERO);
//! reassembler.accept(&first_fragment, Instant::now());
//! MockClock::advance(Duration::from_millis(100));
//! assert!(reassembler.expire(Instant::now()));
//! ```

#[cfg(test)]
pub use mock_instant::thread_local::Instant;

#[cfg(not(test))]
pub use std::time::Instant;

#[cfg(test)]
pub use mock_instant::thread_local::MockClock;
