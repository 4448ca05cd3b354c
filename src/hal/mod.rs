//! Platform implementations of the traits in [`crate::traits`].
//!
//! - `mock`: controllable test doubles for desktop development and tests
//! - `system`: `std` monotonic clock (requires `std` feature)

pub mod mock;

#[cfg(feature = "std")]
pub mod system;

pub use mock::*;

#[cfg(feature = "std")]
pub use system::*;
