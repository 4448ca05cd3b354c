//! Time source abstraction.

/// Monotonic time source.
///
/// Used by the service runners to timestamp engine inputs. The engine
/// itself only ever sees the `now_ms` values passed to it.
///
/// # Example
///
/// ```rust
/// use tambox::traits::Clock;
/// use tambox::hal::MockClock;
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.advance(100);
/// assert_eq!(clock.now_ms(), 100);
/// ```
pub trait Clock {
    /// Returns current time in milliseconds since an arbitrary epoch.
    ///
    /// Must be monotonically increasing.
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
