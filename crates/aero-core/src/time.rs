//! Monotonic device time

/// Monotonic millisecond clock, starting at an arbitrary origin (usually boot).
///
/// Samples are only ever stamped with this time. Converting to wall-clock time
/// is done at the reporting boundary, see [`crate::report::WallClock`].
pub trait Clock {
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    #[inline]
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Clock backed by the embassy time driver of the target.
#[cfg(feature = "embassy-time")]
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

#[cfg(feature = "embassy-time")]
impl Clock for EmbassyClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        embassy_time::Instant::now().as_millis()
    }
}
