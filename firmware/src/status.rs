#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Producer tasks cannot block on a full queue, so they bump a drop counter
//! here instead. The control task drains the counters into its statistics on
//! every iteration.

use core::time::Duration;

use embassy_time::Instant;
use portable_atomic::{AtomicU32, Ordering};
use trigger_core::multiplexer::EventSource;
use trigger_core::telemetry::TelemetryInstant;

/// Pulse events lost to a full pulse queue.
static PULSES_DROPPED: AtomicU32 = AtomicU32::new(0);
/// Host commands lost to a full host queue.
static COMMANDS_DROPPED: AtomicU32 = AtomicU32::new(0);

/// Monotonic timestamp used for telemetry records.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[cfg(target_os = "none")]
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        let elapsed = self.0.saturating_duration_since(earlier.0);
        Duration::from_micros(elapsed.as_micros())
    }
}

fn counter(source: EventSource) -> &'static AtomicU32 {
    match source {
        EventSource::Pulse => &PULSES_DROPPED,
        EventSource::Host => &COMMANDS_DROPPED,
    }
}

/// Notes one event dropped by the given producer.
pub fn record_dropped(source: EventSource) {
    counter(source).fetch_add(1, Ordering::Relaxed);
}

/// Returns and clears the drop count for the given producer.
#[must_use]
pub fn take_dropped(source: EventSource) -> u32 {
    counter(source).swap(0, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_drop_counter_is_drained_on_take() {
        let _ = take_dropped(EventSource::Host);

        record_dropped(EventSource::Host);
        record_dropped(EventSource::Host);

        assert_eq!(take_dropped(EventSource::Host), 2);
        assert_eq!(take_dropped(EventSource::Host), 0);
    }

    #[test]
    fn elapsed_time_saturates_at_zero() {
        let earlier = FirmwareInstant::from(Instant::from_micros(1_500));
        let later = FirmwareInstant::from(Instant::from_micros(4_000));

        assert_eq!(
            later.saturating_duration_since(earlier),
            Duration::from_micros(2_500)
        );
        assert_eq!(earlier.saturating_duration_since(later), Duration::ZERO);
    }
}
