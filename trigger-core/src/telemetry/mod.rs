//! Telemetry event catalog and ring buffer shared by firmware and host targets.
//!
//! Event kinds serialize to compact `u16` codes for transport over diagnostics
//! channels. Records are timestamped with whatever monotonic instant the
//! caller supplies.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::control::{FireOutcome, HostCommand};
use crate::multiplexer::EventSource;

/// Identifier assigned to each telemetry record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    TriggerFired(EventSource),
    TriggerSuppressed(EventSource),
    StalePulse,
    ThresholdChanged,
    CountingPaused,
    CountingResumed,
    CounterReset,
    DesiredCountChanged,
    TriggerCountCleared,
    MeasurementCountChanged,
    /// A producer found its queue full and dropped an event.
    EventDropped(EventSource),
    /// The dispatcher refused a decoded command.
    CommandRejected,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::TriggerFired(source) => write!(f, "trigger-fired {source}"),
            TelemetryEventKind::TriggerSuppressed(source) => {
                write!(f, "trigger-suppressed {source}")
            }
            TelemetryEventKind::StalePulse => f.write_str("stale-pulse"),
            TelemetryEventKind::ThresholdChanged => f.write_str("threshold-changed"),
            TelemetryEventKind::CountingPaused => f.write_str("counting-paused"),
            TelemetryEventKind::CountingResumed => f.write_str("counting-resumed"),
            TelemetryEventKind::CounterReset => f.write_str("counter-reset"),
            TelemetryEventKind::DesiredCountChanged => f.write_str("desired-count-changed"),
            TelemetryEventKind::TriggerCountCleared => f.write_str("trigger-count-cleared"),
            TelemetryEventKind::MeasurementCountChanged => {
                f.write_str("measurement-count-changed")
            }
            TelemetryEventKind::EventDropped(source) => write!(f, "event-dropped {source}"),
            TelemetryEventKind::CommandRejected => f.write_str("command-rejected"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const TRIGGER_FIRED_BASE: u16 = 0x0000;
    const TRIGGER_SUPPRESSED_BASE: u16 = 0x0002;
    const EVENT_DROPPED_BASE: u16 = 0x0004;
    const STALE_PULSE_CODE: u16 = 0x0010;
    const THRESHOLD_CHANGED_CODE: u16 = 0x0011;
    const COUNTING_PAUSED_CODE: u16 = 0x0012;
    const COUNTING_RESUMED_CODE: u16 = 0x0013;
    const COUNTER_RESET_CODE: u16 = 0x0014;
    const DESIRED_COUNT_CODE: u16 = 0x0015;
    const COUNT_CLEARED_CODE: u16 = 0x0016;
    const MEASUREMENT_COUNT_CODE: u16 = 0x0017;
    const COMMAND_REJECTED_CODE: u16 = 0x0018;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::TriggerFired(source) => {
                Self::TRIGGER_FIRED_BASE + source_index(source)
            }
            TelemetryEventKind::TriggerSuppressed(source) => {
                Self::TRIGGER_SUPPRESSED_BASE + source_index(source)
            }
            TelemetryEventKind::EventDropped(source) => {
                Self::EVENT_DROPPED_BASE + source_index(source)
            }
            TelemetryEventKind::StalePulse => Self::STALE_PULSE_CODE,
            TelemetryEventKind::ThresholdChanged => Self::THRESHOLD_CHANGED_CODE,
            TelemetryEventKind::CountingPaused => Self::COUNTING_PAUSED_CODE,
            TelemetryEventKind::CountingResumed => Self::COUNTING_RESUMED_CODE,
            TelemetryEventKind::CounterReset => Self::COUNTER_RESET_CODE,
            TelemetryEventKind::DesiredCountChanged => Self::DESIRED_COUNT_CODE,
            TelemetryEventKind::TriggerCountCleared => Self::COUNT_CLEARED_CODE,
            TelemetryEventKind::MeasurementCountChanged => Self::MEASUREMENT_COUNT_CODE,
            TelemetryEventKind::CommandRejected => Self::COMMAND_REJECTED_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub const fn from_raw(code: u16) -> Self {
        match code {
            Self::STALE_PULSE_CODE => TelemetryEventKind::StalePulse,
            Self::THRESHOLD_CHANGED_CODE => TelemetryEventKind::ThresholdChanged,
            Self::COUNTING_PAUSED_CODE => TelemetryEventKind::CountingPaused,
            Self::COUNTING_RESUMED_CODE => TelemetryEventKind::CountingResumed,
            Self::COUNTER_RESET_CODE => TelemetryEventKind::CounterReset,
            Self::DESIRED_COUNT_CODE => TelemetryEventKind::DesiredCountChanged,
            Self::COUNT_CLEARED_CODE => TelemetryEventKind::TriggerCountCleared,
            Self::MEASUREMENT_COUNT_CODE => TelemetryEventKind::MeasurementCountChanged,
            Self::COMMAND_REJECTED_CODE => TelemetryEventKind::CommandRejected,
            0x0000 | 0x0001 => {
                TelemetryEventKind::TriggerFired(source_from_index(code - Self::TRIGGER_FIRED_BASE))
            }
            0x0002 | 0x0003 => TelemetryEventKind::TriggerSuppressed(source_from_index(
                code - Self::TRIGGER_SUPPRESSED_BASE,
            )),
            0x0004 | 0x0005 => {
                TelemetryEventKind::EventDropped(source_from_index(code - Self::EVENT_DROPPED_BASE))
            }
            other => TelemetryEventKind::Custom(other),
        }
    }
}

const fn source_index(source: EventSource) -> u16 {
    match source {
        EventSource::Pulse => 0,
        EventSource::Host => 1,
    }
}

const fn source_from_index(index: u16) -> EventSource {
    if index == 0 {
        EventSource::Pulse
    } else {
        EventSource::Host
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    Trigger(TriggerTelemetry),
    /// Old and new value of a host-configured parameter.
    Change { previous: u32, current: u32 },
    Stale { watch_point: u32, threshold: u32 },
    Command(HostCommand),
    Count(u32),
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Trigger(trigger) => {
                write!(f, "count={}", trigger.trigger_count)?;
                if let Some(ceiling) = trigger.ceiling {
                    write!(f, " ceiling={ceiling}")?;
                }
                if let Some(elapsed) = trigger.elapsed_since_previous {
                    write!(f, " since-previous={}us", elapsed.as_micros())?;
                }
                Ok(())
            }
            TelemetryPayload::Change { previous, current } => write!(f, "{previous} -> {current}"),
            TelemetryPayload::Stale {
                watch_point,
                threshold,
            } => write!(f, "watch-point={watch_point} threshold={threshold}"),
            TelemetryPayload::Command(command) => write!(f, "{command}"),
            TelemetryPayload::Count(count) => write!(f, "count={count}"),
        }
    }
}

/// Details recorded for fired and suppressed triggers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TriggerTelemetry {
    pub trigger_count: u32,
    /// Ceiling in force when the trigger was suppressed.
    pub ceiling: Option<u32>,
    pub elapsed_since_previous: Option<Duration>,
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Microsecond tick counts.
impl TelemetryInstant for u64 {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.saturating_sub(earlier))
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_trigger_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_trigger_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    #[must_use]
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records the result of a fire sequence, tracking time since the previous
    /// actuation.
    pub fn record_fire(
        &mut self,
        source: EventSource,
        outcome: FireOutcome,
        timestamp: TInstant,
    ) -> EventId {
        match outcome {
            FireOutcome::Fired { trigger_count } => {
                let elapsed = self
                    .last_trigger_at
                    .map(|previous| timestamp.saturating_duration_since(previous));
                self.last_trigger_at = Some(timestamp);
                self.record(
                    TelemetryEventKind::TriggerFired(source),
                    TelemetryPayload::Trigger(TriggerTelemetry {
                        trigger_count,
                        ceiling: None,
                        elapsed_since_previous: elapsed,
                    }),
                    timestamp,
                )
            }
            FireOutcome::Suppressed {
                trigger_count,
                ceiling,
            } => self.record(
                TelemetryEventKind::TriggerSuppressed(source),
                TelemetryPayload::Trigger(TriggerTelemetry {
                    trigger_count,
                    ceiling: Some(ceiling),
                    elapsed_since_previous: None,
                }),
                timestamp,
            ),
        }
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codes_round_trip() {
        let kinds = [
            TelemetryEventKind::TriggerFired(EventSource::Pulse),
            TelemetryEventKind::TriggerFired(EventSource::Host),
            TelemetryEventKind::TriggerSuppressed(EventSource::Host),
            TelemetryEventKind::EventDropped(EventSource::Pulse),
            TelemetryEventKind::StalePulse,
            TelemetryEventKind::ThresholdChanged,
            TelemetryEventKind::CounterReset,
            TelemetryEventKind::CommandRejected,
        ];

        for kind in kinds {
            assert_eq!(TelemetryEventKind::from_raw(kind.to_raw()), kind);
        }
        assert_eq!(
            TelemetryEventKind::from_raw(0x0400),
            TelemetryEventKind::Custom(0x0400)
        );
    }

    #[test]
    fn fire_records_elapsed_between_triggers() {
        let mut telemetry: TelemetryRecorder<u64, 8> = TelemetryRecorder::new();

        telemetry.record_fire(
            EventSource::Host,
            FireOutcome::Fired { trigger_count: 1 },
            100,
        );
        telemetry.record_fire(
            EventSource::Pulse,
            FireOutcome::Fired { trigger_count: 2 },
            1_100,
        );

        let latest = telemetry.latest().expect("record present");
        assert_eq!(
            latest.event,
            TelemetryEventKind::TriggerFired(EventSource::Pulse)
        );
        assert_eq!(
            latest.details,
            TelemetryPayload::Trigger(TriggerTelemetry {
                trigger_count: 2,
                ceiling: None,
                elapsed_since_previous: Some(Duration::from_micros(1_000)),
            })
        );
    }

    #[test]
    fn ring_keeps_newest_records() {
        let mut telemetry: TelemetryRecorder<u64, 2> = TelemetryRecorder::new();
        for tick in 0..3u64 {
            telemetry.record(
                TelemetryEventKind::StalePulse,
                TelemetryPayload::None,
                tick,
            );
        }

        let ids: heapless::Vec<EventId, 2> =
            telemetry.oldest_first().map(|record| record.id).collect();
        assert_eq!(ids.as_slice(), &[1, 2]);
    }
}
