//! Event multiplexer: the single consumer of pulse and host-command events.
//!
//! Platforms hand [`ControlLoop::service_one`] one consumer per source after
//! their readiness wait returns. Exactly one event is drained per call, so a
//! burst on one queue cannot monopolize the loop. When both queues are ready
//! the [`ReadinessArbiter`] picks the source that was not serviced last,
//! starting with the pulse source.

use core::fmt;

use crate::control::{
    CommandDispatcher, ControlConfig, ControlState, DispatchError, DispatchOutcome, FireOutcome,
    HostCommand, PulseEvent, PulseEventSource, PulseOutcome, RadarActuator, TriggerEvent,
};
use crate::telemetry::{
    TELEMETRY_RING_CAPACITY, TelemetryEventKind, TelemetryInstant, TelemetryPayload,
    TelemetryRecorder,
};

/// Origin of an event drained by the control loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventSource {
    Pulse,
    Host,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Pulse => f.write_str("pulse"),
            EventSource::Host => f.write_str("host"),
        }
    }
}

/// Returned when an event is refused because its queue is at capacity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueFull;

impl fmt::Display for QueueFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue full")
    }
}

/// Bounded, non-blocking producer side of an event queue.
pub trait EventQueueProducer {
    type Item;

    /// Attempts to enqueue an event without blocking.
    ///
    /// # Errors
    ///
    /// Fails fast with [`QueueFull`] instead of waiting for room.
    fn try_enqueue(&mut self, item: Self::Item) -> Result<(), QueueFull>;
}

/// Consumer side of an event queue.
pub trait EventQueueConsumer {
    type Item;

    /// Returns `true` when at least one event is waiting.
    fn is_ready(&self) -> bool;

    /// Takes the oldest event without blocking, or `None` when the queue is
    /// empty.
    fn try_dequeue(&mut self) -> Option<Self::Item>;
}

/// Deterministic tie-break between two ready sources.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadinessArbiter {
    last: Option<EventSource>,
}

impl ReadinessArbiter {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Picks the source to drain this iteration, or `None` when neither is ready.
    ///
    /// A lone ready source always wins. On a tie the source that was not
    /// picked last time wins, with the pulse source first.
    pub fn select(&mut self, pulse_ready: bool, host_ready: bool) -> Option<EventSource> {
        let choice = match (pulse_ready, host_ready) {
            (false, false) => return None,
            (true, false) => EventSource::Pulse,
            (false, true) => EventSource::Host,
            (true, true) => match self.last {
                Some(EventSource::Pulse) => EventSource::Host,
                Some(EventSource::Host) | None => EventSource::Pulse,
            },
        };
        self.last = Some(choice);
        Some(choice)
    }

    /// Source picked on the previous call, if any.
    #[must_use]
    pub const fn last(&self) -> Option<EventSource> {
        self.last
    }
}

/// Counters describing the loop's history.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LoopStats {
    pub timeouts: u32,
    pub pulse_events: u32,
    pub host_events: u32,
    pub stale_pulses: u32,
    pub suppressed_fires: u32,
    pub rejected_commands: u32,
    pub dropped_events: u32,
}

/// Effect of one loop iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoopOutcome {
    /// Neither queue held an event.
    Idle,
    Pulse(PulseOutcome),
    Host {
        command: HostCommand,
        result: Result<DispatchOutcome, DispatchError>,
    },
}

/// Owns [`ControlState`] and applies events to it one at a time.
pub struct ControlLoop<P, A, TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    state: ControlState,
    dispatcher: CommandDispatcher<P, A>,
    arbiter: ReadinessArbiter,
    stats: LoopStats,
    telemetry: TelemetryRecorder<TInstant, CAPACITY>,
}

impl<P, A, TInstant, const CAPACITY: usize> ControlLoop<P, A, TInstant, CAPACITY>
where
    P: PulseEventSource,
    A: RadarActuator,
    TInstant: TelemetryInstant,
{
    /// Builds the loop, programs the start-up threshold, and starts counting.
    pub fn new(pulses: P, actuator: A, config: &ControlConfig) -> Self {
        let mut state = config.initial_state();
        let mut dispatcher = CommandDispatcher::new(pulses, actuator, config);
        dispatcher.start(&mut state);

        Self {
            state,
            dispatcher,
            arbiter: ReadinessArbiter::new(),
            stats: LoopStats::default(),
            telemetry: TelemetryRecorder::new(),
        }
    }

    /// Drains at most one event, choosing between the two queues with the
    /// arbiter.
    pub fn service_one<PQ, HQ>(
        &mut self,
        pulse_queue: &mut PQ,
        host_queue: &mut HQ,
        now: TInstant,
    ) -> LoopOutcome
    where
        PQ: EventQueueConsumer<Item = PulseEvent>,
        HQ: EventQueueConsumer<Item = HostCommand>,
    {
        let Some(source) = self
            .arbiter
            .select(pulse_queue.is_ready(), host_queue.is_ready())
        else {
            return LoopOutcome::Idle;
        };

        let event = match source {
            EventSource::Pulse => pulse_queue.try_dequeue().map(TriggerEvent::from),
            EventSource::Host => host_queue.try_dequeue().map(TriggerEvent::from),
        };

        event.map_or(LoopOutcome::Idle, |event| self.handle_event(event, now))
    }

    /// Applies a single event.
    pub fn handle_event(&mut self, event: TriggerEvent, now: TInstant) -> LoopOutcome {
        match event {
            TriggerEvent::PulseThresholdReached(pulse) => {
                LoopOutcome::Pulse(self.handle_pulse(pulse, now))
            }
            TriggerEvent::Host(command) => LoopOutcome::Host {
                command,
                result: self.handle_command(command, now),
            },
        }
    }

    /// Counts a readiness wait that timed out with no event.
    pub fn record_timeout(&mut self) {
        self.stats.timeouts = self.stats.timeouts.saturating_add(1);
    }

    /// Records events a producer had to drop because its queue was full.
    pub fn record_dropped(&mut self, source: EventSource, count: u32, now: TInstant) {
        if count == 0 {
            return;
        }
        self.stats.dropped_events = self.stats.dropped_events.saturating_add(count);
        self.telemetry.record(
            TelemetryEventKind::EventDropped(source),
            TelemetryPayload::Count(count),
            now,
        );
    }

    #[must_use]
    pub fn state(&self) -> &ControlState {
        &self.state
    }

    #[must_use]
    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryRecorder<TInstant, CAPACITY> {
        &self.telemetry
    }

    #[must_use]
    pub fn dispatcher(&self) -> &CommandDispatcher<P, A> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut CommandDispatcher<P, A> {
        &mut self.dispatcher
    }

    fn handle_pulse(&mut self, pulse: PulseEvent, now: TInstant) -> PulseOutcome {
        self.stats.pulse_events = self.stats.pulse_events.saturating_add(1);

        let outcome = self.dispatcher.handle_pulse(&mut self.state, pulse);
        match outcome {
            PulseOutcome::Fired(fire) => self.note_fire(EventSource::Pulse, fire, now),
            PulseOutcome::Stale {
                watch_point,
                threshold,
            } => {
                self.stats.stale_pulses = self.stats.stale_pulses.saturating_add(1);
                self.telemetry.record(
                    TelemetryEventKind::StalePulse,
                    TelemetryPayload::Stale {
                        watch_point,
                        threshold,
                    },
                    now,
                );
            }
        }
        outcome
    }

    fn handle_command(
        &mut self,
        command: HostCommand,
        now: TInstant,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.stats.host_events = self.stats.host_events.saturating_add(1);

        let result = self.dispatcher.dispatch(&mut self.state, command);
        match result {
            Ok(outcome) => self.note_dispatch(outcome, now),
            Err(_) => {
                self.stats.rejected_commands = self.stats.rejected_commands.saturating_add(1);
                self.telemetry.record(
                    TelemetryEventKind::CommandRejected,
                    TelemetryPayload::Command(command),
                    now,
                );
            }
        }
        result
    }

    fn note_fire(&mut self, source: EventSource, outcome: FireOutcome, now: TInstant) {
        if !outcome.fired() {
            self.stats.suppressed_fires = self.stats.suppressed_fires.saturating_add(1);
        }
        self.telemetry.record_fire(source, outcome, now);
    }

    fn note_dispatch(&mut self, outcome: DispatchOutcome, now: TInstant) {
        let (event, details) = match outcome {
            DispatchOutcome::Fired(fire) => {
                self.note_fire(EventSource::Host, fire, now);
                return;
            }
            DispatchOutcome::ThresholdChanged { previous, current } => (
                TelemetryEventKind::ThresholdChanged,
                TelemetryPayload::Change { previous, current },
            ),
            DispatchOutcome::DesiredCountSet { previous, current } => (
                TelemetryEventKind::DesiredCountChanged,
                TelemetryPayload::Change { previous, current },
            ),
            DispatchOutcome::CountCleared { previous } => (
                TelemetryEventKind::TriggerCountCleared,
                TelemetryPayload::Change {
                    previous,
                    current: 0,
                },
            ),
            DispatchOutcome::MeasurementCountSet(value) => (
                TelemetryEventKind::MeasurementCountChanged,
                TelemetryPayload::Change {
                    previous: 0,
                    current: value,
                },
            ),
            DispatchOutcome::Paused => (TelemetryEventKind::CountingPaused, TelemetryPayload::None),
            DispatchOutcome::Resumed => {
                (TelemetryEventKind::CountingResumed, TelemetryPayload::None)
            }
            DispatchOutcome::Reset => (TelemetryEventKind::CounterReset, TelemetryPayload::None),
        };
        self.telemetry.record(event, details, now);
    }
}
