//! Control state, host command vocabulary, and the actuation policy shared by
//! the firmware control task and the emulator.
//!
//! [`ControlState`] is owned by exactly one consumer (the control loop). Every
//! mutation flows through [`CommandDispatcher`] or the automatic pulse path, so
//! no lock guards it.

pub mod dispatcher;

use core::{fmt, time::Duration};

pub use dispatcher::{CommandDispatcher, DispatchError, DispatchOutcome, PulseOutcome};

/// Pulse count that fires the trigger when no host has configured one.
pub const DEFAULT_THRESHOLD: u32 = 10;

/// Upper bound on how long the control loop blocks before re-entering its wait.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Commands a host can issue over either serial protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HostCommand {
    /// Fire the radar trigger immediately.
    TriggerNow,
    /// Reprogram the pulse count that fires the trigger automatically.
    SetThreshold(u32),
    /// Cap the number of firings; further triggers are suppressed.
    SetDesiredCount(u32),
    /// Zero the trigger counter.
    ClearCount,
    /// Record a measurement count for an external consumer.
    SetMeasurementCount(u32),
    /// Stop accumulating pulses.
    Pause,
    /// Resume accumulating pulses.
    Resume,
    /// Restart the pulse counter with the current threshold.
    Reset,
}

impl HostCommand {
    /// Returns the numeric argument carried by the command, if any.
    #[must_use]
    pub const fn argument(self) -> Option<u32> {
        match self {
            HostCommand::SetThreshold(value)
            | HostCommand::SetDesiredCount(value)
            | HostCommand::SetMeasurementCount(value) => Some(value),
            HostCommand::TriggerNow
            | HostCommand::ClearCount
            | HostCommand::Pause
            | HostCommand::Resume
            | HostCommand::Reset => None,
        }
    }

    /// Short lowercase label used in logs and transcripts.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            HostCommand::TriggerNow => "trigger-now",
            HostCommand::SetThreshold(_) => "set-threshold",
            HostCommand::SetDesiredCount(_) => "set-desired-count",
            HostCommand::ClearCount => "clear-count",
            HostCommand::SetMeasurementCount(_) => "set-measurement-count",
            HostCommand::Pause => "pause",
            HostCommand::Resume => "resume",
            HostCommand::Reset => "reset",
        }
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.argument() {
            Some(value) => write!(f, "{} {value}", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// Raised by the pulse source when the running count hits its watch point.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PulseEvent {
    /// Watch point that was programmed when the event was raised.
    pub watch_point: u32,
}

impl PulseEvent {
    #[must_use]
    pub const fn new(watch_point: u32) -> Self {
        Self { watch_point }
    }
}

/// Event drained by the control loop, one per iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TriggerEvent {
    PulseThresholdReached(PulseEvent),
    Host(HostCommand),
}

impl From<PulseEvent> for TriggerEvent {
    fn from(value: PulseEvent) -> Self {
        TriggerEvent::PulseThresholdReached(value)
    }
}

impl From<HostCommand> for TriggerEvent {
    fn from(value: HostCommand) -> Self {
        TriggerEvent::Host(value)
    }
}

/// Counters and flags owned by the control loop.
///
/// Only the dispatcher and the fire sequence mutate it; everyone else reads
/// through the accessors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControlState {
    threshold: u32,
    trigger_count: u32,
    desired_trigger_count: u32,
    counting_paused: bool,
    measurement_count: u32,
}

impl ControlState {
    /// Creates a fresh state with zeroed counters and the provided threshold.
    ///
    /// A zero threshold falls back to [`DEFAULT_THRESHOLD`].
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self {
            threshold: if threshold == 0 {
                DEFAULT_THRESHOLD
            } else {
                threshold
            },
            trigger_count: 0,
            desired_trigger_count: 0,
            counting_paused: false,
            measurement_count: 0,
        }
    }

    /// Returns `true` when a ceiling is set and the trigger count has met it.
    #[must_use]
    pub const fn ceiling_reached(&self) -> bool {
        self.desired_trigger_count > 0 && self.trigger_count >= self.desired_trigger_count
    }

    /// Pulse count that fires the trigger automatically. Never zero.
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Firings since the last clear.
    #[must_use]
    pub const fn trigger_count(&self) -> u32 {
        self.trigger_count
    }

    /// Ceiling on firings; 0 means unbounded.
    #[must_use]
    pub const fn desired_trigger_count(&self) -> u32 {
        self.desired_trigger_count
    }

    /// `true` while the pulse source is stopped.
    #[must_use]
    pub const fn counting_paused(&self) -> bool {
        self.counting_paused
    }

    /// Informational value forwarded by the host; 0 means unset.
    #[must_use]
    pub const fn measurement_count(&self) -> u32 {
        self.measurement_count
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "threshold={} triggers={} desired={} paused={} measurements={}",
            self.threshold,
            self.trigger_count,
            self.desired_trigger_count,
            self.counting_paused,
            self.measurement_count
        )
    }
}

/// Result of the fire sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FireOutcome {
    /// The output was pulsed and the counter advanced to `trigger_count`.
    Fired { trigger_count: u32 },
    /// The ceiling was already met; the output was left untouched.
    Suppressed { trigger_count: u32, ceiling: u32 },
}

impl FireOutcome {
    #[must_use]
    pub const fn fired(self) -> bool {
        matches!(self, FireOutcome::Fired { .. })
    }
}

/// Hardware pulse counter that raises [`PulseEvent`]s at its watch point.
pub trait PulseEventSource {
    /// Programs the watch point. Only called while the source is stopped.
    fn configure(&mut self, threshold: u32);

    /// Starts accumulating pulses.
    fn start(&mut self);

    /// Stops accumulating pulses, keeping the current count.
    fn stop(&mut self);

    /// Zeroes the running count.
    fn clear(&mut self);

    /// Called after a threshold event is consumed and before the fire
    /// sequence runs.
    ///
    /// The default zeroes the count. Sources that reset their own count at the
    /// watch point override this with a no-op, so pulses counted while the
    /// event sat in the queue carry over to the next threshold.
    fn acknowledge(&mut self) {
        self.clear();
    }
}

/// Physical trigger output.
pub trait RadarActuator {
    /// Drives the output to its active level.
    fn assert(&mut self);

    /// Returns the output to its idle level.
    fn deassert(&mut self);

    /// Schedules a deassert after `width` without blocking the caller.
    fn arm_one_shot_deassert(&mut self, width: Duration);
}

/// Tunables for the control loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControlConfig {
    /// Threshold programmed at start-up.
    pub default_threshold: u32,
    /// When set, the output stays asserted for this long; otherwise it is
    /// deasserted before the fire sequence returns.
    pub pulse_width: Option<Duration>,
    /// Bound on each readiness wait.
    pub liveness_timeout: Duration,
}

impl ControlConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            default_threshold: DEFAULT_THRESHOLD,
            pulse_width: None,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
        }
    }

    /// Overrides the start-up threshold (zero is ignored).
    #[must_use]
    pub const fn with_threshold(mut self, threshold: u32) -> Self {
        if threshold > 0 {
            self.default_threshold = threshold;
        }
        self
    }

    /// Enables the one-shot deassert timer with the given pulse width.
    #[must_use]
    pub const fn with_pulse_width(mut self, width: Duration) -> Self {
        self.pulse_width = Some(width);
        self
    }

    #[must_use]
    pub const fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Builds the initial [`ControlState`] for this configuration.
    #[must_use]
    pub const fn initial_state(&self) -> ControlState {
        ControlState::new(self.default_threshold)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the fire sequence against `actuator`.
///
/// The ceiling check happens before any output change, so a suppressed fire
/// leaves both the pin and the counter untouched.
pub fn fire<A>(
    state: &mut ControlState,
    actuator: &mut A,
    pulse_width: Option<Duration>,
) -> FireOutcome
where
    A: RadarActuator + ?Sized,
{
    if state.ceiling_reached() {
        return FireOutcome::Suppressed {
            trigger_count: state.trigger_count,
            ceiling: state.desired_trigger_count,
        };
    }

    actuator.assert();
    state.trigger_count = state.trigger_count.saturating_add(1);
    match pulse_width {
        Some(width) => actuator.arm_one_shot_deassert(width),
        None => actuator.deassert(),
    }

    FireOutcome::Fired {
        trigger_count: state.trigger_count,
    }
}
