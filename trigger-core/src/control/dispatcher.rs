use core::{fmt, time::Duration};

use super::{
    ControlConfig, ControlState, FireOutcome, HostCommand, PulseEvent, PulseEventSource,
    RadarActuator, fire,
};

/// Rejection raised when a command cannot be applied.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DispatchError {
    /// A numeric argument was zero.
    InvalidArgument(HostCommand),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::InvalidArgument(command) => {
                write!(f, "{} requires a positive argument", command.label())
            }
        }
    }
}

/// Effect of a dispatched host command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    Fired(FireOutcome),
    ThresholdChanged { previous: u32, current: u32 },
    DesiredCountSet { previous: u32, current: u32 },
    CountCleared { previous: u32 },
    MeasurementCountSet(u32),
    Paused,
    Resumed,
    Reset,
}

/// Effect of a pulse-threshold event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PulseOutcome {
    Fired(FireOutcome),
    /// The event was raised for a watch point that is no longer programmed.
    Stale { watch_point: u32, threshold: u32 },
}

/// Applies host commands and pulse events to [`ControlState`] and the
/// peripherals it owns.
pub struct CommandDispatcher<P, A> {
    pulses: P,
    actuator: A,
    pulse_width: Option<Duration>,
}

impl<P, A> CommandDispatcher<P, A>
where
    P: PulseEventSource,
    A: RadarActuator,
{
    /// Wraps the pulse source and actuator using the pulse width from `config`.
    pub fn new(pulses: P, actuator: A, config: &ControlConfig) -> Self {
        Self {
            pulses,
            actuator,
            pulse_width: config.pulse_width,
        }
    }

    /// Programs the current threshold and starts counting.
    pub fn start(&mut self, state: &mut ControlState) {
        self.reprogram(state.threshold);
        state.counting_paused = false;
    }

    /// Routes a host command to its action.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidArgument`] when a command carries a zero
    /// argument. The state is left untouched in that case.
    pub fn dispatch(
        &mut self,
        state: &mut ControlState,
        command: HostCommand,
    ) -> Result<DispatchOutcome, DispatchError> {
        if command.argument() == Some(0) {
            return Err(DispatchError::InvalidArgument(command));
        }

        let outcome = match command {
            HostCommand::TriggerNow => DispatchOutcome::Fired(self.fire(state)),
            HostCommand::SetThreshold(value) => {
                let previous = state.threshold;
                self.reprogram(value);
                state.threshold = value;
                state.counting_paused = false;
                DispatchOutcome::ThresholdChanged {
                    previous,
                    current: value,
                }
            }
            HostCommand::SetDesiredCount(value) => {
                let previous = state.desired_trigger_count;
                state.desired_trigger_count = value;
                DispatchOutcome::DesiredCountSet {
                    previous,
                    current: value,
                }
            }
            HostCommand::ClearCount => {
                let previous = state.trigger_count;
                state.trigger_count = 0;
                DispatchOutcome::CountCleared { previous }
            }
            HostCommand::SetMeasurementCount(value) => {
                state.measurement_count = value;
                DispatchOutcome::MeasurementCountSet(value)
            }
            HostCommand::Pause => {
                self.pulses.stop();
                state.counting_paused = true;
                DispatchOutcome::Paused
            }
            HostCommand::Resume => {
                self.pulses.start();
                state.counting_paused = false;
                DispatchOutcome::Resumed
            }
            HostCommand::Reset => {
                self.pulses.stop();
                self.pulses.clear();
                self.pulses.start();
                state.trigger_count = 0;
                state.counting_paused = false;
                DispatchOutcome::Reset
            }
        };

        Ok(outcome)
    }

    /// Handles a pulse-threshold event, ignoring it when the watch point it
    /// carries no longer matches the programmed threshold.
    pub fn handle_pulse(&mut self, state: &mut ControlState, event: PulseEvent) -> PulseOutcome {
        if event.watch_point != state.threshold {
            return PulseOutcome::Stale {
                watch_point: event.watch_point,
                threshold: state.threshold,
            };
        }

        self.pulses.acknowledge();
        PulseOutcome::Fired(self.fire(state))
    }

    /// Runs the fire sequence with the configured pulse width.
    pub fn fire(&mut self, state: &mut ControlState) -> FireOutcome {
        fire(state, &mut self.actuator, self.pulse_width)
    }

    #[must_use]
    pub fn pulses(&self) -> &P {
        &self.pulses
    }

    pub fn pulses_mut(&mut self) -> &mut P {
        &mut self.pulses
    }

    #[must_use]
    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    // Stop before touching the watch point so the producer never observes a
    // count compared against a half-written threshold.
    fn reprogram(&mut self, threshold: u32) {
        self.pulses.stop();
        self.pulses.clear();
        self.pulses.configure(threshold);
        self.pulses.start();
    }
}
