use embassy_futures::select::select;
use embassy_time::{Duration, with_timeout};
use trigger_core::control::{DispatchOutcome, FireOutcome, PulseOutcome};
use trigger_core::multiplexer::{ControlLoop, EventSource, LoopOutcome};
use trigger_core::pulse::PulseWatch;

use super::TriggerPin;
use crate::queues::{HostConsumer, PulseConsumer};
use crate::radar::RadarOutput;
use crate::status::{self, FirmwareInstant};

pub type FirmwareControlLoop =
    ControlLoop<&'static PulseWatch, RadarOutput<'static, TriggerPin>, FirmwareInstant>;

#[embassy_executor::task]
pub async fn run(
    mut control: FirmwareControlLoop,
    mut pulses: PulseConsumer<'static>,
    mut host: HostConsumer<'static>,
    liveness: Duration,
) -> ! {
    loop {
        let woke = with_timeout(liveness, select(pulses.ready(), host.ready())).await;
        let now = FirmwareInstant::now();

        for source in [EventSource::Pulse, EventSource::Host] {
            let dropped = status::take_dropped(source);
            if dropped > 0 {
                defmt::warn!(
                    "control: {} {} event(s) dropped on a full queue",
                    dropped,
                    defmt::Display2Format(&source)
                );
            }
            control.record_dropped(source, dropped, now);
        }

        if woke.is_err() {
            control.record_timeout();
            defmt::trace!(
                "control: idle, {}",
                defmt::Display2Format(control.state())
            );
            continue;
        }

        let outcome = control.service_one(&mut pulses, &mut host, now);
        log_outcome(&outcome);
    }
}

fn log_fire(source: &str, outcome: FireOutcome) {
    match outcome {
        FireOutcome::Fired { trigger_count } => {
            defmt::info!("control: {} trigger fired (count={})", source, trigger_count);
        }
        FireOutcome::Suppressed {
            trigger_count,
            ceiling,
        } => defmt::warn!(
            "control: {} trigger suppressed (count={} ceiling={})",
            source,
            trigger_count,
            ceiling
        ),
    }
}

fn log_outcome(outcome: &LoopOutcome) {
    match outcome {
        LoopOutcome::Idle => {}
        LoopOutcome::Pulse(PulseOutcome::Fired(fire)) => log_fire("pulse", *fire),
        LoopOutcome::Pulse(PulseOutcome::Stale {
            watch_point,
            threshold,
        }) => defmt::debug!(
            "control: stale pulse event (watch_point={} threshold={})",
            watch_point,
            threshold
        ),
        LoopOutcome::Host {
            result: Ok(DispatchOutcome::Fired(fire)),
            ..
        } => log_fire("host", *fire),
        LoopOutcome::Host {
            command,
            result: Ok(_),
        } => defmt::info!("control: applied {}", defmt::Display2Format(command)),
        LoopOutcome::Host {
            command,
            result: Err(error),
        } => defmt::warn!(
            "control: rejected {}: {}",
            defmt::Display2Format(command),
            defmt::Display2Format(error)
        ),
    }
}
