use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use static_cell::StaticCell;
use trigger_core::control::DEFAULT_THRESHOLD;
use trigger_core::multiplexer::ControlLoop;
use trigger_core::protocol::Codec;
use trigger_core::pulse::PulseWatch;
use trigger_core::serial::SerialSession;

use crate::board;
use crate::queues::{
    HostConsumer, HostProducer, HostQueue, PulseConsumer, PulseProducer, PulseQueue,
};
use crate::radar::{self, DeassertSignal, RadarOutput, SharedLine};

mod control_task;
mod pulse_task;
mod pulse_width_task;
mod serial_task;
#[cfg(feature = "internal-test-pulses")]
mod test_pulse_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) type TriggerPin = Output<'static>;

pub(super) static PULSE_WATCH: PulseWatch = PulseWatch::new(DEFAULT_THRESHOLD);
pub(super) static PULSE_QUEUE: PulseQueue = Channel::new();
pub(super) static HOST_QUEUE: HostQueue = Channel::new();
pub(super) static DEASSERT: DeassertSignal = Signal::new();
static TRIGGER_LINE: StaticCell<SharedLine<TriggerPin>> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let hal::Peripherals {
        PA0,
        PA1,
        EXTI0,
        PB0,
        PB1,
        USART5,
        ..
    } = hal::init(hal::Config::default());

    let config = board::control_config();
    let variant = board::protocol_variant();

    let pulse_input = ExtiInput::new(PA0, EXTI0, Pull::Down);
    let trigger_pin = Output::new(PA1, Level::Low, Speed::VeryHigh);
    let line: &'static SharedLine<TriggerPin> =
        TRIGGER_LINE.init(radar::shared_line(trigger_pin));

    let control = ControlLoop::new(&PULSE_WATCH, RadarOutput::new(line, &DEASSERT), &config);
    let session = SerialSession::new(
        Codec::for_variant(variant),
        HostProducer::new(HOST_QUEUE.sender()),
    );

    defmt::info!(
        "radar trigger: threshold={} protocol={} pulse_width_us={}",
        config.default_threshold,
        variant.name(),
        config
            .pulse_width
            .map_or(0, |width| u64::try_from(width.as_micros()).unwrap_or(u64::MAX))
    );

    spawner.spawn(
        control_task::run(
            control,
            PulseConsumer::new(PULSE_QUEUE.receiver()),
            HostConsumer::new(HOST_QUEUE.receiver()),
            board::to_embassy_duration(config.liveness_timeout),
        )
        .expect("failed to spawn control task"),
    );
    spawner.spawn(
        pulse_task::run(pulse_input, PulseProducer::new(PULSE_QUEUE.sender()))
            .expect("failed to spawn pulse task"),
    );
    spawner.spawn(pulse_width_task::run(line, &DEASSERT).expect("failed to spawn pulse width task"));
    spawner.spawn(
        serial_task::run(session, USART5, PB0, PB1).expect("failed to spawn serial task"),
    );

    #[cfg(feature = "internal-test-pulses")]
    spawner.spawn(
        test_pulse_task::run(PulseProducer::new(PULSE_QUEUE.sender()))
            .expect("failed to spawn test pulse task"),
    );

    core::future::pending::<()>().await;
}
