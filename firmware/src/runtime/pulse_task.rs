use embassy_stm32::exti::ExtiInput;

use super::PULSE_WATCH;
use crate::queues::{self, PulseProducer};

#[embassy_executor::task]
pub async fn run(mut input: ExtiInput<'static>, mut events: PulseProducer<'static>) -> ! {
    loop {
        input.wait_for_rising_edge().await;
        queues::forward_pulse(&PULSE_WATCH, &mut events);
    }
}
