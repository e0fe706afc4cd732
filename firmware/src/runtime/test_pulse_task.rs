use embassy_time::Ticker;

use super::PULSE_WATCH;
use crate::board::TEST_PULSE_PERIOD;
use crate::queues::{self, PulseProducer};

#[embassy_executor::task]
pub async fn run(mut events: PulseProducer<'static>) -> ! {
    defmt::info!("test pulses: enabled");
    let mut ticker = Ticker::every(TEST_PULSE_PERIOD);
    loop {
        ticker.next().await;
        queues::forward_pulse(&PULSE_WATCH, &mut events);
    }
}
