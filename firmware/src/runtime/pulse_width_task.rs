use embassy_time::Timer;

use super::TriggerPin;
use crate::board;
use crate::radar::{self, DeassertSignal, SharedLine};

/// Drops the trigger line once the armed hold time has elapsed.
#[embassy_executor::task]
pub async fn run(line: &'static SharedLine<TriggerPin>, deassert: &'static DeassertSignal) -> ! {
    loop {
        let width = deassert.wait().await;
        Timer::after(board::to_embassy_duration(width)).await;
        radar::release(line);
    }
}
