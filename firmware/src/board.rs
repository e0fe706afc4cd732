//! Board-level configuration for the STM32G0B1 trigger controller.
//!
//! Pin assignment:
//!
//! | Signal          | Pin  | Notes                                  |
//! |-----------------|------|----------------------------------------|
//! | Pulse input     | PA0  | EXTI0, rising edge, pulled down        |
//! | Radar trigger   | PA1  | push-pull, active high                 |
//! | Host UART TX    | PB0  | USART5, 115200 8N1                     |
//! | Host UART RX    | PB1  | USART5                                 |

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::time::Duration;

use trigger_core::control::{ControlConfig, DEFAULT_LIVENESS_TIMEOUT, DEFAULT_THRESHOLD};
use trigger_core::protocol::ProtocolVariant;

/// Host link baud rate.
pub const HOST_UART_BAUD: u32 = 115_200;

/// Bytes buffered by the UART driver in each direction.
pub const HOST_UART_BUFFER_SIZE: usize = 1024;

/// Silence on the line for this long closes a packet.
pub const INTER_BYTE_TIMEOUT: embassy_time::Duration = embassy_time::Duration::from_millis(10);

/// Depth of the pulse-event queue.
pub const PULSE_QUEUE_DEPTH: usize = 10;

/// Depth of the host-command queue.
pub const HOST_QUEUE_DEPTH: usize = 10;

/// Trigger output hold time when `configurable-pulse-width` is enabled.
pub const TRIGGER_PULSE_WIDTH: Duration = Duration::from_micros(1);

/// Period of the synthetic pulse source.
pub const TEST_PULSE_PERIOD: embassy_time::Duration = embassy_time::Duration::from_secs(1);

/// Protocol spoken on the host link.
#[must_use]
pub const fn protocol_variant() -> ProtocolVariant {
    if cfg!(feature = "framed-protocol") {
        ProtocolVariant::Framed
    } else {
        ProtocolVariant::Simplified
    }
}

/// Control loop configuration for this board.
#[must_use]
pub const fn control_config() -> ControlConfig {
    let config = ControlConfig::new()
        .with_threshold(DEFAULT_THRESHOLD)
        .with_liveness_timeout(DEFAULT_LIVENESS_TIMEOUT);
    if cfg!(feature = "configurable-pulse-width") {
        config.with_pulse_width(TRIGGER_PULSE_WIDTH)
    } else {
        config
    }
}

/// Converts a `core` duration into the executor's tick-based duration.
#[must_use]
pub fn to_embassy_duration(duration: Duration) -> embassy_time::Duration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    embassy_time::Duration::from_micros(micros)
}
