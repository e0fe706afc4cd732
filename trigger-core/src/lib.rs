#![no_std]

// Shared logic for the radar trigger controller.
//
// Everything here is portable between the MCU firmware and the host emulator:
// no allocator, no executor, and no logging sink. Callers own the peripherals
// and the queues; this crate owns the decisions.

pub mod control;
pub mod multiplexer;
pub mod protocol;
pub mod pulse;
pub mod serial;
pub mod telemetry;
