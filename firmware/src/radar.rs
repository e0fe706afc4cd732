//! Radar trigger output.
//!
//! The pin lives behind a blocking mutex so the control task can raise it and
//! the pulse-width task can drop it later without either task owning it.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::cell::RefCell;
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use trigger_core::control::RadarActuator;

#[cfg(target_os = "none")]
use embassy_stm32::gpio::Output;

use crate::queues::FirmwareMutex;

/// Drives the physical trigger line.
pub trait TriggerLine {
    fn set_active(&mut self);
    fn set_inactive(&mut self);
}

#[cfg(target_os = "none")]
impl TriggerLine for Output<'_> {
    fn set_active(&mut self) {
        self.set_high();
    }

    fn set_inactive(&mut self) {
        self.set_low();
    }
}

/// Trigger line shared between tasks.
pub type SharedLine<L> = Mutex<FirmwareMutex, RefCell<L>>;

/// Carries the pending hold time to the pulse-width task.
pub type DeassertSignal = Signal<FirmwareMutex, Duration>;

/// Wraps `line` for sharing.
pub const fn shared_line<L>(line: L) -> SharedLine<L> {
    Mutex::new(RefCell::new(line))
}

/// Drops the shared line.
pub fn release<L: TriggerLine>(line: &SharedLine<L>) {
    line.lock(|cell| cell.borrow_mut().set_inactive());
}

/// [`RadarActuator`] backed by a shared trigger line.
pub struct RadarOutput<'a, L> {
    line: &'a SharedLine<L>,
    deassert: &'a DeassertSignal,
}

impl<'a, L: TriggerLine> RadarOutput<'a, L> {
    /// Takes over `line`, forcing it inactive.
    pub fn new(line: &'a SharedLine<L>, deassert: &'a DeassertSignal) -> Self {
        release(line);
        Self { line, deassert }
    }
}

impl<L: TriggerLine> RadarActuator for RadarOutput<'_, L> {
    fn assert(&mut self) {
        self.line.lock(|cell| cell.borrow_mut().set_active());
    }

    fn deassert(&mut self) {
        release(self.line);
    }

    fn arm_one_shot_deassert(&mut self, width: Duration) {
        self.deassert.signal(width);
    }
}
