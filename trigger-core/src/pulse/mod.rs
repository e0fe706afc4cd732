//! Software pulse counter shared between an edge producer and the control loop.
//!
//! The producer side ([`PulseWatch::on_pulse`]) runs from interrupt or edge
//! task context: it never blocks and never allocates. The control side is the
//! [`PulseEventSource`] implementation, driven only by the dispatcher.

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::control::{PulseEvent, PulseEventSource};

/// Running pulse count with a programmable watch point.
#[derive(Debug)]
pub struct PulseWatch {
    count: AtomicU32,
    watch_point: AtomicU32,
    running: AtomicBool,
}

impl PulseWatch {
    /// Creates a stopped counter watching for `watch_point` pulses.
    #[must_use]
    pub const fn new(watch_point: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            watch_point: AtomicU32::new(watch_point),
            running: AtomicBool::new(false),
        }
    }

    /// Records one pulse edge.
    ///
    /// Returns an event when the count reaches the watch point. The watch
    /// point is subtracted from the count at the same moment, so the next
    /// event needs a full run of pulses and nothing counted afterwards is
    /// lost. Pulses arriving while stopped are ignored.
    pub fn on_pulse(&self) -> Option<PulseEvent> {
        if !self.running.load(Ordering::Acquire) {
            return None;
        }

        let watch_point = self.watch_point.load(Ordering::Acquire);
        let count = self.count.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        if watch_point == 0 || count < watch_point {
            return None;
        }

        self.count.fetch_sub(watch_point, Ordering::AcqRel);
        Some(PulseEvent::new(watch_point))
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn watch_point(&self) -> u32 {
        self.watch_point.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Default for PulseWatch {
    fn default() -> Self {
        Self::new(crate::control::DEFAULT_THRESHOLD)
    }
}

impl PulseEventSource for &PulseWatch {
    fn configure(&mut self, threshold: u32) {
        self.watch_point.store(threshold, Ordering::Release);
    }

    fn start(&mut self) {
        self.running.store(true, Ordering::Release);
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
    }

    fn clear(&mut self) {
        self.count.store(0, Ordering::Release);
    }

    // The count already wrapped at the watch point inside `on_pulse`.
    fn acknowledge(&mut self) {}
}
