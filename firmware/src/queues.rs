//! Bounded event queues between the producer tasks and the control loop.
//!
//! Both queues are Embassy channels. The adapters below expose their halves
//! through the `trigger-core` queue traits so the control loop and the serial
//! session stay hardware-agnostic.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use trigger_core::control::{HostCommand, PulseEvent};
use trigger_core::multiplexer::{EventQueueConsumer, EventQueueProducer, EventSource, QueueFull};
use trigger_core::pulse::PulseWatch;

use crate::board::{HOST_QUEUE_DEPTH, PULSE_QUEUE_DEPTH};
use crate::status;

#[cfg(target_os = "none")]
pub type FirmwareMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
pub type FirmwareMutex = NoopRawMutex;

/// Pulse-threshold events raised by the edge task.
pub type PulseQueue = Channel<FirmwareMutex, PulseEvent, PULSE_QUEUE_DEPTH>;

/// Host commands decoded by the serial task.
pub type HostQueue = Channel<FirmwareMutex, HostCommand, HOST_QUEUE_DEPTH>;

pub type PulseProducer<'a> = QueueProducer<'a, PulseEvent, PULSE_QUEUE_DEPTH>;
pub type PulseConsumer<'a> = QueueConsumer<'a, PulseEvent, PULSE_QUEUE_DEPTH>;
pub type HostProducer<'a> = QueueProducer<'a, HostCommand, HOST_QUEUE_DEPTH>;
pub type HostConsumer<'a> = QueueConsumer<'a, HostCommand, HOST_QUEUE_DEPTH>;

/// Non-blocking producer over a channel sender.
pub struct QueueProducer<'a, T, const N: usize> {
    sender: Sender<'a, FirmwareMutex, T, N>,
}

impl<'a, T, const N: usize> QueueProducer<'a, T, N> {
    pub fn new(sender: Sender<'a, FirmwareMutex, T, N>) -> Self {
        Self { sender }
    }
}

impl<T, const N: usize> EventQueueProducer for QueueProducer<'_, T, N> {
    type Item = T;

    fn try_enqueue(&mut self, item: T) -> Result<(), QueueFull> {
        self.sender
            .try_send(item)
            .map_err(|TrySendError::Full(_)| QueueFull)
    }
}

/// Consumer over a channel receiver, with an async readiness wait.
pub struct QueueConsumer<'a, T, const N: usize> {
    receiver: Receiver<'a, FirmwareMutex, T, N>,
}

impl<'a, T, const N: usize> QueueConsumer<'a, T, N> {
    pub fn new(receiver: Receiver<'a, FirmwareMutex, T, N>) -> Self {
        Self { receiver }
    }

    /// Resolves once an item is available, without taking it.
    pub async fn ready(&self) {
        self.receiver.ready_to_receive().await;
    }
}

impl<T, const N: usize> EventQueueConsumer for QueueConsumer<'_, T, N> {
    type Item = T;

    fn is_ready(&self) -> bool {
        !self.receiver.is_empty()
    }

    fn try_dequeue(&mut self) -> Option<T> {
        self.receiver.try_receive().ok()
    }
}

/// Counts one pulse edge and queues the threshold event if it raised one.
///
/// A full queue drops the event and bumps the pulse drop counter; the
/// caller is never blocked.
pub fn forward_pulse<Q>(watch: &PulseWatch, queue: &mut Q) -> Option<PulseEvent>
where
    Q: EventQueueProducer<Item = PulseEvent>,
{
    let event = watch.on_pulse()?;
    if queue.try_enqueue(event).is_err() {
        status::record_dropped(EventSource::Pulse);
        #[cfg(target_os = "none")]
        defmt::warn!("pulse: queue full, dropping event at {}", event.watch_point);
    }
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trigger_core::control::PulseEventSource;

    #[test]
    fn producer_reports_full_queue() {
        let queue = HostQueue::new();
        let mut producer = HostProducer::new(queue.sender());

        for _ in 0..HOST_QUEUE_DEPTH {
            producer
                .try_enqueue(HostCommand::TriggerNow)
                .expect("queue has room");
        }

        assert!(queue.is_full());
        assert_eq!(producer.try_enqueue(HostCommand::Reset), Err(QueueFull));
    }

    #[test]
    fn consumer_drains_in_order() {
        let queue = PulseQueue::new();
        let mut producer = PulseProducer::new(queue.sender());
        let mut consumer = PulseConsumer::new(queue.receiver());

        assert!(!consumer.is_ready());
        producer
            .try_enqueue(PulseEvent::new(10))
            .expect("queue has room");
        producer
            .try_enqueue(PulseEvent::new(20))
            .expect("queue has room");

        assert!(consumer.is_ready());
        assert_eq!(consumer.try_dequeue(), Some(PulseEvent::new(10)));
        assert_eq!(consumer.try_dequeue(), Some(PulseEvent::new(20)));
        assert_eq!(consumer.try_dequeue(), None);
        assert!(!consumer.is_ready());
    }

    #[test]
    fn forward_pulse_queues_threshold_events() {
        let queue = PulseQueue::new();
        let mut producer = PulseProducer::new(queue.sender());
        let watch = PulseWatch::new(3);
        let mut source = &watch;
        source.start();

        let raised: u32 = (0..9)
            .filter_map(|_| forward_pulse(&watch, &mut producer))
            .map(|event| event.watch_point)
            .sum();

        assert_eq!(raised, 9);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn forward_pulse_drops_when_queue_is_full() {
        let queue = PulseQueue::new();
        let mut producer = PulseProducer::new(queue.sender());
        let watch = PulseWatch::new(1);
        let mut source = &watch;
        source.start();
        let _ = status::take_dropped(EventSource::Pulse);

        for _ in 0..=PULSE_QUEUE_DEPTH {
            forward_pulse(&watch, &mut producer);
        }

        assert_eq!(queue.len(), PULSE_QUEUE_DEPTH);
        assert_eq!(status::take_dropped(EventSource::Pulse), 1);
    }
}
