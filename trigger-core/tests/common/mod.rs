#![allow(dead_code)]

use core::time::Duration;

use heapless::{Deque, Vec as HeaplessVec};
use trigger_core::control::{
    ControlConfig, HostCommand, PulseEvent, PulseEventSource, RadarActuator,
};
use trigger_core::multiplexer::{ControlLoop, EventQueueConsumer, EventQueueProducer, QueueFull};

pub const QUEUE_DEPTH: usize = 10;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinEdge {
    Asserted,
    Deasserted,
    OneShot(Duration),
}

#[derive(Default)]
pub struct MockActuator {
    pub edges: HeaplessVec<PinEdge, 64>,
}

impl MockActuator {
    pub fn actuations(&self) -> usize {
        self.edges
            .iter()
            .filter(|edge| **edge == PinEdge::Asserted)
            .count()
    }
}

impl RadarActuator for MockActuator {
    fn assert(&mut self) {
        self.edges.push(PinEdge::Asserted).expect("edge log full");
    }

    fn deassert(&mut self) {
        self.edges.push(PinEdge::Deasserted).expect("edge log full");
    }

    fn arm_one_shot_deassert(&mut self, width: Duration) {
        self.edges
            .push(PinEdge::OneShot(width))
            .expect("edge log full");
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SourceCall {
    Configure(u32),
    Start,
    Stop,
    Clear,
}

#[derive(Default)]
pub struct MockPulseSource {
    pub calls: HeaplessVec<SourceCall, 64>,
    pub watch_point: u32,
    pub running: bool,
}

impl PulseEventSource for MockPulseSource {
    fn configure(&mut self, threshold: u32) {
        self.watch_point = threshold;
        self.calls
            .push(SourceCall::Configure(threshold))
            .expect("call log full");
    }

    fn start(&mut self) {
        self.running = true;
        self.calls.push(SourceCall::Start).expect("call log full");
    }

    fn stop(&mut self) {
        self.running = false;
        self.calls.push(SourceCall::Stop).expect("call log full");
    }

    fn clear(&mut self) {
        self.calls.push(SourceCall::Clear).expect("call log full");
    }
}

/// Bounded FIFO standing in for an executor channel.
pub struct MockQueue<T> {
    items: Deque<T, QUEUE_DEPTH>,
}

impl<T> MockQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Deque::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item).ok().expect("mock queue full");
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for MockQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueueProducer for MockQueue<T> {
    type Item = T;

    fn try_enqueue(&mut self, item: T) -> Result<(), QueueFull> {
        self.items.push_back(item).map_err(|_| QueueFull)
    }
}

impl<T> EventQueueConsumer for MockQueue<T> {
    type Item = T;

    fn is_ready(&self) -> bool {
        !self.items.is_empty()
    }

    fn try_dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }
}

pub type TestLoop = ControlLoop<MockPulseSource, MockActuator, u64>;

pub fn control_loop() -> TestLoop {
    control_loop_with(&ControlConfig::new())
}

pub fn control_loop_with(config: &ControlConfig) -> TestLoop {
    ControlLoop::new(MockPulseSource::default(), MockActuator::default(), config)
}

/// Runs the loop until both queues are drained, advancing the clock by one
/// microsecond per iteration.
pub fn drain(
    control: &mut TestLoop,
    pulses: &mut MockQueue<PulseEvent>,
    host: &mut MockQueue<HostCommand>,
    now: &mut u64,
) {
    while !pulses.is_empty() || !host.is_empty() {
        *now += 1;
        control.service_one(pulses, host, *now);
    }
}
