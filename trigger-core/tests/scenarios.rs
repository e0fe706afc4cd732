//! End-to-end host link scenarios: packet bytes in, actuator edges out.

mod common;

use common::{MockQueue, PinEdge, SourceCall, TestLoop, control_loop, drain};
use trigger_core::control::{HostCommand, PulseEvent};
use trigger_core::protocol::framed::{self, ERROR_COMMAND_ID, FrameHeader, ProtocolError};
use trigger_core::protocol::{Codec, MAX_REPLY_LEN, ProtocolVariant};
use trigger_core::serial::{SerialSession, SessionEvent};

struct Bench {
    control: TestLoop,
    session: SerialSession<Codec, MockQueue<HostCommand>>,
    pulses: MockQueue<PulseEvent>,
    now: u64,
}

impl Bench {
    fn new(variant: ProtocolVariant) -> Self {
        Self {
            control: control_loop(),
            session: SerialSession::new(Codec::for_variant(variant), MockQueue::new()),
            pulses: MockQueue::new(),
            now: 0,
        }
    }

    /// Sends one packet and returns the reply bytes.
    fn send(&mut self, packet: &[u8]) -> heapless::Vec<u8, MAX_REPLY_LEN> {
        let mut reply = [0u8; MAX_REPLY_LEN];
        let outcome = self.session.handle_packet(packet, &mut reply);
        drain(
            &mut self.control,
            &mut self.pulses,
            self.session.queue_mut(),
            &mut self.now,
        );
        heapless::Vec::from_slice(&reply[..outcome.reply_len]).expect("reply fits")
    }
}

fn trigger_frame() -> [u8; framed::OVERHEAD] {
    let mut frame = [0u8; framed::OVERHEAD];
    framed::encode_command(HostCommand::TriggerNow, &mut frame).expect("frame fits");
    frame
}

#[test]
fn scenario_a_framed_trigger_is_acknowledged() {
    let mut bench = Bench::new(ProtocolVariant::Framed);

    let reply = bench.send(&trigger_frame());

    let header = framed::parse_header(&reply).expect("reply header");
    assert_eq!(header.preamble, 0x7570);
    assert_eq!(header.status, 0x00);
    assert_eq!(header.command_id, 0);
    assert_eq!(header.payload_len, 0);
    assert_eq!(reply.len(), framed::OVERHEAD);
    assert_eq!(bench.control.state().trigger_count(), 1);
}

#[test]
fn scenario_b_bad_preamble_gets_error_reply() {
    let mut bench = Bench::new(ProtocolVariant::Framed);
    let mut frame = trigger_frame();
    frame[0] = 0x00;

    let reply = bench.send(&frame);

    let header = framed::parse_header(&reply).expect("reply header");
    assert_eq!(
        header,
        FrameHeader::new(
            ProtocolError::InvalidPreamble.code(),
            ERROR_COMMAND_ID,
            0
        )
    );
    // The reply is itself a well-formed frame, but carries a non-success status.
    assert_eq!(
        framed::decode(&reply),
        Err(ProtocolError::InvalidCommandStatus)
    );
    assert_eq!(bench.control.dispatcher().actuator().actuations(), 0);
}

#[test]
fn scenario_c_trigger_pulses_output_once() {
    let mut bench = Bench::new(ProtocolVariant::Simplified);

    let reply = bench.send(b"$RTG#");

    assert!(reply.is_empty(), "simplified codec is silent by default");
    assert_eq!(
        bench.control.dispatcher().actuator().edges.as_slice(),
        &[PinEdge::Asserted, PinEdge::Deasserted]
    );
    assert_eq!(bench.control.state().trigger_count(), 1);
}

#[test]
fn scenario_d_threshold_change_cycles_counter() {
    let mut bench = Bench::new(ProtocolVariant::Simplified);

    bench.send(b"$PLS00100#");

    assert_eq!(bench.control.state().threshold(), 100);
    let calls = &bench.control.dispatcher().pulses().calls;
    assert_eq!(
        &calls[calls.len() - 4..],
        &[
            SourceCall::Stop,
            SourceCall::Clear,
            SourceCall::Configure(100),
            SourceCall::Start
        ]
    );
}

#[test]
fn scenario_e_desired_count_caps_actuations() {
    let mut bench = Bench::new(ProtocolVariant::Simplified);

    bench.send(b"$DTG00002#");
    bench.send(b"$RTG#");
    bench.send(b"$RTG#");
    bench.send(b"$RTG#");

    assert_eq!(bench.control.dispatcher().actuator().actuations(), 2);
    assert_eq!(bench.control.state().trigger_count(), 2);
}

#[test]
fn malformed_simplified_packets_emit_no_events() {
    let mut bench = Bench::new(ProtocolVariant::Simplified);

    let packets: [&[u8]; 5] = [b"$RTG", b"RTG#!", b"$XYZ#", b"$PLS00000#", b"$PLS123456#"];
    for packet in packets {
        bench.send(packet);
    }

    assert_eq!(bench.session.stats().rejected, 5);
    assert_eq!(bench.control.stats().host_events, 0);
    assert_eq!(bench.control.state(), &trigger_core::control::ControlState::default());
}

#[test]
fn pause_blocks_pulses_until_resume() {
    let mut bench = Bench::new(ProtocolVariant::Simplified);

    bench.send(b"$PAU#");
    assert!(bench.control.state().counting_paused());
    assert!(!bench.control.dispatcher().pulses().running);

    bench.send(b"$RES#");
    assert!(!bench.control.state().counting_paused());
    assert!(bench.control.dispatcher().pulses().running);
}

#[test]
fn framed_measurement_count_round_trips_through_session() {
    let mut bench = Bench::new(ProtocolVariant::Framed);
    let mut frame = [0u8; framed::OVERHEAD + 4];
    let len = framed::encode_command(HostCommand::SetMeasurementCount(512), &mut frame)
        .expect("frame fits");

    let reply = bench.send(&frame[..len]);

    let header = framed::parse_header(&reply).expect("reply header");
    assert_eq!(header.command_id, framed::CommandId::SetMeasurementCount.raw());
    assert_eq!(header.status, framed::STATUS_SUCCESS);
    assert_eq!(bench.control.state().measurement_count(), 512);
    assert_eq!(bench.session.stats().forwarded, 1);
}

#[test]
fn full_host_queue_drops_without_blocking() {
    let mut session: SerialSession<Codec, MockQueue<HostCommand>> =
        SerialSession::new(Codec::default(), MockQueue::new());
    let mut reply = [0u8; MAX_REPLY_LEN];

    for _ in 0..common::QUEUE_DEPTH {
        session.handle_packet(b"$RTG#", &mut reply);
    }
    let outcome = session.handle_packet(b"$CTG#", &mut reply);

    assert!(matches!(
        outcome.event,
        SessionEvent::Dropped(HostCommand::ClearCount)
    ));
    assert_eq!(session.queue().len(), common::QUEUE_DEPTH);
}
