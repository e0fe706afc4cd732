use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant as HostInstant};

use trigger_core::control::{
    ControlConfig, DispatchOutcome, FireOutcome, HostCommand, PulseEvent, PulseEventSource,
    PulseOutcome, RadarActuator,
};
use trigger_core::multiplexer::{
    ControlLoop, EventQueueConsumer, EventQueueProducer, EventSource, LoopOutcome, QueueFull,
};
use trigger_core::protocol::{
    Codec, MAX_REPLY_LEN, ProtocolCodec, ProtocolVariant, SimplifiedCodec,
};
use trigger_core::pulse::PulseWatch;
use trigger_core::serial::{SerialSession, SessionEvent};

/// Matches the firmware queue depths.
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// Upper bound on `pulse <n>` so a typo cannot spin forever.
const MAX_PULSES_PER_LINE: u32 = 1_000_000;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("$", "$<CMD>[params]#              - send a simplified packet, e.g. $RTG# or $PLS00100#"),
    ("frame", "frame <hex bytes>             - send raw framed bytes, e.g. frame 70 75 01 00 ..."),
    ("pulse", "pulse <n>                     - feed n pulse edges into the counter"),
    ("status", "status                        - show control state and counters"),
    ("history", "history                       - show recorded telemetry"),
    ("help", "help [topic]                  - show help for a command"),
    ("exit", "exit | quit                   - leave the emulator"),
];

/// Start-up options taken from the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionOptions {
    pub protocol: ProtocolVariant,
    pub threshold: u32,
    pub pulse_width: Option<Duration>,
    /// Send `SUC`/`ERR` replies on the simplified link.
    pub simplified_replies: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            protocol: ProtocolVariant::Simplified,
            threshold: ControlConfig::new().default_threshold,
            pulse_width: None,
            simplified_replies: false,
        }
    }
}

impl SessionOptions {
    pub fn control_config(&self) -> ControlConfig {
        let config = ControlConfig::new().with_threshold(self.threshold);
        match self.pulse_width {
            Some(width) => config.with_pulse_width(width),
            None => config,
        }
    }

    pub fn codec(&self) -> Codec {
        match self.protocol {
            ProtocolVariant::Simplified if self.simplified_replies => {
                Codec::Simplified(SimplifiedCodec::with_outcome_reply())
            }
            variant => Codec::for_variant(variant),
        }
    }
}

type EmulatedLoop = ControlLoop<SharedCounter, EmulatedRadar, u64>;

pub struct Session<W: Write> {
    control: EmulatedLoop,
    link: SerialSession<Codec, HostQueue<HostCommand>>,
    pulses: HostQueue<PulseEvent>,
    counter: Rc<PulseWatch>,
    transcript: TranscriptLogger<W>,
    started_at: HostInstant,
}

impl Session<BufWriter<fs::File>> {
    /// Opens a session that records its transcript to `path`.
    pub fn with_transcript_file(options: SessionOptions, path: &Path) -> io::Result<Self> {
        let transcript = TranscriptLogger::create(path, &options)?;
        Ok(Self::new(options, transcript))
    }
}

impl<W: Write> Session<W> {
    pub fn new(options: SessionOptions, transcript: TranscriptLogger<W>) -> Self {
        let counter = Rc::new(PulseWatch::new(options.threshold));
        let control = ControlLoop::new(
            SharedCounter(Rc::clone(&counter)),
            EmulatedRadar::default(),
            &options.control_config(),
        );

        Self {
            control,
            link: SerialSession::new(options.codec(), HostQueue::new(DEFAULT_QUEUE_DEPTH)),
            pulses: HostQueue::new(DEFAULT_QUEUE_DEPTH),
            counter,
            transcript,
            started_at: HostInstant::now(),
        }
    }

    /// Handles one script line and returns the lines to print.
    pub fn handle_line(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let mut lines = match split_command(trimmed) {
            ("help", topic) => help(topic),
            ("status", "") => self.status_lines(),
            ("history", "") => self.history_lines(),
            ("pulse", count) => self.handle_pulses(count),
            ("frame", hex) => match parse_hex(hex) {
                Ok(bytes) => self.handle_packet(&bytes),
                Err(err) => vec![format!("ERR frame {err}")],
            },
            _ if trimmed.starts_with('$') => self.handle_packet(trimmed.as_bytes()),
            _ => vec![format!("ERR unknown command `{trimmed}` (try `help`)")],
        };

        lines.extend(self.drain());
        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    #[cfg(test)]
    pub fn control(&self) -> &EmulatedLoop {
        &self.control
    }

    pub fn radar(&self) -> &EmulatedRadar {
        self.control.dispatcher().actuator()
    }

    fn now(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn handle_packet(&mut self, packet: &[u8]) -> Vec<String> {
        let mut reply = [0u8; MAX_REPLY_LEN];
        let outcome = self.link.handle_packet(packet, &mut reply);
        let mut lines = Vec::new();

        match outcome.event {
            SessionEvent::Forwarded(command) => lines.push(format!("OK queued {command}")),
            SessionEvent::Dropped(_) => {
                let now = self.now();
                self.control.record_dropped(EventSource::Host, 1, now);
                lines.push(format!("ERR {}", outcome.event));
            }
            event => lines.push(format!("ERR {event}")),
        }

        if outcome.reply_len > 0 {
            lines.push(format!("reply {}", describe_reply(&reply[..outcome.reply_len])));
        }
        lines
    }

    fn handle_pulses(&mut self, count: &str) -> Vec<String> {
        let count = match count.parse::<u32>() {
            Ok(count) if (1..=MAX_PULSES_PER_LINE).contains(&count) => count,
            _ => {
                return vec![format!(
                    "ERR pulse expects a count between 1 and {MAX_PULSES_PER_LINE}"
                )];
            }
        };

        let mut raised = 0u32;
        let mut dropped = 0u32;
        for _ in 0..count {
            let Some(event) = self.counter.on_pulse() else {
                continue;
            };
            raised += 1;
            if self.pulses.try_enqueue(event).is_err() {
                dropped += 1;
            }
        }

        let now = self.now();
        self.control.record_dropped(EventSource::Pulse, dropped, now);

        let mut line = format!(
            "OK {count} pulse(s), {raised} threshold event(s), counter at {}",
            self.counter.count()
        );
        if !self.counter.is_running() {
            line.push_str(" (counting paused)");
        }
        if dropped > 0 {
            let _ = write!(line, ", {dropped} dropped on a full queue");
        }
        vec![line]
    }

    /// Runs the control loop until both queues are empty.
    fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let now = self.now();
            let outcome = self
                .control
                .service_one(&mut self.pulses, self.link.queue_mut(), now);
            if matches!(outcome, LoopOutcome::Idle) {
                break;
            }
            lines.push(describe_outcome(&outcome));
            if let Some(width) = self.control.dispatcher_mut().actuator_mut().expire_hold() {
                lines.push(format!("radar: released after {}us", width.as_micros()));
            }
        }
        lines
    }

    fn status_lines(&self) -> Vec<String> {
        let stats = self.control.stats();
        let link = self.link.stats();
        vec![
            format!("state: {}", self.control.state()),
            format!(
                "counter: {} of {} ({})",
                self.counter.count(),
                self.counter.watch_point(),
                if self.counter.is_running() {
                    "running"
                } else {
                    "stopped"
                }
            ),
            format!(
                "loop: pulse-events={} host-events={} stale={} suppressed={} rejected={} dropped={}",
                stats.pulse_events,
                stats.host_events,
                stats.stale_pulses,
                stats.suppressed_fires,
                stats.rejected_commands,
                stats.dropped_events
            ),
            format!(
                "link: {} packets={} forwarded={} rejected={} dropped={} oversized={}",
                self.link.codec().variant(),
                link.packets,
                link.forwarded,
                link.rejected,
                link.dropped,
                link.oversized
            ),
            format!(
                "radar: actuations={} line={}",
                self.radar().actuations(),
                if self.radar().is_active() { "high" } else { "low" }
            ),
        ]
    }

    fn history_lines(&self) -> Vec<String> {
        let telemetry = self.control.telemetry();
        if telemetry.is_empty() {
            return vec!["history: empty".to_string()];
        }

        telemetry
            .oldest_first()
            .map(|record| {
                let mut line = format!(
                    "#{:<4} +{:>8}us {}",
                    record.id, record.timestamp, record.event
                );
                let details = record.details.to_string();
                if !details.is_empty() {
                    line.push(' ');
                    line.push_str(&details);
                }
                line
            })
            .collect()
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

/// Pulse counter handle shared with the `pulse` command.
pub struct SharedCounter(Rc<PulseWatch>);

impl PulseEventSource for SharedCounter {
    fn configure(&mut self, threshold: u32) {
        let mut watch = &*self.0;
        watch.configure(threshold);
    }

    fn start(&mut self) {
        let mut watch = &*self.0;
        watch.start();
    }

    fn stop(&mut self) {
        let mut watch = &*self.0;
        watch.stop();
    }

    fn clear(&mut self) {
        let mut watch = &*self.0;
        watch.clear();
    }

    fn acknowledge(&mut self) {
        let mut watch = &*self.0;
        watch.acknowledge();
    }
}

/// In-memory radar trigger line.
#[derive(Debug, Default)]
pub struct EmulatedRadar {
    active: bool,
    actuations: u32,
    pending_hold: Option<Duration>,
}

impl EmulatedRadar {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn actuations(&self) -> u32 {
        self.actuations
    }

    /// Completes an armed hold, as the one-shot timer would.
    fn expire_hold(&mut self) -> Option<Duration> {
        let width = self.pending_hold.take()?;
        self.active = false;
        Some(width)
    }
}

impl RadarActuator for EmulatedRadar {
    fn assert(&mut self) {
        self.active = true;
        self.actuations = self.actuations.saturating_add(1);
    }

    fn deassert(&mut self) {
        self.active = false;
    }

    fn arm_one_shot_deassert(&mut self, width: Duration) {
        self.pending_hold = Some(width);
    }
}

/// Bounded FIFO used for both event queues.
struct HostQueue<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> HostQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }
}

impl<T> EventQueueProducer for HostQueue<T> {
    type Item = T;

    fn try_enqueue(&mut self, item: T) -> Result<(), QueueFull> {
        if self.items.len() >= self.capacity {
            return Err(QueueFull);
        }

        self.items.push_back(item);
        Ok(())
    }
}

impl<T> EventQueueConsumer for HostQueue<T> {
    type Item = T;

    fn is_ready(&self) -> bool {
        !self.items.is_empty()
    }

    fn try_dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }
}

/// Append-only session transcript.
pub struct TranscriptLogger<W: Write> {
    writer: W,
}

impl TranscriptLogger<BufWriter<fs::File>> {
    pub fn create(path: &Path, options: &SessionOptions) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self::new(BufWriter::new(file));
        logger.write_header(options)?;
        Ok(logger)
    }
}

impl<W: Write> TranscriptLogger<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_header(&mut self, options: &SessionOptions) -> io::Result<()> {
        writeln!(self.writer, "# Radar trigger emulator transcript")?;
        writeln!(
            self.writer,
            "# protocol={} threshold={} pulse-width={}",
            options.protocol,
            options.threshold,
            options
                .pulse_width
                .map_or_else(|| "off".to_string(), |width| format!("{}us", width.as_micros()))
        )?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    }
}

fn help(topic: &str) -> Vec<String> {
    if topic.is_empty() {
        let mut lines = vec!["Available commands:".to_string()];
        lines.extend(HELP_TOPICS.iter().map(|(_, detail)| format!("  {detail}")));
        lines.push("Type `help <topic>` for a specific command.".to_string());
        return lines;
    }

    match HELP_TOPICS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(topic))
    {
        Some((_, detail)) => vec![(*detail).to_string()],
        None => {
            let topics: Vec<&str> = HELP_TOPICS.iter().map(|(name, _)| *name).collect();
            vec![
                format!("No help available for `{topic}`."),
                format!("Available topics: {}", topics.join(", ")),
            ]
        }
    }
}

/// Parses hex bytes, with or without separating whitespace.
fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = input
        .split_whitespace()
        .map(|token| token.trim_start_matches("0x"))
        .flat_map(str::bytes)
        .collect();

    if digits.is_empty() {
        return Err("expects hex bytes".to_string());
    }
    if digits.len() % 2 != 0 {
        return Err("has an odd number of hex digits".to_string());
    }

    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|text| u8::from_str_radix(text, 16).ok())
                .ok_or_else(|| format!("has invalid hex byte `{}`", String::from_utf8_lossy(pair)))
        })
        .collect()
}

fn describe_reply(reply: &[u8]) -> String {
    if reply.iter().all(u8::is_ascii_graphic) {
        return String::from_utf8_lossy(reply).into_owned();
    }

    let mut text = String::with_capacity(reply.len() * 3);
    for (index, byte) in reply.iter().enumerate() {
        if index > 0 {
            text.push(' ');
        }
        let _ = write!(text, "{byte:02x}");
    }
    text
}

fn describe_fire(source: &str, outcome: FireOutcome) -> String {
    match outcome {
        FireOutcome::Fired { trigger_count } => {
            format!("radar: {source} trigger fired (count={trigger_count})")
        }
        FireOutcome::Suppressed {
            trigger_count,
            ceiling,
        } => format!(
            "radar: {source} trigger suppressed (count={trigger_count} ceiling={ceiling})"
        ),
    }
}

fn describe_outcome(outcome: &LoopOutcome) -> String {
    match outcome {
        LoopOutcome::Idle => "control: idle".to_string(),
        LoopOutcome::Pulse(PulseOutcome::Fired(fire)) => describe_fire("pulse", *fire),
        LoopOutcome::Pulse(PulseOutcome::Stale {
            watch_point,
            threshold,
        }) => format!("control: stale pulse event (watch-point={watch_point} threshold={threshold})"),
        LoopOutcome::Host {
            result: Ok(DispatchOutcome::Fired(fire)),
            ..
        } => describe_fire("host", *fire),
        LoopOutcome::Host {
            result: Ok(outcome),
            ..
        } => format!("control: {}", describe_dispatch(outcome)),
        LoopOutcome::Host {
            command,
            result: Err(err),
        } => format!("control: rejected {command}: {err}"),
    }
}

fn describe_dispatch(outcome: &DispatchOutcome) -> String {
    match outcome {
        DispatchOutcome::Fired(fire) => describe_fire("host", *fire),
        DispatchOutcome::ThresholdChanged { previous, current } => {
            format!("threshold {previous} -> {current}, counter restarted")
        }
        DispatchOutcome::DesiredCountSet { previous, current } => {
            format!("desired trigger count {previous} -> {current}")
        }
        DispatchOutcome::CountCleared { previous } => {
            format!("trigger count cleared (was {previous})")
        }
        DispatchOutcome::MeasurementCountSet(count) => format!("measurement count set to {count}"),
        DispatchOutcome::Paused => "counting paused".to_string(),
        DispatchOutcome::Resumed => "counting resumed".to_string(),
        DispatchOutcome::Reset => "counter reset".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(options: SessionOptions) -> Session<Vec<u8>> {
        Session::new(options, TranscriptLogger::new(Vec::new()))
    }

    fn framed() -> SessionOptions {
        SessionOptions {
            protocol: ProtocolVariant::Framed,
            ..SessionOptions::default()
        }
    }

    #[test]
    fn simplified_trigger_fires_radar() {
        let mut session = session(SessionOptions::default());

        let lines = session.handle_line("$RTG#").expect("in-memory transcript");

        assert_eq!(lines[0], "OK queued trigger-now");
        assert!(lines.iter().any(|line| line.contains("trigger fired (count=1)")));
        assert_eq!(session.radar().actuations(), 1);
        assert!(!session.radar().is_active());
    }

    #[test]
    fn framed_trigger_gets_success_reply() {
        let mut session = session(framed());

        let lines = session
            .handle_line("frame 70 75 01 00 00 00 00 00 01 06")
            .expect("in-memory transcript");

        assert_eq!(lines[1], "reply 70 75 01 00 00 00 00 00 01 06");
        assert_eq!(session.control().state().trigger_count(), 1);
    }

    #[test]
    fn bad_preamble_gets_error_frame() {
        let mut session = session(framed());

        let lines = session
            .handle_line("frame 00750100000000000106")
            .expect("in-memory transcript");

        assert!(lines[0].starts_with("ERR rejected: framed:"));
        assert!(lines[1].starts_with("reply 70 75 01 01"));
        assert_eq!(session.radar().actuations(), 0);
    }

    #[test]
    fn pulses_reaching_threshold_fire() {
        let mut session = session(SessionOptions {
            threshold: 5,
            ..SessionOptions::default()
        });

        let lines = session.handle_line("pulse 12").expect("in-memory transcript");

        assert!(lines[0].starts_with("OK 12 pulse(s), 2 threshold event(s), counter at 2"));
        assert_eq!(session.radar().actuations(), 2);

        let lines = session.handle_line("pulse 3").expect("in-memory transcript");

        assert!(lines[0].starts_with("OK 3 pulse(s), 1 threshold event(s), counter at 0"));
        assert_eq!(session.radar().actuations(), 3);
    }

    #[test]
    fn paused_counter_ignores_pulses() {
        let mut session = session(SessionOptions::default());

        session.handle_line("$PAU#").expect("in-memory transcript");
        let lines = session.handle_line("pulse 30").expect("in-memory transcript");

        assert!(lines[0].ends_with("(counting paused)"));
        assert_eq!(session.radar().actuations(), 0);
    }

    #[test]
    fn pulse_width_holds_then_releases() {
        let mut session = session(SessionOptions {
            pulse_width: Some(Duration::from_micros(1)),
            ..SessionOptions::default()
        });

        let lines = session.handle_line("$RTG#").expect("in-memory transcript");

        assert!(lines.iter().any(|line| line == "radar: released after 1us"));
        assert!(!session.radar().is_active());
    }

    #[test]
    fn simplified_replies_when_enabled() {
        let mut session = session(SessionOptions {
            simplified_replies: true,
            ..SessionOptions::default()
        });

        let ok = session.handle_line("$CTG#").expect("in-memory transcript");
        let err = session.handle_line("$XYZ#").expect("in-memory transcript");

        assert!(ok.contains(&"reply SUC".to_string()));
        assert!(err.contains(&"reply ERR".to_string()));
    }

    #[test]
    fn history_lists_telemetry() {
        let mut session = session(SessionOptions::default());

        session.handle_line("$PLS00020#").expect("in-memory transcript");
        session.handle_line("$RTG#").expect("in-memory transcript");
        let lines = session.handle_line("history").expect("in-memory transcript");

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("threshold-changed 10 -> 20"));
        assert!(lines[1].contains("trigger-fired host count=1"));
    }

    #[test]
    fn transcript_records_both_sides() {
        let mut session = session(SessionOptions::default());
        session.handle_line("status").expect("in-memory transcript");

        let transcript =
            String::from_utf8(session.transcript.into_inner()).expect("transcript is utf-8");
        assert!(transcript.contains("HOST> status"));
        assert!(transcript.contains("EMU < state: threshold=10"));
    }

    #[test]
    fn hex_parser_rejects_odd_and_invalid_input() {
        assert_eq!(parse_hex("70 75"), Ok(vec![0x70, 0x75]));
        assert_eq!(parse_hex("0x70 0x75"), Ok(vec![0x70, 0x75]));
        assert!(parse_hex("707").is_err());
        assert!(parse_hex("zz").is_err());
        assert!(parse_hex("").is_err());
    }

    #[test]
    fn unknown_lines_point_to_help() {
        let mut session = session(SessionOptions::default());
        let lines = session.handle_line("launch").expect("in-memory transcript");
        assert_eq!(lines, vec!["ERR unknown command `launch` (try `help`)".to_string()]);
    }
}
