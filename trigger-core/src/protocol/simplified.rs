//! ASCII protocol: `'$' CODE [digits] '#'`.
//!
//! `CODE` is three uppercase letters. Codes that take an argument expect one
//! to five decimal digits with a positive value; every other code must be
//! followed directly by the stop symbol.

use core::fmt;

use winnow::ModalResult;
use winnow::ascii::digit1;
use winnow::combinator::{eof, terminated};
use winnow::prelude::*;

use super::{PacketOutcome, ProtocolCodec, ProtocolVariant};
use crate::control::HostCommand;

pub const START_SYMBOL: u8 = b'$';
pub const STOP_SYMBOL: u8 = b'#';
pub const CODE_LEN: usize = 3;
/// Start symbol, code, and stop symbol.
pub const MIN_PACKET_LEN: usize = CODE_LEN + 2;
pub const MAX_PARAMETER_DIGITS: usize = 5;
/// Longest packet this codec can produce.
pub const MAX_PACKET_LEN: usize = MIN_PACKET_LEN + MAX_PARAMETER_DIGITS;

/// Reply written for accepted packets when outcome replies are enabled.
pub const SUCCESS_REPLY: &[u8; 3] = b"SUC";
/// Reply written for rejected packets when outcome replies are enabled.
pub const ERROR_REPLY: &[u8; 3] = b"ERR";

/// Reasons a packet is dropped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimplifiedError {
    /// Shorter than [`MIN_PACKET_LEN`].
    Undersized,
    /// The caller's reply buffer is shorter than [`MIN_PACKET_LEN`].
    ReplyBufferTooSmall,
    InvalidStartSymbol,
    InvalidStopSymbol,
    UnknownCommand([u8; CODE_LEN]),
    /// More than [`MAX_PARAMETER_DIGITS`] characters before the stop symbol.
    ParameterTooLong,
    /// Missing, non-numeric, or zero argument.
    InvalidParameter,
    /// Trailing characters after a code that takes no argument.
    UnexpectedParameter,
}

impl fmt::Display for SimplifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimplifiedError::Undersized => f.write_str("packet shorter than minimum"),
            SimplifiedError::ReplyBufferTooSmall => f.write_str("reply buffer too small"),
            SimplifiedError::InvalidStartSymbol => f.write_str("missing '$' start symbol"),
            SimplifiedError::InvalidStopSymbol => f.write_str("missing '#' stop symbol"),
            SimplifiedError::UnknownCommand(code) => match core::str::from_utf8(code) {
                Ok(text) => write!(f, "unknown command code {text:?}"),
                Err(_) => write!(f, "unknown command code {code:02x?}"),
            },
            SimplifiedError::ParameterTooLong => f.write_str("parameter longer than 5 digits"),
            SimplifiedError::InvalidParameter => f.write_str("parameter must be a positive integer"),
            SimplifiedError::UnexpectedParameter => f.write_str("command takes no parameter"),
        }
    }
}

/// Three-letter command codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandCode {
    /// `RTG`: trigger now.
    Rtg,
    /// `DTG`: set desired trigger count.
    Dtg,
    /// `CTG`: clear trigger count.
    Ctg,
    /// `PLS`: set pulse-count threshold.
    Pls,
    /// `RST`: reset counting.
    Rst,
    /// `PAU`: pause counting.
    Pau,
    /// `RES`: resume counting.
    Res,
    /// `MSR`: set measurement count.
    Msr,
}

impl CommandCode {
    pub const ALL: [CommandCode; 8] = [
        CommandCode::Rtg,
        CommandCode::Dtg,
        CommandCode::Ctg,
        CommandCode::Pls,
        CommandCode::Rst,
        CommandCode::Pau,
        CommandCode::Res,
        CommandCode::Msr,
    ];

    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8; CODE_LEN] {
        match self {
            CommandCode::Rtg => b"RTG",
            CommandCode::Dtg => b"DTG",
            CommandCode::Ctg => b"CTG",
            CommandCode::Pls => b"PLS",
            CommandCode::Rst => b"RST",
            CommandCode::Pau => b"PAU",
            CommandCode::Res => b"RES",
            CommandCode::Msr => b"MSR",
        }
    }

    /// Case-sensitive lookup.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_bytes().as_slice() == bytes)
    }

    #[must_use]
    pub const fn takes_parameter(self) -> bool {
        matches!(self, CommandCode::Dtg | CommandCode::Pls | CommandCode::Msr)
    }

    #[must_use]
    pub const fn for_command(command: HostCommand) -> Self {
        match command {
            HostCommand::TriggerNow => CommandCode::Rtg,
            HostCommand::SetDesiredCount(_) => CommandCode::Dtg,
            HostCommand::ClearCount => CommandCode::Ctg,
            HostCommand::SetThreshold(_) => CommandCode::Pls,
            HostCommand::Reset => CommandCode::Rst,
            HostCommand::Pause => CommandCode::Pau,
            HostCommand::Resume => CommandCode::Res,
            HostCommand::SetMeasurementCount(_) => CommandCode::Msr,
        }
    }

    const fn with_parameter(self, value: u32) -> HostCommand {
        match self {
            CommandCode::Dtg => HostCommand::SetDesiredCount(value),
            CommandCode::Pls => HostCommand::SetThreshold(value),
            CommandCode::Msr => HostCommand::SetMeasurementCount(value),
            CommandCode::Rtg => HostCommand::TriggerNow,
            CommandCode::Ctg => HostCommand::ClearCount,
            CommandCode::Rst => HostCommand::Reset,
            CommandCode::Pau => HostCommand::Pause,
            CommandCode::Res => HostCommand::Resume,
        }
    }
}

fn parameter_digits<'i>(input: &mut &'i [u8]) -> ModalResult<&'i [u8]> {
    terminated(digit1, eof).parse_next(input)
}

fn parse_parameter(raw: &[u8]) -> Result<u32, SimplifiedError> {
    if raw.len() > MAX_PARAMETER_DIGITS {
        return Err(SimplifiedError::ParameterTooLong);
    }

    let mut input = raw;
    let digits = parameter_digits
        .parse_next(&mut input)
        .map_err(|_| SimplifiedError::InvalidParameter)?;
    // At most five digits, so the fold cannot overflow.
    let value = digits
        .iter()
        .fold(0u32, |acc, digit| acc * 10 + u32::from(digit - b'0'));

    if value == 0 {
        Err(SimplifiedError::InvalidParameter)
    } else {
        Ok(value)
    }
}

/// Parses one packet, reporting why it was rejected.
///
/// # Errors
///
/// Returns the first [`SimplifiedError`] encountered: size, delimiters,
/// command code, then parameter.
pub fn parse_packet(packet: &[u8]) -> Result<HostCommand, SimplifiedError> {
    if packet.len() < MIN_PACKET_LEN {
        return Err(SimplifiedError::Undersized);
    }
    if packet[0] != START_SYMBOL {
        return Err(SimplifiedError::InvalidStartSymbol);
    }
    if packet[packet.len() - 1] != STOP_SYMBOL {
        return Err(SimplifiedError::InvalidStopSymbol);
    }

    let body = &packet[1..packet.len() - 1];
    let (code, parameter) = body.split_at(CODE_LEN);
    let code = CommandCode::from_bytes(code)
        .ok_or(SimplifiedError::UnknownCommand([code[0], code[1], code[2]]))?;

    if !code.takes_parameter() {
        return if parameter.is_empty() {
            Ok(code.with_parameter(0))
        } else {
            Err(SimplifiedError::UnexpectedParameter)
        };
    }

    parse_parameter(parameter).map(|value| code.with_parameter(value))
}

/// Decodes one packet; malformed input yields `None`.
#[must_use]
pub fn decode(packet: &[u8]) -> Option<HostCommand> {
    parse_packet(packet).ok()
}

/// Encodes `command` as a host would send it, zero-padding the argument to
/// five digits.
///
/// # Errors
///
/// [`SimplifiedError::ReplyBufferTooSmall`] when `out` is too short, or
/// [`SimplifiedError::ParameterTooLong`] when the argument exceeds five digits.
pub fn encode(command: HostCommand, out: &mut [u8]) -> Result<usize, SimplifiedError> {
    let code = CommandCode::for_command(command);
    let digits = match command.argument() {
        Some(value) if value > 99_999 => return Err(SimplifiedError::ParameterTooLong),
        Some(_) => MAX_PARAMETER_DIGITS,
        None => 0,
    };
    let len = MIN_PACKET_LEN + digits;
    if out.len() < len {
        return Err(SimplifiedError::ReplyBufferTooSmall);
    }

    out[0] = START_SYMBOL;
    out[1..=CODE_LEN].copy_from_slice(code.as_bytes());
    if let Some(mut value) = command.argument() {
        for slot in out[CODE_LEN + 1..CODE_LEN + 1 + digits].iter_mut().rev() {
            // `value % 10` is a single decimal digit.
            #[allow(clippy::cast_possible_truncation)]
            let digit = (value % 10) as u8;
            *slot = b'0' + digit;
            value /= 10;
        }
    }
    out[len - 1] = STOP_SYMBOL;

    Ok(len)
}

/// [`ProtocolCodec`] for the ASCII protocol.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SimplifiedCodec {
    outcome_reply: bool,
}

impl SimplifiedCodec {
    /// Codec that never replies.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            outcome_reply: false,
        }
    }

    /// Codec that answers every packet with `SUC` or `ERR`.
    #[must_use]
    pub const fn with_outcome_reply() -> Self {
        Self {
            outcome_reply: true,
        }
    }

    #[must_use]
    pub const fn replies(&self) -> bool {
        self.outcome_reply
    }

    fn write_reply(&self, reply: &mut [u8], text: &[u8; 3]) -> usize {
        if !self.outcome_reply {
            return 0;
        }
        reply[..text.len()].copy_from_slice(text);
        text.len()
    }
}

impl ProtocolCodec for SimplifiedCodec {
    type Error = SimplifiedError;

    fn handle_packet(&self, packet: &[u8], reply: &mut [u8]) -> PacketOutcome<Self::Error> {
        if reply.len() < MIN_PACKET_LEN {
            return PacketOutcome::Rejected {
                error: SimplifiedError::ReplyBufferTooSmall,
                reply_len: 0,
            };
        }

        match parse_packet(packet) {
            Ok(command) => PacketOutcome::Accepted {
                command,
                reply_len: self.write_reply(reply, SUCCESS_REPLY),
            },
            Err(error) => PacketOutcome::Rejected {
                error,
                reply_len: self.write_reply(reply, ERROR_REPLY),
            },
        }
    }

    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Simplified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_bare_code() {
        let cases: [(&[u8], HostCommand); 5] = [
            (b"$RTG#", HostCommand::TriggerNow),
            (b"$CTG#", HostCommand::ClearCount),
            (b"$RST#", HostCommand::Reset),
            (b"$PAU#", HostCommand::Pause),
            (b"$RES#", HostCommand::Resume),
        ];

        for (packet, expected) in cases {
            assert_eq!(decode(packet), Some(expected));
        }
    }

    #[test]
    fn decodes_parameters_with_leading_zeros() {
        assert_eq!(decode(b"$PLS00100#"), Some(HostCommand::SetThreshold(100)));
        assert_eq!(decode(b"$DTG2#"), Some(HostCommand::SetDesiredCount(2)));
        assert_eq!(
            decode(b"$MSR99999#"),
            Some(HostCommand::SetMeasurementCount(99_999))
        );
    }

    #[test]
    fn rejects_bad_parameters() {
        assert_eq!(parse_packet(b"$PLS#"), Err(SimplifiedError::InvalidParameter));
        assert_eq!(parse_packet(b"$PLS00000#"), Err(SimplifiedError::InvalidParameter));
        assert_eq!(parse_packet(b"$PLS-5#"), Err(SimplifiedError::InvalidParameter));
        assert_eq!(parse_packet(b"$PLS12a#"), Err(SimplifiedError::InvalidParameter));
        assert_eq!(parse_packet(b"$PLS123456#"), Err(SimplifiedError::ParameterTooLong));
    }

    #[test]
    fn rejects_framing_errors() {
        assert_eq!(parse_packet(b"$RTG"), Err(SimplifiedError::Undersized));
        assert_eq!(parse_packet(b"RTG##"), Err(SimplifiedError::InvalidStartSymbol));
        assert_eq!(parse_packet(b"$RTG!"), Err(SimplifiedError::InvalidStopSymbol));
        assert_eq!(
            parse_packet(b"$rtg#"),
            Err(SimplifiedError::UnknownCommand(*b"rtg"))
        );
        assert_eq!(parse_packet(b"$RTG1#"), Err(SimplifiedError::UnexpectedParameter));
    }

    #[test]
    fn codec_is_silent_by_default() {
        let mut reply = [0u8; MIN_PACKET_LEN];
        let outcome = SimplifiedCodec::new().handle_packet(b"$XYZ#", &mut reply);

        assert_eq!(
            outcome,
            PacketOutcome::Rejected {
                error: SimplifiedError::UnknownCommand(*b"XYZ"),
                reply_len: 0
            }
        );
    }

    #[test]
    fn outcome_replies_echo_result() {
        let codec = SimplifiedCodec::with_outcome_reply();
        let mut reply = [0u8; MIN_PACKET_LEN];

        let accepted = codec.handle_packet(b"$RTG#", &mut reply);
        assert_eq!(&reply[..accepted.reply_len()], SUCCESS_REPLY);

        let rejected = codec.handle_packet(b"$RTG", &mut reply);
        assert_eq!(&reply[..rejected.reply_len()], ERROR_REPLY);
    }

    #[test]
    fn short_reply_buffer_is_rejected() {
        let mut reply = [0u8; MIN_PACKET_LEN - 1];
        let outcome = SimplifiedCodec::new().handle_packet(b"$RTG#", &mut reply);
        assert_eq!(outcome.error(), Some(SimplifiedError::ReplyBufferTooSmall));
    }

    #[test]
    fn encode_pads_argument() {
        let mut out = [0u8; MAX_PACKET_LEN];

        let len = encode(HostCommand::SetThreshold(100), &mut out).expect("encode");
        assert_eq!(&out[..len], b"$PLS00100#");

        let len = encode(HostCommand::Pause, &mut out).expect("encode");
        assert_eq!(&out[..len], b"$PAU#");

        assert_eq!(
            encode(HostCommand::SetDesiredCount(100_000), &mut out),
            Err(SimplifiedError::ParameterTooLong)
        );
    }
}
