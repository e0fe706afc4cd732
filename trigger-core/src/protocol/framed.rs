//! Framed binary protocol.
//!
//! ```text
//! | preamble u16 | version u8 | status u8 | command id u16 | payload len u16 | payload | checksum [u8; 2] |
//! ```
//!
//! Multi-byte fields are little-endian. The checksum is a Fletcher-8 sum over
//! everything after the preamble up to the end of the payload.

use core::fmt;

use winnow::ModalResult;
use winnow::binary;
use winnow::combinator::{eof, terminated};
use winnow::prelude::*;

use super::{PacketOutcome, ProtocolCodec, ProtocolVariant};
use crate::control::HostCommand;

/// Magic constant opening every frame (`"up"` when read little-endian).
pub const PREAMBLE: u16 = 0x7570;
/// Protocol revision understood by this codec.
pub const PROTOCOL_VERSION: u8 = 0x01;
/// Status byte carried by commands and successful replies.
pub const STATUS_SUCCESS: u8 = 0x00;
/// Command id used on every error reply.
pub const ERROR_COMMAND_ID: u16 = 0;
pub const HEADER_LEN: usize = 8;
pub const FOOTER_LEN: usize = 2;
/// Header plus footer.
pub const OVERHEAD: usize = HEADER_LEN + FOOTER_LEN;

const CHECKSUM_START: usize = 2;

/// Rejection codes, carried verbatim in the status byte of error replies.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ProtocolError {
    InvalidPreamble = 1,
    VersionMismatch = 2,
    InvalidCommandStatus = 3,
    UnknownCommand = 4,
    InvalidFrameLength = 5,
    ChecksumError = 6,
    InvalidPayload = 7,
    ReplyBufferTooSmall = 8,
}

impl ProtocolError {
    /// Status byte for this error.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Maps a status byte back to an error; `0` and unknown codes yield `None`.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ProtocolError::InvalidPreamble),
            2 => Some(ProtocolError::VersionMismatch),
            3 => Some(ProtocolError::InvalidCommandStatus),
            4 => Some(ProtocolError::UnknownCommand),
            5 => Some(ProtocolError::InvalidFrameLength),
            6 => Some(ProtocolError::ChecksumError),
            7 => Some(ProtocolError::InvalidPayload),
            8 => Some(ProtocolError::ReplyBufferTooSmall),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProtocolError::InvalidPreamble => "invalid preamble",
            ProtocolError::VersionMismatch => "protocol version mismatch",
            ProtocolError::InvalidCommandStatus => "command status must be success",
            ProtocolError::UnknownCommand => "unknown command id",
            ProtocolError::InvalidFrameLength => "invalid frame length",
            ProtocolError::ChecksumError => "checksum mismatch",
            ProtocolError::InvalidPayload => "invalid payload",
            ProtocolError::ReplyBufferTooSmall => "reply buffer too small",
        };
        f.write_str(text)
    }
}

/// Command identifiers on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum CommandId {
    TriggerRadar = 0,
    SetPulseCount = 1,
    StopSystem = 2,
    ResumeSystem = 3,
    ResetCounter = 4,
    SetDesiredTriggerCount = 5,
    ClearTriggerCount = 6,
    SetMeasurementCount = 7,
}

impl CommandId {
    #[must_use]
    pub const fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(CommandId::TriggerRadar),
            1 => Some(CommandId::SetPulseCount),
            2 => Some(CommandId::StopSystem),
            3 => Some(CommandId::ResumeSystem),
            4 => Some(CommandId::ResetCounter),
            5 => Some(CommandId::SetDesiredTriggerCount),
            6 => Some(CommandId::ClearTriggerCount),
            7 => Some(CommandId::SetMeasurementCount),
            _ => None,
        }
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self as u16
    }

    /// Wire id that carries `command`.
    #[must_use]
    pub const fn for_command(command: HostCommand) -> Self {
        match command {
            HostCommand::TriggerNow => CommandId::TriggerRadar,
            HostCommand::SetThreshold(_) => CommandId::SetPulseCount,
            HostCommand::Pause => CommandId::StopSystem,
            HostCommand::Resume => CommandId::ResumeSystem,
            HostCommand::Reset => CommandId::ResetCounter,
            HostCommand::SetDesiredCount(_) => CommandId::SetDesiredTriggerCount,
            HostCommand::ClearCount => CommandId::ClearTriggerCount,
            HostCommand::SetMeasurementCount(_) => CommandId::SetMeasurementCount,
        }
    }

    /// Returns `true` when the command carries a little-endian `u32` payload.
    #[must_use]
    pub const fn takes_argument(self) -> bool {
        matches!(
            self,
            CommandId::SetPulseCount
                | CommandId::SetDesiredTriggerCount
                | CommandId::SetMeasurementCount
        )
    }

    fn into_command(self, payload: &[u8]) -> Result<HostCommand, ProtocolError> {
        if !self.takes_argument() {
            if !payload.is_empty() {
                return Err(ProtocolError::InvalidPayload);
            }
            return Ok(match self {
                CommandId::StopSystem => HostCommand::Pause,
                CommandId::ResumeSystem => HostCommand::Resume,
                CommandId::ResetCounter => HostCommand::Reset,
                CommandId::ClearTriggerCount => HostCommand::ClearCount,
                _ => HostCommand::TriggerNow,
            });
        }

        let mut input = payload;
        let value = u32_payload
            .parse_next(&mut input)
            .map_err(|_| ProtocolError::InvalidPayload)?;
        if value == 0 {
            return Err(ProtocolError::InvalidPayload);
        }

        Ok(match self {
            CommandId::SetDesiredTriggerCount => HostCommand::SetDesiredCount(value),
            CommandId::SetMeasurementCount => HostCommand::SetMeasurementCount(value),
            _ => HostCommand::SetThreshold(value),
        })
    }
}

/// Fixed-size frame header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub preamble: u16,
    pub version: u8,
    pub status: u8,
    pub command_id: u16,
    pub payload_len: u16,
}

impl FrameHeader {
    /// Header with the current preamble and version.
    #[must_use]
    pub const fn new(status: u8, command_id: u16, payload_len: u16) -> Self {
        Self {
            preamble: PREAMBLE,
            version: PROTOCOL_VERSION,
            status,
            command_id,
            payload_len,
        }
    }

    /// Total frame length implied by `payload_len`.
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.payload_len as usize + OVERHEAD
    }

    fn write_to(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.preamble.to_le_bytes());
        out[2] = self.version;
        out[3] = self.status;
        out[4..6].copy_from_slice(&self.command_id.to_le_bytes());
        out[6..8].copy_from_slice(&self.payload_len.to_le_bytes());
    }
}

/// Fletcher-8 checksum: two running sums modulo 256, returned as `[sum1, sum2]`.
#[must_use]
pub fn checksum(bytes: &[u8]) -> [u8; 2] {
    let (sum1, sum2) = bytes.iter().fold((0u8, 0u8), |(sum1, sum2), byte| {
        let sum1 = sum1.wrapping_add(*byte);
        (sum1, sum2.wrapping_add(sum1))
    });
    [sum1, sum2]
}

fn frame_header(input: &mut &[u8]) -> ModalResult<FrameHeader> {
    (
        binary::le_u16,
        binary::u8,
        binary::u8,
        binary::le_u16,
        binary::le_u16,
    )
        .map(
            |(preamble, version, status, command_id, payload_len)| FrameHeader {
                preamble,
                version,
                status,
                command_id,
                payload_len,
            },
        )
        .parse_next(input)
}

fn u32_payload(input: &mut &[u8]) -> ModalResult<u32> {
    terminated(binary::le_u32, eof).parse_next(input)
}

/// Parses the header at the front of `frame` without validating it.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidFrameLength`] when fewer than
/// [`HEADER_LEN`] bytes are available.
pub fn parse_header(frame: &[u8]) -> Result<FrameHeader, ProtocolError> {
    let mut input = frame;
    frame_header
        .parse_next(&mut input)
        .map_err(|_| ProtocolError::InvalidFrameLength)
}

/// Validates a complete frame and decodes its command.
///
/// Checks run in a fixed order and the first failure is reported: minimum
/// length, preamble, exact length, checksum, version, status, command id,
/// then payload shape.
///
/// # Errors
///
/// Returns the [`ProtocolError`] of the first failing check.
pub fn decode(frame: &[u8]) -> Result<HostCommand, ProtocolError> {
    if frame.len() < OVERHEAD {
        return Err(ProtocolError::InvalidFrameLength);
    }

    let header = parse_header(frame)?;
    if header.preamble != PREAMBLE {
        return Err(ProtocolError::InvalidPreamble);
    }
    if frame.len() != header.frame_len() {
        return Err(ProtocolError::InvalidFrameLength);
    }

    let body_end = frame.len() - FOOTER_LEN;
    if checksum(&frame[CHECKSUM_START..body_end]) != frame[body_end..] {
        return Err(ProtocolError::ChecksumError);
    }
    if header.version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch);
    }
    if header.status != STATUS_SUCCESS {
        return Err(ProtocolError::InvalidCommandStatus);
    }

    let id = CommandId::from_raw(header.command_id).ok_or(ProtocolError::UnknownCommand)?;
    id.into_command(&frame[HEADER_LEN..body_end])
}

/// Writes a complete frame into `out` and returns its length.
///
/// # Errors
///
/// [`ProtocolError::ReplyBufferTooSmall`] when `out` cannot hold the frame, or
/// [`ProtocolError::InvalidPayload`] when `payload` exceeds `u16::MAX` bytes.
pub fn encode_frame(
    status: u8,
    command_id: u16,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, ProtocolError> {
    let payload_len = u16::try_from(payload.len()).map_err(|_| ProtocolError::InvalidPayload)?;
    let header = FrameHeader::new(status, command_id, payload_len);
    let frame_len = header.frame_len();
    if out.len() < frame_len {
        return Err(ProtocolError::ReplyBufferTooSmall);
    }

    header.write_to(out);
    let body_end = HEADER_LEN + payload.len();
    out[HEADER_LEN..body_end].copy_from_slice(payload);
    let sum = checksum(&out[CHECKSUM_START..body_end]);
    out[body_end..frame_len].copy_from_slice(&sum);

    Ok(frame_len)
}

/// Encodes a success reply echoing `command_id`.
///
/// # Errors
///
/// See [`encode_frame`].
pub fn encode_success(
    command_id: u16,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, ProtocolError> {
    encode_frame(STATUS_SUCCESS, command_id, payload, out)
}

/// Encodes an error reply: error command id, error code as status, no payload.
///
/// # Errors
///
/// See [`encode_frame`].
pub fn encode_error(error: ProtocolError, out: &mut [u8]) -> Result<usize, ProtocolError> {
    encode_frame(error.code(), ERROR_COMMAND_ID, &[], out)
}

/// Encodes `command` as a host would send it.
///
/// # Errors
///
/// See [`encode_frame`].
pub fn encode_command(command: HostCommand, out: &mut [u8]) -> Result<usize, ProtocolError> {
    let id = CommandId::for_command(command);
    match command.argument() {
        Some(value) => encode_frame(STATUS_SUCCESS, id.raw(), &value.to_le_bytes(), out),
        None => encode_frame(STATUS_SUCCESS, id.raw(), &[], out),
    }
}

/// [`ProtocolCodec`] for the framed protocol.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FramedCodec;

impl FramedCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ProtocolCodec for FramedCodec {
    type Error = ProtocolError;

    fn handle_packet(&self, packet: &[u8], reply: &mut [u8]) -> PacketOutcome<Self::Error> {
        if reply.len() < OVERHEAD {
            return PacketOutcome::Rejected {
                error: ProtocolError::ReplyBufferTooSmall,
                reply_len: 0,
            };
        }

        match decode(packet) {
            Ok(command) => PacketOutcome::Accepted {
                command,
                reply_len: encode_success(CommandId::for_command(command).raw(), &[], reply)
                    .unwrap_or(0),
            },
            Err(error) => PacketOutcome::Rejected {
                error,
                reply_len: encode_error(error, reply).unwrap_or(0),
            },
        }
    }

    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Framed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_frame(command_id: u16, payload: &[u8]) -> heapless::Vec<u8, 32> {
        let mut buffer = [0u8; 32];
        let len = encode_frame(STATUS_SUCCESS, command_id, payload, &mut buffer)
            .expect("frame should fit");
        heapless::Vec::from_slice(&buffer[..len]).expect("frame copy")
    }

    fn reseal(frame: &mut [u8]) {
        let body_end = frame.len() - FOOTER_LEN;
        let sum = checksum(&frame[CHECKSUM_START..body_end]);
        frame[body_end..].copy_from_slice(&sum);
    }

    #[test]
    fn checksum_matches_fletcher8() {
        assert_eq!(checksum(&[]), [0, 0]);
        assert_eq!(checksum(&[0x01, 0x02]), [0x03, 0x04]);
        assert_eq!(checksum(&[0xFF, 0xFF]), [0xFE, 0xFD]);
    }

    #[test]
    fn trigger_frame_layout_is_little_endian() {
        let frame = command_frame(CommandId::TriggerRadar.raw(), &[]);
        assert_eq!(
            frame.as_slice(),
            &[0x70, 0x75, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x06]
        );
    }

    #[test]
    fn decodes_set_pulse_count_payload() {
        let frame = command_frame(CommandId::SetPulseCount.raw(), &250u32.to_le_bytes());
        assert_eq!(decode(&frame), Ok(HostCommand::SetThreshold(250)));
    }

    #[test]
    fn zero_argument_is_invalid_payload() {
        let frame = command_frame(CommandId::SetDesiredTriggerCount.raw(), &0u32.to_le_bytes());
        assert_eq!(decode(&frame), Err(ProtocolError::InvalidPayload));
    }

    #[test]
    fn unexpected_payload_is_invalid() {
        let frame = command_frame(CommandId::StopSystem.raw(), &[1]);
        assert_eq!(decode(&frame), Err(ProtocolError::InvalidPayload));

        let short = command_frame(CommandId::SetPulseCount.raw(), &[1, 0]);
        assert_eq!(decode(&short), Err(ProtocolError::InvalidPayload));
    }

    #[test]
    fn version_is_checked_after_checksum() {
        let mut frame = command_frame(CommandId::TriggerRadar.raw(), &[]);
        frame[2] = 0x02;
        assert_eq!(decode(&frame), Err(ProtocolError::ChecksumError));

        reseal(&mut frame);
        assert_eq!(decode(&frame), Err(ProtocolError::VersionMismatch));
    }

    #[test]
    fn status_must_be_success() {
        let mut frame = command_frame(CommandId::TriggerRadar.raw(), &[]);
        frame[3] = ProtocolError::ChecksumError.code();
        reseal(&mut frame);
        assert_eq!(decode(&frame), Err(ProtocolError::InvalidCommandStatus));
    }

    #[test]
    fn unknown_id_is_reported() {
        let frame = command_frame(0x0042, &[]);
        assert_eq!(decode(&frame), Err(ProtocolError::UnknownCommand));
    }

    #[test]
    fn length_mismatch_precedes_checksum() {
        let mut frame = command_frame(CommandId::TriggerRadar.raw(), &[]);
        frame[6] = 4;
        assert_eq!(decode(&frame), Err(ProtocolError::InvalidFrameLength));
    }

    #[test]
    fn reply_buffer_too_small_writes_nothing() {
        let frame = command_frame(CommandId::TriggerRadar.raw(), &[]);
        let mut reply = [0xAAu8; OVERHEAD - 1];

        let outcome = FramedCodec::new().handle_packet(&frame, &mut reply);

        assert_eq!(
            outcome,
            PacketOutcome::Rejected {
                error: ProtocolError::ReplyBufferTooSmall,
                reply_len: 0
            }
        );
        assert!(reply.iter().all(|byte| *byte == 0xAA));
    }

    #[test]
    fn success_reply_echoes_command_id() {
        let frame = command_frame(CommandId::ResetCounter.raw(), &[]);
        let mut reply = [0u8; OVERHEAD];

        let outcome = FramedCodec::new().handle_packet(&frame, &mut reply);

        assert_eq!(outcome.command(), Some(HostCommand::Reset));
        let header = parse_header(&reply).expect("reply header");
        assert_eq!(header, FrameHeader::new(STATUS_SUCCESS, 4, 0));
    }

    #[test]
    fn error_codes_round_trip() {
        for code in 1..=8 {
            let error = ProtocolError::from_code(code).expect("known code");
            assert_eq!(error.code(), code);
        }
        assert_eq!(ProtocolError::from_code(0), None);
        assert_eq!(ProtocolError::from_code(9), None);
    }
}
