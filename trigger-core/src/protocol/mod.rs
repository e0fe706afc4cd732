//! Serial protocol codecs.
//!
//! Two wire formats carry the same [`HostCommand`] vocabulary:
//!
//! - [`framed`]: binary header, payload, and Fletcher-8 footer. Every packet
//!   gets a reply frame, including rejected ones.
//! - [`simplified`]: `$CODE[digits]#` ASCII packets. Rejections are silent
//!   unless the codec is built with outcome replies.
//!
//! The variant is chosen once at start-up; [`Codec`] wraps whichever was
//! selected behind the shared [`ProtocolCodec`] interface.

pub mod framed;
pub mod simplified;

use core::fmt;

use crate::control::HostCommand;

pub use framed::{FramedCodec, ProtocolError};
pub use simplified::{SimplifiedCodec, SimplifiedError};

/// Largest packet accepted from the serial link.
pub const MAX_PACKET_LEN: usize = 1024;

/// Reply buffer size that fits every reply either codec produces.
pub const MAX_REPLY_LEN: usize = framed::OVERHEAD;

/// Result of feeding one packet through a codec.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PacketOutcome<E> {
    /// The packet decoded into a command.
    Accepted { command: HostCommand, reply_len: usize },
    /// The packet was rejected; no command must reach the control loop.
    Rejected { error: E, reply_len: usize },
}

impl<E: Copy> PacketOutcome<E> {
    /// Returns the decoded command, if any.
    #[must_use]
    pub const fn command(&self) -> Option<HostCommand> {
        match self {
            PacketOutcome::Accepted { command, .. } => Some(*command),
            PacketOutcome::Rejected { .. } => None,
        }
    }

    /// Returns the rejection reason, if any.
    #[must_use]
    pub const fn error(&self) -> Option<E> {
        match self {
            PacketOutcome::Accepted { .. } => None,
            PacketOutcome::Rejected { error, .. } => Some(*error),
        }
    }

    /// Number of reply bytes written; zero means nothing should be sent.
    #[must_use]
    pub const fn reply_len(&self) -> usize {
        match self {
            PacketOutcome::Accepted { reply_len, .. } | PacketOutcome::Rejected { reply_len, .. } => {
                *reply_len
            }
        }
    }

    /// Converts the rejection type.
    pub fn map_error<F, M>(self, mapper: M) -> PacketOutcome<F>
    where
        M: FnOnce(E) -> F,
    {
        match self {
            PacketOutcome::Accepted { command, reply_len } => {
                PacketOutcome::Accepted { command, reply_len }
            }
            PacketOutcome::Rejected { error, reply_len } => PacketOutcome::Rejected {
                error: mapper(error),
                reply_len,
            },
        }
    }
}

/// A packet decoder that also produces the bytes to send back to the host.
pub trait ProtocolCodec {
    /// Rejection reason reported for malformed packets.
    type Error: Copy + fmt::Display;

    /// Decodes `packet` and writes any reply into `reply`.
    fn handle_packet(&self, packet: &[u8], reply: &mut [u8]) -> PacketOutcome<Self::Error>;

    /// Wire format implemented by this codec.
    fn variant(&self) -> ProtocolVariant;
}

/// Wire format selector.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ProtocolVariant {
    Framed,
    #[default]
    Simplified,
}

impl ProtocolVariant {
    /// Parses a variant from its lowercase name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("framed") {
            Some(ProtocolVariant::Framed)
        } else if name.eq_ignore_ascii_case("simplified") {
            Some(ProtocolVariant::Simplified)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ProtocolVariant::Framed => "framed",
            ProtocolVariant::Simplified => "simplified",
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejection reported by [`Codec`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CodecError {
    Framed(ProtocolError),
    Simplified(SimplifiedError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Framed(err) => write!(f, "framed: {err}"),
            CodecError::Simplified(err) => write!(f, "simplified: {err}"),
        }
    }
}

impl From<ProtocolError> for CodecError {
    fn from(value: ProtocolError) -> Self {
        CodecError::Framed(value)
    }
}

impl From<SimplifiedError> for CodecError {
    fn from(value: SimplifiedError) -> Self {
        CodecError::Simplified(value)
    }
}

/// Codec chosen at start-up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Codec {
    Framed(FramedCodec),
    Simplified(SimplifiedCodec),
}

impl Codec {
    /// Builds the default codec for `variant`.
    #[must_use]
    pub const fn for_variant(variant: ProtocolVariant) -> Self {
        match variant {
            ProtocolVariant::Framed => Codec::Framed(FramedCodec::new()),
            ProtocolVariant::Simplified => Codec::Simplified(SimplifiedCodec::new()),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::for_variant(ProtocolVariant::default())
    }
}

impl ProtocolCodec for Codec {
    type Error = CodecError;

    fn handle_packet(&self, packet: &[u8], reply: &mut [u8]) -> PacketOutcome<Self::Error> {
        match self {
            Codec::Framed(codec) => codec.handle_packet(packet, reply).map_error(CodecError::from),
            Codec::Simplified(codec) => codec
                .handle_packet(packet, reply)
                .map_error(CodecError::from),
        }
    }

    fn variant(&self) -> ProtocolVariant {
        match self {
            Codec::Framed(_) => ProtocolVariant::Framed,
            Codec::Simplified(_) => ProtocolVariant::Simplified,
        }
    }
}
