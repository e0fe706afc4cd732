//! Host link session: packet assembly, decoding, and command forwarding.
//!
//! The transport task owns a [`SerialSession`]. Bytes read from the link are
//! appended with [`SerialSession::receive`]; when the line goes idle the task
//! calls [`SerialSession::end_of_packet`], which runs the codec over the whole
//! burst, forwards any decoded command to the control loop's host queue, and
//! leaves reply bytes for the task to write back.

use core::fmt;

use heapless::Vec;

use crate::control::HostCommand;
use crate::multiplexer::{EventQueueProducer, QueueFull};
use crate::protocol::{MAX_PACKET_LEN, PacketOutcome, ProtocolCodec};

/// What happened to one packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent<CE> {
    /// The command reached the host queue.
    Forwarded(HostCommand),
    /// The codec rejected the packet.
    Rejected(CE),
    /// The command decoded but the host queue refused it.
    Dropped(HostCommand),
    /// The burst exceeded the packet buffer and was discarded.
    Oversized { len: usize },
}

impl<CE: fmt::Display> fmt::Display for SessionEvent<CE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Forwarded(command) => write!(f, "forwarded {command}"),
            SessionEvent::Rejected(error) => write!(f, "rejected: {error}"),
            SessionEvent::Dropped(command) => write!(f, "dropped {command}: queue full"),
            SessionEvent::Oversized { len } => write!(f, "discarded oversized packet ({len} bytes)"),
        }
    }
}

/// Packet result plus the number of reply bytes to send.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionOutcome<CE> {
    pub event: SessionEvent<CE>,
    pub reply_len: usize,
}

/// Per-session counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionStats {
    pub packets: u32,
    pub forwarded: u32,
    pub rejected: u32,
    pub dropped: u32,
    pub oversized: u32,
}

/// Couples a codec with the producer side of the host-command queue.
pub struct SerialSession<C, Q, const N: usize = MAX_PACKET_LEN> {
    codec: C,
    queue: Q,
    pending: Vec<u8, N>,
    overflow: usize,
    stats: SessionStats,
}

impl<C, Q, const N: usize> SerialSession<C, Q, N>
where
    C: ProtocolCodec,
    Q: EventQueueProducer<Item = HostCommand>,
{
    pub fn new(codec: C, queue: Q) -> Self {
        Self {
            codec,
            queue,
            pending: Vec::new(),
            overflow: 0,
            stats: SessionStats::default(),
        }
    }

    /// Appends bytes to the packet being assembled. Bytes past the buffer
    /// capacity are counted and discarded.
    pub fn receive(&mut self, bytes: &[u8]) {
        let room = N - self.pending.len();
        let (kept, excess) = bytes.split_at(bytes.len().min(room));
        // `kept` never exceeds the remaining capacity.
        let _ = self.pending.extend_from_slice(kept);
        self.overflow = self.overflow.saturating_add(excess.len());
    }

    /// Returns `true` when bytes are waiting for the end of the packet.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.overflow > 0
    }

    /// Closes the packet being assembled and processes it.
    ///
    /// Returns `None` when no bytes were received since the last packet.
    pub fn end_of_packet(&mut self, reply: &mut [u8]) -> Option<SessionOutcome<C::Error>> {
        if !self.has_pending() {
            return None;
        }

        let outcome = if self.overflow > 0 {
            self.stats.packets = self.stats.packets.saturating_add(1);
            self.stats.oversized = self.stats.oversized.saturating_add(1);
            SessionOutcome {
                event: SessionEvent::Oversized {
                    len: self.pending.len().saturating_add(self.overflow),
                },
                reply_len: 0,
            }
        } else {
            let packet = core::mem::take(&mut self.pending);
            self.handle_packet(&packet, reply)
        };

        self.pending.clear();
        self.overflow = 0;
        Some(outcome)
    }

    /// Decodes one complete packet and forwards its command.
    pub fn handle_packet(
        &mut self,
        packet: &[u8],
        reply: &mut [u8],
    ) -> SessionOutcome<C::Error> {
        self.stats.packets = self.stats.packets.saturating_add(1);

        match self.codec.handle_packet(packet, reply) {
            PacketOutcome::Accepted { command, reply_len } => {
                let event = match self.queue.try_enqueue(command) {
                    Ok(()) => {
                        self.stats.forwarded = self.stats.forwarded.saturating_add(1);
                        SessionEvent::Forwarded(command)
                    }
                    Err(QueueFull) => {
                        self.stats.dropped = self.stats.dropped.saturating_add(1);
                        SessionEvent::Dropped(command)
                    }
                };
                SessionOutcome { event, reply_len }
            }
            PacketOutcome::Rejected { error, reply_len } => {
                self.stats.rejected = self.stats.rejected.saturating_add(1);
                SessionOutcome {
                    event: SessionEvent::Rejected(error),
                    reply_len,
                }
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    #[must_use]
    pub fn codec(&self) -> &C {
        &self.codec
    }

    #[must_use]
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }
}
