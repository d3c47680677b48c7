use bytes::Bytes;

pub type PacketSender = tokio::sync::broadcast::Sender<Packet>;
pub type PacketReceiver = tokio::sync::broadcast::Receiver<Packet>;

/// Opaque ordering/correlation token. Travels with a packet into the
/// decode worker and comes back out unchanged on the frames produced
/// from that packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ticket(u64);

impl Ticket {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// One compressed access unit of a stream, or a per-stream control marker.
/// A decode worker only reacts to packets whose `stream_index` matches its
/// own.
#[derive(Clone, Debug)]
pub enum Packet {
    Data {
        stream_index: usize,
        data: Bytes,
        ticket: Ticket,
    },
    /// Playback position restarted upstream. The worker drains and flushes
    /// its codec but keeps running.
    Loop { stream_index: usize, ticket: Ticket },
    /// End of the stream. Terminal for the worker.
    Eof { stream_index: usize },
}

impl Packet {
    pub fn stream_index(&self) -> usize {
        match self {
            Packet::Data { stream_index, .. }
            | Packet::Loop { stream_index, .. }
            | Packet::Eof { stream_index } => *stream_index,
        }
    }
}
