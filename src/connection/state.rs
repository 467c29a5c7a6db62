//! Half-connection lifecycle state and counters.

/// Lifecycle of one direction of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HalfState {
    /// No stream origin known yet.
    #[default]
    Unstarted,
    /// Origin known, either from a SYN or adopted from buffered data.
    Started,
    /// FIN or RST seen; nothing more is delivered.
    Closed,
}

impl HalfState {
    /// Check if the stream origin is known.
    pub fn is_started(&self) -> bool {
        *self == HalfState::Started
    }

    /// Check if this direction has finished.
    pub fn is_closed(&self) -> bool {
        *self == HalfState::Closed
    }
}

/// Per-direction reassembly counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Segments handed to this half.
    pub segments: u64,
    /// Segments that had to be buffered out of order.
    pub segments_buffered: u64,
    /// Segments dropped as pure retransmissions.
    pub retransmissions: u64,
    /// Bytes delivered to the consumer.
    pub bytes_delivered: u64,
    /// Bytes discarded under memory pressure.
    pub bytes_discarded: u64,
    /// Chunks delivered with the skip marker.
    pub skips: u64,
}

impl ReassemblyStats {
    /// Record a segment arriving.
    pub fn record_segment(&mut self) {
        self.segments += 1;
    }

    /// Record a segment going into the out-of-order buffer.
    pub fn record_buffered(&mut self) {
        self.segments_buffered += 1;
    }

    /// Record a dropped retransmission.
    pub fn record_retransmission(&mut self) {
        self.retransmissions += 1;
    }

    /// Record a delivered chunk.
    pub fn record_delivery(&mut self, bytes: usize, skip: bool) {
        self.bytes_delivered += bytes as u64;
        if skip {
            self.skips += 1;
        }
    }

    /// Record bytes lost to eviction.
    pub fn record_discard(&mut self, bytes: usize) {
        self.bytes_discarded += bytes as u64;
    }
}
