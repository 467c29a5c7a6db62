//! Flow identity and decoded TCP segment records.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;

use crate::types::{Seq, TcpFlags};

/// Network endpoint pair of a captured packet, in capture orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetFlow {
    /// Source address.
    pub src: IpAddr,
    /// Destination address.
    pub dst: IpAddr,
}

impl NetFlow {
    /// Create a new network flow.
    pub fn new(src: impl Into<IpAddr>, dst: impl Into<IpAddr>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }

    /// The same flow seen from the other side.
    pub fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

/// Direction-independent identity of a TCP conversation.
///
/// `FlowKey::new(a, b) == FlowKey::new(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    low: SocketAddr,
    high: SocketAddr,
}

impl FlowKey {
    /// Create a key from two endpoints in either order.
    pub fn new(a: SocketAddr, b: SocketAddr) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Build the key for a segment seen on the given network flow.
    pub fn from_segment(net: &NetFlow, segment: &TcpSegment<'_>) -> Self {
        Self::new(segment.src(net), segment.dst(net))
    }

    /// Endpoints in canonical order.
    pub fn endpoints(&self) -> (SocketAddr, SocketAddr) {
        (self.low, self.high)
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {}", self.low, self.high)
    }
}

/// A decoded TCP segment borrowed from the caller's packet buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// Sequence number as sent.
    pub seq: Seq,
    /// Control flags.
    pub flags: TcpFlags,
    /// Segment payload.
    pub payload: &'a [u8],
}

impl<'a> TcpSegment<'a> {
    /// Create a segment with no flags set.
    pub fn new(src_port: u16, dst_port: u16, seq: u32, payload: &'a [u8]) -> Self {
        Self {
            src_port,
            dst_port,
            seq: Seq(seq),
            flags: TcpFlags::NONE,
            payload,
        }
    }

    /// Set the control flags.
    pub fn with_flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Source socket address on the given network flow.
    pub fn src(&self, net: &NetFlow) -> SocketAddr {
        SocketAddr::new(net.src, self.src_port)
    }

    /// Destination socket address on the given network flow.
    pub fn dst(&self, net: &NetFlow) -> SocketAddr {
        SocketAddr::new(net.dst, self.dst_port)
    }

    /// Sequence number of the first payload byte (SYN occupies one number).
    pub fn data_start(&self) -> Seq {
        if self.flags.syn() {
            self.seq.wrapping_add(1)
        } else {
            self.seq
        }
    }

    /// Copy into an owned segment.
    pub fn to_owned_segment(&self) -> OwnedSegment {
        OwnedSegment {
            src_port: self.src_port,
            dst_port: self.dst_port,
            seq: self.seq,
            flags: self.flags,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

/// A TCP segment that owns its payload, for handing across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedSegment {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// Sequence number as sent.
    pub seq: Seq,
    /// Control flags.
    pub flags: TcpFlags,
    /// Segment payload.
    pub payload: Bytes,
}

impl OwnedSegment {
    /// Borrow as a [`TcpSegment`].
    pub fn as_segment(&self) -> TcpSegment<'_> {
        TcpSegment {
            src_port: self.src_port,
            dst_port: self.dst_port,
            seq: self.seq,
            flags: self.flags,
            payload: &self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn net() -> NetFlow {
        NetFlow::new(Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8))
    }

    #[test]
    fn test_flow_key_is_direction_independent() {
        let seg = TcpSegment::new(1, 2, 1000, &[]);
        let back = TcpSegment::new(2, 1, 5000, &[]);

        let forward = FlowKey::from_segment(&net(), &seg);
        let reverse = FlowKey::from_segment(&net().reverse(), &back);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_flow_key_distinguishes_ports() {
        let a = FlowKey::from_segment(&net(), &TcpSegment::new(1, 2, 0, &[]));
        let b = FlowKey::from_segment(&net(), &TcpSegment::new(3, 2, 0, &[]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_data_start_after_syn() {
        let seg = TcpSegment::new(1, 2, 0xFFFF_FFFF, &[1]).with_flags(TcpFlags::SYN);
        assert_eq!(seg.data_start(), Seq(0));

        let seg = TcpSegment::new(1, 2, 1000, &[1]);
        assert_eq!(seg.data_start(), Seq(1000));
    }

    #[test]
    fn test_owned_segment() {
        let seg = TcpSegment::new(1, 2, 10, b"abc").with_flags(TcpFlags::FIN);
        let owned = seg.to_owned_segment();
        assert_eq!(owned.as_segment(), seg);
    }
}
