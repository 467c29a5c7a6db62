//! Core reassembly types and constants.

/// Capacity of a single buffer page in bytes.
pub const PAGE_BYTES: usize = 1900;

/// TCP sequence number with modular (wraparound) ordering.
///
/// Sequence numbers must never be compared with `<` on the raw value; use
/// [`Seq::difference`] or the ordering helpers built on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Seq(pub u32);

impl Seq {
    /// Signed distance from `self` to `other`, computed modulo 2^32.
    ///
    /// Positive when `other` follows `self`, negative when it precedes it.
    /// `Seq(0xFFFF_FFFF).difference(Seq(9)) == 10`.
    pub fn difference(self, other: Seq) -> i32 {
        other.0.wrapping_sub(self.0) as i32
    }

    /// Advance by `len` bytes, wrapping at 2^32.
    pub fn wrapping_add(self, len: usize) -> Seq {
        Seq(self.0.wrapping_add(len as u32))
    }

    /// Check if `self` comes strictly before `other`.
    pub fn precedes(self, other: Seq) -> bool {
        self.difference(other) > 0
    }

    /// Check if `self` comes strictly after `other`.
    pub fn follows(self, other: Seq) -> bool {
        self.difference(other) < 0
    }
}

impl std::fmt::Display for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Seq {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// TCP control flags relevant to reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    /// No flags set.
    pub const NONE: TcpFlags = TcpFlags(0x00);
    /// Final segment from the sender.
    pub const FIN: TcpFlags = TcpFlags(0x01);
    /// Synchronize sequence numbers.
    pub const SYN: TcpFlags = TcpFlags(0x02);
    /// Reset the connection.
    pub const RST: TcpFlags = TcpFlags(0x04);
    /// Push buffered data.
    pub const PSH: TcpFlags = TcpFlags(0x08);
    /// Acknowledgment field is significant.
    pub const ACK: TcpFlags = TcpFlags(0x10);
    /// Urgent pointer is significant.
    pub const URG: TcpFlags = TcpFlags(0x20);

    /// Create flags from the raw TCP header byte.
    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }

    /// Check if all bits of `other` are set.
    pub fn contains(&self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if SYN is set.
    pub fn syn(&self) -> bool {
        self.contains(Self::SYN)
    }

    /// Check if FIN is set.
    pub fn fin(&self) -> bool {
        self.contains(Self::FIN)
    }

    /// Check if RST is set.
    pub fn rst(&self) -> bool {
        self.contains(Self::RST)
    }

    /// Check if this segment ends its direction of the stream (FIN or RST).
    pub fn is_close(&self) -> bool {
        self.fin() || self.rst()
    }
}

impl std::ops::BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 | rhs.0)
    }
}

/// Direction of a segment relative to its connection's first-seen orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Same orientation as the first segment seen for the connection.
    Forward,
    /// Opposite orientation.
    Reverse,
}

impl Direction {
    /// Index of this direction's half in a connection.
    pub fn index(&self) -> usize {
        match self {
            Self::Forward => 0,
            Self::Reverse => 1,
        }
    }

    /// The other direction.
    pub fn reverse(&self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }
}
