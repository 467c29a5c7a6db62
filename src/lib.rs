//! TCP stream reassembly for captured traffic.
//!
//! This crate takes decoded TCP segments, in whatever order they were
//! captured, and turns each direction of each flow back into an in-order
//! byte stream. Segments may arrive out of order, overlap, be retransmitted,
//! or cross the 32-bit sequence number wraparound.
//!
//! # Features
//!
//! - Modular sequence arithmetic ([`Seq`])
//! - Bounded, pooled out-of-order buffering ([`PagePool`])
//! - Overlap trimming and duplicate suppression
//! - Skip markers where data is known to be missing
//! - Global and per-connection memory budgets with eviction
//! - Optional Tokio driver (`tokio` feature)
//!
//! # Example
//!
//! ```
//! use std::net::Ipv4Addr;
//! use tcp_reassembly::{
//!     Assembler, AssemblerConfig, ConnectionPool, FlowKey, NetFlow, Reassembly, Stream,
//!     TcpFlags, TcpSegment,
//! };
//!
//! #[derive(Default)]
//! struct Collect(Vec<u8>);
//!
//! impl Stream for Collect {
//!     fn reassembled(&mut self, chunks: &[Reassembly<'_>]) {
//!         for chunk in chunks {
//!             self.0.extend_from_slice(chunk.bytes);
//!         }
//!     }
//!     fn reassembly_complete(&mut self) {
//!         println!("got {} bytes", self.0.len());
//!     }
//! }
//!
//! let pool = ConnectionPool::new(|_: &FlowKey| Collect::default());
//! let mut assembler = Assembler::new(AssemblerConfig::default(), pool).unwrap();
//!
//! let net = NetFlow::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
//! let syn = TcpSegment::new(40000, 80, 1000, b"").with_flags(TcpFlags::SYN);
//! let later = TcpSegment::new(40000, 80, 1006, b"world");
//! let first = TcpSegment::new(40000, 80, 1001, b"hello");
//!
//! assembler.process(&net, &syn);
//! assembler.process(&net, &later); // buffered
//! assembler.process(&net, &first); // delivers "hello" then "world"
//! ```
//!
//! # Delivery Model
//!
//! ```text
//!  segment ──> Assembler::process
//!                 │
//!                 ├─ ConnectionPool (flow lookup / lazy Stream creation)
//!                 ├─ HalfConnection (trim, buffer into pages, order)
//!                 ├─ flush loop ──> Stream::reassembled(&[Reassembly])
//!                 └─ PagePool (pages recycled after delivery)
//! ```

pub mod assembler;
pub mod connection;
pub mod error;
pub mod flow;
pub mod page;
pub mod stream;
pub mod types;

// Async driver (requires tokio feature)
#[cfg(feature = "tokio")]
pub mod assembler_async;

// Re-export commonly used types at the crate root
pub use assembler::Assembler;
pub use connection::{AssemblerConfig, ConnectionPool, HalfState, ReassemblyStats};
pub use error::{ReassemblyError, Result};
pub use flow::{FlowKey, NetFlow, OwnedSegment, TcpSegment};
pub use page::{Page, PagePool};
pub use stream::{Reassembly, Stream, StreamFactory};
pub use types::{Direction, Seq, TcpFlags, PAGE_BYTES};

#[cfg(feature = "tokio")]
pub use assembler_async::AsyncAssembler;
