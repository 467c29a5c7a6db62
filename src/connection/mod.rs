//! Connections: both directions of a flow plus the consumer they feed.
//!
//! This module provides:
//! - Per-direction reassembly state ([`HalfConnection`])
//! - A flow-keyed pool with lazy stream construction ([`ConnectionPool`])
//! - Memory budget configuration ([`AssemblerConfig`])
//!
//! # Example
//!
//! ```
//! use tcp_reassembly::connection::{AssemblerConfig, ConnectionPool};
//! use tcp_reassembly::{FlowKey, Reassembly, Stream};
//!
//! struct Discard;
//!
//! impl Stream for Discard {
//!     fn reassembled(&mut self, _chunks: &[Reassembly<'_>]) {}
//!     fn reassembly_complete(&mut self) {}
//! }
//!
//! let config = AssemblerConfig::default()
//!     .with_max_pages(1024)
//!     .with_max_pages_per_connection(32);
//! assert!(config.validate().is_ok());
//!
//! let pool = ConnectionPool::new(|_: &FlowKey| Discard);
//! assert!(pool.is_empty());
//! ```

mod config;
mod half;
mod pool;
mod state;

use std::net::SocketAddr;
use std::time::Instant;

pub use config::AssemblerConfig;
pub use half::HalfConnection;
pub(crate) use half::{Chunk, PendingChunk, Placement};
pub use pool::{ConnectionHandle, ConnectionPool};
pub use state::{HalfState, ReassemblyStats};

use crate::flow::FlowKey;
use crate::page::PagePool;
use crate::types::Direction;

/// Both halves of one flow and the stream receiving their data.
#[derive(Debug)]
pub struct Connection<S> {
    key: FlowKey,
    /// Sender of the first segment seen; its half is [`Direction::Forward`].
    forward_src: SocketAddr,
    halves: [HalfConnection; 2],
    stream: S,
    created_at: Instant,
}

impl<S> Connection<S> {
    /// Create a connection whose forward direction is sent by `forward_src`.
    pub fn new(key: FlowKey, forward_src: SocketAddr, stream: S) -> Self {
        Self {
            key,
            forward_src,
            halves: [
                HalfConnection::new(Direction::Forward),
                HalfConnection::new(Direction::Reverse),
            ],
            stream,
            created_at: Instant::now(),
        }
    }

    /// Flow key.
    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    /// When the connection was first seen.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Direction of a segment sent by `src`.
    pub fn direction_of(&self, src: SocketAddr) -> Direction {
        if src == self.forward_src {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    /// One half of the connection.
    pub fn half(&self, direction: Direction) -> &HalfConnection {
        &self.halves[direction.index()]
    }

    pub(crate) fn half_mut(&mut self, direction: Direction) -> &mut HalfConnection {
        &mut self.halves[direction.index()]
    }

    /// The consumer for this flow.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub(crate) fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Pages buffered by both halves.
    pub fn buffered_pages(&self) -> usize {
        self.halves.iter().map(HalfConnection::buffered_pages).sum()
    }

    /// Check if both halves have closed.
    pub fn is_complete(&self) -> bool {
        self.halves.iter().all(HalfConnection::is_closed)
    }

    /// Discard the earliest buffered page, forward half first.
    pub(crate) fn discard_oldest(&mut self, pages: &PagePool) -> bool {
        self.halves.iter_mut().any(|half| half.discard_oldest(pages))
    }

    /// Return every buffered page to `pages`.
    pub(crate) fn release_pages(&mut self, pages: &PagePool) {
        for half in &mut self.halves {
            pages.release_all(half.take_pages());
        }
    }
}
