//! Background reassembly driven over a Tokio channel.
//!
//! Capture code usually runs on its own thread or task; [`AsyncAssembler`]
//! moves an [`Assembler`] into a dedicated task and feeds it owned segments
//! through a bounded channel, so the capture side only ever waits on channel
//! capacity.
//!
//! # Example
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use tcp_reassembly::{
//!     Assembler, AssemblerConfig, AsyncAssembler, ConnectionPool, FlowKey, NetFlow,
//!     Reassembly, Stream, TcpSegment,
//! };
//!
//! struct Print;
//!
//! impl Stream for Print {
//!     fn reassembled(&mut self, chunks: &[Reassembly<'_>]) {
//!         for chunk in chunks {
//!             println!("{:?}: {} bytes", chunk.direction, chunk.bytes.len());
//!         }
//!     }
//!     fn reassembly_complete(&mut self) {}
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ConnectionPool::new(|_: &FlowKey| Print);
//!     let assembler = Assembler::new(AssemblerConfig::default(), pool)?;
//!     let driver = AsyncAssembler::spawn(assembler, 1024);
//!
//!     let net = NetFlow::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
//!     let segment = TcpSegment::new(40000, 80, 1, b"hello").to_owned_segment();
//!     driver.send(net, segment).await?;
//!
//!     let flushed = driver.shutdown().await?;
//!     println!("flushed {flushed} connection(s)");
//!     Ok(())
//! }
//! ```

use std::time::Instant;

use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::assembler::Assembler;
use crate::error::{ReassemblyError, Result};
use crate::flow::{NetFlow, OwnedSegment};
use crate::stream::StreamFactory;

/// Work sent to the reassembly task.
enum Command {
    Segment(NetFlow, OwnedSegment),
    FlushAll(oneshot::Sender<usize>),
    FlushOlderThan(Instant, oneshot::Sender<usize>),
}

/// Handle to an [`Assembler`] running in its own Tokio task.
#[derive(Debug)]
pub struct AsyncAssembler {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<usize>,
}

impl AsyncAssembler {
    /// Move `assembler` into a new task with a channel of `capacity` segments.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(assembler: Assembler<F>, capacity: usize) -> Self
    where
        F: StreamFactory + Send + Sync + 'static,
        F::Stream: Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(async move {
            let mut assembler = assembler;
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Segment(net, segment) => {
                        assembler.process(&net, &segment.as_segment());
                    }
                    Command::FlushAll(reply) => {
                        let _ = reply.send(assembler.flush_all());
                    }
                    Command::FlushOlderThan(cutoff, reply) => {
                        let _ = reply.send(assembler.flush_older_than(cutoff));
                    }
                }
            }
            let flushed = assembler.flush_all();
            debug!("reassembly task stopping, flushed {flushed} connection(s)");
            flushed
        });
        Self { tx, task }
    }

    /// Queue a segment, waiting for channel capacity.
    pub async fn send(&self, net: NetFlow, segment: OwnedSegment) -> Result<()> {
        self.tx
            .send(Command::Segment(net, segment))
            .await
            .map_err(|_| ReassemblyError::ChannelClosed)
    }

    /// Flush every connection once all previously queued segments are processed.
    pub async fn flush_all(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::FlushAll(reply))
            .await
            .map_err(|_| ReassemblyError::ChannelClosed)?;
        rx.await.map_err(|_| ReassemblyError::ChannelClosed)
    }

    /// Flush connections idle since before `cutoff`.
    pub async fn flush_older_than(&self, cutoff: Instant) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::FlushOlderThan(cutoff, reply))
            .await
            .map_err(|_| ReassemblyError::ChannelClosed)?;
        rx.await.map_err(|_| ReassemblyError::ChannelClosed)
    }

    /// Stop accepting segments, flush what remains and wait for the task.
    ///
    /// Returns the number of connections flushed at shutdown.
    pub async fn shutdown(self) -> Result<usize> {
        drop(self.tx);
        self.task.await.map_err(|_| ReassemblyError::ChannelClosed)
    }
}
