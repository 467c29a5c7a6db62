//! Consumer-facing types: delivered chunks and the per-flow stream interface.

use crate::flow::FlowKey;
use crate::types::Direction;

/// A run of in-order stream bytes delivered to a [`Stream`].
///
/// `bytes` borrows the assembler's buffers and is valid only for the duration
/// of the [`Stream::reassembled`] call; copy it to keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reassembly<'a> {
    /// Payload bytes, in stream order.
    pub bytes: &'a [u8],
    /// Which half of the connection these bytes belong to.
    pub direction: Direction,
    /// Bytes before this chunk are missing and will never be delivered.
    pub skip: bool,
    /// This chunk directly follows an observed SYN.
    pub start: bool,
}

/// Per-flow consumer of reassembled data.
pub trait Stream {
    /// Called once per processed segment with the chunks it made deliverable.
    ///
    /// `chunks` may be empty.
    fn reassembled(&mut self, chunks: &[Reassembly<'_>]);

    /// Called once when both directions have closed or the flow is flushed.
    fn reassembly_complete(&mut self);
}

/// Creates a [`Stream`] for each new flow.
pub trait StreamFactory {
    /// Stream type produced.
    type Stream: Stream;

    /// Create the consumer for a flow seen for the first time.
    fn new_stream(&self, key: &FlowKey) -> Self::Stream;
}

impl<F, S> StreamFactory for F
where
    F: Fn(&FlowKey) -> S,
    S: Stream,
{
    type Stream = S;

    fn new_stream(&self, key: &FlowKey) -> S {
        self(key)
    }
}
