//! The reassembly engine: routes segments, flushes ordered data, enforces budgets.

use std::sync::{MutexGuard, PoisonError, TryLockError};
use std::time::Instant;

use log::{debug, warn};

use crate::connection::{
    AssemblerConfig, Chunk, Connection, ConnectionPool, PendingChunk, Placement,
};
use crate::error::Result;
use crate::flow::{FlowKey, NetFlow, TcpSegment};
use crate::page::{Page, PagePool};
use crate::stream::{Reassembly, Stream, StreamFactory};
use crate::types::{Direction, Seq, PAGE_BYTES};

/// TCP stream reassembler.
///
/// Feed it every captured TCP segment through [`process`](Self::process); each
/// call hands the flow's [`Stream`] the chunks that became deliverable.
///
/// Calls for the same flow must not run concurrently. Several assemblers may
/// share one [`ConnectionPool`] and one [`PagePool`] to spread different flows
/// across threads.
pub struct Assembler<F: StreamFactory> {
    config: AssemblerConfig,
    pool: ConnectionPool<F>,
    pages: PagePool,
}

impl<F: StreamFactory> Assembler<F> {
    /// Create an assembler with its own page pool sized by `config.max_pages`.
    pub fn new(config: AssemblerConfig, pool: ConnectionPool<F>) -> Result<Self> {
        let pages = PagePool::new(config.max_pages);
        Self::with_page_pool(config, pool, pages)
    }

    /// Create an assembler drawing pages from an existing, possibly shared, pool.
    ///
    /// The page pool's own ceiling is the effective global budget.
    pub fn with_page_pool(
        config: AssemblerConfig,
        pool: ConnectionPool<F>,
        pages: PagePool,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pool,
            pages,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Connection pool in use.
    pub fn pool(&self) -> &ConnectionPool<F> {
        &self.pool
    }

    /// Page pool in use.
    pub fn page_pool(&self) -> &PagePool {
        &self.pages
    }

    /// Reassemble one captured segment.
    ///
    /// The flow's stream receives exactly one `reassembled` call, possibly
    /// with no chunks. When this segment closes the last open direction, the
    /// stream also receives `reassembly_complete` and the flow is dropped.
    pub fn process(&mut self, net: &NetFlow, segment: &TcpSegment<'_>) {
        let src = segment.src(net);
        let key = FlowKey::new(src, segment.dst(net));
        let handle = self.pool.get_or_create(key, src);
        let mut connection = handle.lock().unwrap_or_else(PoisonError::into_inner);
        let direction = connection.direction_of(src);

        let mut out = Vec::new();
        if connection.half(direction).is_closed() {
            debug!("{key}: {direction:?} already closed, ignoring segment at {}", segment.seq);
        } else {
            self.assemble(&key, &mut connection, direction, segment, &mut out);
        }
        self.deliver(&mut connection, segment.payload, out);

        if connection.is_complete() {
            self.complete(&key, &mut connection);
        }
    }

    /// Close and flush every connection. Returns how many were flushed.
    pub fn flush_all(&mut self) -> usize {
        let keys = self.pool.keys();
        keys.iter().filter(|key| self.finish(key)).count()
    }

    /// Close and flush connections with no activity since `cutoff`.
    ///
    /// Returns how many were flushed.
    pub fn flush_older_than(&mut self, cutoff: Instant) -> usize {
        let keys = self.pool.idle_since(cutoff);
        let flushed = keys.iter().filter(|key| self.finish(key)).count();
        if flushed > 0 {
            debug!("flushed {flushed} idle connection(s)");
        }
        flushed
    }

    /// Flush connections idle for longer than the configured timeout.
    pub fn flush_idle(&mut self) -> usize {
        let Some(timeout) = self.config.idle_timeout else {
            return 0;
        };
        match Instant::now().checked_sub(timeout) {
            Some(cutoff) => self.flush_older_than(cutoff),
            None => 0,
        }
    }

    fn assemble(
        &self,
        key: &FlowKey,
        connection: &mut Connection<F::Stream>,
        direction: Direction,
        segment: &TcpSegment<'_>,
        out: &mut Vec<PendingChunk>,
    ) {
        match connection.half_mut(direction).place(segment, out) {
            Placement::Ignore => {}
            Placement::Contiguous { offset } => {
                connection
                    .half_mut(direction)
                    .deliver(segment.payload, offset, out);
            }
            Placement::Buffer { start, pieces } => {
                'pieces: for range in pieces {
                    let mut offset = range.start;
                    while offset < range.end {
                        let n = (range.end - offset).min(PAGE_BYTES);
                        self.enforce_connection_budget(connection, direction, out);
                        let seq = start.wrapping_add(offset);
                        let Some(mut page) = self.acquire(key, connection, direction, seq) else {
                            connection
                                .half_mut(direction)
                                .record_dropped(range.end - offset);
                            break 'pieces;
                        };
                        page.fill(&segment.payload[offset..offset + n]);
                        connection.half_mut(direction).buffer(page);
                        offset += n;
                    }
                }
            }
        }

        connection.half_mut(direction).flush(&self.pages, out);
        self.enforce_connection_budget(connection, direction, out);

        if segment.flags.is_close() {
            connection.half_mut(direction).close(&self.pages, out);
        }
    }

    /// Skip ahead while the connection holds its full page allowance.
    fn enforce_connection_budget(
        &self,
        connection: &mut Connection<F::Stream>,
        direction: Direction,
        out: &mut Vec<PendingChunk>,
    ) {
        while connection.buffered_pages() >= self.config.max_pages_per_connection {
            let flushed = connection.half_mut(direction).skip_flush(&self.pages, out)
                || connection
                    .half_mut(direction.reverse())
                    .skip_flush(&self.pages, out);
            if !flushed {
                break;
            }
        }
    }

    /// Get a page, evicting buffered data if the global budget is spent.
    ///
    /// Victims in order: other connections, least recently active first, then
    /// the requesting half itself.
    fn acquire(
        &self,
        key: &FlowKey,
        connection: &mut Connection<F::Stream>,
        direction: Direction,
        seq: Seq,
    ) -> Option<Page> {
        if let Some(page) = self.pages.acquire(seq) {
            return Some(page);
        }

        for (victim_key, victim) in self.pool.least_recently_active(key) {
            let mut victim: MutexGuard<'_, Connection<F::Stream>> = match victim.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => continue,
            };
            while victim.discard_oldest(&self.pages) {
                warn!("{key}: evicted buffered data from {victim_key}");
                if let Some(page) = self.pages.acquire(seq) {
                    return Some(page);
                }
            }
        }

        while connection.half_mut(direction).discard_oldest(&self.pages) {
            if let Some(page) = self.pages.acquire(seq) {
                return Some(page);
            }
        }
        None
    }

    /// Hand pending chunks to the stream, then recycle their pages.
    fn deliver(
        &self,
        connection: &mut Connection<F::Stream>,
        payload: &[u8],
        out: Vec<PendingChunk>,
    ) {
        let chunks: Vec<Reassembly<'_>> = out
            .iter()
            .map(|pending| Reassembly {
                bytes: match &pending.data {
                    Chunk::Payload(range) => &payload[range.clone()],
                    Chunk::Page(page) => page.bytes(),
                },
                direction: pending.direction,
                skip: pending.skip,
                start: pending.start,
            })
            .collect();
        connection.stream_mut().reassembled(&chunks);
        drop(chunks);

        self.pages.release_all(out.into_iter().filter_map(|pending| match pending.data {
            Chunk::Page(page) => Some(page),
            Chunk::Payload(_) => None,
        }));
    }

    fn complete(&self, key: &FlowKey, connection: &mut Connection<F::Stream>) {
        connection.stream_mut().reassembly_complete();
        connection.release_pages(&self.pages);
        self.pool.take(key);
        debug!("{key}: reassembly complete");
    }

    /// Force-close both halves of a pooled connection and complete it.
    fn finish(&self, key: &FlowKey) -> bool {
        let Some(handle) = self.pool.get(key) else {
            return false;
        };
        let mut connection = handle.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        for direction in [Direction::Forward, Direction::Reverse] {
            let half = connection.half_mut(direction);
            if !half.is_closed() {
                half.close(&self.pages, &mut out);
            }
        }
        self.deliver(&mut connection, &[], out);
        self.complete(key, &mut connection);
        true
    }
}

impl<F: StreamFactory> std::fmt::Debug for Assembler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("pages", &self.pages)
            .finish()
    }
}
