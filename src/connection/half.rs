//! Reassembly state for one direction of a TCP connection.

use std::collections::VecDeque;
use std::ops::Range;

use log::{debug, trace, warn};

use crate::flow::TcpSegment;
use crate::page::{Page, PagePool};
use crate::types::{Direction, Seq};

use super::state::{HalfState, ReassemblyStats};

/// Where the bytes of a pending chunk live.
#[derive(Debug)]
pub(crate) enum Chunk {
    /// A range of the segment currently being processed.
    Payload(Range<usize>),
    /// A page popped from the buffer, released after delivery.
    Page(Page),
}

/// A chunk produced during one `process` call, not yet handed to the consumer.
#[derive(Debug)]
pub(crate) struct PendingChunk {
    pub data: Chunk,
    pub direction: Direction,
    pub skip: bool,
    pub start: bool,
}

/// What to do with an incoming segment's payload.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Nothing to deliver or buffer.
    Ignore,
    /// `payload[offset..]` continues the stream exactly at `next_seq`.
    Contiguous { offset: usize },
    /// Payload ranges not yet buffered; `start` is the sequence of offset 0.
    Buffer { start: Seq, pieces: Vec<Range<usize>> },
}

/// One direction of a connection.
///
/// Buffered pages never overlap and stay sorted by modular sequence order.
#[derive(Debug)]
pub struct HalfConnection {
    direction: Direction,
    state: HalfState,
    /// Next byte expected; `None` until a SYN is seen or an origin is adopted.
    next_seq: Option<Seq>,
    pages: VecDeque<Page>,
    pending_start: bool,
    pending_skip: bool,
    stats: ReassemblyStats,
}

impl HalfConnection {
    /// Create an unstarted half.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: HalfState::Unstarted,
            next_seq: None,
            pages: VecDeque::new(),
            pending_start: false,
            pending_skip: false,
            stats: ReassemblyStats::default(),
        }
    }

    /// Direction of this half.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Lifecycle state.
    pub fn state(&self) -> HalfState {
        self.state
    }

    /// Check if FIN/RST has been processed.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Next sequence number expected, once the origin is known.
    pub fn next_seq(&self) -> Option<Seq> {
        self.next_seq
    }

    /// Number of pages waiting for a gap to fill.
    pub fn buffered_pages(&self) -> usize {
        self.pages.len()
    }

    /// Number of bytes waiting for a gap to fill.
    pub fn buffered_bytes(&self) -> usize {
        self.pages.iter().map(Page::len).sum()
    }

    /// Counters for this direction.
    pub fn stats(&self) -> &ReassemblyStats {
        &self.stats
    }

    /// Classify a segment against the current stream position.
    ///
    /// A SYN on a half without origin establishes it here; an empty SYN
    /// immediately yields an empty start chunk.
    pub(crate) fn place(
        &mut self,
        segment: &TcpSegment<'_>,
        out: &mut Vec<PendingChunk>,
    ) -> Placement {
        self.stats.record_segment();
        let start = segment.data_start();
        let len = segment.payload.len();

        if segment.flags.syn() && self.next_seq.is_none() {
            self.next_seq = Some(start);
            self.state = HalfState::Started;
            self.pending_start = true;
            self.pending_skip = false;
            debug!("{:?} stream origin at {}", self.direction, start);
            if len == 0 {
                self.emit(Chunk::Payload(0..0), start, 0, out);
            }
        }

        if len == 0 {
            return Placement::Ignore;
        }

        let Some(next) = self.next_seq else {
            return self.uncovered(start, len);
        };

        let distance = next.difference(start);
        if distance > 0 {
            return self.uncovered(start, len);
        }

        let overlap = distance.unsigned_abs() as usize;
        if overlap >= len {
            self.stats.record_retransmission();
            trace!(
                "{:?} dropping retransmission at {} ({} bytes)",
                self.direction, start, len
            );
            return Placement::Ignore;
        }
        Placement::Contiguous { offset: overlap }
    }

    /// Ranges of `[start, start + len)` not covered by buffered pages.
    fn uncovered(&mut self, start: Seq, len: usize) -> Placement {
        let len_rel = len as i64;
        let mut cursor = 0i64;
        let mut pieces = Vec::new();

        for page in &self.pages {
            if cursor >= len_rel {
                break;
            }
            let page_start = i64::from(start.difference(page.seq()));
            let page_end = page_start + page.len() as i64;
            if page_end <= cursor {
                continue;
            }
            if page_start > cursor {
                pieces.push(cursor as usize..page_start.min(len_rel) as usize);
            }
            cursor = cursor.max(page_end);
        }
        if cursor < len_rel {
            pieces.push(cursor as usize..len);
        }

        if pieces.is_empty() {
            self.stats.record_retransmission();
            trace!("{:?} segment at {} already buffered", self.direction, start);
            return Placement::Ignore;
        }
        self.stats.record_buffered();
        trace!(
            "{:?} buffering {} bytes at {} in {} piece(s)",
            self.direction,
            len,
            start,
            pieces.len()
        );
        Placement::Buffer { start, pieces }
    }

    /// Deliver `payload[offset..]`, which starts exactly at `next_seq`.
    pub(crate) fn deliver(&mut self, payload: &[u8], offset: usize, out: &mut Vec<PendingChunk>) {
        let Some(next) = self.next_seq else {
            return;
        };
        let len = payload.len() - offset;
        self.emit(Chunk::Payload(offset..payload.len()), next, len, out);
    }

    /// Insert a filled page at its sorted position.
    pub(crate) fn buffer(&mut self, page: Page) {
        let pos = self
            .pages
            .iter()
            .position(|p| page.seq().precedes(p.seq()))
            .unwrap_or(self.pages.len());
        self.pages.insert(pos, page);
    }

    /// Deliver every buffered page that continues the stream without a gap.
    pub(crate) fn flush(&mut self, pool: &PagePool, out: &mut Vec<PendingChunk>) {
        while let Some(next) = self.next_seq {
            self.trim_delivered(pool);
            let ready = self.pages.front().is_some_and(|page| page.seq() == next);
            if !ready {
                break;
            }
            if let Some(page) = self.pages.pop_front() {
                let (seq, len) = (page.seq(), page.len());
                self.emit(Chunk::Page(page), seq, len, out);
            }
        }
    }

    /// Jump over the gap in front of the first buffered page and flush from it.
    ///
    /// For an unstarted half this adopts the page as the stream origin.
    /// Returns `false` if nothing is buffered.
    pub(crate) fn skip_flush(&mut self, pool: &PagePool, out: &mut Vec<PendingChunk>) -> bool {
        self.trim_delivered(pool);
        let Some(page) = self.pages.pop_front() else {
            return false;
        };
        if self.next_seq != Some(page.seq()) {
            self.pending_skip = true;
        }
        if self.state == HalfState::Unstarted {
            debug!("{:?} adopting origin at {}", self.direction, page.seq());
            self.state = HalfState::Started;
        }
        let (seq, len) = (page.seq(), page.len());
        self.emit(Chunk::Page(page), seq, len, out);
        self.flush(pool, out);
        true
    }

    /// Deliver everything buffered, skipping gaps, and close this half.
    pub(crate) fn close(&mut self, pool: &PagePool, out: &mut Vec<PendingChunk>) {
        self.flush(pool, out);
        while self.skip_flush(pool, out) {}
        self.state = HalfState::Closed;
        debug!("{:?} closed", self.direction);
    }

    /// Throw away the earliest buffered page to free memory.
    ///
    /// Once the origin is known, the stream position moves past the discarded
    /// bytes and the next chunk delivered is marked as a skip. Without an
    /// origin nothing is marked: a later SYN starts the stream cleanly and any
    /// real gap is caught by `skip_flush`. Returns `false` if nothing is buffered.
    pub(crate) fn discard_oldest(&mut self, pool: &PagePool) -> bool {
        let Some(page) = self.pages.pop_front() else {
            return false;
        };
        let end = page.end();
        if let Some(next) = self.next_seq {
            if next.precedes(end) {
                self.next_seq = Some(end);
            }
            self.pending_skip = true;
        }
        self.stats.record_discard(page.len());
        warn!(
            "{:?} discarding {} buffered bytes at {} under memory pressure",
            self.direction,
            page.len(),
            page.seq()
        );
        pool.release(page);
        true
    }

    /// Account for incoming bytes that could not be buffered.
    pub(crate) fn record_dropped(&mut self, bytes: usize) {
        self.stats.record_discard(bytes);
        warn!(
            "{:?} dropping {} incoming bytes, page budget exhausted",
            self.direction, bytes
        );
    }

    /// Remove all buffered pages without delivering them.
    pub(crate) fn take_pages(&mut self) -> impl Iterator<Item = Page> + '_ {
        self.pages.drain(..)
    }

    /// Release or trim front pages that overlap bytes already delivered.
    fn trim_delivered(&mut self, pool: &PagePool) {
        let Some(next) = self.next_seq else {
            return;
        };
        loop {
            let Some(front) = self.pages.front() else {
                return;
            };
            if next.difference(front.end()) <= 0 {
                if let Some(page) = self.pages.pop_front() {
                    pool.release(page);
                }
                continue;
            }
            let behind = front.seq().difference(next);
            if behind > 0 {
                if let Some(front) = self.pages.front_mut() {
                    front.trim_front(behind as usize);
                }
            }
            return;
        }
    }

    fn emit(&mut self, data: Chunk, start: Seq, len: usize, out: &mut Vec<PendingChunk>) {
        let skip = std::mem::take(&mut self.pending_skip);
        let start_marker = std::mem::take(&mut self.pending_start);
        self.next_seq = Some(start.wrapping_add(len));
        self.stats.record_delivery(len, skip);
        out.push(PendingChunk {
            data,
            direction: self.direction,
            skip,
            start: start_marker,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TcpFlags, PAGE_BYTES};

    fn seg(seq: u32, payload: &[u8]) -> TcpSegment<'_> {
        TcpSegment::new(1, 2, seq, payload)
    }

    fn buffer_all(half: &mut HalfConnection, pool: &PagePool, payload: &[u8], placement: Placement) {
        let Placement::Buffer { start, pieces } = placement else {
            panic!("expected buffer placement");
        };
        for range in pieces {
            let mut offset = range.start;
            while offset < range.end {
                let n = (range.end - offset).min(PAGE_BYTES);
                let mut page = pool.acquire(start.wrapping_add(offset)).unwrap();
                page.fill(&payload[offset..offset + n]);
                half.buffer(page);
                offset += n;
            }
        }
    }

    fn bytes_of(out: &[PendingChunk], payload: &[u8]) -> Vec<Vec<u8>> {
        out.iter()
            .map(|c| match &c.data {
                Chunk::Payload(r) => payload[r.clone()].to_vec(),
                Chunk::Page(p) => p.bytes().to_vec(),
            })
            .collect()
    }

    #[test]
    fn test_syn_establishes_origin() {
        let mut half = HalfConnection::new(Direction::Forward);
        let mut out = Vec::new();
        let s = seg(1000, &[1, 2, 3]).with_flags(TcpFlags::SYN);

        assert_eq!(half.place(&s, &mut out), Placement::Contiguous { offset: 0 });
        half.deliver(s.payload, 0, &mut out);

        assert_eq!(half.state(), HalfState::Started);
        assert_eq!(half.next_seq(), Some(Seq(1004)));
        assert_eq!(out.len(), 1);
        assert!(out[0].start);
        assert!(!out[0].skip);
    }

    #[test]
    fn test_empty_syn_emits_start_chunk() {
        let mut half = HalfConnection::new(Direction::Reverse);
        let mut out = Vec::new();
        let s = seg(41, &[]).with_flags(TcpFlags::SYN | TcpFlags::ACK);

        assert_eq!(half.place(&s, &mut out), Placement::Ignore);
        assert_eq!(out.len(), 1);
        assert!(out[0].start);
        assert_eq!(out[0].direction, Direction::Reverse);
        assert_eq!(half.next_seq(), Some(Seq(42)));
    }

    #[test]
    fn test_retransmission_dropped() {
        let pool = PagePool::new(4);
        let mut half = HalfConnection::new(Direction::Forward);
        let mut out = Vec::new();
        let s = seg(100, &[1, 2, 3, 4]).with_flags(TcpFlags::SYN);
        half.place(&s, &mut out);
        half.deliver(s.payload, 0, &mut out);
        half.flush(&pool, &mut out);

        let again = seg(101, &[1, 2]);
        assert_eq!(half.place(&again, &mut out), Placement::Ignore);
        assert_eq!(half.stats().retransmissions, 1);
    }

    #[test]
    fn test_partial_overlap_trimmed() {
        let mut half = HalfConnection::new(Direction::Forward);
        let mut out = Vec::new();
        let s = seg(1000, &[0; 10]).with_flags(TcpFlags::SYN);
        half.place(&s, &mut out);
        half.deliver(s.payload, 0, &mut out);

        let overlap = seg(1007, &[7, 8, 9, 0, 1, 2, 3, 4]);
        assert_eq!(
            half.place(&overlap, &mut out),
            Placement::Contiguous { offset: 4 }
        );
    }

    #[test]
    fn test_buffered_ranges_are_not_duplicated() {
        let pool = PagePool::new(8);
        let mut half = HalfConnection::new(Direction::Forward);
        let mut out = Vec::new();

        let first = [1u8; 4];
        let s = seg(1004, &first);
        let placement = half.place(&s, &mut out);
        buffer_all(&mut half, &pool, &first, placement);

        let wide = [2u8; 12];
        let s = seg(1000, &wide);
        let placement = half.place(&s, &mut out);
        assert_eq!(
            placement,
            Placement::Buffer {
                start: Seq(1000),
                pieces: vec![0..4, 8..12],
            }
        );
        buffer_all(&mut half, &pool, &wide, placement);

        let seqs: Vec<u32> = half.pages.iter().map(|p| p.seq().0).collect();
        assert_eq!(seqs, vec![1000, 1004, 1008]);
        assert_eq!(half.buffered_bytes(), 12);

        let dup = [3u8; 6];
        assert_eq!(half.place(&seg(1002, &dup), &mut out), Placement::Ignore);
    }

    #[test]
    fn test_skip_flush_adopts_origin() {
        let pool = PagePool::new(8);
        let mut half = HalfConnection::new(Direction::Forward);
        let mut out = Vec::new();

        for (seq, data) in [(1004u32, [2u8, 2, 3]), (1001, [1, 2, 3]), (1010, [4, 2, 3])] {
            let s = seg(seq, &data);
            let placement = half.place(&s, &mut out);
            buffer_all(&mut half, &pool, &data, placement);
        }
        half.flush(&pool, &mut out);
        assert!(out.is_empty());

        assert!(half.skip_flush(&pool, &mut out));
        assert_eq!(half.state(), HalfState::Started);
        assert_eq!(bytes_of(&out, &[]), vec![vec![1, 2, 3], vec![2, 2, 3]]);
        assert!(out[0].skip);
        assert!(!out[1].skip);
        assert_eq!(half.next_seq(), Some(Seq(1007)));
        assert_eq!(half.buffered_pages(), 1);
    }

    #[test]
    fn test_close_flushes_across_gaps() {
        let pool = PagePool::new(8);
        let mut half = HalfConnection::new(Direction::Forward);
        let mut out = Vec::new();

        let s = seg(0, &[9]).with_flags(TcpFlags::SYN);
        half.place(&s, &mut out);
        half.deliver(s.payload, 0, &mut out);
        out.clear();

        let later = [5u8, 6];
        let s = seg(10, &later);
        let placement = half.place(&s, &mut out);
        buffer_all(&mut half, &pool, &later, placement);

        half.close(&pool, &mut out);
        assert!(half.is_closed());
        assert_eq!(out.len(), 1);
        assert!(out[0].skip);
        assert_eq!(bytes_of(&out, &[]), vec![vec![5, 6]]);
    }

    #[test]
    fn test_discard_oldest_advances_position() {
        let pool = PagePool::new(8);
        let mut half = HalfConnection::new(Direction::Forward);
        let mut out = Vec::new();

        let s = seg(99, &[]).with_flags(TcpFlags::SYN);
        half.place(&s, &mut out);
        out.clear();

        for (seq, data) in [(110u32, [1u8; 5]), (115, [2u8; 5])] {
            let s = seg(seq, &data);
            let placement = half.place(&s, &mut out);
            buffer_all(&mut half, &pool, &data, placement);
        }
        assert_eq!(pool.in_use(), 2);

        assert!(half.discard_oldest(&pool));
        assert_eq!(pool.in_use(), 1);
        assert_eq!(half.next_seq(), Some(Seq(115)));
        assert_eq!(half.stats().bytes_discarded, 5);

        half.flush(&pool, &mut out);
        assert_eq!(out.len(), 1);
        assert!(out[0].skip);
    }

    #[test]
    fn test_discard_before_origin_leaves_start_clean() {
        let pool = PagePool::new(8);
        let mut half = HalfConnection::new(Direction::Forward);
        let mut out = Vec::new();

        let s = seg(1001, b"abc");
        let placement = half.place(&s, &mut out);
        buffer_all(&mut half, &pool, b"abc", placement);
        assert!(half.discard_oldest(&pool));
        assert_eq!(half.next_seq(), None);
        assert_eq!(half.stats().bytes_discarded, 3);

        let s = seg(1000, &[]).with_flags(TcpFlags::SYN);
        half.place(&s, &mut out);
        let s = seg(1001, b"abc");
        if let Placement::Contiguous { offset } = half.place(&s, &mut out) {
            half.deliver(b"abc", offset, &mut out);
        }

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| !c.skip));
        assert!(out[0].start);
        assert_eq!(half.stats().skips, 0);
    }

    #[test]
    fn test_flush_trims_pages_behind_position() {
        let pool = PagePool::new(8);
        let mut half = HalfConnection::new(Direction::Forward);
        let mut out = Vec::new();

        let buffered = [7u8; 6];
        let s = seg(5, &buffered);
        let placement = half.place(&s, &mut out);
        buffer_all(&mut half, &pool, &buffered, placement);

        let s = seg(0, &[1, 2, 3, 4, 5, 6, 7]).with_flags(TcpFlags::SYN);
        assert_eq!(half.place(&s, &mut out), Placement::Contiguous { offset: 0 });
        half.deliver(s.payload, 0, &mut out);
        half.flush(&pool, &mut out);

        assert_eq!(half.next_seq(), Some(Seq(11)));
        assert_eq!(bytes_of(&out, s.payload), vec![vec![1, 2, 3, 4, 5, 6, 7], vec![7, 7, 7]]);
        assert_eq!(half.buffered_pages(), 0);
    }
}
