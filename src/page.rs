//! Fixed-capacity buffer pages and the bounded pool they come from.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Buf, BufMut, BytesMut};

use crate::types::{Seq, PAGE_BYTES};

/// A buffered run of stream bytes starting at a known sequence number.
#[derive(Debug)]
pub struct Page {
    /// Sequence number of the first byte held.
    seq: Seq,
    /// Held bytes, at most [`PAGE_BYTES`].
    buf: BytesMut,
}

impl Page {
    fn empty() -> Self {
        Self {
            seq: Seq(0),
            buf: BytesMut::with_capacity(PAGE_BYTES),
        }
    }

    /// Sequence number of the first byte.
    pub fn seq(&self) -> Seq {
        self.seq
    }

    /// Sequence number one past the last byte.
    pub fn end(&self) -> Seq {
        self.seq.wrapping_add(self.buf.len())
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if the page holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Held bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Room left before the page is full.
    pub fn remaining(&self) -> usize {
        PAGE_BYTES - self.buf.len()
    }

    /// Append bytes. Callers split payloads into `PAGE_BYTES` pieces first.
    pub(crate) fn fill(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= self.remaining(), "page overflow");
        self.buf.put_slice(data);
    }

    /// Drop `n` bytes from the front, moving the start sequence forward.
    pub(crate) fn trim_front(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
        self.seq = self.seq.wrapping_add(n);
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.buf.reserve(PAGE_BYTES);
        self.seq = Seq(0);
    }
}

#[derive(Debug)]
struct PagePoolInner {
    /// Cleared pages ready for reuse.
    free: Vec<Page>,
    /// Pages currently handed out.
    in_use: usize,
    /// Hard ceiling on pages handed out at once.
    max_pages: usize,
}

/// Bounded pool of reusable pages.
///
/// Cloning yields another handle to the same pool, so several assemblers can
/// share one process-wide budget. The pool never evicts anything itself; it
/// only refuses to hand out pages once the ceiling is reached.
#[derive(Debug, Clone)]
pub struct PagePool {
    inner: Arc<Mutex<PagePoolInner>>,
}

impl PagePool {
    /// Create a pool that hands out at most `max_pages` pages at once.
    pub fn new(max_pages: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PagePoolInner {
                free: Vec::new(),
                in_use: 0,
                max_pages,
            })),
        }
    }

    /// Take an empty page starting at `seq`, or `None` if the budget is spent.
    pub fn acquire(&self, seq: Seq) -> Option<Page> {
        let mut pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.in_use >= pool.max_pages {
            return None;
        }
        pool.in_use += 1;
        let mut page = pool.free.pop().unwrap_or_else(Page::empty);
        page.seq = seq;
        Some(page)
    }

    /// Return a page to the free list.
    pub fn release(&self, mut page: Page) {
        page.reset();
        let mut pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        pool.in_use = pool.in_use.saturating_sub(1);
        pool.free.push(page);
    }

    /// Return several pages at once.
    pub fn release_all(&self, pages: impl IntoIterator<Item = Page>) {
        for page in pages {
            self.release(page);
        }
    }

    /// Number of pages currently handed out.
    pub fn in_use(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_use
    }

    /// Number of cleared pages waiting for reuse.
    pub fn free(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .free
            .len()
    }

    /// Configured ceiling.
    pub fn max_pages(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .max_pages
    }

    /// Check if no further page can be handed out.
    pub fn is_exhausted(&self) -> bool {
        let pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        pool.in_use >= pool.max_pages
    }
}
