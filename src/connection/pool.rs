//! Flow-keyed pool of live connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use log::debug;

use crate::flow::FlowKey;
use crate::page::PagePool;
use crate::stream::StreamFactory;

use super::Connection;

/// Shared handle to one connection.
pub type ConnectionHandle<S> = Arc<Mutex<Connection<S>>>;

/// Entry in the connection pool.
struct PoolEntry<S> {
    /// The connection.
    connection: ConnectionHandle<S>,
    /// When this connection was last touched by a segment.
    last_used: Instant,
    /// Activity counter value at last touch, for a strict recency order.
    last_tick: u64,
}

/// Inner pool state.
struct PoolInner<S> {
    /// Connections by flow.
    connections: HashMap<FlowKey, PoolEntry<S>>,
    /// Monotonic activity counter.
    tick: u64,
}

impl<S> PoolInner<S> {
    fn touch(&mut self, key: &FlowKey) -> Option<ConnectionHandle<S>> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.connections.get_mut(key)?;
        entry.last_used = Instant::now();
        entry.last_tick = tick;
        Some(entry.connection.clone())
    }
}

/// Connections by direction-independent flow key.
///
/// The pool lock covers lookup, creation and removal only; each connection
/// carries its own mutex. Cloning yields another handle to the same pool.
pub struct ConnectionPool<F: StreamFactory> {
    factory: Arc<F>,
    inner: Arc<Mutex<PoolInner<F::Stream>>>,
}

impl<F: StreamFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<F: StreamFactory> ConnectionPool<F> {
    /// Create an empty pool that builds streams with `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            inner: Arc::new(Mutex::new(PoolInner {
                connections: HashMap::new(),
                tick: 0,
            })),
        }
    }

    /// Look up the connection for `key`, creating it if unseen.
    ///
    /// `src` is the sending endpoint of the segment being processed; for a new
    /// connection it becomes the forward direction.
    pub fn get_or_create(&self, key: FlowKey, src: SocketAddr) -> ConnectionHandle<F::Stream> {
        let mut pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = pool.touch(&key) {
            return connection;
        }

        debug!("new connection {key}");
        let stream = self.factory.new_stream(&key);
        let connection = Arc::new(Mutex::new(Connection::new(key, src, stream)));
        let tick = pool.tick;
        pool.connections.insert(
            key,
            PoolEntry {
                connection: connection.clone(),
                last_used: Instant::now(),
                last_tick: tick,
            },
        );
        connection
    }

    /// Look up a connection without creating or touching it.
    pub fn get(&self, key: &FlowKey) -> Option<ConnectionHandle<F::Stream>> {
        let pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        pool.connections.get(key).map(|e| e.connection.clone())
    }

    /// Remove a connection from the pool without touching its pages.
    pub(crate) fn take(&self, key: &FlowKey) -> Option<ConnectionHandle<F::Stream>> {
        let mut pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        pool.connections.remove(key).map(|e| e.connection)
    }

    /// Evict a connection and return its buffered pages to `pages`.
    ///
    /// The stream is dropped without a completion callback. Returns `false`
    /// if the flow was unknown.
    pub fn remove(&self, key: &FlowKey, pages: &PagePool) -> bool {
        let Some(connection) = self.take(key) else {
            return false;
        };
        let mut connection = connection.lock().unwrap_or_else(PoisonError::into_inner);
        connection.release_pages(pages);
        debug!("removed connection {key}");
        true
    }

    /// Connections other than `exclude`, least recently active first.
    pub fn least_recently_active(
        &self,
        exclude: &FlowKey,
    ) -> Vec<(FlowKey, ConnectionHandle<F::Stream>)> {
        let pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<_> = pool
            .connections
            .iter()
            .filter(|(key, _)| *key != exclude)
            .map(|(key, e)| (e.last_tick, *key, e.connection.clone()))
            .collect();
        entries.sort_by_key(|(tick, _, _)| *tick);
        entries
            .into_iter()
            .map(|(_, key, connection)| (key, connection))
            .collect()
    }

    /// Keys of connections not touched since `cutoff`, least recent first.
    pub fn idle_since(&self, cutoff: Instant) -> Vec<FlowKey> {
        let pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut idle: Vec<_> = pool
            .connections
            .iter()
            .filter(|(_, e)| e.last_used < cutoff)
            .map(|(key, e)| (e.last_tick, *key))
            .collect();
        idle.sort();
        idle.into_iter().map(|(_, key)| key).collect()
    }

    /// Keys of every live connection.
    pub fn keys(&self) -> Vec<FlowKey> {
        let pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        pool.connections.keys().copied().collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        let pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        pool.connections.len()
    }

    /// Check if the pool has no connections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F: StreamFactory> std::fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pool = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ConnectionPool")
            .field("connections", &pool.connections.len())
            .field("tick", &pool.tick)
            .finish()
    }
}
