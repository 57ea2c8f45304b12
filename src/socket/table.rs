//! Host-side registry of active connections.
//!
//! The table is the only structure mutated by more than one task: the accept
//! loop inserts, and both the owning session and the liveness supervisor
//! remove. Every operation takes the lock for its own duration only and
//! never across an `.await`; iteration works on a snapshot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::connection::Connection;

/// Shared map from remote address to connection handle.
///
/// Cloning is cheap and yields a handle to the same table.
#[derive(Clone, Default)]
pub struct ConnectionTable {
    inner: Arc<Mutex<HashMap<SocketAddr, Arc<Connection>>>>,
}

impl std::fmt::Debug for ConnectionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTable")
            .field("len", &self.len())
            .finish()
    }
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, Arc<Connection>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a connection keyed by its remote address.
    ///
    /// Returns `false` without effect if the address is already present.
    pub fn insert(&self, conn: Arc<Connection>) -> bool {
        let mut map = self.lock();
        let addr = conn.remote_addr();
        if map.contains_key(&addr) {
            return false;
        }
        map.insert(addr, conn);
        true
    }

    /// Remove this exact connection if it is still in the table.
    ///
    /// A second removal of the same entry, or removal of a connection whose
    /// address has since been reused by another connection, is a no-op.
    /// Returns `true` if this call removed the entry.
    pub fn remove(&self, conn: &Arc<Connection>) -> bool {
        let mut map = self.lock();
        match map.get(&conn.remote_addr()) {
            Some(existing) if Arc::ptr_eq(existing, conn) => {
                map.remove(&conn.remote_addr());
                true
            }
            _ => false,
        }
    }

    /// Look up a connection by address.
    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<Connection>> {
        self.lock().get(addr).cloned()
    }

    /// Whether a connection for `addr` is registered.
    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.lock().contains_key(addr)
    }

    /// Stable copy of the current entries, for iteration without holding
    /// the lock.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().values().cloned().collect()
    }

    /// Addresses of all registered connections.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.lock().keys().copied().collect()
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.lock().drain().map(|(_, conn)| conn).collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
