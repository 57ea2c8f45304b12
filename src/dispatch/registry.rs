//! Routing-key to handler lookup.
//!
//! One registry per role (host-side and peer-side). Registration is
//! first-wins: a second registration for the same key is ignored and
//! reported, never replaces the existing handler.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::envelope::Envelope;
use crate::error::{RelayError, Result};
use crate::socket::Connection;

/// Handler for one routing key.
///
/// Receives the connection the envelope arrived on so it can reply to that
/// sender alone.
pub type RouteHandler = Arc<dyn Fn(&Connection, Envelope) -> anyhow::Result<()> + Send + Sync>;

/// Thread-safe map of routing keys to handlers.
pub struct DispatchRegistry {
    name: &'static str,
    routes: RwLock<HashMap<String, RouteHandler>>,
}

impl std::fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("name", &self.name)
            .field("keys", &self.keys())
            .finish()
    }
}

impl DispatchRegistry {
    /// Create an empty registry. `name` appears in log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for `key`.
    ///
    /// Returns false (and leaves the existing handler in place) if the key
    /// is already taken.
    pub fn register(&self, key: impl Into<String>, handler: RouteHandler) -> bool {
        let key = key.into();
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes.contains_key(&key) {
            log::warn!("[Dispatch:{}] Route '{}' already registered, keeping first", self.name, key);
            return false;
        }
        log::debug!("[Dispatch:{}] Registered route '{}'", self.name, key);
        routes.insert(key, handler);
        true
    }

    /// Invoke the handler registered for the envelope's routing key.
    ///
    /// The registry lock is released before the handler runs, so handlers
    /// may register routes and other connections are never blocked behind a
    /// slow handler.
    pub fn route(&self, conn: &Connection, envelope: Envelope) -> Result<()> {
        let handler = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(envelope.routing_key())
            .cloned();
        let Some(handler) = handler else {
            return Err(RelayError::UnknownRoute(envelope.routing_key().to_string()));
        };
        handler(conn, envelope).map_err(RelayError::Handler)
    }

    /// Whether a handler exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
