use std::collections::HashMap;

use crate::exchange::Exchange;
use crate::reactor::Connection;

/// Open exchanges, keyed by connection and correlation id.
///
/// Ids are only unique per connection, so two peers may use the same id.
pub struct ExchangeMap<C> {
    connections: HashMap<C, HashMap<String, Exchange<C>>>,
}

impl<C: Connection> ExchangeMap<C> {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    pub fn get(&self, connection: &C, id: &str) -> Option<Exchange<C>> {
        self.connections.get(connection)?.get(id).cloned()
    }

    pub fn contains(&self, connection: &C, id: &str) -> bool {
        self.connections
            .get(connection)
            .is_some_and(|exchanges| exchanges.contains_key(id))
    }

    /// Register an exchange, returning the one it replaced.
    pub fn insert(
        &mut self,
        connection: C,
        id: String,
        exchange: Exchange<C>,
    ) -> Option<Exchange<C>> {
        self.connections
            .entry(connection)
            .or_default()
            .insert(id, exchange)
    }

    /// Remove the entry for `id`, but only if it still refers to `exchange`.
    pub fn remove(&mut self, connection: &C, id: &str, exchange: &Exchange<C>) -> bool {
        let Some(exchanges) = self.connections.get_mut(connection) else {
            return false;
        };
        if !exchanges.get(id).is_some_and(|current| current.ptr_eq(exchange)) {
            return false;
        }

        exchanges.remove(id);
        if exchanges.is_empty() {
            self.connections.remove(connection);
        }
        true
    }

    /// Drop every exchange of a connection, returning them.
    pub fn remove_connection(&mut self, connection: &C) -> Vec<Exchange<C>> {
        self.connections
            .remove(connection)
            .map(|exchanges| exchanges.into_values().collect())
            .unwrap_or_default()
    }

    /// Number of open exchanges across all connections.
    pub fn len(&self) -> usize {
        self.connections.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<C: Connection> Default for ExchangeMap<C> {
    fn default() -> Self {
        Self::new()
    }
}
