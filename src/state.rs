//! Per-module-instance mutable state: the variable store and the query
//! answer cache.
//!
//! A single flat `HashMap`-backed scope rather than a lexically nested
//! environment: state and the query cache live per engine instance, with no
//! parent-chain lookup to support.

use std::collections::HashMap;

use crate::value::SimpleValue;

/// `state: map<name -> SimpleValue>` and `query_cache: map<call_key ->
/// SimpleValue>`.
#[derive(Clone, Debug, Default)]
pub struct EngineState {
    variables: HashMap<String, SimpleValue>,
    query_cache: HashMap<String, SimpleValue>,
}

impl EngineState {
    pub fn new() -> Self {
        EngineState::default()
    }

    pub fn get(&self, name: &str) -> Option<&SimpleValue> {
        self.variables.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: SimpleValue) {
        self.variables.insert(name.into(), value);
    }

    /// Seeds a declaration: imported declarations never overwrite an
    /// existing value; fresh declarations initialize only if absent.
    pub fn seed_declaration(&mut self, name: &str, initial: &SimpleValue) {
        self.variables
            .entry(name.to_string())
            .or_insert_with(|| initial.clone());
    }

    pub fn cached_answer(&self, call_key: &str) -> Option<&SimpleValue> {
        self.query_cache.get(call_key)
    }

    /// Caches a query answer, or erases it if `value` is `None` — a null
    /// answer clears any cached value for that call key.
    pub fn cache_answer(&mut self, call_key: String, value: Option<SimpleValue>) {
        match value {
            Some(v) => {
                self.query_cache.insert(call_key, v);
            }
            None => {
                self.query_cache.remove(&call_key);
            }
        }
    }
}
