//! Named value slots shared between native and script code.
//!
//! Native code publishes callables or objects under a string key and script
//! code fetches them by name (and vice versa), so a slot can be filled by one
//! module and consumed by another that loads later. Last write wins.

use std::collections::HashMap;

use rhai::Dynamic;

#[derive(Debug, Default)]
pub struct ExternalBroker {
    slots: HashMap<String, Dynamic>,
}

impl ExternalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning the previous occupant.
    pub fn set(&mut self, key: &str, value: Dynamic) -> Option<Dynamic> {
        self.slots.insert(key.to_string(), value)
    }

    pub fn get(&self, key: &str) -> Option<Dynamic> {
        self.slots.get(key).cloned()
    }

    /// Remove the slot. Returns whether it existed.
    pub fn unset(&mut self, key: &str) -> bool {
        self.slots.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every slot, handing the values back so the caller can release them.
    pub fn drain(&mut self) -> Vec<(String, Dynamic)> {
        self.slots.drain().collect()
    }
}
