//! Reference-counted keep-alive table for strings handed into script calls.
//!
//! A native caller that passes a transient string into a script call (for
//! example as a registry key) pins it first. The table holds the
//! script-visible `ImmutableString` for as long as at least one pin is
//! outstanding, independent of what the script side does with its copies.

use std::collections::HashMap;

use rhai::ImmutableString;

use crate::error::{BridgeError, BridgeResult};

/// One record per distinct pinned content.
#[derive(Debug, Clone)]
pub struct PinRecord {
    pub content: ImmutableString,
    pub refcount: u32,
}

#[derive(Debug, Default)]
pub struct PinTable {
    records: HashMap<String, PinRecord>,
}

impl PinTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the pin count for `content`, creating the record at 1.
    ///
    /// Returns the pinned script-visible string; every pin of the same
    /// content returns the same shared value.
    pub fn pin(&mut self, content: &str) -> ImmutableString {
        let record = self
            .records
            .entry(content.to_string())
            .or_insert_with(|| PinRecord { content: ImmutableString::from(content), refcount: 0 });
        record.refcount += 1;
        record.content.clone()
    }

    /// Decrement the pin count, removing the record when it reaches zero.
    ///
    /// Returns the remaining count. Unpinning content that has no record is a
    /// contract violation.
    pub fn unpin(&mut self, content: &str) -> BridgeResult<u32> {
        let record = match self.records.get_mut(content) {
            Some(record) => record,
            None => return Err(BridgeError::UnpinUntracked(content.to_string())),
        };
        record.refcount -= 1;
        let remaining = record.refcount;
        if remaining == 0 {
            self.records.remove(content);
        }
        Ok(remaining)
    }

    /// Current pin count for `content` (0 when untracked).
    pub fn count(&self, content: &str) -> u32 {
        self.records.get(content).map_or(0, |r| r.refcount)
    }

    pub fn is_pinned(&self, content: &str) -> bool {
        self.records.contains_key(content)
    }

    /// The pinned script-visible string, if any.
    pub fn get(&self, content: &str) -> Option<ImmutableString> {
        self.records.get(content).map(|r| r.content.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
