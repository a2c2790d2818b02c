//! String interning for the wire codec.
//!
//! Strings below the inline threshold travel as `u16` table indices instead
//! of repeated bytes. The table is append-only for the channel's lifetime:
//! an index, once issued, stays valid, so the receiving side caches every
//! delivered table cumulatively.

use std::collections::HashMap;

use crate::error::{Result, TreewireError};

/// Producer-side interning table.
///
/// `intern` returns an existing index when the string was already seen,
/// otherwise appends. `drain` snapshots the full table for the flush; it
/// never clears, so indices remain stable across flushes.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, u16>,
}

impl StringTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its stable table index.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the table would exceed the u16 index space.
    pub fn intern(&mut self, s: &str) -> Result<u16> {
        if let Some(&idx) = self.index.get(s) {
            return Ok(idx);
        }
        if self.strings.len() >= u16::MAX as usize {
            return Err(TreewireError::Protocol(
                "string table exhausted (65535 entries)".to_string(),
            ));
        }
        let idx = self.strings.len() as u16;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        Ok(idx)
    }

    /// Snapshot the full table for inclusion in a flush envelope.
    ///
    /// The table is not cleared; the receiver replaces its cache with each
    /// delivered (cumulative) snapshot.
    pub fn drain(&self) -> Vec<String> {
        self.strings.clone()
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Receiver-side cumulative cache of delivered string tables.
#[derive(Debug, Default)]
pub struct StringCache {
    strings: Vec<String>,
}

impl StringCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a delivered table snapshot.
    ///
    /// Each delivery is a superset of the previous one (the sender's table
    /// is append-only), so a shorter delivery is stale and ignored.
    pub fn absorb(&mut self, strings: Vec<String>) {
        if strings.len() >= self.strings.len() {
            self.strings = strings;
        }
    }

    /// Resolve a table index.
    ///
    /// # Errors
    ///
    /// Returns `Decode` when the index was never delivered.
    pub fn get(&self, index: u16) -> Result<&str> {
        self.strings
            .get(index as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| TreewireError::Decode(format!("unknown string index {}", index)))
    }

    /// Number of cached strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
