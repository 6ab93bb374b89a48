//! Per-node persistent storage for sandboxed node bodies.
//!
//! Slot identifiers are local to a node: node A's slot 1 and node B's slot 1
//! are independent. Scalars are stored immediately; series and strings are
//! staged against their transient handle and copied out of the arena by the
//! flush, so the persistent slot survives while the handle dies.

use std::collections::HashMap;

use arc_types::telem::{SampleValue, Series};

use crate::wasm::arena::Arena;

type SlotKey = (String, u32);

#[derive(Debug, Default)]
pub struct PersistentStore {
    scalars: HashMap<SlotKey, SampleValue>,
    series: HashMap<SlotKey, Series>,
    strings: HashMap<SlotKey, String>,
    pending_series: HashMap<SlotKey, u32>,
    pending_strings: HashMap<SlotKey, u32>,
}

impl PersistentStore {
    pub fn store_scalar(&mut self, node: &str, slot: u32, value: SampleValue) {
        self.scalars.insert((node.to_string(), slot), value);
    }

    pub fn scalar(&self, node: &str, slot: u32) -> Option<&SampleValue> {
        self.scalars.get(&(node.to_string(), slot))
    }

    /// Stages a transient series handle for promotion at the next flush.
    pub fn stage_series(&mut self, node: &str, slot: u32, handle: u32) {
        self.pending_series.insert((node.to_string(), slot), handle);
    }

    /// The handle staged for `slot` this tick, if any.
    pub fn staged_series(&self, node: &str, slot: u32) -> Option<u32> {
        self.pending_series.get(&(node.to_string(), slot)).copied()
    }

    pub fn series(&self, node: &str, slot: u32) -> Option<&Series> {
        self.series.get(&(node.to_string(), slot))
    }

    pub fn stage_string(&mut self, node: &str, slot: u32, handle: u32) {
        self.pending_strings.insert((node.to_string(), slot), handle);
    }

    pub fn staged_string(&self, node: &str, slot: u32) -> Option<u32> {
        self.pending_strings
            .get(&(node.to_string(), slot))
            .copied()
    }

    pub fn string(&self, node: &str, slot: u32) -> Option<&str> {
        self.strings
            .get(&(node.to_string(), slot))
            .map(String::as_str)
    }

    /// Copies every staged series and string out of the arena into the
    /// persistent maps. Called by the flush immediately before the arena
    /// resets; handles staged against since-invalidated entries are dropped.
    pub fn promote(&mut self, arena: &Arena) {
        for (key, handle) in self.pending_series.drain() {
            if let Some(series) = arena.series(handle) {
                self.series.insert(key, series.deep_copy());
            }
        }
        for (key, handle) in self.pending_strings.drain() {
            if let Some(value) = arena.string(handle) {
                self.strings.insert(key, value.to_string());
            }
        }
    }
}
