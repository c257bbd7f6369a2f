//! Keyed-projection tracking.
//!
//! Consumes per-occurrence (key, value) results and maintains the visible
//! derived map plus duplicate/null-key fault state. Each occurrence gets a
//! monotonically increasing arrival serial; when the visible entry for a
//! key is removed and duplicates survive, the occurrence with the lowest
//! surviving serial becomes visible. Serials never shift with positions,
//! so the winner rule is deterministic under arbitrary mutation. An
//! occurrence whose key changes re-arrives with a fresh serial.

use hashbrown::HashMap;
use std::collections::{BTreeMap, BTreeSet};
use vigil_core::{Fault, MapEvent, Value};

/// Arrival order of one keyed occurrence.
pub type Serial = u64;

/// Tracker for one maintained map projection.
#[derive(Default)]
pub struct KeyedProjection {
    next_serial: Serial,
    /// Every live occurrence: serial -> (key, value); None key is null.
    occurrences: HashMap<Serial, (Option<Value>, Value)>,
    /// Live occurrences per non-null key, ordered by arrival.
    by_key: HashMap<Value, BTreeMap<Serial, Value>>,
    /// Keys currently carrying more than one occurrence.
    duplicate_keys: BTreeSet<Value>,
    null_serials: BTreeSet<Serial>,
    /// Winner serial per visible key.
    visible: HashMap<Value, Serial>,
}

impl KeyedProjection {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of visible map entries.
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    /// Returns true if the visible map is empty.
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Occurrences with a null key.
    pub fn null_count(&self) -> usize {
        self.null_serials.len()
    }

    /// Occurrences beyond the first for their key, summed over keys.
    pub fn duplicate_count(&self) -> usize {
        self.duplicate_keys
            .iter()
            .map(|key| self.by_key[key].len() - 1)
            .sum()
    }

    /// The currently visible value under `key`.
    pub fn get(&self, key: &Value) -> Option<Value> {
        let serial = self.visible.get(key)?;
        self.by_key.get(key)?.get(serial).cloned()
    }

    /// Snapshot of the visible map.
    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        self.visible
            .iter()
            .filter_map(|(key, serial)| {
                self.by_key
                    .get(key)
                    .and_then(|entries| entries.get(serial))
                    .map(|value| (key.clone(), value.clone()))
            })
            .collect()
    }

    /// Registers a new occurrence; returns its serial and the visible-map
    /// event, if the occurrence became visible.
    ///
    /// A duplicate key never overwrites the visible entry; a null key only
    /// raises the null count.
    pub fn insert(&mut self, key: Option<Value>, value: Value) -> (Serial, Option<MapEvent>) {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.occurrences
            .insert(serial, (key.clone(), value.clone()));

        let key = match key {
            None => {
                self.null_serials.insert(serial);
                return (serial, None);
            }
            Some(key) => key,
        };

        let entries = self.by_key.entry(key.clone()).or_default();
        entries.insert(serial, value.clone());
        if entries.len() == 1 {
            self.visible.insert(key.clone(), serial);
            (serial, Some(MapEvent::Insert { key, value }))
        } else {
            self.duplicate_keys.insert(key);
            (serial, None)
        }
    }

    /// Removes one occurrence by serial; returns the visible-map event, if
    /// the visible entry changed.
    pub fn remove(&mut self, serial: Serial) -> Option<MapEvent> {
        let (key, value) = match self.occurrences.remove(&serial) {
            Some(occurrence) => occurrence,
            None => panic!(
                "structural violation: removal of untracked keyed occurrence {}",
                serial
            ),
        };

        let key = match key {
            None => {
                self.null_serials.remove(&serial);
                return None;
            }
            Some(key) => key,
        };

        let entries = match self.by_key.get_mut(&key) {
            Some(entries) => entries,
            None => panic!(
                "structural violation: occurrence {} names untracked key {}",
                serial, key
            ),
        };
        entries.remove(&serial);

        if entries.is_empty() {
            self.by_key.remove(&key);
            self.duplicate_keys.remove(&key);
            self.visible.remove(&key);
            return Some(MapEvent::Remove { key, value });
        }
        if entries.len() == 1 {
            self.duplicate_keys.remove(&key);
        }

        if self.visible.get(&key) == Some(&serial) {
            // Lowest surviving arrival becomes visible.
            let (&winner, winner_value) = self.by_key[&key]
                .first_key_value()
                .unwrap_or_else(|| panic!("structural violation: empty occurrence set for {}", key));
            let winner_value = winner_value.clone();
            self.visible.insert(key.clone(), winner);
            if winner_value == value {
                return None;
            }
            return Some(MapEvent::Replace {
                key,
                old: value,
                new: winner_value,
            });
        }
        None
    }

    /// The tracker's fault flag.
    ///
    /// Null-key takes display priority when both conditions hold; the
    /// duplicate fault names the smallest colliding key so the report is
    /// deterministic.
    pub fn current_fault(&self) -> Option<Fault> {
        if !self.null_serials.is_empty() {
            return Some(Fault::NullKey);
        }
        self.duplicate_keys
            .iter()
            .next()
            .map(|key| Fault::DuplicateKey(key.clone()))
    }

    /// One fault entry per colliding key plus one for null keys.
    pub fn faults(&self) -> Vec<(Option<Value>, Fault)> {
        let mut faults: Vec<(Option<Value>, Fault)> = self
            .duplicate_keys
            .iter()
            .map(|key| (Some(key.clone()), Fault::DuplicateKey(key.clone())))
            .collect();
        if !self.null_serials.is_empty() {
            faults.push((None, Fault::NullKey));
        }
        faults
    }

    /// Drops all tracked occurrences.
    pub fn clear(&mut self) {
        self.occurrences.clear();
        self.by_key.clear();
        self.duplicate_keys.clear();
        self.null_serials.clear();
        self.visible.clear();
    }
}
