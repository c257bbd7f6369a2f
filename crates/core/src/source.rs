//! Observable source collections.
//!
//! `ActiveList` and `ActiveMap` are the mutable collections an engine is
//! built over. Every mutation commits under the source's mutation lock and
//! then notifies subscribers with the corresponding diff event, so observers
//! always see events in the order the source applied them and never before
//! the state they describe exists.
//!
//! A source without a change stream (`FrozenList`) yields engines that
//! compute once and never update.

use crate::event::{ListEvent, MapEvent};
use crate::fault::{Error, Result};
use crate::subscription::{EventCallback, SubscriptionId, SubscriptionManager};
use crate::value::Value;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a source collection, used for cache keys and routing.
pub type SourceId = u64;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh source identity.
pub fn next_source_id() -> SourceId {
    NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Capability interface for ordered sources.
///
/// `subscribe_source` returns None for sources that cannot report changes;
/// an engine over such a source computes its result once and stays static.
pub trait ListSource: Send + Sync {
    /// Stable identity of this source.
    fn source_id(&self) -> SourceId;

    /// Ordered snapshot of the current elements.
    fn snapshot_values(&self) -> Vec<Value>;

    /// Subscribes to the structural-change stream, if the source has one.
    fn subscribe_source(&self, callback: EventCallback<ListEvent>) -> Option<SubscriptionId>;

    /// Releases a subscription returned by `subscribe_source`.
    fn unsubscribe_source(&self, id: SubscriptionId) -> bool;
}

/// Capability interface for keyed sources.
pub trait MapSource: Send + Sync {
    /// Stable identity of this source.
    fn source_id(&self) -> SourceId;

    /// Snapshot of the current entries, in no particular order.
    fn snapshot_entries(&self) -> Vec<(Value, Value)>;

    /// Subscribes to the structural-change stream, if the source has one.
    fn subscribe_source(&self, callback: EventCallback<MapEvent>) -> Option<SubscriptionId>;

    /// Releases a subscription returned by `subscribe_source`.
    fn unsubscribe_source(&self, id: SubscriptionId) -> bool;
}

struct ListInner {
    id: SourceId,
    /// Serializes mutations; held across commit and notification.
    mutation: Mutex<()>,
    state: RwLock<Vec<Value>>,
    subscriptions: Mutex<SubscriptionManager<ListEvent>>,
}

/// A mutable, observable sequence.
#[derive(Clone)]
pub struct ActiveList {
    inner: Arc<ListInner>,
}

impl Default for ActiveList {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    /// Creates a list seeded with the given values.
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(ListInner {
                id: next_source_id(),
                mutation: Mutex::new(()),
                state: RwLock::new(values),
                subscriptions: Mutex::new(SubscriptionManager::new()),
            }),
        }
    }

    /// Stable identity of this list.
    #[inline]
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.state.read().len()
    }

    /// Returns true if the list has no elements.
    pub fn is_empty(&self) -> bool {
        self.inner.state.read().is_empty()
    }

    /// Returns the element at `index`, if present.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.state.read().get(index).cloned()
    }

    /// Ordered snapshot of the current elements.
    pub fn snapshot(&self) -> Vec<Value> {
        self.inner.state.read().clone()
    }

    /// Appends an element.
    pub fn push(&self, value: Value) {
        let _domain = self.inner.mutation.lock();
        let event = {
            let mut state = self.inner.state.write();
            let index = state.len();
            state.push(value.clone());
            ListEvent::Add {
                index,
                items: vec![value],
            }
        };
        self.notify(&event);
    }

    /// Inserts an element at `index`.
    pub fn insert(&self, index: usize, value: Value) -> Result<()> {
        let _domain = self.inner.mutation.lock();
        let event = {
            let mut state = self.inner.state.write();
            if index > state.len() {
                return Err(Error::index_out_of_bounds(index, state.len()));
            }
            state.insert(index, value.clone());
            ListEvent::Add {
                index,
                items: vec![value],
            }
        };
        self.notify(&event);
        Ok(())
    }

    /// Removes and returns the element at `index`.
    pub fn remove(&self, index: usize) -> Result<Value> {
        let _domain = self.inner.mutation.lock();
        let (event, removed) = {
            let mut state = self.inner.state.write();
            if index >= state.len() {
                return Err(Error::index_out_of_bounds(index, state.len()));
            }
            let removed = state.remove(index);
            (
                ListEvent::Remove {
                    index,
                    items: vec![removed.clone()],
                },
                removed,
            )
        };
        self.notify(&event);
        Ok(removed)
    }

    /// Replaces the element at `index`, returning the previous value.
    pub fn replace(&self, index: usize, value: Value) -> Result<Value> {
        let _domain = self.inner.mutation.lock();
        let (event, old) = {
            let mut state = self.inner.state.write();
            let len = state.len();
            match state.get_mut(index) {
                Some(slot) => {
                    let old = std::mem::replace(slot, value.clone());
                    (
                        ListEvent::Replace {
                            index,
                            old: vec![old.clone()],
                            new: vec![value],
                        },
                        old,
                    )
                }
                None => return Err(Error::index_out_of_bounds(index, len)),
            }
        };
        self.notify(&event);
        Ok(old)
    }

    /// Moves the element at `from` so it ends up at `to`.
    pub fn move_item(&self, from: usize, to: usize) -> Result<()> {
        let _domain = self.inner.mutation.lock();
        let event = {
            let mut state = self.inner.state.write();
            let len = state.len();
            if from >= len {
                return Err(Error::index_out_of_bounds(from, len));
            }
            if to >= len {
                return Err(Error::index_out_of_bounds(to, len));
            }
            if from == to {
                return Ok(());
            }
            let value = state.remove(from);
            state.insert(to, value.clone());
            ListEvent::Move {
                from,
                to,
                items: vec![value],
            }
        };
        self.notify(&event);
        Ok(())
    }

    /// Replaces the entire contents, raising a single Reset.
    ///
    /// Used when a precise diff is unavailable; observers re-derive from a
    /// fresh snapshot.
    pub fn reset(&self, values: Vec<Value>) {
        let _domain = self.inner.mutation.lock();
        {
            let mut state = self.inner.state.write();
            *state = values;
        }
        self.notify(&ListEvent::Reset);
    }

    /// Subscribes to structural-change events.
    pub fn subscribe_events(&self, callback: EventCallback<ListEvent>) -> SubscriptionId {
        self.inner.subscriptions.lock().subscribe(callback)
    }

    /// Unsubscribes by ID. Returns true if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscriptions.lock().unsubscribe(id)
    }

    /// Returns the number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    fn notify(&self, event: &ListEvent) {
        let callbacks = self.inner.subscriptions.lock().callbacks();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl ListSource for ActiveList {
    fn source_id(&self) -> SourceId {
        self.id()
    }

    fn snapshot_values(&self) -> Vec<Value> {
        self.snapshot()
    }

    fn subscribe_source(&self, callback: EventCallback<ListEvent>) -> Option<SubscriptionId> {
        Some(self.subscribe_events(callback))
    }

    fn unsubscribe_source(&self, id: SubscriptionId) -> bool {
        self.unsubscribe(id)
    }
}

/// An immutable sequence source with no change stream.
///
/// Engines over a frozen list compute once and never update.
pub struct FrozenList {
    id: SourceId,
    values: Vec<Value>,
}

impl FrozenList {
    /// Creates a frozen list from the given values.
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            id: next_source_id(),
            values,
        }
    }
}

impl ListSource for FrozenList {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn snapshot_values(&self) -> Vec<Value> {
        self.values.clone()
    }

    fn subscribe_source(&self, _callback: EventCallback<ListEvent>) -> Option<SubscriptionId> {
        None
    }

    fn unsubscribe_source(&self, _id: SubscriptionId) -> bool {
        false
    }
}

struct MapInner {
    id: SourceId,
    mutation: Mutex<()>,
    state: RwLock<HashMap<Value, Value>>,
    subscriptions: Mutex<SubscriptionManager<MapEvent>>,
}

/// A mutable, observable key/value map.
#[derive(Clone)]
pub struct ActiveMap {
    inner: Arc<MapInner>,
}

impl Default for ActiveMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::from_entries(Vec::new())
    }

    /// Creates a map seeded with the given entries.
    pub fn from_entries(entries: Vec<(Value, Value)>) -> Self {
        Self {
            inner: Arc::new(MapInner {
                id: next_source_id(),
                mutation: Mutex::new(()),
                state: RwLock::new(entries.into_iter().collect()),
                subscriptions: Mutex::new(SubscriptionManager::new()),
            }),
        }
    }

    /// Stable identity of this map.
    #[inline]
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.state.read().len()
    }

    /// Returns true if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.state.read().is_empty()
    }

    /// Returns the value under `key`, if present.
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.inner.state.read().get(key).cloned()
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &Value) -> bool {
        self.inner.state.read().contains_key(key)
    }

    /// Snapshot of the current entries.
    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        self.inner
            .state
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Inserts or replaces the value under `key`, returning the previous
    /// value if the key was present.
    pub fn insert(&self, key: Value, value: Value) -> Option<Value> {
        let _domain = self.inner.mutation.lock();
        let (event, old) = {
            let mut state = self.inner.state.write();
            match state.insert(key.clone(), value.clone()) {
                Some(old) => (
                    MapEvent::Replace {
                        key,
                        old: old.clone(),
                        new: value,
                    },
                    Some(old),
                ),
                None => (MapEvent::Insert { key, value }, None),
            }
        };
        self.notify(&event);
        old
    }

    /// Removes and returns the value under `key`.
    pub fn remove(&self, key: &Value) -> Result<Value> {
        let _domain = self.inner.mutation.lock();
        let (event, removed) = {
            let mut state = self.inner.state.write();
            match state.remove(key) {
                Some(removed) => (
                    MapEvent::Remove {
                        key: key.clone(),
                        value: removed.clone(),
                    },
                    removed,
                ),
                None => return Err(Error::key_not_found(key.clone())),
            }
        };
        self.notify(&event);
        Ok(removed)
    }

    /// Replaces the entire contents, raising a single Reset.
    pub fn reset(&self, entries: Vec<(Value, Value)>) {
        let _domain = self.inner.mutation.lock();
        {
            let mut state = self.inner.state.write();
            *state = entries.into_iter().collect();
        }
        self.notify(&MapEvent::Reset);
    }

    /// Subscribes to structural-change events.
    pub fn subscribe_events(&self, callback: EventCallback<MapEvent>) -> SubscriptionId {
        self.inner.subscriptions.lock().subscribe(callback)
    }

    /// Unsubscribes by ID. Returns true if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscriptions.lock().unsubscribe(id)
    }

    fn notify(&self, event: &MapEvent) {
        let callbacks = self.inner.subscriptions.lock().callbacks();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl MapSource for ActiveMap {
    fn source_id(&self) -> SourceId {
        self.id()
    }

    fn snapshot_entries(&self) -> Vec<(Value, Value)> {
        self.snapshot()
    }

    fn subscribe_source(&self, callback: EventCallback<MapEvent>) -> Option<SubscriptionId> {
        Some(self.subscribe_events(callback))
    }

    fn unsubscribe_source(&self, id: SubscriptionId) -> bool {
        self.unsubscribe(id)
    }
}
