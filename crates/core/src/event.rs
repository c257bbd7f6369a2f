//! Structural diff events.
//!
//! A diff event describes one structural change to an ordered or keyed
//! collection. Sources raise events in their own index/key space; every
//! derived component re-raises them translated into its result space.
//!
//! Applying an event whose indices or keys disagree with the collection it
//! is applied to is a programming-invariant failure, not a user error, and
//! panics with a description of the inconsistency.

use crate::value::Value;
use hashbrown::HashMap;

/// A structural change to an ordered collection, in that collection's own
/// index space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListEvent {
    /// Items inserted starting at `index`.
    Add { index: usize, items: Vec<Value> },
    /// Items removed starting at `index`.
    Remove { index: usize, items: Vec<Value> },
    /// Items replaced in place starting at `index`. `old` and `new` may
    /// differ in length (flatten pipelines replace whole spans).
    Replace {
        index: usize,
        old: Vec<Value>,
        new: Vec<Value>,
    },
    /// A contiguous span moved from `from` to `to`. `to` is the span's
    /// start index after removal of the old span.
    Move {
        from: usize,
        to: usize,
        items: Vec<Value>,
    },
    /// The collection must be re-derived from a fresh snapshot.
    Reset,
}

impl ListEvent {
    /// Net change in collection length caused by this event.
    pub fn len_delta(&self) -> isize {
        match self {
            ListEvent::Add { items, .. } => items.len() as isize,
            ListEvent::Remove { items, .. } => -(items.len() as isize),
            ListEvent::Replace { old, new, .. } => new.len() as isize - old.len() as isize,
            ListEvent::Move { .. } | ListEvent::Reset => 0,
        }
    }

    /// Returns true for events that change membership rather than order.
    pub fn changes_membership(&self) -> bool {
        !matches!(self, ListEvent::Move { .. })
    }

    /// Applies this event to a plain vector mirror of the collection.
    ///
    /// Panics if the event is inconsistent with the vector's current shape;
    /// such an inconsistency means tracked state has diverged from the
    /// source and continuing would corrupt every downstream result.
    pub fn apply_to(&self, target: &mut Vec<Value>) {
        match self {
            ListEvent::Add { index, items } => {
                assert!(
                    *index <= target.len(),
                    "structural violation: add at index {} in collection of length {}",
                    index,
                    target.len()
                );
                target.splice(*index..*index, items.iter().cloned());
            }
            ListEvent::Remove { index, items } => {
                let end = index + items.len();
                assert!(
                    end <= target.len(),
                    "structural violation: remove of {} items at index {} in collection of length {}",
                    items.len(),
                    index,
                    target.len()
                );
                target.drain(*index..end);
            }
            ListEvent::Replace { index, old, new } => {
                let end = index + old.len();
                assert!(
                    end <= target.len(),
                    "structural violation: replace of {} items at index {} in collection of length {}",
                    old.len(),
                    index,
                    target.len()
                );
                target.splice(*index..end, new.iter().cloned());
            }
            ListEvent::Move { from, to, items } => {
                let end = from + items.len();
                assert!(
                    end <= target.len(),
                    "structural violation: move of {} items from index {} in collection of length {}",
                    items.len(),
                    from,
                    target.len()
                );
                let moved: Vec<Value> = target.drain(*from..end).collect();
                assert!(
                    *to <= target.len(),
                    "structural violation: move destination {} in collection of length {}",
                    to,
                    target.len()
                );
                target.splice(*to..*to, moved);
            }
            ListEvent::Reset => target.clear(),
        }
    }
}

/// A structural change to a keyed collection, in key space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MapEvent {
    /// A key became present.
    Insert { key: Value, value: Value },
    /// A key was removed.
    Remove { key: Value, value: Value },
    /// An existing key's value changed.
    Replace {
        key: Value,
        old: Value,
        new: Value,
    },
    /// The map must be re-derived from a fresh snapshot.
    Reset,
}

impl MapEvent {
    /// Applies this event to a plain map mirror of the collection.
    ///
    /// Panics on a key inconsistent with the map's current contents, for
    /// the same reason `ListEvent::apply_to` does.
    pub fn apply_to(&self, target: &mut HashMap<Value, Value>) {
        match self {
            MapEvent::Insert { key, value } => {
                let previous = target.insert(key.clone(), value.clone());
                assert!(
                    previous.is_none(),
                    "structural violation: insert of key {} which is already present",
                    key
                );
            }
            MapEvent::Remove { key, .. } => {
                assert!(
                    target.remove(key).is_some(),
                    "structural violation: remove of absent key {}",
                    key
                );
            }
            MapEvent::Replace { key, new, .. } => {
                match target.get_mut(key) {
                    Some(slot) => *slot = new.clone(),
                    None => panic!("structural violation: replace of absent key {}", key),
                }
            }
            MapEvent::Reset => target.clear(),
        }
    }
}
