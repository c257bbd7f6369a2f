//! Watched-computation pools.
//!
//! A pool owns one tracked computation per distinct source element and maps
//! each source position (or key) onto it. Two positions holding equal
//! elements resolve to the *same* computation; the reference count, not
//! object identity, distinguishes occurrences. A computation's watch
//! subscription is released exactly once, when its reference count returns
//! to zero.
//!
//! Between any two observed events the pool's shape exactly mirrors the
//! source's shape. A source event that disagrees with tracked state (wrong
//! index, wrong element, absent key) is a programming-invariant failure and
//! panics; no such branch is ignored.

use hashbrown::HashMap;
use std::sync::Arc;
use tracing::trace;
use vigil_core::{Fault, ListEvent, MapEvent, Value};
use vigil_expr::{EvalOptions, Expr, Watch, WatchFactory, WatchGuard};

/// Stable identifier of a tracked computation within its pool.
pub type CompId = usize;

/// Callback the pool registers on every watch; receives the computation id
/// whose value or fault changed.
pub type WatchSink = Arc<dyn Fn(CompId) + Send + Sync>;

/// The externally visible result of one tracked computation: a value or a
/// fault, never both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompOutput {
    pub value: Option<Value>,
    pub fault: Option<Fault>,
}

impl CompOutput {
    fn from_watch(watch: &dyn Watch) -> Self {
        let fault = watch.current_fault();
        let value = if fault.is_some() {
            None
        } else {
            watch.current_value()
        };
        Self { value, fault }
    }

    /// Returns true if the computation is currently faulted.
    #[inline]
    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }
}

/// One position's worth of pool diff data.
#[derive(Clone, Debug)]
pub struct PoolEntry {
    pub comp: CompId,
    pub element: Value,
    pub output: CompOutput,
}

/// A source structural event expressed in tracked-computation units.
#[derive(Clone, Debug)]
pub enum PoolEvent {
    Added { index: usize, entries: Vec<PoolEntry> },
    Removed { index: usize, entries: Vec<PoolEntry> },
    Replaced {
        index: usize,
        old: Vec<PoolEntry>,
        new: Vec<PoolEntry>,
    },
    Moved {
        from: usize,
        to: usize,
        entries: Vec<PoolEntry>,
    },
    Reset,
}

struct TrackedComputation {
    element: Value,
    watch: Arc<dyn Watch>,
    /// Releases the watch subscription when the computation is destroyed.
    _guard: WatchGuard,
    output: CompOutput,
    refs: usize,
}

/// Arena of tracked computations shared by the sequence and map pools.
///
/// Positions hold ids, not owned computations, so shared computations have
/// no owner cycle and destruction happens exactly at refcount zero.
pub struct ComputationArena {
    expr: Expr,
    options: EvalOptions,
    factory: Arc<dyn WatchFactory>,
    sink: WatchSink,
    slots: Vec<Option<TrackedComputation>>,
    free: Vec<CompId>,
    by_element: HashMap<Value, CompId>,
    /// Occurrences (not computations) currently faulted; kept incrementally
    /// so aggregate fault gating stays O(1).
    faulted_occurrences: usize,
}

impl ComputationArena {
    fn new(
        expr: Expr,
        options: EvalOptions,
        factory: Arc<dyn WatchFactory>,
        sink: WatchSink,
    ) -> Self {
        Self {
            expr,
            options,
            factory,
            sink,
            slots: Vec::new(),
            free: Vec::new(),
            by_element: HashMap::new(),
            faulted_occurrences: 0,
        }
    }

    fn acquire(&mut self, element: &Value) -> CompId {
        if let Some(&comp) = self.by_element.get(element) {
            let faulted = {
                let tracked = self.tracked_mut(comp);
                tracked.refs += 1;
                tracked.output.is_faulted()
            };
            if faulted {
                self.faulted_occurrences += 1;
            }
            return comp;
        }

        let comp = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        let watch = self.factory.create(&self.expr, element, &self.options);
        let sink = self.sink.clone();
        let sub = watch.subscribe(Arc::new(move || sink(comp)));
        let guard = WatchGuard::new(watch.clone(), sub);
        let output = CompOutput::from_watch(watch.as_ref());

        if output.is_faulted() {
            self.faulted_occurrences += 1;
        }
        trace!(comp, element = %element, "tracked computation created");

        self.slots[comp] = Some(TrackedComputation {
            element: element.clone(),
            watch,
            _guard: guard,
            output,
            refs: 1,
        });
        self.by_element.insert(element.clone(), comp);
        comp
    }

    fn release(&mut self, comp: CompId) {
        let (destroy, faulted) = {
            let tracked = self.tracked_mut(comp);
            tracked.refs -= 1;
            (tracked.refs == 0, tracked.output.is_faulted())
        };
        if faulted {
            self.faulted_occurrences -= 1;
        }
        if destroy {
            if let Some(tracked) = self.slots[comp].take() {
                self.by_element.remove(&tracked.element);
                self.free.push(comp);
                trace!(comp, element = %tracked.element, "tracked computation destroyed");
                // Dropping `tracked` releases the watch subscription via its guard.
            }
        }
    }

    /// Re-reads the watch behind `comp` after a change notification.
    ///
    /// Returns the (old, new) outputs when something actually changed, None
    /// for stale notifications on destroyed computations or no-op changes.
    fn refresh(&mut self, comp: CompId) -> Option<(CompOutput, CompOutput)> {
        let tracked = match self.slots.get_mut(comp).and_then(Option::as_mut) {
            Some(tracked) => tracked,
            None => return None,
        };
        let new = CompOutput::from_watch(tracked.watch.as_ref());
        if new == tracked.output {
            return None;
        }
        let old = std::mem::replace(&mut tracked.output, new.clone());
        if old.is_faulted() != new.is_faulted() {
            if new.is_faulted() {
                self.faulted_occurrences += tracked.refs;
            } else {
                self.faulted_occurrences -= tracked.refs;
            }
        }
        Some((old, new))
    }

    fn tracked(&self, comp: CompId) -> &TrackedComputation {
        self.slots
            .get(comp)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("structural violation: access to dead computation {}", comp))
    }

    fn tracked_mut(&mut self, comp: CompId) -> &mut TrackedComputation {
        self.slots
            .get_mut(comp)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("structural violation: access to dead computation {}", comp))
    }

    fn entry(&self, comp: CompId) -> PoolEntry {
        let tracked = self.tracked(comp);
        PoolEntry {
            comp,
            element: tracked.element.clone(),
            output: tracked.output.clone(),
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_element.clear();
        self.faulted_occurrences = 0;
    }

    fn live_count(&self) -> usize {
        self.by_element.len()
    }
}

/// Pool over an ordered source: an order vector of computation ids that
/// always mirrors the source's current order, plus the shared arena.
pub struct SequencePool {
    arena: ComputationArena,
    order: Vec<CompId>,
}

impl SequencePool {
    /// Creates a pool seeded with one tracked computation per element of
    /// the snapshot.
    pub fn new(
        expr: Expr,
        options: EvalOptions,
        factory: Arc<dyn WatchFactory>,
        sink: WatchSink,
        snapshot: &[Value],
    ) -> Self {
        let mut pool = Self {
            arena: ComputationArena::new(expr, options, factory, sink),
            order: Vec::with_capacity(snapshot.len()),
        };
        for element in snapshot {
            let comp = pool.arena.acquire(element);
            pool.order.push(comp);
        }
        pool
    }

    /// Number of source positions tracked.
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the pool tracks no positions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of distinct live computations.
    #[inline]
    pub fn shared_count(&self) -> usize {
        self.arena.live_count()
    }

    /// Occurrences currently faulted.
    #[inline]
    pub fn faulted_occurrences(&self) -> usize {
        self.arena.faulted_occurrences
    }

    /// Reference count of one computation.
    pub fn refs(&self, comp: CompId) -> usize {
        self.arena.tracked(comp).refs
    }

    /// The computation id at a source position.
    pub fn comp_at(&self, position: usize) -> CompId {
        self.order[position]
    }

    /// Pool entry (element + output) at a source position.
    pub fn entry_at(&self, position: usize) -> PoolEntry {
        self.arena.entry(self.order[position])
    }

    /// All positions currently mapped to `comp`, ascending.
    pub fn positions_of(&self, comp: CompId) -> Vec<usize> {
        self.order
            .iter()
            .enumerate()
            .filter(|(_, &id)| id == comp)
            .map(|(position, _)| position)
            .collect()
    }

    /// One fault per faulted position, ascending by position.
    pub fn faults(&self) -> Vec<(usize, Fault)> {
        self.order
            .iter()
            .enumerate()
            .filter_map(|(position, &comp)| {
                self.arena
                    .tracked(comp)
                    .output
                    .fault
                    .clone()
                    .map(|fault| (position, fault))
            })
            .collect()
    }

    /// The first fault among live occurrences, by position.
    pub fn first_fault(&self) -> Option<Fault> {
        self.order
            .iter()
            .find_map(|&comp| self.arena.tracked(comp).output.fault.clone())
    }

    /// Updates the pool to match a source event and returns the event in
    /// tracked-computation units.
    pub fn apply_source_event(&mut self, event: &ListEvent) -> PoolEvent {
        match event {
            ListEvent::Add { index, items } => {
                assert!(
                    *index <= self.order.len(),
                    "structural violation: source add at index {} with {} tracked positions",
                    index,
                    self.order.len()
                );
                let mut entries = Vec::with_capacity(items.len());
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    let comp = self.arena.acquire(item);
                    ids.push(comp);
                    entries.push(self.arena.entry(comp));
                }
                self.order.splice(*index..*index, ids);
                PoolEvent::Added {
                    index: *index,
                    entries,
                }
            }
            ListEvent::Remove { index, items } => {
                self.check_span(*index, items, "remove");
                let mut entries = Vec::with_capacity(items.len());
                for comp in self.order.drain(*index..index + items.len()) {
                    entries.push(self.arena.entry(comp));
                    self.arena.release(comp);
                }
                PoolEvent::Removed {
                    index: *index,
                    entries,
                }
            }
            ListEvent::Replace { index, old, new } => {
                self.check_span(*index, old, "replace");
                let mut old_entries = Vec::with_capacity(old.len());
                for comp in self.order.drain(*index..index + old.len()) {
                    old_entries.push(self.arena.entry(comp));
                    self.arena.release(comp);
                }
                let mut new_entries = Vec::with_capacity(new.len());
                let mut ids = Vec::with_capacity(new.len());
                for item in new {
                    let comp = self.arena.acquire(item);
                    ids.push(comp);
                    new_entries.push(self.arena.entry(comp));
                }
                self.order.splice(*index..*index, ids);
                PoolEvent::Replaced {
                    index: *index,
                    old: old_entries,
                    new: new_entries,
                }
            }
            ListEvent::Move { from, to, items } => {
                self.check_span(*from, items, "move");
                // Spliced in place: identity and reference counts untouched.
                let moved: Vec<CompId> = self.order.drain(*from..from + items.len()).collect();
                assert!(
                    *to <= self.order.len(),
                    "structural violation: source move destination {} with {} tracked positions",
                    to,
                    self.order.len()
                );
                let entries = moved.iter().map(|&comp| self.arena.entry(comp)).collect();
                self.order.splice(*to..*to, moved);
                PoolEvent::Moved {
                    from: *from,
                    to: *to,
                    entries,
                }
            }
            ListEvent::Reset => {
                panic!("structural violation: Reset must be applied through SequencePool::reset with a fresh snapshot")
            }
        }
    }

    /// Discards and rebuilds the entire pool from a fresh source snapshot.
    pub fn reset(&mut self, snapshot: &[Value]) -> PoolEvent {
        trace!(len = snapshot.len(), "pool reset");
        self.order.clear();
        self.arena.clear();
        for element in snapshot {
            let comp = self.arena.acquire(element);
            self.order.push(comp);
        }
        PoolEvent::Reset
    }

    /// Handles a watch change notification for `comp`.
    ///
    /// Returns the old/new outputs and the affected positions, or None for
    /// stale or no-op notifications.
    pub fn apply_watch_change(&mut self, comp: CompId) -> Option<WatchChange> {
        let (old, new) = self.arena.refresh(comp)?;
        let positions = self.positions_of(comp);
        if positions.is_empty() {
            return None;
        }
        Some(WatchChange {
            comp,
            positions,
            old,
            new,
        })
    }

    /// Live outputs in source order; the full-rescan input for extremum
    /// recovery.
    pub fn live_values(&self) -> impl Iterator<Item = Value> + '_ {
        self.order
            .iter()
            .filter_map(|&comp| self.arena.tracked(comp).output.value.clone())
    }

    /// (element, output) pairs in source order.
    pub fn entries(&self) -> impl Iterator<Item = PoolEntry> + '_ {
        self.order.iter().map(|&comp| self.arena.entry(comp))
    }

    /// Releases every tracked computation exactly once per occurrence.
    pub fn dispose(&mut self) {
        self.order.clear();
        self.arena.clear();
    }

    fn check_span(&self, index: usize, items: &[Value], what: &str) {
        assert!(
            index + items.len() <= self.order.len(),
            "structural violation: source {} of {} items at index {} with {} tracked positions",
            what,
            items.len(),
            index,
            self.order.len()
        );
        for (offset, item) in items.iter().enumerate() {
            let comp = self.order[index + offset];
            let element = &self.arena.tracked(comp).element;
            assert!(
                element == item,
                "structural violation: source {} at index {} names {} but pool tracks {}",
                what,
                index + offset,
                item,
                element
            );
        }
    }
}

/// Outcome of a watch change on a sequence pool.
#[derive(Clone, Debug)]
pub struct WatchChange {
    pub comp: CompId,
    /// Every source position sharing the computation, ascending.
    pub positions: Vec<usize>,
    pub old: CompOutput,
    pub new: CompOutput,
}

/// A map-source structural event in tracked-computation units.
#[derive(Clone, Debug)]
pub enum MapPoolEvent {
    Inserted { key: Value, entry: PoolEntry },
    Removed { key: Value, entry: PoolEntry },
    Replaced {
        key: Value,
        old: PoolEntry,
        new: PoolEntry,
    },
    Reset,
}

/// Outcome of a watch change on a map pool.
#[derive(Clone, Debug)]
pub struct MapWatchChange {
    pub comp: CompId,
    /// Every source key sharing the computation.
    pub keys: Vec<Value>,
    pub old: CompOutput,
    pub new: CompOutput,
}

/// Pool over a keyed source: a map from source key to computation id.
pub struct MapPool {
    arena: ComputationArena,
    entries: HashMap<Value, CompId>,
}

impl MapPool {
    /// Creates a pool seeded from a snapshot of (key, value) entries.
    pub fn new(
        expr: Expr,
        options: EvalOptions,
        factory: Arc<dyn WatchFactory>,
        sink: WatchSink,
        snapshot: &[(Value, Value)],
    ) -> Self {
        let mut pool = Self {
            arena: ComputationArena::new(expr, options, factory, sink),
            entries: HashMap::new(),
        };
        for (key, value) in snapshot {
            let comp = pool.arena.acquire(value);
            pool.entries.insert(key.clone(), comp);
        }
        pool
    }

    /// Number of keys tracked.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the pool tracks no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Occurrences currently faulted.
    #[inline]
    pub fn faulted_occurrences(&self) -> usize {
        self.arena.faulted_occurrences
    }

    /// Pool entry for one key.
    pub fn entry_for(&self, key: &Value) -> Option<PoolEntry> {
        self.entries.get(key).map(|&comp| self.arena.entry(comp))
    }

    /// (key, entry) pairs in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = (Value, PoolEntry)> + '_ {
        self.entries
            .iter()
            .map(|(key, &comp)| (key.clone(), self.arena.entry(comp)))
    }

    /// One fault per faulted key.
    pub fn faults(&self) -> Vec<(Value, Fault)> {
        self.entries
            .iter()
            .filter_map(|(key, &comp)| {
                self.arena
                    .tracked(comp)
                    .output
                    .fault
                    .clone()
                    .map(|fault| (key.clone(), fault))
            })
            .collect()
    }

    /// Updates the pool to match a source event.
    pub fn apply_source_event(&mut self, event: &MapEvent) -> MapPoolEvent {
        match event {
            MapEvent::Insert { key, value } => {
                assert!(
                    !self.entries.contains_key(key),
                    "structural violation: source insert of key {} already tracked",
                    key
                );
                let comp = self.arena.acquire(value);
                self.entries.insert(key.clone(), comp);
                MapPoolEvent::Inserted {
                    key: key.clone(),
                    entry: self.arena.entry(comp),
                }
            }
            MapEvent::Remove { key, value } => {
                let comp = match self.entries.remove(key) {
                    Some(comp) => comp,
                    None => panic!(
                        "structural violation: source remove of untracked key {}",
                        key
                    ),
                };
                let element = &self.arena.tracked(comp).element;
                assert!(
                    element == value,
                    "structural violation: source remove of key {} names {} but pool tracks {}",
                    key,
                    value,
                    element
                );
                let entry = self.arena.entry(comp);
                self.arena.release(comp);
                MapPoolEvent::Removed {
                    key: key.clone(),
                    entry,
                }
            }
            MapEvent::Replace { key, old, new } => {
                let comp = match self.entries.get(key).copied() {
                    Some(comp) => comp,
                    None => panic!(
                        "structural violation: source replace of untracked key {}",
                        key
                    ),
                };
                let element = &self.arena.tracked(comp).element;
                assert!(
                    element == old,
                    "structural violation: source replace of key {} names {} but pool tracks {}",
                    key,
                    old,
                    element
                );
                let old_entry = self.arena.entry(comp);
                self.arena.release(comp);
                let new_comp = self.arena.acquire(new);
                self.entries.insert(key.clone(), new_comp);
                MapPoolEvent::Replaced {
                    key: key.clone(),
                    old: old_entry,
                    new: self.arena.entry(new_comp),
                }
            }
            MapEvent::Reset => {
                panic!("structural violation: Reset must be applied through MapPool::reset with a fresh snapshot")
            }
        }
    }

    /// Discards and rebuilds the pool from a fresh snapshot.
    pub fn reset(&mut self, snapshot: &[(Value, Value)]) -> MapPoolEvent {
        trace!(len = snapshot.len(), "map pool reset");
        self.entries.clear();
        self.arena.clear();
        for (key, value) in snapshot {
            let comp = self.arena.acquire(value);
            self.entries.insert(key.clone(), comp);
        }
        MapPoolEvent::Reset
    }

    /// Handles a watch change notification for `comp`.
    pub fn apply_watch_change(&mut self, comp: CompId) -> Option<MapWatchChange> {
        let (old, new) = self.arena.refresh(comp)?;
        let keys: Vec<Value> = self
            .entries
            .iter()
            .filter(|(_, &id)| id == comp)
            .map(|(key, _)| key.clone())
            .collect();
        if keys.is_empty() {
            return None;
        }
        Some(MapWatchChange {
            comp,
            keys,
            old,
            new,
        })
    }

    /// Releases every tracked computation exactly once per key.
    pub fn dispose(&mut self) {
        self.entries.clear();
        self.arena.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_expr::{EvalWatchFactory, ManualWatchFactory};

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int64(*v)).collect()
    }

    fn null_sink() -> WatchSink {
        Arc::new(|_| {})
    }

    fn identity_pool(snapshot: &[Value]) -> SequencePool {
        SequencePool::new(
            Expr::Input,
            EvalOptions::new(),
            Arc::new(EvalWatchFactory),
            null_sink(),
            snapshot,
        )
    }

    #[test]
    fn test_seeding_mirrors_snapshot() {
        let pool = identity_pool(&ints(&[1, 2, 3]));
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.shared_count(), 3);
        assert_eq!(pool.entry_at(1).output.value, Some(Value::Int64(2)));
    }

    #[test]
    fn test_equal_elements_share_one_computation() {
        let pool = identity_pool(&ints(&[7, 7, 7]));
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.shared_count(), 1);
        assert_eq!(pool.refs(pool.comp_at(0)), 3);
        assert_eq!(pool.comp_at(0), pool.comp_at(2));
    }

    #[test]
    fn test_add_and_remove_adjust_refcounts() {
        let mut pool = identity_pool(&ints(&[7]));
        pool.apply_source_event(&ListEvent::Add {
            index: 1,
            items: ints(&[7]),
        });
        assert_eq!(pool.refs(pool.comp_at(0)), 2);
        assert_eq!(pool.shared_count(), 1);

        pool.apply_source_event(&ListEvent::Remove {
            index: 0,
            items: ints(&[7]),
        });
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.refs(pool.comp_at(0)), 1);

        pool.apply_source_event(&ListEvent::Remove {
            index: 0,
            items: ints(&[7]),
        });
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.shared_count(), 0);
    }

    #[test]
    fn test_move_preserves_identity_and_refs() {
        let mut pool = identity_pool(&ints(&[1, 2, 2]));
        let moved = pool.comp_at(2);

        pool.apply_source_event(&ListEvent::Move {
            from: 2,
            to: 0,
            items: ints(&[2]),
        });

        assert_eq!(pool.comp_at(0), moved);
        assert_eq!(pool.refs(moved), 2);
        assert_eq!(pool.shared_count(), 2);
    }

    #[test]
    fn test_replace_swaps_computation() {
        let mut pool = identity_pool(&ints(&[1, 2]));
        let event = pool.apply_source_event(&ListEvent::Replace {
            index: 1,
            old: ints(&[2]),
            new: ints(&[9]),
        });

        match event {
            PoolEvent::Replaced { old, new, .. } => {
                assert_eq!(old[0].element, Value::Int64(2));
                assert_eq!(new[0].element, Value::Int64(9));
            }
            other => panic!("expected Replaced, got {:?}", other),
        }
        assert_eq!(pool.entry_at(1).element, Value::Int64(9));
        assert_eq!(pool.shared_count(), 2);
    }

    #[test]
    fn test_reset_rebuilds() {
        let mut pool = identity_pool(&ints(&[1, 2]));
        pool.reset(&ints(&[5, 5, 6]));

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.shared_count(), 2);
        assert_eq!(pool.refs(pool.comp_at(0)), 2);
    }

    #[test]
    #[should_panic(expected = "structural violation")]
    fn test_remove_of_wrong_element_panics() {
        let mut pool = identity_pool(&ints(&[1, 2]));
        pool.apply_source_event(&ListEvent::Remove {
            index: 0,
            items: ints(&[9]),
        });
    }

    #[test]
    #[should_panic(expected = "structural violation")]
    fn test_add_past_end_panics() {
        let mut pool = identity_pool(&ints(&[1]));
        pool.apply_source_event(&ListEvent::Add {
            index: 5,
            items: ints(&[2]),
        });
    }

    #[test]
    fn test_watch_change_reports_all_positions() {
        let factory = Arc::new(ManualWatchFactory::new());
        let mut pool = SequencePool::new(
            Expr::Input,
            EvalOptions::new(),
            factory.clone(),
            null_sink(),
            &ints(&[4, 1, 4]),
        );

        let handle = factory.handle_for(&Value::Int64(4)).unwrap();
        handle.set_value(Value::Int64(10));

        let comp = pool.comp_at(0);
        let change = pool.apply_watch_change(comp).unwrap();
        assert_eq!(change.positions, vec![0, 2]);
        assert_eq!(change.old.value, Some(Value::Int64(4)));
        assert_eq!(change.new.value, Some(Value::Int64(10)));

        // A second notification with no further change is a no-op.
        assert!(pool.apply_watch_change(comp).is_none());
    }

    #[test]
    fn test_fault_occurrence_counting() {
        let factory = Arc::new(ManualWatchFactory::new());
        let mut pool = SequencePool::new(
            Expr::Input,
            EvalOptions::new(),
            factory.clone(),
            null_sink(),
            &ints(&[4, 1, 4]),
        );
        assert_eq!(pool.faulted_occurrences(), 0);

        let handle = factory.handle_for(&Value::Int64(4)).unwrap();
        handle.set_fault(Fault::evaluation("boom"));
        pool.apply_watch_change(pool.comp_at(0));

        // Both occurrences of the shared computation are faulted.
        assert_eq!(pool.faulted_occurrences(), 2);
        assert_eq!(pool.faults().len(), 2);
        assert!(pool.first_fault().is_some());

        handle.set_value(Value::Int64(4));
        pool.apply_watch_change(pool.comp_at(0));
        assert_eq!(pool.faulted_occurrences(), 0);
    }

    #[test]
    fn test_dispose_clears_everything() {
        let mut pool = identity_pool(&ints(&[1, 2, 2]));
        pool.dispose();
        assert!(pool.is_empty());
        assert_eq!(pool.shared_count(), 0);
    }

    #[test]
    fn test_map_pool_insert_remove_replace() {
        let mut pool = MapPool::new(
            Expr::Input,
            EvalOptions::new(),
            Arc::new(EvalWatchFactory),
            null_sink(),
            &[(Value::from("a"), Value::Int64(1))],
        );
        assert_eq!(pool.len(), 1);

        pool.apply_source_event(&MapEvent::Insert {
            key: Value::from("b"),
            value: Value::Int64(1),
        });
        // Equal values under different keys share one computation.
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.arena.live_count(), 1);

        pool.apply_source_event(&MapEvent::Replace {
            key: Value::from("a"),
            old: Value::Int64(1),
            new: Value::Int64(2),
        });
        assert_eq!(
            pool.entry_for(&Value::from("a")).unwrap().output.value,
            Some(Value::Int64(2))
        );

        pool.apply_source_event(&MapEvent::Remove {
            key: Value::from("b"),
            value: Value::Int64(1),
        });
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.arena.live_count(), 1);
    }

    #[test]
    #[should_panic(expected = "structural violation")]
    fn test_map_pool_double_insert_panics() {
        let mut pool = MapPool::new(
            Expr::Input,
            EvalOptions::new(),
            Arc::new(EvalWatchFactory),
            null_sink(),
            &[],
        );
        pool.apply_source_event(&MapEvent::Insert {
            key: Value::from("a"),
            value: Value::Int64(1),
        });
        pool.apply_source_event(&MapEvent::Insert {
            key: Value::from("a"),
            value: Value::Int64(2),
        });
    }
}
