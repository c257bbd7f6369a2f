//! Maintained pipelines.
//!
//! A maintained pipeline ties a watched-computation pool to the state that
//! derives a result from it: a diff translator for sequence projections, an
//! aggregate machine for scalars, a keyed tracker for map projections. It
//! consumes source structural events and watch change notifications and
//! returns the corresponding result-space events; the observable layer
//! above owns locking, subscriptions, and caching.

use crate::aggregate::{
    AverageState, ExtremumState, Preference, SelectionState, SingleState, SumState,
};
use crate::keyed::{KeyedProjection, Serial};
use crate::pool::{
    CompId, CompOutput, MapPool, MapPoolEvent, PoolEntry, PoolEvent, SequencePool, WatchSink,
};
use crate::translate::DiffTranslator;
use std::sync::Arc;
use vigil_core::{Fault, ListEvent, ListSource, MapEvent, MapSource, Value};
use vigil_expr::{EvalOptions, Expr, SortOrder, WatchFactory};

/// How a sequence pipeline projects each source position into the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectionKind {
    /// One result item per position: the computed value.
    Select,
    /// The source element, kept only while the predicate holds.
    Where,
    /// The computed list's items, spliced flat into the result.
    FlatMap,
}

/// A per-element fault transition, in source positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultChange {
    pub position: usize,
    /// The fault now recorded at the position; None when cleared.
    pub fault: Option<Fault>,
}

fn project(kind: ProjectionKind, element: &Value, output: &CompOutput) -> Vec<Value> {
    match kind {
        ProjectionKind::Select => vec![output.value.clone().unwrap_or(Value::Null)],
        ProjectionKind::Where => match &output.value {
            Some(Value::Boolean(true)) => vec![element.clone()],
            _ => Vec::new(),
        },
        ProjectionKind::FlatMap => match &output.value {
            Some(Value::List(items)) => items.clone(),
            _ => Vec::new(),
        },
    }
}

fn position_fault(kind: ProjectionKind, output: &CompOutput) -> Option<Fault> {
    if let Some(fault) = &output.fault {
        return Some(fault.clone());
    }
    match (kind, &output.value) {
        (ProjectionKind::Where, Some(value))
            if !matches!(value, Value::Boolean(_) | Value::Null) =>
        {
            Some(Fault::evaluation(format!(
                "predicate evaluated to {}, expected a boolean",
                value.type_name()
            )))
        }
        (ProjectionKind::FlatMap, Some(value)) if !matches!(value, Value::List(_)) => {
            Some(Fault::evaluation(format!(
                "flatten expected a list, found {}",
                value.type_name()
            )))
        }
        _ => None,
    }
}

fn span_event(offset: usize, old: Vec<Value>, new: Vec<Value>) -> Option<ListEvent> {
    match (old.is_empty(), new.is_empty()) {
        (true, true) => None,
        (true, false) => Some(ListEvent::Add { index: offset, items: new }),
        (false, true) => Some(ListEvent::Remove { index: offset, items: old }),
        (false, false) => Some(ListEvent::Replace { index: offset, old, new }),
    }
}

/// A maintained sequence result: pool + translator + result mirror.
pub struct MaintainedSequence {
    source: Arc<dyn ListSource>,
    kind: ProjectionKind,
    pool: SequencePool,
    translator: DiffTranslator,
    result: Vec<Value>,
}

impl MaintainedSequence {
    /// Builds the pipeline from the source's current snapshot.
    pub fn new(
        source: Arc<dyn ListSource>,
        kind: ProjectionKind,
        expr: Expr,
        options: EvalOptions,
        factory: Arc<dyn WatchFactory>,
        sink: WatchSink,
    ) -> Self {
        let snapshot = source.snapshot_values();
        let pool = SequencePool::new(expr, options, factory, sink, &snapshot);
        let mut pipeline = Self {
            source,
            kind,
            pool,
            translator: DiffTranslator::new(),
            result: Vec::new(),
        };
        pipeline.rederive();
        pipeline
    }

    fn rederive(&mut self) {
        let mut widths = Vec::with_capacity(self.pool.len());
        let mut result = Vec::new();
        for entry in self.pool.entries() {
            let items = project(self.kind, &entry.element, &entry.output);
            widths.push(items.len());
            result.extend(items);
        }
        self.translator.reset_with(widths);
        self.result = result;
    }

    /// Current result snapshot.
    pub fn result(&self) -> Vec<Value> {
        self.result.clone()
    }

    /// Current result length.
    #[inline]
    pub fn len(&self) -> usize {
        self.result.len()
    }

    /// Returns true if the result is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }

    /// Number of source positions tracked.
    #[inline]
    pub fn source_len(&self) -> usize {
        self.pool.len()
    }

    /// Per-position faults, ascending.
    pub fn faults(&self) -> Vec<(usize, Fault)> {
        self.pool
            .entries()
            .enumerate()
            .filter_map(|(position, entry)| {
                position_fault(self.kind, &entry.output).map(|fault| (position, fault))
            })
            .collect()
    }

    /// Applies a source structural event; returns result-space events and
    /// fault transitions.
    pub fn apply_source_event(&mut self, event: &ListEvent) -> (Vec<ListEvent>, Vec<FaultChange>) {
        if matches!(event, ListEvent::Reset) {
            let snapshot = self.source.snapshot_values();
            self.pool.reset(&snapshot);
            self.rederive();
            return (vec![ListEvent::Reset], Vec::new());
        }

        let pool_event = self.pool.apply_source_event(event);
        let mut events = Vec::new();
        let mut fault_changes = Vec::new();

        match pool_event {
            PoolEvent::Added { index, entries } => {
                for (i, entry) in entries.iter().enumerate() {
                    let position = index + i;
                    let items = project(self.kind, &entry.element, &entry.output);
                    let offset = self.translator.insert(position, items.len());
                    if let Some(out) = span_event(offset, Vec::new(), items) {
                        out.apply_to(&mut self.result);
                        events.push(out);
                    }
                    if let Some(fault) = position_fault(self.kind, &entry.output) {
                        fault_changes.push(FaultChange {
                            position,
                            fault: Some(fault),
                        });
                    }
                }
            }
            PoolEvent::Removed { index, entries } => {
                for entry in &entries {
                    let (offset, width) = self.translator.remove(index);
                    let items = project(self.kind, &entry.element, &entry.output);
                    debug_assert_eq!(items.len(), width);
                    if let Some(out) = span_event(offset, items, Vec::new()) {
                        out.apply_to(&mut self.result);
                        events.push(out);
                    }
                    if position_fault(self.kind, &entry.output).is_some() {
                        fault_changes.push(FaultChange {
                            position: index,
                            fault: None,
                        });
                    }
                }
            }
            PoolEvent::Replaced { index, old, new } => {
                // Same-length spans from the sources this engine consumes;
                // handle the general case by pairing positionally and
                // splicing the remainder.
                let pairs = old.len().min(new.len());
                for i in 0..pairs {
                    let position = index + i;
                    self.apply_output_change(
                        position,
                        &old[i].element,
                        &old[i].output,
                        &new[i].element,
                        &new[i].output,
                        &mut events,
                        &mut fault_changes,
                    );
                }
                for entry in old.iter().skip(pairs) {
                    let (offset, width) = self.translator.remove(index + pairs);
                    let items = project(self.kind, &entry.element, &entry.output);
                    debug_assert_eq!(items.len(), width);
                    if let Some(out) = span_event(offset, items, Vec::new()) {
                        out.apply_to(&mut self.result);
                        events.push(out);
                    }
                }
                for (i, entry) in new.iter().enumerate().skip(pairs) {
                    let position = index + i;
                    let items = project(self.kind, &entry.element, &entry.output);
                    let offset = self.translator.insert(position, items.len());
                    if let Some(out) = span_event(offset, Vec::new(), items) {
                        out.apply_to(&mut self.result);
                        events.push(out);
                    }
                }
            }
            PoolEvent::Moved { from, to, entries } => {
                let mut items = Vec::new();
                for entry in &entries {
                    items.extend(project(self.kind, &entry.element, &entry.output));
                }
                let (old_offset, new_offset, width) =
                    self.translator.move_span(from, entries.len(), to);
                debug_assert_eq!(items.len(), width);
                if width > 0 {
                    let out = ListEvent::Move {
                        from: old_offset,
                        to: new_offset,
                        items,
                    };
                    out.apply_to(&mut self.result);
                    events.push(out);
                }
            }
            PoolEvent::Reset => unreachable!("Reset handled before pool dispatch"),
        }

        (events, fault_changes)
    }

    /// Applies a watch change notification; returns result-space events
    /// and fault transitions.
    pub fn apply_watch_change(&mut self, comp: CompId) -> (Vec<ListEvent>, Vec<FaultChange>) {
        let change = match self.pool.apply_watch_change(comp) {
            Some(change) => change,
            None => return (Vec::new(), Vec::new()),
        };

        let mut events = Vec::new();
        let mut fault_changes = Vec::new();
        for &position in &change.positions {
            let element = self.pool.entry_at(position).element;
            self.apply_output_change(
                position,
                &element,
                &change.old,
                &element,
                &change.new,
                &mut events,
                &mut fault_changes,
            );
        }
        (events, fault_changes)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_output_change(
        &mut self,
        position: usize,
        old_element: &Value,
        old_output: &CompOutput,
        new_element: &Value,
        new_output: &CompOutput,
        events: &mut Vec<ListEvent>,
        fault_changes: &mut Vec<FaultChange>,
    ) {
        let old_items = project(self.kind, old_element, old_output);
        let new_items = project(self.kind, new_element, new_output);
        let (offset, old_width) = self.translator.replace(position, new_items.len());
        debug_assert_eq!(old_items.len(), old_width);

        if let Some(out) = span_event(offset, old_items, new_items) {
            out.apply_to(&mut self.result);
            events.push(out);
        }

        let old_fault = position_fault(self.kind, old_output);
        let new_fault = position_fault(self.kind, new_output);
        if old_fault != new_fault {
            fault_changes.push(FaultChange {
                position,
                fault: new_fault,
            });
        }
    }

    /// Releases the pool and drops the derived state.
    pub fn dispose(&mut self) {
        self.pool.dispose();
        self.translator.reset();
        self.result.clear();
    }
}

/// Which scalar a maintained value derives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AggregateSpec {
    Count,
    Sum,
    Average,
    Min,
    Max,
    First(SortOrder),
    Last(SortOrder),
    Single,
    SingleOrDefault(Value),
}

enum AggState {
    Count,
    Sum(SumState),
    Average(AverageState),
    Extremum(ExtremumState),
    Selection(SelectionState),
    Single(SingleState),
}

fn selection_preference(spec: &AggregateSpec) -> Preference {
    // First takes the front of the requested ordering, Last the back.
    match spec {
        AggregateSpec::First(SortOrder::Asc) | AggregateSpec::Last(SortOrder::Desc) => {
            Preference::Smallest
        }
        AggregateSpec::First(SortOrder::Desc) | AggregateSpec::Last(SortOrder::Asc) => {
            Preference::Largest
        }
        _ => unreachable!("selection preference of non-selection spec"),
    }
}

/// A maintained scalar result: pool + aggregate machine.
pub struct MaintainedValue {
    source: Arc<dyn ListSource>,
    pool: SequencePool,
    state: AggState,
}

impl MaintainedValue {
    /// Builds the pipeline from the source's current snapshot.
    pub fn new(
        source: Arc<dyn ListSource>,
        spec: AggregateSpec,
        expr: Expr,
        options: EvalOptions,
        factory: Arc<dyn WatchFactory>,
        sink: WatchSink,
    ) -> Self {
        let snapshot = source.snapshot_values();
        let pool = SequencePool::new(expr, options, factory, sink, &snapshot);
        let state = match &spec {
            AggregateSpec::Count => AggState::Count,
            AggregateSpec::Sum => AggState::Sum(SumState::new()),
            AggregateSpec::Average => AggState::Average(AverageState::new()),
            AggregateSpec::Min => AggState::Extremum(ExtremumState::new(Preference::Smallest)),
            AggregateSpec::Max => AggState::Extremum(ExtremumState::new(Preference::Largest)),
            AggregateSpec::First(_) | AggregateSpec::Last(_) => {
                AggState::Selection(SelectionState::new(selection_preference(&spec)))
            }
            AggregateSpec::Single => AggState::Single(SingleState::new()),
            AggregateSpec::SingleOrDefault(default) => {
                AggState::Single(SingleState::with_default(default.clone()))
            }
        };
        let mut pipeline = Self {
            source,
            pool,
            state,
        };
        pipeline.rebuild_state();
        pipeline
    }

    fn rebuild_state(&mut self) {
        let entries: Vec<PoolEntry> = self.pool.entries().collect();
        match &mut self.state {
            AggState::Count => {}
            AggState::Sum(sum) => {
                *sum = SumState::new();
                for entry in &entries {
                    if let Some(value) = &entry.output.value {
                        sum.add(value);
                    }
                }
            }
            AggState::Average(avg) => {
                *avg = AverageState::new();
                for entry in &entries {
                    if let Some(value) = &entry.output.value {
                        avg.add(value);
                    }
                }
            }
            AggState::Extremum(extremum) => {
                let mut fresh = ExtremumState::new(extremum.preference());
                for entry in &entries {
                    if let Some(value) = &entry.output.value {
                        fresh.add(value);
                    }
                }
                *extremum = fresh;
            }
            AggState::Selection(selection) => {
                let mut fresh = SelectionState::new(selection.preference());
                for entry in &entries {
                    if let Some(key) = &entry.output.value {
                        fresh.add(key, &entry.element);
                    }
                }
                *selection = fresh;
            }
            AggState::Single(single) => {
                let mut fresh = single.fresh_like();
                for entry in &entries {
                    if let Some(value) = &entry.output.value {
                        fresh.add(value);
                    }
                }
                *single = fresh;
            }
        }
    }

    /// Current scalar value or fault.
    pub fn value(&self) -> Result<Value, Fault> {
        if matches!(self.state, AggState::Count) {
            return Ok(Value::Int64(self.pool.len() as i64));
        }
        if self.pool.faulted_occurrences() > 0 {
            let underlying = self
                .pool
                .first_fault()
                .unwrap_or_else(|| Fault::evaluation("faulted element"));
            return Err(Fault::aggregate(underlying));
        }
        match &self.state {
            AggState::Count => unreachable!("count handled above"),
            AggState::Sum(sum) => sum.current(),
            AggState::Average(avg) => avg.current(),
            AggState::Extremum(extremum) => extremum.current(),
            AggState::Selection(selection) => selection.current(),
            AggState::Single(single) => single.current(),
        }
    }

    /// Per-position faults, ascending.
    pub fn faults(&self) -> Vec<(usize, Fault)> {
        self.pool.faults()
    }

    /// Applies a source structural event.
    pub fn apply_source_event(&mut self, event: &ListEvent) {
        if matches!(event, ListEvent::Reset) {
            let snapshot = self.source.snapshot_values();
            self.pool.reset(&snapshot);
            self.rebuild_state();
            return;
        }

        let pool_event = self.pool.apply_source_event(event);
        match pool_event {
            PoolEvent::Added { entries, .. } => {
                for entry in &entries {
                    self.fold_in(&entry.element, &entry.output);
                }
            }
            PoolEvent::Removed { entries, .. } => {
                for entry in &entries {
                    self.fold_out(&entry.element, &entry.output);
                }
            }
            PoolEvent::Replaced { old, new, .. } => {
                let pairs = old.len().min(new.len());
                for i in 0..pairs {
                    self.fold_change(
                        &old[i].element,
                        &old[i].output,
                        &new[i].element,
                        &new[i].output,
                    );
                }
                for entry in old.iter().skip(pairs) {
                    self.fold_out(&entry.element, &entry.output);
                }
                for entry in new.iter().skip(pairs) {
                    self.fold_in(&entry.element, &entry.output);
                }
            }
            PoolEvent::Moved { .. } => {}
            PoolEvent::Reset => unreachable!("Reset handled before pool dispatch"),
        }
    }

    /// Applies a watch change notification.
    pub fn apply_watch_change(&mut self, comp: CompId) {
        let change = match self.pool.apply_watch_change(comp) {
            Some(change) => change,
            None => return,
        };
        for &position in &change.positions {
            let element = self.pool.entry_at(position).element;
            self.fold_change(&element, &change.old, &element, &change.new);
        }
    }

    fn fold_in(&mut self, element: &Value, output: &CompOutput) {
        let value = match &output.value {
            Some(value) => value.clone(),
            None => return,
        };
        match &mut self.state {
            AggState::Count => {}
            AggState::Sum(sum) => sum.add(&value),
            AggState::Average(avg) => avg.add(&value),
            AggState::Extremum(extremum) => extremum.add(&value),
            AggState::Selection(selection) => selection.add(&value, element),
            AggState::Single(single) => single.add(&value),
        }
    }

    fn fold_out(&mut self, element: &Value, output: &CompOutput) {
        let value = match &output.value {
            Some(value) => value.clone(),
            None => return,
        };
        let pool = &self.pool;
        match &mut self.state {
            AggState::Count => {}
            AggState::Sum(sum) => sum.remove(&value),
            AggState::Average(avg) => avg.remove(&value),
            AggState::Extremum(extremum) => {
                extremum.remove(&value, || pool.live_values());
            }
            AggState::Selection(selection) => {
                selection.remove(&value, element, || {
                    pool.entries()
                        .filter_map(|e| e.output.value.map(|key| (key, e.element)))
                });
            }
            AggState::Single(single) => {
                single.remove(|| pool.live_values());
            }
        }
    }

    fn fold_change(
        &mut self,
        old_element: &Value,
        old_output: &CompOutput,
        new_element: &Value,
        new_output: &CompOutput,
    ) {
        match (&old_output.value, &new_output.value) {
            (Some(old), Some(new)) => {
                let pool = &self.pool;
                match &mut self.state {
                    AggState::Count => {}
                    AggState::Sum(sum) => sum.replace(old, new),
                    AggState::Average(avg) => avg.replace(old, new),
                    AggState::Extremum(extremum) => {
                        extremum.replace(old, new, || pool.live_values());
                    }
                    AggState::Selection(selection) => {
                        selection.replace_key(old, new, new_element, || {
                            pool.entries()
                                .filter_map(|e| e.output.value.map(|key| (key, e.element)))
                        });
                    }
                    AggState::Single(single) => single.replace(new),
                }
            }
            (Some(_), None) => self.fold_out(old_element, old_output),
            (None, Some(_)) => self.fold_in(new_element, new_output),
            (None, None) => {}
        }
    }

    /// Releases the pool and drops the derived state.
    pub fn dispose(&mut self) {
        self.pool.dispose();
    }
}

/// A maintained map projection over an ordered source.
pub struct MaintainedMap {
    source: Arc<dyn ListSource>,
    pool: SequencePool,
    keyed: KeyedProjection,
    /// Arrival serial per source position; None for occurrences excluded
    /// from the projection (faulted or malformed pairs).
    serials: Vec<Option<Serial>>,
}

impl MaintainedMap {
    /// Builds the pipeline from the source's current snapshot. `expr` must
    /// evaluate to a `[key, value]` pair per element.
    pub fn new(
        source: Arc<dyn ListSource>,
        expr: Expr,
        options: EvalOptions,
        factory: Arc<dyn WatchFactory>,
        sink: WatchSink,
    ) -> Self {
        let snapshot = source.snapshot_values();
        let pool = SequencePool::new(expr, options, factory, sink, &snapshot);
        let mut pipeline = Self {
            source,
            pool,
            keyed: KeyedProjection::new(),
            serials: Vec::new(),
        };
        pipeline.rederive();
        pipeline
    }

    fn rederive(&mut self) {
        self.keyed.clear();
        self.serials.clear();
        let entries: Vec<PoolEntry> = self.pool.entries().collect();
        for entry in &entries {
            self.serials.push(match pair_of(&entry.output) {
                Some((key, value)) => Some(self.keyed.insert(key, value).0),
                None => None,
            });
        }
    }

    /// Snapshot of the visible map.
    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        self.keyed.snapshot()
    }

    /// The currently visible value under `key`.
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.keyed.get(key)
    }

    /// Number of visible entries.
    pub fn len(&self) -> usize {
        self.keyed.len()
    }

    /// Returns true if the visible map is empty.
    pub fn is_empty(&self) -> bool {
        self.keyed.is_empty()
    }

    /// The map-level fault flag (duplicate/null keys).
    pub fn current_fault(&self) -> Option<Fault> {
        self.keyed.current_fault()
    }

    /// Key-level fault entries plus per-element evaluation faults.
    pub fn faults(&self) -> Vec<(Option<Value>, Fault)> {
        let mut faults = self.keyed.faults();
        for entry in self.pool.entries() {
            if let Some(fault) = map_position_fault(&entry.output) {
                faults.push((None, fault));
            }
        }
        faults
    }

    /// Applies a source structural event; returns visible-map events.
    pub fn apply_source_event(&mut self, event: &ListEvent) -> Vec<MapEvent> {
        if matches!(event, ListEvent::Reset) {
            let snapshot = self.source.snapshot_values();
            self.pool.reset(&snapshot);
            self.rederive();
            return vec![MapEvent::Reset];
        }

        let pool_event = self.pool.apply_source_event(event);
        let mut events = Vec::new();
        match pool_event {
            PoolEvent::Added { index, entries } => {
                for (i, entry) in entries.iter().enumerate() {
                    let serial = match pair_of(&entry.output) {
                        Some((key, value)) => {
                            let (serial, event) = self.keyed.insert(key, value);
                            events.extend(event);
                            Some(serial)
                        }
                        None => None,
                    };
                    self.serials.insert(index + i, serial);
                }
            }
            PoolEvent::Removed { index, entries } => {
                for _ in &entries {
                    if let Some(serial) = self.serials.remove(index) {
                        events.extend(self.keyed.remove(serial));
                    }
                }
            }
            PoolEvent::Replaced { index, old, new } => {
                let pairs = old.len().min(new.len());
                for (i, entry) in new.iter().enumerate().take(pairs) {
                    events.extend(self.swap_occurrence(index + i, &entry.output));
                }
                for _ in old.iter().skip(pairs) {
                    if let Some(serial) = self.serials.remove(index + pairs) {
                        events.extend(self.keyed.remove(serial));
                    }
                }
                for (i, entry) in new.iter().enumerate().skip(pairs) {
                    let serial = match pair_of(&entry.output) {
                        Some((key, value)) => {
                            let (serial, event) = self.keyed.insert(key, value);
                            events.extend(event);
                            Some(serial)
                        }
                        None => None,
                    };
                    self.serials.insert(index + i, serial);
                }
            }
            PoolEvent::Moved { from, to, entries } => {
                // Order is invisible to a keyed result; only serials move.
                let span: Vec<Option<Serial>> =
                    self.serials.drain(from..from + entries.len()).collect();
                self.serials.splice(to..to, span);
            }
            PoolEvent::Reset => unreachable!("Reset handled before pool dispatch"),
        }
        events
    }

    /// Applies a watch change notification; returns visible-map events.
    pub fn apply_watch_change(&mut self, comp: CompId) -> Vec<MapEvent> {
        let change = match self.pool.apply_watch_change(comp) {
            Some(change) => change,
            None => return Vec::new(),
        };
        let mut events = Vec::new();
        for &position in &change.positions {
            events.extend(self.swap_occurrence(position, &change.new));
        }
        events
    }

    fn swap_occurrence(&mut self, position: usize, output: &CompOutput) -> Vec<MapEvent> {
        let mut events = Vec::new();
        if let Some(serial) = self.serials[position].take() {
            events.extend(self.keyed.remove(serial));
        }
        if let Some((key, value)) = pair_of(output) {
            let (serial, event) = self.keyed.insert(key, value);
            events.extend(event);
            self.serials[position] = Some(serial);
        }
        events
    }

    /// Releases the pool and drops the derived state.
    pub fn dispose(&mut self) {
        self.pool.dispose();
        self.keyed.clear();
        self.serials.clear();
    }
}

fn pair_of(output: &CompOutput) -> Option<(Option<Value>, Value)> {
    match &output.value {
        Some(Value::List(pair)) if pair.len() == 2 => {
            let key = if pair[0].is_null() {
                None
            } else {
                Some(pair[0].clone())
            };
            Some((key, pair[1].clone()))
        }
        _ => None,
    }
}

fn map_position_fault(output: &CompOutput) -> Option<Fault> {
    if let Some(fault) = &output.fault {
        return Some(fault.clone());
    }
    match &output.value {
        Some(Value::List(pair)) if pair.len() == 2 => None,
        Some(value) => Some(Fault::evaluation(format!(
            "map projection expected a [key, value] pair, found {}",
            value.type_name()
        ))),
        None => None,
    }
}

/// A maintained key-preserving select over a keyed source.
pub struct MaintainedKeyedSelect {
    source: Arc<dyn MapSource>,
    pool: MapPool,
}

impl MaintainedKeyedSelect {
    /// Builds the pipeline from the source's current snapshot.
    pub fn new(
        source: Arc<dyn MapSource>,
        expr: Expr,
        options: EvalOptions,
        factory: Arc<dyn WatchFactory>,
        sink: WatchSink,
    ) -> Self {
        let snapshot = source.snapshot_entries();
        let pool = MapPool::new(expr, options, factory, sink, &snapshot);
        Self { source, pool }
    }

    /// Snapshot of the derived map.
    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        self.pool
            .entries()
            .map(|(key, entry)| (key, entry.output.value.unwrap_or(Value::Null)))
            .collect()
    }

    /// The derived value under `key`.
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.pool
            .entry_for(key)
            .map(|entry| entry.output.value.unwrap_or(Value::Null))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Returns true if the derived map is empty.
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Per-key evaluation faults.
    pub fn faults(&self) -> Vec<(Value, Fault)> {
        self.pool.faults()
    }

    /// Applies a source structural event; returns result-space events.
    pub fn apply_source_event(&mut self, event: &MapEvent) -> Vec<MapEvent> {
        if matches!(event, MapEvent::Reset) {
            let snapshot = self.source.snapshot_entries();
            self.pool.reset(&snapshot);
            return vec![MapEvent::Reset];
        }

        match self.pool.apply_source_event(event) {
            MapPoolEvent::Inserted { key, entry } => vec![MapEvent::Insert {
                key,
                value: entry.output.value.unwrap_or(Value::Null),
            }],
            MapPoolEvent::Removed { key, entry } => vec![MapEvent::Remove {
                key,
                value: entry.output.value.unwrap_or(Value::Null),
            }],
            MapPoolEvent::Replaced { key, old, new } => {
                let old_value = old.output.value.unwrap_or(Value::Null);
                let new_value = new.output.value.unwrap_or(Value::Null);
                if old_value == new_value {
                    Vec::new()
                } else {
                    vec![MapEvent::Replace {
                        key,
                        old: old_value,
                        new: new_value,
                    }]
                }
            }
            MapPoolEvent::Reset => unreachable!("Reset handled before pool dispatch"),
        }
    }

    /// Applies a watch change notification; returns result-space events.
    pub fn apply_watch_change(&mut self, comp: CompId) -> Vec<MapEvent> {
        let change = match self.pool.apply_watch_change(comp) {
            Some(change) => change,
            None => return Vec::new(),
        };
        let old_value = change.old.value.clone().unwrap_or(Value::Null);
        let new_value = change.new.value.clone().unwrap_or(Value::Null);
        if old_value == new_value {
            return Vec::new();
        }
        change
            .keys
            .into_iter()
            .map(|key| MapEvent::Replace {
                key,
                old: old_value.clone(),
                new: new_value.clone(),
            })
            .collect()
    }

    /// Releases the pool.
    pub fn dispose(&mut self) {
        self.pool.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use vigil_core::ActiveList;
    use vigil_expr::{EvalWatchFactory, ManualWatchFactory};

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int64(*v)).collect()
    }

    fn int(v: i64) -> Value {
        Value::Int64(v)
    }

    fn lists(values: &[&[i64]]) -> Vec<Value> {
        values.iter().map(|items| Value::List(ints(items))).collect()
    }

    /// Collects source events so tests can feed them to a pipeline in the
    /// order the source raised them.
    fn relay(list: &ActiveList) -> Arc<Mutex<Vec<ListEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        list.subscribe_events(Arc::new(move |event: &ListEvent| {
            sink.lock().push(event.clone());
        }));
        events
    }

    fn comp_queue() -> (WatchSink, Arc<Mutex<Vec<CompId>>>) {
        let queue = Arc::new(Mutex::new(Vec::new()));
        let sink = queue.clone();
        (Arc::new(move |comp| sink.lock().push(comp)), queue)
    }

    fn sequence(
        list: &ActiveList,
        kind: ProjectionKind,
        expr: Expr,
        factory: Arc<dyn WatchFactory>,
        sink: WatchSink,
    ) -> MaintainedSequence {
        MaintainedSequence::new(
            Arc::new(list.clone()),
            kind,
            expr,
            EvalOptions::new(),
            factory,
            sink,
        )
    }

    fn drain_into_sequence(
        pipeline: &mut MaintainedSequence,
        events: &Arc<Mutex<Vec<ListEvent>>>,
    ) -> Vec<ListEvent> {
        let mut out = Vec::new();
        for event in events.lock().drain(..) {
            out.extend(pipeline.apply_source_event(&event).0);
        }
        out
    }

    #[test]
    fn test_select_mirrors_source() {
        let list = ActiveList::from_values(ints(&[1, 2, 3]));
        let events = relay(&list);
        let mut select = sequence(
            &list,
            ProjectionKind::Select,
            Expr::mul(Expr::Input, Expr::literal(10i64)),
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );
        assert_eq!(select.result(), ints(&[10, 20, 30]));

        list.push(int(4));
        list.remove(0).unwrap();
        list.replace(0, int(9)).unwrap();
        let out = drain_into_sequence(&mut select, &events);

        assert_eq!(select.result(), ints(&[90, 30, 40]));
        assert_eq!(out.len(), 3);
        assert!(matches!(out[2], ListEvent::Replace { index: 0, .. }));
    }

    #[test]
    fn test_where_filters_and_counts() {
        let list = ActiveList::from_values(ints(&[1, 15, 3, 20]));
        let events = relay(&list);
        let mut filtered = sequence(
            &list,
            ProjectionKind::Where,
            Expr::gt(Expr::Input, Expr::literal(10i64)),
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );
        assert_eq!(filtered.result(), ints(&[15, 20]));

        list.push(int(30));
        list.remove(1).unwrap(); // removes 15
        let out = drain_into_sequence(&mut filtered, &events);

        assert_eq!(filtered.result(), ints(&[20, 30]));
        assert_eq!(out.len(), 2);
        // A non-matching add produces no result event.
        list.push(int(2));
        let out = drain_into_sequence(&mut filtered, &events);
        assert!(out.is_empty());
    }

    #[test]
    fn test_where_predicate_change_adds_and_removes() {
        let factory = Arc::new(ManualWatchFactory::new());
        let (sink, queue) = comp_queue();
        let list = ActiveList::from_values(ints(&[1, 15]));
        let mut filtered = sequence(
            &list,
            ProjectionKind::Where,
            Expr::gt(Expr::Input, Expr::literal(10i64)),
            factory.clone(),
            sink,
        );
        assert_eq!(filtered.result(), ints(&[15]));

        // Element 1 starts failing the predicate; flip it to passing.
        factory
            .handle_for(&int(1))
            .unwrap()
            .set_value(Value::Boolean(true));
        let comp = queue.lock().pop().unwrap();
        let (out, _) = filtered.apply_watch_change(comp);

        assert_eq!(
            out,
            vec![ListEvent::Add {
                index: 0,
                items: ints(&[1])
            }]
        );
        assert_eq!(filtered.result(), ints(&[1, 15]));

        // And back to failing.
        factory
            .handle_for(&int(1))
            .unwrap()
            .set_value(Value::Boolean(false));
        let comp = queue.lock().pop().unwrap();
        let (out, _) = filtered.apply_watch_change(comp);

        assert_eq!(
            out,
            vec![ListEvent::Remove {
                index: 0,
                items: ints(&[1])
            }]
        );
        assert_eq!(filtered.result(), ints(&[15]));
    }

    #[test]
    fn test_flatten_and_move_translation() {
        // Source [[1,2],[3]] flattened to [1,2,3]; moving source position 1
        // to 0 yields [3,1,2] via a single translated Move.
        let list = ActiveList::from_values(lists(&[&[1, 2], &[3]]));
        let events = relay(&list);
        let mut flat = sequence(
            &list,
            ProjectionKind::FlatMap,
            Expr::Input,
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );
        assert_eq!(flat.result(), ints(&[1, 2, 3]));

        list.move_item(1, 0).unwrap();
        let out = drain_into_sequence(&mut flat, &events);

        assert_eq!(
            out,
            vec![ListEvent::Move {
                from: 2,
                to: 0,
                items: ints(&[3])
            }]
        );
        assert_eq!(flat.result(), ints(&[3, 1, 2]));
    }

    #[test]
    fn test_flatten_replace_changes_span() {
        let list = ActiveList::from_values(lists(&[&[1, 2], &[3]]));
        let events = relay(&list);
        let mut flat = sequence(
            &list,
            ProjectionKind::FlatMap,
            Expr::Input,
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );

        list.replace(0, Value::List(ints(&[7, 8, 9]))).unwrap();
        let out = drain_into_sequence(&mut flat, &events);

        assert_eq!(
            out,
            vec![ListEvent::Replace {
                index: 0,
                old: ints(&[1, 2]),
                new: ints(&[7, 8, 9])
            }]
        );
        assert_eq!(flat.result(), ints(&[7, 8, 9, 3]));
    }

    #[test]
    fn test_flatten_non_list_faults_with_zero_width() {
        let list = ActiveList::from_values(vec![Value::List(ints(&[1])), int(5)]);
        let flat = sequence(
            &list,
            ProjectionKind::FlatMap,
            Expr::Input,
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );

        assert_eq!(flat.result(), ints(&[1]));
        let faults = flat.faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].0, 1);
    }

    #[test]
    fn test_select_fault_keeps_placeholder() {
        // 10 / x faults at x == 0 but the result stays index-aligned.
        let list = ActiveList::from_values(ints(&[5, 0]));
        let select = sequence(
            &list,
            ProjectionKind::Select,
            Expr::div(Expr::literal(10i64), Expr::Input),
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );

        assert_eq!(select.result(), vec![int(2), Value::Null]);
        let faults = select.faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].0, 1);
        assert!(matches!(faults[0].1, Fault::Evaluation(_)));
    }

    #[test]
    fn test_reset_rederives() {
        let list = ActiveList::from_values(ints(&[1, 20]));
        let events = relay(&list);
        let mut filtered = sequence(
            &list,
            ProjectionKind::Where,
            Expr::gt(Expr::Input, Expr::literal(10i64)),
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );

        list.reset(ints(&[30, 2, 40]));
        let out = drain_into_sequence(&mut filtered, &events);

        assert_eq!(out, vec![ListEvent::Reset]);
        assert_eq!(filtered.result(), ints(&[30, 40]));
    }

    fn value_pipeline(list: &ActiveList, spec: AggregateSpec, expr: Expr) -> MaintainedValue {
        MaintainedValue::new(
            Arc::new(list.clone()),
            spec,
            expr,
            EvalOptions::new(),
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        )
    }

    fn drain_into_value(pipeline: &mut MaintainedValue, events: &Arc<Mutex<Vec<ListEvent>>>) {
        for event in events.lock().drain(..) {
            pipeline.apply_source_event(&event);
        }
    }

    #[test]
    fn test_sum_pipeline() {
        let list = ActiveList::from_values(ints(&[1, 2, 3]));
        let events = relay(&list);
        let mut sum = value_pipeline(&list, AggregateSpec::Sum, Expr::Input);
        assert_eq!(sum.value(), Ok(int(6)));

        list.push(int(10));
        list.remove(0).unwrap();
        list.replace(0, int(5)).unwrap();
        drain_into_value(&mut sum, &events);

        assert_eq!(sum.value(), Ok(int(18)));
    }

    #[test]
    fn test_max_rescan_pipeline() {
        // S = [5,3,9,1]: max 9; remove 9 -> 5; remove 3 -> unchanged.
        let list = ActiveList::from_values(ints(&[5, 3, 9, 1]));
        let events = relay(&list);
        let mut max = value_pipeline(&list, AggregateSpec::Max, Expr::Input);
        assert_eq!(max.value(), Ok(int(9)));

        list.remove(2).unwrap();
        drain_into_value(&mut max, &events);
        assert_eq!(max.value(), Ok(int(5)));

        list.remove(1).unwrap();
        drain_into_value(&mut max, &events);
        assert_eq!(max.value(), Ok(int(5)));
    }

    #[test]
    fn test_average_and_count() {
        let list = ActiveList::from_values(ints(&[2, 4]));
        let events = relay(&list);
        let mut avg = value_pipeline(&list, AggregateSpec::Average, Expr::Input);
        let mut count = value_pipeline(&list, AggregateSpec::Count, Expr::Input);

        assert_eq!(avg.value(), Ok(Value::Float64(3.0)));
        assert_eq!(count.value(), Ok(int(2)));

        list.remove(0).unwrap();
        list.remove(0).unwrap();
        for event in events.lock().iter() {
            avg.apply_source_event(event);
            count.apply_source_event(event);
        }

        assert_eq!(avg.value(), Err(Fault::EmptySequence));
        assert_eq!(count.value(), Ok(int(0)));
    }

    #[test]
    fn test_first_last_by_key() {
        let records = vec![
            Value::List(vec![int(3), Value::from("c")]),
            Value::List(vec![int(1), Value::from("a")]),
            Value::List(vec![int(2), Value::from("b")]),
        ];
        let list = ActiveList::from_values(records);
        let events = relay(&list);

        let mut first = value_pipeline(&list, AggregateSpec::First(SortOrder::Asc), Expr::field(0));
        let mut last = value_pipeline(&list, AggregateSpec::Last(SortOrder::Asc), Expr::field(0));

        assert_eq!(
            first.value(),
            Ok(Value::List(vec![int(1), Value::from("a")]))
        );
        assert_eq!(last.value(), Ok(Value::List(vec![int(3), Value::from("c")])));

        // Removing the recorded first recomputes from the live set.
        list.remove(1).unwrap();
        for event in events.lock().iter() {
            first.apply_source_event(event);
            last.apply_source_event(event);
        }
        assert_eq!(
            first.value(),
            Ok(Value::List(vec![int(2), Value::from("b")]))
        );
    }

    #[test]
    fn test_single_boundaries_pipeline() {
        let list = ActiveList::new();
        let events = relay(&list);
        let mut single = value_pipeline(&list, AggregateSpec::Single, Expr::Input);
        assert_eq!(single.value(), Err(Fault::EmptySequence));

        list.push(int(7));
        drain_into_value(&mut single, &events);
        assert_eq!(single.value(), Ok(int(7)));

        list.push(int(8));
        drain_into_value(&mut single, &events);
        assert_eq!(single.value(), Err(Fault::MultipleElements));

        list.remove(0).unwrap();
        drain_into_value(&mut single, &events);
        assert_eq!(single.value(), Ok(int(8)));
    }

    #[test]
    fn test_aggregate_fault_gates_value() {
        let factory = Arc::new(ManualWatchFactory::new());
        let (sink, queue) = comp_queue();
        let list = ActiveList::from_values(ints(&[1, 2]));
        let mut sum = MaintainedValue::new(
            Arc::new(list.clone()),
            AggregateSpec::Sum,
            Expr::Input,
            EvalOptions::new(),
            factory.clone(),
            sink,
        );
        assert_eq!(sum.value(), Ok(int(3)));

        factory
            .handle_for(&int(2))
            .unwrap()
            .set_fault(Fault::evaluation("boom"));
        let comp = queue.lock().pop().unwrap();
        sum.apply_watch_change(comp);

        assert!(matches!(sum.value(), Err(Fault::Aggregate(_))));

        // Resolving the fault restores the aggregate.
        factory.handle_for(&int(2)).unwrap().set_value(int(2));
        let comp = queue.lock().pop().unwrap();
        sum.apply_watch_change(comp);
        assert_eq!(sum.value(), Ok(int(3)));
    }

    fn entry_expr() -> Expr {
        // Element shape: [key, value].
        Expr::entry(Expr::field(0), Expr::field(1))
    }

    fn keyed_record(key: &str, value: i64) -> Value {
        Value::List(vec![Value::from(key), int(value)])
    }

    fn null_keyed_record(value: i64) -> Value {
        Value::List(vec![Value::Null, int(value)])
    }

    #[test]
    fn test_maintained_map_duplicate_key_scenario() {
        // Keys [a, b, a]: duplicate fault; removing the second `a` clears
        // it and leaves {a: v0, b: v1}.
        let list = ActiveList::from_values(vec![
            keyed_record("a", 0),
            keyed_record("b", 1),
            keyed_record("a", 2),
        ]);
        let events = relay(&list);
        let mut map = MaintainedMap::new(
            Arc::new(list.clone()),
            entry_expr(),
            EvalOptions::new(),
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );

        assert_eq!(
            map.current_fault(),
            Some(Fault::DuplicateKey(Value::from("a")))
        );
        assert_eq!(map.get(&Value::from("a")), Some(int(0)));

        list.remove(2).unwrap();
        for event in events.lock().drain(..) {
            map.apply_source_event(&event);
        }

        assert_eq!(map.current_fault(), None);
        assert_eq!(map.get(&Value::from("a")), Some(int(0)));
        assert_eq!(map.get(&Value::from("b")), Some(int(1)));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_maintained_map_null_key() {
        let list = ActiveList::from_values(vec![keyed_record("a", 1), null_keyed_record(2)]);
        let map = MaintainedMap::new(
            Arc::new(list.clone()),
            entry_expr(),
            EvalOptions::new(),
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );

        assert_eq!(map.current_fault(), Some(Fault::NullKey));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_maintained_map_visible_winner_after_removal() {
        let list = ActiveList::from_values(vec![
            keyed_record("a", 0),
            keyed_record("a", 1),
            keyed_record("a", 2),
        ]);
        let events = relay(&list);
        let mut map = MaintainedMap::new(
            Arc::new(list.clone()),
            entry_expr(),
            EvalOptions::new(),
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );
        assert_eq!(map.get(&Value::from("a")), Some(int(0)));

        // Removing the visible occurrence promotes the earliest survivor.
        list.remove(0).unwrap();
        let mut out = Vec::new();
        for event in events.lock().drain(..) {
            out.extend(map.apply_source_event(&event));
        }

        assert_eq!(map.get(&Value::from("a")), Some(int(1)));
        assert_eq!(
            out,
            vec![MapEvent::Replace {
                key: Value::from("a"),
                old: int(0),
                new: int(1)
            }]
        );
    }

    #[test]
    fn test_keyed_select_over_map_source() {
        use vigil_core::ActiveMap;

        let source = ActiveMap::from_entries(vec![
            (Value::from("a"), int(1)),
            (Value::from("b"), int(2)),
        ]);
        let events: Arc<Mutex<Vec<MapEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        source.subscribe_events(Arc::new(move |event: &MapEvent| {
            sink.lock().push(event.clone());
        }));

        let mut select = MaintainedKeyedSelect::new(
            Arc::new(source.clone()),
            Expr::mul(Expr::Input, Expr::literal(10i64)),
            EvalOptions::new(),
            Arc::new(EvalWatchFactory),
            Arc::new(|_| {}),
        );
        assert_eq!(select.get(&Value::from("a")), Some(int(10)));

        source.insert(Value::from("c"), int(3));
        source.insert(Value::from("a"), int(5));
        source.remove(&Value::from("b")).unwrap();
        let mut out = Vec::new();
        for event in events.lock().drain(..) {
            out.extend(select.apply_source_event(&event));
        }

        assert_eq!(select.len(), 2);
        assert_eq!(select.get(&Value::from("a")), Some(int(50)));
        assert_eq!(select.get(&Value::from("c")), Some(int(30)));
        assert_eq!(out.len(), 3);
    }
}
