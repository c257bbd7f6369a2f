//! Observable result views.
//!
//! A view wraps a maintained pipeline with the engine's locking discipline
//! and subscription management. Each core is one logical mutation domain:
//! a mutation acquires the mutation lock, commits under the state write
//! lock, releases the write lock, and only then notifies subscribers. An
//! event is therefore never observed before the state it describes,
//! snapshot reads never see a half-applied mutation, and events from one
//! source are delivered in the order the source raised them.
//!
//! Views hand out explicit, idempotent `dispose()`; the last disposal of a
//! shared instance tears the pipeline down (source unsubscribed first,
//! pool released second).

use crate::cache::{self, CacheKey, Retained};
use crate::context::ExecutionContext;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vigil_core::{
    EventCallback, Fault, ListEvent, MapEvent, SubscriptionId, SubscriptionManager, Value,
};
use vigil_engine::{
    CompId, FaultChange, MaintainedKeyedSelect, MaintainedMap, MaintainedSequence, MaintainedValue,
};

/// A scalar result transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueEvent {
    pub old: Result<Value, Fault>,
    pub new: Result<Value, Fault>,
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Shared plumbing of every view core.
pub struct CoreShell {
    /// The single logical mutation domain.
    mutation: Mutex<()>,
    context: Option<Arc<dyn ExecutionContext>>,
    /// Releases the source subscription; consumer unsubscribes before the
    /// pipeline is destroyed.
    source_unsubscribe: Mutex<Option<Unsubscribe>>,
    torn_down: AtomicBool,
}

impl CoreShell {
    fn new(context: Option<Arc<dyn ExecutionContext>>) -> Self {
        Self {
            mutation: Mutex::new(()),
            context,
            source_unsubscribe: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_source_unsubscribe(&self, unsubscribe: Unsubscribe) {
        *self.source_unsubscribe.lock() = Some(unsubscribe);
    }

    fn begin_teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(unsubscribe) = self.source_unsubscribe.lock().take() {
            unsubscribe();
        }
        true
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

fn dispatch<C>(core: Arc<C>, run: impl FnOnce(&C) + Send + 'static)
where
    C: AsRef<CoreShell> + Send + Sync + 'static,
{
    let context = {
        let shell: &CoreShell = (*core).as_ref();
        shell.context.clone()
    };
    match context {
        Some(context) => context.execute(Box::new(move || run(&*core))),
        None => run(&*core),
    }
}

// ---------------------------------------------------------------------------
// Sequence views
// ---------------------------------------------------------------------------

/// Shared engine instance behind one or more `ObservableSequence` handles.
pub struct SequenceCore {
    shell: CoreShell,
    state: RwLock<MaintainedSequence>,
    subscriptions: Mutex<SubscriptionManager<ListEvent>>,
    fault_subscriptions: Mutex<SubscriptionManager<FaultChange>>,
}

impl AsRef<CoreShell> for SequenceCore {
    fn as_ref(&self) -> &CoreShell {
        &self.shell
    }
}

impl SequenceCore {
    pub(crate) fn new(
        state: MaintainedSequence,
        context: Option<Arc<dyn ExecutionContext>>,
    ) -> Self {
        Self {
            shell: CoreShell::new(context),
            state: RwLock::new(state),
            subscriptions: Mutex::new(SubscriptionManager::new()),
            fault_subscriptions: Mutex::new(SubscriptionManager::new()),
        }
    }

    pub(crate) fn on_source_event(self: &Arc<Self>, event: ListEvent) {
        dispatch(self.clone(), move |core| core.mutate_source(&event));
    }

    pub(crate) fn on_watch_change(self: &Arc<Self>, comp: CompId) {
        dispatch(self.clone(), move |core| core.mutate_watch(comp));
    }

    fn mutate_source(&self, event: &ListEvent) {
        if self.shell.is_torn_down() {
            return;
        }
        let _domain = self.shell.mutation.lock();
        let (events, fault_changes) = {
            let mut state = self.state.write();
            state.apply_source_event(event)
        };
        self.notify(&events, &fault_changes);
    }

    fn mutate_watch(&self, comp: CompId) {
        if self.shell.is_torn_down() {
            return;
        }
        let _domain = self.shell.mutation.lock();
        let (events, fault_changes) = {
            let mut state = self.state.write();
            state.apply_watch_change(comp)
        };
        self.notify(&events, &fault_changes);
    }

    fn notify(&self, events: &[ListEvent], fault_changes: &[FaultChange]) {
        if !events.is_empty() {
            let callbacks = self.subscriptions.lock().callbacks();
            for event in events {
                for callback in &callbacks {
                    callback(event);
                }
            }
        }
        if !fault_changes.is_empty() {
            let callbacks = self.fault_subscriptions.lock().callbacks();
            for change in fault_changes {
                for callback in &callbacks {
                    callback(change);
                }
            }
        }
    }
}

impl Retained for SequenceCore {
    fn teardown(&self) {
        if !self.shell.begin_teardown() {
            return;
        }
        let _domain = self.shell.mutation.lock();
        self.state.write().dispose();
        self.subscriptions.lock().clear();
        self.fault_subscriptions.lock().clear();
    }
}

/// A read-only, continuously maintained sequence result.
///
/// Handles with an equivalent structural key share one live engine
/// instance; `dispose` is explicit and idempotent, and the last disposal
/// releases subscriptions and tracked computations.
pub struct ObservableSequence {
    core: Arc<SequenceCore>,
    key: CacheKey,
    disposed: AtomicBool,
}

impl ObservableSequence {
    pub(crate) fn new(core: Arc<SequenceCore>, key: CacheKey) -> Self {
        Self {
            core,
            key,
            disposed: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current result.
    pub fn snapshot(&self) -> Vec<Value> {
        self.core.state.read().result()
    }

    /// Current result length.
    pub fn len(&self) -> usize {
        self.core.state.read().len()
    }

    /// Returns true if the result is empty.
    pub fn is_empty(&self) -> bool {
        self.core.state.read().is_empty()
    }

    /// The result item at `index`, if present.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.core.state.read().result().get(index).cloned()
    }

    /// Current per-source-position faults.
    pub fn faults(&self) -> Vec<(usize, Fault)> {
        self.core.state.read().faults()
    }

    /// Subscribes to result-space structural events.
    pub fn subscribe(&self, callback: EventCallback<ListEvent>) -> SubscriptionId {
        self.core.subscriptions.lock().subscribe(callback)
    }

    /// Unsubscribes from structural events.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.subscriptions.lock().unsubscribe(id)
    }

    /// Subscribes to per-element fault transitions.
    pub fn subscribe_faults(&self, callback: EventCallback<FaultChange>) -> SubscriptionId {
        self.core.fault_subscriptions.lock().subscribe(callback)
    }

    /// Unsubscribes from fault transitions.
    pub fn unsubscribe_faults(&self, id: SubscriptionId) -> bool {
        self.core.fault_subscriptions.lock().unsubscribe(id)
    }

    /// Returns true if both handles are backed by the same live instance.
    pub fn shares_instance_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Releases this handle's cache reference. Idempotent; the last
    /// disposal tears the shared instance down.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            cache::release(&self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// Scalar views
// ---------------------------------------------------------------------------

pub(crate) enum ValueState {
    Aggregate(MaintainedValue),
    /// A live count delegating to a Where pipeline's length.
    CountOf(MaintainedSequence),
}

impl ValueState {
    fn value(&self) -> Result<Value, Fault> {
        match self {
            ValueState::Aggregate(pipeline) => pipeline.value(),
            ValueState::CountOf(pipeline) => Ok(Value::Int64(pipeline.len() as i64)),
        }
    }

    fn faults(&self) -> Vec<(usize, Fault)> {
        match self {
            ValueState::Aggregate(pipeline) => pipeline.faults(),
            ValueState::CountOf(pipeline) => pipeline.faults(),
        }
    }

    fn apply_source_event(&mut self, event: &ListEvent) {
        match self {
            ValueState::Aggregate(pipeline) => pipeline.apply_source_event(event),
            ValueState::CountOf(pipeline) => {
                pipeline.apply_source_event(event);
            }
        }
    }

    fn apply_watch_change(&mut self, comp: CompId) {
        match self {
            ValueState::Aggregate(pipeline) => pipeline.apply_watch_change(comp),
            ValueState::CountOf(pipeline) => {
                pipeline.apply_watch_change(comp);
            }
        }
    }

    fn dispose(&mut self) {
        match self {
            ValueState::Aggregate(pipeline) => pipeline.dispose(),
            ValueState::CountOf(pipeline) => pipeline.dispose(),
        }
    }
}

/// Shared engine instance behind one or more `ObservableValue` handles.
pub struct ValueCore {
    shell: CoreShell,
    state: RwLock<ValueState>,
    subscriptions: Mutex<SubscriptionManager<ValueEvent>>,
}

impl AsRef<CoreShell> for ValueCore {
    fn as_ref(&self) -> &CoreShell {
        &self.shell
    }
}

impl ValueCore {
    pub(crate) fn new(state: ValueState, context: Option<Arc<dyn ExecutionContext>>) -> Self {
        Self {
            shell: CoreShell::new(context),
            state: RwLock::new(state),
            subscriptions: Mutex::new(SubscriptionManager::new()),
        }
    }

    pub(crate) fn on_source_event(self: &Arc<Self>, event: ListEvent) {
        dispatch(self.clone(), move |core| {
            core.mutate(|state| state.apply_source_event(&event));
        });
    }

    pub(crate) fn on_watch_change(self: &Arc<Self>, comp: CompId) {
        dispatch(self.clone(), move |core| {
            core.mutate(|state| state.apply_watch_change(comp));
        });
    }

    fn mutate(&self, apply: impl FnOnce(&mut ValueState)) {
        if self.shell.is_torn_down() {
            return;
        }
        let _domain = self.shell.mutation.lock();
        let (old, new) = {
            let mut state = self.state.write();
            let old = state.value();
            apply(&mut state);
            (old, state.value())
        };
        if old != new {
            let event = ValueEvent { old, new };
            let callbacks = self.subscriptions.lock().callbacks();
            for callback in &callbacks {
                callback(&event);
            }
        }
    }
}

impl Retained for ValueCore {
    fn teardown(&self) {
        if !self.shell.begin_teardown() {
            return;
        }
        let _domain = self.shell.mutation.lock();
        self.state.write().dispose();
        self.subscriptions.lock().clear();
    }
}

/// A read-only, continuously maintained scalar result.
pub struct ObservableValue {
    core: Arc<ValueCore>,
    key: CacheKey,
    disposed: AtomicBool,
}

impl ObservableValue {
    pub(crate) fn new(core: Arc<ValueCore>, key: CacheKey) -> Self {
        Self {
            core,
            key,
            disposed: AtomicBool::new(false),
        }
    }

    /// Current scalar value or fault.
    pub fn value(&self) -> Result<Value, Fault> {
        self.core.state.read().value()
    }

    /// Current per-source-position faults.
    pub fn faults(&self) -> Vec<(usize, Fault)> {
        self.core.state.read().faults()
    }

    /// Subscribes to value transitions.
    pub fn subscribe(&self, callback: EventCallback<ValueEvent>) -> SubscriptionId {
        self.core.subscriptions.lock().subscribe(callback)
    }

    /// Unsubscribes from value transitions.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.subscriptions.lock().unsubscribe(id)
    }

    /// Returns true if both handles are backed by the same live instance.
    pub fn shares_instance_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Releases this handle's cache reference. Idempotent.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            cache::release(&self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// Map views
// ---------------------------------------------------------------------------

pub(crate) enum MapState {
    /// Keyed projection of an ordered source.
    Projected(MaintainedMap),
    /// Key-preserving select over a keyed source.
    Selected(MaintainedKeyedSelect),
}

impl MapState {
    fn snapshot(&self) -> Vec<(Value, Value)> {
        match self {
            MapState::Projected(pipeline) => pipeline.snapshot(),
            MapState::Selected(pipeline) => pipeline.snapshot(),
        }
    }

    fn get(&self, key: &Value) -> Option<Value> {
        match self {
            MapState::Projected(pipeline) => pipeline.get(key),
            MapState::Selected(pipeline) => pipeline.get(key),
        }
    }

    fn len(&self) -> usize {
        match self {
            MapState::Projected(pipeline) => pipeline.len(),
            MapState::Selected(pipeline) => pipeline.len(),
        }
    }

    fn current_fault(&self) -> Option<Fault> {
        match self {
            MapState::Projected(pipeline) => pipeline.current_fault(),
            MapState::Selected(_) => None,
        }
    }

    fn faults(&self) -> Vec<(Option<Value>, Fault)> {
        match self {
            MapState::Projected(pipeline) => pipeline.faults(),
            MapState::Selected(pipeline) => pipeline
                .faults()
                .into_iter()
                .map(|(key, fault)| (Some(key), fault))
                .collect(),
        }
    }

    fn dispose(&mut self) {
        match self {
            MapState::Projected(pipeline) => pipeline.dispose(),
            MapState::Selected(pipeline) => pipeline.dispose(),
        }
    }
}

/// Shared engine instance behind one or more `ObservableMap` handles.
pub struct MapCore {
    shell: CoreShell,
    state: RwLock<MapState>,
    subscriptions: Mutex<SubscriptionManager<MapEvent>>,
    fault_subscriptions: Mutex<SubscriptionManager<Option<Fault>>>,
}

impl AsRef<CoreShell> for MapCore {
    fn as_ref(&self) -> &CoreShell {
        &self.shell
    }
}

impl MapCore {
    pub(crate) fn new(state: MapState, context: Option<Arc<dyn ExecutionContext>>) -> Self {
        Self {
            shell: CoreShell::new(context),
            state: RwLock::new(state),
            subscriptions: Mutex::new(SubscriptionManager::new()),
            fault_subscriptions: Mutex::new(SubscriptionManager::new()),
        }
    }

    pub(crate) fn on_list_event(self: &Arc<Self>, event: ListEvent) {
        dispatch(self.clone(), move |core| {
            core.mutate(|state| match state {
                MapState::Projected(pipeline) => pipeline.apply_source_event(&event),
                MapState::Selected(_) => panic!(
                    "structural violation: ordered-source event delivered to a keyed-source view"
                ),
            });
        });
    }

    pub(crate) fn on_map_event(self: &Arc<Self>, event: MapEvent) {
        dispatch(self.clone(), move |core| {
            core.mutate(|state| match state {
                MapState::Selected(pipeline) => pipeline.apply_source_event(&event),
                MapState::Projected(_) => panic!(
                    "structural violation: keyed-source event delivered to an ordered-source view"
                ),
            });
        });
    }

    pub(crate) fn on_watch_change(self: &Arc<Self>, comp: CompId) {
        dispatch(self.clone(), move |core| {
            core.mutate(|state| match state {
                MapState::Projected(pipeline) => pipeline.apply_watch_change(comp),
                MapState::Selected(pipeline) => pipeline.apply_watch_change(comp),
            });
        });
    }

    fn mutate(&self, apply: impl FnOnce(&mut MapState) -> Vec<MapEvent>) {
        if self.shell.is_torn_down() {
            return;
        }
        let _domain = self.shell.mutation.lock();
        let (events, old_fault, new_fault) = {
            let mut state = self.state.write();
            let old_fault = state.current_fault();
            let events = apply(&mut state);
            let new_fault = state.current_fault();
            (events, old_fault, new_fault)
        };
        if !events.is_empty() {
            let callbacks = self.subscriptions.lock().callbacks();
            for event in &events {
                for callback in &callbacks {
                    callback(event);
                }
            }
        }
        if old_fault != new_fault {
            let callbacks = self.fault_subscriptions.lock().callbacks();
            for callback in &callbacks {
                callback(&new_fault);
            }
        }
    }
}

impl Retained for MapCore {
    fn teardown(&self) {
        if !self.shell.begin_teardown() {
            return;
        }
        let _domain = self.shell.mutation.lock();
        self.state.write().dispose();
        self.subscriptions.lock().clear();
        self.fault_subscriptions.lock().clear();
    }
}

/// A read-only, continuously maintained map result.
pub struct ObservableMap {
    core: Arc<MapCore>,
    key: CacheKey,
    disposed: AtomicBool,
}

impl ObservableMap {
    pub(crate) fn new(core: Arc<MapCore>, key: CacheKey) -> Self {
        Self {
            core,
            key,
            disposed: AtomicBool::new(false),
        }
    }

    /// Snapshot of the visible map.
    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        self.core.state.read().snapshot()
    }

    /// The visible value under `key`.
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.core.state.read().get(key)
    }

    /// Number of visible entries.
    pub fn len(&self) -> usize {
        self.core.state.read().len()
    }

    /// Returns true if the visible map is empty.
    pub fn is_empty(&self) -> bool {
        self.core.state.read().len() == 0
    }

    /// The map-level fault flag (duplicate/null key).
    pub fn current_fault(&self) -> Option<Fault> {
        self.core.state.read().current_fault()
    }

    /// Key-level and per-element fault entries.
    pub fn faults(&self) -> Vec<(Option<Value>, Fault)> {
        self.core.state.read().faults()
    }

    /// Subscribes to visible-map structural events.
    pub fn subscribe(&self, callback: EventCallback<MapEvent>) -> SubscriptionId {
        self.core.subscriptions.lock().subscribe(callback)
    }

    /// Unsubscribes from structural events.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.subscriptions.lock().unsubscribe(id)
    }

    /// Subscribes to fault-flag transitions.
    pub fn subscribe_faults(&self, callback: EventCallback<Option<Fault>>) -> SubscriptionId {
        self.core.fault_subscriptions.lock().subscribe(callback)
    }

    /// Unsubscribes from fault-flag transitions.
    pub fn unsubscribe_faults(&self, id: SubscriptionId) -> bool {
        self.core.fault_subscriptions.lock().unsubscribe(id)
    }

    /// Returns true if both handles are backed by the same live instance.
    pub fn shares_instance_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Releases this handle's cache reference. Idempotent.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            cache::release(&self.key);
        }
    }
}
