//! Active operators.
//!
//! The public operator surface: each function validates nothing more than
//! it must, builds (or joins) the cached engine instance for its structural
//! key, wires the source and watch notification streams into the core, and
//! hands back a view. All maintenance semantics live in `vigil-engine`.

use crate::cache::{self, CacheKey, OpKind};
use crate::context::ExecutionContext;
use crate::observable::{
    MapCore, MapState, ObservableMap, ObservableSequence, ObservableValue, SequenceCore,
    ValueCore, ValueState,
};
use std::sync::{Arc, Weak};
use vigil_core::{ListEvent, ListSource, MapEvent, MapSource, Value};
use vigil_engine::{
    AggregateSpec, MaintainedKeyedSelect, MaintainedMap, MaintainedSequence, MaintainedValue,
    ProjectionKind, WatchSink,
};
use vigil_expr::{EvalOptions, EvalWatchFactory, Expr, SortOrder, WatchFactory};

/// Per-call configuration for the active operators.
///
/// Only `eval` participates in structural identity; the factory and
/// context are taken from whichever call constructs the shared instance.
#[derive(Clone)]
pub struct ActiveOptions {
    pub eval: EvalOptions,
    pub factory: Arc<dyn WatchFactory>,
    pub context: Option<Arc<dyn ExecutionContext>>,
}

impl Default for ActiveOptions {
    fn default() -> Self {
        Self {
            eval: EvalOptions::default(),
            factory: Arc::new(EvalWatchFactory),
            context: None,
        }
    }
}

impl ActiveOptions {
    /// Default options: pure evaluation, inline mutations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the evaluation options.
    pub fn with_eval(mut self, eval: EvalOptions) -> Self {
        self.eval = eval;
        self
    }

    /// Replaces the watch factory.
    pub fn with_factory(mut self, factory: Arc<dyn WatchFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Routes mutations through a serialized execution context.
    pub fn with_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }
}

fn build_sequence(
    source: Arc<dyn ListSource>,
    op: OpKind,
    kind: ProjectionKind,
    expr: Expr,
    options: ActiveOptions,
) -> ObservableSequence {
    let key = CacheKey::new(source.source_id(), op, expr.clone(), options.eval);
    let (core, _created) = cache::acquire(key.clone(), || {
        let core = Arc::new_cyclic(|weak: &Weak<SequenceCore>| {
            let sink: WatchSink = {
                let weak = weak.clone();
                Arc::new(move |comp| {
                    if let Some(core) = weak.upgrade() {
                        core.on_watch_change(comp);
                    }
                })
            };
            SequenceCore::new(
                MaintainedSequence::new(
                    source.clone(),
                    kind,
                    expr,
                    options.eval,
                    options.factory.clone(),
                    sink,
                ),
                options.context.clone(),
            )
        });
        wire_list_source(&source, &core, |core, event| core.on_source_event(event));
        core
    });
    ObservableSequence::new(core, key)
}

fn build_value(
    source: Arc<dyn ListSource>,
    op: OpKind,
    spec: AggregateSpec,
    expr: Expr,
    options: ActiveOptions,
) -> ObservableValue {
    let key = CacheKey::new(source.source_id(), op, expr.clone(), options.eval);
    let (core, _created) = cache::acquire(key.clone(), || {
        let core = Arc::new_cyclic(|weak: &Weak<ValueCore>| {
            let sink: WatchSink = {
                let weak = weak.clone();
                Arc::new(move |comp| {
                    if let Some(core) = weak.upgrade() {
                        core.on_watch_change(comp);
                    }
                })
            };
            ValueCore::new(
                ValueState::Aggregate(MaintainedValue::new(
                    source.clone(),
                    spec,
                    expr,
                    options.eval,
                    options.factory.clone(),
                    sink,
                )),
                options.context.clone(),
            )
        });
        wire_list_source(&source, &core, |core, event| core.on_source_event(event));
        core
    });
    ObservableValue::new(core, key)
}

fn wire_list_source<C>(
    source: &Arc<dyn ListSource>,
    core: &Arc<C>,
    deliver: impl Fn(&Arc<C>, ListEvent) + Send + Sync + 'static,
) where
    C: AsRef<crate::observable::CoreShell> + Send + Sync + 'static,
{
    let weak = Arc::downgrade(core);
    if let Some(sub) = source.subscribe_source(Arc::new(move |event: &ListEvent| {
        if let Some(core) = weak.upgrade() {
            deliver(&core, event.clone());
        }
    })) {
        let source = source.clone();
        (**core)
            .as_ref()
            .set_source_unsubscribe(Box::new(move || {
                source.unsubscribe_source(sub);
            }));
    }
}

fn wire_map_source(source: &Arc<dyn MapSource>, core: &Arc<MapCore>) {
    let weak = Arc::downgrade(core);
    if let Some(sub) = source.subscribe_source(Arc::new(move |event: &MapEvent| {
        if let Some(core) = weak.upgrade() {
            core.on_map_event(event.clone());
        }
    })) {
        let source = source.clone();
        (**core).as_ref().set_source_unsubscribe(Box::new(move || {
            source.unsubscribe_source(sub);
        }));
    }
}

/// One result item per source element: the selector's value.
pub fn active_select(
    source: Arc<dyn ListSource>,
    selector: Expr,
    options: ActiveOptions,
) -> ObservableSequence {
    build_sequence(source, OpKind::Select, ProjectionKind::Select, selector, options)
}

/// The source elements for which the predicate holds.
pub fn active_where(
    source: Arc<dyn ListSource>,
    predicate: Expr,
    options: ActiveOptions,
) -> ObservableSequence {
    build_sequence(source, OpKind::Where, ProjectionKind::Where, predicate, options)
}

/// The selector's list results, spliced flat.
pub fn active_select_many(
    source: Arc<dyn ListSource>,
    selector: Expr,
    options: ActiveOptions,
) -> ObservableSequence {
    build_sequence(
        source,
        OpKind::SelectMany,
        ProjectionKind::FlatMap,
        selector,
        options,
    )
}

/// Sum of the selector's values.
pub fn active_sum(
    source: Arc<dyn ListSource>,
    selector: Expr,
    options: ActiveOptions,
) -> ObservableValue {
    build_value(source, OpKind::Sum, AggregateSpec::Sum, selector, options)
}

/// Average of the selector's values; faults on an empty sequence.
pub fn active_average(
    source: Arc<dyn ListSource>,
    selector: Expr,
    options: ActiveOptions,
) -> ObservableValue {
    build_value(
        source,
        OpKind::Average,
        AggregateSpec::Average,
        selector,
        options,
    )
}

/// Live element count of the source.
pub fn active_count(source: Arc<dyn ListSource>, options: ActiveOptions) -> ObservableValue {
    build_value(
        source,
        OpKind::Count,
        AggregateSpec::Count,
        Expr::Input,
        options,
    )
}

/// Live count of elements matching the predicate; delegates to a Where
/// pipeline's length.
pub fn active_count_where(
    source: Arc<dyn ListSource>,
    predicate: Expr,
    options: ActiveOptions,
) -> ObservableValue {
    let key = CacheKey::new(
        source.source_id(),
        OpKind::CountWhere,
        predicate.clone(),
        options.eval,
    );
    let (core, _created) = cache::acquire(key.clone(), || {
        let core = Arc::new_cyclic(|weak: &Weak<ValueCore>| {
            let sink: WatchSink = {
                let weak = weak.clone();
                Arc::new(move |comp| {
                    if let Some(core) = weak.upgrade() {
                        core.on_watch_change(comp);
                    }
                })
            };
            ValueCore::new(
                ValueState::CountOf(MaintainedSequence::new(
                    source.clone(),
                    ProjectionKind::Where,
                    predicate,
                    options.eval,
                    options.factory.clone(),
                    sink,
                )),
                options.context.clone(),
            )
        });
        wire_list_source(&source, &core, |core, event| core.on_source_event(event));
        core
    });
    ObservableValue::new(core, key)
}

/// Minimum of the selector's values; faults on an empty sequence.
pub fn active_min(
    source: Arc<dyn ListSource>,
    selector: Expr,
    options: ActiveOptions,
) -> ObservableValue {
    build_value(source, OpKind::Min, AggregateSpec::Min, selector, options)
}

/// Maximum of the selector's values; faults on an empty sequence.
pub fn active_max(
    source: Arc<dyn ListSource>,
    selector: Expr,
    options: ActiveOptions,
) -> ObservableValue {
    build_value(source, OpKind::Max, AggregateSpec::Max, selector, options)
}

/// The element whose sort key comes first under `order`.
pub fn active_first(
    source: Arc<dyn ListSource>,
    key_selector: Expr,
    order: SortOrder,
    options: ActiveOptions,
) -> ObservableValue {
    build_value(
        source,
        OpKind::First(order),
        AggregateSpec::First(order),
        key_selector,
        options,
    )
}

/// The element whose sort key comes last under `order`.
pub fn active_last(
    source: Arc<dyn ListSource>,
    key_selector: Expr,
    order: SortOrder,
    options: ActiveOptions,
) -> ObservableValue {
    build_value(
        source,
        OpKind::Last(order),
        AggregateSpec::Last(order),
        key_selector,
        options,
    )
}

/// The source's only element; faults on empty or multiple membership.
pub fn active_single(source: Arc<dyn ListSource>, options: ActiveOptions) -> ObservableValue {
    build_value(
        source,
        OpKind::Single,
        AggregateSpec::Single,
        Expr::Input,
        options,
    )
}

/// The source's only element, or Null when empty; still faults on
/// multiple membership.
pub fn active_single_or_default(
    source: Arc<dyn ListSource>,
    options: ActiveOptions,
) -> ObservableValue {
    build_value(
        source,
        OpKind::SingleOrDefault,
        AggregateSpec::SingleOrDefault(Value::Null),
        Expr::Input,
        options,
    )
}

/// A derived map keyed by `key_selector` with `value_selector` values,
/// with duplicate/null key fault tracking.
pub fn to_active_map(
    source: Arc<dyn ListSource>,
    key_selector: Expr,
    value_selector: Expr,
    options: ActiveOptions,
) -> ObservableMap {
    let expr = Expr::entry(key_selector, value_selector);
    let key = CacheKey::new(source.source_id(), OpKind::ToMap, expr.clone(), options.eval);
    let (core, _created) = cache::acquire(key.clone(), || {
        let core = Arc::new_cyclic(|weak: &Weak<MapCore>| {
            let sink: WatchSink = {
                let weak = weak.clone();
                Arc::new(move |comp| {
                    if let Some(core) = weak.upgrade() {
                        core.on_watch_change(comp);
                    }
                })
            };
            MapCore::new(
                MapState::Projected(MaintainedMap::new(
                    source.clone(),
                    expr,
                    options.eval,
                    options.factory.clone(),
                    sink,
                )),
                options.context.clone(),
            )
        });
        wire_list_source(&source, &core, |core, event| core.on_list_event(event));
        core
    });
    ObservableMap::new(core, key)
}

/// A key-preserving select over a keyed source.
pub fn active_map_values(
    source: Arc<dyn MapSource>,
    selector: Expr,
    options: ActiveOptions,
) -> ObservableMap {
    let key = CacheKey::new(
        source.source_id(),
        OpKind::MapValues,
        selector.clone(),
        options.eval,
    );
    let (core, _created) = cache::acquire(key.clone(), || {
        let core = Arc::new_cyclic(|weak: &Weak<MapCore>| {
            let sink: WatchSink = {
                let weak = weak.clone();
                Arc::new(move |comp| {
                    if let Some(core) = weak.upgrade() {
                        core.on_watch_change(comp);
                    }
                })
            };
            MapCore::new(
                MapState::Selected(MaintainedKeyedSelect::new(
                    source.clone(),
                    selector,
                    options.eval,
                    options.factory.clone(),
                    sink,
                )),
                options.context.clone(),
            )
        });
        wire_map_source(&source, &core);
        core
    });
    ObservableMap::new(core, key)
}
