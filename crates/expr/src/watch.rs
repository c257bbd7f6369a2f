//! The watched-expression primitive.
//!
//! A `Watch` is a live handle over one (transformation, input) evaluation:
//! it exposes the current value or fault and notifies subscribers when
//! either changes. The engine consumes watches only through the `Watch` and
//! `WatchFactory` traits, so what actually drives recomputation is a
//! collaborator concern.
//!
//! Two implementations ship here: `EvalWatch`, the pure evaluator whose
//! value never changes after creation, and `ManualWatch`, whose value is
//! pushed from outside, standing in for transformations that read external
//! mutable state.

use crate::ast::Expr;
use crate::eval::eval;
use crate::options::EvalOptions;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use vigil_core::{Fault, SubscriptionId, SubscriptionManager, Value};

/// Callback invoked when a watch's value or fault changes.
pub type WatchCallback = Arc<dyn Fn() + Send + Sync>;

/// Live handle over one watched evaluation.
pub trait Watch: Send + Sync {
    /// Current value; None while the watch is faulted.
    fn current_value(&self) -> Option<Value>;

    /// Current fault; None while the watch holds a value.
    fn current_fault(&self) -> Option<Fault>;

    /// Subscribes to value/fault changes.
    fn subscribe(&self, callback: WatchCallback) -> SubscriptionId;

    /// Releases a subscription. Returns true if it existed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Creates watches for the pool; one factory per engine instance.
pub trait WatchFactory: Send + Sync {
    /// Creates a watch evaluating `expr` against `input`.
    fn create(&self, expr: &Expr, input: &Value, options: &EvalOptions) -> Arc<dyn Watch>;
}

/// Subscription token that releases itself when dropped.
///
/// Teardown is deterministic: the consumer's guard drops (unsubscribing)
/// before the watch itself can be released.
pub struct WatchGuard {
    watch: Arc<dyn Watch>,
    id: SubscriptionId,
}

impl WatchGuard {
    /// Pairs a watch with a subscription on it.
    pub fn new(watch: Arc<dyn Watch>, id: SubscriptionId) -> Self {
        Self { watch, id }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.watch.unsubscribe(self.id);
    }
}

/// A watch over a pure expression: evaluated once at creation, never
/// notifies.
pub struct EvalWatch {
    result: Result<Value, Fault>,
    subscriptions: Mutex<SubscriptionManager<()>>,
}

impl EvalWatch {
    /// Evaluates `expr` against `input` and captures the outcome.
    pub fn new(expr: &Expr, input: &Value, options: &EvalOptions) -> Self {
        Self {
            result: eval(expr, input, options),
            subscriptions: Mutex::new(SubscriptionManager::new()),
        }
    }
}

impl Watch for EvalWatch {
    fn current_value(&self) -> Option<Value> {
        self.result.as_ref().ok().cloned()
    }

    fn current_fault(&self) -> Option<Fault> {
        self.result.as_ref().err().cloned()
    }

    fn subscribe(&self, callback: WatchCallback) -> SubscriptionId {
        self.subscriptions
            .lock()
            .subscribe(Arc::new(move |_: &()| callback()))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.lock().unsubscribe(id)
    }
}

/// Factory for `EvalWatch`; the default for engines over pure
/// transformations.
#[derive(Default)]
pub struct EvalWatchFactory;

impl WatchFactory for EvalWatchFactory {
    fn create(&self, expr: &Expr, input: &Value, options: &EvalOptions) -> Arc<dyn Watch> {
        Arc::new(EvalWatch::new(expr, input, options))
    }
}

/// A watch whose value is pushed from outside.
///
/// Starts from the pure evaluation of its expression and thereafter takes
/// whatever `set_value`/`set_fault` push, notifying subscribers on each
/// change.
pub struct ManualWatch {
    state: RwLock<Result<Value, Fault>>,
    subscriptions: Mutex<SubscriptionManager<()>>,
}

impl ManualWatch {
    /// Creates a manual watch seeded with the pure evaluation result.
    pub fn new(expr: &Expr, input: &Value, options: &EvalOptions) -> Self {
        Self {
            state: RwLock::new(eval(expr, input, options)),
            subscriptions: Mutex::new(SubscriptionManager::new()),
        }
    }

    /// Pushes a new value and notifies subscribers.
    pub fn set_value(&self, value: Value) {
        {
            let mut state = self.state.write();
            *state = Ok(value);
        }
        self.notify();
    }

    /// Pushes a fault and notifies subscribers.
    pub fn set_fault(&self, fault: Fault) {
        {
            let mut state = self.state.write();
            *state = Err(fault);
        }
        self.notify();
    }

    fn notify(&self) {
        let callbacks = self.subscriptions.lock().callbacks();
        for callback in callbacks {
            callback(&());
        }
    }
}

impl Watch for ManualWatch {
    fn current_value(&self) -> Option<Value> {
        self.state.read().as_ref().ok().cloned()
    }

    fn current_fault(&self) -> Option<Fault> {
        self.state.read().as_ref().err().cloned()
    }

    fn subscribe(&self, callback: WatchCallback) -> SubscriptionId {
        self.subscriptions
            .lock()
            .subscribe(Arc::new(move |_: &()| callback()))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.lock().unsubscribe(id)
    }
}

/// Factory producing `ManualWatch` handles and keeping a registry of them
/// so callers can drive value changes per element.
#[derive(Default)]
pub struct ManualWatchFactory {
    handles: Mutex<Vec<(Value, Arc<ManualWatch>)>>,
}

impl ManualWatchFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first handle created for `input`, if any.
    ///
    /// The pool shares one watch per distinct element, so the first handle
    /// is the live one.
    pub fn handle_for(&self, input: &Value) -> Option<Arc<ManualWatch>> {
        self.handles
            .lock()
            .iter()
            .find(|(element, _)| element == input)
            .map(|(_, handle)| handle.clone())
    }

    /// Number of handles created so far.
    pub fn created_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl WatchFactory for ManualWatchFactory {
    fn create(&self, expr: &Expr, input: &Value, options: &EvalOptions) -> Arc<dyn Watch> {
        let handle = Arc::new(ManualWatch::new(expr, input, options));
        self.handles.lock().push((input.clone(), handle.clone()));
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_eval_watch_value() {
        let expr = Expr::mul(Expr::Input, Expr::literal(2i64));
        let watch = EvalWatch::new(&expr, &Value::Int64(4), &EvalOptions::new());

        assert_eq!(watch.current_value(), Some(Value::Int64(8)));
        assert_eq!(watch.current_fault(), None);
    }

    #[test]
    fn test_eval_watch_fault() {
        let expr = Expr::div(Expr::literal(1i64), Expr::Input);
        let watch = EvalWatch::new(&expr, &Value::Int64(0), &EvalOptions::new());

        assert_eq!(watch.current_value(), None);
        assert!(matches!(watch.current_fault(), Some(Fault::Evaluation(_))));
    }

    #[test]
    fn test_manual_watch_push() {
        let watch = ManualWatch::new(&Expr::Input, &Value::Int64(1), &EvalOptions::new());

        let fired = Arc::new(AtomicUsize::new(0));
        let sink = fired.clone();
        watch.subscribe(Arc::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        watch.set_value(Value::Int64(2));
        assert_eq!(watch.current_value(), Some(Value::Int64(2)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        watch.set_fault(Fault::evaluation("boom"));
        assert_eq!(watch.current_value(), None);
        assert!(watch.current_fault().is_some());
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_watch_guard_unsubscribes_on_drop() {
        let manual = Arc::new(ManualWatch::new(
            &Expr::Input,
            &Value::Int64(1),
            &EvalOptions::new(),
        ));
        let watch: Arc<dyn Watch> = manual.clone();

        let fired = Arc::new(AtomicUsize::new(0));
        let sink = fired.clone();
        let id = watch.subscribe(Arc::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        let guard = WatchGuard::new(watch, id);
        manual.set_value(Value::Int64(2));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(guard);
        manual.set_value(Value::Int64(3));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_registry() {
        let factory = ManualWatchFactory::new();
        let expr = Expr::Input;
        let options = EvalOptions::new();

        let watch = factory.create(&expr, &Value::Int64(7), &options);
        assert_eq!(factory.created_count(), 1);
        assert_eq!(watch.current_value(), Some(Value::Int64(7)));

        let handle = factory.handle_for(&Value::Int64(7)).unwrap();
        handle.set_value(Value::Int64(9));
        assert_eq!(watch.current_value(), Some(Value::Int64(9)));

        assert!(factory.handle_for(&Value::Int64(8)).is_none());
    }
}
