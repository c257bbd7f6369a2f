//! Process-wide instance cache.
//!
//! Equivalent calls share one live engine instance: the cache keys on the
//! source's identity plus deep structural equality of the operator,
//! transformation, and options. Entries are reference counted; an instance
//! is constructed at the 0→1 transition and torn down at 1→0, with the
//! teardown running outside the global lock so unrelated engines are never
//! serialized through it.

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::{Arc, OnceLock};
use tracing::debug;
use vigil_core::SourceId;
use vigil_expr::{EvalOptions, Expr, SortOrder};

/// The operator a cached instance implements.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Select,
    Where,
    SelectMany,
    Sum,
    Average,
    Count,
    CountWhere,
    Min,
    Max,
    First(SortOrder),
    Last(SortOrder),
    Single,
    SingleOrDefault,
    ToMap,
    MapValues,
}

/// Structural identity of one engine instance.
///
/// The source participates by reference identity (its id), the
/// transformation and options by deep structural equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: SourceId,
    pub op: OpKind,
    pub expr: Expr,
    pub options: EvalOptions,
}

impl CacheKey {
    /// Creates a key.
    pub fn new(source: SourceId, op: OpKind, expr: Expr, options: EvalOptions) -> Self {
        Self {
            source,
            op,
            expr,
            options,
        }
    }
}

/// A cached instance's teardown hook, run exactly once at refcount zero.
pub trait Retained: Send + Sync {
    /// Unsubscribes everything and disposes tracked computations.
    fn teardown(&self);
}

struct Entry {
    any: Arc<dyn Any + Send + Sync>,
    retained: Arc<dyn Retained>,
    refs: usize,
}

fn registry() -> &'static Mutex<HashMap<CacheKey, Entry>> {
    static REGISTRY: OnceLock<Mutex<HashMap<CacheKey, Entry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Looks up or constructs the instance for `key`.
///
/// Returns the shared instance and whether this call constructed it.
pub fn acquire<T, F>(key: CacheKey, build: F) -> (Arc<T>, bool)
where
    T: Retained + Send + Sync + 'static,
    F: FnOnce() -> Arc<T>,
{
    let mut entries = registry().lock();
    if let Some(entry) = entries.get_mut(&key) {
        entry.refs += 1;
        let any = entry.any.clone();
        drop(entries);
        debug!(op = ?key.op, source = key.source, "instance cache hit");
        match any.downcast::<T>() {
            Ok(instance) => (instance, false),
            Err(_) => panic!(
                "structural violation: instance cache entry for {:?} holds a different type",
                key.op
            ),
        }
    } else {
        debug!(op = ?key.op, source = key.source, "instance cache miss");
        let instance = build();
        entries.insert(
            key,
            Entry {
                any: instance.clone(),
                retained: instance.clone(),
                refs: 1,
            },
        );
        (instance, true)
    }
}

/// Releases one reference to `key`'s instance.
///
/// At the 1→0 transition the entry is removed and its teardown runs, after
/// the global lock is released. Returns true if the entry existed.
pub fn release(key: &CacheKey) -> bool {
    let torn_down = {
        let mut entries = registry().lock();
        match entries.get_mut(key) {
            None => return false,
            Some(entry) => {
                entry.refs -= 1;
                if entry.refs == 0 {
                    entries.remove(key).map(|entry| entry.retained)
                } else {
                    None
                }
            }
        }
    };
    if let Some(retained) = torn_down {
        debug!(op = ?key.op, source = key.source, "instance cache teardown");
        retained.teardown();
    }
    true
}

/// Current reference count for `key`; 0 when absent. Test hook.
pub fn ref_count(key: &CacheKey) -> usize {
    registry().lock().get(key).map(|entry| entry.refs).unwrap_or(0)
}
