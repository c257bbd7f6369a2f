//! Vigil Engine - incremental view maintenance over watched computations.
//!
//! This crate implements the machinery that keeps a derived result
//! continuously correct as its source mutates, without recomputation from
//! scratch:
//!
//! - `SequencePool` / `MapPool`: one reference-counted tracked computation
//!   per distinct source element, shared across equal occurrences
//! - `DiffTranslator`: re-expresses structural events in the result's
//!   index space via per-position expansion widths
//! - `SumState`/`AverageState`/`ExtremumState`/`SelectionState`/
//!   `SingleState`: O(1) aggregate maintenance, rescanning only when the
//!   extremum is provably lost
//! - `KeyedProjection`: derived-map maintenance with duplicate/null key
//!   fault tracking
//! - `MaintainedSequence`/`MaintainedValue`/`MaintainedMap`/
//!   `MaintainedKeyedSelect`: the pipelines tying pools to derived state
//!
//! The observable layer (`vigil-reactive`) wraps these pipelines with
//! locking, subscriptions, and the instance cache.

pub mod aggregate;
pub mod keyed;
pub mod maintain;
pub mod pool;
pub mod translate;

pub use aggregate::{
    AverageState, ExtremumState, Preference, SelectionState, SingleState, SumState,
};
pub use keyed::{KeyedProjection, Serial};
pub use maintain::{
    AggregateSpec, FaultChange, MaintainedKeyedSelect, MaintainedMap, MaintainedSequence,
    MaintainedValue, ProjectionKind,
};
pub use pool::{
    CompId, CompOutput, MapPool, MapPoolEvent, MapWatchChange, PoolEntry, PoolEvent, SequencePool,
    WatchChange, WatchSink,
};
pub use translate::DiffTranslator;
