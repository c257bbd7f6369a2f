//! Vigil Core - Core types for the Vigil incremental view-maintenance engine.
//!
//! This crate provides the foundational types shared by every layer of the
//! engine:
//!
//! - `Value`: runtime values flowing through sources, transformations, and
//!   results, with a total ordering so they can serve as map keys and
//!   comparer inputs
//! - `ListEvent` / `MapEvent`: structural diff events describing changes to
//!   an ordered or keyed collection
//! - `Fault`: the recoverable per-element/per-aggregate fault taxonomy
//! - `ActiveList` / `ActiveMap`: mutable source collections that raise diff
//!   events to subscribers
//! - `SubscriptionManager`: observer registration with unsubscribe tokens
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_core::{ActiveList, ListEvent, Value};
//!
//! let list = ActiveList::from_values(vec![Value::Int64(1), Value::Int64(2)]);
//! let sub = list.subscribe_events(Arc::new(|event: &ListEvent| {
//!     assert!(matches!(event, ListEvent::Add { index: 2, .. }));
//! }));
//! list.push(Value::Int64(3));
//! list.unsubscribe(sub);
//! assert_eq!(list.len(), 3);
//! ```

mod event;
mod fault;
mod source;
mod subscription;
mod value;

pub use event::{ListEvent, MapEvent};
pub use fault::{Error, Fault, Result};
pub use source::{
    next_source_id, ActiveList, ActiveMap, FrozenList, ListSource, MapSource, SourceId,
};
pub use subscription::{EventCallback, SubscriptionId, SubscriptionManager};
pub use value::Value;
