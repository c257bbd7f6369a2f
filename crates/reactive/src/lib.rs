//! Vigil Reactive - observable result views over the Vigil engine.
//!
//! This crate is the public surface of the view-maintenance engine. The
//! active operators (`active_where`, `active_select`, `active_sum`, ...)
//! hand out observable views whose results stay continuously correct as
//! the source mutates; equivalent calls share one live engine instance
//! through the process-wide instance cache.
//!
//! # Key Features
//!
//! - `active_*` operators over `ActiveList`/`ActiveMap` sources
//! - result-space structural event and fault event subscriptions
//! - structural-key memoization with reference-counted teardown
//! - optional serialized execution contexts for cross-thread mutation
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_core::{ActiveList, Value};
//! use vigil_expr::Expr;
//! use vigil_reactive::{active_where, ActiveOptions};
//!
//! let list = ActiveList::from_values(vec![
//!     Value::Int64(1),
//!     Value::Int64(15),
//! ]);
//!
//! let adults = active_where(
//!     Arc::new(list.clone()),
//!     Expr::gt(Expr::Input, Expr::literal(10i64)),
//!     ActiveOptions::new(),
//! );
//! assert_eq!(adults.snapshot(), vec![Value::Int64(15)]);
//!
//! list.push(Value::Int64(20));
//! assert_eq!(adults.len(), 2);
//!
//! adults.dispose();
//! ```

pub mod cache;
pub mod context;
pub mod observable;
pub mod ops;

pub use cache::{CacheKey, OpKind};
pub use context::{ExecutionContext, InlineContext, QueueContext};
pub use observable::{ObservableMap, ObservableSequence, ObservableValue, ValueEvent};
pub use ops::{
    active_average, active_count, active_count_where, active_first, active_last,
    active_map_values, active_max, active_min, active_select, active_select_many, active_single,
    active_single_or_default, active_sum, active_where, to_active_map, ActiveOptions,
};

// Re-export commonly used types from dependencies.
pub use vigil_core::{ActiveList, ActiveMap, Fault, ListEvent, MapEvent, Value};
pub use vigil_engine::FaultChange;
pub use vigil_expr::{EvalOptions, Expr, SortOrder};
