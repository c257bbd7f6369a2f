//! Vigil Expr - Expression AST, evaluator, and watched-expression
//! primitive for the Vigil engine.
//!
//! A transformation is a declarative expression tree (`Expr`) with deep
//! structural equality, evaluated against one source element under
//! `EvalOptions`. The `Watch`/`WatchFactory` traits are the seam between
//! the engine and whatever drives recomputation: the engine only ever sees
//! a handle with a current value, a current fault, and a change stream.
//!
//! # Example
//!
//! ```rust
//! use vigil_core::Value;
//! use vigil_expr::{eval, EvalOptions, Expr};
//!
//! // age > 18, where the element is a [id, age] record
//! let predicate = Expr::gt(Expr::field(1), Expr::literal(18i64));
//! let element = Value::List(vec![Value::Int64(1), Value::Int64(25)]);
//!
//! let result = eval(&predicate, &element, &EvalOptions::new()).unwrap();
//! assert_eq!(result, Value::Boolean(true));
//! ```

mod ast;
mod eval;
mod fingerprint;
mod options;
mod watch;

pub use ast::{BinaryOp, Expr, SortOrder, UnaryOp};
pub use eval::eval;
pub use fingerprint::{fingerprint_expr, fingerprint_options, fingerprint_order};
pub use options::EvalOptions;
pub use watch::{
    EvalWatch, EvalWatchFactory, ManualWatch, ManualWatchFactory, Watch, WatchCallback,
    WatchFactory, WatchGuard,
};
