//! Structural fingerprints for expressions and options.
//!
//! Fingerprints give the instance cache and diagnostics a compact identity
//! for a transformation. Structurally equal trees always produce the same
//! fingerprint; cache correctness does not rest on fingerprints alone (the
//! cache key stores the full tree), so a collision costs nothing.

use crate::ast::{Expr, SortOrder};
use crate::options::EvalOptions;
use core::hash::Hasher;
use vigil_core::Value;

/// FNV-1a hasher used for fingerprinting.
#[derive(Default)]
struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self {
            state: Self::FNV_OFFSET,
        }
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= *byte as u64;
            self.state = self.state.wrapping_mul(Self::FNV_PRIME);
        }
    }
}

/// Computes a structural fingerprint for an expression tree.
pub fn fingerprint_expr(expr: &Expr) -> u64 {
    let mut hasher = FnvHasher::new();
    hash_expr(expr, &mut hasher);
    hasher.finish()
}

/// Computes a fingerprint for evaluation options.
pub fn fingerprint_options(options: &EvalOptions) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(b"options");
    hasher.write(&[options.strict_nulls as u8]);
    hasher.finish()
}

/// Computes a fingerprint for a sort direction.
pub fn fingerprint_order(order: SortOrder) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(b"order");
    hasher.write(&[order as u8]);
    hasher.finish()
}

fn hash_expr<H: Hasher>(expr: &Expr, hasher: &mut H) {
    match expr {
        Expr::Input => hasher.write(b"input"),
        Expr::Literal(value) => {
            hasher.write(b"lit");
            hash_value(value, hasher);
        }
        Expr::Index { expr, index } => {
            hasher.write(b"index");
            hasher.write(&index.to_le_bytes());
            hash_expr(expr, hasher);
        }
        Expr::Binary { left, op, right } => {
            hasher.write(b"binop");
            hasher.write(&[*op as u8]);
            hash_expr(left, hasher);
            hash_expr(right, hasher);
        }
        Expr::Unary { op, expr } => {
            hasher.write(b"unop");
            hasher.write(&[*op as u8]);
            hash_expr(expr, hasher);
        }
        Expr::Tuple(items) => {
            hasher.write(b"tuple");
            hasher.write(&items.len().to_le_bytes());
            for item in items {
                hash_expr(item, hasher);
            }
        }
    }
}

fn hash_value<H: Hasher>(value: &Value, hasher: &mut H) {
    match value {
        Value::Null => hasher.write(b"null"),
        Value::Boolean(b) => {
            hasher.write(b"bool");
            hasher.write(&[*b as u8]);
        }
        Value::Int64(i) => {
            hasher.write(b"i64");
            hasher.write(&i.to_le_bytes());
        }
        Value::Float64(f) => {
            hasher.write(b"f64");
            hasher.write(&f.to_bits().to_le_bytes());
        }
        Value::String(s) => {
            hasher.write(b"str");
            hasher.write(s.as_bytes());
        }
        Value::List(items) => {
            hasher.write(b"list");
            hasher.write(&items.len().to_le_bytes());
            for item in items {
                hash_value(item, hasher);
            }
        }
    }
}
