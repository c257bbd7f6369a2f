//! Evaluation options.
//!
//! Options participate in sharing and cache identity alongside the
//! expression tree, so two evaluations are interchangeable only when both
//! tree and options are structurally equal.

/// Options controlling expression evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EvalOptions {
    /// When set, a `Null` operand in indexing, arithmetic, or ordering
    /// faults the evaluation instead of propagating `Null`.
    pub strict_nulls: bool,
}

impl EvalOptions {
    /// Default options: nulls propagate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with strict null handling.
    pub fn strict() -> Self {
        Self { strict_nulls: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_identity() {
        assert_eq!(EvalOptions::new(), EvalOptions::default());
        assert_ne!(EvalOptions::new(), EvalOptions::strict());
    }
}
