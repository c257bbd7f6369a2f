//! Expression evaluation.
//!
//! Evaluates an expression tree against one source element. Evaluation
//! failures surface as `Fault::Evaluation` so the engine can record them
//! per element and keep running.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::options::EvalOptions;
use vigil_core::{Fault, Value};

/// Evaluates `expr` against `input`.
pub fn eval(expr: &Expr, input: &Value, options: &EvalOptions) -> Result<Value, Fault> {
    match expr {
        Expr::Input => Ok(input.clone()),
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Index { expr, index } => {
            let target = eval(expr, input, options)?;
            match target {
                Value::List(items) => match items.get(*index) {
                    Some(item) => Ok(item.clone()),
                    None => Err(Fault::evaluation(format!(
                        "index {} out of bounds for list of length {}",
                        index,
                        items.len()
                    ))),
                },
                Value::Null => null_operand(options, "index into null"),
                other => Err(Fault::evaluation(format!(
                    "cannot index into {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Binary { left, op, right } => {
            let lhs = eval(left, input, options)?;
            let rhs = eval(right, input, options)?;
            eval_binary(*op, &lhs, &rhs, options)
        }
        Expr::Unary { op, expr } => {
            let value = eval(expr, input, options)?;
            eval_unary(*op, &value, options)
        }
        Expr::Tuple(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, input, options)?);
            }
            Ok(Value::List(values))
        }
    }
}

fn null_operand(options: &EvalOptions, context: &str) -> Result<Value, Fault> {
    if options.strict_nulls {
        Err(Fault::evaluation(format!("null operand: {}", context)))
    } else {
        Ok(Value::Null)
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    options: &EvalOptions,
) -> Result<Value, Fault> {
    match op {
        // Equality is total and treats null as an ordinary value.
        BinaryOp::Eq => Ok(Value::Boolean(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Boolean(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if lhs.is_null() || rhs.is_null() {
                return null_operand(options, "ordering comparison");
            }
            let ordering = compare(lhs, rhs)?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Boolean(result))
        }
        BinaryOp::And | BinaryOp::Or => {
            if lhs.is_null() || rhs.is_null() {
                return null_operand(options, "logical operation");
            }
            match (lhs.as_bool(), rhs.as_bool()) {
                (Some(a), Some(b)) => Ok(Value::Boolean(if op == BinaryOp::And {
                    a && b
                } else {
                    a || b
                })),
                _ => Err(Fault::evaluation(format!(
                    "logical operator on {} and {}",
                    lhs.type_name(),
                    rhs.type_name()
                ))),
            }
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            if lhs.is_null() || rhs.is_null() {
                return null_operand(options, "arithmetic operation");
            }
            eval_arithmetic(op, lhs, rhs)
        }
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<core::cmp::Ordering, Fault> {
    let comparable = match (lhs, rhs) {
        _ if lhs.is_numeric() && rhs.is_numeric() => true,
        (Value::Boolean(_), Value::Boolean(_))
        | (Value::String(_), Value::String(_))
        | (Value::List(_), Value::List(_)) => true,
        _ => false,
    };
    if comparable {
        Ok(lhs.cmp(rhs))
    } else {
        Err(Fault::evaluation(format!(
            "cannot compare {} with {}",
            lhs.type_name(),
            rhs.type_name()
        )))
    }
}

fn eval_arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Fault> {
    if !lhs.is_numeric() || !rhs.is_numeric() {
        return Err(Fault::evaluation(format!(
            "arithmetic on {} and {}",
            lhs.type_name(),
            rhs.type_name()
        )));
    }

    if let (Value::Int64(a), Value::Int64(b)) = (lhs, rhs) {
        return match op {
            BinaryOp::Add => Ok(lhs
                .add_numeric(rhs)
                .unwrap_or(Value::Float64(*a as f64 + *b as f64))),
            BinaryOp::Sub => Ok(lhs
                .sub_numeric(rhs)
                .unwrap_or(Value::Float64(*a as f64 - *b as f64))),
            BinaryOp::Mul => Ok(match a.checked_mul(*b) {
                Some(product) => Value::Int64(product),
                None => Value::Float64(*a as f64 * *b as f64),
            }),
            BinaryOp::Div => {
                if *b == 0 {
                    Err(Fault::evaluation("division by zero"))
                } else {
                    Ok(Value::Int64(a / b))
                }
            }
            BinaryOp::Mod => {
                if *b == 0 {
                    Err(Fault::evaluation("modulo by zero"))
                } else {
                    Ok(Value::Int64(a % b))
                }
            }
            _ => unreachable!("non-arithmetic operator {:?} in arithmetic path", op),
        };
    }

    // Mixed or float operands compute in f64.
    let a = lhs.numeric().unwrap_or_default();
    let b = rhs.numeric().unwrap_or_default();
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => unreachable!("non-arithmetic operator {:?} in arithmetic path", op),
    };
    Ok(Value::Float64(result))
}

fn eval_unary(op: UnaryOp, value: &Value, options: &EvalOptions) -> Result<Value, Fault> {
    match op {
        UnaryOp::Not => {
            if value.is_null() {
                return null_operand(options, "logical negation");
            }
            match value.as_bool() {
                Some(b) => Ok(Value::Boolean(!b)),
                None => Err(Fault::evaluation(format!(
                    "logical negation of {}",
                    value.type_name()
                ))),
            }
        }
        UnaryOp::Neg => {
            if value.is_null() {
                return null_operand(options, "numeric negation");
            }
            match value {
                Value::Int64(v) => Ok(match v.checked_neg() {
                    Some(negated) => Value::Int64(negated),
                    None => Value::Float64(-(*v as f64)),
                }),
                Value::Float64(v) => Ok(Value::Float64(-v)),
                other => Err(Fault::evaluation(format!(
                    "numeric negation of {}",
                    other.type_name()
                ))),
            }
        }
        UnaryOp::IsNull => Ok(Value::Boolean(value.is_null())),
        UnaryOp::IsNotNull => Ok(Value::Boolean(!value.is_null())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(expr: &Expr, input: Value) -> Result<Value, Fault> {
        eval(expr, &input, &EvalOptions::new())
    }

    #[test]
    fn test_input_and_literal() {
        assert_eq!(run(&Expr::Input, Value::Int64(5)), Ok(Value::Int64(5)));
        assert_eq!(
            run(&Expr::literal("x"), Value::Null),
            Ok(Value::from("x"))
        );
    }

    #[test]
    fn test_field_access() {
        let record = Value::List(vec![Value::Int64(1), Value::from("alice")]);
        assert_eq!(run(&Expr::field(1), record.clone()), Ok(Value::from("alice")));
        assert!(run(&Expr::field(5), record).is_err());
        assert!(run(&Expr::field(0), Value::Int64(3)).is_err());
    }

    #[test]
    fn test_comparisons() {
        let gt = Expr::gt(Expr::Input, Expr::literal(10i64));
        assert_eq!(run(&gt, Value::Int64(11)), Ok(Value::Boolean(true)));
        assert_eq!(run(&gt, Value::Int64(10)), Ok(Value::Boolean(false)));
        // Mixed numerics compare numerically.
        assert_eq!(run(&gt, Value::Float64(10.5)), Ok(Value::Boolean(true)));
        // Incomparable shapes fault.
        assert!(run(&gt, Value::from("x")).is_err());
    }

    #[test]
    fn test_equality_with_null() {
        let eq = Expr::eq(Expr::Input, Expr::literal(Value::Null));
        assert_eq!(run(&eq, Value::Null), Ok(Value::Boolean(true)));
        assert_eq!(run(&eq, Value::Int64(1)), Ok(Value::Boolean(false)));
    }

    #[test]
    fn test_arithmetic() {
        let double = Expr::mul(Expr::Input, Expr::literal(2i64));
        assert_eq!(run(&double, Value::Int64(21)), Ok(Value::Int64(42)));
        assert_eq!(run(&double, Value::Float64(1.5)), Ok(Value::Float64(3.0)));

        let div = Expr::div(Expr::literal(10i64), Expr::Input);
        assert_eq!(run(&div, Value::Int64(2)), Ok(Value::Int64(5)));
        assert!(run(&div, Value::Int64(0)).is_err());
    }

    #[test]
    fn test_logic() {
        let both = Expr::and(
            Expr::gt(Expr::Input, Expr::literal(0i64)),
            Expr::lt(Expr::Input, Expr::literal(10i64)),
        );
        assert_eq!(run(&both, Value::Int64(5)), Ok(Value::Boolean(true)));
        assert_eq!(run(&both, Value::Int64(15)), Ok(Value::Boolean(false)));

        let negated = Expr::not(Expr::is_null(Expr::Input));
        assert_eq!(run(&negated, Value::Int64(1)), Ok(Value::Boolean(true)));
    }

    #[test]
    fn test_null_propagation_vs_strict() {
        let add = Expr::add(Expr::Input, Expr::literal(1i64));

        assert_eq!(
            eval(&add, &Value::Null, &EvalOptions::new()),
            Ok(Value::Null)
        );
        assert!(eval(&add, &Value::Null, &EvalOptions::strict()).is_err());
    }

    #[test]
    fn test_tuple() {
        let pair = Expr::entry(Expr::field(0), Expr::field(1));
        let record = Value::List(vec![Value::from("k"), Value::Int64(7)]);
        assert_eq!(
            run(&pair, record),
            Ok(Value::List(vec![Value::from("k"), Value::Int64(7)]))
        );
    }

    #[test]
    fn test_negation() {
        assert_eq!(
            run(&Expr::neg(Expr::Input), Value::Int64(3)),
            Ok(Value::Int64(-3))
        );
        assert!(run(&Expr::neg(Expr::Input), Value::from("x")).is_err());
    }
}
