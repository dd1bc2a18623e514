//! Value operators
//!
//! Arithmetic, comparison, math builtins, and reduction application over
//! runtime values. Operand domains always agree by the time execution
//! reaches here — the checker inserted the casts — so a variant mismatch
//! is a malformed graph, reported as an error string the executor wraps
//! with task context.

use tessel_ir::lir::{BinOp, MathFn, UnOp};
use tessel_ir::{Primitive, ReduceOp, Type};

use crate::types::Value;

type OpResult = std::result::Result<Value, String>;

pub fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> OpResult {
    use BinOp::*;
    match op {
        Add | Sub | Mul | Div | Mod => arith(op, lhs, rhs),
        Eq | Ne | Lt | Le | Gt | Ge => compare(op, lhs, rhs),
        And | Or => match (lhs.as_bool(), rhs.as_bool()) {
            (Some(a), Some(b)) => Ok(Value::Bool(if op == And { a && b } else { a || b })),
            _ => Err("logical operator on non-bool".to_string()),
        },
        Pow => Err("pow reaches execution as a math call".to_string()),
    }
}

fn arith(op: BinOp, lhs: &Value, rhs: &Value) -> OpResult {
    use BinOp::*;
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let v = match op {
                Add => a.wrapping_add(*b),
                Sub => a.wrapping_sub(*b),
                Mul => a.wrapping_mul(*b),
                Div => {
                    if *b == 0 {
                        return Err("integer division by zero".to_string());
                    }
                    a.wrapping_div(*b)
                }
                Mod => {
                    if *b == 0 {
                        return Err("integer modulo by zero".to_string());
                    }
                    a.wrapping_rem(*b)
                }
                _ => unreachable!("arith called with non-arithmetic op"),
            };
            Ok(Value::Int(v))
        }
        (Value::Uint(a), Value::Uint(b)) => {
            let v = match op {
                Add => a.wrapping_add(*b),
                Sub => a.wrapping_sub(*b),
                Mul => a.wrapping_mul(*b),
                Div => {
                    if *b == 0 {
                        return Err("integer division by zero".to_string());
                    }
                    a / b
                }
                Mod => {
                    if *b == 0 {
                        return Err("integer modulo by zero".to_string());
                    }
                    a % b
                }
                _ => unreachable!("arith called with non-arithmetic op"),
            };
            Ok(Value::Uint(v))
        }
        (Value::Float(a), Value::Float(b)) => {
            let v = match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                Mod => a % b,
                _ => unreachable!("arith called with non-arithmetic op"),
            };
            Ok(Value::Float(v))
        }
        // elementwise vector ⊕ vector
        (Value::Vector(a), Value::Vector(b)) if a.len() == b.len() => Ok(Value::Vector(
            a.iter()
                .zip(b)
                .map(|(x, y)| arith(op, x, y))
                .collect::<Result<_, _>>()?,
        )),
        // vector scaled by scalar, either side
        (Value::Vector(a), s) if s.as_f64().is_some() => Ok(Value::Vector(
            a.iter().map(|x| arith(op, x, s)).collect::<Result<_, _>>()?,
        )),
        (s, Value::Vector(b)) if s.as_f64().is_some() => Ok(Value::Vector(
            b.iter().map(|y| arith(op, s, y)).collect::<Result<_, _>>()?,
        )),
        (Value::Matrix(a), Value::Matrix(b)) if a.len() == b.len() => Ok(Value::Matrix(
            a.iter()
                .zip(b)
                .map(|(ra, rb)| {
                    ra.iter()
                        .zip(rb)
                        .map(|(x, y)| arith(op, x, y))
                        .collect::<Result<_, _>>()
                })
                .collect::<Result<_, _>>()?,
        )),
        (Value::Matrix(a), s) if s.as_f64().is_some() => Ok(Value::Matrix(
            a.iter()
                .map(|r| r.iter().map(|x| arith(op, x, s)).collect::<Result<_, _>>())
                .collect::<Result<_, _>>()?,
        )),
        (s, Value::Matrix(b)) if s.as_f64().is_some() => Ok(Value::Matrix(
            b.iter()
                .map(|r| r.iter().map(|y| arith(op, s, y)).collect::<Result<_, _>>())
                .collect::<Result<_, _>>()?,
        )),
        _ => Err(format!("operand mismatch for '{}'", op.symbol())),
    }
}

fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> OpResult {
    use BinOp::*;
    use std::cmp::Ordering;
    let ord = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Uint(a), Value::Uint(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => {
            a.partial_cmp(b).unwrap_or(Ordering::Greater)
        }
        (Value::Bool(a), Value::Bool(b)) => {
            return match op {
                Eq => Ok(Value::Bool(a == b)),
                Ne => Ok(Value::Bool(a != b)),
                _ => Err("ordering comparison on booleans".to_string()),
            };
        }
        (Value::Key(a), Value::Key(b)) => {
            return match op {
                Eq => Ok(Value::Bool(a == b)),
                Ne => Ok(Value::Bool(a != b)),
                _ => Err("ordering comparison on keys".to_string()),
            };
        }
        _ => return Err(format!("operand mismatch for '{}'", op.symbol())),
    };
    let v = match op {
        Eq => ord == Ordering::Equal,
        Ne => ord != Ordering::Equal,
        Lt => ord == Ordering::Less,
        Le => ord != Ordering::Greater,
        Gt => ord == Ordering::Greater,
        Ge => ord != Ordering::Less,
        _ => unreachable!("compare called with non-comparison op"),
    };
    Ok(Value::Bool(v))
}

pub fn unary(op: UnOp, v: &Value) -> OpResult {
    match op {
        UnOp::Neg => match v {
            Value::Int(a) => Ok(Value::Int(a.wrapping_neg())),
            Value::Float(a) => Ok(Value::Float(-a)),
            Value::Vector(items) => Ok(Value::Vector(
                items.iter().map(|i| unary(op, i)).collect::<Result<_, _>>()?,
            )),
            Value::Matrix(rows) => Ok(Value::Matrix(
                rows.iter()
                    .map(|r| r.iter().map(|i| unary(op, i)).collect::<Result<_, _>>())
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err("negation of a non-numeric value".to_string()),
        },
        UnOp::Not => match v.as_bool() {
            Some(b) => Ok(Value::Bool(!b)),
            None => Err("logical not of a non-bool".to_string()),
        },
    }
}

pub fn math(fun: MathFn, args: &[Value]) -> OpResult {
    use MathFn::*;
    match fun {
        Imin | Imax => {
            let (a, b) = (&args[0], &args[1]);
            match (a, b) {
                (Value::Int(x), Value::Int(y)) => Ok(Value::Int(if fun == Imin {
                    *x.min(y)
                } else {
                    *x.max(y)
                })),
                (Value::Uint(x), Value::Uint(y)) => Ok(Value::Uint(if fun == Imin {
                    *x.min(y)
                } else {
                    *x.max(y)
                })),
                _ => Err("integer min/max on non-integers".to_string()),
            }
        }
        _ => {
            let f = |i: usize| -> Result<f64, String> {
                args[i]
                    .as_f64()
                    .ok_or_else(|| "math builtin on non-numeric value".to_string())
            };
            let v = match fun {
                Acos => f(0)?.acos(),
                Asin => f(0)?.asin(),
                Atan => f(0)?.atan(),
                Cbrt => f(0)?.cbrt(),
                Ceil => f(0)?.ceil(),
                Cos => f(0)?.cos(),
                Fabs => f(0)?.abs(),
                Floor => f(0)?.floor(),
                Fmod => f(0)? % f(1)?,
                Log => f(0)?.ln(),
                Sin => f(0)?.sin(),
                Sqrt => f(0)?.sqrt(),
                Tan => f(0)?.tan(),
                Pow => f(0)?.powf(f(1)?),
                Fmin => f(0)?.min(f(1)?),
                Fmax => f(0)?.max(f(1)?),
                Imin | Imax => unreachable!("handled above"),
            };
            Ok(Value::Float(v))
        }
    }
}

/// Straight-line dot product of two equal-width vectors.
pub fn dot(lhs: &Value, rhs: &Value) -> OpResult {
    let (a, b) = match (lhs, rhs) {
        (Value::Vector(a), Value::Vector(b)) if a.len() == b.len() => (a, b),
        _ => return Err("dot on non-vectors".to_string()),
    };
    let mut acc: Option<Value> = None;
    for (x, y) in a.iter().zip(b) {
        let term = arith(BinOp::Mul, x, y)?;
        acc = Some(match acc {
            None => term,
            Some(prev) => arith(BinOp::Add, &prev, &term)?,
        });
    }
    acc.ok_or_else(|| "dot of empty vectors".to_string())
}

/// Identity element of a reduction's accumulation fold, in the target
/// type's evaluation domain.
pub fn identity_value(op: ReduceOp, ty: &Type) -> Value {
    let scalar = |p: Primitive| Value::scalar_of(p, op.identity(p));
    match ty {
        Type::Primitive(p) => scalar(*p),
        Type::Vector { elem, len } => Value::Vector(vec![scalar(*elem); *len as usize]),
        Type::Matrix { elem, rows, cols } => {
            Value::Matrix(vec![vec![scalar(*elem); *cols as usize]; *rows as usize])
        }
        _ => Value::Float(op.identity(Primitive::F64)),
    }
}

/// Apply one reduction step: `current op contribution`.
pub fn apply_reduce(op: ReduceOp, current: &Value, contribution: &Value) -> OpResult {
    match op {
        ReduceOp::Add => arith(BinOp::Add, current, contribution),
        ReduceOp::Sub => arith(BinOp::Sub, current, contribution),
        ReduceOp::Mul => arith(BinOp::Mul, current, contribution),
        ReduceOp::Div => arith(BinOp::Div, current, contribution),
        ReduceOp::Min | ReduceOp::Max => {
            let keep_current = match (current.as_f64(), contribution.as_f64()) {
                (Some(a), Some(b)) => {
                    if op == ReduceOp::Min {
                        a <= b
                    } else {
                        a >= b
                    }
                }
                _ => return Err("min/max reduction on non-scalar".to_string()),
            };
            Ok(if keep_current {
                current.clone()
            } else {
                contribution.clone()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_arithmetic_is_exact() {
        let v = binary(BinOp::Add, &Value::Int(1), &Value::Int(2)).unwrap();
        assert_eq!(v, Value::Int(3));
        assert!(binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn test_vector_scale_and_add() {
        let v = Value::Vector(vec![Value::Float(1.0), Value::Float(2.0)]);
        let scaled = binary(BinOp::Mul, &v, &Value::Float(2.0)).unwrap();
        assert_eq!(
            scaled,
            Value::Vector(vec![Value::Float(2.0), Value::Float(4.0)])
        );
        let sum = binary(BinOp::Add, &v, &v).unwrap();
        assert_eq!(
            sum,
            Value::Vector(vec![Value::Float(2.0), Value::Float(4.0)])
        );
    }

    #[test]
    fn test_dot() {
        let a = Value::Vector(vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]);
        let b = Value::Vector(vec![Value::Float(4.0), Value::Float(5.0), Value::Float(6.0)]);
        assert_eq!(dot(&a, &b).unwrap(), Value::Float(32.0));
    }

    #[test]
    fn test_reduce_identities_fold_neutrally() {
        for op in [ReduceOp::Add, ReduceOp::Sub, ReduceOp::Mul, ReduceOp::Div] {
            let id = identity_value(op, &Type::F64);
            // folding a contribution into the identity with the combine op
            // yields the contribution
            let combined =
                apply_reduce(op.combine(), &id, &Value::Float(7.0)).unwrap();
            assert_eq!(combined, Value::Float(7.0));
        }
        let id = identity_value(ReduceOp::Min, &Type::F64);
        assert_eq!(
            apply_reduce(ReduceOp::Min, &id, &Value::Float(3.0)).unwrap(),
            Value::Float(3.0)
        );
        let id = identity_value(ReduceOp::Max, &Type::F64);
        assert_eq!(
            apply_reduce(ReduceOp::Max, &id, &Value::Float(-3.0)).unwrap(),
            Value::Float(-3.0)
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(
            binary(BinOp::Lt, &Value::Int(1), &Value::Int(2)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            binary(BinOp::Eq, &Value::Key(3), &Value::Key(3)).unwrap(),
            Value::Bool(true)
        );
        assert!(binary(BinOp::Lt, &Value::Bool(true), &Value::Bool(false)).is_err());
    }
}
