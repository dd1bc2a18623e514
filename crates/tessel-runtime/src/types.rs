//! Runtime values
//!
//! Kernel evaluation runs in wide domains: signed integers in i64,
//! unsigned in u64, floats in f64. Narrowing happens only when a value is
//! stored into a column or a global, using the target primitive's
//! conversion semantics.

use tessel_ir::{ConstValue, Primitive, Type};

/// A value during task execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    /// Linear row index into some relation
    Key(u64),
    Vector(Vec<Value>),
    Matrix(Vec<Vec<Value>>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric reading of a scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Uint(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => Some(*v as i64),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<u64> {
        match self {
            Value::Key(k) => Some(*k),
            _ => None,
        }
    }

    /// The zero of a primitive's evaluation domain.
    pub fn zero_of(p: Primitive) -> Value {
        match p {
            Primitive::Bool => Value::Bool(false),
            _ if p.is_signed() => Value::Int(0),
            _ if p.is_unsigned() => Value::Uint(0),
            _ => Value::Float(0.0),
        }
    }

    /// Lift an f64 into a primitive's evaluation domain, saturating.
    pub fn scalar_of(p: Primitive, n: f64) -> Value {
        match p {
            Primitive::Bool => Value::Bool(n != 0.0),
            _ if p.is_signed() => Value::Int(n as i64),
            _ if p.is_unsigned() => Value::Uint(n as u64),
            _ => Value::Float(n),
        }
    }

    /// Materialize a host constant at a given type.
    pub fn from_const(v: &ConstValue, ty: &Type) -> Value {
        match (v, ty) {
            (ConstValue::Bool(b), _) => Value::Bool(*b),
            (ConstValue::Number(n), Type::Primitive(p)) => Value::scalar_of(*p, *n),
            (ConstValue::Number(n), _) => Value::Float(*n),
            (ConstValue::List(items), Type::Vector { elem, .. }) => Value::Vector(
                items
                    .iter()
                    .map(|i| Value::from_const(i, &Type::Primitive(*elem)))
                    .collect(),
            ),
            (ConstValue::List(rows), Type::Matrix { elem, cols, .. }) => Value::Matrix(
                rows.iter()
                    .map(|r| match r {
                        ConstValue::List(items) => items
                            .iter()
                            .map(|i| Value::from_const(i, &Type::Primitive(*elem)))
                            .collect(),
                        other => vec![Value::from_const(
                            other,
                            &Type::Vector {
                                elem: *elem,
                                len: *cols,
                            },
                        )],
                    })
                    .collect(),
            ),
            (ConstValue::List(items), _) => Value::Vector(
                items
                    .iter()
                    .map(|i| Value::from_const(i, &Type::F64))
                    .collect(),
            ),
        }
    }

    /// Snapshot back into a host constant (for launch signatures).
    pub fn to_const(&self) -> ConstValue {
        match self {
            Value::Bool(b) => ConstValue::Bool(*b),
            Value::Int(v) => ConstValue::Number(*v as f64),
            Value::Uint(v) => ConstValue::Number(*v as f64),
            Value::Float(v) => ConstValue::Number(*v),
            Value::Key(k) => ConstValue::Number(*k as f64),
            Value::Vector(items) => ConstValue::List(items.iter().map(|i| i.to_const()).collect()),
            Value::Matrix(rows) => ConstValue::List(
                rows.iter()
                    .map(|r| ConstValue::List(r.iter().map(|i| i.to_const()).collect()))
                    .collect(),
            ),
        }
    }

    /// Convert into another type's evaluation domain.
    pub fn cast(&self, to: &Type) -> Value {
        match to {
            Type::Primitive(p) => match self {
                Value::Bool(b) => {
                    if *p == Primitive::Bool {
                        Value::Bool(*b)
                    } else {
                        Value::scalar_of(*p, if *b { 1.0 } else { 0.0 })
                    }
                }
                Value::Int(v) => Value::scalar_of(*p, *v as f64),
                Value::Uint(v) => Value::scalar_of(*p, *v as f64),
                Value::Float(v) => Value::scalar_of(*p, *v),
                other => other.clone(),
            },
            Type::Vector { elem, .. } => match self {
                Value::Vector(items) => Value::Vector(
                    items
                        .iter()
                        .map(|i| i.cast(&Type::Primitive(*elem)))
                        .collect(),
                ),
                other => other.clone(),
            },
            Type::Matrix { elem, .. } => match self {
                Value::Matrix(rows) => Value::Matrix(
                    rows.iter()
                        .map(|r| r.iter().map(|i| i.cast(&Type::Primitive(*elem))).collect())
                        .collect(),
                ),
                other => other.clone(),
            },
            _ => self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_const_typed() {
        let v = Value::from_const(&ConstValue::Number(3.0), &Type::Primitive(Primitive::I32));
        assert_eq!(v, Value::Int(3));
        let v = Value::from_const(&ConstValue::Number(3.0), &Type::F64);
        assert_eq!(v, Value::Float(3.0));
    }

    #[test]
    fn test_cast_between_domains() {
        assert_eq!(Value::Float(2.9).cast(&Type::I64), Value::Int(2));
        assert_eq!(
            Value::Int(-1).cast(&Type::Primitive(Primitive::F32)),
            Value::Float(-1.0)
        );
    }

    #[test]
    fn test_const_round_trip() {
        let v = Value::Vector(vec![Value::Float(1.0), Value::Float(2.0)]);
        let c = v.to_const();
        assert_eq!(
            Value::from_const(&c, &Type::vector(Primitive::F64, 2)),
            v
        );
    }
}
