//! Lowered kernel IR
//!
//! The per-key body of an emitted task. Names have become slots, stencil
//! accesses have become wrap-around neighbor offsets with the target
//! relation's extents baked in, and builtins have become runtime math
//! operations. Every expression carries its type so the executor can pick
//! exact arithmetic domains.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::TaskId;
use crate::types::{Primitive, Type};
use crate::value::ConstValue;

/// Reduction operators usable on fields and globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

impl ReduceOp {
    /// The operator used to fold per-key contributions inside one launch.
    ///
    /// `-=` contributions accumulate with `+` and the driver applies the
    /// accumulated total with `-`; likewise `÷=` accumulates with `×`.
    pub fn combine(&self) -> ReduceOp {
        match self {
            ReduceOp::Add | ReduceOp::Sub => ReduceOp::Add,
            ReduceOp::Mul | ReduceOp::Div => ReduceOp::Mul,
            ReduceOp::Min => ReduceOp::Min,
            ReduceOp::Max => ReduceOp::Max,
        }
    }

    /// Identity of the accumulation fold for the given element type.
    ///
    /// `min` starts from the type's maximum and `max` from its minimum.
    pub fn identity(&self, elem: Primitive) -> f64 {
        match self.combine() {
            ReduceOp::Add => 0.0,
            ReduceOp::Mul => 1.0,
            ReduceOp::Min => elem.max_value(),
            ReduceOp::Max => elem.min_value(),
            _ => unreachable!("combine() only yields add/mul/min/max"),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ReduceOp::Add => "+",
            ReduceOp::Sub => "-",
            ReduceOp::Mul => "*",
            ReduceOp::Div => "/",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Binary operators. `Pow` only exists before lowering; the lowerer turns
/// it into [`MathFn::Pow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

/// Math builtins that lower to runtime calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MathFn {
    Acos,
    Asin,
    Atan,
    Cbrt,
    Ceil,
    Cos,
    Fabs,
    Floor,
    Fmod,
    Log,
    Sin,
    Sqrt,
    Tan,
    Pow,
    Fmin,
    Fmax,
    Imin,
    Imax,
}

impl MathFn {
    pub fn arity(&self) -> usize {
        match self {
            MathFn::Fmod
            | MathFn::Pow
            | MathFn::Fmin
            | MathFn::Fmax
            | MathFn::Imin
            | MathFn::Imax => 2,
            _ => 1,
        }
    }
}

/// A component extracted from a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyComp {
    /// Linear row index
    Id,
    /// Grid x coordinate
    X,
    /// Grid y coordinate
    Y,
    /// Grid z coordinate
    Z,
}

impl KeyComp {
    /// Axis number for grid components; `Id` has none.
    pub fn axis(&self) -> Option<usize> {
        match self {
            KeyComp::Id => None,
            KeyComp::X => Some(0),
            KeyComp::Y => Some(1),
            KeyComp::Z => Some(2),
        }
    }
}

/// A lowered expression with its result type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LirExpr {
    pub kind: LirExprKind,
    pub ty: Type,
}

impl LirExpr {
    pub fn new(kind: LirExprKind, ty: Type) -> Self {
        Self { kind, ty }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LirExprKind {
    Const(ConstValue),
    /// The key this instance executes for (kernel tasks only)
    Param,
    /// Helper argument by position (helper tasks only)
    Arg(u32),
    /// Let-bound local or loop variable
    Local(String),
    /// Field read through a key; `slot` indexes the task's field table
    ReadField { slot: u32, key: Box<LirExpr> },
    /// Read-only global by slot in the task's global table
    ReadGlobal { slot: u32 },
    /// Wrap-around translated key within a grid of the given extents
    Neighbor {
        dims: Vec<u64>,
        offsets: Vec<i64>,
        base: Box<LirExpr>,
    },
    /// Reinterpret a key's grid coordinates in another grid (clamped)
    Rekey {
        from_dims: Vec<u64>,
        to_dims: Vec<u64>,
        base: Box<LirExpr>,
    },
    /// Construct a key of the target relation from a raw linear index,
    /// bounds-unchecked
    KeyFromLinear { index: Box<LirExpr> },
    /// Extract a component of a key
    KeyComponent {
        comp: KeyComp,
        dims: Vec<u64>,
        key: Box<LirExpr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<LirExpr>,
        rhs: Box<LirExpr>,
    },
    Unary { op: UnOp, operand: Box<LirExpr> },
    Math { fun: MathFn, args: Vec<LirExpr> },
    /// Straight-line dot product of two equal-width vectors
    Dot { lhs: Box<LirExpr>, rhs: Box<LirExpr> },
    /// Uniform sample in [0, 1)
    Rand,
    VectorLit(Vec<LirExpr>),
    MatrixLit(Vec<Vec<LirExpr>>),
    /// Element extraction from a vector (one index) or matrix (two)
    Index {
        base: Box<LirExpr>,
        indices: Vec<LirExpr>,
    },
    /// Call of an emitted helper task
    CallHelper { task: TaskId, args: Vec<LirExpr> },
    /// Numeric conversion into this node's type
    Cast { operand: Box<LirExpr> },
}

/// A lowered statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LirStmt {
    Local { name: String, init: LirExpr },
    AssignLocal { name: String, value: LirExpr },
    WriteField {
        slot: u32,
        key: LirExpr,
        value: LirExpr,
    },
    ReduceField {
        slot: u32,
        key: LirExpr,
        op: ReduceOp,
        value: LirExpr,
    },
    /// Contribute to the task's single reduced global accumulator
    ReduceGlobal { op: ReduceOp, value: LirExpr },
    If {
        cond: LirExpr,
        then_body: Vec<LirStmt>,
        else_body: Vec<LirStmt>,
    },
    For {
        var: String,
        lo: LirExpr,
        hi: LirExpr,
        body: Vec<LirStmt>,
    },
    /// Runtime assertion; failure aborts the launch
    Assert { cond: LirExpr },
    /// Append a row to the task's insertion target
    Insert { values: Vec<(u32, LirExpr)> },
    /// Mark a row of the task's deletion target dead
    Delete { key: LirExpr },
}

/// Decompose a linear row index into grid coordinates, row-major with x
/// fastest.
pub fn linear_to_coords(id: u64, dims: &[u64]) -> Vec<u64> {
    let mut rest = id;
    let mut coords = Vec::with_capacity(dims.len());
    for d in dims {
        coords.push(rest % d);
        rest /= d;
    }
    coords
}

/// Compose grid coordinates back into a linear row index.
pub fn coords_to_linear(coords: &[u64], dims: &[u64]) -> u64 {
    debug_assert_eq!(coords.len(), dims.len());
    let mut id = 0u64;
    for i in (0..dims.len()).rev() {
        debug_assert!(coords[i] < dims[i]);
        id = id * dims[i] + coords[i];
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_coord_round_trip() {
        let dims = [4u64, 3, 2];
        for id in 0..24 {
            let c = linear_to_coords(id, &dims);
            assert_eq!(coords_to_linear(&c, &dims), id);
        }
        // x is the fastest-varying axis
        assert_eq!(linear_to_coords(5, &[4, 4]), vec![1, 1]);
        assert_eq!(coords_to_linear(&[3, 2], &[4, 4]), 11);
    }

    #[test]
    fn test_reduce_identities() {
        assert_eq!(ReduceOp::Add.identity(Primitive::F64), 0.0);
        assert_eq!(ReduceOp::Sub.identity(Primitive::F64), 0.0);
        assert_eq!(ReduceOp::Mul.identity(Primitive::F64), 1.0);
        assert_eq!(ReduceOp::Div.identity(Primitive::F64), 1.0);
        // min folds down from the type maximum, max up from the minimum
        assert_eq!(ReduceOp::Min.identity(Primitive::I32), i32::MAX as f64);
        assert_eq!(ReduceOp::Max.identity(Primitive::I32), i32::MIN as f64);
        assert_eq!(ReduceOp::Min.identity(Primitive::F64), f64::INFINITY);
        assert_eq!(ReduceOp::Max.identity(Primitive::F64), f64::NEG_INFINITY);
    }

    #[test]
    fn test_combine_collapses_inverse_ops() {
        assert_eq!(ReduceOp::Sub.combine(), ReduceOp::Add);
        assert_eq!(ReduceOp::Div.combine(), ReduceOp::Mul);
        assert_eq!(ReduceOp::Min.combine(), ReduceOp::Min);
    }

    #[test]
    fn test_math_arity() {
        assert_eq!(MathFn::Sin.arity(), 1);
        assert_eq!(MathFn::Pow.arity(), 2);
        assert_eq!(MathFn::Imax.arity(), 2);
    }
}
