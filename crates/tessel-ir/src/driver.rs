//! Driver task
//!
//! The single outer task that sequences a compiled program: it declares
//! globals, allocates regions, binds subsets, and interprets the lowered
//! control statements in textual order. Scalar expressions and conditions
//! here are the control program's own little language; kernels never use
//! them.

use serde::{Deserialize, Serialize};

use crate::ids::{FieldId, GlobalId, RelationId, SubsetId, TaskId};
use crate::task::SubsetBinding;
use crate::types::Type;
use crate::value::ConstValue;

/// Arithmetic operators available in control-program expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Comparison operators for control-program conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A scalar control-program expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlExpr {
    Const(ConstValue),
    GetGlobal(GlobalId),
    Binary {
        op: ControlBinOp,
        lhs: Box<ControlExpr>,
        rhs: Box<ControlExpr>,
    },
    Neg(Box<ControlExpr>),
}

impl ControlExpr {
    pub fn binary(op: ControlBinOp, lhs: ControlExpr, rhs: ControlExpr) -> ControlExpr {
        ControlExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

/// A control-program condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlCond {
    Literal(bool),
    And(Box<ControlCond>, Box<ControlCond>),
    Or(Box<ControlCond>, Box<ControlCond>),
    Not(Box<ControlCond>),
    Compare {
        op: CmpOp,
        lhs: ControlExpr,
        rhs: ControlExpr,
    },
}

impl ControlCond {
    pub fn compare(op: CmpOp, lhs: ControlExpr, rhs: ControlExpr) -> ControlCond {
        ControlCond::Compare { op, lhs, rhs }
    }
}

/// An axis-aligned rectangle of rows on a grid relation; per-axis
/// inclusive extents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub extents: Vec<(u64, u64)>,
}

impl Rect {
    /// Row count covered by this rectangle.
    pub fn volume(&self) -> u64 {
        self.extents.iter().map(|(lo, hi)| hi - lo + 1).product()
    }

    /// Whether the rectangle fits inside the given grid extents.
    pub fn within(&self, dims: &[u64]) -> bool {
        self.extents.len() == dims.len()
            && self
                .extents
                .iter()
                .zip(dims)
                .all(|((lo, hi), d)| lo <= hi && *hi < *d)
    }
}

/// One step of the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DriverOp {
    /// Declare a scalar symbol for a global, initialized from its constant
    DeclareGlobal {
        global: GlobalId,
        ty: Type,
        init: ConstValue,
    },
    /// Allocate one region sized from the relation's dimensions
    CreateRegion {
        relation: RelationId,
        dims: Vec<u64>,
        fields: Vec<(FieldId, Type)>,
        live_mask: bool,
    },
    /// Bind a subset through a single-color partition of one rectangle
    Partition {
        subset: SubsetId,
        relation: RelationId,
        rect: Rect,
    },
    /// Bind a subset from materialized membership
    BindSubset {
        subset: SubsetId,
        relation: RelationId,
        binding: SubsetBinding,
    },
    /// Launch a kernel task; a reduced global rebinds from its return
    Launch { task: TaskId },
    /// Fill one field column with a constant
    Fill {
        relation: RelationId,
        field: FieldId,
        value: ConstValue,
    },
    SetGlobal {
        global: GlobalId,
        expr: ControlExpr,
    },
    If {
        cond: ControlCond,
        then_ops: Vec<DriverOp>,
        else_ops: Vec<DriverOp>,
    },
    While {
        cond: ControlCond,
        body: Vec<DriverOp>,
    },
}

/// The driver program in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverTask {
    pub ops: Vec<DriverOp>,
}
