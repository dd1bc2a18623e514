//! Tessel IR
//!
//! Shared, serializable artifact model consumed by both the compiler
//! (`tessel-dsl`) and the reference runtime (`tessel-runtime`). This crate
//! is pure data: no compilation logic, no execution logic.

pub mod driver;
pub mod ids;
pub mod layout;
pub mod lir;
pub mod task;
pub mod types;
pub mod value;

pub use driver::{CmpOp, ControlBinOp, ControlCond, ControlExpr, DriverOp, DriverTask};
pub use ids::{FieldId, FunctionId, GlobalId, RelationId, SubsetId, TaskId};
pub use layout::{DataLayout, ElemType};
pub use lir::{coords_to_linear, linear_to_coords, LirExpr, LirExprKind, LirStmt, MathFn, ReduceOp};
pub use task::{
    Backend, DomainSpec, FieldAccess, FieldSlot, GlobalSlot, LaunchSignature, Privilege,
    ReducedGlobal, RegionRequirement, SubsetBinding, TaskBody, TaskGraph, TaskSpec,
};
pub use types::{Primitive, Type};
pub use value::ConstValue;
