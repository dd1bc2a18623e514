//! Emitted task specifications
//!
//! One task per kernel specialization, plus one spec per memoized helper.
//! A task declares its domain, the region privileges implied by its access
//! modes, the globals it consumes, and its lowered body. The launch
//! signature is the flat record the driver fills in and hands to a task at
//! launch; it is the stable boundary between the two.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::driver::DriverTask;
use crate::ids::{FieldId, GlobalId, RelationId, SubsetId, TaskId};
use crate::layout::DataLayout;
use crate::lir::{LirExpr, LirStmt, ReduceOp};
use crate::types::Type;
use crate::value::ConstValue;

/// Compilation target. Specialization caches key on this; the reference
/// runtime only executes `Cpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    Cpu,
    Gpu,
}

/// The complete output of compiling one program: task definitions plus the
/// driver that sequences them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    pub tasks: IndexMap<TaskId, TaskSpec>,
    pub driver: DriverTask,
}

impl TaskGraph {
    pub fn task(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }
}

/// Execution domain of a kernel task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSpec {
    /// The relation privileges are declared on
    pub universe: RelationId,
    /// Restriction of the launch to a subset, if one was supplied
    pub subset: Option<SubsetId>,
    /// Grid extents of the universe (single-element for flat relations)
    pub dims: Vec<u64>,
}

/// Access privilege on one field column, declared on the universe region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Privilege {
    Reads(FieldId),
    Writes(FieldId),
    Reduces { field: FieldId, op: ReduceOp },
}

/// Privileges a task holds on one relation's region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRequirement {
    pub relation: RelationId,
    pub privileges: Vec<Privilege>,
}

/// How a task touches one field slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldAccess {
    Read,
    Write,
    ReadWrite,
    Reduce(ReduceOp),
}

/// One entry of a task's field table; lowered bodies address fields by
/// slot index into this table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSlot {
    pub field: FieldId,
    pub relation: RelationId,
    pub ty: Type,
    pub access: FieldAccess,
}

/// One entry of a task's read-only global table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSlot {
    pub global: GlobalId,
    pub ty: Type,
}

/// The single global a task reduces into, if any. The task returns the
/// accumulated contribution; the driver rebinds the global afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedGlobal {
    pub global: GlobalId,
    pub op: ReduceOp,
    pub ty: Type,
}

/// Task body: a per-key statement list for kernels, a single expression
/// for helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskBody {
    Stmts(Vec<LirStmt>),
    Expr(LirExpr),
}

/// An emitted task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    /// Human-readable name: `kernel@relation` or `helper/…`
    pub name: String,
    /// Present for kernel tasks, absent for helpers
    pub domain: Option<DomainSpec>,
    /// Helper parameter types (empty for kernels)
    pub params: Vec<Type>,
    /// Region requirements, one per touched relation; relations with no
    /// surviving privileges are omitted entirely
    pub regions: Vec<RegionRequirement>,
    /// Field slot table referenced by the body
    pub fields: Vec<FieldSlot>,
    /// Read-only globals passed by value
    pub globals: Vec<GlobalSlot>,
    /// At most one operator-tagged global reduction
    pub reduced_global: Option<ReducedGlobal>,
    /// Relation this task appends rows to, if any
    pub inserts_into: Option<RelationId>,
    /// Relation this task deletes rows from, if any
    pub deletes_from: Option<RelationId>,
    pub body: TaskBody,
}

impl TaskSpec {
    /// Privileges this task holds on the given relation.
    pub fn privileges_on(&self, rel: &RelationId) -> &[Privilege] {
        self.regions
            .iter()
            .find(|r| &r.relation == rel)
            .map(|r| r.privileges.as_slice())
            .unwrap_or(&[])
    }
}

/// Materialized subset membership bound by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubsetBinding {
    /// Boolean mask over the universe's rows
    Mask(Vec<bool>),
    /// Sorted list of member rows
    Index(Vec<u64>),
}

/// The flat record the driver fills in per launch and the task body reads
/// through: row count, subset membership, insertion cursor, one layout per
/// field slot, one value snapshot per read-only global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSignature {
    pub n_rows: u64,
    pub use_boolmask: bool,
    pub boolmask: Vec<bool>,
    pub index: Vec<u64>,
    pub index_size: u64,
    /// Next free tail row of the insertion target
    pub insert_cursor: Option<u64>,
    /// One layout per entry of [`TaskSpec::fields`]
    pub fields: Vec<DataLayout>,
    /// One snapshot per entry of [`TaskSpec::globals`]
    pub globals: Vec<ConstValue>,
}

impl LaunchSignature {
    /// Rows this launch actually visits, in order.
    pub fn domain_rows(&self) -> Vec<u64> {
        if self.use_boolmask {
            self.boolmask
                .iter()
                .enumerate()
                .filter(|(_, live)| **live)
                .map(|(i, _)| i as u64)
                .collect()
        } else if !self.index.is_empty() {
            self.index.clone()
        } else {
            (0..self.n_rows).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_rows_full() {
        let sig = LaunchSignature {
            n_rows: 4,
            use_boolmask: false,
            boolmask: Vec::new(),
            index: Vec::new(),
            index_size: 0,
            insert_cursor: None,
            fields: Vec::new(),
            globals: Vec::new(),
        };
        assert_eq!(sig.domain_rows(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_domain_rows_masked() {
        let sig = LaunchSignature {
            n_rows: 4,
            use_boolmask: true,
            boolmask: vec![true, false, false, true],
            index: Vec::new(),
            index_size: 0,
            insert_cursor: None,
            fields: Vec::new(),
            globals: Vec::new(),
        };
        assert_eq!(sig.domain_rows(), vec![0, 3]);
    }

    #[test]
    fn test_domain_rows_indexed() {
        let sig = LaunchSignature {
            n_rows: 10,
            use_boolmask: false,
            boolmask: Vec::new(),
            index: vec![2, 5, 7],
            index_size: 3,
            insert_cursor: None,
            fields: Vec::new(),
            globals: Vec::new(),
        };
        assert_eq!(sig.domain_rows(), vec![2, 5, 7]);
    }
}
