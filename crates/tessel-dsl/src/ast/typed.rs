//! Typed AST
//!
//! Output of the semantic checker: every expression carries its type, all
//! targets are classified (local rebind vs field write vs reduction), and
//! coercions are explicit `Cast` nodes. The phase analyzer and the lowerer
//! both consume this tree.

use serde::{Deserialize, Serialize};

use tessel_ir::lir::{BinOp, KeyComp, UnOp};
use tessel_ir::{ConstValue, FieldId, FunctionId, GlobalId, ReduceOp, RelationId, Type};

use super::Builtin;
use crate::span::Span;

/// A typed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedExpr {
    pub kind: TExprKind,
    pub ty: Type,
    pub span: Span,
}

impl TypedExpr {
    pub fn new(kind: TExprKind, ty: Type, span: Span) -> Self {
        Self { kind, ty, span }
    }

    /// Wrap in a cast when the target type differs.
    pub fn cast_to(self, ty: Type) -> TypedExpr {
        if self.ty == ty {
            return self;
        }
        let span = self.span;
        TypedExpr::new(
            TExprKind::Cast {
                operand: Box::new(self),
            },
            ty,
            span,
        )
    }

    /// Whether this expression is syntactically the given parameter —
    /// the centering judgment used by the phase analyzer.
    pub fn is_param(&self, param: &str) -> bool {
        matches!(&self.kind, TExprKind::Var(name) if name == param)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TExprKind {
    Const(ConstValue),
    /// Kernel parameter, helper parameter, or local
    Var(String),
    ReadGlobal(GlobalId),
    ReadField {
        field: FieldId,
        key: Box<TypedExpr>,
    },
    /// Validated off-center key: diagonal translation only
    Affine {
        rel: RelationId,
        offsets: Vec<i64>,
        base: Box<TypedExpr>,
    },
    Rekey {
        target: RelationId,
        key: Box<TypedExpr>,
    },
    UnsafeRow {
        rel: RelationId,
        index: Box<TypedExpr>,
    },
    KeyCompExpr {
        comp: KeyComp,
        key: Box<TypedExpr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },
    Unary {
        op: UnOp,
        operand: Box<TypedExpr>,
    },
    BuiltinCall {
        builtin: Builtin,
        args: Vec<TypedExpr>,
    },
    HelperCall {
        function: FunctionId,
        args: Vec<TypedExpr>,
    },
    VectorLit(Vec<TypedExpr>),
    MatrixLit(Vec<Vec<TypedExpr>>),
    Index {
        base: Box<TypedExpr>,
        indices: Vec<TypedExpr>,
    },
    /// Numeric widening into this node's type
    Cast { operand: Box<TypedExpr> },
}

/// A typed statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedStmt {
    pub kind: TStmtKind,
    pub span: Span,
}

impl TypedStmt {
    pub fn new(kind: TStmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TStmtKind {
    Local {
        name: String,
        init: TypedExpr,
    },
    AssignVar {
        name: String,
        value: TypedExpr,
    },
    WriteField {
        field: FieldId,
        key: TypedExpr,
        value: TypedExpr,
    },
    ReduceField {
        field: FieldId,
        key: TypedExpr,
        op: ReduceOp,
        value: TypedExpr,
    },
    ReduceGlobal {
        global: GlobalId,
        op: ReduceOp,
        value: TypedExpr,
    },
    If {
        cond: TypedExpr,
        then_body: Vec<TypedStmt>,
        else_body: Vec<TypedStmt>,
    },
    For {
        var: String,
        lo: TypedExpr,
        hi: TypedExpr,
        body: Vec<TypedStmt>,
    },
    Assert(TypedExpr),
    Insert {
        relation: RelationId,
        values: Vec<(FieldId, TypedExpr)>,
    },
    Delete {
        key: TypedExpr,
    },
}

/// A fully-checked function, ready for phase analysis and lowering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypedFunction {
    Kernel {
        id: FunctionId,
        /// Relation identity fixed by this specialization
        relation: RelationId,
        param: String,
        body: Vec<TypedStmt>,
    },
    Helper {
        id: FunctionId,
        params: Vec<(String, Type)>,
        ret: Type,
        body: TypedExpr,
    },
}

impl TypedFunction {
    pub fn id(&self) -> &FunctionId {
        match self {
            TypedFunction::Kernel { id, .. } | TypedFunction::Helper { id, .. } => id,
        }
    }
}
