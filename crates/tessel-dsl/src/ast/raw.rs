//! Raw AST
//!
//! The tree hosts build. Free identifiers are plain names; the specializer
//! resolves them against the host environment and expands macros, leaving
//! the resolved variants in place. Builder methods cover the surface forms
//! so host code and tests read naturally.

use serde::{Deserialize, Serialize};

use tessel_ir::lir::{BinOp, KeyComp, UnOp};
use tessel_ir::{ConstValue, FieldId, FunctionId, GlobalId, ReduceOp, RelationId, Type};

use super::Builtin;
use crate::span::Span;

/// A raw expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    // ---- host-built forms ----
    Const(ConstValue),
    /// Free identifier, resolved by the specializer
    Name(String),
    /// Member access: field read, field macro, link macro, or key
    /// decomposition — which one is decided at specialization
    Access { base: Box<Expr>, member: String },
    /// Vector or matrix element extraction
    Index {
        base: Box<Expr>,
        indices: Vec<Expr>,
    },
    /// Application: builtin, helper, field macro, or neighbor access
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary { op: UnOp, operand: Box<Expr> },
    VectorLit(Vec<Expr>),
    MatrixLit(Vec<Vec<Expr>>),

    // ---- produced by the specializer ----
    /// Kernel parameter or local variable
    Var(String),
    GlobalRef(GlobalId),
    RelationRef(RelationId),
    FieldAccess { key: Box<Expr>, field: FieldId },
    /// Off-center key: `Affine(rel, M, base)`; the matrix is validated by
    /// the checker
    Affine {
        rel: RelationId,
        matrix: ConstValue,
        base: Box<Expr>,
    },
    /// Same grid coordinates reinterpreted in a linked relation
    Rekey { target: RelationId, key: Box<Expr> },
    KeyCompExpr { comp: KeyComp, key: Box<Expr> },
    BuiltinCall { builtin: Builtin, args: Vec<Expr> },
    HelperCall {
        function: FunctionId,
        args: Vec<Expr>,
    },
    /// Unchecked key construction from a linear index
    UnsafeRow { rel: RelationId, index: Box<Expr> },
}

impl Expr {
    pub fn new(kind: ExprKind) -> Expr {
        Expr {
            kind,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Expr {
        self.span = span;
        self
    }

    // ---- builders ----

    pub fn name(n: impl Into<String>) -> Expr {
        Expr::new(ExprKind::Name(n.into()))
    }

    pub fn constant(v: impl Into<ConstValue>) -> Expr {
        Expr::new(ExprKind::Const(v.into()))
    }

    pub fn num(n: f64) -> Expr {
        Expr::constant(n)
    }

    pub fn boolean(b: bool) -> Expr {
        Expr::constant(b)
    }

    /// `self.member`
    pub fn dot(self, member: impl Into<String>) -> Expr {
        Expr::new(ExprKind::Access {
            base: Box::new(self),
            member: member.into(),
        })
    }

    /// `self(args…)`
    pub fn call(self, args: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::Call {
            callee: Box::new(self),
            args,
        })
    }

    /// `self[i]` / `self[i, j]`
    pub fn index(self, indices: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::Index {
            base: Box::new(self),
            indices,
        })
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::new(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Add, self, rhs)
    }

    pub fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Sub, self, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Mul, self, rhs)
    }

    pub fn div(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Div, self, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Lt, self, rhs)
    }

    pub fn eq(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Eq, self, rhs)
    }

    pub fn neg(self) -> Expr {
        Expr::new(ExprKind::Unary {
            op: UnOp::Neg,
            operand: Box::new(self),
        })
    }

    pub fn vector(items: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::VectorLit(items))
    }

    pub fn matrix(rows: Vec<Vec<Expr>>) -> Expr {
        Expr::new(ExprKind::MatrixLit(rows))
    }
}

/// A raw statement node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `var name [: ty] = init`
    Local {
        name: String,
        ty: Option<Type>,
        init: Expr,
    },
    /// `target = value` — local rebind or field write
    Assign { target: Expr, value: Expr },
    /// `target op= value` — field or global reduction
    Reduce {
        target: Expr,
        op: ReduceOp,
        value: Expr,
    },
    /// `if … elseif … else … end`; arms carry their conditions in order
    If {
        arms: Vec<(Expr, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    /// Numeric `for var = lo, hi` (half-open)
    For {
        var: String,
        lo: Expr,
        hi: Expr,
        body: Vec<Stmt>,
    },
    /// Expression in statement position (`assert(…)`)
    Expr(Expr),
    /// Append a record to a relation
    Insert {
        relation: Expr,
        values: Vec<(String, Expr)>,
    },
    /// Remove a key's row from its relation
    Delete { key: Expr },
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Stmt {
        Stmt {
            kind,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Stmt {
        self.span = span;
        self
    }

    pub fn local(name: impl Into<String>, init: Expr) -> Stmt {
        Stmt::new(StmtKind::Local {
            name: name.into(),
            ty: None,
            init,
        })
    }

    pub fn assign(target: Expr, value: Expr) -> Stmt {
        Stmt::new(StmtKind::Assign { target, value })
    }

    pub fn reduce(target: Expr, op: ReduceOp, value: Expr) -> Stmt {
        Stmt::new(StmtKind::Reduce { target, op, value })
    }

    pub fn if_then(cond: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::If {
            arms: vec![(cond, body)],
            else_body: None,
        })
    }

    pub fn if_else(cond: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::If {
            arms: vec![(cond, then_body)],
            else_body: Some(else_body),
        })
    }

    pub fn numeric_for(var: impl Into<String>, lo: Expr, hi: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::For {
            var: var.into(),
            lo,
            hi,
            body,
        })
    }

    pub fn expr(e: Expr) -> Stmt {
        Stmt::new(StmtKind::Expr(e))
    }

    pub fn insert(relation: Expr, values: Vec<(String, Expr)>) -> Stmt {
        Stmt::new(StmtKind::Insert { relation, values })
    }

    pub fn delete(key: Expr) -> Stmt {
        Stmt::new(StmtKind::Delete { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_compose() {
        // v.x = v.x + 1
        let stmt = Stmt::assign(
            Expr::name("v").dot("x"),
            Expr::name("v").dot("x").add(Expr::num(1.0)),
        );
        match stmt.kind {
            StmtKind::Assign { target, value } => {
                assert!(matches!(target.kind, ExprKind::Access { .. }));
                assert!(matches!(value.kind, ExprKind::Binary { op: BinOp::Add, .. }));
            }
            _ => panic!("expected assign"),
        }
    }
}
