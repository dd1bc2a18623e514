//! Semantic checking and type inference
//!
//! A pure pass over specialized bodies producing the typed AST: every
//! node annotated with its type, all coercions explicit casts, all
//! assignment targets classified. Type violations carry the fixed
//! "invalid types" message; off-center forms that are not a legal affine
//! translation are stencil errors.

use indexmap::IndexMap;

use tessel_ir::lir::{BinOp, UnOp};
use tessel_ir::{ConstValue, FunctionId, Primitive, RelationId, Type};

use crate::ast::raw::{Expr, ExprKind, Stmt, StmtKind};
use crate::ast::typed::{TExprKind, TStmtKind, TypedExpr, TypedFunction, TypedStmt};
use crate::ast::{Builtin, FunctionDef};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::relation::{Catalog, LIVE_MASK_FIELD};
use crate::span::Span;
use crate::specialize::{specialize_helper, Env, SpecHelper, SpecKernel};

/// Whether `from` may widen implicitly to `to`: same-signedness integer
/// chains, integer → f64, f32 → f64. Never narrowing, never bool↔number,
/// never signed↔unsigned.
pub fn widens_to(from: Primitive, to: Primitive) -> bool {
    use Primitive::*;
    if from == to {
        return true;
    }
    let rank = |p: Primitive| p.size_in_bytes();
    match (from, to) {
        (a, b) if a.is_signed() && b.is_signed() => rank(a) < rank(b),
        (a, b) if a.is_unsigned() && b.is_unsigned() => rank(a) < rank(b),
        (a, F64) if a.is_integer() => true,
        (F32, F64) => true,
        _ => false,
    }
}

/// Least common type two primitives both widen to, if any.
pub fn join_prim(a: Primitive, b: Primitive) -> Option<Primitive> {
    if widens_to(a, b) {
        return Some(b);
    }
    if widens_to(b, a) {
        return Some(a);
    }
    // int × f32 meet at f64; mixed-sign integers have no join
    if (a.is_integer() && b == Primitive::F32) || (b.is_integer() && a == Primitive::F32) {
        return Some(Primitive::F64);
    }
    None
}

/// Elementwise join of two value types.
pub fn join_types(a: &Type, b: &Type) -> Option<Type> {
    match (a, b) {
        (Type::Primitive(pa), Type::Primitive(pb)) => join_prim(*pa, *pb).map(Type::Primitive),
        (Type::Vector { elem: ea, len: la }, Type::Vector { elem: eb, len: lb }) if la == lb => {
            join_prim(*ea, *eb).map(|e| Type::Vector { elem: e, len: *la })
        }
        (
            Type::Matrix {
                elem: ea,
                rows: ra,
                cols: ca,
            },
            Type::Matrix {
                elem: eb,
                rows: rb,
                cols: cb,
            },
        ) if ra == rb && ca == cb => join_prim(*ea, *eb).map(|e| Type::Matrix {
            elem: e,
            rows: *ra,
            cols: *ca,
        }),
        _ => None,
    }
}

/// Check a specialized kernel. The single parameter is already fixed to a
/// key of the launch relation; the body must not produce a value.
pub fn check_kernel(cat: &Catalog, env: &Env, spec: &SpecKernel) -> CompileResult<TypedFunction> {
    let mut ck = Checker::new(cat, env);
    ck.param = Some(spec.param.clone());
    ck.scope
        .push((spec.param.clone(), Type::Key(spec.relation.clone())));
    let body = ck.block(&spec.body)?;
    Ok(TypedFunction::Kernel {
        id: spec.id.clone(),
        relation: spec.relation.clone(),
        param: spec.param.clone(),
        body,
    })
}

/// Check a specialized helper; infers the return type when none was
/// declared.
pub fn check_helper(cat: &Catalog, env: &Env, spec: &SpecHelper) -> CompileResult<TypedFunction> {
    let mut ck = Checker::new(cat, env);
    for (name, ty) in &spec.params {
        ck.scope.push((name.clone(), ty.clone()));
    }
    let body = ck.expr(&spec.body)?;
    let body = match &spec.ret {
        Some(ret) => ck.coerce_to(body, ret)?,
        None => body,
    };
    Ok(TypedFunction::Helper {
        id: spec.id.clone(),
        params: spec.params.clone(),
        ret: body.ty.clone(),
        body,
    })
}

struct Checker<'a> {
    cat: &'a Catalog,
    env: &'a Env,
    scope: Vec<(String, Type)>,
    param: Option<String>,
    /// Helper signatures resolved so far: (param types, return type)
    helper_sigs: IndexMap<FunctionId, (Vec<Type>, Type)>,
    /// Helpers currently being resolved, for cycle detection
    helper_stack: Vec<FunctionId>,
}

impl<'a> Checker<'a> {
    fn new(cat: &'a Catalog, env: &'a Env) -> Self {
        Self {
            cat,
            env,
            scope: Vec::new(),
            param: None,
            helper_sigs: IndexMap::new(),
            helper_stack: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> Option<&Type> {
        self.scope
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    // ---- coercion ----

    /// Retype a direct constant to the target when it conforms; untyped
    /// literals adopt their context.
    fn adopt(&self, e: TypedExpr, target: &Type) -> TypedExpr {
        match &e.kind {
            TExprKind::Const(v) if v.conforms_to(target) => TypedExpr {
                ty: target.clone(),
                ..e
            },
            _ => e,
        }
    }

    /// Coerce an expression to exactly the target type, inserting a cast
    /// for legal widenings.
    fn coerce_to(&self, e: TypedExpr, target: &Type) -> CompileResult<TypedExpr> {
        let e = self.adopt(e, target);
        if &e.ty == target {
            return Ok(e);
        }
        let ok = match (&e.ty, target) {
            (Type::Primitive(a), Type::Primitive(b)) => widens_to(*a, *b),
            (Type::Vector { elem: a, len: la }, Type::Vector { elem: b, len: lb }) => {
                la == lb && widens_to(*a, *b)
            }
            (
                Type::Matrix {
                    elem: a,
                    rows: ra,
                    cols: ca,
                },
                Type::Matrix {
                    elem: b,
                    rows: rb,
                    cols: cb,
                },
            ) => ra == rb && ca == cb && widens_to(*a, *b),
            _ => false,
        };
        if !ok {
            return Err(CompileError::invalid_types(e.span)
                .with_note(format!("expected {}, got {}", target, e.ty)));
        }
        Ok(e.cast_to(target.clone()))
    }

    /// Join two operands, adopting constants either way, and cast both to
    /// the joined type.
    fn join_operands(
        &self,
        lhs: TypedExpr,
        rhs: TypedExpr,
        span: Span,
    ) -> CompileResult<(TypedExpr, TypedExpr, Type)> {
        let lhs = self.adopt(lhs, &rhs.ty);
        let rhs = self.adopt(rhs, &lhs.ty);
        let Some(joined) = join_types(&lhs.ty, &rhs.ty) else {
            return Err(CompileError::invalid_types(span)
                .with_note(format!("no common type for {} and {}", lhs.ty, rhs.ty)));
        };
        let lhs = self.coerce_to(lhs, &joined)?;
        let rhs = self.coerce_to(rhs, &joined)?;
        Ok((lhs, rhs, joined))
    }

    // ---- statements ----

    fn block(&mut self, body: &[Stmt]) -> CompileResult<Vec<TypedStmt>> {
        let depth = self.scope.len();
        let out = body.iter().map(|s| self.stmt(s)).collect();
        self.scope.truncate(depth);
        out
    }

    fn stmt(&mut self, s: &Stmt) -> CompileResult<TypedStmt> {
        let span = s.span;
        let kind = match &s.kind {
            StmtKind::Local { name, ty, init } => {
                let init = self.expr(init)?;
                let init = match ty {
                    Some(declared) => self.coerce_to(init, declared)?,
                    None => init,
                };
                self.scope.push((name.clone(), init.ty.clone()));
                TStmtKind::Local {
                    name: name.clone(),
                    init,
                }
            }
            StmtKind::Assign { target, value } => {
                let value = self.expr(value)?;
                match &target.kind {
                    ExprKind::Var(name) => {
                        if self.param.as_deref() == Some(name) {
                            return Err(CompileError::invalid_types(span)
                                .with_note("cannot assign to the kernel parameter"));
                        }
                        let Some(ty) = self.lookup(name).cloned() else {
                            return Err(CompileError::new(
                                ErrorKind::UnboundName,
                                span,
                                format!("assignment to undeclared '{}'", name),
                            ));
                        };
                        let value = self.coerce_to(value, &ty)?;
                        TStmtKind::AssignVar {
                            name: name.clone(),
                            value,
                        }
                    }
                    ExprKind::FieldAccess { key, field } => {
                        let key = self.key_expr(key, field)?;
                        let field_ty = self.cat.field(field)?.ty.clone();
                        let value = self.coerce_to(value, &field_ty)?;
                        TStmtKind::WriteField {
                            field: field.clone(),
                            key,
                            value,
                        }
                    }
                    _ => {
                        return Err(CompileError::invalid_types(span)
                            .with_note("assignment target must be a local or a field"));
                    }
                }
            }
            StmtKind::Reduce { target, op, value } => {
                let value = self.expr(value)?;
                match &target.kind {
                    ExprKind::FieldAccess { key, field } => {
                        let key = self.key_expr(key, field)?;
                        let field_ty = self.cat.field(field)?.ty.clone();
                        self.check_reduce_op(*op, &field_ty, span)?;
                        let value = self.coerce_to(value, &field_ty)?;
                        TStmtKind::ReduceField {
                            field: field.clone(),
                            key,
                            op: *op,
                            value,
                        }
                    }
                    ExprKind::GlobalRef(global) => {
                        let global_ty = self.cat.global(global)?.ty.clone();
                        self.check_reduce_op(*op, &global_ty, span)?;
                        let value = self.coerce_to(value, &global_ty)?;
                        TStmtKind::ReduceGlobal {
                            global: global.clone(),
                            op: *op,
                            value,
                        }
                    }
                    _ => {
                        return Err(CompileError::invalid_types(span).with_note(
                            "reduction target must be a field of the centered relation or a global",
                        ));
                    }
                }
            }
            StmtKind::If { arms, else_body } => return self.if_chain(arms, else_body, span),
            StmtKind::For { var, lo, hi, body } => {
                let lo = self.expr(lo)?;
                let lo = self.coerce_to(lo, &Type::I64)?;
                let hi = self.expr(hi)?;
                let hi = self.coerce_to(hi, &Type::I64)?;
                let depth = self.scope.len();
                self.scope.push((var.clone(), Type::I64));
                let body = body
                    .iter()
                    .map(|s| self.stmt(s))
                    .collect::<CompileResult<Vec<_>>>()?;
                self.scope.truncate(depth);
                TStmtKind::For {
                    var: var.clone(),
                    lo,
                    hi,
                    body,
                }
            }
            StmtKind::Expr(e) => match &e.kind {
                ExprKind::BuiltinCall {
                    builtin: Builtin::Assert,
                    args,
                } => {
                    if args.len() != 1 {
                        return Err(CompileError::new(
                            ErrorKind::Arity,
                            span,
                            format!("assert takes 1 argument, got {}", args.len()),
                        ));
                    }
                    let cond = self.expr(&args[0])?;
                    if !cond.ty.is_bool() {
                        return Err(CompileError::invalid_types(cond.span.or(span))
                            .with_note("assert condition must be bool"));
                    }
                    TStmtKind::Assert(cond)
                }
                _ => {
                    return Err(CompileError::invalid_types(span)
                        .with_note("expression statement has no effect"));
                }
            },
            StmtKind::Insert { relation, values } => {
                let ExprKind::RelationRef(rel) = &relation.kind else {
                    return Err(CompileError::invalid_types(span)
                        .with_note("insert target must be a relation"));
                };
                return self.insert(rel.clone(), values, span);
            }
            StmtKind::Delete { key } => {
                let key = self.expr(key)?;
                let Some(rel) = key.ty.key_relation().cloned() else {
                    return Err(CompileError::invalid_types(span)
                        .with_note("delete takes a key"));
                };
                if !self.cat.relation(&rel)?.has_live_mask {
                    return Err(CompileError::invalid_types(span).with_note(format!(
                        "relation '{}' does not support delete",
                        rel
                    )));
                }
                TStmtKind::Delete { key }
            }
        };
        Ok(TypedStmt::new(kind, span))
    }

    /// Flatten an elseif chain into nested two-way branches.
    fn if_chain(
        &mut self,
        arms: &[(Expr, Vec<Stmt>)],
        else_body: &Option<Vec<Stmt>>,
        span: Span,
    ) -> CompileResult<TypedStmt> {
        let (cond, then_raw) = &arms[0];
        let cond = self.expr(cond)?;
        if !cond.ty.is_bool() {
            return Err(CompileError::invalid_types(cond.span.or(span))
                .with_note("branch condition must be bool"));
        }
        let then_body = self.block(then_raw)?;
        let else_body = if arms.len() > 1 {
            vec![self.if_chain(&arms[1..], else_body, span)?]
        } else {
            match else_body {
                Some(body) => self.block(body)?,
                None => Vec::new(),
            }
        };
        Ok(TypedStmt::new(
            TStmtKind::If {
                cond,
                then_body,
                else_body,
            },
            span,
        ))
    }

    fn insert(
        &mut self,
        rel: RelationId,
        values: &[(String, Expr)],
        span: Span,
    ) -> CompileResult<TypedStmt> {
        let relation = self.cat.relation(&rel)?;
        if !relation.has_live_mask {
            return Err(CompileError::invalid_types(span).with_note(format!(
                "relation '{}' does not support insert",
                rel
            )));
        }
        // Record must match the schema exactly (liveness column excluded)
        let mut typed = Vec::new();
        let mut remaining: IndexMap<String, Type> = self
            .cat
            .fields_of(&rel)
            .into_iter()
            .filter(|f| f.name != LIVE_MASK_FIELD)
            .map(|f| (f.name.clone(), f.ty.clone()))
            .collect();
        for (name, e) in values {
            let Some(ty) = remaining.shift_remove(name) else {
                return Err(CompileError::invalid_types(span)
                    .with_note(format!("'{}' is not a field of '{}' (or repeats)", name, rel)));
            };
            let value = self.expr(e)?;
            let value = self.coerce_to(value, &ty)?;
            let field = self.cat.field_of(&rel, name).expect("field exists").id.clone();
            typed.push((field, value));
        }
        if !remaining.is_empty() {
            let missing: Vec<&String> = remaining.keys().collect();
            return Err(CompileError::invalid_types(span)
                .with_note(format!("insert record missing fields {:?}", missing)));
        }
        Ok(TypedStmt::new(
            TStmtKind::Insert {
                relation: rel,
                values: typed,
            },
            span,
        ))
    }

    fn check_reduce_op(
        &self,
        op: tessel_ir::ReduceOp,
        target: &Type,
        span: Span,
    ) -> CompileResult<()> {
        use tessel_ir::ReduceOp::*;
        let ok = match op {
            Add | Sub | Mul | Div => {
                target.is_numeric() || target.is_vector() || target.is_matrix()
            }
            Min | Max => target.is_numeric(),
        };
        if !ok {
            return Err(CompileError::invalid_types(span).with_note(format!(
                "reduction '{}' incompatible with {}",
                op, target
            )));
        }
        Ok(())
    }

    /// Type a key expression and require it to address the field's
    /// relation.
    fn key_expr(&mut self, key: &Expr, field: &tessel_ir::FieldId) -> CompileResult<TypedExpr> {
        let key = self.expr(key)?;
        let field_rel = &self.cat.field(field)?.relation;
        match key.ty.key_relation() {
            Some(rel) if rel == field_rel => Ok(key),
            _ => Err(CompileError::invalid_types(key.span).with_note(format!(
                "field '{}' requires a key of '{}', got {}",
                field, field_rel, key.ty
            ))),
        }
    }

    // ---- expressions ----

    fn expr(&mut self, e: &Expr) -> CompileResult<TypedExpr> {
        let span = e.span;
        match &e.kind {
            ExprKind::Const(v) => {
                let Some(ty) = v.natural_type() else {
                    return Err(CompileError::invalid_types(span)
                        .with_note(format!("constant {} has no usable type", v)));
                };
                Ok(TypedExpr::new(TExprKind::Const(v.clone()), ty, span))
            }
            ExprKind::Var(name) => {
                let Some(ty) = self.lookup(name).cloned() else {
                    return Err(CompileError::new(
                        ErrorKind::UnboundName,
                        span,
                        format!("undeclared variable '{}'", name),
                    ));
                };
                Ok(TypedExpr::new(TExprKind::Var(name.clone()), ty, span))
            }
            ExprKind::GlobalRef(g) => {
                let ty = self.cat.global(g)?.ty.clone();
                Ok(TypedExpr::new(TExprKind::ReadGlobal(g.clone()), ty, span))
            }
            ExprKind::RelationRef(rel) => Err(CompileError::invalid_types(span)
                .with_note(format!("relation '{}' used as a value", rel))),
            ExprKind::FieldAccess { key, field } => {
                let key = self.key_expr(key, field)?;
                let ty = self.cat.field(field)?.ty.clone();
                Ok(TypedExpr::new(
                    TExprKind::ReadField {
                        field: field.clone(),
                        key: Box::new(key),
                    },
                    ty,
                    span,
                ))
            }
            ExprKind::Affine { rel, matrix, base } => self.affine(rel, matrix, base, span),
            ExprKind::Rekey { target, key } => {
                let key = self.expr(key)?;
                if key.ty.key_relation().is_none() {
                    return Err(CompileError::invalid_types(span)
                        .with_note("link access requires a key"));
                }
                Ok(TypedExpr::new(
                    TExprKind::Rekey {
                        target: target.clone(),
                        key: Box::new(key),
                    },
                    Type::Key(target.clone()),
                    span,
                ))
            }
            ExprKind::UnsafeRow { rel, index } => {
                let index = self.expr(index)?;
                let index = self.coerce_to(index, &Type::I64)?;
                Ok(TypedExpr::new(
                    TExprKind::UnsafeRow {
                        rel: rel.clone(),
                        index: Box::new(index),
                    },
                    Type::Key(rel.clone()),
                    span,
                ))
            }
            ExprKind::KeyCompExpr { comp, key } => {
                let key = self.expr(key)?;
                if key.ty.key_relation().is_none() {
                    return Err(CompileError::invalid_types(span)
                        .with_note("key decomposition requires a key"));
                }
                Ok(TypedExpr::new(
                    TExprKind::KeyCompExpr {
                        comp: *comp,
                        key: Box::new(key),
                    },
                    Type::I64,
                    span,
                ))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                self.binary(*op, lhs, rhs, span)
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                self.unary(*op, operand, span)
            }
            ExprKind::BuiltinCall { builtin, args } => {
                let args = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<CompileResult<Vec<_>>>()?;
                self.builtin(*builtin, args, span)
            }
            ExprKind::HelperCall { function, args } => {
                let args = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<CompileResult<Vec<_>>>()?;
                self.helper_call(function, args, span)
            }
            ExprKind::VectorLit(items) => {
                let items = items
                    .iter()
                    .map(|i| self.expr(i))
                    .collect::<CompileResult<Vec<_>>>()?;
                self.vector_lit(items, span)
            }
            ExprKind::MatrixLit(rows) => {
                let rows = rows
                    .iter()
                    .map(|r| r.iter().map(|i| self.expr(i)).collect::<CompileResult<Vec<_>>>())
                    .collect::<CompileResult<Vec<_>>>()?;
                self.matrix_lit(rows, span)
            }
            ExprKind::Index { base, indices } => {
                let base = self.expr(base)?;
                let indices = indices
                    .iter()
                    .map(|i| {
                        let i = self.expr(i)?;
                        self.coerce_to(i, &Type::I64)
                    })
                    .collect::<CompileResult<Vec<_>>>()?;
                let ty = match (&base.ty, indices.len()) {
                    (Type::Vector { elem, .. }, 1) => Type::Primitive(*elem),
                    (Type::Matrix { elem, .. }, 2) => Type::Primitive(*elem),
                    _ => {
                        return Err(CompileError::invalid_types(span).with_note(format!(
                            "cannot index {} with {} indices",
                            base.ty,
                            indices.len()
                        )));
                    }
                };
                Ok(TypedExpr::new(
                    TExprKind::Index {
                        base: Box::new(base),
                        indices,
                    },
                    ty,
                    span,
                ))
            }
            // Host-only forms must have been rewritten by specialization
            ExprKind::Name(_) | ExprKind::Access { .. } | ExprKind::Call { .. } => {
                Err(CompileError::new(
                    ErrorKind::Internal,
                    span,
                    "unspecialized node reached the checker",
                ))
            }
        }
    }

    /// Validate the affine form: padded diagonal translation matrix over a
    /// base key of the target relation.
    fn affine(
        &mut self,
        rel: &RelationId,
        matrix: &ConstValue,
        base: &Expr,
        span: Span,
    ) -> CompileResult<TypedExpr> {
        let base = self.expr(base)?;
        if base.ty.key_relation() != Some(rel) {
            return Err(CompileError::new(
                ErrorKind::Stencil,
                span,
                format!(
                    "affine base must be a key of '{}', got {}",
                    rel, base.ty
                ),
            ));
        }
        let ndims = self.cat.relation(rel)?.dims.len();

        let rows = matrix.as_list().ok_or_else(|| {
            CompileError::new(ErrorKind::Stencil, span, "affine matrix must be a matrix")
        })?;
        if rows.len() != ndims {
            return Err(CompileError::new(
                ErrorKind::Stencil,
                span,
                format!(
                    "affine matrix must have {} rows for '{}', got {}",
                    ndims,
                    rel,
                    rows.len()
                ),
            ));
        }
        let mut offsets = Vec::with_capacity(ndims);
        for (r, row) in rows.iter().enumerate() {
            let cols = row.as_list().ok_or_else(|| {
                CompileError::new(ErrorKind::Stencil, span, "affine matrix must be a matrix")
            })?;
            if cols.len() != ndims + 1 {
                return Err(CompileError::new(
                    ErrorKind::Stencil,
                    span,
                    format!(
                        "affine matrix rows must have {} columns, got {}",
                        ndims + 1,
                        cols.len()
                    ),
                ));
            }
            for (c, v) in cols.iter().enumerate().take(ndims) {
                let expected = if r == c { 1.0 } else { 0.0 };
                if v.as_f64() != Some(expected) {
                    return Err(CompileError::new(
                        ErrorKind::Stencil,
                        span,
                        "affine rotation part must be the identity",
                    ));
                }
            }
            let t = cols[ndims].as_f64().filter(|n| n.fract() == 0.0);
            match t {
                Some(n) => offsets.push(n as i64),
                None => {
                    return Err(CompileError::new(
                        ErrorKind::Stencil,
                        span,
                        "affine translation must be integer",
                    ));
                }
            }
        }

        Ok(TypedExpr::new(
            TExprKind::Affine {
                rel: rel.clone(),
                offsets,
                base: Box::new(base),
            },
            Type::Key(rel.clone()),
            span,
        ))
    }

    fn binary(
        &mut self,
        op: BinOp,
        lhs: TypedExpr,
        rhs: TypedExpr,
        span: Span,
    ) -> CompileResult<TypedExpr> {
        use BinOp::*;
        let build = |lhs: TypedExpr, rhs: TypedExpr, ty: Type| {
            Ok(TypedExpr::new(
                TExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                ty,
                span,
            ))
        };
        match op {
            Add | Sub => {
                let (lhs, rhs, joined) = self.join_operands(lhs, rhs, span)?;
                if !(joined.is_numeric() || joined.is_vector() || joined.is_matrix()) {
                    return Err(CompileError::invalid_types(span));
                }
                build(lhs, rhs, joined)
            }
            Mul => self.scale_or_join(op, lhs, rhs, span),
            Div => {
                // vector/scalar and matrix/scalar divide elementwise
                if (lhs.ty.is_vector() || lhs.ty.is_matrix()) && rhs.ty.is_numeric() {
                    return self.scale_or_join(op, lhs, rhs, span);
                }
                let (lhs, rhs, joined) = self.join_operands(lhs, rhs, span)?;
                if !joined.is_numeric() {
                    return Err(CompileError::invalid_types(span));
                }
                build(lhs, rhs, joined)
            }
            Mod => {
                let (lhs, rhs, joined) = self.join_operands(lhs, rhs, span)?;
                if !joined.is_numeric() {
                    return Err(CompileError::invalid_types(span));
                }
                build(lhs, rhs, joined)
            }
            Pow => {
                if !(lhs.ty.is_numeric() && rhs.ty.is_numeric()) {
                    return Err(CompileError::invalid_types(span));
                }
                let lhs = self.coerce_to(lhs, &Type::F64)?;
                let rhs = self.coerce_to(rhs, &Type::F64)?;
                build(lhs, rhs, Type::F64)
            }
            Lt | Le | Gt | Ge => {
                let lhs = self.adopt(lhs, &rhs.ty);
                let rhs = self.adopt(rhs, &lhs.ty);
                let joined = join_types(&lhs.ty, &rhs.ty)
                    .filter(|t| t.is_numeric())
                    .ok_or_else(|| CompileError::invalid_types(span))?;
                let lhs = self.coerce_to(lhs, &joined)?;
                let rhs = self.coerce_to(rhs, &joined)?;
                build(lhs, rhs, Type::BOOL)
            }
            Eq | Ne => {
                let lhs = self.adopt(lhs, &rhs.ty);
                let rhs = self.adopt(rhs, &lhs.ty);
                if lhs.ty.is_bool() && rhs.ty.is_bool() {
                    return build(lhs, rhs, Type::BOOL);
                }
                if let (Some(a), Some(b)) = (lhs.ty.key_relation(), rhs.ty.key_relation()) {
                    if a == b {
                        return build(lhs, rhs, Type::BOOL);
                    }
                    return Err(CompileError::invalid_types(span));
                }
                let joined = join_types(&lhs.ty, &rhs.ty)
                    .filter(|t| t.is_numeric())
                    .ok_or_else(|| CompileError::invalid_types(span))?;
                let lhs = self.coerce_to(lhs, &joined)?;
                let rhs = self.coerce_to(rhs, &joined)?;
                build(lhs, rhs, Type::BOOL)
            }
            And | Or => {
                if !(lhs.ty.is_bool() && rhs.ty.is_bool()) {
                    return Err(CompileError::invalid_types(span));
                }
                build(lhs, rhs, Type::BOOL)
            }
        }
    }

    /// `*` and elementwise `/`: scalar×scalar, scalar×vector/matrix, and
    /// vector/matrix×scalar.
    fn scale_or_join(
        &mut self,
        op: BinOp,
        lhs: TypedExpr,
        rhs: TypedExpr,
        span: Span,
    ) -> CompileResult<TypedExpr> {
        let build = |lhs: TypedExpr, rhs: TypedExpr, ty: Type| {
            Ok(TypedExpr::new(
                TExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                ty,
                span,
            ))
        };
        let scale = |agg: &Type, scalar: &Type| -> Option<Type> {
            let se = match scalar {
                Type::Primitive(p) if p.is_numeric() => *p,
                _ => return None,
            };
            match agg {
                Type::Vector { elem, len } => {
                    join_prim(*elem, se).map(|e| Type::Vector { elem: e, len: *len })
                }
                Type::Matrix { elem, rows, cols } => join_prim(*elem, se).map(|e| Type::Matrix {
                    elem: e,
                    rows: *rows,
                    cols: *cols,
                }),
                _ => None,
            }
        };

        if lhs.ty.is_numeric() && rhs.ty.is_numeric() {
            let (lhs, rhs, joined) = self.join_operands(lhs, rhs, span)?;
            return build(lhs, rhs, joined);
        }
        if (lhs.ty.is_vector() || lhs.ty.is_matrix()) && rhs.ty.is_numeric() {
            let ty = scale(&lhs.ty, &rhs.ty).ok_or_else(|| CompileError::invalid_types(span))?;
            let elem = Type::Primitive(ty.elem().expect("scaled type has an element"));
            let lhs = self.coerce_to(lhs, &ty)?;
            let rhs = self.coerce_to(rhs, &elem)?;
            return build(lhs, rhs, ty);
        }
        if op == BinOp::Mul && lhs.ty.is_numeric() && (rhs.ty.is_vector() || rhs.ty.is_matrix()) {
            let ty = scale(&rhs.ty, &lhs.ty).ok_or_else(|| CompileError::invalid_types(span))?;
            let elem = Type::Primitive(ty.elem().expect("scaled type has an element"));
            let lhs = self.coerce_to(lhs, &elem)?;
            let rhs = self.coerce_to(rhs, &ty)?;
            return build(lhs, rhs, ty);
        }
        Err(CompileError::invalid_types(span))
    }

    fn unary(&mut self, op: UnOp, operand: TypedExpr, span: Span) -> CompileResult<TypedExpr> {
        match op {
            UnOp::Neg => {
                // Fold negated literals so they stay adoptable constants
                if let TExprKind::Const(ConstValue::Number(n)) = &operand.kind {
                    let v = ConstValue::Number(-n);
                    return Ok(TypedExpr::new(TExprKind::Const(v), operand.ty, span));
                }
                let ok = match &operand.ty {
                    Type::Primitive(p) => p.is_signed() || p.is_float(),
                    Type::Vector { elem, .. } | Type::Matrix { elem, .. } => {
                        elem.is_signed() || elem.is_float()
                    }
                    _ => false,
                };
                if !ok {
                    return Err(CompileError::invalid_types(span));
                }
                let ty = operand.ty.clone();
                Ok(TypedExpr::new(
                    TExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    ty,
                    span,
                ))
            }
            UnOp::Not => {
                if !operand.ty.is_bool() {
                    return Err(CompileError::invalid_types(span));
                }
                Ok(TypedExpr::new(
                    TExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    Type::BOOL,
                    span,
                ))
            }
        }
    }

    fn builtin(
        &mut self,
        b: Builtin,
        args: Vec<TypedExpr>,
        span: Span,
    ) -> CompileResult<TypedExpr> {
        use Builtin::*;
        let arity = |n: usize| -> CompileResult<()> {
            if args.len() != n {
                return Err(CompileError::new(
                    ErrorKind::Arity,
                    span,
                    format!("{} takes {} arguments, got {}", b.name(), n, args.len()),
                ));
            }
            Ok(())
        };
        match b {
            Acos | Asin | Atan | Cbrt | Ceil | Cos | Fabs | Floor | Log | Sin | Sqrt | Tan => {
                arity(1)?;
                let args = args
                    .into_iter()
                    .map(|a| self.coerce_to(a, &Type::F64))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(TypedExpr::new(
                    TExprKind::BuiltinCall { builtin: b, args },
                    Type::F64,
                    span,
                ))
            }
            Fmod | Pow | Fmin | Fmax => {
                arity(2)?;
                let args = args
                    .into_iter()
                    .map(|a| self.coerce_to(a, &Type::F64))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(TypedExpr::new(
                    TExprKind::BuiltinCall { builtin: b, args },
                    Type::F64,
                    span,
                ))
            }
            Imin | Imax => {
                arity(2)?;
                let mut it = args.into_iter();
                let lhs = it.next().expect("arity checked");
                let rhs = it.next().expect("arity checked");
                let (lhs, rhs, joined) = self.join_operands(lhs, rhs, span)?;
                if !joined.is_integer() {
                    return Err(CompileError::invalid_types(span)
                        .with_note(format!("{} requires integers", b.name())));
                }
                Ok(TypedExpr::new(
                    TExprKind::BuiltinCall {
                        builtin: b,
                        args: vec![lhs, rhs],
                    },
                    joined,
                    span,
                ))
            }
            Rand => {
                arity(0)?;
                Ok(TypedExpr::new(
                    TExprKind::BuiltinCall {
                        builtin: b,
                        args: Vec::new(),
                    },
                    Type::F64,
                    span,
                ))
            }
            Dot => {
                arity(2)?;
                let mut it = args.into_iter();
                let lhs = it.next().expect("arity checked");
                let rhs = it.next().expect("arity checked");
                let (lhs, rhs, joined) = self.join_operands(lhs, rhs, span)?;
                let elem = match &joined {
                    Type::Vector { elem, len } if *len <= 3 => *elem,
                    _ => {
                        return Err(CompileError::invalid_types(span)
                            .with_note("dot requires vectors of width 1-3"));
                    }
                };
                Ok(TypedExpr::new(
                    TExprKind::BuiltinCall {
                        builtin: b,
                        args: vec![lhs, rhs],
                    },
                    Type::Primitive(elem),
                    span,
                ))
            }
            Assert => Err(CompileError::invalid_types(span)
                .with_note("assert is a statement, not an expression")),
            Id | Xid | Yid | Zid | Affine | UnsafeRow => Err(CompileError::new(
                ErrorKind::Internal,
                span,
                format!("'{}' should have been resolved during specialization", b.name()),
            )),
        }
    }

    fn helper_call(
        &mut self,
        function: &FunctionId,
        args: Vec<TypedExpr>,
        span: Span,
    ) -> CompileResult<TypedExpr> {
        let (params, ret) = self.helper_signature(function, span)?;
        if args.len() != params.len() {
            return Err(CompileError::new(
                ErrorKind::Arity,
                span,
                format!(
                    "'{}' takes {} arguments, got {}",
                    function,
                    params.len(),
                    args.len()
                ),
            ));
        }
        let args = args
            .into_iter()
            .zip(&params)
            .map(|(a, p)| self.coerce_to(a, p))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(TypedExpr::new(
            TExprKind::HelperCall {
                function: function.clone(),
                args,
            },
            ret,
            span,
        ))
    }

    /// Parameter and return types of a helper, resolving the return type
    /// through its body when it was not declared.
    fn helper_signature(
        &mut self,
        function: &FunctionId,
        span: Span,
    ) -> CompileResult<(Vec<Type>, Type)> {
        if let Some(sig) = self.helper_sigs.get(function) {
            return Ok(sig.clone());
        }
        if self.helper_stack.contains(function) {
            return Err(CompileError::new(
                ErrorKind::Arity,
                span,
                format!("helper '{}' is recursive", function),
            ));
        }
        let def = self.cat.function(function)?.clone();
        let sig = match &def {
            FunctionDef::Helper {
                params,
                ret: Some(ret),
                ..
            } => (params.iter().map(|(_, t)| t.clone()).collect(), ret.clone()),
            FunctionDef::Helper { .. } => {
                // Infer the return type by checking the helper body with
                // this checker, so the in-progress stack sees cycles that
                // cross helper boundaries
                self.helper_stack.push(function.clone());
                let spec = specialize_helper(self.cat, self.env, &def)?;
                let saved_scope = std::mem::take(&mut self.scope);
                for (name, ty) in &spec.params {
                    self.scope.push((name.clone(), ty.clone()));
                }
                let body = self.expr(&spec.body);
                self.scope = saved_scope;
                self.helper_stack.pop();
                let body = body?;
                (
                    spec.params.into_iter().map(|(_, t)| t).collect(),
                    body.ty,
                )
            }
            FunctionDef::Kernel { .. } => {
                return Err(CompileError::new(
                    ErrorKind::Arity,
                    span,
                    format!("kernel '{}' cannot be called from kernel code", function),
                ));
            }
        };
        self.helper_sigs.insert(function.clone(), sig.clone());
        Ok(sig)
    }

    fn vector_lit(&mut self, items: Vec<TypedExpr>, span: Span) -> CompileResult<TypedExpr> {
        if items.is_empty() || items.len() > 6 {
            return Err(CompileError::invalid_types(span)
                .with_note("vector literals have 1-6 elements"));
        }
        let mut elem: Option<Primitive> = None;
        for i in &items {
            let p = match &i.ty {
                Type::Primitive(p) if p.is_numeric() => *p,
                _ => return Err(CompileError::invalid_types(i.span.or(span))),
            };
            elem = Some(match elem {
                None => p,
                Some(e) => {
                    join_prim(e, p).ok_or_else(|| CompileError::invalid_types(span))?
                }
            });
        }
        let elem = elem.expect("non-empty literal");
        let items = items
            .into_iter()
            .map(|i| self.coerce_to(i, &Type::Primitive(elem)))
            .collect::<CompileResult<Vec<_>>>()?;
        let len = items.len() as u8;
        Ok(TypedExpr::new(
            TExprKind::VectorLit(items),
            Type::Vector { elem, len },
            span,
        ))
    }

    fn matrix_lit(
        &mut self,
        rows: Vec<Vec<TypedExpr>>,
        span: Span,
    ) -> CompileResult<TypedExpr> {
        if rows.is_empty() || rows.len() > 6 {
            return Err(CompileError::invalid_types(span));
        }
        let cols = rows[0].len();
        if cols == 0 || cols > 6 || rows.iter().any(|r| r.len() != cols) {
            return Err(CompileError::invalid_types(span)
                .with_note("matrix rows must be equal length"));
        }
        let mut elem: Option<Primitive> = None;
        for r in &rows {
            for i in r {
                let p = match &i.ty {
                    Type::Primitive(p) if p.is_numeric() => *p,
                    _ => return Err(CompileError::invalid_types(i.span.or(span))),
                };
                elem = Some(match elem {
                    None => p,
                    Some(e) => {
                        join_prim(e, p).ok_or_else(|| CompileError::invalid_types(span))?
                    }
                });
            }
        }
        let elem = elem.expect("non-empty literal");
        let rows = rows
            .into_iter()
            .map(|r| {
                r.into_iter()
                    .map(|i| self.coerce_to(i, &Type::Primitive(elem)))
                    .collect::<CompileResult<Vec<_>>>()
            })
            .collect::<CompileResult<Vec<_>>>()?;
        let ty = Type::Matrix {
            elem,
            rows: rows.len() as u8,
            cols: cols as u8,
        };
        Ok(TypedExpr::new(TExprKind::MatrixLit(rows), ty, span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::raw::Expr as E;
    use crate::ast::FunctionDef;
    use crate::specialize::{specialize_kernel, EnvValue};

    fn setup() -> (Catalog, Env) {
        let mut cat = Catalog::new();
        let rel = cat.add_relation("verts", vec![10], false, None).unwrap();
        cat.add_field(&rel, "x", Type::Primitive(Primitive::I32))
            .unwrap();
        cat.add_field(&rel, "pos", Type::vector(Primitive::F64, 3))
            .unwrap();
        let g = cat
            .add_global("total", Type::F64, ConstValue::Number(0.0))
            .unwrap();
        let mut env = Env::with_builtins();
        env.bind("verts", EnvValue::Relation(rel));
        env.bind("total", EnvValue::Global(g));
        (cat, env)
    }

    fn check(cat: &Catalog, env: &Env, body: Vec<Stmt>) -> CompileResult<TypedFunction> {
        let def = FunctionDef::Kernel {
            id: "k".into(),
            name: "k".to_string(),
            param: "v".to_string(),
            body,
        };
        let spec = specialize_kernel(cat, env, &def, &"verts".into())?;
        check_kernel(cat, env, &spec)
    }

    #[test]
    fn test_widening_lattice() {
        use Primitive::*;
        assert!(widens_to(I8, I32));
        assert!(widens_to(I32, F64));
        assert!(widens_to(F32, F64));
        assert!(!widens_to(I64, I32));
        assert!(!widens_to(F64, F32));
        assert!(!widens_to(Bool, I32));
        assert!(!widens_to(I32, U32));
        assert!(!widens_to(U32, I32));

        assert_eq!(join_prim(I16, I64), Some(I64));
        assert_eq!(join_prim(I32, F32), Some(F64));
        assert_eq!(join_prim(I8, U8), None);
        assert_eq!(join_prim(Bool, I8), None);
    }

    #[test]
    fn test_literal_adopts_field_type() {
        let (cat, env) = setup();
        // v.x = v.x + 1 with x: i32 — the literal must not force f64
        let f = check(
            &cat,
            &env,
            vec![Stmt::assign(
                E::name("v").dot("x"),
                E::name("v").dot("x").add(E::num(1.0)),
            )],
        )
        .unwrap();
        let TypedFunction::Kernel { body, .. } = f else {
            panic!("expected kernel")
        };
        match &body[0].kind {
            TStmtKind::WriteField { value, .. } => {
                assert_eq!(value.ty, Type::Primitive(Primitive::I32));
            }
            other => panic!("expected field write, got {:?}", other),
        }
    }

    #[test]
    fn test_bool_number_comparison_invalid() {
        let (cat, env) = setup();
        let err = check(
            &cat,
            &env,
            vec![Stmt::local("a", E::num(1.0).lt(E::boolean(true)))],
        )
        .unwrap_err();
        assert_eq!(err.message, "invalid types");
    }

    #[test]
    fn test_vector_comparison_invalid() {
        let (cat, env) = setup();
        let err = check(
            &cat,
            &env,
            vec![Stmt::local(
                "a",
                E::name("v").dot("pos").lt(E::name("v").dot("pos")),
            )],
        )
        .unwrap_err();
        assert_eq!(err.message, "invalid types");
    }

    #[test]
    fn test_pow_on_vector_invalid() {
        let (cat, env) = setup();
        let err = check(
            &cat,
            &env,
            vec![Stmt::local(
                "a",
                E::binary(BinOp::Pow, E::name("v").dot("pos"), E::num(2.0)),
            )],
        )
        .unwrap_err();
        assert_eq!(err.message, "invalid types");
    }

    #[test]
    fn test_mixed_sign_arithmetic_invalid() {
        let (mut cat, mut env) = setup();
        let rel: RelationId = "verts".into();
        cat.add_field(&rel, "u", Type::Primitive(Primitive::U32))
            .unwrap();
        env.bind("verts", EnvValue::Relation(rel));
        let err = check(
            &cat,
            &env,
            vec![Stmt::local(
                "a",
                E::name("v").dot("u").add(E::name("v").dot("x")),
            )],
        )
        .unwrap_err();
        assert_eq!(err.message, "invalid types");
    }

    #[test]
    fn test_global_reduce_checks() {
        let (cat, env) = setup();
        let f = check(
            &cat,
            &env,
            vec![Stmt::reduce(
                E::name("total"),
                tessel_ir::ReduceOp::Add,
                E::num(1.0),
            )],
        )
        .unwrap();
        let TypedFunction::Kernel { body, .. } = f else {
            panic!("expected kernel")
        };
        assert!(matches!(body[0].kind, TStmtKind::ReduceGlobal { .. }));
    }

    #[test]
    fn test_comparison_well_typed_pairs() {
        let (cat, env) = setup();
        for op in [BinOp::Eq, BinOp::Ne, BinOp::Lt, BinOp::Le, BinOp::Gt, BinOp::Ge] {
            let f = check(
                &cat,
                &env,
                vec![Stmt::local(
                    "a",
                    E::binary(op, E::name("v").dot("x"), E::name("v").dot("x")),
                )],
            )
            .unwrap();
            let TypedFunction::Kernel { body, .. } = f else {
                panic!("expected kernel")
            };
            match &body[0].kind {
                TStmtKind::Local { init, .. } => assert_eq!(init.ty, Type::BOOL),
                other => panic!("expected local, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_key_equality_same_relation_only() {
        let (mut cat, mut env) = setup();
        cat.add_relation("other", vec![4], false, None).unwrap();
        let rel: RelationId = "verts".into();
        cat.add_field(&rel, "link", Type::key("other")).unwrap();
        env.bind("verts", EnvValue::Relation(rel));

        // key == key of the same relation is fine
        check(
            &cat,
            &env,
            vec![Stmt::local(
                "same",
                E::name("v").dot("link").eq(E::name("v").dot("link")),
            )],
        )
        .unwrap();

        // key == number is not
        let err = check(
            &cat,
            &env,
            vec![Stmt::local("bad", E::name("v").dot("link").eq(E::num(0.0)))],
        )
        .unwrap_err();
        assert_eq!(err.message, "invalid types");
    }

    #[test]
    fn test_if_chain_flattens() {
        let (cat, env) = setup();
        let f = check(
            &cat,
            &env,
            vec![Stmt::new(StmtKind::If {
                arms: vec![
                    (E::name("v").dot("x").lt(E::num(0.0)), vec![]),
                    (E::name("v").dot("x").lt(E::num(10.0)), vec![]),
                ],
                else_body: Some(vec![]),
            })],
        )
        .unwrap();
        let TypedFunction::Kernel { body, .. } = f else {
            panic!("expected kernel")
        };
        match &body[0].kind {
            TStmtKind::If { else_body, .. } => {
                assert_eq!(else_body.len(), 1);
                assert!(matches!(else_body[0].kind, TStmtKind::If { .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_helper_return_inference() {
        let (mut cat, mut env) = setup();
        let helper = FunctionDef::Helper {
            id: "twice".into(),
            name: "twice".to_string(),
            params: vec![("a".to_string(), Type::F64)],
            ret: None,
            body: E::name("a").add(E::name("a")),
        };
        cat.add_function(helper).unwrap();
        env.bind("twice", EnvValue::Function("twice".into()));

        let f = check(
            &cat,
            &env,
            vec![Stmt::local(
                "d",
                E::name("twice").call(vec![E::num(2.0)]),
            )],
        )
        .unwrap();
        let TypedFunction::Kernel { body, .. } = f else {
            panic!("expected kernel")
        };
        match &body[0].kind {
            TStmtKind::Local { init, .. } => assert_eq!(init.ty, Type::F64),
            other => panic!("expected local, got {:?}", other),
        }
    }

    #[test]
    fn test_helper_wrong_arity() {
        let (mut cat, mut env) = setup();
        cat.add_function(FunctionDef::Helper {
            id: "one".into(),
            name: "one".to_string(),
            params: vec![("a".to_string(), Type::F64)],
            ret: Some(Type::F64),
            body: E::name("a"),
        })
        .unwrap();
        env.bind("one", EnvValue::Function("one".into()));
        let err = check(
            &cat,
            &env,
            vec![Stmt::local(
                "d",
                E::name("one").call(vec![E::num(1.0), E::num(2.0)]),
            )],
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arity);
    }

    #[test]
    fn test_affine_non_diagonal_rejected() {
        let mut cat = Catalog::new();
        let g = crate::grid::create_grid(&mut cat, "g", &[5, 5], 0).unwrap();
        cat.add_field(&g.cells, "f", Type::F64).unwrap();
        let mut env = Env::with_builtins();
        env.bind("cells", EnvValue::Relation(g.cells.clone()));

        let def = FunctionDef::Kernel {
            id: "k".into(),
            name: "k".to_string(),
            param: "c".to_string(),
            body: vec![Stmt::local(
                "a",
                E::name("Affine")
                    .call(vec![
                        E::name("cells"),
                        E::constant(ConstValue::List(vec![
                            ConstValue::List(vec![
                                ConstValue::Number(1.0),
                                ConstValue::Number(1.0),
                                ConstValue::Number(0.0),
                            ]),
                            ConstValue::List(vec![
                                ConstValue::Number(0.0),
                                ConstValue::Number(1.0),
                                ConstValue::Number(0.0),
                            ]),
                        ])),
                        E::name("c"),
                    ])
                    .dot("f"),
            )],
        };
        let spec = specialize_kernel(&cat, &env, &def, &g.cells).unwrap();
        let err = check_kernel(&cat, &env, &spec).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Stencil);
    }

    #[test]
    fn test_insert_requires_live_mask_and_full_record() {
        let (mut cat, mut env) = setup();
        let elastic = cat.add_relation("parts", vec![4], true, None).unwrap();
        cat.add_field(&elastic, "m", Type::F64).unwrap();
        env.bind("parts", EnvValue::Relation(elastic));

        // Full record inserts fine
        check(
            &cat,
            &env,
            vec![Stmt::insert(
                E::name("parts"),
                vec![("m".to_string(), E::num(1.0))],
            )],
        )
        .unwrap();

        // Missing field rejected
        let err = check(
            &cat,
            &env,
            vec![Stmt::insert(E::name("parts"), vec![])],
        )
        .unwrap_err();
        assert_eq!(err.message, "invalid types");

        // Insert into a non-elastic relation rejected
        let err = check(
            &cat,
            &env,
            vec![Stmt::insert(
                E::name("verts"),
                vec![("x".to_string(), E::num(0.0))],
            )],
        )
        .unwrap_err();
        assert_eq!(err.message, "invalid types");
    }
}
