//! Phase analysis
//!
//! For every (kernel, field-or-global) pair, infer the access mode —
//! read, write, or reduce-with-op — and prove the kernel data-race-free
//! under the parallel-per-key execution contract. Writes must be
//! centered; a field is never both written and reduced; a global is
//! read-only or reduced with exactly one op. The kernel as a whole is
//! classified centered or stencil.

use indexmap::IndexMap;

use tessel_ir::{FieldId, FunctionId, GlobalId, ReduceOp, RelationId};

use crate::ast::typed::{TExprKind, TStmtKind, TypedExpr, TypedFunction, TypedStmt};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::relation::Catalog;
use crate::span::Span;

/// Access mode of one kernel on one field or global.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseType {
    pub read: bool,
    pub write: bool,
    pub reduce: Option<ReduceOp>,
    /// Every access so far went through the kernel parameter
    pub centered: bool,
}

/// Everything the phase analyzer learned about one kernel.
#[derive(Debug, Clone, Default)]
pub struct PhaseResult {
    pub field_use: IndexMap<FieldId, PhaseType>,
    pub global_use: IndexMap<GlobalId, PhaseType>,
    /// All field accesses go through the parameter key
    pub is_centered: bool,
    /// Relation rows are appended to, if any
    pub inserts: Option<RelationId>,
    /// Relation rows are deleted from, if any
    pub deletes: Option<RelationId>,
}

impl PhaseResult {
    /// Globals reduced by the kernel, in first-use order.
    pub fn reduced_globals(&self) -> Vec<(GlobalId, ReduceOp)> {
        self.global_use
            .iter()
            .filter_map(|(g, pt)| pt.reduce.map(|op| (g.clone(), op)))
            .collect()
    }
}

/// Analyze a checked kernel. `helpers` must contain the typed body of
/// every helper the kernel (transitively) calls.
pub fn analyze_kernel(
    cat: &Catalog,
    kernel: &TypedFunction,
    helpers: &IndexMap<FunctionId, TypedFunction>,
) -> CompileResult<PhaseResult> {
    let (relation, param, body) = match kernel {
        TypedFunction::Kernel {
            relation,
            param,
            body,
            ..
        } => (relation, param.as_str(), body),
        TypedFunction::Helper { id, .. } => {
            return Err(CompileError::new(
                ErrorKind::Internal,
                Span::none(),
                format!("phase analysis over helper '{}'", id),
            ));
        }
    };

    let mut an = Analyzer {
        cat,
        relation,
        param,
        helpers,
        result: PhaseResult::default(),
    };
    for s in body {
        an.stmt(s)?;
    }

    // Read-write on one field is only race-free when every access to it
    // is centered
    for (field, pt) in &an.result.field_use {
        if pt.read && pt.write && !pt.centered {
            return Err(CompileError::new(
                ErrorKind::Phase,
                Span::none(),
                format!(
                    "field '{}' is both read and written with non-centered access",
                    field
                ),
            ));
        }
    }

    an.result.is_centered = an.result.field_use.values().all(|pt| pt.centered);
    Ok(an.result)
}

struct Analyzer<'a> {
    cat: &'a Catalog,
    relation: &'a RelationId,
    param: &'a str,
    helpers: &'a IndexMap<FunctionId, TypedFunction>,
    result: PhaseResult,
}

impl<'a> Analyzer<'a> {
    fn merge_field_read(&mut self, field: &FieldId, centered: bool, span: Span) -> CompileResult<()> {
        let pt = self
            .result
            .field_use
            .entry(field.clone())
            .or_insert(PhaseType {
                centered: true,
                ..PhaseType::default()
            });
        if pt.reduce.is_some() {
            return Err(CompileError::new(
                ErrorKind::Phase,
                span,
                format!("field '{}' cannot be read and reduced in one kernel", field),
            ));
        }
        pt.read = true;
        pt.centered &= centered;
        Ok(())
    }

    fn merge_field_write(&mut self, field: &FieldId, span: Span) -> CompileResult<()> {
        let pt = self
            .result
            .field_use
            .entry(field.clone())
            .or_insert(PhaseType {
                centered: true,
                ..PhaseType::default()
            });
        if pt.reduce.is_some() {
            return Err(CompileError::new(
                ErrorKind::Phase,
                span,
                format!("field '{}' cannot be written and reduced in one kernel", field),
            ));
        }
        pt.write = true;
        Ok(())
    }

    fn merge_field_reduce(&mut self, field: &FieldId, op: ReduceOp, span: Span) -> CompileResult<()> {
        let pt = self
            .result
            .field_use
            .entry(field.clone())
            .or_insert(PhaseType {
                centered: true,
                ..PhaseType::default()
            });
        if pt.write {
            return Err(CompileError::new(
                ErrorKind::Phase,
                span,
                format!("field '{}' cannot be written and reduced in one kernel", field),
            ));
        }
        if pt.read {
            return Err(CompileError::new(
                ErrorKind::Phase,
                span,
                format!("field '{}' cannot be read and reduced in one kernel", field),
            ));
        }
        match pt.reduce {
            None => pt.reduce = Some(op),
            Some(prev) if prev == op => {}
            Some(prev) => {
                return Err(CompileError::new(
                    ErrorKind::Phase,
                    span,
                    format!(
                        "field '{}' reduced with both '{}' and '{}'",
                        field, prev, op
                    ),
                ));
            }
        }
        Ok(())
    }

    fn merge_global_read(&mut self, global: &GlobalId, span: Span) -> CompileResult<()> {
        let pt = self
            .result
            .global_use
            .entry(global.clone())
            .or_insert(PhaseType {
                centered: true,
                ..PhaseType::default()
            });
        if pt.reduce.is_some() {
            return Err(CompileError::new(
                ErrorKind::Phase,
                span,
                format!("global '{}' cannot be read and reduced in one kernel", global),
            ));
        }
        pt.read = true;
        Ok(())
    }

    fn merge_global_reduce(
        &mut self,
        global: &GlobalId,
        op: ReduceOp,
        span: Span,
    ) -> CompileResult<()> {
        let pt = self
            .result
            .global_use
            .entry(global.clone())
            .or_insert(PhaseType {
                centered: true,
                ..PhaseType::default()
            });
        if pt.read {
            return Err(CompileError::new(
                ErrorKind::Phase,
                span,
                format!("global '{}' cannot be read and reduced in one kernel", global),
            ));
        }
        match pt.reduce {
            None => pt.reduce = Some(op),
            Some(prev) if prev == op => {}
            Some(prev) => {
                return Err(CompileError::new(
                    ErrorKind::Phase,
                    span,
                    format!(
                        "global '{}' reduced with both '{}' and '{}'",
                        global, prev, op
                    ),
                ));
            }
        }
        Ok(())
    }

    fn stmt(&mut self, s: &TypedStmt) -> CompileResult<()> {
        match &s.kind {
            TStmtKind::Local { init, .. } => self.expr(init),
            TStmtKind::AssignVar { value, .. } => self.expr(value),
            TStmtKind::WriteField { field, key, value } => {
                if !key.is_param(self.param) {
                    return Err(CompileError::new(
                        ErrorKind::Stencil,
                        s.span,
                        format!(
                            "write to '{}' through a non-centered key; writes must target the kernel parameter",
                            field
                        ),
                    ));
                }
                self.merge_field_write(field, s.span)?;
                self.expr(key)?;
                self.expr(value)
            }
            TStmtKind::ReduceField {
                field,
                key,
                op,
                value,
            } => {
                let field_rel = &self.cat.field(field)?.relation;
                if field_rel != self.relation {
                    return Err(CompileError::new(
                        ErrorKind::Phase,
                        s.span,
                        format!(
                            "reduction target '{}' is not a field of the centered relation '{}'",
                            field, self.relation
                        ),
                    ));
                }
                self.merge_field_reduce(field, *op, s.span)?;
                self.key_expr(key)?;
                self.expr(value)
            }
            TStmtKind::ReduceGlobal { global, op, value } => {
                self.merge_global_reduce(global, *op, s.span)?;
                self.expr(value)
            }
            TStmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.expr(cond)?;
                for s in then_body.iter().chain(else_body) {
                    self.stmt(s)?;
                }
                Ok(())
            }
            TStmtKind::For { lo, hi, body, .. } => {
                self.expr(lo)?;
                self.expr(hi)?;
                for s in body {
                    self.stmt(s)?;
                }
                Ok(())
            }
            TStmtKind::Assert(cond) => self.expr(cond),
            TStmtKind::Insert { relation, values } => {
                if relation == self.relation {
                    return Err(CompileError::new(
                        ErrorKind::Phase,
                        s.span,
                        format!("cannot insert into the mapped relation '{}'", relation),
                    ));
                }
                match &self.result.inserts {
                    None => self.result.inserts = Some(relation.clone()),
                    Some(prev) if prev == relation => {}
                    Some(prev) => {
                        return Err(CompileError::new(
                            ErrorKind::Phase,
                            s.span,
                            format!(
                                "kernel inserts into both '{}' and '{}'",
                                prev, relation
                            ),
                        ));
                    }
                }
                for (_, v) in values {
                    self.expr(v)?;
                }
                Ok(())
            }
            TStmtKind::Delete { key } => {
                if !key.is_param(self.param) {
                    return Err(CompileError::new(
                        ErrorKind::Phase,
                        s.span,
                        "delete must target the kernel parameter",
                    ));
                }
                let rel = key
                    .ty
                    .key_relation()
                    .expect("checker typed delete keys")
                    .clone();
                self.result.deletes = Some(rel);
                Ok(())
            }
        }
    }

    /// Key sub-expressions contribute reads of anything they touch but
    /// are not themselves accesses.
    fn key_expr(&mut self, key: &TypedExpr) -> CompileResult<()> {
        match &key.kind {
            TExprKind::Var(_) => Ok(()),
            TExprKind::Affine { base, .. } | TExprKind::Rekey { key: base, .. } => {
                self.key_expr(base)
            }
            TExprKind::UnsafeRow { index, .. } => self.expr(index),
            _ => self.expr(key),
        }
    }

    fn expr(&mut self, e: &TypedExpr) -> CompileResult<()> {
        match &e.kind {
            TExprKind::ReadField { field, key } => {
                self.merge_field_read(field, key.is_param(self.param), e.span)?;
                self.key_expr(key)
            }
            TExprKind::ReadGlobal(global) => self.merge_global_read(global, e.span),
            TExprKind::HelperCall { function, args } => {
                for a in args {
                    self.expr(a)?;
                }
                self.helper_effects(function, e.span)
            }
            TExprKind::Const(_) | TExprKind::Var(_) => Ok(()),
            TExprKind::Affine { base, .. } => self.key_expr(base),
            TExprKind::Rekey { key, .. } => self.key_expr(key),
            TExprKind::UnsafeRow { index, .. } => self.expr(index),
            TExprKind::KeyCompExpr { key, .. } => self.key_expr(key),
            TExprKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs)?;
                self.expr(rhs)
            }
            TExprKind::Unary { operand, .. } | TExprKind::Cast { operand } => self.expr(operand),
            TExprKind::BuiltinCall { args, .. } => {
                for a in args {
                    self.expr(a)?;
                }
                Ok(())
            }
            TExprKind::VectorLit(items) => {
                for i in items {
                    self.expr(i)?;
                }
                Ok(())
            }
            TExprKind::MatrixLit(rows) => {
                for r in rows {
                    for i in r {
                        self.expr(i)?;
                    }
                }
                Ok(())
            }
            TExprKind::Index { base, indices } => {
                self.expr(base)?;
                for i in indices {
                    self.expr(i)?;
                }
                Ok(())
            }
        }
    }

    /// Fold a helper's accesses into the caller: helper field reads count
    /// as non-centered reads (the helper cannot know the caller's key),
    /// global reads as reads. Helpers have no write or reduce forms.
    fn helper_effects(&mut self, function: &FunctionId, span: Span) -> CompileResult<()> {
        let Some(TypedFunction::Helper { body, .. }) = self.helpers.get(function) else {
            return Err(CompileError::new(
                ErrorKind::Internal,
                span,
                format!("helper '{}' missing from the phase oracle", function),
            ));
        };
        let mut reads: Vec<(FieldId, Span)> = Vec::new();
        let mut globals: Vec<(GlobalId, Span)> = Vec::new();
        let mut calls: Vec<FunctionId> = Vec::new();
        collect_helper_accesses(body, &mut reads, &mut globals, &mut calls);
        for (field, span) in reads {
            self.merge_field_read(&field, false, span)?;
        }
        for (global, span) in globals {
            self.merge_global_read(&global, span)?;
        }
        for callee in calls {
            self.helper_effects(&callee, span)?;
        }
        Ok(())
    }
}

/// Deduplicated field reads, global reads, and helper calls of a helper
/// body, for slot assignment during lowering.
pub fn helper_accesses(body: &TypedExpr) -> (Vec<FieldId>, Vec<GlobalId>, Vec<FunctionId>) {
    let mut reads = Vec::new();
    let mut globals = Vec::new();
    let mut calls = Vec::new();
    collect_helper_accesses(body, &mut reads, &mut globals, &mut calls);
    let mut fields_out: Vec<FieldId> = Vec::new();
    for (f, _) in reads {
        if !fields_out.contains(&f) {
            fields_out.push(f);
        }
    }
    let mut globals_out: Vec<GlobalId> = Vec::new();
    for (g, _) in globals {
        if !globals_out.contains(&g) {
            globals_out.push(g);
        }
    }
    let mut calls_out: Vec<FunctionId> = Vec::new();
    for c in calls {
        if !calls_out.contains(&c) {
            calls_out.push(c);
        }
    }
    (fields_out, globals_out, calls_out)
}

fn collect_helper_accesses(
    e: &TypedExpr,
    reads: &mut Vec<(FieldId, Span)>,
    globals: &mut Vec<(GlobalId, Span)>,
    calls: &mut Vec<FunctionId>,
) {
    match &e.kind {
        TExprKind::ReadField { field, key } => {
            reads.push((field.clone(), e.span));
            collect_helper_accesses(key, reads, globals, calls);
        }
        TExprKind::ReadGlobal(g) => globals.push((g.clone(), e.span)),
        TExprKind::HelperCall { function, args } => {
            calls.push(function.clone());
            for a in args {
                collect_helper_accesses(a, reads, globals, calls);
            }
        }
        TExprKind::Const(_) | TExprKind::Var(_) => {}
        TExprKind::Affine { base, .. } => collect_helper_accesses(base, reads, globals, calls),
        TExprKind::Rekey { key, .. } | TExprKind::KeyCompExpr { key, .. } => {
            collect_helper_accesses(key, reads, globals, calls)
        }
        TExprKind::UnsafeRow { index, .. } => collect_helper_accesses(index, reads, globals, calls),
        TExprKind::Binary { lhs, rhs, .. } => {
            collect_helper_accesses(lhs, reads, globals, calls);
            collect_helper_accesses(rhs, reads, globals, calls);
        }
        TExprKind::Unary { operand, .. } | TExprKind::Cast { operand } => {
            collect_helper_accesses(operand, reads, globals, calls)
        }
        TExprKind::BuiltinCall { args, .. } => {
            for a in args {
                collect_helper_accesses(a, reads, globals, calls);
            }
        }
        TExprKind::VectorLit(items) => {
            for i in items {
                collect_helper_accesses(i, reads, globals, calls);
            }
        }
        TExprKind::MatrixLit(rows) => {
            for r in rows {
                for i in r {
                    collect_helper_accesses(i, reads, globals, calls);
                }
            }
        }
        TExprKind::Index { base, indices } => {
            collect_helper_accesses(base, reads, globals, calls);
            for i in indices {
                collect_helper_accesses(i, reads, globals, calls);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::raw::{Expr as E, Stmt};
    use crate::ast::FunctionDef;
    use crate::check::check_kernel;
    use crate::grid::create_grid;
    use crate::specialize::{specialize_kernel, Env, EnvValue};
    use tessel_ir::{ConstValue, Primitive, Type};

    fn setup() -> (Catalog, Env) {
        let mut cat = Catalog::new();
        let rel = cat.add_relation("verts", vec![10], false, None).unwrap();
        cat.add_field(&rel, "x", Type::Primitive(Primitive::I32))
            .unwrap();
        cat.add_field(&rel, "y", Type::F64).unwrap();
        let g = cat
            .add_global("total", Type::F64, ConstValue::Number(0.0))
            .unwrap();
        let mut env = Env::with_builtins();
        env.bind("verts", EnvValue::Relation(rel));
        env.bind("total", EnvValue::Global(g));
        (cat, env)
    }

    fn analyze(cat: &Catalog, env: &Env, body: Vec<Stmt>) -> CompileResult<PhaseResult> {
        let def = FunctionDef::Kernel {
            id: "k".into(),
            name: "k".to_string(),
            param: "v".to_string(),
            body,
        };
        let spec = specialize_kernel(cat, env, &def, &"verts".into())?;
        let typed = check_kernel(cat, env, &spec)?;
        analyze_kernel(cat, &typed, &IndexMap::new())
    }

    #[test]
    fn test_centered_read_write() {
        let (cat, env) = setup();
        let result = analyze(
            &cat,
            &env,
            vec![Stmt::assign(
                E::name("v").dot("x"),
                E::name("v").dot("x").add(E::num(1.0)),
            )],
        )
        .unwrap();
        let pt = &result.field_use[&FieldId::from("verts.x")];
        assert!(pt.read && pt.write && pt.centered);
        assert!(result.is_centered);
    }

    #[test]
    fn test_write_and_reduce_conflict() {
        let (cat, env) = setup();
        let err = analyze(
            &cat,
            &env,
            vec![
                Stmt::assign(E::name("v").dot("x"), E::num(0.0)),
                Stmt::reduce(
                    E::name("v").dot("x"),
                    ReduceOp::Add,
                    E::num(1.0),
                ),
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Phase);
    }

    #[test]
    fn test_distinct_reduce_ops_conflict() {
        let (cat, env) = setup();
        let err = analyze(
            &cat,
            &env,
            vec![
                Stmt::reduce(E::name("v").dot("y"), ReduceOp::Add, E::num(1.0)),
                Stmt::reduce(E::name("v").dot("y"), ReduceOp::Mul, E::num(2.0)),
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Phase);
    }

    #[test]
    fn test_global_read_and_reduce_conflict() {
        let (cat, env) = setup();
        let err = analyze(
            &cat,
            &env,
            vec![
                Stmt::local("t", E::name("total")),
                Stmt::reduce(E::name("total"), ReduceOp::Add, E::num(1.0)),
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Phase);
    }

    #[test]
    fn test_global_reduce_alone_is_fine() {
        let (cat, env) = setup();
        let result = analyze(
            &cat,
            &env,
            vec![Stmt::reduce(
                E::name("total"),
                ReduceOp::Add,
                E::num(1.0),
            )],
        )
        .unwrap();
        assert_eq!(
            result.reduced_globals(),
            vec![(GlobalId::from("total"), ReduceOp::Add)]
        );
        // one of read/reduce, never both
        for pt in result.global_use.values() {
            assert!(!(pt.read && pt.reduce.is_some()));
        }
    }

    #[test]
    fn test_stencil_write_rejected() {
        // Kernel reading c.f and writing c(1,0).f must fail as a stencil
        // error
        let mut cat = Catalog::new();
        let g = create_grid(&mut cat, "g", &[5, 5], 0).unwrap();
        cat.add_field(&g.cells, "f", Type::F64).unwrap();
        let env = Env::with_builtins();
        let def = FunctionDef::Kernel {
            id: "k".into(),
            name: "k".to_string(),
            param: "c".to_string(),
            body: vec![Stmt::assign(
                E::name("c").call(vec![E::num(1.0), E::num(0.0)]).dot("f"),
                E::name("c").dot("f"),
            )],
        };
        let spec = specialize_kernel(&cat, &env, &def, &g.cells).unwrap();
        let typed = check_kernel(&cat, &env, &spec).unwrap();
        let err = analyze_kernel(&cat, &typed, &IndexMap::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Stencil);
    }

    #[test]
    fn test_stencil_read_classifies_kernel() {
        let mut cat = Catalog::new();
        let g = create_grid(&mut cat, "g", &[5, 5], 0).unwrap();
        cat.add_field(&g.cells, "f", Type::F64).unwrap();
        cat.add_field(&g.cells, "out", Type::F64).unwrap();
        let env = Env::with_builtins();
        let def = FunctionDef::Kernel {
            id: "k".into(),
            name: "k".to_string(),
            param: "c".to_string(),
            body: vec![Stmt::assign(
                E::name("c").dot("out"),
                E::name("c").call(vec![E::num(1.0), E::num(0.0)]).dot("f"),
            )],
        };
        let spec = specialize_kernel(&cat, &env, &def, &g.cells).unwrap();
        let typed = check_kernel(&cat, &env, &spec).unwrap();
        let result = analyze_kernel(&cat, &typed, &IndexMap::new()).unwrap();
        assert!(!result.is_centered);
        // writes and reduces stay disjoint
        let written: Vec<_> = result
            .field_use
            .iter()
            .filter(|(_, pt)| pt.write)
            .map(|(f, _)| f.clone())
            .collect();
        let reduced: Vec<_> = result
            .field_use
            .iter()
            .filter(|(_, pt)| pt.reduce.is_some())
            .map(|(f, _)| f.clone())
            .collect();
        assert!(written.iter().all(|f| !reduced.contains(f)));
    }

    #[test]
    fn test_insert_into_mapped_relation_rejected() {
        let (mut cat, mut env) = setup();
        // make the mapped relation elastic so the checker lets it through
        let parts = cat.add_relation("parts", vec![4], true, None).unwrap();
        cat.add_field(&parts, "m", Type::F64).unwrap();
        env.bind("parts", EnvValue::Relation(parts.clone()));

        let def = FunctionDef::Kernel {
            id: "k".into(),
            name: "k".to_string(),
            param: "p".to_string(),
            body: vec![Stmt::insert(
                E::name("parts"),
                vec![("m".to_string(), E::num(1.0))],
            )],
        };
        let spec = specialize_kernel(&cat, &env, &def, &parts).unwrap();
        let typed = check_kernel(&cat, &env, &spec).unwrap();
        let err = analyze_kernel(&cat, &typed, &IndexMap::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Phase);
    }
}
