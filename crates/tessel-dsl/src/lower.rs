//! Lowering and task emission
//!
//! Turns checked kernels into task specifications — signature, region
//! privileges, lowered per-key body — and the recorded control program
//! into the driver task. Affine keys become wrap-around neighbor offsets
//! with the target extents baked in, builtins become runtime operations,
//! and a single reduced global becomes the task's return accumulator.

use indexmap::IndexMap;
use tracing::{debug, warn};

use tessel_ir::driver::{CmpOp, ControlCond, ControlExpr, DriverOp, DriverTask};
use tessel_ir::lir::{BinOp, LirExpr, LirExprKind, LirStmt, MathFn};
use tessel_ir::{
    Backend, DomainSpec, FieldAccess, FieldId, FieldSlot, FunctionId, GlobalId, GlobalSlot,
    Privilege, ReducedGlobal, RegionRequirement, RelationId, SubsetBinding, SubsetId, TaskBody,
    TaskId, TaskSpec, Type,
};

use crate::ast::typed::{TExprKind, TStmtKind, TypedExpr, TypedFunction, TypedStmt};
use crate::ast::Builtin;
use crate::cache::{DomainKey, SpecializationCache};
use crate::check::{check_helper, check_kernel, join_types};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::phase::{analyze_kernel, helper_accesses, PhaseResult};
use crate::program::{Program, Stmt};
use crate::relation::{Catalog, SubsetData};
use crate::span::Span;
use crate::specialize::{specialize_helper, specialize_kernel, Env};

/// Emit (or fetch) the task for one kernel specialization.
pub fn kernel_task(
    cat: &Catalog,
    env: &Env,
    backend: Backend,
    cache: &mut SpecializationCache,
    function: &FunctionId,
    relation: &RelationId,
    subset: Option<&SubsetId>,
) -> CompileResult<TaskId> {
    let domain_key = match subset {
        Some(s) => DomainKey::Subset(s.clone()),
        None => DomainKey::Relation(relation.clone()),
    };
    if let Some(id) = cache.kernel_hit(function, &domain_key, backend) {
        return Ok(id.clone());
    }

    if let Some(s) = subset {
        let sub = cat.subset(s)?;
        if &sub.relation != relation {
            return Err(CompileError::new(
                ErrorKind::Arity,
                Span::none(),
                format!("subset '{}' does not restrict relation '{}'", s, relation),
            ));
        }
    }

    let def = cat.function(function)?;
    if !def.is_kernel() {
        return Err(CompileError::new(
            ErrorKind::Arity,
            Span::none(),
            format!("'{}' is a helper and cannot be launched over a domain", function),
        ));
    }

    let spec = specialize_kernel(cat, env, def, relation)?;
    let typed = check_kernel(cat, env, &spec)?;
    let helpers = resolve_helpers(cat, env, &typed)?;
    let phase = analyze_kernel(cat, &typed, &helpers)?;

    if (phase.inserts.is_some() || phase.deletes.is_some()) && backend != Backend::Cpu {
        return Err(CompileError::new(
            ErrorKind::UnsupportedBackend,
            Span::none(),
            format!("kernel '{}' inserts or deletes, which only the cpu backend supports", function),
        ));
    }

    let reduced = phase.reduced_globals();
    if reduced.len() > 1 {
        return Err(CompileError::new(
            ErrorKind::UnsupportedBackend,
            Span::none(),
            format!(
                "kernel '{}' reduces {} globals; one per launch is supported",
                function,
                reduced.len()
            ),
        ));
    }
    let reduced_global = match reduced.into_iter().next() {
        Some((global, op)) => {
            let ty = cat.global(&global)?.ty.clone();
            Some(ReducedGlobal { global, op, ty })
        }
        None => None,
    };

    let (fields, field_slots) = field_table(cat, &phase)?;
    let (globals, global_slots) = global_table(cat, &phase)?;

    let TypedFunction::Kernel { param, body, .. } = &typed else {
        unreachable!("checked a kernel");
    };

    let id = cache.next_id(&format!("{}", function));
    let mut bl = BodyLowerer {
        cat,
        env,
        backend,
        cache,
        param: Some(param.clone()),
        helper_params: IndexMap::new(),
        caller_rel: relation.clone(),
        field_slots,
        global_slots,
    };
    let lowered = bl.block(body)?;

    let regions = region_requirements(&fields);
    let name = match subset {
        Some(s) => format!("{}@{}", function, s),
        None => format!("{}@{}", function, relation),
    };
    debug!(task = %id, name = %name, fields = fields.len(), "kernel task emitted");

    let spec = TaskSpec {
        id: id.clone(),
        name,
        domain: Some(DomainSpec {
            universe: relation.clone(),
            subset: subset.cloned(),
            dims: cat.relation(relation)?.dims.clone(),
        }),
        params: Vec::new(),
        regions,
        fields,
        globals,
        reduced_global,
        inserts_into: phase.inserts.clone(),
        deletes_from: phase.deletes.clone(),
        body: TaskBody::Stmts(lowered),
    };
    Ok(cache.insert_kernel(function.clone(), domain_key, backend, spec))
}

/// Emit (or fetch) the task for one helper specialization.
fn helper_task(
    cat: &Catalog,
    env: &Env,
    backend: Backend,
    cache: &mut SpecializationCache,
    function: &FunctionId,
    arg_types: Vec<Type>,
    caller: &RelationId,
) -> CompileResult<TaskId> {
    if let Some(id) = cache.helper_hit(function, &arg_types, caller) {
        return Ok(id.clone());
    }

    let def = cat.function(function)?;
    let spec = specialize_helper(cat, env, def)?;
    let typed = check_helper(cat, env, &spec)?;
    let TypedFunction::Helper { params, body, .. } = &typed else {
        unreachable!("checked a helper");
    };

    let (read_fields, read_globals, _calls) = helper_accesses(body);
    let mut fields = Vec::new();
    let mut field_slots = IndexMap::new();
    for f in read_fields {
        let field = cat.field(&f)?;
        field_slots.insert(f.clone(), fields.len() as u32);
        fields.push(FieldSlot {
            field: f,
            relation: field.relation.clone(),
            ty: field.ty.clone(),
            access: FieldAccess::Read,
        });
    }
    let mut globals = Vec::new();
    let mut global_slots = IndexMap::new();
    for g in read_globals {
        let ty = cat.global(&g)?.ty.clone();
        global_slots.insert(g.clone(), globals.len() as u32);
        globals.push(GlobalSlot { global: g, ty });
    }

    let id = cache.next_id(&format!("helper.{}", function));
    let mut bl = BodyLowerer {
        cat,
        env,
        backend,
        cache,
        param: None,
        helper_params: params
            .iter()
            .enumerate()
            .map(|(i, (n, _))| (n.clone(), i as u32))
            .collect(),
        caller_rel: caller.clone(),
        field_slots,
        global_slots,
    };
    let lowered = bl.expr(body)?;

    let regions = region_requirements(&fields);
    debug!(task = %id, helper = %function, caller = %caller, "helper task emitted");

    let spec = TaskSpec {
        id: id.clone(),
        name: format!("helper.{}@{}", function, caller),
        domain: None,
        params: arg_types.clone(),
        regions,
        fields,
        globals,
        reduced_global: None,
        inserts_into: None,
        deletes_from: None,
        body: TaskBody::Expr(lowered),
    };
    Ok(cache.insert_helper(function.clone(), arg_types, caller.clone(), spec))
}

/// Specialize and check every helper a kernel (transitively) calls, for
/// the phase oracle.
fn resolve_helpers(
    cat: &Catalog,
    env: &Env,
    kernel: &TypedFunction,
) -> CompileResult<IndexMap<FunctionId, TypedFunction>> {
    let TypedFunction::Kernel { body, .. } = kernel else {
        return Ok(IndexMap::new());
    };
    let mut pending: Vec<FunctionId> = Vec::new();
    for s in body {
        collect_stmt_helper_calls(s, &mut pending);
    }
    let mut resolved: IndexMap<FunctionId, TypedFunction> = IndexMap::new();
    while let Some(f) = pending.pop() {
        if resolved.contains_key(&f) {
            continue;
        }
        let def = cat.function(&f)?;
        let spec = specialize_helper(cat, env, def)?;
        let typed = check_helper(cat, env, &spec)?;
        if let TypedFunction::Helper { body, .. } = &typed {
            let (_, _, calls) = helper_accesses(body);
            pending.extend(calls);
        }
        resolved.insert(f, typed);
    }
    Ok(resolved)
}

fn collect_stmt_helper_calls(s: &TypedStmt, out: &mut Vec<FunctionId>) {
    let mut expr = |e: &TypedExpr| collect_expr_helper_calls(e, out);
    match &s.kind {
        TStmtKind::Local { init, .. } => expr(init),
        TStmtKind::AssignVar { value, .. } => expr(value),
        TStmtKind::WriteField { key, value, .. }
        | TStmtKind::ReduceField { key, value, .. } => {
            expr(key);
            expr(value);
        }
        TStmtKind::ReduceGlobal { value, .. } => expr(value),
        TStmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            expr(cond);
            for s in then_body.iter().chain(else_body) {
                collect_stmt_helper_calls(s, out);
            }
        }
        TStmtKind::For { lo, hi, body, .. } => {
            expr(lo);
            expr(hi);
            for s in body {
                collect_stmt_helper_calls(s, out);
            }
        }
        TStmtKind::Assert(cond) => expr(cond),
        TStmtKind::Insert { values, .. } => {
            for (_, v) in values {
                expr(v);
            }
        }
        TStmtKind::Delete { key } => expr(key),
    }
}

fn collect_expr_helper_calls(e: &TypedExpr, out: &mut Vec<FunctionId>) {
    if let TExprKind::HelperCall { function, .. } = &e.kind {
        out.push(function.clone());
    }
    match &e.kind {
        TExprKind::ReadField { key, .. } => collect_expr_helper_calls(key, out),
        TExprKind::Affine { base, .. } => collect_expr_helper_calls(base, out),
        TExprKind::Rekey { key, .. } | TExprKind::KeyCompExpr { key, .. } => {
            collect_expr_helper_calls(key, out)
        }
        TExprKind::UnsafeRow { index, .. } => collect_expr_helper_calls(index, out),
        TExprKind::Binary { lhs, rhs, .. } => {
            collect_expr_helper_calls(lhs, out);
            collect_expr_helper_calls(rhs, out);
        }
        TExprKind::Unary { operand, .. } | TExprKind::Cast { operand } => {
            collect_expr_helper_calls(operand, out)
        }
        TExprKind::BuiltinCall { args, .. } | TExprKind::HelperCall { args, .. } => {
            for a in args {
                collect_expr_helper_calls(a, out);
            }
        }
        TExprKind::VectorLit(items) => {
            for i in items {
                collect_expr_helper_calls(i, out);
            }
        }
        TExprKind::MatrixLit(rows) => {
            for r in rows {
                for i in r {
                    collect_expr_helper_calls(i, out);
                }
            }
        }
        TExprKind::Index { base, indices } => {
            collect_expr_helper_calls(base, out);
            for i in indices {
                collect_expr_helper_calls(i, out);
            }
        }
        TExprKind::Const(_)
        | TExprKind::Var(_)
        | TExprKind::ReadGlobal(_) => {}
    }
}

/// Field slot table from the phase result, insertion-target columns
/// included as writes.
fn field_table(
    cat: &Catalog,
    phase: &PhaseResult,
) -> CompileResult<(Vec<FieldSlot>, IndexMap<FieldId, u32>)> {
    let mut accesses: IndexMap<FieldId, FieldAccess> = IndexMap::new();
    for (f, pt) in &phase.field_use {
        let access = match (pt.read, pt.write, pt.reduce) {
            (_, _, Some(op)) => FieldAccess::Reduce(op),
            (true, true, None) => FieldAccess::ReadWrite,
            (false, true, None) => FieldAccess::Write,
            _ => FieldAccess::Read,
        };
        accesses.insert(f.clone(), access);
    }
    if let Some(target) = &phase.inserts {
        for f in cat.fields_of(target) {
            let entry = accesses.entry(f.id.clone()).or_insert(FieldAccess::Write);
            if *entry == FieldAccess::Read {
                *entry = FieldAccess::ReadWrite;
            }
        }
    }
    if let Some(target) = &phase.deletes {
        // deletion flips the liveness column
        if let Some(mask) = cat.field_of(target, crate::relation::LIVE_MASK_FIELD) {
            let entry = accesses.entry(mask.id.clone()).or_insert(FieldAccess::Write);
            if *entry == FieldAccess::Read {
                *entry = FieldAccess::ReadWrite;
            }
        }
    }

    let mut slots = IndexMap::new();
    let mut table = Vec::new();
    for (f, access) in accesses {
        let field = cat.field(&f)?;
        slots.insert(f.clone(), table.len() as u32);
        table.push(FieldSlot {
            field: f,
            relation: field.relation.clone(),
            ty: field.ty.clone(),
            access,
        });
    }
    Ok((table, slots))
}

fn global_table(
    cat: &Catalog,
    phase: &PhaseResult,
) -> CompileResult<(Vec<GlobalSlot>, IndexMap<GlobalId, u32>)> {
    let mut table = Vec::new();
    let mut slots = IndexMap::new();
    for (g, pt) in &phase.global_use {
        if !pt.read {
            continue;
        }
        let ty = cat.global(g)?.ty.clone();
        slots.insert(g.clone(), table.len() as u32);
        table.push(GlobalSlot {
            global: g.clone(),
            ty,
        });
    }
    Ok((table, slots))
}

/// Group slot accesses into per-relation region requirements. Relations
/// whose privilege set comes out empty are omitted.
fn region_requirements(fields: &[FieldSlot]) -> Vec<RegionRequirement> {
    let mut by_relation: IndexMap<RelationId, Vec<Privilege>> = IndexMap::new();
    for slot in fields {
        let privs = by_relation.entry(slot.relation.clone()).or_default();
        match slot.access {
            FieldAccess::Read => privs.push(Privilege::Reads(slot.field.clone())),
            FieldAccess::Write => privs.push(Privilege::Writes(slot.field.clone())),
            FieldAccess::ReadWrite => {
                privs.push(Privilege::Reads(slot.field.clone()));
                privs.push(Privilege::Writes(slot.field.clone()));
            }
            FieldAccess::Reduce(op) => privs.push(Privilege::Reduces {
                field: slot.field.clone(),
                op,
            }),
        }
    }
    by_relation
        .into_iter()
        .map(|(relation, privileges)| RegionRequirement {
            relation,
            privileges,
        })
        .collect()
}

struct BodyLowerer<'a> {
    cat: &'a Catalog,
    env: &'a Env,
    backend: Backend,
    cache: &'a mut SpecializationCache,
    /// Kernel parameter name; None for helpers
    param: Option<String>,
    /// Helper parameter name → argument position
    helper_params: IndexMap<String, u32>,
    caller_rel: RelationId,
    field_slots: IndexMap<FieldId, u32>,
    global_slots: IndexMap<GlobalId, u32>,
}

impl<'a> BodyLowerer<'a> {
    fn block(&mut self, body: &[TypedStmt]) -> CompileResult<Vec<LirStmt>> {
        body.iter().map(|s| self.stmt(s)).collect()
    }

    fn field_slot(&self, field: &FieldId, span: Span) -> CompileResult<u32> {
        self.field_slots.get(field).copied().ok_or_else(|| {
            CompileError::new(
                ErrorKind::Internal,
                span,
                format!("field '{}' missing from the slot table", field),
            )
        })
    }

    fn stmt(&mut self, s: &TypedStmt) -> CompileResult<LirStmt> {
        match &s.kind {
            TStmtKind::Local { name, init } => Ok(LirStmt::Local {
                name: name.clone(),
                init: self.expr(init)?,
            }),
            TStmtKind::AssignVar { name, value } => Ok(LirStmt::AssignLocal {
                name: name.clone(),
                value: self.expr(value)?,
            }),
            TStmtKind::WriteField { field, key, value } => Ok(LirStmt::WriteField {
                slot: self.field_slot(field, s.span)?,
                key: self.expr(key)?,
                value: self.expr(value)?,
            }),
            TStmtKind::ReduceField {
                field,
                key,
                op,
                value,
            } => Ok(LirStmt::ReduceField {
                slot: self.field_slot(field, s.span)?,
                key: self.expr(key)?,
                op: *op,
                value: self.expr(value)?,
            }),
            TStmtKind::ReduceGlobal { op, value, .. } => Ok(LirStmt::ReduceGlobal {
                op: *op,
                value: self.expr(value)?,
            }),
            TStmtKind::If {
                cond,
                then_body,
                else_body,
            } => Ok(LirStmt::If {
                cond: self.expr(cond)?,
                then_body: self.block(then_body)?,
                else_body: self.block(else_body)?,
            }),
            TStmtKind::For { var, lo, hi, body } => Ok(LirStmt::For {
                var: var.clone(),
                lo: self.expr(lo)?,
                hi: self.expr(hi)?,
                body: self.block(body)?,
            }),
            TStmtKind::Assert(cond) => Ok(LirStmt::Assert {
                cond: self.expr(cond)?,
            }),
            TStmtKind::Insert { values, .. } => {
                let values = values
                    .iter()
                    .map(|(f, v)| Ok((self.field_slot(f, s.span)?, self.expr(v)?)))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(LirStmt::Insert { values })
            }
            TStmtKind::Delete { key } => Ok(LirStmt::Delete {
                key: self.expr(key)?,
            }),
        }
    }

    fn expr(&mut self, e: &TypedExpr) -> CompileResult<LirExpr> {
        let ty = e.ty.clone();
        let kind = match &e.kind {
            TExprKind::Const(v) => LirExprKind::Const(v.clone()),
            TExprKind::Var(name) => {
                if self.param.as_deref() == Some(name) {
                    LirExprKind::Param
                } else if let Some(idx) = self.helper_params.get(name) {
                    LirExprKind::Arg(*idx)
                } else {
                    LirExprKind::Local(name.clone())
                }
            }
            TExprKind::ReadGlobal(g) => {
                let slot = self.global_slots.get(g).copied().ok_or_else(|| {
                    CompileError::new(
                        ErrorKind::Internal,
                        e.span,
                        format!("global '{}' missing from the slot table", g),
                    )
                })?;
                LirExprKind::ReadGlobal { slot }
            }
            TExprKind::ReadField { field, key } => LirExprKind::ReadField {
                slot: self.field_slot(field, e.span)?,
                key: Box::new(self.expr(key)?),
            },
            TExprKind::Affine { rel, offsets, base } => LirExprKind::Neighbor {
                dims: self.cat.relation(rel)?.dims.clone(),
                offsets: offsets.clone(),
                base: Box::new(self.expr(base)?),
            },
            TExprKind::Rekey { target, key } => {
                let from_rel = key
                    .ty
                    .key_relation()
                    .ok_or_else(|| {
                        CompileError::new(ErrorKind::Internal, e.span, "link access on non-key")
                    })?
                    .clone();
                LirExprKind::Rekey {
                    from_dims: self.cat.relation(&from_rel)?.dims.clone(),
                    to_dims: self.cat.relation(target)?.dims.clone(),
                    base: Box::new(self.expr(key)?),
                }
            }
            TExprKind::UnsafeRow { index, .. } => LirExprKind::KeyFromLinear {
                index: Box::new(self.expr(index)?),
            },
            TExprKind::KeyCompExpr { comp, key } => {
                let rel = key
                    .ty
                    .key_relation()
                    .ok_or_else(|| {
                        CompileError::new(ErrorKind::Internal, e.span, "key component on non-key")
                    })?
                    .clone();
                LirExprKind::KeyComponent {
                    comp: *comp,
                    dims: self.cat.relation(&rel)?.dims.clone(),
                    key: Box::new(self.expr(key)?),
                }
            }
            TExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                if *op == BinOp::Pow {
                    LirExprKind::Math {
                        fun: MathFn::Pow,
                        args: vec![lhs, rhs],
                    }
                } else {
                    LirExprKind::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    }
                }
            }
            TExprKind::Unary { op, operand } => LirExprKind::Unary {
                op: *op,
                operand: Box::new(self.expr(operand)?),
            },
            TExprKind::BuiltinCall { builtin, args } => {
                let args = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<CompileResult<Vec<_>>>()?;
                match math_fn(*builtin) {
                    Some(fun) => LirExprKind::Math { fun, args },
                    None => match builtin {
                        Builtin::Rand => LirExprKind::Rand,
                        Builtin::Dot => {
                            let mut it = args.into_iter();
                            LirExprKind::Dot {
                                lhs: Box::new(it.next().expect("checked arity")),
                                rhs: Box::new(it.next().expect("checked arity")),
                            }
                        }
                        other => {
                            return Err(CompileError::new(
                                ErrorKind::Internal,
                                e.span,
                                format!("builtin '{}' has no lowering", other.name()),
                            ));
                        }
                    },
                }
            }
            TExprKind::HelperCall { function, args } => {
                let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
                let caller = self.caller_rel.clone();
                let task = helper_task(
                    self.cat,
                    self.env,
                    self.backend,
                    self.cache,
                    function,
                    arg_types,
                    &caller,
                )?;
                let args = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<CompileResult<Vec<_>>>()?;
                LirExprKind::CallHelper { task, args }
            }
            TExprKind::VectorLit(items) => LirExprKind::VectorLit(
                items
                    .iter()
                    .map(|i| self.expr(i))
                    .collect::<CompileResult<Vec<_>>>()?,
            ),
            TExprKind::MatrixLit(rows) => LirExprKind::MatrixLit(
                rows.iter()
                    .map(|r| r.iter().map(|i| self.expr(i)).collect::<CompileResult<Vec<_>>>())
                    .collect::<CompileResult<Vec<_>>>()?,
            ),
            TExprKind::Index { base, indices } => LirExprKind::Index {
                base: Box::new(self.expr(base)?),
                indices: indices
                    .iter()
                    .map(|i| self.expr(i))
                    .collect::<CompileResult<Vec<_>>>()?,
            },
            TExprKind::Cast { operand } => LirExprKind::Cast {
                operand: Box::new(self.expr(operand)?),
            },
        };
        Ok(LirExpr::new(kind, ty))
    }
}

fn math_fn(b: Builtin) -> Option<MathFn> {
    match b {
        Builtin::Acos => Some(MathFn::Acos),
        Builtin::Asin => Some(MathFn::Asin),
        Builtin::Atan => Some(MathFn::Atan),
        Builtin::Cbrt => Some(MathFn::Cbrt),
        Builtin::Ceil => Some(MathFn::Ceil),
        Builtin::Cos => Some(MathFn::Cos),
        Builtin::Fabs => Some(MathFn::Fabs),
        Builtin::Floor => Some(MathFn::Floor),
        Builtin::Fmod => Some(MathFn::Fmod),
        Builtin::Log => Some(MathFn::Log),
        Builtin::Sin => Some(MathFn::Sin),
        Builtin::Sqrt => Some(MathFn::Sqrt),
        Builtin::Tan => Some(MathFn::Tan),
        Builtin::Pow => Some(MathFn::Pow),
        Builtin::Fmin => Some(MathFn::Fmin),
        Builtin::Fmax => Some(MathFn::Fmax),
        Builtin::Imin => Some(MathFn::Imin),
        Builtin::Imax => Some(MathFn::Imax),
        _ => None,
    }
}

// ---- driver lowering ----

/// Lower a recorded program into the driver task, emitting kernel tasks
/// into the cache along the way.
pub fn lower_program(
    cat: &Catalog,
    env: &Env,
    program: &Program,
    backend: Backend,
    cache: &mut SpecializationCache,
) -> CompileResult<DriverTask> {
    let mut ops = Vec::new();

    // Scalar symbols for globals, from their declared constants
    for g in cat.globals() {
        ops.push(DriverOp::DeclareGlobal {
            global: g.id.clone(),
            ty: g.ty.clone(),
            init: g.init.clone(),
        });
    }

    // One region per relation, sized from its dimensions
    for rel in cat.relations() {
        ops.push(DriverOp::CreateRegion {
            relation: rel.id.clone(),
            dims: rel.dims.clone(),
            fields: cat
                .fields_of(&rel.id)
                .into_iter()
                .map(|f| (f.id.clone(), f.ty.clone()))
                .collect(),
            live_mask: rel.has_live_mask,
        });
    }

    // Subset bindings: single rectangles become partitions
    for rel in cat.relations() {
        for sub_id in &rel.subsets {
            let sub = cat.subset(sub_id)?;
            match sub.rectangles.as_deref() {
                Some([rect]) => {
                    if !rect.within(&rel.dims) {
                        return Err(CompileError::new(
                            ErrorKind::MalformedProgram,
                            Span::none(),
                            format!(
                                "subset '{}' rectangle exceeds the bounds of '{}'",
                                sub_id, rel.id
                            ),
                        ));
                    }
                    ops.push(DriverOp::Partition {
                        subset: sub_id.clone(),
                        relation: rel.id.clone(),
                        rect: rect.clone(),
                    });
                }
                Some(rects) => {
                    warn!(
                        subset = %sub_id,
                        rectangles = rects.len(),
                        "multi-rectangle subsets are not supported by partitioning; binding by mask"
                    );
                    ops.push(bind_subset_op(sub_id, &rel.id, &sub.data));
                }
                None => ops.push(bind_subset_op(sub_id, &rel.id, &sub.data)),
            }
        }
    }

    let mut lowered = lower_stmts(cat, env, &program.body, backend, cache)?;
    ops.append(&mut lowered);
    Ok(DriverTask { ops })
}

fn bind_subset_op(subset: &SubsetId, relation: &RelationId, data: &SubsetData) -> DriverOp {
    let binding = match data {
        SubsetData::Mask(mask) => SubsetBinding::Mask(mask.clone()),
        SubsetData::Index(rows) => SubsetBinding::Index(rows.clone()),
    };
    DriverOp::BindSubset {
        subset: subset.clone(),
        relation: relation.clone(),
        binding,
    }
}

fn lower_stmts(
    cat: &Catalog,
    env: &Env,
    stmts: &[Stmt],
    backend: Backend,
    cache: &mut SpecializationCache,
) -> CompileResult<Vec<DriverOp>> {
    let mut ops = Vec::new();
    for s in stmts {
        match s {
            Stmt::Block(inner) => {
                ops.extend(lower_stmts(cat, env, inner, backend, cache)?);
            }
            Stmt::ForEach {
                function,
                relation,
                subset,
            } => {
                let task = kernel_task(
                    cat,
                    env,
                    backend,
                    cache,
                    function,
                    relation,
                    subset.as_ref(),
                )?;
                ops.push(DriverOp::Launch { task });
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                check_cond(cat, cond)?;
                ops.push(DriverOp::If {
                    cond: cond.clone(),
                    then_ops: lower_stmts(cat, env, then_block, backend, cache)?,
                    else_ops: match else_block {
                        Some(b) => lower_stmts(cat, env, b, backend, cache)?,
                        None => Vec::new(),
                    },
                });
            }
            Stmt::LoadField { field, value } => {
                let f = cat.field(field)?;
                if !value.conforms_to(&f.ty) {
                    return Err(CompileError::invalid_types(Span::none()).with_note(format!(
                        "fill value {} does not fit field '{}' of type {}",
                        value, field, f.ty
                    )));
                }
                ops.push(DriverOp::Fill {
                    relation: f.relation.clone(),
                    field: field.clone(),
                    value: value.clone(),
                });
            }
            Stmt::SetGlobal { global, expr } => {
                check_set_global(cat, global, expr)?;
                ops.push(DriverOp::SetGlobal {
                    global: global.clone(),
                    expr: expr.clone(),
                });
            }
            Stmt::While { cond, body } => {
                check_cond(cat, cond)?;
                ops.push(DriverOp::While {
                    cond: cond.clone(),
                    body: lower_stmts(cat, env, body, backend, cache)?,
                });
            }
        }
    }
    Ok(ops)
}

/// Static type of a control-program expression.
fn control_expr_type(cat: &Catalog, e: &ControlExpr) -> CompileResult<Type> {
    match e {
        ControlExpr::Const(v) => v.natural_type().ok_or_else(|| {
            CompileError::invalid_types(Span::none())
                .with_note(format!("constant {} has no usable type", v))
        }),
        ControlExpr::GetGlobal(g) => Ok(cat.global(g)?.ty.clone()),
        ControlExpr::Binary { lhs, rhs, .. } => {
            let lt = control_expr_type(cat, lhs)?;
            let rt = control_expr_type(cat, rhs)?;
            numeric_join(&lt, &rt)
        }
        ControlExpr::Neg(inner) => {
            let ty = control_expr_type(cat, inner)?;
            if !ty.is_numeric() {
                return Err(CompileError::invalid_types(Span::none()));
            }
            Ok(ty)
        }
    }
}

/// Join for control expressions: untyped f64 constants mix freely with
/// any numeric global since every numeric joins with f64.
fn numeric_join(a: &Type, b: &Type) -> CompileResult<Type> {
    if !(a.is_numeric() && b.is_numeric()) {
        return Err(CompileError::invalid_types(Span::none()));
    }
    join_types(a, b).ok_or_else(|| CompileError::invalid_types(Span::none()))
}

fn check_cond(cat: &Catalog, c: &ControlCond) -> CompileResult<()> {
    match c {
        ControlCond::Literal(_) => Ok(()),
        ControlCond::And(a, b) | ControlCond::Or(a, b) => {
            check_cond(cat, a)?;
            check_cond(cat, b)
        }
        ControlCond::Not(inner) => check_cond(cat, inner),
        ControlCond::Compare { op, lhs, rhs } => {
            let lt = control_expr_type(cat, lhs)?;
            let rt = control_expr_type(cat, rhs)?;
            if lt.is_bool() && rt.is_bool() {
                if matches!(op, CmpOp::Eq | CmpOp::Ne) {
                    return Ok(());
                }
                return Err(CompileError::invalid_types(Span::none())
                    .with_note("ordering comparison on booleans"));
            }
            numeric_join(&lt, &rt).map(|_| ())
        }
    }
}

fn check_set_global(cat: &Catalog, global: &GlobalId, expr: &ControlExpr) -> CompileResult<()> {
    let g = cat.global(global)?;
    if let ControlExpr::Const(v) = expr {
        if v.conforms_to(&g.ty) {
            return Ok(());
        }
        return Err(CompileError::invalid_types(Span::none()).with_note(format!(
            "constant {} does not fit global '{}' of type {}",
            v, global, g.ty
        )));
    }
    let ty = control_expr_type(cat, expr)?;
    let ok = if g.ty.is_bool() {
        ty.is_bool()
    } else {
        g.ty.is_numeric() && ty.is_numeric()
    };
    if !ok {
        return Err(CompileError::invalid_types(Span::none()).with_note(format!(
            "cannot assign {} to global '{}' of type {}",
            ty, global, g.ty
        )));
    }
    Ok(())
}
