//! Task-graph executor
//!
//! Interprets the driver task in order and launches kernel tasks across
//! their domains. Each launch evaluates per-key instances in parallel
//! (rayon), collecting their effects, then applies writes, reductions,
//! inserts, and deletes sequentially in key order for determinism. A
//! reduced global folds per-key contributions into an identity-initialized
//! accumulator and rebinds after the launch.

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, instrument, trace};

use tessel_ir::driver::{CmpOp, ControlBinOp, ControlCond, ControlExpr, DriverOp, Rect};
use tessel_ir::lir::{BinOp, LirExpr, LirExprKind, LirStmt};
use tessel_ir::{
    coords_to_linear, linear_to_coords, FieldId, GlobalId, LaunchSignature, ReduceOp, RelationId,
    SubsetBinding, SubsetId, TaskBody, TaskGraph, TaskId, TaskSpec, Type,
};

use crate::error::{Error, Result};
use crate::operators;
use crate::storage::Region;
use crate::types::Value;

/// Executes one compiled task graph.
pub struct Machine {
    graph: TaskGraph,
    regions: IndexMap<RelationId, Region>,
    subsets: IndexMap<SubsetId, SubsetBinding>,
    globals: IndexMap<GlobalId, (Type, Value)>,
}

impl Machine {
    pub fn new(graph: TaskGraph) -> Self {
        Self {
            graph,
            regions: IndexMap::new(),
            subsets: IndexMap::new(),
            globals: IndexMap::new(),
        }
    }

    /// Run the driver task to completion.
    #[instrument(skip(self), name = "driver")]
    pub fn run(&mut self) -> Result<()> {
        let ops = self.graph.driver.ops.clone();
        self.exec_ops(&ops)
    }

    /// Last bound value of a global.
    pub fn global(&self, id: &GlobalId) -> Result<&Value> {
        self.globals
            .get(id)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::GlobalNotFound(id.clone()))
    }

    /// Read one field row (for hosts and tests).
    pub fn read_field(&self, rel: &RelationId, field: &FieldId, row: u64) -> Result<Value> {
        self.region(rel)?.read_field(field, row)
    }

    pub fn region(&self, rel: &RelationId) -> Result<&Region> {
        self.regions
            .get(rel)
            .ok_or_else(|| Error::RelationNotFound(rel.clone()))
    }

    fn region_mut(&mut self, rel: &RelationId) -> Result<&mut Region> {
        self.regions
            .get_mut(rel)
            .ok_or_else(|| Error::RelationNotFound(rel.clone()))
    }

    fn exec_ops(&mut self, ops: &[DriverOp]) -> Result<()> {
        for op in ops {
            match op {
                DriverOp::DeclareGlobal { global, ty, init } => {
                    trace!(global = %global, "global declared");
                    self.globals.insert(
                        global.clone(),
                        (ty.clone(), Value::from_const(init, ty)),
                    );
                }
                DriverOp::CreateRegion {
                    relation,
                    dims,
                    fields,
                    live_mask: _,
                } => {
                    trace!(relation = %relation, ?dims, "region created");
                    self.regions.insert(
                        relation.clone(),
                        Region::new(relation.clone(), dims.clone(), fields.clone()),
                    );
                }
                DriverOp::Partition {
                    subset,
                    relation,
                    rect,
                } => {
                    let dims = self.region(relation)?.dims.clone();
                    let rows = rect_rows(rect, &dims);
                    trace!(subset = %subset, rows = rows.len(), "subset partitioned");
                    self.subsets.insert(subset.clone(), SubsetBinding::Index(rows));
                }
                DriverOp::BindSubset {
                    subset, binding, ..
                } => {
                    self.subsets.insert(subset.clone(), binding.clone());
                }
                DriverOp::Launch { task } => self.launch(task)?,
                DriverOp::Fill {
                    relation,
                    field,
                    value,
                } => {
                    self.region_mut(relation)?.fill(field, value)?;
                }
                DriverOp::SetGlobal { global, expr } => {
                    let v = self.eval_control(expr)?;
                    let (ty, slot) = self
                        .globals
                        .get_mut(global)
                        .ok_or_else(|| Error::GlobalNotFound(global.clone()))?;
                    *slot = v.cast(ty);
                }
                DriverOp::If {
                    cond,
                    then_ops,
                    else_ops,
                } => {
                    if self.eval_cond(cond)? {
                        self.exec_ops(then_ops)?;
                    } else {
                        self.exec_ops(else_ops)?;
                    }
                }
                DriverOp::While { cond, body } => {
                    while self.eval_cond(cond)? {
                        self.exec_ops(body)?;
                    }
                }
            }
        }
        Ok(())
    }

    // ---- control expressions ----

    fn eval_control(&self, e: &ControlExpr) -> Result<Value> {
        match e {
            ControlExpr::Const(v) => {
                let ty = v.natural_type().unwrap_or(Type::F64);
                Ok(Value::from_const(v, &ty))
            }
            ControlExpr::GetGlobal(g) => Ok(self.global(g)?.clone()),
            ControlExpr::Binary { op, lhs, rhs } => {
                let a = self.require_num(lhs)?;
                let b = self.require_num(rhs)?;
                let v = match op {
                    ControlBinOp::Add => a + b,
                    ControlBinOp::Sub => a - b,
                    ControlBinOp::Mul => a * b,
                    ControlBinOp::Div => a / b,
                    ControlBinOp::Mod => a % b,
                };
                Ok(Value::Float(v))
            }
            ControlExpr::Neg(inner) => Ok(Value::Float(-self.require_num(inner)?)),
        }
    }

    fn require_num(&self, e: &ControlExpr) -> Result<f64> {
        self.eval_control(e)?.as_f64().ok_or_else(|| {
            Error::MalformedGraph("non-numeric operand in control expression".to_string())
        })
    }

    fn eval_cond(&self, c: &ControlCond) -> Result<bool> {
        match c {
            ControlCond::Literal(b) => Ok(*b),
            ControlCond::And(a, b) => Ok(self.eval_cond(a)? && self.eval_cond(b)?),
            ControlCond::Or(a, b) => Ok(self.eval_cond(a)? || self.eval_cond(b)?),
            ControlCond::Not(inner) => Ok(!self.eval_cond(inner)?),
            ControlCond::Compare { op, lhs, rhs } => {
                let a = self.eval_control(lhs)?;
                let b = self.eval_control(rhs)?;
                if let (Value::Bool(a), Value::Bool(b)) = (&a, &b) {
                    return match op {
                        CmpOp::Eq => Ok(a == b),
                        CmpOp::Ne => Ok(a != b),
                        _ => Err(Error::MalformedGraph(
                            "ordering comparison on booleans".to_string(),
                        )),
                    };
                }
                let (a, b) = match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(Error::MalformedGraph(
                            "non-numeric comparison in control condition".to_string(),
                        ));
                    }
                };
                Ok(match op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                })
            }
        }
    }

    // ---- launches ----

    #[instrument(skip(self), fields(task = %task_id))]
    fn launch(&mut self, task_id: &TaskId) -> Result<()> {
        let spec = self
            .graph
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(task_id.clone()))?;
        let domain = spec
            .domain
            .clone()
            .ok_or_else(|| Error::MalformedGraph(format!("task '{}' has no domain", task_id)))?;

        // Insert reservation happens before the launch so the write cursor
        // is stable for its duration
        let mut insert_cursor = None;
        if let Some(target) = &spec.inserts_into {
            let universe_rows = self.region(&domain.universe)?.logical_rows();
            let region = self.region_mut(target)?;
            region.reserve_tail(universe_rows);
            insert_cursor = Some(region.concrete_rows());
        }

        let sig = self.build_signature(&spec, insert_cursor)?;
        let rows = self.domain_rows(&spec, &sig)?;
        debug!(rows = rows.len(), "launch");

        let (sig, all_effects) = {
            let env = LaunchEnv::prepare(self, &spec, sig)?;
            let results: Vec<Result<Effects>> =
                rows.par_iter().map(|key| env.run_key(*key)).collect();
            let mut all_effects = Vec::with_capacity(results.len());
            for r in results {
                all_effects.push(r?);
            }
            (env.sig, all_effects)
        };
        self.apply_effects(&spec, &sig, all_effects)
    }

    fn build_signature(
        &self,
        spec: &TaskSpec,
        insert_cursor: Option<u64>,
    ) -> Result<LaunchSignature> {
        let domain = spec.domain.as_ref().expect("kernel task has a domain");
        let universe = self.region(&domain.universe)?;

        let (use_boolmask, boolmask, index) = match &domain.subset {
            Some(s) => match self
                .subsets
                .get(s)
                .ok_or_else(|| Error::SubsetNotFound(s.clone()))?
            {
                SubsetBinding::Mask(mask) => (true, mask.clone(), Vec::new()),
                SubsetBinding::Index(rows) => (false, Vec::new(), rows.clone()),
            },
            None => (false, Vec::new(), Vec::new()),
        };

        let mut fields = Vec::with_capacity(spec.fields.len());
        for slot in &spec.fields {
            let region = self.region(&slot.relation)?;
            fields.push(region.launch_layout(&slot.field)?);
        }

        let mut globals = Vec::with_capacity(spec.globals.len());
        for g in &spec.globals {
            globals.push(self.global(&g.global)?.to_const());
        }

        let index_size = index.len() as u64;
        Ok(LaunchSignature {
            n_rows: universe.concrete_rows(),
            use_boolmask,
            boolmask,
            index,
            index_size,
            insert_cursor,
            fields,
            globals,
        })
    }

    /// Rows this launch visits: the subset binding or the whole universe,
    /// minus dead rows of elastic relations.
    fn domain_rows(&self, spec: &TaskSpec, sig: &LaunchSignature) -> Result<Vec<u64>> {
        let domain = spec.domain.as_ref().expect("kernel task has a domain");
        let universe = self.region(&domain.universe)?;
        // An index-bound subset may legitimately be empty; only an absent
        // subset means the whole universe
        let mut rows = match &domain.subset {
            Some(_) if !sig.use_boolmask => sig.index.clone(),
            _ => sig.domain_rows(),
        };
        if universe.has_live_mask() {
            let mut live = Vec::with_capacity(rows.len());
            for row in rows.drain(..) {
                if universe.is_live(row)? {
                    live.push(row);
                }
            }
            rows = live;
        }
        Ok(rows)
    }

    fn apply_effects(
        &mut self,
        spec: &TaskSpec,
        sig: &LaunchSignature,
        all_effects: Vec<Effects>,
    ) -> Result<()> {
        // Writes, then reductions, in key order
        for effects in &all_effects {
            for (slot, row, value) in &effects.writes {
                let layout = &sig.fields[*slot as usize];
                let relation = &spec.fields[*slot as usize].relation;
                self.region_mut(relation)?.write_at(layout, *row, value)?;
            }
        }
        for effects in &all_effects {
            for (slot, row, op, value) in &effects.reduces {
                let layout = &sig.fields[*slot as usize];
                let field = &spec.fields[*slot as usize];
                let current = self
                    .region(&field.relation)?
                    .read_at(layout, *row, &field.ty)?;
                let next = operators::apply_reduce(*op, &current, value)
                    .map_err(|message| Error::Numeric {
                        task: spec.id.clone(),
                        message,
                    })?;
                self.region_mut(&field.relation)?
                    .write_at(layout, *row, &next)?;
            }
        }

        // Single reduced global: fold contributions, rebind afterwards
        if let Some(red) = &spec.reduced_global {
            let mut acc = operators::identity_value(red.op, &red.ty);
            let combine = red.op.combine();
            for effects in &all_effects {
                if let Some(contrib) = &effects.global_acc {
                    acc = operators::apply_reduce(combine, &acc, contrib).map_err(|message| {
                        Error::Numeric {
                            task: spec.id.clone(),
                            message,
                        }
                    })?;
                }
            }
            let (ty, current) = self
                .globals
                .get(&red.global)
                .ok_or_else(|| Error::GlobalNotFound(red.global.clone()))?
                .clone();
            let next = operators::apply_reduce(red.op, &current, &acc).map_err(|message| {
                Error::Numeric {
                    task: spec.id.clone(),
                    message,
                }
            })?;
            self.globals
                .insert(red.global.clone(), (ty.clone(), next.cast(&ty)));
        }

        // Inserts append at the reserved cursor, then the concrete size is
        // trimmed to what was actually written
        if let Some(target) = &spec.inserts_into {
            let mut cursor = sig.insert_cursor.unwrap_or(0);
            let reserved = {
                let region = self.region(target)?;
                region.concrete_rows() + region.logical_rows()
            };
            let mask_id = FieldId(format!("{}._is_live_mask", target));
            let mut inserted = 0u64;
            for effects in &all_effects {
                for record in &effects.inserts {
                    for (slot, value) in record {
                        let field = &spec.fields[*slot as usize];
                        self.region_mut(&field.relation)?
                            .write_field(&field.field, cursor, value)
                            .map_err(|_| Error::InsertOverflow {
                                relation: target.clone(),
                                reserved,
                            })?;
                    }
                    self.region_mut(target)?
                        .write_field(&mask_id, cursor, &Value::Bool(true))
                        .map_err(|_| Error::InsertOverflow {
                            relation: target.clone(),
                            reserved,
                        })?;
                    cursor += 1;
                    inserted += 1;
                }
            }
            self.region_mut(target)?.commit_inserts(inserted);
            debug!(target = %target, inserted, "inserts committed");
        }

        if let Some(target) = &spec.deletes_from {
            let rows: Vec<u64> = all_effects
                .iter()
                .flat_map(|e| e.deletes.iter().copied())
                .collect();
            if !rows.is_empty() {
                debug!(target = %target, deleted = rows.len(), "deletes committed");
            }
            self.region_mut(target)?.commit_deletes(&rows)?;
        }

        Ok(())
    }
}

/// Rows of an inclusive rectangle, ascending.
fn rect_rows(rect: &Rect, dims: &[u64]) -> Vec<u64> {
    let size: u64 = dims.iter().product();
    (0..size)
        .filter(|id| {
            let coords = linear_to_coords(*id, dims);
            rect.extents
                .iter()
                .zip(&coords)
                .all(|((lo, hi), c)| lo <= c && c <= hi)
        })
        .collect()
}

/// Effects one per-key instance produced, applied after the parallel
/// phase.
#[derive(Debug, Default)]
struct Effects {
    writes: Vec<(u32, u64, Value)>,
    reduces: Vec<(u32, u64, ReduceOp, Value)>,
    global_acc: Option<Value>,
    inserts: Vec<Vec<(u32, Value)>>,
    deletes: Vec<u64>,
}

impl Effects {
    /// A pending centered write visible to later reads in the same
    /// instance.
    fn pending_write(&self, slot: u32, row: u64) -> Option<&Value> {
        self.writes
            .iter()
            .rev()
            .find(|(s, r, _)| *s == slot && *r == row)
            .map(|(_, _, v)| v)
    }
}

/// Per-launch evaluation state shared by all instances.
struct LaunchEnv<'a> {
    machine: &'a Machine,
    spec: &'a TaskSpec,
    sig: LaunchSignature,
    /// Read-only global snapshots in the value domain
    global_values: Vec<Value>,
    /// Signatures and snapshots for every helper task reachable from this
    /// body
    helpers: IndexMap<TaskId, (LaunchSignature, Vec<Value>)>,
}

impl<'a> LaunchEnv<'a> {
    fn prepare(
        machine: &'a Machine,
        spec: &'a TaskSpec,
        sig: LaunchSignature,
    ) -> Result<LaunchEnv<'a>> {
        let global_values_vec = global_values(spec, &sig);

        let mut helpers = IndexMap::new();
        let mut pending = helper_tasks_of(&spec.body);
        while let Some(id) = pending.pop() {
            if helpers.contains_key(&id) {
                continue;
            }
            let helper = machine
                .graph
                .tasks
                .get(&id)
                .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
            let mut fields = Vec::with_capacity(helper.fields.len());
            for slot in &helper.fields {
                fields.push(machine.region(&slot.relation)?.launch_layout(&slot.field)?);
            }
            let mut globals = Vec::with_capacity(helper.globals.len());
            for g in &helper.globals {
                globals.push(machine.global(&g.global)?.to_const());
            }
            let helper_sig = LaunchSignature {
                n_rows: 0,
                use_boolmask: false,
                boolmask: Vec::new(),
                index: Vec::new(),
                index_size: 0,
                insert_cursor: None,
                fields,
                globals,
            };
            let values = global_values(helper, &helper_sig);
            pending.extend(helper_tasks_of(&helper.body));
            helpers.insert(id, (helper_sig, values));
        }

        Ok(LaunchEnv {
            machine,
            spec,
            sig,
            global_values: global_values_vec,
            helpers,
        })
    }

    fn run_key(&self, key: u64) -> Result<Effects> {
        let mut effects = Effects::default();
        let mut frame = Frame {
            key,
            args: Vec::new(),
            locals: Vec::new(),
        };
        match &self.spec.body {
            TaskBody::Stmts(stmts) => {
                let ctx = EvalCtx {
                    env: self,
                    spec: self.spec,
                    sig: &self.sig,
                    global_values: &self.global_values,
                };
                for s in stmts {
                    ctx.stmt(s, &mut frame, &mut effects)?;
                }
                Ok(effects)
            }
            TaskBody::Expr(_) => Err(Error::MalformedGraph(format!(
                "task '{}' launched over a domain but has an expression body",
                self.spec.id
            ))),
        }
    }
}

fn global_values(spec: &TaskSpec, sig: &LaunchSignature) -> Vec<Value> {
    spec.globals
        .iter()
        .zip(&sig.globals)
        .map(|(slot, snapshot)| Value::from_const(snapshot, &slot.ty))
        .collect()
}

fn helper_tasks_of(body: &TaskBody) -> Vec<TaskId> {
    let mut out = Vec::new();
    match body {
        TaskBody::Stmts(stmts) => {
            for s in stmts {
                helper_tasks_in_stmt(s, &mut out);
            }
        }
        TaskBody::Expr(e) => helper_tasks_in_expr(e, &mut out),
    }
    out
}

fn helper_tasks_in_stmt(s: &LirStmt, out: &mut Vec<TaskId>) {
    match s {
        LirStmt::Local { init: e, .. } | LirStmt::AssignLocal { value: e, .. } => {
            helper_tasks_in_expr(e, out)
        }
        LirStmt::WriteField { key, value, .. } | LirStmt::ReduceField { key, value, .. } => {
            helper_tasks_in_expr(key, out);
            helper_tasks_in_expr(value, out);
        }
        LirStmt::ReduceGlobal { value, .. } => helper_tasks_in_expr(value, out),
        LirStmt::If {
            cond,
            then_body,
            else_body,
        } => {
            helper_tasks_in_expr(cond, out);
            for s in then_body.iter().chain(else_body) {
                helper_tasks_in_stmt(s, out);
            }
        }
        LirStmt::For { lo, hi, body, .. } => {
            helper_tasks_in_expr(lo, out);
            helper_tasks_in_expr(hi, out);
            for s in body {
                helper_tasks_in_stmt(s, out);
            }
        }
        LirStmt::Assert { cond } => helper_tasks_in_expr(cond, out),
        LirStmt::Insert { values } => {
            for (_, v) in values {
                helper_tasks_in_expr(v, out);
            }
        }
        LirStmt::Delete { key } => helper_tasks_in_expr(key, out),
    }
}

fn helper_tasks_in_expr(e: &LirExpr, out: &mut Vec<TaskId>) {
    match &e.kind {
        LirExprKind::CallHelper { task, args } => {
            out.push(task.clone());
            for a in args {
                helper_tasks_in_expr(a, out);
            }
        }
        LirExprKind::ReadField { key, .. } => helper_tasks_in_expr(key, out),
        LirExprKind::Neighbor { base, .. }
        | LirExprKind::Rekey { base, .. } => helper_tasks_in_expr(base, out),
        LirExprKind::KeyFromLinear { index } => helper_tasks_in_expr(index, out),
        LirExprKind::KeyComponent { key, .. } => helper_tasks_in_expr(key, out),
        LirExprKind::Binary { lhs, rhs, .. } | LirExprKind::Dot { lhs, rhs } => {
            helper_tasks_in_expr(lhs, out);
            helper_tasks_in_expr(rhs, out);
        }
        LirExprKind::Unary { operand, .. } | LirExprKind::Cast { operand } => {
            helper_tasks_in_expr(operand, out)
        }
        LirExprKind::Math { args, .. } => {
            for a in args {
                helper_tasks_in_expr(a, out);
            }
        }
        LirExprKind::VectorLit(items) => {
            for i in items {
                helper_tasks_in_expr(i, out);
            }
        }
        LirExprKind::MatrixLit(rows) => {
            for r in rows {
                for i in r {
                    helper_tasks_in_expr(i, out);
                }
            }
        }
        LirExprKind::Index { base, indices } => {
            helper_tasks_in_expr(base, out);
            for i in indices {
                helper_tasks_in_expr(i, out);
            }
        }
        LirExprKind::Const(_)
        | LirExprKind::Param
        | LirExprKind::Arg(_)
        | LirExprKind::Local(_)
        | LirExprKind::ReadGlobal { .. }
        | LirExprKind::Rand => {}
    }
}

/// One instance's local state.
struct Frame {
    key: u64,
    args: Vec<Value>,
    locals: Vec<(String, Value)>,
}

impl Frame {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    fn assign(&mut self, name: &str, value: Value) {
        if let Some((_, slot)) = self.locals.iter_mut().rev().find(|(n, _)| n == name) {
            *slot = value;
        } else {
            self.locals.push((name.to_string(), value));
        }
    }
}

/// Evaluation of one function body (kernel or helper) against its own
/// slot tables.
struct EvalCtx<'a> {
    env: &'a LaunchEnv<'a>,
    spec: &'a TaskSpec,
    sig: &'a LaunchSignature,
    global_values: &'a [Value],
}

impl<'a> EvalCtx<'a> {
    fn numeric_err(&self, message: impl Into<String>) -> Error {
        Error::Numeric {
            task: self.spec.id.clone(),
            message: message.into(),
        }
    }

    fn stmt(&self, s: &LirStmt, frame: &mut Frame, effects: &mut Effects) -> Result<()> {
        match s {
            LirStmt::Local { name, init } => {
                let v = self.eval(init, frame, effects)?;
                frame.locals.push((name.clone(), v));
                Ok(())
            }
            LirStmt::AssignLocal { name, value } => {
                let v = self.eval(value, frame, effects)?;
                frame.assign(name, v);
                Ok(())
            }
            LirStmt::WriteField { slot, key, value } => {
                let row = self.key_of(key, frame, effects)?;
                let v = self.eval(value, frame, effects)?;
                effects.writes.push((*slot, row, v));
                Ok(())
            }
            LirStmt::ReduceField {
                slot,
                key,
                op,
                value,
            } => {
                let row = self.key_of(key, frame, effects)?;
                let v = self.eval(value, frame, effects)?;
                effects.reduces.push((*slot, row, *op, v));
                Ok(())
            }
            LirStmt::ReduceGlobal { op, value } => {
                let v = self.eval(value, frame, effects)?;
                let red = self
                    .spec
                    .reduced_global
                    .as_ref()
                    .ok_or_else(|| {
                        Error::MalformedGraph(format!(
                            "task '{}' reduces a global without a reduction slot",
                            self.spec.id
                        ))
                    })?;
                let acc = match &effects.global_acc {
                    Some(acc) => acc.clone(),
                    None => operators::identity_value(*op, &red.ty),
                };
                let next = operators::apply_reduce(op.combine(), &acc, &v)
                    .map_err(|m| self.numeric_err(m))?;
                effects.global_acc = Some(next);
                Ok(())
            }
            LirStmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let c = self
                    .eval(cond, frame, effects)?
                    .as_bool()
                    .ok_or_else(|| self.numeric_err("branch condition is not a bool"))?;
                let body = if c { then_body } else { else_body };
                let depth = frame.locals.len();
                for s in body {
                    self.stmt(s, frame, effects)?;
                }
                frame.locals.truncate(depth);
                Ok(())
            }
            LirStmt::For { var, lo, hi, body } => {
                let lo = self
                    .eval(lo, frame, effects)?
                    .as_i64()
                    .ok_or_else(|| self.numeric_err("loop bound is not an integer"))?;
                let hi = self
                    .eval(hi, frame, effects)?
                    .as_i64()
                    .ok_or_else(|| self.numeric_err("loop bound is not an integer"))?;
                for i in lo..hi {
                    let depth = frame.locals.len();
                    frame.locals.push((var.clone(), Value::Int(i)));
                    for s in body {
                        self.stmt(s, frame, effects)?;
                    }
                    frame.locals.truncate(depth);
                }
                Ok(())
            }
            LirStmt::Assert { cond } => {
                let c = self
                    .eval(cond, frame, effects)?
                    .as_bool()
                    .ok_or_else(|| self.numeric_err("assert condition is not a bool"))?;
                if !c {
                    return Err(Error::AssertionFailed {
                        task: self.spec.id.clone(),
                    });
                }
                Ok(())
            }
            LirStmt::Insert { values } => {
                let record = values
                    .iter()
                    .map(|(slot, e)| Ok((*slot, self.eval(e, frame, effects)?)))
                    .collect::<Result<Vec<_>>>()?;
                effects.inserts.push(record);
                Ok(())
            }
            LirStmt::Delete { key } => {
                let row = self.key_of(key, frame, effects)?;
                effects.deletes.push(row);
                Ok(())
            }
        }
    }

    fn key_of(&self, e: &LirExpr, frame: &mut Frame, effects: &mut Effects) -> Result<u64> {
        self.eval(e, frame, effects)?
            .as_key()
            .ok_or_else(|| self.numeric_err("expression is not a key"))
    }

    fn eval(&self, e: &LirExpr, frame: &mut Frame, effects: &mut Effects) -> Result<Value> {
        match &e.kind {
            LirExprKind::Const(v) => Ok(Value::from_const(v, &e.ty)),
            LirExprKind::Param => Ok(Value::Key(frame.key)),
            LirExprKind::Arg(i) => Ok(frame.args[*i as usize].clone()),
            LirExprKind::Local(name) => frame.lookup(name).cloned().ok_or_else(|| {
                Error::MalformedGraph(format!("undefined local '{}'", name))
            }),
            LirExprKind::ReadField { slot, key } => {
                let row = self.key_of(key, frame, effects)?;
                if let Some(pending) = effects.pending_write(*slot, row) {
                    return Ok(pending.clone());
                }
                let layout = &self.sig.fields[*slot as usize];
                let field = &self.spec.fields[*slot as usize];
                self.env
                    .machine
                    .region(&field.relation)?
                    .read_at(layout, row, &field.ty)
            }
            LirExprKind::ReadGlobal { slot } => Ok(self.global_values[*slot as usize].clone()),
            LirExprKind::Neighbor {
                dims,
                offsets,
                base,
            } => {
                let k = self.key_of(base, frame, effects)?;
                let coords = linear_to_coords(k, dims);
                let translated: Vec<u64> = coords
                    .iter()
                    .zip(offsets)
                    .zip(dims)
                    .map(|((c, off), d)| (*c as i64 + off).rem_euclid(*d as i64) as u64)
                    .collect();
                Ok(Value::Key(coords_to_linear(&translated, dims)))
            }
            LirExprKind::Rekey {
                from_dims,
                to_dims,
                base,
            } => {
                let k = self.key_of(base, frame, effects)?;
                let coords = linear_to_coords(k, from_dims);
                let clamped: Vec<u64> = coords
                    .iter()
                    .zip(to_dims)
                    .map(|(c, d)| (*c).min(d - 1))
                    .collect();
                Ok(Value::Key(coords_to_linear(&clamped, to_dims)))
            }
            LirExprKind::KeyFromLinear { index } => {
                let i = self
                    .eval(index, frame, effects)?
                    .as_i64()
                    .ok_or_else(|| self.numeric_err("row index is not an integer"))?;
                Ok(Value::Key(i as u64))
            }
            LirExprKind::KeyComponent { comp, dims, key } => {
                let k = self.key_of(key, frame, effects)?;
                let v = match comp.axis() {
                    None => k as i64,
                    Some(axis) => linear_to_coords(k, dims)[axis] as i64,
                };
                Ok(Value::Int(v))
            }
            LirExprKind::Binary { op, lhs, rhs } => {
                // logical operators short-circuit
                if *op == BinOp::And || *op == BinOp::Or {
                    let a = self
                        .eval(lhs, frame, effects)?
                        .as_bool()
                        .ok_or_else(|| self.numeric_err("logical operand is not a bool"))?;
                    if (*op == BinOp::And && !a) || (*op == BinOp::Or && a) {
                        return Ok(Value::Bool(a));
                    }
                    return self.eval(rhs, frame, effects);
                }
                let a = self.eval(lhs, frame, effects)?;
                let b = self.eval(rhs, frame, effects)?;
                operators::binary(*op, &a, &b).map_err(|m| self.numeric_err(m))
            }
            LirExprKind::Unary { op, operand } => {
                let v = self.eval(operand, frame, effects)?;
                operators::unary(*op, &v).map_err(|m| self.numeric_err(m))
            }
            LirExprKind::Math { fun, args } => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a, frame, effects))
                    .collect::<Result<Vec<_>>>()?;
                operators::math(*fun, &args).map_err(|m| self.numeric_err(m))
            }
            LirExprKind::Dot { lhs, rhs } => {
                let a = self.eval(lhs, frame, effects)?;
                let b = self.eval(rhs, frame, effects)?;
                operators::dot(&a, &b).map_err(|m| self.numeric_err(m))
            }
            LirExprKind::Rand => Ok(Value::Float(rand::random::<f64>())),
            LirExprKind::VectorLit(items) => Ok(Value::Vector(
                items
                    .iter()
                    .map(|i| self.eval(i, frame, effects))
                    .collect::<Result<Vec<_>>>()?,
            )),
            LirExprKind::MatrixLit(rows) => Ok(Value::Matrix(
                rows.iter()
                    .map(|r| {
                        r.iter()
                            .map(|i| self.eval(i, frame, effects))
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()?,
            )),
            LirExprKind::Index { base, indices } => {
                let base = self.eval(base, frame, effects)?;
                let idx = indices
                    .iter()
                    .map(|i| {
                        self.eval(i, frame, effects)?
                            .as_i64()
                            .ok_or_else(|| self.numeric_err("index is not an integer"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                match (&base, idx.as_slice()) {
                    (Value::Vector(items), [i]) => items
                        .get(*i as usize)
                        .cloned()
                        .ok_or_else(|| self.numeric_err("vector index out of bounds")),
                    (Value::Matrix(rows), [i, j]) => rows
                        .get(*i as usize)
                        .and_then(|r| r.get(*j as usize))
                        .cloned()
                        .ok_or_else(|| self.numeric_err("matrix index out of bounds")),
                    _ => Err(self.numeric_err("indexing a non-indexable value")),
                }
            }
            LirExprKind::CallHelper { task, args } => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a, frame, effects))
                    .collect::<Result<Vec<_>>>()?;
                let helper = self
                    .env
                    .machine
                    .graph
                    .tasks
                    .get(task)
                    .ok_or_else(|| Error::TaskNotFound(task.clone()))?;
                let (helper_sig, helper_globals) = self
                    .env
                    .helpers
                    .get(task)
                    .ok_or_else(|| Error::TaskNotFound(task.clone()))?;
                let TaskBody::Expr(body) = &helper.body else {
                    return Err(Error::MalformedGraph(format!(
                        "helper '{}' has a statement body",
                        task
                    )));
                };
                let ctx = EvalCtx {
                    env: self.env,
                    spec: helper,
                    sig: helper_sig,
                    global_values: helper_globals,
                };
                let mut helper_frame = Frame {
                    key: 0,
                    args,
                    locals: Vec::new(),
                };
                let mut helper_effects = Effects::default();
                ctx.eval(body, &mut helper_frame, &mut helper_effects)
            }
            LirExprKind::Cast { operand } => {
                let v = self.eval(operand, frame, effects)?;
                Ok(v.cast(&e.ty))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use tessel_ir::driver::DriverTask;
    use tessel_ir::{
        ConstValue, DomainSpec, FieldAccess, FieldSlot, Primitive, Privilege, ReducedGlobal,
        RegionRequirement, TaskBody, TaskSpec,
    };

    fn i32_ty() -> Type {
        Type::Primitive(Primitive::I32)
    }

    fn graph_with(task: TaskSpec, driver: Vec<DriverOp>) -> TaskGraph {
        let mut tasks = IndexMap::new();
        tasks.insert(task.id.clone(), task);
        TaskGraph {
            tasks,
            driver: DriverTask { ops: driver },
        }
    }

    /// v.x = v.x + 1 built by hand over a 4-row relation.
    fn increment_task() -> TaskSpec {
        let rel: RelationId = "r".into();
        let field: FieldId = "r.x".into();
        let read = LirExpr::new(
            LirExprKind::ReadField {
                slot: 0,
                key: Box::new(LirExpr::new(LirExprKind::Param, Type::key("r"))),
            },
            i32_ty(),
        );
        let one = LirExpr::new(LirExprKind::Const(ConstValue::Number(1.0)), i32_ty());
        let body = vec![LirStmt::WriteField {
            slot: 0,
            key: LirExpr::new(LirExprKind::Param, Type::key("r")),
            value: LirExpr::new(
                LirExprKind::Binary {
                    op: BinOp::Add,
                    lhs: Box::new(read),
                    rhs: Box::new(one),
                },
                i32_ty(),
            ),
        }];
        TaskSpec {
            id: "t0".into(),
            name: "increment@r".to_string(),
            domain: Some(DomainSpec {
                universe: rel.clone(),
                subset: None,
                dims: vec![4],
            }),
            params: Vec::new(),
            regions: vec![RegionRequirement {
                relation: rel.clone(),
                privileges: vec![
                    Privilege::Reads(field.clone()),
                    Privilege::Writes(field.clone()),
                ],
            }],
            fields: vec![FieldSlot {
                field,
                relation: rel,
                ty: i32_ty(),
                access: FieldAccess::ReadWrite,
            }],
            globals: Vec::new(),
            reduced_global: None,
            inserts_into: None,
            deletes_from: None,
            body: TaskBody::Stmts(body),
        }
    }

    #[test]
    fn test_launch_applies_centered_writes() {
        let graph = graph_with(
            increment_task(),
            vec![
                DriverOp::CreateRegion {
                    relation: "r".into(),
                    dims: vec![4],
                    fields: vec![("r.x".into(), i32_ty())],
                    live_mask: false,
                },
                DriverOp::Fill {
                    relation: "r".into(),
                    field: "r.x".into(),
                    value: ConstValue::Number(0.0),
                },
                DriverOp::Launch { task: "t0".into() },
                DriverOp::Launch { task: "t0".into() },
            ],
        );
        let mut machine = Machine::new(graph);
        machine.run().unwrap();
        for row in 0..4 {
            assert_eq!(
                machine.read_field(&"r".into(), &"r.x".into(), row).unwrap(),
                Value::Int(2)
            );
        }
    }

    /// g += 1.0 over the domain, returning the accumulated sum.
    fn count_task(rows: u64) -> TaskSpec {
        TaskSpec {
            id: "t0".into(),
            name: "count@r".to_string(),
            domain: Some(DomainSpec {
                universe: "r".into(),
                subset: None,
                dims: vec![rows],
            }),
            params: Vec::new(),
            regions: Vec::new(),
            fields: Vec::new(),
            globals: Vec::new(),
            reduced_global: Some(ReducedGlobal {
                global: "g".into(),
                op: ReduceOp::Add,
                ty: Type::F64,
            }),
            inserts_into: None,
            deletes_from: None,
            body: TaskBody::Stmts(vec![LirStmt::ReduceGlobal {
                op: ReduceOp::Add,
                value: LirExpr::new(LirExprKind::Const(ConstValue::Number(1.0)), Type::F64),
            }]),
        }
    }

    #[test]
    fn test_reduced_global_rebinds_from_launch() {
        let graph = graph_with(
            count_task(100),
            vec![
                DriverOp::DeclareGlobal {
                    global: "g".into(),
                    ty: Type::F64,
                    init: ConstValue::Number(0.0),
                },
                DriverOp::CreateRegion {
                    relation: "r".into(),
                    dims: vec![100],
                    fields: Vec::new(),
                    live_mask: false,
                },
                DriverOp::Launch { task: "t0".into() },
            ],
        );
        let mut machine = Machine::new(graph);
        machine.run().unwrap();
        assert_eq!(machine.global(&"g".into()).unwrap(), &Value::Float(100.0));
    }

    #[test]
    fn test_driver_while_loop() {
        let bump = DriverOp::SetGlobal {
            global: "g".into(),
            expr: ControlExpr::Binary {
                op: ControlBinOp::Add,
                lhs: Box::new(ControlExpr::GetGlobal("g".into())),
                rhs: Box::new(ControlExpr::Const(ConstValue::Number(1.0))),
            },
        };
        let graph = TaskGraph {
            tasks: IndexMap::new(),
            driver: DriverTask {
                ops: vec![
                    DriverOp::DeclareGlobal {
                        global: "g".into(),
                        ty: Type::F64,
                        init: ConstValue::Number(0.0),
                    },
                    bump.clone(),
                    DriverOp::While {
                        cond: ControlCond::Compare {
                            op: CmpOp::Lt,
                            lhs: ControlExpr::GetGlobal("g".into()),
                            rhs: ControlExpr::Const(ConstValue::Number(3.0)),
                        },
                        body: vec![bump],
                    },
                ],
            },
        };
        let mut machine = Machine::new(graph);
        machine.run().unwrap();
        assert_eq!(machine.global(&"g".into()).unwrap(), &Value::Float(3.0));
    }

    #[test]
    fn test_empty_index_subset_launches_nothing() {
        let mut task = increment_task();
        if let Some(domain) = &mut task.domain {
            domain.subset = Some("r.none".into());
        }
        let graph = graph_with(
            task,
            vec![
                DriverOp::CreateRegion {
                    relation: "r".into(),
                    dims: vec![4],
                    fields: vec![("r.x".into(), i32_ty())],
                    live_mask: false,
                },
                DriverOp::BindSubset {
                    subset: "r.none".into(),
                    relation: "r".into(),
                    binding: SubsetBinding::Index(Vec::new()),
                },
                DriverOp::Launch { task: "t0".into() },
            ],
        );
        let mut machine = Machine::new(graph);
        machine.run().unwrap();
        for row in 0..4 {
            assert_eq!(
                machine.read_field(&"r".into(), &"r.x".into(), row).unwrap(),
                Value::Int(0)
            );
        }
    }
}
