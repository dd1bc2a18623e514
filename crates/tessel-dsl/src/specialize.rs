//! Specialization
//!
//! Resolves a raw function body against the host environment: free names
//! become relations, globals, helpers, builtins, or constants; member
//! accesses become field reads or macro expansions; neighbor calls become
//! affine key forms; the kernel parameter's entity-key type is fixed to
//! the launch relation. The output is the same raw tree with only resolved
//! variants left in expression positions.

use indexmap::IndexMap;

use tessel_ir::lir::KeyComp;
use tessel_ir::{ConstValue, FunctionId, GlobalId, RelationId, Type};

use crate::ast::raw::{Expr, ExprKind, Stmt, StmtKind};
use crate::ast::{Builtin, FunctionDef};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::relation::{Catalog, FieldMacro, GridRole};
use crate::span::Span;

/// Maximum nesting of macro expansions before giving up.
const MAX_EXPANSION_DEPTH: u32 = 64;

/// What a free name resolves to in the host environment.
#[derive(Debug, Clone)]
pub enum EnvValue {
    Relation(RelationId),
    Global(GlobalId),
    Function(FunctionId),
    Builtin(Builtin),
    Const(ConstValue),
}

/// Host environment: an explicit symbol map captured at declaration time.
#[derive(Debug, Clone, Default)]
pub struct Env {
    bindings: IndexMap<String, EnvValue>,
}

impl Env {
    /// Environment pre-seeded with every builtin under its surface name.
    pub fn with_builtins() -> Env {
        let mut env = Env::default();
        for b in Builtin::ALL {
            env.bind(b.name(), EnvValue::Builtin(b));
        }
        env
    }

    pub fn bind(&mut self, name: impl Into<String>, value: EnvValue) {
        self.bindings.insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<&EnvValue> {
        self.bindings.get(name)
    }
}

/// A kernel body with names resolved and its relation identity fixed.
#[derive(Debug, Clone)]
pub struct SpecKernel {
    pub id: FunctionId,
    pub relation: RelationId,
    pub param: String,
    pub body: Vec<Stmt>,
}

/// A helper body with names resolved.
#[derive(Debug, Clone)]
pub struct SpecHelper {
    pub id: FunctionId,
    pub params: Vec<(String, Type)>,
    pub ret: Option<Type>,
    pub body: Expr,
}

/// Specialize a kernel against a launch relation.
pub fn specialize_kernel(
    cat: &Catalog,
    env: &Env,
    def: &FunctionDef,
    domain: &RelationId,
) -> CompileResult<SpecKernel> {
    let (id, param, body) = match def {
        FunctionDef::Kernel {
            id, param, body, ..
        } => (id.clone(), param.clone(), body),
        FunctionDef::Helper { id, .. } => {
            return Err(CompileError::new(
                ErrorKind::Arity,
                Span::none(),
                format!("'{}' is a helper, not a kernel", id),
            ));
        }
    };
    cat.relation(domain)?;

    let mut sp = Specializer {
        cat,
        env,
        scope: vec![(param.clone(), Some(domain.clone()))],
    };
    let body = body
        .iter()
        .map(|s| sp.stmt(s, 0))
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(SpecKernel {
        id,
        relation: domain.clone(),
        param,
        body,
    })
}

/// Specialize a helper.
pub fn specialize_helper(cat: &Catalog, env: &Env, def: &FunctionDef) -> CompileResult<SpecHelper> {
    let (id, params, ret, body) = match def {
        FunctionDef::Helper {
            id,
            params,
            ret,
            body,
            ..
        } => (id.clone(), params.clone(), ret.clone(), body),
        FunctionDef::Kernel { id, .. } => {
            return Err(CompileError::new(
                ErrorKind::Arity,
                Span::none(),
                format!("'{}' is a kernel, not a helper", id),
            ));
        }
    };

    let scope = params
        .iter()
        .map(|(name, ty)| (name.clone(), ty.key_relation().cloned()))
        .collect();
    let mut sp = Specializer { cat, env, scope };
    let body = sp.expr(body, 0)?;

    Ok(SpecHelper {
        id,
        params,
        ret,
        body,
    })
}

struct Specializer<'a> {
    cat: &'a Catalog,
    env: &'a Env,
    /// Lexically visible locals, innermost last, with the relation their
    /// value is a key of (when statically known)
    scope: Vec<(String, Option<RelationId>)>,
}

impl<'a> Specializer<'a> {
    fn lookup_local(&self, name: &str) -> Option<&Option<RelationId>> {
        self.scope
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, rel)| rel)
    }

    /// Relation a resolved expression is a key of, when statically known.
    fn key_relation(&self, e: &Expr) -> Option<RelationId> {
        match &e.kind {
            ExprKind::Var(name) => self.lookup_local(name).cloned().flatten(),
            ExprKind::Affine { rel, .. } => Some(rel.clone()),
            ExprKind::Rekey { target, .. } => Some(target.clone()),
            ExprKind::UnsafeRow { rel, .. } => Some(rel.clone()),
            ExprKind::FieldAccess { field, .. } => self
                .cat
                .field(field)
                .ok()
                .and_then(|f| f.ty.key_relation().cloned()),
            ExprKind::HelperCall { function, .. } => match self.cat.function(function).ok()? {
                FunctionDef::Helper { ret: Some(ty), .. } => ty.key_relation().cloned(),
                _ => None,
            },
            _ => None,
        }
    }

    fn stmt(&mut self, s: &Stmt, depth: u32) -> CompileResult<Stmt> {
        let kind = match &s.kind {
            StmtKind::Local { name, ty, init } => {
                let init = self.expr(init, depth)?;
                let key_rel = ty
                    .as_ref()
                    .and_then(|t| t.key_relation().cloned())
                    .or_else(|| self.key_relation(&init));
                self.scope.push((name.clone(), key_rel));
                StmtKind::Local {
                    name: name.clone(),
                    ty: ty.clone(),
                    init,
                }
            }
            StmtKind::Assign { target, value } => StmtKind::Assign {
                target: self.target(target, depth)?,
                value: self.expr(value, depth)?,
            },
            StmtKind::Reduce { target, op, value } => StmtKind::Reduce {
                target: self.target(target, depth)?,
                op: *op,
                value: self.expr(value, depth)?,
            },
            StmtKind::If { arms, else_body } => {
                let arms = arms
                    .iter()
                    .map(|(cond, body)| {
                        let cond = self.expr(cond, depth)?;
                        let body = self.block(body, depth)?;
                        Ok((cond, body))
                    })
                    .collect::<CompileResult<Vec<_>>>()?;
                let else_body = match else_body {
                    Some(body) => Some(self.block(body, depth)?),
                    None => None,
                };
                StmtKind::If { arms, else_body }
            }
            StmtKind::For { var, lo, hi, body } => {
                let lo = self.expr(lo, depth)?;
                let hi = self.expr(hi, depth)?;
                let scope_depth = self.scope.len();
                self.scope.push((var.clone(), None));
                let body = body
                    .iter()
                    .map(|s| self.stmt(s, depth))
                    .collect::<CompileResult<Vec<_>>>()?;
                self.scope.truncate(scope_depth);
                StmtKind::For {
                    var: var.clone(),
                    lo,
                    hi,
                    body,
                }
            }
            StmtKind::Expr(e) => StmtKind::Expr(self.expr(e, depth)?),
            StmtKind::Insert { relation, values } => {
                let relation = self.expr(relation, depth)?;
                let values = values
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), self.expr(e, depth)?)))
                    .collect::<CompileResult<Vec<_>>>()?;
                StmtKind::Insert { relation, values }
            }
            StmtKind::Delete { key } => StmtKind::Delete {
                key: self.expr(key, depth)?,
            },
        };
        Ok(Stmt {
            kind,
            span: s.span,
        })
    }

    fn block(&mut self, body: &[Stmt], depth: u32) -> CompileResult<Vec<Stmt>> {
        let scope_depth = self.scope.len();
        let out = body
            .iter()
            .map(|s| self.stmt(s, depth))
            .collect::<CompileResult<Vec<_>>>();
        self.scope.truncate(scope_depth);
        out
    }

    /// Assignment targets resolve like expressions, but a macro here is an
    /// error rather than an expansion.
    fn target(&mut self, e: &Expr, depth: u32) -> CompileResult<Expr> {
        if let ExprKind::Access { base, member } = &e.kind {
            let base = self.expr(base, depth)?;
            if let Some(rel) = self.key_relation(&base) {
                if self.cat.field_of(&rel, member).is_none()
                    && self.cat.macro_for(&rel, member).is_some()
                {
                    return Err(CompileError::new(
                        ErrorKind::MacroExpansion,
                        e.span,
                        format!("cannot assign through macro '{}'", member),
                    ));
                }
            }
            return self.access(base, member, e.span, depth);
        }
        self.expr(e, depth)
    }

    fn expr(&mut self, e: &Expr, depth: u32) -> CompileResult<Expr> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(CompileError::new(
                ErrorKind::MacroExpansion,
                e.span,
                "macro expansion too deep",
            ));
        }
        let span = e.span;
        let kind = match &e.kind {
            ExprKind::Const(v) => {
                if !v.is_valid() {
                    return Err(CompileError::invalid_types(span)
                        .with_note(format!("malformed constant {}", v)));
                }
                ExprKind::Const(v.clone())
            }
            ExprKind::Name(name) => return self.name(name, span),
            ExprKind::Access { base, member } => {
                let base = self.expr(base, depth)?;
                return self.access(base, member, span, depth);
            }
            ExprKind::Index { base, indices } => ExprKind::Index {
                base: Box::new(self.expr(base, depth)?),
                indices: indices
                    .iter()
                    .map(|i| self.expr(i, depth))
                    .collect::<CompileResult<Vec<_>>>()?,
            },
            ExprKind::Call { callee, args } => return self.call(callee, args, span, depth),
            ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op: *op,
                lhs: Box::new(self.expr(lhs, depth)?),
                rhs: Box::new(self.expr(rhs, depth)?),
            },
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op: *op,
                operand: Box::new(self.expr(operand, depth)?),
            },
            ExprKind::VectorLit(items) => ExprKind::VectorLit(
                items
                    .iter()
                    .map(|i| self.expr(i, depth))
                    .collect::<CompileResult<Vec<_>>>()?,
            ),
            ExprKind::MatrixLit(rows) => ExprKind::MatrixLit(
                rows.iter()
                    .map(|r| {
                        r.iter()
                            .map(|i| self.expr(i, depth))
                            .collect::<CompileResult<Vec<_>>>()
                    })
                    .collect::<CompileResult<Vec<_>>>()?,
            ),
            // Already resolved: idempotent re-specialization is harmless
            other => other.clone(),
        };
        Ok(Expr { kind, span })
    }

    fn name(&mut self, name: &str, span: Span) -> CompileResult<Expr> {
        if self.lookup_local(name).is_some() {
            return Ok(Expr {
                kind: ExprKind::Var(name.to_string()),
                span,
            });
        }
        match self.env.lookup(name) {
            Some(EnvValue::Relation(rel)) => Ok(Expr {
                kind: ExprKind::RelationRef(rel.clone()),
                span,
            }),
            Some(EnvValue::Global(g)) => Ok(Expr {
                kind: ExprKind::GlobalRef(g.clone()),
                span,
            }),
            Some(EnvValue::Const(v)) => Ok(Expr {
                kind: ExprKind::Const(v.clone()),
                span,
            }),
            Some(EnvValue::Builtin(b)) => Err(CompileError::new(
                ErrorKind::NotCallable,
                span,
                format!("builtin '{}' used as a value", b.name()),
            )),
            Some(EnvValue::Function(f)) => Err(CompileError::new(
                ErrorKind::NotCallable,
                span,
                format!("function '{}' used as a value", f),
            )),
            None => Err(CompileError::new(
                ErrorKind::UnboundName,
                span,
                format!("unbound name '{}'", name),
            )),
        }
    }

    /// Resolve `base.member`: field read, key decomposition, or macro
    /// expansion.
    fn access(&mut self, base: Expr, member: &str, span: Span, depth: u32) -> CompileResult<Expr> {
        let Some(rel) = self.key_relation(&base) else {
            return Err(CompileError::new(
                ErrorKind::UnboundName,
                span,
                format!("member access '.{}' on a non-key expression", member),
            ));
        };

        if let Some(field) = self.cat.field_of(&rel, member) {
            return Ok(Expr {
                kind: ExprKind::FieldAccess {
                    key: Box::new(base),
                    field: field.id.clone(),
                },
                span,
            });
        }

        if let Some(comp) = key_comp_named(member) {
            return self.key_comp(comp, base, &rel, span);
        }

        let Some(mac) = self.cat.macro_for(&rel, member).cloned() else {
            return Err(CompileError::new(
                ErrorKind::UnboundName,
                span,
                format!("no field or macro '{}' on relation '{}'", member, rel),
            ));
        };
        self.expand_macro(&mac, base, &rel, span, depth)
    }

    fn key_comp(
        &self,
        comp: KeyComp,
        base: Expr,
        rel: &RelationId,
        span: Span,
    ) -> CompileResult<Expr> {
        if let Some(axis) = comp.axis() {
            let ndims = self.cat.relation(rel)?.dims.len();
            if axis >= ndims {
                return Err(CompileError::invalid_types(span).with_note(format!(
                    "relation '{}' has no axis {}",
                    rel, axis
                )));
            }
        }
        Ok(Expr {
            kind: ExprKind::KeyCompExpr {
                comp,
                key: Box::new(base),
            },
            span,
        })
    }

    fn expand_macro(
        &mut self,
        mac: &FieldMacro,
        base: Expr,
        rel: &RelationId,
        span: Span,
        depth: u32,
    ) -> CompileResult<Expr> {
        match mac {
            FieldMacro::Template { param, body } => {
                let expanded = substitute(body, param, &base);
                self.expr(&expanded, depth + 1)
            }
            FieldMacro::Link { target } => Ok(Expr {
                kind: ExprKind::Rekey {
                    target: target.clone(),
                    key: Box::new(base),
                },
                span,
            }),
            FieldMacro::Center => {
                let relation = self.cat.relation(rel)?;
                let half = match relation.grid.as_ref().map(|g| g.role) {
                    Some(GridRole::Cells) => 0.5,
                    _ => 0.0,
                };
                let comps = [KeyComp::X, KeyComp::Y, KeyComp::Z];
                let items = (0..relation.dims.len())
                    .map(|axis| {
                        Expr::new(ExprKind::KeyCompExpr {
                            comp: comps[axis],
                            key: Box::new(base.clone()),
                        })
                        .mul(Expr::num(1.0))
                        .add(Expr::num(half))
                    })
                    .collect();
                self.expr(&Expr::vector(items).with_span(span), depth + 1)
            }
            FieldMacro::BoundaryDepth { axis, positive } => {
                let relation = self.cat.relation(rel)?;
                let n_bd = grid_n_bd(self.cat, rel)?;
                let comps = [KeyComp::X, KeyComp::Y, KeyComp::Z];
                if *axis as usize >= relation.dims.len() {
                    return Err(CompileError::invalid_types(span));
                }
                let coord = Expr::new(ExprKind::KeyCompExpr {
                    comp: comps[*axis as usize],
                    key: Box::new(base),
                });
                let extent = relation.dims[*axis as usize];
                // depth into the face: n_bd - c from below, c - (d-1-n_bd)
                // from above, clamped at zero
                let raw_depth = if *positive {
                    coord.sub(Expr::num((extent - 1 - n_bd.min(extent - 1)) as f64))
                } else {
                    Expr::num(n_bd as f64).sub(coord)
                };
                let clamped = Expr::new(ExprKind::BuiltinCall {
                    builtin: Builtin::Imax,
                    args: vec![Expr::num(0.0), raw_depth],
                });
                self.expr(&clamped.with_span(span), depth + 1)
            }
            FieldMacro::InBoundary => {
                let cond = self.in_boundary_expr(rel, &base, span)?;
                self.expr(&cond, depth + 1)
            }
            FieldMacro::InInterior => {
                let cond = self.in_boundary_expr(rel, &base, span)?;
                self.expr(
                    &Expr::new(ExprKind::Unary {
                        op: tessel_ir::lir::UnOp::Not,
                        operand: Box::new(cond),
                    })
                    .with_span(span),
                    depth + 1,
                )
            }
        }
    }

    /// `xid < n_bd or xid >= dx - n_bd or …` across the relation's axes.
    fn in_boundary_expr(
        &self,
        rel: &RelationId,
        base: &Expr,
        span: Span,
    ) -> CompileResult<Expr> {
        use tessel_ir::lir::BinOp;
        let relation = self.cat.relation(rel)?;
        let n_bd = grid_n_bd(self.cat, rel)?;
        let comps = [KeyComp::X, KeyComp::Y, KeyComp::Z];
        let mut cond: Option<Expr> = None;
        for (axis, extent) in relation.dims.iter().enumerate() {
            let coord = || {
                Expr::new(ExprKind::KeyCompExpr {
                    comp: comps[axis],
                    key: Box::new(base.clone()),
                })
            };
            let low = Expr::binary(BinOp::Lt, coord(), Expr::num(n_bd as f64));
            let high = Expr::binary(
                BinOp::Ge,
                coord(),
                Expr::num(extent.saturating_sub(n_bd) as f64),
            );
            let axis_cond = Expr::binary(BinOp::Or, low, high);
            cond = Some(match cond {
                Some(c) => Expr::binary(BinOp::Or, c, axis_cond),
                None => axis_cond,
            });
        }
        Ok(cond
            .expect("relations have at least one axis")
            .with_span(span))
    }

    fn call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
        depth: u32,
    ) -> CompileResult<Expr> {
        // Builtin and helper names resolve through the environment before
        // generic expression resolution, which would reject them.
        if let ExprKind::Name(name) = &callee.kind {
            if self.lookup_local(name).is_none() {
                match self.env.lookup(name) {
                    Some(EnvValue::Builtin(b)) => {
                        let b = *b;
                        return self.builtin_call(b, args, span, depth);
                    }
                    Some(EnvValue::Function(f)) => {
                        let function = f.clone();
                        let args = args
                            .iter()
                            .map(|a| self.expr(a, depth))
                            .collect::<CompileResult<Vec<_>>>()?;
                        return Ok(Expr {
                            kind: ExprKind::HelperCall { function, args },
                            span,
                        });
                    }
                    _ => {}
                }
            }
        }

        let callee = self.expr(callee, depth)?;
        // Key called like a function: neighbor access on a grid
        if let Some(rel) = self.key_relation(&callee) {
            return self.neighbor_call(rel, callee, args, span, depth);
        }
        Err(CompileError::new(
            ErrorKind::NotCallable,
            span,
            "call of a non-function value",
        ))
    }

    fn builtin_call(
        &mut self,
        b: Builtin,
        args: &[Expr],
        span: Span,
        depth: u32,
    ) -> CompileResult<Expr> {
        match b {
            Builtin::Affine => {
                if args.len() != 3 {
                    return Err(CompileError::new(
                        ErrorKind::Arity,
                        span,
                        format!("Affine takes 3 arguments, got {}", args.len()),
                    ));
                }
                let rel_expr = self.expr(&args[0], depth)?;
                let ExprKind::RelationRef(rel) = rel_expr.kind else {
                    return Err(CompileError::new(
                        ErrorKind::Stencil,
                        span,
                        "Affine target must be a relation",
                    ));
                };
                let matrix = const_matrix(&self.expr(&args[1], depth)?)?;
                let base = self.expr(&args[2], depth)?;
                Ok(Expr {
                    kind: ExprKind::Affine {
                        rel,
                        matrix,
                        base: Box::new(base),
                    },
                    span,
                })
            }
            Builtin::UnsafeRow => {
                if args.len() != 2 {
                    return Err(CompileError::new(
                        ErrorKind::Arity,
                        span,
                        format!("UNSAFE_ROW takes 2 arguments, got {}", args.len()),
                    ));
                }
                let index = self.expr(&args[0], depth)?;
                let rel_expr = self.expr(&args[1], depth)?;
                let ExprKind::RelationRef(rel) = rel_expr.kind else {
                    return Err(CompileError::new(
                        ErrorKind::Stencil,
                        span,
                        "UNSAFE_ROW target must be a relation",
                    ));
                };
                Ok(Expr {
                    kind: ExprKind::UnsafeRow {
                        rel,
                        index: Box::new(index),
                    },
                    span,
                })
            }
            Builtin::Id | Builtin::Xid | Builtin::Yid | Builtin::Zid => {
                if args.len() != 1 {
                    return Err(CompileError::new(
                        ErrorKind::Arity,
                        span,
                        format!("{} takes 1 argument, got {}", b.name(), args.len()),
                    ));
                }
                let key = self.expr(&args[0], depth)?;
                let Some(rel) = self.key_relation(&key) else {
                    return Err(CompileError::invalid_types(span)
                        .with_note(format!("{} expects a key argument", b.name())));
                };
                let comp = match b {
                    Builtin::Id => KeyComp::Id,
                    Builtin::Xid => KeyComp::X,
                    Builtin::Yid => KeyComp::Y,
                    _ => KeyComp::Z,
                };
                self.key_comp(comp, key, &rel, span)
            }
            _ => {
                let args = args
                    .iter()
                    .map(|a| self.expr(a, depth))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(Expr {
                    kind: ExprKind::BuiltinCall { builtin: b, args },
                    span,
                })
            }
        }
    }

    /// `c(dx, dy[, dz])` — constant translation through the grid.
    fn neighbor_call(
        &mut self,
        rel: RelationId,
        base: Expr,
        args: &[Expr],
        span: Span,
        depth: u32,
    ) -> CompileResult<Expr> {
        let relation = self.cat.relation(&rel)?;
        if relation.grid.is_none() {
            return Err(CompileError::new(
                ErrorKind::Stencil,
                span,
                format!("neighbor access on non-grid relation '{}'", rel),
            ));
        }
        let ndims = relation.dims.len();
        if args.len() != ndims {
            return Err(CompileError::new(
                ErrorKind::Arity,
                span,
                format!(
                    "neighbor access on '{}' takes {} offsets, got {}",
                    rel,
                    ndims,
                    args.len()
                ),
            ));
        }
        let mut offsets = Vec::with_capacity(ndims);
        for a in args {
            let a = self.expr(a, depth)?;
            let off = match &a.kind {
                ExprKind::Const(v) => v.as_f64().filter(|n| n.fract() == 0.0),
                ExprKind::Unary {
                    op: tessel_ir::lir::UnOp::Neg,
                    operand,
                } => match &operand.kind {
                    ExprKind::Const(v) => v.as_f64().filter(|n| n.fract() == 0.0).map(|n| -n),
                    _ => None,
                },
                _ => None,
            };
            match off {
                Some(n) => offsets.push(n as i64),
                None => {
                    return Err(CompileError::new(
                        ErrorKind::Stencil,
                        a.span.or(span),
                        "neighbor offsets must be integer constants",
                    ));
                }
            }
        }
        Ok(Expr {
            kind: ExprKind::Affine {
                rel,
                matrix: translation_matrix(&offsets),
                base: Box::new(base),
            },
            span,
        })
    }
}

fn key_comp_named(member: &str) -> Option<KeyComp> {
    match member {
        "id" => Some(KeyComp::Id),
        "xid" => Some(KeyComp::X),
        "yid" => Some(KeyComp::Y),
        "zid" => Some(KeyComp::Z),
        _ => None,
    }
}

fn grid_n_bd(cat: &Catalog, rel: &RelationId) -> CompileResult<u64> {
    let relation = cat.relation(rel)?;
    relation
        .grid
        .as_ref()
        .map(|g| g.n_bd)
        .ok_or_else(|| {
            CompileError::new(
                ErrorKind::Internal,
                Span::none(),
                format!("'{}' is not a grid relation", rel),
            )
        })
}

/// Padded diagonal translation matrix for the given per-axis offsets:
/// identity rotation plus a final translation column.
pub fn translation_matrix(offsets: &[i64]) -> ConstValue {
    let n = offsets.len();
    let rows = (0..n)
        .map(|r| {
            let mut row: Vec<ConstValue> = (0..n)
                .map(|c| ConstValue::Number(if r == c { 1.0 } else { 0.0 }))
                .collect();
            row.push(ConstValue::Number(offsets[r] as f64));
            ConstValue::List(row)
        })
        .collect();
    ConstValue::List(rows)
}

/// Fold a resolved matrix argument to a constant, for the affine form.
fn const_matrix(e: &Expr) -> CompileResult<ConstValue> {
    fn fold(e: &Expr) -> Option<ConstValue> {
        match &e.kind {
            ExprKind::Const(v) => Some(v.clone()),
            ExprKind::VectorLit(items) => Some(ConstValue::List(
                items.iter().map(fold).collect::<Option<Vec<_>>>()?,
            )),
            ExprKind::MatrixLit(rows) => Some(ConstValue::List(
                rows.iter()
                    .map(|r| {
                        Some(ConstValue::List(
                            r.iter().map(fold).collect::<Option<Vec<_>>>()?,
                        ))
                    })
                    .collect::<Option<Vec<_>>>()?,
            )),
            ExprKind::Unary {
                op: tessel_ir::lir::UnOp::Neg,
                operand,
            } => match fold(operand)? {
                ConstValue::Number(n) => Some(ConstValue::Number(-n)),
                _ => None,
            },
            _ => None,
        }
    }
    fold(e).ok_or_else(|| {
        CompileError::new(
            ErrorKind::Stencil,
            e.span,
            "affine matrix must be constant",
        )
    })
}

/// Replace `Name(param)` with a replacement expression throughout a
/// template body.
fn substitute(body: &Expr, param: &str, replacement: &Expr) -> Expr {
    let kind = match &body.kind {
        ExprKind::Name(n) if n == param => return replacement.clone(),
        ExprKind::Access { base, member } => ExprKind::Access {
            base: Box::new(substitute(base, param, replacement)),
            member: member.clone(),
        },
        ExprKind::Index { base, indices } => ExprKind::Index {
            base: Box::new(substitute(base, param, replacement)),
            indices: indices
                .iter()
                .map(|i| substitute(i, param, replacement))
                .collect(),
        },
        ExprKind::Call { callee, args } => ExprKind::Call {
            callee: Box::new(substitute(callee, param, replacement)),
            args: args
                .iter()
                .map(|a| substitute(a, param, replacement))
                .collect(),
        },
        ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
            op: *op,
            lhs: Box::new(substitute(lhs, param, replacement)),
            rhs: Box::new(substitute(rhs, param, replacement)),
        },
        ExprKind::Unary { op, operand } => ExprKind::Unary {
            op: *op,
            operand: Box::new(substitute(operand, param, replacement)),
        },
        ExprKind::VectorLit(items) => ExprKind::VectorLit(
            items
                .iter()
                .map(|i| substitute(i, param, replacement))
                .collect(),
        ),
        ExprKind::MatrixLit(rows) => ExprKind::MatrixLit(
            rows.iter()
                .map(|r| r.iter().map(|i| substitute(i, param, replacement)).collect())
                .collect(),
        ),
        other => other.clone(),
    };
    Expr {
        kind,
        span: body.span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::raw::Expr as E;
    use crate::ast::FunctionDef;
    use crate::grid::create_grid;
    use tessel_ir::Primitive;

    fn setup() -> (Catalog, Env) {
        let mut cat = Catalog::new();
        let rel = cat.add_relation("verts", vec![10], false, None).unwrap();
        cat.add_field(&rel, "x", Type::Primitive(Primitive::I32))
            .unwrap();
        let mut env = Env::with_builtins();
        env.bind("verts", EnvValue::Relation(rel));
        (cat, env)
    }

    fn kernel(body: Vec<Stmt>) -> FunctionDef {
        FunctionDef::Kernel {
            id: "k".into(),
            name: "k".to_string(),
            param: "v".to_string(),
            body,
        }
    }

    #[test]
    fn test_field_access_resolves() {
        let (cat, env) = setup();
        let def = kernel(vec![Stmt::assign(
            E::name("v").dot("x"),
            E::name("v").dot("x").add(E::num(1.0)),
        )]);
        let spec = specialize_kernel(&cat, &env, &def, &"verts".into()).unwrap();
        match &spec.body[0].kind {
            StmtKind::Assign { target, .. } => match &target.kind {
                ExprKind::FieldAccess { field, key } => {
                    assert_eq!(field.0, "verts.x");
                    assert!(matches!(key.kind, ExprKind::Var(ref n) if n == "v"));
                }
                other => panic!("expected field access, got {:?}", other),
            },
            _ => panic!("expected assign"),
        }
    }

    #[test]
    fn test_unbound_name_rejected() {
        let (cat, env) = setup();
        let def = kernel(vec![Stmt::expr(E::name("nope"))]);
        let err = specialize_kernel(&cat, &env, &def, &"verts".into()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnboundName);
    }

    #[test]
    fn test_non_callable_rejected() {
        let (mut cat, mut env) = setup();
        let g = cat
            .add_global("g", Type::F64, ConstValue::Number(0.0))
            .unwrap();
        env.bind("g", EnvValue::Global(g));
        let def = kernel(vec![Stmt::expr(E::name("g").call(vec![E::num(1.0)]))]);
        let err = specialize_kernel(&cat, &env, &def, &"verts".into()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotCallable);
    }

    #[test]
    fn test_neighbor_call_becomes_affine() {
        let mut cat = Catalog::new();
        let g = create_grid(&mut cat, "g", &[5, 5], 0).unwrap();
        cat.add_field(&g.cells, "f", Type::F64).unwrap();
        let env = Env::with_builtins();
        let def = FunctionDef::Kernel {
            id: "k".into(),
            name: "k".to_string(),
            param: "c".to_string(),
            body: vec![Stmt::local(
                "n",
                E::name("c").call(vec![E::num(1.0), E::num(0.0)]).dot("f"),
            )],
        };
        let spec = specialize_kernel(&cat, &env, &def, &g.cells).unwrap();
        match &spec.body[0].kind {
            StmtKind::Local { init, .. } => match &init.kind {
                ExprKind::FieldAccess { key, .. } => match &key.kind {
                    ExprKind::Affine { rel, matrix, .. } => {
                        assert_eq!(rel, &g.cells);
                        assert_eq!(matrix, &translation_matrix(&[1, 0]));
                    }
                    other => panic!("expected affine key, got {:?}", other),
                },
                other => panic!("expected field access, got {:?}", other),
            },
            _ => panic!("expected local"),
        }
    }

    #[test]
    fn test_link_macro_becomes_rekey() {
        let mut cat = Catalog::new();
        let g = create_grid(&mut cat, "g", &[4, 4], 0).unwrap();
        cat.add_field(&g.vertices, "w", Type::F64).unwrap();
        let env = Env::with_builtins();
        let def = FunctionDef::Kernel {
            id: "k".into(),
            name: "k".to_string(),
            param: "c".to_string(),
            body: vec![Stmt::local("w", E::name("c").dot("vertex").dot("w"))],
        };
        let spec = specialize_kernel(&cat, &env, &def, &g.cells).unwrap();
        match &spec.body[0].kind {
            StmtKind::Local { init, .. } => match &init.kind {
                ExprKind::FieldAccess { key, field } => {
                    assert_eq!(field.0, "g.vertices.w");
                    assert!(matches!(key.kind, ExprKind::Rekey { .. }));
                }
                other => panic!("expected field access, got {:?}", other),
            },
            _ => panic!("expected local"),
        }
    }

    #[test]
    fn test_macro_write_rejected() {
        let mut cat = Catalog::new();
        let g = create_grid(&mut cat, "g", &[4, 4], 1).unwrap();
        let env = Env::with_builtins();
        let def = FunctionDef::Kernel {
            id: "k".into(),
            name: "k".to_string(),
            param: "c".to_string(),
            body: vec![Stmt::assign(E::name("c").dot("center"), E::num(0.0))],
        };
        let err = specialize_kernel(&cat, &env, &def, &g.cells).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MacroExpansion);
    }

    #[test]
    fn test_template_macro_expands() {
        let (mut cat, env) = setup();
        // doubled(v) := v.x + v.x
        cat.add_macro(
            &"verts".into(),
            "doubled",
            FieldMacro::Template {
                param: "k".to_string(),
                body: E::name("k").dot("x").add(E::name("k").dot("x")),
            },
        )
        .unwrap();
        let def = kernel(vec![Stmt::local("d", E::name("v").dot("doubled"))]);
        let spec = specialize_kernel(&cat, &env, &def, &"verts".into()).unwrap();
        match &spec.body[0].kind {
            StmtKind::Local { init, .. } => {
                assert!(matches!(init.kind, ExprKind::Binary { .. }));
            }
            _ => panic!("expected local"),
        }
    }

    #[test]
    fn test_translation_matrix_shape() {
        let m = translation_matrix(&[1, 0]);
        // [[1,0,1],[0,1,0]]
        let rows = m.as_list().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_list().unwrap().len(), 3);
        assert_eq!(rows[0].as_list().unwrap()[2], ConstValue::Number(1.0));
        assert_eq!(rows[1].as_list().unwrap()[2], ConstValue::Number(0.0));
    }
}
