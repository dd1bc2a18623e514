//! Embedded host surface
//!
//! The API a host program drives to declare relations, fields, globals,
//! and functions, and to record the control program. Declarations mutate
//! the live catalog (so later kernels resolve against them) and append to
//! the recorder in one step; `finish` seals everything into a serializable
//! bundle.

use tessel_ir::driver::{ControlCond, ControlExpr, Rect};
use tessel_ir::{ConstValue, FieldId, FunctionId, GlobalId, RelationId, SubsetId, Type};

use crate::ast::{raw, FunctionDef};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::grid::{create_grid, GridHandles};
use crate::program::{Decl, Program, Recorder, Stmt};
use crate::relation::{Catalog, FieldMacro, SubsetData};
use crate::span::Span;
use crate::specialize::{Env, EnvValue};

/// All compiler state a host program talks to.
#[derive(Debug)]
pub struct Context {
    cat: Catalog,
    env: Env,
    rec: Recorder,
}

impl Context {
    pub fn new() -> Self {
        Self {
            cat: Catalog::new(),
            env: Env::with_builtins(),
            rec: Recorder::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.cat
    }

    // ---- declarations ----

    pub fn new_relation(&mut self, size: u64, name: &str) -> CompileResult<RelationId> {
        let id = self.cat.add_relation(name, vec![size], false, None)?;
        self.env.bind(name, EnvValue::Relation(id.clone()));
        self.rec.declare(Decl::NewRelation {
            name: name.to_string(),
            size,
            elastic: false,
        });
        Ok(id)
    }

    /// A relation that supports insert and delete; it carries the
    /// liveness column from birth.
    pub fn new_elastic_relation(&mut self, size: u64, name: &str) -> CompileResult<RelationId> {
        let id = self.cat.add_relation(name, vec![size], true, None)?;
        self.env.bind(name, EnvValue::Relation(id.clone()));
        self.rec.declare(Decl::NewRelation {
            name: name.to_string(),
            size,
            elastic: true,
        });
        Ok(id)
    }

    pub fn new_grid(
        &mut self,
        name: &str,
        extents: &[u64],
        n_bd: u64,
    ) -> CompileResult<GridHandles> {
        let handles = create_grid(&mut self.cat, name, extents, n_bd)?;
        for rel in [&handles.cells, &handles.vertices, &handles.dual_cells] {
            self.env.bind(rel.0.clone(), EnvValue::Relation(rel.clone()));
        }
        self.rec.declare(Decl::NewGrid {
            name: name.to_string(),
            extents: extents.to_vec(),
            n_bd,
        });
        Ok(handles)
    }

    pub fn new_field(
        &mut self,
        rel: &RelationId,
        name: &str,
        ty: Type,
    ) -> CompileResult<FieldId> {
        let id = self.cat.add_field(rel, name, ty.clone())?;
        self.rec.declare(Decl::NewField {
            relation: rel.clone(),
            name: name.to_string(),
            ty,
        });
        Ok(id)
    }

    pub fn new_global(
        &mut self,
        name: &str,
        ty: Type,
        init: impl Into<ConstValue>,
    ) -> CompileResult<GlobalId> {
        let init = init.into();
        let id = self.cat.add_global(name, ty.clone(), init.clone())?;
        self.env.bind(name, EnvValue::Global(id.clone()));
        self.rec.declare(Decl::NewGlobal {
            name: name.to_string(),
            ty,
            init,
        });
        Ok(id)
    }

    pub fn new_kernel(
        &mut self,
        name: &str,
        param: &str,
        body: Vec<raw::Stmt>,
    ) -> CompileResult<FunctionId> {
        let def = FunctionDef::Kernel {
            id: name.into(),
            name: name.to_string(),
            param: param.to_string(),
            body,
        };
        let id = self.cat.add_function(def.clone())?;
        self.env.bind(name, EnvValue::Function(id.clone()));
        self.rec.declare(Decl::NewFunction { def });
        Ok(id)
    }

    pub fn new_helper(
        &mut self,
        name: &str,
        params: Vec<(String, Type)>,
        ret: Option<Type>,
        body: raw::Expr,
    ) -> CompileResult<FunctionId> {
        let def = FunctionDef::Helper {
            id: name.into(),
            name: name.to_string(),
            params,
            ret,
            body,
        };
        let id = self.cat.add_function(def.clone())?;
        self.env.bind(name, EnvValue::Function(id.clone()));
        self.rec.declare(Decl::NewFunction { def });
        Ok(id)
    }

    /// Install a compile-time rewrite on a relation member. `param` names
    /// the key placeholder inside `body`.
    pub fn new_field_macro(
        &mut self,
        rel: &RelationId,
        name: &str,
        param: &str,
        body: raw::Expr,
    ) -> CompileResult<()> {
        self.cat.add_macro(
            rel,
            name,
            FieldMacro::Template {
                param: param.to_string(),
                body: body.clone(),
            },
        )?;
        self.rec.declare(Decl::NewFieldMacro {
            relation: rel.clone(),
            name: name.to_string(),
            param: param.to_string(),
            body,
        });
        Ok(())
    }

    pub fn new_subset_from_mask(
        &mut self,
        rel: &RelationId,
        name: &str,
        pred: impl Fn(u64) -> bool,
    ) -> CompileResult<SubsetId> {
        let size = self.cat.relation(rel)?.size();
        let mask: Vec<bool> = (0..size).map(pred).collect();
        let id = self
            .cat
            .add_subset(rel, name, SubsetData::Mask(mask.clone()), None)?;
        self.rec.declare(Decl::NewSubset {
            relation: rel.clone(),
            name: name.to_string(),
            rectangles: None,
            mask: Some(mask),
            index: None,
        });
        Ok(id)
    }

    pub fn new_subset_from_indices(
        &mut self,
        rel: &RelationId,
        name: &str,
        mut rows: Vec<u64>,
    ) -> CompileResult<SubsetId> {
        let size = self.cat.relation(rel)?.size();
        rows.sort_unstable();
        rows.dedup();
        if rows.iter().any(|r| *r >= size) {
            return Err(CompileError::new(
                ErrorKind::MalformedProgram,
                Span::none(),
                format!("subset '{}' index out of bounds for '{}'", name, rel),
            ));
        }
        let id = self
            .cat
            .add_subset(rel, name, SubsetData::Index(rows.clone()), None)?;
        self.rec.declare(Decl::NewSubset {
            relation: rel.clone(),
            name: name.to_string(),
            rectangles: None,
            mask: None,
            index: Some(rows),
        });
        Ok(id)
    }

    /// A grid subset described as a union of inclusive axis-aligned
    /// rectangles.
    pub fn new_subset_from_rectangles(
        &mut self,
        rel: &RelationId,
        name: &str,
        rects: Vec<Rect>,
    ) -> CompileResult<SubsetId> {
        let dims = self.cat.relation(rel)?.dims.clone();
        for r in &rects {
            if !r.within(&dims) {
                return Err(CompileError::new(
                    ErrorKind::MalformedProgram,
                    Span::none(),
                    format!("subset '{}' rectangle exceeds the bounds of '{}'", name, rel),
                ));
            }
        }
        let size: u64 = dims.iter().product();
        let mask: Vec<bool> = (0..size)
            .map(|id| {
                let coords = tessel_ir::linear_to_coords(id, &dims);
                rects.iter().any(|r| {
                    r.extents
                        .iter()
                        .zip(&coords)
                        .all(|((lo, hi), c)| lo <= c && c <= hi)
                })
            })
            .collect();
        let rect_const = ConstValue::List(
            rects
                .iter()
                .map(|r| {
                    ConstValue::List(
                        r.extents
                            .iter()
                            .map(|(lo, hi)| {
                                ConstValue::List(vec![
                                    ConstValue::Number(*lo as f64),
                                    ConstValue::Number(*hi as f64),
                                ])
                            })
                            .collect(),
                    )
                })
                .collect(),
        );
        let id = self
            .cat
            .add_subset(rel, name, SubsetData::Mask(mask), Some(rects))?;
        self.rec.declare(Decl::NewSubset {
            relation: rel.clone(),
            name: name.to_string(),
            rectangles: Some(rect_const),
            mask: None,
            index: None,
        });
        Ok(id)
    }

    // ---- control statements ----

    pub fn load_field(&mut self, field: &FieldId, value: impl Into<ConstValue>) {
        self.rec.push(Stmt::LoadField {
            field: field.clone(),
            value: value.into(),
        });
    }

    pub fn set_global(&mut self, global: &GlobalId, expr: ControlExpr) {
        self.rec.push(Stmt::SetGlobal {
            global: global.clone(),
            expr,
        });
    }

    pub fn for_each(&mut self, function: &FunctionId, rel: &RelationId) -> CompileResult<()> {
        self.check_launch(function, rel)?;
        self.rec.push(Stmt::ForEach {
            function: function.clone(),
            relation: rel.clone(),
            subset: None,
        });
        Ok(())
    }

    pub fn for_each_subset(
        &mut self,
        function: &FunctionId,
        rel: &RelationId,
        subset: &SubsetId,
    ) -> CompileResult<()> {
        self.check_launch(function, rel)?;
        let sub = self.cat.subset(subset)?;
        if &sub.relation != rel {
            return Err(CompileError::new(
                ErrorKind::Arity,
                Span::none(),
                format!("subset '{}' does not restrict relation '{}'", subset, rel),
            ));
        }
        self.rec.push(Stmt::ForEach {
            function: function.clone(),
            relation: rel.clone(),
            subset: Some(subset.clone()),
        });
        Ok(())
    }

    fn check_launch(&self, function: &FunctionId, rel: &RelationId) -> CompileResult<()> {
        if !self.cat.function(function)?.is_kernel() {
            return Err(CompileError::new(
                ErrorKind::Arity,
                Span::none(),
                format!("'{}' is a helper and cannot be launched over a domain", function),
            ));
        }
        self.cat.relation(rel)?;
        Ok(())
    }

    pub fn if_(&mut self, cond: ControlCond) {
        self.rec.begin_if(cond);
    }

    pub fn else_(&mut self) -> CompileResult<()> {
        self.rec.begin_else()
    }

    pub fn while_(&mut self, cond: ControlCond) {
        self.rec.begin_while(cond);
    }

    pub fn end(&mut self) -> CompileResult<()> {
        self.rec.end()
    }

    /// Seal the program into its serializable bundle.
    pub fn finish(self) -> CompileResult<Program> {
        self.rec.finish()
    }
}

/// Shorthand for reading a global in control expressions.
pub fn get_global(g: &GlobalId) -> ControlExpr {
    ControlExpr::GetGlobal(g.clone())
}

/// Shorthand for a numeric control constant.
pub fn num(n: f64) -> ControlExpr {
    ControlExpr::Const(ConstValue::Number(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::raw::{Expr as E, Stmt as S};
    use tessel_ir::driver::CmpOp;
    use tessel_ir::Primitive;

    #[test]
    fn test_context_records_and_finishes() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(10, "verts").unwrap();
        let x = ctx
            .new_field(&rel, "x", Type::Primitive(Primitive::I32))
            .unwrap();
        let g = ctx.new_global("g", Type::F64, 0.0).unwrap();
        let k = ctx
            .new_kernel(
                "bump",
                "v",
                vec![S::assign(
                    E::name("v").dot("x"),
                    E::name("v").dot("x").add(E::num(1.0)),
                )],
            )
            .unwrap();

        ctx.load_field(&x, 0.0);
        ctx.for_each(&k, &rel).unwrap();
        ctx.while_(ControlCond::compare(CmpOp::Lt, get_global(&g), num(3.0)));
        ctx.set_global(
            &g,
            ControlExpr::binary(
                tessel_ir::driver::ControlBinOp::Add,
                get_global(&g),
                num(1.0),
            ),
        );
        ctx.end().unwrap();

        let program = ctx.finish().unwrap();
        assert_eq!(program.decls.len(), 4);
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn test_launch_of_helper_rejected() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(4, "r").unwrap();
        let h = ctx
            .new_helper(
                "h",
                vec![("a".to_string(), Type::F64)],
                Some(Type::F64),
                E::name("a"),
            )
            .unwrap();
        let err = ctx.for_each(&h, &rel).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arity);
    }

    #[test]
    fn test_subset_indices_validated() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(4, "r").unwrap();
        let err = ctx
            .new_subset_from_indices(&rel, "bad", vec![1, 9])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedProgram);
    }
}
