//! Compilation pipeline
//!
//! High-level API: replay a recorded program's declarations into a fresh
//! catalog and environment, then lower the statement tree, emitting one
//! task per kernel specialization. Program bundles and compiled task
//! graphs serialize as MessagePack.

use tracing::info;

use tessel_ir::{Backend, TaskGraph};

use crate::cache::SpecializationCache;
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::grid::create_grid;
use crate::lower::lower_program;
use crate::program::{rects_from_const, Decl, Program};
use crate::relation::{Catalog, FieldMacro, SubsetData};
use crate::span::Span;
use crate::specialize::{Env, EnvValue};

/// Compile a recorded program for the CPU backend.
pub fn compile(program: &Program) -> CompileResult<TaskGraph> {
    compile_for(program, Backend::Cpu)
}

/// Compile a recorded program for an explicit backend.
pub fn compile_for(program: &Program, backend: Backend) -> CompileResult<TaskGraph> {
    let (cat, env) = replay_decls(program)?;
    let mut cache = SpecializationCache::new();
    let driver = lower_program(&cat, &env, program, backend, &mut cache)?;
    info!(
        tasks = cache.len(),
        driver_ops = driver.ops.len(),
        "program compiled"
    );
    Ok(TaskGraph {
        tasks: cache.into_tasks(),
        driver,
    })
}

/// Rebuild the catalog and host environment from recorded declarations.
pub fn replay_decls(program: &Program) -> CompileResult<(Catalog, Env)> {
    let mut cat = Catalog::new();
    let mut env = Env::with_builtins();

    for decl in &program.decls {
        match decl {
            Decl::NewRelation {
                name,
                size,
                elastic,
            } => {
                let id = cat.add_relation(name, vec![*size], *elastic, None)?;
                env.bind(name.clone(), EnvValue::Relation(id));
            }
            Decl::NewGrid {
                name,
                extents,
                n_bd,
            } => {
                let handles = create_grid(&mut cat, name, extents, *n_bd)?;
                for rel in [&handles.cells, &handles.vertices, &handles.dual_cells] {
                    env.bind(rel.0.clone(), EnvValue::Relation(rel.clone()));
                }
            }
            Decl::NewField { relation, name, ty } => {
                cat.add_field(relation, name, ty.clone())?;
            }
            Decl::NewGlobal { name, ty, init } => {
                let id = cat.add_global(name, ty.clone(), init.clone())?;
                env.bind(name.clone(), EnvValue::Global(id));
            }
            Decl::NewFunction { def } => {
                let name = def.name().to_string();
                let id = cat.add_function(def.clone())?;
                env.bind(name, EnvValue::Function(id));
            }
            Decl::NewSubset {
                relation,
                name,
                rectangles,
                mask,
                index,
            } => {
                let rects = match rectangles {
                    Some(v) => Some(rects_from_const(v)?),
                    None => None,
                };
                let data = match (mask, index) {
                    (Some(mask), None) => SubsetData::Mask(mask.clone()),
                    (None, Some(rows)) => SubsetData::Index(rows.clone()),
                    (None, None) => {
                        // membership derived from the rectangle union
                        let rects = rects.as_ref().ok_or_else(|| {
                            CompileError::new(
                                ErrorKind::MalformedProgram,
                                Span::none(),
                                format!("subset '{}' has neither membership nor rectangles", name),
                            )
                        })?;
                        let dims = cat.relation(relation)?.dims.clone();
                        for r in rects {
                            if !r.within(&dims) {
                                return Err(CompileError::new(
                                    ErrorKind::MalformedProgram,
                                    Span::none(),
                                    format!(
                                        "subset '{}' rectangle exceeds the bounds of '{}'",
                                        name, relation
                                    ),
                                ));
                            }
                        }
                        let size: u64 = dims.iter().product();
                        let mask = (0..size)
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
                        SubsetData::Mask(mask)
                    }
                    (Some(_), Some(_)) => {
                        return Err(CompileError::new(
                            ErrorKind::MalformedProgram,
                            Span::none(),
                            format!("subset '{}' declares both a mask and an index list", name),
                        ));
                    }
                };
                cat.add_subset(relation, name, data, rects)?;
            }
            Decl::NewFieldMacro {
                relation,
                name,
                param,
                body,
            } => {
                cat.add_macro(
                    relation,
                    name,
                    FieldMacro::Template {
                        param: param.clone(),
                        body: body.clone(),
                    },
                )?;
            }
        }
    }

    Ok((cat, env))
}

/// Serialize a program bundle to MessagePack.
pub fn serialize_program(program: &Program) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(program)
}

/// Deserialize a program bundle from MessagePack.
pub fn deserialize_program(data: &[u8]) -> Result<Program, rmp_serde::decode::Error> {
    rmp_serde::from_slice(data)
}

/// Serialize a compiled task graph to MessagePack.
pub fn serialize_graph(graph: &TaskGraph) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(graph)
}

/// Deserialize a compiled task graph from MessagePack.
pub fn deserialize_graph(data: &[u8]) -> Result<TaskGraph, rmp_serde::decode::Error> {
    rmp_serde::from_slice(data)
}
