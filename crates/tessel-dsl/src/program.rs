//! Control-program IR and recorder
//!
//! Host statements append to a stored program: declarations plus an
//! imperative statement tree. `IF`/`WHILE` push an open wrapper and a new
//! scope, `ELSE` seals the then-scope, `END` pops and installs. The
//! recorded program is serializable and is what the lowerer turns into the
//! driver task.

use serde::{Deserialize, Serialize};

use tessel_ir::driver::{ControlCond, ControlExpr};
use tessel_ir::{ConstValue, FieldId, FunctionId, GlobalId, RelationId, SubsetId, Type};

use crate::ast::{raw, FunctionDef};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::span::Span;

/// A recorded declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Decl {
    NewRelation {
        name: String,
        size: u64,
        elastic: bool,
    },
    /// One declaration per grid family; replaying it recreates the three
    /// relations, their macros, and the automatic subsets
    NewGrid {
        name: String,
        extents: Vec<u64>,
        n_bd: u64,
    },
    NewField {
        relation: RelationId,
        name: String,
        ty: Type,
    },
    NewGlobal {
        name: String,
        ty: Type,
        init: ConstValue,
    },
    NewFunction { def: FunctionDef },
    NewSubset {
        relation: RelationId,
        name: String,
        /// Rectangles as a constant: a list of rects, each a list of
        /// `[lo, hi]` pairs
        rectangles: Option<ConstValue>,
        mask: Option<Vec<bool>>,
        index: Option<Vec<u64>>,
    },
    NewFieldMacro {
        relation: RelationId,
        name: String,
        param: String,
        body: raw::Expr,
    },
}

/// A recorded control statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Block(Vec<Stmt>),
    ForEach {
        function: FunctionId,
        relation: RelationId,
        subset: Option<SubsetId>,
    },
    If {
        cond: ControlCond,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
    },
    LoadField {
        field: FieldId,
        value: ConstValue,
    },
    SetGlobal {
        global: GlobalId,
        expr: ControlExpr,
    },
    While {
        cond: ControlCond,
        body: Vec<Stmt>,
    },
}

/// A complete recorded program: the serializable bundle handed to the
/// compiler (and to `tessel-run`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub decls: Vec<Decl>,
    pub body: Vec<Stmt>,
}

/// An If or While whose body is still being recorded.
#[derive(Debug, Clone)]
enum OpenBlock {
    If {
        cond: ControlCond,
        /// Present once ELSE has sealed the then-scope
        then_block: Option<Vec<Stmt>>,
    },
    While { cond: ControlCond },
}

/// Records declarations and statements into a [`Program`].
#[derive(Debug)]
pub struct Recorder {
    decls: Vec<Decl>,
    /// Statement lists, one per open scope; the bottom entry is the
    /// program body
    scopes: Vec<Vec<Stmt>>,
    /// Open If/While wrappers, innermost last
    blocks: Vec<OpenBlock>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            decls: Vec::new(),
            scopes: vec![Vec::new()],
            blocks: Vec::new(),
        }
    }

    pub fn declare(&mut self, d: Decl) {
        self.decls.push(d);
    }

    /// Append a statement to the innermost open scope.
    pub fn push(&mut self, s: Stmt) {
        self.scopes
            .last_mut()
            .expect("recorder always has a scope")
            .push(s);
    }

    pub fn begin_if(&mut self, cond: ControlCond) {
        self.blocks.push(OpenBlock::If {
            cond,
            then_block: None,
        });
        self.scopes.push(Vec::new());
    }

    pub fn begin_else(&mut self) -> CompileResult<()> {
        let scope = match self.blocks.last_mut() {
            Some(OpenBlock::If { then_block, .. }) if then_block.is_none() => self
                .scopes
                .pop()
                .expect("open if always has a scope"),
            _ => {
                return Err(CompileError::new(
                    ErrorKind::MalformedProgram,
                    Span::none(),
                    "ELSE without matching IF",
                ));
            }
        };
        if let Some(OpenBlock::If { then_block, .. }) = self.blocks.last_mut() {
            *then_block = Some(scope);
        }
        self.scopes.push(Vec::new());
        Ok(())
    }

    pub fn begin_while(&mut self, cond: ControlCond) {
        self.blocks.push(OpenBlock::While { cond });
        self.scopes.push(Vec::new());
    }

    /// Close the innermost wrapper: install the current scope as its
    /// remaining block and append the wrapper one scope down.
    pub fn end(&mut self) -> CompileResult<()> {
        let Some(block) = self.blocks.pop() else {
            return Err(CompileError::new(
                ErrorKind::MalformedProgram,
                Span::none(),
                "END without matching IF or WHILE",
            ));
        };
        let scope = self.scopes.pop().expect("open block always has a scope");
        let stmt = match block {
            OpenBlock::If {
                cond,
                then_block: None,
            } => Stmt::If {
                cond,
                then_block: scope,
                else_block: None,
            },
            OpenBlock::If {
                cond,
                then_block: Some(then_block),
            } => Stmt::If {
                cond,
                then_block,
                else_block: Some(scope),
            },
            OpenBlock::While { cond } => Stmt::While { cond, body: scope },
        };
        self.push(stmt);
        Ok(())
    }

    /// Seal the recording. Unclosed wrappers are fatal.
    pub fn finish(mut self) -> CompileResult<Program> {
        if !self.blocks.is_empty() {
            return Err(CompileError::new(
                ErrorKind::MalformedProgram,
                Span::none(),
                format!("{} unclosed IF/WHILE block(s)", self.blocks.len()),
            ));
        }
        let body = self.scopes.pop().expect("recorder always has a scope");
        debug_assert!(self.scopes.is_empty());
        Ok(Program {
            decls: self.decls,
            body,
        })
    }

    /// Open-wrapper count, observable for the recorder-law tests.
    pub fn open_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// Parse a rectangles constant: a list of rects, each a list of `[lo, hi]`
/// axis extents.
pub fn rects_from_const(v: &ConstValue) -> CompileResult<Vec<tessel_ir::driver::Rect>> {
    let bad = || {
        CompileError::new(
            ErrorKind::MalformedProgram,
            Span::none(),
            "rectangles must be a list of [lo, hi] pair lists",
        )
    };
    let rects = v.as_list().ok_or_else(bad)?;
    rects
        .iter()
        .map(|r| {
            let axes = r.as_list().ok_or_else(bad)?;
            let extents = axes
                .iter()
                .map(|pair| {
                    let pair = pair.as_list().ok_or_else(bad)?;
                    if pair.len() != 2 {
                        return Err(bad());
                    }
                    let lo = pair[0].as_u64().ok_or_else(bad)?;
                    let hi = pair[1].as_u64().ok_or_else(bad)?;
                    Ok((lo, hi))
                })
                .collect::<CompileResult<Vec<_>>>()?;
            Ok(tessel_ir::driver::Rect { extents })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_ir::driver::{CmpOp, ControlBinOp};

    fn lit(b: bool) -> ControlCond {
        ControlCond::Literal(b)
    }

    fn launch(n: &str) -> Stmt {
        Stmt::ForEach {
            function: n.into(),
            relation: "r".into(),
            subset: None,
        }
    }

    #[test]
    fn test_if_else_end_records_two_way_branch() {
        let mut rec = Recorder::new();
        rec.begin_if(lit(true));
        rec.push(launch("a"));
        rec.begin_else().unwrap();
        rec.push(launch("b"));
        rec.end().unwrap();
        assert_eq!(rec.open_blocks(), 0);

        let program = rec.finish().unwrap();
        assert_eq!(program.body.len(), 1);
        match &program.body[0] {
            Stmt::If {
                then_block,
                else_block,
                ..
            } => {
                assert_eq!(then_block.len(), 1);
                assert_eq!(else_block.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_unbalanced_end_is_malformed() {
        let mut rec = Recorder::new();
        let err = rec.end().unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedProgram);
    }

    #[test]
    fn test_else_without_if_is_malformed() {
        let mut rec = Recorder::new();
        let err = rec.begin_else().unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedProgram);

        let mut rec = Recorder::new();
        rec.begin_while(lit(true));
        let err = rec.begin_else().unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedProgram);
    }

    #[test]
    fn test_double_else_is_malformed() {
        let mut rec = Recorder::new();
        rec.begin_if(lit(true));
        rec.begin_else().unwrap();
        let err = rec.begin_else().unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedProgram);
    }

    #[test]
    fn test_unclosed_block_fails_finish() {
        let mut rec = Recorder::new();
        rec.begin_while(lit(true));
        let err = rec.finish().unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedProgram);
    }

    #[test]
    fn test_nested_wrappers_install_in_order() {
        let mut rec = Recorder::new();
        rec.begin_while(ControlCond::compare(
            CmpOp::Lt,
            ControlExpr::GetGlobal("g".into()),
            ControlExpr::Const(ConstValue::Number(3.0)),
        ));
        rec.begin_if(lit(false));
        rec.push(launch("inner"));
        rec.end().unwrap();
        rec.push(Stmt::SetGlobal {
            global: "g".into(),
            expr: ControlExpr::binary(
                ControlBinOp::Add,
                ControlExpr::GetGlobal("g".into()),
                ControlExpr::Const(ConstValue::Number(1.0)),
            ),
        });
        rec.end().unwrap();

        let program = rec.finish().unwrap();
        match &program.body[0] {
            Stmt::While { body, .. } => {
                assert_eq!(body.len(), 2);
                assert!(matches!(body[0], Stmt::If { .. }));
                assert!(matches!(body[1], Stmt::SetGlobal { .. }));
            }
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn test_rects_from_const() {
        let v = ConstValue::List(vec![ConstValue::List(vec![
            ConstValue::List(vec![ConstValue::Number(0.0), ConstValue::Number(3.0)]),
            ConstValue::List(vec![ConstValue::Number(1.0), ConstValue::Number(2.0)]),
        ])]);
        let rects = rects_from_const(&v).unwrap();
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].extents, vec![(0, 3), (1, 2)]);

        let bad = ConstValue::Number(1.0);
        assert!(rects_from_const(&bad).is_err());
    }
}
