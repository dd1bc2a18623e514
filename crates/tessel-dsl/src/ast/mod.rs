//! Kernel-language ASTs
//!
//! Two trees share this module: the *raw* AST hosts build directly
//! ([`raw`]), and the *typed* AST the checker produces ([`typed`]). The
//! specializer rewrites raw trees in place — resolving free names against
//! the host environment and expanding macros — so resolved node variants
//! live in the raw enum too, and hosts simply never construct them.

pub mod raw;
pub mod typed;

use serde::{Deserialize, Serialize};

use tessel_ir::{FunctionId, Type};

/// Builtins callable from kernel code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    // unary math
    Acos,
    Asin,
    Atan,
    Cbrt,
    Ceil,
    Cos,
    Fabs,
    Floor,
    Log,
    Sin,
    Sqrt,
    Tan,
    // binary math
    Fmod,
    Pow,
    Fmin,
    Fmax,
    Imin,
    Imax,
    // misc
    Rand,
    Dot,
    Assert,
    // key decomposition
    Id,
    Xid,
    Yid,
    Zid,
    // key construction
    Affine,
    UnsafeRow,
}

impl Builtin {
    /// Host-visible name, as bound in the default environment.
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Acos => "acos",
            Builtin::Asin => "asin",
            Builtin::Atan => "atan",
            Builtin::Cbrt => "cbrt",
            Builtin::Ceil => "ceil",
            Builtin::Cos => "cos",
            Builtin::Fabs => "fabs",
            Builtin::Floor => "floor",
            Builtin::Log => "log",
            Builtin::Sin => "sin",
            Builtin::Sqrt => "sqrt",
            Builtin::Tan => "tan",
            Builtin::Fmod => "fmod",
            Builtin::Pow => "pow",
            Builtin::Fmin => "fmin",
            Builtin::Fmax => "fmax",
            Builtin::Imin => "imin",
            Builtin::Imax => "imax",
            Builtin::Rand => "rand",
            Builtin::Dot => "dot",
            Builtin::Assert => "assert",
            Builtin::Id => "id",
            Builtin::Xid => "xid",
            Builtin::Yid => "yid",
            Builtin::Zid => "zid",
            Builtin::Affine => "Affine",
            Builtin::UnsafeRow => "UNSAFE_ROW",
        }
    }

    /// All builtins, for seeding the default environment.
    pub const ALL: [Builtin; 27] = [
        Builtin::Acos,
        Builtin::Asin,
        Builtin::Atan,
        Builtin::Cbrt,
        Builtin::Ceil,
        Builtin::Cos,
        Builtin::Fabs,
        Builtin::Floor,
        Builtin::Log,
        Builtin::Sin,
        Builtin::Sqrt,
        Builtin::Tan,
        Builtin::Fmod,
        Builtin::Pow,
        Builtin::Fmin,
        Builtin::Fmax,
        Builtin::Imin,
        Builtin::Imax,
        Builtin::Rand,
        Builtin::Dot,
        Builtin::Assert,
        Builtin::Id,
        Builtin::Xid,
        Builtin::Yid,
        Builtin::Zid,
        Builtin::Affine,
        Builtin::UnsafeRow,
    ];
}

/// A kernel or helper definition as the host declared it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FunctionDef {
    /// Per-key function launched over a relation. The parameter's key type
    /// is fixed at specialization time, not declaration time.
    Kernel {
        id: FunctionId,
        name: String,
        param: String,
        body: Vec<raw::Stmt>,
    },
    /// Pure callable with typed parameters and an expression body. The
    /// declared return type is optional; when absent it is inferred.
    Helper {
        id: FunctionId,
        name: String,
        params: Vec<(String, Type)>,
        ret: Option<Type>,
        body: raw::Expr,
    },
}

impl FunctionDef {
    pub fn id(&self) -> &FunctionId {
        match self {
            FunctionDef::Kernel { id, .. } | FunctionDef::Helper { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FunctionDef::Kernel { name, .. } | FunctionDef::Helper { name, .. } => name,
        }
    }

    pub fn is_kernel(&self) -> bool {
        matches!(self, FunctionDef::Kernel { .. })
    }
}
