//! Relations, fields, subsets, and globals
//!
//! The catalog is the compiler's registry of everything the host has
//! declared. Identities are immutable once minted; iteration order is
//! declaration order everywhere.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use tessel_ir::driver::Rect;
use tessel_ir::{ConstValue, FieldId, FunctionId, GlobalId, RelationId, SubsetId, Type};

use crate::ast::{raw, FunctionDef};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::span::Span;

/// Name of the liveness column on relations that support insert/delete.
pub const LIVE_MASK_FIELD: &str = "_is_live_mask";

/// Position of a grid relation within its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridRole {
    Cells,
    Vertices,
    DualCells,
}

/// Grid topology attached to a relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridInfo {
    pub role: GridRole,
    /// Boundary depth the automatic subsets were built with
    pub n_bd: u64,
    pub cells: RelationId,
    pub vertices: RelationId,
    pub dual_cells: RelationId,
}

/// An entity set with typed columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub name: String,
    /// Grid extents; flat relations carry a single extent
    pub dims: Vec<u64>,
    pub fields: Vec<FieldId>,
    pub subsets: Vec<SubsetId>,
    /// Whether the relation supports insert/delete (and therefore carries
    /// the liveness column)
    pub has_live_mask: bool,
    pub grid: Option<GridInfo>,
}

impl Relation {
    /// Logical row count.
    pub fn size(&self) -> u64 {
        self.dims.iter().product()
    }

    pub fn is_grid(&self) -> bool {
        self.grid.is_some()
    }
}

/// A typed column of a relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub relation: RelationId,
    pub name: String,
    pub ty: Type,
}

/// Materialized subset membership: exactly one of mask or index list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubsetData {
    Mask(Vec<bool>),
    /// Sorted member rows
    Index(Vec<u64>),
}

impl SubsetData {
    pub fn member_count(&self) -> u64 {
        match self {
            SubsetData::Mask(mask) => mask.iter().filter(|b| **b).count() as u64,
            SubsetData::Index(rows) => rows.len() as u64,
        }
    }

    pub fn contains(&self, row: u64) -> bool {
        match self {
            SubsetData::Mask(mask) => mask.get(row as usize).copied().unwrap_or(false),
            SubsetData::Index(rows) => rows.binary_search(&row).is_ok(),
        }
    }
}

/// A filtered view of a relation's keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subset {
    pub id: SubsetId,
    pub relation: RelationId,
    pub name: String,
    pub data: SubsetData,
    /// Union of axis-aligned rectangles, when the subset was described
    /// that way on a grid
    pub rectangles: Option<Vec<Rect>>,
}

/// A process-wide typed cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub id: GlobalId,
    pub name: String,
    pub ty: Type,
    pub init: ConstValue,
}

/// A compile-time rewrite installed on a relation under a member name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldMacro {
    /// Host-supplied template; `param` stands for the key the macro is
    /// applied to
    Template { param: String, body: raw::Expr },
    /// Grid link: same coordinates reinterpreted in the target relation
    Link { target: RelationId },
    /// Coordinates of the entity's center, as an f64 vector
    Center,
    /// Layers into the boundary along one axis direction (0 outside it)
    BoundaryDepth { axis: u8, positive: bool },
    InBoundary,
    InInterior,
}

/// Registry of everything declared so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    relations: IndexMap<RelationId, Relation>,
    fields: IndexMap<FieldId, Field>,
    subsets: IndexMap<SubsetId, Subset>,
    globals: IndexMap<GlobalId, Global>,
    functions: IndexMap<FunctionId, FunctionDef>,
    /// Macros keyed by (relation, member name)
    macros: IndexMap<(RelationId, String), FieldMacro>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn duplicate(name: &str) -> CompileError {
        CompileError::new(
            ErrorKind::MalformedProgram,
            Span::none(),
            format!("duplicate declaration of '{}'", name),
        )
    }

    /// Register a relation. Elastic relations get the liveness column.
    pub fn add_relation(
        &mut self,
        name: &str,
        dims: Vec<u64>,
        elastic: bool,
        grid: Option<GridInfo>,
    ) -> CompileResult<RelationId> {
        let id = RelationId::from(name);
        if self.relations.contains_key(&id) {
            return Err(Self::duplicate(name));
        }
        self.relations.insert(
            id.clone(),
            Relation {
                id: id.clone(),
                name: name.to_string(),
                dims,
                fields: Vec::new(),
                subsets: Vec::new(),
                has_live_mask: elastic,
                grid,
            },
        );
        if elastic {
            self.add_field(&id, LIVE_MASK_FIELD, Type::BOOL)?;
        }
        Ok(id)
    }

    pub fn add_field(
        &mut self,
        rel: &RelationId,
        name: &str,
        ty: Type,
    ) -> CompileResult<FieldId> {
        let id = FieldId(format!("{}.{}", rel, name));
        if self.fields.contains_key(&id) {
            return Err(Self::duplicate(&id.0));
        }
        let relation = self.relation_mut(rel)?;
        relation.fields.push(id.clone());
        self.fields.insert(
            id.clone(),
            Field {
                id: id.clone(),
                relation: rel.clone(),
                name: name.to_string(),
                ty,
            },
        );
        Ok(id)
    }

    pub fn add_subset(
        &mut self,
        rel: &RelationId,
        name: &str,
        data: SubsetData,
        rectangles: Option<Vec<Rect>>,
    ) -> CompileResult<SubsetId> {
        let id = SubsetId(format!("{}.{}", rel, name));
        if self.subsets.contains_key(&id) {
            return Err(Self::duplicate(&id.0));
        }
        let relation = self.relation_mut(rel)?;
        relation.subsets.push(id.clone());
        self.subsets.insert(
            id.clone(),
            Subset {
                id: id.clone(),
                relation: rel.clone(),
                name: name.to_string(),
                data,
                rectangles,
            },
        );
        Ok(id)
    }

    pub fn add_global(
        &mut self,
        name: &str,
        ty: Type,
        init: ConstValue,
    ) -> CompileResult<GlobalId> {
        let id = GlobalId::from(name);
        if self.globals.contains_key(&id) {
            return Err(Self::duplicate(name));
        }
        if !init.conforms_to(&ty) {
            return Err(CompileError::invalid_types(Span::none())
                .with_note(format!("initializer {} does not fit {}", init, ty)));
        }
        self.globals.insert(
            id.clone(),
            Global {
                id: id.clone(),
                name: name.to_string(),
                ty,
                init,
            },
        );
        Ok(id)
    }

    pub fn add_function(&mut self, def: FunctionDef) -> CompileResult<FunctionId> {
        let id = def.id().clone();
        if self.functions.contains_key(&id) {
            return Err(Self::duplicate(&id.0));
        }
        self.functions.insert(id.clone(), def);
        Ok(id)
    }

    pub fn add_macro(
        &mut self,
        rel: &RelationId,
        name: &str,
        mac: FieldMacro,
    ) -> CompileResult<()> {
        let key = (rel.clone(), name.to_string());
        if self.macros.contains_key(&key) {
            return Err(Self::duplicate(&format!("{}.{}", rel, name)));
        }
        self.macros.insert(key, mac);
        Ok(())
    }

    // ---- lookups ----

    pub fn relation(&self, id: &RelationId) -> CompileResult<&Relation> {
        self.relations.get(id).ok_or_else(|| {
            CompileError::new(
                ErrorKind::Internal,
                Span::none(),
                format!("unknown relation '{}'", id),
            )
        })
    }

    fn relation_mut(&mut self, id: &RelationId) -> CompileResult<&mut Relation> {
        self.relations.get_mut(id).ok_or_else(|| {
            CompileError::new(
                ErrorKind::Internal,
                Span::none(),
                format!("unknown relation '{}'", id),
            )
        })
    }

    pub fn field(&self, id: &FieldId) -> CompileResult<&Field> {
        self.fields.get(id).ok_or_else(|| {
            CompileError::new(
                ErrorKind::Internal,
                Span::none(),
                format!("unknown field '{}'", id),
            )
        })
    }

    /// Field of a relation by bare member name.
    pub fn field_of(&self, rel: &RelationId, name: &str) -> Option<&Field> {
        self.fields.get(&FieldId(format!("{}.{}", rel, name)))
    }

    pub fn subset(&self, id: &SubsetId) -> CompileResult<&Subset> {
        self.subsets.get(id).ok_or_else(|| {
            CompileError::new(
                ErrorKind::Internal,
                Span::none(),
                format!("unknown subset '{}'", id),
            )
        })
    }

    pub fn global(&self, id: &GlobalId) -> CompileResult<&Global> {
        self.globals.get(id).ok_or_else(|| {
            CompileError::new(
                ErrorKind::Internal,
                Span::none(),
                format!("unknown global '{}'", id),
            )
        })
    }

    pub fn function(&self, id: &FunctionId) -> CompileResult<&FunctionDef> {
        self.functions.get(id).ok_or_else(|| {
            CompileError::new(
                ErrorKind::Internal,
                Span::none(),
                format!("unknown function '{}'", id),
            )
        })
    }

    pub fn macro_for(&self, rel: &RelationId, name: &str) -> Option<&FieldMacro> {
        self.macros.get(&(rel.clone(), name.to_string()))
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn globals(&self) -> impl Iterator<Item = &Global> {
        self.globals.values()
    }

    pub fn fields_of(&self, rel: &RelationId) -> Vec<&Field> {
        match self.relations.get(rel) {
            Some(r) => r.fields.iter().filter_map(|f| self.fields.get(f)).collect(),
            None => Vec::new(),
        }
    }
}
