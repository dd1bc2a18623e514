//! Structured grids
//!
//! A grid declaration creates a relation family — cells, vertices, dual
//! cells — wired together with link macros, plus the automatic boundary
//! and interior subsets of the requested depth. Addressing is row-major
//! with x fastest everywhere; `cells` has `Π size_i` rows while `vertices`
//! and `dual_cells` have `Π (size_i + 1)`.

use tracing::debug;

use tessel_ir::driver::Rect;
use tessel_ir::{linear_to_coords, RelationId, SubsetId};

use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::relation::{Catalog, FieldMacro, GridInfo, GridRole, SubsetData};
use crate::span::Span;

/// Relations and automatic subsets of one grid declaration.
#[derive(Debug, Clone)]
pub struct GridHandles {
    pub cells: RelationId,
    pub vertices: RelationId,
    pub dual_cells: RelationId,
    pub boundary: Option<SubsetId>,
    pub interior: Option<SubsetId>,
}

/// Declare a grid family.
///
/// `extents` gives 1–3 cell counts per axis; `n_bd` is the boundary depth
/// used for the automatic subsets (0 skips them).
pub fn create_grid(
    cat: &mut Catalog,
    name: &str,
    extents: &[u64],
    n_bd: u64,
) -> CompileResult<GridHandles> {
    if extents.is_empty() || extents.len() > 3 || extents.iter().any(|d| *d == 0) {
        return Err(CompileError::new(
            ErrorKind::MalformedProgram,
            Span::none(),
            format!("grid '{}' needs 1-3 non-zero extents", name),
        ));
    }

    let cells_id = RelationId(format!("{}.cells", name));
    let verts_id = RelationId(format!("{}.vertices", name));
    let duals_id = RelationId(format!("{}.dual_cells", name));

    let dual_extents: Vec<u64> = extents.iter().map(|d| d + 1).collect();

    let info = |role| GridInfo {
        role,
        n_bd,
        cells: cells_id.clone(),
        vertices: verts_id.clone(),
        dual_cells: duals_id.clone(),
    };

    cat.add_relation(&cells_id.0, extents.to_vec(), false, Some(info(GridRole::Cells)))?;
    cat.add_relation(
        &verts_id.0,
        dual_extents.clone(),
        false,
        Some(info(GridRole::Vertices)),
    )?;
    cat.add_relation(
        &duals_id.0,
        dual_extents,
        false,
        Some(info(GridRole::DualCells)),
    )?;

    // Link macros, agreeing with the row-major layout: a cell's vertex is
    // its origin corner; a vertex's cell is the clamped same-coordinate
    // cell; vertices and dual cells coincide coordinate-wise.
    cat.add_macro(&cells_id, "vertex", FieldMacro::Link { target: verts_id.clone() })?;
    cat.add_macro(&verts_id, "cell", FieldMacro::Link { target: cells_id.clone() })?;
    cat.add_macro(&verts_id, "dual_cell", FieldMacro::Link { target: duals_id.clone() })?;
    cat.add_macro(&duals_id, "vertex", FieldMacro::Link { target: verts_id.clone() })?;

    for rel in [&cells_id, &verts_id, &duals_id] {
        cat.add_macro(rel, "center", FieldMacro::Center)?;
        cat.add_macro(rel, "in_boundary", FieldMacro::InBoundary)?;
        cat.add_macro(rel, "in_interior", FieldMacro::InInterior)?;
        for (axis, axis_name) in ["x", "y", "z"].iter().enumerate().take(extents.len()) {
            cat.add_macro(
                rel,
                &format!("{}neg_depth", axis_name),
                FieldMacro::BoundaryDepth {
                    axis: axis as u8,
                    positive: false,
                },
            )?;
            cat.add_macro(
                rel,
                &format!("{}pos_depth", axis_name),
                FieldMacro::BoundaryDepth {
                    axis: axis as u8,
                    positive: true,
                },
            )?;
        }
    }

    let (boundary, interior) = if n_bd > 0 {
        let b = build_boundary_subset(cat, &cells_id, extents, n_bd)?;
        let i = build_interior_subset(cat, &cells_id, extents, n_bd)?;
        (Some(b), Some(i))
    } else {
        (None, None)
    };

    debug!(grid = name, ?extents, n_bd, "grid family declared");

    Ok(GridHandles {
        cells: cells_id,
        vertices: verts_id,
        dual_cells: duals_id,
        boundary,
        interior,
    })
}

/// Whether a row sits within `n_bd` layers of any face.
pub fn in_boundary(id: u64, extents: &[u64], n_bd: u64) -> bool {
    let coords = linear_to_coords(id, extents);
    coords
        .iter()
        .zip(extents)
        .any(|(c, d)| *c < n_bd || *c + n_bd >= *d)
}

fn build_boundary_subset(
    cat: &mut Catalog,
    cells: &RelationId,
    extents: &[u64],
    n_bd: u64,
) -> CompileResult<SubsetId> {
    let size: u64 = extents.iter().product();
    let mask: Vec<bool> = (0..size).map(|id| in_boundary(id, extents, n_bd)).collect();

    // Union of one slab per face; slabs overlap at corners, which is fine
    // for a union. Only describable when every axis is deeper than n_bd.
    let rects = if extents.iter().all(|d| *d > n_bd) {
        let mut rects = Vec::new();
        for axis in 0..extents.len() {
            for positive in [false, true] {
                let mut ext: Vec<(u64, u64)> =
                    extents.iter().map(|d| (0, d - 1)).collect();
                ext[axis] = if positive {
                    (extents[axis] - n_bd, extents[axis] - 1)
                } else {
                    (0, n_bd - 1)
                };
                rects.push(Rect { extents: ext });
            }
        }
        Some(rects)
    } else {
        None
    };

    cat.add_subset(cells, "boundary", SubsetData::Mask(mask), rects)
}

fn build_interior_subset(
    cat: &mut Catalog,
    cells: &RelationId,
    extents: &[u64],
    n_bd: u64,
) -> CompileResult<SubsetId> {
    let size: u64 = extents.iter().product();
    let mask: Vec<bool> = (0..size)
        .map(|id| !in_boundary(id, extents, n_bd))
        .collect();

    let rects = if extents.iter().all(|d| *d > 2 * n_bd) {
        Some(vec![Rect {
            extents: extents
                .iter()
                .map(|d| (n_bd, d - 1 - n_bd))
                .collect(),
        }])
    } else {
        None
    };

    cat.add_subset(cells, "interior", SubsetData::Mask(mask), rects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_family_sizes() {
        let mut cat = Catalog::new();
        let g = create_grid(&mut cat, "g", &[4, 4], 1).unwrap();
        assert_eq!(cat.relation(&g.cells).unwrap().size(), 16);
        assert_eq!(cat.relation(&g.vertices).unwrap().size(), 25);
        assert_eq!(cat.relation(&g.dual_cells).unwrap().size(), 25);
    }

    #[test]
    fn test_boundary_interior_counts_4x4_depth1() {
        let mut cat = Catalog::new();
        let g = create_grid(&mut cat, "g", &[4, 4], 1).unwrap();
        let boundary = cat.subset(&g.boundary.unwrap()).unwrap();
        let interior = cat.subset(&g.interior.unwrap()).unwrap();
        assert_eq!(boundary.data.member_count(), 12);
        assert_eq!(interior.data.member_count(), 4);
        // id 5 is cell (1,1): interior; id 0 is cell (0,0): boundary
        assert!(!boundary.data.contains(5));
        assert!(boundary.data.contains(0));
    }

    #[test]
    fn test_boundary_rectangles_cover_mask() {
        let mut cat = Catalog::new();
        let g = create_grid(&mut cat, "g", &[4, 4], 1).unwrap();
        let boundary = cat.subset(&g.boundary.unwrap()).unwrap();
        let rects = boundary.rectangles.as_ref().unwrap();
        assert_eq!(rects.len(), 4);
        // every masked row lies in at least one rectangle
        for id in 0..16u64 {
            let coords = linear_to_coords(id, &[4, 4]);
            let in_union = rects.iter().any(|r| {
                r.extents
                    .iter()
                    .zip(&coords)
                    .all(|((lo, hi), c)| lo <= c && c <= hi)
            });
            assert_eq!(in_union, boundary.data.contains(id), "row {}", id);
        }

        let interior = cat.subset(&g.interior.unwrap()).unwrap();
        let rects = interior.rectangles.as_ref().unwrap();
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].extents, vec![(1, 2), (1, 2)]);
    }

    #[test]
    fn test_macros_installed() {
        let mut cat = Catalog::new();
        let g = create_grid(&mut cat, "g", &[3, 3, 3], 1).unwrap();
        assert!(cat.macro_for(&g.cells, "vertex").is_some());
        assert!(cat.macro_for(&g.vertices, "cell").is_some());
        assert!(cat.macro_for(&g.vertices, "dual_cell").is_some());
        assert!(cat.macro_for(&g.dual_cells, "vertex").is_some());
        assert!(cat.macro_for(&g.cells, "center").is_some());
        assert!(cat.macro_for(&g.cells, "zpos_depth").is_some());
        assert!(cat.macro_for(&g.cells, "in_interior").is_some());
    }

    #[test]
    fn test_1d_grid() {
        let mut cat = Catalog::new();
        let g = create_grid(&mut cat, "line", &[8], 2).unwrap();
        let boundary = cat.subset(&g.boundary.unwrap()).unwrap();
        assert_eq!(boundary.data.member_count(), 4);
        assert!(cat.macro_for(&g.cells, "yneg_depth").is_none());
    }
}
