//! Data-layout descriptors
//!
//! A neutral description of one field column's physical storage, passed at
//! task boundaries. The runtime reads and writes columns exclusively
//! through these; lowered kernel bodies never inspect them.

use serde::{Deserialize, Serialize};

use crate::types::{Primitive, Type};

/// Element type of a column: a base primitive replicated over lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElemType {
    /// Base primitive
    pub base: Primitive,
    /// Lanes per element (1 for scalars, N for vectors, R×C for matrices)
    pub vector_size: u32,
}

impl ElemType {
    /// Element type describing a field of the given logical type.
    pub fn of(ty: &Type) -> ElemType {
        match ty {
            Type::Primitive(p) => ElemType {
                base: *p,
                vector_size: 1,
            },
            Type::Vector { elem, len } => ElemType {
                base: *elem,
                vector_size: *len as u32,
            },
            Type::Matrix { elem, rows, cols } => ElemType {
                base: *elem,
                vector_size: (*rows as u32) * (*cols as u32),
            },
            // Keys store as a u64 linear index
            Type::Key(_) => ElemType {
                base: Primitive::U64,
                vector_size: 1,
            },
            Type::Record(_) => panic!("records do not have a column layout"),
        }
    }

    pub fn base_type_name(&self) -> &'static str {
        self.base.name()
    }

    pub fn base_bytes(&self) -> u64 {
        self.base.size_in_bytes()
    }

    /// Bytes per element across all lanes.
    pub fn size_in_bytes(&self) -> u64 {
        self.base_bytes() * self.vector_size as u64
    }
}

/// Physical layout of one field column within its relation's region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLayout {
    /// Element description
    pub elem: ElemType,
    /// Rows addressable through this descriptor
    pub logical_size: u64,
    /// Bytes between consecutive rows
    pub stride: u64,
    /// Byte offset of row 0 within the region
    pub offset: u64,
}

impl DataLayout {
    /// Densely packed layout at the given region offset.
    pub fn compact(elem: ElemType, logical_size: u64, offset: u64) -> DataLayout {
        DataLayout {
            elem,
            logical_size,
            stride: elem.size_in_bytes(),
            offset,
        }
    }

    /// Total bytes spanned: `logical_size × stride`.
    pub fn physical_size(&self) -> u64 {
        self.logical_size * self.stride
    }

    /// Compact ⇔ stride equals the element footprint and offset-within-row
    /// machinery is unused.
    pub fn is_compact(&self) -> bool {
        self.stride == self.elem.size_in_bytes()
    }

    /// Byte offset of one lane of one row within the region.
    pub fn lane_offset(&self, row: u64, lane: u32) -> u64 {
        debug_assert!(row < self.logical_size, "row {} out of bounds", row);
        debug_assert!(lane < self.elem.vector_size, "lane {} out of bounds", lane);
        self.offset + row * self.stride + lane as u64 * self.elem.base_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elem_of_types() {
        let e = ElemType::of(&Type::vector(Primitive::F32, 3));
        assert_eq!(e.base, Primitive::F32);
        assert_eq!(e.vector_size, 3);
        assert_eq!(e.size_in_bytes(), 12);

        let k = ElemType::of(&Type::key("cells"));
        assert_eq!(k.base, Primitive::U64);
        assert_eq!(k.size_in_bytes(), 8);
    }

    #[test]
    fn test_compact_layout_addressing() {
        let elem = ElemType::of(&Type::vector(Primitive::F64, 2));
        let dl = DataLayout::compact(elem, 10, 160);
        assert!(dl.is_compact());
        assert_eq!(dl.physical_size(), 160);
        assert_eq!(dl.lane_offset(0, 0), 160);
        assert_eq!(dl.lane_offset(3, 1), 160 + 3 * 16 + 8);
    }
}
