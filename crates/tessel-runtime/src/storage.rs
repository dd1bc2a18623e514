//! Region storage
//!
//! Each relation owns one contiguous byte region; field columns alias
//! disjoint sub-ranges of it, addressed through layout descriptors. All
//! reads and writes go through a descriptor, so the launch-signature
//! layouts handed to tasks are the same addressing the runtime itself
//! uses. Elastic relations reserve tail rows for inserts and defragment
//! when live occupancy falls below one half.

use indexmap::IndexMap;
use tracing::{debug, trace};

use tessel_ir::{ConstValue, DataLayout, ElemType, FieldId, Primitive, RelationId, Type};

use crate::error::{Error, Result};
use crate::types::Value;

/// Suffix of the liveness column's field id.
const LIVE_MASK_SUFFIX: &str = "._is_live_mask";

/// One relation's storage.
#[derive(Debug)]
pub struct Region {
    relation: RelationId,
    pub dims: Vec<u64>,
    /// Rows physically allocated
    capacity: u64,
    /// Rows in use, live or dead
    concrete_rows: u64,
    /// Live rows
    logical_rows: u64,
    bytes: Vec<u8>,
    columns: IndexMap<FieldId, (Type, DataLayout)>,
    live_mask: Option<FieldId>,
    pub fragmented: bool,
}

impl Region {
    pub fn new(relation: RelationId, dims: Vec<u64>, fields: Vec<(FieldId, Type)>) -> Region {
        let rows: u64 = dims.iter().product();
        let live_mask = fields
            .iter()
            .find(|(id, _)| id.0.ends_with(LIVE_MASK_SUFFIX))
            .map(|(id, _)| id.clone());

        let mut region = Region {
            relation,
            dims,
            capacity: rows,
            concrete_rows: rows,
            logical_rows: rows,
            bytes: Vec::new(),
            columns: fields.into_iter().map(|(id, ty)| {
                let elem = ElemType::of(&ty);
                (id, (ty, DataLayout::compact(elem, 0, 0)))
            }).collect(),
            live_mask,
            fragmented: false,
        };
        region.layout_columns(rows);
        if let Some(mask) = region.live_mask.clone() {
            for row in 0..rows {
                region
                    .write_field(&mask, row, &Value::Bool(true))
                    .expect("mask column exists");
            }
        }
        region
    }

    /// Recompute column offsets for a new capacity and allocate zeroed
    /// backing bytes.
    fn layout_columns(&mut self, capacity: u64) {
        let mut offset = 0u64;
        for (_, (ty, layout)) in self.columns.iter_mut() {
            let elem = ElemType::of(ty);
            *layout = DataLayout::compact(elem, capacity, offset);
            offset += layout.physical_size();
        }
        self.capacity = capacity;
        self.bytes = vec![0u8; offset as usize];
    }

    pub fn relation(&self) -> &RelationId {
        &self.relation
    }

    pub fn concrete_rows(&self) -> u64 {
        self.concrete_rows
    }

    pub fn logical_rows(&self) -> u64 {
        self.logical_rows
    }

    pub fn has_live_mask(&self) -> bool {
        self.live_mask.is_some()
    }

    fn column(&self, field: &FieldId) -> Result<&(Type, DataLayout)> {
        self.columns
            .get(field)
            .ok_or_else(|| Error::FieldNotFound(field.clone()))
    }

    /// Launch-facing layout: addressable rows limited to the rows in use.
    pub fn launch_layout(&self, field: &FieldId) -> Result<DataLayout> {
        let (_, layout) = self.column(field)?;
        let mut layout = layout.clone();
        layout.logical_size = self.concrete_rows;
        Ok(layout)
    }

    pub fn field_type(&self, field: &FieldId) -> Result<&Type> {
        Ok(&self.column(field)?.0)
    }

    /// Read one row through a layout descriptor.
    pub fn read_at(&self, layout: &DataLayout, row: u64, ty: &Type) -> Result<Value> {
        if row >= layout.logical_size {
            return Err(Error::RowOutOfBounds {
                relation: self.relation.clone(),
                row,
            });
        }
        Ok(self.decode(layout, row, ty))
    }

    fn decode(&self, layout: &DataLayout, row: u64, ty: &Type) -> Value {
        match ty {
            Type::Primitive(p) => decode_prim(&self.bytes, layout.lane_offset(row, 0), *p),
            Type::Key(_) => {
                match decode_prim(&self.bytes, layout.lane_offset(row, 0), Primitive::U64) {
                    Value::Uint(k) => Value::Key(k),
                    other => other,
                }
            }
            Type::Vector { elem, len } => Value::Vector(
                (0..*len as u32)
                    .map(|lane| decode_prim(&self.bytes, layout.lane_offset(row, lane), *elem))
                    .collect(),
            ),
            Type::Matrix { elem, rows, cols } => Value::Matrix(
                (0..*rows as u32)
                    .map(|r| {
                        (0..*cols as u32)
                            .map(|c| {
                                let lane = r * (*cols as u32) + c;
                                decode_prim(&self.bytes, layout.lane_offset(row, lane), *elem)
                            })
                            .collect()
                    })
                    .collect(),
            ),
            Type::Record(_) => Value::Vector(Vec::new()),
        }
    }

    /// Write one row through a layout descriptor.
    pub fn write_at(&mut self, layout: &DataLayout, row: u64, value: &Value) -> Result<()> {
        if row >= layout.logical_size {
            return Err(Error::RowOutOfBounds {
                relation: self.relation.clone(),
                row,
            });
        }
        self.encode(layout, row, value);
        Ok(())
    }

    fn encode(&mut self, layout: &DataLayout, row: u64, value: &Value) {
        let base = layout.elem.base;
        match value {
            Value::Vector(items) => {
                for (lane, item) in items.iter().enumerate() {
                    encode_prim(
                        &mut self.bytes,
                        layout.lane_offset(row, lane as u32),
                        base,
                        item,
                    );
                }
            }
            Value::Matrix(rows) => {
                let cols = rows.first().map(|r| r.len()).unwrap_or(0);
                for (r, row_vals) in rows.iter().enumerate() {
                    for (c, item) in row_vals.iter().enumerate() {
                        let lane = (r * cols + c) as u32;
                        encode_prim(&mut self.bytes, layout.lane_offset(row, lane), base, item);
                    }
                }
            }
            scalar => encode_prim(&mut self.bytes, layout.lane_offset(row, 0), base, scalar),
        }
    }

    /// Read a field row directly (driver-side access).
    pub fn read_field(&self, field: &FieldId, row: u64) -> Result<Value> {
        let (ty, layout) = self.column(field)?.clone();
        if row >= self.concrete_rows {
            return Err(Error::RowOutOfBounds {
                relation: self.relation.clone(),
                row,
            });
        }
        Ok(self.decode(&layout, row, &ty))
    }

    /// Write a field row directly; used by the driver and by insert
    /// application, which targets reserved tail rows.
    pub fn write_field(&mut self, field: &FieldId, row: u64, value: &Value) -> Result<()> {
        let (_, layout) = self.column(field)?.clone();
        if row >= self.capacity {
            return Err(Error::RowOutOfBounds {
                relation: self.relation.clone(),
                row,
            });
        }
        self.encode(&layout, row, value);
        Ok(())
    }

    /// Fill a column with one constant across the rows in use.
    pub fn fill(&mut self, field: &FieldId, value: &ConstValue) -> Result<()> {
        let (ty, layout) = self.column(field)?.clone();
        let v = Value::from_const(value, &ty);
        for row in 0..self.concrete_rows {
            self.encode(&layout, row, &v);
        }
        trace!(field = %field, rows = self.concrete_rows, "column filled");
        Ok(())
    }

    /// Ensure capacity for `extra` rows beyond the rows in use,
    /// relocating columns when the region grows.
    pub fn reserve_tail(&mut self, extra: u64) {
        let needed = self.concrete_rows + extra;
        if needed <= self.capacity {
            return;
        }
        debug!(relation = %self.relation, from = self.capacity, to = needed, "region grows");
        let old_bytes = std::mem::take(&mut self.bytes);
        let old_layouts: Vec<(FieldId, DataLayout)> = self
            .columns
            .iter()
            .map(|(id, (_, l))| (id.clone(), l.clone()))
            .collect();
        let rows_in_use = self.concrete_rows;
        self.layout_columns(needed);
        for (id, old_layout) in old_layouts {
            let (_, new_layout) = &self.columns[&id];
            let used = (rows_in_use * old_layout.stride) as usize;
            let src = old_layout.offset as usize;
            let dst = new_layout.offset as usize;
            self.bytes[dst..dst + used].copy_from_slice(&old_bytes[src..src + used]);
        }
    }

    /// Commit `n` inserted tail rows.
    pub fn commit_inserts(&mut self, n: u64) {
        self.concrete_rows += n;
        self.logical_rows += n;
        if n > 0 {
            self.fragmented = true;
        }
    }

    pub fn is_live(&self, row: u64) -> Result<bool> {
        match &self.live_mask {
            Some(mask) => Ok(self.read_field(mask, row)?.as_bool().unwrap_or(false)),
            None => Ok(true),
        }
    }

    /// Mark rows dead and recount live occupancy; defragments below half
    /// occupancy.
    pub fn commit_deletes(&mut self, rows: &[u64]) -> Result<()> {
        let Some(mask) = self.live_mask.clone() else {
            return Ok(());
        };
        let mut removed = 0u64;
        for row in rows {
            if self.is_live(*row)? {
                self.write_field(&mask, *row, &Value::Bool(false))?;
                removed += 1;
            }
        }
        self.logical_rows -= removed;
        if removed > 0 {
            self.fragmented = true;
        }
        if self.logical_rows * 2 < self.concrete_rows {
            self.defragment()?;
        }
        Ok(())
    }

    /// Compact live rows to the front, preserving order.
    fn defragment(&mut self) -> Result<()> {
        let Some(mask) = self.live_mask.clone() else {
            return Ok(());
        };
        debug!(
            relation = %self.relation,
            live = self.logical_rows,
            concrete = self.concrete_rows,
            "defragmenting"
        );
        let live_rows: Vec<u64> = (0..self.concrete_rows)
            .filter(|row| self.is_live(*row).unwrap_or(false))
            .collect();
        let layouts: Vec<(Type, DataLayout)> = self.columns.values().cloned().collect();
        for (ty, layout) in &layouts {
            for (dst, src) in live_rows.iter().enumerate() {
                let v = self.decode(layout, *src, ty);
                self.encode(layout, dst as u64, &v);
            }
        }
        self.concrete_rows = live_rows.len() as u64;
        self.logical_rows = self.concrete_rows;
        for row in 0..self.concrete_rows {
            self.write_field(&mask, row, &Value::Bool(true))?;
        }
        self.fragmented = false;
        Ok(())
    }
}

fn decode_prim(bytes: &[u8], off: u64, p: Primitive) -> Value {
    let off = off as usize;
    match p {
        Primitive::Bool => Value::Bool(bytes[off] != 0),
        Primitive::I8 => Value::Int(bytes[off] as i8 as i64),
        Primitive::I16 => {
            Value::Int(i16::from_le_bytes([bytes[off], bytes[off + 1]]) as i64)
        }
        Primitive::I32 => Value::Int(i32::from_le_bytes(
            bytes[off..off + 4].try_into().expect("4 bytes"),
        ) as i64),
        Primitive::I64 => Value::Int(i64::from_le_bytes(
            bytes[off..off + 8].try_into().expect("8 bytes"),
        )),
        Primitive::U8 => Value::Uint(bytes[off] as u64),
        Primitive::U16 => {
            Value::Uint(u16::from_le_bytes([bytes[off], bytes[off + 1]]) as u64)
        }
        Primitive::U32 => Value::Uint(u32::from_le_bytes(
            bytes[off..off + 4].try_into().expect("4 bytes"),
        ) as u64),
        Primitive::U64 => Value::Uint(u64::from_le_bytes(
            bytes[off..off + 8].try_into().expect("8 bytes"),
        )),
        Primitive::F32 => Value::Float(f32::from_le_bytes(
            bytes[off..off + 4].try_into().expect("4 bytes"),
        ) as f64),
        Primitive::F64 => Value::Float(f64::from_le_bytes(
            bytes[off..off + 8].try_into().expect("8 bytes"),
        )),
    }
}

fn encode_prim(bytes: &mut [u8], off: u64, p: Primitive, v: &Value) {
    let off = off as usize;
    let as_i = || v.as_i64().unwrap_or(0);
    let as_u = || match v {
        Value::Uint(u) => *u,
        Value::Key(k) => *k,
        other => other.as_f64().unwrap_or(0.0) as u64,
    };
    let as_f = || v.as_f64().unwrap_or(0.0);
    match p {
        Primitive::Bool => bytes[off] = v.as_bool().unwrap_or(false) as u8,
        Primitive::I8 => bytes[off] = as_i() as i8 as u8,
        Primitive::I16 => bytes[off..off + 2].copy_from_slice(&(as_i() as i16).to_le_bytes()),
        Primitive::I32 => bytes[off..off + 4].copy_from_slice(&(as_i() as i32).to_le_bytes()),
        Primitive::I64 => bytes[off..off + 8].copy_from_slice(&as_i().to_le_bytes()),
        Primitive::U8 => bytes[off] = as_u() as u8,
        Primitive::U16 => bytes[off..off + 2].copy_from_slice(&(as_u() as u16).to_le_bytes()),
        Primitive::U32 => bytes[off..off + 4].copy_from_slice(&(as_u() as u32).to_le_bytes()),
        Primitive::U64 => bytes[off..off + 8].copy_from_slice(&as_u().to_le_bytes()),
        Primitive::F32 => bytes[off..off + 4].copy_from_slice(&(as_f() as f32).to_le_bytes()),
        Primitive::F64 => bytes[off..off + 8].copy_from_slice(&as_f().to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::new(
            "r".into(),
            vec![4],
            vec![
                ("r.x".into(), Type::Primitive(Primitive::I32)),
                ("r.v".into(), Type::vector(Primitive::F64, 2)),
            ],
        )
    }

    #[test]
    fn test_field_round_trip() {
        let mut r = region();
        r.write_field(&"r.x".into(), 2, &Value::Int(-7)).unwrap();
        assert_eq!(r.read_field(&"r.x".into(), 2).unwrap(), Value::Int(-7));

        let v = Value::Vector(vec![Value::Float(1.5), Value::Float(-2.5)]);
        r.write_field(&"r.v".into(), 3, &v).unwrap();
        assert_eq!(r.read_field(&"r.v".into(), 3).unwrap(), v);
    }

    #[test]
    fn test_fill() {
        let mut r = region();
        r.fill(&"r.x".into(), &ConstValue::Number(9.0)).unwrap();
        for row in 0..4 {
            assert_eq!(r.read_field(&"r.x".into(), row).unwrap(), Value::Int(9));
        }
    }

    #[test]
    fn test_launch_layout_addresses_like_region() {
        let mut r = region();
        r.write_field(&"r.x".into(), 1, &Value::Int(5)).unwrap();
        let layout = r.launch_layout(&"r.x".into()).unwrap();
        assert!(layout.is_compact());
        assert_eq!(layout.logical_size, 4);
        assert_eq!(
            r.read_at(&layout, 1, &Type::Primitive(Primitive::I32)).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn test_reserve_preserves_data() {
        let mut r = region();
        r.write_field(&"r.x".into(), 0, &Value::Int(11)).unwrap();
        let v = Value::Vector(vec![Value::Float(3.0), Value::Float(4.0)]);
        r.write_field(&"r.v".into(), 1, &v).unwrap();

        r.reserve_tail(8);
        assert_eq!(r.read_field(&"r.x".into(), 0).unwrap(), Value::Int(11));
        assert_eq!(r.read_field(&"r.v".into(), 1).unwrap(), v);
    }

    fn elastic_region() -> Region {
        Region::new(
            "p".into(),
            vec![8],
            vec![
                ("p.m".into(), Type::F64),
                ("p._is_live_mask".into(), Type::BOOL),
            ],
        )
    }

    #[test]
    fn test_insert_commit_marks_fragmented() {
        let mut r = elastic_region();
        r.reserve_tail(2);
        r.write_field(&"p.m".into(), 8, &Value::Float(1.0)).unwrap();
        r.write_field(&"p._is_live_mask".into(), 8, &Value::Bool(true))
            .unwrap();
        r.commit_inserts(1);
        assert_eq!(r.concrete_rows(), 9);
        assert_eq!(r.logical_rows(), 9);
        assert!(r.fragmented);
    }

    #[test]
    fn test_delete_triggers_defrag_below_half() {
        let mut r = elastic_region();
        for row in 0..8 {
            r.write_field(&"p.m".into(), row, &Value::Float(row as f64))
                .unwrap();
        }
        // deleting 5 of 8 rows drops occupancy to 3/8 < 1/2
        r.commit_deletes(&[0, 2, 4, 6, 7]).unwrap();
        assert!(!r.fragmented, "defragmentation resets the flag");
        assert_eq!(r.concrete_rows(), 3);
        assert_eq!(r.logical_rows(), 3);
        // survivors keep order: rows 1, 3, 5
        assert_eq!(r.read_field(&"p.m".into(), 0).unwrap(), Value::Float(1.0));
        assert_eq!(r.read_field(&"p.m".into(), 1).unwrap(), Value::Float(3.0));
        assert_eq!(r.read_field(&"p.m".into(), 2).unwrap(), Value::Float(5.0));
    }

    #[test]
    fn test_delete_above_half_keeps_fragmentation() {
        let mut r = elastic_region();
        r.commit_deletes(&[0]).unwrap();
        assert!(r.fragmented);
        assert_eq!(r.concrete_rows(), 8);
        assert_eq!(r.logical_rows(), 7);
        assert!(!r.is_live(0).unwrap());
        assert!(r.is_live(1).unwrap());
    }
}
