//! Simple-path append/read for mappable leaves, plus the cardinality
//! read path.
//!
//! A simple leaf copies its value bytes straight into the principal
//! column. When the negotiated column width differs from the in-memory
//! width (64-bit reals stored as 32-bit, 64-bit integers read back from
//! 32-bit archives), the copy goes through an explicit narrowing or
//! widening conversion instead.

use eyre::{bail, Result};

use crate::fields::{FieldId, FieldKind, FieldTree, PrimitiveKind};
use crate::io::{ColumnType, ElementIndex};

pub(crate) fn append_simple(tree: &FieldTree, id: FieldId, from: *const u8) -> Result<usize> {
    let col = tree.col(id, 0);
    let size = tree.value_size(id);
    let packed = col.column_type().packed_size();
    if packed == size {
        let bytes = unsafe { std::slice::from_raw_parts(from, size) };
        tree.col_append(id, 0, bytes)?;
        return Ok(size);
    }
    match tree.kind(id) {
        FieldKind::Primitive(PrimitiveKind::F64) if packed == 4 => {
            let narrowed = unsafe { (from as *const f64).read() } as f32;
            tree.col_append(id, 0, &narrowed.to_le_bytes())?;
            Ok(4)
        }
        _ => bail!(
            "field {}: cannot write a {}-byte value through a {} column",
            tree.qualified_name(id),
            size,
            col.column_type().name()
        ),
    }
}

pub(crate) fn read_simple(
    tree: &FieldTree,
    id: FieldId,
    at: ElementIndex,
    to: *mut u8,
) -> Result<()> {
    let col = tree.col(id, 0);
    let size = tree.value_size(id);
    let packed = col.column_type().packed_size();
    if packed == size {
        let buf = unsafe { std::slice::from_raw_parts_mut(to, size) };
        tree.col_read(id, 0, at, buf)?;
        return Ok(());
    }

    let mut element = [0u8; 8];
    tree.col_read(id, 0, at, &mut element[..packed])?;
    match (tree.kind(id), col.column_type()) {
        (FieldKind::Primitive(PrimitiveKind::F64), _) if packed == 4 => {
            let widened = f32::from_le_bytes(element[..4].try_into().unwrap()) as f64;
            unsafe { (to as *mut f64).write(widened) };
            Ok(())
        }
        (
            FieldKind::Primitive(PrimitiveKind::I64),
            ColumnType::Int32 | ColumnType::SplitInt32,
        ) => {
            let widened = i32::from_le_bytes(element[..4].try_into().unwrap()) as i64;
            unsafe { (to as *mut i64).write(widened) };
            Ok(())
        }
        (
            FieldKind::Primitive(PrimitiveKind::I64),
            ColumnType::UInt32 | ColumnType::SplitUInt32,
        ) => {
            let widened = u32::from_le_bytes(element[..4].try_into().unwrap()) as i64;
            unsafe { (to as *mut i64).write(widened) };
            Ok(())
        }
        _ => bail!(
            "field {}: cannot widen a {} column element into a {}-byte value",
            tree.qualified_name(id),
            col.column_type().name(),
            size
        ),
    }
}

/// Cardinality fields decode the collection size directly from the index
/// column, without touching the item data.
pub(crate) fn read_cardinality(
    tree: &FieldTree,
    id: FieldId,
    at: ElementIndex,
    to: *mut u8,
) -> Result<()> {
    let (_, count) = tree.col_collection_info(id, 0, at)?;
    match tree.kind(id) {
        FieldKind::Cardinality { wide: true } => unsafe { (to as *mut u64).write(count) },
        FieldKind::Cardinality { wide: false } => unsafe {
            (to as *mut u32).write(count as u32)
        },
        _ => unreachable!("read_cardinality on a non-cardinality field"),
    }
    Ok(())
}
