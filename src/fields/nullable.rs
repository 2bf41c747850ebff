//! The nullable unique-ownership pointer kind.
//!
//! Two on-disk encodings share this code path:
//!
//! - **dense** (item value < 4 bytes, or forced by a `Bit` representative):
//!   a bit mask column plus the item field's columns. A default item value
//!   is generated once at connect time and appended for null entries to
//!   keep rows aligned.
//! - **sparse**: a monotonically non-decreasing index column; a null
//!   repeats the previous index, a present value increments it and appends
//!   the item.

use eyre::Result;

use crate::fields::{lifecycle, FieldId, FieldKind, FieldTree};
use crate::io::{ClusterIndex, ColumnType, ElementIndex};

fn is_dense(tree: &FieldTree, id: FieldId) -> bool {
    match tree.kind(id) {
        FieldKind::Pointer { dense, .. } => *dense,
        _ => unreachable!("nullable encoding query on a non-nullable field"),
    }
}

/// Chooses the dense encoding for small items while the representative is
/// still the default, and prepares the default item value backing null
/// rows.
pub(crate) fn prepare_sink_columns(tree: &mut FieldTree, id: FieldId) -> Result<()> {
    let item = tree.child(id, 0);
    if tree.has_default_column_representative(id) && tree.value_size(item) < 4 {
        tree.set_column_representative(id, &[ColumnType::Bit])?;
    }
    let dense = tree.column_representative(id).as_slice() == [ColumnType::Bit];
    if dense {
        let default_ptr = lifecycle::make_default_item(tree, item);
        if let FieldKind::Pointer { dense: d, default_item, .. } = tree.kind_mut(id) {
            *d = true;
            *default_item = Some(default_ptr);
        }
    }
    Ok(())
}

pub(crate) fn append(tree: &mut FieldTree, id: FieldId, from: *const u8) -> Result<usize> {
    let item_ptr = unsafe { *(from as *const *mut u8) };
    if item_ptr.is_null() {
        append_null(tree, id)
    } else {
        append_value(tree, id, item_ptr)
    }
}

fn append_null(tree: &mut FieldTree, id: FieldId) -> Result<usize> {
    let item = tree.child(id, 0);
    if is_dense(tree, id) {
        tree.col_append(id, 0, &[0u8])?;
        let default_ptr = match tree.kind(id) {
            FieldKind::Pointer { default_item, .. } => {
                default_item.expect("dense nullable connected without a default item")
            }
            _ => unreachable!(),
        };
        Ok(1 + tree.append_node(item, default_ptr)?)
    } else {
        let written = match tree.kind(id) {
            FieldKind::Pointer { n_written, .. } => *n_written,
            _ => unreachable!(),
        };
        tree.col_append(id, 0, &written.to_le_bytes())?;
        Ok(tree.col(id, 0).column_type().packed_size())
    }
}

fn append_value(tree: &mut FieldTree, id: FieldId, item_ptr: *const u8) -> Result<usize> {
    let item = tree.child(id, 0);
    let nbytes_item = tree.append_node(item, item_ptr)?;
    if is_dense(tree, id) {
        tree.col_append(id, 0, &[1u8])?;
        Ok(1 + nbytes_item)
    } else {
        let written = match tree.kind_mut(id) {
            FieldKind::Pointer { n_written, .. } => {
                *n_written += 1;
                *n_written
            }
            _ => unreachable!(),
        };
        tree.col_append(id, 0, &written.to_le_bytes())?;
        Ok(tree.col(id, 0).column_type().packed_size() + nbytes_item)
    }
}

/// Cluster-relative position of the entry's item, or an invalid index
/// when the entry is null.
pub(crate) fn item_index(
    tree: &FieldTree,
    id: FieldId,
    at: ElementIndex,
) -> Result<ClusterIndex> {
    if is_dense(tree, id) {
        let present = tree.col_read_bit(id, 0, at)?;
        if !present {
            return Ok(ClusterIndex::invalid());
        }
        match at {
            ElementIndex::Global(g) => tree.col_cluster_index_of(id, 0, g),
            ElementIndex::Cluster(ci) => Ok(ci),
        }
    } else {
        let (start, count) = tree.col_collection_info(id, 0, at)?;
        Ok(if count == 0 { ClusterIndex::invalid() } else { start })
    }
}

/// Reconciles in-memory presence against on-disk presence: frees the
/// owned value on present→absent, allocates and constructs on
/// absent→present, and reads through in both present cases.
pub(crate) fn read(tree: &FieldTree, id: FieldId, at: ElementIndex, to: *mut u8) -> Result<()> {
    let slot = unsafe { &mut *(to as *mut *mut u8) };
    let item = tree.child(id, 0);

    let index = item_index(tree, id, at)?;
    let on_disk_present = index.is_valid();
    let in_memory_present = !slot.is_null();

    if in_memory_present && !on_disk_present {
        lifecycle::destroy_at(tree, item, *slot, false);
        *slot = std::ptr::null_mut();
        return Ok(());
    }
    if !on_disk_present {
        return Ok(());
    }
    if !in_memory_present {
        *slot = lifecycle::make_default_item(tree, item);
    }
    tree.read_node(item, ElementIndex::Cluster(index), *slot)
}
