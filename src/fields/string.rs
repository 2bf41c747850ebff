//! The string kind: an index column of cluster-local character offsets
//! plus a char column carrying the UTF-8 byte stream.

use eyre::Result;

use crate::fields::{FieldId, FieldKind, FieldTree};
use crate::io::ElementIndex;

pub(crate) fn append(tree: &mut FieldTree, id: FieldId, from: *const u8) -> Result<usize> {
    let value = unsafe { &*(from as *const String) };
    let length = value.len() as u64;
    tree.col_append_many(id, 1, value.as_bytes(), length)?;
    let cumulative = match tree.kind_mut(id) {
        FieldKind::String { index } => {
            *index += length;
            *index
        }
        _ => unreachable!("string append on a non-string field"),
    };
    tree.col_append(id, 0, &cumulative.to_le_bytes())?;
    Ok(length as usize + tree.col(id, 0).column_type().packed_size())
}

pub(crate) fn read(tree: &FieldTree, id: FieldId, at: ElementIndex, to: *mut u8) -> Result<()> {
    let (start, n_chars) = tree.col_collection_info(id, 0, at)?;
    let value = unsafe { &mut *(to as *mut String) };
    if n_chars == 0 {
        value.clear();
        return Ok(());
    }
    // The char column carries bytes that were written from a String, so
    // the buffer stays valid UTF-8 once the copy completes.
    let buf = unsafe { value.as_mut_vec() };
    buf.resize(n_chars as usize, 0);
    tree.col_read_bulk(id, 1, start, n_chars, buf.as_mut_slice())?;
    Ok(())
}
