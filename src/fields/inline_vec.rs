//! The inline-buffered small-vector kind.
//!
//! Value layout: `begin` pointer, `i32` size, `i32` capacity, then an
//! inline buffer aligned like the element. `capacity == -1` marks adopted
//! storage that the vector does not own. The padding between the header
//! and the inline slot is computed by the same formula everywhere
//! (construction, destruction, size evaluation), so the inline-state
//! check stays consistent.

use eyre::Result;

use crate::fields::{field_traits, lifecycle, FieldId, FieldKind, FieldTree};
use crate::io::ElementIndex;
use crate::values::raw::{self, SmallVecHeader};
use crate::values::{alloc_value, free_value};

pub(crate) fn append(tree: &mut FieldTree, id: FieldId, from: *const u8) -> Result<usize> {
    let item_size = match tree.kind(id) {
        FieldKind::InlineVector { item_size, .. } => *item_size,
        _ => unreachable!(),
    };
    let item = tree.child(id, 0);
    let header = unsafe { &*(from as *const SmallVecHeader) };
    let count = header.size as usize;
    let mut nbytes = 0;
    for i in 0..count {
        nbytes += tree.append_node(item, unsafe { header.begin.add(i * item_size) })?;
    }
    let cumulative = match tree.kind_mut(id) {
        FieldKind::InlineVector { n_written, .. } => {
            *n_written += count as u64;
            *n_written
        }
        _ => unreachable!(),
    };
    tree.col_append(id, 0, &cumulative.to_le_bytes())?;
    Ok(nbytes + tree.col(id, 0).column_type().packed_size())
}

pub(crate) fn read(tree: &FieldTree, id: FieldId, at: ElementIndex, to: *mut u8) -> Result<()> {
    let item_size = match tree.kind(id) {
        FieldKind::InlineVector { item_size, .. } => *item_size,
        _ => unreachable!(),
    };
    let item = tree.child(id, 0);
    let item_align = tree.alignment(item);
    let (start, count) = tree.col_collection_info(id, 0, at)?;
    let n = count as usize;

    let needs_construct = !tree.field(item).has_trait(field_traits::TRIVIALLY_CONSTRUCTIBLE);
    let needs_destruct = !tree.field(item).has_trait(field_traits::TRIVIALLY_DESTRUCTIBLE);

    let header = unsafe { &mut *(to as *mut SmallVecHeader) };
    let old = header.size as usize;

    // Destroy excess elements, if any.
    if needs_destruct {
        for i in n..old {
            lifecycle::destroy_at(tree, item, unsafe { header.begin.add(i * item_size) }, true);
        }
    }

    if n as i64 > header.capacity as i64 {
        // Reallocation: every element is invalidated, so the survivors
        // are destroyed and reconstructed in the new buffer.
        if needs_destruct {
            for i in 0..old.min(n) {
                lifecycle::destroy_at(
                    tree,
                    item,
                    unsafe { header.begin.add(i * item_size) },
                    true,
                );
            }
        }
        let inline = unsafe { raw::is_inline(to, item_align) };
        let owns = header.capacity != -1;
        if !inline && owns && !header.begin.is_null() {
            free_value(header.begin, header.capacity as usize * item_size, item_align);
        }
        // The new buffer is sized exactly to the incoming element count.
        header.begin = alloc_value(n * item_size, item_align);
        header.capacity = n as i32;
        if needs_construct {
            for i in 0..old.min(n) {
                lifecycle::construct_at(tree, item, unsafe { header.begin.add(i * item_size) });
            }
        }
    }
    header.size = n as i32;

    if needs_construct {
        for i in old.min(n)..n {
            lifecycle::construct_at(tree, item, unsafe { header.begin.add(i * item_size) });
        }
    }

    for i in 0..n {
        let elem = unsafe { header.begin.add(i * item_size) };
        tree.read_node(item, ElementIndex::Cluster(start + i as u64), elem)?;
    }
    Ok(())
}
