//! Variable- and fixed-length collection kinds: fixed arrays, heap
//! vectors, packed bool vectors, proxied containers, and the legacy
//! collection grouping.

use eyre::Result;

use crate::fields::{field_traits, lifecycle, FieldId, FieldKind, FieldTree};
use crate::io::{ClusterIndex, ElementIndex};
use crate::meta::CollectionProxy;
use crate::values::raw::{RawBitVec, RawVec};

/// Element index of repetition `i` under a fixed-length ancestor of
/// length `len`.
fn scaled(at: ElementIndex, len: usize, i: usize) -> ElementIndex {
    match at {
        ElementIndex::Global(g) => ElementIndex::Global(g * len as u64 + i as u64),
        ElementIndex::Cluster(ci) => {
            ElementIndex::Cluster(ClusterIndex::new(ci.cluster, ci.index * len as u64 + i as u64))
        }
    }
}

// ---- fixed-length arrays --------------------------------------------------

pub(crate) fn append_array(tree: &mut FieldTree, id: FieldId, from: *const u8) -> Result<usize> {
    let (item_size, len) = match tree.kind(id) {
        FieldKind::Array { item_size, len } => (*item_size, *len),
        _ => unreachable!(),
    };
    let item = tree.child(id, 0);
    let mut nbytes = 0;
    for i in 0..len {
        nbytes += tree.append_node(item, unsafe { from.add(i * item_size) })?;
    }
    Ok(nbytes)
}

pub(crate) fn read_array(
    tree: &FieldTree,
    id: FieldId,
    at: ElementIndex,
    to: *mut u8,
) -> Result<()> {
    let (item_size, len) = match tree.kind(id) {
        FieldKind::Array { item_size, len } => (*item_size, *len),
        _ => unreachable!(),
    };
    let item = tree.child(id, 0);
    for i in 0..len {
        tree.read_node(item, scaled(at, len, i), unsafe { to.add(i * item_size) })?;
    }
    Ok(())
}

// ---- heap vectors ---------------------------------------------------------

pub(crate) fn append_vector(tree: &mut FieldTree, id: FieldId, from: *const u8) -> Result<usize> {
    let item_size = match tree.kind(id) {
        FieldKind::Vector { item_size, .. } => *item_size,
        _ => unreachable!(),
    };
    let item = tree.child(id, 0);
    let vec = unsafe { &*(from as *const RawVec) };
    let count = vec.len();
    let base = vec.as_ptr();
    let mut nbytes = 0;
    for i in 0..count {
        nbytes += tree.append_node(item, unsafe { base.add(i * item_size) })?;
    }
    let cumulative = match tree.kind_mut(id) {
        FieldKind::Vector { n_written, .. } => {
            *n_written += count as u64;
            *n_written
        }
        _ => unreachable!(),
    };
    tree.col_append(id, 0, &cumulative.to_le_bytes())?;
    Ok(nbytes + tree.col(id, 0).column_type().packed_size())
}

pub(crate) fn read_vector(
    tree: &FieldTree,
    id: FieldId,
    at: ElementIndex,
    to: *mut u8,
) -> Result<()> {
    let item_size = match tree.kind(id) {
        FieldKind::Vector { item_size, .. } => *item_size,
        _ => unreachable!(),
    };
    let item = tree.child(id, 0);
    let item_align = tree.alignment(item);
    let (start, count) = tree.col_collection_info(id, 0, at)?;
    let n = count as usize;

    let vec = unsafe { &mut *(to as *mut RawVec) };
    let old = vec.len();
    let needs_construct = !tree.field(item).has_trait(field_traits::TRIVIALLY_CONSTRUCTIBLE);
    let needs_destruct = !tree.field(item).has_trait(field_traits::TRIVIALLY_DESTRUCTIBLE);
    let realloc = n > vec.capacity();

    // Excess elements go first; a reallocation invalidates every element,
    // so all of them are destroyed and the survivors reconstructed.
    if needs_destruct {
        let first = if realloc { 0 } else { n.min(old) };
        for i in first..old {
            lifecycle::destroy_at(tree, item, unsafe { vec.as_ptr().add(i * item_size) }, true);
        }
    }
    if realloc {
        unsafe { vec.grow_exact(n, item_size, item_align) };
    }
    unsafe { vec.set_len(n) };
    if needs_construct {
        let first = if realloc { 0 } else { old.min(n) };
        for i in first..n {
            lifecycle::construct_at(tree, item, unsafe { vec.as_ptr().add(i * item_size) });
        }
    }

    for i in 0..n {
        let elem = unsafe { vec.as_ptr().add(i * item_size) };
        tree.read_node(item, ElementIndex::Cluster(start + i as u64), elem)?;
    }
    Ok(())
}

// ---- packed bool vectors --------------------------------------------------

pub(crate) fn append_bool_vector(
    tree: &mut FieldTree,
    id: FieldId,
    from: *const u8,
) -> Result<usize> {
    let item = tree.child(id, 0);
    let bits = unsafe { &*(from as *const RawBitVec) };
    let count = bits.len();
    for i in 0..count {
        let byte = bits.get(i) as u8;
        tree.append_node(item, &byte as *const u8)?;
    }
    let cumulative = match tree.kind_mut(id) {
        FieldKind::BoolVector { n_written } => {
            *n_written += count as u64;
            *n_written
        }
        _ => unreachable!(),
    };
    tree.col_append(id, 0, &cumulative.to_le_bytes())?;
    Ok(count + tree.col(id, 0).column_type().packed_size())
}

pub(crate) fn read_bool_vector(
    tree: &FieldTree,
    id: FieldId,
    at: ElementIndex,
    to: *mut u8,
) -> Result<()> {
    let item = tree.child(id, 0);
    let (start, count) = tree.col_collection_info(id, 0, at)?;
    let bits = unsafe { &mut *(to as *mut RawBitVec) };
    bits.resize(count as usize);
    for i in 0..count {
        let mut byte = 0u8;
        tree.read_node(item, ElementIndex::Cluster(start + i), &mut byte as *mut u8)?;
        bits.set(i as usize, byte != 0);
    }
    Ok(())
}

// ---- proxied containers ---------------------------------------------------

/// Element address in a proxied container for the read-from-disk path.
fn element_ptr_read(proxy: &CollectionProxy, obj: *mut u8, i: usize) -> *mut u8 {
    match proxy.stride {
        Some(stride) => {
            let base = (proxy.iter_read)(obj, 0);
            unsafe { base.add(i * stride) }
        }
        None => (proxy.iter_read)(obj, i),
    }
}

pub(crate) fn append_proxy(tree: &mut FieldTree, id: FieldId, from: *const u8) -> Result<usize> {
    let proxy = match tree.kind(id) {
        FieldKind::Proxy { proxy, .. } => proxy.clone(),
        _ => unreachable!(),
    };
    let item = tree.child(id, 0);
    let count = (proxy.count)(from);
    let mut nbytes = 0;
    for i in 0..count {
        let elem = lifecycle::element_ptr(&proxy, from as *mut u8, i);
        nbytes += tree.append_node(item, elem)?;
    }
    let cumulative = match tree.kind_mut(id) {
        FieldKind::Proxy { n_written, .. } => {
            *n_written += count as u64;
            *n_written
        }
        _ => unreachable!(),
    };
    tree.col_append(id, 0, &cumulative.to_le_bytes())?;
    Ok(nbytes + tree.col(id, 0).column_type().packed_size())
}

pub(crate) fn read_proxy(
    tree: &FieldTree,
    id: FieldId,
    at: ElementIndex,
    to: *mut u8,
) -> Result<()> {
    let proxy = match tree.kind(id) {
        FieldKind::Proxy { proxy, .. } => proxy.clone(),
        _ => unreachable!(),
    };
    let item = tree.child(id, 0);
    let (start, count) = tree.col_collection_info(id, 0, at)?;
    let obj = (proxy.allocate)(to, count as usize);
    for i in 0..count as usize {
        let elem = element_ptr_read(&proxy, obj, i);
        tree.read_node(item, ElementIndex::Cluster(start + i as u64), elem)?;
    }
    if obj != to {
        if let Some(commit) = &proxy.commit {
            commit(obj, to);
        }
    }
    Ok(())
}

// ---- legacy collection grouping -------------------------------------------

pub(crate) fn append_group(tree: &mut FieldTree, id: FieldId) -> Result<usize> {
    let counter = match tree.kind(id) {
        FieldKind::CollectionGroup { counter } => counter.clone(),
        _ => unreachable!(),
    };
    let value = *counter.lock();
    tree.col_append(id, 0, &value.to_le_bytes())?;
    Ok(tree.col(id, 0).column_type().packed_size())
}
