//! Value lifecycle: size and alignment queries, placement construction,
//! destruction, and splitting values into child bindings.
//!
//! Values live in caller-owned storage and are interpreted through raw
//! addresses, so construction and destruction are explicit tree
//! operations. A field with the trivially-constructible trait needs no
//! construction beyond zeroed storage; a trivially-destructible one needs
//! no teardown. Everything else recurses through the kind-specific rules
//! below, mirroring the append/read layout exactly.

use std::mem::{align_of, size_of};

use crate::fields::{field_traits, FieldId, FieldKind, FieldTree};
use crate::values::raw::{self, RawBitVec, RawVec, SmallVecHeader};
use crate::values::{alloc_value, free_value, Value};

pub(crate) fn value_size(tree: &FieldTree, id: FieldId) -> usize {
    match tree.kind(id) {
        FieldKind::Root | FieldKind::CollectionGroup { .. } => 0,
        FieldKind::Primitive(p) => p.size(),
        FieldKind::Cardinality { wide } => {
            if *wide {
                8
            } else {
                4
            }
        }
        FieldKind::String { .. } => size_of::<String>(),
        FieldKind::Enum => value_size(tree, tree.child(id, 0)),
        FieldKind::Record { size, .. } => *size,
        FieldKind::Class { info, .. } => info.size,
        FieldKind::Array { item_size, len } => item_size * len,
        FieldKind::Vector { .. } => size_of::<RawVec>(),
        FieldKind::InlineVector { value_size, .. } => *value_size,
        FieldKind::BoolVector { .. } => size_of::<RawBitVec>(),
        FieldKind::Bitset { n_bits } => 8 * n_bits.div_ceil(64),
        FieldKind::Variant { max_item_size, max_align, .. } => max_item_size + max_align,
        FieldKind::Pointer { .. } => size_of::<*mut u8>(),
        FieldKind::Proxy { info, .. } => info.size,
    }
}

pub(crate) fn alignment(tree: &FieldTree, id: FieldId) -> usize {
    match tree.kind(id) {
        FieldKind::Root | FieldKind::CollectionGroup { .. } => 1,
        FieldKind::Primitive(p) => p.alignment(),
        FieldKind::Cardinality { wide } => {
            if *wide {
                8
            } else {
                4
            }
        }
        FieldKind::String { .. } => align_of::<String>(),
        FieldKind::Enum => alignment(tree, tree.child(id, 0)),
        FieldKind::Record { align, .. } => *align,
        FieldKind::Class { info, .. } => info.alignment,
        FieldKind::Array { .. } => alignment(tree, tree.child(id, 0)),
        FieldKind::Vector { .. } => align_of::<RawVec>(),
        FieldKind::InlineVector { align, .. } => *align,
        FieldKind::BoolVector { .. } => align_of::<RawBitVec>(),
        FieldKind::Bitset { .. } => align_of::<u64>(),
        FieldKind::Variant { max_align, .. } => (*max_align).max(1),
        FieldKind::Pointer { .. } => align_of::<*mut u8>(),
        FieldKind::Proxy { info, .. } => info.alignment,
    }
}

/// Placement-constructs a value of the field in (suitably sized and
/// aligned) caller storage.
pub(crate) fn construct_at(tree: &FieldTree, id: FieldId, ptr: *mut u8) {
    match tree.kind(id) {
        FieldKind::Root | FieldKind::CollectionGroup { .. } => {}
        FieldKind::Primitive(_)
        | FieldKind::Cardinality { .. }
        | FieldKind::Enum
        | FieldKind::Bitset { .. } => unsafe {
            ptr.write_bytes(0, value_size(tree, id));
        },
        FieldKind::String { .. } => unsafe {
            (ptr as *mut String).write(String::new());
        },
        FieldKind::Record { offsets, .. } => {
            let offsets = offsets.clone();
            for (child, offset) in tree.field(id).children().iter().zip(offsets) {
                construct_at(tree, *child, unsafe { ptr.add(offset) });
            }
        }
        FieldKind::Class { info, offsets } => {
            if let Some(ctor) = &info.constructor {
                ctor(ptr);
                return;
            }
            let offsets = offsets.clone();
            for (child, offset) in tree.field(id).children().iter().zip(offsets) {
                construct_at(tree, *child, unsafe { ptr.add(offset) });
            }
        }
        FieldKind::Array { item_size, len } => {
            let (item_size, len) = (*item_size, *len);
            let item = tree.child(id, 0);
            if tree.field(item).has_trait(field_traits::TRIVIALLY_CONSTRUCTIBLE) {
                unsafe { ptr.write_bytes(0, item_size * len) };
                return;
            }
            for i in 0..len {
                construct_at(tree, item, unsafe { ptr.add(i * item_size) });
            }
        }
        FieldKind::Vector { .. } => unsafe {
            (ptr as *mut RawVec).write(RawVec::new());
        },
        FieldKind::InlineVector { .. } => unsafe {
            // Mirrors the append/read layout: begin, size, capacity; the
            // inline buffer stays uninitialized.
            (ptr as *mut SmallVecHeader).write(SmallVecHeader {
                begin: std::ptr::null_mut(),
                size: 0,
                capacity: 0,
            });
        },
        FieldKind::BoolVector { .. } => unsafe {
            (ptr as *mut RawBitVec).write(RawBitVec::new());
        },
        FieldKind::Variant { .. } => {
            unsafe { ptr.write_bytes(0, value_size(tree, id)) };
            let first = tree.child(id, 0);
            construct_at(tree, first, ptr);
            set_variant_tag(tree, id, ptr, 1);
        }
        FieldKind::Pointer { .. } => unsafe {
            (ptr as *mut *mut u8).write(std::ptr::null_mut());
        },
        FieldKind::Proxy { proxy, .. } => {
            (proxy.construct)(ptr);
        }
    }
}

/// Destroys a value; with `dtor_only == false` the outer allocation is
/// released as well.
pub(crate) fn destroy_at(tree: &FieldTree, id: FieldId, ptr: *mut u8, dtor_only: bool) {
    match tree.kind(id) {
        FieldKind::Root
        | FieldKind::CollectionGroup { .. }
        | FieldKind::Primitive(_)
        | FieldKind::Cardinality { .. }
        | FieldKind::Enum
        | FieldKind::Bitset { .. } => {}
        FieldKind::String { .. } => unsafe {
            std::ptr::drop_in_place(ptr as *mut String);
        },
        FieldKind::Record { offsets, .. } => {
            let offsets = offsets.clone();
            for (child, offset) in tree.field(id).children().iter().zip(offsets) {
                destroy_at(tree, *child, unsafe { ptr.add(offset) }, true);
            }
        }
        FieldKind::Class { info, offsets } => {
            if let Some(dtor) = &info.destructor {
                dtor(ptr);
            } else {
                let offsets = offsets.clone();
                for (child, offset) in tree.field(id).children().iter().zip(offsets) {
                    destroy_at(tree, *child, unsafe { ptr.add(offset) }, true);
                }
            }
        }
        FieldKind::Array { item_size, len } => {
            let (item_size, len) = (*item_size, *len);
            let item = tree.child(id, 0);
            if !tree.field(item).has_trait(field_traits::TRIVIALLY_DESTRUCTIBLE) {
                for i in 0..len {
                    destroy_at(tree, item, unsafe { ptr.add(i * item_size) }, true);
                }
            }
        }
        FieldKind::Vector { item_size, .. } => {
            let item_size = *item_size;
            let item = tree.child(id, 0);
            let item_align = alignment(tree, item);
            let vec = unsafe { &mut *(ptr as *mut RawVec) };
            if !tree.field(item).has_trait(field_traits::TRIVIALLY_DESTRUCTIBLE) {
                for i in 0..vec.len() {
                    destroy_at(tree, item, unsafe { vec.as_ptr().add(i * item_size) }, true);
                }
            }
            unsafe { vec.release_buffer(item_size, item_align) };
        }
        FieldKind::InlineVector { item_size, .. } => {
            let item_size = *item_size;
            let item = tree.child(id, 0);
            let item_align = alignment(tree, item);
            let header = unsafe { &*(ptr as *const SmallVecHeader) };
            if !tree.field(item).has_trait(field_traits::TRIVIALLY_DESTRUCTIBLE) {
                for i in 0..header.size as usize {
                    destroy_at(tree, item, unsafe { header.begin.add(i * item_size) }, true);
                }
            }
            let inline = unsafe { raw::is_inline(ptr, item_align) };
            let owns = header.capacity != -1;
            if !inline && owns && !header.begin.is_null() {
                free_value(header.begin, header.capacity as usize * item_size, item_align);
            }
        }
        FieldKind::BoolVector { .. } => {
            let bits = unsafe { &mut *(ptr as *mut RawBitVec) };
            bits.release();
        }
        FieldKind::Variant { .. } => {
            let tag = variant_tag(tree, id, ptr);
            if tag > 0 {
                destroy_at(tree, tree.child(id, tag as usize - 1), ptr, true);
            }
        }
        FieldKind::Pointer { .. } => {
            let slot = unsafe { &mut *(ptr as *mut *mut u8) };
            if !slot.is_null() {
                let item = tree.child(id, 0);
                destroy_at(tree, item, *slot, false);
                *slot = std::ptr::null_mut();
            }
        }
        FieldKind::Proxy { proxy, item_size, .. } => {
            let (proxy, item_size) = (proxy.clone(), *item_size);
            let item = tree.child(id, 0);
            if proxy.needs_destruct
                && !tree.field(item).has_trait(field_traits::TRIVIALLY_DESTRUCTIBLE)
            {
                let count = (proxy.count)(ptr);
                for i in 0..count {
                    let elem = element_ptr(&proxy, ptr, i);
                    destroy_at(tree, item, elem, true);
                }
            }
            (proxy.destruct)(ptr);
        }
    }
    if !dtor_only {
        free_value(ptr, value_size(tree, id), alignment(tree, id));
    }
}

/// Element address in a proxied container for the write/destroy path.
pub(crate) fn element_ptr(
    proxy: &crate::meta::CollectionProxy,
    container: *mut u8,
    i: usize,
) -> *mut u8 {
    match proxy.stride {
        Some(stride) => {
            let base = (proxy.iter_write)(container, 0);
            unsafe { base.add(i * stride) }
        }
        None => (proxy.iter_write)(container, i),
    }
}

/// The stored alternative of a variant value: 0 when none is held,
/// otherwise 1..=N. The tag byte holds the alternative index minus one,
/// with -1 encoding the invalid state.
pub(crate) fn variant_tag(tree: &FieldTree, id: FieldId, ptr: *const u8) -> u32 {
    let tag_offset = match tree.kind(id) {
        FieldKind::Variant { tag_offset, .. } => *tag_offset,
        _ => unreachable!("variant_tag on a non-variant field"),
    };
    let raw = unsafe { *(ptr.add(tag_offset) as *const i8) };
    if raw < 0 {
        0
    } else {
        raw as u32 + 1
    }
}

pub(crate) fn set_variant_tag(tree: &FieldTree, id: FieldId, ptr: *mut u8, tag: u32) {
    let tag_offset = match tree.kind(id) {
        FieldKind::Variant { tag_offset, .. } => *tag_offset,
        _ => unreachable!("set_variant_tag on a non-variant field"),
    };
    unsafe { *(ptr.add(tag_offset) as *mut i8) = tag as i8 - 1 };
}

/// Non-owning bindings of the children over the supplied value address.
pub(crate) fn split_value(tree: &FieldTree, id: FieldId, ptr: *mut u8) -> Vec<Value> {
    let mut result = Vec::new();
    match tree.kind(id) {
        FieldKind::Record { offsets, .. } => {
            for (child, offset) in tree.field(id).children().iter().zip(offsets.iter()) {
                result.push(Value::new(*child, unsafe { ptr.add(*offset) }, false));
            }
        }
        FieldKind::Class { offsets, .. } => {
            for (child, offset) in tree.field(id).children().iter().zip(offsets.iter()) {
                result.push(Value::new(*child, unsafe { ptr.add(*offset) }, false));
            }
        }
        FieldKind::Enum => {
            result.push(Value::new(tree.child(id, 0), ptr, false));
        }
        FieldKind::Array { item_size, len } => {
            let item = tree.child(id, 0);
            for i in 0..*len {
                result.push(Value::new(item, unsafe { ptr.add(i * item_size) }, false));
            }
        }
        FieldKind::Vector { item_size, .. } => {
            let item = tree.child(id, 0);
            let vec = unsafe { &*(ptr as *const RawVec) };
            for i in 0..vec.len() {
                result.push(Value::new(item, unsafe { vec.as_ptr().add(i * item_size) }, false));
            }
        }
        FieldKind::InlineVector { item_size, .. } => {
            let item = tree.child(id, 0);
            let header = unsafe { &*(ptr as *const SmallVecHeader) };
            for i in 0..header.size as usize {
                result.push(Value::new(item, unsafe { header.begin.add(i * item_size) }, false));
            }
        }
        FieldKind::Variant { .. } => {
            let tag = variant_tag(tree, id, ptr);
            if tag > 0 {
                result.push(Value::new(tree.child(id, tag as usize - 1), ptr, false));
            }
        }
        FieldKind::Pointer { .. } => {
            let slot = unsafe { *(ptr as *const *mut u8) };
            if !slot.is_null() {
                result.push(Value::new(tree.child(id, 0), slot, false));
            }
        }
        FieldKind::Proxy { proxy, item_size, .. } => {
            let item = tree.child(id, 0);
            let count = (proxy.count)(ptr);
            for i in 0..count {
                result.push(Value::new(item, element_ptr(proxy, ptr, i), false));
            }
        }
        _ => {}
    }
    result
}

/// Allocates and constructs a default item value for the dense nullable
/// encoding; ownership stays with the field tree.
pub(crate) fn make_default_item(tree: &FieldTree, item: FieldId) -> *mut u8 {
    let ptr = alloc_value(value_size(tree, item), alignment(tree, item));
    construct_at(tree, item, ptr);
    ptr
}
