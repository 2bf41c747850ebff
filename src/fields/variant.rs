//! The variant kind: a switch column carrying `(within-tag index, tag)`
//! records. Tag 0 is reserved for "no alternative held"; alternatives are
//! numbered 1..=N. The value holds the largest alternative followed by a
//! one-byte tag.

use eyre::Result;

use crate::fields::{lifecycle, FieldId, FieldKind, FieldTree};
use crate::io::{ColumnType, ElementIndex, SwitchValue};

pub(crate) fn append(tree: &mut FieldTree, id: FieldId, from: *const u8) -> Result<usize> {
    let tag = lifecycle::variant_tag(tree, id, from);
    let mut nbytes = 0;
    let mut index = 0u64;
    if tag > 0 {
        let child = tree.child(id, tag as usize - 1);
        nbytes += tree.append_node(child, from)?;
        index = match tree.kind_mut(id) {
            FieldKind::Variant { n_written, .. } => {
                let slot = &mut n_written[tag as usize - 1];
                let current = *slot;
                *slot += 1;
                current
            }
            _ => unreachable!(),
        };
    }
    tree.col_append(id, 0, &SwitchValue::new(index, tag).to_le_bytes())?;
    Ok(nbytes + ColumnType::Switch.packed_size())
}

pub(crate) fn read(tree: &FieldTree, id: FieldId, at: ElementIndex, to: *mut u8) -> Result<()> {
    let (index, tag) = tree.col_switch_info(id, 0, at)?;

    // Tag 0 means the on-disk entry holds no alternative (e.g. the field
    // was late-added); the destination is left in the tag-0 state rather
    // than synthesizing a default alternative.
    if tag > 0 {
        let child = tree.child(id, tag as usize - 1);
        lifecycle::construct_at(tree, child, to);
        tree.read_node(child, ElementIndex::Cluster(index), to)?;
    }
    lifecycle::set_variant_tag(tree, id, to, tag);
    Ok(())
}
