//! Record-shaped kinds: by-layout records (including pairs and tuples)
//! and reflected classes. Append and read fan out to the children at
//! their byte offsets.

use eyre::Result;
use log::warn;

use crate::fields::{FieldId, FieldKind, FieldTree};
use crate::io::ElementIndex;
use crate::meta::SchemaRuleKind;

fn children_with_offsets(tree: &FieldTree, id: FieldId) -> Vec<(FieldId, usize)> {
    let offsets: &[usize] = match tree.kind(id) {
        FieldKind::Record { offsets, .. } => offsets,
        FieldKind::Class { offsets, .. } => offsets,
        _ => unreachable!("record fan-out on a non-record field"),
    };
    tree.field(id).children().iter().copied().zip(offsets.iter().copied()).collect()
}

pub(crate) fn append(tree: &mut FieldTree, id: FieldId, from: *const u8) -> Result<usize> {
    let mut nbytes = 0;
    for (child, offset) in children_with_offsets(tree, id) {
        nbytes += tree.append_node(child, unsafe { from.add(offset) })?;
    }
    Ok(nbytes)
}

pub(crate) fn read(tree: &FieldTree, id: FieldId, at: ElementIndex, to: *mut u8) -> Result<()> {
    for (child, offset) in children_with_offsets(tree, id) {
        tree.read_node(child, at, unsafe { to.add(offset) })?;
    }
    Ok(())
}

/// Installs the post-read callbacks for the I/O customization rules of a
/// reflected class, filtered by the on-disk type version. Only read rules
/// whose targets are all transient members are supported; everything else
/// is skipped with a warning.
pub(crate) fn install_schema_rules(tree: &mut FieldTree, id: FieldId, on_disk_version: u32) {
    let info = match tree.kind(id) {
        FieldKind::Class { info, .. } => info.clone(),
        _ => return,
    };
    for rule in info.rules_for_version(on_disk_version) {
        if rule.kind != SchemaRuleKind::Read {
            warn!(
                "field {}: ignoring I/O customization rule with unsupported type",
                tree.qualified_name(id)
            );
            continue;
        }
        let targets_non_transient = rule
            .targets
            .iter()
            .any(|t| info.member(t).map_or(true, |m| !m.is_transient));
        if targets_non_transient {
            warn!(
                "field {}: ignoring I/O customization rule targeting a non-transient member",
                tree.qualified_name(id)
            );
            continue;
        }
        let func = rule.func.clone();
        tree.add_read_callback(id, Box::new(move |target| func(target)));
    }
}
