//! The field factory: maps canonical type names to constructed nodes.

use eyre::{bail, Result};

use crate::fields::{
    base_child_name, field_traits, Field, FieldId, FieldKind, FieldStructure, FieldTree,
    PrimitiveKind, RecordFlavor,
};
use crate::meta::{ClassInfo, TypeRegistry};
use crate::types::{canonical_type_name, normalize_type_name, parse_array_type, tokenize_template_args};
use crate::values::raw;

/// Builds a field for a user-spelled type: normalization and typedef
/// resolution happen here, the canonical dispatch in [`build`].
pub(crate) fn build_from_user(
    tree: &mut FieldTree,
    parent: Option<FieldId>,
    name: &str,
    user_type: &str,
    registry: &TypeRegistry,
) -> Result<FieldId> {
    let alias = normalize_type_name(user_type);
    let canonical = normalize_type_name(&canonical_type_name(&alias, registry));
    build(tree, parent, name, &canonical, &alias, registry)
}

/// Builds the field node (and subfields) for a canonical type name. The
/// created node is pushed before its children, so the subtree root always
/// precedes its descendants in the arena.
pub(crate) fn build(
    tree: &mut FieldTree,
    parent: Option<FieldId>,
    name: &str,
    canonical: &str,
    alias: &str,
    registry: &TypeRegistry,
) -> Result<FieldId> {
    if canonical.is_empty() {
        bail!("no type name specified for field {}", name);
    }

    let (array_base, array_sizes) = parse_array_type(canonical)?;
    if !array_sizes.is_empty() {
        if array_sizes.len() > 1 {
            bail!("multi-dimensional array type not supported: {}", canonical);
        }
        let id = build_array(tree, parent, name, &array_base, array_sizes[0], registry)?;
        attach_alias(tree, id, alias);
        return Ok(id);
    }

    let id = dispatch(tree, parent, name, canonical, registry)?;
    attach_alias(tree, id, alias);
    Ok(id)
}

fn attach_alias(tree: &mut FieldTree, id: FieldId, alias: &str) {
    if !alias.is_empty() && alias != tree.field(id).type_name {
        tree.node_mut(id).type_alias = Some(alias.to_string());
    }
}

fn dispatch(
    tree: &mut FieldTree,
    parent: Option<FieldId>,
    name: &str,
    canonical: &str,
    registry: &TypeRegistry,
) -> Result<FieldId> {
    if let Some(prim) = PrimitiveKind::from_name(canonical) {
        let mut field = Field::new(
            name,
            canonical,
            FieldStructure::Leaf,
            true,
            0,
            FieldKind::Primitive(prim),
        );
        field.traits = field_traits::ALL;
        return Ok(tree.push_node(field, parent));
    }

    if canonical == "string" {
        let field = Field::new(
            name,
            "string",
            FieldStructure::Leaf,
            false,
            0,
            FieldKind::String { index: 0 },
        );
        return Ok(tree.push_node(field, parent));
    }

    if canonical == "vec<bool>" {
        let id = tree.push_node(
            Field::new(
                name,
                "vec<bool>",
                FieldStructure::Collection,
                false,
                0,
                FieldKind::BoolVector { n_written: 0 },
            ),
            parent,
        );
        build(tree, Some(id), "_0", "bool", "", registry)?;
        return Ok(id);
    }

    if let Some(body) = canonical.strip_prefix("vec<").and_then(|s| s.strip_suffix('>')) {
        let id = tree.push_node(
            Field::new(
                name,
                "",
                FieldStructure::Collection,
                false,
                0,
                FieldKind::Vector { item_size: 0, n_written: 0 },
            ),
            parent,
        );
        let item = build_from_user(tree, Some(id), "_0", body, registry)?;
        let item_size = tree.value_size(item);
        let type_name = format!("vec<{}>", tree.field(item).type_name());
        tree.node_mut(id).type_name = type_name;
        if let FieldKind::Vector { item_size: s, .. } = tree.kind_mut(id) {
            *s = item_size;
        }
        return Ok(id);
    }

    if let Some(body) = canonical.strip_prefix("smallvec<").and_then(|s| s.strip_suffix('>')) {
        let id = tree.push_node(
            Field::new(
                name,
                "",
                FieldStructure::Collection,
                false,
                0,
                FieldKind::InlineVector { item_size: 0, value_size: 0, align: 0, n_written: 0 },
            ),
            parent,
        );
        let item = build_from_user(tree, Some(id), "_0", body, registry)?;
        let item_size = tree.value_size(item);
        let (value_size, align) = raw::small_vec_layout(item_size, tree.alignment(item));
        let type_name = format!("smallvec<{}>", tree.field(item).type_name());
        tree.node_mut(id).type_name = type_name;
        if let FieldKind::InlineVector { item_size: s, value_size: v, align: a, .. } =
            tree.kind_mut(id)
        {
            *s = item_size;
            *v = value_size;
            *a = align;
        }
        return Ok(id);
    }

    if let Some(body) = canonical.strip_prefix("array<").and_then(|s| s.strip_suffix('>')) {
        let args = tokenize_template_args(body);
        if args.len() != 2 {
            bail!("field {} has invalid array template arguments: {}", name, canonical);
        }
        let len: usize = match args[1].trim().parse() {
            Ok(n) => n,
            Err(_) => bail!("field {} has invalid array length: {}", name, canonical),
        };
        return build_array(tree, parent, name, &args[0], len, registry);
    }

    if let Some(body) = canonical.strip_prefix("variant<").and_then(|s| s.strip_suffix('>')) {
        return build_variant(tree, parent, name, body, registry);
    }

    if let Some(body) = canonical.strip_prefix("pair<").and_then(|s| s.strip_suffix('>')) {
        let args = tokenize_template_args(body);
        if args.len() != 2 {
            bail!("the type list for pair must have exactly two elements");
        }
        return build_record(tree, parent, name, &args, RecordFlavor::Pair, registry);
    }

    if let Some(body) = canonical.strip_prefix("tuple<").and_then(|s| s.strip_suffix('>')) {
        let args = tokenize_template_args(body);
        if args.is_empty() {
            bail!("the type list for tuple must have at least one element");
        }
        return build_record(tree, parent, name, &args, RecordFlavor::Tuple, registry);
    }

    if let Some(body) = canonical.strip_prefix("bitset<").and_then(|s| s.strip_suffix('>')) {
        let n_bits: usize = match body.trim().parse() {
            Ok(n) if n > 0 => n,
            _ => bail!("field {} has invalid bitset size: {}", name, canonical),
        };
        let mut field = Field::new(
            name,
            canonical,
            FieldStructure::Leaf,
            false,
            n_bits,
            FieldKind::Bitset { n_bits },
        );
        field.traits = field_traits::TRIVIALLY_DESTRUCTIBLE;
        return Ok(tree.push_node(field, parent));
    }

    if let Some(body) = canonical.strip_prefix("ptr<").and_then(|s| s.strip_suffix('>')) {
        let id = tree.push_node(
            Field::new(
                name,
                "",
                FieldStructure::Collection,
                false,
                0,
                FieldKind::Pointer { dense: false, n_written: 0, default_item: None },
            ),
            parent,
        );
        let item = build_from_user(tree, Some(id), "_0", body, registry)?;
        let type_name = format!("ptr<{}>", tree.field(item).type_name());
        tree.node_mut(id).type_name = type_name;
        return Ok(id);
    }

    if let Some(body) = canonical.strip_prefix("cardinality<").and_then(|s| s.strip_suffix('>')) {
        let args = tokenize_template_args(body);
        let wide = match args.as_slice() {
            [one] if one == "u32" => false,
            [one] if one == "u64" => true,
            _ => bail!("field {} has invalid cardinality template: {}", name, canonical),
        };
        let mut field = Field::new(
            name,
            canonical,
            FieldStructure::Leaf,
            false,
            0,
            FieldKind::Cardinality { wide },
        );
        field.traits =
            field_traits::TRIVIALLY_CONSTRUCTIBLE | field_traits::TRIVIALLY_DESTRUCTIBLE;
        return Ok(tree.push_node(field, parent));
    }

    if let Some(enum_info) = registry.enum_info(canonical) {
        let underlying = enum_info.underlying.clone();
        let mut field =
            Field::new(name, canonical, FieldStructure::Leaf, false, 0, FieldKind::Enum);
        field.traits =
            field_traits::TRIVIALLY_CONSTRUCTIBLE | field_traits::TRIVIALLY_DESTRUCTIBLE;
        let id = tree.push_node(field, parent);
        build(tree, Some(id), "_0", &underlying, "", registry)?;
        return Ok(id);
    }

    if let Some(info) = registry.class_info(canonical) {
        if info.proxy.is_some() {
            return build_proxy_collection(tree, parent, name, canonical, &info, registry);
        }
        return build_class(tree, parent, name, canonical, &info, registry);
    }

    bail!("field {} has unknown type {}", name, canonical);
}

fn build_array(
    tree: &mut FieldTree,
    parent: Option<FieldId>,
    name: &str,
    item_type: &str,
    len: usize,
    registry: &TypeRegistry,
) -> Result<FieldId> {
    let id = tree.push_node(
        Field::new(
            name,
            "",
            FieldStructure::Leaf,
            false,
            len,
            FieldKind::Array { item_size: 0, len },
        ),
        parent,
    );
    let item = build_from_user(tree, Some(id), "_0", item_type, registry)?;
    let item_size = tree.value_size(item);
    let item_traits = tree.field(item).traits();
    let type_name = format!("array<{},{}>", tree.field(item).type_name(), len);
    let node = tree.node_mut(id);
    node.type_name = type_name;
    node.traits = item_traits & !field_traits::MAPPABLE;
    if let FieldKind::Array { item_size: s, .. } = tree.kind_mut(id) {
        *s = item_size;
    }
    Ok(id)
}

fn build_variant(
    tree: &mut FieldTree,
    parent: Option<FieldId>,
    name: &str,
    body: &str,
    registry: &TypeRegistry,
) -> Result<FieldId> {
    let args = tokenize_template_args(body);
    if args.is_empty() {
        bail!("the type list for variant must have at least one element");
    }
    if args.len() > 255 {
        bail!("variants with more than 255 alternatives are not supported");
    }
    let id = tree.push_node(
        Field::new(
            name,
            "",
            FieldStructure::Variant,
            false,
            0,
            FieldKind::Variant {
                max_item_size: 0,
                max_align: 0,
                tag_offset: 0,
                n_written: vec![0; args.len()],
            },
        ),
        parent,
    );
    // The variant initializes its own tag member, so it is never
    // trivially constructible; destructibility follows the alternatives.
    let mut traits = field_traits::TRIVIALLY_DESTRUCTIBLE;
    let mut max_item_size = 0usize;
    let mut max_align = 1usize;
    let mut type_names = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let item = build_from_user(tree, Some(id), &format!("_{i}"), arg, registry)?;
        max_item_size = max_item_size.max(tree.value_size(item));
        max_align = max_align.max(tree.alignment(item));
        traits &= tree.field(item).traits();
        type_names.push(tree.field(item).type_name().to_string());
    }
    let tag_offset = if max_item_size < max_align { max_align } else { max_item_size };
    let node = tree.node_mut(id);
    node.type_name = format!("variant<{}>", type_names.join(","));
    node.traits = traits;
    if let FieldKind::Variant { max_item_size: m, max_align: a, tag_offset: t, .. } =
        tree.kind_mut(id)
    {
        *m = max_item_size;
        *a = max_align;
        *t = tag_offset;
    }
    Ok(id)
}

fn build_record(
    tree: &mut FieldTree,
    parent: Option<FieldId>,
    name: &str,
    item_types: &[String],
    flavor: RecordFlavor,
    registry: &TypeRegistry,
) -> Result<FieldId> {
    let id = tree.push_node(
        Field::new(
            name,
            "",
            FieldStructure::Record,
            false,
            0,
            FieldKind::Record { flavor, offsets: Vec::new(), size: 0, align: 1 },
        ),
        parent,
    );
    for (i, ty) in item_types.iter().enumerate() {
        build_from_user(tree, Some(id), &format!("_{i}"), ty, registry)?;
    }
    finalize_record(tree, id, flavor);
    Ok(id)
}

/// Computes the by-layout record geometry from the attached children:
/// sequential offsets honoring each child's alignment, with trailing
/// padding for the strictest member alignment.
pub(crate) fn finalize_record(tree: &mut FieldTree, id: FieldId, flavor: RecordFlavor) {
    let children: Vec<FieldId> = tree.field(id).children().to_vec();
    let mut offsets = Vec::with_capacity(children.len());
    let mut size = 0usize;
    let mut align = 1usize;
    let mut traits = field_traits::TRIVIAL_TYPE
        | field_traits::TRIVIALLY_CONSTRUCTIBLE
        | field_traits::TRIVIALLY_DESTRUCTIBLE;
    let mut type_names = Vec::with_capacity(children.len());
    for child in &children {
        let child_align = tree.alignment(*child).max(1);
        size += item_padding(size, child_align);
        offsets.push(size);
        size += tree.value_size(*child);
        align = align.max(child_align);
        traits &= tree.field(*child).traits();
        type_names.push(tree.field(*child).type_name().to_string());
    }
    size += item_padding(size, align);
    let type_name = match flavor {
        RecordFlavor::Pair => format!("pair<{}>", type_names.join(",")),
        RecordFlavor::Tuple => format!("tuple<{}>", type_names.join(",")),
        RecordFlavor::Record => String::new(),
    };
    let node = tree.node_mut(id);
    if !type_name.is_empty() {
        node.type_name = type_name;
    }
    node.traits = traits;
    if let FieldKind::Record { offsets: o, size: s, align: a, .. } = tree.kind_mut(id) {
        *o = offsets;
        *s = size;
        *a = align;
    }
}

pub(crate) fn item_padding(base: usize, align: usize) -> usize {
    if align > 1 {
        let rem = base % align;
        if rem != 0 {
            return align - rem;
        }
    }
    0
}

fn build_class(
    tree: &mut FieldTree,
    parent: Option<FieldId>,
    name: &str,
    canonical: &str,
    info: &std::sync::Arc<ClassInfo>,
    registry: &TypeRegistry,
) -> Result<FieldId> {
    if canonical.starts_with("std::") {
        bail!("{} is not supported", canonical);
    }
    debug_assert!(info.proxy.is_none());
    let id = tree.push_node(
        Field::new(
            name,
            canonical,
            FieldStructure::Record,
            false,
            0,
            FieldKind::Class { info: info.clone(), offsets: Vec::new() },
        ),
        parent,
    );
    let mut traits = 0u32;
    if !info.has_explicit_constructor() {
        traits |= field_traits::TRIVIALLY_CONSTRUCTIBLE;
    }
    if !info.has_explicit_destructor() {
        traits |= field_traits::TRIVIALLY_DESTRUCTIBLE;
    }
    let mut offsets = Vec::new();

    for (i, base) in info.bases.iter().enumerate() {
        let child =
            build_from_user(tree, Some(id), &base_child_name(i), &base.class_name, registry)?;
        traits &= tree.field(child).traits();
        offsets.push(base.offset);
    }
    for member in &info.members {
        if member.is_transient {
            // A skipped member still has to be initialized somehow, so the
            // field as a whole loses its trivial lifecycle.
            traits &= !(field_traits::TRIVIALLY_CONSTRUCTIBLE
                | field_traits::TRIVIALLY_DESTRUCTIBLE);
            continue;
        }
        let mut type_name = member.type_name.clone();
        for dim in &member.array_dims {
            type_name.push_str(&format!("[{dim}]"));
        }
        let alias = normalize_type_name(
            member.type_alias.as_deref().unwrap_or(type_name.as_str()),
        );
        let normalized = normalize_type_name(&type_name);
        let canonical_child = normalize_type_name(&canonical_type_name(&normalized, registry));
        let child = build(tree, Some(id), &member.name, &canonical_child, &alias, registry)?;
        traits &= tree.field(child).traits();
        offsets.push(member.offset);
    }

    let node = tree.node_mut(id);
    node.traits = traits;
    if let FieldKind::Class { offsets: o, .. } = tree.kind_mut(id) {
        *o = offsets;
    }
    Ok(id)
}

fn build_proxy_collection(
    tree: &mut FieldTree,
    parent: Option<FieldId>,
    name: &str,
    canonical: &str,
    info: &std::sync::Arc<ClassInfo>,
    registry: &TypeRegistry,
) -> Result<FieldId> {
    let proxy = info.proxy.clone().expect("caller checked for a proxy");
    if proxy.has_pointers {
        bail!("collection proxies whose value type is a pointer are not supported");
    }
    if proxy.is_associative {
        bail!("associative collections are not supported");
    }
    let id = tree.push_node(
        Field::new(
            name,
            canonical,
            FieldStructure::Collection,
            false,
            0,
            FieldKind::Proxy { info: info.clone(), proxy: proxy.clone(), item_size: 0, n_written: 0 },
        ),
        parent,
    );
    let item = build_from_user(tree, Some(id), "_0", &proxy.value_type, registry)?;
    let item_size = tree.value_size(item);
    if let FieldKind::Proxy { item_size: s, .. } = tree.kind_mut(id) {
        *s = item_size;
    }
    Ok(id)
}
