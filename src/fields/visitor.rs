//! Double-dispatch traversal over field trees, used by descriptor
//! builders, schema printers, and debugging tools.

use crate::fields::{FieldId, FieldKind, FieldTree, PrimitiveKind};

/// Visitor over field nodes. Every kind has its own hook; the default
/// implementations fall back to [`FieldVisitor::visit_field`], so a
/// visitor only overrides what it cares about.
pub trait FieldVisitor {
    fn visit_field(&mut self, tree: &FieldTree, id: FieldId);

    fn visit_root(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_primitive(&mut self, tree: &FieldTree, id: FieldId, _kind: PrimitiveKind) {
        self.visit_field(tree, id);
    }
    fn visit_cardinality(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_string(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_enum(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_record(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_class(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_array(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_vector(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_inline_vector(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_bool_vector(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_bitset(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_variant(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_nullable(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_proxy_collection(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
    fn visit_collection_group(&mut self, tree: &FieldTree, id: FieldId) {
        self.visit_field(tree, id);
    }
}

impl FieldTree {
    /// Dispatches the visitor hook matching this field's kind.
    pub fn accept<V: FieldVisitor + ?Sized>(&self, id: FieldId, visitor: &mut V) {
        match self.kind(id) {
            FieldKind::Root => visitor.visit_root(self, id),
            FieldKind::Primitive(p) => visitor.visit_primitive(self, id, *p),
            FieldKind::Cardinality { .. } => visitor.visit_cardinality(self, id),
            FieldKind::String { .. } => visitor.visit_string(self, id),
            FieldKind::Enum => visitor.visit_enum(self, id),
            FieldKind::Record { .. } => visitor.visit_record(self, id),
            FieldKind::Class { .. } => visitor.visit_class(self, id),
            FieldKind::Array { .. } => visitor.visit_array(self, id),
            FieldKind::Vector { .. } => visitor.visit_vector(self, id),
            FieldKind::InlineVector { .. } => visitor.visit_inline_vector(self, id),
            FieldKind::BoolVector { .. } => visitor.visit_bool_vector(self, id),
            FieldKind::Bitset { .. } => visitor.visit_bitset(self, id),
            FieldKind::Variant { .. } => visitor.visit_variant(self, id),
            FieldKind::Pointer { .. } => visitor.visit_nullable(self, id),
            FieldKind::Proxy { .. } => visitor.visit_proxy_collection(self, id),
            FieldKind::CollectionGroup { .. } => visitor.visit_collection_group(self, id),
        }
    }
}

/// Renders a field tree as an indented schema listing.
pub struct SchemaPrinter {
    lines: Vec<String>,
}

impl SchemaPrinter {
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    pub fn print(mut self, tree: &FieldTree) -> String {
        for id in tree.iter() {
            tree.accept(id, &mut self);
        }
        self.lines.join("\n")
    }

    fn depth(tree: &FieldTree, id: FieldId) -> usize {
        let mut depth = 0;
        let mut cursor = tree.field(id).parent();
        while let Some(p) = cursor {
            depth += 1;
            cursor = tree.field(p).parent();
        }
        depth
    }
}

impl Default for SchemaPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldVisitor for SchemaPrinter {
    fn visit_field(&mut self, tree: &FieldTree, id: FieldId) {
        let field = tree.field(id);
        let name = if field.name().is_empty() { "(root)" } else { field.name() };
        let mut line = format!(
            "{:indent$}{}: {}",
            "",
            name,
            field.type_name(),
            indent = 2 * Self::depth(tree, id)
        );
        if let Some(alias) = field.type_alias() {
            line.push_str(&format!(" (as {alias})"));
        }
        self.lines.push(line);
    }
}
