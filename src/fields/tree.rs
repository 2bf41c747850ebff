//! The field tree: an id-addressed arena of field nodes carrying the
//! public serialization contract.

use std::sync::Arc;

use eyre::{bail, ensure, Result};
use parking_lot::{Mutex, RwLock};

use crate::fields::{
    factory, leaf, lifecycle, nullable, record, representation, string, variant,
    bitset, collection, inline_vec,
    Field, FieldId, FieldKind, FieldStructure, ReadCallback, Representation,
};
use crate::io::{
    ClusterIndex, ColumnSink, ColumnSource, ColumnType, ElementIndex, OnDiskId, WriteOptions,
};
use crate::meta::TypeRegistry;
use crate::types::{canonical_type_name, normalize_type_name};
use crate::values::{alloc_value, Value};

/// Write-side backend shared by every bound column of a tree.
pub type SharedSink = Arc<Mutex<dyn ColumnSink>>;

/// Read-side backend shared by every bound column of a tree.
pub type SharedSource = Arc<RwLock<dyn ColumnSource>>;

/// Dispatch tag mirroring [`FieldKind`] without borrowing its payload.
#[derive(Clone, Copy, PartialEq, Eq)]
enum KindTag {
    Root,
    Primitive,
    Cardinality,
    String,
    Enum,
    Record,
    Class,
    Array,
    Vector,
    InlineVector,
    BoolVector,
    Bitset,
    Variant,
    Pointer,
    Proxy,
    Group,
}

impl FieldKind {
    fn tag(&self) -> KindTag {
        match self {
            FieldKind::Root => KindTag::Root,
            FieldKind::Primitive(_) => KindTag::Primitive,
            FieldKind::Cardinality { .. } => KindTag::Cardinality,
            FieldKind::String { .. } => KindTag::String,
            FieldKind::Enum => KindTag::Enum,
            FieldKind::Record { .. } => KindTag::Record,
            FieldKind::Class { .. } => KindTag::Class,
            FieldKind::Array { .. } => KindTag::Array,
            FieldKind::Vector { .. } => KindTag::Vector,
            FieldKind::InlineVector { .. } => KindTag::InlineVector,
            FieldKind::BoolVector { .. } => KindTag::BoolVector,
            FieldKind::Bitset { .. } => KindTag::Bitset,
            FieldKind::Variant { .. } => KindTag::Variant,
            FieldKind::Pointer { .. } => KindTag::Pointer,
            FieldKind::Proxy { .. } => KindTag::Proxy,
            FieldKind::CollectionGroup { .. } => KindTag::Group,
        }
    }
}

/// A schema tree plus its column binding. Node 0 is the tree's root field.
pub struct FieldTree {
    pub(crate) nodes: Vec<Field>,
    sink: Option<SharedSink>,
    source: Option<SharedSource>,
}

impl FieldTree {
    /// Factory entry point: builds the field (and its subfields) for the
    /// given type name.
    pub fn create(name: &str, type_name: &str, registry: &TypeRegistry) -> Result<FieldTree> {
        Self::ensure_valid_field_name(name)?;
        let alias = normalize_type_name(type_name);
        let canonical = normalize_type_name(&canonical_type_name(&alias, registry));
        let mut tree = FieldTree { nodes: Vec::new(), sink: None, source: None };
        factory::build(&mut tree, None, name, &canonical, &alias, registry)?;
        Ok(tree)
    }

    /// A tree holding only the nameless model root, ready for
    /// [`FieldTree::attach`].
    pub fn new_root() -> FieldTree {
        let mut tree = FieldTree { nodes: Vec::new(), sink: None, source: None };
        tree.push_node(
            Field::new("", "", FieldStructure::Record, false, 0, FieldKind::Root),
            None,
        );
        tree
    }

    /// A by-layout record over explicitly supplied item fields: offsets
    /// are computed C-style, with trailing padding for the strictest item
    /// alignment.
    pub fn create_record(name: &str, items: Vec<FieldTree>) -> Result<FieldTree> {
        Self::ensure_valid_field_name(name)?;
        let mut tree = FieldTree { nodes: Vec::new(), sink: None, source: None };
        let id = tree.push_node(
            Field::new(
                name,
                "",
                FieldStructure::Record,
                false,
                0,
                FieldKind::Record {
                    flavor: crate::fields::RecordFlavor::Record,
                    offsets: Vec::new(),
                    size: 0,
                    align: 1,
                },
            ),
            None,
        );
        for item in items {
            tree.attach(id, item)?;
        }
        factory::finalize_record(&mut tree, id, crate::fields::RecordFlavor::Record);
        Ok(tree)
    }

    /// Turns a model-root tree into a legacy collection grouping: the
    /// root's children stay exposed at the current level, behind an index
    /// column fed from the writer-shared entry counter.
    pub fn into_collection_group(
        mut self,
        name: &str,
        counter: Arc<Mutex<u64>>,
    ) -> Result<FieldTree> {
        Self::ensure_valid_field_name(name)?;
        ensure!(
            matches!(self.nodes[0].kind, FieldKind::Root),
            "collection groupings are hoisted from a model root tree"
        );
        let children = std::mem::take(&mut self.nodes[0].children);
        let mut node = Field::new(
            name,
            "",
            FieldStructure::Collection,
            false,
            0,
            FieldKind::CollectionGroup { counter },
        );
        node.children = children;
        self.nodes[0] = node;
        Ok(self)
    }

    /// A field name is non-empty and contains no `.`.
    pub fn ensure_valid_field_name(name: &str) -> Result<()> {
        if name.is_empty() {
            bail!("name cannot be empty string \"\"");
        }
        if name.contains('.') {
            bail!("name '{}' cannot contain dot characters '.'", name);
        }
        Ok(())
    }

    pub fn root(&self) -> FieldId {
        FieldId(0)
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.nodes[id.index()]
    }

    pub(crate) fn kind(&self, id: FieldId) -> &FieldKind {
        &self.nodes[id.index()].kind
    }

    pub(crate) fn kind_mut(&mut self, id: FieldId) -> &mut FieldKind {
        &mut self.nodes[id.index()].kind
    }

    pub(crate) fn child(&self, id: FieldId, i: usize) -> FieldId {
        self.nodes[id.index()].children[i]
    }

    pub(crate) fn push_node(&mut self, mut field: Field, parent: Option<FieldId>) -> FieldId {
        let id = FieldId(self.nodes.len() as u32);
        field.parent = parent;
        self.nodes.push(field);
        if let Some(p) = parent {
            self.nodes[p.index()].children.push(id);
        }
        id
    }

    /// Moves `subtree` under `parent`, remapping its node ids.
    pub fn attach(&mut self, parent: FieldId, subtree: FieldTree) -> Result<FieldId> {
        Self::ensure_valid_field_name(&subtree.nodes[0].name)?;
        ensure!(
            self.sink.is_none() && self.source.is_none(),
            "cannot attach to a tree that is already connected"
        );
        let offset = self.nodes.len() as u32;
        let mut subtree = subtree;
        for node in subtree.nodes.drain(..) {
            let mut node = node;
            node.parent = node.parent.map(|p| FieldId(p.0 + offset));
            for c in &mut node.children {
                *c = FieldId(c.0 + offset);
            }
            self.nodes.push(node);
        }
        let new_root = FieldId(offset);
        self.nodes[new_root.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(new_root);
        Ok(new_root)
    }

    /// Deep clone with a new root name. Children are recreated rather than
    /// copied: column bindings and cluster-local counters do not carry
    /// over, while type aliases, descriptions, on-disk ids, and the chosen
    /// representative do.
    pub fn clone_named(&self, new_name: &str) -> FieldTree {
        let mut nodes: Vec<Field> = self
            .nodes
            .iter()
            .map(|f| {
                let mut clone = Field::new(
                    f.name.clone(),
                    f.type_name.clone(),
                    f.structure,
                    f.is_simple && f.read_callbacks.is_empty(),
                    f.n_repetitions,
                    f.kind.clone_unbound(),
                );
                clone.type_alias = f.type_alias.clone();
                clone.description = f.description.clone();
                clone.traits = f.traits;
                clone.parent = f.parent;
                clone.children = f.children.clone();
                clone.on_disk_id = f.on_disk_id;
                // The representative aliases a static table, so the pointer
                // itself is copied.
                clone.representative = f.representative;
                clone
            })
            .collect();
        nodes[0].name = new_name.to_string();
        FieldTree { nodes, sink: None, source: None }
    }

    /// `.`-joined ancestor names, root-first; nameless roots are skipped.
    pub fn qualified_name(&self, id: FieldId) -> String {
        let mut result = self.field(id).name.clone();
        let mut cursor = self.field(id).parent;
        while let Some(p) = cursor {
            let f = self.field(p);
            if !f.name.is_empty() {
                result = format!("{}.{}", f.name, result);
            }
            cursor = f.parent;
        }
        result
    }

    /// Pre-order traversal of the subtree rooted at `id`, including `id`.
    pub fn descendants(&self, id: FieldId) -> Vec<FieldId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            result.push(cur);
            for c in self.field(cur).children.iter().rev() {
                stack.push(*c);
            }
        }
        result
    }

    /// Pre-order traversal of the whole tree.
    pub fn iter(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.descendants(self.root()).into_iter()
    }

    pub fn set_description(&mut self, id: FieldId, description: impl Into<String>) {
        self.node_mut(id).description = Some(description.into());
    }

    pub fn set_on_disk_id(&mut self, id: FieldId, on_disk_id: OnDiskId) {
        self.node_mut(id).on_disk_id = Some(on_disk_id);
    }

    /// Class fields report their registered version; everything else is
    /// version zero.
    pub fn type_version(&self, id: FieldId) -> u32 {
        match self.kind(id) {
            FieldKind::Class { info, .. } => info.type_version,
            FieldKind::Proxy { info, .. } => info.type_version,
            _ => 0,
        }
    }

    /// For cardinality fields: whether the 64-bit flavor was requested.
    pub fn cardinality_is_wide(&self, id: FieldId) -> Option<bool> {
        match self.kind(id) {
            FieldKind::Cardinality { wide } => Some(*wide),
            _ => None,
        }
    }

    // ---- column representations ------------------------------------------

    pub fn representations(&self, id: FieldId) -> &'static crate::fields::Representations {
        representation::representations_for(self.kind(id))
    }

    /// The chosen representation, falling back to the serialization
    /// default.
    pub fn column_representative(&self, id: FieldId) -> &'static Representation {
        match self.field(id).representative {
            Some(rep) => rep,
            None => self.representations(id).serialization_default(),
        }
    }

    pub fn has_default_column_representative(&self, id: FieldId) -> bool {
        self.field(id).representative.is_none()
    }

    /// Fixes the representation used for writing. Only valid before the
    /// field is connected, and only for representations in the
    /// serialization set.
    pub fn set_column_representative(&mut self, id: FieldId, rep: &[ColumnType]) -> Result<()> {
        if !self.field(id).columns.is_empty() {
            bail!(
                "field {}: cannot set column representative once the field is connected",
                self.qualified_name(id)
            );
        }
        let table = self.representations(id);
        match table.serialization_types().iter().find(|r| r.as_slice() == rep) {
            Some(row) => {
                self.node_mut(id).representative = Some(row);
                Ok(())
            }
            None => bail!(
                "field {}: invalid column representative",
                self.qualified_name(id)
            ),
        }
    }

    /// Adapts the default representation to the write options: disable
    /// split encodings when compression is off, narrow 64-bit index
    /// encodings in small-cluster mode, and honor the `Double32_t` storage
    /// hint. Narrowing applies only while the representative is still the
    /// default.
    pub fn auto_adjust_column_types(&mut self, id: FieldId, options: &WriteOptions) -> Result<()> {
        let had_default = self.has_default_column_representative(id);
        if options.compression() == 0 && had_default {
            let rep: Vec<ColumnType> =
                self.column_representative(id).iter().map(|t| t.unsplit()).collect();
            self.set_column_representative(id, &rep)?;
        }
        if options.has_small_clusters() && had_default {
            let rep: Vec<ColumnType> =
                self.column_representative(id).iter().map(|t| t.narrow_index()).collect();
            self.set_column_representative(id, &rep)?;
        }
        if self.field(id).type_alias.as_deref() == Some("Double32_t") {
            self.set_column_representative(id, &[ColumnType::SplitReal32])?;
        }
        Ok(())
    }

    // ---- read callbacks --------------------------------------------------

    /// Registers a post-read hook; returns its removal handle. Installing
    /// any callback disables the simple path.
    pub fn add_read_callback(&mut self, id: FieldId, callback: ReadCallback) -> usize {
        let node = self.node_mut(id);
        node.read_callbacks.push(callback);
        node.is_simple = false;
        node.read_callbacks.len() - 1
    }

    pub fn remove_read_callback(&mut self, id: FieldId, handle: usize) {
        let node = self.node_mut(id);
        node.read_callbacks.remove(handle);
        node.is_simple =
            node.has_trait(crate::fields::field_traits::MAPPABLE) && node.read_callbacks.is_empty();
    }

    // ---- entry/element index conversion ----------------------------------

    /// Column element index of the given entry for this field: walking
    /// towards the root, the index is multiplied by the repetition count of
    /// every fixed-length array on the way; a Collection or Variant
    /// ancestor resets it to zero (its children are indexed by their own
    /// collection offsets).
    pub fn entry_to_column_element_index(&self, id: FieldId, entry: u64) -> u64 {
        let mut result = entry;
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let f = self.field(cur);
            if let Some(p) = f.parent {
                if matches!(
                    self.field(p).structure,
                    FieldStructure::Collection | FieldStructure::Variant
                ) {
                    return 0;
                }
            }
            result *= f.n_repetitions.max(1) as u64;
            cursor = f.parent;
        }
        result
    }

    // ---- binding ---------------------------------------------------------

    /// Connects every field of the tree to a sink, generating columns from
    /// the (auto-adjusted) representatives. Binding is one-shot.
    pub fn connect_sink(&mut self, sink: SharedSink, first_entry: u64) -> Result<()> {
        ensure!(
            self.sink.is_none() && self.source.is_none(),
            "field tree is already connected"
        );
        let options = sink.lock().write_options();
        let ids: Vec<FieldId> = self.iter().collect();
        for id in ids {
            debug_assert!(self.field(id).columns.is_empty());
            if matches!(self.kind(id), FieldKind::Cardinality { .. }) {
                bail!(
                    "field {}: cardinality fields cannot be connected to a sink",
                    self.qualified_name(id)
                );
            }
            self.auto_adjust_column_types(id, &options)?;
            let on_disk_id = match self.field(id).on_disk_id {
                Some(existing) => existing,
                None => {
                    let f = self.field(id);
                    let registered = sink.lock().register_field(
                        &self.qualified_name(id),
                        &f.type_name,
                        f.type_alias.as_deref(),
                        self.type_version(id),
                    );
                    self.node_mut(id).on_disk_id = Some(registered);
                    registered
                }
            };
            if matches!(self.kind(id), FieldKind::Pointer { .. }) {
                nullable::prepare_sink_columns(self, id)?;
            }
            let rep = self.column_representative(id);
            for (i, ty) in rep.iter().enumerate() {
                let first = if i == 0 {
                    self.entry_to_column_element_index(id, first_entry)
                } else {
                    0
                };
                let handle = sink.lock().add_column(on_disk_id, *ty, i as u32, first);
                self.node_mut(id).columns.push(crate::fields::Column {
                    ty: *ty,
                    index_in_field: i as u32,
                    handle,
                });
            }
        }
        self.sink = Some(sink);
        Ok(())
    }

    /// Connects every field of the tree to a source, negotiating the
    /// on-disk column types against each kind's deserialization table.
    /// Fields resolve their on-disk ids by qualified name when not already
    /// assigned.
    pub fn connect_source(&mut self, source: SharedSource) -> Result<()> {
        ensure!(
            self.sink.is_none() && self.source.is_none(),
            "field tree is already connected"
        );
        let ids: Vec<FieldId> = self.iter().collect();
        {
            let mut src = source.write();
            for id in ids {
                debug_assert!(self.field(id).columns.is_empty());
                if self.field(id).representative.is_some() {
                    bail!(
                        "field {}: a fixed column representative is only valid when connecting \
                         to a sink",
                        self.qualified_name(id)
                    );
                }
                let qualified = self.qualified_name(id);
                let (on_disk_id, on_disk_types, version) = {
                    let descriptor = src.descriptor();
                    let entry = match self.field(id).on_disk_id {
                        Some(existing) => descriptor.field(existing),
                        None => descriptor.field_by_name(&qualified),
                    };
                    match entry {
                        Some(e) => (e.id, e.column_types(), e.type_version),
                        None => bail!(
                            "no on-disk column information for field `{}`",
                            qualified
                        ),
                    }
                };
                let table = self.representations(id);
                let row = table
                    .deserialization_types()
                    .iter()
                    .find(|r| r.as_slice() == on_disk_types.as_slice());
                let row = match row {
                    Some(row) => row,
                    None => {
                        let names: Vec<&str> = on_disk_types.iter().map(|t| t.name()).collect();
                        bail!(
                            "on-disk column types `{}` for field `{}` cannot be matched",
                            names.join(", "),
                            qualified
                        );
                    }
                };
                {
                    let node = self.node_mut(id);
                    node.on_disk_id = Some(on_disk_id);
                    node.on_disk_type_version = Some(version);
                    node.representative = Some(row);
                }
                for (i, ty) in on_disk_types.iter().enumerate() {
                    let handle = src.connect(on_disk_id, i as u32)?;
                    self.node_mut(id).columns.push(crate::fields::Column {
                        ty: *ty,
                        index_in_field: i as u32,
                        handle,
                    });
                }
                match self.kind(id).tag() {
                    KindTag::Pointer => {
                        let dense = on_disk_types.first() == Some(&ColumnType::Bit);
                        if let FieldKind::Pointer { dense: d, .. } = self.kind_mut(id) {
                            *d = dense;
                        }
                    }
                    KindTag::Class => record::install_schema_rules(self, id, version),
                    _ => {}
                }
            }
        }
        self.source = Some(source);
        Ok(())
    }

    pub(crate) fn sink_handle(&self) -> Result<&SharedSink> {
        match &self.sink {
            Some(sink) => Ok(sink),
            None => bail!("field tree is not connected to a sink"),
        }
    }

    pub(crate) fn source_handle(&self) -> Result<&SharedSource> {
        match &self.source {
            Some(source) => Ok(source),
            None => bail!("field tree is not connected to a source"),
        }
    }

    // ---- column access helpers -------------------------------------------

    pub(crate) fn col(&self, id: FieldId, idx: usize) -> crate::fields::Column {
        self.field(id).columns[idx]
    }

    pub(crate) fn col_append(&self, id: FieldId, idx: usize, element: &[u8]) -> Result<()> {
        let col = self.col(id, idx);
        self.sink_handle()?.lock().append(col.handle, element);
        Ok(())
    }

    pub(crate) fn col_append_many(
        &self,
        id: FieldId,
        idx: usize,
        data: &[u8],
        count: u64,
    ) -> Result<()> {
        let col = self.col(id, idx);
        self.sink_handle()?.lock().append_many(col.handle, data, count);
        Ok(())
    }

    pub(crate) fn col_collection_info(
        &self,
        id: FieldId,
        idx: usize,
        at: ElementIndex,
    ) -> Result<(ClusterIndex, u64)> {
        let col = self.col(id, idx);
        Ok(self.source_handle()?.read().collection_info(col.handle, at))
    }

    pub(crate) fn col_switch_info(
        &self,
        id: FieldId,
        idx: usize,
        at: ElementIndex,
    ) -> Result<(ClusterIndex, u32)> {
        let col = self.col(id, idx);
        Ok(self.source_handle()?.read().switch_info(col.handle, at))
    }

    pub(crate) fn col_read(
        &self,
        id: FieldId,
        idx: usize,
        at: ElementIndex,
        to: &mut [u8],
    ) -> Result<()> {
        let col = self.col(id, idx);
        self.source_handle()?.read().read(col.handle, at, to);
        Ok(())
    }

    pub(crate) fn col_read_bulk(
        &self,
        id: FieldId,
        idx: usize,
        start: ClusterIndex,
        count: u64,
        to: &mut [u8],
    ) -> Result<()> {
        let col = self.col(id, idx);
        self.source_handle()?.read().read_bulk(col.handle, start, count, to);
        Ok(())
    }

    pub(crate) fn col_read_bit(&self, id: FieldId, idx: usize, at: ElementIndex) -> Result<bool> {
        let col = self.col(id, idx);
        Ok(self.source_handle()?.read().read_bit(col.handle, at))
    }

    pub(crate) fn col_cluster_index_of(
        &self,
        id: FieldId,
        idx: usize,
        global: u64,
    ) -> Result<ClusterIndex> {
        let col = self.col(id, idx);
        Ok(self.source_handle()?.read().cluster_index_of(col.handle, global))
    }

    // ---- append / read ---------------------------------------------------

    /// Appends one entry of this value's field; returns the number of
    /// bytes contributed to the columns.
    pub fn append(&mut self, value: &Value) -> Result<usize> {
        unsafe { self.append_raw(value.field(), value.as_ptr()) }
    }

    /// Appends from a raw address.
    ///
    /// # Safety
    /// `from` must point at a live value laid out as the field's type.
    pub unsafe fn append_raw(&mut self, id: FieldId, from: *const u8) -> Result<usize> {
        self.append_node(id, from)
    }

    pub(crate) fn append_node(&mut self, id: FieldId, from: *const u8) -> Result<usize> {
        let f = &self.nodes[id.index()];
        if f.is_simple {
            debug_assert!(!f.columns.is_empty(), "simple field appended without columns");
            return leaf::append_simple(self, id, from);
        }
        match f.kind.tag() {
            KindTag::Root => bail!("cannot append to the tree root; append its children"),
            KindTag::Cardinality => bail!(
                "field {}: cardinality fields are read-only",
                self.qualified_name(id)
            ),
            KindTag::Primitive => leaf::append_simple(self, id, from),
            KindTag::Enum => {
                let child = self.child(id, 0);
                self.append_node(child, from)
            }
            KindTag::String => string::append(self, id, from),
            KindTag::Record | KindTag::Class => record::append(self, id, from),
            KindTag::Array => collection::append_array(self, id, from),
            KindTag::Vector => collection::append_vector(self, id, from),
            KindTag::InlineVector => inline_vec::append(self, id, from),
            KindTag::BoolVector => collection::append_bool_vector(self, id, from),
            KindTag::Bitset => bitset::append(self, id, from),
            KindTag::Variant => variant::append(self, id, from),
            KindTag::Pointer => nullable::append(self, id, from),
            KindTag::Proxy => collection::append_proxy(self, id, from),
            KindTag::Group => collection::append_group(self, id),
        }
    }

    /// Reads the given entry into the value. After a successful read, all
    /// post-read callbacks registered for the field run in insertion order
    /// on the destination.
    pub fn read(&self, value: &mut Value, entry: u64) -> Result<()> {
        unsafe { self.read_raw(value.field(), entry, value.as_ptr()) }
    }

    /// Reads into a raw address.
    ///
    /// # Safety
    /// `to` must point at a live, constructed value laid out as the
    /// field's type.
    pub unsafe fn read_raw(&self, id: FieldId, entry: u64, to: *mut u8) -> Result<()> {
        self.read_node(id, ElementIndex::Global(entry), to)
    }

    pub(crate) fn read_node(&self, id: FieldId, at: ElementIndex, to: *mut u8) -> Result<()> {
        let f = &self.nodes[id.index()];
        if f.is_simple {
            debug_assert!(!f.columns.is_empty(), "simple field read without columns");
            return leaf::read_simple(self, id, at, to);
        }
        match f.kind.tag() {
            KindTag::Root => bail!("cannot read into the tree root; read its children"),
            KindTag::Group => bail!("collection groupings are written through their children"),
            KindTag::Primitive => leaf::read_simple(self, id, at, to)?,
            KindTag::Cardinality => leaf::read_cardinality(self, id, at, to)?,
            KindTag::Enum => {
                let child = self.child(id, 0);
                self.read_node(child, at, to)?;
            }
            KindTag::String => string::read(self, id, at, to)?,
            KindTag::Record | KindTag::Class => record::read(self, id, at, to)?,
            KindTag::Array => collection::read_array(self, id, at, to)?,
            KindTag::Vector => collection::read_vector(self, id, at, to)?,
            KindTag::InlineVector => inline_vec::read(self, id, at, to)?,
            KindTag::BoolVector => collection::read_bool_vector(self, id, at, to)?,
            KindTag::Bitset => bitset::read(self, id, at, to)?,
            KindTag::Variant => variant::read(self, id, at, to)?,
            KindTag::Pointer => nullable::read(self, id, at, to)?,
            KindTag::Proxy => collection::read_proxy(self, id, at, to)?,
        }
        for callback in &f.read_callbacks {
            callback(to);
        }
        Ok(())
    }

    /// For nullable fields: the cluster-relative item position of the
    /// given entry, or an invalid index when the entry is null.
    pub fn item_index(&self, id: FieldId, global_index: u64) -> Result<ClusterIndex> {
        match self.kind(id) {
            FieldKind::Pointer { .. } => nullable::item_index(self, id, ElementIndex::Global(global_index)),
            _ => bail!(
                "field {}: item_index is only defined for nullable fields",
                self.qualified_name(id)
            ),
        }
    }

    // ---- values ----------------------------------------------------------

    pub fn value_size(&self, id: FieldId) -> usize {
        lifecycle::value_size(self, id)
    }

    pub fn alignment(&self, id: FieldId) -> usize {
        lifecycle::alignment(self, id)
    }

    /// Allocates and placement-constructs an owning value of this field.
    pub fn new_value(&self, id: FieldId) -> Value {
        let ptr = alloc_value(self.value_size(id), self.alignment(id));
        lifecycle::construct_at(self, id, ptr);
        Value::new(id, ptr, true)
    }

    /// Binds a non-owning value over caller-owned storage.
    ///
    /// # Safety
    /// `ptr` must point at a live value laid out as the field's type and
    /// outlive the binding.
    pub unsafe fn bind_value(&self, id: FieldId, ptr: *mut u8) -> Value {
        Value::new(id, ptr, false)
    }

    /// Placement-constructs a value in caller-owned storage.
    ///
    /// # Safety
    /// `ptr` must be valid, suitably aligned storage of at least
    /// `value_size(id)` bytes.
    pub unsafe fn construct_value(&self, id: FieldId, ptr: *mut u8) {
        lifecycle::construct_at(self, id, ptr);
    }

    /// Destroys a value; owning values also release their outer
    /// allocation.
    pub fn destroy_value(&self, value: Value) {
        let dtor_only = !value.is_owning();
        lifecycle::destroy_at(self, value.field(), value.as_ptr(), dtor_only);
    }

    /// Non-owning bindings of the children over the supplied value.
    pub fn split_value(&self, value: &Value) -> Vec<Value> {
        lifecycle::split_value(self, value.field(), value.as_ptr())
    }

    // ---- cluster and flush control ---------------------------------------

    /// Resets every cluster-local counter in the tree and seals the
    /// current cluster in the bound sink.
    pub fn commit_cluster(&mut self) {
        for node in &mut self.nodes {
            match &mut node.kind {
                FieldKind::String { index } => *index = 0,
                FieldKind::Vector { n_written, .. }
                | FieldKind::InlineVector { n_written, .. }
                | FieldKind::BoolVector { n_written }
                | FieldKind::Proxy { n_written, .. }
                | FieldKind::Pointer { n_written, .. } => *n_written = 0,
                FieldKind::Variant { n_written, .. } => n_written.fill(0),
                FieldKind::CollectionGroup { counter } => *counter.lock() = 0,
                _ => {}
            }
        }
        if let Some(sink) = &self.sink {
            sink.lock().commit_cluster();
        }
    }

    /// Forces buffered pages downstream for every bound column.
    pub fn flush(&self) {
        if let Some(sink) = &self.sink {
            let mut sink = sink.lock();
            for node in &self.nodes {
                for col in &node.columns {
                    sink.flush(col.handle);
                }
            }
        }
    }
}

impl Drop for FieldTree {
    fn drop(&mut self) {
        // Default item values of dense nullable fields are owned by the
        // tree and torn down through the item field.
        let mut defaults: Vec<(FieldId, *mut u8)> = Vec::new();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if let FieldKind::Pointer { default_item, .. } = &mut node.kind {
                if let Some(ptr) = default_item.take() {
                    defaults.push((FieldId(i as u32), ptr));
                }
            }
        }
        for (id, ptr) in defaults {
            let item = self.child(id, 0);
            lifecycle::destroy_at(self, item, ptr, false);
        }
    }
}
