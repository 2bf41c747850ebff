//! Field nodes: the common header shared by every kind plus the tagged
//! kind-specific state.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::fields::{field_traits, FieldId, FieldStructure, ReadCallback, Representation};
use crate::io::{ColumnId, ColumnType, OnDiskId};
use crate::meta::{ClassInfo, CollectionProxy};

/// Built-in fixed-width leaf types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Bool,
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl PrimitiveKind {
    pub fn from_name(name: &str) -> Option<PrimitiveKind> {
        Some(match name {
            "bool" => PrimitiveKind::Bool,
            "char" => PrimitiveKind::Char,
            "i8" => PrimitiveKind::I8,
            "u8" => PrimitiveKind::U8,
            "i16" => PrimitiveKind::I16,
            "u16" => PrimitiveKind::U16,
            "i32" => PrimitiveKind::I32,
            "u32" => PrimitiveKind::U32,
            "i64" => PrimitiveKind::I64,
            "u64" => PrimitiveKind::U64,
            "f32" => PrimitiveKind::F32,
            "f64" => PrimitiveKind::F64,
            _ => return None,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Char => "char",
            PrimitiveKind::I8 => "i8",
            PrimitiveKind::U8 => "u8",
            PrimitiveKind::I16 => "i16",
            PrimitiveKind::U16 => "u16",
            PrimitiveKind::I32 => "i32",
            PrimitiveKind::U32 => "u32",
            PrimitiveKind::I64 => "i64",
            PrimitiveKind::U64 => "u64",
            PrimitiveKind::F32 => "f32",
            PrimitiveKind::F64 => "f64",
        }
    }

    pub fn size(&self) -> usize {
        match self {
            PrimitiveKind::Bool | PrimitiveKind::Char | PrimitiveKind::I8 | PrimitiveKind::U8 => 1,
            PrimitiveKind::I16 | PrimitiveKind::U16 => 2,
            PrimitiveKind::I32 | PrimitiveKind::U32 | PrimitiveKind::F32 => 4,
            PrimitiveKind::I64 | PrimitiveKind::U64 | PrimitiveKind::F64 => 8,
        }
    }

    pub fn alignment(&self) -> usize {
        self.size()
    }
}

/// Distinguishes the product-type flavors sharing the record machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFlavor {
    Record,
    Pair,
    Tuple,
}

/// Kind-specific state of a field node.
pub(crate) enum FieldKind {
    /// Nameless root of a model tree.
    Root,
    Primitive(PrimitiveKind),
    /// Collection-size leaf; `wide` selects the 64-bit flavor.
    Cardinality { wide: bool },
    /// `index` is the cluster-local cumulative character count.
    String { index: u64 },
    /// Wraps a single integer child at offset zero.
    Enum,
    Record {
        flavor: RecordFlavor,
        offsets: Vec<usize>,
        size: usize,
        align: usize,
    },
    Class {
        info: Arc<ClassInfo>,
        /// Byte offsets of the children: bases first, then members.
        offsets: Vec<usize>,
    },
    Array {
        item_size: usize,
        len: usize,
    },
    Vector {
        item_size: usize,
        n_written: u64,
    },
    InlineVector {
        item_size: usize,
        value_size: usize,
        align: usize,
        n_written: u64,
    },
    BoolVector { n_written: u64 },
    Bitset { n_bits: usize },
    Variant {
        max_item_size: usize,
        max_align: usize,
        tag_offset: usize,
        n_written: Vec<u64>,
    },
    /// Nullable unique-ownership pointer. `dense` is decided at column
    /// generation; `default_item` backs null rows of the dense encoding.
    Pointer {
        dense: bool,
        n_written: u64,
        default_item: Option<*mut u8>,
    },
    Proxy {
        info: Arc<ClassInfo>,
        proxy: Arc<CollectionProxy>,
        item_size: usize,
        n_written: u64,
    },
    /// Legacy collection-writer grouping: an index column fed from a
    /// counter shared with the writer.
    CollectionGroup { counter: Arc<Mutex<u64>> },
}

impl FieldKind {
    /// Copy for cloning a tree: kind state is preserved, cluster-local
    /// counters reset, owned default values dropped (the clone is
    /// unbound).
    pub(crate) fn clone_unbound(&self) -> FieldKind {
        match self {
            FieldKind::Root => FieldKind::Root,
            FieldKind::Primitive(p) => FieldKind::Primitive(*p),
            FieldKind::Cardinality { wide } => FieldKind::Cardinality { wide: *wide },
            FieldKind::String { .. } => FieldKind::String { index: 0 },
            FieldKind::Enum => FieldKind::Enum,
            FieldKind::Record { flavor, offsets, size, align } => FieldKind::Record {
                flavor: *flavor,
                offsets: offsets.clone(),
                size: *size,
                align: *align,
            },
            FieldKind::Class { info, offsets } => {
                FieldKind::Class { info: info.clone(), offsets: offsets.clone() }
            }
            FieldKind::Array { item_size, len } => {
                FieldKind::Array { item_size: *item_size, len: *len }
            }
            FieldKind::Vector { item_size, .. } => {
                FieldKind::Vector { item_size: *item_size, n_written: 0 }
            }
            FieldKind::InlineVector { item_size, value_size, align, .. } => FieldKind::InlineVector {
                item_size: *item_size,
                value_size: *value_size,
                align: *align,
                n_written: 0,
            },
            FieldKind::BoolVector { .. } => FieldKind::BoolVector { n_written: 0 },
            FieldKind::Bitset { n_bits } => FieldKind::Bitset { n_bits: *n_bits },
            FieldKind::Variant { max_item_size, max_align, tag_offset, n_written } => {
                FieldKind::Variant {
                    max_item_size: *max_item_size,
                    max_align: *max_align,
                    tag_offset: *tag_offset,
                    n_written: vec![0; n_written.len()],
                }
            }
            FieldKind::Pointer { .. } => {
                FieldKind::Pointer { dense: false, n_written: 0, default_item: None }
            }
            FieldKind::Proxy { info, proxy, item_size, .. } => FieldKind::Proxy {
                info: info.clone(),
                proxy: proxy.clone(),
                item_size: *item_size,
                n_written: 0,
            },
            FieldKind::CollectionGroup { counter } => {
                FieldKind::CollectionGroup { counter: counter.clone() }
            }
        }
    }
}

/// A column bound to a field.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub(crate) ty: ColumnType,
    pub(crate) index_in_field: u32,
    pub(crate) handle: ColumnId,
}

impl Column {
    pub fn column_type(&self) -> ColumnType {
        self.ty
    }

    pub fn index_in_field(&self) -> u32 {
        self.index_in_field
    }

    pub fn handle(&self) -> ColumnId {
        self.handle
    }
}

/// One node of a field tree.
pub struct Field {
    pub(crate) name: String,
    pub(crate) type_name: String,
    pub(crate) type_alias: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) structure: FieldStructure,
    pub(crate) n_repetitions: usize,
    pub(crate) is_simple: bool,
    pub(crate) traits: u32,
    pub(crate) parent: Option<FieldId>,
    pub(crate) children: Vec<FieldId>,
    pub(crate) on_disk_id: Option<OnDiskId>,
    pub(crate) on_disk_type_version: Option<u32>,
    pub(crate) representative: Option<&'static Representation>,
    pub(crate) columns: Vec<Column>,
    pub(crate) read_callbacks: Vec<ReadCallback>,
    pub(crate) kind: FieldKind,
}

impl Field {
    pub(crate) fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        structure: FieldStructure,
        is_simple: bool,
        n_repetitions: usize,
        kind: FieldKind,
    ) -> Field {
        Field {
            name: name.into(),
            type_name: type_name.into(),
            type_alias: None,
            description: None,
            structure,
            n_repetitions,
            is_simple,
            traits: if is_simple { field_traits::MAPPABLE } else { 0 },
            parent: None,
            children: Vec::new(),
            on_disk_id: None,
            on_disk_type_version: None,
            representative: None,
            columns: Vec::new(),
            read_callbacks: Vec::new(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Original user spelling when it differs from the canonical type.
    pub fn type_alias(&self) -> Option<&str> {
        self.type_alias.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn structure(&self) -> FieldStructure {
        self.structure
    }

    /// Declared repetition count; zero for variable-length fields.
    pub fn n_repetitions(&self) -> usize {
        self.n_repetitions
    }

    pub fn is_simple(&self) -> bool {
        self.is_simple
    }

    pub fn traits(&self) -> u32 {
        self.traits
    }

    pub fn parent(&self) -> Option<FieldId> {
        self.parent
    }

    pub fn children(&self) -> &[FieldId] {
        &self.children
    }

    pub fn on_disk_id(&self) -> Option<OnDiskId> {
        self.on_disk_id
    }

    pub fn on_disk_type_version(&self) -> Option<u32> {
        self.on_disk_type_version
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The first bound column, carrying this field's entry-level index.
    pub fn principal_column(&self) -> Option<&Column> {
        self.columns.first()
    }

    pub(crate) fn has_trait(&self, flag: u32) -> bool {
        self.traits & flag != 0
    }
}
