//! # Field Trees
//!
//! A **field** is a node in the schema tree of a dataset: it represents one
//! typed slot of a record or collection and knows how to move values of
//! that slot between memory and a set of typed columns. This module is the
//! heart of the serialization engine:
//!
//! - [`FieldTree`] owns the nodes of one schema tree in an id-addressed
//!   arena and carries the whole public contract: factory construction from
//!   type names, deep cloning, column binding against sinks and sources,
//!   per-entry append/read, and the value lifecycle (placement
//!   construction, destruction, split into child bindings).
//! - Each node is a [`Field`]: a common header (name, type name, structure,
//!   traits, children, bound columns) plus a kind-specific arm holding the
//!   auxiliary state (member offsets for records, element size for vectors,
//!   the tag offset for variants, proxy handles for proxied containers).
//!
//! ## Append and read
//!
//! On write, a value given as an opaque address is walked top-down: each
//! node appends elements to its columns and returns the number of bytes it
//! contributed. Appends within one entry must be issued in field-tree
//! pre-order so that index columns stay monotonically non-decreasing. On
//! read, a node fetches the column ranges for the requested entry,
//! reconstructs children in place (destroying or constructing elements as
//! collection sizes change), and stitches the result into the parent
//! layout.
//!
//! ## Simple fields
//!
//! A field is *simple* when it maps to exactly one column whose element
//! layout equals the in-memory value layout. Simple fields append and read
//! with a single copy into the principal column; installing a read
//! callback disables that fast path.
//!
//! ## Binding
//!
//! Binding is one-shot. Connecting to a sink auto-adjusts the column
//! representation to the write options and generates columns from the
//! chosen representative; connecting to a source negotiates the on-disk
//! column types against the kind's deserialization table and fails naming
//! the qualified field and the on-disk types when no row matches.

mod bitset;
mod collection;
mod factory;
mod inline_vec;
mod leaf;
mod lifecycle;
mod node;
mod nullable;
mod record;
mod representation;
mod string;
mod tree;
mod variant;
mod visitor;


pub use node::{Column, Field, PrimitiveKind, RecordFlavor};
pub use representation::{Representation, Representations};
pub use tree::{FieldTree, SharedSink, SharedSource};
pub use visitor::{FieldVisitor, SchemaPrinter};

pub(crate) use node::FieldKind;

/// Identifier of a node inside its [`FieldTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(pub(crate) u32);

impl FieldId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Coarse shape of a field, driving entry-to-element index conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStructure {
    Leaf,
    Record,
    Collection,
    Variant,
}

/// Field trait flags.
pub mod field_traits {
    /// The in-memory layout equals the column element layout; the field can
    /// be mapped directly onto column pages.
    pub const MAPPABLE: u32 = 0x01;
    /// Placement construction is a no-op (or plain zeroing).
    pub const TRIVIALLY_CONSTRUCTIBLE: u32 = 0x02;
    /// Destruction is a no-op.
    pub const TRIVIALLY_DESTRUCTIBLE: u32 = 0x04;
    /// The full value is memcpy-safe: trivially constructible and
    /// destructible with no indirections anywhere in the layout.
    pub const TRIVIAL_TYPE: u32 = 0x08;

    pub const ALL: u32 =
        MAPPABLE | TRIVIALLY_CONSTRUCTIBLE | TRIVIALLY_DESTRUCTIBLE | TRIVIAL_TYPE;
}

/// Post-read hook invoked on the destination address.
pub type ReadCallback = Box<dyn Fn(*mut u8)>;

/// Name reserved for base-class children of reflected records.
pub(crate) fn base_child_name(i: usize) -> String {
    format!("__base_{i}__")
}
