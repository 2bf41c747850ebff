//! # Strata - Columnar Event-Data Serialization
//!
//! Strata stores deeply nested, strongly typed records into typed,
//! append-only columns and reconstructs in-memory values from those
//! columns at read time. This crate is the **field layer** of the engine:
//! the bridge between an in-memory object graph (records, collections,
//! variants, nullables, strings, arrays, bitsets, enums, primitives) and
//! the column I/O layer beneath it.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use strata::{FieldTree, MemoryPageSink, TypeRegistry, WriteOptions};
//!
//! let registry = TypeRegistry::new();
//! let mut field = FieldTree::create("hits", "vec<f32>", &registry)?;
//!
//! let sink = Arc::new(Mutex::new(MemoryPageSink::new(WriteOptions::new())));
//! field.connect_sink(sink.clone(), 0)?;
//!
//! let value = field.new_value(field.root());
//! field.append(&value)?;
//! field.destroy_value(value);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Schema Type Language (types)       │
//! ├─────────────────────────────────────┤
//! │   Field Factory │ Introspection      │
//! ├─────────────────┴───────────────────┤
//! │   Field Tree (append/read/lifecycle) │
//! ├─────────────────────────────────────┤
//! │   Column Binding & Negotiation       │
//! ├─────────────────────────────────────┤
//! │   Column I/O (sink/source traits)    │
//! └─────────────────────────────────────┘
//! ```
//!
//! On write, each field appends elements to one or more columns and
//! returns the byte count it contributed. On read, each field fetches the
//! column ranges of the requested entry and reconstructs children in
//! place, constructing and destroying nested non-trivial values as
//! collection sizes change.
//!
//! ## Module Overview
//!
//! - [`types`]: type-name normalization and template parsing
//! - [`meta`]: introspection registry, schema rules, on-disk descriptor
//! - [`io`]: column element types, sink/source traits, in-memory store
//! - [`values`]: opaque value handles and engine-defined raw layouts
//! - [`fields`]: the field tree, factory, kinds, and visitor
//!
//! ## Concurrency Model
//!
//! A field tree is single-threaded cooperative: one append or read runs
//! to completion before the next starts on the same subtree. Distinct
//! trees are independent; sinks and sources are shared behind
//! `parking_lot` locks for the lifetime of a binding.

pub mod fields;
pub mod io;
pub mod meta;
pub mod types;
pub mod values;

pub use fields::{
    field_traits, Field, FieldId, FieldStructure, FieldTree, FieldVisitor, PrimitiveKind,
    Representation, Representations, SchemaPrinter, SharedSink, SharedSource,
};
pub use io::{
    ClusterIndex, ColumnId, ColumnSink, ColumnSource, ColumnType, ElementIndex, MemoryPageSink,
    MemoryPageSource, OnDiskId, SwitchValue, WriteOptions,
};
pub use meta::{
    ClassInfo, CollectionProxy, Descriptor, MemberInfo, SchemaRule, SchemaRuleKind, TypeRegistry,
};
pub use values::Value;
