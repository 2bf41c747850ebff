//! # Column I/O Interfaces
//!
//! The field layer sits on top of an append-only column store. This module
//! defines the contract between the two: the on-disk element types
//! ([`ColumnType`]), the write- and read-side traits ([`ColumnSink`],
//! [`ColumnSource`]), and the small index vocabulary shared by both
//! (entry/element addressing, cluster-relative positions, switch records).
//!
//! ## Columns and clusters
//!
//! A column is a typed, append-only sequence of primitive elements. Columns
//! are grouped into **clusters**: units of commit-and-seal. Index columns
//! carry cluster-local cumulative element counts, so their values reset at
//! every cluster boundary; all cluster-relative positions in this module are
//! expressed as a [`ClusterIndex`].
//!
//! ## Split encodings
//!
//! Fixed-width column types come in a plain and a byte-interleaved "split"
//! flavor. The split flavor improves compressibility and differs only in
//! the packed page layout; the logical element value is identical. The
//! field layer treats the two as interchangeable during representation
//! negotiation and may rewrite one into the other (see
//! `auto_adjust_column_types`).
//!
//! An in-memory reference implementation of both traits lives in
//! [`memory`]; production page stores plug in behind the same traits.

pub mod memory;

use parking_lot::RwLockReadGuard;

use crate::meta::Descriptor;

pub use memory::{MemoryPageSink, MemoryPageSource};

/// On-disk element type of a single column.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bit,
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Real32,
    Real64,
    Index32,
    Index64,
    Switch,
    SplitInt16,
    SplitUInt16,
    SplitInt32,
    SplitUInt32,
    SplitInt64,
    SplitUInt64,
    SplitReal32,
    SplitReal64,
    SplitIndex32,
    SplitIndex64,
}

impl ColumnType {
    /// Encoded size of one element in bytes. Bit elements are packed eight
    /// per byte on disk; for accounting purposes they count as one byte.
    pub fn packed_size(&self) -> usize {
        match self {
            ColumnType::Bit | ColumnType::Char | ColumnType::Int8 | ColumnType::UInt8 => 1,
            ColumnType::Int16
            | ColumnType::UInt16
            | ColumnType::SplitInt16
            | ColumnType::SplitUInt16 => 2,
            ColumnType::Int32
            | ColumnType::UInt32
            | ColumnType::Real32
            | ColumnType::Index32
            | ColumnType::SplitInt32
            | ColumnType::SplitUInt32
            | ColumnType::SplitReal32
            | ColumnType::SplitIndex32 => 4,
            ColumnType::Int64
            | ColumnType::UInt64
            | ColumnType::Real64
            | ColumnType::Index64
            | ColumnType::SplitInt64
            | ColumnType::SplitUInt64
            | ColumnType::SplitReal64
            | ColumnType::SplitIndex64 => 8,
            ColumnType::Switch => 12,
        }
    }

    /// True for index-column types (cluster-local cumulative counts).
    pub fn is_index(&self) -> bool {
        matches!(
            self,
            ColumnType::Index32
                | ColumnType::Index64
                | ColumnType::SplitIndex32
                | ColumnType::SplitIndex64
        )
    }

    /// Rewrites a split encoding to its plain counterpart; identity for
    /// everything else.
    pub fn unsplit(&self) -> ColumnType {
        match self {
            ColumnType::SplitIndex64 => ColumnType::Index64,
            ColumnType::SplitIndex32 => ColumnType::Index32,
            ColumnType::SplitReal64 => ColumnType::Real64,
            ColumnType::SplitReal32 => ColumnType::Real32,
            ColumnType::SplitInt64 => ColumnType::Int64,
            ColumnType::SplitInt32 => ColumnType::Int32,
            ColumnType::SplitInt16 => ColumnType::Int16,
            ColumnType::SplitUInt64 => ColumnType::UInt64,
            ColumnType::SplitUInt32 => ColumnType::UInt32,
            ColumnType::SplitUInt16 => ColumnType::UInt16,
            other => *other,
        }
    }

    /// Narrows 64-bit index encodings to their 32-bit counterparts;
    /// identity for everything else.
    pub fn narrow_index(&self) -> ColumnType {
        match self {
            ColumnType::SplitIndex64 => ColumnType::SplitIndex32,
            ColumnType::Index64 => ColumnType::Index32,
            other => *other,
        }
    }

    /// Display name used in negotiation failure messages.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Bit => "Bit",
            ColumnType::Char => "Char",
            ColumnType::Int8 => "Int8",
            ColumnType::UInt8 => "UInt8",
            ColumnType::Int16 => "Int16",
            ColumnType::UInt16 => "UInt16",
            ColumnType::Int32 => "Int32",
            ColumnType::UInt32 => "UInt32",
            ColumnType::Int64 => "Int64",
            ColumnType::UInt64 => "UInt64",
            ColumnType::Real32 => "Real32",
            ColumnType::Real64 => "Real64",
            ColumnType::Index32 => "Index32",
            ColumnType::Index64 => "Index64",
            ColumnType::Switch => "Switch",
            ColumnType::SplitInt16 => "SplitInt16",
            ColumnType::SplitUInt16 => "SplitUInt16",
            ColumnType::SplitInt32 => "SplitInt32",
            ColumnType::SplitUInt32 => "SplitUInt32",
            ColumnType::SplitInt64 => "SplitInt64",
            ColumnType::SplitUInt64 => "SplitUInt64",
            ColumnType::SplitReal32 => "SplitReal32",
            ColumnType::SplitReal64 => "SplitReal64",
            ColumnType::SplitIndex32 => "SplitIndex32",
            ColumnType::SplitIndex64 => "SplitIndex64",
        }
    }
}

/// Identifier of a field in the on-disk descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OnDiskId(pub u64);

/// Handle to a bound column, issued by a sink or source at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnId(pub u32);

/// Cluster-relative element position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterIndex {
    pub cluster: u64,
    pub index: u64,
}

impl ClusterIndex {
    pub const INVALID_INDEX: u64 = u64::MAX;

    pub fn new(cluster: u64, index: u64) -> Self {
        Self { cluster, index }
    }

    /// The "no such element" sentinel returned for null nullable entries.
    pub fn invalid() -> Self {
        Self { cluster: 0, index: Self::INVALID_INDEX }
    }

    pub fn is_valid(&self) -> bool {
        self.index != Self::INVALID_INDEX
    }
}

impl std::ops::Add<u64> for ClusterIndex {
    type Output = ClusterIndex;

    fn add(self, rhs: u64) -> ClusterIndex {
        ClusterIndex::new(self.cluster, self.index + rhs)
    }
}

/// Element (or entry) address: either a global position or a
/// cluster-relative one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementIndex {
    Global(u64),
    Cluster(ClusterIndex),
}

impl From<u64> for ElementIndex {
    fn from(global: u64) -> Self {
        ElementIndex::Global(global)
    }
}

impl From<ClusterIndex> for ElementIndex {
    fn from(index: ClusterIndex) -> Self {
        ElementIndex::Cluster(index)
    }
}

/// One record of a variant switch column: the cluster-local position of the
/// active alternative's value, and the alternative tag (0 = none held).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchValue {
    pub index: u64,
    pub tag: u32,
}

impl SwitchValue {
    pub fn new(index: u64, tag: u32) -> Self {
        Self { index, tag }
    }
}

/// Options honored by the write side of the binding protocol.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    compression: u32,
    small_clusters: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self { compression: 1, small_clusters: false }
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = level;
        self
    }

    pub fn with_small_clusters(mut self, small: bool) -> Self {
        self.small_clusters = small;
        self
    }

    pub fn compression(&self) -> u32 {
        self.compression
    }

    pub fn has_small_clusters(&self) -> bool {
        self.small_clusters
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Write side of the column store.
///
/// A sink hands out column handles at connect time and accepts raw packed
/// elements thereafter. It also owns the descriptor under construction:
/// every field registers itself before adding columns so that the read side
/// can negotiate representations later.
pub trait ColumnSink {
    fn write_options(&self) -> WriteOptions;

    /// Registers a field in the descriptor and returns its on-disk id.
    fn register_field(
        &mut self,
        qualified_name: &str,
        type_name: &str,
        type_alias: Option<&str>,
        type_version: u32,
    ) -> OnDiskId;

    /// Creates a column of the given type owned by `field`. The principal
    /// column passes a non-zero `first_element_index` when the tree is
    /// connected mid-dataset.
    fn add_column(
        &mut self,
        field: OnDiskId,
        ty: ColumnType,
        index_in_field: u32,
        first_element_index: u64,
    ) -> ColumnId;

    /// Appends one packed element.
    fn append(&mut self, column: ColumnId, element: &[u8]);

    /// Appends `count` contiguous elements from `data`.
    fn append_many(&mut self, column: ColumnId, data: &[u8], count: u64);

    /// Seals the current cluster on every column.
    fn commit_cluster(&mut self);

    /// Forces buffered pages downstream.
    fn flush(&mut self, column: ColumnId);
}

/// Scoped acquisition of the descriptor snapshot used during column-type
/// negotiation.
pub type DescriptorGuard<'a> = RwLockReadGuard<'a, Descriptor>;

/// Read side of the column store.
pub trait ColumnSource {
    /// Acquires the shared descriptor for the duration of negotiation.
    fn descriptor(&self) -> DescriptorGuard<'_>;

    /// Binds the column at position `index_in_field` of descriptor field
    /// `field` and returns its handle.
    fn connect(&mut self, field: OnDiskId, index_in_field: u32) -> eyre::Result<ColumnId>;

    /// Decodes an index-column entry into `(collection start, count)`.
    fn collection_info(&self, column: ColumnId, at: ElementIndex) -> (ClusterIndex, u64);

    /// Decodes a switch-column entry into `(within-tag index, tag)`.
    fn switch_info(&self, column: ColumnId, at: ElementIndex) -> (ClusterIndex, u32);

    /// Translates a global element position into a cluster-relative one.
    fn cluster_index_of(&self, column: ColumnId, global_index: u64) -> ClusterIndex;

    /// Reads one decoded element into `to`.
    fn read(&self, column: ColumnId, at: ElementIndex, to: &mut [u8]);

    /// Bulk-reads `count` contiguous decoded elements starting at `start`.
    fn read_bulk(&self, column: ColumnId, start: ClusterIndex, count: u64, to: &mut [u8]);

    /// Reads one element of a bit column.
    fn read_bit(&self, column: ColumnId, at: ElementIndex) -> bool;
}
