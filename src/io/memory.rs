//! # In-Memory Column Store
//!
//! Reference implementation of [`ColumnSink`] and [`ColumnSource`] backed by
//! plain vectors. It implements the full cluster contract (index columns
//! carry cluster-local cumulative counts, positions reset per sealed
//! cluster) and is what the integration tests and downstream prototypes run
//! against; production page stores implement the same traits over mmap'd
//! pages.
//!
//! Elements cross the trait boundary as little-endian packed bytes. Index
//! columns transport a logical `u64` regardless of the chosen 32/64-bit
//! encoding; the encoding width only affects the on-disk packed size
//! reported by [`ColumnType::packed_size`].

use parking_lot::RwLock;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::io::{
    ClusterIndex, ColumnId, ColumnSink, ColumnSource, ColumnType, DescriptorGuard, ElementIndex,
    OnDiskId, SwitchValue, WriteOptions,
};
use crate::meta::{ColumnDescriptor, Descriptor};

/// Packed layout of one switch-column element.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct PackedSwitch {
    index: U64,
    tag: U32,
}

impl SwitchValue {
    pub fn to_le_bytes(&self) -> [u8; 12] {
        let packed = PackedSwitch { index: U64::new(self.index), tag: U32::new(self.tag) };
        let mut out = [0u8; 12];
        out.copy_from_slice(packed.as_bytes());
        out
    }

    pub fn from_le_bytes(bytes: &[u8]) -> SwitchValue {
        let packed = PackedSwitch::read_from_bytes(&bytes[..12]).expect("switch element size");
        SwitchValue { index: packed.index.get(), tag: packed.tag.get() }
    }
}

enum ElementStore {
    /// Fixed-size raw elements (chars, integers, reals).
    Bytes { size: usize, data: Vec<u8> },
    /// Bit-packed boolean elements.
    Bits { data: Vec<u8>, len: u64 },
    /// Index elements, stored as logical u64 counts.
    Indexes(Vec<u64>),
    /// Variant switch records.
    Switches(Vec<SwitchValue>),
}

impl ElementStore {
    fn for_type(ty: ColumnType) -> ElementStore {
        if ty == ColumnType::Bit {
            ElementStore::Bits { data: Vec::new(), len: 0 }
        } else if ty.is_index() {
            ElementStore::Indexes(Vec::new())
        } else if ty == ColumnType::Switch {
            ElementStore::Switches(Vec::new())
        } else {
            ElementStore::Bytes { size: ty.packed_size(), data: Vec::new() }
        }
    }

    fn len(&self) -> u64 {
        match self {
            ElementStore::Bytes { size, data } => (data.len() / size) as u64,
            ElementStore::Bits { len, .. } => *len,
            ElementStore::Indexes(v) => v.len() as u64,
            ElementStore::Switches(v) => v.len() as u64,
        }
    }
}

struct MemColumn {
    ty: ColumnType,
    store: ElementStore,
    /// Cumulative element counts at each sealed cluster boundary.
    cluster_bounds: Vec<u64>,
    first_element_index: u64,
}

impl MemColumn {
    fn new(ty: ColumnType, first_element_index: u64) -> Self {
        Self { ty, store: ElementStore::for_type(ty), cluster_bounds: Vec::new(), first_element_index }
    }

    fn append(&mut self, element: &[u8]) {
        match &mut self.store {
            ElementStore::Bytes { size, data } => {
                assert_eq!(element.len(), *size, "element size mismatch");
                data.extend_from_slice(element);
            }
            ElementStore::Bits { data, len } => {
                let bit = element[0] != 0;
                let pos = *len;
                if pos % 8 == 0 {
                    data.push(0);
                }
                if bit {
                    *data.last_mut().unwrap() |= 1 << (pos % 8);
                }
                *len += 1;
            }
            ElementStore::Indexes(v) => {
                v.push(u64::from_le_bytes(element[..8].try_into().unwrap()));
            }
            ElementStore::Switches(v) => {
                v.push(SwitchValue::from_le_bytes(element));
            }
        }
    }

    /// Cluster containing the given global element position, together with
    /// the cluster's first global position. Elements past the last sealed
    /// boundary belong to the open cluster.
    fn cluster_of(&self, global: u64) -> (u64, u64) {
        let cluster = self.cluster_bounds.partition_point(|&b| b <= global) as u64;
        let start = if cluster == 0 { 0 } else { self.cluster_bounds[cluster as usize - 1] };
        (cluster, start)
    }

    fn cluster_start(&self, cluster: u64) -> u64 {
        if cluster == 0 {
            0
        } else {
            self.cluster_bounds[cluster as usize - 1]
        }
    }

    fn resolve(&self, at: ElementIndex) -> u64 {
        match at {
            ElementIndex::Global(g) => g,
            ElementIndex::Cluster(ci) => self.cluster_start(ci.cluster) + ci.index,
        }
    }

    fn read(&self, at: ElementIndex, to: &mut [u8]) {
        let abs = self.resolve(at) as usize;
        match &self.store {
            ElementStore::Bytes { size, data } => {
                to[..*size].copy_from_slice(&data[abs * size..(abs + 1) * size]);
            }
            ElementStore::Bits { data, .. } => {
                to[0] = (data[abs / 8] >> (abs % 8)) & 1;
            }
            ElementStore::Indexes(v) => {
                to[..8].copy_from_slice(&v[abs].to_le_bytes());
            }
            ElementStore::Switches(_) => {
                panic!("switch columns are decoded via switch_info");
            }
        }
    }
}

/// Write side of the in-memory store.
pub struct MemoryPageSink {
    options: WriteOptions,
    descriptor: Descriptor,
    columns: Vec<MemColumn>,
}

impl MemoryPageSink {
    pub fn new(options: WriteOptions) -> Self {
        Self { options, descriptor: Descriptor::new(), columns: Vec::new() }
    }

    /// Seals the written data and turns it into a source for reading back.
    pub fn into_source(mut self) -> MemoryPageSource {
        // An unsealed tail becomes the final cluster.
        let open = self.columns.iter().any(|c| {
            c.store.len() > c.cluster_bounds.last().copied().unwrap_or(0)
        });
        if open {
            ColumnSink::commit_cluster(&mut self);
        }
        MemoryPageSource { descriptor: RwLock::new(self.descriptor), columns: self.columns }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Element count of a bound column, for inspection in tests.
    pub fn column_len(&self, column: ColumnId) -> u64 {
        self.columns[column.0 as usize].store.len()
    }

    /// Logical values of an index column.
    pub fn index_values(&self, column: ColumnId) -> Vec<u64> {
        match &self.columns[column.0 as usize].store {
            ElementStore::Indexes(v) => v.clone(),
            _ => panic!("index_values on a non-index column"),
        }
    }

    /// Unpacked bits of a bit column.
    pub fn bit_values(&self, column: ColumnId) -> Vec<bool> {
        match &self.columns[column.0 as usize].store {
            ElementStore::Bits { data, len } => {
                (0..*len as usize).map(|i| (data[i / 8] >> (i % 8)) & 1 != 0).collect()
            }
            _ => panic!("bit_values on a non-bit column"),
        }
    }

    /// Raw packed bytes of a fixed-size element column.
    pub fn raw_elements(&self, column: ColumnId) -> Vec<u8> {
        match &self.columns[column.0 as usize].store {
            ElementStore::Bytes { data, .. } => data.clone(),
            _ => panic!("raw_elements on a packed column"),
        }
    }
}

impl ColumnSink for MemoryPageSink {
    fn write_options(&self) -> WriteOptions {
        self.options
    }

    fn register_field(
        &mut self,
        qualified_name: &str,
        type_name: &str,
        type_alias: Option<&str>,
        type_version: u32,
    ) -> OnDiskId {
        self.descriptor.register_field(qualified_name, type_name, type_alias, type_version)
    }

    fn add_column(
        &mut self,
        field: OnDiskId,
        ty: ColumnType,
        index_in_field: u32,
        first_element_index: u64,
    ) -> ColumnId {
        let id = ColumnId(self.columns.len() as u32);
        self.columns.push(MemColumn::new(ty, first_element_index));
        self.descriptor.add_column(field, ColumnDescriptor { ty, index_in_field, physical: id });
        id
    }

    fn append(&mut self, column: ColumnId, element: &[u8]) {
        self.columns[column.0 as usize].append(element);
    }

    fn append_many(&mut self, column: ColumnId, data: &[u8], count: u64) {
        let col = &mut self.columns[column.0 as usize];
        match &mut col.store {
            ElementStore::Bytes { size, data: store } => {
                assert_eq!(data.len() as u64, count * *size as u64);
                store.extend_from_slice(data);
            }
            _ => {
                let size = col.ty.packed_size();
                for i in 0..count as usize {
                    col.append(&data[i * size..(i + 1) * size]);
                }
            }
        }
    }

    fn commit_cluster(&mut self) {
        for col in &mut self.columns {
            col.cluster_bounds.push(col.store.len());
        }
    }

    fn flush(&mut self, _column: ColumnId) {}
}

/// Read side of the in-memory store.
pub struct MemoryPageSource {
    descriptor: RwLock<Descriptor>,
    columns: Vec<MemColumn>,
}

impl ColumnSource for MemoryPageSource {
    fn descriptor(&self) -> DescriptorGuard<'_> {
        self.descriptor.read()
    }

    fn connect(&mut self, field: OnDiskId, index_in_field: u32) -> eyre::Result<ColumnId> {
        let descriptor = self.descriptor.read();
        let entry = descriptor
            .field(field)
            .ok_or_else(|| eyre::eyre!("no descriptor entry for field id {}", field.0))?;
        let column = entry
            .columns()
            .iter()
            .find(|c| c.index_in_field == index_in_field)
            .ok_or_else(|| {
                eyre::eyre!("field id {} has no column at position {}", field.0, index_in_field)
            })?;
        Ok(column.physical)
    }

    fn collection_info(&self, column: ColumnId, at: ElementIndex) -> (ClusterIndex, u64) {
        let col = &self.columns[column.0 as usize];
        let global = col.resolve(at);
        let (cluster, cluster_start) = col.cluster_of(global);
        let values = match &col.store {
            ElementStore::Indexes(v) => v,
            _ => panic!("collection_info on a non-index column"),
        };
        let end = values[global as usize];
        let start = if global == cluster_start { 0 } else { values[global as usize - 1] };
        (ClusterIndex::new(cluster, start), end - start)
    }

    fn switch_info(&self, column: ColumnId, at: ElementIndex) -> (ClusterIndex, u32) {
        let col = &self.columns[column.0 as usize];
        let global = col.resolve(at);
        let (cluster, _) = col.cluster_of(global);
        let sw = match &col.store {
            ElementStore::Switches(v) => v[global as usize],
            _ => panic!("switch_info on a non-switch column"),
        };
        (ClusterIndex::new(cluster, sw.index), sw.tag)
    }

    fn cluster_index_of(&self, column: ColumnId, global_index: u64) -> ClusterIndex {
        let col = &self.columns[column.0 as usize];
        let (cluster, cluster_start) = col.cluster_of(global_index);
        ClusterIndex::new(cluster, global_index - cluster_start)
    }

    fn read(&self, column: ColumnId, at: ElementIndex, to: &mut [u8]) {
        self.columns[column.0 as usize].read(at, to);
    }

    fn read_bulk(&self, column: ColumnId, start: ClusterIndex, count: u64, to: &mut [u8]) {
        let col = &self.columns[column.0 as usize];
        let abs = (col.cluster_start(start.cluster) + start.index) as usize;
        match &col.store {
            ElementStore::Bytes { size, data } => {
                let n = count as usize * size;
                to[..n].copy_from_slice(&data[abs * size..abs * size + n]);
            }
            ElementStore::Bits { data, .. } => {
                for i in 0..count as usize {
                    let pos = abs + i;
                    to[i] = (data[pos / 8] >> (pos % 8)) & 1;
                }
            }
            ElementStore::Indexes(v) => {
                for i in 0..count as usize {
                    to[i * 8..(i + 1) * 8].copy_from_slice(&v[abs + i].to_le_bytes());
                }
            }
            ElementStore::Switches(_) => panic!("switch columns are decoded via switch_info"),
        }
    }

    fn read_bit(&self, column: ColumnId, at: ElementIndex) -> bool {
        let mut byte = [0u8; 1];
        self.columns[column.0 as usize].read(at, &mut byte);
        byte[0] != 0
    }
}
