//! On-disk descriptor: the catalog of fields and their columns as written
//! by a sink and consulted during read-side column-type negotiation.

use hashbrown::HashMap;

use crate::io::{ColumnId, ColumnType, OnDiskId};

/// One column owned by a descriptor field.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub ty: ColumnType,
    pub index_in_field: u32,
    pub physical: ColumnId,
}

/// Descriptor entry for one field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub id: OnDiskId,
    pub qualified_name: String,
    pub type_name: String,
    pub type_alias: Option<String>,
    pub type_version: u32,
    columns: Vec<ColumnDescriptor>,
}

impl FieldDescriptor {
    /// Columns ordered by their index within the field.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Ordered on-disk element types of this field's columns.
    pub fn column_types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.ty).collect()
    }
}

/// The full field/column catalog of one dataset.
#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, OnDiskId>,
}

impl Descriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_field(
        &mut self,
        qualified_name: &str,
        type_name: &str,
        type_alias: Option<&str>,
        type_version: u32,
    ) -> OnDiskId {
        let id = OnDiskId(self.fields.len() as u64);
        self.fields.push(FieldDescriptor {
            id,
            qualified_name: qualified_name.to_string(),
            type_name: type_name.to_string(),
            type_alias: type_alias.map(str::to_string),
            type_version,
            columns: Vec::new(),
        });
        self.by_name.insert(qualified_name.to_string(), id);
        id
    }

    pub fn add_column(&mut self, field: OnDiskId, column: ColumnDescriptor) {
        let entry = &mut self.fields[field.0 as usize];
        debug_assert_eq!(entry.columns.len() as u32, column.index_in_field);
        entry.columns.push(column);
    }

    pub fn field(&self, id: OnDiskId) -> Option<&FieldDescriptor> {
        self.fields.get(id.0 as usize)
    }

    pub fn field_by_name(&self, qualified_name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(qualified_name).and_then(|id| self.field(*id))
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}
