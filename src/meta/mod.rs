//! # Introspection Registry
//!
//! The engine serializes user-defined record types without compile-time
//! knowledge of their layout. This module is the runtime source of that
//! knowledge: applications register class layouts, enum underlying types,
//! typedefs, collection proxies, and I/O customization rules, and the field
//! factory consults the registry when a type name has no built-in match.
//!
//! ## What a class registration carries
//!
//! - size and alignment of the in-memory object
//! - base classes with their sub-object offsets
//! - persistent data members (name, type, offset, optional array dims)
//! - optional constructor/destructor hooks; when present they are expected
//!   to construct/destroy the *entire* object including members, and their
//!   presence marks the type as non-trivially constructible/destructible
//! - optional collection proxy turning the type into a proxied container
//! - schema rules applied as post-read callbacks, filtered by the on-disk
//!   type version
//!
//! Hooks receive raw object addresses; the registrant guarantees that the
//! hook matches the registered layout.

mod descriptor;

use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;

pub use descriptor::{ColumnDescriptor, Descriptor, FieldDescriptor};

/// A hook invoked on a raw object address (constructor, destructor, or
/// schema-rule read function).
pub type ObjectHook = Arc<dyn Fn(*mut u8) + Send + Sync>;

/// Per-element accessor of a proxied container: `(container, i) -> element`.
pub type ElementAccessor = Arc<dyn Fn(*mut u8, usize) -> *mut u8 + Send + Sync>;

/// Base class entry of a reflected class.
#[derive(Clone)]
pub struct BaseInfo {
    pub class_name: String,
    pub offset: usize,
}

/// Data member entry of a reflected class.
#[derive(Clone)]
pub struct MemberInfo {
    pub name: String,
    /// Resolved (true) type name.
    pub type_name: String,
    /// Original user spelling when distinct from `type_name`.
    pub type_alias: Option<String>,
    pub offset: usize,
    /// Declared C-style array dimensions, outermost first; empty for
    /// scalars.
    pub array_dims: Vec<usize>,
    pub is_transient: bool,
}

impl MemberInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, offset: usize) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            type_alias: None,
            offset,
            array_dims: Vec::new(),
            is_transient: false,
        }
    }

    pub fn transient(mut self) -> Self {
        self.is_transient = true;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.type_alias = Some(alias.into());
        self
    }

    pub fn with_dims(mut self, dims: Vec<usize>) -> Self {
        self.array_dims = dims;
        self
    }
}

/// Kind of an I/O customization rule. Only read rules are supported; other
/// kinds are skipped with a warning at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRuleKind {
    Read,
    ReadRaw,
}

/// An I/O customization rule: a post-read hook gated on the on-disk type
/// version, targeting (transient) members of the class.
#[derive(Clone)]
pub struct SchemaRule {
    pub kind: SchemaRuleKind,
    pub targets: Vec<String>,
    pub since_version: u32,
    pub until_version: u32,
    pub func: ObjectHook,
}

impl SchemaRule {
    pub fn applies_to(&self, on_disk_version: u32) -> bool {
        on_disk_version >= self.since_version && on_disk_version <= self.until_version
    }
}

/// Collection proxy: makes an arbitrary registered type usable as a
/// variable-length container of a single element type.
#[derive(Clone)]
pub struct CollectionProxy {
    /// Element type name (run through the factory).
    pub value_type: String,
    pub is_associative: bool,
    pub has_pointers: bool,
    /// Elements require per-element teardown when the container dies.
    pub needs_destruct: bool,
    /// Element stride for contiguous vector-like layouts; `None` forces
    /// per-element iteration through the accessors.
    pub stride: Option<usize>,
    /// Placement-constructs an empty container.
    pub construct: ObjectHook,
    /// Placement-destroys the container shell (not the elements).
    pub destruct: ObjectHook,
    pub count: Arc<dyn Fn(*const u8) -> usize + Send + Sync>,
    /// Prepares `n` element slots; returns the object to iterate while
    /// reading (the container itself, or a staging buffer).
    pub allocate: Arc<dyn Fn(*mut u8, usize) -> *mut u8 + Send + Sync>,
    /// Publishes a staging buffer into the destination container.
    pub commit: Option<Arc<dyn Fn(*mut u8, *mut u8) + Send + Sync>>,
    /// Element accessor used when reading from disk.
    pub iter_read: ElementAccessor,
    /// Element accessor used when writing to disk.
    pub iter_write: ElementAccessor,
}

/// Reflection data for one registered class.
#[derive(Clone)]
pub struct ClassInfo {
    pub name: String,
    pub size: usize,
    pub alignment: usize,
    pub type_version: u32,
    pub constructor: Option<ObjectHook>,
    pub destructor: Option<ObjectHook>,
    pub bases: Vec<BaseInfo>,
    pub members: Vec<MemberInfo>,
    pub proxy: Option<Arc<CollectionProxy>>,
    pub rules: Vec<SchemaRule>,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>, size: usize, alignment: usize) -> Self {
        Self {
            name: name.into(),
            size,
            alignment,
            type_version: 1,
            constructor: None,
            destructor: None,
            bases: Vec::new(),
            members: Vec::new(),
            proxy: None,
            rules: Vec::new(),
        }
    }

    pub fn has_explicit_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    pub fn has_explicit_destructor(&self) -> bool {
        self.destructor.is_some()
    }

    /// Rules applicable to values written with the given type version.
    pub fn rules_for_version(&self, on_disk_version: u32) -> Vec<&SchemaRule> {
        self.rules.iter().filter(|r| r.applies_to(on_disk_version)).collect()
    }

    pub fn member(&self, name: &str) -> Option<&MemberInfo> {
        self.members.iter().find(|m| m.name == name)
    }
}

const INTEGRAL_TYPES: &[&str] = &["i8", "u8", "i16", "u16", "i32", "u32", "i64", "u64"];

/// Underlying integral type of a registered enum.
#[derive(Debug, Clone)]
pub struct EnumInfo {
    pub underlying: String,
}

/// Runtime type information service consulted by the field factory.
#[derive(Default)]
pub struct TypeRegistry {
    typedefs: HashMap<String, String>,
    enums: HashMap<String, EnumInfo>,
    classes: HashMap<String, Arc<ClassInfo>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_typedef(&mut self, alias: impl Into<String>, underlying: impl Into<String>) {
        self.typedefs.insert(alias.into(), underlying.into());
    }

    /// Follows typedef chains to the underlying type; returns the input
    /// unchanged when it is not a registered alias.
    pub fn resolve_typedef(&self, name: &str) -> String {
        let mut current = name;
        // Cap the walk so a cyclic registration cannot hang us.
        for _ in 0..32 {
            match self.typedefs.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.to_string()
    }

    pub fn register_enum(&mut self, name: impl Into<String>, underlying: &str) -> Result<()> {
        if !INTEGRAL_TYPES.contains(&underlying) {
            bail!("unsupported underlying integral type `{}` for enum", underlying);
        }
        self.enums.insert(name.into(), EnumInfo { underlying: underlying.to_string() });
        Ok(())
    }

    pub fn enum_info(&self, name: &str) -> Option<&EnumInfo> {
        self.enums.get(name)
    }

    pub fn register_class(&mut self, info: ClassInfo) {
        self.classes.insert(info.name.clone(), Arc::new(info));
    }

    pub fn class_info(&self, name: &str) -> Option<Arc<ClassInfo>> {
        self.classes.get(name).cloned()
    }
}
