//! Static column-representation tables.
//!
//! Every field kind accepts a fixed set of column-type sequences: one list
//! of candidates for writing (the first entry is the default) and one for
//! reading (a superset of the former). The tables are process-wide
//! immutable; representative pointers on bound fields alias into them.

use std::sync::OnceLock;

use smallvec::SmallVec;

use crate::fields::{FieldKind, PrimitiveKind};
use crate::io::ColumnType;

/// One ordered sequence of column element types.
pub type Representation = SmallVec<[ColumnType; 2]>;

/// The serialization and deserialization representations of a field kind.
pub struct Representations {
    serialization: Vec<Representation>,
    deserialization: Vec<Representation>,
}

impl Representations {
    fn new(serialization: &[&[ColumnType]], deserialization_extra: &[&[ColumnType]]) -> Self {
        let ser: Vec<Representation> =
            serialization.iter().map(|row| Representation::from_slice(row)).collect();
        let mut deser = ser.clone();
        deser.extend(deserialization_extra.iter().map(|row| Representation::from_slice(row)));
        Self { serialization: ser, deserialization: deser }
    }

    /// The default representation used for writing.
    pub fn serialization_default(&self) -> &Representation {
        &self.serialization[0]
    }

    pub fn serialization_types(&self) -> &[Representation] {
        &self.serialization
    }

    pub fn deserialization_types(&self) -> &[Representation] {
        &self.deserialization
    }
}

macro_rules! representation_table {
    ($fn_name:ident, $ser:expr, $extra:expr) => {
        fn $fn_name() -> &'static Representations {
            static TABLE: OnceLock<Representations> = OnceLock::new();
            TABLE.get_or_init(|| Representations::new($ser, $extra))
        }
    };
}

use ColumnType::*;

// A single empty row: fields without own columns (records, arrays, enums
// and the tree root) match descriptor entries that list no columns.
representation_table!(empty_reps, &[&[]], &[]);

representation_table!(
    index_reps,
    &[&[SplitIndex64], &[Index64], &[SplitIndex32], &[Index32]],
    &[]
);

representation_table!(bit_reps, &[&[Bit]], &[]);
representation_table!(char_reps, &[&[Char]], &[]);
representation_table!(int8_reps, &[&[Int8]], &[&[UInt8]]);
representation_table!(uint8_reps, &[&[UInt8]], &[&[Int8]]);
representation_table!(
    int16_reps,
    &[&[SplitInt16], &[Int16]],
    &[&[SplitUInt16], &[UInt16]]
);
representation_table!(
    uint16_reps,
    &[&[SplitUInt16], &[UInt16]],
    &[&[SplitInt16], &[Int16]]
);
representation_table!(
    int32_reps,
    &[&[SplitInt32], &[Int32]],
    &[&[SplitUInt32], &[UInt32]]
);
representation_table!(
    uint32_reps,
    &[&[SplitUInt32], &[UInt32]],
    &[&[SplitInt32], &[Int32]]
);
representation_table!(
    int64_reps,
    &[&[SplitInt64], &[Int64]],
    &[&[SplitUInt64], &[UInt64], &[Int32], &[SplitInt32], &[UInt32], &[SplitUInt32]]
);
representation_table!(
    uint64_reps,
    &[&[SplitUInt64], &[UInt64]],
    &[&[SplitInt64], &[Int64]]
);
representation_table!(real32_reps, &[&[SplitReal32], &[Real32]], &[]);
representation_table!(
    real64_reps,
    &[&[SplitReal64], &[Real64], &[SplitReal32], &[Real32]],
    &[]
);
representation_table!(
    string_reps,
    &[
        &[SplitIndex64, Char],
        &[Index64, Char],
        &[SplitIndex32, Char],
        &[Index32, Char]
    ],
    &[]
);
representation_table!(switch_reps, &[&[Switch]], &[]);
representation_table!(
    nullable_reps,
    &[&[SplitIndex64], &[Index64], &[SplitIndex32], &[Index32], &[Bit]],
    &[]
);

/// The static table for a field kind.
pub(crate) fn representations_for(kind: &FieldKind) -> &'static Representations {
    match kind {
        FieldKind::Primitive(p) => match p {
            PrimitiveKind::Bool => bit_reps(),
            PrimitiveKind::Char => char_reps(),
            PrimitiveKind::I8 => int8_reps(),
            PrimitiveKind::U8 => uint8_reps(),
            PrimitiveKind::I16 => int16_reps(),
            PrimitiveKind::U16 => uint16_reps(),
            PrimitiveKind::I32 => int32_reps(),
            PrimitiveKind::U32 => uint32_reps(),
            PrimitiveKind::I64 => int64_reps(),
            PrimitiveKind::U64 => uint64_reps(),
            PrimitiveKind::F32 => real32_reps(),
            PrimitiveKind::F64 => real64_reps(),
        },
        FieldKind::Cardinality { .. } => index_reps(),
        FieldKind::String { .. } => string_reps(),
        FieldKind::Vector { .. }
        | FieldKind::InlineVector { .. }
        | FieldKind::BoolVector { .. }
        | FieldKind::Proxy { .. }
        | FieldKind::CollectionGroup { .. } => index_reps(),
        FieldKind::Bitset { .. } => bit_reps(),
        FieldKind::Variant { .. } => switch_reps(),
        FieldKind::Pointer { .. } => nullable_reps(),
        FieldKind::Root
        | FieldKind::Enum
        | FieldKind::Record { .. }
        | FieldKind::Class { .. }
        | FieldKind::Array { .. } => empty_reps(),
    }
}
