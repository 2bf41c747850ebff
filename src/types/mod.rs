//! # Schema Type Language
//!
//! This module implements the textual type language from which field trees
//! are built. A user-supplied type string goes through two stages before the
//! factory dispatches on it:
//!
//! 1. **Normalization** (`normalize_type_name`): strips cv-qualifiers,
//!    rewrites platform and legacy integer spellings to fixed-width names,
//!    and rewrites standard-library container spellings to the engine's
//!    canonical template names. Normalization is idempotent.
//! 2. **Canonicalization** (`canonical_type_name`): resolves registered
//!    typedefs to their underlying types. Built-in names, the cardinality
//!    generic, and anything in the engine-reserved namespace are assumed
//!    canonical and skip typedef resolution.
//!
//! ## Canonical names
//!
//! | Category | Spellings |
//! |----------|-----------|
//! | Primitives | `bool char i8 u8 i16 u16 i32 u32 i64 u64 f32 f64` |
//! | Strings | `string` |
//! | Containers | `vec<T>`, `smallvec<T>`, `array<T,N>`, `T[N]` |
//! | Sum types | `variant<T1,...,Tn>`, `ptr<T>` |
//! | Products | `pair<A,B>`, `tuple<T1,...,Tn>` |
//! | Bit storage | `bitset<N>` |
//! | Size queries | `cardinality<u32>`, `cardinality<u64>` |
//!
//! Everything else is looked up in the introspection registry (enums,
//! reflected classes, proxied collections).
//!
//! The parser half (`parse`) splits template argument lists at the top
//! nesting level and strips `[n]` array suffixes.

mod normalize;
mod parse;

pub use normalize::{canonical_type_name, normalize_type_name};
pub use parse::{parse_array_type, tokenize_template_args};
