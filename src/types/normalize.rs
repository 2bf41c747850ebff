//! Type-name cleanup: cv-stripping, legacy spelling translation, and
//! typedef resolution against the introspection registry.

use phf::phf_map;

use crate::meta::TypeRegistry;

/// Whole-string spelling translations applied during normalization.
///
/// Keys are matched after cv-qualifier stripping and whitespace cleanup.
/// `Double32_t` is intentionally absent: it canonicalizes to `f64` through
/// the registry while the alias survives as the storage-narrowing hint.
static TYPE_TRANSLATIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "Bool_t" => "bool",
    "Float_t" => "f32",
    "Double_t" => "f64",
    "float" => "f32",
    "double" => "f64",

    "Char_t" => "char",
    "signed char" => "char",
    "int8_t" => "i8",
    "UChar_t" => "u8",
    "unsigned char" => "u8",
    "uint8_t" => "u8",

    "Short_t" => "i16",
    "int16_t" => "i16",
    "short" => "i16",
    "UShort_t" => "u16",
    "unsigned short" => "u16",
    "uint16_t" => "u16",

    "Int_t" => "i32",
    "int32_t" => "i32",
    "int" => "i32",
    "UInt_t" => "u32",
    "unsigned" => "u32",
    "unsigned int" => "u32",
    "uint32_t" => "u32",

    "Long_t" => "i64",
    "Long64_t" => "i64",
    "int64_t" => "i64",
    "long" => "i64",
    "ULong_t" => "u64",
    "ULong64_t" => "u64",
    "unsigned long" => "u64",
    "uint64_t" => "u64",

    "std::string" => "string",
    "String" => "string",
};

/// Outer template spellings rewritten to the engine's canonical names.
const TEMPLATE_TRANSLATIONS: &[(&str, &str)] = &[
    ("std::vector<", "vec<"),
    ("vector<", "vec<"),
    ("Vec<", "vec<"),
    ("std::array<", "array<"),
    ("std::variant<", "variant<"),
    ("std::pair<", "pair<"),
    ("std::tuple<", "tuple<"),
    ("std::bitset<", "bitset<"),
    ("std::unique_ptr<", "ptr<"),
    ("unique_ptr<", "ptr<"),
    ("Box<", "ptr<"),
];

/// Names that never go through typedef resolution.
const CANONICAL_PREFIXES: &[&str] = &[
    "vec<", "smallvec<", "array<", "variant<", "pair<", "tuple<", "bitset<", "ptr<",
    "cardinality<", "std::", "strata::",
];

const CANONICAL_NAMES: &[&str] = &[
    "bool", "char", "i8", "u8", "i16", "u16", "i32", "u32", "i64", "u64", "f32", "f64", "string",
];

/// Strips `const`/`volatile` qualifiers and collapses whitespace so that
/// spellings like `const vector< int >` compare equal to `vector<int>`.
fn clean_type(name: &str) -> String {
    let mut words: Vec<&str> = Vec::new();
    for word in name.split_whitespace() {
        if word == "const" || word == "volatile" {
            continue;
        }
        words.push(word);
    }
    let joined = words.join(" ");

    // Whitespace is only significant between two identifier characters
    // ("unsigned long"); drop it next to punctuation.
    let chars: Vec<char> = joined.chars().collect();
    let mut out = String::with_capacity(joined.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let keep = matches!(prev, Some(p) if p.is_alphanumeric() || p == '_')
                && matches!(next, Some(n) if n.is_alphanumeric() || n == '_');
            if !keep {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Applies the normalization rules that lead to the final name used to
/// create a field, e.g. `unsigned int` becomes `u32` and
/// `const vector<T>` becomes `vec<T>`. Idempotent.
pub fn normalize_type_name(name: &str) -> String {
    let cleaned = clean_type(name);

    if let Some(translated) = TYPE_TRANSLATIONS.get(cleaned.as_str()) {
        return (*translated).to_string();
    }
    for (from, to) in TEMPLATE_TRANSLATIONS {
        if let Some(rest) = cleaned.strip_prefix(from) {
            return format!("{}{}", to, rest);
        }
    }
    cleaned
}

/// Resolves registered typedefs to their underlying types. Built-in names,
/// the cardinality generic, and reserved namespaces are assumed canonical.
pub fn canonical_type_name(name: &str, registry: &TypeRegistry) -> String {
    if CANONICAL_NAMES.contains(&name)
        || CANONICAL_PREFIXES.iter().any(|p| name.starts_with(p))
    {
        return name.to_string();
    }
    // The storage-narrowing hint is a built-in typedef: the factory keeps
    // the alias while the field itself is a plain f64.
    if name == "Double32_t" {
        return "f64".to_string();
    }
    registry.resolve_typedef(name)
}
