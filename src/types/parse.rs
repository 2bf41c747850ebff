//! Template-argument tokenization and array-suffix parsing.

use eyre::{bail, Result};

/// Splits the comma-separated body of a template argument list at the top
/// nesting level, e.g. `"i32,variant<f64,i32>"` yields
/// `["i32", "variant<f64,i32>"]`.
pub fn tokenize_template_args(body: &str) -> Vec<String> {
    let mut result = Vec::new();
    if body.is_empty() {
        return result;
    }

    let mut nesting = 0usize;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '<' => nesting += 1,
            '>' => nesting = nesting.saturating_sub(1),
            ',' if nesting == 0 => {
                result.push(body[start..i].to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    result.push(body[start..].to_string());
    result
}

/// Parses a type name of the form `T[n][m]...` and returns the base type
/// `T` plus the declared sizes, innermost first; for `u8[1][2]` it returns
/// `("u8", [1, 2])`. A name without an array suffix returns an empty size
/// list. Whitespace must already be removed.
pub fn parse_array_type(type_name: &str) -> Result<(String, Vec<usize>)> {
    let mut sizes = Vec::new();
    let mut rest = type_name;

    // Only the outer suffix is an array declaration: the right `]` must sit
    // at the very end of the name.
    while rest.ends_with(']') {
        let open = match rest.rfind('[') {
            Some(pos) => pos,
            None => bail!("malformed array type: {}", type_name),
        };
        let size_str = &rest[open + 1..rest.len() - 1];
        let size: usize = match size_str.parse() {
            Ok(n) => n,
            Err(_) => bail!("invalid array size `{}` in type: {}", size_str, type_name),
        };
        sizes.insert(0, size);
        rest = &rest[..open];
    }
    Ok((rest.to_string(), sizes))
}
