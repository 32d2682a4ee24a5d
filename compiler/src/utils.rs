use crate::error::SchemaError;

pub fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text))
}

pub fn error(file: &str, msg: &str, line: usize, column: usize) -> SchemaError {
    SchemaError::Parse {
        file: file.to_string(),
        msg: msg.to_string(),
        line,
        column,
    }
}

/// `foo_bar_baz` -> `fooBarBaz`, the default JSON name of a field.
pub fn to_lower_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// `foo_bar` -> `FooBar`, used to name the entry message of a map field.
pub fn to_upper_camel(name: &str) -> String {
    let camel = to_lower_camel(name);
    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Maps `\` separators to `/` and strips a leading `./`, the form files are
/// registered and looked up under.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut trimmed = path.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.to_string()
}
