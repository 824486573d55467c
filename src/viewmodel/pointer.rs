//! JSON Pointer (RFC 6901) paths into a view-model.

use crate::viewmodel::TreeError;

/// Unescape one reference token (`~1` → `/`, `~0` → `~`).
pub fn unescape_component(component: &str) -> String {
    if !component.contains('~') {
        return component.to_string();
    }
    component.replace("~1", "/").replace("~0", "~")
}

/// Escape one reference token.
pub fn escape_component(component: &str) -> String {
    if !component.contains('/') && !component.contains('~') {
        return component.to_string();
    }
    component.replace('~', "~0").replace('/', "~1")
}

/// Split a pointer into unescaped tokens. `""` is the root.
pub fn parse_pointer(pointer: &str) -> Result<Vec<String>, TreeError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(TreeError::InvalidPointer(pointer.to_string()));
    }
    Ok(pointer[1..].split('/').map(unescape_component).collect())
}

/// Join tokens back into a pointer string.
pub fn format_pointer<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut out = String::new();
    for token in tokens {
        out.push('/');
        out.push_str(&escape_component(token.as_ref()));
    }
    out
}

/// Array index token: digits only, no leading zero unless it is `0`.
pub fn parse_index(token: &str) -> Option<usize> {
    let bytes = token.as_bytes();
    if bytes.is_empty() || (bytes.len() > 1 && bytes[0] == b'0') {
        return None;
    }
    if !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format() {
        assert!(parse_pointer("").unwrap().is_empty());
        assert_eq!(parse_pointer("/a/b~1c/~0d").unwrap(), vec!["a", "b/c", "~d"]);
        assert_eq!(format_pointer(&["a", "b/c", "~d"]), "/a/b~1c/~0d");
        assert!(matches!(parse_pointer("a/b"), Err(TreeError::InvalidPointer(_))));
    }

    #[test]
    fn index_tokens() {
        assert_eq!(parse_index("0"), Some(0));
        assert_eq!(parse_index("12"), Some(12));
        assert_eq!(parse_index("01"), None);
        assert_eq!(parse_index("-"), None);
        assert_eq!(parse_index(""), None);
    }
}
