//! Completeness scanning for streamed tool-call argument buffers.
//!
//! The scan only tracks nesting and string state. Whether the finished object
//! is valid JSON is checked once it closes.

fn first_non_ws(bytes: &[u8]) -> Option<usize> {
    bytes
        .iter()
        .position(|b| !matches!(b, b' ' | b'\n' | b'\r' | b'\t'))
}

/// Length of the leading JSON object in `text` once its outer brace closes,
/// including any whitespace before the opening brace.
///
/// `None` while the object is still open or when the text does not start
/// with an object at all.
#[must_use]
pub(crate) fn complete_object_len(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let start = first_non_ws(bytes)?;
    if bytes[start] != b'{' {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return (b == b'}').then_some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether the trimmed text starts something that could still become an object.
#[must_use]
pub(crate) fn could_start_object(text: &str) -> bool {
    let bytes = text.as_bytes();
    first_non_ws(bytes).is_none_or(|start| bytes[start] == b'{')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_object_is_incomplete() {
        assert_eq!(complete_object_len("{\"url\": \"https://exa"), None);
        assert_eq!(complete_object_len("{\"a\": [1, 2"), None);
        assert_eq!(complete_object_len("  "), None);
        assert_eq!(complete_object_len("[1]"), None);
    }

    #[test]
    fn test_complete_object_reports_end() {
        let text = " {\"url\": \"https://example.com\"}</invoke> trailing";
        let end = complete_object_len(text).expect("complete");
        assert_eq!(&text[end..], "</invoke> trailing");
    }

    #[test]
    fn test_braces_inside_strings_do_not_close() {
        assert_eq!(complete_object_len("{\"text\": \"}\""), None);
        assert_eq!(complete_object_len("{\"text\": \"}\"}"), Some(13));
        assert_eq!(complete_object_len("{\"t\": \"\\\\\"}"), Some(11));
    }

    #[test]
    fn test_nested_values() {
        let text = "{\"a\": {\"b\": [true, null, -1.5e3]}, \"c\": \"\\\"\"}";
        assert_eq!(complete_object_len(text), Some(text.len()));
    }

    #[test]
    fn test_mismatched_closer_is_not_an_object() {
        assert_eq!(complete_object_len("{\"a\": 1]"), None);
    }

    #[test]
    fn test_could_start_object() {
        assert!(could_start_object(""));
        assert!(could_start_object("  {"));
        assert!(!could_start_object(" hello"));
    }
}
