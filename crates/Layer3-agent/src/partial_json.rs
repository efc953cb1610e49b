//! Partial JSON repair for streaming tool arguments
//!
//! Providers stream tool arguments as raw JSON fragments. For live
//! previews we repair the prefix (close open strings, strip dangling
//! separators, balance brackets) and parse the result. Returns `None`
//! when the fragment is too broken to salvage; never fails.

use serde_json::Value;

/// Parse a possibly-incomplete JSON fragment into a preview value.
pub fn parse_partial(input: &str) -> Option<Value> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Fast path: the fragment is already complete
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    serde_json::from_str(&repair(trimmed)).ok()
}

/// Close whatever the fragment left open.
fn repair(input: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut repaired = input.to_string();

    if in_string {
        if escaped {
            // Drop a trailing lone backslash so the quote closes cleanly
            repaired.pop();
        }
        repaired.push('"');
    }

    // A fragment ending at a separator has no value yet; complete or drop it
    loop {
        match repaired.trim_end().chars().last() {
            Some(':') => {
                repaired = repaired.trim_end().to_string();
                repaired.push_str("null");
            }
            Some(',') => {
                repaired = repaired.trim_end().to_string();
                repaired.pop();
            }
            _ => break,
        }
    }

    for closer in stack.into_iter().rev() {
        repaired.push(closer);
    }

    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_json_passes_through() {
        assert_eq!(
            parse_partial(r#"{"path": "a.txt"}"#),
            Some(json!({"path": "a.txt"}))
        );
    }

    #[test]
    fn test_open_string_is_closed() {
        assert_eq!(
            parse_partial(r#"{"path": "src/ma"#),
            Some(json!({"path": "src/ma"}))
        );
    }

    #[test]
    fn test_dangling_key_gets_null() {
        assert_eq!(
            parse_partial(r#"{"path": "a.txt", "recursive":"#),
            Some(json!({"path": "a.txt", "recursive": null}))
        );
    }

    #[test]
    fn test_trailing_comma_is_dropped() {
        assert_eq!(
            parse_partial(r#"{"items": [1, 2,"#),
            Some(json!({"items": [1, 2]}))
        );
    }

    #[test]
    fn test_nested_brackets_balanced() {
        assert_eq!(
            parse_partial(r#"{"filter": {"glob": ["*.rs""#),
            Some(json!({"filter": {"glob": ["*.rs"]}}))
        );
    }

    #[test]
    fn test_empty_and_hopeless_fragments() {
        assert_eq!(parse_partial(""), None);
        assert_eq!(parse_partial("   "), None);
        assert_eq!(parse_partial("}{"), None);
    }
}
