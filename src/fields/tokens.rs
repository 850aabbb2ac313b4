//! Wire encoding of nullable keys and values.
//!
//! The store has no notion of null, so `None` is written as [`NULL_TOKEN`].
//! Every live hash also carries [`EMPTY_FIELD_TOKEN`] mapped to itself, which
//! keeps a logically empty map visible as an existing key.

/// Stands in for a null key or value.
pub const NULL_TOKEN: &str = "NULL_TOKEN";

/// Field (and value) of the marker present in every live hash.
pub const EMPTY_FIELD_TOKEN: &str = "EMPTY_FIELD_TOKEN";

pub fn encode(value: Option<&str>) -> String {
    value.unwrap_or(NULL_TOKEN).to_string()
}

pub fn decode(raw: String) -> Option<String> {
    if raw == NULL_TOKEN {
        None
    } else {
        Some(raw)
    }
}

pub fn is_marker(field: &str) -> bool {
    field == EMPTY_FIELD_TOKEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_uses_token() {
        assert_eq!(encode(None), NULL_TOKEN);
        assert_eq!(decode(NULL_TOKEN.to_string()), None);
        assert_eq!(decode(encode(Some("x"))), Some("x".to_string()));
    }

    #[test]
    fn test_marker_detection() {
        assert!(is_marker(EMPTY_FIELD_TOKEN));
        assert!(!is_marker("EMPTY"));
        assert!(!is_marker(NULL_TOKEN));
    }
}
