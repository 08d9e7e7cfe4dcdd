// Opaque pagination cursors

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Decoded pagination state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    #[serde(rename = "o")]
    pub offset: u64,
    #[serde(rename = "f")]
    pub filter_fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("Malformed cursor")]
    Malformed,

    #[error("Cursor does not belong to this query")]
    StaleOrForeign,
}

pub fn encode(offset: u64, filter_fingerprint: &str) -> String {
    let state = CursorState {
        offset,
        filter_fingerprint: filter_fingerprint.to_string(),
    };
    // Serializing a struct of a u64 and a String cannot fail
    let raw = serde_json::to_vec(&state).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(raw)
}

pub fn decode(token: &str) -> Result<CursorState, CursorError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|_| CursorError::Malformed)?;
    serde_json::from_slice(&raw).map_err(|_| CursorError::Malformed)
}

/// Resolve the starting state for a query.
///
/// No cursor means the first page. A cursor minted for a different query
/// is rejected rather than silently restarted.
pub fn decode_or_start(token: Option<&str>, current_fingerprint: &str) -> Result<CursorState, CursorError> {
    let Some(token) = token else {
        return Ok(CursorState {
            offset: 0,
            filter_fingerprint: current_fingerprint.to_string(),
        });
    };

    let state = decode(token)?;
    if state.filter_fingerprint != current_fingerprint {
        return Err(CursorError::StaleOrForeign);
    }
    Ok(state)
}

/// Fingerprint of the arguments that define a query.
///
/// Keys are sorted before hashing so argument order does not matter.
pub fn fingerprint(filter_arguments: &Map<String, Value>) -> String {
    let sorted: BTreeMap<&String, &Value> = filter_arguments.iter().collect();
    let canonical = serde_json::to_string(&sorted).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let token = encode(20, "abc123");
        let state = decode(&token).unwrap();
        assert_eq!(state.offset, 20);
        assert_eq!(state.filter_fingerprint, "abc123");
    }

    #[test]
    fn test_token_is_not_plaintext() {
        let token = encode(42, "fp");
        assert!(!token.contains("42"));
        assert!(!token.contains('='));
    }

    #[test]
    fn test_malformed() {
        assert_eq!(decode("not base64 !!"), Err(CursorError::Malformed));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert_eq!(decode(&not_json), Err(CursorError::Malformed));
        let wrong_shape = URL_SAFE_NO_PAD.encode(br#"{"o":-1,"f":"x"}"#);
        assert_eq!(decode(&wrong_shape), Err(CursorError::Malformed));
    }

    #[test]
    fn test_absent_cursor_starts_at_zero() {
        let state = decode_or_start(None, "fp").unwrap();
        assert_eq!(state, CursorState { offset: 0, filter_fingerprint: "fp".into() });
        assert_eq!(decode_or_start(None, "fp").unwrap(), state);
    }

    #[test]
    fn test_foreign_cursor_rejected() {
        let token = encode(5, "query-a");
        assert_eq!(decode_or_start(Some(&token), "query-b"), Err(CursorError::StaleOrForeign));
        assert_eq!(decode_or_start(Some(&token), "query-a").unwrap().offset, 5);
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = json!({"query": "ai", "tag": "x"});
        let b = json!({"tag": "x", "query": "ai"});
        assert_eq!(
            fingerprint(a.as_object().unwrap()),
            fingerprint(b.as_object().unwrap())
        );

        let c = json!({"query": "ml"});
        assert_ne!(
            fingerprint(a.as_object().unwrap()),
            fingerprint(c.as_object().unwrap())
        );
        assert_eq!(fingerprint(c.as_object().unwrap()).len(), 16);
    }

    proptest! {
        #[test]
        fn test_round_trip_any_state(offset in any::<u64>(), fp in "\\PC*") {
            let state = decode(&encode(offset, &fp)).unwrap();
            prop_assert_eq!(state.offset, offset);
            prop_assert_eq!(state.filter_fingerprint, fp);
        }
    }
}
