//! Record-level helpers shared by the stream operations

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{Result, StreamError};

/// Compacted snapshot of a finished stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizedDocument {
    pub metadata: Map<String, Value>,
    pub messages: Vec<Value>,
}

/// Identifier of `value` under `field`, or `None` for anything that is not an
/// object carrying a non-null value there.
pub fn record_id<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    value
        .as_object()?
        .get(field)
        .filter(|id| !id.is_null())
}

/// Identifier a caller-supplied edit/delete record must carry
pub fn require_record_id(value: &Value, field: &str) -> Result<Value> {
    record_id(value, field)
        .cloned()
        .ok_or_else(|| StreamError::MissingRecordId {
            field: field.to_string(),
        })
}

/// Ensure a pre-serialized line can be stored as exactly one NDJSON line
pub fn validate_line(line: &str) -> Result<()> {
    if line.contains(['\n', '\r']) {
        return Err(StreamError::InvalidRecord(
            "record line must not contain a line break".to_string(),
        ));
    }
    if line.trim().is_empty() {
        return Err(StreamError::InvalidRecord("record line is empty".to_string()));
    }
    Ok(())
}

/// Compact single-line serialization of a record
pub fn to_line(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_fails_closed() {
        assert_eq!(record_id(&json!({"id": 7}), "id"), Some(&json!(7)));
        assert_eq!(record_id(&json!({"id": null}), "id"), None);
        assert_eq!(record_id(&json!({"other": 1}), "id"), None);
        assert_eq!(record_id(&json!([1, 2]), "id"), None);
        assert_eq!(record_id(&json!("id"), "id"), None);
    }

    #[test]
    fn test_require_record_id() {
        assert_eq!(require_record_id(&json!({"id": "m1"}), "id").unwrap(), json!("m1"));
        assert!(matches!(
            require_record_id(&json!({"text": "hi"}), "id"),
            Err(StreamError::MissingRecordId { .. })
        ));
    }

    #[test]
    fn test_validate_line() {
        assert!(validate_line(r#"{"a":1}"#).is_ok());
        assert!(validate_line("{\"a\":\n1}").is_err());
        assert!(validate_line("{\"a\":1}\r").is_err());
        assert!(validate_line("   ").is_err());
    }

    #[test]
    fn test_to_line_is_single_line() {
        let line = to_line(&json!({"text": "two\nlines"})).unwrap();
        assert!(validate_line(&line).is_ok());
    }

    #[test]
    fn test_finalized_document_shape() {
        let doc = FinalizedDocument {
            metadata: Map::new(),
            messages: vec![json!({"a": 1})],
        };
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({"metadata": {}, "messages": [{"a": 1}]})
        );
    }
}
