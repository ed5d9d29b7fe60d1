//! Compaction of an active stream into a `{metadata, messages}` document

use std::io::ErrorKind;
use std::path::Path;

use serde_json::{Map, Value};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::error::{Result, StreamError};
use super::record::FinalizedDocument;
use crate::config::MetadataConvention;

/// Reserved key of the leading metadata line under [`MetadataConvention::Marker`]
pub const METADATA_MARKER: &str = "$metadata";

/// Parse every non-blank line of `content` into a finalized document
///
/// Any malformed line fails the whole compaction.
pub fn compact(
    key: &str,
    content: &[u8],
    caller_metadata: Option<Map<String, Value>>,
    convention: MetadataConvention,
) -> Result<FinalizedDocument> {
    let mut records = Vec::new();
    for (index, line) in content.split(|byte| *byte == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let value = serde_json::from_slice::<Value>(line).map_err(|source| StreamError::Parse {
            key: key.to_string(),
            line: index + 1,
            source,
        })?;
        records.push(value);
    }

    let caller_metadata = caller_metadata.unwrap_or_default();
    let document = match convention {
        MetadataConvention::LineCount => by_line_count(records, caller_metadata),
        MetadataConvention::Marker => by_marker(records, caller_metadata),
    };
    Ok(document)
}

/// A lone object line is the metadata; anything longer is all messages
fn by_line_count(mut records: Vec<Value>, caller: Map<String, Value>) -> FinalizedDocument {
    if records.len() == 1 && records[0].is_object() {
        if let Some(Value::Object(inferred)) = records.pop() {
            return FinalizedDocument {
                metadata: overlay(inferred, caller),
                messages: Vec::new(),
            };
        }
    }

    FinalizedDocument {
        metadata: caller,
        messages: records,
    }
}

/// Only a leading `{"$metadata": {...}}` line is metadata
fn by_marker(mut records: Vec<Value>, caller: Map<String, Value>) -> FinalizedDocument {
    let marked = records
        .first()
        .and_then(Value::as_object)
        .filter(|first| first.len() == 1)
        .and_then(|first| first.get(METADATA_MARKER))
        .is_some_and(Value::is_object);

    if marked {
        if let Value::Object(mut first) = records.remove(0) {
            if let Some(Value::Object(inferred)) = first.remove(METADATA_MARKER) {
                return FinalizedDocument {
                    metadata: overlay(inferred, caller),
                    messages: records,
                };
            }
        }
    }

    FinalizedDocument {
        metadata: caller,
        messages: records,
    }
}

/// Caller-supplied keys win over stored ones
fn overlay(mut base: Map<String, Value>, caller: Map<String, Value>) -> Map<String, Value> {
    base.extend(caller);
    base
}

/// Write `document` to `temp`, sync it, then rename it to `target`
pub async fn write_document(
    document: &FinalizedDocument,
    target: &Path,
    temp: &Path,
) -> Result<()> {
    let bytes = serde_json::to_vec(document)?;

    let staged = async {
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(temp, target).await
    };

    if let Err(err) = staged.await {
        match fs::remove_file(temp).await {
            Ok(()) => {}
            Err(remove_err) if remove_err.kind() == ErrorKind::NotFound => {}
            Err(remove_err) => {
                warn!(path = %temp.display(), error = %remove_err, "Failed to remove document temp file")
            }
        }
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_multiple_lines_are_messages() {
        let doc = compact(
            "s1",
            b"{\"a\":1}\n{\"a\":2}\n",
            Some(Map::new()),
            MetadataConvention::LineCount,
        )
        .unwrap();

        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({"metadata": {}, "messages": [{"a": 1}, {"a": 2}]})
        );
    }

    #[test]
    fn test_single_line_becomes_metadata() {
        let doc = compact(
            "s2",
            b"{\"note\":\"hi\"}\n",
            Some(Map::new()),
            MetadataConvention::LineCount,
        )
        .unwrap();

        assert_eq!(doc.metadata, object(json!({"note": "hi"})));
        assert!(doc.messages.is_empty());
    }

    #[test]
    fn test_single_line_metadata_overlaid_by_caller() {
        let doc = compact(
            "s2",
            b"{\"note\":\"hi\",\"tag\":\"old\"}",
            Some(object(json!({"tag": "new"}))),
            MetadataConvention::LineCount,
        )
        .unwrap();

        assert_eq!(doc.metadata, object(json!({"note": "hi", "tag": "new"})));
    }

    #[test]
    fn test_single_non_object_line_stays_a_message() {
        let doc = compact("s", b"[1,2]\n", None, MetadataConvention::LineCount).unwrap();

        assert!(doc.metadata.is_empty());
        assert_eq!(doc.messages, vec![json!([1, 2])]);
    }

    #[test]
    fn test_empty_stream() {
        let doc = compact("s", b"\n  \n", None, MetadataConvention::LineCount).unwrap();
        assert_eq!(doc, FinalizedDocument::default());
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = compact(
            "s",
            b"{\"a\":1}\n\n{broken\n",
            None,
            MetadataConvention::LineCount,
        )
        .unwrap_err();

        assert!(matches!(err, StreamError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_marker_convention() {
        let content = b"{\"$metadata\":{\"title\":\"t\"}}\n{\"a\":1}\n";
        let doc = compact("s", content, None, MetadataConvention::Marker).unwrap();

        assert_eq!(doc.metadata, object(json!({"title": "t"})));
        assert_eq!(doc.messages, vec![json!({"a": 1})]);
    }

    #[test]
    fn test_marker_convention_keeps_single_plain_line_as_message() {
        let doc = compact("s2", b"{\"note\":\"hi\"}\n", None, MetadataConvention::Marker).unwrap();

        assert!(doc.metadata.is_empty());
        assert_eq!(doc.messages, vec![json!({"note": "hi"})]);
    }

    #[test]
    fn test_marker_only_recognized_on_first_line() {
        let content = b"{\"a\":1}\n{\"$metadata\":{\"title\":\"t\"}}\n";
        let doc = compact("s", content, None, MetadataConvention::Marker).unwrap();

        assert!(doc.metadata.is_empty());
        assert_eq!(doc.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_write_document_renames_into_place() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("complete").join("s.json");
        let temp = temp_dir.path().join("complete").join(".s.x.tmp");
        let doc = FinalizedDocument {
            metadata: object(json!({"k": "v"})),
            messages: vec![json!({"a": 1})],
        };

        write_document(&doc, &target, &temp).await.unwrap();

        let stored: FinalizedDocument =
            serde_json::from_slice(&std::fs::read(&target).unwrap()).unwrap();
        assert_eq!(stored, doc);
        assert!(!temp.exists());
    }
}
