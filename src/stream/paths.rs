/// File layout for active streams and complete documents
///
/// - active:    {active_dir}/{key}.jsonl
/// - complete:  {complete_dir}/{key}.json
/// - temporary: {dir}/.{key}.{uuid}.tmp
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::error::{Result, StreamError};

pub const ACTIVE_EXTENSION: &str = "jsonl";
pub const COMPLETE_EXTENSION: &str = "json";
pub const TEMP_EXTENSION: &str = "tmp";

const MAX_KEY_BYTES: usize = 200;

/// Reject keys that cannot be used verbatim as a file stem
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = |reason: &str| Err(StreamError::InvalidKey(format!("{key:?}: {reason}")));

    if key.is_empty() {
        return invalid("empty");
    }
    if key.len() > MAX_KEY_BYTES {
        return invalid("too long");
    }
    if key.starts_with('.') {
        return invalid("leading '.'");
    }
    if key.contains(['/', '\\', '\0']) {
        return invalid("path separator or NUL");
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct StreamPaths {
    active_dir: PathBuf,
    complete_dir: PathBuf,
}

impl StreamPaths {
    pub fn new(active_dir: impl Into<PathBuf>, complete_dir: impl Into<PathBuf>) -> Self {
        Self {
            active_dir: active_dir.into(),
            complete_dir: complete_dir.into(),
        }
    }

    pub fn active_dir(&self) -> &Path {
        &self.active_dir
    }

    pub fn complete_dir(&self) -> &Path {
        &self.complete_dir
    }

    pub fn active_path(&self, key: &str) -> PathBuf {
        self.active_dir.join(format!("{key}.{ACTIVE_EXTENSION}"))
    }

    pub fn complete_path(&self, key: &str) -> PathBuf {
        self.complete_dir.join(format!("{key}.{COMPLETE_EXTENSION}"))
    }

    /// Fresh sibling temp path for a rewrite of the active file
    pub fn active_temp_path(&self, key: &str) -> PathBuf {
        temp_path(&self.active_dir, key)
    }

    /// Fresh temp path for a complete document about to be renamed into place
    pub fn complete_temp_path(&self, key: &str) -> PathBuf {
        temp_path(&self.complete_dir, key)
    }
}

fn temp_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!(".{key}.{}.{TEMP_EXTENSION}", Uuid::new_v4().simple()))
}

/// True for names produced by the temp path helpers
pub fn is_temp_file_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(&format!(".{TEMP_EXTENSION}"))
}

/// Decode `{key}.json` -> key
pub fn decode_complete_file_name(name: &str) -> Option<&str> {
    let key = name.strip_suffix(&format!(".{COMPLETE_EXTENSION}"))?;
    validate_key(key).ok()?;
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("session-123").is_ok());
        assert!(validate_key("a.b").is_ok());

        assert!(validate_key("").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("a\\b").is_err());
        assert!(validate_key("nul\0").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_BYTES + 1)).is_err());
    }

    #[test]
    fn test_stream_paths() {
        let paths = StreamPaths::new("/data/active", "/data/complete");

        assert_eq!(
            paths.active_path("s1"),
            PathBuf::from("/data/active/s1.jsonl")
        );
        assert_eq!(
            paths.complete_path("s1"),
            PathBuf::from("/data/complete/s1.json")
        );
    }

    #[test]
    fn test_temp_paths_are_unique_siblings() {
        let paths = StreamPaths::new("/data/active", "/data/complete");

        let a = paths.active_temp_path("s1");
        let b = paths.active_temp_path("s1");
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(Path::new("/data/active")));

        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(is_temp_file_name(name));
        assert!(name.starts_with(".s1."));
    }

    #[test]
    fn test_decode_complete_file_name() {
        assert_eq!(decode_complete_file_name("s1.json"), Some("s1"));
        assert_eq!(decode_complete_file_name("s1.jsonl"), None);
        assert_eq!(decode_complete_file_name(".s1.abc.tmp"), None);
    }
}
