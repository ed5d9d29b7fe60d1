//! Edit/delete by rewriting the active file into a sibling temp file and
//! renaming it over the original
//!
//! Readers of the active path see either the old file or the fully rewritten
//! one. Lines are copied byte-for-byte unless they match the target, so blank,
//! malformed and non-UTF-8 lines survive untouched.

use std::io::ErrorKind;
use std::path::Path;

use serde_json::Value;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

use super::error::Result;
use super::record::record_id;

/// What happens to every line whose identifier matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteAction {
    /// Replace with this serialized record (edit)
    Replace(String),
    /// Drop the line (delete)
    Omit,
}

#[derive(Debug, Clone)]
pub struct RewritePlan<'a> {
    pub id_field: &'a str,
    pub target: &'a Value,
    pub action: RewriteAction,
}

impl RewritePlan<'_> {
    fn matches(&self, line: &[u8]) -> bool {
        if line.iter().all(u8::is_ascii_whitespace) {
            return false;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(value) => record_id(&value, self.id_field) == Some(self.target),
            Err(_) => false,
        }
    }
}

/// Apply `plan` to the file at `source`, staging through `temp`
///
/// Returns the number of lines affected. A missing source is a no-op, and when
/// nothing matches the source is left in place without a rename.
pub async fn rewrite_stream(source: &Path, temp: &Path, plan: &RewritePlan<'_>) -> Result<usize> {
    let input = match File::open(source).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %source.display(), "Nothing to rewrite, stream file absent");
            return Ok(0);
        }
        Err(err) => return Err(err.into()),
    };

    let affected = match copy_transformed(input, temp, plan).await {
        Ok(affected) => affected,
        Err(err) => {
            discard_temp(temp).await;
            return Err(err);
        }
    };

    if affected == 0 {
        discard_temp(temp).await;
        return Ok(0);
    }

    if let Err(err) = fs::rename(temp, source).await {
        discard_temp(temp).await;
        return Err(err.into());
    }

    Ok(affected)
}

async fn copy_transformed(input: File, temp: &Path, plan: &RewritePlan<'_>) -> Result<usize> {
    let output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp)
        .await?;

    let mut reader = BufReader::new(input);
    let mut writer = BufWriter::new(output);
    let mut line = Vec::new();
    let mut affected = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }

        let (body, terminator) = split_terminator(&line);
        if !plan.matches(body) {
            writer.write_all(&line).await?;
            continue;
        }

        affected += 1;
        if let RewriteAction::Replace(replacement) = &plan.action {
            writer.write_all(replacement.as_bytes()).await?;
            // A replaced torn last line still gets a newline.
            writer
                .write_all(if terminator.is_empty() { b"\n".as_slice() } else { terminator })
                .await?;
        }
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(affected)
}

fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    if let Some(body) = line.strip_suffix(b"\r\n") {
        (body, &line[body.len()..])
    } else if let Some(body) = line.strip_suffix(b"\n") {
        (body, &line[body.len()..])
    } else {
        (line, &line[line.len()..])
    }
}

async fn discard_temp(temp: &Path) {
    match fs::remove_file(temp).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %temp.display(), error = %err, "Failed to remove rewrite temp file"),
    }
}
