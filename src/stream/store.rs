use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::error::{Result, StreamError};
use super::finalize::{compact, write_document};
use super::handles::{HandleManager, IdleCheck, StreamSlot};
use super::paths::{StreamPaths, is_temp_file_name, validate_key};
use super::record::{FinalizedDocument, require_record_id, to_line, validate_line};
use super::rewrite::{RewriteAction, RewritePlan, rewrite_stream};
use super::scheduler::{Completion, KeyedScheduler};
use crate::config::{MetadataConvention, StorageConfig};
use crate::observability::{Metrics, MetricsSnapshot};

/// Owner of every active stream and complete document under two directories
///
/// Append, edit, delete, finalize and idle eviction for one key all run on
/// that key's operation chain, in submission order. Cloning is cheap and
/// shares the same chains.
#[derive(Clone)]
pub struct StreamStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    paths: StreamPaths,
    handles: HandleManager,
    scheduler: KeyedScheduler<StreamSlot>,
    record_id_field: String,
    metadata_convention: MetadataConvention,
    metrics: Arc<Metrics>,
}

type Slot = Arc<AsyncMutex<StreamSlot>>;

impl StreamStore {
    /// Open the store, creating both directories and removing temp files a
    /// crash may have left behind
    pub async fn open(config: &StorageConfig, metrics: Arc<Metrics>) -> Result<Self> {
        info!(
            active_dir = %config.active_dir.display(),
            complete_dir = %config.complete_dir.display(),
            idle_timeout = %config.idle_timeout,
            "Opening stream store"
        );

        fs::create_dir_all(&config.active_dir).await?;
        fs::create_dir_all(&config.complete_dir).await?;
        let removed = remove_stale_temp_files(&config.active_dir).await?
            + remove_stale_temp_files(&config.complete_dir).await?;
        if removed > 0 {
            warn!(removed, "Removed temp files left by an interrupted rewrite or finalize");
        }

        let paths = StreamPaths::new(&config.active_dir, &config.complete_dir);
        let handles = HandleManager::new(
            &config.active_dir,
            config.idle_timeout.as_duration(),
            Arc::clone(&metrics),
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                paths,
                handles,
                scheduler: KeyedScheduler::new(Arc::clone(&metrics)),
                record_id_field: config.record_id_field.clone(),
                metadata_convention: config.metadata_convention,
                metrics,
            }),
        })
    }

    pub fn paths(&self) -> &StreamPaths {
        &self.inner.paths
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Append one pre-serialized JSON line to `key`'s active stream
    ///
    /// The position in the stream is fixed when this call returns; await the
    /// completion to learn whether the write succeeded.
    pub fn append(&self, key: &str, line: impl Into<String>) -> Completion<()> {
        let line = line.into();
        if let Err(err) = validate_key(key).and_then(|()| validate_line(&line)) {
            return Completion::failed(key, err);
        }

        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();
        self.inner.scheduler.schedule(key, move |slot: Slot| async move {
            let mut slot = slot.lock().await;
            inner.append_line(&task_key, &mut slot, &line).await
        })
    }

    /// Serialize `record` onto a single line and append it
    pub fn append_record(&self, key: &str, record: &Value) -> Completion<()> {
        match to_line(record) {
            Ok(line) => self.append(key, line),
            Err(err) => Completion::failed(key, err),
        }
    }

    /// Replace every line whose identifier equals `record`'s with `record`
    ///
    /// Resolves to the number of lines replaced.
    pub fn edit(&self, key: &str, record: &Value) -> Completion<usize> {
        let prepared = validate_key(key)
            .and_then(|()| require_record_id(record, &self.inner.record_id_field))
            .and_then(|target| Ok((target, to_line(record)?)));
        let (target, line) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return Completion::failed(key, err),
        };

        if self.is_untouched(key) {
            debug!(key, "Nothing to edit, stream never written");
            return Completion::ready(key, Ok(0));
        }
        self.schedule_rewrite(key, target, RewriteAction::Replace(line))
    }

    /// Remove every line whose identifier equals `record`'s
    ///
    /// Resolves to the number of lines removed.
    pub fn delete(&self, key: &str, record: &Value) -> Completion<usize> {
        let target = match validate_key(key)
            .and_then(|()| require_record_id(record, &self.inner.record_id_field))
        {
            Ok(target) => target,
            Err(err) => return Completion::failed(key, err),
        };

        if self.is_untouched(key) {
            debug!(key, "Nothing to delete, stream never written");
            return Completion::ready(key, Ok(0));
        }
        self.schedule_rewrite(key, target, RewriteAction::Omit)
    }

    /// Compact `key`'s active stream into its complete document and remove
    /// the active file
    ///
    /// Runs after every operation already submitted for `key`. Appends
    /// submitted afterwards start a new active stream.
    pub fn finalize(
        &self,
        key: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Completion<FinalizedDocument> {
        if let Err(err) = validate_key(key) {
            return Completion::failed(key, err);
        }
        if self.is_untouched(key) {
            return Completion::failed(key, StreamError::StreamNotFound(key.to_string()));
        }

        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();
        self.inner.scheduler.schedule(key, move |slot: Slot| async move {
            let mut slot = slot.lock().await;
            inner.finalize_stream(&task_key, &mut slot, metadata).await
        })
    }

    /// Records currently in `key`'s active stream; malformed lines are skipped
    pub fn read_active(&self, key: &str) -> Completion<Vec<Value>> {
        if let Err(err) = validate_key(key) {
            return Completion::failed(key, err);
        }
        if self.is_untouched(key) {
            return Completion::failed(key, StreamError::StreamNotFound(key.to_string()));
        }

        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();
        self.inner.scheduler.schedule(key, move |_slot: Slot| async move {
            inner.read_active_stream(&task_key).await
        })
    }

    /// Load `key`'s complete document, if it exists
    pub async fn read_completed(&self, key: &str) -> Result<Option<FinalizedDocument>> {
        validate_key(key)?;
        let path = self.inner.paths.complete_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Unlink `key`'s complete document; an absent document is not an error
    ///
    /// Returns whether a file was removed.
    pub async fn delete_completed(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let path = self.inner.paths.complete_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                self.inner.metrics.completed_removed();
                info!(key, "Removed complete document");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(key, "Complete document already absent");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Stop accepting operations, let every chain drain, and close all
    /// cached handles
    ///
    /// Returns the number of handles closed.
    pub async fn shutdown(&self) -> usize {
        let inner = Arc::clone(&self.inner);
        let closes = self.inner.scheduler.seal(|key| {
            let inner = Arc::clone(&inner);
            let key = key.to_string();
            move |slot: Slot| async move {
                let mut slot = slot.lock().await;
                Ok(inner.handles.release(&key, &mut slot).await)
            }
        });

        let chains = closes.len();
        let closed = join_all(closes)
            .await
            .into_iter()
            .filter(|closed| matches!(closed, Ok(true)))
            .count();

        info!(chains, closed, "Stream store shut down");
        closed
    }

    /// True when nothing was ever scheduled for `key` and it has no active file
    ///
    /// Reads, rewrites and finalize of such a key have nothing to wait for or
    /// act on, so they resolve without creating a chain for it.
    fn is_untouched(&self, key: &str) -> bool {
        if self.inner.scheduler.is_sealed() || self.inner.scheduler.has_chain(key) {
            return false;
        }
        matches!(
            std::fs::symlink_metadata(self.inner.paths.active_path(key)),
            Err(err) if err.kind() == ErrorKind::NotFound
        )
    }

    fn schedule_rewrite(&self, key: &str, target: Value, action: RewriteAction) -> Completion<usize> {
        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();
        self.inner.scheduler.schedule(key, move |slot: Slot| async move {
            let mut slot = slot.lock().await;
            inner.rewrite(&task_key, &mut slot, &target, action).await
        })
    }
}

impl StoreInner {
    async fn append_line(self: &Arc<Self>, key: &str, slot: &mut StreamSlot, line: &str) -> Result<()> {
        let path = self.paths.active_path(key);
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let file = self.handles.acquire(key, &path, slot).await?;
        let written = match file.write_all(&buf).await {
            Ok(()) => file.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            // Reopen on the next append rather than reuse a handle in an unknown state.
            self.handles.release(key, slot).await;
            return Err(err.into());
        }

        if self.handles.arm_timer(slot) {
            self.spawn_idle_timer(key, self.handles.idle_timeout());
        }
        self.metrics.record_appended();
        debug!(key, bytes = buf.len(), "Appended record");
        Ok(())
    }

    async fn rewrite(
        &self,
        key: &str,
        slot: &mut StreamSlot,
        target: &Value,
        action: RewriteAction,
    ) -> Result<usize> {
        // The rename swaps the inode under any cached handle.
        self.handles.release(key, slot).await;

        let omit = action == RewriteAction::Omit;
        let plan = RewritePlan {
            id_field: &self.record_id_field,
            target,
            action,
        };
        let affected = rewrite_stream(
            &self.paths.active_path(key),
            &self.paths.active_temp_path(key),
            &plan,
        )
        .await?;

        if omit {
            self.metrics.records_deleted(affected);
        } else {
            self.metrics.records_edited(affected);
        }
        info!(key, target = %target, affected, deleted = omit, "Rewrote stream");
        Ok(affected)
    }

    async fn finalize_stream(
        &self,
        key: &str,
        slot: &mut StreamSlot,
        metadata: Option<Map<String, Value>>,
    ) -> Result<FinalizedDocument> {
        self.handles.release(key, slot).await;

        let active = self.paths.active_path(key);
        let content = match fs::read(&active).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StreamError::StreamNotFound(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let document = compact(key, &content, metadata, self.metadata_convention)?;
        write_document(
            &document,
            &self.paths.complete_path(key),
            &self.paths.complete_temp_path(key),
        )
        .await?;

        match fs::remove_file(&active).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        self.metrics.stream_finalized();
        info!(key, messages = document.messages.len(), "Finalized stream");
        Ok(document)
    }

    async fn read_active_stream(&self, key: &str) -> Result<Vec<Value>> {
        let content = match fs::read(self.paths.active_path(key)).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StreamError::StreamNotFound(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for (index, line) in content.split(|byte| *byte == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Value>(line) {
                Ok(value) => records.push(value),
                Err(err) => warn!(key, line = index + 1, error = %err, "Skipping malformed record"),
            }
        }
        Ok(records)
    }

    async fn close_if_idle(self: &Arc<Self>, key: &str, slot: &mut StreamSlot) {
        match self.handles.close_if_idle(key, slot).await {
            IdleCheck::Evicted => debug!(key, "Evicted idle stream handle"),
            IdleCheck::Busy(remaining) => self.spawn_idle_timer(key, remaining),
            IdleCheck::NotOpen => {}
        }
    }

    /// After `delay`, queue a close-if-idle check on `key`'s chain
    fn spawn_idle_timer(self: &Arc<Self>, key: &str, delay: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let key = key.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };

            let task_inner = Arc::clone(&inner);
            let task_key = key.clone();
            let check = inner.scheduler.schedule(&key, move |slot: Slot| async move {
                let mut slot = slot.lock().await;
                task_inner.close_if_idle(&task_key, &mut slot).await;
                Ok(())
            });
            drop(inner);

            // Closed after shutdown; the handle was released there.
            let _ = check.await;
        });
    }
}

async fn remove_stale_temp_files(dir: &Path) -> Result<usize> {
    let mut entries = fs::read_dir(dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_temp_file_name(name) {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(err) => warn!(path = %entry.path().display(), error = %err, "Failed to remove stale temp file"),
        }
    }

    Ok(removed)
}
