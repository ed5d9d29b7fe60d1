//! Cached append handles for active streams
//!
//! Each key owns one [`StreamSlot`] inside its operation chain, so every
//! method here that takes `&mut StreamSlot` already runs serialized with the
//! key's appends and rewrites. That includes idle eviction: the timer only
//! schedules a close-if-idle task, it never touches a handle itself.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::error::Result;
use crate::observability::Metrics;

/// Per-key handle state, owned by the key's chain
#[derive(Debug, Default)]
pub struct StreamSlot {
    file: Option<File>,
    last_used: Option<Instant>,
    timer_armed: bool,
}

impl StreamSlot {
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// Result of a close-if-idle check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleCheck {
    /// No handle was cached
    NotOpen,
    /// The handle was idle for the full timeout and has been closed
    Evicted,
    /// The handle was used recently; check again after this long
    Busy(Duration),
}

pub struct HandleManager {
    dir: PathBuf,
    idle_timeout: Duration,
    dir_ready: OnceCell<()>,
    metrics: Arc<Metrics>,
}

impl HandleManager {
    pub fn new(dir: impl Into<PathBuf>, idle_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            dir: dir.into(),
            idle_timeout,
            dir_ready: OnceCell::new(),
            metrics,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Return the key's append handle, opening `path` if nothing is cached
    pub async fn acquire<'s>(
        &self,
        key: &str,
        path: &Path,
        slot: &'s mut StreamSlot,
    ) -> Result<&'s mut File> {
        let file = match slot.file.take() {
            Some(file) => file,
            None => {
                self.ensure_dir().await?;
                let file = open_for_append(key, path).await?;
                self.metrics.handle_opened();
                debug!(key, path = %path.display(), "Opened stream handle");
                file
            }
        };

        slot.last_used = Some(Instant::now());
        Ok(slot.file.insert(file))
    }

    /// Claim the idle timer for this slot; true means the caller must start one
    pub fn arm_timer(&self, slot: &mut StreamSlot) -> bool {
        if slot.timer_armed || slot.file.is_none() {
            return false;
        }
        slot.timer_armed = true;
        true
    }

    /// Close the handle if it has not been used for the idle timeout
    pub async fn close_if_idle(&self, key: &str, slot: &mut StreamSlot) -> IdleCheck {
        slot.timer_armed = false;

        let last_used = match (&slot.file, slot.last_used) {
            (Some(_), Some(last_used)) => last_used,
            _ => return IdleCheck::NotOpen,
        };

        let remaining = self.idle_timeout.saturating_sub(last_used.elapsed());
        if !remaining.is_zero() {
            slot.timer_armed = true;
            return IdleCheck::Busy(remaining);
        }

        self.close(key, slot, true).await;
        IdleCheck::Evicted
    }

    /// Close the cached handle now, if any. Close failures are swallowed.
    pub async fn release(&self, key: &str, slot: &mut StreamSlot) -> bool {
        self.close(key, slot, false).await
    }

    async fn close(&self, key: &str, slot: &mut StreamSlot, idle: bool) -> bool {
        let Some(mut file) = slot.file.take() else {
            return false;
        };
        slot.last_used = None;

        if let Err(err) = file.flush().await {
            debug!(key, error = %err, "Ignoring flush failure while closing stream handle");
        }
        drop(file);

        self.metrics.handle_closed(idle);
        debug!(key, idle, "Closed stream handle");
        true
    }

    async fn ensure_dir(&self) -> Result<()> {
        self.dir_ready
            .get_or_try_init(|| fs::create_dir_all(&self.dir))
            .await?;
        Ok(())
    }
}

async fn open_for_append(key: &str, path: &Path) -> Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)
        .await?;

    if terminate_torn_tail(&mut file).await? {
        info!(key, path = %path.display(), "Terminated partial trailing line before appending");
    }
    Ok(file)
}

/// A crash mid-append can leave the last line without its newline; close it
/// off so the next record starts on its own line.
async fn terminate_torn_tail(file: &mut File) -> Result<bool> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(false);
    }

    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(false);
    }

    file.write_all(b"\n").await?;
    file.flush().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &Path, idle: Duration) -> (HandleManager, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (HandleManager::new(dir, idle, Arc::clone(&metrics)), metrics)
    }

    #[tokio::test]
    async fn test_acquire_opens_once_and_creates_dir() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("active");
        let (handles, metrics) = manager(&dir, Duration::from_secs(5));
        let path = dir.join("s1.jsonl");
        let mut slot = StreamSlot::default();

        handles.acquire("s1", &path, &mut slot).await.unwrap().write_all(b"a\n").await.unwrap();
        let file = handles.acquire("s1", &path, &mut slot).await.unwrap();
        file.write_all(b"b\n").await.unwrap();
        file.flush().await.unwrap();

        assert!(slot.is_open());
        assert_eq!(metrics.snapshot().handles_opened, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }

    #[tokio::test]
    async fn test_reopen_after_release_appends_at_end() {
        let temp_dir = TempDir::new().unwrap();
        let (handles, metrics) = manager(temp_dir.path(), Duration::from_secs(5));
        let path = temp_dir.path().join("s1.jsonl");
        let mut slot = StreamSlot::default();

        let file = handles.acquire("s1", &path, &mut slot).await.unwrap();
        file.write_all(b"first\n").await.unwrap();
        assert!(handles.release("s1", &mut slot).await);
        assert!(!handles.release("s1", &mut slot).await);

        let file = handles.acquire("s1", &path, &mut slot).await.unwrap();
        file.write_all(b"second\n").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.handles_opened, 2);
        assert_eq!(snapshot.handles_evicted, 0);
        assert_eq!(snapshot.open_handles, 1);
    }

    #[tokio::test]
    async fn test_torn_tail_is_terminated_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let (handles, _) = manager(temp_dir.path(), Duration::from_secs(5));
        let path = temp_dir.path().join("s1.jsonl");
        std::fs::write(&path, "{\"a\":1}\n{\"a\":").unwrap();
        let mut slot = StreamSlot::default();

        let file = handles.acquire("s1", &path, &mut slot).await.unwrap();
        file.write_all(b"{\"a\":2}\n").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\"a\":1}\n{\"a\":\n{\"a\":2}\n"
        );
    }

    #[tokio::test]
    async fn test_close_if_idle() {
        let temp_dir = TempDir::new().unwrap();
        let (handles, metrics) = manager(temp_dir.path(), Duration::from_millis(30));
        let path = temp_dir.path().join("s1.jsonl");
        let mut slot = StreamSlot::default();

        assert_eq!(handles.close_if_idle("s1", &mut slot).await, IdleCheck::NotOpen);

        handles.acquire("s1", &path, &mut slot).await.unwrap();
        assert!(handles.arm_timer(&mut slot));
        assert!(!handles.arm_timer(&mut slot));

        assert!(matches!(
            handles.close_if_idle("s1", &mut slot).await,
            IdleCheck::Busy(_)
        ));
        assert!(slot.is_open());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handles.close_if_idle("s1", &mut slot).await, IdleCheck::Evicted);
        assert!(!slot.is_open());
        assert_eq!(metrics.snapshot().handles_evicted, 1);
        assert_eq!(metrics.snapshot().open_handles, 0);
    }
}
