//! JSON file-based SessionRepository implementation.

use crate::storage::AtomicJsonFile;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chorus_core::session::{SessionRecord, SessionRepository};
use std::fs;
use std::path::{Path, PathBuf};

/// A repository that stores each session record as its own JSON file.
///
/// ```text
/// sessions_dir/
/// ├── 1b4e28ba-2fa1-11d2-883f-0016d3cca427.json
/// └── 6fa459ea-ee8a-3ca4-894e-db77e160355e.json
/// ```
///
/// File I/O runs on the blocking pool so the controller's read loops are
/// never stalled by a slow disk.
#[derive(Debug, Clone)]
pub struct JsonSessionRepository {
    sessions_dir: PathBuf,
}

impl JsonSessionRepository {
    /// Creates a repository rooted at `sessions_dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(sessions_dir: impl AsRef<Path>) -> Result<Self> {
        let sessions_dir = sessions_dir.as_ref().to_path_buf();
        fs::create_dir_all(&sessions_dir).with_context(|| {
            format!("Failed to create sessions directory {}", sessions_dir.display())
        })?;
        Ok(Self { sessions_dir })
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn record_file(&self, session_id: &str) -> Result<AtomicJsonFile<SessionRecord>> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            bail!("Invalid session id '{}'", session_id);
        }
        Ok(AtomicJsonFile::new(
            self.sessions_dir.join(format!("{session_id}.json")),
        ))
    }
}

#[async_trait]
impl SessionRepository for JsonSessionRepository {
    async fn find_by_id(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let file = self.record_file(session_id)?;
        tokio::task::spawn_blocking(move || {
            file.load()
                .with_context(|| format!("Failed to load {}", file.path().display()))
        })
        .await
        .context("Session load task panicked")?
    }

    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let file = self.record_file(&record.session.id)?;
        let session_id = record.session.id.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            file.save(&record)
                .with_context(|| format!("Failed to save {}", file.path().display()))
        })
        .await
        .context("Session save task panicked")??;

        tracing::debug!("[JsonSessionRepository] Saved session {}", session_id);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let file = self.record_file(session_id)?;
        tokio::task::spawn_blocking(move || {
            file.remove()
                .with_context(|| format!("Failed to delete {}", file.path().display()))
        })
        .await
        .context("Session delete task panicked")?
    }

    async fn list_all(&self) -> Result<Vec<SessionRecord>> {
        let sessions_dir = self.sessions_dir.clone();
        tokio::task::spawn_blocking(move || list_records(&sessions_dir))
            .await
            .context("Session list task panicked")?
    }
}

fn list_records(sessions_dir: &Path) -> Result<Vec<SessionRecord>> {
    let entries = fs::read_dir(sessions_dir)
        .with_context(|| format!("Failed to read {}", sessions_dir.display()))?;

    let mut records = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_record = path.extension().is_some_and(|ext| ext == "json")
            && !path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if !is_record {
            continue;
        }

        match AtomicJsonFile::<SessionRecord>::new(path.clone()).load() {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    "[JsonSessionRepository] Skipping unreadable record {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }

    records.sort_by(|a, b| b.session.updated_at.cmp(&a.session.updated_at));
    Ok(records)
}
