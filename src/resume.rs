//! Resume State: the persistent checkpoint of already-migrated keys.
//!
//! A flat JSON document, atomic write via temp-file-then-rename,
//! `load_or_init` on startup. The completed set is carried as a sorted
//! map on the wire for deterministic JSON diffs, and rebuilt into a
//! `HashSet<String>` in memory for O(1) membership tests.
//!
//! A key is added to the completed set only *after* its value and TTL
//! have been written to the target without error — the mark is the
//! commit point, never moved earlier as an "optimization."

use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ResumeFile {
    processed_keys: std::collections::BTreeMap<String, bool>,
    start_time: DateTime<Utc>,
    last_key: Option<String>,
    total_keys: usize,
}

/// The in-memory Resume State. `completed` is kept as a `HashSet` for
/// O(1) average membership tests; the on-disk shape stays a flat object,
/// `processed_keys`, used as a set with every value `true`.
#[derive(Debug, Clone)]
pub struct ResumeState {
    completed: HashSet<String>,
    pub start_time: DateTime<Utc>,
    pub last_key: Option<String>,
    pub total_keys: usize,
}

impl ResumeState {
    /// Loads an existing checkpoint, or starts a fresh one. The checkpoint
    /// file is disposable: a corrupt or unreadable file is logged and
    /// treated as empty, and the run restarts from scratch.
    pub fn load_or_init(path: impl AsRef<Path>, total_keys: usize) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<ResumeFile>(&raw) {
                    Ok(file) => {
                        tracing::info!(
                            resume_file = %path.display(),
                            completed = file.processed_keys.len(),
                            "resuming from existing checkpoint"
                        );
                        return Self {
                            completed: file.processed_keys.into_keys().collect(),
                            start_time: file.start_time,
                            last_key: file.last_key,
                            total_keys: file.total_keys,
                        };
                    }
                    Err(err) => {
                        tracing::warn!(resume_file = %path.display(), error = %err, "resume file is corrupt; starting fresh");
                    }
                },
                Err(err) => {
                    tracing::warn!(resume_file = %path.display(), error = %err, "failed to read resume file; starting fresh");
                }
            }
        }

        Self {
            completed: HashSet::new(),
            start_time: Utc::now(),
            last_key: None,
            total_keys,
        }
    }

    pub fn is_completed(&self, key: &str) -> bool {
        self.completed.contains(key)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Marks `key` as migrated. Callers MUST only call this after the
    /// value and TTL have been written to the target without error — the
    /// mark is the commit point.
    pub fn mark_completed(&mut self, key: &str) {
        self.completed.insert(key.to_string());
        self.last_key = Some(key.to_string());
    }

    /// Atomic write: serialize to a sibling temp path, then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| eyre!("failed to create resume directory {}: {e}", parent.display()))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o755));
                }
            }
        }

        let file = ResumeFile {
            processed_keys: self.completed.iter().map(|k| (k.clone(), true)).collect(),
            start_time: self.start_time,
            last_key: self.last_key.clone(),
            total_keys: self.total_keys,
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| eyre!("failed to serialize resume state: {e}"))?;

        let tmp_path = tmp_path_for(path);
        fs::write(&tmp_path, json).map_err(|e| eyre!("failed to write temp resume file {}: {e}", tmp_path.display()))?;

        if let Err(err) = fs::rename(&tmp_path, path) {
            if cfg!(windows) {
                let _ = fs::remove_file(path);
                fs::rename(&tmp_path, path).map_err(|e| eyre!("failed to replace resume file {}: {e}", path.display()))?;
            } else {
                return Err(eyre!("failed to replace resume file {}: {err}", path.display()));
            }
        }
        Ok(())
    }

    /// Deletes the checkpoint. Called once the engine reaches `Succeeded`.
    pub fn delete(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            fs::remove_file(path).map_err(|e| eyre!("failed to delete resume file {}: {e}", path.display()))?;
        }
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
