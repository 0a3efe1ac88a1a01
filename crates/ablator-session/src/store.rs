//! Chat persistence.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ablator_utils::atomic_write::write_json_atomic;
use ablator_utils::error::SessionError;

use crate::message::SessionBundle;

/// Persists session bundles by id
pub trait ChatStore: Send + Sync {
    fn save(&self, bundle: &SessionBundle) -> Result<(), SessionError>;

    fn load(&self, id: &str) -> Result<SessionBundle, SessionError>;

    fn delete(&self, id: &str) -> Result<(), SessionError>;
}

/// One pretty-printed JSON file per session under a chats directory.
#[derive(Debug, Clone)]
pub struct FileChatStore {
    dir: PathBuf,
}

impl FileChatStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Ids of every stored session, sorted.
    pub fn list(&self) -> Result<Vec<String>, SessionError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SessionError::Persist {
                    id: "*".to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let mut ids: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_suffix(".json"))
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl ChatStore for FileChatStore {
    fn save(&self, bundle: &SessionBundle) -> Result<(), SessionError> {
        let path = self.path_for(&bundle.id);
        write_json_atomic(&path, bundle).map_err(|e| SessionError::Persist {
            id: bundle.id.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(session = %bundle.id, path = %path.display(), "Saved chat");
        Ok(())
    }

    fn load(&self, id: &str) -> Result<SessionBundle, SessionError> {
        let path = self.path_for(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SessionError::NotFound { id: id.to_string() });
            }
            Err(e) => {
                return Err(SessionError::Persist {
                    id: id.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        serde_json::from_str(&content).map_err(|e| SessionError::Persist {
            id: id.to_string(),
            reason: format!("corrupt chat file {}: {e}", path.display()),
        })
    }

    fn delete(&self, id: &str) -> Result<(), SessionError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SessionError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(SessionError::Persist {
                id: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// In-memory store for tests and embedders without a chats directory.
#[derive(Debug, Default)]
pub struct MemoryChatStore {
    chats: Mutex<BTreeMap<String, SessionBundle>>,
}

impl MemoryChatStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chats.lock().map(|chats| chats.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned(id: &str) -> SessionError {
    SessionError::Persist {
        id: id.to_string(),
        reason: "chat store lock poisoned".to_string(),
    }
}

impl ChatStore for MemoryChatStore {
    fn save(&self, bundle: &SessionBundle) -> Result<(), SessionError> {
        self.chats
            .lock()
            .map_err(|_| poisoned(&bundle.id))?
            .insert(bundle.id.clone(), bundle.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<SessionBundle, SessionError> {
        self.chats
            .lock()
            .map_err(|_| poisoned(id))?
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.chats
            .lock()
            .map_err(|_| poisoned(id))?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }
}
