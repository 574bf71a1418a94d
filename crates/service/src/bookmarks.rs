//! Bookmark storage

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Capability the service needs from a bookmark backend
pub trait BookmarkStore: Send + Sync {
    fn is_bookmarked(&self, id: &str) -> bool;

    /// Flip the bookmark for `id`, returning the new state
    fn toggle(&self, id: &str) -> bool;

    fn list(&self) -> Vec<String>;
}

/// In-process bookmarks, lost on restart
#[derive(Debug, Default)]
pub struct MemoryBookmarks {
    ids: RwLock<BTreeSet<String>>,
}

impl MemoryBookmarks {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BookmarkStore for MemoryBookmarks {
    fn is_bookmarked(&self, id: &str) -> bool {
        self.ids.read().contains(id)
    }

    fn toggle(&self, id: &str) -> bool {
        let mut ids = self.ids.write();
        if ids.remove(id) {
            false
        } else {
            ids.insert(id.to_string());
            true
        }
    }

    fn list(&self) -> Vec<String> {
        self.ids.read().iter().cloned().collect()
    }
}

/// Bookmarks persisted as a JSON array of ids
#[derive(Debug)]
pub struct JsonFileBookmarks {
    path: PathBuf,
    ids: Mutex<BTreeSet<String>>,
}

impl JsonFileBookmarks {
    /// Load from `path`. A missing file starts empty; an unreadable one
    /// starts empty with a warning and is overwritten on the next toggle.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let ids = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Vec<String>>(&text) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Bookmark file is not a JSON id list, starting empty");
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read bookmark file, starting empty");
                BTreeSet::new()
            }
        };
        debug!(path = %path.display(), count = ids.len(), "Loaded bookmarks");

        Self {
            path,
            ids: Mutex::new(ids),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, ids: &BTreeSet<String>) {
        let result = serde_json::to_string_pretty(&ids.iter().collect::<Vec<_>>())
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&self.path, json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to persist bookmarks");
        }
    }
}

impl BookmarkStore for JsonFileBookmarks {
    fn is_bookmarked(&self, id: &str) -> bool {
        self.ids.lock().contains(id)
    }

    fn toggle(&self, id: &str) -> bool {
        let mut ids = self.ids.lock();
        let bookmarked = if ids.remove(id) {
            false
        } else {
            ids.insert(id.to_string());
            true
        };
        self.persist(&ids);
        bookmarked
    }

    fn list(&self) -> Vec<String> {
        self.ids.lock().iter().cloned().collect()
    }
}
