//! redb database handle shared by the stores.
//!
//! One [`Db`] wraps one redb file. The individual stores (`devices`,
//! `registers`, `readings`) open their own tables on it; all writes commit
//! atomically per operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::Database;

use crate::{Error, Result};

/// Shared database handle.
#[derive(Clone)]
pub struct Db {
    db: Arc<Database>,
    path: String,
    /// Actual file path for temporary databases (for cleanup on drop).
    temp_path: Option<Arc<TempDbFile>>,
}

struct TempDbFile(PathBuf);

impl Drop for TempDbFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            tracing::debug!("failed to remove temporary database {}: {}", self.0.display(), e);
        }
    }
}

impl Db {
    /// Open (or create) a database at the given path, creating parent
    /// directories as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            Database::create(path_ref)?
        };

        Ok(Self {
            db: Arc::new(db),
            path: path_ref.to_string_lossy().to_string(),
            temp_path: None,
        })
    }

    /// Create a throwaway database backed by a temp file.
    ///
    /// redb has no true in-memory mode; the file is removed when the last
    /// clone of this handle drops.
    pub fn memory() -> Result<Self> {
        let temp = std::env::temp_dir().join(format!("ironview_{}.redb", uuid::Uuid::new_v4()));
        let db = Database::create(&temp)?;
        Ok(Self {
            db: Arc::new(db),
            path: ":memory:".to_string(),
            temp_path: Some(Arc::new(TempDbFile(temp))),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_persistent(&self) -> bool {
        self.temp_path.is_none()
    }

    pub fn begin_write(&self) -> Result<redb::WriteTransaction> {
        self.db.begin_write().map_err(Error::from)
    }

    pub fn begin_read(&self) -> Result<redb::ReadTransaction> {
        self.db.begin_read().map_err(Error::from)
    }
}
