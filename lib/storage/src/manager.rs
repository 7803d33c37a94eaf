use crate::lmdb_storage::LmdbBackend;
use parking_lot::RwLock;
use polydex_core::{Error, Indexer, IndexerConfig, MemoryBackend, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const INDEXES_DIR: &str = "indexes";

/// Manages named indexes.
///
/// In memory mode indexes live only as long as the manager. In persistent
/// mode every index is an LMDB environment under `<data_dir>/indexes/<name>`
/// and all of them are reopened by [`StorageManager::open`].
pub struct StorageManager {
    indexes: RwLock<HashMap<String, Arc<Indexer>>>,
    data_dir: Option<PathBuf>,
}

impl StorageManager {
    pub fn in_memory() -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            data_dir: None,
        }
    }

    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let root = data_dir.join(INDEXES_DIR);
        std::fs::create_dir_all(&root)?;

        let mut indexes = HashMap::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "skipping index directory with a non-utf8 name");
                continue;
            };
            let backend = LmdbBackend::open(entry.path(), None)?;
            let config = backend.config().clone();
            let indexer = Indexer::with_backend(Arc::new(backend), &config)?;
            indexes.insert(name, Arc::new(indexer));
        }

        info!(data_dir = %data_dir.display(), indexes = indexes.len(), "storage manager opened");
        Ok(Self {
            indexes: RwLock::new(indexes),
            data_dir: Some(data_dir),
        })
    }

    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.data_dir.is_some()
    }

    #[inline]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Create a new index. Fails if the name is taken.
    pub fn create_index(&self, name: &str, config: &IndexerConfig) -> Result<Arc<Indexer>> {
        validate_name(name)?;
        let mut indexes = self.indexes.write();
        if indexes.contains_key(name) {
            return Err(Error::Configuration(format!("index '{}' already exists", name)));
        }

        let indexer = match &self.data_dir {
            Some(dir) => {
                let backend = LmdbBackend::open(dir.join(INDEXES_DIR).join(name), Some(config))?;
                Indexer::with_backend(Arc::new(backend), config)?
            }
            None => Indexer::with_backend(Arc::new(MemoryBackend::new(config.schema()?)), config)?,
        };
        let indexer = Arc::new(indexer);
        indexes.insert(name.to_string(), indexer.clone());
        info!(index = name, backend = indexer.backend_kind(), "created index");
        Ok(indexer)
    }

    /// Return the index `name`, creating it from `config` if it does not
    /// exist. An existing index must have the same schema.
    pub fn get_or_create_index(&self, name: &str, config: &IndexerConfig) -> Result<Arc<Indexer>> {
        if let Some(existing) = self.get_index(name) {
            if existing.schema() != &config.schema()? {
                return Err(Error::Configuration(format!(
                    "index '{}' exists with a different field encoding set",
                    name
                )));
            }
            return Ok(existing);
        }
        self.create_index(name, config)
    }

    #[inline]
    pub fn get_index(&self, name: &str) -> Option<Arc<Indexer>> {
        self.indexes.read().get(name).cloned()
    }

    pub fn index(&self, name: &str) -> Result<Arc<Indexer>> {
        self.get_index(name)
            .ok_or_else(|| Error::NotFound(format!("index '{}'", name)))
    }

    /// Drop an index and, in persistent mode, its files.
    pub fn drop_index(&self, name: &str) -> Result<bool> {
        let removed = self.indexes.write().remove(name);
        let Some(indexer) = removed else {
            return Ok(false);
        };
        drop(indexer);
        if let Some(dir) = &self.data_dir {
            let path = dir.join(INDEXES_DIR).join(name);
            if path.exists() {
                std::fs::remove_dir_all(&path)?;
            }
        }
        info!(index = name, "dropped index");
        Ok(true)
    }

    #[must_use]
    pub fn list_indexes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort();
        names
    }

    #[inline]
    #[must_use]
    pub fn index_exists(&self, name: &str) -> bool {
        self.indexes.read().contains_key(name)
    }
}

// Index names become directory names
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "invalid index name '{}': use ascii letters, digits, '-' and '_'",
            name
        )))
    }
}
