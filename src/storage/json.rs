use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::HistoryStore;
use crate::service::HistoryEntry;

const CACHE_FILE_NAME: &str = "history.json";

/// History cache kept as one JSON array on disk.
pub struct JsonHistoryCache {
    path: PathBuf,
}

impl JsonHistoryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache file under the platform data directory.
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .context("Failed to get data directory")?
            .join("rotation");
        fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;
        Ok(data_dir.join(CACHE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for JsonHistoryCache {
    fn backend_name(&self) -> &str {
        "json"
    }

    fn load(&self) -> Vec<HistoryEntry> {
        if !self.path.exists() {
            tracing::info!("No history cache at {}, starting cold", self.path.display());
            return Vec::new();
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Could not read history cache {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<HistoryEntry>>(&contents) {
            Ok(entries) => {
                tracing::info!("Loaded {} items from cache", entries.len());
                entries
            }
            Err(e) => {
                tracing::warn!("History cache corrupt, starting fresh: {}", e);
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(dir).context("Failed to create cache directory")?;

        tracing::info!("Writing {} items to cache", entries.len());
        let encoded = serde_json::to_vec_pretty(entries)
            .context("Failed to serialize history cache")?;

        // Write beside the target so the rename stays on one filesystem.
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .context("Failed to create temporary cache file")?;
        tmp.write_all(&encoded)
            .context("Failed to write history cache")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to flush history cache")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}
