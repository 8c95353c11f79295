use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::types::Resolution;

/// Writes raw provider responses to disk, one pretty-printed file per fetch.
#[derive(Debug, Clone)]
pub struct PayloadArchive {
    dir: PathBuf,
}

impl PayloadArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name is `<resolution>-<YYYYMMDDTHHMMSSZ>.json`.
    pub fn path_for(&self, resolution: Resolution, fetched_at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "{}-{}.json",
            resolution.as_str(),
            fetched_at.format("%Y%m%dT%H%M%SZ")
        ))
    }

    pub fn save(
        &self,
        resolution: Resolution,
        payload: &serde_json::Value,
        fetched_at: DateTime<Utc>,
    ) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path_for(resolution, fetched_at);
        let body = serde_json::to_vec_pretty(payload).map_err(io::Error::other)?;
        std::fs::write(&path, body)?;

        tracing::debug!("Archived {} payload to {}", resolution, path.display());
        Ok(path)
    }
}
