//! On-disk copy of the refresh token so a restart can restore the session.
//!
//! Stored at `{state_dir}/session.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    refresh_token: String,
}

/// File-backed refresh token store.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("session.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored refresh token. A missing or unreadable file yields `None`.
    pub async fn load(&self) -> Option<String> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<PersistedSession>(&contents) {
            Ok(p) if !p.refresh_token.is_empty() => Some(p.refresh_token),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub async fn save(&self, refresh_token: &str) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(&PersistedSession {
            refresh_token: refresh_token.to_string(),
        })
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, contents).await?;
        tracing::debug!("Saved session to {}", self.path.display());
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), std::io::Error> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
