//! User preference storage.
//!
//! Persists preferences to disk at `{working_dir}/.taskmaster/settings.json`.
//! The only preference is the color theme; when unset the front end follows
//! the system setting.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Explicit theme choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    /// Theme to show given the stored preference and the system setting.
    pub fn effective(preference: Option<Theme>, system_prefers_dark: bool) -> Theme {
        preference.unwrap_or(if system_prefers_dark {
            Theme::Dark
        } else {
            Theme::Light
        })
    }

    pub fn toggled(self) -> Theme {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// Persisted preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// `None` follows the system setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

/// In-memory store for preferences with disk persistence.
#[derive(Debug)]
pub struct SettingsStore {
    settings: RwLock<Settings>,
    storage_path: PathBuf,
}

impl SettingsStore {
    /// Create a settings store, loading from disk if available.
    pub async fn new(state_dir: &Path) -> Self {
        let storage_path = state_dir.join("settings.json");

        let settings = if storage_path.exists() {
            match Self::load_from_path(&storage_path) {
                Ok(s) => {
                    tracing::info!("Loaded settings from {}", storage_path.display());
                    s
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load settings from {}: {}, using defaults",
                        storage_path.display(),
                        e
                    );
                    Settings::default()
                }
            }
        } else {
            tracing::debug!(
                "No settings file found at {}, using defaults",
                storage_path.display()
            );
            Settings::default()
        };

        Self {
            settings: RwLock::new(settings),
            storage_path,
        }
    }

    fn load_from_path(path: &Path) -> Result<Settings, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    async fn save_to_disk(&self) -> Result<(), std::io::Error> {
        let settings = self.settings.read().await;

        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&*settings)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(&self.storage_path, contents)?;
        tracing::debug!("Saved settings to {}", self.storage_path.display());
        Ok(())
    }

    pub async fn get(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn theme(&self) -> Option<Theme> {
        self.settings.read().await.theme
    }

    /// Store a theme preference (`None` to follow the system).
    ///
    /// Returns the previous value if it changed, or None if unchanged.
    pub async fn set_theme(&self, theme: Option<Theme>) -> Result<Option<Theme>, std::io::Error> {
        let mut settings = self.settings.write().await;
        let previous = settings.theme;

        if previous != theme {
            settings.theme = theme;
            drop(settings); // Release lock before saving
            self.save_to_disk().await?;
            Ok(previous)
        } else {
            Ok(None)
        }
    }

    /// Flip the theme the user currently sees and store it explicitly.
    pub async fn toggle_theme(&self, system_prefers_dark: bool) -> Result<Theme, std::io::Error> {
        let next = {
            let mut settings = self.settings.write().await;
            let next = Theme::effective(settings.theme, system_prefers_dark).toggled();
            settings.theme = Some(next);
            next
        };
        self.save_to_disk().await?;
        Ok(next)
    }
}

/// Shared settings store wrapped in Arc for concurrent access.
pub type SharedSettingsStore = Arc<SettingsStore>;
