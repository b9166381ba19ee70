//! Settings stores — where the pipeline reads `ttsUrl` / `voice` from.
//!
//! The coordinator only ever reads; updates come from the control surface.
//! Stored values overlay the store's defaults, so a settings file only needs
//! to name what it changes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use readit_core::types::{Settings, SettingsPatch};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::SettingsError;

/// Read/update access to user settings.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Current settings. Never fails: unreadable storage yields defaults.
    async fn settings(&self) -> Settings;

    /// Merge `patch` into the stored settings and return the result.
    async fn update(&self, patch: SettingsPatch) -> Result<Settings, SettingsError>;
}

/// Settings held in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: RwLock<Settings>,
}

impl MemorySettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl SettingsProvider for MemorySettings {
    async fn settings(&self) -> Settings {
        self.inner.read().await.clone()
    }

    async fn update(&self, patch: SettingsPatch) -> Result<Settings, SettingsError> {
        let mut guard = self.inner.write().await;
        guard.apply(patch);
        Ok(guard.clone())
    }
}

/// Settings persisted as a JSON file, overlaid on fixed defaults.
pub struct FileSettings {
    path: PathBuf,
    defaults: Settings,
    write_lock: Mutex<()>,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>, defaults: Settings) -> Self {
        Self {
            path: path.into(),
            defaults,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Settings, SettingsError> {
        let mut settings = self.defaults.clone();
        match tokio::fs::read(&self.path).await {
            Ok(raw) => {
                let stored: SettingsPatch = serde_json::from_slice(&raw)?;
                settings.apply(stored);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("settings: {} missing, using defaults", self.path.display());
            }
            Err(e) => return Err(e.into()),
        }
        Ok(settings)
    }

    async fn store(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let partial = self.path.with_extension("json.partial");
        let body = serde_json::to_vec_pretty(settings)?;
        tokio::fs::write(&partial, body).await?;
        tokio::fs::rename(&partial, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsProvider for FileSettings {
    async fn settings(&self) -> Settings {
        match self.load().await {
            Ok(s) => s,
            Err(e) => {
                warn!("settings: {e}; falling back to defaults");
                self.defaults.clone()
            }
        }
    }

    async fn update(&self, patch: SettingsPatch) -> Result<Settings, SettingsError> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.load().await?;
        settings.apply(patch);
        self.store(&settings).await?;
        Ok(settings)
    }
}
