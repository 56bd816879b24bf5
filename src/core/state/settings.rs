use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{SetupError, SetupResult};

const APP_DIR_NAME: &str = "ServerSetup";
const SETTINGS_FILE: &str = "engine_settings.json";
const DEFAULT_USER_AGENT: &str = "ServerSetup/0.1.0";
const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://s3.amazonaws.com/Minecraft.Download/versions";

/// Tunables for the transaction engine and the downloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub user_agent: String,
    /// Write buffer size for streamed downloads, in bytes.
    pub chunk_size: usize,
    pub connect_timeout_secs: u64,
    /// Whole-request deadline. `None` lets a transfer run as long as it keeps going.
    pub request_timeout_secs: Option<u64>,
    /// Where server jars are cached between setups.
    pub shared_dir: PathBuf,
    pub download_base_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chunk_size: 4096,
            connect_timeout_secs: 30,
            request_timeout_secs: None,
            shared_dir: PathBuf::from(".shared"),
            download_base_url: DEFAULT_DOWNLOAD_BASE_URL.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Corrupt settings file at {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> SetupResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SetupError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| SetupError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Default location of the settings file under the user's config directory.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join(SETTINGS_FILE)
}
