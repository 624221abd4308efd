//! Where `settings.toml` lives.
//!
//! `PITCHCAP_CONFIG_DIR` wins when set; otherwise the platform config
//! directory from `dirs` is used:
//!   Windows: %APPDATA%\pitchcap\
//!   macOS:   ~/Library/Application Support/pitchcap/
//!   Linux:   ~/.config/pitchcap/

use std::path::{Path, PathBuf};

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "PITCHCAP_CONFIG_DIR";

const APP_NAME: &str = "pitchcap";
const SETTINGS_FILE: &str = "settings.toml";

/// Resolved config locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
}

impl AppPaths {
    /// Resolve from the environment override or the platform directory,
    /// falling back to `./pitchcap` when neither is available.
    pub fn new() -> Self {
        match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::in_dir(PathBuf::from(dir)),
            _ => {
                let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
                Self::in_dir(base.join(APP_NAME))
            }
        }
    }

    /// Paths rooted at an explicit directory.
    pub fn in_dir(config_dir: impl AsRef<Path>) -> Self {
        let config_dir = config_dir.as_ref().to_path_buf();
        Self {
            settings_file: config_dir.join(SETTINGS_FILE),
            config_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
