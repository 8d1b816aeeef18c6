use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persistent application settings
///
/// Owned by the host shell; the tracker never sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Bus bit rate in bits per second
    pub bitrate: u32,
    /// Serial port used by the last successful connection
    pub last_port: Option<String>,
    /// Colour cells changed for the first time differently
    pub mark_new_changes: bool,
    /// Open the channel without acknowledging frames
    pub listen_only: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            bitrate: 500_000,
            last_port: None,
            mark_new_changes: false,
            listen_only: true,
        }
    }
}

impl AppSettings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cantaloupe").join("settings.json"))
    }

    /// Load from the user config directory, falling back to defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("No settings at {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring unreadable settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        match Self::config_path() {
            Some(path) => self.save_to(&path),
            None => anyhow::bail!("No config directory on this platform"),
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("cantaloupe-settings-{}-{}", std::process::id(), name))
            .join("settings.json")
    }

    #[test]
    fn test_round_trip() {
        let path = temp_path("round-trip");
        let settings = AppSettings {
            bitrate: 250_000,
            last_port: Some("/dev/ttyACM0".to_string()),
            mark_new_changes: true,
            listen_only: false,
        };

        settings.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path), settings);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_or_corrupt_file_gives_defaults() {
        let path = temp_path("corrupt");
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_path("partial");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{ "bitrate": 125000 }"#).unwrap();

        let settings = AppSettings::load_from(&path);
        assert_eq!(settings.bitrate, 125_000);
        assert!(settings.listen_only);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
