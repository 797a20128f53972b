use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Error;

/// Runtime settings shared by the render cache and the drawing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Undo steps kept for slides that are currently shown.
    pub history_length_visible_slides: usize,
    /// Undo steps kept for slides that are not shown anywhere.
    pub history_length_hidden_slides: usize,
    pub cache: CacheSettings,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            history_length_visible_slides: 50,
            history_length_hidden_slides: 20,
            cache: CacheSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Bytes of encoded pages kept in memory, -1 for no limit.
    pub max_memory: i64,
    /// Number of cached pages, -1 for no limit.
    pub max_slides: i32,
    pub render_threads: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_memory: 100 << 20,
            max_slides: -1,
            render_threads: 2,
        }
    }
}

impl CacheSettings {
    pub fn budget(&self) -> CacheBudget {
        CacheBudget::from_raw(self.max_memory, self.max_slides)
    }
}

/// Memory and slot limits of a page cache. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheBudget {
    pub max_bytes: Option<u64>,
    pub max_slots: Option<usize>,
}

impl CacheBudget {
    /// Negative values mean unlimited.
    pub fn from_raw(max_memory: i64, max_slides: i32) -> Self {
        Self {
            max_bytes: u64::try_from(max_memory).ok(),
            max_slots: usize::try_from(max_slides).ok(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_bytes.is_none() && self.max_slots.is_none()
    }

    pub fn is_zero(&self) -> bool {
        self.max_bytes == Some(0) || self.max_slots == Some(0)
    }
}

impl Preferences {
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Loads preferences from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source).map_err(|err| Error::InvalidConfig {
            path: path.to_path_buf(),
            reason: err.message().to_owned(),
        })
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let prefs = Preferences::from_toml_str(
            r#"
            history_length_visible_slides = 7

            [cache]
            max_slides = 3
            "#,
        )
        .unwrap();
        assert_eq!(prefs.history_length_visible_slides, 7);
        assert_eq!(prefs.history_length_hidden_slides, 20);
        assert_eq!(prefs.cache.max_slides, 3);
        assert_eq!(prefs.cache.render_threads, 2);
    }

    #[test]
    fn negative_limits_are_unlimited() {
        let budget = CacheBudget::from_raw(-1, -1);
        assert!(budget.is_unlimited());
        assert!(!budget.is_zero());

        let budget = CacheBudget::from_raw(0, 4);
        assert_eq!(budget.max_bytes, Some(0));
        assert_eq!(budget.max_slots, Some(4));
        assert!(budget.is_zero());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let prefs = Preferences::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(prefs, Preferences::default());
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "history_length_visible_slides = \"many\"").unwrap();
        match Preferences::load(&path) {
            Err(Error::InvalidConfig { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn written_preferences_load_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut prefs = Preferences::default();
        prefs.cache.max_memory = -1;
        prefs.history_length_hidden_slides = 3;
        fs::write(&path, prefs.to_toml_string().unwrap()).unwrap();
        assert_eq!(Preferences::load(&path).unwrap(), prefs);
    }
}
