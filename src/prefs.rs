use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const FILE_NAME: &str = "preferences.json";

/// Shown once per new version in the status bar.
pub const WHATS_NEW: &str = "What's new! Lines 62 and 63 are now up to date with the tpg network.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub selected_tab: i64,
    #[serde(default)]
    pub last_version: Option<String>,
    #[serde(default)]
    pub favorite_stops: Vec<String>,
    #[serde(default)]
    pub favorite_routes: Vec<FavoriteRoute>,
}

/// A saved origin/destination pair. The time is always "now" when it is searched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteRoute {
    pub from: String,
    pub to: String,
}

impl Preferences {
    /// Records `version` as seen. Returns true when it differs from the last one shown.
    pub fn mark_version_seen(&mut self, version: &str) -> bool {
        if self.last_version.as_deref() == Some(version) {
            return false;
        }
        self.last_version = Some(version.to_string());
        true
    }

    /// Adds the stop to the favourites, or removes it if already there.
    /// Returns whether it is a favourite afterwards.
    pub fn toggle_favorite(&mut self, stop_code: &str) -> bool {
        if let Some(index) = self.favorite_stops.iter().position(|s| s == stop_code) {
            self.favorite_stops.remove(index);
            false
        } else {
            self.favorite_stops.push(stop_code.to_string());
            true
        }
    }

    pub fn move_favorite(&mut self, from: usize, to: usize) {
        if from < self.favorite_stops.len() && to < self.favorite_stops.len() {
            let stop = self.favorite_stops.remove(from);
            self.favorite_stops.insert(to, stop);
        }
    }

    pub fn reset_favorites_order(&mut self) {
        self.favorite_stops.sort();
    }

    pub fn is_favorite_route(&self, from: &str, to: &str) -> bool {
        self.favorite_routes.iter().any(|r| r.from == from && r.to == to)
    }

    /// Same as [`Preferences::toggle_favorite`] for an origin/destination pair.
    pub fn toggle_favorite_route(&mut self, from: &str, to: &str) -> bool {
        if let Some(index) = self.favorite_routes.iter().position(|r| r.from == from && r.to == to) {
            self.favorite_routes.remove(index);
            false
        } else {
            self.favorite_routes.push(FavoriteRoute {
                from: from.to_string(),
                to: to.to_string(),
            });
            true
        }
    }
}

pub struct PreferencesStore {
    path: PathBuf,
}

impl PreferencesStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<config dir>/tpg-tui/preferences.json`, falling back to the working directory.
    pub fn default_location() -> Self {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("tpg-tui");
        path.push(FILE_NAME);
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Preferences {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No preferences at {}: {}", self.path.display(), e);
                return Preferences::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring unreadable preferences {}: {}", self.path.display(), e);
            Preferences::default()
        })
    }

    pub fn save(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(prefs)?;
        fs::write(&self.path, json).with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> PreferencesStore {
        let dir = std::env::temp_dir().join(format!("tpg-tui-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        PreferencesStore::new(dir.join(FILE_NAME))
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let store = temp_store("missing");
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn test_save_and_load() {
        let store = temp_store("roundtrip");
        let prefs = Preferences {
            selected_tab: 1,
            last_version: Some("0.1.0".to_string()),
            favorite_stops: vec!["CVIN".to_string(), "BAIR".to_string()],
            favorite_routes: vec![FavoriteRoute {
                from: "Cornavin".to_string(),
                to: "Bel-Air".to_string(),
            }],
        };
        store.save(&prefs).unwrap();
        assert_eq!(store.load(), prefs);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let store = temp_store("malformed");
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn test_whats_new_shown_once_per_version() {
        let mut prefs = Preferences::default();
        assert!(prefs.mark_version_seen("0.1.0"));
        assert!(!prefs.mark_version_seen("0.1.0"));
        assert!(prefs.mark_version_seen("0.2.0"));
    }

    #[test]
    fn test_favorites() {
        let mut prefs = Preferences::default();
        assert!(prefs.toggle_favorite("PLPA"));
        assert!(prefs.toggle_favorite("CVIN"));
        assert!(prefs.toggle_favorite("BAIR"));
        prefs.move_favorite(2, 0);
        assert_eq!(prefs.favorite_stops, vec!["BAIR", "PLPA", "CVIN"]);
        prefs.reset_favorites_order();
        assert_eq!(prefs.favorite_stops, vec!["BAIR", "CVIN", "PLPA"]);
        assert!(!prefs.toggle_favorite("CVIN"));
        assert_eq!(prefs.favorite_stops, vec!["BAIR", "PLPA"]);
    }

    #[test]
    fn test_favorite_routes() {
        let mut prefs = Preferences::default();
        assert!(prefs.toggle_favorite_route("Cornavin", "Bel-Air"));
        assert!(prefs.is_favorite_route("Cornavin", "Bel-Air"));
        assert!(!prefs.is_favorite_route("Bel-Air", "Cornavin"));

        assert!(!prefs.toggle_favorite_route("Cornavin", "Bel-Air"));
        assert!(prefs.favorite_routes.is_empty());
    }

    #[test]
    fn test_older_file_without_routes_loads() {
        let prefs: Preferences =
            serde_json::from_str(r#"{"selected_tab": 1, "favorite_stops": ["CVIN"]}"#).unwrap();
        assert_eq!(prefs.favorite_stops, vec!["CVIN"]);
        assert!(prefs.favorite_routes.is_empty());
    }
}
