//! Persistent app settings (`config.json`) for groups and tuning values.
//!
//! Loads saved settings on startup, merging with defaults so new fields get
//! sane values on upgrade, and persists every mutation back to disk. A broken
//! or unreadable file falls back to defaults rather than failing startup.
//! CLI flags always take precedence over persisted values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::lock::lock_or_recover;
use crate::state::{TransitionConfig, TransitionStyle};

const CONFIG_FILE: &str = "config.json";
const CONFIG_DIR_ENV: &str = "AVATARCAST_CONFIG_DIR";

pub const DEFAULT_PORT: u16 = 7474;
pub const DEFAULT_VOICE_THRESHOLD: f32 = 30.0;
pub const DEFAULT_VOICE_HOLD_MS: u64 = 150;

/// A named idle/speaking image pair, optionally bound to a hotkey.
///
/// The hotkey accelerator is carried as data only; OS registration lives in
/// the desktop shell, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub idle_image: String,
    pub speaking_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotkey: Option<String>,
}

/// Pre-release config shape with a single image per entry; migrated on load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyExpression {
    id: String,
    name: String,
    face_image: String,
    #[serde(default)]
    hotkey: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub server_port: u16,
    pub groups: Vec<Group>,
    pub active_group_id: Option<String>,
    pub default_transition: TransitionStyle,
    pub transition_duration: u64,
    pub mic_device_id: Option<String>,
    pub voice_threshold: f32,
    pub voice_hold_time: u64,
    #[serde(skip_serializing)]
    expressions: Vec<serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_PORT,
            groups: Vec::new(),
            active_group_id: None,
            default_transition: TransitionStyle::Instant,
            transition_duration: 300,
            mic_device_id: None,
            voice_threshold: DEFAULT_VOICE_THRESHOLD,
            voice_hold_time: DEFAULT_VOICE_HOLD_MS,
            expressions: Vec::new(),
        }
    }
}

impl Settings {
    pub fn transition(&self) -> TransitionConfig {
        TransitionConfig {
            style: self.default_transition,
            duration_ms: self.transition_duration,
        }
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn active_group(&self) -> Option<&Group> {
        self.active_group_id
            .as_deref()
            .and_then(|id| self.group(id))
    }

    /// Convert a pre-release `expressions` array to groups. Runs only when no
    /// group has been created yet, matching the original migration.
    fn migrate_legacy_expressions(&mut self) -> bool {
        if self.expressions.is_empty() || !self.groups.is_empty() {
            self.expressions.clear();
            return false;
        }
        let legacy: Vec<LegacyExpression> = self
            .expressions
            .drain(..)
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        for expr in legacy {
            self.groups.push(Group {
                id: expr.id,
                name: expr.name,
                idle_image: expr.face_image.clone(),
                speaking_image: expr.face_image,
                hotkey: expr.hotkey,
            });
        }
        !self.groups.is_empty()
    }
}

/// Resolve the config directory: env override first, then the platform dir.
fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::config_dir().map(|dir| dir.join("avatarcast"))
}

/// Settings plus the paths they live at, shared across threads.
pub struct ConfigStore {
    path: PathBuf,
    assets_dir: PathBuf,
    settings: Mutex<Settings>,
}

impl ConfigStore {
    /// Load settings from `dir` (or the default config dir), creating the
    /// directory layout on first run.
    pub fn load(dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let dir = match dir.or_else(config_dir) {
            Some(dir) => dir,
            None => anyhow::bail!("cannot resolve a config directory"),
        };
        let assets_dir = dir.join("assets");
        fs::create_dir_all(&dir)?;
        fs::create_dir_all(&assets_dir)?;

        let path = dir.join(CONFIG_FILE);
        let mut settings = read_settings(&path);
        let migrated = settings.migrate_legacy_expressions();

        let store = Self {
            path,
            assets_dir,
            settings: Mutex::new(settings),
        };
        if migrated {
            info!("migrated legacy expressions to groups");
            store.save();
        }
        Ok(store)
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    pub fn get(&self) -> Settings {
        lock_or_recover(&self.settings, "config get").clone()
    }

    /// Mutate settings in place and persist the result.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut Settings) -> R) -> R {
        let result = {
            let mut settings = lock_or_recover(&self.settings, "config update");
            mutate(&mut settings)
        };
        self.save();
        result
    }

    /// Append a group with a fresh millisecond-timestamp id.
    pub fn add_group(
        &self,
        name: String,
        idle_image: String,
        speaking_image: String,
        hotkey: Option<String>,
    ) -> Group {
        self.update(|settings| {
            let mut id = unix_millis().to_string();
            while settings.group(&id).is_some() {
                id.push('0');
            }
            let group = Group {
                id,
                name,
                idle_image,
                speaking_image,
                hotkey,
            };
            settings.groups.push(group.clone());
            // First group ever created becomes active, like the original app.
            if settings.groups.len() == 1 {
                settings.active_group_id = Some(group.id.clone());
            }
            group
        })
    }

    pub fn update_group(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Group),
    ) -> Option<Group> {
        self.update(|settings| {
            let group = settings.groups.iter_mut().find(|g| g.id == id)?;
            mutate(group);
            Some(group.clone())
        })
    }

    /// Remove a group. When the active group is deleted, the first remaining
    /// group (if any) becomes active.
    pub fn delete_group(&self, id: &str) -> bool {
        self.update(|settings| {
            let before = settings.groups.len();
            settings.groups.retain(|g| g.id != id);
            if settings.groups.len() == before {
                return false;
            }
            if settings.active_group_id.as_deref() == Some(id) {
                settings.active_group_id = settings.groups.first().map(|g| g.id.clone());
            }
            true
        })
    }

    /// Persist current settings. Failures are logged and non-fatal; the app
    /// keeps running on its in-memory copy.
    pub fn save(&self) {
        let body = {
            let settings = lock_or_recover(&self.settings, "config save");
            match serde_json::to_string_pretty(&*settings) {
                Ok(body) => body,
                Err(err) => {
                    warn!("config serialization failed: {err}");
                    return;
                }
            }
        };
        if let Err(err) = fs::write(&self.path, body) {
            warn!("failed to write {}: {err}", self.path.display());
        }
    }
}

fn read_settings(path: &Path) -> Settings {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return Settings::default(),
    };
    match serde_json::from_str(&contents) {
        Ok(settings) => settings,
        Err(err) => {
            warn!("failed to parse {}: {err}; using defaults", path.display());
            Settings::default()
        }
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConfigStore {
        ConfigStore::load(Some(dir.path().join("cfg"))).expect("load config store")
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let settings = store.get();
        assert_eq!(settings.server_port, DEFAULT_PORT);
        assert!(settings.groups.is_empty());
        assert_eq!(settings.active_group_id, None);
        assert_eq!(settings.voice_threshold, DEFAULT_VOICE_THRESHOLD);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let cfg_dir = dir.path().join("cfg");
        fs::create_dir_all(&cfg_dir).expect("mkdir");
        fs::write(cfg_dir.join(CONFIG_FILE), "{not json").expect("write corrupt file");
        let store = ConfigStore::load(Some(cfg_dir)).expect("load config store");
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn partial_file_merges_with_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let cfg_dir = dir.path().join("cfg");
        fs::create_dir_all(&cfg_dir).expect("mkdir");
        fs::write(cfg_dir.join(CONFIG_FILE), r#"{"serverPort": 9000}"#).expect("write file");
        let store = ConfigStore::load(Some(cfg_dir)).expect("load config store");
        let settings = store.get();
        assert_eq!(settings.server_port, 9000);
        assert_eq!(settings.voice_hold_time, DEFAULT_VOICE_HOLD_MS);
    }

    #[test]
    fn settings_survive_a_save_load_cycle() {
        let dir = TempDir::new().expect("tempdir");
        let cfg_dir = dir.path().join("cfg");
        {
            let store = ConfigStore::load(Some(cfg_dir.clone())).expect("load config store");
            store.add_group(
                "Main".to_string(),
                "idle.png".to_string(),
                "talk.png".to_string(),
                Some("CmdOrCtrl+1".to_string()),
            );
            store.update(|s| s.voice_threshold = 42.0);
        }
        let store = ConfigStore::load(Some(cfg_dir)).expect("reload config store");
        let settings = store.get();
        assert_eq!(settings.groups.len(), 1);
        assert_eq!(settings.groups[0].name, "Main");
        assert_eq!(settings.groups[0].hotkey.as_deref(), Some("CmdOrCtrl+1"));
        assert_eq!(settings.voice_threshold, 42.0);
        assert_eq!(settings.active_group_id, Some(settings.groups[0].id.clone()));
    }

    #[test]
    fn legacy_expressions_migrate_to_groups_once() {
        let dir = TempDir::new().expect("tempdir");
        let cfg_dir = dir.path().join("cfg");
        fs::create_dir_all(&cfg_dir).expect("mkdir");
        let legacy = r#"{
            "expressions": [
                {"id": "e1", "name": "Happy", "faceImage": "happy.png", "hotkey": "F1"}
            ]
        }"#;
        fs::write(cfg_dir.join(CONFIG_FILE), legacy).expect("write legacy file");

        let store = ConfigStore::load(Some(cfg_dir.clone())).expect("load config store");
        let settings = store.get();
        assert_eq!(settings.groups.len(), 1);
        let group = &settings.groups[0];
        assert_eq!(group.id, "e1");
        assert_eq!(group.idle_image, "happy.png");
        assert_eq!(group.speaking_image, "happy.png");
        assert_eq!(group.hotkey.as_deref(), Some("F1"));

        // The rewritten file no longer carries the legacy key.
        let rewritten = fs::read_to_string(cfg_dir.join(CONFIG_FILE)).expect("read rewritten");
        assert!(!rewritten.contains("expressions"));
    }

    #[test]
    fn deleting_active_group_falls_back_to_first_remaining() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let first = store.add_group("A".into(), "a.png".into(), "a2.png".into(), None);
        let second = store.add_group("B".into(), "b.png".into(), "b2.png".into(), None);
        store.update(|s| s.active_group_id = Some(second.id.clone()));

        assert!(store.delete_group(&second.id));
        assert_eq!(store.get().active_group_id, Some(first.id));
        assert!(!store.delete_group(&second.id));
    }

    #[test]
    fn group_ids_stay_unique_under_rapid_adds() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        for i in 0..5 {
            store.add_group(format!("G{i}"), "i.png".into(), "s.png".into(), None);
        }
        let settings = store.get();
        let mut ids: Vec<&str> = settings.groups.iter().map(|g| g.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), settings.groups.len());
    }

    #[test]
    fn update_group_returns_none_for_unknown_id() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        assert!(store.update_group("nope", |g| g.name = "X".into()).is_none());
    }
}
