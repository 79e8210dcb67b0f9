//! Persistence of the hotkey bindings.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    hotkey::{BindingKind, HotkeyBindings, HotkeyCombo, normalize},
};

pub const SETTINGS_FILE_NAME: &str = "settings.json";
const APP_DIR_NAME: &str = "monit";

/// On-disk settings record.
#[derive(Debug, Serialize, Deserialize)]
struct SettingsRecord {
    #[serde(default)]
    block_hotkey: Option<String>,
    #[serde(default)]
    unblock_hotkey: Option<String>,
}

/// Loads and saves [`HotkeyBindings`] as a JSON settings file.
#[derive(Debug, Clone)]
pub struct BindingStore {
    path: PathBuf,
}

impl BindingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/monit/settings.json`, or the working directory if the
    /// platform has no config dir.
    pub fn default_location() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted bindings.
    ///
    /// Never fails: a missing or unreadable record yields the defaults, and
    /// each unusable field falls back to its own default.
    pub fn load(&self) -> HotkeyBindings {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_e) => {
                #[cfg(feature = "log")]
                log::info!(
                    "no settings at {} ({}); using default hotkeys",
                    self.path.display(),
                    _e
                );
                return HotkeyBindings::default();
            }
        };

        let record: SettingsRecord = match serde_json::from_str(&contents) {
            Ok(record) => record,
            Err(_e) => {
                #[cfg(feature = "log")]
                log::warn!(
                    "failed to parse {}: {}; using default hotkeys",
                    self.path.display(),
                    _e
                );
                return HotkeyBindings::default();
            }
        };

        let bindings = HotkeyBindings {
            block: field_or_default(record.block_hotkey.as_deref(), BindingKind::Block),
            unblock: field_or_default(record.unblock_hotkey.as_deref(), BindingKind::Unblock),
        };

        if bindings.block == bindings.unblock {
            #[cfg(feature = "log")]
            log::warn!(
                "block and unblock share `{}`; using default hotkeys",
                bindings.block
            );
            return HotkeyBindings::default();
        }
        bindings
    }

    /// Overwrites the record with `bindings`.
    ///
    /// Writes a sibling temp file and renames it over the target, so an
    /// interrupted save leaves either the old or the new record.
    pub fn save(&self, bindings: &HotkeyBindings) -> Result<()> {
        let persist_failed = |source| Error::SettingsPersistFailed {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(persist_failed)?;
        }

        let record = SettingsRecord {
            block_hotkey: Some(bindings.block.to_string()),
            unblock_hotkey: Some(bindings.unblock.to_string()),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| persist_failed(std::io::Error::other(e)))?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json).map_err(persist_failed)?;
        fs::rename(&temp_path, &self.path).map_err(persist_failed)?;

        #[cfg(feature = "log")]
        log::debug!("saved hotkeys to {}", self.path.display());
        Ok(())
    }
}

fn field_or_default(raw: Option<&str>, kind: BindingKind) -> HotkeyCombo {
    match raw.map(normalize) {
        Some(Ok(combo)) => combo,
        Some(Err(_e)) => {
            #[cfg(feature = "log")]
            log::warn!("{}; using default {} hotkey", _e, kind);
            HotkeyBindings::default_for(kind)
        }
        None => HotkeyBindings::default_for(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> BindingStore {
        BindingStore::new(dir.path().join("monit").join(SETTINGS_FILE_NAME))
    }

    #[test]
    fn missing_record_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert_eq!(store_in(&dir).load(), HotkeyBindings::default());
    }

    #[test]
    fn saved_bindings_are_loaded_back() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        let bindings = HotkeyBindings {
            block: normalize("alt+f9").unwrap(),
            unblock: normalize("alt+f10").unwrap(),
        };

        store.save(&bindings).expect("save");

        assert_eq!(store.load(), bindings);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn record_uses_canonical_strings() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        store.save(&HotkeyBindings::default()).expect("save");

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(json["block_hotkey"], "ctrl+shift+b");
        assert_eq!(json["unblock_hotkey"], "ctrl+shift+u");
    }

    #[test]
    fn corrupt_record_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        assert_eq!(store.load(), HotkeyBindings::default());
    }

    #[test]
    fn each_bad_field_falls_back_alone() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{ "block_hotkey": "Shift+Alt+P", "unblock_hotkey": "", "theme": "dark" }"#,
        )
        .unwrap();

        let loaded = store.load();
        assert_eq!(loaded.block.to_string(), "alt+shift+p");
        assert_eq!(loaded.unblock, HotkeyBindings::default().unblock);
    }

    #[test]
    fn clashing_record_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{ "block_hotkey": "ctrl+k", "unblock_hotkey": "K+CTRL" }"#,
        )
        .unwrap();

        assert_eq!(store.load(), HotkeyBindings::default());
    }

    #[test]
    fn unwritable_location_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();
        let store = BindingStore::new(blocker.join(SETTINGS_FILE_NAME));

        assert!(matches!(
            store.save(&HotkeyBindings::default()),
            Err(Error::SettingsPersistFailed { .. })
        ));
    }
}
