use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::StateError;
use crate::snapshot::EntityKey;

const SELECTION_FILE: &str = "selection.json";
const PREFERENCES_FILE: &str = "preferences.json";
const DEFAULT_NAME: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub id: Option<String>,
    pub name: String,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            id: None,
            name: DEFAULT_NAME.to_string(),
        }
    }
}

impl Selection {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::from_optional(self.id.as_deref())
    }

    fn is_persistable(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty()) && self.name != DEFAULT_NAME
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Realtime,
    Analysis,
    Intersections,
}

impl View {
    pub fn needs_realtime(self) -> bool {
        matches!(self, View::Realtime)
    }

    pub fn needs_analytics(self) -> bool {
        matches!(self, View::Analysis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub dark_mode: bool,
    pub auto_refresh: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            dark_mode: false,
            auto_refresh: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<Channels>,
}

#[derive(Debug)]
struct Channels {
    selection: watch::Sender<Selection>,
    selection_epoch: AtomicU64,
    view: watch::Sender<View>,
    dark_mode: watch::Sender<bool>,
    auto_refresh: watch::Sender<bool>,
}

impl AppState {
    pub fn new(selection: Selection, view: View) -> Self {
        Self {
            inner: Arc::new(Channels {
                selection: watch::Sender::new(selection),
                selection_epoch: AtomicU64::new(0),
                view: watch::Sender::new(view),
                dark_mode: watch::Sender::new(false),
                auto_refresh: watch::Sender::new(true),
            }),
        }
    }

    pub fn selection(&self) -> Selection {
        self.inner.selection.borrow().clone()
    }

    pub fn selected_key(&self) -> EntityKey {
        self.inner.selection.borrow().key()
    }

    /// Returns true when the entity key actually changed. Every key change
    /// bumps the selection epoch, so A -> B -> A is still observable after
    /// the watch notifications coalesce.
    pub fn select(&self, selection: Selection) -> bool {
        let key = selection.key();
        debug!(key=%key, name=%selection.name, "selection updated");
        let mut changed = false;
        self.inner.selection.send_modify(|current| {
            changed = current.key() != key;
            if changed {
                self.inner.selection_epoch.fetch_add(1, Ordering::SeqCst);
            }
            *current = selection;
        });
        changed
    }

    pub fn selection_epoch(&self) -> u64 {
        self.inner.selection_epoch.load(Ordering::SeqCst)
    }

    pub fn selected_key_with_epoch(&self) -> (EntityKey, u64) {
        let current = self.inner.selection.borrow();
        (current.key(), self.selection_epoch())
    }

    pub fn watch_selection(&self) -> watch::Receiver<Selection> {
        self.inner.selection.subscribe()
    }

    pub fn view(&self) -> View {
        *self.inner.view.borrow()
    }

    pub fn set_view(&self, view: View) {
        self.inner.view.send_if_modified(|current| {
            let changed = *current != view;
            *current = view;
            changed
        });
    }

    pub fn watch_view(&self) -> watch::Receiver<View> {
        self.inner.view.subscribe()
    }

    pub fn dark_mode(&self) -> bool {
        *self.inner.dark_mode.borrow()
    }

    pub fn toggle_dark_mode(&self) -> bool {
        self.inner.dark_mode.send_modify(|v| *v = !*v);
        self.dark_mode()
    }

    pub fn auto_refresh(&self) -> bool {
        *self.inner.auto_refresh.borrow()
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        self.inner.auto_refresh.send_replace(enabled);
    }

    pub fn watch_auto_refresh(&self) -> watch::Receiver<bool> {
        self.inner.auto_refresh.subscribe()
    }

    pub fn preferences(&self) -> Preferences {
        Preferences {
            dark_mode: self.dark_mode(),
            auto_refresh: self.auto_refresh(),
        }
    }

    pub fn apply_preferences(&self, prefs: Preferences) {
        self.inner.dark_mode.send_if_modified(|v| {
            let changed = *v != prefs.dark_mode;
            *v = prefs.dark_mode;
            changed
        });
        self.set_auto_refresh(prefs.auto_refresh);
    }
}

#[derive(Debug, Clone)]
pub struct SelectionStore {
    path: PathBuf,
    preferences_path: PathBuf,
}

impl SelectionStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(SELECTION_FILE),
            preferences_path: state_dir.as_ref().join(PREFERENCES_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Selection {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Selection::default(),
            Err(err) => {
                warn!(path=%self.path.display(), error=%err, "cannot read saved selection");
                return Selection::default();
            }
        };

        match serde_json::from_slice::<Selection>(&raw) {
            Ok(selection) if selection.is_persistable() => selection,
            Ok(_) => Selection::default(),
            Err(err) => {
                warn!(path=%self.path.display(), error=%err, "ignoring corrupt saved selection");
                Selection::default()
            }
        }
    }

    /// Unscoped selections clear the saved file instead of writing it.
    pub fn save(&self, selection: &Selection) -> Result<(), StateError> {
        if !selection.is_persistable() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            };
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(selection)?)?;
        Ok(())
    }

    pub fn load_preferences(&self) -> Preferences {
        let raw = match fs::read(&self.preferences_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Preferences::default(),
            Err(err) => {
                warn!(path=%self.preferences_path.display(), error=%err, "cannot read saved preferences");
                return Preferences::default();
            }
        };

        serde_json::from_slice(&raw).unwrap_or_else(|err| {
            warn!(path=%self.preferences_path.display(), error=%err, "ignoring corrupt saved preferences");
            Preferences::default()
        })
    }

    pub fn save_preferences(&self, prefs: &Preferences) -> Result<(), StateError> {
        if let Some(parent) = self.preferences_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.preferences_path, serde_json::to_vec_pretty(prefs)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::SystemTime;

    fn make_temp_dir(name: &str) -> PathBuf {
        let mut path = env::temp_dir();
        let uniq = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("unix epoch")
            .as_nanos();
        path.push(format!("signalboard-tests-{name}-{uniq}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    #[test]
    fn selection_round_trips_through_file() {
        // Arrange
        let dir = make_temp_dir("selection");
        let store = SelectionStore::new(&dir);
        let selection = Selection::new("int-7", "Main & 3rd");

        // Act
        store.save(&selection).expect("save");
        let loaded = store.load();

        // Assert
        assert_eq!(loaded, selection);
        assert_eq!(loaded.key(), EntityKey::new("int-7"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn default_selection_removes_saved_file() {
        let dir = make_temp_dir("clear");
        let store = SelectionStore::new(&dir);
        store.save(&Selection::new("int-7", "Main")).expect("save");

        store.save(&Selection::default()).expect("clear");

        assert!(!store.path().exists());
        assert_eq!(store.load(), Selection::default());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_file_loads_default() {
        let dir = make_temp_dir("corrupt");
        let store = SelectionStore::new(&dir);
        fs::write(store.path(), "{not json").expect("write corrupt");

        assert_eq!(store.load(), Selection::default());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn select_reports_key_changes_only() {
        let state = AppState::new(Selection::default(), View::Realtime);

        assert!(state.select(Selection::new("A", "Alpha")));
        assert!(!state.select(Selection::new("A", "Alpha renamed")));
        assert_eq!(state.selection().name, "Alpha renamed");
        assert!(state.select(Selection::default()));
        assert!(state.selected_key().is_default());
    }

    #[test]
    fn selection_epoch_counts_round_trips_back_to_same_key() {
        // Arrange
        let state = AppState::new(Selection::new("A", "Alpha"), View::Intersections);
        let (_, before) = state.selected_key_with_epoch();

        // Act
        state.select(Selection::new("B", "Beta"));
        state.select(Selection::new("A", "Alpha"));
        state.select(Selection::new("A", "Alpha again"));

        // Assert
        let (key, after) = state.selected_key_with_epoch();
        assert_eq!(key, EntityKey::new("A"));
        assert_eq!(after, before + 2);
    }

    #[test]
    fn preferences_survive_restart() {
        // Arrange
        let dir = make_temp_dir("preferences");
        let store = SelectionStore::new(&dir);
        let state = AppState::new(Selection::default(), View::Realtime);
        state.toggle_dark_mode();
        state.set_auto_refresh(false);

        // Act
        store.save_preferences(&state.preferences()).expect("save");
        let restarted = AppState::new(Selection::default(), View::Realtime);
        restarted.apply_preferences(store.load_preferences());

        // Assert
        assert!(restarted.dark_mode());
        assert!(!restarted.auto_refresh());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_or_partial_preferences_fall_back_to_defaults() {
        let dir = make_temp_dir("prefs-partial");
        let store = SelectionStore::new(&dir);
        assert_eq!(store.load_preferences(), Preferences::default());

        fs::write(dir.join(PREFERENCES_FILE), r#"{"darkMode": true}"#).expect("write partial");

        let prefs = store.load_preferences();
        assert!(prefs.dark_mode);
        assert!(prefs.auto_refresh);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn view_flags_drive_channel_activity() {
        let state = AppState::new(Selection::default(), View::Analysis);
        assert!(!state.view().needs_realtime());

        state.set_view(View::Realtime);

        assert!(state.view().needs_realtime());
        assert!(state.toggle_dark_mode());
    }
}
