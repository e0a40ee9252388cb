//! Settings backends: a persistent key/value store with per-key change listeners.

use pd_core::BrowserError;
use pd_core::BrowserResult;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Callback invoked with `(key, new_value)` after a successful `set`.
pub type SettingsListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Handle returned by [`SettingsBackend::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Key/value settings store. Values are opaque JSON documents.
pub trait SettingsBackend: Send + Sync {
    fn get(&self, key: &str) -> BrowserResult<Option<Value>>;

    fn set(&self, key: &str, value: Value) -> BrowserResult<()>;

    /// Registers `listener` for changes to `key`.
    fn listen(&self, key: &str, listener: SettingsListener) -> ListenerId;

    /// Returns false if the id was not registered.
    fn unlisten(&self, id: ListenerId) -> bool;
}

/// Durable storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub root: Option<PathBuf>,
    pub ephemeral_mode: bool,
}

impl StorageConfig {
    pub fn persistent(root: PathBuf) -> Self {
        Self {
            root: Some(root),
            ephemeral_mode: false,
        }
    }

    pub fn ephemeral() -> Self {
        Self {
            root: None,
            ephemeral_mode: true,
        }
    }

    pub fn validate(&self) -> BrowserResult<()> {
        if self.ephemeral_mode {
            return Ok(());
        }

        match &self.root {
            Some(root) if root.as_os_str().is_empty() => Err(BrowserError::new(
                "storage.root_invalid",
                "persistent storage root must not be empty",
            )),
            Some(_) => Ok(()),
            None => Err(BrowserError::new(
                "storage.persistence_unconfigured",
                "persistent storage root is not configured",
            )),
        }
    }
}

/// Opens the backend selected by `config`.
pub fn open_settings(config: &StorageConfig) -> BrowserResult<Arc<dyn SettingsBackend>> {
    config.validate()?;
    if config.ephemeral_mode {
        return Ok(Arc::new(MemorySettings::new()));
    }

    let root = config.root.clone().ok_or_else(|| {
        BrowserError::new(
            "storage.persistence_unconfigured",
            "persistent storage root is not configured",
        )
    })?;
    Ok(Arc::new(FileSettings::new(root)))
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, String, SettingsListener)>>,
}

impl ListenerRegistry {
    fn add(&self, key: &str, listener: SettingsListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, key.to_owned(), listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _, _)| *entry_id != id);
        entries.len() != before
    }

    fn notify(&self, key: &str, value: &Value) {
        // Listeners run outside the lock so they may call back into the backend.
        let matching: Vec<SettingsListener> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, entry_key, _)| entry_key == key)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in matching {
            listener(key, value);
        }
    }
}

/// Process-local backend used for ephemeral sessions and tests.
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, Value>>,
    listeners: ListenerRegistry,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsBackend for MemorySettings {
    fn get(&self, key: &str) -> BrowserResult<Option<Value>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: Value) -> BrowserResult<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.clone());
        self.listeners.notify(key, &value);
        Ok(())
    }

    fn listen(&self, key: &str, listener: SettingsListener) -> ListenerId {
        self.listeners.add(key, listener)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

/// Backend storing one JSON document per key under `<root>/settings/`.
pub struct FileSettings {
    root: PathBuf,
    write_lock: Mutex<()>,
    listeners: ListenerRegistry,
}

impl FileSettings {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Mutex::new(()),
            listeners: ListenerRegistry::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root
            .join("settings")
            .join(format!("{}.json", sanitize_key(key)))
    }
}

impl SettingsBackend for FileSettings {
    fn get(&self, key: &str) -> BrowserResult<Option<Value>> {
        read_value(&self.key_path(key))
    }

    fn set(&self, key: &str, value: Value) -> BrowserResult<()> {
        let path = self.key_path(key);
        {
            let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            write_value(&path, &value)?;
        }
        tracing::debug!(key, path = %path.display(), "settings value written");
        self.listeners.notify(key, &value);
        Ok(())
    }

    fn listen(&self, key: &str, listener: SettingsListener) -> ListenerId {
        self.listeners.add(key, listener)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

fn sanitize_key(input: &str) -> String {
    let mut out = String::new();
    for ch in input.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }

    if out.is_empty() || out.chars().all(|ch| ch == '.') {
        "unknown".to_owned()
    } else {
        out
    }
}

fn read_value(path: &Path) -> BrowserResult<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|error| {
        BrowserError::new(
            "storage.settings_read_failed",
            format!("failed to read settings file `{}`: {error}", path.display()),
        )
    })?;

    serde_json::from_str(&content).map(Some).map_err(|error| {
        BrowserError::new(
            "storage.settings_format_invalid",
            format!(
                "settings file `{}` is not valid JSON: {error}",
                path.display()
            ),
        )
    })
}

fn write_value(path: &Path, value: &Value) -> BrowserResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            BrowserError::new(
                "storage.settings_dir_create_failed",
                format!(
                    "failed to create settings directory `{}`: {error}",
                    parent.display()
                ),
            )
        })?;
    }

    let encoded = serde_json::to_string_pretty(value).map_err(|error| {
        BrowserError::new(
            "storage.settings_encode_failed",
            format!("failed to encode settings value: {error}"),
        )
    })?;

    // Write-then-rename so a crash never leaves a half-written document behind.
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, encoded).map_err(|error| {
        BrowserError::new(
            "storage.settings_write_failed",
            format!(
                "failed to write settings file `{}`: {error}",
                staging.display()
            ),
        )
    })?;
    fs::rename(&staging, path).map_err(|error| {
        BrowserError::new(
            "storage.settings_write_failed",
            format!(
                "failed to move settings file into place at `{}`: {error}",
                path.display()
            ),
        )
    })
}
