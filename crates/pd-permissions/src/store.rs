//! Persisted `(site, kind) -> decision` table, kept under a single settings key.
//!
//! On-disk shape:
//!
//! ```json
//! { "version": 1, "sites": { "example.com": { "geolocation": "granted" } } }
//! ```
//!
//! Older builds wrote the `sites` object directly, without the version wrapper. Such
//! documents are migrated on read; entries that do not parse are dropped with a warning.

use crate::kind::Decision;
use crate::kind::PermissionKind;
use crate::kind::Site;
use pd_core::BrowserError;
use pd_core::BrowserResult;
use pd_storage::ListenerId;
use pd_storage::SettingsBackend;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

pub const STORE_SCHEMA_VERSION: u64 = 1;

pub type SitePermissions = BTreeMap<PermissionKind, Decision>;
pub type PermissionTable = BTreeMap<Site, SitePermissions>;

/// Callback receiving the full table after every persisted change.
pub type TableListener = Arc<dyn Fn(&PermissionTable) + Send + Sync>;

#[derive(Serialize)]
struct StoredTable<'a> {
    version: u64,
    sites: &'a PermissionTable,
}

/// Decision store over a [`SettingsBackend`].
///
/// Every mutation is a read-modify-write of the whole table; writes are serialized so a
/// concurrent `clear` and `set` cannot leave an empty site record behind.
pub struct DecisionStore {
    settings: Arc<dyn SettingsBackend>,
    key: String,
    write_lock: Mutex<()>,
}

impl DecisionStore {
    pub fn new(settings: Arc<dyn SettingsBackend>, key: impl Into<String>) -> Self {
        Self {
            settings,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self, site: &Site, kind: PermissionKind) -> BrowserResult<Option<Decision>> {
        let table = self.load()?;
        Ok(table
            .get(site)
            .and_then(|entries| entries.get(&kind))
            .copied())
    }

    /// Records a decision. Does nothing when `remember` is false.
    pub fn set(
        &self,
        site: &Site,
        kind: PermissionKind,
        decision: Decision,
        remember: bool,
    ) -> BrowserResult<()> {
        if !remember {
            return Ok(());
        }

        self.update(|table| {
            let previous = table.entry(site.clone()).or_default().insert(kind, decision);
            previous != Some(decision)
        })?;
        Ok(())
    }

    /// Removes one entry; drops the site record when it becomes empty.
    /// Returns whether anything was removed.
    pub fn clear(&self, site: &Site, kind: PermissionKind) -> BrowserResult<bool> {
        self.update(|table| {
            let Some(entries) = table.get_mut(site) else {
                return false;
            };
            let removed = entries.remove(&kind).is_some();
            if entries.is_empty() {
                table.remove(site);
            }
            removed
        })
    }

    pub fn clear_site(&self, site: &Site) -> BrowserResult<bool> {
        self.update(|table| table.remove(site).is_some())
    }

    pub fn clear_all(&self) -> BrowserResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.save(&PermissionTable::new())
    }

    /// Snapshot of every stored decision.
    pub fn get_all(&self) -> BrowserResult<PermissionTable> {
        self.load()
    }

    /// Sites whose hostname contains `term`, case-insensitively.
    pub fn search(&self, term: &str) -> BrowserResult<PermissionTable> {
        let needle = term.trim().to_ascii_lowercase();
        let mut table = self.load()?;
        table.retain(|site, _| site.as_str().contains(&needle));
        Ok(table)
    }

    /// Rewrites a legacy document in the current schema. Returns true if a rewrite happened.
    pub fn migrate(&self) -> BrowserResult<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(raw) = self.settings.get(&self.key)? else {
            return Ok(false);
        };
        if schema_version(&raw).is_some() {
            return Ok(false);
        }

        let table = decode_table(&raw)?;
        tracing::info!(
            key = %self.key,
            sites = table.len(),
            "migrating legacy permission table"
        );
        self.save(&table)?;
        Ok(true)
    }

    /// Calls `listener` with the decoded table whenever the backing key changes.
    pub fn subscribe(&self, listener: TableListener) -> ListenerId {
        self.settings.listen(
            &self.key,
            Arc::new(move |key: &str, value: &Value| match decode_table(value) {
                Ok(table) => listener(&table),
                Err(error) => {
                    tracing::warn!(key, %error, "ignoring undecodable permission table update");
                }
            }),
        )
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.settings.unlisten(id)
    }

    fn load(&self) -> BrowserResult<PermissionTable> {
        match self.settings.get(&self.key)? {
            Some(raw) => decode_table(&raw),
            None => Ok(PermissionTable::new()),
        }
    }

    fn save(&self, table: &PermissionTable) -> BrowserResult<()> {
        self.settings.set(&self.key, encode_table(table)?)
    }

    fn update(&self, apply: impl FnOnce(&mut PermissionTable) -> bool) -> BrowserResult<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table = self.load()?;
        if !apply(&mut table) {
            return Ok(false);
        }
        self.save(&table)?;
        Ok(true)
    }
}

/// Serializes a table in the current schema.
pub fn encode_table(table: &PermissionTable) -> BrowserResult<Value> {
    serde_json::to_value(StoredTable {
        version: STORE_SCHEMA_VERSION,
        sites: table,
    })
    .map_err(|error| {
        BrowserError::new(
            "permissions.store.encode_failed",
            format!("failed to encode permission table: {error}"),
        )
    })
}

/// Decodes either schema into a table.
pub fn decode_table(raw: &Value) -> BrowserResult<PermissionTable> {
    let sites = match raw {
        Value::Null => return Ok(PermissionTable::new()),
        Value::Object(object) => match schema_version(raw) {
            Some(STORE_SCHEMA_VERSION) => match object.get("sites") {
                None | Some(Value::Null) => return Ok(PermissionTable::new()),
                Some(Value::Object(sites)) => sites,
                Some(_) => {
                    return Err(BrowserError::new(
                        "permissions.store.decode_failed",
                        "`sites` must be an object",
                    ));
                }
            },
            Some(version) => {
                return Err(BrowserError::new(
                    "permissions.store.version_unsupported",
                    format!(
                        "permission table version {version} is not supported (expected {STORE_SCHEMA_VERSION})"
                    ),
                ));
            }
            None => object,
        },
        _ => {
            return Err(BrowserError::new(
                "permissions.store.decode_failed",
                "permission table must be a JSON object",
            ));
        }
    };

    Ok(decode_sites(sites))
}

fn schema_version(raw: &Value) -> Option<u64> {
    raw.get("version").and_then(Value::as_u64)
}

fn decode_sites(sites: &Map<String, Value>) -> PermissionTable {
    let mut table = PermissionTable::new();
    for (host, entries) in sites {
        let site = match Site::new(host) {
            Ok(site) => site,
            Err(error) => {
                tracing::warn!(host, %error, "dropping stored permissions for invalid site");
                continue;
            }
        };

        let Value::Object(entries) = entries else {
            tracing::warn!(host, "dropping stored permissions that are not an object");
            continue;
        };

        let mut decoded = SitePermissions::new();
        for (name, value) in entries {
            let kind = PermissionKind::from_name(name);
            let decision = value.as_str().and_then(Decision::from_name);
            match (kind, decision) {
                (Some(kind), Some(decision)) => {
                    decoded.insert(kind, decision);
                }
                _ => tracing::warn!(host, kind = name.as_str(), value = %value, "dropping stored permission entry"),
            }
        }

        if !decoded.is_empty() {
            table.entry(site).or_default().extend(decoded);
        }
    }
    table
}
