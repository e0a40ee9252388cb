//! Browser process coordinator.
//!
//! Owns the permission controller and the window registry, and bridges the page runtime's
//! capability hooks and the windows' IPC traffic onto them.

pub mod host;
pub mod windows;

use pd_core::BrowserResult;
use pd_ipc::LocalIpcEndpoint;
use pd_permissions::CapabilityCheck;
use pd_permissions::CapabilityRequest;
use pd_permissions::Decision;
use pd_permissions::PermissionConfig;
use pd_permissions::PermissionController;
use pd_permissions::RequestDetails;
use pd_permissions::RequesterHandle;
use pd_storage::StorageConfig;
use pd_storage::open_settings;
use std::path::PathBuf;
use std::sync::Arc;
use windows::WindowRegistry;

/// Browser process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserConfig {
    pub storage: StorageConfig,
    pub permissions: PermissionConfig,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::persistent(default_storage_root()),
            permissions: PermissionConfig::default(),
        }
    }
}

impl BrowserConfig {
    pub fn validate(&self) -> BrowserResult<()> {
        self.storage.validate()?;
        self.permissions.validate()
    }
}

/// Browser process top-level orchestration object.
pub struct Browser {
    config: BrowserConfig,
    permissions: Arc<PermissionController>,
    windows: Arc<WindowRegistry>,
}

impl Browser {
    /// Opens storage, migrates stored decisions and starts the permission service.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: BrowserConfig) -> BrowserResult<Self> {
        config.validate()?;

        let settings = open_settings(&config.storage)?;
        let windows = Arc::new(WindowRegistry::new());
        let permissions = PermissionController::new(
            &config.permissions,
            settings,
            windows.clone(),
        )?;

        if permissions.store().migrate()? {
            tracing::info!(
                key = permissions.store().key(),
                "migrated stored permission decisions to the current schema"
            );
        }

        Ok(Self {
            config,
            permissions: Arc::new(permissions),
            windows,
        })
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub fn permissions(&self) -> &Arc<PermissionController> {
        &self.permissions
    }

    pub fn windows(&self) -> &Arc<WindowRegistry> {
        &self.windows
    }

    /// Registers a window; the returned endpoint is the window's side of the channel.
    pub fn open_window(&self) -> BrowserResult<(RequesterHandle, LocalIpcEndpoint)> {
        self.windows.open_window()
    }

    pub fn close_window(&self, handle: RequesterHandle) -> bool {
        self.windows.close_window(handle)
    }

    /// Capability-request hook of the page runtime.
    pub async fn on_permission_request(
        &self,
        capability: &str,
        details: RequestDetails,
        requester: RequesterHandle,
    ) -> Decision {
        let request = CapabilityRequest::new(capability, details, requester);
        self.permissions.resolve(&request).await
    }

    /// Capability-check hook of the page runtime.
    pub fn on_permission_check(
        &self,
        capability: &str,
        requesting_origin: Option<&str>,
        details: RequestDetails,
    ) -> Decision {
        let check = CapabilityCheck::new(
            capability,
            requesting_origin.map(str::to_owned),
            details,
        );
        self.permissions.check_only(&check)
    }

    /// Handles every message the windows have sent since the last call. Returns how many
    /// messages were processed.
    pub fn pump_windows(&self) -> usize {
        let inbound = self.windows.drain_inbound();
        let processed = inbound.len();

        for (window, envelope) in inbound {
            let outcome = host::dispatch(&self.permissions, &envelope);
            let Some(reply) = host::reply_for(&envelope, outcome) else {
                continue;
            };
            if let Err(error) = self.windows.send_to(window, &reply) {
                tracing::warn!(window = window.0, %error, "failed to deliver IPC reply");
            }
        }

        processed
    }
}

fn default_storage_root() -> PathBuf {
    if let Some(override_root) = std::env::var_os("PIXELDUST_STORAGE_DIR") {
        return PathBuf::from(override_root);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".pixeldust")
}

#[cfg(test)]
mod tests {
    use super::Browser;
    use super::BrowserConfig;
    use pd_ipc::IpcEnvelope;
    use pd_ipc::LocalIpcEndpoint;
    use pd_permissions::Decision;
    use pd_permissions::PermissionConfig;
    use pd_permissions::RequestDetails;
    use pd_permissions::RequesterHandle;
    use pd_storage::StorageConfig;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn ephemeral_browser() -> Arc<Browser> {
        let config = BrowserConfig {
            storage: StorageConfig::ephemeral(),
            permissions: PermissionConfig::default(),
        };
        Arc::new(Browser::new(config).unwrap_or_else(|_| unreachable!()))
    }

    fn next_message(window: &LocalIpcEndpoint) -> Option<IpcEnvelope> {
        window.try_recv().ok().flatten()
    }

    async fn tick() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn default_config_is_persistent_and_valid() {
        let config = BrowserConfig::default();
        assert!(!config.storage.ephemeral_mode);
        assert!(config.storage.root.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_permission_config_is_rejected() {
        let mut config = BrowserConfig {
            storage: StorageConfig::ephemeral(),
            permissions: PermissionConfig::default(),
        };
        config.permissions.settle_delay = config.permissions.prompt_timeout;
        assert!(config.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_round_trip_over_window_ipc() {
        let browser = ephemeral_browser();
        let (handle, window) = browser.open_window().unwrap_or_else(|_| unreachable!());

        let pending = {
            let browser = browser.clone();
            tokio::spawn(async move {
                browser
                    .on_permission_request(
                        "geolocation",
                        RequestDetails::main_frame("https://example.com/"),
                        handle,
                    )
                    .await
            })
        };
        tick().await;

        let prompt = next_message(&window).unwrap_or_else(|| unreachable!());
        assert_eq!(prompt.channel, "showPermissionDialog");
        assert_eq!(prompt.payload["site"], json!("example.com"));
        assert_eq!(prompt.payload["permissionKind"], json!("geolocation"));
        assert_eq!(prompt.payload["title"], json!("Access Location"));
        assert_eq!(prompt.payload["requesterId"], json!(handle.0));

        let answer = IpcEnvelope::new(
            "permissionDialogResponse",
            json!({"site": "example.com", "permissionKind": "geolocation", "granted": true, "remember": true}),
        );
        assert!(window.send(&answer).is_ok());
        assert_eq!(browser.pump_windows(), 1);

        assert_eq!(pending.await.ok(), Some(Decision::Granted));
        assert_eq!(
            browser.on_permission_check(
                "geolocation",
                Some("https://example.com"),
                RequestDetails::main_frame("https://example.com/")
            ),
            Decision::Granted
        );
        assert_eq!(next_message(&window), None);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_prompt_is_dismissed_on_the_window() {
        let browser = ephemeral_browser();
        let (handle, window) = browser.open_window().unwrap_or_else(|_| unreachable!());

        let decision = browser
            .on_permission_request(
                "notifications",
                RequestDetails::main_frame("https://c.com/"),
                handle,
            )
            .await;

        assert_eq!(decision, Decision::Denied);
        let channels: Vec<String> = std::iter::from_fn(|| next_message(&window))
            .map(|envelope| envelope.channel)
            .collect();
        assert_eq!(channels, vec!["showPermissionDialog", "dismissPermissionDialog"]);
        assert!(browser.permissions().all_decisions().is_ok_and(|table| table.is_empty()));
    }

    #[tokio::test]
    async fn closed_window_denies_without_prompting() {
        let browser = ephemeral_browser();
        let (handle, window) = browser.open_window().unwrap_or_else(|_| unreachable!());
        assert!(browser.close_window(handle));

        let decision = browser
            .on_permission_request("camera", RequestDetails::main_frame("https://meet.example"), handle)
            .await;
        assert_eq!(decision, Decision::Denied);
        let unknown_window = browser
            .on_permission_request(
                "camera",
                RequestDetails::main_frame("https://meet.example"),
                RequesterHandle(404),
            )
            .await;
        assert_eq!(unknown_window, Decision::Denied);
        assert_eq!(next_message(&window), None);
    }

    #[tokio::test]
    async fn management_requests_get_replies() {
        let browser = ephemeral_browser();
        let (_handle, window) = browser.open_window().unwrap_or_else(|_| unreachable!());

        let set = IpcEnvelope::new(
            "permission:set",
            json!({"site": "a.com", "permissionKind": "camera", "decision": "denied"}),
        );
        assert!(window.send(&set).is_ok());
        assert!(window.send(&IpcEnvelope::new("permission:getAll", json!({}))).is_ok());
        assert_eq!(browser.pump_windows(), 2);

        let replies: Vec<IpcEnvelope> = std::iter::from_fn(|| next_message(&window)).collect();
        assert_eq!(
            replies,
            vec![
                IpcEnvelope::new("permission:set:reply", json!(true)),
                IpcEnvelope::new("permission:getAll:reply", json!({"a.com": {"camera": "denied"}})),
            ]
        );
    }

    #[tokio::test]
    async fn decisions_survive_a_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let config = BrowserConfig {
            storage: StorageConfig::persistent(dir.path().to_path_buf()),
            permissions: PermissionConfig::default(),
        };

        {
            let browser = Browser::new(config.clone()).unwrap_or_else(|_| unreachable!());
            let site = pd_permissions::Site::new("maps.example").unwrap_or_else(|_| unreachable!());
            assert!(
                browser
                    .permissions()
                    .set_decision(&site, pd_permissions::PermissionKind::Geolocation, Decision::Granted, true)
                    .is_ok()
            );
        }

        let browser = Browser::new(config).unwrap_or_else(|_| unreachable!());
        assert_eq!(
            browser.on_permission_check(
                "geolocation",
                Some("https://maps.example:8443"),
                RequestDetails::main_frame("https://maps.example:8443/")
            ),
            Decision::Granted
        );
    }
}
