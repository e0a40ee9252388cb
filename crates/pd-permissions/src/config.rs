//! Service configuration for the permission controller.

use pd_core::BrowserError;
use pd_core::BrowserResult;
use std::time::Duration;

/// Settings key holding the persisted decision table.
pub const DEFAULT_SETTINGS_KEY: &str = "sitePermissions";
const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionConfig {
    /// How long a prompt may stay unanswered before it is auto-denied.
    pub prompt_timeout: Duration,
    /// Pause between dismissing one prompt and showing the next queued one.
    pub settle_delay: Duration,
    pub settings_key: String,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            settings_key: DEFAULT_SETTINGS_KEY.to_owned(),
        }
    }
}

impl PermissionConfig {
    pub fn validate(&self) -> BrowserResult<()> {
        if self.prompt_timeout.is_zero() {
            return Err(BrowserError::new(
                "permissions.config.timeout_invalid",
                "prompt_timeout must be greater than zero",
            ));
        }

        if self.settle_delay >= self.prompt_timeout {
            return Err(BrowserError::new(
                "permissions.config.settle_delay_invalid",
                format!(
                    "settle_delay ({:?}) must be shorter than prompt_timeout ({:?})",
                    self.settle_delay, self.prompt_timeout
                ),
            ));
        }

        if self.settings_key.trim().is_empty() {
            return Err(BrowserError::new(
                "permissions.config.settings_key_missing",
                "settings_key must not be empty",
            ));
        }

        Ok(())
    }
}
