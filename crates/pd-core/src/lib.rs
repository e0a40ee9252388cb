//! Shared primitives used across PixelDust crates.

use thiserror::Error;

/// Result alias used across the workspace.
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Workspace error: a stable dotted `code` for matching plus a human message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct BrowserError {
    pub code: &'static str,
    pub message: String,
}

impl BrowserError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BrowserError;

    #[test]
    fn display_includes_code_and_message() {
        let error = BrowserError::new("storage.settings_write_failed", "disk full");
        assert_eq!(error.to_string(), "storage.settings_write_failed: disk full");
    }
}
