//! Seams to the UI: where prompts are rendered and how they are delivered.

use pd_core::BrowserResult;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Opaque identity of the view that raised a capability request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterHandle(pub u64);

/// A UI surface able to render prompts. Sends are fire-and-forget.
pub trait PromptSurface: Send + Sync {
    fn send(&self, channel: &str, payload: Value) -> BrowserResult<()>;
}

/// Finds the surface that should render prompts for a requester.
pub trait SurfaceLocator: Send + Sync {
    fn locate(&self, requester: RequesterHandle) -> Option<Arc<dyn PromptSurface>>;
}

/// Locator for headless use: no surface exists, so every prompt is auto-denied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSurfaces;

impl SurfaceLocator for NoSurfaces {
    fn locate(&self, _requester: RequesterHandle) -> Option<Arc<dyn PromptSurface>> {
        None
    }
}
