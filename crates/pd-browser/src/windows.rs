//! Window registry: the browser-side end of every window's IPC channel.

use pd_core::BrowserResult;
use pd_ipc::ChannelConfig;
use pd_ipc::EndpointRole;
use pd_ipc::IpcEnvelope;
use pd_ipc::IpcSender;
use pd_ipc::LocalIpcEndpoint;
use pd_ipc::local_channel_pair;
use pd_permissions::PromptSurface;
use pd_permissions::RequesterHandle;
use pd_permissions::SurfaceLocator;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Renders prompts by posting envelopes to a window over IPC.
#[derive(Debug, Clone)]
pub struct IpcPromptSurface {
    sender: IpcSender,
}

impl IpcPromptSurface {
    pub fn new(sender: IpcSender) -> Self {
        Self { sender }
    }
}

impl PromptSurface for IpcPromptSurface {
    fn send(&self, channel: &str, payload: Value) -> BrowserResult<()> {
        self.sender.send(&IpcEnvelope::new(channel, payload))
    }
}

struct WindowChannel {
    surface: Arc<IpcPromptSurface>,
    inbox: LocalIpcEndpoint,
}

/// Open windows keyed by the handle the page runtime attaches to capability requests.
#[derive(Default)]
pub struct WindowRegistry {
    next_handle: AtomicU64,
    windows: Mutex<BTreeMap<RequesterHandle, WindowChannel>>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a window and returns its handle plus the window-side endpoint.
    pub fn open_window(&self) -> BrowserResult<(RequesterHandle, LocalIpcEndpoint)> {
        let (browser_side, window_side) = local_channel_pair(
            ChannelConfig::hardened(EndpointRole::Browser)?,
            ChannelConfig::hardened(EndpointRole::Window)?,
        )?;
        let handle = RequesterHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let channel = WindowChannel {
            surface: Arc::new(IpcPromptSurface::new(browser_side.sender())),
            inbox: browser_side,
        };

        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, channel);
        tracing::debug!(window = handle.0, "window registered");
        Ok((handle, window_side))
    }

    /// Returns false if the window was not registered.
    pub fn close_window(&self, handle: RequesterHandle) -> bool {
        let removed = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .is_some();
        if removed {
            tracing::debug!(window = handle.0, "window unregistered");
        }
        removed
    }

    /// Takes every queued inbound envelope. Windows whose peer hung up are unregistered.
    pub fn drain_inbound(&self) -> Vec<(RequesterHandle, IpcEnvelope)> {
        let mut inbound = Vec::new();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        windows.retain(|handle, channel| {
            loop {
                match channel.inbox.try_recv() {
                    Ok(Some(envelope)) => inbound.push((*handle, envelope)),
                    Ok(None) => return true,
                    Err(error) if error.code == "ipc.disconnected" => {
                        tracing::debug!(window = handle.0, "window disconnected");
                        return false;
                    }
                    Err(error) => {
                        tracing::warn!(window = handle.0, %error, "dropping malformed IPC message");
                    }
                }
            }
        });

        inbound
    }

    pub fn send_to(&self, handle: RequesterHandle, envelope: &IpcEnvelope) -> BrowserResult<()> {
        let surface = self.surface(handle).ok_or_else(|| {
            pd_core::BrowserError::new(
                "browser.window_missing",
                format!("window {} is not registered", handle.0),
            )
        })?;
        surface.sender.send(envelope)
    }

    fn surface(&self, handle: RequesterHandle) -> Option<Arc<IpcPromptSurface>> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .map(|channel| channel.surface.clone())
    }
}

impl SurfaceLocator for WindowRegistry {
    fn locate(&self, requester: RequesterHandle) -> Option<Arc<dyn PromptSurface>> {
        let surface: Arc<dyn PromptSurface> = self.surface(requester)?;
        Some(surface)
    }
}
