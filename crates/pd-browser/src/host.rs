//! Routes inbound window messages to the permission controller.

use pd_core::BrowserError;
use pd_core::BrowserResult;
use pd_ipc::IpcEnvelope;
use pd_permissions::PermissionController;
use pd_permissions::Site;
use pd_permissions::protocol::ClearPermissionsMessage;
use pd_permissions::protocol::PERMISSION_CLEAR;
use pd_permissions::protocol::PERMISSION_DIALOG_RESPONSE;
use pd_permissions::protocol::PERMISSION_GET;
use pd_permissions::protocol::PERMISSION_GET_ALL;
use pd_permissions::protocol::PERMISSION_SET;
use pd_permissions::protocol::PermissionDialogResponse;
use pd_permissions::protocol::PermissionQuery;
use pd_permissions::protocol::REPLY_SUFFIX;
use pd_permissions::protocol::SetPermissionMessage;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

/// Handles one inbound envelope. `Ok(None)` means the channel expects no reply.
pub fn dispatch(
    controller: &PermissionController,
    envelope: &IpcEnvelope,
) -> BrowserResult<Option<Value>> {
    match envelope.channel.as_str() {
        PERMISSION_DIALOG_RESPONSE => {
            let response: PermissionDialogResponse = envelope.parse_payload()?;
            controller.handle_dialog_response(response);
            Ok(None)
        }
        PERMISSION_SET => {
            let message: SetPermissionMessage = envelope.parse_payload()?;
            let site = Site::new(&message.site)?;
            controller.set_decision(
                &site,
                message.permission_kind,
                message.decision,
                message.remember,
            )?;
            Ok(Some(Value::Bool(true)))
        }
        PERMISSION_GET => {
            let query: PermissionQuery = envelope.parse_payload()?;
            let site = Site::new(&query.site)?;
            let decision = controller.decision(&site, query.permission_kind)?;
            to_reply(&decision).map(Some)
        }
        PERMISSION_CLEAR => {
            let message: ClearPermissionsMessage = envelope.parse_payload()?;
            let removed = match (message.site.as_deref(), message.permission_kind) {
                (Some(site), Some(kind)) => controller.clear_decision(&Site::new(site)?, kind)?,
                (Some(site), None) => controller.clear_site(&Site::new(site)?)?,
                (None, None) => {
                    controller.clear_all()?;
                    true
                }
                (None, Some(kind)) => {
                    return Err(BrowserError::new(
                        "browser.ipc.clear_site_missing",
                        format!("clearing `{kind}` requires a site"),
                    ));
                }
            };
            Ok(Some(Value::Bool(removed)))
        }
        PERMISSION_GET_ALL => {
            let table = controller.all_decisions()?;
            to_reply(&table).map(Some)
        }
        other => Err(BrowserError::new(
            "browser.ipc.channel_unknown",
            format!("no handler for channel `{other}`"),
        )),
    }
}

/// Reply for a handled envelope, or an error reply when handling failed.
///
/// Dialog responses never get a reply, not even on failure: the window does not wait.
pub fn reply_for(
    envelope: &IpcEnvelope,
    outcome: BrowserResult<Option<Value>>,
) -> Option<IpcEnvelope> {
    let channel = format!("{}{REPLY_SUFFIX}", envelope.channel);
    match outcome {
        Ok(Some(payload)) => Some(IpcEnvelope::new(channel, payload)),
        Ok(None) => None,
        Err(error) => {
            tracing::warn!(channel = %envelope.channel, %error, "failed to handle IPC message");
            if envelope.channel == PERMISSION_DIALOG_RESPONSE {
                return None;
            }
            Some(IpcEnvelope::new(
                channel,
                json!({ "error": { "code": error.code, "message": error.message } }),
            ))
        }
    }
}

fn to_reply<T: Serialize>(value: &T) -> BrowserResult<Value> {
    serde_json::to_value(value).map_err(|error| {
        BrowserError::new(
            "browser.ipc.reply_encode_failed",
            format!("failed to encode reply: {error}"),
        )
    })
}
