//! Wire contract between the controller and UI surfaces.
//!
//! Field names are part of the contract: both ends live in separate address spaces and
//! only share these JSON shapes.

use crate::kind::Decision;
use crate::kind::PermissionKind;
use crate::surface::RequesterHandle;
use serde::Deserialize;
use serde::Serialize;

/// Outbound: render a prompt.
pub const SHOW_PERMISSION_DIALOG: &str = "showPermissionDialog";
/// Outbound: remove a prompt that timed out.
pub const DISMISS_PERMISSION_DIALOG: &str = "dismissPermissionDialog";
/// Inbound: the user answered a prompt.
pub const PERMISSION_DIALOG_RESPONSE: &str = "permissionDialogResponse";
pub const PERMISSION_SET: &str = "permission:set";
pub const PERMISSION_GET: &str = "permission:get";
pub const PERMISSION_CLEAR: &str = "permission:clear";
pub const PERMISSION_GET_ALL: &str = "permission:getAll";
/// Appended to a request channel to name its reply channel.
pub const REPLY_SUFFIX: &str = ":reply";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionPrompt {
    pub site: String,
    pub permission_kind: PermissionKind,
    pub title: String,
    pub description: String,
    pub requester_id: RequesterHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDismissal {
    pub site: String,
    pub permission_kind: PermissionKind,
}

/// The user's answer. Closing the prompt (overlay click, Escape) arrives as `granted: false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDialogResponse {
    pub site: String,
    #[serde(alias = "permissionType")]
    pub permission_kind: PermissionKind,
    pub granted: bool,
    #[serde(default)]
    pub remember: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPermissionMessage {
    pub site: String,
    #[serde(alias = "permissionType")]
    pub permission_kind: PermissionKind,
    pub decision: Decision,
    #[serde(default = "remember_by_default")]
    pub remember: bool,
}

fn remember_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionQuery {
    pub site: String,
    #[serde(alias = "permissionType")]
    pub permission_kind: PermissionKind,
}

/// Both fields: one entry. Site only: the whole site. Neither: everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearPermissionsMessage {
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default, alias = "permissionType")]
    pub permission_kind: Option<PermissionKind>,
}
