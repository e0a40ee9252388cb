//! Decision controller: the entry point the embedding runtime calls for every capability
//! request and silent capability check.

use crate::arbitrator::ArbitratorTiming;
use crate::arbitrator::DialogArbitrator;
use crate::arbitrator::PermissionRequest;
use crate::classify;
use crate::classify::RequestDetails;
use crate::config::PermissionConfig;
use crate::kind::Decision;
use crate::kind::PermissionKind;
use crate::kind::Site;
use crate::protocol::PermissionDialogResponse;
use crate::store::DecisionStore;
use crate::store::PermissionTable;
use crate::store::TableListener;
use crate::surface::RequesterHandle;
use crate::surface::SurfaceLocator;
use pd_core::BrowserResult;
use pd_storage::ListenerId;
use pd_storage::SettingsBackend;
use std::sync::Arc;

/// A capability request raised by page content; may prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequest {
    pub capability: String,
    pub details: RequestDetails,
    pub requester: RequesterHandle,
}

impl CapabilityRequest {
    pub fn new(
        capability: impl Into<String>,
        details: RequestDetails,
        requester: RequesterHandle,
    ) -> Self {
        Self {
            capability: capability.into(),
            details,
            requester,
        }
    }
}

/// A silent availability check (feature detection). Never prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityCheck {
    pub capability: String,
    pub requesting_origin: Option<String>,
    pub details: RequestDetails,
}

impl CapabilityCheck {
    pub fn new(
        capability: impl Into<String>,
        requesting_origin: Option<String>,
        details: RequestDetails,
    ) -> Self {
        Self {
            capability: capability.into(),
            requesting_origin,
            details,
        }
    }
}

/// Explicitly constructed permission service: one per browser process.
pub struct PermissionController {
    store: DecisionStore,
    arbitrator: DialogArbitrator,
    locator: Arc<dyn SurfaceLocator>,
}

impl PermissionController {
    /// Builds the controller and starts its arbitrator. Must be called inside a Tokio runtime.
    pub fn new(
        config: &PermissionConfig,
        settings: Arc<dyn SettingsBackend>,
        locator: Arc<dyn SurfaceLocator>,
    ) -> BrowserResult<Self> {
        config.validate()?;
        let arbitrator = DialogArbitrator::spawn(ArbitratorTiming {
            prompt_timeout: config.prompt_timeout,
            settle_delay: config.settle_delay,
        });
        Ok(Self {
            store: DecisionStore::new(settings, config.settings_key.clone()),
            arbitrator,
            locator,
        })
    }

    pub fn store(&self) -> &DecisionStore {
        &self.store
    }

    pub fn arbitrator(&self) -> &DialogArbitrator {
        &self.arbitrator
    }

    /// Decides a capability request, prompting the user when nothing is stored.
    ///
    /// Never fails: malformed input, a missing surface and unsupported capabilities all
    /// resolve to [`Decision::Denied`].
    pub async fn resolve(&self, request: &CapabilityRequest) -> Decision {
        let capability = request.capability.as_str();
        if classify::is_always_allowed(capability) {
            return Decision::Granted;
        }

        let details = &request.details;
        if !details.is_main_frame {
            tracing::debug!(capability, "denying capability request from embedded frame");
            return Decision::Denied;
        }

        let Some(kind) = classify::classify(capability, details) else {
            tracing::debug!(
                capability,
                internal = classify::internal_name(capability),
                "denying unsupported capability"
            );
            return Decision::Denied;
        };

        let Some(site) = requesting_site(details.requesting_url.as_deref()) else {
            return Decision::Denied;
        };

        match self.store.get(&site, kind) {
            Ok(Some(decision)) => {
                tracing::debug!(%site, %kind, %decision, "using stored permission decision");
                return decision;
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(%site, %kind, %error, "failed to read permission store; denying");
                return Decision::Denied;
            }
        }

        let Some(surface) = self.locator.locate(request.requester) else {
            tracing::warn!(
                %site,
                %kind,
                requester = request.requester.0,
                "no window available to show permission prompt; denying"
            );
            return Decision::Denied;
        };

        let outcome = self
            .arbitrator
            .arbitrate(
                PermissionRequest::new(site.clone(), kind, request.requester),
                surface,
            )
            .await;

        if outcome.should_persist() {
            if let Err(error) = self.store.set(&site, kind, outcome.decision, true) {
                tracing::warn!(%site, %kind, %error, "failed to remember permission decision");
            }
        }

        outcome.decision
    }

    /// Silent check: `Granted` only when a grant is already stored. Never prompts.
    pub fn check_only(&self, check: &CapabilityCheck) -> Decision {
        let details = &check.details;
        if !details.is_main_frame
            && check.requesting_origin.as_deref() != details.embedding_origin.as_deref()
        {
            return Decision::Denied;
        }

        let Some(origin) = check.requesting_origin.as_deref() else {
            return Decision::Denied;
        };

        let capability = check.capability.as_str();
        if classify::is_always_allowed(capability) {
            return Decision::Granted;
        }

        let Some(kind) = classify::classify(capability, details) else {
            return Decision::Denied;
        };

        let Some(site) = requesting_site(Some(origin)) else {
            return Decision::Denied;
        };

        match self.store.get(&site, kind) {
            Ok(Some(Decision::Granted)) => Decision::Granted,
            Ok(_) => Decision::Denied,
            Err(error) => {
                tracing::warn!(%site, %kind, %error, "failed to read permission store; denying");
                Decision::Denied
            }
        }
    }

    /// Routes a `permissionDialogResponse` event to the arbitrator.
    pub fn handle_dialog_response(&self, response: PermissionDialogResponse) {
        self.arbitrator.respond(response);
    }

    pub fn decision(&self, site: &Site, kind: PermissionKind) -> BrowserResult<Option<Decision>> {
        self.store.get(site, kind)
    }

    pub fn set_decision(
        &self,
        site: &Site,
        kind: PermissionKind,
        decision: Decision,
        remember: bool,
    ) -> BrowserResult<()> {
        self.store.set(site, kind, decision, remember)
    }

    pub fn clear_decision(&self, site: &Site, kind: PermissionKind) -> BrowserResult<bool> {
        self.store.clear(site, kind)
    }

    pub fn clear_site(&self, site: &Site) -> BrowserResult<bool> {
        self.store.clear_site(site)
    }

    pub fn clear_all(&self) -> BrowserResult<()> {
        self.store.clear_all()
    }

    pub fn all_decisions(&self) -> BrowserResult<PermissionTable> {
        self.store.get_all()
    }

    pub fn search_decisions(&self, term: &str) -> BrowserResult<PermissionTable> {
        self.store.search(term)
    }

    pub fn subscribe(&self, listener: TableListener) -> ListenerId {
        self.store.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.store.unsubscribe(id)
    }
}

fn requesting_site(origin: Option<&str>) -> Option<Site> {
    let Some(origin) = origin else {
        tracing::warn!("capability request carries no requesting origin; denying");
        return None;
    };

    match Site::from_origin(origin) {
        Ok(site) => Some(site),
        Err(error) => {
            tracing::warn!(origin, %error, "malformed requesting origin; denying");
            None
        }
    }
}
