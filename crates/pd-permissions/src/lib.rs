//! Site permission prompting for the browser process.
//!
//! Raw capability strings from the page runtime are classified into a [`PermissionKind`],
//! answered from the persisted [`DecisionStore`] when possible, and otherwise turned into a
//! prompt that the [`DialogArbitrator`] shows one at a time.

pub mod arbitrator;
pub mod classify;
pub mod config;
pub mod controller;
pub mod kind;
pub mod protocol;
pub mod store;
pub mod surface;

pub use arbitrator::ArbitratorSnapshot;
pub use arbitrator::DialogArbitrator;
pub use arbitrator::PermissionRequest;
pub use arbitrator::PromptOutcome;
pub use arbitrator::Resolution;
pub use classify::MediaType;
pub use classify::RequestDetails;
pub use config::PermissionConfig;
pub use controller::CapabilityCheck;
pub use controller::CapabilityRequest;
pub use controller::PermissionController;
pub use kind::Decision;
pub use kind::PermissionKind;
pub use kind::Site;
pub use store::DecisionStore;
pub use store::PermissionTable;
pub use store::SitePermissions;
pub use surface::NoSurfaces;
pub use surface::PromptSurface;
pub use surface::RequesterHandle;
pub use surface::SurfaceLocator;
