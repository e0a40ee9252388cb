//! Permission vocabulary: kinds, decisions and the site partition key.

use core::fmt;
use core::str::FromStr;
use pd_core::BrowserError;
use pd_core::BrowserResult;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

/// Capabilities the browser is willing to prompt for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionKind {
    ClipboardRead,
    ClipboardWrite,
    Geolocation,
    Notifications,
    Camera,
    Microphone,
    /// Combined camera and microphone request whose track types could not be told apart.
    Media,
    #[serde(alias = "pointerLock")]
    PointerLock,
}

impl PermissionKind {
    pub const ALL: [Self; 8] = [
        Self::ClipboardRead,
        Self::ClipboardWrite,
        Self::Geolocation,
        Self::Notifications,
        Self::Camera,
        Self::Microphone,
        Self::Media,
        Self::PointerLock,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClipboardRead => "clipboard-read",
            Self::ClipboardWrite => "clipboard-write",
            Self::Geolocation => "geolocation",
            Self::Notifications => "notifications",
            Self::Camera => "camera",
            Self::Microphone => "microphone",
            Self::Media => "media",
            Self::PointerLock => "pointer-lock",
        }
    }

    /// Parses a kind name. The legacy spelling `pointerLock` is accepted.
    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "pointerLock" => Some(Self::PointerLock),
            other => Self::ALL.into_iter().find(|kind| kind.as_str() == other),
        }
    }

    pub fn prompt_title(self) -> &'static str {
        match self {
            Self::ClipboardRead => "Access Clipboard",
            Self::ClipboardWrite => "Modify Clipboard",
            Self::Geolocation => "Access Location",
            Self::Notifications => "Show Notifications",
            Self::Camera => "Access Camera",
            Self::Microphone => "Access Microphone",
            Self::Media => "Access Camera and Microphone",
            Self::PointerLock => "Lock Pointer",
        }
    }

    pub fn prompt_description(self) -> &'static str {
        match self {
            Self::ClipboardRead => "wants to read text from your clipboard",
            Self::ClipboardWrite => "wants to write text to your clipboard",
            Self::Geolocation => "wants to access your location",
            Self::Notifications => "wants to show notifications",
            Self::Camera => "wants to access your camera",
            Self::Microphone => "wants to access your microphone",
            Self::Media => "wants to access your camera and/or microphone",
            Self::PointerLock => "wants to lock your mouse pointer",
        }
    }

    /// Short label for permission lists.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::ClipboardRead => "Clipboard Read",
            Self::ClipboardWrite => "Clipboard Write",
            Self::Geolocation => "Location",
            Self::Notifications => "Notifications",
            Self::Camera => "Camera",
            Self::Microphone => "Microphone",
            Self::Media => "Camera & Microphone",
            Self::PointerLock => "Pointer Lock",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionKind {
    type Err = BrowserError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_name(value).ok_or_else(|| {
            BrowserError::new(
                "permissions.kind_unknown",
                format!("unknown permission kind `{value}`"),
            )
        })
    }
}

/// A recorded answer. "No record" is modelled as `Option::None` by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Granted,
    Denied,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "granted" => Some(Self::Granted),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }

    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl From<bool> for Decision {
    fn from(granted: bool) -> Self {
        if granted { Self::Granted } else { Self::Denied }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = BrowserError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_name(value).ok_or_else(|| {
            BrowserError::new(
                "permissions.decision_unknown",
                format!("unknown decision `{value}` (expected granted|denied)"),
            )
        })
    }
}

/// Partition key for stored decisions: the lower-cased hostname of the requesting origin.
///
/// Scheme and port are not part of the key, so `http://a.com` and `https://a.com:8443`
/// share one set of decisions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Site(String);

impl Site {
    /// Normalizes a bare hostname.
    pub fn new(host: &str) -> BrowserResult<Self> {
        let normalized = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(BrowserError::new(
                "permissions.site_empty",
                "site hostname must not be empty",
            ));
        }

        if normalized
            .chars()
            .any(|ch| ch.is_whitespace() || ch == '/' || ch == '\\')
        {
            return Err(BrowserError::new(
                "permissions.site_invalid",
                format!("`{host}` is not a hostname"),
            ));
        }

        Ok(Self(normalized))
    }

    /// Extracts the site from a full origin or URL such as `https://example.com:8443/path`.
    pub fn from_origin(origin: &str) -> BrowserResult<Self> {
        let parsed = Url::parse(origin).map_err(|error| {
            BrowserError::new(
                "permissions.origin_invalid",
                format!("failed to parse origin `{origin}`: {error}"),
            )
        })?;

        let host = parsed.host_str().ok_or_else(|| {
            BrowserError::new(
                "permissions.origin_host_missing",
                format!("origin `{origin}` has no host"),
            )
        })?;

        Self::new(host)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Site {
    type Error = BrowserError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Site> for String {
    fn from(site: Site) -> Self {
        site.0
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
