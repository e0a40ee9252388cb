//! Maps raw capability identifiers from the embedding runtime onto [`PermissionKind`].
//!
//! Everything here is pure: no store access, no I/O.

use crate::kind::PermissionKind;

/// Capability the runtime raises when a page enters fullscreen.
pub const FULLSCREEN: &str = "fullscreen";
/// Clipboard write of sanitized content; safe by construction.
pub const CLIPBOARD_SANITIZED_WRITE: &str = "clipboard-sanitized-write";

/// Track type named by a media capability request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
}

impl MediaType {
    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

/// Details the runtime attaches to a capability request or check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDetails {
    pub is_main_frame: bool,
    pub requesting_url: Option<String>,
    pub embedding_origin: Option<String>,
    /// Singular track type, when the runtime reports just one.
    pub media_type: Option<MediaType>,
    pub media_types: Vec<MediaType>,
}

impl RequestDetails {
    /// Details for a request made by a top-level document at `url`.
    pub fn main_frame(url: impl Into<String>) -> Self {
        Self {
            is_main_frame: true,
            requesting_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Details for a request made by an embedded frame at `url` inside `embedding_origin`.
    pub fn subframe(url: impl Into<String>, embedding_origin: impl Into<String>) -> Self {
        Self {
            is_main_frame: false,
            requesting_url: Some(url.into()),
            embedding_origin: Some(embedding_origin.into()),
            ..Self::default()
        }
    }

    pub fn with_media_types(mut self, media_types: Vec<MediaType>) -> Self {
        self.media_types = media_types;
        self
    }

    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = Some(media_type);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mapping {
    Kind(PermissionKind),
    /// Generic media request; narrowed using the request's track types.
    MediaRequest,
    /// Known to the runtime but never prompted for.
    Unsupported(&'static str),
}

const CAPABILITY_TABLE: &[(&str, Mapping)] = &[
    ("clipboard-read", Mapping::Kind(PermissionKind::ClipboardRead)),
    ("clipboard-write", Mapping::Kind(PermissionKind::ClipboardWrite)),
    (CLIPBOARD_SANITIZED_WRITE, Mapping::Kind(PermissionKind::ClipboardWrite)),
    ("geolocation", Mapping::Kind(PermissionKind::Geolocation)),
    ("notifications", Mapping::Kind(PermissionKind::Notifications)),
    ("media", Mapping::MediaRequest),
    ("mediaKeySystem", Mapping::Kind(PermissionKind::Media)),
    ("pointerLock", Mapping::Kind(PermissionKind::PointerLock)),
    ("midi", Mapping::Unsupported("midi")),
    ("midiSysex", Mapping::Unsupported("midi")),
    ("usb", Mapping::Unsupported("usb")),
    ("serial", Mapping::Unsupported("serial")),
    ("hid", Mapping::Unsupported("hid")),
    ("bluetooth", Mapping::Unsupported("bluetooth")),
];

fn lookup(raw: &str) -> Option<Mapping> {
    CAPABILITY_TABLE
        .iter()
        .find(|(name, _)| *name == raw)
        .map(|(_, mapping)| *mapping)
}

/// Capabilities granted without consulting the store or prompting.
pub fn is_always_allowed(raw: &str) -> bool {
    raw == FULLSCREEN || raw == CLIPBOARD_SANITIZED_WRITE
}

/// Classifies a raw capability. `None` means "unsupported": callers must deny without prompting.
pub fn classify(raw: &str, details: &RequestDetails) -> Option<PermissionKind> {
    match lookup(raw)? {
        Mapping::Kind(kind) => Some(kind),
        Mapping::MediaRequest => Some(narrow_media(details)),
        Mapping::Unsupported(_) => None,
    }
}

/// Internal name for a raw capability, including ones outside [`PermissionKind`].
pub fn internal_name(raw: &str) -> Option<&'static str> {
    match lookup(raw)? {
        Mapping::Kind(kind) => Some(kind.as_str()),
        Mapping::MediaRequest => Some(PermissionKind::Media.as_str()),
        Mapping::Unsupported(name) => Some(name),
    }
}

fn narrow_media(details: &RequestDetails) -> PermissionKind {
    if details.media_types.contains(&MediaType::Video) {
        return PermissionKind::Camera;
    }
    if details.media_types.contains(&MediaType::Audio) {
        return PermissionKind::Microphone;
    }

    match details.media_type {
        Some(MediaType::Video) => PermissionKind::Camera,
        Some(MediaType::Audio) => PermissionKind::Microphone,
        None => PermissionKind::Media,
    }
}

#[cfg(test)]
mod tests {
    use super::MediaType;
    use super::RequestDetails;
    use super::classify;
    use super::internal_name;
    use super::is_always_allowed;
    use crate::kind::PermissionKind;

    fn details() -> RequestDetails {
        RequestDetails::main_frame("https://example.com/")
    }

    #[test]
    fn direct_lookups() {
        assert_eq!(
            classify("geolocation", &details()),
            Some(PermissionKind::Geolocation)
        );
        assert_eq!(
            classify("pointerLock", &details()),
            Some(PermissionKind::PointerLock)
        );
        assert_eq!(
            classify("mediaKeySystem", &details()),
            Some(PermissionKind::Media)
        );
    }

    #[test]
    fn known_but_unsupported_capabilities_classify_to_none() {
        for raw in ["midi", "midiSysex", "usb", "serial", "hid", "bluetooth"] {
            assert_eq!(classify(raw, &details()), None, "{raw}");
        }
        assert_eq!(internal_name("midiSysex"), Some("midi"));
        assert_eq!(classify("teleport", &details()), None);
        assert_eq!(internal_name("teleport"), None);
    }

    #[test]
    fn media_narrows_by_track_list_then_single_type() {
        let video = details().with_media_types(vec![MediaType::Video]);
        assert_eq!(classify("media", &video), Some(PermissionKind::Camera));

        let audio = details().with_media_types(vec![MediaType::Audio]);
        assert_eq!(classify("media", &audio), Some(PermissionKind::Microphone));

        let single = details().with_media_type(MediaType::Audio);
        assert_eq!(classify("media", &single), Some(PermissionKind::Microphone));

        let both = details().with_media_types(vec![MediaType::Audio, MediaType::Video]);
        assert_eq!(classify("media", &both), Some(PermissionKind::Camera));

        let list_wins = details()
            .with_media_types(vec![MediaType::Audio])
            .with_media_type(MediaType::Video);
        assert_eq!(classify("media", &list_wins), Some(PermissionKind::Microphone));

        assert_eq!(classify("media", &details()), Some(PermissionKind::Media));
    }

    #[test]
    fn always_allowed_capabilities() {
        assert!(is_always_allowed("fullscreen"));
        assert!(is_always_allowed("clipboard-sanitized-write"));
        assert!(!is_always_allowed("clipboard-write"));
    }

    #[test]
    fn media_type_names() {
        assert_eq!(MediaType::from_name("video"), Some(MediaType::Video));
        assert_eq!(MediaType::from_name("screen"), None);
    }
}
