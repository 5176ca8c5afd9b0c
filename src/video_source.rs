//! Video source resolution.
//!
//! A stored `videoUrl` can be one of several things depending on how the admin
//! panel saved it: a plain URL to a file, a pasted `<iframe>` snippet, or a
//! JSON descriptor (itself usually stored as a string) describing an embed
//! provider or an upload that was too large to keep. [`VideoRef`] is the typed
//! form of that value and [`resolve_video`] turns it into a
//! [`RenderableDescriptor`] that a renderer can draw without further checks.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::debug;

use crate::catalog::{Title, loose_int};
use crate::error::CoreError;

/// Embed base for BigCommand players; the descriptor's `dataId` is appended.
pub const BIGCOMMAND_EMBED_BASE: &str = "https://app.bigcommand.com/embed/";
/// Where the large-file placeholder sends people to fix the source.
pub const ADMIN_PANEL_PATH: &str = "/admin.html";
/// Container assumed for direct video links.
pub const DIRECT_VIDEO_CONTAINER: &str = "mp4";

const MIB: f64 = 1024.0 * 1024.0;

/// Stored reference to a playable video. Absence is modelled as `Option`.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoRef {
    Url(String),
    Markup(String),
    Descriptor(Descriptor),
}

impl VideoRef {
    /// Classifies a raw stored string. Blank input means "no video".
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }

        if let Some(descriptor) = parse_descriptor(raw) {
            return Some(Self::Descriptor(descriptor));
        }

        if is_iframe_markup(raw) {
            Some(Self::Markup(raw.to_owned()))
        } else {
            Some(Self::Url(raw.to_owned()))
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Url(text) | Self::Markup(text) => text.trim().is_empty(),
            Self::Descriptor(_) => false,
        }
    }
}

/// Structured descriptor as written by the admin panel.
///
/// Fields are kept loose because classification happens in
/// [`resolve_video`]; unknown keys survive a load/save round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(
        rename = "type",
        default,
        deserialize_with = "opt_loose_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_loose_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub provider: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_loose_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub iframe_src: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_loose_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub embed_code: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_loose_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub data_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Descriptor {
    pub fn iframe(src: impl Into<String>) -> Self {
        Self {
            kind: Some("embed".into()),
            provider: Some("iframe".into()),
            iframe_src: Some(src.into()),
            ..Self::default()
        }
    }

    pub fn bigcommand(data_id: impl Into<String>) -> Self {
        Self {
            kind: Some("embed".into()),
            provider: Some(EmbedProvider::BigCommand.to_string()),
            data_id: Some(data_id.into()),
            ..Self::default()
        }
    }

    pub fn file(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            kind: Some("file".into()),
            file_info: Some(FileInfo {
                name: name.into(),
                size: Value::from(size_bytes),
                mime_type: None,
            }),
            ..Self::default()
        }
    }
}

/// Metadata of an upload that exists but cannot be streamed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    #[serde(default, deserialize_with = "loose_string_or_empty")]
    pub name: String,
    #[serde(default)]
    pub size: Value,
    #[serde(
        default,
        rename = "type",
        deserialize_with = "opt_loose_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub mime_type: Option<String>,
}

impl FileInfo {
    pub fn size_bytes(&self) -> u64 {
        loose_int(&self.size)
            .and_then(|size| u64::try_from(size).ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EmbedProvider {
    #[serde(rename = "bigcommand")]
    BigCommand,
}

impl fmt::Display for EmbedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BigCommand => f.write_str("bigcommand"),
        }
    }
}

/// Everything a renderer needs to draw the player area.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RenderableDescriptor {
    /// Responsive 16:9 iframe pointed at `src`.
    IframeEmbed { src: String },
    /// Trusted embed markup, rendered verbatim.
    RawEmbedMarkup { markup: String },
    ProviderEmbed {
        provider: EmbedProvider,
        data_id: String,
    },
    LargeFilePlaceholder { name: String, size_bytes: u64 },
    /// Native video element with progress reporting.
    DirectVideo { url: String },
    NoVideo,
}

impl RenderableDescriptor {
    /// The iframe `src`, for the variants rendered as an iframe.
    pub fn iframe_src(&self) -> Option<String> {
        match self {
            Self::IframeEmbed { src } => Some(src.clone()),
            Self::ProviderEmbed {
                provider: EmbedProvider::BigCommand,
                data_id,
            } => Some(format!("{BIGCOMMAND_EMBED_BASE}{data_id}")),
            _ => None,
        }
    }

    /// Assumed container for native playback.
    pub fn container(&self) -> Option<&'static str> {
        match self {
            Self::DirectVideo { .. } => Some(DIRECT_VIDEO_CONTAINER),
            _ => None,
        }
    }

    /// Only native playback can feed the watch-history ledger with progress.
    pub fn reports_progress(&self) -> bool {
        matches!(self, Self::DirectVideo { .. })
    }

    /// Human readable size for the large-file placeholder, e.g. `"12.50 MB"`.
    pub fn size_label(&self) -> Option<String> {
        match self {
            Self::LargeFilePlaceholder { size_bytes, .. } => Some(format_mib(*size_bytes)),
            _ => None,
        }
    }

    /// Link shown by the placeholder variants.
    pub fn admin_link(&self) -> Option<&'static str> {
        match self {
            Self::LargeFilePlaceholder { .. } => Some(ADMIN_PANEL_PATH),
            _ => None,
        }
    }
}

pub fn format_mib(size_bytes: u64) -> String {
    format!("{:.2} MB", size_bytes as f64 / MIB)
}

/// Picks the reference for `episode_number`: a non-blank episode-level value
/// wins, the title-level value is the fallback.
pub fn select_ref(title: &Title, episode_number: Option<i64>) -> Option<&VideoRef> {
    let episode_ref = episode_number
        .and_then(|number| title.episode(number))
        .and_then(|episode| episode.video_url.as_ref())
        .filter(|video_ref| !video_ref.is_blank());

    episode_ref.or_else(|| title.video_url.as_ref().filter(|video_ref| !video_ref.is_blank()))
}

pub fn resolve_video(title: &Title, episode_number: Option<i64>) -> RenderableDescriptor {
    resolve_ref(select_ref(title, episode_number))
}

/// Total mapping from a (possibly absent) reference to a renderable form.
pub fn resolve_ref(video_ref: Option<&VideoRef>) -> RenderableDescriptor {
    let Some(video_ref) = video_ref.filter(|video_ref| !video_ref.is_blank()) else {
        return RenderableDescriptor::NoVideo;
    };

    match video_ref {
        VideoRef::Descriptor(descriptor) => match resolve_descriptor(descriptor) {
            Ok(resolved) => resolved,
            Err(err) => {
                debug!(error = %err, "rendering descriptor as no video");
                RenderableDescriptor::NoVideo
            }
        },
        VideoRef::Markup(markup) => RenderableDescriptor::RawEmbedMarkup {
            markup: markup.clone(),
        },
        VideoRef::Url(url) => RenderableDescriptor::DirectVideo { url: url.clone() },
    }
}

fn resolve_descriptor(descriptor: &Descriptor) -> Result<RenderableDescriptor, CoreError> {
    match descriptor.kind.as_deref() {
        Some("embed") => Ok(resolve_embed(descriptor)),
        Some("file") => {
            let info = descriptor.file_info.as_ref().ok_or_else(|| {
                CoreError::UnresolvedDescriptorType("file descriptor without fileInfo".into())
            })?;
            Ok(RenderableDescriptor::LargeFilePlaceholder {
                name: info.name.clone(),
                size_bytes: info.size_bytes(),
            })
        }
        Some(other) => Err(CoreError::UnresolvedDescriptorType(other.to_owned())),
        None => Err(CoreError::UnresolvedDescriptorType("<missing>".into())),
    }
}

fn resolve_embed(descriptor: &Descriptor) -> RenderableDescriptor {
    let markup = || RenderableDescriptor::RawEmbedMarkup {
        markup: descriptor.embed_code.clone().unwrap_or_default(),
    };

    match descriptor.provider.as_deref() {
        Some("iframe") => match non_empty(&descriptor.iframe_src) {
            Some(src) => RenderableDescriptor::IframeEmbed { src: src.to_owned() },
            None => markup(),
        },
        Some("bigcommand") => match non_empty(&descriptor.data_id) {
            Some(data_id) => RenderableDescriptor::ProviderEmbed {
                provider: EmbedProvider::BigCommand,
                data_id: data_id.to_owned(),
            },
            None => markup(),
        },
        _ => markup(),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|text| !text.is_empty())
}

/// `None` when the text is not a JSON object (the common case for URLs).
fn parse_descriptor(raw: &str) -> Option<Descriptor> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(object)) => Some(descriptor_from_object(object)),
        _ => None,
    }
}

/// Any JSON object is a descriptor. One that does not fit the shape keeps its
/// keys but loses its `type`, so it resolves to [`RenderableDescriptor::NoVideo`].
fn descriptor_from_object(object: Map<String, Value>) -> Descriptor {
    match serde_json::from_value(Value::Object(object.clone())) {
        Ok(descriptor) => descriptor,
        Err(err) => {
            let err = CoreError::MalformedVideoRef(err.to_string());
            debug!(error = %err, "keeping unreadable descriptor without a type");
            Descriptor {
                extra: object,
                ..Descriptor::default()
            }
        }
    }
}

/// Strings as-is, numbers and booleans in their JSON text form.
fn loose_string(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn opt_loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(loose_string(Value::deserialize(deserializer)?))
}

fn loose_string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(loose_string(Value::deserialize(deserializer)?).unwrap_or_default())
}

/// Tag names are matched case-insensitively, as HTML does.
fn is_iframe_markup(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.contains("<iframe") && lower.contains("</iframe>")
}

impl Serialize for VideoRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Url(text) | Self::Markup(text) => serializer.serialize_str(text),
            // Descriptors are stored as JSON text, the same way the admin panel writes them.
            Self::Descriptor(descriptor) => {
                let text = serde_json::to_string(descriptor).map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&text)
            }
        }
    }
}

impl<'de> Deserialize<'de> for VideoRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let video_ref = match value {
            Value::String(text) => {
                VideoRef::parse(&text).unwrap_or_else(|| VideoRef::Url(String::new()))
            }
            Value::Object(object) => VideoRef::Descriptor(descriptor_from_object(object)),
            other => VideoRef::Url(other.to_string()),
        };
        Ok(video_ref)
    }
}
