//! Upload storage used by the backend.
//!
//! Files are streamed to `<upload root>/<images|videos>/` under a generated
//! name so two uploads of `ep1.mp4` never collide. The HTTP layer feeds
//! chunks into a [`PendingUpload`]; this module owns type checks, size
//! limits, naming, episode-number detection and directory listing.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
    sync::LazyLock,
    time::SystemTime,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mime_guess::MimeGuess;
use rand_core::{OsRng, RngCore};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const IMAGES_SUBDIR: &str = "images";
pub const VIDEOS_SUBDIR: &str = "videos";
/// Public path prefix under which stored files are served.
pub const UPLOADS_URL_PREFIX: &str = "/uploads";

pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_VIDEO_BYTES: u64 = 2 * 1024 * 1024 * 1024;

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];
const VIDEO_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/quicktime",
    "video/x-matroska",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Image, MediaKind::Video];

    pub fn subdir(self) -> &'static str {
        match self {
            Self::Image => IMAGES_SUBDIR,
            Self::Video => VIDEOS_SUBDIR,
        }
    }

    fn allowed_types(self) -> &'static [&'static str] {
        match self {
            Self::Image => IMAGE_TYPES,
            Self::Video => VIDEO_TYPES,
        }
    }

    /// Accepts either the kind name or its directory name.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "image" | IMAGES_SUBDIR => Some(Self::Image),
            "video" | VIDEOS_SUBDIR => Some(Self::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_image_bytes: u64,
    pub max_video_bytes: u64,
}

impl UploadLimits {
    pub fn for_kind(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.max_image_bytes,
            MediaKind::Video => self.max_video_bytes,
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_video_bytes: DEFAULT_MAX_VIDEO_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("file exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("failed to store upload: {0}")]
    StorageWriteFailed(#[from] std::io::Error),
}

/// Success payload returned to the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub url: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub detected_episode_number: Option<u32>,
}

/// Entry of the upload listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUpload {
    pub name: String,
    pub kind: MediaKind,
    pub url: String,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Checks the declared (or guessed) content type against the kind's allow
/// list and returns the MIME type that was accepted.
pub fn check_media_type(
    kind: MediaKind,
    content_type: Option<&str>,
    file_name: &str,
) -> Result<String, UploadError> {
    let declared = content_type
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty() && value != "application/octet-stream");
    let mime = declared.or_else(|| {
        MimeGuess::from_path(file_name)
            .first()
            .map(|mime| mime.essence_str().to_owned())
    });

    match mime {
        Some(mime) if kind.allowed_types().contains(&mime.as_str()) => Ok(mime),
        Some(mime) => Err(UploadError::UnsupportedMediaType(mime)),
        None => Err(UploadError::UnsupportedMediaType(format!(
            "unknown type for {file_name}"
        ))),
    }
}

/// `<unix millis>-<nonce><.ext>`, extension taken from the original name.
pub fn stored_file_name(original_name: &str, unix_millis: i64, nonce: u32) -> String {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("{unix_millis}-{nonce}{extension}")
}

pub fn generate_stored_name(original_name: &str) -> String {
    stored_file_name(
        original_name,
        Utc::now().timestamp_millis(),
        OsRng.next_u32(),
    )
}

static EPISODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:^|[^a-z])(?:episode|ep)[\s._-]*(\d{1,4})",
        r"(?i)s\d{1,2}[\s._-]*e(\d{1,4})",
        r"(?i)(?:^|[\s._\[\(])e(\d{1,4})(?:$|[^a-z0-9])",
        r"(?:^|[\s_])-[\s_]*(\d{1,4})(?:$|[\s._\[\(])",
        r"^(\d{1,4})$",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Guesses the episode number from an uploaded file name, e.g.
/// `Show - 12.mp4`, `show_ep03.mkv` or `Show.S01E07.webm`.
pub fn detect_episode_number(file_name: &str) -> Option<u32> {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name);

    EPISODE_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(stem)
            .and_then(|captures| captures.get(1))
            .and_then(|number| number.as_str().parse::<u32>().ok())
    })
}

/// Joins a served `<kind>/<file>` pair onto the upload root, refusing
/// anything that is not a single plain file name.
pub fn stored_path(root: &Path, kind: MediaKind, file_name: &str) -> Option<PathBuf> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(root.join(kind.subdir()).join(name)),
        _ => None,
    }
}

pub fn upload_url(public_base: &str, kind: MediaKind, stored_name: &str) -> String {
    format!(
        "{}{UPLOADS_URL_PREFIX}/{}/{stored_name}",
        public_base.trim_end_matches('/'),
        kind.subdir()
    )
}

/// Creates the per-kind directories below `root`.
pub async fn ensure_upload_dirs(root: &Path) -> Result<()> {
    for kind in MediaKind::ALL {
        let dir = root.join(kind.subdir());
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating upload directory {}", dir.display()))?;
    }
    Ok(())
}

/// A file being written. Dropping it without [`finish`](Self::finish) leaves
/// the partial file behind, so callers abort on every error path.
#[derive(Debug)]
pub struct PendingUpload {
    file: fs::File,
    path: PathBuf,
    url: String,
    original_name: String,
    kind: MediaKind,
    limit: u64,
    written: u64,
}

impl PendingUpload {
    pub async fn create(
        root: &Path,
        public_base: &str,
        kind: MediaKind,
        original_name: &str,
        content_type: Option<&str>,
        limits: &UploadLimits,
    ) -> Result<Self, UploadError> {
        check_media_type(kind, content_type, original_name)?;

        let stored_name = generate_stored_name(original_name);
        let path = root.join(kind.subdir()).join(&stored_name);
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), original_name, "receiving upload");

        Ok(Self {
            file,
            url: upload_url(public_base, kind, &stored_name),
            path,
            original_name: original_name.to_owned(),
            kind,
            limit: limits.for_kind(kind),
            written: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        let written = self.written + chunk.len() as u64;
        if written > self.limit {
            return Err(UploadError::PayloadTooLarge { limit: self.limit });
        }
        self.file.write_all(chunk).await?;
        self.written = written;
        Ok(())
    }

    /// Flushes the file to disk. On failure the partial file is removed.
    pub async fn finish(mut self) -> Result<UploadedFile, UploadError> {
        if let Err(err) = self.sync().await {
            self.abort().await;
            return Err(err.into());
        }
        let detected_episode_number = match self.kind {
            MediaKind::Video => detect_episode_number(&self.original_name),
            MediaKind::Image => None,
        };
        Ok(UploadedFile {
            url: self.url,
            original_name: self.original_name,
            size_bytes: self.written,
            detected_episode_number,
        })
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }

    /// Removes the partially written file.
    pub async fn abort(self) {
        drop(self.file);
        if let Err(err) = fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %err, "failed to remove partial upload");
        }
    }
}

/// Lists stored uploads, newest first. `kind = None` lists both kinds.
pub fn list_uploads(
    root: &Path,
    public_base: &str,
    kind: Option<MediaKind>,
) -> Result<Vec<StoredUpload>> {
    let kinds: Vec<MediaKind> = match kind {
        Some(kind) => vec![kind],
        None => MediaKind::ALL.to_vec(),
    };

    let mut uploads = Vec::new();
    for kind in kinds {
        let dir = root.join(kind.subdir());
        if !dir.exists() {
            continue;
        }
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry
                .metadata()
                .with_context(|| format!("reading metadata for {}", entry.path().display()))?;
            uploads.push(StoredUpload {
                url: upload_url(public_base, kind, &name),
                name,
                kind,
                size_bytes: metadata.len(),
                modified: metadata.modified().ok().map(system_time_to_utc),
            });
        }
    }

    uploads.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(uploads)
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn media_type_checks_declared_type_first() {
        assert_eq!(
            check_media_type(MediaKind::Video, Some("video/mp4"), "x.bin").unwrap(),
            "video/mp4"
        );
        assert!(matches!(
            check_media_type(MediaKind::Image, Some("video/mp4"), "x.png"),
            Err(UploadError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn media_type_falls_back_to_extension() {
        assert_eq!(
            check_media_type(MediaKind::Image, Some("application/octet-stream"), "cover.PNG")
                .unwrap(),
            "image/png"
        );
        assert_eq!(
            check_media_type(MediaKind::Video, None, "ep1.webm").unwrap(),
            "video/webm"
        );
        assert!(check_media_type(MediaKind::Video, None, "notes").is_err());
    }

    #[test]
    fn stored_names_keep_lowercased_extension() {
        assert_eq!(stored_file_name("Ep 1.MP4", 1700000000000, 42), "1700000000000-42.mp4");
        assert_eq!(stored_file_name("noext", 1, 2), "1-2");
        assert_eq!(stored_file_name("weird.m p4", 1, 2), "1-2");
    }

    #[test]
    fn generated_names_differ() {
        assert_ne!(generate_stored_name("a.mp4"), generate_stored_name("a.mp4"));
    }

    #[test]
    fn detects_common_episode_patterns() {
        assert_eq!(detect_episode_number("Frieren - 12.mp4"), Some(12));
        assert_eq!(detect_episode_number("[Sub] Show EP03 [1080p].mkv"), Some(3));
        assert_eq!(detect_episode_number("show_ep7.mp4"), Some(7));
        assert_eq!(detect_episode_number("Episode 5.webm"), Some(5));
        assert_eq!(detect_episode_number("Show.S01E07.webm"), Some(7));
        assert_eq!(detect_episode_number("Show E09.mp4"), Some(9));
        assert_eq!(detect_episode_number("04.mp4"), Some(4));
        assert_eq!(detect_episode_number("trailer 1080p.mp4"), None);
        assert_eq!(detect_episode_number("Deep Sea.mp4"), None);
    }

    #[test]
    fn stored_path_rejects_traversal() {
        let root = Path::new("/srv/uploads");
        assert_eq!(
            stored_path(root, MediaKind::Video, "1-2.mp4"),
            Some(PathBuf::from("/srv/uploads/videos/1-2.mp4"))
        );
        assert_eq!(stored_path(root, MediaKind::Video, "../secret"), None);
        assert_eq!(stored_path(root, MediaKind::Image, "a/b.png"), None);
        assert_eq!(stored_path(root, MediaKind::Image, ""), None);
    }

    #[test]
    fn upload_url_joins_base() {
        assert_eq!(
            upload_url("https://media.example/", MediaKind::Image, "1-2.png"),
            "https://media.example/uploads/images/1-2.png"
        );
        assert_eq!(upload_url("", MediaKind::Video, "a.mp4"), "/uploads/videos/a.mp4");
    }

    #[tokio::test]
    async fn pending_upload_writes_file_and_reports_metadata() {
        let dir = tempdir().unwrap();
        ensure_upload_dirs(dir.path()).await.unwrap();

        let limits = UploadLimits::default();
        let mut pending = PendingUpload::create(
            dir.path(),
            "",
            MediaKind::Video,
            "Show - 08.mp4",
            Some("video/mp4"),
            &limits,
        )
        .await
        .unwrap();
        pending.write_chunk(b"hello ").await.unwrap();
        pending.write_chunk(b"world").await.unwrap();
        let uploaded = pending.finish().await.unwrap();

        assert_eq!(uploaded.size_bytes, 11);
        assert_eq!(uploaded.original_name, "Show - 08.mp4");
        assert_eq!(uploaded.detected_episode_number, Some(8));
        assert!(uploaded.url.starts_with("/uploads/videos/"));

        let listed = list_uploads(dir.path(), "", None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].url, uploaded.url);
        assert_eq!(listed[0].size_bytes, 11);
        assert_eq!(listed[0].kind, MediaKind::Video);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_removed() {
        let dir = tempdir().unwrap();
        ensure_upload_dirs(dir.path()).await.unwrap();

        let limits = UploadLimits {
            max_image_bytes: 4,
            max_video_bytes: 4,
        };
        let mut pending = PendingUpload::create(
            dir.path(),
            "",
            MediaKind::Image,
            "cover.png",
            Some("image/png"),
            &limits,
        )
        .await
        .unwrap();
        pending.write_chunk(b"abc").await.unwrap();
        let err = pending.write_chunk(b"de").await.unwrap_err();
        assert!(matches!(err, UploadError::PayloadTooLarge { limit: 4 }));
        pending.abort().await;

        assert!(list_uploads(dir.path(), "", Some(MediaKind::Image)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn images_never_report_episode_numbers() {
        let dir = tempdir().unwrap();
        ensure_upload_dirs(dir.path()).await.unwrap();
        let pending = PendingUpload::create(
            dir.path(),
            "",
            MediaKind::Image,
            "ep 4 cover.jpg",
            Some("image/jpeg"),
            &UploadLimits::default(),
        )
        .await
        .unwrap();
        let uploaded = pending.finish().await.unwrap();
        assert_eq!(uploaded.detected_episode_number, None);
        assert_eq!(uploaded.size_bytes, 0);
    }

    #[tokio::test]
    async fn aborted_upload_leaves_no_file() {
        let dir = tempdir().unwrap();
        ensure_upload_dirs(dir.path()).await.unwrap();
        let mut pending = PendingUpload::create(
            dir.path(),
            "",
            MediaKind::Video,
            "ep2.mp4",
            Some("video/mp4"),
            &UploadLimits::default(),
        )
        .await
        .unwrap();
        pending.write_chunk(b"partial").await.unwrap();
        let path = pending.path.clone();
        assert!(path.exists());

        pending.abort().await;
        assert!(!path.exists());
        assert!(list_uploads(dir.path(), "", None).unwrap().is_empty());
    }

    #[test]
    fn listing_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        assert!(list_uploads(&dir.path().join("nope"), "", None).unwrap().is_empty());
    }
}
