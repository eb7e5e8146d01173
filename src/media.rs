use chrono::{DateTime, Utc};

/// Suffix appended to a primary key (minus extension) to name its
/// derived thumbnail object, so thumbnails can be located later
/// without a side index.
pub const THUMBNAIL_SUFFIX: &str = "_thumbnail.jpg";

/// A captured media item: the unit of work for upload and buffering.
///
/// Records are immutable after creation; only their membership in the
/// pending queue changes. The `key` doubles as the remote object name
/// and must be unique within both the queue and the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    /// Globally unique identifier, also the remote object key.
    pub key: String,
    /// MIME type (e.g. image/jpeg, video/webm).
    pub content_type: String,
    /// Payload size in bytes.
    pub size_bytes: i64,
    /// Capture timestamp, set once at creation.
    pub captured_at: DateTime<Utc>,
    /// Raw encoded media bytes.
    pub payload: Vec<u8>,
    /// Photo/video variant with the video-only fields.
    pub kind: MediaKind,
}

/// Media variant, carrying the fields that only exist for videos.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaKind {
    Photo,
    Video {
        duration_seconds: i64,
        /// Poster frame uploaded alongside the payload, when the
        /// recorder managed to produce one.
        thumbnail: Option<Vec<u8>>,
    },
}

impl MediaRecord {
    /// Create a photo record. Size is derived from the payload.
    pub fn photo(
        key: impl Into<String>,
        content_type: impl Into<String>,
        captured_at: DateTime<Utc>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
            size_bytes: payload.len() as i64,
            captured_at,
            payload,
            kind: MediaKind::Photo,
        }
    }

    /// Create a video record with its duration and optional poster frame.
    pub fn video(
        key: impl Into<String>,
        content_type: impl Into<String>,
        captured_at: DateTime<Utc>,
        payload: Vec<u8>,
        duration_seconds: i64,
        thumbnail: Option<Vec<u8>>,
    ) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
            size_bytes: payload.len() as i64,
            captured_at,
            payload,
            kind: MediaKind::Video {
                duration_seconds,
                thumbnail,
            },
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self.kind, MediaKind::Video { .. })
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        match self.kind {
            MediaKind::Video {
                duration_seconds, ..
            } => Some(duration_seconds),
            MediaKind::Photo => None,
        }
    }

    pub fn thumbnail(&self) -> Option<&[u8]> {
        match &self.kind {
            MediaKind::Video { thumbnail, .. } => thumbnail.as_deref(),
            MediaKind::Photo => None,
        }
    }
}

/// Derive the thumbnail object key for a primary key.
///
/// `video_1000.webm` -> `video_1000_thumbnail.jpg`
pub fn thumbnail_key(key: &str) -> String {
    match key.rsplit_once('.') {
        Some((stem, _ext)) => format!("{stem}{THUMBNAIL_SUFFIX}"),
        None => format!("{key}{THUMBNAIL_SUFFIX}"),
    }
}

/// Whether a remote object key names a derived thumbnail rather than a
/// primary object.
pub fn is_thumbnail_key(key: &str) -> bool {
    key.ends_with(THUMBNAIL_SUFFIX)
}

/// Infer a content type from an object key's extension.
pub fn content_type_for_key(key: &str) -> String {
    let ext = key.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "webp" => "image/webp".to_string(),
        "gif" => "image/gif".to_string(),
        "webm" => "video/webm".to_string(),
        "mp4" => "video/mp4".to_string(),
        "mov" => "video/quicktime".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}
