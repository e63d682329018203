//! Media directory listing.
//!
//! Every producer that depends on file order (the atlas tile order, the
//! `/videos` listing, both manifest producers) goes through
//! [`list_media_files`], which sorts file names lexically. The atlas index
//! arithmetic relies on that order being identical everywhere.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::configuration::SiteLayout;
use crate::error::AtlasError;

/// Video container extensions picked up from the video directory.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "avi"];

/// Image extensions picked up from the gallery directory.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// A video file discovered in the video directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoAsset {
    /// File name, unique within its directory.
    pub name: String,
    /// Human-readable label derived from the file name.
    pub display_name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, at millisecond precision.
    #[serde(with = "iso_millis")]
    pub last_modified: DateTime<Utc>,
    /// Absolute or layout-relative path of the file.
    #[serde(skip)]
    pub path: PathBuf,
}

/// RFC 3339 in UTC with exactly three fractional digits
/// (`2024-05-01T12:00:00.123Z`).
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|time| time.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}

/// Strip the last extension of a file name.
///
/// A trailing dot with nothing after it is not an extension, and a leading
/// dot counts as one (`".mp4"` has an empty stem).
pub fn strip_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(dot) if dot + 1 < file_name.len() && !file_name[dot + 1..].contains('/') => {
            &file_name[..dot]
        }
        _ => file_name,
    }
}

/// Derive a display name: `2024_Summer_Trip.mp4` → `Summer | Trip`.
///
/// Names without an underscore keep their stem unchanged.
pub fn display_name(file_name: &str) -> String {
    let stem = strip_extension(file_name);
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() > 1 {
        parts[1..].join(" | ")
    } else {
        stem.to_string()
    }
}

/// Case-insensitive whitelist check on the final extension.
pub fn has_extension(file_name: &str, whitelist: &[&str]) -> bool {
    let lower = file_name.to_lowercase();
    whitelist
        .iter()
        .any(|extension| lower.ends_with(&format!(".{extension}")))
}

/// List file names in `dir` matching `whitelist`, sorted lexically.
///
/// A missing directory yields an empty list. Entries whose names are not
/// valid UTF-8 are skipped with a warning, since they cannot be addressed
/// by URL.
pub fn list_media_files(dir: &Path, whitelist: &[&str]) -> Result<Vec<String>, AtlasError> {
    if !dir.is_dir() {
        log::debug!("Media directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            log::warn!(
                "Skipping non UTF-8 file name in {}: {:?}",
                dir.display(),
                entry.file_name()
            );
            continue;
        };
        if !has_extension(&name, whitelist) {
            continue;
        }
        // Follows symlinks, so linked media is listed like a regular file.
        match fs::metadata(entry.path()) {
            Ok(metadata) if metadata.is_file() => names.push(name),
            Ok(_) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {
                log::warn!("Skipping broken link {}", entry.path().display());
            }
            Err(error) => return Err(error.into()),
        }
    }

    names.sort();
    Ok(names)
}

/// List the videos of `dir` in atlas order, with size and mtime.
pub fn list_videos(dir: &Path) -> Result<Vec<VideoAsset>, AtlasError> {
    let names = list_media_files(dir, VIDEO_EXTENSIONS)?;
    let mut videos = Vec::with_capacity(names.len());

    for name in names {
        let path = dir.join(&name);
        let metadata = fs::metadata(&path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        let last_modified = modified.trunc_subsecs(3);
        videos.push(VideoAsset {
            display_name: display_name(&name),
            name,
            size: metadata.len(),
            last_modified,
            path,
        });
    }

    log::debug!("Found {} video(s) in {}", videos.len(), dir.display());
    Ok(videos)
}

/// List the videos of the layout's resolved video directory.
///
/// Returns an empty list when neither candidate directory exists.
pub fn list_layout_videos(layout: &SiteLayout) -> Result<Vec<VideoAsset>, AtlasError> {
    match layout.resolve_video_dir() {
        Some(dir) => list_videos(&dir),
        None => Ok(Vec::new()),
    }
}
