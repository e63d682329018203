//! Gallery thumbnail uploads.
//!
//! Clients render gallery thumbnails themselves and post them back, either
//! as a JSON body carrying a base64 data URL or as raw multipart bytes.
//! [`ThumbnailStore`] validates the requested name and stores the bytes as
//! `<stem>.jpg` in the gallery directory, where the manifest picks them up.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;
use crate::library::strip_extension;

/// JSON upload body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// Name of the source file the thumbnail belongs to.
    pub file_name: String,
    /// `data:<mime>;base64,<payload>` URL of the thumbnail.
    pub data_url: String,
}

/// Successful upload response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredThumbnail {
    /// Always `true`.
    pub ok: bool,
    /// Public path of the stored thumbnail.
    pub path: String,
}

/// Writes uploaded thumbnails into one directory.
#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    dir: PathBuf,
    url_root: String,
}

impl ThumbnailStore {
    /// Store files in `dir`, reporting paths under `url_root`.
    pub fn new<P: Into<PathBuf>, U: Into<String>>(dir: P, url_root: U) -> Self {
        let url_root = url_root.into();
        Self {
            dir: dir.into(),
            url_root: url_root.trim_end_matches('/').to_string(),
        }
    }

    /// The storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decode and store a JSON upload.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidUpload`] for a bad name or data URL, or
    /// an I/O error if the write fails.
    pub fn save_data_url(&self, request: &UploadRequest) -> Result<StoredThumbnail, AtlasError> {
        let bytes = decode_data_url(&request.data_url)?;
        self.save_bytes(&request.file_name, &bytes)
    }

    /// Store raw thumbnail bytes under the name derived from `file_name`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidUpload`] for a bad name or empty body,
    /// or an I/O error if the write fails.
    pub fn save_bytes(&self, file_name: &str, bytes: &[u8]) -> Result<StoredThumbnail, AtlasError> {
        let name = safe_name(file_name)?;
        if bytes.is_empty() {
            return Err(AtlasError::InvalidUpload("empty thumbnail".to_string()));
        }

        fs::create_dir_all(&self.dir)?;
        let destination = self.dir.join(&name);
        fs::write(&destination, bytes)?;
        log::info!(
            "Stored {} byte thumbnail at {}",
            bytes.len(),
            destination.display()
        );

        Ok(StoredThumbnail {
            ok: true,
            path: format!("{}/{name}", self.url_root),
        })
    }
}

/// Map an uploaded file name to the stored name: `<stem>.jpg`.
///
/// # Errors
///
/// Rejects empty names, path separators and parent references.
pub fn safe_name(file_name: &str) -> Result<String, AtlasError> {
    let file_name = file_name.trim();
    if file_name.is_empty() {
        return Err(AtlasError::InvalidUpload("missing file name".to_string()));
    }
    if file_name.contains(['/', '\\']) || file_name == ".." {
        return Err(AtlasError::InvalidUpload(format!(
            "file name must not contain a path: {file_name}"
        )));
    }
    let stem = strip_extension(file_name);
    if stem.is_empty() || stem == "." {
        return Err(AtlasError::InvalidUpload(format!(
            "file name has no stem: {file_name}"
        )));
    }
    Ok(format!("{stem}.jpg"))
}

fn decode_data_url(data_url: &str) -> Result<Vec<u8>, AtlasError> {
    let Some((_, payload)) = data_url.split_once(',') else {
        return Err(AtlasError::InvalidUpload(
            "data URL has no payload".to_string(),
        ));
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|error| AtlasError::InvalidUpload(format!("bad base64 payload: {error}")))
}
