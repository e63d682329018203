//! Gallery manifests.
//!
//! A manifest lists the files of one directory together with a stable
//! identifier (the file name without its extension) and a public URL. The
//! same [`build_manifest`] call backs both the build-time JSON file and the
//! request-time endpoint, so the two can never disagree.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use reelatlas::{AtlasError, IMAGE_EXTENSIONS, build_manifest};
//!
//! let manifest = build_manifest(
//!     Path::new("static/gallery_thumbs"),
//!     IMAGE_EXTENSIONS,
//!     "/build/gallery_thumbs",
//! )?;
//! for item in &manifest.items {
//!     println!("{} -> {}", item.base, item.url);
//! }
//! # Ok::<(), AtlasError>(())
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;
use crate::library::{list_media_files, strip_extension};

/// Characters escaped by JavaScript's `encodeURIComponent`: everything but
/// ASCII alphanumerics and `- _ . ! ~ * ' ( )`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// One file of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    /// File name on disk.
    pub file: String,
    /// File name without its extension.
    pub base: String,
    /// Public URL of the file.
    pub url: String,
}

/// Items in listing order plus a `base → url` lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryManifest {
    /// Every matching file, sorted by file name.
    pub items: Vec<ManifestItem>,
    /// Identifier to URL. When two files share a base, the later file wins.
    pub map: BTreeMap<String, String>,
}

impl GalleryManifest {
    /// Look up the URL of an identifier.
    pub fn url_of(&self, base: &str) -> Option<&str> {
        self.map.get(base).map(String::as_str)
    }
}

/// Percent-encode a string with `encodeURIComponent` semantics.
pub fn encode_uri_component(component: &str) -> String {
    utf8_percent_encode(component, URI_COMPONENT).to_string()
}

/// Build the manifest of `dir`, keeping files matching `whitelist`.
///
/// URLs are `url_root/` followed by the percent-encoded file name. A missing
/// directory yields an empty manifest.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn build_manifest(
    dir: &Path,
    whitelist: &[&str],
    url_root: &str,
) -> Result<GalleryManifest, AtlasError> {
    let url_root = url_root.trim_end_matches('/');
    let mut manifest = GalleryManifest::default();

    for file in list_media_files(dir, whitelist)? {
        let base = strip_extension(&file).to_string();
        let url = format!("{url_root}/{}", encode_uri_component(&file));

        if let Some(previous) = manifest.map.insert(base.clone(), url.clone()) {
            log::warn!("Manifest key '{base}' is shared; {file} replaces {previous}");
        }
        manifest.items.push(ManifestItem { file, base, url });
    }

    log::debug!(
        "Manifest of {} has {} item(s)",
        dir.display(),
        manifest.items.len()
    );
    Ok(manifest)
}

/// Write `manifest` to `path` as pretty-printed JSON, creating parent
/// directories.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_manifest(manifest: &GalleryManifest, path: &Path) -> Result<(), AtlasError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, json)?;
    log::info!(
        "Wrote manifest with {} item(s) to {}",
        manifest.items.len(),
        path.display()
    );
    Ok(())
}
