//! HTTP endpoints (feature `server`).
//!
//! Exposes the atlas descriptor, the video listing, the gallery manifest and
//! the thumbnail upload as JSON over axum, and serves the generated files
//! statically. Handlers are thin: all behaviour lives in the library
//! modules they call.
//!
//! | Route                    | Response                                   |
//! |--------------------------|--------------------------------------------|
//! | `GET /thumbnails`        | [`AtlasDescriptor`]                        |
//! | `GET /videos`            | `[VideoAsset]`                             |
//! | `GET /gallery-manifest`  | [`GalleryManifest`]                        |
//! | `POST /gallery-thumbs`   | [`StoredThumbnail`]                        |
//!
//! Failures answer `{ "error": "..." }` with 400 for bad uploads and 500
//! otherwise.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequest, Multipart, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::builder::{AtlasBuilder, AtlasDescriptor};
use crate::configuration::{AtlasOptions, SiteLayout};
use crate::error::AtlasError;
use crate::library::{IMAGE_EXTENSIONS, VideoAsset, list_layout_videos};
use crate::manifest::{GalleryManifest, build_manifest};
use crate::upload::{StoredThumbnail, ThumbnailStore, UploadRequest};

/// Shared state of the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    layout: SiteLayout,
    builder: AtlasBuilder,
    uploads: ThumbnailStore,
}

impl AppState {
    /// State for `layout`, building atlases with `options`.
    pub fn new(layout: SiteLayout, options: AtlasOptions) -> Self {
        let builder = AtlasBuilder::from_layout(&layout, options);
        Self::with_builder(layout, builder)
    }

    /// State using a preconfigured builder.
    pub fn with_builder(layout: SiteLayout, builder: AtlasBuilder) -> Self {
        let uploads = ThumbnailStore::new(layout.gallery_dir(), "/gallery_thumbs");
        Self {
            inner: Arc::new(Inner {
                layout,
                builder,
                uploads,
            }),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(AtlasError);

impl From<AtlasError> for ApiError {
    fn from(error: AtlasError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            AtlasError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        } else {
            log::debug!("Rejected request: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(AtlasError::InvalidUpload(message.into()))
}

async fn thumbnails(State(state): State<AppState>) -> Result<Json<AtlasDescriptor>, ApiError> {
    let videos = list_layout_videos(&state.inner.layout)?;
    let descriptor = state.inner.builder.ensure_atlas(&videos).await?;
    Ok(Json(descriptor))
}

async fn videos(State(state): State<AppState>) -> Result<Json<Vec<VideoAsset>>, ApiError> {
    Ok(Json(list_layout_videos(&state.inner.layout)?))
}

async fn gallery_manifest(
    State(state): State<AppState>,
) -> Result<Json<GalleryManifest>, ApiError> {
    let layout = &state.inner.layout;
    let manifest = build_manifest(
        &layout.gallery_dir(),
        IMAGE_EXTENSIONS,
        &layout.gallery_url_root(),
    )?;
    Ok(Json(manifest))
}

async fn upload_thumbnail(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<StoredThumbnail>, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let uploads = &state.inner.uploads;
    if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|rejection| bad_request(rejection.body_text()))?;
        let (name, bytes) = read_multipart(multipart).await?;
        Ok(Json(uploads.save_bytes(&name, &bytes)?))
    } else {
        let Json(body) = Json::<UploadRequest>::from_request(request, &state)
            .await
            .map_err(|_| bad_request("Missing fileName or dataUrl"))?;
        if body.file_name.is_empty() || body.data_url.is_empty() {
            return Err(bad_request("Missing fileName or dataUrl"));
        }
        Ok(Json(uploads.save_data_url(&body)?))
    }
}

/// Pull the `file` bytes and `name` text out of a multipart body. The file
/// part's own file name stands in when `name` is absent.
async fn read_multipart(mut multipart: Multipart) -> Result<(String, Vec<u8>), ApiError> {
    let mut name = None;
    let mut file_name = None;
    let mut bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| bad_request(error.body_text()))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|error| bad_request(error.body_text()))?;
                bytes = Some(data.to_vec());
            }
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|error| bad_request(error.body_text()))?;
                name = Some(text);
            }
            _ => {}
        }
    }

    match (name.or(file_name), bytes) {
        (Some(name), Some(bytes)) if !name.is_empty() => Ok((name, bytes)),
        _ => Err(bad_request("Missing file or name")),
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let layout = &state.inner.layout;
    // Static media is overlaid on the output root, so manifest URLs under the
    // served root resolve before the site has been copied into it.
    let generated = ServeDir::new(&layout.output_root).fallback(ServeDir::new(&layout.static_dir));
    let gallery = ServeDir::new(layout.gallery_dir());

    let app = Router::new()
        .route("/thumbnails", get(thumbnails))
        .route("/videos", get(videos))
        .route("/gallery-manifest", get(gallery_manifest))
        .route("/gallery-thumbs", post(upload_thumbnail))
        .nest_service("/gallery_thumbs", gallery);

    let app = if layout.served_root.is_empty() {
        app.fallback_service(generated)
    } else {
        app.nest_service(&layout.served_root, generated)
    };

    app.layer(CorsLayer::permissive()).with_state(state)
}

/// Serve the application on `address` until the process exits.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(address: SocketAddr, state: AppState) -> Result<(), AtlasError> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
