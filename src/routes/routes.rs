//! Defines routes for the file share API.
//!
//! ## Structure
//! - **Listing & upload**
//!   - `GET    /`                   - list uploads (supports `search`, `page`)
//!   - `POST   /`                   - batch upload (multipart, repeated `file` parts)
//!   - `POST   /api/upload`         - single upload, returns short id + link
//! - **Access**
//!   - `GET    /s/{short_id}`       - count a download and redirect to the payload
//!   - `GET    /uploads/{filename}` - stream a stored payload
//!   - `GET    /api/file/{short_id}` - metadata and remaining lifetime
//! - **Management**
//!   - `POST   /delete/{filename}`  - delete by stored name
//!   - `GET    /healthz`, `/readyz`

use crate::{
    handlers::{
        file_handlers::{
            delete_file, file_info, index, redirect_short, serve_upload, upload_api, upload_batch,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Room for multipart boundaries and part headers on top of the payload.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Build the router with state attached.
///
/// The request body limit is derived from the configured maximum upload
/// size so oversize bodies are refused before anything is written.
pub fn routes(state: AppState) -> Router {
    let body_limit = state
        .registry
        .config()
        .max_upload_size
        .saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(index).post(upload_batch))
        .route("/api/upload", post(upload_api))
        .route("/api/file/{short_id}", get(file_info))
        .route("/s/{short_id}", get(redirect_short))
        .route("/uploads/{filename}", get(serve_upload))
        .route("/delete/{filename}", post(delete_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
