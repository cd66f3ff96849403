//! Defines routes for the admin API, the public share links and health checks.
//!
//! ## Structure
//! - **Admin API**
//!   - `POST   /api/upload` -> multipart upload
//!   - `GET    /api/files` -> list live files
//!   - `GET    /api/files/{id}` -> file metadata
//!   - `PATCH  /api/files/{id}` -> change expiry, password or slug
//!   - `DELETE /api/files/{id}` -> delete file
//!   - `GET    /api/download/{id}` -> attachment download (`?password=`)
//!
//! - **Public links**
//!   - `GET /{slug}` -> inline download (`?password=`)
//!   - `GET /d/{display_name}` -> inline download by filename
//!
//! Static routes win over `/{slug}`, so a slug can never shadow `/healthz`
//! or the API.

use crate::{
    handlers::{
        file_handlers::{
            delete_file, download_file, get_file, list_files, update_file, upload_file,
        },
        health_handlers::{healthz, readyz},
        public_handlers::{open_by_display_name, open_by_slug},
    },
    services::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router. Upload bodies larger than `max_upload_bytes` are
/// rejected with 413.
pub fn routes(max_upload_bytes: usize) -> Router<FileService> {
    let api = Router::new()
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/files", get(list_files))
        .route(
            "/files/{id}",
            get(get_file).patch(update_file).delete(delete_file),
        )
        .route("/download/{id}", get(download_file));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api", api)
        .route("/d/{display_name}", get(open_by_display_name))
        .route("/{slug}", get(open_by_slug))
        .layer(TraceLayer::new_for_http())
}
