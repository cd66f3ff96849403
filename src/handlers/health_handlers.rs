//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the record store and the storage backend

use crate::services::FileService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Cheap liveness check; never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Runs `SELECT 1` against SQLite.
/// 2. Saves, checks and deletes a tiny blob on the active backend.
///
/// HTTP 200 when both pass, 503 otherwise.
pub async fn readyz(State(service): State<FileService>) -> impl IntoResponse {
    let database = CheckStatus::from(service.check_database().await);
    let storage = CheckStatus::from(service.check_storage().await);
    let overall_ok = database.ok && storage.ok;

    let mut checks = HashMap::new();
    checks.insert("database", database);
    checks.insert(service.storage().kind(), storage);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl<E: std::fmt::Display> From<Result<(), E>> for CheckStatus {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(e) => Self {
                ok: false,
                error: Some(format!("error: {e}")),
            },
        }
    }
}
