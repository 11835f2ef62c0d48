//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and disk I/O

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe. Never performs I/O.
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
/// Readiness probe that:
/// 1. Pings the metadata store.
/// 2. Performs a write/read/delete round trip in the upload directory.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store_check = match state.registry.ping_store().await {
        Ok(()) => (true, None::<String>),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    // The `.tmp-` prefix keeps the probe file out of the way of stored names.
    let tmp_path = state
        .registry
        .upload_dir()
        .join(format!(".tmp-readyz-{}", Uuid::new_v4()));
    let disk_check = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => {
            let read_back = fs::read(&tmp_path).await;
            let removed = fs::remove_file(&tmp_path).await;
            match (read_back, removed) {
                (Ok(bytes), Ok(_)) if bytes == b"readyz" => (true, None::<String>),
                (Ok(bytes), Err(e)) if bytes == b"readyz" => {
                    (true, Some(format!("could not remove tmp file: {}", e)))
                }
                (Ok(_), _) => (false, Some("file content mismatch".to_string())),
                (Err(e), _) => (false, Some(format!("could not read tmp file: {}", e))),
            }
        }
        Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
    };

    let overall_ok = store_check.0 && disk_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "store",
        CheckStatus {
            ok: store_check.0,
            error: store_check.1,
        },
    );
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_check.0,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        records: state.registry.len().await,
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
    records: usize,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
