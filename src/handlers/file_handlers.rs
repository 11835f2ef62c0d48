//! HTTP handlers for uploads, share links, listing and deletion.
//! Thin JSON wrappers around `Registry`; payloads are streamed back from
//! disk without buffering.

use crate::{
    errors::AppError,
    models::object::ObjectInfo,
    services::registry::RegistryError,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Path, Query, State,
        multipart::{Field, Multipart, MultipartError},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

const FILE_FIELD: &str = "file";

/// Query params accepted by the listing endpoint.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub page: Option<usize>,
}

#[derive(Serialize)]
struct ListResponse {
    files: Vec<ObjectInfo>,
    page: usize,
    total_pages: usize,
    total: usize,
    search: String,
    max_content_length: u64,
    auto_delete_minutes: u64,
}

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    message: String,
    short_id: String,
    stored_name: String,
    url: String,
}

/// Per-file outcome of a batch upload.
#[derive(Serialize)]
struct BatchItem {
    filename: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    short_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stored_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl BatchItem {
    fn failed(filename: String, err: AppError) -> Self {
        Self {
            filename,
            status: "error",
            short_id: None,
            stored_name: None,
            url: None,
            message: Some(err.message),
        }
    }
}

#[derive(Serialize)]
struct BatchResponse {
    status: &'static str,
    message: String,
    files: Vec<BatchItem>,
}

#[derive(Serialize)]
struct InfoResponse {
    status: &'static str,
    filename: String,
    downloads: u64,
    time_left_seconds: u64,
    url: String,
}

#[derive(Serialize)]
struct MessageResponse {
    status: &'static str,
    message: String,
}

/// `GET /` - list uploads newest first, supports `?search=&page=`.
pub async fn index(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Json<impl Serialize> {
    let search = q.search.unwrap_or_default().to_lowercase();
    let page = state.registry.list(&search, q.page.unwrap_or(1)).await;
    let cfg = state.registry.config();

    Json(ListResponse {
        files: page.records,
        page: page.page,
        total_pages: page.total_pages,
        total: page.total,
        search,
        max_content_length: cfg.max_upload_size,
        auto_delete_minutes: cfg.ttl_seconds / 60,
    })
}

/// `POST /api/upload` - store a single `file` part and return its share link.
pub async fn upload_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let max = state.registry.config().max_upload_size;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(AppError::bad_request("invalid file"));
        }
        let content = read_capped(field, max).await?;
        let created = state.registry.create(&content, &filename).await?;

        return Ok(Json(UploadResponse {
            status: "success",
            message: "file uploaded".into(),
            url: state.share_url(&headers, &created.short_id),
            short_id: created.short_id,
            stored_name: created.stored_name,
        }));
    }

    Err(AppError::bad_request("no file sent"))
}

/// `POST /` - store every `file` part. Rejected files are reported
/// individually and do not stop the rest of the batch.
pub async fn upload_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let max = state.registry.config().max_upload_size;
    let mut saw_file_part = false;
    let mut items = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) if items.is_empty() => return Err(multipart_error(err)),
            // Earlier files are already stored; report them along with the failure.
            Err(err) => {
                items.push(BatchItem::failed(String::new(), multipart_error(err)));
                break;
            }
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        saw_file_part = true;
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            continue;
        }

        let outcome = match read_capped(field, max).await {
            Ok(content) => state
                .registry
                .create(&content, &filename)
                .await
                .map_err(AppError::from),
            Err(err) => Err(err),
        };

        items.push(match outcome {
            Ok(created) => BatchItem {
                url: Some(state.share_url(&headers, &created.short_id)),
                short_id: Some(created.short_id),
                stored_name: Some(created.stored_name),
                filename,
                status: "success",
                message: None,
            },
            Err(err) => BatchItem::failed(filename, err),
        });
    }

    if !saw_file_part {
        return Err(AppError::bad_request("no file sent"));
    }
    if items.is_empty() {
        return Err(AppError::bad_request("no valid file selected"));
    }

    let stored = items.iter().filter(|i| i.status == "success").count();
    let minutes = state.registry.config().ttl_seconds / 60;
    Ok(Json(BatchResponse {
        status: if stored == items.len() { "success" } else { "partial" },
        message: format!(
            "{} of {} file(s) uploaded, they will be deleted after {} minute(s)",
            stored,
            items.len(),
            minutes
        ),
        files: items,
    }))
}

/// `GET /s/{short_id}` - count the download and redirect to the payload.
pub async fn redirect_short(
    State(state): State<AppState>,
    Path(short_id): Path<String>,
) -> Result<Redirect, AppError> {
    let stored_name = state.registry.resolve(&short_id).await?;
    Ok(Redirect::to(&format!("/uploads/{}", stored_name)))
}

/// `GET /uploads/{filename}` - stream a stored payload.
pub async fn serve_upload(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let file = state.registry.open_stored(&filename).await?;
    let len = file
        .metadata()
        .await
        .map_err(|err| AppError::from(RegistryError::Io(err)))?
        .len();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `GET /api/file/{short_id}` - metadata and remaining lifetime.
pub async fn file_info(
    State(state): State<AppState>,
    Path(short_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let info = state.registry.info(&short_id).await?;
    Ok(Json(InfoResponse {
        status: "success",
        filename: info.stored_name,
        downloads: info.download_count,
        time_left_seconds: info.time_left,
        url: state.share_url(&headers, &short_id),
    }))
}

/// `POST /delete/{filename}` - remove an upload by its stored name.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.registry.delete_by_name(&filename).await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse {
            status: "success",
            message: "file deleted".into(),
        }),
    ))
}

/// Buffer a multipart field, refusing to hold more than `max` bytes.
async fn read_capped(mut field: Field<'_>, max: u64) -> Result<Vec<u8>, AppError> {
    let mut content = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if (content.len() + chunk.len()) as u64 > max {
            return Err(RegistryError::Oversize {
                size: (content.len() + chunk.len()) as u64,
                limit: max,
            }
            .into());
        }
        content.extend_from_slice(&chunk);
    }
    Ok(content)
}

fn multipart_error(err: MultipartError) -> AppError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::new(status, "request body too large");
    }
    AppError::new(status, err.body_text())
}
