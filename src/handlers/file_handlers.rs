//! Admin API: upload, list, inspect, update and delete files, plus an
//! attachment download by id.

use crate::{
    errors::AppError,
    models::file::FileResponse,
    services::{FileService, Lookup, ResolvedFile, UpdateRequest, UploadRequest},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// `?password=` on download routes.
#[derive(Debug, Default, Deserialize)]
pub struct PasswordQuery {
    pub password: Option<String>,
}

/// JSON body for `PATCH /api/files/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateFileBody {
    pub expires_at: Option<DateTime<Utc>>,
    /// An empty string removes password protection.
    pub password: Option<String>,
    pub slug: Option<String>,
}

/// `POST /api/upload`
///
/// Multipart fields: `file` (required), `expires_at` (RFC 3339), `password`,
/// `slug`. Empty text fields count as absent.
pub async fn upload_file(
    State(service): State<FileService>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileResponse>), AppError> {
    let mut request = UploadRequest::default();
    let mut data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("failed to read multipart data: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                request.filename = field.file_name().unwrap_or("upload").to_string();
                request.content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(format!("failed to read file data: {e}")))?;
                data = Some(bytes);
            }
            "expires_at" | "password" | "slug" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(format!("failed to read `{name}`: {e}")))?;
                let text = text.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                match name.as_str() {
                    "expires_at" => request.expires_at = Some(parse_expiry(&text)?),
                    "password" => request.password = Some(text),
                    _ => request.slug = Some(text),
                }
            }
            other => debug!("ignoring multipart field `{other}`"),
        }
    }

    let data = data.ok_or_else(|| AppError::bad_request("multipart field `file` is required"))?;
    request.size_hint = Some(data.len() as u64);
    let body = futures::stream::once(async move { Ok::<_, std::io::Error>(data) });

    let record = service.upload(request, body).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::bad_request(format!("invalid expires_at `{raw}`: {e}")))
}

/// `GET /api/files`
pub async fn list_files(
    State(service): State<FileService>,
) -> Result<Json<Vec<FileResponse>>, AppError> {
    let files = service.list().await?;
    Ok(Json(files.into_iter().map(FileResponse::from).collect()))
}

/// `GET /api/files/{id}`
pub async fn get_file(
    State(service): State<FileService>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileResponse>, AppError> {
    Ok(Json(service.get(id).await?.into()))
}

/// `PATCH /api/files/{id}`
pub async fn update_file(
    State(service): State<FileService>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateFileBody>,
) -> Result<Json<FileResponse>, AppError> {
    let request = UpdateRequest {
        expires_at: body.expires_at,
        password: body.password,
        slug: body.slug,
    };
    Ok(Json(service.update(id, request).await?.into()))
}

/// `DELETE /api/files/{id}`
pub async fn delete_file(
    State(service): State<FileService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/download/{id}?password=`
pub async fn download_file(
    State(service): State<FileService>,
    Path(id): Path<Uuid>,
    Query(query): Query<PasswordQuery>,
) -> Result<Response, AppError> {
    let resolved = service
        .resolve(Lookup::Id(id), query.password.as_deref())
        .await?;
    Ok(stream_file(resolved, Disposition::Attachment))
}

#[derive(Debug, Clone, Copy)]
pub enum Disposition {
    Inline,
    Attachment,
}

/// Stream a resolved payload with the headers its record describes.
pub fn stream_file(resolved: ResolvedFile, disposition: Disposition) -> Response {
    let ResolvedFile { record, reader } = resolved;
    let body = Body::from_stream(ReaderStream::new(reader));

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(record.size_bytes.max(0) as u64),
    );
    if let Ok(value) = HeaderValue::from_str(&content_disposition(disposition, &record.display_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&record.updated_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    (StatusCode::OK, headers, body).into_response()
}

/// `inline|attachment; filename="<ascii>"; filename*=UTF-8''<pct-encoded>`
fn content_disposition(disposition: Disposition, filename: &str) -> String {
    let kind = match disposition {
        Disposition::Inline => "inline",
        Disposition::Attachment => "attachment",
    };
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut encoded = String::with_capacity(filename.len());
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }

    format!("{kind}; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
