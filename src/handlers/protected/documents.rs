use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Extension,
};
use serde_json::Value;

use super::TenantQuery;
use crate::app::AppState;
use crate::auth::Claims;
use crate::config::config;
use crate::database::records;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::media::{media_reference, parse_media_reference};
use crate::services::router;

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(err.body_text())
    } else {
        ApiError::bad_request(err.body_text())
    }
}

/// POST /api/payables/:id/document
///
/// Multipart upload with a `file` field. The bytes go to the blob store; the
/// payable only keeps `media:<id>`.
pub async fn upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Query(query): Query<TenantQuery>,
    mut multipart: Multipart,
) -> ApiResult<Value> {
    let mut session = router::open_session(&claims, query.tenant_id).await?;
    let (conn, schema, _) = session.parts();
    if records::payable_document(&mut *conn, schema, id).await?.is_none() {
        return Err(ApiError::not_found(format!("Payable {} not found", id)));
    }

    let limit = config().storage.max_upload_bytes;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("payable-{}", id));
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;
        if data.len() > limit {
            return Err(ApiError::payload_too_large(format!(
                "Document exceeds {} bytes",
                limit
            )));
        }

        let media_id = state
            .media
            .upload(&filename, content_type.as_deref(), data)
            .await?;
        let record = records::set_payable_document(conn, schema, id, &media_reference(&media_id))
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Payable {} not found", id)))?;
        return Ok(ApiResponse::created(record));
    }

    Err(ApiError::bad_request("Multipart field 'file' is required"))
}

/// GET /api/payables/:id/document - streams the stored blob back
pub async fn download(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Query(query): Query<TenantQuery>,
) -> Result<Response, ApiError> {
    let reference = {
        let mut session = router::open_session(&claims, query.tenant_id).await?;
        let (conn, schema, _) = session.parts();
        records::payable_document(conn, schema, id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Payable {} not found", id)))?
    };

    let media_id = reference
        .as_deref()
        .and_then(parse_media_reference)
        .ok_or_else(|| ApiError::not_found(format!("Payable {} has no document", id)))?;

    let object = state.media.download(media_id).await?;

    let mut response = Response::builder().status(StatusCode::OK).header(
        header::CONTENT_TYPE,
        object
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream"),
    );
    if let Some(disposition) = object.content_disposition.as_deref() {
        response = response.header(header::CONTENT_DISPOSITION, disposition);
    }
    if let Some(length) = object.content_length {
        response = response.header(header::CONTENT_LENGTH, length);
    }

    response.body(Body::from_stream(object.body)).map_err(|e| {
        tracing::error!("Failed to build document response: {}", e);
        ApiError::internal_server_error("Failed to stream document")
    })
}
