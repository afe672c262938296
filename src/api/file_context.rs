use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::BytesMut;
use serde::Serialize;

use crate::analysis::{analyze_upload, UploadedFile};
use crate::config::ServerConfig;
use crate::error::GatewayError;
use crate::state::AppState;

const FILES_FIELD: &str = "files";

#[derive(Debug, Serialize)]
struct FileContextResponse {
    files: Vec<AnalyzedFile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzedFile {
    name: String,
    size: usize,
    mime_type: String,
    analysis: String,
}

fn limit_label(max_bytes: usize) -> String {
    const MIB: usize = 1024 * 1024;
    if max_bytes % MIB == 0 {
        format!("{}MB", max_bytes / MIB)
    } else {
        format!("{max_bytes} byte")
    }
}

fn multipart_error(err: MultipartError) -> GatewayError {
    if err.status() == http::StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::PayloadTooLarge(err.body_text())
    } else {
        GatewayError::InvalidRequest(err.body_text())
    }
}

/// Buffer one multipart field, failing as soon as it grows past `max_bytes`.
async fn read_field(field: &mut Field<'_>, name: &str, max_bytes: usize) -> Result<bytes::Bytes, GatewayError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if buffer.len() + chunk.len() > max_bytes {
            return Err(GatewayError::PayloadTooLarge(format!(
                "File {name} exceeds the {} limit",
                limit_label(max_bytes)
            )));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

async fn collect_uploads(multipart: &mut Multipart, limits: &ServerConfig) -> Result<Vec<UploadedFile>, GatewayError> {
    let mut uploads = Vec::new();
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILES_FIELD) {
            tracing::debug!(field = ?field.name(), "ignoring multipart field");
            continue;
        }
        if uploads.len() == limits.max_upload_files {
            return Err(GatewayError::PayloadTooLarge(format!(
                "At most {} files may be uploaded at once",
                limits.max_upload_files
            )));
        }
        let name = field.file_name().map(str::to_string);
        let mime_type = field.content_type().map(str::to_string);
        let label = name.clone().unwrap_or_else(|| crate::analysis::DEFAULT_FILE_NAME.to_string());
        let bytes = read_field(&mut field, &label, limits.max_upload_bytes).await?;
        uploads.push(UploadedFile::new(name.as_deref(), mime_type.as_deref(), bytes));
    }
    Ok(uploads)
}

/// `POST /file-context`: every file is read and size-checked before any
/// analysis starts, so one oversized file rejects the whole request.
pub(crate) async fn file_context_handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            return GatewayError::InvalidRequest(rejection.body_text()).into_response();
        }
    };

    let uploads = match collect_uploads(&mut multipart, &state.config.server).await {
        Ok(uploads) if uploads.is_empty() => {
            return GatewayError::InvalidRequest("no files uploaded".to_string()).into_response();
        }
        Ok(uploads) => uploads,
        Err(err) => {
            tracing::warn!(error = %err, "rejected file-context upload");
            return err.into_response();
        }
    };
    tracing::info!(count = uploads.len(), "analyzing uploaded files");

    let analyses =
        futures_util::future::join_all(uploads.iter().map(|file| analyze_upload(&state, file))).await;
    let files = uploads
        .into_iter()
        .zip(analyses)
        .map(|(file, analysis)| AnalyzedFile {
            size: file.bytes.len(),
            name: file.name,
            mime_type: file.mime_type,
            analysis,
        })
        .collect();

    Json(FileContextResponse { files }).into_response()
}
