//! File upload, retrieval, deletion and listing handlers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Multipart, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use depot_core::hash::{ContentHash, ContentHasher};
use depot_core::mime::{detect_content_type, extension_for_content_type};
use depot_core::path::{file_extension, join_path, sanitize_custom_path, sanitize_file_name};
use depot_index::FileRecord;
use depot_storage::{ByteStream, Metadata, StorageError};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// How much of the file head is kept for content-type sniffing.
const SNIFF_LEN: usize = 512;

/// An upload staged to disk with its digest computed in the same pass.
struct StagedUpload {
    file: File,
    size: u64,
    digest: ContentHash,
    original_name: String,
    declared_content_type: Option<String>,
    head: Vec<u8>,
}

/// POST /api/v2/upload/file
///
/// Streams the multipart body through an on-disk temp file and a digest
/// accumulator in a single pass, consults the dedup index, and stores the
/// object under either its digest or its sanitized original name.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut bucket = String::new();
    let mut raw_path = String::new();
    let mut is_hash = true;
    let mut staged: Option<StagedUpload> = None;

    // Fields arrive in client order; the file may come before or after the
    // text fields, so everything is collected in one pass.
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read form data: {e}")))?
    {
        match field.name().unwrap_or("") {
            "bucket" => {
                bucket = read_text_field(field).await?.trim().to_string();
            }
            "path" => {
                raw_path = read_text_field(field).await?.trim().to_string();
            }
            "is_hash" => {
                let value = read_text_field(field).await?.trim().to_lowercase();
                is_hash = !(value == "false" || value == "0");
            }
            "file" => {
                staged = Some(stage_upload(&state, field).await?);
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown form field");
            }
        }
    }

    if bucket.is_empty() {
        return Err(ApiError::BadRequest(
            "bucket parameter is required".to_string(),
        ));
    }
    let staged = staged
        .ok_or_else(|| ApiError::BadRequest("file field is required".to_string()))?;

    let custom_path =
        sanitize_custom_path(&raw_path).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    // Content type: trust the part header, sniff the first bytes otherwise.
    let content_type = match &staged.declared_content_type {
        Some(ct) if !ct.is_empty() => ct.clone(),
        _ => detect_content_type(&staged.head).to_string(),
    };

    let ext = file_extension(&staged.original_name)
        .map(str::to_string)
        .unwrap_or_else(|| extension_for_content_type(&content_type).to_string());

    let digest_hex = staged.digest.to_hex();
    let file_name = if is_hash {
        format!("{digest_hex}{ext}")
    } else {
        let name = sanitize_file_name(&staged.original_name);
        if file_extension(&name).is_none() && !ext.is_empty() {
            format!("{name}{ext}")
        } else {
            name
        }
    };

    let full_path = join_path(&custom_path, &file_name);
    tracing::info!(bucket = %bucket, path = %full_path, size = staged.size, "uploading file");

    state.storage.ensure_bucket(&bucket).await?;

    // Pre-create folder markers so the virtual hierarchy is browsable.
    // The object put below also creates it implicitly, so failures are
    // warnings, not errors.
    if !custom_path.is_empty() {
        let segments: Vec<&str> = custom_path.split('/').collect();
        for i in 0..segments.len() {
            let folder = segments[..=i].join("/");
            if let Err(err) = state.storage.create_folder_marker(&bucket, &folder).await {
                tracing::warn!(bucket = %bucket, folder = %folder, error = %err, "failed to create folder marker");
            }
        }
    }

    // The index is an optimization; a lookup failure must not fail the
    // upload.
    let existing = match state.index.lookup(&bucket, &digest_hex).await {
        Ok(existing) => existing,
        Err(err) => {
            tracing::warn!(error = %err, "dedup index lookup failed, continuing without dedup");
            None
        }
    };

    let duplicated = match existing {
        Some(existing_path) if existing_path == full_path => {
            tracing::info!(path = %existing_path, digest = %digest_hex, "duplicate upload short-circuited");
            return Ok(Json(json!({
                "file_path": existing_path,
                "file_hash": digest_hex,
                "bucket": bucket,
                "content_type": content_type,
                "size": staged.size,
                "duplicated": true,
                "message": "File already exists (deduplicated)",
                "status": 200,
            })));
        }
        // Same content at a different path: upload a copy there anyway.
        Some(_) => true,
        None => false,
    };

    let mut metadata = Metadata::new();
    metadata.insert("file-hash".to_string(), digest_hex.clone());
    metadata.insert("original-name".to_string(), staged.original_name.clone());
    metadata.insert("content-type".to_string(), content_type.clone());

    let mut file = staged.file;
    file.seek(std::io::SeekFrom::Start(0))
        .await
        .map_err(|e| ApiError::Internal(format!("failed to rewind staged upload: {e}")))?;
    let body: ByteStream =
        Box::pin(ReaderStream::new(file).map(|result| result.map_err(StorageError::Io)));

    state
        .storage
        .put_stream(
            &bucket,
            &full_path,
            body,
            staged.size,
            &content_type,
            &metadata,
        )
        .await?;

    let record = FileRecord {
        file_hash: digest_hex.clone(),
        file_path: full_path.clone(),
        bucket_name: bucket.clone(),
        original_name: staged.original_name.clone(),
        content_type: content_type.clone(),
        file_size: staged.size as i64,
        uploaded_at: OffsetDateTime::now_utc(),
    };
    if let Err(err) = state.index.add(record).await {
        tracing::warn!(error = %err, "failed to record upload in dedup index");
    }

    tracing::info!(path = %full_path, digest = %digest_hex, "file uploaded");
    Ok(Json(json!({
        "file_path": full_path,
        "file_hash": digest_hex,
        "bucket": bucket,
        "content_type": content_type,
        "size": staged.size,
        "duplicated": duplicated,
        "message": "File uploaded successfully",
        "status": 200,
    })))
}

/// Stream one multipart file field to a temp file while hashing it.
async fn stage_upload(
    state: &AppState,
    mut field: axum::extract::multipart::Field<'_>,
) -> ApiResult<StagedUpload> {
    let original_name = field.file_name().unwrap_or("").to_string();
    let declared_content_type = field.content_type().map(str::to_string);
    let limit = state.config.upload.file_max_size;

    let temp_dir = state.config.upload.temp_dir();
    tokio::fs::create_dir_all(&temp_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to create temp dir: {e}")))?;
    let std_file = tempfile::tempfile_in(&temp_dir)
        .map_err(|e| ApiError::Internal(format!("failed to create temp file: {e}")))?;
    let mut file = File::from_std(std_file);

    let mut hasher = ContentHasher::default();
    let mut head = Vec::with_capacity(SNIFF_LEN);
    let mut size: u64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {e}")))?
    {
        size += chunk.len() as u64;
        if size > limit {
            return Err(ApiError::BadRequest(format!(
                "File size exceeds {limit} bytes limit"
            )));
        }

        if head.len() < SNIFF_LEN {
            let take = (SNIFF_LEN - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to stage upload: {e}")))?;
    }

    file.flush()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to stage upload: {e}")))?;

    Ok(StagedUpload {
        file,
        size,
        digest: hasher.finalize(),
        original_name,
        declared_content_type,
        head,
    })
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read form field: {e}")))
}

/// Query parameters addressing one object.
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub file_path: String,
}

/// GET /api/v2/upload/file
pub async fn get_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Response> {
    require_object_query(&query)?;

    let (data, content_type) = state
        .storage
        .get(&query.bucket, &query.file_path)
        .await
        .map_err(|err| match err {
            StorageError::NotFound(_) => {
                ApiError::NotFound(format!("File not found: {}", query.file_path))
            }
            other => ApiError::Storage(other),
        })?;

    let content_type =
        content_type.unwrap_or_else(|| "application/octet-stream".to_string());

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        data,
    )
        .into_response())
}

/// DELETE /api/v2/upload/file
pub async fn delete_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<Value>> {
    require_object_query(&query)?;

    state
        .storage
        .delete(&query.bucket, &query.file_path)
        .await
        .map_err(|err| match err {
            StorageError::NotFound(_) => {
                ApiError::NotFound(format!("File not found: {}", query.file_path))
            }
            other => ApiError::Storage(other),
        })?;

    if let Err(err) = state.index.remove(&query.bucket, &query.file_path).await {
        tracing::warn!(error = %err, "failed to remove index row after delete");
    }

    tracing::info!(bucket = %query.bucket, path = %query.file_path, "file deleted");
    Ok(Json(json!({
        "file_path": query.file_path,
        "bucket": query.bucket,
        "message": "File deleted successfully",
        "status": 200,
    })))
}

/// Query parameters for listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
}

/// GET /api/v2/upload/files/list
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    if query.bucket.is_empty() {
        return Err(ApiError::BadRequest(
            "bucket parameter is required".to_string(),
        ));
    }

    let files = state.storage.list(&query.bucket, &query.prefix).await?;

    Ok(Json(json!({
        "count": files.len(),
        "files": files,
        "bucket": query.bucket,
        "prefix": query.prefix,
        "status": 200,
    })))
}

fn require_object_query(query: &FileQuery) -> ApiResult<()> {
    if query.file_path.is_empty() {
        return Err(ApiError::BadRequest("file_path is required".to_string()));
    }
    if query.bucket.is_empty() {
        return Err(ApiError::BadRequest(
            "bucket parameter is required".to_string(),
        ));
    }
    Ok(())
}
