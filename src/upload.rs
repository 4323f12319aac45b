//! 分片上传处理器:接收分片、完成检测与合并触发。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Query};
use axum::http::StatusCode;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::assemble::assemble;
use crate::chunks::{chunk_exists, put_chunk};
use crate::completion;
use crate::config::{
    DEFAULT_LOCK_WAIT_TIMEOUT_SECS, MAX_CHUNK_SIZE, SETTLE_MAX_ATTEMPTS,
    SETTLE_POLL_INTERVAL_SECS,
};
use crate::error::{ApiError, UploadError};
use crate::locking::LockManager;
use crate::storage::{Storage, UploadSession, sanitize_segment};

#[derive(Debug)]
pub struct UploadConfig {
    pub max_chunks: u64,
    pub staging_ttl: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChunkQuery {
    namespace: String,
    upload_id: String,
    file_name: String,
    chunk_index: u64,
    total_chunks: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AbortQuery {
    namespace: String,
    upload_id: String,
}

/// 首个分片请求声明的会话参数,落盘供同一上传的后续请求核对。
#[derive(Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionRecord {
    file_name: String,
    total_chunks: u64,
}

/// 接收单个分片;若本请求观察到所有分片已齐,则触发合并。
///
/// 分片可乱序、并发、重试到达。多个请求可能同时认为"已齐",
/// 完成检测与合并在按会话互斥的锁内执行,落败的请求会发现
/// 暂存目录已被获胜者删除并直接成功返回。
pub async fn upload_chunk(
    Query(query): Query<ChunkQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(lock_manager): Extension<Arc<LockManager>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    body: AxumBody,
) -> Result<StatusCode, ApiError> {
    let session = UploadSession::new(&query.namespace, &query.upload_id, &query.file_name)?;
    if query.total_chunks == 0 {
        return Err(ApiError::BadRequest("totalChunks must be at least 1".into()));
    }
    if query.chunk_index == 0 || query.chunk_index > query.total_chunks {
        return Err(ApiError::BadRequest("chunkIndex out of range".into()));
    }
    if upload.max_chunks > 0 && query.total_chunks > upload.max_chunks {
        return Err(ApiError::BadRequest(
            "upload chunk count exceeds limit".into(),
        ));
    }

    ensure_session_record(&storage, &session, query.total_chunks).await?;
    put_chunk(
        &storage,
        &session,
        query.chunk_index,
        BodyExt::into_data_stream(body),
        MAX_CHUNK_SIZE,
    )
    .await?;

    if !completion::all_chunks_present(&storage, &session, query.total_chunks).await {
        return Ok(StatusCode::CREATED);
    }

    // 本请求可能是多个同时观察到"已齐"的请求之一,按会话串行化。
    let _guard = lock_manager
        .lock_upload_with_timeout(
            &session.lock_key(),
            Duration::from_secs(DEFAULT_LOCK_WAIT_TIMEOUT_SECS),
        )
        .await
        .map_err(|_| ApiError::Conflict("upload busy".into()))?;

    if fs::metadata(storage.staging_dir(&session)).await.is_err() {
        debug!(
            upload_id = session.upload_id(),
            "staging dir already gone, assembled by a concurrent request"
        );
        return Ok(StatusCode::CREATED);
    }

    completion::wait_until_settled(
        &storage,
        &session,
        query.total_chunks,
        SETTLE_MAX_ATTEMPTS,
        Duration::from_secs(SETTLE_POLL_INTERVAL_SECS),
    )
    .await?;
    let bytes = assemble(&storage, &session, query.total_chunks).await?;

    info!(
        upload_id = session.upload_id(),
        namespace = session.namespace(),
        name = session.file_name(),
        bytes,
        "upload complete"
    );
    Ok(StatusCode::CREATED)
}

/// 分片探测:分片已持久存在返回 200,否则 404(客户端据此跳过重传)。
pub async fn test_chunk(
    Query(query): Query<ChunkQuery>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<StatusCode, ApiError> {
    let session = UploadSession::new(&query.namespace, &query.upload_id, &query.file_name)?;
    if query.chunk_index == 0 {
        return Err(ApiError::BadRequest("chunkIndex out of range".into()));
    }

    if chunk_exists(&storage, &session, query.chunk_index).await {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound("chunk not found".into()))
    }
}

/// 中止上传并删除其暂存目录。
pub async fn abort_upload(
    Query(query): Query<AbortQuery>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<StatusCode, ApiError> {
    let namespace = sanitize_segment(&query.namespace)?;
    let upload_id = sanitize_segment(&query.upload_id)?;

    let staging_dir = storage.root_path().join(&namespace).join(&upload_id);
    if fs::metadata(&staging_dir).await.is_err() {
        return Err(ApiError::NotFound("upload not found".into()));
    }
    fs::remove_dir_all(&staging_dir)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    info!(upload_id, namespace, "upload aborted");
    Ok(StatusCode::NO_CONTENT)
}

/// 写入或核对会话记录。同一 uploadId 声明不一致时返回错误,
/// 而不是放任不同请求各写各的。
async fn ensure_session_record(
    storage: &Storage,
    session: &UploadSession,
    total_chunks: u64,
) -> Result<(), UploadError> {
    let record = SessionRecord {
        file_name: session.file_name().to_string(),
        total_chunks,
    };
    let content = serde_json::to_vec(&record)
        .map_err(|err| UploadError::Io(io::Error::other(err.to_string())))?;
    let meta_path = storage.session_meta_path(session);
    fs::create_dir_all(storage.staging_dir(session)).await?;

    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&meta_path)
        .await
    {
        Ok(mut file) => {
            file.write_all(&content).await?;
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            let existing = fs::read(&meta_path).await?;
            match serde_json::from_slice::<SessionRecord>(&existing) {
                Ok(existing) if existing == record => Ok(()),
                Ok(_) => Err(UploadError::SessionMismatch),
                // 记录损坏(如写入中途崩溃)时按当前请求重建。
                Err(_) => {
                    fs::write(&meta_path, &content).await?;
                    Ok(())
                }
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// 清理超过 TTL 的暂存目录。命名空间下的目录只会是暂存目录,
/// 最终文件都是普通文件。
pub async fn sweep_stale_staging(
    storage: &Storage,
    upload: &UploadConfig,
) -> Result<(), std::io::Error> {
    if upload.staging_ttl.is_zero() {
        return Ok(());
    }

    let now = SystemTime::now();
    let mut namespaces = fs::read_dir(storage.root_path()).await?;
    while let Some(namespace) = namespaces.next_entry().await? {
        if !namespace.metadata().await?.is_dir() {
            continue;
        }
        let mut entries = fs::read_dir(namespace.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }
            let modified = match metadata.modified() {
                Ok(value) => value,
                Err(_) => continue,
            };
            let age = match now.duration_since(modified) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if age >= upload.staging_ttl {
                let path = entry.path();
                if let Err(err) = fs::remove_dir_all(&path).await {
                    warn!(path = ?path, error = %err, "failed to remove stale staging dir");
                } else {
                    info!(path = ?path, "removed stale staging dir");
                }
            }
        }
    }

    Ok(())
}
