//! 分片落盘与存在性检查。

use axum::body::Bytes;
use futures_util::stream::{Stream, StreamExt};
use std::fmt;
use std::io;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::UploadError;
use crate::locking::LockMarker;
use crate::storage::{Storage, UploadSession};

/// 将一个分片的载荷流式写入暂存目录。
///
/// 写入期间持有该分片的锁标记,无论成功失败都会移除标记。
/// 同一索引重复写入为幂等覆盖(last write wins),暂存目录按需创建。
pub async fn put_chunk<S, E>(
    storage: &Storage,
    session: &UploadSession,
    chunk_index: u64,
    payload: S,
    max_size: u64,
) -> Result<u64, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    let staging_dir = storage.staging_dir(session);
    fs::create_dir_all(&staging_dir).await?;

    let marker = LockMarker::acquire(&storage.lock_marker_path(session, chunk_index)).await?;
    let chunk_path = storage.chunk_path(session, chunk_index);
    let result = write_payload(&chunk_path, payload, max_size).await;
    marker.release().await;

    let written = result?;
    debug!(
        upload_id = session.upload_id(),
        chunk_index,
        bytes = written,
        "chunk saved"
    );
    Ok(written)
}

async fn write_payload<S, E>(path: &Path, mut payload: S, max_size: u64) -> Result<u64, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    let mut file = File::create(path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|err| UploadError::Io(io::Error::other(err.to_string())))?;
        if chunk.is_empty() {
            continue;
        }
        written += chunk.len() as u64;
        if max_size > 0 && written > max_size {
            let _ = fs::remove_file(path).await;
            return Err(UploadError::ChunkTooLarge);
        }
        file.write_all(&chunk).await?;
    }
    Ok(written)
}

/// 分片是否"持久存在":载荷文件已落盘且锁标记已消失。
pub async fn chunk_exists(storage: &Storage, session: &UploadSession, chunk_index: u64) -> bool {
    let payload_present = fs::metadata(storage.chunk_path(session, chunk_index))
        .await
        .is_ok();
    let locked = fs::metadata(storage.lock_marker_path(session, chunk_index))
        .await
        .is_ok();
    payload_present && !locked
}
