//! 按序合并分片、原子替换目标文件并清理暂存目录。

use std::io::ErrorKind;
use tokio::fs::{self, File};
use tracing::info;

use crate::atomic::AtomicFile;
use crate::error::UploadError;
use crate::storage::{Storage, UploadSession};

/// 将索引 1..=total 的分片按升序拼接为最终文件。
///
/// 输出先写入目标同目录的临时文件,全部分片拼接成功后才 rename
/// 覆盖目标(last assembler wins),任何失败都不会留下残缺的目标。
/// 成功后整个暂存目录(分片、残留标记、会话记录)被一次性删除。
pub async fn assemble(
    storage: &Storage,
    session: &UploadSession,
    total_chunks: u64,
) -> Result<u64, UploadError> {
    let staging_dir = storage.staging_dir(session);
    let target = storage.target_path(session);

    // 合并前逐一确认分片仍在,缺失则在写出任何字节前失败。
    let mut chunk_paths = Vec::with_capacity(total_chunks as usize);
    for chunk_index in 1..=total_chunks {
        let path = storage.chunk_path(session, chunk_index);
        if fs::metadata(&path).await.is_err() {
            return Err(UploadError::MissingChunk(chunk_index));
        }
        chunk_paths.push((chunk_index, path));
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut atomic = AtomicFile::new(&target).await?;
    let write_result: Result<u64, UploadError> = async {
        let mut total_written: u64 = 0;
        for (chunk_index, path) in &chunk_paths {
            let mut chunk_file = File::open(path).await.map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    UploadError::MissingChunk(*chunk_index)
                } else {
                    UploadError::Io(err)
                }
            })?;
            let copied = tokio::io::copy(&mut chunk_file, atomic.file_mut()).await?;
            total_written += copied;
        }
        Ok(total_written)
    }
    .await;
    let total_written = match write_result {
        Ok(value) => value,
        Err(err) => {
            atomic.cleanup().await;
            return Err(err);
        }
    };
    atomic.finalize().await?;

    fs::remove_dir_all(&staging_dir).await?;

    info!(
        upload_id = session.upload_id(),
        name = session.file_name(),
        total_chunks,
        bytes = total_written,
        "upload assembled"
    );
    Ok(total_written)
}
