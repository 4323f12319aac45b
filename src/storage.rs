//! 存储根目录、上传会话标识与确定性路径推导。

use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error::UploadError;

/// 存储根目录封装,所有路径均由此推导。
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 某个上传会话的暂存目录:`<root>/<namespace>/<uploadId>`。
    pub fn staging_dir(&self, session: &UploadSession) -> PathBuf {
        self.root
            .join(session.namespace())
            .join(session.upload_id())
    }

    /// 分片文件路径,索引补零到三位:`<fileName>_<NNN>`。
    pub fn chunk_path(&self, session: &UploadSession, chunk_index: u64) -> PathBuf {
        self.staging_dir(session)
            .join(format!("{}_{:03}", session.file_name(), chunk_index))
    }

    /// 分片写入期间的锁标记文件:`.lock_<N>`。
    pub fn lock_marker_path(&self, session: &UploadSession, chunk_index: u64) -> PathBuf {
        self.staging_dir(session)
            .join(format!(".lock_{chunk_index}"))
    }

    /// 会话记录文件,保存首个请求声明的参数。
    pub fn session_meta_path(&self, session: &UploadSession) -> PathBuf {
        self.staging_dir(session).join("meta.json")
    }

    /// 合并后的最终文件路径:`<root>/<namespace>/<fileName>`。
    pub fn target_path(&self, session: &UploadSession) -> PathBuf {
        self.root
            .join(session.namespace())
            .join(session.file_name())
    }
}

/// 校验后的上传会话标识 (namespace, uploadId, fileName)。
#[derive(Clone, Debug)]
pub struct UploadSession {
    namespace: String,
    upload_id: String,
    file_name: String,
}

impl UploadSession {
    /// 校验三个调用方提供的标识符后构造会话。
    pub fn new(namespace: &str, upload_id: &str, file_name: &str) -> Result<Self, UploadError> {
        Ok(Self {
            namespace: sanitize_segment(namespace)?,
            upload_id: sanitize_segment(upload_id)?,
            file_name: sanitize_segment(file_name)?,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// 进程内完成锁的键。
    pub fn lock_key(&self) -> String {
        format!("{}/{}", self.namespace, self.upload_id)
    }
}

/// 校验不可信标识符:必须恰好是一个普通路径成分。
pub fn sanitize_segment(value: &str) -> Result<String, UploadError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(['/', '\\']) {
        return Err(UploadError::InvalidIdentifier);
    }

    let mut components = Path::new(trimmed).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(segment)), None) if segment == OsStr::new(trimmed) => {
            Ok(trimmed.to_string())
        }
        _ => Err(UploadError::InvalidIdentifier),
    }
}

#[cfg(test)]
mod tests {
    use super::{Storage, UploadSession, sanitize_segment};
    use crate::error::UploadError;
    use std::path::PathBuf;

    #[test]
    fn sanitize_rejects_traversal_and_separators() {
        for value in ["..", ".", "", "  ", "a/b", "a\\b", "/abs", "../x"] {
            assert!(
                matches!(sanitize_segment(value), Err(UploadError::InvalidIdentifier)),
                "expected rejection for {value:?}"
            );
        }
    }

    #[test]
    fn sanitize_accepts_plain_names() {
        assert_eq!(sanitize_segment("tenant-1").unwrap(), "tenant-1");
        assert_eq!(sanitize_segment("3145728-demo.bin").unwrap(), "3145728-demo.bin");
    }

    #[test]
    fn paths_follow_staged_layout() {
        let storage = Storage::new(PathBuf::from("/data"));
        let session = UploadSession::new("plant-a", "u1", "out.bin").expect("session");

        assert_eq!(
            storage.chunk_path(&session, 7),
            PathBuf::from("/data/plant-a/u1/out.bin_007")
        );
        assert_eq!(
            storage.lock_marker_path(&session, 7),
            PathBuf::from("/data/plant-a/u1/.lock_7")
        );
        assert_eq!(
            storage.target_path(&session),
            PathBuf::from("/data/plant-a/out.bin")
        );
    }

    #[test]
    fn chunk_index_padding_is_three_digits() {
        let storage = Storage::new(PathBuf::from("/data"));
        let session = UploadSession::new("ns", "u1", "f").expect("session");
        let path = storage.chunk_path(&session, 1002);
        assert!(path.ends_with("f_1002"));
    }
}
