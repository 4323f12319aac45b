//! 引擎错误与统一的 API 错误映射。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::io::{self, ErrorKind};

/// 分片接收与重组引擎的错误分类。
#[derive(Debug)]
pub enum UploadError {
    /// namespace/uploadId/fileName 含非法路径成分。
    InvalidIdentifier,
    /// 单个分片超出大小限制。
    ChunkTooLarge,
    /// 同一 uploadId 的请求声明了不一致的会话参数。
    SessionMismatch,
    /// 分片已齐但锁标记在限定轮询内未消失,本次请求可重试。
    SettleTimeout,
    /// 合并时发现应存在的分片文件缺失。
    MissingChunk(u64),
    Io(io::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::InvalidIdentifier => write!(f, "invalid identifier"),
            UploadError::ChunkTooLarge => write!(f, "chunk too large"),
            UploadError::SessionMismatch => write!(f, "upload session mismatch"),
            UploadError::SettleTimeout => write!(f, "chunk writes did not settle in time"),
            UploadError::MissingChunk(index) => write!(f, "missing chunk {index}"),
            UploadError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(err: io::Error) -> Self {
        UploadError::Io(err)
    }
}

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    /// 分片写入未在时间预算内安定,客户端应稍后重试。
    SettleTimeout,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::SettleTimeout => {
                let mut headers = HeaderMap::new();
                headers.insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    headers,
                    "chunk writes did not settle in time, retry shortly",
                )
                    .into_response()
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(error: UploadError) -> Self {
        match error {
            UploadError::InvalidIdentifier => ApiError::BadRequest("invalid identifier".into()),
            UploadError::ChunkTooLarge => ApiError::BadRequest("chunk too large".into()),
            UploadError::SessionMismatch => {
                ApiError::Conflict("upload session mismatch".into())
            }
            UploadError::SettleTimeout => ApiError::SettleTimeout,
            UploadError::MissingChunk(index) => {
                ApiError::BadRequest(format!("missing chunk {index}"))
            }
            UploadError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}
