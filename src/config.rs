//! CLI arguments and server configuration defaults.

use clap::Parser;

pub const MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;
pub const DEFAULT_UPLOAD_MAX_CHUNKS: u64 = 8192;
pub const DEFAULT_STAGING_TTL_SECS: u64 = 24 * 60 * 60;
pub const STAGING_SWEEP_INTERVAL_SECS: u64 = 900;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 30;

/// 完成检测的安定轮询:最大尝试次数与轮询间隔。
pub const SETTLE_MAX_ATTEMPTS: u32 = 5;
pub const SETTLE_POLL_INTERVAL_SECS: u64 = 1;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "chunkd", version, about = "Chunked upload reassembly server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "CHUNKD_STORAGE_DIR",
        default_value = ".chunkd/storage",
        help = "Storage root for staged chunks and assembled files"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "CHUNKD_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "CHUNKD_HTTP_PORT",
        default_value_t = 5005,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(long, env = "CHUNKD_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "CHUNKD_UPLOAD_MAX_CHUNKS",
        default_value_t = DEFAULT_UPLOAD_MAX_CHUNKS,
        help = "Max chunks per upload (0 to disable)"
    )]
    pub upload_max_chunks: u64,
    #[arg(
        long,
        env = "CHUNKD_STAGING_TTL_SECS",
        default_value_t = DEFAULT_STAGING_TTL_SECS,
        help = "Stale staging directory cleanup threshold in seconds (0 to disable)"
    )]
    pub staging_ttl_secs: u64,
}
