use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Message Store Args ---
    /// Message store backend (memory, redis)
    #[arg(long, env = "STORE_TYPE", default_value = "memory")]
    pub store_type: String,

    /// Redis endpoint for the message store (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub store_redis_url: String,

    /// Prefix for every Redis key written by the message store.
    #[arg(long, env = "STORE_REDIS_PREFIX", default_value = "messaging:")]
    pub store_redis_prefix: String,

    /// JSON file with the users and groups known to the messaging core.
    #[arg(long, env = "DIRECTORY_PATH", default_value = "json/directory.json")]
    pub directory_path: String,

    // --- Server Args ---
    /// Host address and port for the push channel (WebSocket) listener.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Port for the HTTP API. The API is not started when unset.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Shared secret used to verify session tokens. Without it tokens are taken as user ids.
    #[arg(long, env = "SESSION_SECRET")]
    pub session_secret: Option<String>,

    /// Maximum age in seconds of a session token.
    #[arg(long, env = "SESSION_TTL_SECS", default_value = "86400")]
    pub session_ttl_secs: u64,

    /// Default number of messages per page.
    #[arg(long, env = "PAGE_SIZE", default_value = "20")]
    pub page_size: usize,

    /// New push channel connections accepted per second, across all clients.
    #[arg(long, env = "CONNECTION_RATE_LIMIT", default_value = "10")]
    pub connection_rate_limit: u32,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    // --- TLS Args ---
    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,
}
