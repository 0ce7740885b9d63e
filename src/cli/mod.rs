use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    /// Serve HTTPS instead of plain HTTP. Requires --tls-cert-path and --tls-key-path.
    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Optional path to the TLS certificate file (PEM format).
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format).
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    // --- Chat LLM Provider Args ---
    /// Type of OpenAI-compatible provider for chat completion (openai, groq, xai, deepseek)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// API key for the chat provider. When empty the server answers with mock responses.
    #[arg(long, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gpt-4o, gpt-3.5-turbo)
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-3.5-turbo")]
    pub chat_model: String,

    /// Base URL for the chat provider API. Adapters fall back to the provider default.
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// Maximum tokens requested for a streamed chat reply.
    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "1024")]
    pub chat_max_tokens: u32,

    /// Sampling temperature for chat replies.
    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub chat_temperature: f32,

    // --- Mock Stream Args ---
    /// Characters emitted per frame when streaming a mock reply.
    #[arg(long, env = "MOCK_BATCH_SIZE", default_value = "3")]
    pub mock_batch_size: usize,

    /// Delay in milliseconds between mock frames.
    #[arg(long, env = "MOCK_DELAY_MS", default_value = "30")]
    pub mock_delay_ms: u64,

    /// Seed for the mock generator's random choices. Unset means non-deterministic.
    #[arg(long, env = "MOCK_SEED")]
    pub mock_seed: Option<u64>,

    // --- History Store Args ---
    /// Conversation store type (memory, redis)
    #[arg(long, env = "HISTORY_TYPE", default_value = "memory")]
    pub history_type: String,

    /// Conversation store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis conversation keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "chatBuddy:")]
    pub history_redis_prefix: String,

    /// Fall back to the in-process store whenever the hosted store fails.
    #[arg(long, env = "HISTORY_FALLBACK", default_value = "true", action = clap::ArgAction::Set)]
    pub history_fallback: bool,

    // --- Caching Args ---
    /// Enable the best-effort response cache.
    #[arg(long, env = "ENABLE_CACHE", default_value = "false")]
    pub enable_cache: bool,

    /// Optional Redis URL mirroring the in-memory response cache.
    #[arg(long, env = "CACHE_REDIS_URL")]
    pub cache_redis_url: Option<String>,

    /// Time-to-live (TTL) in seconds for cache entries. 0 means no TTL.
    #[arg(long, env = "CACHE_TTL", default_value = "3600")]
    pub cache_ttl: u64,

    /// Maximum number of in-memory cache entries.
    #[arg(long, env = "CACHE_CAPACITY", default_value = "256")]
    pub cache_capacity: usize,

    /// Number of trailing messages included in the cache fingerprint.
    #[arg(long, env = "CACHE_WINDOW", default_value = "4")]
    pub cache_window: usize,
}

impl Args {
    pub fn has_api_key(&self) -> bool {
        !self.chat_api_key.trim().is_empty()
    }
}
