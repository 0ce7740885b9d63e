pub mod cache;
pub mod cli;
pub mod client;
pub mod context;
pub mod history;
pub mod llm;
pub mod mock;
pub mod models;
pub mod relay;
pub mod server;

use cache::ResponseCache;
use cli::Args;
use context::ContextAugmenter;
use llm::LlmConfig;
use log::{ info, warn };
use mock::MockResponder;
use relay::{ MockStreamSettings, Relay };
use server::{ AppState, Server };
use std::error::Error;

/// Wires the relay from `args`. No upstream client is built without a credential.
pub async fn build_state(args: &Args) -> Result<AppState, Box<dyn Error + Send + Sync>> {
    let store = history::initialize_store(args)?;
    let llm_config = LlmConfig::from_args(args)?;
    let upstream = llm::chat::new_client(&llm_config)?;
    match &upstream {
        Some(client) => info!("Relaying chat to {} model {}", llm_config.llm_type.display_name(), client.get_model()),
        None => warn!("No API key configured. Chat replies will be mock responses."),
    }

    let relay = Relay::new(
        upstream,
        ContextAugmenter::new(store),
        MockResponder::seeded(args.mock_seed),
        MockStreamSettings::from_args(args)
    ).with_cache(ResponseCache::init(args).await);

    Ok(AppState::new(relay, args.has_api_key(), llm_config.llm_type.display_name()))
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model);
    info!("API Key Configured: {}", args.has_api_key());
    info!("Mock Stream: {} chars every {}ms", args.mock_batch_size, args.mock_delay_ms);
    info!("History Store Type: {}", args.history_type);
    info!("History Store Host: {}", args.history_host);
    info!("History Fallback: {}", args.history_fallback);
    info!("Cache Enabled: {}", args.enable_cache);
    if args.enable_cache {
        info!("Cache Redis URL: {}", args.cache_redis_url.as_deref().unwrap_or("(memory only)"));
        info!("Cache TTL: {}s", args.cache_ttl);
        info!("Cache Capacity: {}", args.cache_capacity);
    }
    info!("-------------------------");

    let state = build_state(&args).await?;
    let addr = args.server_addr.clone();
    let server = Server::new(addr, state, args);
    server.run().await?;

    Ok(())
}
