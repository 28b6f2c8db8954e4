pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod pagination;
pub mod resolver;
pub mod server;
pub mod store;

use cli::Args;
use config::directory::load_directory;
use log::info;
use server::Server;
use std::error::Error;

pub use error::{ MessagingError, Result };

/// Longest message body accepted, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

pub async fn run(args: Args) -> std::result::Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Push Channel Address: {}", args.server_addr);
    info!("HTTP API Port: {}", args.http_port.map_or("disabled".to_string(), |p| p.to_string()));
    info!("Message Store Type: {}", args.store_type);
    if args.store_type.eq_ignore_ascii_case("redis") {
        info!("Message Store Redis URL: {}", args.store_redis_url);
        info!("Message Store Redis Prefix: {}", args.store_redis_prefix);
    }
    info!("Directory Path: {}", args.directory_path);
    info!("Page Size: {}", args.page_size);
    info!("Signed Sessions: {}", args.session_secret.is_some());
    info!("Connection Rate Limit: {}/s", args.connection_rate_limit);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let directory = load_directory(&args.directory_path)?;
    let store = store::initialize_message_store(&args, &directory).await?;
    let server = Server::new(args.server_addr.clone(), store, args.clone());
    server.run().await?;

    Ok(())
}
