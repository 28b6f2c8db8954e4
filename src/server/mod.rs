pub mod api;
pub mod auth;
pub mod registry;
pub mod service;
pub mod websocket;

use crate::cli::Args;
use crate::store::MessageStore;
use std::error::Error;
use std::sync::Arc;
use log::warn;

use self::api::AppState;
use self::auth::SessionSigner;
use self::registry::ConnectionRegistry;
use self::service::MessagingService;
use self::websocket::PushContext;

pub struct Server {
    addr: String,
    service: MessagingService,
    signer: SessionSigner,
    args: Args,
}

impl Server {
    pub fn new(addr: String, store: Arc<dyn MessageStore>, args: Args) -> Self {
        let signer = SessionSigner::new(args.session_secret.clone(), args.session_ttl_secs);
        if signer.is_open() {
            warn!("No SESSION_SECRET configured. Bearer tokens are trusted as plain user ids.");
        }
        let service = MessagingService::new(store, ConnectionRegistry::new(), args.page_size);
        Self { addr, service, signer, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(http_port) = self.args.http_port {
            api::start_http_server(
                http_port,
                AppState {
                    service: self.service.clone(),
                    signer: self.signer.clone(),
                },
                self.args.clone()
            ).await?;
        }

        websocket::start_ws_server(
            &self.addr,
            PushContext {
                registry: Arc::clone(self.service.registry()),
                signer: self.signer.clone(),
            },
            self.args.clone()
        ).await
    }
}
