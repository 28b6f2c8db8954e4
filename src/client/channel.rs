//! Client end of the push channel: a websocket task that reconnects with exponential
//! backoff and hands every event to the [`MessagingClient`].

use futures::{ SinkExt, StreamExt };
use log::{ debug, info, warn };
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use crate::error::{ MessagingError, Result };
use crate::models::PushEvent;
use super::MessagingClient;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Clone, Debug)]
pub struct PushChannelConfig {
    /// Push endpoint, e.g. `ws://127.0.0.1:4000`.
    pub url: String,
    pub token: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl PushChannelConfig {
    pub fn new(url: &str, token: &str) -> Self {
        Self {
            url: url.to_string(),
            token: token.to_string(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url).map_err(|e|
            MessagingError::ChannelDisconnected(format!("invalid push endpoint {}: {}", self.url, e))
        )?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }
}

/// Handle to the background connection task. Dropping it closes the channel.
pub struct PushChannel {
    status: watch::Receiver<ChannelStatus>,
    task: JoinHandle<()>,
}

impl PushChannel {
    pub fn spawn(config: PushChannelConfig, client: Arc<MessagingClient>) -> Self {
        let (status_tx, status) = watch::channel(ChannelStatus::Connecting);
        let task = tokio::spawn(run(config, client, status_tx));
        Self { status, task }
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Resolves once the channel reports `wanted`; `false` if the task is gone.
    pub async fn wait_for(&mut self, wanted: ChannelStatus) -> bool {
        self.status.wait_for(|status| *status == wanted).await.is_ok()
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

async fn run(
    config: PushChannelConfig,
    client: Arc<MessagingClient>,
    status: watch::Sender<ChannelStatus>
) {
    let mut backoff = config.initial_backoff;
    loop {
        status.send_replace(ChannelStatus::Connecting);
        let outcome = session(&config, &client, &status).await;
        let was_connected = *status.borrow() == ChannelStatus::Connected;
        status.send_replace(ChannelStatus::Disconnected);

        match outcome {
            Ok(()) => info!("Push channel closed by server"),
            Err(e) => warn!("{}", e),
        }
        if was_connected {
            backoff = config.initial_backoff;
        }
        debug!("Reconnecting push channel in {:?}", backoff);
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff, config.max_backoff);
    }
}

async fn session(
    config: &PushChannelConfig,
    client: &Arc<MessagingClient>,
    status: &watch::Sender<ChannelStatus>
) -> Result<()> {
    let endpoint = config.endpoint()?;
    let (ws_stream, _) = connect_async(endpoint.as_str()).await.map_err(|e|
        MessagingError::ChannelDisconnected(format!("connect to {} failed: {}", config.url, e))
    )?;
    status.send_replace(ChannelStatus::Connected);
    info!("Push channel connected for {}", client.viewer().id);

    // Anything pushed while we were away is lost; catch up in the background.
    let resync_client = Arc::clone(client);
    tokio::spawn(async move {
        if let Err(e) = resync_client.resync().await {
            warn!("Resync after connect failed: {}", e);
        }
    });

    let (mut tx, mut rx) = ws_stream.split();
    while let Some(frame) = rx.next().await {
        let frame = frame.map_err(|e| MessagingError::ChannelDisconnected(e.to_string()))?;
        match frame {
            Message::Text(text) =>
                match serde_json::from_str::<PushEvent>(&text) {
                    Ok(event) => {
                        client.handle_push_event(event);
                    }
                    Err(e) => debug!("Ignoring unrecognised push frame: {}", e),
                }
            Message::Ping(data) => {
                tx
                    .send(Message::Pong(data)).await
                    .map_err(|e| MessagingError::ChannelDisconnected(e.to_string()))?;
            }
            Message::Close(_) => {
                return Ok(());
            }
            _ => {}
        }
    }
    Err(MessagingError::ChannelDisconnected("stream ended".into()))
}
