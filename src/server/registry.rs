use log::{ debug, error, info };
use std::collections::HashMap;
use std::sync::{ Arc, RwLock };
use tokio::sync::mpsc::{ unbounded_channel, UnboundedReceiver, UnboundedSender };
use uuid::Uuid;

use crate::models::PushEvent;

pub type ConnectionId = Uuid;

/// Open push channels, keyed by user and then by connection so one user may hold several
/// (tabs, devices). Handles are plain channel senders; the websocket task on the other end
/// owns the socket.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, HashMap<ConnectionId, UnboundedSender<String>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(&self, user_id: &str) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let id = Uuid::new_v4();
        if let Ok(mut connections) = self.connections.write() {
            connections.entry(user_id.to_string()).or_default().insert(id, tx);
        }
        info!("Registered push channel {} for {}", id, user_id);
        (id, rx)
    }

    pub fn disconnect(&self, user_id: &str, id: ConnectionId) {
        if let Ok(mut connections) = self.connections.write() {
            if let Some(per_user) = connections.get_mut(user_id) {
                per_user.remove(&id);
                if per_user.is_empty() {
                    connections.remove(user_id);
                }
            }
        }
        info!("Unregistered push channel {} for {}", id, user_id);
    }

    /// Closes every push channel of `user_id`, e.g. when the session is revoked. Each
    /// websocket task sees its handle go away and drops the socket.
    pub fn disconnect_user(&self, user_id: &str) -> usize {
        let removed = self.connections
            .write()
            .ok()
            .and_then(|mut connections| connections.remove(user_id))
            .map_or(0, |per_user| per_user.len());
        info!("Closed {} push channel(s) for {}", removed, user_id);
        removed
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .read()
            .map(|c| c.get(user_id).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    /// Pushes a serialized frame to every open channel of `user_id`; returns how many
    /// channels accepted it. Never waits on a socket.
    pub fn push(&self, user_id: &str, frame: &str) -> usize {
        let connections = match self.connections.read() {
            Ok(c) => c,
            Err(_) => {
                return 0;
            }
        };
        connections
            .get(user_id)
            .map(|per_user| {
                per_user
                    .values()
                    .filter(|tx| tx.send(frame.to_string()).is_ok())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Fire-and-forget fan-out of `event` to every channel of every recipient.
    pub fn broadcast(self: &Arc<Self>, recipients: Vec<String>, event: PushEvent) {
        let frame = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize push event: {}", e);
                return;
            }
        };
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let delivered: usize = recipients
                .iter()
                .map(|user_id| registry.push(user_id, &frame))
                .sum();
            debug!("Fanned out event to {} channel(s) across {} recipient(s)", delivered, recipients.len());
        });
    }
}
