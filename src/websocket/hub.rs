use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::messages::WsMessage;
use crate::models::{Price, Symbol};

pub type ClientId = Uuid;

/// Outbound queue capacity per client
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// One connected client as the hub sees it
///
/// The bounded outbound queue plus a per-client cancellation token (the
/// liveness state): cancelling the token ends that client's read and
/// write loops and nothing else.
#[derive(Clone)]
pub struct ClientHandle {
    sender: mpsc::Sender<WsMessage>,
    cancel: CancellationToken,
}

impl ClientHandle {
    pub fn new(sender: mpsc::Sender<WsMessage>, cancel: CancellationToken) -> Self {
        Self { sender, cancel }
    }

    fn try_send(&self, message: WsMessage) -> Result<(), mpsc::error::TrySendError<WsMessage>> {
        self.sender.try_send(message)
    }
}

/// Registry mutations, funneled through the single control task
enum HubCommand {
    Register { id: ClientId, handle: ClientHandle },
    Unregister { id: ClientId },
    Subscribe { id: ClientId, symbol: Symbol },
    Unsubscribe { id: ClientId, symbol: Symbol },
}

struct Registry {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    subscriptions: RwLock<HashMap<Symbol, HashSet<ClientId>>>,
}

/// Owner of live client connections and their symbol interests
///
/// All mutations go through one control task via a command channel, so
/// no client ever observes a partially-updated registry. The hot
/// delivery path only takes read locks, releases them before sending,
/// and never blocks: a full client queue drops that one message for
/// that one client.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Registry>,
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Create the hub and spawn its control task
    pub fn new() -> Self {
        let registry = Arc::new(Registry {
            clients: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let control_registry = Arc::clone(&registry);
        tokio::spawn(async move {
            run_control(control_registry, cmd_rx).await;
        });

        Self { registry, cmd_tx }
    }

    /// Add a client with no subscriptions; sends the welcome message
    pub async fn register(&self, id: ClientId, handle: ClientHandle) {
        let _ = self.cmd_tx.send(HubCommand::Register { id, handle }).await;
    }

    /// Remove a client and all its subscriptions atomically
    pub async fn unregister(&self, id: ClientId) {
        let _ = self.cmd_tx.send(HubCommand::Unregister { id }).await;
    }

    /// Add (client, symbol); idempotent; confirms with `subscribed`
    pub async fn subscribe(&self, id: ClientId, symbol: Symbol) {
        let _ = self.cmd_tx.send(HubCommand::Subscribe { id, symbol }).await;
    }

    /// Remove (client, symbol); idempotent
    pub async fn unsubscribe(&self, id: ClientId, symbol: Symbol) {
        let _ = self
            .cmd_tx
            .send(HubCommand::Unsubscribe { id, symbol })
            .await;
    }

    /// Fan a selected tick out to every subscriber of its symbol
    ///
    /// Non-blocking: a full queue drops the tick for that client only,
    /// without error or disconnect. Slow consumers fall behind silently
    /// rather than stalling the broadcast path.
    pub fn deliver(&self, price: &Price) {
        let ids: Vec<ClientId> = {
            let subscriptions = self.registry.subscriptions.read();
            match subscriptions.get(&price.symbol) {
                Some(set) if !set.is_empty() => set.iter().copied().collect(),
                _ => return,
            }
        };

        let message = WsMessage::price_update(price);
        let clients = self.registry.clients.read();
        for id in ids {
            if let Some(handle) = clients.get(&id) {
                if let Err(mpsc::error::TrySendError::Full(_)) =
                    handle.try_send(message.clone())
                {
                    tracing::trace!(client = %id, symbol = %price.symbol, "client queue full, tick dropped");
                }
            }
        }
    }

    /// Send a control message to every registered client
    ///
    /// A full queue here means a systemically stuck connection, not a
    /// recoverable price-delivery miss: the client is forcibly
    /// unregistered.
    pub fn broadcast_raw(&self, message: &WsMessage) {
        let handles: Vec<(ClientId, ClientHandle)> = {
            let clients = self.registry.clients.read();
            clients
                .iter()
                .map(|(id, handle)| (*id, handle.clone()))
                .collect()
        };

        for (id, handle) in handles {
            if let Err(mpsc::error::TrySendError::Full(_)) = handle.try_send(message.clone()) {
                tracing::warn!(client = %id, "client queue stuck, force unregistering");
                if self.cmd_tx.try_send(HubCommand::Unregister { id }).is_err() {
                    tracing::error!(client = %id, "hub command queue full, unregister deferred");
                }
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.registry.clients.read().len()
    }

    pub fn subscription_counts(&self) -> HashMap<Symbol, usize> {
        self.registry
            .subscriptions
            .read()
            .iter()
            .map(|(symbol, set)| (*symbol, set.len()))
            .collect()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Control loop: exclusive mutation rights over the registry
async fn run_control(registry: Arc<Registry>, mut cmd_rx: mpsc::Receiver<HubCommand>) {
    while let Some(command) = cmd_rx.recv().await {
        match command {
            HubCommand::Register { id, handle } => {
                let welcome = WsMessage::connected();
                let _ = handle.try_send(welcome);
                registry.clients.write().insert(id, handle);
                tracing::info!(client = %id, total = registry.clients.read().len(), "client registered");
            }
            HubCommand::Unregister { id } => {
                let removed = registry.clients.write().remove(&id);
                if let Some(handle) = removed {
                    {
                        let mut subscriptions = registry.subscriptions.write();
                        for set in subscriptions.values_mut() {
                            set.remove(&id);
                        }
                        subscriptions.retain(|_, set| !set.is_empty());
                    }
                    // Ends the client's connection loop.
                    handle.cancel.cancel();
                    tracing::info!(client = %id, total = registry.clients.read().len(), "client unregistered");
                }
            }
            HubCommand::Subscribe { id, symbol } => {
                // A subscribe may arrive after an unregister for the
                // same client; entering it would leave an id in the
                // symbol map that no later command can remove.
                let handle = registry.clients.read().get(&id).cloned();
                let Some(handle) = handle else {
                    tracing::debug!(client = %id, %symbol, "subscribe from unregistered client dropped");
                    continue;
                };

                let added = registry
                    .subscriptions
                    .write()
                    .entry(symbol)
                    .or_default()
                    .insert(id);

                let _ = handle.try_send(WsMessage::Subscribed { symbol });
                if added {
                    tracing::debug!(client = %id, %symbol, "subscribed");
                }
            }
            HubCommand::Unsubscribe { id, symbol } => {
                let mut subscriptions = registry.subscriptions.write();
                if let Some(set) = subscriptions.get_mut(&symbol) {
                    set.remove(&id);
                    if set.is_empty() {
                        subscriptions.remove(&symbol);
                    }
                }
                tracing::debug!(client = %id, %symbol, "unsubscribed");
            }
        }
    }
}
