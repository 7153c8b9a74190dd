//! Broadcast hub: one task owns the set of live viewers.
//!
//! ```text
//! OrderService ── publish ──┐
//! viewer connect ─ register ─┼──► mpsc ──► Hub::run (owns subscribers)
//! viewer drop ── unregister ─┘                 │
//!                                              ├── try_send ──► viewer #1
//!                                              ├── try_send ──► viewer #2
//!                                              └── full? drop the viewer
//! ```
//!
//! Register, unregister and publish all travel through the same command
//! queue, so the subscriber map is only ever touched by the hub task.
//! Fan-out uses `try_send`: a viewer whose queue is full is removed instead
//! of stalling the publisher or the other viewers.

use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::orders::repo_types::Order;

/// Snapshots are shared between all viewers of one publish.
pub type OrderSnapshot = Arc<Order>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    #[error("broadcast hub is not running")]
    HubClosed,
}

enum HubCommand {
    Register {
        respond_to: oneshot::Sender<(SubscriberId, mpsc::Receiver<OrderSnapshot>)>,
    },
    Unregister {
        id: SubscriberId,
    },
    Publish {
        order: OrderSnapshot,
    },
    Count {
        respond_to: oneshot::Sender<usize>,
    },
}

/// The event loop. Owns every subscriber sender.
pub struct Hub {
    commands: mpsc::Receiver<HubCommand>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<OrderSnapshot>>,
    next_id: u64,
    subscriber_buffer: usize,
}

/// Cloneable handle used by the workflow service and the viewer endpoint.
#[derive(Clone)]
pub struct Broadcaster {
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    pub fn new(cfg: &HubConfig) -> (Self, Broadcaster) {
        let (tx, rx) = mpsc::channel(cfg.command_buffer.max(1));
        let hub = Self {
            commands: rx,
            subscribers: HashMap::new(),
            next_id: 1,
            subscriber_buffer: cfg.subscriber_buffer.max(1),
        };
        (hub, Broadcaster { commands: tx })
    }

    /// Start the loop on the current runtime and hand back its handle.
    pub fn spawn(cfg: &HubConfig) -> Broadcaster {
        let (hub, broadcaster) = Self::new(cfg);
        tokio::spawn(hub.run());
        broadcaster
    }

    /// Runs until every [`Broadcaster`] is gone. Remaining subscriber
    /// channels are closed on exit.
    pub async fn run(mut self) {
        info!("broadcast hub started");
        while let Some(cmd) = self.commands.recv().await {
            self.handle(cmd);
        }
        info!(
            subscribers = self.subscribers.len(),
            "broadcast hub stopped, closing viewers"
        );
    }

    fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { respond_to } => {
                let id = SubscriberId(self.next_id);
                self.next_id += 1;
                let (tx, rx) = mpsc::channel(self.subscriber_buffer);
                if respond_to.send((id, rx)).is_ok() {
                    self.subscribers.insert(id, tx);
                    info!(subscriber = %id, total = self.subscribers.len(), "viewer registered");
                }
            }
            HubCommand::Unregister { id } => self.remove(id, "viewer unregistered"),
            HubCommand::Publish { order } => self.fan_out(order),
            HubCommand::Count { respond_to } => {
                let _ = respond_to.send(self.subscribers.len());
            }
        }
    }

    fn fan_out(&mut self, order: OrderSnapshot) {
        let mut dropped = Vec::new();
        for (id, tx) in &self.subscribers {
            match tx.try_send(Arc::clone(&order)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, order_id = order.id, "viewer queue full, dropping viewer");
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "viewer channel already closed");
                    dropped.push(*id);
                }
            }
        }
        for id in dropped {
            self.remove(id, "viewer removed");
        }
        debug!(order_id = order.id, viewers = self.subscribers.len(), "order broadcast");
    }

    /// Dropping the sender closes the viewer's channel. Unknown ids are ignored.
    fn remove(&mut self, id: SubscriberId, reason: &str) {
        if self.subscribers.remove(&id).is_some() {
            info!(subscriber = %id, total = self.subscribers.len(), "{}", reason);
        }
    }
}

impl Broadcaster {
    pub async fn register(&self) -> Result<Subscription, BroadcastError> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { respond_to })
            .await
            .map_err(|_| BroadcastError::HubClosed)?;
        let (id, receiver) = response.await.map_err(|_| BroadcastError::HubClosed)?;
        Ok(Subscription {
            id,
            receiver,
            hub: self.commands.downgrade(),
        })
    }

    /// Safe to call for ids that were already removed.
    pub async fn unregister(&self, id: SubscriberId) -> Result<(), BroadcastError> {
        self.commands
            .send(HubCommand::Unregister { id })
            .await
            .map_err(|_| BroadcastError::HubClosed)
    }

    /// Waits only for room in the command queue, never for viewers.
    pub async fn publish(&self, order: Order) -> Result<(), BroadcastError> {
        self.commands
            .send(HubCommand::Publish {
                order: Arc::new(order),
            })
            .await
            .map_err(|_| BroadcastError::HubClosed)
    }

    pub async fn subscriber_count(&self) -> Result<usize, BroadcastError> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(HubCommand::Count { respond_to })
            .await
            .map_err(|_| BroadcastError::HubClosed)?;
        response.await.map_err(|_| BroadcastError::HubClosed)
    }
}

/// One registered viewer. Dropping it unregisters from the hub.
///
/// Holds only a weak handle so open viewers do not keep a stopped hub alive.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<OrderSnapshot>,
    hub: mpsc::WeakSender<HubCommand>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// `None` once the hub has removed this viewer and the queue is empty.
    pub async fn recv(&mut self) -> Option<OrderSnapshot> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = OrderSnapshot;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}

        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        match hub.try_send(HubCommand::Unregister { id: self.id }) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(cmd)) => {
                // Command queue is busy; finish the unregister off this thread.
                if let Ok(rt) = tokio::runtime::Handle::try_current() {
                    rt.spawn(async move {
                        let _ = hub.send(cmd).await;
                    });
                }
            }
        }
        debug!(subscriber = %self.id, "viewer subscription dropped");
    }
}
