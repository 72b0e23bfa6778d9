//! # Broadcast Hub
//!
//! Single-owner actor holding the live subscriber set. Registration,
//! unregistration and publishing arrive as messages on one queue and are
//! applied strictly one at a time, so the registry needs no lock.
//!
//! ## Key Design Features
//! 1. **Total order** - one control loop consumes every command
//! 2. **Never blocks on subscribers** - fan-out uses `try_send` only
//! 3. **Drop-on-full** - a saturated subscriber loses its own lines, nobody else's
//! 4. **Queue identity** - a subscriber *is* its outbound queue; no ids

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use cransim_telemetry::MetricsRecorder;

use crate::error::HubError;

/// Default bound of the hub's command queue.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Outbound side of a subscriber queue.
pub type SubscriberQueue = mpsc::Sender<Bytes>;

/// A registered per-connection delivery queue.
#[derive(Debug, Clone)]
pub struct Subscriber {
    queue: SubscriberQueue,
    peer: SocketAddr,
}

impl Subscriber {
    pub fn new(queue: SubscriberQueue, peer: SocketAddr) -> Self {
        Self { queue, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[inline]
    fn is(&self, queue: &SubscriberQueue) -> bool {
        self.queue.same_channel(queue)
    }
}

/// Result of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub delivered: usize,
    /// Subscribers whose queue was full.
    pub dropped: usize,
    /// Subscribers whose queue is already torn down but not yet unregistered.
    pub closed: usize,
}

/// The subscriber set, in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    subscribers: Vec<Subscriber>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `subscriber` and returns the new registry size.
    pub fn register(&mut self, subscriber: Subscriber) -> usize {
        debug!(peer = %subscriber.peer, "Registering subscriber");
        self.subscribers.push(subscriber);
        info!(subscribers = self.subscribers.len(), "Active connection(s)");
        self.subscribers.len()
    }

    /// Removes the entry owning `queue`. An unknown queue is reported and
    /// leaves the registry untouched.
    pub fn unregister(&mut self, queue: &SubscriberQueue) -> Option<Subscriber> {
        let Some(index) = self.subscribers.iter().position(|s| s.is(queue)) else {
            warn!(
                subscribers = self.subscribers.len(),
                "Couldn't find subscriber to unregister"
            );
            return None;
        };

        let removed = self.subscribers.remove(index);
        info!(subscribers = self.subscribers.len(), "Active connection(s)");
        Some(removed)
    }

    /// Offers `line` to every subscriber without waiting on any of them.
    pub fn publish(&self, line: &Bytes) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();
        for subscriber in &self.subscribers {
            match subscriber.queue.try_send(line.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    trace!(peer = %subscriber.peer, "Subscriber queue full, dropping line");
                    outcome.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => outcome.closed += 1,
            }
        }
        outcome
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[derive(Debug)]
enum HubCommand {
    Register(Subscriber),
    Unregister(SubscriberQueue),
    Publish(Bytes),
}

/// Cloneable entry point into the hub's control loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn register(&self, subscriber: Subscriber) -> Result<(), HubError> {
        self.send(HubCommand::Register(subscriber)).await
    }

    pub async fn unregister(&self, queue: SubscriberQueue) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(queue)).await
    }

    pub async fn publish(&self, line: Bytes) -> Result<(), HubError> {
        self.send(HubCommand::Publish(line)).await
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }
}

/// The hub actor. Owns the [`Registry`] exclusively.
pub struct BroadcastHub {
    commands: mpsc::Receiver<HubCommand>,
    registry: Registry,
    metrics: MetricsRecorder,
}

impl BroadcastHub {
    pub fn new(command_capacity: usize, metrics: MetricsRecorder) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(command_capacity.max(1));
        let hub = Self {
            commands: rx,
            registry: Registry::new(),
            metrics,
        };
        (hub, HubHandle { commands: tx })
    }

    /// Creates the hub and runs its control loop on a new task.
    pub fn spawn(command_capacity: usize, metrics: MetricsRecorder) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(command_capacity, metrics);
        (handle, tokio::spawn(hub.run()))
    }

    /// Processes commands until every [`HubHandle`] is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.apply(command);
        }
        info!("Broadcast hub stopped");
    }

    fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(subscriber) => {
                let size = self.registry.register(subscriber);
                self.metrics.active_subscribers.set(size as i64);
            }
            HubCommand::Unregister(queue) => {
                if self.registry.unregister(&queue).is_some() {
                    self.metrics
                        .active_subscribers
                        .set(self.registry.len() as i64);
                }
            }
            HubCommand::Publish(line) => {
                let outcome = self.registry.publish(&line);
                self.metrics.lines_published.inc();
                self.metrics.lines_dropped.inc_by(outcome.dropped as u64);
            }
        }
    }
}
