//! # Connection Manager
//!
//! Accepts subscriber connections and ties each one to a bounded outbound
//! queue registered with the broadcast hub.
//!
//! Every connection owns exactly two tasks:
//! - the connection task, which waits for one byte (or EOF) from the peer
//! - the drain task, which writes queued lines under a per-write deadline
//!
//! Whichever finishes first tears the connection down: one unregister,
//! then the socket and the queue are released.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, info_span, warn, Instrument};

use cransim_config::ServerConfig;
use cransim_core::hub::{HubHandle, Subscriber};
use cransim_telemetry::MetricsRecorder;

use crate::error::EngineError;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
struct Delivery {
    queue_capacity: usize,
    write_timeout: Duration,
}

pub struct ConnectionManager {
    listener: TcpListener,
    hub: HubHandle,
    metrics: MetricsRecorder,
    delivery: Delivery,
}

impl ConnectionManager {
    /// Binds the subscriber listener. Failure here is fatal for the process.
    pub async fn bind(
        config: &ServerConfig,
        hub: HubHandle,
        metrics: MetricsRecorder,
    ) -> Result<Self, EngineError> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|source| EngineError::Bind {
                addr: config.bind.clone(),
                source,
            })?;

        Ok(Self {
            listener,
            hub,
            metrics,
            delivery: Delivery {
                queue_capacity: config.queue_capacity.max(1),
                write_timeout: config.write_timeout(),
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "Listening for subscribers"),
            Err(err) => warn!(error = %err, "Listening on unknown address"),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    self.metrics.connections.inc();
                    let hub = self.hub.clone();
                    let delivery = self.delivery;
                    tokio::spawn(
                        serve_subscriber(stream, peer, hub, delivery)
                            .instrument(info_span!("subscriber", %peer)),
                    );
                }
                Err(err) => {
                    warn!(error = %err, "Accept failed");
                    sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
}

async fn serve_subscriber(stream: TcpStream, peer: SocketAddr, hub: HubHandle, delivery: Delivery) {
    info!("Connection opened");

    let (queue, pending) = mpsc::channel(delivery.queue_capacity);
    if hub.register(Subscriber::new(queue.clone(), peer)).await.is_err() {
        warn!("Broadcast hub closed, refusing connection");
        return;
    }

    let (mut reader, writer) = stream.into_split();
    let mut drain =
        tokio::spawn(drain_queue(pending, writer, delivery.write_timeout).in_current_span());

    let mut probe = [0u8; 1];
    tokio::select! {
        read = reader.read(&mut probe) => match read {
            Ok(0) => debug!("Peer closed the connection"),
            Ok(_) => debug!("Peer requested disconnect"),
            Err(err) => debug!(error = %err, "Read failed"),
        },
        _ = &mut drain => debug!("Writer stopped"),
    }

    if hub.unregister(queue).await.is_err() {
        warn!("Broadcast hub closed before unregister");
    }
    drain.abort();
    info!("Connection closed");
}

/// Writes queued lines until the queue closes, a write fails or a write
/// misses its deadline.
async fn drain_queue(
    mut pending: mpsc::Receiver<Bytes>,
    mut writer: OwnedWriteHalf,
    write_timeout: Duration,
) {
    while let Some(line) = pending.recv().await {
        match timeout(write_timeout, writer.write_all(&line)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(error = %err, "Write failed");
                return;
            }
            Err(_) => {
                warn!(timeout = ?write_timeout, "Write deadline exceeded");
                return;
            }
        }
    }
}
