//! Collector — owns the UDP socket and the ingestion loop.
//!
//! One task reads the socket sequentially into a reused buffer. Every
//! datagram is copied out and handed to its own task, so slow sinks never
//! hold up the next read. There is no ordering between datagrams.
//!
//! By default the number of in-flight datagram tasks is unbounded: a flood
//! of traffic becomes a flood of concurrent sink writes. `max_in_flight`
//! caps it, dropping datagrams (with a warning) once the cap is reached
//! rather than blocking the read path.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;

use loralogger_core::config::CollectorConfig;
use loralogger_core::wire::MAX_DATAGRAM;
use loralogger_services::{GatewayRegistry, SinkChain};

use crate::pipeline::{self, Datagram};

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("resolve udp addr {bind:?}: {source}")]
    Resolve {
        bind: String,
        #[source]
        source: std::io::Error,
    },

    #[error("udp addr {0:?} resolved to nothing")]
    NoAddress(String),

    #[error("max_in_flight {0} exceeds the limit of {}", Semaphore::MAX_PERMITS)]
    InFlightLimit(usize),

    #[error("listen udp {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("ingestion task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Counters shared with the ingestion loop.
#[derive(Default)]
struct Stats {
    received: AtomicU64,
    dropped: AtomicU64,
}

/// A running collector. Stop it with [`Collector::close`].
///
/// Dropping it without `close` also ends the ingestion loop, but nothing
/// waits for it.
pub struct Collector {
    local_addr: SocketAddr,
    gateways: GatewayRegistry,
    closed: Arc<AtomicBool>,
    stats: Arc<Stats>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl Collector {
    /// Bind the configured address and start ingesting.
    pub async fn new(config: &CollectorConfig, sinks: SinkChain) -> Result<Self, CollectorError> {
        if config.max_in_flight > Semaphore::MAX_PERMITS {
            return Err(CollectorError::InFlightLimit(config.max_in_flight));
        }

        let addr = tokio::net::lookup_host(config.bind.as_str())
            .await
            .map_err(|e| CollectorError::Resolve {
                bind: config.bind.clone(),
                source: e,
            })?
            .next()
            .ok_or_else(|| CollectorError::NoAddress(config.bind.clone()))?;

        tracing::info!(addr = %addr, "starting listener");
        let socket = make_socket(addr, config.recv_buffer_bytes)
            .map_err(|e| CollectorError::Bind { addr, source: e })?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| CollectorError::Bind { addr, source: e })?;

        let limiter = (config.max_in_flight > 0).then(|| Arc::new(Semaphore::new(config.max_in_flight)));
        let closed = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Stats::default());
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let ingest = Ingest {
            socket,
            sinks: Arc::new(sinks),
            limiter,
            closed: closed.clone(),
            stats: stats.clone(),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(ingest.run());

        Ok(Self {
            local_addr,
            gateways: GatewayRegistry::new(),
            closed,
            stats,
            shutdown,
            task,
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Gateway address registry, for a downlink path. The ingestion loop
    /// does not populate it.
    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    /// Datagrams read from the socket so far.
    pub fn received(&self) -> u64 {
        self.stats.received.load(Ordering::Relaxed)
    }

    /// Datagrams dropped because `max_in_flight` was reached.
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Stop reading and release the socket.
    ///
    /// Waits for the ingestion loop to exit. Datagram tasks already
    /// spawned keep running and may finish after this returns.
    pub async fn close(self) -> Result<(), CollectorError> {
        self.closed.store(true, Ordering::Release);
        tracing::info!("closing listener");
        // The loop may already be gone; that is fine.
        let _ = self.shutdown.send(());
        self.task.await?;
        Ok(())
    }
}

/// The ingestion loop and everything it owns.
struct Ingest {
    socket: UdpSocket,
    sinks: Arc<SinkChain>,
    limiter: Option<Arc<Semaphore>>,
    closed: Arc<AtomicBool>,
    stats: Arc<Stats>,
    shutdown: broadcast::Receiver<()>,
}

impl Ingest {
    async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    tracing::debug!("ingestion loop shutting down");
                    return;
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, addr) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            if self.closed.load(Ordering::Acquire) {
                                return;
                            }
                            tracing::error!(error = %e, "read from udp error");
                            continue;
                        }
                    };
                    self.stats.received.fetch_add(1, Ordering::Relaxed);

                    let datagram = Datagram {
                        addr,
                        data: Bytes::copy_from_slice(&buf[..len]),
                    };
                    self.dispatch(datagram);
                }
            }
        }
    }

    fn dispatch(&self, datagram: Datagram) {
        let permit = match &self.limiter {
            None => None,
            Some(limiter) => match limiter.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(addr = %datagram.addr, "too many packets in flight, dropping");
                    return;
                }
            },
        };

        let sinks = self.sinks.clone();
        tokio::spawn(async move {
            let _permit = permit;
            pipeline::process(datagram, &sinks).await;
        });
    }
}

/// Build a non-blocking UDP socket bound to `addr`.
fn make_socket(addr: SocketAddr, recv_buffer_bytes: usize) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if recv_buffer_bytes > 0 {
        socket.set_recv_buffer_size(recv_buffer_bytes)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}
