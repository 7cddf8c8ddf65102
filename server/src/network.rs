//! Server network layer: UDP listener and lifecycle
//!
//! The [`Server`] owns the socket. A single listener task reads datagrams into
//! a reusable scratch buffer, copies each into a pooled [`Message`] and pushes
//! it onto the dispatch queue with a bounded wait. Workers drain the queue.
//!
//! Lifecycle: `Created` (socket bound) → `Running` → `Stopped`. Handlers and
//! the token verifier can only be installed while `Created`; afterwards the
//! handler list is frozen and read by workers without locking.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use shared::{Packet, PacketHeader, Registry};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::{SharedSecretVerifier, TokenVerifier};
use crate::config::ServerConfig;
use crate::handler::{HandlerError, PacketHandler};
use crate::message::{Message, MessagePool};
use crate::queue::{dispatch_queue, PushError, QueueSender};
use crate::stats::{IngestStats, StatsSnapshot};
use crate::worker::{Dispatcher, WorkerPool};

/// Back-off after a failed socket read.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Created => "created",
            ServerState::Running => "running",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Receive-only telemetry server
pub struct Server {
    config: ServerConfig,
    socket: Arc<UdpSocket>,
    registry: Arc<Registry>,
    handlers: Vec<PacketHandler>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    stats: Arc<IngestStats>,
    state: ServerState,
    shutdown: watch::Sender<bool>,
    listener: Option<JoinHandle<()>>,
    workers: Option<WorkerPool>,
}

impl Server {
    /// Binds the UDP socket; the server starts out `Created`
    ///
    /// If the config carries an `auth_secret`, a [`SharedSecretVerifier`] is
    /// installed. It can be replaced with [`Server::set_verifier`].
    pub async fn bind(config: ServerConfig, registry: Arc<Registry>) -> Result<Self, ServerError> {
        let addr = config.bind_address();
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", socket.local_addr()?);

        let verifier = config
            .auth_secret
            .as_ref()
            .map(|secret| Arc::new(SharedSecretVerifier::new(secret.as_bytes())) as Arc<dyn TokenVerifier>);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            socket: Arc::new(socket),
            registry,
            handlers: Vec::new(),
            verifier,
            stats: Arc::new(IngestStats::new()),
            state: ServerState::Created,
            shutdown,
            listener: None,
            workers: None,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared handle to the live counters, e.g. for a periodic reporter
    pub fn stats_handle(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Adds a handler invoked for every decoded packet
    ///
    /// # Panics
    ///
    /// Panics unless the server is still `Created`.
    pub fn add_handler<F>(&mut self, handler: F)
    where
        F: Fn(SocketAddr, &PacketHeader, &dyn Packet) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.add_packet_handler(Arc::new(handler));
    }

    /// Same as [`Server::add_handler`] for an already shared handler
    pub fn add_packet_handler(&mut self, handler: PacketHandler) {
        if self.state != ServerState::Created {
            panic!("cannot add packet handler when server is {}", self.state);
        }
        self.handlers.push(handler);
    }

    /// Replaces the token verifier
    ///
    /// # Panics
    ///
    /// Panics unless the server is still `Created`.
    pub fn set_verifier(&mut self, verifier: Arc<dyn TokenVerifier>) {
        if self.state != ServerState::Created {
            panic!("cannot set token verifier when server is {}", self.state);
        }
        self.verifier = Some(verifier);
    }

    /// Spawns the workers and the listener; `Created → Running`
    ///
    /// # Panics
    ///
    /// Panics if the server was already started. Must be called from within a
    /// Tokio runtime.
    pub fn start(&mut self) {
        if self.state != ServerState::Created {
            panic!("server is already {}", self.state);
        }
        self.state = ServerState::Running;

        let (queue_tx, queue_rx) = dispatch_queue(self.config.queue_capacity);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.registry),
            std::mem::take(&mut self.handlers),
            self.verifier.clone(),
            Arc::clone(&self.stats),
        ));
        let worker_count = self.config.worker_count();
        debug!(
            "starting with {} handlers and {} packet types",
            dispatcher.handler_count(),
            self.registry.len()
        );

        self.workers = Some(WorkerPool::spawn(
            worker_count,
            queue_rx,
            dispatcher,
            Arc::clone(&self.stats),
        ));

        let listener = Listener {
            socket: Arc::clone(&self.socket),
            queue: queue_tx,
            pool: MessagePool::new(self.config.message_pool_size, self.config.max_packet_size),
            queue_timeout: self.config.queue_timeout,
            max_packet_size: self.config.max_packet_size,
            stats: Arc::clone(&self.stats),
        };
        self.listener = Some(tokio::spawn(listener.run(self.shutdown.subscribe())));

        info!("Server started successfully with {} workers", worker_count);
    }

    /// Stops reading and closes the queue; workers finish what is buffered
    ///
    /// # Panics
    ///
    /// Panics unless the server is `Running`.
    pub fn stop(&mut self) {
        if self.state != ServerState::Running {
            panic!("cannot stop server when it is {}", self.state);
        }
        self.state = ServerState::Stopped;
        self.shutdown.send_replace(true);
        info!("Server shutting down");
    }

    /// Waits for the listener and all workers to exit after [`Server::stop`]
    pub async fn wait(&mut self) {
        if let Some(listener) = self.listener.take() {
            if let Err(err) = listener.await {
                error!("listener task failed: {}", err);
            }
        }
        if let Some(workers) = self.workers.take() {
            workers.join().await;
        }
        info!("Server stopped: {}", self.stats.snapshot());
    }

    /// Starts, runs until `signal` completes, then stops and drains
    pub async fn run_until_shutdown<S>(&mut self, signal: S)
    where
        S: Future<Output = ()>,
    {
        self.start();
        signal.await;
        self.stop();
        self.wait().await;
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// State owned by the listener task
struct Listener {
    socket: Arc<UdpSocket>,
    queue: QueueSender<Message>,
    pool: MessagePool,
    queue_timeout: Duration,
    max_packet_size: usize,
    stats: Arc<IngestStats>,
}

impl Listener {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // One spare byte to tell a datagram of exactly `max_packet_size` from
        // one the kernel truncated.
        let mut scratch = vec![0u8; self.max_packet_size + 1];

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.socket.recv_from(&mut scratch) => received,
            };

            let (len, sender) = match received {
                Ok(received) => received,
                Err(err) => {
                    self.stats.record_read_error();
                    error!("failed to read datagram: {}", err);
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                    continue;
                }
            };
            self.stats.record_received();

            if len > self.max_packet_size {
                self.stats.record_oversized();
                warn!(
                    "dropping oversized datagram from {} (more than {} bytes)",
                    sender, self.max_packet_size
                );
                continue;
            }

            let msg = self.pool.acquire(&scratch[..len], sender);
            let pushed = tokio::select! {
                // Dropping the pending push releases the message back to its pool.
                _ = shutdown.changed() => {
                    self.stats.record_dropped();
                    debug!(
                        "shutting down while waiting for queue space, dropping message from {}",
                        sender
                    );
                    break;
                }
                pushed = self.queue.push(msg, self.queue_timeout) => pushed,
            };
            match pushed {
                Ok(()) => {}
                Err(PushError::Saturated(msg)) => {
                    self.stats.record_dropped();
                    warn!(
                        "failed to push message from {} into queue: saturated for {:?}",
                        msg.sender(),
                        self.queue_timeout
                    );
                    msg.dispose();
                }
                Err(PushError::Closed(msg)) => {
                    error!("dispatch queue closed, dropping message from {}", msg.sender());
                    msg.dispose();
                    break;
                }
            }
        }

        self.queue.close();
        debug!("listener stopped, dispatch queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::tests::{datagram, registry};
    use shared::packets::Heartbeat;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    async fn test_server() -> Server {
        let config = ServerConfig {
            workers: 1,
            ..ServerConfig::local()
        };
        Server::bind(config, Arc::new(Registry::builder().build()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_assigns_port() {
        let server = test_server().await;
        assert_eq!(server.state(), ServerState::Created);
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = test_server().await;
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..ServerConfig::local()
        };
        let err = Server::bind(config, Arc::new(Registry::builder().build()))
            .await
            .err()
            .expect("bind must fail");
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut server = test_server().await;
        server.add_handler(|_, _, _| Ok(()));

        server.start();
        assert_eq!(server.state(), ServerState::Running);

        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
        server.wait().await;
    }

    #[tokio::test]
    async fn test_add_handler_after_start_panics() {
        let mut server = test_server().await;
        server.start();

        let result = catch_unwind(AssertUnwindSafe(|| server.add_handler(|_, _, _| Ok(()))));
        assert!(result.is_err());
        assert_eq!(server.state(), ServerState::Running);

        server.stop();
        server.wait().await;
    }

    #[tokio::test]
    async fn test_second_start_panics() {
        let mut server = test_server().await;
        server.start();

        let result = catch_unwind(AssertUnwindSafe(|| server.start()));
        assert!(result.is_err());
        assert_eq!(server.state(), ServerState::Running);

        server.stop();
        server.wait().await;
    }

    #[tokio::test]
    async fn test_stop_twice_panics() {
        let mut server = test_server().await;
        server.start();
        server.stop();

        let result = catch_unwind(AssertUnwindSafe(|| server.stop()));
        assert!(result.is_err());
        assert_eq!(server.state(), ServerState::Stopped);
        server.wait().await;
    }

    #[tokio::test]
    #[should_panic(expected = "cannot stop server when it is created")]
    async fn test_stop_before_start_panics() {
        let mut server = test_server().await;
        server.stop();
    }

    #[tokio::test]
    async fn test_set_verifier_after_start_panics() {
        let mut server = test_server().await;
        server.start();

        let verifier: Arc<dyn TokenVerifier> = Arc::new(SharedSecretVerifier::new("x"));
        let result = catch_unwind(AssertUnwindSafe(|| server.set_verifier(verifier)));
        assert!(result.is_err());

        server.stop();
        server.wait().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_interrupts_blocked_push() {
        let config = ServerConfig {
            workers: 1,
            queue_capacity: 1,
            queue_timeout: Duration::from_secs(60),
            ..ServerConfig::local()
        };
        let mut server = Server::bind(config, Arc::new(registry())).await.unwrap();
        server.add_handler(|_, _, _| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        });
        server.start();

        let target = SocketAddr::from(([127, 0, 0, 1], server.local_addr().unwrap().port()));
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let header = PacketHeader::new(Vec::new(), 2, Heartbeat::ID);
        let bytes = datagram(&header, Some(&Heartbeat::default()));
        for _ in 0..3 {
            socket.send_to(&bytes, target).await.unwrap();
        }

        // One message in the handler, one queued, one waiting for space.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while server.stats().received < 3 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(server.stats().received, 3);

        server.stop();
        tokio::time::timeout(Duration::from_secs(5), server.wait())
            .await
            .expect("stop must not wait for the queue timeout");

        let stats = server.stats();
        assert_eq!(stats.dropped + stats.dispatched, 3);
        assert!(stats.dispatched >= 2);
    }

    #[tokio::test]
    async fn test_run_until_drains() {
        let mut server = test_server().await;
        server.run_until_shutdown(async {}).await;
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.stats(), StatsSnapshot::default());
    }
}
