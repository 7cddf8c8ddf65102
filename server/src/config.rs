use serde::{Deserialize, Serialize};
use shared::MAX_PACKET_SIZE;
use std::time::Duration;

/// Dispatch queue capacity, large enough to absorb bursts from many clients.
pub const DEFAULT_QUEUE_CAPACITY: usize = 65_535;

/// How long the listener waits for queue space before dropping a datagram.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle messages kept around for reuse.
pub const DEFAULT_MESSAGE_POOL_SIZE: usize = 1024;

/// Server construction options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the UDP socket to
    pub host: String,
    /// UDP port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Number of concurrent workers; 0 uses the available parallelism
    pub workers: usize,
    pub queue_capacity: usize,
    pub queue_timeout: Duration,
    /// Datagrams longer than this are discarded by the listener
    pub max_packet_size: usize,
    pub message_pool_size: usize,
    /// Shared secret for the bundled token verifier, if any
    pub auth_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            max_packet_size: MAX_PACKET_SIZE,
            message_pool_size: DEFAULT_MESSAGE_POOL_SIZE,
            auth_secret: None,
        }
    }
}

impl ServerConfig {
    /// Loopback config on an ephemeral port, handy for tests and tools
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolves `workers == 0` to the machine's available parallelism
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
