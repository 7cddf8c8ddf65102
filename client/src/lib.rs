//! # Telemetry Client Library
//!
//! Client side of the telemetry ingestion protocol. Game processes use it to
//! fire telemetry datagrams at an ingestion server without waiting for any
//! reply.
//!
//! ## Module Organization
//!
//! ### Sender Module (`sender`)
//! Encodes header and payload into pooled buffers and writes exactly one
//! datagram per packet:
//! - Size limit enforcement before anything touches the socket
//! - Header/payload packet id consistency check
//! - Short-write detection
//!
//! ### Network Module (`network`)
//! `TelemetryClient` binds a local socket and remembers the server address,
//! auth token and protocol version so callers only hand over packets.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::TelemetryClient;
//! use shared::packets::Heartbeat;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TelemetryClient::new("127.0.0.1:8080", "secret").await?;
//!     client
//!         .send(&Heartbeat {
//!             sent_at_ms: 0,
//!             session_id: 1,
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod sender;

pub use network::TelemetryClient;
pub use sender::{PacketSender, SendError};
