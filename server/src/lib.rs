//! # Telemetry Ingestion Server
//!
//! Receive-only UDP server for game telemetry. Clients fire independent
//! datagrams at it; each carries a small header (auth token, protocol version,
//! packet id) followed by a packet payload. The server decodes every datagram
//! with the packet type registered for its id and hands the result to
//! user-supplied handlers.
//!
//! ## Core Responsibilities
//!
//! ### Ingestion
//! A single listener task owns the socket and reads one datagram at a time.
//! The bytes are copied into a pooled [`message::Message`] so the read buffer
//! can be reused immediately, then pushed onto a bounded dispatch queue.
//!
//! ### Backpressure
//! When the queue is full the listener waits up to the configured timeout for
//! a free slot. If none frees up the datagram is dropped, logged and counted;
//! the listener never blocks indefinitely.
//!
//! ### Dispatch
//! A fixed pool of workers drains the queue. Each message is decoded, its
//! token optionally verified, and then passed to every registered handler in
//! registration order.
//!
//! ## Failure Isolation
//!
//! - Malformed and unknown packets are logged with sender, packet id and
//!   base64 token, then discarded.
//! - A handler returning an error does not stop the remaining handlers.
//! - A panicking handler only loses the message it was processing; the worker
//!   keeps running. If a worker's loop dies anyway it is respawned.
//!
//! ## Module Organization
//!
//! - [`config`]: `ServerConfig` with defaults for every tunable
//! - [`network`]: `Server` lifecycle and the listener loop
//! - [`queue`]: bounded multi-consumer dispatch queue
//! - [`message`]: pooled message and decoding
//! - [`worker`]: dispatcher, supervised workers
//! - [`handler`]: handler signature
//! - [`auth`]: token verification hook
//! - [`stats`]: ingestion counters
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use shared::packets::{register_builtin, Heartbeat};
//! use shared::Registry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut builder = Registry::builder();
//!     register_builtin(&mut builder);
//!
//!     let mut server = Server::bind(ServerConfig::default(), Arc::new(builder.build())).await?;
//!     server.add_handler(|sender, _header, packet| {
//!         if let Some(heartbeat) = packet.downcast_ref::<Heartbeat>() {
//!             println!("heartbeat from {}: session {}", sender, heartbeat.session_id);
//!         }
//!         Ok(())
//!     });
//!
//!     server
//!         .run_until_shutdown(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod handler;
pub mod message;
pub mod network;
pub mod queue;
pub mod stats;
pub mod worker;

pub use config::ServerConfig;
pub use handler::{packet_handler, HandlerError, PacketHandler};
pub use network::{Server, ServerError, ServerState};
pub use stats::StatsSnapshot;
