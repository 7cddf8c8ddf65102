use shared::{Packet, PacketHeader};
use std::net::SocketAddr;
use std::sync::Arc;

/// Error returned by a handler; logged by the worker, never fatal
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked once per decoded packet, in registration order
///
/// Handlers are synchronous. On a multi-threaded runtime workers run them via
/// `block_in_place`, so short blocking calls are tolerated; on a
/// current-thread runtime a blocking handler stalls the listener too and
/// should hand slow work to a task or channel instead.
pub type PacketHandler =
    Arc<dyn Fn(SocketAddr, &PacketHeader, &dyn Packet) -> Result<(), HandlerError> + Send + Sync>;

/// Wraps a closure as a [`PacketHandler`]
pub fn packet_handler<F>(f: F) -> PacketHandler
where
    F: Fn(SocketAddr, &PacketHeader, &dyn Packet) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}
