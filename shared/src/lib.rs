//! # Telemetry Protocol
//!
//! Types shared by the ingestion server and its clients: the binary wire
//! codec, the packet header, the [`Packet`] trait and its [`Registry`], a
//! lock-free object [`pool`], and the built-in telemetry packet types.
//!
//! ## Datagram layout
//!
//! ```text
//! +-------------------+------------------+-------------+-----------------+
//! | auth token        | protocol version | packet id   | packet payload  |
//! | varu32 len + data | u64 LE           | u64 LE      | type specific   |
//! +-------------------+------------------+-------------+-----------------+
//! ```
//!
//! The header is append-only across protocol versions. Payload layouts may
//! change between versions; every packet's `decode` receives the version the
//! client declared so older layouts stay readable.

pub mod codec;
pub mod header;
pub mod packet;
pub mod packets;
pub mod pool;
pub mod registry;

pub use codec::{CodecError, Reader, Writer};
pub use header::{PacketHeader, MIN_HEADER_SIZE};
pub use packet::{Packet, PacketId};
pub use registry::{PacketFactory, Registry, RegistryBuilder, RegistryError};

/// Wire-format version spoken by this build
pub const CURRENT_PROTOCOL_VERSION: u64 = 2;

/// Largest datagram either side will produce or accept, chosen to stay under
/// common path MTUs and avoid IP fragmentation.
pub const MAX_PACKET_SIZE: usize = 1492;
