use std::any::Any;
use std::fmt;

use crate::codec::{CodecError, Reader, Writer};

/// Numeric discriminator selecting which packet type a payload decodes as
pub type PacketId = u64;

/// A telemetry payload that can travel after a [`PacketHeader`](crate::PacketHeader)
///
/// `id()` must return the same value for every instance of a type, and no two
/// registered types may share an id. Both `encode` and `decode` receive the
/// protocol version the client speaks, so older layouts stay writable and
/// readable: `decode(encode(p, v), v)` must yield `p` for every supported `v`.
pub trait Packet: Any + Send + Sync + fmt::Debug {
    fn id(&self) -> PacketId;

    fn encode(&self, writer: &mut Writer<'_>, protocol_version: u64) -> Result<(), CodecError>;

    fn decode(&mut self, reader: &mut Reader<'_>, protocol_version: u64)
        -> Result<(), CodecError>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn Packet {
    /// Returns the concrete packet if it is of type `T`
    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Packet>(&self) -> bool {
        self.as_any().is::<T>()
    }
}
