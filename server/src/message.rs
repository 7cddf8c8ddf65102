//! Pooled unit of work carrying one received datagram
//!
//! A [`Message`] owns a copy of the datagram bytes plus the sender address.
//! It is exclusively owned by whichever stage holds it (listener, queue,
//! worker) and returns to its [`MessagePool`] exactly once: on
//! [`Message::dispose`], or when dropped on any other path, including a
//! panicking handler.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bytes::BytesMut;
use log::trace;
use shared::pool::{Pool, PoolSnapshot, Pooled, Recycle};
use shared::{CodecError, Packet, PacketHeader, Reader, Registry};
use thiserror::Error;

const UNSPECIFIED_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed header: {0}")]
    MalformedHeader(#[source] CodecError),

    #[error("malformed payload for packet {}: {source}", .header.packet_id)]
    MalformedPayload {
        header: PacketHeader,
        #[source]
        source: CodecError,
    },
}

impl DecodeError {
    /// Header decoded before the failure, if decoding got that far
    pub fn header(&self) -> Option<&PacketHeader> {
        match self {
            DecodeError::MalformedHeader(_) => None,
            DecodeError::MalformedPayload { header, .. } => Some(header),
        }
    }
}

/// Result of a structurally valid decode
#[derive(Debug)]
pub struct Decoded {
    pub header: PacketHeader,
    /// `None` when the packet id is not registered
    pub packet: Option<Box<dyn Packet>>,
}

impl Decoded {
    pub fn is_known(&self) -> bool {
        self.packet.is_some()
    }
}

/// Reusable storage behind a [`Message`]
pub struct Datagram {
    buffer: BytesMut,
    sender: SocketAddr,
}

impl Recycle for Datagram {
    fn recycle(&mut self) {
        self.buffer.clear();
        self.sender = UNSPECIFIED_ADDR;
    }
}

/// Shared pool of message buffers
#[derive(Clone)]
pub struct MessagePool {
    pool: Arc<Pool<Datagram>>,
}

impl MessagePool {
    /// `pool_size` idle messages are retained, each starting with
    /// `buffer_capacity` bytes of room.
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        let pool = Pool::new(pool_size, move || Datagram {
            buffer: BytesMut::with_capacity(buffer_capacity),
            sender: UNSPECIFIED_ADDR,
        });
        Self { pool }
    }

    /// Copies `bytes` into a pooled message; the caller may reuse `bytes` at once
    pub fn acquire(&self, bytes: &[u8], sender: SocketAddr) -> Message {
        let mut datagram = self.pool.acquire();
        datagram.buffer.extend_from_slice(bytes);
        datagram.sender = sender;
        Message { datagram }
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }

    pub fn metrics(&self) -> PoolSnapshot {
        self.pool.metrics().snapshot()
    }
}

pub struct Message {
    datagram: Pooled<Datagram>,
}

impl Message {
    pub fn sender(&self) -> SocketAddr {
        self.datagram.sender
    }

    pub fn bytes(&self) -> &[u8] {
        &self.datagram.buffer
    }

    pub fn len(&self) -> usize {
        self.datagram.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datagram.buffer.is_empty()
    }

    /// Decodes the header, looks up its packet id, then decodes the payload
    /// with the client's protocol version.
    pub fn decode(&self, registry: &Registry) -> Result<Decoded, DecodeError> {
        let mut reader = Reader::new(self.bytes());
        let header = PacketHeader::decode(&mut reader).map_err(DecodeError::MalformedHeader)?;

        let Some(mut packet) = registry.find(header.packet_id) else {
            return Ok(Decoded {
                header,
                packet: None,
            });
        };

        if let Err(source) = packet.decode(&mut reader, header.protocol_version) {
            return Err(DecodeError::MalformedPayload { header, source });
        }
        if !reader.is_exhausted() {
            trace!(
                "{} trailing bytes after packet {} from {}",
                reader.remaining(),
                header.packet_id,
                self.sender()
            );
        }

        Ok(Decoded {
            header,
            packet: Some(packet),
        })
    }

    /// Clears the message and hands it back to its pool
    pub fn dispose(self) {
        drop(self);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("sender", &self.sender())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared::packets::{Heartbeat, SessionStats};
    use shared::{Writer, CURRENT_PROTOCOL_VERSION};

    pub(crate) fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    pub(crate) fn datagram(header: &PacketHeader, packet: Option<&dyn Packet>) -> BytesMut {
        let mut buf = BytesMut::new();
        let mut writer = Writer::new(&mut buf);
        header.encode(&mut writer).unwrap();
        if let Some(packet) = packet {
            packet.encode(&mut writer, header.protocol_version).unwrap();
        }
        buf
    }

    pub(crate) fn registry() -> Registry {
        let mut builder = Registry::builder();
        builder
            .register_default::<Heartbeat>()
            .register_default::<SessionStats>();
        builder.build()
    }

    #[test]
    fn test_decode_known_packet() {
        let pool = MessagePool::new(4, 256);
        let heartbeat = Heartbeat {
            sent_at_ms: 1234,
            session_id: 9,
        };
        let header = PacketHeader::new(b"secret".to_vec(), CURRENT_PROTOCOL_VERSION, Heartbeat::ID);
        let bytes = datagram(&header, Some(&heartbeat));

        let msg = pool.acquire(&bytes, addr());
        let decoded = msg.decode(&registry()).unwrap();

        assert_eq!(decoded.header, header);
        let packet = decoded.packet.expect("registered packet");
        assert_eq!(packet.downcast_ref::<Heartbeat>(), Some(&heartbeat));
    }

    #[test]
    fn test_decode_uses_header_version() {
        let pool = MessagePool::new(4, 256);
        let header = PacketHeader::new(Vec::new(), 1, SessionStats::ID);
        let sent = SessionStats {
            player_count: 8,
            tick_rate: 30,
            avg_ping_ms: 25,
        };
        let bytes = datagram(&header, Some(&sent));
        assert_eq!(bytes.len(), shared::MIN_HEADER_SIZE + 8);

        let decoded = pool.acquire(&bytes, addr()).decode(&registry()).unwrap();
        let stats = decoded.packet.unwrap();
        let stats = stats.downcast_ref::<SessionStats>().unwrap();
        assert_eq!((stats.player_count, stats.tick_rate, stats.avg_ping_ms), (8, 30, 0));
    }

    #[test]
    fn test_decode_unknown_packet() {
        let pool = MessagePool::new(4, 256);
        let header = PacketHeader::new(b"secret".to_vec(), 1, 9999);
        let bytes = datagram(&header, None);

        let decoded = pool.acquire(&bytes, addr()).decode(&registry()).unwrap();
        assert!(!decoded.is_known());
        assert_eq!(decoded.header.packet_id, 9999);
        assert_eq!(decoded.header.token_base64(), "c2VjcmV0");
    }

    #[test]
    fn test_decode_truncated_header() {
        let pool = MessagePool::new(4, 256);
        let msg = pool.acquire(&[6, b's', b'e'], addr());

        let err = msg.decode(&registry()).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader(_)));
        assert!(err.header().is_none());
    }

    #[test]
    fn test_decode_truncated_payload() {
        let pool = MessagePool::new(4, 256);
        let header = PacketHeader::new(b"t".to_vec(), 2, Heartbeat::ID);
        let mut bytes = datagram(&header, None);
        bytes.extend_from_slice(&[1, 2, 3]);

        let err = pool.acquire(&bytes, addr()).decode(&registry()).unwrap_err();
        assert_eq!(err.header().map(|h| h.packet_id), Some(Heartbeat::ID));
    }

    #[test]
    fn test_message_copies_input() {
        let pool = MessagePool::new(4, 256);
        let mut scratch = vec![1u8, 2, 3];

        let msg = pool.acquire(&scratch, addr());
        scratch.copy_from_slice(&[9, 9, 9]);

        assert_eq!(msg.bytes(), &[1, 2, 3]);
        assert_eq!(msg.sender(), addr());
    }

    #[test]
    fn test_dispose_then_reuse_has_no_residue() {
        let pool = MessagePool::new(1, 64);

        let first = pool.acquire(b"a much longer first datagram", addr());
        first.dispose();
        assert_eq!(pool.available(), 1);

        let other: SocketAddr = "10.0.0.2:5000".parse().unwrap();
        let second = pool.acquire(b"short", other);
        assert_eq!(second.bytes(), b"short");
        assert_eq!(second.sender(), other);

        let metrics = pool.metrics();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hits, 1);
    }

    #[test]
    fn test_drop_returns_to_pool() {
        let pool = MessagePool::new(2, 64);
        {
            let _msg = pool.acquire(b"abc", addr());
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.metrics().returns, 1);
    }
}
