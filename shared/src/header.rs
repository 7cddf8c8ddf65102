//! Fixed-shape prefix carried by every telemetry datagram
//!
//! Wire layout, in order:
//! - auth token (`varu32` length + bytes)
//! - protocol version (`u64`, little-endian)
//! - packet id (`u64`, little-endian)
//!
//! The layout is append-only: existing fields never change their encoding so
//! that clients on any protocol version can be read by any server.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::BytesMut;

use crate::codec::{CodecError, Reader, Writer};
use crate::packet::{Packet, PacketId};

/// Smallest possible encoded header: empty token plus two `u64` fields.
pub const MIN_HEADER_SIZE: usize = 1 + 8 + 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketHeader {
    /// Opaque credential checked by the server's token verifier
    pub auth_token: Vec<u8>,
    /// Wire-format version the client encoded its payload with
    pub protocol_version: u64,
    /// Selects the packet type the payload decodes as
    pub packet_id: PacketId,
}

impl PacketHeader {
    pub fn new(auth_token: impl Into<Vec<u8>>, protocol_version: u64, packet_id: PacketId) -> Self {
        Self {
            auth_token: auth_token.into(),
            protocol_version,
            packet_id,
        }
    }

    /// Builds a header whose packet id matches `packet`
    pub fn for_packet(
        auth_token: impl Into<Vec<u8>>,
        protocol_version: u64,
        packet: &dyn Packet,
    ) -> Self {
        Self::new(auth_token, protocol_version, packet.id())
    }

    pub fn encode(&self, writer: &mut Writer<'_>) -> Result<(), CodecError> {
        writer.byte_slice(&self.auth_token)?;
        writer.u64(self.protocol_version);
        writer.u64(self.packet_id);
        Ok(())
    }

    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let auth_token = reader.byte_slice()?;
        let protocol_version = reader.u64()?;
        let packet_id = reader.u64()?;
        Ok(Self {
            auth_token,
            protocol_version,
            packet_id,
        })
    }

    /// Convenience for tests and tools that need the header alone
    pub fn to_bytes(&self) -> Result<BytesMut, CodecError> {
        let mut buf = BytesMut::with_capacity(MIN_HEADER_SIZE + self.auth_token.len());
        self.encode(&mut Writer::new(&mut buf))?;
        Ok(buf)
    }

    /// Standard base64 of the auth token, used in diagnostic logs
    pub fn token_base64(&self) -> String {
        STANDARD.encode(&self.auth_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = PacketHeader::new(b"secret".to_vec(), 1, 42);
        let bytes = header.to_bytes().unwrap();

        let mut expected = vec![6u8];
        expected.extend_from_slice(b"secret");
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&42u64.to_le_bytes());
        assert_eq!(&bytes[..], &expected[..]);
    }

    #[test]
    fn test_header_decode_leaves_payload() {
        let header = PacketHeader::new(b"tok".to_vec(), 3, 7);
        let mut bytes = header.to_bytes().unwrap();
        bytes.extend_from_slice(&[0xaa, 0xbb]);

        let mut reader = Reader::new(&bytes);
        let decoded = PacketHeader::decode(&mut reader).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(reader.remaining(), 2);
    }

    #[test]
    fn test_empty_token_is_minimum_size() {
        let header = PacketHeader::new(Vec::new(), 0, 0);
        assert_eq!(header.to_bytes().unwrap().len(), MIN_HEADER_SIZE);
    }

    #[test]
    fn test_truncated_header_fails() {
        let header = PacketHeader::new(b"secret".to_vec(), 1, 42);
        let bytes = header.to_bytes().unwrap();

        for cut in 0..bytes.len() {
            let mut reader = Reader::new(&bytes[..cut]);
            assert!(
                matches!(
                    PacketHeader::decode(&mut reader),
                    Err(CodecError::UnexpectedEof { .. })
                ),
                "header cut at {} bytes decoded",
                cut
            );
        }
    }

    #[test]
    fn test_token_base64() {
        let header = PacketHeader::new(b"secret".to_vec(), 1, 9999);
        assert_eq!(header.token_base64(), "c2VjcmV0");
        assert_eq!(PacketHeader::default().token_base64(), "");
    }
}
