//! Encoding and sending of telemetry datagrams
//!
//! [`PacketSender`] writes the header and payload into a pooled buffer,
//! enforces the datagram size limit and performs a single `send_to`. Buffers
//! go back to the pool after a successful send; a buffer that grew past the
//! limit is discarded so the pool only ever holds right-sized buffers.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::{debug, trace};
use shared::pool::{Pool, PoolSnapshot, Pooled};
use shared::{CodecError, Packet, PacketHeader, PacketId, Writer};
use thiserror::Error;
use tokio::net::UdpSocket;

/// Idle encode buffers kept by a sender
const BUFFER_POOL_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("packet {id} encodes to {size} bytes, limit is {max}")]
    PacketTooLarge { id: PacketId, size: usize, max: usize },

    #[error("short write: sent {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    #[error("header declares packet {header} but payload is packet {packet}")]
    PacketIdMismatch { header: PacketId, packet: PacketId },

    #[error("encode error: {0}")]
    Codec(#[from] CodecError),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct PacketSender {
    max_packet_size: usize,
    buffers: Arc<Pool<BytesMut>>,
}

impl PacketSender {
    pub fn new(max_packet_size: usize) -> Self {
        let buffers = Pool::new(BUFFER_POOL_SIZE, move || BytesMut::with_capacity(max_packet_size));
        Self {
            max_packet_size,
            buffers,
        }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Encodes header and payload into a standalone datagram
    pub fn encode(&self, header: &PacketHeader, packet: &dyn Packet) -> Result<Bytes, SendError> {
        let buf = self.encode_pooled(header, packet)?;
        Ok(Bytes::copy_from_slice(&buf))
    }

    /// Encodes and sends one datagram to `to`, returning the bytes written
    pub async fn send(
        &self,
        socket: &UdpSocket,
        to: SocketAddr,
        header: &PacketHeader,
        packet: &dyn Packet,
    ) -> Result<usize, SendError> {
        let buf = self.encode_pooled(header, packet)?;
        let expected = buf.len();

        let written = socket.send_to(&buf, to).await?;
        if written != expected {
            return Err(SendError::ShortWrite { expected, written });
        }

        trace!("sent packet {} ({} bytes) to {}", header.packet_id, written, to);
        Ok(written)
    }

    pub fn buffer_metrics(&self) -> PoolSnapshot {
        self.buffers.metrics().snapshot()
    }

    fn encode_pooled(
        &self,
        header: &PacketHeader,
        packet: &dyn Packet,
    ) -> Result<Pooled<BytesMut>, SendError> {
        if header.packet_id != packet.id() {
            return Err(SendError::PacketIdMismatch {
                header: header.packet_id,
                packet: packet.id(),
            });
        }

        let mut buf = self.buffers.acquire();
        {
            let mut writer = Writer::new(&mut buf);
            header.encode(&mut writer)?;
            packet.encode(&mut writer, header.protocol_version)?;
        }

        let size = buf.len();
        if size > self.max_packet_size {
            debug!(
                "discarding {} byte buffer for oversized packet {}",
                buf.capacity(),
                header.packet_id
            );
            buf.discard();
            return Err(SendError::PacketTooLarge {
                id: header.packet_id,
                size,
                max: self.max_packet_size,
            });
        }

        Ok(buf)
    }
}
