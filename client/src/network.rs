use crate::sender::{PacketSender, SendError};
use log::info;
use shared::{Packet, PacketHeader, CURRENT_PROTOCOL_VERSION, MAX_PACKET_SIZE};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Fire-and-forget telemetry client bound to one server address
pub struct TelemetryClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    auth_token: Vec<u8>,
    protocol_version: u64,
    sender: PacketSender,
}

impl TelemetryClient {
    pub async fn new(
        server_addr: &str,
        auth_token: impl Into<Vec<u8>>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let server_addr: SocketAddr = server_addr.parse()?;
        let bind_addr = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        info!(
            "Telemetry client bound to {}, sending to {}",
            socket.local_addr()?,
            server_addr
        );

        Ok(TelemetryClient {
            socket,
            server_addr,
            auth_token: auth_token.into(),
            protocol_version: CURRENT_PROTOCOL_VERSION,
            sender: PacketSender::new(MAX_PACKET_SIZE),
        })
    }

    /// Speak an older protocol version, e.g. to exercise compatibility paths
    pub fn with_protocol_version(mut self, protocol_version: u64) -> Self {
        self.protocol_version = protocol_version;
        self
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn protocol_version(&self) -> u64 {
        self.protocol_version
    }

    /// Sends `packet` with this client's token and protocol version
    pub async fn send(&self, packet: &dyn Packet) -> Result<usize, SendError> {
        let header =
            PacketHeader::for_packet(self.auth_token.clone(), self.protocol_version, packet);
        self.sender
            .send(&self.socket, self.server_addr, &header, packet)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::packets::SessionStats;
    use shared::Reader;

    #[tokio::test]
    async fn test_send_uses_token_and_version() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let client = TelemetryClient::new(&addr, "token")
            .await
            .unwrap()
            .with_protocol_version(1);

        let stats = SessionStats {
            player_count: 4,
            tick_rate: 60,
            avg_ping_ms: 35,
        };
        let written = tokio_test::assert_ok!(client.send(&stats).await);

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, written);
        let mut reader = Reader::new(&buf[..len]);
        let header = PacketHeader::decode(&mut reader).unwrap();
        assert_eq!(header.auth_token, b"token");
        assert_eq!(header.protocol_version, 1);
        assert_eq!(header.packet_id, SessionStats::ID);

        // Version 1 layout: player count and tick rate only.
        assert_eq!(reader.remaining(), 8);
        let mut decoded = SessionStats::default();
        decoded.decode(&mut reader, header.protocol_version).unwrap();
        assert!(reader.is_exhausted());
        assert_eq!((decoded.player_count, decoded.tick_rate, decoded.avg_ping_ms), (4, 60, 0));
    }

    #[tokio::test]
    async fn test_current_version_sends_full_layout() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let client = TelemetryClient::new(&addr, "token").await.unwrap();

        let stats = SessionStats {
            player_count: 4,
            tick_rate: 60,
            avg_ping_ms: 35,
        };
        tokio_test::assert_ok!(client.send(&stats).await);

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        let mut reader = Reader::new(&buf[..len]);
        let header = PacketHeader::decode(&mut reader).unwrap();
        assert_eq!(header.protocol_version, CURRENT_PROTOCOL_VERSION);
        assert_eq!(reader.remaining(), 12);

        let mut decoded = SessionStats::default();
        decoded.decode(&mut reader, header.protocol_version).unwrap();
        assert_eq!(decoded, stats);
    }

    #[tokio::test]
    async fn test_rejects_bad_address() {
        assert!(TelemetryClient::new("not an address", "t").await.is_err());
    }
}
