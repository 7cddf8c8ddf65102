//! Hook for checking the auth token carried in every packet header
//!
//! The server only asks a [`TokenVerifier`] for a yes/no answer. How tokens
//! are issued and validated is up to the embedding application; the bundled
//! [`SharedSecretVerifier`] covers the simple single-secret deployment.

use shared::PacketHeader;
use std::net::SocketAddr;

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, sender: SocketAddr, header: &PacketHeader) -> bool;
}

impl<F> TokenVerifier for F
where
    F: Fn(SocketAddr, &PacketHeader) -> bool + Send + Sync,
{
    fn verify(&self, sender: SocketAddr, header: &PacketHeader) -> bool {
        self(sender, header)
    }
}

/// Accepts packets whose token equals a fixed secret
pub struct SharedSecretVerifier {
    secret: Vec<u8>,
}

impl SharedSecretVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl TokenVerifier for SharedSecretVerifier {
    fn verify(&self, _sender: SocketAddr, header: &PacketHeader) -> bool {
        constant_time_eq(&self.secret, &header.auth_token)
    }
}

/// Compares two byte strings without short-circuiting on the first mismatch
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
