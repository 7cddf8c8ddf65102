//! Built-in telemetry packet types
//!
//! These are the packets the bundled server binary understands out of the box.
//! Applications embedding the server are free to register their own types
//! alongside (or instead of) these.

use std::any::Any;
use std::collections::HashMap;

use crate::codec::{CodecError, Reader, Writer};
use crate::packet::{Packet, PacketId};
use crate::registry::RegistryBuilder;

/// First protocol version that carries `SessionStats::avg_ping_ms`.
const SESSION_STATS_PING_VERSION: u64 = 2;

/// Periodic liveness signal from a client session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub sent_at_ms: u64,
    pub session_id: u64,
}

impl Heartbeat {
    pub const ID: PacketId = 1;
}

impl Packet for Heartbeat {
    fn id(&self) -> PacketId {
        Self::ID
    }

    fn encode(&self, writer: &mut Writer<'_>, _protocol_version: u64) -> Result<(), CodecError> {
        writer.u64(self.sent_at_ms);
        writer.u64(self.session_id);
        Ok(())
    }

    fn decode(&mut self, reader: &mut Reader<'_>, _protocol_version: u64) -> Result<(), CodecError> {
        self.sent_at_ms = reader.u64()?;
        self.session_id = reader.u64()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Aggregate numbers for a running game session
///
/// Version 1 clients send only `player_count` and `tick_rate`; from version 2
/// onwards `avg_ping_ms` follows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub player_count: u32,
    pub tick_rate: u32,
    pub avg_ping_ms: u32,
}

impl SessionStats {
    pub const ID: PacketId = 2;
}

impl Packet for SessionStats {
    fn id(&self) -> PacketId {
        Self::ID
    }

    fn encode(&self, writer: &mut Writer<'_>, protocol_version: u64) -> Result<(), CodecError> {
        writer.u32(self.player_count);
        writer.u32(self.tick_rate);
        if protocol_version >= SESSION_STATS_PING_VERSION {
            writer.u32(self.avg_ping_ms);
        }
        Ok(())
    }

    fn decode(&mut self, reader: &mut Reader<'_>, protocol_version: u64) -> Result<(), CodecError> {
        self.player_count = reader.u32()?;
        self.tick_rate = reader.u32()?;
        if protocol_version >= SESSION_STATS_PING_VERSION {
            self.avg_ping_ms = reader.u32()?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Client-side frame timing sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceSample {
    pub fps: f32,
    pub frame_time_ms: f32,
    pub label: String,
}

impl PerformanceSample {
    pub const ID: PacketId = 3;
}

impl Packet for PerformanceSample {
    fn id(&self) -> PacketId {
        Self::ID
    }

    fn encode(&self, writer: &mut Writer<'_>, _protocol_version: u64) -> Result<(), CodecError> {
        writer.f32(self.fps);
        writer.f32(self.frame_time_ms);
        writer.string(&self.label)
    }

    fn decode(&mut self, reader: &mut Reader<'_>, _protocol_version: u64) -> Result<(), CodecError> {
        self.fps = reader.f32()?;
        self.frame_time_ms = reader.f32()?;
        self.label = reader.string()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Free-form named event with string attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomEvent {
    pub name: String,
    pub attributes: HashMap<String, String>,
}

impl CustomEvent {
    pub const ID: PacketId = 4;
}

impl Packet for CustomEvent {
    fn id(&self) -> PacketId {
        Self::ID
    }

    fn encode(&self, writer: &mut Writer<'_>, _protocol_version: u64) -> Result<(), CodecError> {
        writer.string(&self.name)?;
        writer.serde_value(&self.attributes)
    }

    fn decode(&mut self, reader: &mut Reader<'_>, _protocol_version: u64) -> Result<(), CodecError> {
        self.name = reader.string()?;
        self.attributes = reader.serde_value()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registers every built-in packet type
pub fn register_builtin(builder: &mut RegistryBuilder) -> &mut RegistryBuilder {
    builder
        .register_default::<Heartbeat>()
        .register_default::<SessionStats>()
        .register_default::<PerformanceSample>()
        .register_default::<CustomEvent>()
}
