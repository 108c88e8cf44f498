//! Gesture request packets exchanged with command servers

use serde::{Deserialize, Serialize};

use crate::{GestureRequest, PROTOCOL_VERSION, ProtocolError, ProtocolResult};

/// Gesture request packet with ordering and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GesturePacket {
    /// Protocol version of the sender
    pub version: u32,
    /// Sequence number for ordering
    pub sequence: u64,
    /// Timestamp in microseconds
    pub timestamp_us: u64,
    /// The requested gesture
    pub request: GestureRequest,
}

impl GesturePacket {
    pub fn new(sequence: u64, request: GestureRequest) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            timestamp_us: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_micros() as u64)
                .unwrap_or(0),
            request,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bytes, rejecting packets from another protocol version
    pub fn from_bytes(data: &[u8]) -> ProtocolResult<Self> {
        let packet: Self = bincode::deserialize(data)?;
        if packet.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: packet.version,
            });
        }
        Ok(packet)
    }
}
