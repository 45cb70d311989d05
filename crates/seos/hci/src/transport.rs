//! Transport to the radio controller
//!
//! A transport moves finished HCI packets to the controller. Framing below the
//! packet level (UART three-wire, USB endpoints) belongs to the implementation.

use std::fmt;

use tracing::{debug, trace};

use crate::packet::PacketType;

/// Trait for HCI transports
///
/// A transport sends raw command and ACL packets. It has no knowledge of the
/// bring-up sequence or of connection state. Inbound packets are pushed to the
/// controller by whoever owns the transport.
pub trait HciTransport: Send + fmt::Debug {
    /// Error type returned by the transport
    type Error: Into<crate::Error> + fmt::Debug;

    /// Send one packet, without its H4 indicator
    fn send(&mut self, packet_type: PacketType, packet: &[u8]) -> Result<(), Self::Error> {
        trace!(?packet_type, packet = %hex::encode(packet), "Sending HCI packet");
        let result = self.do_send(packet_type, packet);
        if let Err(e) = &result {
            debug!(error = ?e, "Transport error while sending");
        }
        result
    }

    /// Internal implementation of send
    /// This is the method that concrete implementations should override
    fn do_send(&mut self, packet_type: PacketType, packet: &[u8]) -> Result<(), Self::Error>;
}

#[cfg(test)]
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct RecordingTransport {
    /// Packets that were sent
    pub sent: Vec<(PacketType, Vec<u8>)>,
    /// Fail every send
    pub broken: bool,
}

#[cfg(test)]
impl RecordingTransport {
    /// Take the command packets sent so far
    pub fn take_commands(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
            .into_iter()
            .filter(|(packet_type, _)| *packet_type == PacketType::Command)
            .map(|(_, packet)| packet)
            .collect()
    }

    /// Opcode of the last command sent
    pub fn last_opcode(&self) -> Option<crate::Opcode> {
        self.sent
            .iter()
            .rev()
            .find(|(packet_type, _)| *packet_type == PacketType::Command)
            .map(|(_, packet)| crate::Opcode::from_u16(u16::from_le_bytes([packet[0], packet[1]])))
    }
}

#[cfg(test)]
impl HciTransport for RecordingTransport {
    type Error = crate::Error;

    fn do_send(&mut self, packet_type: PacketType, packet: &[u8]) -> Result<(), Self::Error> {
        if self.broken {
            return Err(crate::Error::Transport("link down".to_string()));
        }
        self.sent.push((packet_type, packet.to_vec()));
        Ok(())
    }
}
