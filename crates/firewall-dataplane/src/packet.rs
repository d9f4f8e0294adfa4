//! Packet model and the source trait the drivers pull from

use serde::{Deserialize, Serialize};

/// Rule update for one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPacket {
    /// Address whose rules change
    pub address: i32,
    /// New value of the address's blocked-as-sender flag
    pub block_sender: bool,
    /// Mark the range accepting (true) or rejecting (false)
    pub make_accepting: bool,
    pub range_begin: i32,
    /// Inclusive
    pub range_end: i32,
}

/// Traffic from `source` to `dest`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPacket {
    pub source: i32,
    pub dest: i32,
    /// Fingerprint seed
    pub seed: i64,
    /// Fingerprint work factor
    pub iterations: u32,
}

/// Packet flowing through the firewall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Config(ConfigPacket),
    Data(DataPacket),
}

impl Packet {
    /// Check if this is a rule update
    #[inline(always)]
    pub fn is_config(&self) -> bool {
        matches!(self, Packet::Config(_))
    }
}

impl From<ConfigPacket> for Packet {
    fn from(packet: ConfigPacket) -> Self {
        Packet::Config(packet)
    }
}

impl From<DataPacket> for Packet {
    fn from(packet: DataPacket) -> Self {
        Packet::Data(packet)
    }
}

/// Supplier of packets.
///
/// Owned by exactly one thread at a time (the dispatcher or the serial
/// worker), hence `&mut self` and `Send`.
pub trait PacketSource: Send {
    /// Next packet of the mixed stream
    fn next_packet(&mut self) -> Packet;

    /// Next rule update, used for warm-up
    fn next_config_packet(&mut self) -> ConfigPacket;
}

impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    fn next_packet(&mut self) -> Packet {
        (**self).next_packet()
    }

    fn next_config_packet(&mut self) -> ConfigPacket {
        (**self).next_config_packet()
    }
}

/// Source replaying a fixed list of packets in a loop
#[derive(Debug, Clone)]
pub struct ReplaySource {
    packets: Vec<Packet>,
    position: usize,
}

impl ReplaySource {
    /// # Panics
    ///
    /// Panics if `packets` is empty.
    pub fn new(packets: Vec<Packet>) -> Self {
        assert!(!packets.is_empty(), "replay source needs at least one packet");
        Self { packets, position: 0 }
    }
}

impl PacketSource for ReplaySource {
    fn next_packet(&mut self) -> Packet {
        let packet = self.packets[self.position];
        self.position = (self.position + 1) % self.packets.len();
        packet
    }

    fn next_config_packet(&mut self) -> ConfigPacket {
        loop {
            if let Packet::Config(config) = self.next_packet() {
                return config;
            }
            if self.packets.iter().all(|p| !p.is_config()) {
                // No rule updates to replay; fall back to a no-op update
                return ConfigPacket {
                    address: 0,
                    block_sender: false,
                    make_accepting: true,
                    range_begin: 0,
                    range_end: -1,
                };
            }
        }
    }
}
