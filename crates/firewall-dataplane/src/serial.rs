//! Serial firewall worker
//!
//! One thread pulls packets straight from the source and applies them in
//! order. The baseline the pipeline is measured against.

use crate::firewall::Firewall;
use crate::packet::{Packet, PacketSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Counts produced by a serial run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialTally {
    /// Every packet taken from the source, config and data alike
    pub processed: u64,
    /// Data packets that passed the rules
    pub admitted: u64,
}

/// Single-threaded packet loop
pub struct SerialWorker<S> {
    source: S,
    firewall: Arc<Firewall>,
    done: Arc<AtomicBool>,
    tally: SerialTally,
}

impl<S: PacketSource> SerialWorker<S> {
    pub fn new(source: S, firewall: Arc<Firewall>, done: Arc<AtomicBool>) -> Self {
        Self {
            source,
            firewall,
            done,
            tally: SerialTally::default(),
        }
    }

    /// Apply one packet
    #[inline]
    pub fn process(&mut self, packet: Packet) {
        match packet {
            Packet::Config(config) => self.firewall.apply_config(&config),
            Packet::Data(data) => {
                if self.firewall.lookup(&data) {
                    self.firewall.admit(&data);
                    self.tally.admitted += 1;
                }
            }
        }
        self.tally.processed += 1;
    }

    /// Loop until `done` is raised, then hand back the tally
    pub fn run(mut self) -> SerialTally {
        tracing::debug!("serial worker starting");
        while !self.done.load(Ordering::Relaxed) {
            let packet = self.source.next_packet();
            self.process(packet);
        }
        tracing::debug!(processed = self.tally.processed, "serial worker stopped");
        self.tally
    }

    pub fn tally(&self) -> SerialTally {
        self.tally
    }
}
