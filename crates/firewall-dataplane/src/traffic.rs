//! Synthetic Traffic Generator
//!
//! Produces a deterministic mix of rule updates and data packets with
//! realistic locality: data packets come in trains between the same
//! source/destination pair, and each source talks to a small set of
//! partners.

use crate::config::{TrafficConfig, MAX_WINDOW};
use crate::packet::{ConfigPacket, DataPacket, Packet, PacketSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Active stream of packets between one pair
#[derive(Debug, Clone, Copy)]
struct Train {
    source: i32,
    dest: i32,
    remaining: u32,
}

/// Packet generator driven by [`TrafficConfig`]
#[derive(Debug)]
pub struct TrafficGenerator {
    config: TrafficConfig,
    rng: StdRng,
    trains: Vec<Train>,
}

impl TrafficGenerator {
    pub fn new(config: TrafficConfig) -> Self {
        let mut generator = Self {
            rng: StdRng::seed_from_u64(config.seed),
            trains: Vec::new(),
            config,
        };
        let train_count = 1usize << generator.config.trains_log;
        let trains: Vec<Train> = (0..train_count)
            .map(|_| {
                let (source, dest) = generator.random_pair();
                let remaining = generator.train_length();
                Train { source, dest, remaining }
            })
            .collect();
        generator.trains = trains;
        generator
    }

    fn random_address(&mut self) -> i32 {
        self.rng.gen_range(0..self.config.address_space()) as i32
    }

    /// A fresh source and one of its communication partners
    fn random_pair(&mut self) -> (i32, i32) {
        let source = self.random_address();
        let partner = self.rng.gen_range(0..self.config.mean_comms_per_address);
        (source, self.partner_of(source, partner))
    }

    /// Stable partner list per source, derived by mixing instead of stored
    fn partner_of(&self, source: i32, index: u32) -> i32 {
        let mut z = ((source as u64) << 32 | index as u64) ^ self.config.seed;
        z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        (z % self.config.address_space()) as i32
    }

    /// Geometric length with mean `mean_train_size`, at least one packet
    fn train_length(&mut self) -> u32 {
        let mean = self.config.mean_train_size;
        if mean <= 1.0 {
            return 1;
        }
        let p = 1.0 / mean;
        let u: f64 = 1.0 - self.rng.gen::<f64>();
        let length = (u.ln() / (1.0 - p).ln()).ceil();
        length.clamp(1.0, u32::MAX as f64) as u32
    }

    /// Exponential work factor with mean `mean_work`
    fn work(&mut self) -> u32 {
        let u: f64 = self.rng.gen();
        let iterations = -self.config.mean_work * (1.0 - u).ln();
        iterations.clamp(0.0, u32::MAX as f64) as u32
    }

    fn next_data_packet(&mut self) -> DataPacket {
        let index = self.rng.gen_range(0..self.trains.len());
        if self.trains[index].remaining == 0 {
            let keep = 1.0 - 1.0 / self.config.mean_trains_per_comm;
            let (source, dest) = if self.rng.gen_bool(keep) {
                (self.trains[index].source, self.trains[index].dest)
            } else {
                self.random_pair()
            };
            let remaining = self.train_length();
            self.trains[index] = Train { source, dest, remaining };
        }

        let train = &mut self.trains[index];
        train.remaining -= 1;
        let (source, dest) = (train.source, train.dest);
        DataPacket {
            source,
            dest,
            seed: self.rng.gen(),
            iterations: self.work(),
        }
    }
}

impl PacketSource for TrafficGenerator {
    fn next_packet(&mut self) -> Packet {
        if self.rng.gen_bool(self.config.config_fraction) {
            Packet::Config(self.next_config_packet())
        } else {
            Packet::Data(self.next_data_packet())
        }
    }

    fn next_config_packet(&mut self) -> ConfigPacket {
        let address = self.random_address();
        let range_begin = self.random_address();
        let width = match self.config.mean_window {
            0 => 0,
            w => self.rng.gen_range(0..w.min(MAX_WINDOW) * 2),
        };
        ConfigPacket {
            address,
            block_sender: self.rng.gen_bool(self.config.png_fraction),
            make_accepting: self.rng.gen_bool(self.config.accepting_fraction),
            range_begin,
            range_end: range_begin.saturating_add(width as i32),
        }
    }
}
