//! Packet Pipeline
//!
//! Three stages connected by bounded SPSC rings:
//!
//! ```text
//!                  ┌──────────────┐
//!   source ──────▶ │  Dispatcher  │   in-flight budget gate
//!                  └──────┬───────┘
//!             round-robin │ N rings
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!    ┌───────────┐  ┌───────────┐  ┌───────────┐
//!    │  Head 0   │  │  Head 1   │  │  Head N-1 │   config + cache hits
//!    └─────┬─────┘  └─────┬─────┘  └─────┬─────┘
//!          │   N x M rings (cache misses) │
//!          ▼              ▼              ▼
//!    ┌───────────┐  ┌───────────┐  ┌───────────┐
//!    │  Miss 0   │  │  Miss 1   │  │  Miss M-1 │   interval lookups
//!    └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! Head worker `i` owns the producer side of rings `(i, 0..M)`; cache-miss
//! worker `j` owns the consumer side of rings `(0..N, j)`. Every ring has
//! exactly one writer and one reader.

use crate::config::PipelineConfig;
use crate::firewall::Firewall;
use crate::packet::{DataPacket, Packet, PacketSource};
use crate::queue::{bounded, Consumer, Full, Producer};
use crate::stats::PipelineStats;
use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Pulls packets from the source and spreads them over the head workers.
///
/// Holds at most one pending packet. A full ring is skipped, never waited on.
pub struct Dispatcher<S> {
    source: S,
    queues: Vec<Producer<Packet>>,
    index: usize,
    pending: Option<Packet>,
    budget: i64,
    stats: Arc<PipelineStats>,
    done: Arc<AtomicBool>,
}

impl<S: PacketSource> Dispatcher<S> {
    /// Try to hand the pending packet to the current ring.
    ///
    /// Returns true if a packet was dispatched.
    pub fn step(&mut self) -> bool {
        let packet = match self.pending.take() {
            Some(packet) => packet,
            None => self.source.next_packet(),
        };

        if self.stats.in_flight() >= self.budget {
            self.pending = Some(packet);
            return false;
        }

        self.stats.reserve();
        let outcome = self.queues[self.index].enqueue(packet);
        self.index = (self.index + 1) % self.queues.len();
        match outcome {
            Ok(()) => {
                self.stats.record_dispatch();
                true
            }
            Err(Full(packet)) => {
                self.stats.unreserve();
                self.pending = Some(packet);
                false
            }
        }
    }

    /// Dispatch until shutdown
    pub fn run(mut self) -> Self {
        debug!(queues = self.queues.len(), budget = self.budget, "dispatcher starting");
        let backoff = Backoff::new();
        while !self.done.load(Ordering::Relaxed) {
            if self.step() {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
        debug!(pending = self.pending.is_some(), "dispatcher stopped");
        self
    }

    /// Packet taken from the source but not yet dispatched
    pub fn pending(&self) -> Option<&Packet> {
        self.pending.as_ref()
    }
}

/// First stage: applies config packets and answers data packets from the
/// destination's permission cache.
pub struct HeadWorker {
    id: usize,
    inbound: Consumer<Packet>,
    misses: Vec<Producer<DataPacket>>,
    index: usize,
    firewall: Arc<Firewall>,
    stats: Arc<PipelineStats>,
    done: Arc<AtomicBool>,
}

impl HeadWorker {
    /// Handle at most one packet. Returns false if the inbound ring was empty.
    pub fn step(&mut self) -> bool {
        let packet = match self.inbound.dequeue() {
            Ok(packet) => packet,
            Err(_) => return false,
        };

        match packet {
            Packet::Config(config) => {
                self.firewall.apply_config(&config);
                self.stats.record_processed();
            }
            Packet::Data(data) => match self.firewall.check_cached(&data) {
                Some(allowed) => {
                    self.stats.record_cache_hit();
                    if allowed {
                        self.firewall.admit(&data);
                        self.stats.record_admitted();
                    }
                    self.stats.record_processed();
                }
                None => {
                    self.stats.record_cache_miss();
                    self.forward(data);
                }
            },
        }
        true
    }

    /// Push a cache miss to the next cache-miss ring, retrying on full
    /// rings until one accepts or shutdown is observed.
    fn forward(&mut self, mut data: DataPacket) {
        let backoff = Backoff::new();
        loop {
            if self.done.load(Ordering::Relaxed) {
                trace!(worker = self.id, source = data.source, dest = data.dest, "abandoning cache miss at shutdown");
                self.stats.record_abandoned();
                return;
            }
            let outcome = self.misses[self.index].enqueue(data);
            self.index = (self.index + 1) % self.misses.len();
            match outcome {
                Ok(()) => return,
                Err(full) => {
                    data = full.into_inner();
                    backoff.spin();
                }
            }
        }
    }

    pub fn run(mut self) -> Self {
        debug!(worker = self.id, "head worker starting");
        let backoff = Backoff::new();
        while !self.done.load(Ordering::Relaxed) {
            if self.step() {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
        debug!(worker = self.id, "head worker stopped");
        self
    }

    /// Count everything left in the inbound ring as abandoned
    pub fn drain_residue(&mut self) -> u64 {
        let residue = self.inbound.drain();
        for _ in &residue {
            self.stats.record_abandoned();
        }
        residue.len() as u64
    }
}

/// Second stage: resolves cache misses against the interval rules
pub struct CacheMissWorker {
    id: usize,
    inbound: Vec<Consumer<DataPacket>>,
    index: usize,
    firewall: Arc<Firewall>,
    stats: Arc<PipelineStats>,
    done: Arc<AtomicBool>,
}

impl CacheMissWorker {
    /// Poll the inbound rings round-robin and handle the first packet found.
    /// Returns false if every ring was empty.
    pub fn step(&mut self) -> bool {
        for _ in 0..self.inbound.len() {
            let polled = self.inbound[self.index].dequeue();
            self.index = (self.index + 1) % self.inbound.len();
            if let Ok(data) = polled {
                self.process(&data);
                return true;
            }
        }
        false
    }

    fn process(&self, data: &DataPacket) {
        match self.firewall.resolve(data) {
            Ok(allowed) => {
                if allowed {
                    self.firewall.admit(data);
                    self.stats.record_admitted();
                }
                self.stats.record_processed();
            }
            Err(e) => {
                warn!(worker = self.id, error = %e, "dropping packet");
                self.stats.record_drop();
            }
        }
    }

    pub fn run(mut self) -> Self {
        debug!(worker = self.id, rings = self.inbound.len(), "cache-miss worker starting");
        let backoff = Backoff::new();
        while !self.done.load(Ordering::Relaxed) {
            if self.step() {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
        debug!(worker = self.id, "cache-miss worker stopped");
        self
    }

    /// Count everything left in the inbound rings as abandoned
    pub fn drain_residue(&mut self) -> u64 {
        let mut count = 0;
        for ring in &mut self.inbound {
            for _ in ring.drain() {
                self.stats.record_abandoned();
                count += 1;
            }
        }
        count
    }
}

/// All stages of one pipelined run, wired together but not yet started
pub struct Topology<S> {
    pub dispatcher: Dispatcher<S>,
    pub heads: Vec<HeadWorker>,
    pub misses: Vec<CacheMissWorker>,
}

impl<S: PacketSource> Topology<S> {
    /// Create the rings and stage state for `config`
    pub fn build(
        config: &PipelineConfig,
        source: S,
        firewall: Arc<Firewall>,
        stats: Arc<PipelineStats>,
        done: Arc<AtomicBool>,
    ) -> Self {
        let n = config.head_workers;
        let m = config.cache_miss_workers;

        // miss_rx[j] collects the consumer side of rings (0..N, j)
        let mut miss_rx: Vec<Vec<Consumer<DataPacket>>> = (0..m).map(|_| Vec::with_capacity(n)).collect();
        let mut dispatch_tx = Vec::with_capacity(n);
        let mut heads = Vec::with_capacity(n);

        for id in 0..n {
            let (tx, rx) = bounded(config.queue_capacity);
            dispatch_tx.push(tx);

            let mut misses = Vec::with_capacity(m);
            for column in miss_rx.iter_mut() {
                let (miss_tx, rx) = bounded(config.queue_capacity);
                misses.push(miss_tx);
                column.push(rx);
            }

            heads.push(HeadWorker {
                id,
                inbound: rx,
                misses,
                // Stagger the starting ring so heads do not pile onto ring 0
                index: id % m,
                firewall: firewall.clone(),
                stats: stats.clone(),
                done: done.clone(),
            });
        }

        let misses = miss_rx
            .into_iter()
            .enumerate()
            .map(|(id, inbound)| CacheMissWorker {
                id,
                inbound,
                index: 0,
                firewall: firewall.clone(),
                stats: stats.clone(),
                done: done.clone(),
            })
            .collect();

        let dispatcher = Dispatcher {
            source,
            queues: dispatch_tx,
            index: 0,
            pending: None,
            budget: config.in_flight_budget as i64,
            stats,
            done,
        };

        Self { dispatcher, heads, misses }
    }
}
