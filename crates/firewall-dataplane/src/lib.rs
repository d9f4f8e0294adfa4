//! Concurrent Packet-Filtering Firewall
//!
//! Classifies a synthetic stream of rule updates and data packets against
//! per-destination accept/reject rules, counting admitted packets into a
//! fingerprint histogram. Built to measure how concurrent data structures
//! behave under realistic access patterns.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          FIREWALL                                   │
//! │                                                                     │
//! │  PacketSource ──▶ Dispatcher ──▶ Head Workers ──▶ Cache-Miss Workers│
//! │                    (budget)      (SPSC rings)      (SPSC rings)     │
//! │                                       │                 │           │
//! │                                       ▼                 ▼           │
//! │  ┌───────────────────────────────────────────────────────────────┐ │
//! │  │ Address Table: StripedHashTable<Arc<AddressRecord>>           │ │
//! │  │                                                               │ │
//! │  │   AddressRecord                                               │ │
//! │  │   ├── blocked      AtomicBool (as sender)                     │ │
//! │  │   ├── rules        IntervalList (hand-over-hand locking)      │ │
//! │  │   └── cache        ArcSwap<StripedHashTable<bool>>            │ │
//! │  └───────────────────────────────────────────────────────────────┘ │
//! │                                                                     │
//! │  Histogram: 2^16 atomic counters indexed by packet fingerprint      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Execution Modes
//!
//! | Mode | Threads | Path |
//! |------|---------|------|
//! | Serial | 1 | source → rules (cache first) |
//! | Pipelined | 1 + N + M | dispatcher → head (cache) → miss (rules) |
//!
//! Both modes seed the rules with `(2^address_log)^1.5` updates before the
//! clock starts, then run for a fixed wall-clock duration.

pub mod address;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod firewall;
pub mod interval;
pub mod packet;
pub mod pipeline;
pub mod queue;
pub mod serial;
pub mod stats;
pub mod table;
pub mod traffic;

pub use address::{AddressRecord, CacheShape};
pub use config::{FirewallConfig, PipelineConfig, TableConfig, TrafficConfig};
pub use engine::{run, run_pipelined, run_serial, RunMode, RunReport};
pub use error::{FirewallError, FirewallResult};
pub use firewall::Firewall;
pub use interval::{BlockFlag, IntervalList};
pub use packet::{ConfigPacket, DataPacket, Packet, PacketSource, ReplaySource};
pub use stats::{Histogram, PipelineStats, StatsSnapshot};
pub use table::StripedHashTable;
pub use traffic::TrafficGenerator;
