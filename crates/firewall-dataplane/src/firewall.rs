//! Shared firewall state
//!
//! The address table and the fingerprint histogram, shared by every worker
//! of a run through an `Arc`.

use crate::address::{AddressRecord, CacheShape};
use crate::config::TableConfig;
use crate::error::{FirewallError, FirewallResult};
use crate::fingerprint::fingerprint;
use crate::packet::{ConfigPacket, DataPacket, PacketSource};
use crate::stats::Histogram;
use crate::table::StripedHashTable;
use std::sync::Arc;
use tracing::debug;

/// Address table plus histogram
pub struct Firewall {
    addresses: StripedHashTable<Arc<AddressRecord>>,
    histogram: Histogram,
    cache_shape: CacheShape,
}

impl Firewall {
    pub fn new(config: &TableConfig) -> Self {
        Self {
            addresses: StripedHashTable::with_stripes(
                config.address_initial_capacity,
                config.address_stripes,
                config.address_max_bucket_size,
            ),
            histogram: Histogram::new(),
            cache_shape: CacheShape::from(config),
        }
    }

    /// Record for `address`, created on first reference
    #[inline]
    pub fn record(&self, address: i32) -> Arc<AddressRecord> {
        let shape = self.cache_shape;
        self.addresses
            .get_or_insert_with(address, || Arc::new(AddressRecord::new(shape)))
    }

    /// Record for `address` if one exists
    #[inline]
    pub fn find(&self, address: i32) -> Option<Arc<AddressRecord>> {
        self.addresses.get(address)
    }

    /// Apply a rule update to its target address
    pub fn apply_config(&self, packet: &ConfigPacket) {
        self.record(packet.address).update_permission(
            packet.block_sender,
            packet.make_accepting,
            packet.range_begin,
            packet.range_end,
        );
    }

    /// Cache-only verdict for a data packet, creating both records if needed.
    ///
    /// `None` is a cache miss.
    #[inline]
    pub fn check_cached(&self, packet: &DataPacket) -> Option<bool> {
        let sender = self.record(packet.source);
        let dest = self.record(packet.dest);
        dest.cached(packet.source, &sender)
    }

    /// Evaluate a data packet against the destination's rules and refresh
    /// its cache.
    ///
    /// Both records must already exist.
    pub fn resolve(&self, packet: &DataPacket) -> FirewallResult<bool> {
        let sender = self
            .find(packet.source)
            .ok_or(FirewallError::UnknownAddress(packet.source))?;
        let dest = self
            .find(packet.dest)
            .ok_or(FirewallError::UnknownAddress(packet.dest))?;
        Ok(dest.resolve(packet.source, &sender))
    }

    /// Cache then rules, creating records as needed
    pub fn lookup(&self, packet: &DataPacket) -> bool {
        let sender = self.record(packet.source);
        let dest = self.record(packet.dest);
        dest.lookup(packet.source, &sender)
    }

    /// Fingerprint an admitted packet into the histogram
    #[inline]
    pub fn admit(&self, packet: &DataPacket) {
        self.histogram
            .record(fingerprint(packet.seed, packet.iterations));
    }

    /// Seed the rules with `count` config packets from `source`
    pub fn warm_up<S: PacketSource + ?Sized>(&self, source: &mut S, count: u64) {
        for _ in 0..count {
            let packet = source.next_config_packet();
            self.apply_config(&packet);
        }
        debug!(
            packets = count,
            addresses = self.addresses.len(),
            capacity = self.addresses.capacity(),
            "warm-up complete"
        );
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Number of addresses with a record
    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }
}

impl Default for Firewall {
    fn default() -> Self {
        Self::new(&TableConfig::default())
    }
}

impl std::fmt::Debug for Firewall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firewall")
            .field("addresses", &self.addresses.len())
            .field("histogram", &self.histogram)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ReplaySource;
    use std::thread;

    fn config(address: i32, block_sender: bool, make_accepting: bool, begin: i32, end: i32) -> ConfigPacket {
        ConfigPacket {
            address,
            block_sender,
            make_accepting,
            range_begin: begin,
            range_end: end,
        }
    }

    fn data(source: i32, dest: i32) -> DataPacket {
        DataPacket { source, dest, seed: 3, iterations: 2 }
    }

    #[test]
    fn test_interval_scenario() {
        let firewall = Firewall::default();
        // Start from a destination that rejects everyone
        firewall.apply_config(&config(1, false, false, i32::MIN, i32::MAX));
        firewall.apply_config(&config(1, false, true, 10, 20));

        assert!(firewall.lookup(&data(15, 1)));
        assert!(!firewall.lookup(&data(25, 1)));

        firewall.apply_config(&config(1, false, false, 15, 18));
        assert!(!firewall.lookup(&data(15, 1)));
        assert!(firewall.lookup(&data(12, 1)));
        assert!(firewall.lookup(&data(19, 1)));
    }

    #[test]
    fn test_blocked_sender_rejected_everywhere() {
        let firewall = Firewall::default();
        firewall.apply_config(&config(7, true, true, 0, 0));

        for dest in 0..20 {
            assert!(!firewall.lookup(&data(7, dest)));
        }
        assert!(firewall.lookup(&data(8, 3)));
    }

    #[test]
    fn test_cache_miss_then_hit() {
        let firewall = Firewall::default();
        let packet = data(4, 5);

        assert_eq!(firewall.check_cached(&packet), None);
        assert!(firewall.resolve(&packet).unwrap());
        assert_eq!(firewall.check_cached(&packet), Some(true));
        assert_eq!(firewall.address_count(), 2);
    }

    #[test]
    fn test_resolve_unknown_address() {
        let firewall = Firewall::default();
        let err = firewall.resolve(&data(1, 2)).unwrap_err();
        assert!(matches!(err, FirewallError::UnknownAddress(1)));
    }

    #[test]
    fn test_lazy_creation_keeps_first_record() {
        let firewall = Arc::new(Firewall::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let firewall = firewall.clone();
                thread::spawn(move || firewall.record(99))
            })
            .collect();
        let records: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &records[1..] {
            assert!(Arc::ptr_eq(&records[0], r));
        }
        assert_eq!(firewall.address_count(), 1);
    }

    #[test]
    fn test_warm_up_applies_configs() {
        let firewall = Firewall::default();
        let mut source = ReplaySource::new(vec![
            config(1, false, false, 0, 100).into(),
            config(2, true, true, 0, 0).into(),
        ]);
        firewall.warm_up(&mut source, 4);

        assert_eq!(firewall.address_count(), 2);
        assert!(!firewall.lookup(&data(50, 1)));
        assert!(firewall.find(2).unwrap().is_blocked());
    }

    #[test]
    fn test_admit_records_fingerprint() {
        let firewall = Firewall::default();
        let packet = data(1, 2);
        firewall.admit(&packet);
        firewall.admit(&packet);
        let bucket = fingerprint(packet.seed, packet.iterations);
        assert_eq!(firewall.histogram().get(bucket), 2);
        assert_eq!(firewall.histogram().total(), 2);
    }
}
