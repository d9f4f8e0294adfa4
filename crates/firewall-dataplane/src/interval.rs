//! Interval Rule List
//!
//! Per-destination accept/reject rules over the whole `i32` source space,
//! stored as a sorted linked list of boundary nodes.
//!
//! # Design
//!
//! - The state of source `x` is the `accept` flag of the last node with
//!   `key <= x` (right-open step function)
//! - Head sentinel at `i32::MIN` (initially accepting), tail sentinel at
//!   `i32::MAX + 1`; keys are held as `i64` so `end + 1` never overflows
//! - Adjacent nodes never share a state; the tail only bounds the domain
//! - Hand-over-hand locking: a traversal holds `pred` and `curr`, locks the
//!   successor while still holding `curr`, then releases `pred`
//! - Nodes are reference counted, so an unlinked node is freed only after the
//!   last thread holding it lets go

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Key of the head sentinel
pub const HEAD_KEY: i64 = i32::MIN as i64;

/// Key of the tail sentinel (one past the last address)
pub const TAIL_KEY: i64 = i32::MAX as i64 + 1;

type Link = Arc<Mutex<Node>>;
type NodeGuard = ArcMutexGuard<RawMutex, Node>;

struct Node {
    key: i64,
    accept: bool,
    next: Option<Link>,
}

impl Node {
    fn link(key: i64, accept: bool, next: Option<Link>) -> Link {
        Arc::new(Mutex::new(Self { key, accept, next }))
    }

    #[inline(always)]
    fn is_tail(&self) -> bool {
        self.next.is_none()
    }
}

/// Lock the successor of a locked node.
#[inline(always)]
fn lock_next(node: &NodeGuard) -> NodeGuard {
    node.next
        .as_ref()
        .expect("tail sentinel is never traversed past")
        .lock_arc()
}

/// Sender-side "persona non grata" flag.
///
/// A blocked address is rejected as a sender by every destination,
/// regardless of the destination's interval rules.
#[derive(Debug, Default)]
pub struct BlockFlag(AtomicBool);

impl BlockFlag {
    /// Create flag with initial value
    pub const fn new(blocked: bool) -> Self {
        Self(AtomicBool::new(blocked))
    }

    /// Current value
    #[inline(always)]
    pub fn is_blocked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Overwrite value
    #[inline(always)]
    pub fn set(&self, blocked: bool) {
        self.0.store(blocked, Ordering::Release);
    }
}

/// Sorted boundary list with per-node locks
pub struct IntervalList {
    head: Link,
}

impl IntervalList {
    /// Create a list that accepts every source
    pub fn new() -> Self {
        let tail = Node::link(TAIL_KEY, false, None);
        Self {
            head: Node::link(HEAD_KEY, true, Some(tail)),
        }
    }

    /// Mark `[start, end]` as accepting and record `blocked` on `target`.
    pub fn add_interval(&self, start: i32, end: i32, target: &BlockFlag, blocked: bool) {
        self.assign(start, end, true, target, blocked);
    }

    /// Mark `[start, end]` as rejecting and record `blocked` on `target`.
    pub fn remove_interval(&self, start: i32, end: i32, target: &BlockFlag, blocked: bool) {
        self.assign(start, end, false, target, blocked);
    }

    /// Whether `key` is admitted from a sender whose flag is `sender`.
    #[inline]
    pub fn contains(&self, key: i32, sender: &BlockFlag) -> bool {
        self.state_at(key) && !sender.is_blocked()
    }

    /// Rule state at `key`, ignoring any sender flag.
    pub fn state_at(&self, key: i32) -> bool {
        let key = key as i64;
        let mut pred = self.head.lock_arc();
        let mut curr = lock_next(&pred);

        while curr.key <= key {
            let next = lock_next(&curr);
            pred = curr;
            curr = next;
        }
        pred.accept
    }

    /// Overwrite the state of `[start, end]` with `accept`.
    ///
    /// The list is rewritten between `pred` (last node before `start`) and
    /// `curr` (first node after `end`): every node in between is locked and
    /// unlinked, then at most two fresh boundaries are spliced in, at `start`
    /// and at `end + 1`.
    fn assign(&self, start: i32, end: i32, accept: bool, target: &BlockFlag, blocked: bool) {
        if end < start {
            target.set(blocked);
            return;
        }
        let start = start as i64;
        let end = end as i64;
        let resume = end + 1;

        let mut pred = self.head.lock_arc();
        // Only the head can sit exactly on i32::MIN; it is rewritten in place
        let at_head = pred.key == start;
        let mut curr = lock_next(&pred);

        if !at_head {
            while curr.key < start {
                let next = lock_next(&curr);
                pred = curr;
                curr = next;
            }
        }

        // State in force just after `end`, before this update
        let mut after = pred.accept;

        while curr.key <= end && !curr.is_tail() {
            after = curr.accept;
            let succ = lock_next(&curr);
            pred.next = curr.next.take();
            curr = succ;
        }

        let mut chain = pred.next.take();
        if !curr.is_tail() && curr.key == resume && curr.accept == accept {
            // `curr` would repeat the new state; merge it away
            chain = curr.next.take();
        } else if after != accept && resume < curr.key {
            chain = Some(Node::link(resume, after, chain));
        }
        if at_head {
            pred.accept = accept;
        } else if pred.accept != accept {
            chain = Some(Node::link(start, accept, chain));
        }
        pred.next = chain;

        target.set(blocked);
    }

    /// Snapshot of all boundaries (including sentinels) as `(key, accept)`.
    pub fn boundaries(&self) -> Vec<(i64, bool)> {
        let mut out = Vec::new();
        let mut curr = self.head.lock_arc();
        loop {
            out.push((curr.key, curr.accept));
            if curr.is_tail() {
                return out;
            }
            curr = lock_next(&curr);
        }
    }

    /// Number of boundaries, sentinels included
    pub fn boundary_count(&self) -> usize {
        self.boundaries().len()
    }
}

impl Default for IntervalList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntervalList {
    fn drop(&mut self) {
        // Unlink iteratively; recursive Arc drops would overflow on long lists
        let mut next = self.head.lock().next.take();
        while let Some(link) = next {
            next = match Arc::try_unwrap(link) {
                Ok(node) => node.into_inner().next,
                Err(_) => None,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_alternating(list: &IntervalList) {
        let nodes = list.boundaries();
        assert_eq!(nodes.first().map(|n| n.0), Some(HEAD_KEY));
        assert_eq!(nodes.last().map(|n| n.0), Some(TAIL_KEY));
        for pair in nodes.windows(2) {
            assert!(pair[0].0 < pair[1].0, "keys not increasing: {:?}", nodes);
        }
        // Tail bounds the domain and is excluded from the alternation check
        let interior = &nodes[..nodes.len() - 1];
        for pair in interior.windows(2) {
            assert_ne!(pair[0].1, pair[1].1, "adjacent equal states: {:?}", nodes);
        }
    }

    #[test]
    fn test_initially_accepting() {
        let list = IntervalList::new();
        let open = BlockFlag::default();
        assert!(list.contains(i32::MIN, &open));
        assert!(list.contains(0, &open));
        assert!(list.contains(i32::MAX, &open));
        assert_eq!(list.boundary_count(), 2);
    }

    #[test]
    fn test_add_then_remove_scenario() {
        let list = IntervalList::new();
        let flag = BlockFlag::default();
        let open = BlockFlag::default();

        // Start from an all-rejecting list so the added interval is visible
        list.remove_interval(i32::MIN, i32::MAX, &flag, false);
        assert!(!list.contains(0, &open));

        list.add_interval(10, 20, &flag, false);
        assert!(list.contains(15, &open));
        assert!(!list.contains(25, &open));
        assert!(list.contains(10, &open));
        assert!(list.contains(20, &open));
        assert!(!list.contains(21, &open));
        assert!(!list.contains(9, &open));

        list.remove_interval(15, 18, &flag, false);
        assert!(!list.contains(15, &open));
        assert!(!list.contains(18, &open));
        assert!(list.contains(12, &open));
        assert!(list.contains(14, &open));
        assert!(list.contains(19, &open));
        assert_alternating(&list);
    }

    #[test]
    fn test_blocked_sender_always_rejected() {
        let list = IntervalList::new();
        let target = BlockFlag::default();
        let sender = BlockFlag::new(true);

        list.add_interval(0, 100, &target, false);
        assert!(list.state_at(50));
        assert!(!list.contains(50, &sender));
        assert!(!list.contains(-50, &sender));
    }

    #[test]
    fn test_mutation_sets_target_flag() {
        let list = IntervalList::new();
        let target = BlockFlag::default();

        list.add_interval(1, 2, &target, true);
        assert!(target.is_blocked());

        list.remove_interval(1, 2, &target, false);
        assert!(!target.is_blocked());

        // Empty interval still records the flag but leaves the rules alone
        let before = list.boundaries();
        list.add_interval(5, 4, &target, true);
        assert!(target.is_blocked());
        assert_eq!(list.boundaries(), before);
    }

    #[test]
    fn test_single_point_interval() {
        let list = IntervalList::new();
        let flag = BlockFlag::default();

        list.remove_interval(7, 7, &flag, false);
        assert!(list.state_at(6));
        assert!(!list.state_at(7));
        assert!(list.state_at(8));
        assert_eq!(list.boundaries(), vec![(HEAD_KEY, true), (7, false), (8, true), (TAIL_KEY, false)]);
    }

    #[test]
    fn test_merge_adjacent_intervals() {
        let list = IntervalList::new();
        let flag = BlockFlag::default();

        list.remove_interval(0, 9, &flag, false);
        list.remove_interval(10, 19, &flag, false);
        assert_eq!(list.boundaries(), vec![(HEAD_KEY, true), (0, false), (20, true), (TAIL_KEY, false)]);

        // Re-accepting the whole range collapses back to the sentinels
        list.add_interval(-5, 25, &flag, false);
        assert_eq!(list.boundary_count(), 2);
    }

    #[test]
    fn test_merge_with_boundary_after_end() {
        let list = IntervalList::new();
        let flag = BlockFlag::default();

        list.remove_interval(10, 19, &flag, false);
        assert_eq!(list.boundaries(), vec![(HEAD_KEY, true), (10, false), (20, true), (TAIL_KEY, false)]);

        // Boundary at end + 1 already carries the new state
        list.add_interval(10, 19, &flag, false);
        assert_eq!(list.boundaries(), vec![(HEAD_KEY, true), (TAIL_KEY, false)]);

        list.remove_interval(10, 19, &flag, false);
        list.remove_interval(5, 9, &flag, false);
        assert_eq!(list.boundaries(), vec![(HEAD_KEY, true), (5, false), (20, true), (TAIL_KEY, false)]);
    }

    #[test]
    fn test_domain_edges() {
        let list = IntervalList::new();
        let flag = BlockFlag::default();

        list.remove_interval(i32::MIN, -1, &flag, false);
        assert!(!list.state_at(i32::MIN));
        assert!(!list.state_at(-1));
        assert!(list.state_at(0));

        list.remove_interval(100, i32::MAX, &flag, false);
        assert!(!list.state_at(i32::MAX));
        assert!(list.state_at(99));
        assert_alternating(&list);

        list.add_interval(i32::MIN, i32::MAX, &flag, false);
        assert_eq!(list.boundaries(), vec![(HEAD_KEY, true), (TAIL_KEY, false)]);
    }

    #[test]
    fn test_overwrite_same_range() {
        let list = IntervalList::new();
        let flag = BlockFlag::default();

        for _ in 0..3 {
            list.remove_interval(40, 60, &flag, false);
            list.add_interval(45, 50, &flag, false);
        }
        assert!(!list.state_at(44));
        assert!(list.state_at(47));
        assert!(!list.state_at(51));
        assert_alternating(&list);
    }

    #[test]
    fn test_concurrent_updates_keep_invariants() {
        let list = Arc::new(IntervalList::new());
        let mut handles = Vec::new();

        for t in 0..4i32 {
            let list = list.clone();
            handles.push(std::thread::spawn(move || {
                let flag = BlockFlag::default();
                for i in 0..2000i32 {
                    let start = (i * 37 + t * 101) % 1000;
                    let end = start + (i % 17);
                    if (i + t) % 2 == 0 {
                        list.add_interval(start, end, &flag, false);
                    } else {
                        list.remove_interval(start, end, &flag, false);
                    }
                    let _ = list.state_at((i * 13) % 1000);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_alternating(&list);
    }

    #[derive(Debug, Clone)]
    struct Update {
        accept: bool,
        start: i32,
        len: i32,
    }

    fn update() -> impl Strategy<Value = Update> {
        (any::<bool>(), 0i32..64, 0i32..24).prop_map(|(accept, start, len)| Update { accept, start, len })
    }

    proptest! {
        #[test]
        fn prop_matches_boolean_model(updates in prop::collection::vec(update(), 0..40)) {
            const DOMAIN: i32 = 96;
            let list = IntervalList::new();
            let flag = BlockFlag::default();
            let mut model = vec![true; DOMAIN as usize];

            for u in &updates {
                let end = u.start + u.len;
                if u.accept {
                    list.add_interval(u.start, end, &flag, false);
                } else {
                    list.remove_interval(u.start, end, &flag, false);
                }
                for k in u.start..=end.min(DOMAIN - 1) {
                    model[k as usize] = u.accept;
                }

                let nodes = list.boundaries();
                let interior = &nodes[..nodes.len() - 1];
                for pair in interior.windows(2) {
                    prop_assert!(pair[0].0 < pair[1].0);
                    prop_assert_ne!(pair[0].1, pair[1].1);
                }
            }

            for k in 0..DOMAIN {
                prop_assert_eq!(list.state_at(k), model[k as usize], "key {}", k);
            }
            // Outside the touched domain the list keeps its initial state
            prop_assert!(list.state_at(-1));
        }
    }
}
