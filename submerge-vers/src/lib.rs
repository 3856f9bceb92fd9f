// Versioning primitives for the vector timestamper: the vector clock shared
// across VT replicas, the per-shard queue-timestamp vector owned by one VT,
// and the request-id generator used to name transactions and node programs.
//
// None of these types know about locking or messages; callers (submerge-txn)
// are responsible for taking whatever mutex guards the mutable state before
// calling the `&mut self` methods here.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};


/// Index of a vector-timestamper replica within `0..n_vt`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct VtId(pub u64);

/// Index of a shard within `0..n_shards`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ShardId(pub u64);

/// A request id, unique within the timestamper that generated it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// A per-timestamper vector clock: one counter per VT replica, plus the
/// owning replica's own index. `clock[vt_id]` only ever advances via
/// `increment`; every other component only advances via `update`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VectorClock {
    pub vt_id: VtId,
    pub clock: Vec<u64>,
}

impl VectorClock {
    pub fn new(vt_id: VtId, n_vt: usize) -> Self {
        VectorClock {
            vt_id,
            clock: vec![0; n_vt],
        }
    }

    /// Increments this clock's own component and returns the new value by
    /// copy, per the `increment_clock` operation.
    pub fn increment(&mut self) -> VectorClock {
        self.clock[self.vt_id.0 as usize] += 1;
        self.clone()
    }

    /// Raises `clock[other_vt]` to at least `other_value`. Never lowers it.
    pub fn update(&mut self, other_vt: VtId, other_value: u64) {
        let slot = &mut self.clock[other_vt.0 as usize];
        if other_value > *slot {
            *slot = other_value;
        }
    }

    /// Componentwise partial order: `Some(Less)`/`Some(Greater)` only when
    /// every component compares the same way; `None` when concurrent.
    pub fn partial_cmp_causal(&self, other: &VectorClock) -> Option<Ordering> {
        assert_eq!(self.clock.len(), other.clock.len());
        let mut less = false;
        let mut greater = false;
        for (a, b) in self.clock.iter().zip(other.clock.iter()) {
            match a.cmp(b) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
        }
        match (less, greater) {
            (true, true) => None,
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => Some(Ordering::Equal),
        }
    }

    /// Total order over concurrent clocks: componentwise when comparable,
    /// else break ties on the owning `vt_id` (Kleppmann-style).
    pub fn total_cmp(&self, other: &VectorClock) -> Ordering {
        match self.partial_cmp_causal(other) {
            Some(ord) => ord,
            None => self.vt_id.cmp(&other.vt_id),
        }
    }

    /// True iff every component of `self` is <= the matching component of
    /// `other`. Used to check `max_done_clk <= id_to_clk[req_id]`.
    pub fn leq(&self, other: &VectorClock) -> bool {
        self.clock
            .iter()
            .zip(other.clock.iter())
            .all(|(a, b)| a <= b)
    }
}

/// The per-shard queue-sequence-number vector owned by one timestamper.
/// `qts[s]` is the sequence number of the next message this timestamper
/// will send to shard `s`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueueTimestamp {
    pub qts: Vec<u64>,
}

impl QueueTimestamp {
    pub fn new(n_shards: usize) -> Self {
        QueueTimestamp {
            qts: vec![0; n_shards],
        }
    }

    /// Increments `qts[shard]` and returns the new value.
    pub fn increment(&mut self, shard: ShardId) -> u64 {
        let slot = &mut self.qts[shard.0 as usize];
        *slot += 1;
        *slot
    }

    pub fn get(&self, shard: ShardId) -> u64 {
        self.qts[shard.0 as usize]
    }
}

/// A monotonically increasing generator of request ids, local to one
/// timestamper. Uniqueness across the cluster comes from the coordinating
/// timestamper retaining ownership of the id, not from embedding `vt_id`.
#[derive(Clone, Debug, Default)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        IdGenerator { next: 1 }
    }

    pub fn generate(&mut self) -> RequestId {
        let id = RequestId(self.next);
        self.next += 1;
        id
    }
}
