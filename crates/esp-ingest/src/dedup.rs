//! Event id deduplication
//!
//! [`DedupIndex`] remembers ids accepted by earlier batches of this process.
//! It keeps the most recent `capacity` ids exactly; older ids are evicted into
//! a bloom filter, so an evicted id that reappears is reported as a candidate
//! for re-verification rather than waved through. The sink's unique
//! constraint stays the final authority either way.
//!
//! [`BatchDeduplicator`] applies the index to one batch and also catches
//! repeats inside the batch itself. Ids are only merged into the index once
//! the batch is checkpointed, via [`DedupIndex::merge`].

use esp_common::types::Event;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

const BLOOM_BITS_PER_ID: usize = 16;
const BLOOM_MIN_BITS: usize = 1 << 12;
const BLOOM_HASHES: u64 = 7;

/// What the index knows about an id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Accepted earlier and still held exactly
    Present,
    /// Possibly accepted earlier and since evicted
    MaybeEvicted,
    Absent,
}

/// Outcome of admitting one event into a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// May have been accepted long ago; the sink decides
    Recheck,
    Duplicate,
}

impl Admission {
    /// Whether the event goes on to the sink
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Duplicate)
    }
}

/// Fixed-size bloom filter over evicted ids
#[derive(Debug, Clone)]
struct EvictedFilter {
    bits: Vec<u64>,
    num_bits: u64,
    inserted: usize,
}

impl EvictedFilter {
    fn with_capacity(expected: usize) -> Self {
        let num_bits = expected.saturating_mul(BLOOM_BITS_PER_ID).max(BLOOM_MIN_BITS);
        let words = num_bits.div_ceil(64);
        Self {
            bits: vec![0; words],
            num_bits: (words * 64) as u64,
            inserted: 0,
        }
    }

    /// Double hashing: bit_i = h1 + i * h2
    fn positions(&self, id: &str) -> impl Iterator<Item = u64> + '_ {
        let mut first = DefaultHasher::new();
        id.hash(&mut first);
        let h1 = first.finish();

        let mut second = DefaultHasher::new();
        (id, 0x9e37_79b9_u32).hash(&mut second);
        let h2 = second.finish() | 1;

        (0..BLOOM_HASHES).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    fn insert(&mut self, id: &str) {
        let positions: Vec<u64> = self.positions(id).collect();
        for bit in positions {
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
        self.inserted += 1;
    }

    fn might_contain(&self, id: &str) -> bool {
        if self.inserted == 0 {
            return false;
        }
        self.positions(id)
            .all(|bit| self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }
}

/// Process-lifetime memory of accepted event ids
#[derive(Debug, Clone)]
pub struct DedupIndex {
    capacity: usize,
    exact: HashSet<String>,
    order: VecDeque<String>,
    evicted: EvictedFilter,
}

impl DedupIndex {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            exact: HashSet::new(),
            order: VecDeque::new(),
            evicted: EvictedFilter::with_capacity(capacity),
        }
    }

    pub fn lookup(&self, event_id: &str) -> Membership {
        if self.exact.contains(event_id) {
            Membership::Present
        } else if self.evicted.might_contain(event_id) {
            Membership::MaybeEvicted
        } else {
            Membership::Absent
        }
    }

    /// Record ids of a committed batch, evicting the oldest beyond capacity
    pub fn merge<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        for id in ids {
            if !self.exact.insert(id.clone()) {
                continue;
            }
            self.order.push_back(id);

            while self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.exact.remove(&oldest);
                    self.evicted.insert(&oldest);
                }
            }
        }
    }

    /// Ids held exactly
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    pub fn evicted_count(&self) -> usize {
        self.evicted.inserted
    }
}

/// Per-batch deduplication pass
///
/// First occurrence wins, both within the batch and against the index.
pub struct BatchDeduplicator<'a> {
    index: &'a DedupIndex,
    seen: HashSet<String>,
    admitted: Vec<String>,
    rechecked: usize,
}

impl<'a> BatchDeduplicator<'a> {
    pub fn new(index: &'a DedupIndex) -> Self {
        Self {
            index,
            seen: HashSet::new(),
            admitted: Vec::new(),
            rechecked: 0,
        }
    }

    pub fn admit(&mut self, event: &Event) -> Admission {
        let id = event.event_id.as_str();
        if self.seen.contains(id) {
            return Admission::Duplicate;
        }

        let admission = match self.index.lookup(id) {
            Membership::Present => return Admission::Duplicate,
            Membership::MaybeEvicted => {
                self.rechecked += 1;
                Admission::Recheck
            },
            Membership::Absent => Admission::Accepted,
        };

        self.seen.insert(id.to_string());
        self.admitted.push(id.to_string());
        admission
    }

    pub fn rechecked(&self) -> usize {
        self.rechecked
    }

    /// Admitted ids in admission order, for [`DedupIndex::merge`]
    pub fn into_admitted(self) -> Vec<String> {
        self.admitted
    }
}
