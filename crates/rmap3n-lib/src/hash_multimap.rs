//! Feature -> location multimap with bounded bucket sizes
//!
//! Open-addressed hash table with linear probing. Each occupied slot owns a
//! key, a small bucket size, and a capacity plus offset into a chunk
//! allocated value store. Value arrays grow through a power-of-two schedule
//! capped at the representable maximum of the bucket size type; superseded
//! arrays are never reclaimed individually, only in bulk on teardown.
//! Erased slots become tombstones: probes continue across them, and a
//! rehash discards them.

use crate::hasher::DeterministicHasher;
use crate::types::{BucketSizeType, Feature, Location};

/// Values per allocator chunk; must be a power of two
const CHUNK_CAPACITY: usize = 1 << 20;

/// Initial slot count of an empty table
const MIN_SLOT_COUNT: usize = 64;

/// Bump allocator that owns fixed-size slabs of locations.
///
/// Allocations never move and are never freed individually; superseded
/// bucket arrays leak inside their slab until the whole store is cleared.
#[derive(Debug, Default)]
struct ChunkAllocator {
    chunks: Vec<Vec<Location>>,
}

impl ChunkAllocator {
    /// Allocate `n` slots and return their address
    fn alloc(&mut self, n: usize) -> u64 {
        debug_assert!(n <= CHUNK_CAPACITY);
        let need_new = match self.chunks.last() {
            Some(c) => c.len() + n > CHUNK_CAPACITY,
            None => true,
        };
        if need_new {
            self.chunks.push(Vec::with_capacity(CHUNK_CAPACITY));
        }
        let chunk_idx = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_idx];
        let offset = chunk.len();
        chunk.resize(offset + n, Location::default());
        ((chunk_idx as u64) << CHUNK_CAPACITY.trailing_zeros()) | offset as u64
    }

    #[inline]
    fn split_addr(addr: u64) -> (usize, usize) {
        let bits = CHUNK_CAPACITY.trailing_zeros();
        ((addr >> bits) as usize, (addr & (CHUNK_CAPACITY as u64 - 1)) as usize)
    }

    #[inline]
    fn slice(&self, addr: u64, len: usize) -> &[Location] {
        let (c, o) = Self::split_addr(addr);
        &self.chunks[c][o..o + len]
    }

    #[inline]
    fn slice_mut(&mut self, addr: u64, len: usize) -> &mut [Location] {
        let (c, o) = Self::split_addr(addr);
        &mut self.chunks[c][o..o + len]
    }

    /// Release all slabs
    fn clear(&mut self) {
        self.chunks.clear();
        self.chunks.shrink_to_fit();
    }

    /// Reset logical sizes but keep slab memory for reuse
    fn clear_without_deallocation(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    Occupied,
    Deleted,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    key: Feature,
    size: BucketSizeType,
    capacity: BucketSizeType,
    addr: u64,
    state: SlotState,
}

impl Slot {
    const fn empty() -> Self {
        Self {
            key: 0,
            size: 0,
            capacity: 0,
            addr: 0,
            state: SlotState::Empty,
        }
    }
}

/// Handle to a bucket inside a [`HashMultimap`]
pub type BucketHandle = usize;

/// Feature -> location multimap ("heart of the database")
pub struct HashMultimap {
    slots: Vec<Slot>,
    store: ChunkAllocator,
    hasher: DeterministicHasher,
    occupied: usize,
    tombstones: usize,
    value_count: u64,
    max_load_factor: f32,
}

impl HashMultimap {
    /// Create an empty table with the default load factor
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::empty(); MIN_SLOT_COUNT],
            store: ChunkAllocator::default(),
            hasher: DeterministicHasher::default(),
            occupied: 0,
            tombstones: 0,
            value_count: 0,
            max_load_factor: crate::constants::DEFAULT_MAX_LOAD_FACTOR,
        }
    }

    /// Largest bucket cardinality the size type can track
    pub const fn max_bucket_size() -> usize {
        BucketSizeType::MAX as usize
    }

    /// Set the maximum load factor; rehashes immediately if exceeded
    pub fn set_max_load_factor(&mut self, f: f32) {
        self.max_load_factor = f.clamp(0.05, 0.99);
        if self.over_loaded(0) {
            self.rehash(self.slots.len() * 2);
        }
    }

    /// Current maximum load factor
    pub fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    /// Number of slots in the table
    pub fn bucket_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.occupied
    }

    /// Number of live keys whose bucket holds at least one value
    pub fn non_empty_bucket_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Occupied && s.size > 0)
            .count()
    }

    /// Total number of stored values
    pub fn value_count(&self) -> u64 {
        self.value_count
    }

    #[inline]
    fn over_loaded(&self, incoming: usize) -> bool {
        (self.occupied + self.tombstones + incoming) as f32
            > self.max_load_factor * self.slots.len() as f32
    }

    #[inline]
    fn slot_index(&self, key: Feature) -> usize {
        (self.hasher.hash_u64(key as u64) as usize) & (self.slots.len() - 1)
    }

    /// Find the bucket of `key`
    pub fn find(&self, key: Feature) -> Option<BucketHandle> {
        let mask = self.slots.len() - 1;
        let mut i = self.slot_index(key);
        loop {
            match self.slots[i].state {
                SlotState::Empty => return None,
                SlotState::Occupied if self.slots[i].key == key => return Some(i),
                // tombstones and foreign keys continue the probe
                _ => i = (i + 1) & mask,
            }
        }
    }

    /// Insert `value` into the bucket of `key`, creating the bucket on demand.
    ///
    /// A saturated bucket (size at the size-type maximum) ignores further
    /// values. Returns a handle to the bucket.
    pub fn insert(&mut self, key: Feature, value: Location) -> BucketHandle {
        if self.over_loaded(1) {
            self.rehash(self.slots.len() * 2);
        }
        let mask = self.slots.len() - 1;
        let mut i = self.slot_index(key);
        let mut first_tombstone: Option<usize> = None;
        let slot_idx = loop {
            match self.slots[i].state {
                SlotState::Empty => {
                    let idx = first_tombstone.unwrap_or(i);
                    if self.slots[idx].state == SlotState::Deleted {
                        self.tombstones -= 1;
                    }
                    self.slots[idx] = Slot {
                        key,
                        size: 0,
                        capacity: 0,
                        addr: 0,
                        state: SlotState::Occupied,
                    };
                    self.occupied += 1;
                    break idx;
                }
                SlotState::Occupied if self.slots[i].key == key => break i,
                SlotState::Deleted => {
                    first_tombstone.get_or_insert(i);
                    i = (i + 1) & mask;
                }
                _ => i = (i + 1) & mask,
            }
        };
        self.append_value(slot_idx, value);
        slot_idx
    }

    fn append_value(&mut self, idx: BucketHandle, value: Location) {
        let (size, capacity) = {
            let s = &self.slots[idx];
            (s.size as usize, s.capacity as usize)
        };
        if size == Self::max_bucket_size() {
            return;
        }
        if size == capacity {
            self.grow_bucket(idx);
        }
        let slot = self.slots[idx];
        self.store.slice_mut(slot.addr, slot.size as usize + 1)[slot.size as usize] = value;
        self.slots[idx].size += 1;
        self.value_count += 1;
    }

    /// Move the bucket's values into a larger array; the old array leaks
    /// inside its slab until teardown.
    fn grow_bucket(&mut self, idx: BucketHandle) {
        let slot = self.slots[idx];
        let new_capacity = if slot.capacity == 0 {
            2
        } else {
            ((slot.capacity as usize) * 2).min(Self::max_bucket_size())
        };
        let new_addr = self.store.alloc(new_capacity);
        if slot.size > 0 {
            let (oc, oo) = ChunkAllocator::split_addr(slot.addr);
            let (nc, no) = ChunkAllocator::split_addr(new_addr);
            if oc == nc {
                let chunk = &mut self.store.chunks[oc];
                chunk.copy_within(oo..oo + slot.size as usize, no);
            } else {
                let (old_chunk, new_chunk) = if oc < nc {
                    let (a, b) = self.store.chunks.split_at_mut(nc);
                    (&a[oc], &mut b[0])
                } else {
                    unreachable!("allocations only move to younger chunks")
                };
                new_chunk[no..no + slot.size as usize]
                    .copy_from_slice(&old_chunk[oo..oo + slot.size as usize]);
            }
        }
        self.slots[idx].addr = new_addr;
        self.slots[idx].capacity = new_capacity as BucketSizeType;
    }

    /// The key stored in a bucket
    pub fn bucket_key(&self, idx: BucketHandle) -> Feature {
        self.slots[idx].key
    }

    /// Number of values in a bucket
    pub fn bucket_size(&self, idx: BucketHandle) -> usize {
        self.slots[idx].size as usize
    }

    /// The values of a bucket
    pub fn bucket_values(&self, idx: BucketHandle) -> &[Location] {
        let slot = &self.slots[idx];
        if slot.size == 0 {
            return &[];
        }
        self.store.slice(slot.addr, slot.size as usize)
    }

    /// Cap the bucket at `max_size` values; released slots are not reclaimed
    pub fn shrink(&mut self, idx: BucketHandle, max_size: usize) {
        let size = self.slots[idx].size as usize;
        if size > max_size {
            self.slots[idx].size = max_size as BucketSizeType;
            self.value_count -= (size - max_size) as u64;
        }
    }

    /// Remove the bucket, leaving a tombstone in its slot
    pub fn erase(&mut self, idx: BucketHandle) {
        debug_assert_eq!(self.slots[idx].state, SlotState::Occupied);
        self.value_count -= self.slots[idx].size as u64;
        self.slots[idx].size = 0;
        self.slots[idx].state = SlotState::Deleted;
        self.occupied -= 1;
        self.tombstones += 1;
    }

    /// Re-seat all live keys into a table of at least `new_slot_count` slots,
    /// dropping tombstones. Value arrays do not move.
    fn rehash(&mut self, new_slot_count: usize) {
        let new_len = new_slot_count.next_power_of_two().max(MIN_SLOT_COUNT);
        let old = std::mem::replace(&mut self.slots, vec![Slot::empty(); new_len]);
        self.tombstones = 0;
        let mask = new_len - 1;
        for slot in old {
            if slot.state != SlotState::Occupied {
                continue;
            }
            let mut i = (self.hasher.hash_u64(slot.key as u64) as usize) & mask;
            while self.slots[i].state == SlotState::Occupied {
                i = (i + 1) & mask;
            }
            self.slots[i] = slot;
        }
    }

    /// Iterate over all non-empty buckets in table order
    pub fn buckets(&self) -> impl Iterator<Item = (Feature, &[Location])> {
        self.slots.iter().filter_map(move |slot| {
            if slot.state == SlotState::Occupied && slot.size > 0 {
                Some((
                    slot.key,
                    self.store.slice(slot.addr, slot.size as usize),
                ))
            } else {
                None
            }
        })
    }

    /// Handles of all live buckets, in table order.
    /// Useful when buckets must be modified during the pass.
    pub fn bucket_handles(&self) -> Vec<BucketHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == SlotState::Occupied)
            .map(|(i, _)| i)
            .collect()
    }

    /// Drop all contents and release value memory
    pub fn clear(&mut self) {
        self.slots = vec![Slot::empty(); MIN_SLOT_COUNT];
        self.store.clear();
        self.occupied = 0;
        self.tombstones = 0;
        self.value_count = 0;
    }

    /// Drop all contents but keep slab memory for reuse between batches
    pub fn clear_without_deallocation(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::empty();
        }
        self.store.clear_without_deallocation();
        self.occupied = 0;
        self.tombstones = 0;
        self.value_count = 0;
    }
}

impl Default for HashMultimap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HashMultimap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashMultimap")
            .field("slots", &self.slots.len())
            .field("keys", &self.occupied)
            .field("values", &self.value_count)
            .finish()
    }
}
