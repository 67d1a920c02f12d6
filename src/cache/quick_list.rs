//! Quick Eviction List
//!
//! Bounded log of recently inserted `(key, deadline)` pairs. Sweeping it is
//! cheap compared to scanning the whole store, so short-lived entries are
//! caught frequently while the full sweep stays rare.
//!
//! # Design
//!
//! - Two pre-allocated slot buffers plus an active-index flag; an eviction pass
//!   compacts survivors into the inactive buffer and flips the flag
//! - Appends claim a slot with a CAS on the fill count (never past capacity)
//!   under a shared guard, then write it; they never wait on a pass
//! - Passes are serialized by a try-lock and skipped when it is held
//! - Not authoritative: entries may be stale or duplicated; every removal
//!   re-checks the store

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::atomic::AtomicCell;
use parking_lot::{Mutex, MutexGuard, RwLock};

use super::store::EntryStore;
use crate::time::Timestamp;

type Slot<K> = AtomicCell<Option<(K, Timestamp)>>;

fn alloc_slots<K>(len: usize) -> Box<[Slot<K>]> {
    (0..len).map(|_| AtomicCell::new(None)).collect()
}

struct Buffers<K> {
    slots: [Box<[Slot<K>]>; 2],
    active: usize,
}

impl<K> Buffers<K> {
    #[inline]
    fn active(&self) -> &[Slot<K>] {
        &self.slots[self.active]
    }

    #[inline]
    fn inactive(&self) -> &[Slot<K>] {
        &self.slots[self.active ^ 1]
    }

    fn flip(&mut self) {
        self.active ^= 1;
    }

    fn replace_inactive(&mut self, slots: Box<[Slot<K>]>) {
        self.slots[self.active ^ 1] = slots;
    }
}

/// Outcome of a quick-list eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuickPassReport {
    /// Entries removed from the store
    pub removed: usize,
    /// Entries still tracked after the pass
    pub tracked: usize,
    /// Every live store entry is tracked; a full sweep is unnecessary
    pub contained: bool,
}

/// Per-type quick eviction list
pub struct QuickList<K> {
    buffers: RwLock<Buffers<K>>,
    /// Fill count of the active buffer
    count: AtomicUsize,
    /// Some insert since the last refill was not tracked
    overflowed: AtomicBool,
    /// Held for the duration of any pass
    pass_lock: Mutex<()>,
    min_len: usize,
    resize_percent: f64,
}

impl<K> QuickList<K> {
    /// Create a list with both buffers at `min_len` slots
    pub fn new(min_len: usize, resize_percent: f64) -> Self {
        let min_len = min_len.max(1);
        Self {
            buffers: RwLock::new(Buffers {
                slots: [alloc_slots(min_len), alloc_slots(min_len)],
                active: 0,
            }),
            count: AtomicUsize::new(0),
            overflowed: AtomicBool::new(false),
            pass_lock: Mutex::new(()),
            min_len,
            resize_percent,
        }
    }

    /// Track `key`. A full list silently drops it and marks itself overflowed.
    pub fn add(&self, key: K, expiry: Timestamp) -> bool {
        let buffers = self.buffers.read();
        let slots = buffers.active();
        let mut claimed = self.count.load(Ordering::Acquire);
        loop {
            if claimed >= slots.len() {
                self.overflowed.store(true, Ordering::Relaxed);
                return false;
            }
            match self.count.compare_exchange_weak(
                claimed,
                claimed + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => claimed = actual,
            }
        }
        slots[claimed].store(Some((key, expiry)));
        true
    }

    /// Number of tracked entries
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots in the active buffer
    pub fn capacity(&self) -> usize {
        self.buffers.read().active().len()
    }

    pub fn min_len(&self) -> usize {
        self.min_len
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// A pass is currently running
    pub fn is_busy(&self) -> bool {
        self.pass_lock.is_locked()
    }

    /// Start a pass unless one is already running
    pub fn try_begin(&self) -> Option<QuickListPass<'_, K>> {
        self.pass_lock.try_lock().map(|guard| QuickListPass {
            list: self,
            _guard: guard,
        })
    }

    /// Start a pass, waiting for a running one to finish.
    ///
    /// Only for background work and clears; the timer paths use [`try_begin`].
    ///
    /// [`try_begin`]: QuickList::try_begin
    pub fn begin(&self) -> QuickListPass<'_, K> {
        QuickListPass {
            list: self,
            _guard: self.pass_lock.lock(),
        }
    }

    /// Buffer length that tracks `store_len` at the configured percentage
    fn target_len(&self, store_len: usize) -> usize {
        let scaled = (store_len as f64 * self.resize_percent / 100.0) as usize;
        scaled.max(self.min_len)
    }
}

/// Exclusive access to the list's buffers for one pass
pub struct QuickListPass<'a, K> {
    list: &'a QuickList<K>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a, K: Eq + Hash + Clone> QuickListPass<'a, K> {
    /// Remove tracked entries whose stored deadline has passed.
    ///
    /// Survivors are compacted into the inactive buffer, which then becomes
    /// active. With `resize`, a pass that did not contain the store grows the
    /// next buffer toward the configured share of the store.
    pub fn evict<V>(&self, store: &EntryStore<K, V>, now: Timestamp, resize: bool) -> QuickPassReport {
        let list = self.list;
        let mut kept = 0;
        let mut removed = 0;
        let mut dropped = false;
        let mut unwritten = Vec::new();

        let seen = {
            let buffers = list.buffers.read();
            let active = buffers.active();
            let inactive = buffers.inactive();
            let seen = list.count.load(Ordering::Acquire).min(active.len());

            for (index, slot) in active[..seen].iter().enumerate() {
                let Some((key, expiry)) = slot.take() else {
                    // Claimed but not yet written by its appender.
                    unwritten.push(index);
                    continue;
                };
                let deadline = if now > expiry {
                    if store.remove_if_expired(&key, now) {
                        removed += 1;
                        continue;
                    }
                    // Re-saved with a later deadline, or already gone.
                    match store.expiry_of(&key) {
                        Some(current) => current,
                        None => continue,
                    }
                } else {
                    expiry
                };
                if kept < inactive.len() {
                    inactive[kept].store(Some((key, deadline)));
                    kept += 1;
                } else {
                    dropped = true;
                }
            }
            seen
        };

        {
            let mut buffers = list.buffers.write();
            let total = list.count.load(Ordering::Acquire).min(buffers.active().len());
            let late = unwritten.into_iter().chain(seen..total);
            let active = buffers.active();
            let inactive = buffers.inactive();
            for index in late {
                if let Some(pair) = active[index].take() {
                    if kept < inactive.len() {
                        inactive[kept].store(Some(pair));
                        kept += 1;
                    } else {
                        dropped = true;
                    }
                }
            }
            buffers.flip();
            list.count.store(kept, Ordering::Release);
        }

        if dropped {
            list.overflowed.store(true, Ordering::Relaxed);
        }

        let store_len = store.count();
        let contained = !list.is_overflowed() && store_len <= kept;
        if resize {
            self.resize_inactive(store_len, kept, contained);
        }

        QuickPassReport {
            removed,
            tracked: kept,
            contained,
        }
    }

    /// Refill from a fresh store snapshot, soonest deadlines first.
    ///
    /// Used after a full sweep so tracking resumes with maximal coverage.
    /// Returns the number of tracked entries.
    pub fn pull_from_store<V>(&self, store: &EntryStore<K, V>) -> usize {
        let list = self.list;
        let store_len = store.count();
        let target = list.target_len(store_len);
        if list.buffers.read().inactive().len() < target {
            let slots = alloc_slots(target);
            list.buffers.write().replace_inactive(slots);
        }

        let seen = list.count.load(Ordering::Acquire);
        let mut kept;
        let mut dropped = false;
        {
            let buffers = list.buffers.read();
            let inactive = buffers.inactive();
            let snapshot = store.tracked_snapshot(inactive.len());
            kept = snapshot.len();
            for (slot, pair) in inactive.iter().zip(snapshot) {
                slot.store(Some(pair));
            }
        }

        let total = {
            let mut buffers = list.buffers.write();
            let total = list.count.load(Ordering::Acquire).min(buffers.active().len());
            let active = buffers.active();
            let inactive = buffers.inactive();
            // Appended after the snapshot started; may not be in it.
            for slot in &active[seen.min(total)..total] {
                if let Some(pair) = slot.take() {
                    if kept < inactive.len() {
                        inactive[kept].store(Some(pair));
                        kept += 1;
                    } else {
                        dropped = true;
                    }
                }
            }
            buffers.flip();
            list.count.store(kept, Ordering::Release);
            // Set before adds can reach the new buffer and raise it themselves.
            let untracked = store_len.max(store.count()) > kept;
            list.overflowed.store(dropped || untracked, Ordering::Relaxed);
            total
        };

        // Release keys still held by the retired buffer.
        {
            let buffers = list.buffers.read();
            for slot in &buffers.inactive()[..total] {
                slot.take();
            }
        }
        kept
    }

    /// Remove the `n` most recently tracked entries from the store.
    ///
    /// Returns how many store entries were actually removed; fewer than `n`
    /// when the list holds fewer or some keys were already gone.
    pub fn trim<V>(&self, store: &EntryStore<K, V>, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let list = self.list;
        let victims: Vec<K> = {
            let buffers = list.buffers.write();
            let active = buffers.active();
            let count = list.count.load(Ordering::Acquire).min(active.len());
            let start = count.saturating_sub(n);
            let victims = active[start..count]
                .iter()
                .filter_map(|slot| slot.take())
                .map(|(key, _)| key)
                .collect();
            list.count.store(start, Ordering::Release);
            victims
        };
        victims.iter().filter(|key| store.remove(key)).count()
    }

    /// Forget everything tracked
    pub fn reset(&self) {
        let list = self.list;
        let buffers = list.buffers.write();
        let active = buffers.active();
        let count = list.count.load(Ordering::Acquire).min(active.len());
        for slot in &active[..count] {
            slot.take();
        }
        list.count.store(0, Ordering::Release);
        list.overflowed.store(false, Ordering::Relaxed);
    }

    /// Grow (or, on a contained pass, shrink) the buffer used by the next pass
    fn resize_inactive(&self, store_len: usize, kept: usize, contained: bool) {
        let list = self.list;
        let current = list.buffers.read().inactive().len();
        let target = list.target_len(store_len);
        let new_len = if !contained && target > current {
            target
        } else if contained && current > list.min_len {
            let floor = target.max(kept.saturating_mul(2));
            if current >= floor.saturating_mul(4) {
                floor
            } else {
                return;
            }
        } else {
            return;
        };
        let slots = alloc_slots(new_len);
        list.buffers.write().replace_inactive(slots);
    }
}

// =============================================================================
// Tests
// =============================================================================
