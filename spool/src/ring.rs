//! Bounded multi-producer, multi-consumer ring buffer.
//!
//! This module provides the work queue shared by the batch writer's producers
//! and its worker pool. Producers never wait for space: a publish either claims
//! a slot immediately or hands the item back. Consumers compete for items and
//! each item is taken by exactly one of them.
//!
//! # Key Features
//!
//! - Fixed, power-of-two capacity allocated once at construction
//! - Lock-free publish and take on the slot array
//! - Blocking take that parks idle consumers and wakes them on publish
//! - Halt signal that lets consumers drain what is queued and then exit
//!
//! # Design
//!
//! Items live in a [`crossbeam_queue::ArrayQueue`], whose per-slot stamps give
//! the dispatch semantics: a consumer's CAS on the head takes an item, so no
//! item is handed out twice.
//!
//! Admission is gated separately by the `claimed` counter. A publish reserves
//! a slot before pushing and the slot stays reserved after a consumer takes
//! the item, until that consumer calls [`release`](WorkRing::release). At
//! most `capacity` items are therefore queued or being worked on at any time,
//! however many consumers there are.
//!
//! The mutex and condvar are only touched on the slow path, when a consumer
//! finds the ring empty and has to park. Parking is bounded by
//! [`PARK_TIMEOUT`] so a wakeup that races with a consumer going to sleep
//! costs at most one timeout.
//!
//! [`halt`](WorkRing::halt) returns only once every publish that got past the
//! halt check has finished its push. After it returns nothing new can enter
//! the ring, so a final [`try_take`](WorkRing::try_take) sweep sees everything.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

use crate::error::{ConfigError, Result};

/// Upper bound on how long an idle consumer sleeps before re-checking the ring.
pub const PARK_TIMEOUT: Duration = Duration::from_millis(50);

/// Why a publish was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// Every slot is reserved by a queued or in-progress item.
    Full,
    /// The ring was halted; no consumer will take new items.
    Halted,
}

/// A fixed-capacity work queue.
///
/// # Thread Safety
///
/// All methods take `&self`; share the ring behind an `Arc`. Any number of
/// threads may publish and take concurrently.
#[derive(Debug)]
pub struct WorkRing<T> {
    /// The slot array.
    slots: ArrayQueue<T>,
    /// Items published and not yet released.
    claimed: AtomicUsize,
    /// Publishers between their halt check and the end of their push.
    publishing: AtomicUsize,
    /// Set once by [`halt`](Self::halt); never cleared.
    halted: AtomicBool,
    /// Number of consumers currently parked on `ready`.
    sleepers: AtomicUsize,
    /// Guards the parking handshake only, never the slots.
    park: Mutex<()>,
    ready: Condvar,
}

impl<T> WorkRing<T> {
    /// Creates a ring with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRingBufferSize`] if `capacity` is zero or
    /// not a power of two.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if !capacity.is_power_of_two() {
            return Err(ConfigError::InvalidRingBufferSize { size: capacity }.into());
        }
        Ok(Self {
            slots: ArrayQueue::new(capacity),
            claimed: AtomicUsize::new(0),
            publishing: AtomicUsize::new(0),
            halted: AtomicBool::new(false),
            sleepers: AtomicUsize::new(0),
            park: Mutex::new(()),
            ready: Condvar::new(),
        })
    }

    /// Publishes `item` without blocking.
    ///
    /// On success the item holds one slot until a consumer takes it and calls
    /// [`release`](Self::release).
    ///
    /// # Errors
    ///
    /// Hands `item` back together with the reason when every slot is reserved
    /// or the ring is halted.
    pub fn try_publish(&self, item: T) -> std::result::Result<(), (Rejected, T)> {
        self.publishing.fetch_add(1, Ordering::SeqCst);
        let pushed = self.claim_and_push(item);
        self.publishing.fetch_sub(1, Ordering::SeqCst);
        pushed?;

        if self.sleepers.load(Ordering::SeqCst) > 0 {
            let _guard = self.park.lock();
            self.ready.notify_one();
        }
        Ok(())
    }

    fn claim_and_push(&self, item: T) -> std::result::Result<(), (Rejected, T)> {
        // SeqCst pairs with `halt`: either this load sees the flag, or `halt`
        // sees this publisher in `publishing` and waits for the push.
        if self.halted.load(Ordering::SeqCst) {
            return Err((Rejected::Halted, item));
        }
        let capacity = self.slots.capacity();
        if self
            .claimed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < capacity).then_some(n + 1))
            .is_err()
        {
            return Err((Rejected::Full, item));
        }
        self.slots.push(item).map_err(|item| {
            self.release();
            (Rejected::Full, item)
        })
    }

    /// Frees the slot held by an item a consumer has finished with.
    pub fn release(&self) {
        let _ = self
            .claimed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Takes the next item without blocking.
    pub fn try_take(&self) -> Option<T> {
        self.slots.pop()
    }

    /// Takes the next item, parking while the ring is empty.
    ///
    /// Returns `None` once the ring has been halted and fully drained.
    pub fn take(&self) -> Option<T> {
        loop {
            if let Some(item) = self.slots.pop() {
                return Some(item);
            }

            let mut guard = self.park.lock();
            self.sleepers.fetch_add(1, Ordering::SeqCst);
            // Re-check after announcing ourselves so a publisher that missed
            // the sleeper count cannot strand an item.
            if let Some(item) = self.slots.pop() {
                self.sleepers.fetch_sub(1, Ordering::SeqCst);
                return Some(item);
            }
            if self.halted.load(Ordering::Acquire) {
                self.sleepers.fetch_sub(1, Ordering::SeqCst);
                return None;
            }
            self.ready.wait_for(&mut guard, PARK_TIMEOUT);
            self.sleepers.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Stops accepting publishes and wakes every parked consumer.
    ///
    /// Items already in the ring stay there; consumers keep taking them until
    /// the ring is empty. Returns once no publish can still add an item.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        {
            let _guard = self.park.lock();
            self.ready.notify_all();
        }
        // Publishes never block, so this wait is a handful of pushes at most.
        while self.publishing.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
    }

    /// Whether [`halt`](Self::halt) has been called.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Number of items currently waiting in the ring.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Items published and not yet released: waiting plus in progress.
    pub fn in_flight(&self) -> usize {
        self.claimed.load(Ordering::Acquire)
    }

    /// Whether no items are waiting.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether every slot is reserved.
    pub fn is_full(&self) -> bool {
        self.in_flight() >= self.slots.capacity()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}
