// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot and interval timers driven by the message loop.
//!
//! Entries live in a slot table; an id packs `(slot, salt)` so a stale id
//! can never touch a reused slot. The wheel only does the bookkeeping —
//! the loop invokes the returned callbacks, so a slow callback delays
//! every other entry by the same amount (scheduling is cooperative).

use crate::engine::CallbackRef;
use crate::error::{CoreError, CoreResult};

pub type TimerId = u32;

/// Timeout reported when no timers are live.
pub const FOREVER: u32 = 0x7FFF_FFFF;

const INITIAL_SLOTS: usize = 2;
const GROW_SLOTS: usize = 2;
const MAX_SLOTS: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    id: TimerId,
    /// Milliseconds; positive = periodic, negative = one-shot, zero = free.
    interval: i64,
    countdown: u32,
    callback: CallbackRef,
}

/// A timer due for invocation, in slot-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub slot: usize,
    pub callback: CallbackRef,
    pub periodic: bool,
}

#[derive(Debug)]
pub struct TimerWheel {
    entries: Vec<Entry>,
    salt: u32,
    /// Deadline computed by the last sweep; `None` forces the next
    /// [`TimerWheel::run`] to sweep and recompute.
    deadline: Option<u32>,
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_of(id: TimerId) -> usize {
    (id >> 24) as usize
}

impl TimerWheel {
    pub fn new() -> Self {
        Self {
            entries: vec![Entry::default(); INITIAL_SLOTS],
            salt: 0,
            deadline: None,
        }
    }

    pub fn set_timeout(&mut self, callback: CallbackRef, ms: u32) -> CoreResult<TimerId> {
        self.register(callback, -(ms.max(1) as i64), ms)
    }

    pub fn set_interval(&mut self, callback: CallbackRef, ms: u32) -> CoreResult<TimerId> {
        if ms == 0 {
            return Err(CoreError::Invalid);
        }
        self.register(callback, ms as i64, ms)
    }

    fn register(&mut self, callback: CallbackRef, interval: i64, countdown: u32) -> CoreResult<TimerId> {
        let slot = match self.entries.iter().position(|e| e.interval == 0) {
            Some(slot) => slot,
            None => {
                if self.entries.len() + GROW_SLOTS > MAX_SLOTS {
                    return Err(CoreError::Resources);
                }
                let slot = self.entries.len();
                self.entries.resize(self.entries.len() + GROW_SLOTS, Entry::default());
                slot
            }
        };
        self.salt = (self.salt + 1) & 0x00FF_FFFF;
        let id = ((slot as u32) << 24) | self.salt;
        self.entries[slot] = Entry { id, interval, countdown, callback };
        // Deadline must be recomputed now that entries changed.
        self.deadline = None;
        Ok(id)
    }

    fn lookup(&self, id: TimerId, periodic: bool) -> CoreResult<Option<usize>> {
        let slot = slot_of(id);
        let Some(entry) = self.entries.get(slot) else {
            return Ok(None);
        };
        if entry.interval == 0 || entry.id != id {
            // Fired one-shot or stale id: nothing to do.
            return Ok(None);
        }
        if periodic != (entry.interval > 0) {
            return Err(CoreError::Invalid);
        }
        Ok(Some(slot))
    }

    /// Cancel a timer. Returns the callback reference to release, or
    /// `None` when the id refers to an already-fired or stale timer.
    pub fn clear(&mut self, id: TimerId, periodic: bool) -> CoreResult<Option<CallbackRef>> {
        let Some(slot) = self.lookup(id, periodic)? else {
            return Ok(None);
        };
        let callback = self.entries[slot].callback;
        self.entries[slot] = Entry::default();
        self.deadline = None;
        Ok(Some(callback))
    }

    /// Restart a timer with a new period. Returns the (unchanged) id.
    pub fn reset(&mut self, id: TimerId, periodic: bool, ms: u32) -> CoreResult<TimerId> {
        if ms == 0 && periodic {
            return Err(CoreError::Invalid);
        }
        let Some(slot) = self.lookup(id, periodic)? else {
            return Err(CoreError::Invalid);
        };
        let entry = &mut self.entries[slot];
        entry.interval = if periodic { ms as i64 } else { -(ms.max(1) as i64) };
        entry.countdown = ms;
        self.deadline = None;
        Ok(id)
    }

    /// Advance the wheel.
    ///
    /// `elapsed` is the wall time since the previous call; `timeout` is the
    /// loop's current wait budget and is updated to the next deadline. The
    /// returned entries are due and must be invoked by the caller, in
    /// order. Periodic entries have already been re-armed, one-shot slots
    /// freed (the caller releases the callback ref of one-shots after
    /// invoking them).
    pub fn run(&mut self, elapsed: u32, timeout: &mut u32) -> Vec<Fired> {
        // Working toward a known deadline with budget left: just account
        // for the elapsed time.
        if self.deadline.is_some() && elapsed < *timeout {
            *timeout -= elapsed;
            return Vec::new();
        }
        let prev = self.deadline.unwrap_or(0);
        let mut fired = Vec::new();
        for slot in 0..self.entries.len() {
            let entry = &mut self.entries[slot];
            if entry.interval == 0 {
                continue;
            }
            if entry.countdown <= prev {
                fired.push(Fired {
                    slot,
                    callback: entry.callback,
                    periodic: entry.interval > 0,
                });
                if entry.interval > 0 {
                    entry.countdown = entry.interval as u32;
                } else {
                    *entry = Entry::default();
                }
            } else {
                entry.countdown -= prev;
            }
        }
        let next = self
            .entries
            .iter()
            .filter(|e| e.interval != 0)
            .map(|e| e.countdown)
            .min()
            .unwrap_or(FOREVER);
        self.deadline = Some(next);
        *timeout = next;
        fired
    }

    /// Number of live entries.
    pub fn live(&self) -> usize {
        self.entries.iter().filter(|e| e.interval != 0).count()
    }

    /// Drop every entry, returning the callback refs to release.
    pub fn clear_all(&mut self) -> Vec<CallbackRef> {
        let callbacks = self
            .entries
            .iter()
            .filter(|e| e.interval != 0)
            .map(|e| e.callback)
            .collect();
        self.entries = vec![Entry::default(); INITIAL_SLOTS];
        self.deadline = None;
        callbacks
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
