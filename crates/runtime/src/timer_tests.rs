// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

/// Drive the wheel the way the loop does: one `run` to pick up new
/// entries, then repeated `run(elapsed = timeout)` ticks.
fn tick(wheel: &mut TimerWheel, timeout: &mut u32) -> Vec<Fired> {
    wheel.run(*timeout, timeout)
}

#[test]
fn one_shot_fires_once_then_slot_frees() {
    let mut wheel = TimerWheel::new();
    let id = wheel.set_timeout(7, 100).unwrap();
    let mut timeout = FOREVER;
    assert!(wheel.run(0, &mut timeout).is_empty());
    assert_eq!(timeout, 100);

    let fired = tick(&mut wheel, &mut timeout);
    assert_eq!(fired, vec![Fired { slot: slot_of(id), callback: 7, periodic: false }]);
    assert_eq!(wheel.live(), 0);
    assert_eq!(timeout, FOREVER);

    // Clearing the fired id is a no-op.
    assert_eq!(wheel.clear(id, false), Ok(None));
}

#[test]
fn zero_timeout_fires_on_next_tick() {
    let mut wheel = TimerWheel::new();
    wheel.set_timeout(1, 0).unwrap();
    let mut timeout = FOREVER;
    // First run picks up the new entry with countdown 0 and fires it.
    let fired = wheel.run(0, &mut timeout);
    assert_eq!(fired.len(), 1);
    assert_eq!(wheel.live(), 0);
}

#[test]
fn interval_rearms_itself() {
    let mut wheel = TimerWheel::new();
    wheel.set_interval(9, 50).unwrap();
    let mut timeout = FOREVER;
    assert!(wheel.run(0, &mut timeout).is_empty());
    let mut count = 0;
    for _ in 0..3 {
        count += tick(&mut wheel, &mut timeout).len();
    }
    assert_eq!(count, 3);
    assert_eq!(wheel.live(), 1);
}

#[test]
fn interval_cleared_after_two_periods_fires_twice() {
    let mut wheel = TimerWheel::new();
    let id = wheel.set_interval(3, 50).unwrap();
    let mut timeout = FOREVER;
    wheel.run(0, &mut timeout);
    let mut fired = 0;
    fired += tick(&mut wheel, &mut timeout).len(); // ~50ms
    fired += tick(&mut wheel, &mut timeout).len(); // ~100ms
    // 30ms later a message arrives and the script clears the interval.
    let mut budget = timeout;
    assert!(wheel.run(30, &mut budget).is_empty());
    assert_eq!(wheel.clear(id, true).unwrap(), Some(3));
    assert_eq!(fired, 2);
    assert_eq!(wheel.live(), 0);
}

#[test]
fn equal_deadlines_fire_in_slot_order() {
    let mut wheel = TimerWheel::new();
    wheel.set_timeout(1, 40).unwrap();
    wheel.set_timeout(2, 40).unwrap();
    wheel.set_timeout(3, 40).unwrap();
    let mut timeout = FOREVER;
    wheel.run(0, &mut timeout);
    let fired = tick(&mut wheel, &mut timeout);
    let callbacks: Vec<_> = fired.iter().map(|f| f.callback).collect();
    assert_eq!(callbacks, vec![1, 2, 3]);
}

#[test]
fn nearer_deadline_wins_and_remainder_carries() {
    let mut wheel = TimerWheel::new();
    wheel.set_timeout(1, 100).unwrap();
    wheel.set_timeout(2, 30).unwrap();
    let mut timeout = FOREVER;
    wheel.run(0, &mut timeout);
    assert_eq!(timeout, 30);
    let fired = tick(&mut wheel, &mut timeout);
    assert_eq!(fired[0].callback, 2);
    // The 100ms timer has 70ms left.
    assert_eq!(timeout, 70);
}

#[test]
fn elapsed_short_of_deadline_only_discounts_budget() {
    let mut wheel = TimerWheel::new();
    wheel.set_timeout(1, 100).unwrap();
    let mut timeout = FOREVER;
    wheel.run(0, &mut timeout);
    assert!(wheel.run(40, &mut timeout).is_empty());
    assert_eq!(timeout, 60);
}

#[test]
fn stale_id_cannot_touch_reused_slot() {
    let mut wheel = TimerWheel::new();
    let old = wheel.set_timeout(1, 10).unwrap();
    let mut timeout = FOREVER;
    wheel.run(0, &mut timeout);
    tick(&mut wheel, &mut timeout);
    // Slot is reused by a fresh timer; the old id has a different salt.
    let fresh = wheel.set_timeout(2, 10).unwrap();
    assert_eq!(slot_of(old), slot_of(fresh));
    assert_ne!(old, fresh);
    assert_eq!(wheel.clear(old, false), Ok(None));
    assert_eq!(wheel.live(), 1);
}

#[test]
fn kind_mismatch_is_an_error() {
    let mut wheel = TimerWheel::new();
    let id = wheel.set_interval(1, 10).unwrap();
    assert_eq!(wheel.clear(id, false), Err(CoreError::Invalid));
    assert_eq!(wheel.reset(id, false, 20), Err(CoreError::Invalid));
}

#[test]
fn reset_rearms_with_new_period() {
    let mut wheel = TimerWheel::new();
    let id = wheel.set_interval(1, 100).unwrap();
    let mut timeout = FOREVER;
    wheel.run(0, &mut timeout);
    assert_eq!(timeout, 100);
    assert_eq!(wheel.reset(id, true, 25), Ok(id));
    wheel.run(0, &mut timeout);
    assert_eq!(timeout, 25);
}

#[test]
fn table_grows_to_max_then_errors() {
    let mut wheel = TimerWheel::new();
    for i in 0..MAX_SLOTS {
        assert!(wheel.set_interval(i as u32, 10).is_ok(), "slot {i}");
    }
    assert_eq!(wheel.set_interval(999, 10), Err(CoreError::Resources));
}

#[test]
fn clear_all_returns_callbacks() {
    let mut wheel = TimerWheel::new();
    wheel.set_timeout(4, 10).unwrap();
    wheel.set_interval(5, 10).unwrap();
    let mut callbacks = wheel.clear_all();
    callbacks.sort_unstable();
    assert_eq!(callbacks, vec![4, 5]);
    assert_eq!(wheel.live(), 0);
}

#[test]
fn deadline_is_min_countdown_after_run() {
    let mut wheel = TimerWheel::new();
    wheel.set_timeout(1, 80).unwrap();
    wheel.set_interval(2, 60).unwrap();
    let mut timeout = FOREVER;
    wheel.run(0, &mut timeout);
    assert_eq!(timeout, 60);
}
