// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn open_output(io: &mut SimIo, pin: PinId) {
    io.pin_open(pin, PIN_OUTPUT).unwrap();
}

#[test]
fn catalogue_describes_every_pin() {
    let io = SimIo::new(4);
    assert_eq!(io.num_pins(), 4);
    let info = io.pin_info(3).unwrap();
    assert_eq!(info.name, "GPIO_3");
    assert!(info.functions.contains(&IoFunction::Digital));
    assert!(io.pin_info(4).is_none());
}

#[test]
fn output_pin_set_get_toggle() {
    let mut io = SimIo::new(2);
    open_output(&mut io, 0);
    io.pin_set(0, 1).unwrap();
    assert_eq!(io.pin_get(0).unwrap(), 1);
    assert_eq!(io.pin_toggle(0).unwrap(), 0);
    assert_eq!(io.pin_toggle(0).unwrap(), 1);
}

#[test]
fn unopened_and_unknown_pins_refuse() {
    let mut io = SimIo::new(2);
    assert_eq!(io.pin_get(0), Err(CoreError::Driver));
    assert_eq!(io.pin_open(9, PIN_OUTPUT), Err(CoreError::Invalid));
    // Double open is a driver refusal.
    open_output(&mut io, 0);
    assert_eq!(io.pin_open(0, PIN_OUTPUT), Err(CoreError::Driver));
}

#[test]
fn writes_to_input_pins_are_driver_errors() {
    let mut io = SimIo::new(1);
    io.pin_open(0, PIN_INPUT).unwrap();
    assert_eq!(io.pin_set(0, 1), Err(CoreError::Driver));
    assert_eq!(io.pin_toggle(0), Err(CoreError::Driver));
}

#[test]
fn pull_up_reads_high_until_driven() {
    let mut io = SimIo::new(1);
    io.pin_open(0, PIN_INPUT | PIN_PULL_UP).unwrap();
    assert_eq!(io.pin_get(0).unwrap(), 1);
    io.drive_input(0, 0).unwrap();
    assert_eq!(io.pin_get(0).unwrap(), 0);
}

#[test]
fn rise_trigger_queues_in_order() {
    let mut io = SimIo::new(3);
    io.pin_open(1, PIN_INPUT).unwrap();
    io.pin_open(2, PIN_INPUT).unwrap();
    io.enable_trigger(1, TriggerMode::OnRise, 0).unwrap();
    io.enable_trigger(2, TriggerMode::OnRise, 0).unwrap();

    io.drive_input(2, 1).unwrap();
    io.drive_input(1, 1).unwrap();
    // Falling edges don't match OnRise.
    io.drive_input(2, 0).unwrap();

    assert_eq!(io.next_triggered(), Some(2));
    assert_eq!(io.next_triggered(), Some(1));
    assert_eq!(io.next_triggered(), None);
}

#[test]
fn fall_trigger_matches_only_falling_edges() {
    let mut io = SimIo::new(1);
    io.pin_open(0, PIN_INPUT | PIN_PULL_UP).unwrap();
    io.enable_trigger(0, TriggerMode::OnFall, 5).unwrap();
    io.drive_input(0, 0).unwrap();
    io.drive_input(0, 1).unwrap();
    assert_eq!(io.next_triggered(), Some(0));
    assert_eq!(io.next_triggered(), None);
}

#[test]
fn trigger_on_output_pin_is_refused() {
    let mut io = SimIo::new(1);
    open_output(&mut io, 0);
    assert_eq!(
        io.enable_trigger(0, TriggerMode::OnRise, 0),
        Err(CoreError::Driver)
    );
}

#[test]
fn pwm_duty_is_bounds_checked() {
    let mut io = SimIo::new(1);
    open_output(&mut io, 0);
    io.pin_pwm(0, 0.5, 1000).unwrap();
    assert_eq!(io.pin_pwm(0, 1.5, 1000), Err(CoreError::Invalid));
}

#[test]
fn adc_and_dac_round_trip() {
    let mut io = SimIo::new(2);
    io.pin_open(0, PIN_INPUT).unwrap();
    io.drive_input(0, 512).unwrap();
    assert_eq!(io.adc_read(0).unwrap(), 512);
    open_output(&mut io, 1);
    io.dac_write(1, 300).unwrap();
    assert_eq!(io.pin_get(1).unwrap(), 300);
}

#[test]
fn close_releases_the_pin() {
    let mut io = SimIo::new(1);
    open_output(&mut io, 0);
    io.pin_close(0).unwrap();
    assert_eq!(io.pin_get(0), Err(CoreError::Driver));
    io.pin_open(0, PIN_INPUT).unwrap();
}
