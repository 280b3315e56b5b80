// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peripheral contract.
//!
//! Concrete GPIO/ADC/SPI/UART/I²C drivers are a target concern; the core
//! only depends on this trait surface and on the §5 interrupt contract: a
//! driver fires a pin trigger by setting the pin's bit in the shared
//! trigger word and waking the loop, and the loop's I/O service step asks
//! [`IoTarget::next_triggered`] which pin it was.
//!
//! [`SimIo`] is the in-process target used by the host simulator and
//! tests: pins are plain state, triggers fire when a test writes to an
//! input pin whose trigger mode matches the edge.

use std::collections::VecDeque;

use tracing::debug;

use crate::error::{CoreError, CoreResult};

pub type PinId = u16;

/// Pin configuration bits.
pub const PIN_INPUT: u8 = 0x0;
pub const PIN_OUTPUT: u8 = 0x1;
pub const PIN_OPEN_DRAIN: u8 = 0x2;
pub const PIN_PULL_UP: u8 = 0x4;
pub const PIN_PULL_DOWN: u8 = 0x8;

/// Functions a pin can serve, used by the pin-info catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFunction {
    Digital,
    Analog,
    Pwm,
    Uart,
    Spi,
    I2c,
}

impl IoFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Digital => "digital",
            Self::Analog => "analog",
            Self::Pwm => "pwm",
            Self::Uart => "uart",
            Self::Spi => "spi",
            Self::I2c => "i2c",
        }
    }
}

/// Edge selection for input-pin triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    #[default]
    Disabled,
    OnRise,
    OnFall,
}

/// Static description of one pin.
#[derive(Debug, Clone)]
pub struct PinInfo {
    pub functions: Vec<IoFunction>,
    /// Physical designation, e.g. `"GPIO_17"`.
    pub name: String,
}

/// The target-IO seam. One handle-based implementation per target; the
/// runtime owns opened pins by small integer handles the same way script
/// objects reference runtime handles.
pub trait IoTarget: Send {
    fn num_pins(&self) -> u16;

    fn pin_info(&self, pin: PinId) -> Option<&PinInfo>;

    /// Claim a pin with the given configuration bits.
    fn pin_open(&mut self, pin: PinId, config: u8) -> CoreResult<()>;

    fn pin_close(&mut self, pin: PinId) -> CoreResult<()>;

    fn pin_set(&mut self, pin: PinId, value: u32) -> CoreResult<()>;

    fn pin_get(&mut self, pin: PinId) -> CoreResult<u32>;

    fn pin_toggle(&mut self, pin: PinId) -> CoreResult<u32>;

    /// Duty cycle in `[0, 1]`; refusal is a `Driver` error.
    fn pin_pwm(&mut self, pin: PinId, duty: f64, freq: u32) -> CoreResult<()>;

    /// Arm an edge trigger on an input pin. Returns the trigger id the
    /// loop will report.
    fn enable_trigger(&mut self, pin: PinId, mode: TriggerMode, debounce_ms: u8)
        -> CoreResult<u32>;

    /// Pin id of the next pending trigger, in arrival order.
    fn next_triggered(&mut self) -> Option<PinId>;

    fn adc_read(&mut self, pin: PinId) -> CoreResult<u32>;

    fn dac_write(&mut self, pin: PinId, value: u32) -> CoreResult<()>;

    /// The simulated target, when this is one. Lets tests drive input
    /// pins the way hardware would.
    fn simulated(&mut self) -> Option<&mut SimIo> {
        None
    }
}

#[derive(Debug, Default, Clone)]
struct SimPin {
    opened: bool,
    config: u8,
    value: u32,
    trigger: TriggerMode,
    trigger_id: Option<u32>,
}

/// Simulated target: every pin supports every function. Tests poke
/// [`SimIo::drive_input`] to emulate the outside world.
#[derive(Debug)]
pub struct SimIo {
    pins: Vec<SimPin>,
    info: Vec<PinInfo>,
    pending: VecDeque<PinId>,
    next_trigger_id: u32,
}

impl SimIo {
    pub fn new(num_pins: u16) -> Self {
        let info = (0..num_pins)
            .map(|i| PinInfo {
                functions: vec![
                    IoFunction::Digital,
                    IoFunction::Analog,
                    IoFunction::Pwm,
                ],
                name: format!("GPIO_{i}"),
            })
            .collect();
        Self {
            pins: vec![SimPin::default(); num_pins as usize],
            info,
            pending: VecDeque::new(),
            next_trigger_id: 0,
        }
    }

    fn pin_mut(&mut self, pin: PinId) -> CoreResult<&mut SimPin> {
        let slot = self.pins.get_mut(pin as usize).ok_or(CoreError::Invalid)?;
        if !slot.opened {
            return Err(CoreError::Driver);
        }
        Ok(slot)
    }

    /// Drive an input pin from "outside"; queues a trigger if the edge
    /// matches the armed mode.
    pub fn drive_input(&mut self, pin: PinId, value: u32) -> CoreResult<()> {
        let slot = self.pin_mut(pin)?;
        let prev = slot.value;
        slot.value = value;
        let fired = match slot.trigger {
            TriggerMode::OnRise => prev == 0 && value != 0,
            TriggerMode::OnFall => prev != 0 && value == 0,
            TriggerMode::Disabled => false,
        };
        if fired && slot.trigger_id.is_some() {
            self.pending.push_back(pin);
        }
        Ok(())
    }
}

impl IoTarget for SimIo {
    fn num_pins(&self) -> u16 {
        self.pins.len() as u16
    }

    fn pin_info(&self, pin: PinId) -> Option<&PinInfo> {
        self.info.get(pin as usize)
    }

    fn pin_open(&mut self, pin: PinId, config: u8) -> CoreResult<()> {
        let slot = self.pins.get_mut(pin as usize).ok_or(CoreError::Invalid)?;
        if slot.opened {
            return Err(CoreError::Driver);
        }
        slot.opened = true;
        slot.config = config;
        slot.value = if config & PIN_PULL_UP != 0 { 1 } else { 0 };
        debug!(pin, config, "pin opened");
        Ok(())
    }

    fn pin_close(&mut self, pin: PinId) -> CoreResult<()> {
        let slot = self.pins.get_mut(pin as usize).ok_or(CoreError::Invalid)?;
        *slot = SimPin::default();
        Ok(())
    }

    fn pin_set(&mut self, pin: PinId, value: u32) -> CoreResult<()> {
        let slot = self.pin_mut(pin)?;
        if slot.config & PIN_OUTPUT == 0 {
            return Err(CoreError::Driver);
        }
        slot.value = value;
        Ok(())
    }

    fn pin_get(&mut self, pin: PinId) -> CoreResult<u32> {
        Ok(self.pin_mut(pin)?.value)
    }

    fn pin_toggle(&mut self, pin: PinId) -> CoreResult<u32> {
        let slot = self.pin_mut(pin)?;
        if slot.config & PIN_OUTPUT == 0 {
            return Err(CoreError::Driver);
        }
        slot.value ^= 1;
        Ok(slot.value)
    }

    fn pin_pwm(&mut self, pin: PinId, duty: f64, _freq: u32) -> CoreResult<()> {
        if !(0.0..=1.0).contains(&duty) {
            return Err(CoreError::Invalid);
        }
        let slot = self.pin_mut(pin)?;
        if slot.config & PIN_OUTPUT == 0 {
            return Err(CoreError::Driver);
        }
        slot.value = (duty * u32::MAX as f64) as u32;
        Ok(())
    }

    fn enable_trigger(
        &mut self,
        pin: PinId,
        mode: TriggerMode,
        _debounce_ms: u8,
    ) -> CoreResult<u32> {
        self.next_trigger_id += 1;
        let id = self.next_trigger_id;
        let slot = self.pin_mut(pin)?;
        if slot.config & PIN_OUTPUT != 0 {
            return Err(CoreError::Driver);
        }
        slot.trigger = mode;
        slot.trigger_id = (mode != TriggerMode::Disabled).then_some(id);
        Ok(id)
    }

    fn next_triggered(&mut self) -> Option<PinId> {
        self.pending.pop_front()
    }

    fn adc_read(&mut self, pin: PinId) -> CoreResult<u32> {
        Ok(self.pin_mut(pin)?.value)
    }

    fn dac_write(&mut self, pin: PinId, value: u32) -> CoreResult<()> {
        let slot = self.pin_mut(pin)?;
        slot.value = value;
        Ok(())
    }

    fn simulated(&mut self) -> Option<&mut SimIo> {
        Some(self)
    }
}

#[cfg(test)]
#[path = "io_tests.rs"]
mod tests;
