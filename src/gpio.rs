//! Relay and LED outputs
//!
//! [`RelayBank`] holds the on/off state of the four relays and drives their
//! pins through an [`OutputPins`] backend. Toggle state lives in memory only
//! and starts off at every boot.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{GpioBackend, GpioConfig};

#[derive(Error, Debug)]
pub enum GpioError {
    #[error("GPIO unavailable: {0}")]
    Unavailable(String),

    #[error("pin {pin}: {reason}")]
    Pin { pin: u8, reason: String },
}

/// Output level of a digital pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(on: bool) -> Self {
        if on {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Digital output driver
pub trait OutputPins: Send {
    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError>;
}

/// Pins kept in memory; used off-target and in tests
#[derive(Debug, Default, Clone)]
pub struct MemoryPins {
    levels: HashMap<u8, Level>,
}

impl MemoryPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        self.levels.get(&pin).copied()
    }
}

impl OutputPins for MemoryPins {
    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
        debug!(pin = %pin, level = ?level, "Pin write");
        self.levels.insert(pin, level);
        Ok(())
    }
}

/// Raspberry Pi header pins through rppal
#[cfg(all(feature = "gpio", any(target_arch = "arm", target_arch = "aarch64")))]
pub struct RppalPins {
    gpio: rppal::gpio::Gpio,
    outputs: HashMap<u8, rppal::gpio::OutputPin>,
}

#[cfg(all(feature = "gpio", any(target_arch = "arm", target_arch = "aarch64")))]
impl RppalPins {
    pub fn new() -> Result<Self, GpioError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| GpioError::Unavailable(e.to_string()))?;
        Ok(Self {
            gpio,
            outputs: HashMap::new(),
        })
    }
}

#[cfg(all(feature = "gpio", any(target_arch = "arm", target_arch = "aarch64")))]
impl OutputPins for RppalPins {
    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
        let output = match self.outputs.entry(pin) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let output = self
                    .gpio
                    .get(pin)
                    .map_err(|e| GpioError::Pin {
                        pin,
                        reason: e.to_string(),
                    })?
                    .into_output();
                entry.insert(output)
            }
        };

        match level {
            Level::Low => output.set_low(),
            Level::High => output.set_high(),
        }
        Ok(())
    }
}

/// Opens the configured pin backend
pub fn open_pins(config: &GpioConfig) -> Result<Box<dyn OutputPins>, GpioError> {
    match config.backend {
        GpioBackend::Memory => Ok(Box::new(MemoryPins::new())),
        #[cfg(all(feature = "gpio", any(target_arch = "arm", target_arch = "aarch64")))]
        GpioBackend::Rppal => Ok(Box::new(RppalPins::new()?)),
        #[cfg(not(all(feature = "gpio", any(target_arch = "arm", target_arch = "aarch64"))))]
        GpioBackend::Rppal => Err(GpioError::Unavailable(
            "built without the `gpio` feature for an ARM target".to_string(),
        )),
    }
}

/// Relay outputs exposed over HTTP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relay {
    R1,
    R3,
    R5,
    R7,
}

impl Relay {
    pub const ALL: [Relay; 4] = [Relay::R1, Relay::R3, Relay::R5, Relay::R7];

    fn index(self) -> usize {
        match self {
            Relay::R1 => 0,
            Relay::R3 => 1,
            Relay::R5 => 2,
            Relay::R7 => 3,
        }
    }

    /// Route path, e.g. `/r1`
    pub fn path(self) -> &'static str {
        match self {
            Relay::R1 => "/r1",
            Relay::R3 => "/r3",
            Relay::R5 => "/r5",
            Relay::R7 => "/r7",
        }
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relay{}", &self.path()[2..])
    }
}

struct Channel {
    pin: u8,
    on: AtomicBool,
}

/// Relay and LED state plus the pins behind them
///
/// Toggles read and write the flag without a lock around the pair, so two
/// racing toggles of the same relay resolve as last writer wins.
pub struct RelayBank {
    pins: Mutex<Box<dyn OutputPins>>,
    relays: [Channel; 4],
    led_pin: u8,
}

impl RelayBank {
    /// Takes the pins and drives every output low
    pub fn new(pins: Box<dyn OutputPins>, config: &GpioConfig) -> Result<Self, GpioError> {
        let channel = |pin| Channel {
            pin,
            on: AtomicBool::new(false),
        };
        let bank = Self {
            pins: Mutex::new(pins),
            relays: [
                channel(config.relay1),
                channel(config.relay3),
                channel(config.relay5),
                channel(config.relay7),
            ],
            led_pin: config.led,
        };

        {
            let mut pins = bank.pins.lock();
            for ch in &bank.relays {
                pins.write(ch.pin, Level::Low)?;
            }
            pins.write(bank.led_pin, Level::Low)?;
        }

        info!(
            relays = ?bank.relays.iter().map(|c| c.pin).collect::<Vec<_>>(),
            led = %bank.led_pin,
            "Relay outputs initialised"
        );
        Ok(bank)
    }

    /// Inverts a relay and drives its pin; returns the new state
    pub fn toggle(&self, relay: Relay) -> Result<bool, GpioError> {
        let ch = &self.relays[relay.index()];
        let on = !ch.on.load(Ordering::Relaxed);
        ch.on.store(on, Ordering::Relaxed);
        self.pins.lock().write(ch.pin, Level::from(on))?;
        info!(relay = %relay, on = %on, "Relay toggled");
        Ok(on)
    }

    pub fn is_on(&self, relay: Relay) -> bool {
        self.relays[relay.index()].on.load(Ordering::Relaxed)
    }

    pub fn pin(&self, relay: Relay) -> u8 {
        self.relays[relay.index()].pin
    }

    pub fn set_led(&self, on: bool) -> Result<(), GpioError> {
        self.pins.lock().write(self.led_pin, Level::from(on))?;
        info!(on = %on, "LED switched");
        Ok(())
    }

    pub fn led_pin(&self) -> u8 {
        self.led_pin
    }
}
