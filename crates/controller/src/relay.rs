//! Pump relay output. The `gpio` feature drives a real pin through rppal;
//! without it, a mock keeps the state in memory and logs changes.

use anyhow::Result;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// A switchable pump output. Writes are infallible once the pin is claimed.
pub trait Relay {
    fn write(&mut self, on: bool);
}

// ---------------------------------------------------------------------------
// Real GPIO relay (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct PumpRelay {
    pin: OutputPin,
    active_low: bool, // most hobby relay boards are active-low
}

#[cfg(feature = "gpio")]
impl PumpRelay {
    pub fn new(gpio_pin: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pin = gpio.get(gpio_pin)?.into_output();

        // Fail-safe: relay OFF before anything else can happen
        if active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }

        tracing::info!(gpio_pin, active_low, "pump relay initialised");
        Ok(Self { pin, active_low })
    }
}

#[cfg(feature = "gpio")]
impl Relay for PumpRelay {
    fn write(&mut self, on: bool) {
        // active-low: LOW = ON; active-high: HIGH = ON
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        tracing::debug!(pin = self.pin.pin(), "relay set {}", if on { "ON" } else { "OFF" });
    }
}

// ---------------------------------------------------------------------------
// Mock relay (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct PumpRelay {
    pub(super) on: bool,
    gpio_pin: u8,
}

#[cfg(not(feature = "gpio"))]
impl PumpRelay {
    pub fn new(gpio_pin: u8, _active_low: bool) -> Result<Self> {
        tracing::info!(gpio_pin, "[mock-gpio] pump relay initialised (no hardware)");
        Ok(Self { on: false, gpio_pin })
    }
}

#[cfg(not(feature = "gpio"))]
impl Relay for PumpRelay {
    fn write(&mut self, on: bool) {
        self.on = on;
        tracing::debug!(
            gpio_pin = self.gpio_pin,
            "[mock-gpio] relay set {}",
            if on { "ON" } else { "OFF" }
        );
    }
}

// ---------------------------------------------------------------------------
// Probe relay (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) use probe::ProbeRelay;


// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    #[test]
    fn relay_starts_off() {
        let relay = PumpRelay::new(15, true).unwrap();
        assert!(!relay.on);
    }

    #[test]
    fn relay_follows_writes() {
        let mut relay = PumpRelay::new(15, true).unwrap();
        relay.write(true);
        assert!(relay.on);
        relay.write(false);
        assert!(!relay.on);
    }

    #[test]
    fn repeated_off_is_harmless() {
        let mut relay = PumpRelay::new(15, false).unwrap();
        relay.write(false);
        relay.write(false);
        assert!(!relay.on);
    }
}
