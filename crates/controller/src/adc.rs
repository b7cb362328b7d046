//! ADS1115 16-bit ADC over I2C for the soil moisture probe.
//!
//! Single-ended read of one channel at PGA ±4.096 V, 128 SPS, single-shot.
//! The conversion wait is an async sleep so the control loop keeps running
//! while the ADC converts.

use anyhow::{ensure, Result};
use rppal::i2c::I2c;
use std::time::Duration;

use crate::sensor::MoistureProbe;

// ── ADS1115 registers ───────────────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS       start a single-shot conversion / conversion ready
//   [14:12] MUX      input multiplexer
//   [11:9]  PGA      programmable gain amplifier
//   [8]     MODE     0 = continuous, 1 = single-shot
//   [7:5]   DR       data rate
//   [4:2]   COMP_*   comparator mode, polarity, latch
//   [1:0]   COMP_QUE 11 = comparator off

/// OS=1, PGA=001 (±4.096 V), MODE=1, DR=100 (128 SPS), COMP_QUE=11.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// MUX for AINx against GND.
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

const MAX_CHANNEL: u8 = 3;

/// One conversion at 128 SPS takes ~7.8 ms.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);
const READY_POLL: Duration = Duration::from_millis(2);
const READY_ATTEMPTS: usize = 3;

const OS_READY_BIT: u16 = 1 << 15;

/// Highest value a single-ended read can return.
pub const FULL_SCALE: u16 = 32767;

fn config_for_channel(channel: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel as usize] << MUX_SHIFT)
}

// ── Driver ──────────────────────────────────────────────────────────────────

pub struct Ads1115 {
    i2c: I2c,
    channel: u8,
}

impl Ads1115 {
    /// Open I2C bus 1 and address the ADS1115 at `addr`.
    pub fn new(addr: u16, channel: u8) -> Result<Self> {
        ensure!(
            channel <= MAX_CHANNEL,
            "ADS1115 channel {channel} out of range (0-{MAX_CHANNEL})"
        );

        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;

        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            channel,
            "ads1115 initialised"
        );
        Ok(Self { i2c, channel })
    }

    async fn read_channel(&mut self) -> Result<i16> {
        let config = config_for_channel(self.channel);
        self.i2c.block_write(REG_CONFIG, &config.to_be_bytes())?;

        tokio::time::sleep(CONVERSION_WAIT).await;

        for _ in 0..READY_ATTEMPTS {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            tokio::time::sleep(READY_POLL).await;
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
}

impl MoistureProbe for Ads1115 {
    async fn read_raw(&mut self) -> Result<u16> {
        let raw = self.read_channel().await?;
        // Single-ended reads are non-negative; a negative value is bus noise.
        Ok(raw.max(0) as u16)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
