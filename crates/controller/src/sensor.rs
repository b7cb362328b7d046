//! Sensor reading with last-known-good substitution.
//!
//! Probes are the raw transports (IIO sysfs, ADS1115, simulators). The
//! reader bounds every probe call with the I/O timeout, converts to
//! engineering units, and turns faults into `valid = false` readings so the
//! loop never stops on a flaky sensor.

use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::climate::IioClimate;

#[cfg(not(any(feature = "sim", feature = "adc")))]
compile_error!("enable feature `adc` (ADS1115 hardware) or `sim` (simulated soil)");

/// DHT22 operating range. Values outside it are transport garbage.
const TEMP_RANGE_C: std::ops::RangeInclusive<f32> = -40.0..=80.0;
const HUMIDITY_RANGE_PCT: std::ops::RangeInclusive<f32> = 0.0..=100.0;

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// One successful temperature/humidity measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSample {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

impl ClimateSample {
    fn is_plausible(&self) -> bool {
        TEMP_RANGE_C.contains(&self.temperature_c)
            && HUMIDITY_RANGE_PCT.contains(&self.humidity_pct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClimateReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    /// False when the probe failed and the previous values are reported.
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoistureReading {
    pub moisture_pct: f32,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub climate: ClimateReading,
    pub moisture: MoistureReading,
}

/// Map a raw ADC value to percent moisture. A dry sensor reads high.
pub fn moisture_pct(raw: u16, max_raw: u16) -> f32 {
    if max_raw == 0 {
        return 0.0;
    }
    let max = f32::from(max_raw);
    ((max - f32::from(raw)) / max * 100.0).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Probe traits
// ---------------------------------------------------------------------------

pub trait ClimateProbe {
    async fn measure(&mut self) -> Result<ClimateSample>;
}

pub trait MoistureProbe {
    async fn read_raw(&mut self) -> Result<u16>;

    /// Told the pump state after every poll. Only the simulator cares.
    fn observe_pump(&mut self, _on: bool) {}
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub struct SensorReader<C, M> {
    climate: C,
    moisture: M,
    io_timeout: Duration,
    max_raw: u16,
    last_climate: ClimateSample,
}

impl<C: ClimateProbe, M: MoistureProbe> SensorReader<C, M> {
    pub fn new(climate: C, moisture: M, io_timeout: Duration, max_raw: u16) -> Self {
        Self {
            climate,
            moisture,
            io_timeout,
            max_raw,
            last_climate: ClimateSample {
                temperature_c: 0.0,
                humidity_pct: 0.0,
            },
        }
    }

    pub async fn read_climate(&mut self) -> ClimateReading {
        match timeout(self.io_timeout, self.climate.measure()).await {
            Ok(Ok(sample)) if sample.is_plausible() => {
                self.last_climate = sample;
                ClimateReading {
                    temperature_c: sample.temperature_c,
                    humidity_pct: sample.humidity_pct,
                    valid: true,
                }
            }
            Ok(Ok(sample)) => {
                warn!(
                    temperature_c = sample.temperature_c,
                    humidity_pct = sample.humidity_pct,
                    "implausible climate reading discarded"
                );
                self.stale_climate()
            }
            Ok(Err(e)) => {
                warn!("climate read failed: {e:#}");
                self.stale_climate()
            }
            Err(_) => {
                warn!(timeout_ms = self.io_timeout.as_millis() as u64, "climate read timed out");
                self.stale_climate()
            }
        }
    }

    pub async fn read_moisture(&mut self) -> MoistureReading {
        let failed = MoistureReading {
            moisture_pct: 0.0,
            valid: false,
        };
        match timeout(self.io_timeout, self.moisture.read_raw()).await {
            Ok(Ok(raw)) => MoistureReading {
                moisture_pct: moisture_pct(raw, self.max_raw),
                valid: true,
            },
            Ok(Err(e)) => {
                warn!("moisture read failed: {e:#}");
                failed
            }
            Err(_) => {
                warn!(timeout_ms = self.io_timeout.as_millis() as u64, "moisture read timed out");
                failed
            }
        }
    }

    pub async fn read_snapshot(&mut self) -> SensorSnapshot {
        let climate = self.read_climate().await;
        let moisture = self.read_moisture().await;
        SensorSnapshot { climate, moisture }
    }

    pub fn observe_pump(&mut self, on: bool) {
        self.moisture.observe_pump(on);
    }

    fn stale_climate(&self) -> ClimateReading {
        ClimateReading {
            temperature_c: self.last_climate.temperature_c,
            humidity_pct: self.last_climate.humidity_pct,
            valid: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Concrete probe selection
// ---------------------------------------------------------------------------

/// Climate probe chosen at startup from config and features.
pub enum ClimateSource {
    Iio(IioClimate),
    #[cfg(feature = "sim")]
    Sim(crate::sim::SimClimate),
}

impl ClimateProbe for ClimateSource {
    async fn measure(&mut self) -> Result<ClimateSample> {
        match self {
            Self::Iio(p) => p.measure().await,
            #[cfg(feature = "sim")]
            Self::Sim(p) => p.measure().await,
        }
    }
}

/// Moisture probe chosen at startup from features.
pub enum MoistureSource {
    #[cfg(feature = "adc")]
    Ads1115(crate::adc::Ads1115),
    #[cfg(feature = "sim")]
    Sim(crate::sim::SoilSim),
}

impl MoistureProbe for MoistureSource {
    async fn read_raw(&mut self) -> Result<u16> {
        match self {
            #[cfg(feature = "adc")]
            Self::Ads1115(p) => p.read_raw().await,
            #[cfg(feature = "sim")]
            Self::Sim(p) => p.read_raw().await,
        }
    }

    fn observe_pump(&mut self, on: bool) {
        match self {
            #[cfg(feature = "adc")]
            Self::Ads1115(p) => p.observe_pump(on),
            #[cfg(feature = "sim")]
            Self::Sim(p) => p.observe_pump(on),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
