//! Simulated sensors for running the controller on a development host.
//!
//! The soil model is closed-loop: it dries out over time and wets while the
//! pump runs, so both the moisture hysteresis and the schedule can be
//! watched end to end. The climate model occasionally fails like a real
//! DHT22 does.

use anyhow::{bail, Result};
use fastrand::Rng;
use std::fmt;

use crate::sensor::{ClimateProbe, ClimateSample, MoistureProbe};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1): sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal(rng: &mut Rng) -> f64 {
    (0..12).map(|_| rng.f64()).sum::<f64>() - 6.0
}

fn gaussian(rng: &mut Rng, mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal(rng)
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Soil profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries past the dry threshold within minutes.
    Drying,
    /// Hovers inside the hysteresis band; never triggers moisture control.
    Stable,
    /// Drying with heavy noise and frequent spikes.
    Flaky,
    /// Starts near saturation and dries very slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

/// Scenario tuning, all as fractions of the raw range per sample.
struct Profile {
    drift: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    spike_prob: f64,
    spike_sigma: f64,
    /// 0.0 = saturated, 1.0 = bone dry.
    start_dryness: f64,
}

impl Scenario {
    fn profile(self) -> Profile {
        match self {
            Self::Drying => Profile {
                drift: 0.004,
                walk_sigma: 0.003,
                mean_reversion: 0.0,
                noise_sigma: 0.004,
                spike_prob: 0.03,
                spike_sigma: 0.1,
                start_dryness: 0.5,
            },
            Self::Stable => Profile {
                drift: 0.0,
                walk_sigma: 0.002,
                mean_reversion: 0.05,
                noise_sigma: 0.002,
                spike_prob: 0.005,
                spike_sigma: 0.05,
                start_dryness: 0.4,
            },
            Self::Flaky => Profile {
                drift: 0.004,
                walk_sigma: 0.006,
                mean_reversion: 0.0,
                noise_sigma: 0.015,
                spike_prob: 0.10,
                spike_sigma: 0.2,
                start_dryness: 0.5,
            },
            Self::Wet => Profile {
                drift: 0.0005,
                walk_sigma: 0.002,
                mean_reversion: 0.0,
                noise_sigma: 0.003,
                spike_prob: 0.02,
                spike_sigma: 0.08,
                start_dryness: 0.05,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Soil simulator
// ---------------------------------------------------------------------------

/// Stateful single-channel soil moisture simulator producing raw ADC values
/// in `0..=max_raw`, where `max_raw` is a sensor in dry air.
pub struct SoilSim {
    rng: Rng,
    profile: Profile,
    max_raw: f64,
    /// "True" dryness of the soil in `0.0..=1.0`. Evolves each sample.
    dryness: f64,
    /// Where mean reversion pulls toward.
    center: f64,
    watering: bool,
    /// Dryness removed per sample while the pump runs.
    wet_rate: f64,
}

impl SoilSim {
    pub fn new(scenario: Scenario, max_raw: u16) -> Self {
        Self::with_rng(scenario, max_raw, Rng::new())
    }

    fn with_rng(scenario: Scenario, max_raw: u16, rng: Rng) -> Self {
        let profile = scenario.profile();
        tracing::info!(%scenario, max_raw, "[sim] soil moisture simulator");
        Self {
            rng,
            center: profile.start_dryness,
            dryness: profile.start_dryness,
            profile,
            max_raw: f64::from(max_raw),
            watering: false,
            wet_rate: 0.03,
        }
    }

    /// Produce the next raw reading. Each call advances the soil model.
    pub fn sample(&mut self) -> u16 {
        let p = &self.profile;

        let pull = p.mean_reversion * (self.center - self.dryness);
        let walk = gaussian(&mut self.rng, 0.0, p.walk_sigma);
        let wet = if self.watering { self.wet_rate } else { 0.0 };
        self.dryness = (self.dryness + p.drift + pull + walk - wet).clamp(0.0, 1.0);

        let noise = gaussian(&mut self.rng, 0.0, p.noise_sigma);
        let spike = if self.rng.f64() < p.spike_prob {
            gaussian(&mut self.rng, 0.0, p.spike_sigma)
        } else {
            0.0
        };

        let reading = (self.dryness + noise + spike) * self.max_raw;
        reading.round().clamp(0.0, self.max_raw) as u16
    }
}

impl MoistureProbe for SoilSim {
    async fn read_raw(&mut self) -> Result<u16> {
        Ok(self.sample())
    }

    fn observe_pump(&mut self, on: bool) {
        self.watering = on;
    }
}

// ---------------------------------------------------------------------------
// Climate simulator
// ---------------------------------------------------------------------------

pub struct SimClimate {
    rng: Rng,
    temperature_c: f64,
    humidity_pct: f64,
    fault_prob: f64,
}

impl SimClimate {
    pub fn new() -> Self {
        Self::with_rng(Rng::new(), 0.05)
    }

    fn with_rng(rng: Rng, fault_prob: f64) -> Self {
        tracing::info!(fault_prob, "[sim] climate simulator");
        Self {
            rng,
            temperature_c: 24.0,
            humidity_pct: 55.0,
            fault_prob,
        }
    }
}

impl Default for SimClimate {
    fn default() -> Self {
        Self::new()
    }
}

impl ClimateProbe for SimClimate {
    async fn measure(&mut self) -> Result<ClimateSample> {
        if self.rng.f64() < self.fault_prob {
            bail!("[sim] dht22 checksum mismatch");
        }
        let t_step = gaussian(&mut self.rng, 0.0, 0.1);
        let h_step = gaussian(&mut self.rng, 0.0, 0.3);
        self.temperature_c = (self.temperature_c + t_step + 0.02 * (24.0 - self.temperature_c))
            .clamp(5.0, 40.0);
        self.humidity_pct = (self.humidity_pct + h_step + 0.02 * (55.0 - self.humidity_pct))
            .clamp(10.0, 95.0);
        Ok(ClimateSample {
            temperature_c: self.temperature_c as f32,
            humidity_pct: self.humidity_pct as f32,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
