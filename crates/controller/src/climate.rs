//! DHT22 temperature/humidity through the Linux IIO `dht11` driver.
//!
//! The kernel exposes one device directory with `in_temp_input`
//! (millidegrees Celsius) and `in_humidityrelative_input` (milli-percent).
//! A read that fails the sensor's checksum comes back as EIO, which surfaces
//! here as an ordinary error.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::sensor::{ClimateProbe, ClimateSample};

const TEMP_FILE: &str = "in_temp_input";
const HUMIDITY_FILE: &str = "in_humidityrelative_input";

pub struct IioClimate {
    dir: PathBuf,
}

impl IioClimate {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        tracing::info!(dir = %dir.display(), "dht22 via iio sysfs");
        Self { dir }
    }
}

impl ClimateProbe for IioClimate {
    async fn measure(&mut self) -> Result<ClimateSample> {
        let temperature_c = read_milli(&self.dir.join(TEMP_FILE)).await?;
        let humidity_pct = read_milli(&self.dir.join(HUMIDITY_FILE)).await?;
        Ok(ClimateSample {
            temperature_c,
            humidity_pct,
        })
    }
}

/// Read a sysfs attribute holding an integer in thousandths.
async fn read_milli(path: &Path) -> Result<f32> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let milli: i32 = text
        .trim()
        .parse()
        .with_context(|| format!("parse {} value {:?}", path.display(), text.trim()))?;
    Ok(milli as f32 / 1000.0)
}

// ===========================================================================
// Tests
// ===========================================================================
