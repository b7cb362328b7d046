//! TOML config file loading and validation.
//!
//! Every section is optional; missing values fall back to the defaults of
//! the stock wiring (relay on BCM 15, DHT22 via IIO, ADS1115 at 0x48).
//! Schedule values are only the power-on defaults: the dashboard can change
//! them at runtime, and nothing is written back.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::watering::{
    ScheduleConfig, Thresholds, DRY_THRESHOLD, MAX_DURATION_MIN, WET_THRESHOLD,
};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Fixed UTC offset for the schedule; the system zone when unset.
    pub utc_offset_hours: Option<i64>,
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub moisture: MoistureSection,
    #[serde(default)]
    pub climate: ClimateSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub sheet: SheetSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub id: String,
    pub topic_prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub gpio_pin: i64,
    pub active_low: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MoistureSection {
    pub dry_threshold: f32,
    pub wet_threshold: f32,
    /// Raw reading of a sensor in air; `pct = (max_raw - raw) / max_raw * 100`.
    pub max_raw: i64,
    pub adc_address: i64,
    pub adc_channel: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClimateSection {
    /// IIO device directory of the DHT22, e.g. `/sys/bus/iio/devices/iio:device0`.
    pub iio_device: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub hour: i64,
    pub minute: i64,
    pub duration_min: i64,
    pub auto_enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub loop_interval_ms: i64,
    pub publish_interval_sec: i64,
    pub io_timeout_ms: i64,
    pub session_margin_sec: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SheetSection {
    pub endpoint: Option<String>,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id: "garden-1".into(),
            topic_prefix: "garden".into(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            gpio_pin: 15,
            active_low: true,
        }
    }
}

impl Default for MoistureSection {
    fn default() -> Self {
        Self {
            dry_threshold: DRY_THRESHOLD,
            wet_threshold: WET_THRESHOLD,
            max_raw: 65535,
            adc_address: 0x48,
            adc_channel: 0,
        }
    }
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            hour: 6,
            minute: 30,
            duration_min: 5,
            auto_enabled: false,
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            loop_interval_ms: 100,
            publish_interval_sec: 5,
            io_timeout_ms: 2000,
            session_margin_sec: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// BCM GPIO pins on the 40-pin header usable as outputs. GPIO 0-1 are
/// reserved for the ID EEPROM.
const VALID_GPIO_PINS: std::ops::RangeInclusive<i64> = 2..=27;

/// I2C addresses selectable on an ADS1115 via the ADDR pin.
const ADS1115_ADDRESSES: std::ops::RangeInclusive<i64> = 0x48..=0x4B;

/// Characters with meaning in MQTT topic filters.
const TOPIC_RESERVED: &[char] = &['/', '+', '#'];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_device(&mut errors);
        self.validate_hardware(&mut errors);
        self.validate_schedule(&mut errors);
        self.validate_timing(&mut errors);

        if let Some(hours) = self.utc_offset_hours {
            if !(-12..=14).contains(&hours) {
                errors.push(format!("utc_offset_hours {hours} out of range [-12, 14]"));
            }
        }

        if let Some(endpoint) = &self.sheet.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                errors.push(format!("sheet.endpoint '{endpoint}' is not an http(s) URL"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_device(&self, errors: &mut Vec<String>) {
        for (field, value) in [
            ("device.id", &self.device.id),
            ("device.topic_prefix", &self.device.topic_prefix),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{field} is empty"));
            } else if value.contains(TOPIC_RESERVED) {
                errors.push(format!("{field} '{value}' contains one of '/', '+', '#'"));
            }
        }
    }

    fn validate_hardware(&self, errors: &mut Vec<String>) {
        // ── Relay ───────────────────────────────────────────────
        if !VALID_GPIO_PINS.contains(&self.relay.gpio_pin) {
            errors.push(format!(
                "relay.gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                self.relay.gpio_pin
            ));
        }

        // ── Moisture thresholds ─────────────────────────────────
        let m = &self.moisture;
        if !(0.0..=100.0).contains(&m.dry_threshold) {
            errors.push(format!(
                "moisture.dry_threshold {} out of range [0, 100]",
                m.dry_threshold
            ));
        }
        if !(0.0..=100.0).contains(&m.wet_threshold) {
            errors.push(format!(
                "moisture.wet_threshold {} out of range [0, 100]",
                m.wet_threshold
            ));
        }
        if m.wet_threshold <= m.dry_threshold {
            errors.push(format!(
                "moisture.wet_threshold ({}) must be greater than dry_threshold ({})",
                m.wet_threshold, m.dry_threshold
            ));
        }

        // ── ADC ─────────────────────────────────────────────────
        if !(1..=i64::from(u16::MAX)).contains(&m.max_raw) {
            errors.push(format!("moisture.max_raw {} out of range [1, 65535]", m.max_raw));
        }
        if !ADS1115_ADDRESSES.contains(&m.adc_address) {
            errors.push(format!(
                "moisture.adc_address {:#04x} is not an ADS1115 address (0x48-0x4b)",
                m.adc_address
            ));
        }
        if !(0..=3).contains(&m.adc_channel) {
            errors.push(format!("moisture.adc_channel {} out of range [0, 3]", m.adc_channel));
        }

        // ── Climate ─────────────────────────────────────────────
        if let Some(dir) = &self.climate.iio_device {
            if dir.trim().is_empty() {
                errors.push("climate.iio_device is empty".to_string());
            }
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        let s = &self.schedule;
        if !(0..=23).contains(&s.hour) {
            errors.push(format!("schedule.hour {} out of range [0, 23]", s.hour));
        }
        if !(0..=59).contains(&s.minute) {
            errors.push(format!("schedule.minute {} out of range [0, 59]", s.minute));
        }
        if !(1..=i64::from(MAX_DURATION_MIN)).contains(&s.duration_min) {
            errors.push(format!(
                "schedule.duration_min {} out of range [1, {MAX_DURATION_MIN}]",
                s.duration_min
            ));
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let t = &self.timing;
        for (field, value) in [
            ("timing.loop_interval_ms", t.loop_interval_ms),
            ("timing.publish_interval_sec", t.publish_interval_sec),
            ("timing.io_timeout_ms", t.io_timeout_ms),
        ] {
            if value <= 0 {
                errors.push(format!("{field} must be positive, got {value}"));
            }
        }
        if t.session_margin_sec < 0 {
            errors.push(format!(
                "timing.session_margin_sec must not be negative, got {}",
                t.session_margin_sec
            ));
        }

        // A sensor read must finish well inside one publish interval.
        if t.io_timeout_ms > 0
            && t.publish_interval_sec > 0
            && t.io_timeout_ms >= t.publish_interval_sec * 1000
        {
            errors.push(format!(
                "timing.io_timeout_ms ({}) must be shorter than publish_interval_sec ({}s)",
                t.io_timeout_ms, t.publish_interval_sec
            ));
        }
    }

    // -- Typed accessors (valid only after `validate`) ---------------------

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            hour: self.schedule.hour as u8,
            minute: self.schedule.minute as u8,
            duration_min: self.schedule.duration_min as u32,
            auto_enabled: self.schedule.auto_enabled,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            dry: self.moisture.dry_threshold,
            wet: self.moisture.wet_threshold,
        }
    }

    pub fn utc_offset_hours(&self) -> Option<i8> {
        self.utc_offset_hours.map(|h| h as i8)
    }

    pub fn gpio_pin(&self) -> u8 {
        self.relay.gpio_pin as u8
    }

    pub fn max_raw(&self) -> u16 {
        self.moisture.max_raw as u16
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.timing.loop_interval_ms as u64)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.timing.publish_interval_sec as u64)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.io_timeout_ms as u64)
    }

    pub fn session_margin(&self) -> Duration {
        Duration::from_secs(self.timing.session_margin_sec as u64)
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Like [`load`], but a missing file means "run on defaults".
pub fn load_or_default(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        return load(path);
    }
    tracing::warn!(path, "config file not found; using built-in defaults");
    let config = Config::default();
    config.validate().context("built-in defaults are invalid")?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
utc_offset_hours = 1

[device]
id = "greenhouse"
topic_prefix = "farm"

[relay]
gpio_pin = 17
active_low = false

[moisture]
dry_threshold = 25.0
wet_threshold = 85.0
max_raw = 32767
adc_address = 0x49
adc_channel = 2

[climate]
iio_device = "/sys/bus/iio/devices/iio:device0"

[schedule]
hour = 7
minute = 15
duration_min = 10
auto_enabled = true

[timing]
loop_interval_ms = 250
publish_interval_sec = 10
io_timeout_ms = 1500
session_margin_sec = 30

[sheet]
endpoint = "https://example.com/exec"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.device.id, "greenhouse");
        assert_eq!(config.gpio_pin(), 17);
        assert_eq!(config.max_raw(), 32767);
        assert_eq!(config.moisture.adc_address, 0x49);
        assert_eq!(config.utc_offset_hours(), Some(1));
        let s = config.schedule_config();
        assert_eq!((s.hour, s.minute, s.duration_min, s.auto_enabled), (7, 15, 10, true));
        assert_eq!(config.thresholds().dry, 25.0);
        assert_eq!(config.io_timeout(), Duration::from_millis(1500));
        assert_eq!(config.sheet.endpoint.as_deref(), Some("https://example.com/exec"));
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.device.id, "garden-1");
        assert_eq!(config.gpio_pin(), 15);
        assert!(config.relay.active_low);
        assert_eq!(config.max_raw(), 65535);
        assert_eq!(config.thresholds(), Thresholds::default());
        assert_eq!(config.publish_interval(), Duration::from_secs(5));
        assert!(!config.schedule_config().auto_enabled);
        assert!(config.climate.iio_device.is_none());
        assert!(config.sheet.endpoint.is_none());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str("[schedule]\nhour = 21\n").unwrap();
        let s = config.schedule_config();
        assert_eq!((s.hour, s.minute, s.duration_min), (21, 30, 5));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_or_default("/nonexistent/controller.toml").unwrap();
        assert_eq!(config.device.id, "garden-1");
    }

    #[test]
    fn load_missing_file_is_an_error() {
        assert!(load("/nonexistent/controller.toml").is_err());
    }

    // -- Device -----------------------------------------------------------

    #[test]
    fn device_id_empty_rejected() {
        let mut cfg = Config::default();
        cfg.device.id = " ".into();
        assert_validation_err(&cfg, "device.id is empty");
    }

    #[test]
    fn device_id_with_wildcard_rejected() {
        let mut cfg = Config::default();
        cfg.device.id = "bed/1".into();
        assert_validation_err(&cfg, "device.id 'bed/1' contains");
    }

    // -- Hardware ---------------------------------------------------------

    #[test]
    fn relay_gpio_pin_reserved_rejected() {
        let mut cfg = Config::default();
        cfg.relay.gpio_pin = 1;
        assert_validation_err(&cfg, "not a valid BCM GPIO pin");
    }

    #[test]
    fn relay_gpio_boundaries_accepted() {
        let mut cfg = Config::default();
        cfg.relay.gpio_pin = 2;
        cfg.validate().unwrap();
        cfg.relay.gpio_pin = 27;
        cfg.validate().unwrap();
    }

    #[test]
    fn thresholds_must_leave_a_band() {
        let mut cfg = Config::default();
        cfg.moisture.dry_threshold = 60.0;
        cfg.moisture.wet_threshold = 60.0;
        assert_validation_err(&cfg, "must be greater than dry_threshold");
    }

    #[test]
    fn threshold_above_hundred_rejected() {
        let mut cfg = Config::default();
        cfg.moisture.wet_threshold = 101.0;
        assert_validation_err(&cfg, "moisture.wet_threshold 101 out of range");
    }

    #[test]
    fn max_raw_zero_rejected() {
        let mut cfg = Config::default();
        cfg.moisture.max_raw = 0;
        assert_validation_err(&cfg, "moisture.max_raw 0 out of range");
    }

    #[test]
    fn adc_address_outside_ads1115_range_rejected() {
        let mut cfg = Config::default();
        cfg.moisture.adc_address = 0x50;
        assert_validation_err(&cfg, "is not an ADS1115 address");
    }

    #[test]
    fn adc_channel_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.moisture.adc_channel = 4;
        assert_validation_err(&cfg, "moisture.adc_channel 4 out of range");
    }

    // -- Schedule ---------------------------------------------------------

    #[test]
    fn schedule_hour_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.hour = 24;
        assert_validation_err(&cfg, "schedule.hour 24 out of range");
    }

    #[test]
    fn schedule_minute_negative_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.minute = -1;
        assert_validation_err(&cfg, "schedule.minute -1 out of range");
    }

    #[test]
    fn schedule_duration_zero_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.duration_min = 0;
        assert_validation_err(&cfg, "schedule.duration_min 0 out of range");
    }

    // -- Timing -----------------------------------------------------------

    #[test]
    fn timing_zero_interval_rejected() {
        let mut cfg = Config::default();
        cfg.timing.loop_interval_ms = 0;
        assert_validation_err(&cfg, "timing.loop_interval_ms must be positive");
    }

    #[test]
    fn io_timeout_must_fit_publish_interval() {
        let mut cfg = Config::default();
        cfg.timing.io_timeout_ms = 5000;
        assert_validation_err(&cfg, "must be shorter than publish_interval_sec");
    }

    #[test]
    fn negative_session_margin_rejected() {
        let mut cfg = Config::default();
        cfg.timing.session_margin_sec = -5;
        assert_validation_err(&cfg, "session_margin_sec must not be negative");
    }

    // -- Misc -------------------------------------------------------------

    #[test]
    fn sheet_endpoint_must_be_http() {
        let mut cfg = Config::default();
        cfg.sheet.endpoint = Some("ftp://example.com".into());
        assert_validation_err(&cfg, "is not an http(s) URL");
    }

    #[test]
    fn utc_offset_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.utc_offset_hours = Some(15);
        assert_validation_err(&cfg, "utc_offset_hours 15 out of range");
    }

    // -- Multiple errors reported at once ---------------------------------

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.device.id = "".into();
        cfg.relay.gpio_pin = 0;
        cfg.schedule.hour = 99;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "wrong count in: {msg}");
        assert!(msg.contains("device.id is empty"), "missing id error in: {msg}");
        assert!(msg.contains("not a valid BCM GPIO pin"), "missing gpio error in: {msg}");
        assert!(msg.contains("schedule.hour 99"), "missing hour error in: {msg}");
    }
}
