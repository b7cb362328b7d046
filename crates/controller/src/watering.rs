//! Watering decision engine: arbitrates between manual override, automatic
//! moisture control and the daily watering schedule, and owns the pump relay.
//!
//! Every relay write goes through `WateringController::set_pump`, which
//! updates `PumpState::is_on` in the same call, so nothing outside this
//! module can observe the relay and the recorded state disagreeing.
//!
//! ## Control modes
//!
//! ```text
//!            moisture < dry                       moisture > wet
//!   Idle ───────────────────▶ AutoMoisture ───────────────────▶ Idle
//!     │  (override off, no session)
//!     │
//!     ├──[hh:mm == schedule, auto on]──▶ Scheduled ──[duration elapsed]──▶ Idle
//!     │
//!     └──[manual command]──▶ Manual  (sticky until the override is cleared)
//! ```
//!
//! Scheduled watering takes precedence over moisture control while a session
//! runs. Manual commands suppress moisture control but not the schedule.

use anyhow::{ensure, Result};
use serde::Serialize;
use std::time::Duration;
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::relay::Relay;

/// Below this moisture percentage the soil counts as dry.
pub const DRY_THRESHOLD: f32 = 30.0;
/// Above this moisture percentage the soil counts as wet.
pub const WET_THRESHOLD: f32 = 90.0;
/// Longest session a daily schedule allows.
pub const MAX_DURATION_MIN: u32 = 24 * 60;

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Idle,
    Manual,
    AutoMoisture,
    Scheduled,
}

/// A running scheduled watering session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Monotonic time the session started at.
    pub started: Duration,
    /// Wall-clock start, used only for the overrun ceiling.
    pub started_wall: OffsetDateTime,
    /// Duration captured at start; later schedule edits do not move it.
    pub length: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpState {
    pub is_on: bool,
    pub control_mode: ControlMode,
    /// `Some` only while `control_mode == Scheduled`.
    pub active_session: Option<Session>,
}

impl PumpState {
    pub fn active_session_start(&self) -> Option<Duration> {
        self.active_session.map(|s| s.started)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleConfig {
    pub hour: u8,
    pub minute: u8,
    pub duration_min: u32,
    pub auto_enabled: bool,
}

impl ScheduleConfig {
    pub fn validate(hour: u8, minute: u8, duration_min: u32) -> Result<()> {
        ensure!(hour <= 23, "schedule hour {hour} out of range [0, 23]");
        ensure!(minute <= 59, "schedule minute {minute} out of range [0, 59]");
        ensure!(
            (1..=MAX_DURATION_MIN).contains(&duration_min),
            "watering duration {duration_min} out of range [1, {MAX_DURATION_MIN}]"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub dry: f32,
    pub wet: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            dry: DRY_THRESHOLD,
            wet: WET_THRESHOLD,
        }
    }
}

/// Everything the controller mutates, in one place.
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub pump: PumpState,
    pub manual_override: bool,
    pub schedule: ScheduleConfig,
    /// Date and minute of the last session trigger; the same minute never
    /// starts a second session.
    last_trigger: Option<(Date, u8, u8)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpDecision {
    NoChange,
    TurnedOn,
    TurnedOff,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WateringEvent {
    PumpOn,
    PumpOff,
    LowMoisture { moisture_pct: f32 },
    ScheduleStart { hour: u8, minute: u8 },
    ScheduleDone,
}

impl WateringEvent {
    /// Event name as shown in the dashboard event log.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PumpOn => "pump_on",
            Self::PumpOff => "pump_off",
            Self::LowMoisture { .. } => "low_moisture",
            Self::ScheduleStart { .. } => "schedule_start",
            Self::ScheduleDone => "schedule_done",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::PumpOn => "Pump ON (Manual)".to_string(),
            Self::PumpOff => "Pump OFF (Manual)".to_string(),
            Self::LowMoisture { moisture_pct } => {
                format!("Soil is too dry ({moisture_pct:.1}%)! Pump started")
            }
            Self::ScheduleStart { hour, minute } => {
                format!("Watering started at {hour:02}:{minute:02}")
            }
            Self::ScheduleDone => "Watering completed".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct WateringController<R, C> {
    relay: R,
    clock: C,
    thresholds: Thresholds,
    /// Slack added to a session's length before the wall-clock ceiling trips.
    session_margin: Duration,
    state: ControllerState,
    outbox: Vec<WateringEvent>,
    clock_ok: bool,
}

impl<R: Relay, C: Clock> WateringController<R, C> {
    pub fn new(
        mut relay: R,
        clock: C,
        schedule: ScheduleConfig,
        thresholds: Thresholds,
        session_margin: Duration,
    ) -> Self {
        relay.write(false);
        Self {
            relay,
            clock,
            thresholds,
            session_margin,
            state: ControllerState {
                pump: PumpState {
                    is_on: false,
                    control_mode: ControlMode::Idle,
                    active_session: None,
                },
                manual_override: false,
                schedule,
                last_trigger: None,
            },
            outbox: Vec::new(),
            clock_ok: true,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    #[cfg(test)]
    pub fn pump(&self) -> &PumpState {
        &self.state.pump
    }

    pub fn is_on(&self) -> bool {
        self.state.pump.is_on
    }

    /// Take the events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<WateringEvent> {
        std::mem::take(&mut self.outbox)
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Drive the pump directly and latch the manual override.
    ///
    /// During a scheduled session the relay still follows the command, but
    /// the session keeps running and ends (pump off) at its deadline.
    pub fn apply_manual_command(&mut self, on: bool) {
        self.set_pump(on);
        self.state.manual_override = true;

        if self.state.pump.active_session.is_some() {
            info!(on, "manual command during scheduled session; session keeps running");
        } else {
            self.state.pump.control_mode = ControlMode::Manual;
        }

        let event = if on {
            WateringEvent::PumpOn
        } else {
            WateringEvent::PumpOff
        };
        info!("{}", event.message());
        self.outbox.push(event);
    }

    /// Release the manual override so moisture control resumes. A manually
    /// running pump is handed over to moisture control, which switches it
    /// off once the soil is wet.
    pub fn clear_manual_override(&mut self) {
        if !self.state.manual_override {
            return;
        }
        self.state.manual_override = false;

        if self.state.pump.control_mode == ControlMode::Manual {
            self.state.pump.control_mode = if self.state.pump.is_on {
                ControlMode::AutoMoisture
            } else {
                ControlMode::Idle
            };
        }
        info!(pump_on = self.state.pump.is_on, "manual override cleared; auto moisture control resumed");
    }

    pub fn set_auto_enabled(&mut self, enabled: bool) {
        self.state.schedule.auto_enabled = enabled;
        if enabled {
            info!("auto watering enabled");
        } else {
            info!("auto watering disabled");
        }
    }

    /// Replace the whole schedule. Out-of-range input is rejected and the
    /// previous schedule kept.
    pub fn set_schedule(&mut self, hour: u8, minute: u8, duration_min: u32) -> Result<()> {
        ScheduleConfig::validate(hour, minute, duration_min)?;
        self.state.schedule.hour = hour;
        self.state.schedule.minute = minute;
        self.state.schedule.duration_min = duration_min;
        info!(hour, minute, duration_min, "schedule set");
        Ok(())
    }

    pub fn set_schedule_hour(&mut self, hour: u8) -> Result<()> {
        let s = self.state.schedule;
        self.set_schedule(hour, s.minute, s.duration_min)
    }

    pub fn set_schedule_minute(&mut self, minute: u8) -> Result<()> {
        let s = self.state.schedule;
        self.set_schedule(s.hour, minute, s.duration_min)
    }

    pub fn set_watering_duration(&mut self, duration_min: u32) -> Result<()> {
        let s = self.state.schedule;
        self.set_schedule(s.hour, s.minute, duration_min)
    }

    // ── Evaluation ──────────────────────────────────────────────────

    /// Hysteresis control on soil moisture. Does nothing while the manual
    /// override is latched or a scheduled session is running.
    pub fn evaluate_moisture(&mut self, moisture_pct: f32) -> PumpDecision {
        if self.state.manual_override || self.state.pump.active_session.is_some() {
            return PumpDecision::NoChange;
        }
        if !moisture_pct.is_finite() {
            warn!("ignoring non-finite moisture reading");
            return PumpDecision::NoChange;
        }

        let pump = self.state.pump;
        if moisture_pct < self.thresholds.dry && !pump.is_on {
            self.set_pump(true);
            self.state.pump.control_mode = ControlMode::AutoMoisture;
            info!(
                moisture_pct,
                dry = self.thresholds.dry,
                "soil is too dry, pump ON"
            );
            self.outbox.push(WateringEvent::LowMoisture { moisture_pct });
            PumpDecision::TurnedOn
        } else if moisture_pct > self.thresholds.wet
            && pump.is_on
            && pump.control_mode == ControlMode::AutoMoisture
        {
            self.set_pump(false);
            self.state.pump.control_mode = ControlMode::Idle;
            info!(
                moisture_pct,
                wet = self.thresholds.wet,
                "soil is wet, pump OFF"
            );
            PumpDecision::TurnedOff
        } else {
            PumpDecision::NoChange
        }
    }

    /// Start a session when the configured minute comes round, and end the
    /// running one when its time is up. Runs every tick.
    pub fn evaluate_schedule(&mut self) -> PumpDecision {
        if let Some(session) = self.state.pump.active_session {
            return self.check_session(session);
        }

        if !self.state.schedule.auto_enabled {
            return PumpDecision::NoChange;
        }

        // Fail closed: no trustworthy clock, no session.
        let (Some(now), Some(mono)) = (self.clock.wall(), self.clock.monotonic()) else {
            if self.clock_ok {
                warn!("clock unavailable; scheduled watering suspended");
                self.clock_ok = false;
            }
            return PumpDecision::NoChange;
        };
        if !self.clock_ok {
            info!("clock available again; scheduled watering resumed");
            self.clock_ok = true;
        }

        let schedule = self.state.schedule;
        if now.hour() != schedule.hour || now.minute() != schedule.minute {
            return PumpDecision::NoChange;
        }
        let slot = (now.date(), now.hour(), now.minute());
        if self.state.last_trigger == Some(slot) {
            return PumpDecision::NoChange;
        }

        self.set_pump(true);
        self.state.last_trigger = Some(slot);
        self.state.pump.control_mode = ControlMode::Scheduled;
        self.state.pump.active_session = Some(Session {
            started: mono,
            started_wall: now,
            length: Duration::from_secs(u64::from(schedule.duration_min) * 60),
        });
        info!(
            hour = schedule.hour,
            minute = schedule.minute,
            duration_min = schedule.duration_min,
            "scheduled watering started"
        );
        self.outbox.push(WateringEvent::ScheduleStart {
            hour: schedule.hour,
            minute: schedule.minute,
        });
        PumpDecision::TurnedOn
    }

    fn check_session(&mut self, session: Session) -> PumpDecision {
        let expired = match self.clock.monotonic() {
            Some(now) if now >= session.started => now - session.started >= session.length,
            Some(_) => {
                warn!("monotonic clock went backwards; ending scheduled session");
                true
            }
            None => {
                warn!("monotonic clock unavailable; ending scheduled session");
                true
            }
        };

        // Ceiling against a monotonic source that has stopped advancing.
        let ceiling = session.length + self.session_margin;
        let overran = self.clock.wall().is_some_and(|now| {
            (now - session.started_wall).whole_seconds() >= ceiling.as_secs() as i64
        });
        if overran && !expired {
            warn!(
                ceiling_sec = ceiling.as_secs(),
                "session overran its ceiling by wall clock; forcing pump OFF"
            );
        }

        if !(expired || overran) {
            return PumpDecision::NoChange;
        }

        self.set_pump(false);
        self.state.pump.active_session = None;
        self.state.pump.control_mode = ControlMode::Idle;
        info!("scheduled watering completed");
        self.outbox.push(WateringEvent::ScheduleDone);
        PumpDecision::TurnedOff
    }

    /// Force the pump off for process exit.
    pub fn shutdown(&mut self) {
        self.set_pump(false);
        self.state.pump.active_session = None;
        self.state.pump.control_mode = ControlMode::Idle;
    }

    fn set_pump(&mut self, on: bool) {
        self.relay.write(on);
        self.state.pump.is_on = on;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
