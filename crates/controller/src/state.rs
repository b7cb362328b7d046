use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::sensor::SensorSnapshot;
use crate::watering::{ControlMode, ControllerState, ScheduleConfig, WateringEvent};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<StatusBoard>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Read-only mirror of the controller for the status page. The control
/// loop is the only writer.
pub struct StatusBoard {
    started_at: Instant,
    pub dashboard_connected: bool,
    snapshot: Option<SensorSnapshot>,
    snapshot_at: Option<OffsetDateTime>,
    pump: PumpStatus,
    schedule: ScheduleConfig,
    display: [String; 4],
    events: VecDeque<StatusEvent>,
}

#[derive(Clone, Copy, Serialize)]
pub struct PumpStatus {
    pub on: bool,
    pub control_mode: ControlMode,
    pub manual_override: bool,
    pub session_active: bool,
}

#[derive(Clone, Serialize)]
pub struct StatusEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Watering,
    Command,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub dashboard_connected: bool,
    pub snapshot: Option<SensorSnapshot>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub snapshot_at: Option<OffsetDateTime>,
    pub pump: PumpStatus,
    pub schedule: ScheduleConfig,
    pub display: [String; 4],
    pub events: Vec<StatusEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl StatusBoard {
    pub fn new(schedule: ScheduleConfig) -> Self {
        Self {
            started_at: Instant::now(),
            dashboard_connected: false,
            snapshot: None,
            snapshot_at: None,
            pump: PumpStatus {
                on: false,
                control_mode: ControlMode::Idle,
                manual_override: false,
                session_active: false,
            },
            schedule,
            display: Default::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Copy the controller's current state.
    pub fn record_controller(&mut self, state: &ControllerState) {
        self.pump = PumpStatus {
            on: state.pump.is_on,
            control_mode: state.pump.control_mode,
            manual_override: state.manual_override,
            session_active: state.pump.active_session_start().is_some(),
        };
        self.schedule = state.schedule;
    }

    pub fn record_snapshot(&mut self, snapshot: SensorSnapshot) {
        self.snapshot = Some(snapshot);
        self.snapshot_at = Some(OffsetDateTime::now_utc());
    }

    pub fn set_display(&mut self, lines: [String; 4]) {
        self.display = lines;
    }

    pub fn record_watering(&mut self, event: &WateringEvent) {
        self.push_event(EventKind::Watering, event.message());
    }

    /// Record an accepted dashboard command.
    pub fn record_command(&mut self, detail: String) {
        self.push_event(EventKind::Command, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot, newest event first.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            dashboard_connected: self.dashboard_connected,
            snapshot: self.snapshot,
            snapshot_at: self.snapshot_at,
            pump: self.pump,
            schedule: self.schedule,
            display: self.display.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(StatusEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> StatusBoard {
        StatusBoard::new(ScheduleConfig {
            hour: 6,
            minute: 30,
            duration_min: 5,
            auto_enabled: false,
        })
    }

    #[test]
    fn events_newest_first() {
        let mut b = board();
        b.record_system("started".into());
        b.record_watering(&WateringEvent::PumpOn);
        let status = b.to_status();
        assert_eq!(status.events[0].kind, EventKind::Watering);
        assert_eq!(status.events[0].detail, "Pump ON (Manual)");
        assert_eq!(status.events[1].detail, "started");
    }

    #[test]
    fn ring_buffer_caps_at_max() {
        let mut b = board();
        for i in 0..(MAX_EVENTS + 25) {
            b.record_command(format!("cmd {i}"));
        }
        let status = b.to_status();
        assert_eq!(status.events.len(), MAX_EVENTS);
        assert_eq!(status.events[0].detail, format!("cmd {}", MAX_EVENTS + 24));
        assert_eq!(status.events.last().unwrap().detail, "cmd 25");
    }

    #[test]
    fn status_serializes_to_json() {
        let mut b = board();
        b.record_error("moisture read failed".into());
        let json = serde_json::to_value(b.to_status()).unwrap();
        assert_eq!(json["pump"]["control_mode"], "idle");
        assert_eq!(json["schedule"]["hour"], 6);
        assert!(json["snapshot"].is_null());
        assert_eq!(json["events"][0]["kind"], "error");
        assert!(json["events"][0]["ts"].is_string());
        assert_eq!(json["display"].as_array().unwrap().len(), 4);
    }
}
