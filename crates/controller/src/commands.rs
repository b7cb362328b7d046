//! Inbound dashboard commands: parse a channel write, then apply it to the
//! controller. Parsing is table-driven by channel number.

use anyhow::Result;

use crate::clock::Clock;
use crate::dashboard::channel;
use crate::relay::Relay;
use crate::watering::WateringController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ManualPump(bool),
    AutoEnabled(bool),
    ScheduleHour(u8),
    ScheduleMinute(u8),
    WateringDuration(u32),
    /// `true` clears the manual override; `false` is a button release.
    ResumeAuto(bool),
}

type Parser = fn(i64) -> Result<Command, String>;

/// Channel number, name for logs, payload parser.
const COMMANDS: &[(u8, &str, Parser)] = &[
    (channel::PUMP, "manual pump", manual_pump),
    (channel::AUTO_ENABLED, "auto enable", auto_enabled),
    (channel::SCHEDULE_HOUR, "schedule hour", schedule_hour),
    (channel::SCHEDULE_MINUTE, "schedule minute", schedule_minute),
    (channel::WATERING_DURATION, "watering duration", watering_duration),
    (channel::RESUME_AUTO, "resume auto", resume_auto),
];

fn manual_pump(v: i64) -> Result<Command, String> {
    flag(v).map(Command::ManualPump)
}

fn auto_enabled(v: i64) -> Result<Command, String> {
    flag(v).map(Command::AutoEnabled)
}

fn schedule_hour(v: i64) -> Result<Command, String> {
    small(v).map(Command::ScheduleHour)
}

fn schedule_minute(v: i64) -> Result<Command, String> {
    small(v).map(Command::ScheduleMinute)
}

fn watering_duration(v: i64) -> Result<Command, String> {
    u32::try_from(v)
        .map(Command::WateringDuration)
        .map_err(|_| format!("duration {v} out of range"))
}

fn resume_auto(v: i64) -> Result<Command, String> {
    flag(v).map(Command::ResumeAuto)
}

fn flag(v: i64) -> Result<bool, String> {
    match v {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(format!("expected 0 or 1, got {v}")),
    }
}

fn small(v: i64) -> Result<u8, String> {
    u8::try_from(v).map_err(|_| format!("value {v} out of range"))
}

/// Parse a decimal integer payload (dashboards may send `"1.0"`) for the
/// given channel.
pub fn parse_command(ch: u8, payload: &[u8]) -> Result<Command, String> {
    let Some(&(_, name, parse)) = COMMANDS.iter().find(|(n, _, _)| *n == ch) else {
        return Err(format!("no command on channel V{ch}"));
    };

    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    let value = parse_integer(text).ok_or_else(|| format!("{name}: not an integer: '{text}'"))?;
    parse(value).map_err(|e| format!("{name}: {e}"))
}

fn parse_integer(text: &str) -> Option<i64> {
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    let f: f64 = text.parse().ok()?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15).then_some(f as i64)
}

/// Apply a parsed command. Schedule edits can be rejected; the controller
/// then keeps its previous schedule.
pub fn apply<R: Relay, C: Clock>(ctl: &mut WateringController<R, C>, cmd: Command) -> Result<()> {
    match cmd {
        Command::ManualPump(on) => ctl.apply_manual_command(on),
        Command::AutoEnabled(enabled) => ctl.set_auto_enabled(enabled),
        Command::ScheduleHour(hour) => ctl.set_schedule_hour(hour)?,
        Command::ScheduleMinute(minute) => ctl.set_schedule_minute(minute)?,
        Command::WateringDuration(minutes) => ctl.set_watering_duration(minutes)?,
        Command::ResumeAuto(true) => ctl.clear_manual_override(),
        Command::ResumeAuto(false) => {}
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::relay::ProbeRelay;
    use crate::watering::{ControlMode, ScheduleConfig, Thresholds};
    use std::time::Duration;
    use time::macros::datetime;

    fn controller() -> WateringController<ProbeRelay, ManualClock> {
        WateringController::new(
            ProbeRelay::default(),
            ManualClock::at(datetime!(2025-06-01 12:00:00 UTC)),
            ScheduleConfig {
                hour: 6,
                minute: 30,
                duration_min: 5,
                auto_enabled: false,
            },
            Thresholds::default(),
            Duration::from_secs(60),
        )
    }

    // -- parse_command ------------------------------------------------------

    #[test]
    fn parse_manual_pump() {
        assert_eq!(parse_command(0, b"1"), Ok(Command::ManualPump(true)));
        assert_eq!(parse_command(0, b"0"), Ok(Command::ManualPump(false)));
    }

    #[test]
    fn parse_trims_whitespace() {
        assert_eq!(parse_command(10, b" 1\n"), Ok(Command::AutoEnabled(true)));
    }

    #[test]
    fn parse_accepts_integral_float() {
        assert_eq!(parse_command(7, b"6.0"), Ok(Command::ScheduleHour(6)));
    }

    #[test]
    fn parse_rejects_fractional_float() {
        assert!(parse_command(8, b"30.5").is_err());
    }

    #[test]
    fn parse_schedule_fields() {
        assert_eq!(parse_command(7, b"23"), Ok(Command::ScheduleHour(23)));
        assert_eq!(parse_command(8, b"45"), Ok(Command::ScheduleMinute(45)));
        assert_eq!(parse_command(9, b"15"), Ok(Command::WateringDuration(15)));
    }

    #[test]
    fn parse_resume_auto() {
        assert_eq!(parse_command(11, b"1"), Ok(Command::ResumeAuto(true)));
        assert_eq!(parse_command(11, b"0"), Ok(Command::ResumeAuto(false)));
    }

    #[test]
    fn parse_flag_out_of_range() {
        let err = parse_command(0, b"2").unwrap_err();
        assert!(err.contains("manual pump"), "{err}");
    }

    #[test]
    fn parse_negative_hour_rejected() {
        assert!(parse_command(7, b"-1").is_err());
    }

    #[test]
    fn parse_negative_duration_rejected() {
        assert!(parse_command(9, b"-5").is_err());
    }

    #[test]
    fn parse_garbage_rejected() {
        let err = parse_command(9, b"five").unwrap_err();
        assert!(err.contains("not an integer"), "{err}");
    }

    #[test]
    fn parse_empty_rejected() {
        assert!(parse_command(0, b"").is_err());
    }

    #[test]
    fn parse_unknown_channel() {
        let err = parse_command(4, b"1").unwrap_err();
        assert!(err.contains("V4"), "{err}");
    }

    // -- apply --------------------------------------------------------------

    #[test]
    fn apply_manual_pump_latches_override() {
        let mut ctl = controller();
        apply(&mut ctl, Command::ManualPump(true)).unwrap();
        assert!(ctl.is_on());
        assert!(ctl.state().manual_override);
        assert_eq!(ctl.pump().control_mode, ControlMode::Manual);
    }

    #[test]
    fn apply_out_of_range_hour_keeps_schedule() {
        let mut ctl = controller();
        assert!(apply(&mut ctl, Command::ScheduleHour(24)).is_err());
        assert_eq!(ctl.state().schedule.hour, 6);
    }

    #[test]
    fn apply_zero_duration_rejected() {
        let mut ctl = controller();
        assert!(apply(&mut ctl, Command::WateringDuration(0)).is_err());
        assert_eq!(ctl.state().schedule.duration_min, 5);
    }

    #[test]
    fn apply_huge_duration_rejected() {
        let mut ctl = controller();
        let cmd = parse_command(9, b"4294967295").unwrap();
        assert!(apply(&mut ctl, cmd).is_err());
        assert!(apply(&mut ctl, Command::WateringDuration(24 * 60 + 1)).is_err());
        assert_eq!(ctl.state().schedule.duration_min, 5);

        apply(&mut ctl, Command::WateringDuration(24 * 60)).unwrap();
        assert_eq!(ctl.state().schedule.duration_min, 24 * 60);
    }

    #[test]
    fn apply_schedule_edits() {
        let mut ctl = controller();
        apply(&mut ctl, Command::ScheduleHour(7)).unwrap();
        apply(&mut ctl, Command::ScheduleMinute(15)).unwrap();
        apply(&mut ctl, Command::WateringDuration(10)).unwrap();
        apply(&mut ctl, Command::AutoEnabled(true)).unwrap();
        let s = ctl.state().schedule;
        assert_eq!((s.hour, s.minute, s.duration_min, s.auto_enabled), (7, 15, 10, true));
    }

    #[test]
    fn apply_resume_auto_clears_override() {
        let mut ctl = controller();
        apply(&mut ctl, Command::ManualPump(false)).unwrap();
        apply(&mut ctl, Command::ResumeAuto(false)).unwrap();
        assert!(ctl.state().manual_override, "button release is a no-op");
        apply(&mut ctl, Command::ResumeAuto(true)).unwrap();
        assert!(!ctl.state().manual_override);
        assert_eq!(ctl.pump().control_mode, ControlMode::Idle);
    }
}
