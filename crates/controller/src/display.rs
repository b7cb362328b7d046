//! Local status display. The panel itself is behind a trait; the presenter
//! formats the four lines and never lets a panel fault reach the loop.

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::sensor::SensorSnapshot;
use crate::state::SharedState;

pub type Lines = [String; 4];

pub fn render_lines(snap: &SensorSnapshot, pump_on: bool) -> Lines {
    [
        format!("Temp: {:.1}C", snap.climate.temperature_c),
        format!("Humidity: {:.1}%", snap.climate.humidity_pct),
        format!("Soil: {:.1}%", snap.moisture.moisture_pct),
        format!("Pump: {}", if pump_on { "ON" } else { "OFF" }),
    ]
}

pub trait Panel {
    fn show(&mut self, lines: &Lines) -> Result<()>;
}

pub struct DisplayPresenter<P> {
    panel: P,
    healthy: bool,
}

impl<P: Panel> DisplayPresenter<P> {
    pub fn new(panel: P) -> Self {
        Self {
            panel,
            healthy: true,
        }
    }

    /// Render and show. Failures are logged once per outage.
    pub fn present(&mut self, snap: &SensorSnapshot, pump_on: bool) {
        let lines = render_lines(snap, pump_on);
        match self.panel.show(&lines) {
            Ok(()) => {
                if !self.healthy {
                    info!("display recovered");
                    self.healthy = true;
                }
            }
            Err(e) => {
                if self.healthy {
                    warn!("display update failed: {e:#}");
                    self.healthy = false;
                }
            }
        }
    }
}

/// Mirrors the display lines onto the status page.
pub struct StatusPanel {
    shared: SharedState,
}

impl StatusPanel {
    pub fn new(shared: SharedState) -> Self {
        Self { shared }
    }
}

impl Panel for StatusPanel {
    fn show(&mut self, lines: &Lines) -> Result<()> {
        let mut board = self
            .shared
            .try_write()
            .map_err(|_| anyhow!("status board busy"))?;
        board.set_display(lines.clone());
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{ClimateReading, MoistureReading};
    use crate::state::StatusBoard;
    use crate::watering::ScheduleConfig;
    use anyhow::bail;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn snapshot() -> SensorSnapshot {
        SensorSnapshot {
            climate: ClimateReading {
                temperature_c: 23.44,
                humidity_pct: 55.0,
                valid: true,
            },
            moisture: MoistureReading {
                moisture_pct: 42.06,
                valid: true,
            },
        }
    }

    #[test]
    fn renders_four_lines() {
        let lines = render_lines(&snapshot(), true);
        assert_eq!(
            lines,
            [
                "Temp: 23.4C".to_string(),
                "Humidity: 55.0%".to_string(),
                "Soil: 42.1%".to_string(),
                "Pump: ON".to_string(),
            ]
        );
    }

    #[test]
    fn renders_pump_off() {
        assert_eq!(render_lines(&snapshot(), false)[3], "Pump: OFF");
    }

    struct BrokenPanel {
        calls: u32,
    }

    impl Panel for BrokenPanel {
        fn show(&mut self, _lines: &Lines) -> Result<()> {
            self.calls += 1;
            bail!("i2c nack")
        }
    }

    #[test]
    fn panel_failure_is_swallowed() {
        let mut presenter = DisplayPresenter::new(BrokenPanel { calls: 0 });
        presenter.present(&snapshot(), false);
        presenter.present(&snapshot(), false);
        assert_eq!(presenter.panel.calls, 2);
        assert!(!presenter.healthy);
    }

    #[tokio::test]
    async fn status_panel_mirrors_lines() {
        let shared = Arc::new(RwLock::new(StatusBoard::new(ScheduleConfig {
            hour: 6,
            minute: 30,
            duration_min: 5,
            auto_enabled: false,
        })));
        let mut presenter = DisplayPresenter::new(StatusPanel::new(Arc::clone(&shared)));
        presenter.present(&snapshot(), true);

        let status = shared.read().await.to_status();
        assert_eq!(status.display[0], "Temp: 23.4C");
        assert_eq!(status.display[3], "Pump: ON");
    }

    #[tokio::test]
    async fn status_panel_busy_is_an_error() {
        let shared = Arc::new(RwLock::new(StatusBoard::new(ScheduleConfig {
            hour: 6,
            minute: 30,
            duration_min: 5,
            auto_enabled: false,
        })));
        let _reader = shared.read().await;
        let mut panel = StatusPanel::new(Arc::clone(&shared));
        assert!(panel.show(&Default::default()).is_err());
    }
}
