//! One iteration of the control loop.
//!
//! Order within a tick: queued dashboard commands, schedule evaluation,
//! then (on the publish cadence) sensor poll, moisture evaluation, display
//! and telemetry. Controller events are forwarded last, so a command and
//! its effect reach the dashboard in the same tick.

use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::commands::{self, parse_command};
use crate::dashboard::InboundWrite;
use crate::display::{DisplayPresenter, Panel};
use crate::relay::Relay;
use crate::sensor::{ClimateProbe, MoistureProbe, SensorReader};
use crate::state::SharedState;
use crate::telemetry::{ChannelSink, TelemetryPublisher};
use crate::watering::WateringController;

pub struct App<R, K, C, M, S, P> {
    controller: WateringController<R, K>,
    sensors: SensorReader<C, M>,
    telemetry: TelemetryPublisher<S>,
    display: DisplayPresenter<P>,
    inbound: mpsc::Receiver<InboundWrite>,
    shared: SharedState,
    publish_interval: Duration,
    next_poll: Instant,
}

impl<R, K, C, M, S, P> App<R, K, C, M, S, P>
where
    R: Relay,
    K: Clock,
    C: ClimateProbe,
    M: MoistureProbe,
    S: ChannelSink,
    P: Panel,
{
    pub fn new(
        controller: WateringController<R, K>,
        sensors: SensorReader<C, M>,
        telemetry: TelemetryPublisher<S>,
        display: DisplayPresenter<P>,
        inbound: mpsc::Receiver<InboundWrite>,
        shared: SharedState,
        publish_interval: Duration,
    ) -> Self {
        Self {
            controller,
            sensors,
            telemetry,
            display,
            inbound,
            shared,
            publish_interval,
            next_poll: Instant::now(),
        }
    }

    #[cfg(test)]
    pub fn controller(&self) -> &WateringController<R, K> {
        &self.controller
    }

    /// Run one loop iteration. An error means the command queue is gone;
    /// the schedule and sensors have still been serviced.
    pub async fn tick(&mut self) -> Result<()> {
        let inbound = self.drain_commands().await;

        self.controller.evaluate_schedule();

        let now = Instant::now();
        if now >= self.next_poll {
            self.next_poll = now + self.publish_interval;
            self.poll_sensors().await;
        }

        self.forward_events().await;
        inbound
    }

    /// Force the pump off and tell the dashboard, best effort.
    pub async fn shutdown(&mut self) {
        self.controller.shutdown();
        self.forward_events().await;
        self.telemetry.publish_pump(false);
        self.shared
            .write()
            .await
            .record_system("controller stopped; pump off".to_string());
        info!("pump forced OFF for shutdown");
    }

    // ── Steps ───────────────────────────────────────────────────────

    async fn drain_commands(&mut self) -> Result<()> {
        let mut outcomes = Vec::new();
        let result = loop {
            match self.inbound.try_recv() {
                Ok(write) => outcomes.push(self.handle_write(write)),
                Err(TryRecvError::Empty) => break Ok(()),
                Err(TryRecvError::Disconnected) => {
                    break Err(anyhow!("dashboard command queue closed"))
                }
            }
        };

        if !outcomes.is_empty() {
            let mut board = self.shared.write().await;
            for outcome in outcomes {
                match outcome {
                    Ok(detail) => board.record_command(detail),
                    Err(detail) => board.record_error(detail),
                }
            }
        }
        result
    }

    /// Parse and apply one dashboard write. Returns a line for the status
    /// page event log either way.
    fn handle_write(&mut self, write: InboundWrite) -> Result<String, String> {
        let cmd = parse_command(write.channel, &write.payload).map_err(|e| {
            warn!(channel = write.channel, "rejected dashboard write: {e}");
            format!("V{}: {e}", write.channel)
        })?;

        commands::apply(&mut self.controller, cmd).map_err(|e| {
            warn!(?cmd, "command rejected: {e:#}");
            format!("{cmd:?} rejected: {e:#}")
        })?;

        info!(?cmd, "dashboard command applied");
        Ok(format!("{cmd:?}"))
    }

    async fn poll_sensors(&mut self) {
        let snap = self.sensors.read_snapshot().await;

        // Only a real reading may drive the pump.
        if snap.moisture.valid {
            self.controller.evaluate_moisture(snap.moisture.moisture_pct);
        }

        let pump_on = self.controller.is_on();
        self.sensors.observe_pump(pump_on);
        self.display.present(&snap, pump_on);
        self.telemetry.publish_snapshot(&snap, pump_on);
        self.shared.write().await.record_snapshot(snap);
    }

    async fn forward_events(&mut self) {
        let events = self.controller.drain_events();
        let pump_on = self.controller.is_on();
        for event in &events {
            self.telemetry.publish_event(event, pump_on);
        }

        let mut board = self.shared.write().await;
        for event in &events {
            board.record_watering(event);
        }
        board.record_controller(self.controller.state());
        board.dashboard_connected = self.telemetry.dashboard_online();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
