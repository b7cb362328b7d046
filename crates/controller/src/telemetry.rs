//! Best-effort telemetry: dashboard channel values, dashboard event log,
//! and a row per poll to the logging spreadsheet. Nothing here fails the
//! caller; every error is logged and the sink skipped for this cycle.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dashboard::channel;
use crate::sensor::SensorSnapshot;
use crate::watering::WateringEvent;

/// Longest response body echoed to the log.
const MAX_LOGGED_BODY: usize = 200;

/// Where virtual channel values and event log entries go.
pub trait ChannelSink {
    fn online(&self) -> bool;
    fn write_channel(&self, channel: u8, value: &str) -> Result<()>;
    fn log_event(&self, name: &str, message: &str) -> Result<()>;
}

fn pump_value(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

// ---------------------------------------------------------------------------
// Spreadsheet logger
// ---------------------------------------------------------------------------

/// `GET <endpoint>?temp=..&humidity=..&moisture=..`, appending with `&`
/// when the endpoint already carries a query string.
pub fn sheet_url(endpoint: &str, snap: &SensorSnapshot) -> String {
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    format!(
        "{endpoint}{sep}temp={:.1}&humidity={:.1}&moisture={:.2}",
        snap.climate.temperature_c, snap.climate.humidity_pct, snap.moisture.moisture_pct
    )
}

pub struct SheetLogger {
    client: reqwest::Client,
    endpoint: String,
}

impl SheetLogger {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build http client")?;
        info!(%endpoint, "spreadsheet logging enabled");
        Ok(Self { client, endpoint })
    }

    /// Fire and forget: the request runs as its own task, bounded by the
    /// client timeout, so a slow endpoint never holds up the control loop.
    pub fn log(&self, snap: &SensorSnapshot) {
        let url = sheet_url(&self.endpoint, snap);
        let client = self.client.clone();
        tokio::spawn(async move {
            match send(&client, &url).await {
                Ok(body) => info!(response = %truncate(&body, MAX_LOGGED_BODY), "sheet row logged"),
                Err(e) => warn!("sheet logging failed: {e:#}"),
            }
        });
    }
}

async fn send(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .context("request failed")?
        .error_for_status()
        .context("endpoint returned an error")?;
    response.text().await.context("failed to read response body")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

pub struct TelemetryPublisher<S> {
    dashboard: S,
    sheet: Option<SheetLogger>,
}

impl<S: ChannelSink> TelemetryPublisher<S> {
    pub fn new(dashboard: S, sheet: Option<SheetLogger>) -> Self {
        Self { dashboard, sheet }
    }

    /// Periodic push of the latest readings and pump state.
    ///
    /// Climate values are sent even when stale (they are the last good
    /// ones), on the dashboard and in the spreadsheet row. A failed moisture
    /// read has no usable value, so it is left out of the dashboard and the
    /// spreadsheet row is skipped.
    pub fn publish_snapshot(&self, snap: &SensorSnapshot, pump_on: bool) {
        self.write(channel::PUMP, pump_value(pump_on));
        self.write(channel::TEMPERATURE, &format!("{:.1}", snap.climate.temperature_c));
        self.write(channel::HUMIDITY, &format!("{:.1}", snap.climate.humidity_pct));

        if snap.moisture.valid {
            self.write(channel::MOISTURE, &format!("{:.1}", snap.moisture.moisture_pct));
        } else {
            debug!("moisture invalid; dashboard value not updated");
        }

        match &self.sheet {
            Some(sheet) if snap.moisture.valid => sheet.log(snap),
            Some(_) => debug!("moisture invalid; sheet row skipped"),
            None => {}
        }
    }

    /// Forward a controller event to the dashboard log and refresh the pump
    /// channel so the dashboard switch tracks the relay.
    pub fn publish_event(&self, event: &WateringEvent, pump_on: bool) {
        if let Err(e) = self.dashboard.log_event(event.name(), &event.message()) {
            warn!(event = event.name(), "dashboard event log failed: {e:#}");
        }
        self.publish_pump(pump_on);
    }

    pub fn publish_pump(&self, on: bool) {
        self.write(channel::PUMP, pump_value(on));
    }

    pub fn dashboard_online(&self) -> bool {
        self.dashboard.online()
    }

    fn write(&self, ch: u8, value: &str) {
        if let Err(e) = self.dashboard.write_channel(ch, value) {
            warn!(channel = ch, "dashboard write failed: {e:#}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::bail;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Records everything written; can be switched to fail every call.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) channels: Rc<RefCell<Vec<(u8, String)>>>,
        pub(crate) events: Rc<RefCell<Vec<(String, String)>>>,
        pub(crate) failing: Rc<Cell<bool>>,
    }

    impl RecordingSink {
        pub(crate) fn last_value(&self, ch: u8) -> Option<String> {
            self.channels
                .borrow()
                .iter()
                .rev()
                .find(|(c, _)| *c == ch)
                .map(|(_, v)| v.clone())
        }

        pub(crate) fn event_names(&self) -> Vec<String> {
            self.events.borrow().iter().map(|(n, _)| n.clone()).collect()
        }
    }

    impl ChannelSink for RecordingSink {
        fn online(&self) -> bool {
            !self.failing.get()
        }

        fn write_channel(&self, channel: u8, value: &str) -> Result<()> {
            if self.failing.get() {
                bail!("broker unreachable");
            }
            self.channels.borrow_mut().push((channel, value.to_string()));
            Ok(())
        }

        fn log_event(&self, name: &str, message: &str) -> Result<()> {
            if self.failing.get() {
                bail!("broker unreachable");
            }
            self.events
                .borrow_mut()
                .push((name.to_string(), message.to_string()));
            Ok(())
        }
    }
}
