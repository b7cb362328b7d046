//! Remote dashboard link over MQTT.
//!
//! The dashboard speaks in numbered virtual channels. Writes from the
//! dashboard arrive on `<prefix>/<device>/v/<n>/set`; the controller
//! publishes channel values on `<prefix>/<device>/v/<n>` and event log
//! entries on `<prefix>/<device>/event/<name>`.
//!
//! The poll task owns the MQTT event loop. It forwards inbound writes into a
//! bounded queue the control loop drains, and reconnects with a capped
//! exponential backoff. Outbound publishes never wait.

use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::telemetry::ChannelSink;

/// Virtual channel numbers shared with the dashboard project.
pub mod channel {
    pub const PUMP: u8 = 0;
    pub const TEMPERATURE: u8 = 4;
    pub const HUMIDITY: u8 = 5;
    pub const MOISTURE: u8 = 6;
    pub const SCHEDULE_HOUR: u8 = 7;
    pub const SCHEDULE_MINUTE: u8 = 8;
    pub const WATERING_DURATION: u8 = 9;
    pub const AUTO_ENABLED: u8 = 10;
    pub const RESUME_AUTO: u8 = 11;
}

/// Inbound writes buffered between the poll task and the control loop.
const INBOUND_CAPACITY: usize = 32;
/// rumqttc request queue depth.
const REQUEST_CAPACITY: usize = 20;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const BACKOFF_INITIAL: Duration = Duration::from_secs(2);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Topic helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(prefix: &str, device: &str) -> Self {
        Self {
            base: format!("{prefix}/{device}"),
        }
    }

    pub fn channel(&self, n: u8) -> String {
        format!("{}/v/{n}", self.base)
    }

    pub fn event(&self, name: &str) -> String {
        format!("{}/event/{name}", self.base)
    }

    /// Retained availability topic, `online` / `offline`.
    pub fn availability(&self) -> String {
        format!("{}/status", self.base)
    }

    pub fn command_filter(&self) -> String {
        format!("{}/v/+/set", self.base)
    }

    /// Extract the channel number from "<base>/v/<n>/set".
    pub fn parse_command_topic(&self, topic: &str) -> Option<u8> {
        let rest = topic.strip_prefix(&self.base)?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() == 3 && parts[0] == "v" && parts[2] == "set" {
            parts[1].parse().ok()
        } else {
            None
        }
    }
}

/// A dashboard write to one virtual channel, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundWrite {
    pub channel: u8,
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Doubling reconnect delay, capped, reset once a connection succeeds.
#[derive(Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Publishing half of the dashboard connection. Cheap to clone.
#[derive(Clone)]
pub struct DashboardLink {
    client: AsyncClient,
    topics: Arc<Topics>,
    connected: Arc<AtomicBool>,
}

/// Receiving half: drives the MQTT event loop. Spawn [`Poller::run`].
pub struct Poller {
    eventloop: EventLoop,
    client: AsyncClient,
    topics: Arc<Topics>,
    connected: Arc<AtomicBool>,
    inbound: mpsc::Sender<InboundWrite>,
}

/// Set up the MQTT client. Nothing touches the network until the poller runs.
pub fn connect(
    host: &str,
    port: u16,
    topics: Topics,
) -> (DashboardLink, Poller, mpsc::Receiver<InboundWrite>) {
    let client_id = format!("irrigation-{}", topics.base.replace('/', "-"));
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_last_will(LastWill::new(
        topics.availability(),
        "offline",
        QoS::AtLeastOnce,
        true,
    ));

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
    let topics = Arc::new(topics);
    let connected = Arc::new(AtomicBool::new(false));

    info!(host, port, base = %topics.base, "dashboard link configured");

    let link = DashboardLink {
        client: client.clone(),
        topics: Arc::clone(&topics),
        connected: Arc::clone(&connected),
    };
    let poller = Poller {
        eventloop,
        client,
        topics,
        connected,
        inbound: tx,
    };
    (link, poller, rx)
}

impl DashboardLink {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn publish(&self, topic: String, payload: String, retain: bool) -> Result<()> {
        if !self.is_connected() {
            debug!(%topic, "dashboard offline; publish skipped");
            return Ok(());
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload)?;
        Ok(())
    }
}

impl ChannelSink for DashboardLink {
    fn online(&self) -> bool {
        self.is_connected()
    }

    fn write_channel(&self, channel: u8, value: &str) -> Result<()> {
        self.publish(self.topics.channel(channel), value.to_string(), true)
    }

    fn log_event(&self, name: &str, message: &str) -> Result<()> {
        self.publish(self.topics.event(name), message.to_string(), false)
    }
}

impl Poller {
    /// Poll forever. Returns only when the control loop has gone away.
    pub async fn run(mut self) {
        let mut backoff = Backoff::new(BACKOFF_INITIAL, BACKOFF_MAX);

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("dashboard connected");
                    self.connected.store(true, Ordering::Relaxed);
                    backoff.reset();
                    self.on_connect();
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let Some(channel) = self.topics.parse_command_topic(&p.topic) else {
                        debug!(topic = %p.topic, "unhandled topic");
                        continue;
                    };
                    let write = InboundWrite {
                        channel,
                        payload: p.payload.to_vec(),
                    };
                    match self.inbound.try_send(write) {
                        Ok(()) => {}
                        Err(TrySendError::Full(w)) => {
                            warn!(channel = w.channel, "command queue full; write dropped");
                        }
                        Err(TrySendError::Closed(_)) => {
                            info!("command queue closed; dashboard link stopping");
                            return;
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("dashboard disconnected by broker");
                    self.connected.store(false, Ordering::Relaxed);
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.store(false, Ordering::Relaxed);
                    let delay = backoff.next_delay();
                    warn!(retry_in_sec = delay.as_secs(), "dashboard connection error: {e}");
                    sleep(delay).await;
                }
            }
        }
    }

    /// Subscriptions do not survive a clean session; renew them on every
    /// connect. Uses the non-blocking API because this task is the one
    /// draining the request queue.
    fn on_connect(&self) {
        let filter = self.topics.command_filter();
        if let Err(e) = self.client.try_subscribe(&filter, QoS::AtLeastOnce) {
            warn!(%filter, "subscribe failed: {e}");
        } else {
            info!(%filter, "subscribed to dashboard writes");
        }
        if let Err(e) = self.client.try_publish(
            self.topics.availability(),
            QoS::AtLeastOnce,
            true,
            "online",
        ) {
            warn!("availability publish failed: {e}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics::new("garden", "bed-1")
    }

    // -- Topic construction -------------------------------------------------

    #[test]
    fn outbound_topics() {
        let t = topics();
        assert_eq!(t.channel(channel::MOISTURE), "garden/bed-1/v/6");
        assert_eq!(t.event("pump_on"), "garden/bed-1/event/pump_on");
        assert_eq!(t.availability(), "garden/bed-1/status");
        assert_eq!(t.command_filter(), "garden/bed-1/v/+/set");
    }

    // -- parse_command_topic ------------------------------------------------

    #[test]
    fn parse_command_topic_valid() {
        assert_eq!(topics().parse_command_topic("garden/bed-1/v/0/set"), Some(0));
        assert_eq!(topics().parse_command_topic("garden/bed-1/v/11/set"), Some(11));
    }

    #[test]
    fn parse_command_topic_other_device() {
        assert_eq!(topics().parse_command_topic("garden/bed-2/v/0/set"), None);
    }

    #[test]
    fn parse_command_topic_device_name_prefix_only() {
        assert_eq!(topics().parse_command_topic("garden/bed-10/v/0/set"), None);
    }

    #[test]
    fn parse_command_topic_outbound_value_topic() {
        assert_eq!(topics().parse_command_topic("garden/bed-1/v/0"), None);
    }

    #[test]
    fn parse_command_topic_non_numeric_channel() {
        assert_eq!(topics().parse_command_topic("garden/bed-1/v/pump/set"), None);
    }

    #[test]
    fn parse_command_topic_channel_overflow() {
        assert_eq!(topics().parse_command_topic("garden/bed-1/v/300/set"), None);
    }

    #[test]
    fn parse_command_topic_too_many_segments() {
        assert_eq!(topics().parse_command_topic("garden/bed-1/v/0/set/x"), None);
    }

    #[test]
    fn parse_command_topic_empty_string() {
        assert_eq!(topics().parse_command_topic(""), None);
    }

    // -- Backoff ------------------------------------------------------------

    #[test]
    fn backoff_doubles_to_cap() {
        let mut b = Backoff::new(BACKOFF_INITIAL, BACKOFF_MAX);
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn backoff_reset_starts_over() {
        let mut b = Backoff::new(BACKOFF_INITIAL, BACKOFF_MAX);
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), BACKOFF_INITIAL);
    }

    // -- Link ---------------------------------------------------------------

    #[tokio::test]
    async fn offline_link_skips_publishes() {
        let (link, _poller, _rx) = connect("127.0.0.1", 1883, topics());
        assert!(!link.is_connected());
        link.write_channel(channel::PUMP, "1").unwrap();
        link.log_event("pump_on", "Pump ON (Manual)").unwrap();
    }
}
