#[cfg(feature = "adc")]
mod adc;
mod app;
mod climate;
mod clock;
mod commands;
mod config;
mod dashboard;
mod display;
mod relay;
mod sensor;
#[cfg(feature = "sim")]
mod sim;
mod state;
mod telemetry;
mod watering;
mod web;

use anyhow::{Context, Result};
use std::{env, sync::Arc, time::Duration};
use time::UtcOffset;
use tokio::sync::RwLock;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use app::App;
use climate::IioClimate;
use clock::SystemClock;
use config::Config;
use dashboard::Topics;
use display::{DisplayPresenter, StatusPanel};
use relay::PumpRelay;
use sensor::{ClimateSource, MoistureSource, SensorReader};
use state::StatusBoard;
use telemetry::{SheetLogger, TelemetryPublisher};
use watering::WateringController;

/// Pause after a failed loop iteration.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load_or_default(&config_path)?;

    // The local offset can only be read while the process is single-threaded.
    let offset = clock::resolve_offset(cfg.utc_offset_hours())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    runtime.block_on(run(cfg, offset))
}

async fn run(cfg: Config, offset: UtcOffset) -> Result<()> {
    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(cfg.relay.active_low);

    // ── Pump relay (off before anything else) ───────────────────────
    let relay = PumpRelay::new(cfg.gpio_pin(), active_low)?;
    let controller = WateringController::new(
        relay,
        SystemClock::new(offset),
        cfg.schedule_config(),
        cfg.thresholds(),
        cfg.session_margin(),
    );

    // ── Sensors ─────────────────────────────────────────────────────
    let (moisture, max_raw) = moisture_source(&cfg)?;
    let sensors = SensorReader::new(climate_source(&cfg)?, moisture, cfg.io_timeout(), max_raw);

    // ── Shared state (ephemeral, for the status page) ───────────────
    let shared = Arc::new(RwLock::new(StatusBoard::new(cfg.schedule_config())));
    shared.write().await.record_system(format!(
        "controller started (device {}, utc offset {offset})",
        cfg.device.id
    ));

    // ── Web server ──────────────────────────────────────────────────
    let web_state = Arc::clone(&shared);
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state, web_port).await {
            error!("status page stopped: {e:#}");
        }
    });

    // ── Dashboard link ──────────────────────────────────────────────
    let topics = Topics::new(&cfg.device.topic_prefix, &cfg.device.id);
    let (link, poller, inbound) = dashboard::connect(&broker, mqtt_port, topics);
    tokio::spawn(poller.run());

    let sheet = cfg
        .sheet
        .endpoint
        .clone()
        .map(|endpoint| SheetLogger::new(endpoint, cfg.io_timeout()))
        .transpose()?;

    let mut app = App::new(
        controller,
        sensors,
        TelemetryPublisher::new(link, sheet),
        DisplayPresenter::new(StatusPanel::new(Arc::clone(&shared))),
        inbound,
        shared,
        cfg.publish_interval(),
    );

    info!(
        loop_ms = cfg.loop_interval().as_millis() as u64,
        publish_sec = cfg.publish_interval().as_secs(),
        "control loop running"
    );

    // ── Control loop ────────────────────────────────────────────────
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = interval(cfg.loop_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            reason = &mut shutdown => {
                match reason {
                    Ok(signal) => info!(signal, "shutdown requested"),
                    Err(e) => error!("signal handling failed, stopping: {e:#}"),
                }
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = app.tick().await {
                    error!("control loop error: {e:#}");
                    sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    app.shutdown().await;
    // Give the dashboard link a moment to flush the final pump state.
    sleep(Duration::from_millis(200)).await;
    Ok(())
}

fn climate_source(cfg: &Config) -> Result<ClimateSource> {
    if let Some(dir) = &cfg.climate.iio_device {
        return Ok(ClimateSource::Iio(IioClimate::new(dir)));
    }

    #[cfg(feature = "sim")]
    {
        warn!("no climate.iio_device configured; using simulated climate");
        Ok(ClimateSource::Sim(sim::SimClimate::new()))
    }
    #[cfg(not(feature = "sim"))]
    {
        anyhow::bail!("climate.iio_device is required when built without the `sim` feature")
    }
}

/// Moisture probe plus the raw value of a dry sensor on that probe's scale.
fn moisture_source(cfg: &Config) -> Result<(MoistureSource, u16)> {
    #[cfg(feature = "adc")]
    {
        let mut max_raw = cfg.max_raw();
        if max_raw > adc::FULL_SCALE {
            warn!(
                max_raw,
                full_scale = adc::FULL_SCALE,
                "moisture.max_raw exceeds ADS1115 single-ended range; clamped"
            );
            max_raw = adc::FULL_SCALE;
        }
        let ads = adc::Ads1115::new(cfg.moisture.adc_address as u16, cfg.moisture.adc_channel as u8)?;
        Ok((MoistureSource::Ads1115(ads), max_raw))
    }

    #[cfg(all(feature = "sim", not(feature = "adc")))]
    {
        let scenario = sim::Scenario::from_str_lossy(
            &env::var("SIM_SCENARIO").unwrap_or_default(),
        );
        Ok((MoistureSource::Sim(sim::SoilSim::new(scenario, cfg.max_raw())), cfg.max_raw()))
    }
}

/// Resolves on SIGINT or SIGTERM with the signal's name.
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.context("failed to listen for ctrl-c")?;
            Ok("SIGINT")
        }
        _ = term.recv() => Ok("SIGTERM"),
    }
}
