//! Plant Sensor Simulation
//!
//! Publishes synthetic sensor payloads on `<line>/<machine>/<sensor>` so that
//! plant-sentinel can be exercised without real hardware:
//! - Vibration sensors (three-axis RMS around a base level)
//! - Temperature / humidity
//! - Generic analog sensors
//! - Air valve stroke timing with occasional slow strokes
//!
//! # Usage
//! ```bash
//! # Publish the default sensor set to a local broker
//! ./simulation
//!
//! # Pipe one valve into a dry-run sentinel
//! ./simulation --stdout --sensor valve --speed 10 --count 500 \
//!     | ./plant-sentinel --mode valve --stdin --dry-run
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use plant_sentinel::acquisition::mqtt::qos_from_level;
use plant_sentinel::config::defaults;
use plant_sentinel::types::{TempHumidReading, TimeType, ValveTimingReading, VibrationReading};

/// Messages buffered between the generators and the publisher.
const PUBLISH_QUEUE: usize = 256;

const DISCONNECT_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "simulation")]
#[command(about = "Synthetic plant sensor publisher for plant-sentinel testing")]
#[command(version)]
struct Args {
    /// Sensor families to simulate (repeatable, default: all)
    #[arg(long, value_enum)]
    sensor: Vec<SensorKind>,

    /// Line name used in topics and payloads
    #[arg(long, default_value = "IoT_Industrial")]
    line: String,

    /// Machine name used in topics and payloads
    #[arg(long, default_value = "device01")]
    machine: String,

    /// Print payloads to stdout, one JSON object per line, instead of publishing
    #[arg(long)]
    stdout: bool,

    /// MQTT broker host
    #[arg(long, env = "MQTT_HOST", default_value = defaults::DEFAULT_MQTT_HOST)]
    host: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = defaults::DEFAULT_MQTT_PORT)]
    port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Publish QoS (0, 1 or 2)
    #[arg(long, env = "MQTT_QOS", default_value_t = defaults::DEFAULT_MQTT_QOS)]
    qos: u8,

    /// Time compression factor (1 = real-time, 10 = ten times faster)
    #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..=1000))]
    speed: u32,

    /// Stop each sensor after this many payloads
    #[arg(long)]
    count: Option<u64>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Mean valve stroke time in milliseconds
    #[arg(long, default_value = "400")]
    valve_mean_ms: f64,

    /// Standard deviation of the valve stroke time in milliseconds
    #[arg(long, default_value = "10")]
    valve_std_ms: f64,

    /// Probability that a valve stroke is slow (0 disables injection)
    #[arg(long, default_value = "0.01")]
    slow_stroke_rate: f64,

    /// Multiplier applied to slow valve strokes
    #[arg(long, default_value = "1.5")]
    slow_stroke_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum SensorKind {
    Vibration,
    TempHumid,
    Generic,
    Valve,
}

// ============================================================================
// Sensor Models
// ============================================================================

#[derive(Debug, Clone)]
enum SensorModel {
    /// Every axis is `level - 2.5 + U{1..5}`.
    Vibration { level: f64 },
    /// `temp - 2 + U{1..20} * 0.1`, `humid - 10 + U{1..20}`.
    TempHumid { temperature: f64, humidity: f64 },
    /// `mean + U(-7, 7)` rounded to two decimals.
    Generic { mean: f64 },
    /// Cycles through every [`TimeType`], normal around the mean.
    Valve {
        stroke: Normal<f64>,
        slow_rate: f64,
        slow_factor: f64,
        phase: usize,
    },
}

/// One simulated device publishing on its own topic.
#[derive(Debug, Clone)]
struct SimulatedSensor {
    line: String,
    machine: String,
    name: String,
    interval: Duration,
    model: SensorModel,
}

impl SimulatedSensor {
    fn topic(&self) -> String {
        format!("{}/{}/{}", self.line, self.machine, self.name)
    }

    /// Produce the next JSON payload.
    fn next_payload<R: Rng>(&mut self, rng: &mut R, timestamp: i64) -> Result<String> {
        let payload = match &mut self.model {
            SensorModel::Vibration { level } => {
                let mut axis = || *level - 2.5 + f64::from(rng.gen_range(1..=5u8));
                serde_json::to_string(&VibrationReading {
                    line_name: self.line.clone(),
                    machine_name: self.machine.clone(),
                    sensor_name: self.name.clone(),
                    rms_x: axis(),
                    rms_y: axis(),
                    rms_z: axis(),
                    timestamp,
                })?
            }
            SensorModel::TempHumid {
                temperature,
                humidity,
            } => serde_json::to_string(&TempHumidReading {
                line_name: self.line.clone(),
                machine_name: self.machine.clone(),
                sensor_name: self.name.clone(),
                temperature: *temperature - 2.0 + f64::from(rng.gen_range(1..=20u8)) * 0.1,
                humidity: *humidity - 10.0 + f64::from(rng.gen_range(1..=20u8)),
                timestamp,
            })?,
            SensorModel::Generic { mean } => {
                let value = *mean + rng.gen_range(-7.0..7.0_f64);
                serde_json::json!({
                    "LineName": self.line,
                    "MachineName": self.machine,
                    "SensorName": self.name,
                    "SensorValue": (value * 100.0).round() / 100.0,
                    "TimeStamp": timestamp,
                })
                .to_string()
            }
            SensorModel::Valve {
                stroke,
                slow_rate,
                slow_factor,
                phase,
            } => {
                let time_type = TimeType::ALL[*phase % TimeType::ALL.len()];
                *phase += 1;
                let mut value = stroke.sample(rng).max(1.0);
                if *slow_rate > 0.0 && rng.gen_bool(slow_rate.min(1.0)) {
                    value *= *slow_factor;
                }
                serde_json::to_string(&ValveTimingReading {
                    line_name: self.line.clone(),
                    machine_name: self.machine.clone(),
                    valve_name: self.name.clone(),
                    time_type: time_type.as_str().to_string(),
                    time_value: value.round() as i64,
                    timestamp,
                })?
            }
        };
        Ok(payload)
    }
}

/// The default plant layout, filtered by the selected kinds.
fn build_sensors(args: &Args) -> Result<Vec<SimulatedSensor>> {
    let stroke = Normal::new(args.valve_mean_ms, args.valve_std_ms)
        .context("Invalid valve stroke distribution")?;
    let speed = f64::from(args.speed);
    let sensor = |name: &str, interval_secs: f64, model| SimulatedSensor {
        line: args.line.clone(),
        machine: args.machine.clone(),
        name: name.to_string(),
        interval: Duration::from_secs_f64(interval_secs / speed),
        model,
    };

    let all = vec![
        (SensorKind::Vibration, sensor("Vib1", 1.0, SensorModel::Vibration { level: 25.0 })),
        (SensorKind::Vibration, sensor("Vib2", 0.2, SensorModel::Vibration { level: 30.0 })),
        (SensorKind::Vibration, sensor("Vib3", 2.0, SensorModel::Vibration { level: 30.0 })),
        (SensorKind::Vibration, sensor("Vib4", 1.0, SensorModel::Vibration { level: 40.0 })),
        (SensorKind::Vibration, sensor("Vib5", 1.5, SensorModel::Vibration { level: 55.0 })),
        (
            SensorKind::TempHumid,
            sensor(
                "TempHumid1",
                1.0,
                SensorModel::TempHumid {
                    temperature: 24.0,
                    humidity: 50.0,
                },
            ),
        ),
        (SensorKind::Generic, sensor("Sensor1", 2.0, SensorModel::Generic { mean: 15.0 })),
        (SensorKind::Generic, sensor("Sensor2", 2.0, SensorModel::Generic { mean: 5.0 })),
        (SensorKind::Generic, sensor("Sensor3", 2.0, SensorModel::Generic { mean: 20.0 })),
        (
            SensorKind::Valve,
            sensor(
                "Valve1",
                1.0,
                SensorModel::Valve {
                    stroke,
                    slow_rate: args.slow_stroke_rate,
                    slow_factor: args.slow_stroke_factor,
                    phase: 0,
                },
            ),
        ),
    ];

    Ok(all
        .into_iter()
        .filter(|(kind, _)| args.sensor.is_empty() || args.sensor.contains(kind))
        .map(|(_, s)| s)
        .collect())
}

// ============================================================================
// Publishing
// ============================================================================

async fn run_sensor(
    mut sensor: SimulatedSensor,
    mut rng: StdRng,
    count: Option<u64>,
    tx: mpsc::Sender<(String, String)>,
) -> Result<()> {
    let topic = sensor.topic();
    let mut ticker = tokio::time::interval(sensor.interval);
    let mut sent = 0u64;

    while count.map_or(true, |limit| sent < limit) {
        ticker.tick().await;
        let timestamp = chrono::Utc::now().timestamp_millis();
        let payload = sensor.next_payload(&mut rng, timestamp)?;
        if tx.send((topic.clone(), payload)).await.is_err() {
            break;
        }
        sent += 1;
    }
    info!(topic = %topic, sent, "Sensor finished");
    Ok(())
}

async fn publish_stdout(mut rx: mpsc::Receiver<(String, String)>) -> Result<()> {
    while let Some((_topic, payload)) = rx.recv().await {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{payload}").context("Failed to write to stdout")?;
    }
    Ok(())
}

async fn publish_mqtt(args: &Args, mut rx: mpsc::Receiver<(String, String)>) -> Result<()> {
    let qos = qos_from_level(args.qos)?;
    let client_id = format!("plant-simulation-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, args.host.clone(), args.port);
    options.set_keep_alive(Duration::from_secs(defaults::DEFAULT_MQTT_KEEP_ALIVE_SECS));
    if let (Some(user), Some(pass)) = (&args.username, &args.password) {
        options.set_credentials(user.clone(), pass.clone());
    }

    let (client, mut eventloop) = AsyncClient::new(options, PUBLISH_QUEUE);
    let event_task = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("Connected to MQTT broker"),
                Ok(Event::Incoming(Packet::Disconnect)) => break,
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection error, retrying");
                    tokio::time::sleep(Duration::from_secs(defaults::MQTT_RECONNECT_INITIAL_SECS))
                        .await;
                }
            }
        }
    });

    let mut published = 0u64;
    while let Some((topic, payload)) = rx.recv().await {
        client
            .publish(topic, qos, false, payload)
            .await
            .context("Failed to queue MQTT publish")?;
        published += 1;
    }

    info!(published, "All sensors finished, disconnecting");
    client.disconnect().await.context("Failed to disconnect")?;
    if tokio::time::timeout(Duration::from_secs(DISCONNECT_TIMEOUT_SECS), event_task)
        .await
        .is_err()
    {
        warn!("Broker did not acknowledge disconnect, exiting anyway");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only payloads
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let sensors = build_sensors(&args)?;
    anyhow::ensure!(!sensors.is_empty(), "No sensors selected");

    let base_seed = args.seed.unwrap_or_else(|| StdRng::from_entropy().gen());
    let (tx, rx) = mpsc::channel(PUBLISH_QUEUE);
    let mut generators = JoinSet::new();
    for (i, sensor) in sensors.into_iter().enumerate() {
        info!(topic = %sensor.topic(), interval_ms = sensor.interval.as_millis() as u64, "Simulating");
        let rng = StdRng::seed_from_u64(base_seed.wrapping_add(i as u64));
        generators.spawn(run_sensor(sensor, rng, args.count, tx.clone()));
    }
    drop(tx);

    tokio::select! {
        result = async {
            if args.stdout {
                publish_stdout(rx).await
            } else {
                publish_mqtt(&args, rx).await
            }
        } => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping simulation");
            generators.abort_all();
        }
    }

    while let Some(result) = generators.join_next().await {
        match result {
            Ok(Err(e)) => warn!(error = %e, "Sensor task failed"),
            Err(e) if !e.is_cancelled() => warn!(error = %e, "Sensor task panicked"),
            _ => {}
        }
    }
    Ok(())
}
