use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use drinkon_core::protocol::parse_manufacturer_data;
use drinkon_core::{
    Advertisement, ConnectionOptions, DrinkOnKit, InfoCharacteristic, KitConfig, KitEvent,
    LevelSensorCharacteristic, LogCharacteristic, MockTransport, PeripheralId, QueuedObserver,
    SimulatedDevice, StatusCharacteristic, TransportEvent,
};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "DrinkOn bottle protocol tool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a characteristic or advertisement payload given as hex
    Decode {
        #[arg(value_enum)]
        kind: PayloadKind,
        /// Payload bytes, e.g. 3254000040410436d204
        hex: Vec<String>,
    },
    /// Run a scan, connect and read cycle against a simulated bottle
    Simulate {
        /// Stay connected and stream level sensor notifications
        #[arg(long)]
        notify: bool,

        /// Kit configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Level sensor notifications to stream with --notify
        #[arg(long, default_value_t = 3)]
        samples: u32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PayloadKind {
    Status,
    Info,
    LevelSensor,
    Log,
    Advert,
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let result = match args.command {
        Command::Decode { kind, hex } => decode(kind, &hex.concat()),
        Command::Simulate {
            notify,
            config,
            samples,
        } => simulate(notify, config, samples),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn decode(kind: PayloadKind, text: &str) -> Result<()> {
    let cleaned: String = text
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let data = hex::decode(&cleaned).context("payload is not valid hex")?;

    match kind {
        PayloadKind::Status => print_status(&StatusCharacteristic::from_bytes(&data)?),
        PayloadKind::Info => print_info(&InfoCharacteristic::from_bytes(&data)?),
        PayloadKind::LevelSensor => {
            let value = LevelSensorCharacteristic::from_bytes(&data)?;
            println!("Level sensor: {}", value.raw);
        }
        PayloadKind::Log => print_log(&LogCharacteristic::from_bytes(&data)?),
        PayloadKind::Advert => match parse_manufacturer_data(&data) {
            Some(Advertisement::Level(level)) => {
                println!("Level:        {}", fmt_opt(level.level.map(|l| l * 100.0), "%"));
                println!("Consumed 24h: {}", fmt_opt(level.consumed_24hr, " bottles"));
            }
            None => bail!("not a DrinkOn advertisement"),
        },
    }
    Ok(())
}

fn simulate(notify: bool, config: Option<PathBuf>, samples: u32) -> Result<()> {
    let config = match config {
        Some(path) => KitConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => KitConfig::default(),
    };
    let options = if notify {
        ConnectionOptions::ENABLE_LEVEL_SENSOR_NOTIFICATIONS
    } else {
        config.default_options
    };

    let transport = MockTransport::new();
    let observer = Arc::new(QueuedObserver::new());
    let mut kit = DrinkOnKit::with_observer(transport.clone(), config, observer.clone());
    let mut device = SimulatedDevice::new(PeripheralId::from(Uuid::from_u128(0xD41C_0001)));

    info!("Starting DrinkOn simulation...");
    kit.handle_event(TransportEvent::PowerChanged { powered_on: true });
    kit.scan(true)?;
    kit.handle_event(device.advertisement());
    kit.stop_scan();
    report(&observer);

    kit.connect_strongest(options)?;
    pump(&mut kit, &transport, &mut device);
    report(&observer);

    if notify {
        for i in 0..samples {
            let raw = 10_000 - (i as i32) * 250;
            if let Some(event) = device.notify_level_sensor(raw) {
                kit.handle_event(event);
            }
            kit.tick(Instant::now());
            report(&observer);
        }
        kit.disconnect();
        pump(&mut kit, &transport, &mut device);
        report(&observer);
    }

    println!("Final state: {}", kit.state());
    if let Some(e) = kit.error() {
        println!("Last error:  {}", e);
    }
    Ok(())
}

/// Answer requests with the simulated bottle until the transport is idle.
fn pump(
    kit: &mut DrinkOnKit<MockTransport, QueuedObserver>,
    transport: &MockTransport,
    device: &mut SimulatedDevice,
) {
    loop {
        let requests = transport.take_requests();
        if requests.is_empty() {
            break;
        }
        for request in &requests {
            for event in device.answer(request) {
                kit.handle_event(event);
            }
        }
        kit.tick(Instant::now());
    }
}

fn report(observer: &QueuedObserver) {
    for event in observer.drain_events() {
        match event {
            KitEvent::StateChanged { from, to } => println!("[kit] {} -> {}", from, to),
            KitEvent::ErrorChanged { error } => match error {
                Some(e) => println!("[kit] error: {}", e),
                None => println!("[kit] error cleared"),
            },
            KitEvent::PeripheralDiscovered(p) => println!(
                "[scan] found {} ({}) rssi {}",
                p.display_name(),
                p.id(),
                fmt_opt(p.rssi(), " dBm")
            ),
            KitEvent::PeripheralUpdated(p) => println!(
                "[scan] {} level {} connected {}",
                p.display_name(),
                fmt_opt(p.level().map(|l| l * 100.0), "%"),
                p.is_connected()
            ),
            KitEvent::ConnectionStateChanged { from, to, .. } => {
                println!("[link] {} -> {}", from, to)
            }
            KitEvent::StatusUpdated { value, .. } => print_status(&value),
            KitEvent::InfoUpdated { value, .. } => print_info(&value),
            KitEvent::LevelSensorUpdated { value, .. } => {
                println!("Level sensor: {}", value.raw)
            }
            KitEvent::LogUpdated { value, .. } => print_log(&value),
            KitEvent::Log { .. } => {}
        }
    }
}

fn print_status(status: &StatusCharacteristic) {
    println!("Status:");
    println!("  Goal 24h:     {:.1} bottles", status.goal_24hr);
    println!("  Bottle level: {}%", status.bottle_level);
    println!("  Consumed 24h: {:.3} bottles", status.consumed_24hr);
    println!("  UI state:     {}", status.ui_state_code);
    println!("  Battery:      {}%", status.battery_level);
    println!("  Run time:     {} h", status.run_time_hours);
}

fn print_info(info: &InfoCharacteristic) {
    println!("Info:");
    println!("  Firmware: {}", info.firmware_version);
    println!("  DFU:      {}", info.dfu_code);
    println!("  Model:    {}", info.model_code);
    println!("  Hardware: {}", info.hardware_code);
}

fn print_log(log: &LogCharacteristic) {
    println!(
        "Log: {} hours, {:.1} bottles total",
        log.points.len(),
        log.total_consumed()
    );
    for point in log.points.iter().filter(|p| p.consumed_bottles > 0.0) {
        println!("  -{:>3} h  {:.1}", point.hour_offset, point.consumed_bottles);
    }
}

fn fmt_opt<V: std::fmt::Display>(value: Option<V>, unit: &str) -> String {
    match value {
        Some(v) => format!("{}{}", v, unit),
        None => "n/a".to_string(),
    }
}

