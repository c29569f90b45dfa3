use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::time::Instant;

use pairlink::config::{ExchangeKind, LinkConfig, Role, TransportConfig};
use pairlink::link::{LinkManager, LinkStats};
use pairlink::network::{HostAccessPoint, HostStation, NetworkDriver};
use pairlink::platform::{HostPlatform, SensorSource};
use pairlink::radio::{RadioDriver, SimRadioDevice, SimRadioNetwork};
use pairlink::transport::TransportDriver;

#[derive(Parser)]
#[command(name = "pairlink", version, about = "Resilient two-device link manager")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one device over the network transport
    Run {
        /// Path to a JSON configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run an initiator/responder pair in this process
    Simulate {
        #[arg(long, value_enum, default_value_t = TransportArg::Radio)]
        transport: TransportArg,

        #[arg(long, value_enum, default_value_t = ExchangeArg::Greeting)]
        exchange: ExchangeArg,

        /// How long to run
        #[arg(long, default_value_t = 30)]
        seconds: u64,

        /// Exchange period; shorter periods make short runs interesting
        #[arg(long, default_value_t = 1000)]
        period_ms: u64,

        /// Loopback port for the network transport
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Print a default configuration
    Config {
        #[arg(long, value_enum, default_value_t = TransportArg::Radio)]
        transport: TransportArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    Radio,
    Network,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExchangeArg {
    Greeting,
    Sensor,
}

impl From<ExchangeArg> for ExchangeKind {
    fn from(arg: ExchangeArg) -> Self {
        match arg {
            ExchangeArg::Greeting => ExchangeKind::Greeting,
            ExchangeArg::Sensor => ExchangeKind::Sensor,
        }
    }
}

fn transport_config(arg: TransportArg) -> TransportConfig {
    match arg {
        TransportArg::Radio => TransportConfig::radio(),
        TransportArg::Network => TransportConfig::network(),
    }
}

/// A slow triangle sweep over the 12-bit range.
fn sweep_sensor() -> SensorSource {
    SensorSource::generator(|now_ms| {
        let phase = (now_ms / 5) % 8190;
        if phase <= 4095 {
            phase as u16
        } else {
            (8190 - phase) as u16
        }
    })
}

fn network_driver(config: &LinkConfig) -> Result<NetworkDriver> {
    let TransportConfig::Network { gateway, bind, .. } = &config.transport else {
        bail!("`run` drives the network transport; use `simulate` for the radio");
    };
    Ok(match config.role {
        Role::Initiator => {
            NetworkDriver::station(HostStation::new(*gateway), config.timing.join_timeout())
        }
        Role::Responder => NetworkDriver::access_point(HostAccessPoint::new(*bind)),
    })
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = LinkConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let mut boot = 0u32;
    loop {
        boot += 1;
        log::info!("Boot {}", boot);
        // A restart starts over from nothing: new driver, new counters.
        let driver = network_driver(&config)?;
        let mut manager = LinkManager::new(config.clone(), driver, HostPlatform::new(sweep_sensor()))?;
        let interrupted = tokio::select! {
            reason = manager.run() => {
                log::error!("Device restart: {}", reason);
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            log::info!("Interrupted");
            println!("{}", serde_json::to_string_pretty(&manager.stats())?);
            return Ok(());
        }
    }
}

#[derive(Serialize)]
struct SideReport {
    role: Role,
    boots: u32,
    final_state: String,
    stats: Vec<LinkStats>,
}

/// Drive one side until `deadline`, rebuilding it after every restart.
async fn drive<D, F>(role: Role, mut build: F, deadline: Instant) -> Result<SideReport>
where
    D: TransportDriver,
    F: FnMut() -> Result<LinkManager<D, HostPlatform>>,
{
    let mut report = SideReport {
        role,
        boots: 0,
        final_state: String::new(),
        stats: Vec::new(),
    };
    loop {
        report.boots += 1;
        let mut manager = build()?;
        let tick = Duration::from_millis(manager.config().timing.tick_ms);
        manager.start().await;
        loop {
            if Instant::now() >= deadline {
                report.final_state = format!("{:?}", manager.state());
                report.stats.push(manager.stats());
                return Ok(report);
            }
            manager.tick().await;
            if manager.machine().is_restarting() {
                report.stats.push(manager.stats());
                break;
            }
            tokio::time::sleep(tick).await;
        }
    }
}

async fn simulate(
    transport: TransportArg,
    exchange: ExchangeArg,
    seconds: u64,
    period_ms: u64,
    port: u16,
) -> Result<()> {
    let mut base = LinkConfig {
        transport: transport_config(transport),
        ..LinkConfig::default()
    };
    base.exchange.kind = exchange.into();
    base.timing.exchange_period_ms = period_ms;
    base.retry.min_interval_ms = base.retry.min_interval_ms.min(period_ms);
    if let TransportConfig::Network { gateway, bind, port: p, .. } = &mut base.transport {
        *gateway = IpAddr::V4(Ipv4Addr::LOCALHOST);
        *bind = IpAddr::V4(Ipv4Addr::LOCALHOST);
        *p = port;
    }
    base.validate()?;

    let initiator = base.for_role(Role::Initiator);
    let responder = base.for_role(Role::Responder);
    let deadline = Instant::now() + Duration::from_secs(seconds);

    let (a, b) = match transport {
        TransportArg::Radio => {
            let air = SimRadioNetwork::new();
            let TransportConfig::Radio { peer_address, .. } = &base.transport else {
                bail!("radio simulation needs a radio transport");
            };
            let central: Arc<SimRadioDevice> = Arc::new(air.create_device());
            let peripheral: Arc<SimRadioDevice> = Arc::new(air.create_device_with_address(*peer_address));
            let service = base.transport.link_service().unwrap_or_default();

            let central_side = drive(
                Role::Initiator,
                || {
                    let driver = RadioDriver::central(central.clone(), service.clone());
                    Ok(LinkManager::new(initiator.clone(), driver, HostPlatform::new(sweep_sensor()))?)
                },
                deadline,
            );
            let peripheral_side = drive(
                Role::Responder,
                || {
                    let driver = RadioDriver::peripheral(peripheral.clone(), service.clone());
                    Ok(LinkManager::new(responder.clone(), driver, HostPlatform::new(sweep_sensor()))?)
                },
                deadline,
            );
            tokio::try_join!(central_side, peripheral_side)?
        }
        TransportArg::Network => {
            let station_side = drive(
                Role::Initiator,
                || {
                    let driver = network_driver(&initiator)?;
                    Ok(LinkManager::new(initiator.clone(), driver, HostPlatform::new(sweep_sensor()))?)
                },
                deadline,
            );
            let ap_side = drive(
                Role::Responder,
                || {
                    let driver = network_driver(&responder)?;
                    Ok(LinkManager::new(responder.clone(), driver, HostPlatform::new(sweep_sensor()))?)
                },
                deadline,
            );
            tokio::try_join!(station_side, ap_side)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&[a, b])?);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Simulate {
            transport,
            exchange,
            seconds,
            period_ms,
            port,
        } => simulate(transport, exchange, seconds, period_ms, port).await,
        Command::Config { transport } => {
            let config = LinkConfig {
                transport: transport_config(transport),
                ..LinkConfig::default()
            };
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}
