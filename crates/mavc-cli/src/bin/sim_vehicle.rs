//! Run a simulated vehicle as a fleet agent.
//!
//! Connects to the monitor, then flies whatever it is sent until the monitor
//! ends the session or Ctrl-C is pressed.

use anyhow::{Context, Result};
use clap::Parser;
use mavc_agent::{AgentConfig, Vehicle, VehicleSession};
use mavc_cli::{SimConfig, SimVehicle};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Simulated MAVC vehicle
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Monitor host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Monitor rendezvous port
    #[arg(long, default_value_t = mavc_core::protocol::DEFAULT_BASE_PORT)]
    port: u16,

    /// Home latitude
    #[arg(long, default_value_t = 38.0, allow_negative_numbers = true)]
    lat: f64,

    /// Home longitude
    #[arg(long, default_value_t = -114.0, allow_negative_numbers = true)]
    lon: f64,

    /// Cruise speed in m/s
    #[arg(long, default_value_t = 5.0)]
    speed: f64,

    /// State report interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    report_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("mavc_agent=info".parse()?)
            .add_directive("sim_vehicle=info".parse()?))
        .init();

    let args = Args::parse();

    let sim = Arc::new(SimVehicle::new(
        args.lat,
        args.lon,
        SimConfig {
            cruise_speed_mps: args.speed,
            ..SimConfig::default()
        },
    ));
    let config = AgentConfig::new(&args.host, args.port)
        .with_report_interval(Duration::from_millis(args.report_ms));

    println!("Connecting to monitor at {}:{}...", args.host, args.port);
    let session = VehicleSession::connect(config, Vehicle::new(sim))
        .await
        .context("Handshake with monitor failed")?;
    println!("Assigned CID {} by {}", session.cid(), session.monitor());

    tokio::select! {
        _ = session.closed() => {
            println!("Monitor ended the session");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            println!("Closing session...");
            session.close().await;
        }
    }

    Ok(())
}
