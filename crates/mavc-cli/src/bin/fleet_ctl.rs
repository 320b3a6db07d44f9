//! Fleet control through the monitor's HTTP API.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use mavc_cli::FleetClient;
use mavc_core::{Action, ActionKind, ActionRecord, Cid, Geofence};

/// Inspect and command MAVC vehicles
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Monitor API URL
    #[arg(long, default_value = "http://localhost:3000")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

/// Addressing shared by every action command.
#[derive(Args, Debug)]
struct Target {
    /// Vehicle CID; repeat to send the same action to several vehicles
    #[arg(long = "cid", required = true)]
    cids: Vec<Cid>,

    /// Step number echoed back in the acknowledgement
    #[arg(long, default_value_t = 0)]
    step: i64,

    /// Ask for an acknowledgement once the action completes
    #[arg(long)]
    sync: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show one vehicle, or the whole fleet
    Status {
        #[arg(long)]
        cid: Option<Cid>,
    },
    /// Arm and climb to an altitude
    Takeoff {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        alt: f64,
    },
    /// Fly to an absolute position
    Goto {
        #[command(flatten)]
        target: Target,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long)]
        alt: f64,
        /// Time budget in seconds (0 keeps the current airspeed)
        #[arg(long, default_value_t = 0.0)]
        time: f64,
    },
    /// Fly a relative offset in meters
    Goby {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        north: f64,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        east: f64,
        #[arg(long)]
        alt: f64,
        #[arg(long, default_value_t = 0.0)]
        time: f64,
    },
    /// Land, in place unless a position is given
    Land {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        lon: f64,
    },
    /// Hold for a number of seconds
    Wait {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        time: f64,
    },
    /// Replace a vehicle's geofence
    Geofence {
        #[arg(long)]
        cid: Cid,
        #[arg(long)]
        radius: f64,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
    /// End a vehicle's session
    Close {
        #[arg(long)]
        cid: Cid,
    },
}

fn records(target: &Target, kind: ActionKind) -> Vec<ActionRecord> {
    target
        .cids
        .iter()
        .map(|&cid| {
            let action = Action::new(kind.clone(), target.step);
            ActionRecord::new(cid, if target.sync { action.synced() } else { action })
        })
        .collect()
}

fn dispatch(client: &FleetClient, target: &Target, kind: ActionKind) -> Result<()> {
    let name = kind.name();
    let recipients = client.dispatch(&records(target, kind))?;
    println!("{name} sent to {recipients:?}");
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let client = FleetClient::new(&args.url);

    match args.command {
        Command::Status { cid } => {
            let vehicles = match cid {
                Some(cid) => vec![client.vehicle(cid)?],
                None => client.vehicles()?,
            };
            if vehicles.is_empty() {
                println!("No vehicles registered");
            }
            for v in vehicles {
                println!(
                    "CID {:>3}  {:<16} armed={:<5} mode={:<10} lat={:.6} lon={:.6} alt={:.1}{}",
                    v.cid,
                    v.link,
                    v.armed,
                    v.mode,
                    v.lat,
                    v.lon,
                    v.alt,
                    if v.stale { "  (stale)" } else { "" }
                );
            }
        }
        Command::Takeoff { target, alt } => {
            dispatch(&client, &target, ActionKind::ArmAndTakeoff { alt })?;
        }
        Command::Goto {
            target,
            lat,
            lon,
            alt,
            time,
        } => {
            dispatch(&client, &target, ActionKind::GoTo { lat, lon, alt, time_s: time })?;
        }
        Command::Goby {
            target,
            north,
            east,
            alt,
            time,
        } => {
            let kind = ActionKind::GoBy {
                north_m: north,
                east_m: east,
                alt,
                time_s: time,
            };
            dispatch(&client, &target, kind)?;
        }
        Command::Land { target, lat, lon } => {
            dispatch(&client, &target, ActionKind::Land { lat, lon })?;
        }
        Command::Wait { target, time } => {
            dispatch(&client, &target, ActionKind::Wait { time_s: time })?;
        }
        Command::Geofence {
            cid,
            radius,
            lat,
            lon,
        } => {
            client.set_geofence(cid, &Geofence::new(radius, lat, lon))?;
            println!("Geofence set for CID {cid}: {radius} m around ({lat}, {lon})");
        }
        Command::Close { cid } => {
            client.close(cid)?;
            println!("Closed CID {cid}");
        }
    }

    Ok(())
}
