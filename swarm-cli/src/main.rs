mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use swarmbots::FleetService;
use swarmbots::actor::FleetEvent;
use swarmbots::config::JsonRosterSource;
use swarmbots::domain::Unit;
use swarmbots::logging::init_logging;
use swarmbots::logsink::{LogSink, MemoryLogSink, TracingLogSink};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::cli::Args;

/// Upper bound for the fleet-wide disconnection on exit.
const DISCONNECT_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.log_filter.as_deref(), args.json_logs)?;

    let config = args.fleet_config()?;
    let memory_sink = args.dump_logs.then(|| Arc::new(MemoryLogSink::new()));
    let sink: Arc<dyn LogSink> = match &memory_sink {
        Some(sink) => sink.clone(),
        None => Arc::new(TracingLogSink),
    };

    let service = FleetService::start(
        config,
        Arc::new(JsonRosterSource::new(&args.roster)),
        sink,
    )
    .context("Failed to start fleet service")?;
    let handle = service.handle();
    let mut events = service.subscribe();

    info!(roster = %args.roster.display(), "Initializing fleet");
    handle.ask_init().await?;
    wait_for(&mut events, &args, |e| *e == FleetEvent::InitReady).await?;
    print_roster(&handle.snapshot(), args.json);

    if args.negotiate && !handle.snapshot().is_empty() {
        handle.begin_mode_negotiation().await?;
        wait_for(&mut events, &args, |e| *e == FleetEvent::ModeReady).await?;
        print_roster(&handle.snapshot(), args.json);
    }

    let mut roster = handle.roster();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, args.json),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed fleet events"),
                Err(RecvError::Closed) => break,
            },
            changed = roster.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = roster.borrow_and_update().clone();
                print_roster(&snapshot, args.json);
            }
        }
    }

    info!("Disconnecting fleet");
    handle.disconnect_all().await?;
    let finished = tokio::time::timeout(
        DISCONNECT_GRACE,
        wait_for(&mut events, &args, |e| *e == FleetEvent::DisconnectionComplete),
    )
    .await;
    if finished.is_err() {
        warn!("Fleet did not finish disconnecting in time");
    }
    service.shutdown().await;

    if let Some(sink) = memory_sink {
        for entry in sink.entries() {
            println!("{}", serde_json::to_string(&entry)?);
        }
    }
    Ok(())
}

/// Print events until one matches.
async fn wait_for(
    events: &mut broadcast::Receiver<FleetEvent>,
    args: &Args,
    matches: impl Fn(&FleetEvent) -> bool,
) -> anyhow::Result<()> {
    loop {
        match events.recv().await {
            Ok(event) => {
                print_event(&event, args.json);
                if matches(&event) {
                    return Ok(());
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed fleet events"),
            Err(RecvError::Closed) => anyhow::bail!("Fleet stopped unexpectedly"),
        }
    }
}

fn print_event(event: &FleetEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{}", line);
        }
    } else {
        println!("event: {:?}", event);
    }
}

fn print_roster(units: &[Unit], json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(units) {
            println!("{}", line);
        }
        return;
    }

    println!("{:<4} {:<22} {:<13} {:<9} {:<8} mode", "id", "address", "state", "selected", "missed");
    for unit in units {
        println!(
            "{:<4} {:<22} {:<13} {:<9} {:<8} {:?}",
            unit.id,
            unit.address.to_string(),
            unit.connection_state.as_str(),
            unit.is_selected(),
            unit.missed_probe_count,
            unit.mode.to_wire(),
        );
    }
}
