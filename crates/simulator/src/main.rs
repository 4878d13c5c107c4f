//! ANT callback bridge simulator
//!
//! Runs a single-threaded host domain, opens the configured channels and
//! fires events at it from simulated driver threads through the callback
//! bridge. Prints a delivery summary when every driver is done.

mod config;
mod device;
mod driver;

use anyhow::{Context, Result};
use bridge::{CallbackBridge, HostReport, MetricsSnapshot, local_host, setup_logging};
use clap::Parser;
use config::SimConfig;
use device::DeviceState;
use driver::DriverSummary;
use protocol::ChannelId;
use std::collections::BTreeMap;
use std::rc::Rc;
use tokio::task::LocalSet;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ant-bridge-sim")]
#[command(
    author,
    version,
    about = "ANT callback bridge simulator - drive host-domain handlers from foreign threads"
)]
#[command(long_about = "
Simulates ANT driver threads delivering channel events and command responses
to handlers that live in a single host domain, using the callback bridge.

EXAMPLES:
    # Run with default config
    ant-bridge-sim

    # Eight driver threads, 1000 events each
    ant-bridge-sim --threads 8 --events 1000

    # Make every 50th callback panic
    ant-bridge-sim --fault-every 50

    # Run with debug logging
    ant-bridge-sim --log-level debug

CONFIGURATION:
    The simulator looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/ant-bridge/sim.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Number of driver threads
    #[arg(short, long, value_name = "N")]
    threads: Option<usize>,

    /// Events fired by each driver thread
    #[arg(short, long, value_name = "N")]
    events: Option<u64>,

    /// Submit a panicking callback every N events (0 = never)
    #[arg(long, value_name = "N")]
    fault_every: Option<u64>,
}

/// Everything the run produced
struct Summary {
    drivers: DriverSummary,
    metrics: MetricsSnapshot,
    host: HostReport,
    delivered: BTreeMap<ChannelId, u64>,
    resets: u32,
    hooked_faults: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = SimConfig::default();
        let path = SimConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        SimConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        SimConfig::load_or_default()
    };

    // CLI flags override the file
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(threads) = args.threads {
        config.driver.threads = threads;
    }
    if let Some(events) = args.events {
        config.driver.events_per_thread = events;
    }
    if let Some(fault_every) = args.fault_every {
        config.driver.fault_every = fault_every;
    }
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.logging.level).context("Failed to setup logging")?;

    info!("ant-bridge simulator v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.logging.level);

    // The host domain is this thread; callbacks run on the LocalSet
    let summary = LocalSet::new().run_until(run(config)).await?;
    print_summary(&summary);
    Ok(())
}

async fn run(config: SimConfig) -> Result<Summary> {
    let (host, mut runtime) = local_host();
    let ctx = runtime.context();

    let device = Rc::new(DeviceState::new(config.channels.clone()));
    device::open_channels(&ctx, &device);
    device::install_response_handler(&ctx, &device);
    {
        let device = Rc::clone(&device);
        runtime.on_fault(move |_fault| device.record_fault());
    }

    let host_task = tokio::task::spawn_local(runtime.run());

    let bridge =
        CallbackBridge::start(&config.bridge, host).context("Failed to start callback bridge")?;
    let endpoint = bridge.endpoint();
    let settings = config.driver.clone();
    let open: Vec<u8> = config.channels.iter().map(|c| c.number).collect();

    let drivers =
        tokio::task::spawn_blocking(move || driver::run_drivers(&endpoint, &settings, &open))
            .await
            .context("Driver task failed")??;

    // Joining the dispatcher blocks, keep it off the host thread
    let metrics = tokio::task::spawn_blocking(move || bridge.shutdown())
        .await
        .context("Bridge shutdown failed")?;

    let host = host_task.await.context("Host domain task failed")?;
    if host.faults != device.faults() {
        warn!(
            "Fault hook saw {} faults, host domain counted {}",
            device.faults(),
            host.faults
        );
    }

    Ok(Summary {
        drivers,
        metrics,
        host,
        delivered: device.delivered(),
        resets: device.resets(),
        hooked_faults: device.faults(),
    })
}

fn print_summary(summary: &Summary) {
    let Summary {
        drivers,
        metrics,
        host,
        delivered,
        resets,
        hooked_faults,
    } = summary;

    println!("\nSimulation complete\n");
    println!("  Callbacks submitted:  {}", metrics.submitted);
    println!("  Executed in host:     {}", host.executed);
    println!("  Events handled:       {}", drivers.handled);
    println!("  Events not handled:   {}", drivers.unhandled);
    println!("  Unknown channel:      {}", metrics.routing_errors);
    println!(
        "  Faults:               {} (driver) / {} (host hook)",
        drivers.faults, hooked_faults
    );
    println!("  Rejected:             {}", metrics.rejected);
    println!("  Abandoned:            {}", metrics.abandoned);
    println!("  Timed out:            {}", metrics.timed_out);
    println!("  Device resets:        {}", resets);
    println!(
        "  Latency:              avg {} / p95 {} / max {}",
        metrics.latency.format_avg(),
        metrics.latency.format_p95(),
        metrics.latency.format_max()
    );

    if !delivered.is_empty() {
        println!("\n  Per channel:");
        for (channel, count) in delivered {
            println!("    [{}] {} event(s)", channel, count);
        }
    }
    println!();
}
