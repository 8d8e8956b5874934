use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use rssi_sim::{preset_by_name, SimRadio};
use sft_types::NodeMode;
use timer_node::clock::{Clock, MonotonicClock};
use timer_node::config::{ConfigStore, TomlFileStore};
use timer_node::dispatch::{Control, Dispatcher};
use timer_node::engine::{QueueSink, SamplingEngine};
use timer_node::forward::HttpLapForwarder;
use timer_node::outbound::{spawn_log_observer, Publisher};
use timer_node::receiver::SimulatedReceiver;

const EVENT_QUEUE: usize = 64;
const COMMAND_QUEUE: usize = 8;

/// Drone-race gate timer node (simulated receiver)
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Node configuration file
    #[arg(long, default_value = "timer.toml")]
    config: PathBuf,

    /// Simulator scenario: clean, noisy, ripple, dropout, crosstalk
    #[arg(long)]
    scenario: Option<String>,

    /// Simulator seed
    #[arg(long)]
    seed: Option<u64>,

    /// Start a capture-the-flag match of this many seconds on boot
    #[arg(long)]
    ctf_duration_s: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timer_node=info,rssi_sim=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("⏱️ gate timer node starting...");

    // Configuration
    let store = Arc::new(TomlFileStore::new(&args.config));
    let cfg = store.load();

    let scenario_name = args.scenario.clone().unwrap_or_else(|| cfg.sim.scenario.clone());
    let scenario = preset_by_name(&scenario_name).ok_or_else(|| anyhow!("unknown scenario {scenario_name:?}"))?;
    let seed = args.seed.unwrap_or(cfg.sim.seed);

    // Receiver
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let freqs: Vec<u16> = cfg.snapshot().configured().map(|c| c.freq).collect();
    let radio = SimRadio::new(&freqs, &cfg.sim.flight, scenario, seed);
    let receiver = SimulatedReceiver::new(radio, clock.clone());
    info!("📡 simulated receiver: {} drones, scenario {}, seed {}", freqs.len(), scenario_name, seed);

    // Outbound observers
    let publisher = Publisher::new();
    let observer = spawn_log_observer(&publisher);
    let forwarder = match cfg.node_mode {
        NodeMode::Child => {
            let fwd = HttpLapForwarder::new(&cfg.ctrl_addr).context("lap forwarder")?;
            Some(fwd.spawn(&publisher))
        }
        NodeMode::Controller => None,
    };

    // Sampling thread
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
    let shutdown = Arc::new(AtomicBool::new(false));
    let engine = SamplingEngine::new(receiver, QueueSink::new(event_tx), cmd_rx, clock.clone(), cfg.engine.clone());
    let sampling = engine.spawn(shutdown.clone()).context("spawning sampling thread")?;

    // Dispatch
    let (control_tx, control_rx) = mpsc::channel(COMMAND_QUEUE);
    let dispatcher = Dispatcher::new(cfg, store, publisher, clock, cmd_tx);
    let dispatch = tokio::spawn(dispatcher.run(event_rx, control_rx));

    if let Some(secs) = args.ctf_duration_s {
        control_tx
            .send(Control::CtfStart { duration_ms: secs * 1000 })
            .await
            .context("dispatcher gone before ctf start")?;
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("🛑 shutting down");

    shutdown.store(true, Ordering::Relaxed);
    drop(control_tx);
    match tokio::task::spawn_blocking(move || sampling.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => warn!("sampling thread panicked"),
        Err(e) => warn!("joining sampling thread: {e}"),
    }
    if let Err(e) = dispatch.await {
        warn!("dispatcher: {e}");
    }

    observer.abort();
    if let Some(fwd) = forwarder {
        fwd.abort();
    }
    Ok(())
}
