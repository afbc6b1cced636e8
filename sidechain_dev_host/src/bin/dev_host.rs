use anyhow::Context;
use clap::Parser;
use crossbeam_channel::bounded;
use serde_json::Value;
use sidechain_dev_host::{HostLoop, NetworkThread, DEFAULT_ADDR, INBOUND_CAP, OUTBOUND_CAP};
use sidechain_protocol::ParametersConfig;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(16);

/// Loopback stand-in for the native host, for running the UI on its own.
#[derive(Parser, Debug)]
#[command(name = "dev_host")]
struct Args {
    #[arg(long, env = "SIDECHAIN_DEV_HOST_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,

    /// Parameters config (json object of name -> config), in tag order.
    #[arg(long, value_name = "PATH")]
    parameters: Option<PathBuf>,

    /// Initial state served to `getState`.
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,

    /// Initial processor state served to `getInitialProcessorState`.
    #[arg(long, value_name = "PATH")]
    processor_state: Option<PathBuf>,

    #[arg(long)]
    run_for_ms: Option<u64>,
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid json in {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let (in_tx, in_rx) = bounded(INBOUND_CAP);
    let (out_tx, out_rx) = bounded(OUTBOUND_CAP);

    let mut host = HostLoop::new(in_rx, out_tx);
    if let Some(path) = &args.parameters {
        let config = ParametersConfig::from_path(path)
            .with_context(|| format!("failed to load parameters from {}", path.display()))?;
        host = host.with_parameters(&config);
    }
    if let Some(path) = &args.state {
        host = host.with_state(read_json(path)?);
    }
    if let Some(path) = &args.processor_state {
        host = host.with_processor_state(read_json(path)?);
    }

    let net = NetworkThread::spawn_with_addr(&args.addr, in_tx, out_rx)
        .with_context(|| format!("failed to listen on {}", args.addr))?;

    println!("dev_host listening on ws://{}", net.listen_addr());

    let run_for = args.run_for_ms.map(Duration::from_millis);
    let start = Instant::now();
    loop {
        host.tick();
        thread::sleep(TICK);
        if let Some(max) = run_for {
            if start.elapsed() >= max {
                break;
            }
        }
    }

    net.shutdown();
    Ok(())
}
