use anyhow::{anyhow, bail, Result};
use pythian_chain::{Pubkey, RpcClient};
use pythian_config::{load_from_env_or_default, OracleConfig};
use pythian_jsonrpc::{Mux, RpcServer};
use pythian_oracle::{env as oracle_env, OracleClient};
use pythian_schedule::{BlockhashMonitor, Buffer, Scheduler, SlotMonitor};
use pythian_signer::Signer;
use pythian_telemetry::PublishMetrics;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod handler;
mod views;

use handler::PublishHandler;

const DEFAULT_CONFIG_PATH: &str = "configs/pythian.toml";

/// Ephemeral publisher key for mock mode; never holds funds.
const MOCK_PUBLISHER_SEED: [u8; 32] = [0x5a; 32];

#[tokio::main]
async fn main() -> Result<()> {
    let cli_config = parse_config_arg();
    let default_path = cli_config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let (config, loaded_config_path) = load_from_env_or_default(&default_path)?;

    init_tracing(&config.system.log_level, config.system.log_json);
    info!(
        config_path = %loaded_config_path.display(),
        network = %config.oracle.network,
        source = %config.oracle.source,
        "starting pythian publisher"
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let metrics = Arc::new(PublishMetrics::new());
    let program = resolve_program(&config.oracle)?;
    let http_url = config.rpc.rpc_http_url()?;
    let ws_url = config.rpc.ws_url()?;
    let rpc = Arc::new(RpcClient::new(reqwest::Client::new(), http_url));

    let mock_mode = config.oracle.source.trim() == "mock";
    let client = Arc::new(match config.oracle.source.trim() {
        "rpc" => OracleClient::rpc(RpcClient::clone(&rpc), ws_url.clone(), program),
        "mock" => OracleClient::mock(program),
        other => bail!("unknown oracle.source: {other}"),
    });

    let key_path = config.publisher.key_path.trim();
    let signer = if key_path.is_empty() {
        if !mock_mode {
            bail!("publisher.key_path is not configured");
        }
        info!("mock oracle source: using an ephemeral publisher key");
        Arc::new(Signer::from_seed(MOCK_PUBLISHER_SEED, program))
    } else {
        Arc::new(Signer::load(key_path, program)?)
    };
    info!(publisher = %signer.pubkey(), oracle_program = %program, "publisher key loaded");

    let buffer = Arc::new(Buffer::new(metrics.clone()));
    let (slot_monitor, ticks) = SlotMonitor::new(
        ws_url,
        Duration::from_secs(config.schedule.slot_read_timeout_secs),
        Duration::from_secs(config.schedule.reconnect_delay_secs),
        metrics.clone(),
    );
    let slots = Arc::new(slot_monitor);

    let handler = PublishHandler::new(
        client,
        buffer.clone(),
        signer.pubkey(),
        program,
        slots.clone(),
        metrics.clone(),
    );
    let mut mux = Mux::new();
    handler.register(&mut mux);
    let server = RpcServer::new(mux, cancel.clone(), metrics.clone());

    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
    if mock_mode {
        // Nothing to publish against; queries and subscriptions still work.
        info!("mock oracle source: publish pipeline disabled");
        drop(ticks);
    } else {
        let blockhash = Arc::new(
            BlockhashMonitor::new(
                rpc.clone(),
                Duration::from_millis(config.schedule.blockhash_interval_ms),
                metrics.clone(),
            )
            .await?,
        );
        let scheduler = Scheduler::new(
            buffer,
            blockhash.clone(),
            signer,
            rpc,
            config.schedule.stale_horizon_slots,
            Duration::from_millis(config.schedule.submit_timeout_ms),
            metrics.clone(),
        );

        let blockhash_cancel = cancel.clone();
        tasks.push((
            "blockhash monitor",
            tokio::spawn(async move { blockhash.run(blockhash_cancel).await }),
        ));
        let slot_cancel = cancel.clone();
        let slot_task = slots.clone();
        tasks.push((
            "slot monitor",
            tokio::spawn(async move { slot_task.run(slot_cancel).await }),
        ));
        tasks.push((
            "scheduler",
            tokio::spawn(async move { scheduler.run(ticks).await }),
        ));
    }

    let listen_address = config.publisher.listen_address.clone();
    let server_result = server.serve(&listen_address).await;

    cancel.cancel();
    for (name, task) in tasks {
        if let Err(join_error) = task.await {
            warn!(task = name, error = %join_error, "task join failed");
        }
    }

    match server_result {
        Ok(()) => info!("exiting now"),
        Err(server_error) => {
            error!(error = %server_error, "rpc server crashed");
            return Err(server_error);
        }
    }
    Ok(())
}

fn parse_config_arg() -> Option<PathBuf> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(inline) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(inline));
        }
    }
    None
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

fn resolve_program(oracle: &OracleConfig) -> Result<Pubkey> {
    let explicit = oracle.program_id.trim();
    if explicit.is_empty() {
        return oracle_env::program_for_network(oracle.network.trim());
    }
    explicit
        .parse()
        .map_err(|parse_error| anyhow!("invalid oracle.program_id: {parse_error}"))
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(signal_error) => {
            warn!(error = %signal_error, "failed to install SIGTERM handler");
            if let Err(ctrl_c_error) = tokio::signal::ctrl_c().await {
                error!(error = %ctrl_c_error, "failed to wait for ctrl-c");
            }
            return;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(ctrl_c_error) = result {
                error!(error = %ctrl_c_error, "failed to wait for ctrl-c");
            }
        }
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(ctrl_c_error) = tokio::signal::ctrl_c().await {
        error!(error = %ctrl_c_error, "failed to wait for ctrl-c");
    }
}
