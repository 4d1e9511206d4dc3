mod cli;
mod host;
mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use cadbridge_core::app::BridgeBuilder;
use cadbridge_core::error::BridgeError;
use cadbridge_core::pump::HostLoop;
use cadbridge_core::server::{build_app, register_system_routes, serve};

use crate::cli::Cli;
use crate::host::{CreateTool, DeleteTool, DrawBox, DrawCylinder, SimulatedHost};
use crate::routes::{HostReady, register_cad_routes};

/// Typed host operations, each bound to the simulated host.
pub(crate) fn register_operations(builder: BridgeBuilder, host: &SimulatedHost) -> BridgeBuilder {
    let (h1, h2, h3, h4) = (host.clone(), host.clone(), host.clone(), host.clone());
    builder
        .operation::<DrawBox, _>(move |op: DrawBox| h1.draw_box(op))
        .operation::<DrawCylinder, _>(move |op: DrawCylinder| h2.draw_cylinder(op))
        .operation::<CreateTool, _>(move |op: CreateTool| h3.create_tool(op))
        .operation::<DeleteTool, _>(move |op: DeleteTool| h4.delete_tool(op))
        .expect_tasks(&["draw_box", "draw_cylinder", "create_tool", "delete_tool"])
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_logging(&config.logging.level);

    let host = SimulatedHost::new();
    let bridge = register_operations(BridgeBuilder::new(config), &host).build()?;

    let host_ready = Arc::new(AtomicBool::new(false));
    bridge.router.add_middleware(HostReady::new(Arc::clone(&host_ready)));
    register_system_routes(&bridge)?;
    register_cad_routes(&bridge, host.snapshot())?;

    for problem in bridge.router.validate_routes() {
        warn!(%problem, "route table problem");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("cadbridge-http")
        .build()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let server = {
        let app = build_app(Arc::clone(&bridge.router));
        let server_config = bridge.config.server.clone();
        let rx = shutdown_rx.clone();
        let tx = Arc::clone(&shutdown_tx);
        runtime.spawn(async move {
            let result = serve(&server_config, app, rx).await;
            // Without a server there is nothing left to pump for.
            let _ = tx.send(true);
            result
        })
    };
    let tx = Arc::clone(&shutdown_tx);
    runtime.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received; shutting down"),
            Err(e) => error!("cannot listen for ctrl-c: {e}"),
        }
        let _ = tx.send(true);
    });

    // This thread is the host's main thread from here on.
    let pump = bridge.pump()?;
    host_ready.store(true, Ordering::Release);
    info!(
        addr = %bridge.config.bind_addr(),
        interval_ms = bridge.config.pump.interval_ms,
        "cadbridge ready"
    );

    let executed = runtime.block_on(HostLoop::new(pump, shutdown_rx).run());

    let served = runtime.block_on(server);

    let stats = bridge.queue.get_stats();
    info!(
        executed,
        processed = stats.tasks_processed,
        failed = stats.tasks_failed,
        "cadbridge stopped"
    );

    server_outcome(served)
}

/// Exit status of the process: the server's own result, if it ended badly.
fn server_outcome(served: Result<Result<(), BridgeError>, JoinError>) -> Result<()> {
    served
        .context("http server task panicked")?
        .context("http server failed")
}
