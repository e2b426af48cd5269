//! Daemon - always-on scheduler with graceful shutdown.
//!
//! The first SIGINT/SIGTERM stops dispatching, drains in-flight messages
//! (bounded by `scheduler.drain_timeout_secs`), persists state and exits 0.
//! A second signal during shutdown exits immediately with code 1.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use agentmesh::scheduler::MessageScheduler;

use super::common::{build_runtime, format_outbound, load_config, load_scenario, spawn_event_printer};

/// Exit code used when a second signal interrupts shutdown.
pub const FORCED_EXIT_CODE: i32 = 1;

/// Resolves on SIGINT, or SIGTERM on unix.
pub(crate) async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// CLI entry point for `agentmesh daemon`.
pub(crate) async fn cmd_daemon(config_path: &Path, scenario_path: &Path, events: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let scenario = load_scenario(scenario_path)?;
    let runtime = build_runtime(config, &scenario).await?;
    let printer = events.then(|| spawn_event_printer(&runtime));

    let outbound = {
        let bus = runtime.bus().clone();
        tokio::spawn(async move {
            while let Some(message) = bus.consume_outbound().await {
                println!("{}", format_outbound(&message, false));
            }
        })
    };

    let scheduler = Arc::new(MessageScheduler::new(runtime.clone()));
    let handle = scheduler.start();
    println!(
        "AgentMesh daemon running with {} agent(s). Press Ctrl+C to stop.",
        runtime.state().agent_count()
    );

    wait_for_signal().await;
    info!("Received shutdown signal");
    println!("Shutting down (press Ctrl+C again to force)...");

    tokio::spawn(async {
        wait_for_signal().await;
        eprintln!("Second signal received, exiting immediately");
        std::process::exit(FORCED_EXIT_CODE);
    });

    let report = scheduler.shutdown(false).await?;
    if let Err(e) = handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }

    // Flush replies produced while draining.
    outbound.abort();
    while let Some(message) = runtime.bus().try_consume_outbound() {
        println!("{}", format_outbound(&message, false));
    }
    if let Some(handle) = printer {
        handle.abort();
    }

    println!(
        "Daemon stopped: drained={}, spooled={}, conversations saved={}",
        report.drained, report.spooled, report.conversations_saved
    );
    Ok(())
}
