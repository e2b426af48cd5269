//! `agentmesh run` - bounded scheduler over a scenario.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use agentmesh::scheduler::MessageScheduler;

use super::common::{build_runtime, format_outbound, load_config, load_scenario, spawn_event_printer};

pub(crate) async fn cmd_run(
    config_path: &Path,
    scenario_path: &Path,
    max_steps: Option<u64>,
    json: bool,
    events: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let scenario = load_scenario(scenario_path)?;
    let runtime = build_runtime(config, &scenario).await?;
    let printer = events.then(|| spawn_event_printer(&runtime));

    let scheduler = Arc::new(MessageScheduler::new(runtime.clone()));
    let report = scheduler.run(max_steps).await;
    let shutdown = scheduler.shutdown(false).await?;

    while let Some(message) = runtime.bus().try_consume_outbound() {
        println!("{}", format_outbound(&message, json));
    }
    if let Some(handle) = printer {
        handle.abort();
    }

    let llm = runtime.metrics().llm_metrics();
    if json {
        println!(
            "{}",
            serde_json::json!({
                "kind": "report",
                "run": report,
                "shutdown": shutdown,
                "llm_attempts": llm.attempts,
                "llm_failures": llm.failures,
                "tool_calls": runtime.metrics().total_tool_calls(),
            })
        );
    } else {
        println!();
        println!(
            "Run finished: {:?} after {} step(s), {} tick(s)",
            report.end, report.steps, report.ticks
        );
        println!(
            "LLM attempts: {} ({} failed), tool calls: {}",
            llm.attempts,
            llm.failures,
            runtime.metrics().total_tool_calls()
        );
        if shutdown.spooled > 0 {
            println!("Spooled {} unprocessed message(s)", shutdown.spooled);
        }
    }
    Ok(())
}
