use crate::output::UserOutput;
use cloudport::backend::metrics::format_bytes;
use cloudport::container::Caller;
use cloudport::Orchestrator;

pub async fn run_logs(
    orchestrator: &Orchestrator,
    caller: &Caller,
    id: &str,
    tail: usize,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let lines = orchestrator.logs(caller, id, tail).await?;

    if json {
        out.status(&serde_json::to_string_pretty(&lines)?);
    } else if lines.is_empty() {
        out.status(&format!("No logs for {}", id));
    } else {
        for line in lines {
            out.status(&line);
        }
    }
    Ok(())
}

pub async fn run_stats(
    orchestrator: &Orchestrator,
    caller: &Caller,
    id: &str,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let stats = orchestrator.stats(caller, id).await?;

    if json {
        out.status(&serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    out.status(&format!("Resource usage for {}:", id));
    out.status(&format!("{:-<50}", ""));
    out.status(&format!("  CPU:      {:.2}%", stats.cpu_percent));
    out.status(&format!(
        "  Memory:   {} / {} ({:.2}%)",
        format_bytes(stats.memory_usage),
        format_bytes(stats.memory_limit),
        stats.memory_percent
    ));
    out.status(&format!(
        "  Network:  rx {}  tx {}",
        format_bytes(stats.network_rx_bytes),
        format_bytes(stats.network_tx_bytes)
    ));
    out.status(&format!("  Sampled:  {}", stats.timestamp.to_rfc3339()));
    if stats.is_zero() {
        out.warning("The backend reported no usage; it may not provide metrics.");
    }
    Ok(())
}
