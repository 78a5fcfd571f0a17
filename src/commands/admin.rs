use crate::output::UserOutput;
use cloudport::container::Caller;
use cloudport::Orchestrator;

pub async fn run_cleanup(
    orchestrator: &Orchestrator,
    caller: &Caller,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let report = orchestrator.cleanup_test_containers(caller).await?;

    if json {
        out.status(&serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.removed.is_empty() {
        out.status("Nothing to clean up");
    } else {
        for id in &report.removed {
            out.status(&format!("  - {}", id));
        }
        out.success(&format!("Removed {} leftover container row(s)", report.removed.len()));
    }
    if !report.kept.is_empty() {
        out.warning(&format!(
            "Kept {} matching container(s) that are still live or busy: {}",
            report.kept.len(),
            report.kept.join(", ")
        ));
    }
    Ok(())
}

pub async fn run_activity(
    orchestrator: &Orchestrator,
    caller: &Caller,
    limit: usize,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let entries = orchestrator.recent_activity(caller, limit).await?;

    if json {
        out.status(&serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        out.status("  No activity recorded");
        return Ok(());
    }

    for entry in entries {
        out.status(&format!(
            "{}  {:<12} {:<16} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.actor,
            entry.action,
            entry.target.as_deref().unwrap_or("-"),
        ));
    }
    Ok(())
}
