use super::status_icon;
use crate::output::UserOutput;
use cloudport::backend::metrics::format_bytes;
use cloudport::container::Caller;
use cloudport::{ContainerView, Orchestrator};

pub async fn run_list(
    orchestrator: &Orchestrator,
    caller: &Caller,
    tenant: Option<&str>,
    metrics: bool,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let views = orchestrator.list(caller, tenant, metrics).await?;

    if json {
        out.status(&serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if views.is_empty() {
        out.status("  No containers");
        return Ok(());
    }

    out.status(&format!(
        "  {:<32} {:<12} {:<10} {:<24} {}",
        "ID", "TENANT", "STATUS", "IMAGE", "URL"
    ));
    out.status(&format!("{:-<100}", ""));
    for view in &views {
        out.status(&format!(
            "{} {:<32} {:<12} {:<10} {:<24} {}{}",
            status_icon(view.status),
            view.id,
            view.tenant.as_deref().unwrap_or("-"),
            view.status.as_str(),
            view.image,
            view.url.as_deref().unwrap_or("-"),
            annotations(view),
        ));
        if let Some(stats) = &view.metrics {
            out.status(&format!(
                "    cpu {:.2}%  mem {} / {} ({:.2}%)  net rx {} tx {}",
                stats.cpu_percent,
                format_bytes(stats.memory_usage),
                format_bytes(stats.memory_limit),
                stats.memory_percent,
                format_bytes(stats.network_rx_bytes),
                format_bytes(stats.network_tx_bytes),
            ));
        }
    }

    let unmanaged = views.iter().filter(|v| !v.managed).count();
    if unmanaged > 0 {
        out.blank();
        out.warning(&format!(
            "{} container(s) run on the backend without a stored row",
            unmanaged
        ));
    }

    Ok(())
}

pub async fn run_show(
    orchestrator: &Orchestrator,
    caller: &Caller,
    id: &str,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let view = orchestrator.describe(caller, id).await?;

    if json {
        out.status(&serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    out.status(&format!("{} {}", status_icon(view.status), view.id));
    out.status(&format!("  Name:         {}", view.name));
    out.status(&format!("  Tenant:       {}", view.tenant.as_deref().unwrap_or("-")));
    out.status(&format!("  Image:        {}", view.image));
    if let Some(service_type) = view.service_type {
        out.status(&format!("  Service type: {}", service_type));
    }
    out.status(&format!("  Status:       {}", view.status));
    if let Some(runtime_status) = &view.runtime_status {
        out.status(&format!("  Runtime:      {}", runtime_status));
    }
    out.status(&format!("  Runtime id:   {}", view.runtime_id.as_deref().unwrap_or("-")));
    out.status(&format!("  URL:          {}", view.url.as_deref().unwrap_or("-")));
    if !view.ports.is_empty() {
        let ports: Vec<String> = view
            .ports
            .iter()
            .map(|p| match p.host_port {
                Some(host) => format!("{}->{}", host, p.key()),
                None => p.key(),
            })
            .collect();
        out.status(&format!("  Ports:        {}", ports.join(", ")));
    }
    if let Some(created) = view.created_at {
        out.status(&format!("  Created:      {}", created.to_rfc3339()));
    }
    Ok(())
}

fn annotations(view: &ContainerView) -> &'static str {
    match (view.managed, view.demo) {
        (false, _) => "  (unmanaged)",
        (true, true) => "  (demo)",
        (true, false) => "",
    }
}
