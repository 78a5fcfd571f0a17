use crate::output::UserOutput;
use cloudport::container::{Caller, ContainerSpec, ManagedContainer, PortMapping, ServiceType};
use cloudport::{Orchestrator, Status};

/// Everything `cloudport create` takes on the command line.
pub struct CreateArgs {
    pub name: String,
    pub image: String,
    pub service_type: ServiceType,
    pub ports: Vec<PortMapping>,
    pub env: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    pub command: Vec<String>,
}

impl CreateArgs {
    fn into_spec(self, tenant: String) -> ContainerSpec {
        let mut spec = ContainerSpec::new(self.name, self.image, tenant, self.service_type);
        spec.ports = self.ports;
        spec.environment = self.env.into_iter().collect();
        spec.labels = self.labels.into_iter().collect();
        if !self.command.is_empty() {
            spec.command = Some(self.command);
        }
        spec
    }
}

pub async fn run_create(
    orchestrator: &Orchestrator,
    caller: &Caller,
    tenant: Option<&str>,
    args: CreateArgs,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let tenant = match (caller.is_admin(), tenant) {
        (_, Some(tenant)) => tenant.to_string(),
        (false, None) => caller.tenant.clone().unwrap_or_default(),
        (true, None) => {
            return Err(cloudport::Error::Validation(
                "admins must pass --tenant to choose the owning tenant".to_string(),
            )
            .into())
        }
    };

    let spec = args.into_spec(tenant);
    out.progress(&format!("Creating {} ({})... ", spec.container_id(), spec.image));
    let row = match orchestrator.create(caller, spec).await {
        Ok(row) => row,
        Err(e) => {
            out.finish_progress("failed");
            return Err(e.into());
        }
    };
    report_created(orchestrator, caller, row, json, out).await
}

pub async fn run_predefined(
    orchestrator: &Orchestrator,
    caller: &Caller,
    service_type: ServiceType,
    tenant: Option<&str>,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    out.progress(&format!("Creating {} container... ", service_type));
    let row = match orchestrator
        .create_predefined(caller, service_type, tenant)
        .await
    {
        Ok(row) => row,
        Err(e) => {
            out.finish_progress("failed");
            return Err(e.into());
        }
    };
    report_created(orchestrator, caller, row, json, out).await
}

async fn report_created(
    orchestrator: &Orchestrator,
    caller: &Caller,
    row: ManagedContainer,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if row.status == Status::Creating {
        out.finish_progress("provisioning");
        out.progress("Waiting for the backend to finish provisioning... ");
        orchestrator.drain().await;
    }
    let view = orchestrator.describe(caller, &row.id).await?;
    out.finish_progress(view.status.as_str());

    if json {
        out.status(&serde_json::to_string_pretty(&view)?);
    } else if view.status == Status::Error {
        out.error(&format!(
            "{} failed to provision; see `cloudport activity` for the cause",
            view.id
        ));
    } else {
        out.success(&format!(
            "Created {} {}",
            view.id,
            view.url.as_deref().unwrap_or("")
        ));
    }
    Ok(())
}
