mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use cloudport::container::{Caller, Role};
use cloudport::orchestrator::Action;
use cloudport::{Error as CloudportError, Orchestrator, Parser as ConfigParser};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(err) = e.downcast_ref::<CloudportError>() {
            eprintln!("Error: {}", err);
            if let Some(suggestion) = err.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
            std::process::exit(err.exit_code());
        }
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let mut config = ConfigParser::new().resolve(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
        config.validate()?;
    }

    let caller = caller_from(&cli)?;

    let mut builder = Orchestrator::builder().config(config);
    if let Some(path) = cli.database.clone() {
        builder = builder.database_path(path);
    }
    let orchestrator = builder.build().await?;

    let out = &output::CliOutput;
    let json = cli.json;
    let result = match cli.command {
        Commands::List {
            all_tenants,
            filter_tenant,
            metrics,
        } => {
            let tenant = if all_tenants {
                None
            } else {
                filter_tenant.or_else(|| cli.tenant.clone())
            };
            commands::run_list(&orchestrator, &caller, tenant.as_deref(), metrics, json, out).await
        }
        Commands::Show { id } => commands::run_show(&orchestrator, &caller, &id, json, out).await,
        Commands::Create {
            name,
            image,
            service_type,
            ports,
            env,
            labels,
            command,
        } => {
            let args = commands::CreateArgs {
                name,
                image,
                service_type,
                ports,
                env,
                labels,
                command,
            };
            commands::run_create(&orchestrator, &caller, cli.tenant.as_deref(), args, json, out)
                .await
        }
        Commands::Predefined {
            service_type,
            for_tenant,
        } => {
            let tenant = for_tenant.or_else(|| cli.tenant.clone());
            let tenant = tenant.as_deref();
            commands::run_predefined(&orchestrator, &caller, service_type, tenant, json, out).await
        }
        Commands::Start { id } => {
            commands::run_lifecycle(&orchestrator, &caller, &id, Action::Start, json, out).await
        }
        Commands::Stop { id } => {
            commands::run_lifecycle(&orchestrator, &caller, &id, Action::Stop, json, out).await
        }
        Commands::Restart { id } => {
            commands::run_lifecycle(&orchestrator, &caller, &id, Action::Restart, json, out).await
        }
        Commands::Remove { id } => {
            commands::run_lifecycle(&orchestrator, &caller, &id, Action::Remove, json, out).await
        }
        Commands::Logs { id, tail } => {
            commands::run_logs(&orchestrator, &caller, &id, tail, json, out).await
        }
        Commands::Stats { id } => commands::run_stats(&orchestrator, &caller, &id, json, out).await,
        Commands::Cleanup => commands::run_cleanup(&orchestrator, &caller, json, out).await,
        Commands::Activity { limit } => {
            commands::run_activity(&orchestrator, &caller, limit, json, out).await
        }
    };

    // Let background provisioning finish before the process exits
    orchestrator.drain().await;
    result
}

/// Identity for this invocation. Clients must name their tenant.
fn caller_from(cli: &Cli) -> anyhow::Result<Caller> {
    match cli.role {
        Role::Admin => Ok(Caller::admin(cli.user.clone())),
        Role::Client => match &cli.tenant {
            Some(tenant) => Ok(Caller::client(cli.user.clone(), tenant.clone())),
            None => Err(CloudportError::Validation(
                "--role client requires --tenant (or CLOUDPORT_TENANT)".to_string(),
            )
            .into()),
        },
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
