use clap::{Parser, Subcommand};
use cloudport::container::{PortMapping, Role, ServiceType};
use cloudport::BackendKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cloudport")]
#[command(about = "Manage tenant containers on Docker or Azure Container Apps")]
pub struct Cli {
    /// Config file path (defaults to the nearest cloudport.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the backend selected in the config file
    #[arg(short, long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Override `database.path`
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Name recorded as the actor in the activity log
    #[arg(short, long, env = "CLOUDPORT_USER", default_value = "admin")]
    pub user: String,

    /// Role to act with. Clients need --tenant
    #[arg(short, long, value_enum, env = "CLOUDPORT_ROLE", default_value = "admin")]
    pub role: Role,

    /// Tenant to act as (clients) or to create in (admins)
    #[arg(short, long, env = "CLOUDPORT_TENANT")]
    pub tenant: Option<String>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List containers, reconciled with the backend
    List {
        /// Show every tenant (admins only; clients always see their own)
        #[arg(long, conflicts_with = "filter_tenant")]
        all_tenants: bool,

        /// Show only this tenant (admins only)
        #[arg(long, value_name = "ID")]
        filter_tenant: Option<String>,

        /// Include resource metrics for running containers
        #[arg(long)]
        metrics: bool,
    },
    /// Show one container
    Show {
        /// Container id (`{tenant}.{name}`)
        id: String,
    },
    /// Create a container from an image
    Create {
        /// Container name, unique within the tenant
        #[arg(long)]
        name: String,

        /// Image reference, e.g. nginx:alpine
        #[arg(long)]
        image: String,

        /// Service type (web-server, app-runtime, interpreter-runtime, data-store, custom)
        #[arg(long, value_parser = parse_service_type, default_value = "custom")]
        service_type: ServiceType,

        /// Port mapping CONTAINER[:HOST][/PROTO]; HOST 0 picks a free port (repeatable)
        #[arg(short, long = "port", value_parser = parse_port)]
        ports: Vec<PortMapping>,

        /// Environment variable KEY=VALUE (repeatable)
        #[arg(short, long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,

        /// Label KEY=VALUE (repeatable)
        #[arg(short, long = "label", value_parser = parse_key_value)]
        labels: Vec<(String, String)>,

        /// Command override, one argument per flag (repeatable)
        #[arg(long = "cmd", allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Create a container from a built-in service template
    Predefined {
        /// Service type (web-server, app-runtime, interpreter-runtime, data-store)
        #[arg(value_parser = parse_service_type)]
        service_type: ServiceType,

        /// Tenant to create for (admins only; defaults to --tenant)
        #[arg(long, value_name = "ID")]
        for_tenant: Option<String>,
    },
    /// Start a stopped container
    Start { id: String },
    /// Stop a running container
    Stop { id: String },
    /// Restart a container
    Restart { id: String },
    /// Remove a container from the backend and forget it
    Remove { id: String },
    /// Show container logs
    Logs {
        id: String,

        /// Number of lines to show from the end
        #[arg(short = 'n', long, default_value_t = cloudport::orchestrator::DEFAULT_LOG_TAIL)]
        tail: usize,
    },
    /// Show a resource usage snapshot
    Stats { id: String },
    /// Delete leftover test/simulation rows that have no live container (admins only)
    Cleanup,
    /// Show recent activity
    Activity {
        /// Maximum number of entries
        #[arg(short = 'n', long, default_value_t = cloudport::orchestrator::DEFAULT_ACTIVITY_LIMIT)]
        limit: usize,
    },
}

fn parse_service_type(s: &str) -> Result<ServiceType, String> {
    s.parse::<ServiceType>().map_err(|e| e.to_string())
}

fn parse_port(s: &str) -> Result<PortMapping, String> {
    s.parse::<PortMapping>().map_err(|e| e.to_string())
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "cloudport", "--tenant", "acme", "create", "--name", "web", "--image", "nginx:alpine",
            "--service-type", "nginx", "-p", "80:0", "-p", "53/udp", "-e", "A=1", "-e", "B=x=y",
            "--cmd", "nginx", "--cmd", "-g",
        ])
        .unwrap();
        match cli.command {
            Commands::Create {
                service_type,
                ports,
                env,
                command,
                ..
            } => {
                assert_eq!(service_type, ServiceType::WebServer);
                assert_eq!(ports.len(), 2);
                assert_eq!(env[1], ("B".to_string(), "x=y".to_string()));
                assert_eq!(command, vec!["nginx", "-g"]);
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn key_value_requires_a_key() {
        assert!(parse_key_value("=v").is_err());
        assert!(parse_key_value("novalue").is_err());
        assert_eq!(parse_key_value("K=").unwrap(), ("K".to_string(), String::new()));
    }
}
