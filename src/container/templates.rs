//! Predefined service templates.
//!
//! Each non-custom [`ServiceType`] has a ready-made container definition so
//! that a tenant can get a working service without choosing an image.
//! Apart from the web server, the templates serve a static landing page
//! from `nginx:alpine` that identifies the tenant and service.

use super::{ContainerSpec, PortMapping, ServiceType};
use crate::error::{Error, Result};
use chrono::Utc;

const TEMPLATE_IMAGE: &str = "nginx:alpine";
const HTML_ROOT: &str = "/usr/share/nginx/html/index.html";

/// Build the spec for a predefined service owned by `tenant`.
///
/// The name is `{service}-{timestamp_millis}` so repeated requests for the
/// same service type do not collide. The tenant is not repeated in the name;
/// the platform id already carries it, and any valid tenant must fit.
pub fn predefined_spec(service_type: ServiceType, tenant: &str) -> Result<ContainerSpec> {
    let stamp = Utc::now().timestamp_millis();
    let short = service_type.short_name();
    let name = format!("{}-{}", short, stamp);

    let command = match service_type {
        ServiceType::WebServer => vec![
            "nginx".to_string(),
            "-g".to_string(),
            "daemon off;".to_string(),
        ],
        ServiceType::AppRuntime => landing_page(short, "Node.js Service", None),
        ServiceType::InterpreterRuntime => landing_page(short, "Python Service", None),
        ServiceType::DataStore => {
            landing_page(short, "Database Service", Some("Type: PostgreSQL Compatible"))
        }
        ServiceType::Custom => {
            return Err(Error::Validation(
                "custom services need an explicit image; use `create` instead".to_string(),
            ))
        }
    };

    Ok(
        ContainerSpec::new(name, TEMPLATE_IMAGE, tenant, service_type)
            .with_command(command)
            .with_port(PortMapping::tcp(80))
            .with_env("CLIENT_ID", tenant)
            .with_env("SERVICE_TYPE", short)
            .with_env("NGINX_HOST", format!("{}-{}.localhost", tenant, short))
            .with_label("serviceType", service_type.as_str())
            .with_label("cloudport.managed", "true"),
    )
}

fn landing_page(short: &str, title: &str, extra: Option<&str>) -> Vec<String> {
    let extra = extra.map(|e| format!("<p>{}</p>", e)).unwrap_or_default();
    let script = format!(
        "echo \"<h1>{} for client ${{CLIENT_ID}}</h1><p>Service: {}</p><p>Status: Running</p>{}\" > {} && nginx -g \"daemon off;\"",
        title, short, extra, HTML_ROOT
    );
    vec!["sh".to_string(), "-c".to_string(), script]
}
