//! Runs a service discovery against a live site.
//!
//! ```sh
//! CMK_SERVER=https://monitoring.example.com CMK_SITE=central \
//! CMK_USER=automation CMK_SECRET=secret CMK_HOSTS=web01,web02 \
//! LOG_LEVEL=debug cargo run --example discover
//! ```

use std::env;
use std::process::ExitCode;
use std::time::Duration;

use cmk_client::http::{HttpClientUreq, HttpConfig};
use cmk_client::operation::discovery::{DiscoveryOrchestrator, DiscoveryRequest};
use cmk_client::{CheckmkApi, ClientError};
use tracing::{error, info};

fn run() -> Result<bool, ClientError> {
    let var = |name: &str| env::var(name).unwrap_or_default();

    let config = HttpConfig::new(&var("CMK_SERVER"), &var("CMK_SITE"))?
        .with_automation_user(&var("CMK_USER"), &var("CMK_SECRET"))?
        .with_timeout(Duration::from_secs(10))
        .with_validate_certs(var("CMK_INSECURE").is_empty());
    let api = CheckmkApi::new(HttpClientUreq::new(config));

    let version = api.server_version()?;
    info!(%version, "connected");

    let hosts: Vec<String> = var("CMK_HOSTS")
        .split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(String::from)
        .collect();
    let mode = env::var("CMK_MODE")
        .unwrap_or_else(|_| "new".to_string())
        .parse()?;
    let request = DiscoveryRequest::from_targets(hosts.first().cloned(), Some(hosts), mode)?
        .with_wait_for_previous(true)
        .with_wait_for_completion(true);

    let mut orchestrator = DiscoveryOrchestrator::new(&api, &version, request)?;
    let result = orchestrator.run();
    info!(
        state = ?orchestrator.state(),
        http_code = result.http_code,
        changed = result.changed,
        "{}",
        result.message
    );
    Ok(!result.failed)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::metadata::LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(%err, "discovery could not be started");
            ExitCode::FAILURE
        }
    }
}
