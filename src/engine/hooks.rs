//! Setup and teardown probes run outside the measured load.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::http_client::{RequestSpec, Transport};

const WARMUP_CONNECTIONS: usize = 10;

/// Where to read a stock quantity from, before and after the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryProbe {
    pub path: String,
    pub field: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hooks {
    /// Path that must answer 200 before any load starts.
    pub health_check: Option<String>,
    /// URL to pre-open pooled connections against.
    pub warmup: Option<String>,
    pub inventory: Option<InventoryProbe>,
}

fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Fails unless `GET {base}{path}` answers 200.
pub async fn health_check(
    transport: &dyn Transport,
    base_url: &str,
    path: &str,
    timeout: Duration,
) -> Result<()> {
    let url = join_url(base_url, path);
    let response = transport
        .send(RequestSpec::get(url.as_str()), timeout)
        .await
        .with_context(|| format!("health check {} failed", url))?;
    if response.status != 200 {
        bail!(
            "health check {} returned status {}, aborting before load",
            url,
            response.status
        );
    }
    info!("health check {} ok", url);
    Ok(())
}

/// Opens a handful of pooled connections with concurrent HEAD requests.
/// Failures are logged and otherwise ignored.
pub async fn warmup(transport: Arc<dyn Transport>, url: &str, timeout: Duration) {
    let mut set = JoinSet::new();
    for _ in 0..WARMUP_CONNECTIONS {
        let transport = transport.clone();
        let url = url.to_string();
        set.spawn(async move { transport.send(RequestSpec::head(url), timeout).await });
    }

    let mut ok = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(_)) => ok += 1,
            Ok(Err(e)) => debug!("warmup request failed: {}", e),
            Err(e) => debug!("warmup task failed: {}", e),
        }
    }
    info!("warmed up {}/{} connections to {}", ok, WARMUP_CONNECTIONS, url);
}

/// Reads the integer `probe.field` from the JSON body of `GET {base}{probe.path}`.
pub async fn read_inventory(
    transport: &dyn Transport,
    base_url: &str,
    probe: &InventoryProbe,
    timeout: Duration,
) -> Result<i64> {
    let url = join_url(base_url, &probe.path);
    let response = transport
        .send(RequestSpec::get(url.as_str()), timeout)
        .await
        .with_context(|| format!("inventory probe {} failed", url))?;
    if response.status != 200 {
        bail!("inventory probe {} returned status {}", url, response.status);
    }
    let body: serde_json::Value = serde_json::from_slice(&response.body)
        .with_context(|| format!("inventory probe {} returned invalid JSON", url))?;
    body.get(&probe.field)
        .and_then(|v| v.as_i64())
        .with_context(|| format!("inventory probe {} has no integer `{}`", url, probe.field))
}
