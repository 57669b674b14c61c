//! Subcommand implementations: scaler assembly, `serve`, `evaluate`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(feature = "kafka")]
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use lagscale_api::{ApiState, build_router};
use lagscale_broker::{BrokerClient, SnapshotBroker};
use lagscale_core::{LagscaleConfig, ScaleDecision, ScalerPolicy};
use lagscale_engine::{EvaluationOptions, Scaler};

/// One line of `lagscaled evaluate` output.
#[derive(Debug, Serialize)]
pub struct PassReport {
    pub scaler: String,
    pub pass: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<ScaleDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Hands out broker clients. With a snapshot file each scaler gets its own
/// reader, so one scaler's reload never lands in another's pass; live
/// clusters get one client per distinct bootstrap list.
struct BrokerPool {
    snapshot: Option<PathBuf>,
    live: HashMap<Vec<String>, Arc<dyn BrokerClient>>,
    #[cfg(feature = "kafka")]
    request_timeout: Duration,
}

impl BrokerPool {
    fn broker_for(&mut self, policy: &ScalerPolicy) -> anyhow::Result<Arc<dyn BrokerClient>> {
        if let Some(path) = &self.snapshot {
            let broker = SnapshotBroker::new(path);
            info!(
                group = policy.consumer_group(),
                path = %broker.path().display(),
                "reading broker state from snapshot"
            );
            return Ok(Arc::new(broker));
        }
        let servers = policy.bootstrap_servers().to_vec();
        if let Some(broker) = self.live.get(&servers) {
            return Ok(Arc::clone(broker));
        }
        let broker = self.connect(&servers)?;
        self.live.insert(servers, Arc::clone(&broker));
        Ok(broker)
    }

    #[cfg(feature = "kafka")]
    fn connect(&self, servers: &[String]) -> anyhow::Result<Arc<dyn BrokerClient>> {
        let broker = lagscale_broker::KafkaBroker::new(servers, self.request_timeout)
            .with_context(|| format!("connecting to {}", servers.join(",")))?;
        Ok(Arc::new(broker))
    }

    #[cfg(not(feature = "kafka"))]
    fn connect(&self, servers: &[String]) -> anyhow::Result<Arc<dyn BrokerClient>> {
        bail!(
            "no broker for {}: pass --snapshot or build with the `kafka` feature",
            servers.join(",")
        )
    }
}

/// Build one scaler per configured entry, in declaration order.
pub fn build_scalers(
    config: &LagscaleConfig,
    snapshot: Option<&Path>,
) -> anyhow::Result<Vec<(String, Scaler)>> {
    let options = EvaluationOptions {
        retry: config.retry.clone(),
        request_timeout: config.daemon.request_timeout,
    };
    let mut pool = BrokerPool {
        snapshot: snapshot.map(Path::to_path_buf),
        live: HashMap::new(),
        #[cfg(feature = "kafka")]
        request_timeout: config.daemon.request_timeout,
    };

    let mut scalers = Vec::new();
    for (name, policy) in config.policies()? {
        let broker = pool.broker_for(&policy)?;
        info!(
            scaler = %name,
            group = policy.consumer_group(),
            topics = policy.topics().len(),
            "scaler configured"
        );
        scalers.push((name, Scaler::with_options(policy, broker, options.clone())));
    }
    Ok(scalers)
}

pub async fn serve(
    config_path: &Path,
    snapshot: Option<&Path>,
    listen: Option<String>,
) -> anyhow::Result<()> {
    let config = LagscaleConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let scalers = build_scalers(&config, snapshot)?;
    if scalers.is_empty() {
        warn!("no scalers configured");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = ApiState::new(scalers, config.daemon.evaluation_timeout, shutdown_rx).await;

    // ── Start API server ───────────────────────────────────────
    let addr = listen.unwrap_or_else(|| config.daemon.listen.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "lagscaled listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
            shutdown_tx.send(true).ok();
        })
        .await?;

    Ok(())
}

/// Run `passes` consecutive passes of every selected scaler against a
/// snapshot. Failures are reported per pass rather than aborting the run.
pub async fn evaluate(
    config_path: &Path,
    snapshot: &Path,
    only: Option<&str>,
    passes: u32,
) -> anyhow::Result<Vec<PassReport>> {
    let config = LagscaleConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let mut scalers = build_scalers(&config, Some(snapshot))?;

    if let Some(name) = only {
        scalers.retain(|(n, _)| n == name);
        if scalers.is_empty() {
            bail!("no scaler named {name:?} in {}", config_path.display());
        }
    }

    let (_keep, mut cancel) = watch::channel(false);
    let mut reports = Vec::new();
    for (name, mut scaler) in scalers {
        for pass in 1..=passes {
            let report = match scaler
                .evaluate_within(config.daemon.evaluation_timeout, &mut cancel)
                .await
            {
                Ok(decision) => PassReport {
                    scaler: name.clone(),
                    pass,
                    decision: Some(decision),
                    error: None,
                },
                Err(e) => PassReport {
                    scaler: name.clone(),
                    pass,
                    decision: None,
                    error: Some(e.to_string()),
                },
            };
            reports.push(report);
        }
    }
    Ok(reports)
}
