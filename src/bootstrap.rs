//! Bootstrap-mode decision.
//!
//! A node about to run as a server must know whether it may originate a
//! brand-new cluster or has to join one that already exists — and there
//! is no cluster to ask yet. [`BootstrapChecker`] answers by starting a
//! disposable client-mode agent under a throwaway name in an isolated
//! temporary directory, querying cluster state through it, and throwing
//! it away. The real agent binary is its own cluster-state oracle; no
//! gossip or consensus client logic is re-implemented here.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::http::HttpAgent;
use crate::agent::rpc::RpcAgent;
use crate::agent::{AgentClient, ClusterProbe, JoinOutcome};
use crate::config::NodeConfig;
use crate::errors::CoordError;
use crate::ops::SysOps;
use crate::provision::{ConfigWriter, JsonConfigWriter};
use crate::retry::{try_until, Timeout, RETRY_DELAY};
use crate::runner::{AgentRunner, ProcessRunner};

/// Contract the controller consumes: decide, once, whether this node
/// starts in bootstrap mode.
pub trait BootstrapCheck: Send + Sync {
    fn starts_in_bootstrap(&self)
        -> Pin<Box<dyn Future<Output = Result<bool, CoordError>> + Send + '_>>;
}

/// Probe-agent implementation of [`BootstrapCheck`].
pub struct BootstrapChecker {
    config: NodeConfig,
    ops: Arc<dyn SysOps>,
}

impl BootstrapChecker {
    pub fn new(config: NodeConfig, ops: Arc<dyn SysOps>) -> Self {
        Self { config, ops }
    }

    async fn check(&self) -> Result<bool, CoordError> {
        let tmp = self.ops.create_temp_dir("nodeboot-probe-")?;
        let probe_name = format!("probe-{}", Uuid::new_v4().simple());
        let probe_cfg = self.config.probe_profile(&probe_name, &tmp);

        let writer = JsonConfigWriter::new(self.ops.clone());
        let runner = ProcessRunner::for_agent(&probe_cfg);
        let http: Arc<dyn ClusterProbe> = Arc::new(HttpAgent::new(&probe_cfg.agent.http_addr)?);
        let rpc_addr = probe_cfg.agent.rpc_addr.clone();

        self.run_probe(&probe_cfg, &writer, &runner, http, &tmp, || async move {
            let rpc = RpcAgent::connect(&rpc_addr).await?;
            Ok(Arc::new(rpc) as Arc<dyn ClusterProbe>)
        })
        .await
    }

    /// Drive the probe agent through its whole life: provision, start,
    /// wait for liveness, open the query channel, decide, tear down.
    ///
    /// Teardown always runs and its failures are logged, never allowed
    /// to override an already-computed decision.
    async fn run_probe<F, Fut>(
        &self,
        probe_cfg: &NodeConfig,
        writer: &dyn ConfigWriter,
        runner: &dyn AgentRunner,
        http: Arc<dyn ClusterProbe>,
        tmp_dir: &Path,
        open_channel: F,
    ) -> Result<bool, CoordError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn ClusterProbe>, CoordError>>,
    {
        info!(
            "starting probe agent {} in {}",
            probe_cfg.node_name,
            tmp_dir.display()
        );

        let decision = async {
            writer.write(probe_cfg)?;
            runner.run().await?;

            let timeout = Timeout::new(probe_cfg.timeout());
            try_until(&timeout, RETRY_DELAY, || http.self_check()).await?;

            let channel = open_channel().await?;
            let client = AgentClient::new(channel, probe_cfg.clone());
            let decision = Self::decide(&client).await;

            if let Err(err) = client.leave().await {
                warn!("probe agent leave failed: {err}");
            }
            decision
        }
        .await;

        if let Err(err) = runner.stop().await {
            warn!("probe agent stop failed: {err}");
        }
        if let Err(err) = runner.wait().await {
            warn!("probe agent wait failed: {err}");
        }
        if let Err(err) = self.ops.remove_path(tmp_dir) {
            warn!("probe directory cleanup failed: {err}");
        }

        decision
    }

    /// The heuristic itself, over a live probe client.
    async fn decide(client: &AgentClient) -> Result<bool, CoordError> {
        // A node with nothing to join is provably the first node anyone
        // has ever started with this peer list.
        match client.join_members().await? {
            JoinOutcome::NoPeersConfigured => {
                info!("no members to join; this node originates the cluster");
                return Ok(true);
            }
            JoinOutcome::Joined(n) => info!("probe agent reached {n} peers"),
        }

        let members = client.members(false).await?;
        if let Some(claimant) = members.iter().find(|m| m.claims_bootstrap()) {
            info!("{} has already claimed bootstrap; joining instead", claimant.name);
            return Ok(false);
        }

        match client.leader().await {
            Ok(Some(leader)) => {
                info!("cluster already has a leader at {leader}; joining");
                Ok(false)
            }
            Ok(None) => {
                // An election may be in progress but no one has
                // bootstrapped.
                info!("members but no leader; this node originates the cluster");
                Ok(true)
            }
            Err(err) if err.is_no_known_servers() => {
                info!("no known servers; this node originates the cluster");
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }
}

impl BootstrapCheck for BootstrapChecker {
    fn starts_in_bootstrap(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CoordError>> + Send + '_>> {
        Box::pin(self.check())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
