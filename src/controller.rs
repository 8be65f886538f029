//! Top-level lifecycle sequencing.
//!
//! [`Controller`] composes the writers, the process runner, the bootstrap
//! checker and the agent clients into the three lifecycles: start as
//! server, start as client, stop. The boot paths are fail-fast: the first
//! unretried error or expired deadline aborts the remaining steps, and a
//! partially-started agent is deliberately left running because its
//! PID/ownership state may not be trustworthy yet. The stop path is
//! best-effort: every teardown step runs, failures are logged, and the
//! completion message is unconditional — a node shutting down must not
//! get stuck half-torn-down.

use std::sync::Arc;

use tracing::{error, info};

use crate::agent::http::HttpAgent;
use crate::agent::rpc::RpcChannelOpener;
use crate::agent::{AgentClient, ChannelOpener, ClusterProbe, JoinOutcome};
use crate::bootstrap::{BootstrapCheck, BootstrapChecker};
use crate::config::{AgentMode, NodeConfig};
use crate::errors::CoordError;
use crate::ops::{KeyringRemover, RealSysOps, SysOps};
use crate::provision::{ConfigWriter, JsonConfigWriter, JsonServiceDefiner, ServiceDefiner};
use crate::retry::{try_until, Timeout, RETRY_DELAY};
use crate::runner::{AgentRunner, ProcessRunner};

/// Per-invocation lifecycle sequencer.
pub struct Controller {
    config: NodeConfig,
    writer: Arc<dyn ConfigWriter>,
    definer: Arc<dyn ServiceDefiner>,
    runner: Arc<dyn AgentRunner>,
    checker: Arc<dyn BootstrapCheck>,
    http: Arc<dyn ClusterProbe>,
    rpc: Arc<dyn ChannelOpener>,
    ops: Arc<dyn SysOps>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: NodeConfig,
        writer: Arc<dyn ConfigWriter>,
        definer: Arc<dyn ServiceDefiner>,
        runner: Arc<dyn AgentRunner>,
        checker: Arc<dyn BootstrapCheck>,
        http: Arc<dyn ClusterProbe>,
        rpc: Arc<dyn ChannelOpener>,
        ops: Arc<dyn SysOps>,
    ) -> Self {
        Self {
            config,
            writer,
            definer,
            runner,
            checker,
            http,
            rpc,
            ops,
        }
    }

    /// Controller wired with the real collaborators.
    pub fn with_defaults(config: NodeConfig) -> Result<Self, CoordError> {
        let ops: Arc<dyn SysOps> = Arc::new(RealSysOps);
        let http: Arc<dyn ClusterProbe> = Arc::new(HttpAgent::new(&config.agent.http_addr)?);
        let rpc: Arc<dyn ChannelOpener> =
            Arc::new(RpcChannelOpener::new(config.agent.rpc_addr.clone()));
        let runner: Arc<dyn AgentRunner> = Arc::new(ProcessRunner::for_agent(&config));
        let checker: Arc<dyn BootstrapCheck> =
            Arc::new(BootstrapChecker::new(config.clone(), ops.clone()));
        let writer: Arc<dyn ConfigWriter> = Arc::new(JsonConfigWriter::new(ops.clone()));
        let definer: Arc<dyn ServiceDefiner> = Arc::new(JsonServiceDefiner::new(ops.clone()));
        Ok(Self::new(
            config, writer, definer, runner, checker, http, rpc, ops,
        ))
    }

    /// Start lifecycle, dispatched on the configured agent mode.
    pub async fn start(&self) -> Result<(), CoordError> {
        match self.config.mode {
            AgentMode::Server => self.start_server().await,
            AgentMode::Client => self.start_client().await,
        }
    }

    /// Start-as-server: decide bootstrap, provision, boot, verify quorum
    /// state, rotate keys, persist the PID.
    async fn start_server(&self) -> Result<(), CoordError> {
        info!("starting node {} as server", self.config.node_name);

        let bootstrap = self.checker.starts_in_bootstrap().await?;
        info!("bootstrap decision: {bootstrap}");

        let mut cfg = self.config.clone();
        cfg.bootstrap = bootstrap;

        self.provision(&cfg)?;
        self.boot_agent(&cfg).await?;

        let channel = self.rpc.open().await?;
        let client = AgentClient::new(channel, cfg.clone());
        self.configure_server(&cfg, &client).await?;

        self.runner.write_pid().await?;
        info!("node {} is up as server", cfg.node_name);
        Ok(())
    }

    /// Start-as-client: provision, boot, persist the PID. No sync check
    /// and no key rotation — clients trust whatever the server cluster
    /// has already converged on.
    async fn start_client(&self) -> Result<(), CoordError> {
        info!("starting node {} as client", self.config.node_name);

        let cfg = self.config.clone();
        self.provision(&cfg)?;
        self.boot_agent(&cfg).await?;

        self.runner.write_pid().await?;
        info!("node {} is up as client", cfg.node_name);
        Ok(())
    }

    /// Stop: leave gracefully, fall back to a forced stop, then always
    /// wait and always clean up.
    pub async fn stop(&self) -> Result<(), CoordError> {
        info!("stopping node {}", self.config.node_name);

        let left = match self.rpc.open().await {
            Ok(channel) => {
                let client = AgentClient::new(channel, self.config.clone());
                match client.leave().await {
                    Ok(()) => true,
                    Err(err) => {
                        error!("graceful leave failed: {err}");
                        false
                    }
                }
            }
            Err(err) => {
                error!("could not open rpc channel for leave: {err}");
                false
            }
        };
        if !left {
            if let Err(err) = self.runner.stop().await {
                error!("forced agent stop failed: {err}");
            }
        }

        if let Err(err) = self.runner.wait().await {
            error!("waiting for agent exit failed: {err}");
        }
        if let Err(err) = self.runner.cleanup().await {
            error!("agent cleanup failed: {err}");
        }
        let remover = KeyringRemover::new(
            self.config.paths.keyring_file.clone(),
            self.ops.clone(),
        );
        if let Err(err) = remover.remove() {
            error!("keyring removal failed: {err}");
        }

        info!("node {} stopped successfully", self.config.node_name);
        Ok(())
    }

    /// Materialize the agent config and service definitions on disk.
    fn provision(&self, cfg: &NodeConfig) -> Result<(), CoordError> {
        self.writer.write(cfg)?;
        let defs = self.definer.generate_definitions(cfg);
        self.definer.write_definitions(&cfg.paths.config_dir, &defs)
    }

    /// Run the agent process and drive it to confirmed membership:
    /// wait for the control endpoint, trigger retry-join, verify the
    /// node actually shows up in the member list. Every wait is bounded
    /// by the configured deadline.
    async fn boot_agent(&self, cfg: &NodeConfig) -> Result<(), CoordError> {
        self.runner.run().await?;

        let timeout = Timeout::new(cfg.timeout());
        try_until(&timeout, RETRY_DELAY, || self.http.self_check()).await?;
        info!("agent control endpoint is answering");

        let client = AgentClient::new(self.http.clone(), cfg.clone());
        match client.join_members().await? {
            JoinOutcome::NoPeersConfigured => info!("no peers configured to join"),
            JoinOutcome::Joined(n) => info!("join accepted by {n} peers"),
        }

        let timeout = Timeout::new(cfg.timeout());
        try_until(&timeout, RETRY_DELAY, || client.verify_joined()).await?;
        info!("membership verified");
        Ok(())
    }

    /// Server-only convergence steps: raft sync (gated on being the last
    /// expected server) and gossip key rotation.
    async fn configure_server(
        &self,
        cfg: &NodeConfig,
        client: &AgentClient,
    ) -> Result<(), CoordError> {
        if client.is_last_node().await? {
            info!("last expected server; waiting for raft sync");
            let timeout = Timeout::new(cfg.timeout());
            try_until(&timeout, RETRY_DELAY, || client.verify_synced()).await?;
            info!("raft log is in sync");
        }

        if cfg.encrypt_keys.is_empty() {
            if cfg.require_ssl {
                return Err(CoordError::SslRequiresKeys);
            }
            info!("no encryption keys configured; skipping key rotation");
        } else {
            client.set_keys(&cfg.encrypt_keys).await?;
            info!("gossip keyring rotated");
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentMember, KeyringState, ProbeFut, RaftStats, SERVER_ROLE};
    use crate::provision::ServiceDefinition;
    use crate::runner::RunnerFut;
    use std::collections::HashMap;
    use std::path::Path;
    use std::pin::Pin;
    use std::sync::Mutex;

    /// One shared log of every collaborator call, so tests can assert
    /// cross-component ordering.
    #[derive(Default)]
    struct Journal {
        calls: Mutex<Vec<String>>,
    }

    impl Journal {
        fn push(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct FakeWriter(Arc<Journal>);
    impl ConfigWriter for FakeWriter {
        fn write(&self, config: &NodeConfig) -> Result<(), CoordError> {
            self.0.push(format!("write-config(bootstrap={})", config.bootstrap));
            Ok(())
        }
    }

    struct FakeDefiner(Arc<Journal>);
    impl ServiceDefiner for FakeDefiner {
        fn generate_definitions(&self, _config: &NodeConfig) -> Vec<ServiceDefinition> {
            Vec::new()
        }
        fn write_definitions(
            &self,
            _dir: &Path,
            _defs: &[ServiceDefinition],
        ) -> Result<(), CoordError> {
            self.0.push("write-definitions");
            Ok(())
        }
    }

    struct FakeRunner {
        journal: Arc<Journal>,
    }
    impl AgentRunner for FakeRunner {
        fn run(&self) -> RunnerFut<'_> {
            self.journal.push("run");
            Box::pin(async { Ok(()) })
        }
        fn stop(&self) -> RunnerFut<'_> {
            self.journal.push("stop");
            Box::pin(async { Ok(()) })
        }
        fn wait(&self) -> RunnerFut<'_> {
            self.journal.push("wait");
            Box::pin(async { Ok(()) })
        }
        fn cleanup(&self) -> RunnerFut<'_> {
            self.journal.push("cleanup");
            Box::pin(async { Ok(()) })
        }
        fn write_pid(&self) -> RunnerFut<'_> {
            self.journal.push("write-pid");
            Box::pin(async { Ok(()) })
        }
    }

    struct FakeChecker {
        decision: bool,
    }
    impl BootstrapCheck for FakeChecker {
        fn starts_in_bootstrap(
            &self,
        ) -> Pin<Box<dyn std::future::Future<Output = Result<bool, CoordError>> + Send + '_>>
        {
            let decision = self.decision;
            Box::pin(async move { Ok(decision) })
        }
    }

    struct FakeProbe {
        journal: Arc<Journal>,
        members: Mutex<Vec<AgentMember>>,
        stats: Mutex<RaftStats>,
        leave_error: Option<&'static str>,
    }

    impl FakeProbe {
        fn new(journal: Arc<Journal>) -> Self {
            Self {
                journal,
                members: Mutex::new(Vec::new()),
                stats: Mutex::new(RaftStats {
                    commit_index: 1,
                    last_log_index: 1,
                }),
                leave_error: None,
            }
        }

        fn server_member(addr: &str) -> AgentMember {
            let mut tags = HashMap::new();
            tags.insert("role".to_string(), SERVER_ROLE.to_string());
            AgentMember {
                name: addr.to_string(),
                addr: addr.to_string(),
                tags,
            }
        }
    }

    impl ClusterProbe for FakeProbe {
        fn self_check(&self) -> ProbeFut<'_, ()> {
            self.journal.push("self");
            Box::pin(async { Ok(()) })
        }
        fn members(&self, _wan: bool) -> ProbeFut<'_, Vec<AgentMember>> {
            let members = self.members.lock().unwrap().clone();
            Box::pin(async move { Ok(members) })
        }
        fn join(&self, addr: &str) -> ProbeFut<'_, ()> {
            self.journal.push(format!("join({addr})"));
            Box::pin(async { Ok(()) })
        }
        fn leave(&self) -> ProbeFut<'_, ()> {
            self.journal.push("leave");
            let err = self.leave_error;
            Box::pin(async move {
                match err {
                    Some(msg) => Err(CoordError::Agent(msg.to_string())),
                    None => Ok(()),
                }
            })
        }
        fn raft_stats(&self) -> ProbeFut<'_, RaftStats> {
            let stats = *self.stats.lock().unwrap();
            Box::pin(async move { Ok(stats) })
        }
        fn list_keys(&self) -> ProbeFut<'_, KeyringState> {
            self.journal.push("keyring-list");
            Box::pin(async { Ok(KeyringState::default()) })
        }
        fn install_key(&self, _key: &str) -> ProbeFut<'_, ()> {
            self.journal.push("install");
            Box::pin(async { Ok(()) })
        }
        fn use_key(&self, _key: &str) -> ProbeFut<'_, ()> {
            self.journal.push("use");
            Box::pin(async { Ok(()) })
        }
        fn remove_key(&self, _key: &str) -> ProbeFut<'_, ()> {
            self.journal.push("remove");
            Box::pin(async { Ok(()) })
        }
        fn leader(&self) -> ProbeFut<'_, Option<String>> {
            Box::pin(async { Ok(None) })
        }
    }

    struct FakeOpener(Arc<FakeProbe>);
    impl ChannelOpener for FakeOpener {
        fn open(&self) -> ProbeFut<'_, Arc<dyn ClusterProbe>> {
            let probe: Arc<dyn ClusterProbe> = self.0.clone();
            Box::pin(async move { Ok(probe) })
        }
    }

    fn test_config(mode: &str, keys: Vec<String>) -> NodeConfig {
        let mut cfg: NodeConfig = serde_json::from_str(&format!(
            r#"{{
                "node_name": "store-1",
                "external_ip": "10.0.0.5",
                "mode": "{mode}",
                "expected_servers": 1,
                "join_peers": ["10.0.0.6"],
                "timeout_seconds": 5,
                "paths": {{
                    "agent_binary": "/usr/bin/consul",
                    "config_dir": "/etc/consul.d",
                    "pid_file": "/var/run/consul.pid",
                    "keyring_file": "/var/lib/consul/serf/local.keyring"
                }}
            }}"#
        ))
        .unwrap();
        cfg.encrypt_keys = keys;
        cfg
    }

    struct Harness {
        controller: Controller,
        journal: Arc<Journal>,
    }

    fn harness(config: NodeConfig, decision: bool, leave_error: Option<&'static str>) -> Harness {
        let journal = Arc::new(Journal::default());
        let mut probe = FakeProbe::new(journal.clone());
        probe.leave_error = leave_error;
        // The node itself is visible in the member list by default.
        *probe.members.lock().unwrap() = vec![FakeProbe::server_member("10.0.0.5")];
        let probe = Arc::new(probe);

        let controller = Controller::new(
            config,
            Arc::new(FakeWriter(journal.clone())),
            Arc::new(FakeDefiner(journal.clone())),
            Arc::new(FakeRunner {
                journal: journal.clone(),
            }),
            Arc::new(FakeChecker { decision }),
            probe.clone(),
            Arc::new(FakeOpener(probe.clone())),
            Arc::new(crate::ops::RealSysOps),
        );
        Harness {
            controller,
            journal,
        }
    }

    #[tokio::test]
    async fn start_server_runs_the_full_sequence_in_order() {
        let config = test_config("server", vec!["a passphrase".to_string()]);
        let h = harness(config, true, None);

        h.controller.start().await.unwrap();

        assert_eq!(
            h.journal.calls(),
            vec![
                "write-config(bootstrap=true)",
                "write-definitions",
                "run",
                "self",
                "join(10.0.0.6)",
                "keyring-list",
                "install",
                "use",
                "write-pid",
            ]
        );
    }

    #[tokio::test]
    async fn start_server_skips_sync_when_not_last_node() {
        let mut config = test_config("server", Vec::new());
        config.expected_servers = 3;
        let h = harness(config, false, None);
        // Only one server visible, three expected: sync gate stays shut,
        // and with no keys configured rotation is skipped too.
        h.controller.start().await.unwrap();
        let calls = h.journal.calls();
        assert!(calls.contains(&"write-pid".to_string()));
        assert!(!calls.contains(&"keyring-list".to_string()));
    }

    #[tokio::test]
    async fn start_server_requires_keys_when_ssl_is_required() {
        let mut config = test_config("server", Vec::new());
        config.require_ssl = true;
        let h = harness(config, false, None);

        let err = h.controller.start().await.unwrap_err();
        assert!(matches!(err, CoordError::SslRequiresKeys));
        // Fail-fast: the PID file is never written, and the agent is
        // deliberately not torn down.
        let calls = h.journal.calls();
        assert!(!calls.contains(&"write-pid".to_string()));
        assert!(!calls.contains(&"stop".to_string()));
    }

    #[tokio::test]
    async fn start_client_never_touches_keyring_or_sync() {
        let config = test_config("client", vec!["a passphrase".to_string()]);
        let h = harness(config, false, None);

        h.controller.start().await.unwrap();

        assert_eq!(
            h.journal.calls(),
            vec![
                "write-config(bootstrap=false)",
                "write-definitions",
                "run",
                "self",
                "join(10.0.0.6)",
                "write-pid",
            ]
        );
    }

    #[tokio::test]
    async fn stop_is_graceful_when_leave_succeeds() {
        let config = test_config("server", Vec::new());
        let h = harness(config, false, None);

        h.controller.stop().await.unwrap();

        let calls = h.journal.calls();
        assert_eq!(calls, vec!["leave", "wait", "cleanup"]);
    }

    #[tokio::test]
    async fn stop_falls_back_to_forced_stop_and_still_cleans_up() {
        let config = test_config("server", Vec::new());
        let h = harness(config, false, Some("rpc connection reset"));

        // Best-effort teardown never fails.
        h.controller.stop().await.unwrap();

        assert_eq!(
            h.journal.calls(),
            vec!["leave", "stop", "wait", "cleanup"]
        );
    }
}
