//! Configuration loading and types for the node coordinator.
//!
//! Configuration is read from a JSON file and deserialized into the
//! [`NodeConfig`] struct. It is loaded once per process invocation and
//! treated as immutable for the duration of the run; the coordinator
//! never writes it back.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which role the supervised agent runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Participates in consensus and holds replicated state.
    Server,
    /// Stateless member that forwards to the server quorum.
    Client,
}

/// Top-level node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Human-readable node name, unique within the cluster.
    pub node_name: String,

    /// Ordinal index of this node within its deployment.
    #[serde(default)]
    pub index: u32,

    /// Externally routable IP address other members see this node under.
    pub external_ip: String,

    /// Desired agent mode for the `start` lifecycle.
    #[serde(default = "default_mode")]
    pub mode: AgentMode,

    /// Whether this server is permitted to originate a new cluster.
    /// Never set from the config file; filled in by the controller after
    /// the bootstrap decision.
    #[serde(skip, default)]
    pub bootstrap: bool,

    /// DNS domain served by the agent.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Datacenter name the agent advertises.
    #[serde(default = "default_datacenter")]
    pub datacenter: String,

    /// Agent log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Gossip protocol version the agent speaks.
    #[serde(default = "default_protocol")]
    pub protocol: u32,

    /// Peer addresses the agent retry-joins on the LAN.
    #[serde(default)]
    pub join_peers: Vec<String>,

    /// Peer addresses the agent retry-joins across the WAN.
    #[serde(default)]
    pub wan_peers: Vec<String>,

    /// Ordered gossip encryption keys; the first entry is the primary.
    /// Entries are either base64 16-byte key material or raw passphrases.
    #[serde(default)]
    pub encrypt_keys: Vec<String>,

    /// Require encrypted transport; refuses to start a server without
    /// encryption keys when set.
    #[serde(default)]
    pub require_ssl: bool,

    /// Number of server-role members expected once the cluster is fully
    /// deployed; used to gate the raft sync check.
    #[serde(default = "default_expected_servers")]
    pub expected_servers: usize,

    /// Deadline, in seconds, for every bounded wait the coordinator runs.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Local agent endpoints, loopback only.
    #[serde(default)]
    pub agent: AgentEndpoints,

    /// Filesystem paths owned by this coordinator invocation.
    pub paths: PathsConfig,
}

/// Loopback endpoints of the supervised agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentEndpoints {
    /// HTTP API address.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Lower-level RPC address.
    #[serde(default = "default_rpc_addr")]
    pub rpc_addr: String,
}

impl Default for AgentEndpoints {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            rpc_addr: default_rpc_addr(),
        }
    }
}

/// Filesystem locations for the agent binary and its on-disk state.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// The agent binary to supervise.
    pub agent_binary: PathBuf,

    /// Directory the agent reads its configuration fragments from.
    pub config_dir: PathBuf,

    /// PID file recording the supervised agent process.
    pub pid_file: PathBuf,

    /// On-disk gossip keyring file, removed during teardown.
    pub keyring_file: PathBuf,
}

impl NodeConfig {
    /// Deadline for one bounded wait.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Clone of this configuration reshaped for the disposable probe
    /// agent: client mode under a throwaway name, isolated under `dir`,
    /// never joining WAN peers and never claiming bootstrap.
    pub fn probe_profile(&self, probe_name: &str, dir: &Path) -> NodeConfig {
        let mut cfg = self.clone();
        cfg.node_name = probe_name.to_string();
        cfg.mode = AgentMode::Client;
        cfg.bootstrap = false;
        cfg.wan_peers = Vec::new();
        cfg.paths.config_dir = dir.to_path_buf();
        cfg.paths.pid_file = dir.join("probe.pid");
        cfg.paths.keyring_file = dir.join("serf").join("local.keyring");
        cfg
    }
}

// ── Defaults ─────────────────────────────────────────────────────────

fn default_mode() -> AgentMode {
    AgentMode::Client
}

fn default_domain() -> String {
    "cluster.local".to_string()
}

fn default_datacenter() -> String {
    "dc1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_protocol() -> u32 {
    2
}

fn default_expected_servers() -> usize {
    3
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_http_addr() -> String {
    "127.0.0.1:8500".to_string()
}

fn default_rpc_addr() -> String {
    "127.0.0.1:8400".to_string()
}

// ── Loader ───────────────────────────────────────────────────────────

/// Load and parse configuration from a JSON file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<NodeConfig> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: NodeConfig = serde_json::from_str(&contents)?;
    Ok(config)
}

// ── Tests ───────────────────────────────────────────────────────────
