//! Local-agent client surface.
//!
//! [`ClusterProbe`] is the capability contract for talking to the local
//! agent: membership, join/leave, raft statistics, keyring management and
//! the leader query. Two transports implement it — [`http::HttpAgent`]
//! over the agent's loopback HTTP API and [`rpc::RpcAgent`] over its
//! lower-level RPC port — and the caller picks one.
//!
//! [`AgentClient`] layers the coordinator's verification predicates and
//! the ordered key-rotation protocol on top of a probe. It holds no cache:
//! every observation is a live query against the running agent.

pub mod http;
pub mod rpc;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::errors::CoordError;
use crate::keys;

/// Tag value marking a member as part of the server quorum.
pub const SERVER_ROLE: &str = "consul";

/// Boxed future returned by [`ClusterProbe`] operations.
pub type ProbeFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, CoordError>> + Send + 'a>>;

// ── Value types ──────────────────────────────────────────────────────

/// Read-only membership snapshot reported by the local agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMember {
    /// Human node name.
    pub name: String,
    /// Gossip address of the member.
    pub addr: String,
    /// Tag set (role, optional bootstrap marker, ...).
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl AgentMember {
    /// The member's role tag, if any.
    pub fn role(&self) -> Option<&str> {
        self.tags.get("role").map(String::as_str)
    }

    /// True when this member has claimed cluster origination.
    pub fn claims_bootstrap(&self) -> bool {
        self.tags.get("bootstrap").map(String::as_str) == Some("1")
    }
}

/// Raft log counters reported by the local agent. Compared, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaftStats {
    pub commit_index: u64,
    pub last_log_index: u64,
}

/// The agent's installed gossip keys plus which one is primary.
#[derive(Debug, Clone, Default)]
pub struct KeyringState {
    /// Installed keys. Each transport lists them in a stable order for a
    /// given keyring, so removal sequences are deterministic.
    pub keys: Vec<String>,
    /// The key currently in use, if the agent reports one.
    pub primary: Option<String>,
}

/// Result of a retry-join request. An empty peer list is the expected
/// state for the very first node, so it is a distinct outcome rather
/// than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The agent reached this many configured peers.
    Joined(usize),
    /// There were no peers configured to join.
    NoPeersConfigured,
}

// ── Probe contract ───────────────────────────────────────────────────

/// Capability contract against the local agent. All calls target
/// loopback; the coordinator never speaks to remote nodes directly.
pub trait ClusterProbe: Send + Sync {
    /// Succeeds once the agent's control endpoint answers. A liveness
    /// check only, not a membership check.
    fn self_check(&self) -> ProbeFut<'_, ()>;

    /// Raw membership listing, LAN or WAN view.
    fn members(&self, wan: bool) -> ProbeFut<'_, Vec<AgentMember>>;

    /// Ask the agent to join the cluster through `addr`.
    fn join(&self, addr: &str) -> ProbeFut<'_, ()>;

    /// Graceful gossip departure announcement.
    fn leave(&self) -> ProbeFut<'_, ()>;

    /// Current raft log counters.
    fn raft_stats(&self) -> ProbeFut<'_, RaftStats>;

    /// Installed gossip keys and the current primary.
    fn list_keys(&self) -> ProbeFut<'_, KeyringState>;

    /// Install a key into the keyring. Installing an already-present key
    /// is a no-op at the agent level.
    fn install_key(&self, key: &str) -> ProbeFut<'_, ()>;

    /// Activate an installed key as primary.
    fn use_key(&self, key: &str) -> ProbeFut<'_, ()>;

    /// Remove a key from the keyring.
    fn remove_key(&self, key: &str) -> ProbeFut<'_, ()>;

    /// Address of the current cluster leader, if one is known.
    /// `Ok(None)` means the query succeeded but no leader is elected.
    fn leader(&self) -> ProbeFut<'_, Option<String>>;
}

/// Opens a [`ClusterProbe`] channel on demand.
///
/// The RPC channel can only be dialed once the agent process is up, so
/// lifecycles take an opener instead of a live channel.
pub trait ChannelOpener: Send + Sync {
    fn open(&self) -> ProbeFut<'_, Arc<dyn ClusterProbe>>;
}

// ── AgentClient ──────────────────────────────────────────────────────

/// Verification predicates and key management over a [`ClusterProbe`].
pub struct AgentClient {
    probe: Arc<dyn ClusterProbe>,
    config: NodeConfig,
}

impl AgentClient {
    pub fn new(probe: Arc<dyn ClusterProbe>, config: NodeConfig) -> Self {
        Self { probe, config }
    }

    /// Is the agent's control endpoint answering yet?
    pub async fn self_check(&self) -> Result<(), CoordError> {
        self.probe.self_check().await
    }

    /// LAN or WAN membership listing.
    pub async fn members(&self, wan: bool) -> Result<Vec<AgentMember>, CoordError> {
        self.probe.members(wan).await
    }

    /// Current cluster leader, if any.
    pub async fn leader(&self) -> Result<Option<String>, CoordError> {
        self.probe.leader().await
    }

    /// Attempt retry-join against the configured peer list.
    ///
    /// Success means the join RPC was accepted for at least one peer,
    /// not that the peers admitted this node; callers confirm that with
    /// [`AgentClient::verify_joined`].
    pub async fn join_members(&self) -> Result<JoinOutcome, CoordError> {
        if self.config.join_peers.is_empty() {
            return Ok(JoinOutcome::NoPeersConfigured);
        }
        let mut joined = 0;
        let mut last_err = None;
        for peer in &self.config.join_peers {
            match self.probe.join(peer).await {
                Ok(()) => joined += 1,
                Err(err) => {
                    warn!("join via {} failed: {}", peer, err);
                    last_err = Some(err);
                }
            }
        }
        match (joined, last_err) {
            (0, Some(err)) => Err(err),
            (n, _) => Ok(JoinOutcome::Joined(n)),
        }
    }

    /// Succeeds iff this node's own address appears in the LAN members.
    pub async fn verify_joined(&self) -> Result<(), CoordError> {
        let members = self.probe.members(false).await?;
        if members
            .iter()
            .any(|m| m.addr == self.config.external_ip)
        {
            Ok(())
        } else {
            Err(CoordError::NoExpectedMembers)
        }
    }

    /// True iff the count of server-role members equals the configured
    /// expected server count exactly. Gates the raft sync check so that
    /// non-final nodes in a rolling bring-up don't assert synchronization.
    pub async fn is_last_node(&self) -> Result<bool, CoordError> {
        let members = self.probe.members(false).await?;
        let servers = members
            .iter()
            .filter(|m| m.role() == Some(SERVER_ROLE))
            .count();
        Ok(servers == self.config.expected_servers)
    }

    /// Succeeds iff the server's committed log position is nonzero and
    /// equals the highest log position it has seen. Depends only on the
    /// counter pair, never on call history.
    pub async fn verify_synced(&self) -> Result<(), CoordError> {
        let stats = self.probe.raft_stats().await?;
        if stats.commit_index == 0 {
            return Err(CoordError::CommitIndexZero);
        }
        if stats.commit_index != stats.last_log_index {
            return Err(CoordError::LogNotInSync);
        }
        Ok(())
    }

    /// Drive the keyring to exactly `keys`, activating the first entry
    /// as primary.
    ///
    /// Each entry may be base64 16-byte material or a raw passphrase
    /// (derived before use). Keys are targeted by content, not index, so
    /// operators rotate by prepending a new key in one deploy and
    /// removing the old one in the next.
    ///
    /// Extra installed keys are removed before the new targets are
    /// installed and before the new primary is activated. If the current
    /// primary is itself being rotated out there is a window where the
    /// keyring holds neither the outgoing primary nor an activated
    /// replacement; the ordering is kept as-is rather than reordered.
    ///
    /// The first failing remove/install/use call aborts the operation
    /// with that call's error; keys already processed stay as they are.
    pub async fn set_keys(&self, keys: &[String]) -> Result<(), CoordError> {
        if keys.is_empty() {
            return Err(CoordError::EmptyKeyList);
        }
        let target = keys::normalize_keys(keys);

        let installed = self.probe.list_keys().await?;
        for extra in installed.keys.iter().filter(|k| !target.contains(*k)) {
            info!("removing retired gossip key {}", keys::fingerprint(extra));
            self.probe.remove_key(extra).await?;
        }
        for key in &target {
            info!("installing gossip key {}", keys::fingerprint(key));
            self.probe.install_key(key).await?;
        }
        info!("activating primary gossip key {}", keys::fingerprint(&target[0]));
        self.probe.use_key(&target[0]).await?;
        Ok(())
    }

    /// Graceful cluster departure.
    pub async fn leave(&self) -> Result<(), CoordError> {
        self.probe.leave().await
    }
}

// ── Tests ───────────────────────────────────────────────────────────
