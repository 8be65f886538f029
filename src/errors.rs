//! Coordinator error types.
//!
//! Every failure the coordinator can surface is a [`CoordError`] variant.
//! The taxonomy matters: transient errors are only ever seen wrapped inside
//! [`CoordError::TimeoutExceeded`] after a bounded retry gives up, while
//! precondition errors (bad key list, SSL without keys) fail immediately
//! and are never retried.

use thiserror::Error;

/// Errors surfaced by the node coordinator.
#[derive(Debug, Error)]
pub enum CoordError {
    /// A bounded retry ran out of deadline. Wraps the last probe failure
    /// so the caller can diagnose why convergence failed.
    #[error("timeout exceeded: \"{last}\"")]
    TimeoutExceeded { last: String },

    /// The node's own address never showed up in the member list.
    #[error("no expected members")]
    NoExpectedMembers,

    /// A server that has never applied a log entry cannot be synced.
    #[error("commit index must not be zero")]
    CommitIndexZero,

    /// The committed log position trails the highest position seen.
    #[error("log not in sync")]
    LogNotInSync,

    /// `set_keys` was called with an empty target list.
    #[error("cannot set keys: no encryption keys given")]
    EmptyKeyList,

    /// SSL is required by configuration but no encryption keys exist.
    #[error("SSL is required but no encryption keys are configured")]
    SslRequiresKeys,

    /// The local agent's transport failed (connection refused, reset, ...).
    #[error("agent request failed: {0}")]
    Agent(String),

    /// The local agent answered with a non-success status.
    #[error("agent returned status {status}: {body}")]
    AgentStatus { status: u16, body: String },

    /// The agent's response could not be interpreted.
    #[error("unexpected agent response: {0}")]
    BadResponse(String),

    /// Configuration was malformed or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem or process-level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoordError {
    /// True when the underlying agent response says the cluster has no
    /// known servers yet. The bootstrap heuristic uses this to tell
    /// "no cluster exists" apart from an actual transport failure.
    pub fn is_no_known_servers(&self) -> bool {
        match self {
            CoordError::Agent(msg) => msg.contains("No known Consul servers"),
            CoordError::AgentStatus { body, .. } => body.contains("No known Consul servers"),
            _ => false,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
