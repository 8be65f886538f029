//! HTTP implementation of [`ClusterProbe`].
//!
//! Talks to the local agent's loopback HTTP API. Endpoints follow the
//! agent's v1 surface: `agent/self`, `agent/members`, `agent/join`,
//! `agent/leave`, `status/leader` and `operator/keyring`. Raft counters
//! are read from the self endpoint's `Stats.raft` map, where the agent
//! reports them as string-encoded integers.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::{AgentMember, ClusterProbe, KeyringState, ProbeFut, RaftStats};
use crate::errors::CoordError;

/// Per-request timeout. Keeps one slow call from eating the retry budget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`ClusterProbe`] over the agent's loopback HTTP API.
pub struct HttpAgent {
    client: reqwest::Client,
    base: String,
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireMember {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Addr")]
    addr: String,
    #[serde(rename = "Tags", default)]
    tags: HashMap<String, String>,
}

impl From<WireMember> for AgentMember {
    fn from(m: WireMember) -> Self {
        AgentMember {
            name: m.name,
            addr: m.addr,
            tags: m.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSelf {
    #[serde(rename = "Stats", default)]
    stats: HashMap<String, HashMap<String, String>>,
}

// BTreeMap, not HashMap: the agent reports keys as a JSON object whose
// order is not preserved, so the listing is made deterministic by sorting.
#[derive(Debug, Deserialize)]
struct WireKeyring {
    #[serde(rename = "Keys", default)]
    keys: BTreeMap<String, u32>,
    #[serde(rename = "PrimaryKeys", default)]
    primary_keys: BTreeMap<String, u32>,
}

impl HttpAgent {
    /// Probe for the agent's HTTP API at `addr` (host:port, loopback).
    pub fn new(addr: &str) -> Result<Self, CoordError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CoordError::Agent(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: format!("http://{addr}/v1"),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    /// Issue a request and fold transport and status failures into
    /// [`CoordError`], returning the response body on success.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<String, CoordError> {
        let resp = req
            .send()
            .await
            .map_err(|e| CoordError::Agent(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CoordError::Agent(e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(CoordError::AgentStatus {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn get_self(&self) -> Result<WireSelf, CoordError> {
        let body = self.send(self.client.get(self.url("agent/self"))).await?;
        serde_json::from_str(&body).map_err(|e| CoordError::BadResponse(e.to_string()))
    }

    fn keyring_body(key: &str) -> serde_json::Value {
        json!({ "Key": key })
    }
}

impl ClusterProbe for HttpAgent {
    fn self_check(&self) -> ProbeFut<'_, ()> {
        Box::pin(async move {
            self.send(self.client.get(self.url("agent/self"))).await?;
            Ok(())
        })
    }

    fn members(&self, wan: bool) -> ProbeFut<'_, Vec<AgentMember>> {
        Box::pin(async move {
            let mut req = self.client.get(self.url("agent/members"));
            if wan {
                req = req.query(&[("wan", "1")]);
            }
            let body = self.send(req).await?;
            let members: Vec<WireMember> =
                serde_json::from_str(&body).map_err(|e| CoordError::BadResponse(e.to_string()))?;
            Ok(members.into_iter().map(AgentMember::from).collect())
        })
    }

    fn join(&self, addr: &str) -> ProbeFut<'_, ()> {
        let url = self.url(&format!("agent/join/{addr}"));
        Box::pin(async move {
            self.send(self.client.put(url)).await?;
            Ok(())
        })
    }

    fn leave(&self) -> ProbeFut<'_, ()> {
        Box::pin(async move {
            self.send(self.client.put(self.url("agent/leave"))).await?;
            Ok(())
        })
    }

    fn raft_stats(&self) -> ProbeFut<'_, RaftStats> {
        Box::pin(async move {
            let info = self.get_self().await?;
            let raft = info
                .stats
                .get("raft")
                .ok_or_else(|| CoordError::BadResponse("no raft stats in agent self".into()))?;
            let parse = |field: &str| -> Result<u64, CoordError> {
                raft.get(field)
                    .ok_or_else(|| {
                        CoordError::BadResponse(format!("raft stats missing {field}"))
                    })?
                    .parse::<u64>()
                    .map_err(|e| CoordError::BadResponse(format!("bad {field}: {e}")))
            };
            Ok(RaftStats {
                commit_index: parse("commit_index")?,
                last_log_index: parse("last_log_index")?,
            })
        })
    }

    fn list_keys(&self) -> ProbeFut<'_, KeyringState> {
        Box::pin(async move {
            let body = self.send(self.client.get(self.url("operator/keyring"))).await?;
            // One response entry per datacenter/segment; merge them.
            let entries: Vec<WireKeyring> =
                serde_json::from_str(&body).map_err(|e| CoordError::BadResponse(e.to_string()))?;
            let mut state = KeyringState::default();
            for entry in entries {
                for key in entry.keys.into_keys() {
                    if !state.keys.contains(&key) {
                        state.keys.push(key);
                    }
                }
                if state.primary.is_none() {
                    state.primary = entry.primary_keys.into_keys().next();
                }
            }
            Ok(state)
        })
    }

    fn install_key(&self, key: &str) -> ProbeFut<'_, ()> {
        let body = Self::keyring_body(key);
        Box::pin(async move {
            self.send(
                self.client
                    .post(self.url("operator/keyring"))
                    .json(&body),
            )
            .await?;
            Ok(())
        })
    }

    fn use_key(&self, key: &str) -> ProbeFut<'_, ()> {
        let body = Self::keyring_body(key);
        Box::pin(async move {
            self.send(self.client.put(self.url("operator/keyring")).json(&body))
                .await?;
            Ok(())
        })
    }

    fn remove_key(&self, key: &str) -> ProbeFut<'_, ()> {
        let body = Self::keyring_body(key);
        Box::pin(async move {
            self.send(
                self.client
                    .delete(self.url("operator/keyring"))
                    .json(&body),
            )
            .await?;
            Ok(())
        })
    }

    fn leader(&self) -> ProbeFut<'_, Option<String>> {
        Box::pin(async move {
            let body = self.send(self.client.get(self.url("status/leader"))).await?;
            let leader: String =
                serde_json::from_str(&body).map_err(|e| CoordError::BadResponse(e.to_string()))?;
            Ok(if leader.is_empty() { None } else { Some(leader) })
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
