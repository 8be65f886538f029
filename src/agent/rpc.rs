//! RPC implementation of [`ClusterProbe`].
//!
//! The agent's lower-level control channel speaks newline-delimited JSON
//! frames over a loopback TCP connection: one request object per line,
//! one response object per line. Responses carry `"ok": true` plus the
//! payload fields, or `"ok": false` with an `"error"` message.
//!
//! The connection is dialed once by [`RpcAgent::connect`] and reused for
//! the rest of the lifecycle; the coordinator is the only writer, so a
//! single framed stream is enough.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use std::sync::Arc;

use super::{AgentMember, ChannelOpener, ClusterProbe, KeyringState, ProbeFut, RaftStats};
use crate::errors::CoordError;

/// [`ClusterProbe`] over the agent's RPC port.
pub struct RpcAgent {
    stream: Mutex<BufStream<TcpStream>>,
}

impl RpcAgent {
    /// Open the RPC channel to the agent at `addr` (host:port, loopback).
    pub async fn connect(addr: &str) -> Result<Self, CoordError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| CoordError::Agent(format!("rpc connect to {addr} failed: {e}")))?;
        Ok(Self {
            stream: Mutex::new(BufStream::new(stream)),
        })
    }

    /// Send one request frame and read one response frame.
    async fn request(&self, payload: Value) -> Result<Value, CoordError> {
        let mut stream = self.stream.lock().await;

        let mut frame =
            serde_json::to_string(&payload).map_err(|e| CoordError::BadResponse(e.to_string()))?;
        frame.push('\n');
        stream
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| CoordError::Agent(format!("rpc write failed: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| CoordError::Agent(format!("rpc write failed: {e}")))?;

        let mut line = String::new();
        let n = stream
            .read_line(&mut line)
            .await
            .map_err(|e| CoordError::Agent(format!("rpc read failed: {e}")))?;
        if n == 0 {
            return Err(CoordError::Agent("rpc connection closed by agent".into()));
        }

        let resp: Value =
            serde_json::from_str(line.trim()).map_err(|e| CoordError::BadResponse(e.to_string()))?;
        if resp.get("ok").and_then(Value::as_bool) == Some(true) {
            Ok(resp)
        } else {
            let msg = resp
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unspecified rpc error");
            Err(CoordError::Agent(msg.to_string()))
        }
    }

    fn field<'a>(resp: &'a Value, name: &str) -> Result<&'a Value, CoordError> {
        resp.get(name)
            .ok_or_else(|| CoordError::BadResponse(format!("rpc response missing {name}")))
    }
}

impl ClusterProbe for RpcAgent {
    fn self_check(&self) -> ProbeFut<'_, ()> {
        Box::pin(async move {
            self.request(json!({ "command": "self" })).await?;
            Ok(())
        })
    }

    fn members(&self, wan: bool) -> ProbeFut<'_, Vec<AgentMember>> {
        Box::pin(async move {
            let resp = self
                .request(json!({ "command": "members", "wan": wan }))
                .await?;
            let members = Self::field(&resp, "members")?;
            serde_json::from_value(members.clone())
                .map_err(|e| CoordError::BadResponse(e.to_string()))
        })
    }

    fn join(&self, addr: &str) -> ProbeFut<'_, ()> {
        let payload = json!({ "command": "join", "addr": addr });
        Box::pin(async move {
            self.request(payload).await?;
            Ok(())
        })
    }

    fn leave(&self) -> ProbeFut<'_, ()> {
        Box::pin(async move {
            self.request(json!({ "command": "leave" })).await?;
            Ok(())
        })
    }

    fn raft_stats(&self) -> ProbeFut<'_, RaftStats> {
        Box::pin(async move {
            let resp = self.request(json!({ "command": "stats" })).await?;
            let index = |name: &str| -> Result<u64, CoordError> {
                Self::field(&resp, name)?
                    .as_u64()
                    .ok_or_else(|| CoordError::BadResponse(format!("{name} is not an integer")))
            };
            Ok(RaftStats {
                commit_index: index("commit_index")?,
                last_log_index: index("last_log_index")?,
            })
        })
    }

    fn list_keys(&self) -> ProbeFut<'_, KeyringState> {
        Box::pin(async move {
            let resp = self.request(json!({ "command": "keyring-list" })).await?;
            let keys: Vec<String> = serde_json::from_value(Self::field(&resp, "keys")?.clone())
                .map_err(|e| CoordError::BadResponse(e.to_string()))?;
            let primary = resp
                .get("primary")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(KeyringState { keys, primary })
        })
    }

    fn install_key(&self, key: &str) -> ProbeFut<'_, ()> {
        let payload = json!({ "command": "keyring-install", "key": key });
        Box::pin(async move {
            self.request(payload).await?;
            Ok(())
        })
    }

    fn use_key(&self, key: &str) -> ProbeFut<'_, ()> {
        let payload = json!({ "command": "keyring-use", "key": key });
        Box::pin(async move {
            self.request(payload).await?;
            Ok(())
        })
    }

    fn remove_key(&self, key: &str) -> ProbeFut<'_, ()> {
        let payload = json!({ "command": "keyring-remove", "key": key });
        Box::pin(async move {
            self.request(payload).await?;
            Ok(())
        })
    }

    fn leader(&self) -> ProbeFut<'_, Option<String>> {
        Box::pin(async move {
            let resp = self.request(json!({ "command": "leader" })).await?;
            let leader = Self::field(&resp, "leader")?
                .as_str()
                .unwrap_or_default()
                .to_string();
            Ok(if leader.is_empty() { None } else { Some(leader) })
        })
    }
}

/// Dials a fresh [`RpcAgent`] each time a lifecycle asks for its
/// RPC channel.
pub struct RpcChannelOpener {
    addr: String,
}

impl RpcChannelOpener {
    pub fn new(addr: String) -> Self {
        Self { addr }
    }
}

impl ChannelOpener for RpcChannelOpener {
    fn open(&self) -> ProbeFut<'_, Arc<dyn ClusterProbe>> {
        Box::pin(async move {
            let agent = RpcAgent::connect(&self.addr).await?;
            Ok(Arc::new(agent) as Arc<dyn ClusterProbe>)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
