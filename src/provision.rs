//! On-disk provisioning of the agent.
//!
//! [`ConfigWriter`] materializes the agent's JSON configuration file and
//! [`ServiceDefiner`] emits the service-registration fragments, both into
//! the agent's config directory. The lifecycles consume these as
//! contracts; the bootstrap probe reuses the same writer against its
//! temporary directory.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::{AgentMode, NodeConfig};
use crate::errors::CoordError;
use crate::keys;
use crate::ops::SysOps;

/// Port the key-value service is registered under.
const STORE_SERVICE_PORT: u16 = 4001;

/// A service-registration fragment for the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Writes the agent's main configuration file.
pub trait ConfigWriter: Send + Sync {
    fn write(&self, config: &NodeConfig) -> Result<(), CoordError>;
}

/// Generates and writes service-registration fragments.
pub trait ServiceDefiner: Send + Sync {
    fn generate_definitions(&self, config: &NodeConfig) -> Vec<ServiceDefinition>;
    fn write_definitions(&self, dir: &Path, defs: &[ServiceDefinition])
        -> Result<(), CoordError>;
}

/// [`ConfigWriter`] emitting `agent.json` into the config directory.
pub struct JsonConfigWriter {
    ops: Arc<dyn SysOps>,
}

impl JsonConfigWriter {
    pub fn new(ops: Arc<dyn SysOps>) -> Self {
        Self { ops }
    }

    /// Render the agent configuration document for `config`.
    fn render(config: &NodeConfig) -> serde_json::Value {
        let mut doc = json!({
            "node_name": config.node_name,
            "advertise_addr": config.external_ip,
            "server": config.mode == AgentMode::Server,
            "domain": config.domain,
            "datacenter": config.datacenter,
            "log_level": config.log_level,
            "protocol": config.protocol,
            "retry_join": config.join_peers,
            "retry_join_wan": config.wan_peers,
        });
        if config.mode == AgentMode::Server && config.bootstrap {
            doc["bootstrap"] = json!(true);
        }
        if let Some(primary) = config.encrypt_keys.first() {
            doc["encrypt"] = json!(keys::normalize_key(primary));
        }
        if let Some(data_dir) = config
            .paths
            .keyring_file
            .parent()
            .and_then(Path::parent)
        {
            doc["data_dir"] = json!(data_dir.display().to_string());
        }
        doc
    }
}

impl ConfigWriter for JsonConfigWriter {
    fn write(&self, config: &NodeConfig) -> Result<(), CoordError> {
        let doc = Self::render(config);
        let path = config.paths.config_dir.join("agent.json");
        let rendered = serde_json::to_string_pretty(&doc)
            .map_err(|e| CoordError::Config(e.to_string()))?;
        self.ops.create_file(&path, &rendered)?;
        info!("wrote agent configuration to {}", path.display());
        Ok(())
    }
}

/// [`ServiceDefiner`] emitting one `service-<name>.json` per definition.
pub struct JsonServiceDefiner {
    ops: Arc<dyn SysOps>,
}

impl JsonServiceDefiner {
    pub fn new(ops: Arc<dyn SysOps>) -> Self {
        Self { ops }
    }
}

impl ServiceDefiner for JsonServiceDefiner {
    fn generate_definitions(&self, config: &NodeConfig) -> Vec<ServiceDefinition> {
        let mode_tag = match config.mode {
            AgentMode::Server => "server",
            AgentMode::Client => "client",
        };
        vec![ServiceDefinition {
            name: format!("store-{}", config.index),
            address: config.external_ip.clone(),
            port: STORE_SERVICE_PORT,
            tags: vec![mode_tag.to_string(), format!("dc-{}", config.datacenter)],
        }]
    }

    fn write_definitions(
        &self,
        dir: &Path,
        defs: &[ServiceDefinition],
    ) -> Result<(), CoordError> {
        for def in defs {
            let doc = json!({ "service": def });
            let path = dir.join(format!("service-{}.json", def.name));
            let rendered = serde_json::to_string_pretty(&doc)
                .map_err(|e| CoordError::Config(e.to_string()))?;
            self.ops.create_file(&path, &rendered)?;
            info!("wrote service definition {}", path.display());
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::RealSysOps;

    fn config_in(dir: &Path) -> NodeConfig {
        let mut cfg: NodeConfig = serde_json::from_str(
            r#"{
                "node_name": "store-1",
                "index": 1,
                "external_ip": "10.0.0.5",
                "mode": "server",
                "join_peers": ["10.0.0.6"],
                "encrypt_keys": ["a passphrase"],
                "paths": {
                    "agent_binary": "/usr/bin/consul",
                    "config_dir": "/etc/consul.d",
                    "pid_file": "/var/run/consul.pid",
                    "keyring_file": "/var/lib/consul/serf/local.keyring"
                }
            }"#,
        )
        .unwrap();
        cfg.paths.config_dir = dir.to_path_buf();
        cfg
    }

    #[test]
    fn server_config_with_bootstrap_claim() {
        let scratch = tempfile::tempdir().unwrap();
        let mut cfg = config_in(scratch.path());
        cfg.bootstrap = true;

        JsonConfigWriter::new(Arc::new(RealSysOps)).write(&cfg).unwrap();

        let raw = std::fs::read_to_string(scratch.path().join("agent.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["node_name"], "store-1");
        assert_eq!(doc["server"], true);
        assert_eq!(doc["bootstrap"], true);
        assert_eq!(doc["retry_join"][0], "10.0.0.6");
        assert_eq!(doc["data_dir"], "/var/lib/consul");
        // Passphrase is derived before it reaches the agent config.
        assert_eq!(
            doc["encrypt"],
            serde_json::Value::String(keys::normalize_key("a passphrase"))
        );
    }

    #[test]
    fn joining_server_omits_the_bootstrap_claim() {
        let scratch = tempfile::tempdir().unwrap();
        let cfg = config_in(scratch.path());

        JsonConfigWriter::new(Arc::new(RealSysOps)).write(&cfg).unwrap();

        let raw = std::fs::read_to_string(scratch.path().join("agent.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["server"], true);
        assert!(doc.get("bootstrap").is_none());
    }

    #[test]
    fn definitions_round_trip_through_disk() {
        let scratch = tempfile::tempdir().unwrap();
        let cfg = config_in(scratch.path());
        let definer = JsonServiceDefiner::new(Arc::new(RealSysOps));

        let defs = definer.generate_definitions(&cfg);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "store-1");
        assert!(defs[0].tags.contains(&"server".to_string()));

        definer.write_definitions(scratch.path(), &defs).unwrap();
        let raw =
            std::fs::read_to_string(scratch.path().join("service-store-1.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let parsed: ServiceDefinition =
            serde_json::from_value(doc["service"].clone()).unwrap();
        assert_eq!(parsed, defs[0]);
    }
}
