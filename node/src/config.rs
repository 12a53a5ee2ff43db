//! Node configuration.
//!
//! Combines the P2P and consensus configurations with the node's own settings
//! into a single [`NodeConfig`] that can be loaded from TOML/YAML files or
//! environment variables.

use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use consensus::consensus_manager::config::ConsensusConfig;
use p2p::config::P2PConfig;

/// Complete node configuration.
///
/// # Example TOML
///
/// ```toml
/// moniker = "validator-1"
/// chain_id = "mainnet"
///
/// [p2p]
/// listen_address = "tcp://0.0.0.0:26656"
/// private_peer_ids = "a1b2...,c3d4..."
///
/// [consensus]
/// timeout_propose_ms = 3000
/// skip_timeout_commit = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NodeConfig {
    /// Human readable name announced to peers.
    #[serde(default = "default_moniker")]
    #[validate(length(min = 1))]
    pub moniker: String,

    /// Chain every committee on this node belongs to.
    #[serde(default = "default_chain_id")]
    #[validate(length(min = 1))]
    pub chain_id: String,

    /// P2P configuration shared by every committee switch.
    #[serde(default)]
    pub p2p: P2PConfig,

    /// Consensus timeouts shared by every committee.
    #[serde(default)]
    #[validate(nested)]
    pub consensus: ConsensusConfig,
}

fn default_moniker() -> String {
    "anonymous".to_string()
}

fn default_chain_id() -> String {
    "local".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            moniker: default_moniker(),
            chain_id: default_chain_id(),
            p2p: P2PConfig::default(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a file path.
    ///
    /// Supports TOML (.toml) and YAML (.yaml, .yml) formats.
    /// Environment variables override file values using the `NODE_` prefix,
    /// with `__` separating nested fields: `NODE_P2P__LISTEN_ADDRESS=...`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        figment = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
            Some(ext) => {
                return Err(anyhow::anyhow!(
                    "Unsupported config file format: {}. Use .toml, .yaml, or .yml",
                    ext
                ));
            }
            None => {
                return Err(anyhow::anyhow!(
                    "Config file must have an extension (.toml, .yaml, or .yml)"
                ));
            }
        };

        Self::extract(figment.merge(Env::prefixed("NODE_").split("__")))
            .with_context(|| format!("Failed to load node config from {}", path.display()))
    }

    /// Load configuration from defaults and environment variables only.
    pub fn from_env() -> Result<Self> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Env::prefixed("NODE_").split("__")),
        )
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: NodeConfig = figment.extract().map_err(anyhow::Error::msg)?;
        config.validate()?;
        Ok(config)
    }
}
