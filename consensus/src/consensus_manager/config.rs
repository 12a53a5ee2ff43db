use std::{path::Path, time::Duration};

use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// [`ConsensusConfig`] sets the round timeouts used by every committee's consensus state.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ConsensusConfig {
    /// How long to wait for a proposal before prevoting nil.
    #[serde(default = "default_timeout_propose_ms")]
    #[validate(range(min = 1))]
    pub timeout_propose_ms: u64,
    /// How long to wait after receiving +2/3 prevotes for "anything".
    #[serde(default = "default_timeout_prevote_ms")]
    #[validate(range(min = 1))]
    pub timeout_prevote_ms: u64,
    /// How long to wait after receiving +2/3 precommits for "anything".
    #[serde(default = "default_timeout_precommit_ms")]
    #[validate(range(min = 1))]
    pub timeout_precommit_ms: u64,
    /// How long to wait after committing a block before starting the next height.
    #[serde(default = "default_timeout_commit_ms")]
    pub timeout_commit_ms: u64,
    /// Make progress as soon as all precommits are in instead of waiting out `timeout_commit`.
    #[serde(default)]
    pub skip_timeout_commit: bool,
}

fn default_timeout_propose_ms() -> u64 {
    3_000
}

fn default_timeout_prevote_ms() -> u64 {
    1_000
}

fn default_timeout_precommit_ms() -> u64 {
    1_000
}

fn default_timeout_commit_ms() -> u64 {
    1_000
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            timeout_propose_ms: default_timeout_propose_ms(),
            timeout_prevote_ms: default_timeout_prevote_ms(),
            timeout_precommit_ms: default_timeout_precommit_ms(),
            timeout_commit_ms: default_timeout_commit_ms(),
            skip_timeout_commit: false,
        }
    }
}

impl ConsensusConfig {
    pub fn propose_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_propose_ms)
    }

    pub fn prevote_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_prevote_ms)
    }

    pub fn precommit_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_precommit_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_commit_ms)
    }

    /// [`from_path`] creates a [`ConsensusConfig`] from a .toml or .yaml file,
    /// with `CONSENSUS_` environment variables taking precedence.
    ///
    /// ```toml
    /// timeout_propose_ms = 3000
    /// skip_timeout_commit = true
    /// ```
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

        figment = figment.merge(Env::prefixed("CONSENSUS_"));

        let config: ConsensusConfig = figment.extract().map_err(anyhow::Error::msg)?;
        config.validate()?;

        Ok(config)
    }
}
