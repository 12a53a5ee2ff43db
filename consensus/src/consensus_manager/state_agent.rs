//! State agent: a committee's view of the chain it produces blocks for.
//!
//! The agent ties a committee's validator set and height range to the
//! upstream chain through an [`AgentProxy`]. Block production, verification and
//! commitment are delegated to the proxy; the agent only tags each request with
//! the committee id and enforces the committee's height range.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::state::validator::ValidatorSet;

/// Upstream chain interface used by a committee to produce and commit blocks.
pub trait AgentProxy: Send + Sync {
    /// Ask the chain for a block proposal at `height`.
    fn fetch_block(&self, committee_id: u64, height: u64) -> Result<Vec<u8>>;

    /// Check a proposed block against chain state.
    fn verify_block(&self, committee_id: u64, block: &[u8]) -> Result<()>;

    /// Hand a finalized block back to the chain.
    fn commit_block(&self, committee_id: u64, height: u64, block: &[u8]) -> Result<()>;
}

/// Errors raised by a [`StateAgent`].
#[derive(Debug, thiserror::Error)]
pub enum StateAgentError {
    #[error("validator set is empty")]
    EmptyValidatorSet,

    #[error("chain id is empty")]
    EmptyChainId,

    #[error("height {height} is outside committee range ({base}, {end:?}]")]
    OutOfRange {
        height: u64,
        base: u64,
        end: Option<u64>,
    },

    #[error("agent proxy error: {0}")]
    Proxy(#[from] anyhow::Error),
}

/// [`StateAgent`] tracks a committee's height range and validator set.
pub struct StateAgent {
    agent: Arc<dyn AgentProxy>,
    chain_id: String,
    validators: ValidatorSet,
    /// Last height committed before this committee took over
    base_height: u64,
    committee_id: u64,
    /// Last height this committee is responsible for, once known
    end_height: RwLock<Option<u64>>,
}

impl StateAgent {
    pub fn new(
        agent: Arc<dyn AgentProxy>,
        chain_id: impl Into<String>,
        validators: ValidatorSet,
        base_height: u64,
        committee_id: u64,
    ) -> Result<Self, StateAgentError> {
        let chain_id = chain_id.into();
        if chain_id.is_empty() {
            return Err(StateAgentError::EmptyChainId);
        }
        if validators.is_empty() {
            return Err(StateAgentError::EmptyValidatorSet);
        }
        Ok(Self {
            agent,
            chain_id,
            validators,
            base_height,
            committee_id,
            end_height: RwLock::new(None),
        })
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn committee_id(&self) -> u64 {
        self.committee_id
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn base_height(&self) -> u64 {
        self.base_height
    }

    /// Mark the last height this committee produces.
    pub fn set_end_height(&self, height: u64) {
        *self.end_height.write() = Some(height);
    }

    pub fn end_height(&self) -> Option<u64> {
        *self.end_height.read()
    }

    /// Whether `height` falls in this committee's range.
    pub fn is_in_range(&self, height: u64) -> bool {
        height > self.base_height && self.end_height().is_none_or(|end| height <= end)
    }

    /// Whether the committee has committed its final height.
    pub fn is_terminated(&self, committed_height: u64) -> bool {
        self.end_height()
            .is_some_and(|end| committed_height >= end)
    }

    pub fn make_block(&self, height: u64) -> Result<Vec<u8>, StateAgentError> {
        self.check_range(height)?;
        Ok(self.agent.fetch_block(self.committee_id, height)?)
    }

    pub fn validate_block(&self, block: &[u8]) -> Result<(), StateAgentError> {
        Ok(self.agent.verify_block(self.committee_id, block)?)
    }

    pub fn commit_block(&self, height: u64, block: &[u8]) -> Result<(), StateAgentError> {
        self.check_range(height)?;
        Ok(self.agent.commit_block(self.committee_id, height, block)?)
    }

    fn check_range(&self, height: u64) -> Result<(), StateAgentError> {
        if self.is_in_range(height) {
            Ok(())
        } else {
            Err(StateAgentError::OutOfRange {
                height,
                base: self.base_height,
                end: self.end_height(),
            })
        }
    }
}
