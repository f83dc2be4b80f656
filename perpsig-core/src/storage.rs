//! Persistence port for bot state.
//!
//! A store holds one [`BotState`] document: the open positions, the closed
//! trade history and the risk-gate state. `save` replaces the whole
//! document, so saving the same state twice is a no-op in effect.

use crate::domain::{Position, Trade};
use crate::risk::RiskState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub trades: Vec<Trade>,
    #[serde(default)]
    pub risk: Option<RiskState>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("state file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub trait StateStore: Send {
    /// Load the stored state; an empty store yields `BotState::default()`.
    fn load(&self) -> Result<BotState, StoreError>;

    fn save(&mut self, state: &BotState) -> Result<(), StoreError>;
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Option<BotState>,
    saves: usize,
    fail_saves: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: BotState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// A store whose saves always fail.
    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves
    }

    pub fn snapshot(&self) -> Option<&BotState> {
        self.state.as_ref()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<BotState, StoreError> {
        Ok(self.state.clone().unwrap_or_default())
    }

    fn save(&mut self, state: &BotState) -> Result<(), StoreError> {
        if self.fail_saves {
            return Err(StoreError::Unavailable("memory store set to fail".into()));
        }
        self.state = Some(state.clone());
        self.saves += 1;
        Ok(())
    }
}
