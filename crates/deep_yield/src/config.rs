//! Ledger and planner configuration.
//!
//! Load from: env `DEEP_YIELD_CONFIG_PATH`, or `./config/deep_yield.json`, or
//! `./deep_yield.json`. Missing or unreadable files fall back to defaults.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MAX_RISK: u8 = 100;

pub const CONFIG_PATH_ENV: &str = "DEEP_YIELD_CONFIG_PATH";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_risk must be > 0")]
    ZeroRiskBound,
    #[error("floor_pct {floor} exceeds top_pct {top}")]
    FloorAboveTop { floor: u32, top: u32 },
    #[error("min_apy must be >= 0, got {0}")]
    NegativeMinApy(Decimal),
}

/// Target allocation schedule: `max(floor_pct, top_pct - rank * step_pct)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub top_pct: u32,
    pub step_pct: u32,
    pub floor_pct: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            top_pct: 100,
            step_pct: 20,
            floor_pct: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Inclusive upper bound for opportunity risk scores.
    pub max_risk: u8,
    /// APY an opportunity must beat to be picked by `best_opportunity`.
    pub min_apy: Decimal,
    pub planner: PlannerConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_risk: DEFAULT_MAX_RISK,
            min_apy: Decimal::ZERO,
            planner: PlannerConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_risk == 0 {
            return Err(ConfigError::ZeroRiskBound);
        }
        if self.planner.floor_pct > self.planner.top_pct {
            return Err(ConfigError::FloorAboveTop {
                floor: self.planner.floor_pct,
                top: self.planner.top_pct,
            });
        }
        if self.min_apy < Decimal::ZERO {
            return Err(ConfigError::NegativeMinApy(self.min_apy));
        }
        Ok(())
    }

    /// Load config from path. Returns defaults on a missing, malformed, or
    /// invalid file.
    pub fn load_from_path(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        let parsed: Self = match serde_json::from_str(&content) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed config, using defaults");
                return Self::default();
            }
        };
        if let Err(e) = parsed.validate() {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            return Self::default();
        }
        parsed
    }

    /// Load config: env DEEP_YIELD_CONFIG_PATH, then ./config/deep_yield.json, then ./deep_yield.json.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let p = Path::new(&path);
            if p.exists() {
                return Self::load_from_path(p);
            }
            warn!(path = %path, "config path from env does not exist");
        }
        for candidate in [
            Path::new("./config/deep_yield.json"),
            Path::new("./deep_yield.json"),
        ] {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }
        Self::default()
    }
}
