//! Settlement policy configuration.
//!
//! Every knob has a default, so an absent or empty TOML file yields the
//! production policy. Secrets (database URL, gateway server key, JWT and
//! cron secrets) never live here; they come from the CLI / environment.
//!
//! ```toml
//! commission_bps = 1000
//! security_hold_days = 5
//! review_window_days = 14
//! default_revision_limit = 3
//! min_withdrawal = 100000
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::ledger::{CommissionRate, BPS_DENOMINATOR};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Platform commission in basis points taken from each milestone.
    pub commission_bps: u32,
    /// Days a released payment stays out of the withdrawable balance.
    pub security_hold_days: i64,
    /// Days a client has to review a submission before auto-release.
    pub review_window_days: i64,
    pub default_revision_limit: i32,
    pub min_withdrawal: i64,
    pub min_proposal_budget: i64,
    pub min_cover_letter_chars: usize,
    pub sweep_interval_secs: u64,
    /// Upper bound on milestones examined by a single sweep pass.
    pub sweep_batch_limit: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            commission_bps: 1_000,
            security_hold_days: 5,
            review_window_days: 14,
            default_revision_limit: 3,
            min_withdrawal: 100_000,
            min_proposal_budget: 500_000,
            min_cover_letter_chars: 50,
            sweep_interval_secs: 3_600,
            sweep_batch_limit: 500,
        }
    }
}

impl EngineConfig {
    pub fn commission(&self) -> CommissionRate {
        // validate() has already bounded the rate
        CommissionRate::from_bps(self.commission_bps).unwrap_or_default()
    }

    pub fn review_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.review_window_days)
    }

    pub fn security_hold(&self) -> chrono::Duration {
        chrono::Duration::days(self.security_hold_days)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.commission_bps >= BPS_DENOMINATOR {
            anyhow::bail!(
                "commission_bps must be below {}, got {}",
                BPS_DENOMINATOR,
                self.commission_bps
            );
        }
        if self.review_window_days <= 0 {
            anyhow::bail!("review_window_days must be positive");
        }
        if self.security_hold_days < 0 {
            anyhow::bail!("security_hold_days cannot be negative");
        }
        if self.default_revision_limit < 0 {
            anyhow::bail!("default_revision_limit cannot be negative");
        }
        if self.min_withdrawal <= 0 || self.min_proposal_budget <= 0 {
            anyhow::bail!("minimum amounts must be positive");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be positive");
        }
        if self.sweep_batch_limit <= 0 {
            anyhow::bail!("sweep_batch_limit must be positive");
        }
        Ok(())
    }
}

pub fn parse_toml(content: &str) -> Result<EngineConfig> {
    let config: EngineConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load the policy from `path`, or the defaults when no path is given.
pub fn load(path: Option<&std::path::Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("failed to read config {}: {}", path.display(), e)
            })?;
            parse_toml(&content)
        }
        None => Ok(EngineConfig::default()),
    }
}
