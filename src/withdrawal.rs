//! Analyst payout requests.
//!
//! A withdrawal is created PENDING by the analyst and then walked through
//! PROCESSING to COMPLETED by an administrator. Rejection is possible while
//! the payout is still in flight. PROCESSING is never skipped.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

status_enum! {
    pub enum WithdrawalStatus {
        Pending => "PENDING",
        Processing => "PROCESSING",
        Completed => "COMPLETED",
        Failed => "FAILED",
    }
}

impl WithdrawalStatus {
    /// Counted against the analyst's available balance.
    pub fn is_in_flight(self) -> bool {
        matches!(self, WithdrawalStatus::Pending | WithdrawalStatus::Processing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalAction {
    Approve,
    Complete,
    Reject,
}

impl std::str::FromStr for WithdrawalAction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(WithdrawalAction::Approve),
            "complete" => Ok(WithdrawalAction::Complete),
            "reject" => Ok(WithdrawalAction::Reject),
            other => Err(EngineError::validation(format!(
                "unknown withdrawal action '{}'",
                other
            ))),
        }
    }
}

pub fn transition(
    from: WithdrawalStatus,
    action: WithdrawalAction,
) -> EngineResult<WithdrawalStatus> {
    use WithdrawalAction::*;
    use WithdrawalStatus::*;
    match (from, action) {
        (Pending, Approve) => Ok(Processing),
        (Processing, Complete) => Ok(Completed),
        (Pending | Processing, Reject) => Ok(Failed),
        (from, action) => Err(EngineError::precondition(format!(
            "withdrawal cannot {:?} while {}",
            action, from
        ))),
    }
}

pub const DEFAULT_FAILURE_REASON: &str = "Rejected by admin";

/// Flat payout fee. Payouts are currently free.
pub fn withdrawal_fee(_amount: i64) -> i64 {
    0
}

/// Destination bank account, snapshotted onto each withdrawal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutDetails {
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
}

fn filled(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl PayoutDetails {
    pub fn is_complete(&self) -> bool {
        filled(&self.bank_name) && filled(&self.account_number) && filled(&self.account_name)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !self.is_complete() {
            return Err(EngineError::validation(
                "bank name, account number and account holder are all required",
            ));
        }
        let number = self.account_number.as_deref().unwrap_or_default().trim();
        if !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(EngineError::validation("account number must be digits only"));
        }
        Ok(())
    }
}
