//! # Ledger: Money Primitives and the Derived Balance View
//!
//! All amounts are integer minor-currency units (`i64`, rupiah for IDR).
//! No floating point touches money anywhere in the crate.
//!
//! ## Fee split
//!
//! `fee = floor(gross × bps / 10_000)`, `net = gross − fee`. Flooring the fee
//! means `fee + net == gross` for every gross value, so a split can never
//! create or lose currency.
//!
//! ## Balance
//!
//! An analyst's balance is never stored. [`AnalystBalance`] is assembled from
//! four sums read out of the escrow and withdrawal tables in one statement
//! (see `db::ledger`).

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub const BPS_DENOMINATOR: u32 = 10_000;

/// Platform commission expressed in basis points (1000 = 10%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRate {
    bps: u32,
}

impl CommissionRate {
    pub fn from_bps(bps: u32) -> EngineResult<Self> {
        if bps >= BPS_DENOMINATOR {
            return Err(EngineError::validation(format!(
                "commission must be below 100%, got {} bps",
                bps
            )));
        }
        Ok(Self { bps })
    }

    pub fn bps(&self) -> u32 {
        self.bps
    }

    /// Platform fee on `gross`, floored.
    pub fn fee_on(&self, gross: i64) -> i64 {
        // i128 keeps gross × bps exact for any i64 gross.
        ((gross as i128 * self.bps as i128) / BPS_DENOMINATOR as i128) as i64
    }
}

impl Default for CommissionRate {
    fn default() -> Self {
        Self { bps: 1_000 }
    }
}

/// Result of splitting a gross milestone amount into platform fee and analyst net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeSplit {
    pub gross: i64,
    pub fee: i64,
    pub net: i64,
}

pub fn split_fee(gross: i64, rate: CommissionRate) -> EngineResult<FeeSplit> {
    if gross <= 0 {
        return Err(EngineError::validation(format!(
            "gross amount must be positive, got {}",
            gross
        )));
    }
    let fee = rate.fee_on(gross);
    Ok(FeeSplit {
        gross,
        fee,
        net: gross - fee,
    })
}

/// Sum amounts, returning `None` on overflow.
pub fn checked_total<I>(amounts: I) -> Option<i64>
where
    I: IntoIterator<Item = i64>,
{
    amounts
        .into_iter()
        .try_fold(0i64, |acc, amount| acc.checked_add(amount))
}

/// Analyst balance computed from released escrow and withdrawal history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalystBalance {
    /// Net of every RELEASED escrow paid to the analyst.
    pub total: i64,
    /// Part of `total` still inside its security hold.
    pub on_hold: i64,
    /// Net of COMPLETED withdrawals.
    pub withdrawn: i64,
    /// Net of PENDING and PROCESSING withdrawals.
    pub pending: i64,
    /// What a new withdrawal may draw on.
    pub available: i64,
}

impl AnalystBalance {
    pub fn from_sums(total: i64, on_hold: i64, withdrawn: i64, pending: i64) -> Self {
        Self {
            total,
            on_hold,
            withdrawn,
            pending,
            available: total - on_hold - withdrawn - pending,
        }
    }

    /// Check a prospective withdrawal against this balance and the minimum.
    pub fn check_withdrawal(&self, amount: i64, minimum: i64) -> EngineResult<()> {
        if amount < minimum {
            return Err(EngineError::BelowMinimumAmount {
                minimum,
                requested: amount,
            });
        }
        if amount > self.available {
            return Err(EngineError::InsufficientBalance {
                requested: amount,
                available: self.available.max(0),
            });
        }
        Ok(())
    }
}

/// Format an IDR amount for user-facing messages: `Rp 1.250.000`.
pub fn format_rupiah(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-Rp {}", grouped)
    } else {
        format!("Rp {}", grouped)
    }
}
