//! Withdrawal requests and their administrative lifecycle.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::ledger::balance_on;
use super::{AnalystProfileRow, Database, WithdrawalRow};
use crate::error::{EngineError, EngineResult};
use crate::withdrawal::{self, WithdrawalAction, WithdrawalStatus, DEFAULT_FAILURE_REASON};

/// Admin listing filter. Defaults to the 50 most recent of any status.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WithdrawalFilter {
    pub status: Option<WithdrawalStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for WithdrawalFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl Database {
    /// Create a PENDING withdrawal if the balance covers it.
    ///
    /// The analyst's profile row is locked first, so two concurrent requests
    /// from the same analyst serialise and the second sees the first one's
    /// pending amount in its balance.
    pub async fn request_withdrawal(
        &self,
        analyst_id: Uuid,
        amount: i64,
        minimum: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<WithdrawalRow> {
        let mut tx = self.pool.begin().await?;

        let profile = sqlx::query_as::<_, AnalystProfileRow>(
            "SELECT * FROM analyst_profiles WHERE user_id = $1 FOR UPDATE",
        )
        .bind(analyst_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::precondition("analyst has no profile yet"))?;

        let details = profile.payout_details();
        if !details.is_complete() {
            return Err(EngineError::precondition(
                "payout bank details must be completed before withdrawing",
            ));
        }

        let balance = balance_on(&mut *tx, analyst_id, now).await?;
        balance.check_withdrawal(amount, minimum)?;

        let fee = withdrawal::withdrawal_fee(amount);
        let row = sqlx::query_as::<_, WithdrawalRow>(
            "INSERT INTO withdrawals (id, analyst_id, amount, fee, net_amount, bank_name,
                                      account_number, account_name, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', $9)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(analyst_id)
        .bind(amount)
        .bind(fee)
        .bind(amount - fee)
        .bind(details.bank_name.unwrap_or_default().trim())
        .bind(details.account_number.unwrap_or_default().trim())
        .bind(details.account_name.unwrap_or_default().trim())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    pub async fn get_withdrawal(&self, withdrawal_id: Uuid) -> EngineResult<Option<WithdrawalRow>> {
        let row = sqlx::query_as::<_, WithdrawalRow>("SELECT * FROM withdrawals WHERE id = $1")
            .bind(withdrawal_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_withdrawals_for_analyst(
        &self,
        analyst_id: Uuid,
    ) -> EngineResult<Vec<WithdrawalRow>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT * FROM withdrawals WHERE analyst_id = $1 ORDER BY created_at DESC",
        )
        .bind(analyst_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_withdrawals(&self, filter: &WithdrawalFilter) -> EngineResult<Vec<WithdrawalRow>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT * FROM withdrawals
             WHERE ($1::TEXT IS NULL OR status = $1)
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.clamp(1, 500))
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Apply an administrative action, re-validating the current status
    /// under a row lock.
    pub async fn transition_withdrawal(
        &self,
        withdrawal_id: Uuid,
        action: WithdrawalAction,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<WithdrawalRow> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT * FROM withdrawals WHERE id = $1 FOR UPDATE",
        )
        .bind(withdrawal_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("withdrawal", withdrawal_id))?;

        let next = withdrawal::transition(current.status, action)?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_FAILURE_REASON);
        let row = sqlx::query_as::<_, WithdrawalRow>(
            "UPDATE withdrawals
             SET status = $2,
                 processed_at = CASE WHEN $2 IN ('PROCESSING', 'FAILED') THEN $3
                                     ELSE processed_at END,
                 completed_at = CASE WHEN $2 = 'COMPLETED' THEN $3 ELSE completed_at END,
                 failure_reason = CASE WHEN $2 = 'FAILED' THEN $5 ELSE failure_reason END
             WHERE id = $1 AND status = $4
             RETURNING *",
        )
        .bind(withdrawal_id)
        .bind(next)
        .bind(now)
        .bind(current.status)
        .bind(reason)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }
}
