//! The analyst balance, derived on every read from escrow and withdrawal rows.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Database;
use crate::error::EngineResult;
use crate::ledger::AnalystBalance;

const BALANCE_SQL: &str = "
    SELECT
        (SELECT COALESCE(SUM(net_amount), 0)::BIGINT FROM escrow_transactions
          WHERE analyst_id = $1 AND status = 'RELEASED') AS total,
        (SELECT COALESCE(SUM(net_amount), 0)::BIGINT FROM escrow_transactions
          WHERE analyst_id = $1 AND status = 'RELEASED' AND available_at > $2) AS on_hold,
        (SELECT COALESCE(SUM(amount), 0)::BIGINT FROM withdrawals
          WHERE analyst_id = $1 AND status = 'COMPLETED') AS withdrawn,
        (SELECT COALESCE(SUM(amount), 0)::BIGINT FROM withdrawals
          WHERE analyst_id = $1 AND status IN ('PENDING', 'PROCESSING')) AS pending";

/// Compute the balance on any connection, so a withdrawal request can read it
/// inside the transaction that holds the analyst's profile lock.
pub(super) async fn balance_on<'e, E>(
    executor: E,
    analyst_id: Uuid,
    now: DateTime<Utc>,
) -> EngineResult<AnalystBalance>
where
    E: sqlx::PgExecutor<'e>,
{
    let (total, on_hold, withdrawn, pending): (i64, i64, i64, i64) = sqlx::query_as(BALANCE_SQL)
        .bind(analyst_id)
        .bind(now)
        .fetch_one(executor)
        .await?;
    Ok(AnalystBalance::from_sums(total, on_hold, withdrawn, pending))
}

impl Database {
    pub async fn analyst_balance(
        &self,
        analyst_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<AnalystBalance> {
        balance_on(&self.pool, analyst_id, now).await
    }
}
