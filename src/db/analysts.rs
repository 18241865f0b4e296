use uuid::Uuid;

use super::{AnalystProfileRow, Database};
use crate::error::EngineResult;
use crate::withdrawal::PayoutDetails;

impl Database {
    pub async fn get_analyst_profile(
        &self,
        analyst_id: Uuid,
    ) -> EngineResult<Option<AnalystProfileRow>> {
        let row = sqlx::query_as::<_, AnalystProfileRow>(
            "SELECT * FROM analyst_profiles WHERE user_id = $1",
        )
        .bind(analyst_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Store the payout destination. Existing withdrawals keep the snapshot
    /// taken when they were requested.
    pub async fn set_payout_details(
        &self,
        analyst_id: Uuid,
        details: &PayoutDetails,
    ) -> EngineResult<AnalystProfileRow> {
        let trimmed = |f: &Option<String>| f.as_deref().map(|s| s.trim().to_string());
        let row = sqlx::query_as::<_, AnalystProfileRow>(
            "INSERT INTO analyst_profiles (user_id, bank_name, bank_account_number, bank_account_name)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id) DO UPDATE
             SET bank_name = EXCLUDED.bank_name,
                 bank_account_number = EXCLUDED.bank_account_number,
                 bank_account_name = EXCLUDED.bank_account_name,
                 updated_at = now()
             RETURNING *",
        )
        .bind(analyst_id)
        .bind(trimmed(&details.bank_name))
        .bind(trimmed(&details.account_number))
        .bind(trimmed(&details.account_name))
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
