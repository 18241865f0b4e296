//! Escrow persistence: charge attempts, gateway notifications and the
//! stand-alone release used to repair an approved-but-unreleased milestone.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::milestones::lock_milestone;
use super::projects::lock_project;
use super::{CallbackOutcome, Database, EscrowRow, MilestoneRow, PreparedCharge, ProjectRow, ReleaseOutcome};
use crate::error::{EngineError, EngineResult};
use crate::escrow::{self, CallbackDecision, EscrowEvent, EscrowStatus, GatewayOutcome};
use crate::gateway::ChargeSession;
use crate::ledger::FeeSplit;
use crate::milestone::{self, MilestoneAction, MilestoneStatus};
use crate::project::ProjectStatus;

pub(super) async fn lock_escrow_for_milestone(
    conn: &mut sqlx::PgConnection,
    milestone_id: Uuid,
) -> EngineResult<Option<EscrowRow>> {
    let row = sqlx::query_as::<_, EscrowRow>(
        "SELECT * FROM escrow_transactions WHERE milestone_id = $1 FOR UPDATE",
    )
    .bind(milestone_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Gateway-reported details stored alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct NotificationDetails {
    pub gross_amount: i64,
    pub payment_method: Option<String>,
    pub gateway_transaction_id: Option<String>,
}

impl Database {
    pub async fn get_escrow_for_milestone(
        &self,
        milestone_id: Uuid,
    ) -> EngineResult<Option<EscrowRow>> {
        let row = sqlx::query_as::<_, EscrowRow>(
            "SELECT * FROM escrow_transactions WHERE milestone_id = $1",
        )
        .bind(milestone_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Number of order references ever issued for an escrow.
    pub async fn count_order_refs(&self, escrow_id: Uuid) -> EngineResult<i64> {
        let n = sqlx::query_scalar("SELECT COUNT(*) FROM escrow_order_refs WHERE escrow_id = $1")
            .bind(escrow_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Record a new charge attempt for a milestone and commit it before the
    /// gateway is contacted. The first attempt creates the escrow row; later
    /// attempts bump its counter and issue a fresh order reference.
    pub async fn prepare_charge(
        &self,
        project: &ProjectRow,
        milestone_id: Uuid,
        split: FeeSplit,
        now: DateTime<Utc>,
    ) -> EngineResult<PreparedCharge> {
        let analyst_id = project
            .hired_analyst_id
            .ok_or_else(|| EngineError::precondition("project has no hired analyst"))?;

        let mut tx = self.pool.begin().await?;
        let milestone = lock_milestone(&mut tx, milestone_id).await?;
        if milestone.project_id != project.id {
            return Err(EngineError::not_found("milestone", milestone_id));
        }
        if matches!(
            milestone.status,
            MilestoneStatus::Approved | MilestoneStatus::Disputed
        ) {
            return Err(EngineError::precondition(format!(
                "milestone is {}, it can no longer be funded",
                milestone.status
            )));
        }

        let escrow = match lock_escrow_for_milestone(&mut tx, milestone_id).await? {
            None => {
                let order_ref = escrow::order_reference(project.id, milestone_id, 1);
                sqlx::query_as::<_, EscrowRow>(
                    "INSERT INTO escrow_transactions
                        (id, milestone_id, project_id, client_id, analyst_id, gross_amount,
                         platform_fee, net_amount, status, attempt, order_ref, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', 1, $9, $10)
                     RETURNING *",
                )
                .bind(Uuid::new_v4())
                .bind(milestone_id)
                .bind(project.id)
                .bind(project.client_id)
                .bind(analyst_id)
                .bind(split.gross)
                .bind(split.fee)
                .bind(split.net)
                .bind(&order_ref)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
            Some(existing) => {
                if existing.status.is_paid() {
                    return Err(EngineError::AlreadyPaid);
                }
                let next = escrow::transition(existing.status, EscrowEvent::Retried)?;
                let attempt = existing.attempt + 1;
                let order_ref = escrow::order_reference(project.id, milestone_id, attempt);
                sqlx::query_as::<_, EscrowRow>(
                    "UPDATE escrow_transactions
                     SET status = $2, attempt = $3, order_ref = $4, snap_token = NULL,
                         redirect_url = NULL, failed_at = NULL, refunded_at = NULL,
                         escrowed_at = NULL, updated_at = now()
                     WHERE id = $1 AND status = $5
                     RETURNING *",
                )
                .bind(existing.id)
                .bind(next)
                .bind(attempt)
                .bind(&order_ref)
                .bind(existing.status)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        sqlx::query(
            "INSERT INTO escrow_order_refs (order_ref, escrow_id, attempt, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&escrow.order_ref)
        .bind(escrow.id)
        .bind(escrow.attempt)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PreparedCharge {
            order_ref: escrow.order_ref.clone(),
            attempt: escrow.attempt,
            escrow,
        })
    }

    /// Store the checkout session, unless a newer attempt has replaced this one.
    pub async fn record_charge_session(
        &self,
        escrow_id: Uuid,
        attempt: i32,
        session: &ChargeSession,
    ) -> EngineResult<bool> {
        let updated = sqlx::query(
            "UPDATE escrow_transactions
             SET snap_token = $3, redirect_url = $4, updated_at = now()
             WHERE id = $1 AND attempt = $2",
        )
        .bind(escrow_id)
        .bind(attempt)
        .bind(&session.token)
        .bind(&session.redirect_url)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    /// Fold one authenticated gateway notification into the escrow.
    pub async fn apply_gateway_notification(
        &self,
        order_ref: &str,
        outcome: GatewayOutcome,
        details: &NotificationDetails,
        now: DateTime<Utc>,
    ) -> EngineResult<CallbackOutcome> {
        let mut tx = self.pool.begin().await?;

        let reference: Option<(Uuid, i32, Uuid)> = sqlx::query_as(
            "SELECT r.escrow_id, r.attempt, e.milestone_id
             FROM escrow_order_refs r
             JOIN escrow_transactions e ON e.id = r.escrow_id
             WHERE r.order_ref = $1",
        )
        .bind(order_ref)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((escrow_id, ref_attempt, milestone_id)) = reference else {
            return Err(EngineError::UnknownOrderReference(order_ref.to_string()));
        };

        let milestone = lock_milestone(&mut tx, milestone_id).await?;
        let escrow = sqlx::query_as::<_, EscrowRow>(
            "SELECT * FROM escrow_transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(escrow_id)
        .fetch_one(&mut *tx)
        .await?;

        if details.gross_amount != escrow.gross_amount {
            return Err(EngineError::precondition(format!(
                "notification amount {} does not match escrow amount {}",
                details.gross_amount, escrow.gross_amount
            )));
        }

        let is_current = ref_attempt == escrow.attempt;
        let next = match escrow::apply_outcome(escrow.status, outcome, is_current) {
            CallbackDecision::NoOp(reason) => {
                let escrow = if outcome == GatewayOutcome::AwaitingPayment && is_current {
                    sqlx::query_as::<_, EscrowRow>(
                        "UPDATE escrow_transactions
                         SET payment_method = COALESCE($2, payment_method), updated_at = now()
                         WHERE id = $1
                         RETURNING *",
                    )
                    .bind(escrow.id)
                    .bind(&details.payment_method)
                    .fetch_one(&mut *tx)
                    .await?
                } else {
                    escrow
                };
                tx.commit().await?;
                return Ok(CallbackOutcome::NoOp { escrow, reason });
            }
            CallbackDecision::Apply(next) => next,
        };

        let previous = escrow.status;
        let stamp_column = match next {
            EscrowStatus::Escrowed => "escrowed_at",
            EscrowStatus::Failed => "failed_at",
            EscrowStatus::Refunded => "refunded_at",
            EscrowStatus::Pending | EscrowStatus::Released => {
                return Err(EngineError::precondition(format!(
                    "gateway cannot move escrow to {}",
                    next
                )))
            }
        };
        let sql = format!(
            "UPDATE escrow_transactions
             SET status = $2, {} = $3,
                 payment_method = COALESCE($4, payment_method),
                 gateway_transaction_id = COALESCE($5, gateway_transaction_id),
                 updated_at = now()
             WHERE id = $1 AND status = $6
             RETURNING *",
            stamp_column
        );
        let escrow = sqlx::query_as::<_, EscrowRow>(&sql)
            .bind(escrow.id)
            .bind(next)
            .bind(now)
            .bind(&details.payment_method)
            .bind(&details.gateway_transaction_id)
            .bind(previous)
            .fetch_one(&mut *tx)
            .await?;

        let mut started_milestone = None;
        if next == EscrowStatus::Escrowed && milestone.status == MilestoneStatus::Pending {
            started_milestone = start_if_next_in_order(&mut tx, &milestone).await?;
        }

        tx.commit().await?;
        Ok(CallbackOutcome::Applied {
            escrow,
            previous,
            started_milestone,
        })
    }

    /// Release the escrow of an already APPROVED milestone. Used to repair a
    /// milestone whose approval predates its release; a RELEASED escrow is
    /// reported as such without writing.
    pub async fn release_escrow(
        &self,
        milestone_id: Uuid,
        now: DateTime<Utc>,
        security_hold: Duration,
    ) -> EngineResult<ReleaseOutcome> {
        let mut tx = self.pool.begin().await?;
        let milestone = lock_milestone(&mut tx, milestone_id).await?;
        let escrow = lock_escrow_for_milestone(&mut tx, milestone_id)
            .await?
            .ok_or_else(|| EngineError::not_found("escrow", milestone_id))?;
        if escrow.status == EscrowStatus::Released {
            return Ok(ReleaseOutcome::AlreadyReleased(escrow));
        }
        if milestone.status != MilestoneStatus::Approved {
            return Err(EngineError::precondition(format!(
                "milestone is {}, not APPROVED",
                milestone.status
            )));
        }
        let next = escrow::transition(escrow.status, EscrowEvent::Released)?;
        let escrow = sqlx::query_as::<_, EscrowRow>(
            "UPDATE escrow_transactions
             SET status = $2, released_at = $3, available_at = $4, updated_at = now()
             WHERE id = $1 AND status = 'ESCROWED'
             RETURNING *",
        )
        .bind(escrow.id)
        .bind(next)
        .bind(now)
        .bind(now + security_hold)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ReleaseOutcome::Released(escrow))
    }
}

/// Start a PENDING milestone whose funding just landed, but only when the
/// project is still running and every earlier milestone is already APPROVED.
async fn start_if_next_in_order(
    conn: &mut sqlx::PgConnection,
    milestone: &MilestoneRow,
) -> EngineResult<Option<Uuid>> {
    let project = lock_project(&mut *conn, milestone.project_id).await?;
    if project.status != ProjectStatus::InProgress {
        return Ok(None);
    }
    let ordered: Vec<(Uuid, MilestoneStatus)> = sqlx::query_as(
        "SELECT id, status FROM milestones WHERE project_id = $1 ORDER BY sort_order",
    )
    .bind(milestone.project_id)
    .fetch_all(&mut *conn)
    .await?;
    let statuses: Vec<MilestoneStatus> = ordered.iter().map(|(_, s)| *s).collect();
    let Some(index) = ordered.iter().position(|(id, _)| *id == milestone.id) else {
        return Ok(None);
    };
    if !milestone::is_next_in_order(&statuses, index) {
        return Ok(None);
    }
    let next = milestone::transition(milestone.status, MilestoneAction::Start, milestone.revisions())?;
    sqlx::query(
        "UPDATE milestones SET status = $2, updated_at = now()
         WHERE id = $1 AND status = 'PENDING'",
    )
    .bind(milestone.id)
    .bind(next)
    .execute(&mut *conn)
    .await?;
    Ok(Some(milestone.id))
}
