//! Milestone review workflow.
//!
//! [`Database::approve_and_release`] is shared by client approval, the
//! auto-release sweep and nothing else. It is the only code path that moves
//! a milestone to APPROVED, and it releases the escrow, starts the next
//! milestone and completes the project inside the same transaction.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::escrow::lock_escrow_for_milestone;
use super::projects::lock_project;
use super::{ApprovalOutcome, Database, DueMilestone, MilestoneRow, Settlement};
use crate::error::{EngineError, EngineResult};
use crate::escrow::{self, EscrowEvent, EscrowStatus};
use crate::milestone::{self, MilestoneAction, MilestoneStatus};
use crate::project::{self, ProjectEvent, ProjectStatus};

pub(super) async fn lock_milestone(
    conn: &mut sqlx::PgConnection,
    milestone_id: Uuid,
) -> EngineResult<MilestoneRow> {
    sqlx::query_as::<_, MilestoneRow>("SELECT * FROM milestones WHERE id = $1 FOR UPDATE")
        .bind(milestone_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| EngineError::not_found("milestone", milestone_id))
}

async fn require_project_in_progress(
    conn: &mut sqlx::PgConnection,
    project_id: Uuid,
) -> EngineResult<()> {
    let status: ProjectStatus = sqlx::query_scalar("SELECT status FROM projects WHERE id = $1")
        .bind(project_id)
        .fetch_one(conn)
        .await?;
    if status != ProjectStatus::InProgress {
        return Err(EngineError::precondition(format!(
            "project is {}, milestones are frozen",
            status
        )));
    }
    Ok(())
}

impl Database {
    pub async fn get_milestone(&self, milestone_id: Uuid) -> EngineResult<Option<MilestoneRow>> {
        let row = sqlx::query_as::<_, MilestoneRow>("SELECT * FROM milestones WHERE id = $1")
            .bind(milestone_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_milestones(&self, project_id: Uuid) -> EngineResult<Vec<MilestoneRow>> {
        let rows = sqlx::query_as::<_, MilestoneRow>(
            "SELECT * FROM milestones WHERE project_id = $1 ORDER BY sort_order",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Analyst hands in work. Starts (or restarts) the review window.
    pub async fn submit_milestone(
        &self,
        milestone_id: Uuid,
        now: DateTime<Utc>,
        review_window: Duration,
    ) -> EngineResult<MilestoneRow> {
        let mut tx = self.pool.begin().await?;
        let current = lock_milestone(&mut tx, milestone_id).await?;
        require_project_in_progress(&mut tx, current.project_id).await?;
        let next = milestone::transition(current.status, MilestoneAction::Submit, current.revisions())?;
        let deadline = milestone::auto_release_deadline(now, review_window);
        let row = sqlx::query_as::<_, MilestoneRow>(
            "UPDATE milestones
             SET status = $2, submitted_at = $3, auto_release_at = $4, updated_at = now()
             WHERE id = $1 AND status = $5
             RETURNING *",
        )
        .bind(milestone_id)
        .bind(next)
        .bind(now)
        .bind(deadline)
        .bind(current.status)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Client sends a submission back. The review clock stops until the next
    /// submission.
    pub async fn request_revision(&self, milestone_id: Uuid) -> EngineResult<MilestoneRow> {
        let mut tx = self.pool.begin().await?;
        let current = lock_milestone(&mut tx, milestone_id).await?;
        require_project_in_progress(&mut tx, current.project_id).await?;
        let next = milestone::transition(
            current.status,
            MilestoneAction::RequestRevision,
            current.revisions(),
        )?;
        let row = sqlx::query_as::<_, MilestoneRow>(
            "UPDATE milestones
             SET status = $2, revision_count = revision_count + 1,
                 auto_release_at = NULL, updated_at = now()
             WHERE id = $1 AND status = $3
             RETURNING *",
        )
        .bind(milestone_id)
        .bind(next)
        .bind(current.status)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    pub async fn escalate_dispute(&self, milestone_id: Uuid) -> EngineResult<MilestoneRow> {
        let mut tx = self.pool.begin().await?;
        let current = lock_milestone(&mut tx, milestone_id).await?;
        let next = milestone::transition(current.status, MilestoneAction::Dispute, current.revisions())?;
        let row = sqlx::query_as::<_, MilestoneRow>(
            "UPDATE milestones
             SET status = $2, auto_release_at = NULL, updated_at = now()
             WHERE id = $1 AND status = $3
             RETURNING *",
        )
        .bind(milestone_id)
        .bind(next)
        .bind(current.status)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Approve a SUBMITTED milestone and release its escrow, atomically.
    ///
    /// A milestone that is no longer SUBMITTED once locked yields
    /// [`ApprovalOutcome::NotSubmitted`] without writing anything; this is
    /// how the loser of an approve / auto-release race backs out. Locks are
    /// taken milestone, escrow, project. Nothing settles on a project that
    /// is no longer IN_PROGRESS.
    pub async fn approve_and_release(
        &self,
        milestone_id: Uuid,
        now: DateTime<Utc>,
        security_hold: Duration,
    ) -> EngineResult<ApprovalOutcome> {
        let mut tx = self.pool.begin().await?;

        let current = lock_milestone(&mut tx, milestone_id).await?;
        if current.status != MilestoneStatus::Submitted {
            return Ok(ApprovalOutcome::NotSubmitted(current.status));
        }
        let escrow = match lock_escrow_for_milestone(&mut tx, milestone_id).await? {
            Some(e) if e.status == EscrowStatus::Escrowed => e,
            other => return Ok(ApprovalOutcome::NotFunded(other.map(|e| e.status))),
        };
        let project = lock_project(&mut tx, current.project_id).await?;
        if project.status != ProjectStatus::InProgress {
            return Ok(ApprovalOutcome::ProjectClosed(project.status));
        }

        let approved =
            milestone::transition(current.status, MilestoneAction::Approve, current.revisions())?;
        let released = escrow::transition(escrow.status, EscrowEvent::Released)?;

        let milestone = sqlx::query_as::<_, MilestoneRow>(
            "UPDATE milestones
             SET status = $2, approved_at = $3, auto_release_at = NULL, updated_at = now()
             WHERE id = $1 AND status = 'SUBMITTED'
             RETURNING *",
        )
        .bind(milestone_id)
        .bind(approved)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::precondition("milestone changed while locked"))?;

        let escrow = sqlx::query_as::<_, super::EscrowRow>(
            "UPDATE escrow_transactions
             SET status = $2, released_at = $3, available_at = $4, updated_at = now()
             WHERE id = $1 AND status = 'ESCROWED'
             RETURNING *",
        )
        .bind(escrow.id)
        .bind(released)
        .bind(now)
        .bind(now + security_hold)
        .fetch_one(&mut *tx)
        .await?;

        let following = sqlx::query_as::<_, MilestoneRow>(
            "SELECT * FROM milestones
             WHERE project_id = $1 AND sort_order > $2
             ORDER BY sort_order
             LIMIT 1
             FOR UPDATE",
        )
        .bind(milestone.project_id)
        .bind(milestone.sort_order)
        .fetch_optional(&mut *tx)
        .await?;

        let mut next_milestone = None;
        if let Some(following) = following {
            if following.status == MilestoneStatus::Pending {
                let started = milestone::transition(
                    following.status,
                    MilestoneAction::Start,
                    following.revisions(),
                )?;
                let row = sqlx::query_as::<_, MilestoneRow>(
                    "UPDATE milestones SET status = $2, updated_at = now()
                     WHERE id = $1 AND status = 'PENDING'
                     RETURNING *",
                )
                .bind(following.id)
                .bind(started)
                .fetch_one(&mut *tx)
                .await?;
                next_milestone = Some(row);
            }
        }

        let unsettled: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM milestones WHERE project_id = $1 AND status <> 'APPROVED'",
        )
        .bind(milestone.project_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut project_completed = false;
        if unsettled == 0 {
            let completed = project::transition(project.status, ProjectEvent::Complete)?;
            sqlx::query(
                "UPDATE projects SET status = $2, completed_at = $3, updated_at = now()
                 WHERE id = $1 AND status = 'IN_PROGRESS'",
            )
            .bind(project.id)
            .bind(completed)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            if let Some(analyst_id) = project.hired_analyst_id {
                sqlx::query(
                    "INSERT INTO analyst_profiles (user_id, completed_projects) VALUES ($1, 1)
                     ON CONFLICT (user_id) DO UPDATE
                     SET completed_projects = analyst_profiles.completed_projects + 1,
                         updated_at = now()",
                )
                .bind(analyst_id)
                .execute(&mut *tx)
                .await?;
            }
            project_completed = true;
        }

        tx.commit().await?;
        Ok(ApprovalOutcome::Settled(Box::new(Settlement {
            milestone,
            escrow,
            next_milestone,
            project_completed,
            project_title: project.title,
        })))
    }

    /// Funded SUBMITTED milestones of running projects whose review window
    /// closed at or before `now`, oldest deadline first.
    pub async fn list_due_auto_releases(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> EngineResult<Vec<DueMilestone>> {
        let rows = sqlx::query_as::<_, DueMilestone>(
            "SELECT m.id, m.project_id, m.title, m.auto_release_at
             FROM milestones m
             JOIN projects p ON p.id = m.project_id
             JOIN escrow_transactions e ON e.milestone_id = m.id AND e.status = 'ESCROWED'
             WHERE m.status = 'SUBMITTED'
               AND m.auto_release_at <= $1
               AND p.status = 'IN_PROGRESS'
             ORDER BY m.auto_release_at
             LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
