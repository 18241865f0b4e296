//! Proposal submission, rejection and engagement formation.
//!
//! Formation is the riskiest unit in the store: if the project stayed OPEN
//! after milestones were written, a second proposal could be accepted. The
//! project row is therefore locked first and flipped to IN_PROGRESS with a
//! compare-and-swap in the same transaction that writes the milestones.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use super::projects::lock_project;
use super::{is_unique_violation, Database, Engagement, MilestoneRow, ProposalRow};
use crate::error::{EngineError, EngineResult};
use crate::milestone::MilestoneStatus;
use crate::project::{self, ProjectEvent, ProjectStatus};
use crate::proposal::{ProposalDraft, ProposalStatus};

impl Database {
    pub async fn insert_proposal(
        &self,
        project_id: Uuid,
        analyst_id: Uuid,
        draft: &ProposalDraft,
    ) -> EngineResult<ProposalRow> {
        let mut tx = self.pool.begin().await?;

        let status: Option<ProjectStatus> =
            sqlx::query_scalar("SELECT status FROM projects WHERE id = $1 FOR SHARE")
                .bind(project_id)
                .fetch_optional(&mut *tx)
                .await?;
        match status {
            None => return Err(EngineError::not_found("project", project_id)),
            Some(ProjectStatus::Open) => {}
            Some(other) => {
                return Err(EngineError::precondition(format!(
                    "project is {}, not accepting proposals",
                    other
                )))
            }
        }

        sqlx::query("INSERT INTO analyst_profiles (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(analyst_id)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query_as::<_, ProposalRow>(
            "INSERT INTO proposals (id, project_id, analyst_id, cover_letter,
                                    proposed_budget, proposed_days, milestones, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING')
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(analyst_id)
        .bind(draft.cover_letter.trim())
        .bind(draft.proposed_budget)
        .bind(draft.proposed_days)
        .bind(Json(&draft.milestones))
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                return Err(EngineError::precondition(
                    "a proposal from this analyst already exists for the project",
                ))
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;
        Ok(row)
    }

    pub async fn get_proposal(&self, proposal_id: Uuid) -> EngineResult<Option<ProposalRow>> {
        let row = sqlx::query_as::<_, ProposalRow>("SELECT * FROM proposals WHERE id = $1")
            .bind(proposal_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_proposals(&self, project_id: Uuid) -> EngineResult<Vec<ProposalRow>> {
        let rows = sqlx::query_as::<_, ProposalRow>(
            "SELECT * FROM proposals WHERE project_id = $1 ORDER BY created_at",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn reject_proposal(
        &self,
        project_id: Uuid,
        proposal_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<ProposalRow> {
        let mut tx = self.pool.begin().await?;
        let project = lock_project(&mut tx, project_id).await?;
        if project.status != ProjectStatus::Open {
            return Err(EngineError::precondition(format!(
                "project is {}, proposals can no longer be rejected",
                project.status
            )));
        }
        let row = sqlx::query_as::<_, ProposalRow>(
            "UPDATE proposals SET status = 'REJECTED', responded_at = $3
             WHERE id = $1 AND project_id = $2 AND status = 'PENDING'
             RETURNING *",
        )
        .bind(proposal_id)
        .bind(project_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(self.proposal_miss(project_id, proposal_id).await);
        };
        tx.commit().await?;
        Ok(row)
    }

    /// Accept a proposal and turn it into a running engagement.
    ///
    /// All of it commits or none of it does: the accepted proposal, the
    /// rejection of every other pending proposal, the hire, and one milestone
    /// per descriptor with the first already IN_PROGRESS.
    pub async fn form_engagement(
        &self,
        project_id: Uuid,
        proposal_id: Uuid,
        revision_limit: i32,
        now: DateTime<Utc>,
    ) -> EngineResult<Engagement> {
        let mut tx = self.pool.begin().await?;

        let project = lock_project(&mut tx, project_id).await?;
        let next = project::transition(project.status, ProjectEvent::Hire)?;

        let proposal = sqlx::query_as::<_, ProposalRow>(
            "SELECT * FROM proposals WHERE id = $1 AND project_id = $2 FOR UPDATE",
        )
        .bind(proposal_id)
        .bind(project_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("proposal", proposal_id))?;
        if proposal.status != ProposalStatus::Pending {
            return Err(EngineError::precondition(format!(
                "proposal is {}, not PENDING",
                proposal.status
            )));
        }

        let proposal = sqlx::query_as::<_, ProposalRow>(
            "UPDATE proposals SET status = 'ACCEPTED', responded_at = $2
             WHERE id = $1 AND status = 'PENDING'
             RETURNING *",
        )
        .bind(proposal_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let rejected = sqlx::query(
            "UPDATE proposals SET status = 'REJECTED', responded_at = $3
             WHERE project_id = $1 AND id <> $2 AND status = 'PENDING'",
        )
        .bind(project_id)
        .bind(proposal_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let project = sqlx::query_as::<_, super::ProjectRow>(
            "UPDATE projects
             SET status = $2, hired_analyst_id = $3, hired_at = $4, updated_at = now()
             WHERE id = $1 AND status = 'OPEN'
             RETURNING *",
        )
        .bind(project_id)
        .bind(next)
        .bind(proposal.analyst_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::precondition("project is no longer OPEN"))?;

        let mut milestones = Vec::with_capacity(proposal.milestones.0.len());
        for (index, descriptor) in proposal.milestones.0.iter().enumerate() {
            let status = if index == 0 {
                MilestoneStatus::InProgress
            } else {
                MilestoneStatus::Pending
            };
            let row = sqlx::query_as::<_, MilestoneRow>(
                "INSERT INTO milestones (id, project_id, title, description, amount,
                                         sort_order, status, due_date, revision_limit)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(project_id)
            .bind(&descriptor.title)
            .bind(&descriptor.description)
            .bind(descriptor.amount)
            .bind(index as i32)
            .bind(status)
            .bind(descriptor.due_date)
            .bind(revision_limit)
            .fetch_one(&mut *tx)
            .await?;
            milestones.push(row);
        }

        tx.commit().await?;
        Ok(Engagement {
            project,
            proposal,
            milestones,
            rejected_proposals: rejected,
        })
    }

    /// Explain why a proposal update matched no row.
    async fn proposal_miss(&self, project_id: Uuid, proposal_id: Uuid) -> EngineError {
        match self.get_proposal(proposal_id).await {
            Ok(Some(p)) if p.project_id == project_id => {
                EngineError::precondition(format!("proposal is {}, not PENDING", p.status))
            }
            Ok(_) => EngineError::not_found("proposal", proposal_id),
            Err(e) => e,
        }
    }
}
