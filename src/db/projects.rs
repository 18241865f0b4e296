//! Project creation, publication and cancellation.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Database, ProjectRow};
use crate::error::{EngineError, EngineResult};
use crate::project::{self, ProjectDraft, ProjectEvent, ProjectStatus};

pub(super) async fn lock_project(
    conn: &mut sqlx::PgConnection,
    project_id: Uuid,
) -> EngineResult<ProjectRow> {
    sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1 FOR UPDATE")
        .bind(project_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| EngineError::not_found("project", project_id))
}

impl Database {
    pub async fn insert_project(
        &self,
        client_id: Uuid,
        draft: &ProjectDraft,
    ) -> EngineResult<ProjectRow> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "INSERT INTO projects (id, client_id, title, description, status,
                                   budget_min, budget_max, deadline)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(client_id)
        .bind(draft.title.trim())
        .bind(&draft.description)
        .bind(draft.initial_status())
        .bind(draft.budget_min)
        .bind(draft.budget_max)
        .bind(draft.deadline)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_project(&self, project_id: Uuid) -> EngineResult<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn publish_project(&self, project_id: Uuid) -> EngineResult<ProjectRow> {
        let mut tx = self.pool.begin().await?;
        let current = lock_project(&mut tx, project_id).await?;
        let next = project::transition(current.status, ProjectEvent::Publish)?;
        let row = sqlx::query_as::<_, ProjectRow>(
            "UPDATE projects SET status = $2, updated_at = now()
             WHERE id = $1 AND status = $3
             RETURNING *",
        )
        .bind(project_id)
        .bind(next)
        .bind(current.status)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Cancel a project. An IN_PROGRESS project may only be cancelled while
    /// none of its escrows hold client funds; its hire is cleared.
    pub async fn cancel_project(
        &self,
        project_id: Uuid,
        allow_in_progress: bool,
        now: DateTime<Utc>,
    ) -> EngineResult<ProjectRow> {
        let mut tx = self.pool.begin().await?;

        // Escrow rows are locked before the project row.
        let held: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM (
                 SELECT id FROM escrow_transactions
                 WHERE project_id = $1 AND status = 'ESCROWED'
                 FOR UPDATE
             ) held",
        )
        .bind(project_id)
        .fetch_one(&mut *tx)
        .await?;

        let current = lock_project(&mut tx, project_id).await?;
        let next = project::transition(current.status, ProjectEvent::Cancel)?;
        if current.status == ProjectStatus::InProgress {
            if !allow_in_progress {
                return Err(EngineError::Forbidden(
                    "only an administrator can cancel a project in progress".into(),
                ));
            }
            if held > 0 {
                return Err(EngineError::precondition(format!(
                    "{} milestone payment(s) are still held in escrow",
                    held
                )));
            }
        }

        let row = sqlx::query_as::<_, ProjectRow>(
            "UPDATE projects
             SET status = $2, hired_analyst_id = NULL, hired_at = NULL,
                 cancelled_at = $3, updated_at = now()
             WHERE id = $1 AND status = $4
             RETURNING *",
        )
        .bind(project_id)
        .bind(next)
        .bind(now)
        .bind(current.status)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE proposals SET status = 'REJECTED', responded_at = $2
             WHERE project_id = $1 AND status = 'PENDING'",
        )
        .bind(project_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    pub async fn list_project_ids_by_status(
        &self,
        status: ProjectStatus,
    ) -> EngineResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM projects WHERE status = $1 ORDER BY created_at",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
