//! Project conversations. Only system messages are written by the engine;
//! user chat lives outside this crate.

use uuid::Uuid;

use super::{Database, MessageRow};
use crate::error::EngineResult;

impl Database {
    /// Return the project's conversation, creating it on first use, and make
    /// sure every listed user participates in it.
    pub async fn ensure_conversation(
        &self,
        project_id: Uuid,
        participants: &[Uuid],
    ) -> EngineResult<Uuid> {
        let mut tx = self.pool.begin().await?;
        let conversation_id: Uuid = sqlx::query_scalar(
            "INSERT INTO conversations (id, project_id) VALUES ($1, $2)
             ON CONFLICT (project_id) DO UPDATE SET project_id = EXCLUDED.project_id
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id)
             SELECT $1, UNNEST($2::UUID[])
             ON CONFLICT DO NOTHING",
        )
        .bind(conversation_id)
        .bind(participants)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(conversation_id)
    }

    pub async fn conversation_for_project(&self, project_id: Uuid) -> EngineResult<Option<Uuid>> {
        let id = sqlx::query_scalar("SELECT id FROM conversations WHERE project_id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn insert_system_message(
        &self,
        conversation_id: Uuid,
        body: &str,
    ) -> EngineResult<MessageRow> {
        let row = sqlx::query_as::<_, MessageRow>(
            "INSERT INTO messages (id, conversation_id, sender_id, body, is_system)
             VALUES ($1, $2, NULL, $3, TRUE)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_messages(&self, conversation_id: Uuid) -> EngineResult<Vec<MessageRow>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE conversation_id = $1 ORDER BY created_at, id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
