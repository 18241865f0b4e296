//! Project conversation port.
//!
//! The engine posts system messages after its transactions commit. A
//! message that fails to post is logged and counted, never allowed to undo
//! the financial change it describes.

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::Database;
use crate::error::EngineResult;
use crate::ledger::format_rupiah;

const SYSTEM_PREFIX: &str = "[SISTEM]";

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Open (or reuse) the conversation for a project with these participants.
    async fn ensure_conversation(&self, project_id: Uuid, participants: &[Uuid]) -> EngineResult<Uuid>;

    async fn post_system_message(&self, conversation_id: Uuid, text: &str) -> EngineResult<()>;
}

/// Writes conversations and messages into the engine's own database.
pub struct DbMessenger {
    db: Database,
}

impl DbMessenger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Messenger for DbMessenger {
    async fn ensure_conversation(&self, project_id: Uuid, participants: &[Uuid]) -> EngineResult<Uuid> {
        self.db.ensure_conversation(project_id, participants).await
    }

    async fn post_system_message(&self, conversation_id: Uuid, text: &str) -> EngineResult<()> {
        self.db.insert_system_message(conversation_id, text).await?;
        Ok(())
    }
}

// ── Message text ────────────────────────────────────────────────

pub fn engagement_opened(project_title: &str, milestone_count: usize) -> String {
    format!(
        "{} Proposal diterima. Proyek \"{}\" dimulai dengan {} milestone.",
        SYSTEM_PREFIX, project_title, milestone_count
    )
}

pub fn payment_escrowed(milestone_title: &str, gross: i64) -> String {
    format!(
        "{} Pembayaran {} untuk milestone \"{}\" telah diterima dan ditahan di escrow.",
        SYSTEM_PREFIX,
        format_rupiah(gross),
        milestone_title
    )
}

pub fn milestone_approved(milestone_title: &str, net: i64) -> String {
    format!(
        "{} Milestone \"{}\" disetujui. {} dilepas ke analyst.",
        SYSTEM_PREFIX,
        milestone_title,
        format_rupiah(net)
    )
}

pub fn milestone_auto_released(milestone_title: &str, review_window_days: i64) -> String {
    format!(
        "{} Milestone \"{}\" telah di-auto-release karena tidak ada respon dalam {} hari. \
         Dana telah dilepas ke analyst.",
        SYSTEM_PREFIX, milestone_title, review_window_days
    )
}

pub fn revision_requested(milestone_title: &str, note: Option<&str>, remaining: i32) -> String {
    let mut text = format!(
        "{} Permintaan revisi untuk \"{}\" (sisa {} revisi).",
        SYSTEM_PREFIX, milestone_title, remaining
    );
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        text.push_str("\n\n");
        text.push_str(note);
    }
    text
}

pub fn project_completed(project_title: &str) -> String {
    format!(
        "{} Semua milestone disetujui. Proyek \"{}\" selesai.",
        SYSTEM_PREFIX, project_title
    )
}
