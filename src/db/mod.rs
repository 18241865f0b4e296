//! # Database: PostgreSQL Storage Layer
//!
//! Every multi-row state change in the engine is one `sqlx` transaction
//! here. Inside a transaction the rows being decided on are locked with
//! `SELECT … FOR UPDATE`, the pure transition functions from the domain
//! modules pick the next state, and the write repeats the expected status
//! in its `WHERE` clause. Whoever commits first wins; the loser observes the
//! new status and backs out without writing.
//!
//! Lock order is milestone, then escrow, then project. Every method that
//! takes more than one of these locks follows it.
//!
//! ## Module Structure
//!
//! - [`projects`]: create, publish, cancel
//! - [`proposals`]: submission, rejection, engagement formation
//! - [`milestones`]: review workflow and the approval/release unit
//! - [`escrow`]: charge attempts, gateway notifications, repair release
//! - [`ledger`]: the derived analyst balance
//! - [`withdrawals`]: payout requests and admin transitions
//! - [`analysts`]: analyst profile and payout details
//! - [`conversations`]: project conversations and system messages

mod analysts;
mod conversations;
mod escrow;
mod ledger;
mod milestones;
mod projects;
mod proposals;
mod withdrawals;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use crate::escrow::EscrowStatus;
use crate::milestone::{MilestoneStatus, Revisions};
use crate::project::ProjectStatus;
use crate::proposal::{MilestoneDescriptor, ProposalStatus};
use crate::withdrawal::{PayoutDetails, WithdrawalStatus};

pub use escrow::NotificationDetails;
pub use withdrawals::WithdrawalFilter;

// ── Row types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: ProjectStatus,
    pub budget_min: i64,
    pub budget_max: i64,
    pub deadline: Option<DateTime<Utc>>,
    pub hired_analyst_id: Option<Uuid>,
    pub hired_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ProjectRow {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.client_id == user_id || self.hired_analyst_id == Some(user_id)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProposalRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub analyst_id: Uuid,
    pub cover_letter: String,
    pub proposed_budget: i64,
    pub proposed_days: i32,
    pub milestones: Json<Vec<MilestoneDescriptor>>,
    pub status: ProposalStatus,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MilestoneRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub amount: i64,
    pub sort_order: i32,
    pub status: MilestoneStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub revision_count: i32,
    pub revision_limit: i32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MilestoneRow {
    pub fn revisions(&self) -> Revisions {
        Revisions {
            count: self.revision_count,
            limit: self.revision_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EscrowRow {
    pub id: Uuid,
    pub milestone_id: Uuid,
    pub project_id: Uuid,
    pub client_id: Uuid,
    pub analyst_id: Uuid,
    pub gross_amount: i64,
    pub platform_fee: i64,
    pub net_amount: i64,
    pub status: EscrowStatus,
    pub attempt: i32,
    pub order_ref: String,
    pub snap_token: Option<String>,
    pub redirect_url: Option<String>,
    pub payment_method: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub escrowed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub available_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WithdrawalRow {
    pub id: Uuid,
    pub analyst_id: Uuid,
    pub amount: i64,
    pub fee: i64,
    pub net_amount: i64,
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
    pub status: WithdrawalStatus,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AnalystProfileRow {
    pub user_id: Uuid,
    pub bank_name: Option<String>,
    pub bank_account_number: Option<String>,
    pub bank_account_name: Option<String>,
    pub completed_projects: i32,
}

impl AnalystProfileRow {
    pub fn payout_details(&self) -> PayoutDetails {
        PayoutDetails {
            bank_name: self.bank_name.clone(),
            account_number: self.bank_account_number.clone(),
            account_name: self.bank_account_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub body: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

/// A SUBMITTED milestone whose review window has closed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DueMilestone {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub auto_release_at: DateTime<Utc>,
}

// ── Atomic unit outcomes ────────────────────────────────────────

/// Result of engagement formation.
#[derive(Debug, Clone, Serialize)]
pub struct Engagement {
    pub project: ProjectRow,
    pub proposal: ProposalRow,
    pub milestones: Vec<MilestoneRow>,
    pub rejected_proposals: u64,
}

/// Everything written by one approval-and-release unit.
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub milestone: MilestoneRow,
    pub escrow: EscrowRow,
    pub next_milestone: Option<MilestoneRow>,
    pub project_completed: bool,
    pub project_title: String,
}

#[derive(Debug, Clone)]
pub enum ApprovalOutcome {
    Settled(Box<Settlement>),
    /// The milestone had already left SUBMITTED when its lock was taken.
    NotSubmitted(MilestoneStatus),
    /// No escrow, or escrow not in ESCROWED.
    NotFunded(Option<EscrowStatus>),
    /// The project was cancelled or completed underneath the milestone.
    ProjectClosed(ProjectStatus),
}

/// A charge attempt recorded before the gateway is called.
#[derive(Debug, Clone)]
pub struct PreparedCharge {
    pub escrow: EscrowRow,
    pub order_ref: String,
    pub attempt: i32,
}

#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Applied {
        escrow: EscrowRow,
        previous: EscrowStatus,
        /// Milestone moved from PENDING to IN_PROGRESS by the funding.
        started_milestone: Option<Uuid>,
    },
    NoOp {
        escrow: EscrowRow,
        reason: &'static str,
    },
}

#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    Released(EscrowRow),
    AlreadyReleased(EscrowRow),
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// The URL is parsed by hand so that pooler usernames containing a
    /// `.project-ref` suffix survive intact.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Database { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations.
    pub async fn migrate(&self) -> Result<(), crate::error::EngineError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Execute `SELECT 1`; used by the `/readyz` probe.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
