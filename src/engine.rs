//! # Engine: Engagement and Escrow Orchestration
//!
//! [`Engine`] is the single entry point used by the HTTP layer, the CLI and
//! the scheduler. Each operation:
//!
//! 1. checks the caller's role and ownership,
//! 2. validates input,
//! 3. runs exactly one atomic unit in [`Database`],
//! 4. performs side effects (gateway calls, system messages, metrics) only
//!    after that unit has committed.
//!
//! A system message that fails to post is logged and counted. It never turns
//! a committed state change into an error.
//!
//! Every mutating operation takes `now` explicitly so tests and the sweep
//! can pin the clock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::{
    AnalystProfileRow, ApprovalOutcome, CallbackOutcome, Database, Engagement, EscrowRow,
    MilestoneRow, NotificationDetails, ProjectRow, ProposalRow, ReleaseOutcome, Settlement,
    WithdrawalFilter, WithdrawalRow,
};
use crate::error::{EngineError, EngineResult};
use crate::escrow::{self, EscrowStatus};
use crate::gateway::{ChargeRequest, GatewayNotification, Payer, PaymentGateway};
use crate::ledger::{self, AnalystBalance};
use crate::messaging::{self, Messenger};
use crate::milestone::{self, MilestoneStatus, SequenceViolation};
use crate::project::{ProjectDraft, ProjectStatus};
use crate::prom_metrics::Metrics;
use crate::proposal::ProposalDraft;
use crate::withdrawal::{PayoutDetails, WithdrawalAction};

// ── Actors ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Analyst,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Analyst => "analyst",
            Role::Admin => "admin",
        }
    }
}

/// Authenticated caller, as vouched for by the identity service.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            role,
            name: None,
            email: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn require(&self, role: Role) -> EngineResult<()> {
        if self.role != role {
            return Err(EngineError::Forbidden(format!(
                "this action requires the {} role",
                role.as_str()
            )));
        }
        Ok(())
    }

    fn require_admin(&self) -> EngineResult<()> {
        self.require(Role::Admin)
    }

    fn payer(&self) -> Payer {
        Payer {
            name: self.name.clone().unwrap_or_else(|| "Client".to_string()),
            email: self.email.clone().unwrap_or_default(),
        }
    }
}

fn require_client_of(actor: &Actor, project: &ProjectRow) -> EngineResult<()> {
    actor.require(Role::Client)?;
    if project.client_id != actor.user_id {
        return Err(EngineError::Forbidden(
            "only the project's client can do this".into(),
        ));
    }
    Ok(())
}

fn require_hired_analyst(actor: &Actor, project: &ProjectRow) -> EngineResult<()> {
    actor.require(Role::Analyst)?;
    if project.hired_analyst_id != Some(actor.user_id) {
        return Err(EngineError::Forbidden(
            "only the hired analyst can do this".into(),
        ));
    }
    Ok(())
}

// ── Views ───────────────────────────────────────────────────────

/// Escrow fields a participant may see next to a milestone.
#[derive(Debug, Clone, Serialize)]
pub struct EscrowSummary {
    pub id: Uuid,
    pub status: EscrowStatus,
    pub gross_amount: i64,
    pub platform_fee: i64,
    pub net_amount: i64,
    pub order_ref: String,
    pub redirect_url: Option<String>,
    pub payment_method: Option<String>,
    pub escrowed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub available_at: Option<DateTime<Utc>>,
}

impl From<&EscrowRow> for EscrowSummary {
    fn from(e: &EscrowRow) -> Self {
        Self {
            id: e.id,
            status: e.status,
            gross_amount: e.gross_amount,
            platform_fee: e.platform_fee,
            net_amount: e.net_amount,
            order_ref: e.order_ref.clone(),
            redirect_url: e.redirect_url.clone(),
            payment_method: e.payment_method.clone(),
            escrowed_at: e.escrowed_at,
            released_at: e.released_at,
            available_at: e.available_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MilestoneView {
    pub milestone: MilestoneRow,
    pub escrow: Option<EscrowSummary>,
}

/// What a client approval did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Approval {
    Settled(Box<Settlement>),
    /// Approved by someone else first, usually the sweep.
    AlreadyApproved(MilestoneView),
}

impl Approval {
    pub fn settlement(&self) -> Option<&Settlement> {
        match self {
            Approval::Settled(s) => Some(s.as_ref()),
            Approval::AlreadyApproved(_) => None,
        }
    }
}

/// Checkout handed to the client after a charge attempt was opened.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub escrow_id: Uuid,
    pub order_ref: String,
    pub attempt: i32,
    pub gross_amount: i64,
    pub platform_fee: i64,
    pub net_amount: i64,
    pub token: String,
    pub redirect_url: String,
}

/// One IN_PROGRESS project whose milestones break the settle-in-order rule.
#[derive(Debug, Clone, Serialize)]
pub struct AuditFinding {
    pub project_id: Uuid,
    pub violation: String,
}

impl AuditFinding {
    fn new(project_id: Uuid, violation: SequenceViolation) -> Self {
        Self {
            project_id,
            violation: violation.to_string(),
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────

pub struct Engine {
    db: Database,
    gateway: Arc<dyn PaymentGateway>,
    messenger: Arc<dyn Messenger>,
    config: EngineConfig,
    metrics: Arc<Metrics>,
}

impl Engine {
    pub fn new(
        db: Database,
        gateway: Arc<dyn PaymentGateway>,
        messenger: Arc<dyn Messenger>,
        config: EngineConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            db,
            gateway,
            messenger,
            config,
            metrics,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    async fn load_project(&self, project_id: Uuid) -> EngineResult<ProjectRow> {
        self.db
            .get_project(project_id)
            .await?
            .ok_or_else(|| EngineError::not_found("project", project_id))
    }

    async fn load_milestone(&self, milestone_id: Uuid) -> EngineResult<(MilestoneRow, ProjectRow)> {
        let milestone = self
            .db
            .get_milestone(milestone_id)
            .await?
            .ok_or_else(|| EngineError::not_found("milestone", milestone_id))?;
        let project = self.load_project(milestone.project_id).await?;
        Ok((milestone, project))
    }

    /// Post a system message to the project conversation. Failures are
    /// logged and counted only.
    async fn notify(&self, project_id: Uuid, participants: &[Uuid], text: String) {
        let posted = async {
            let conversation = self
                .messenger
                .ensure_conversation(project_id, participants)
                .await?;
            self.messenger.post_system_message(conversation, &text).await
        }
        .await;
        if let Err(e) = posted {
            self.metrics.messaging_failures.inc();
            warn!(project_id = %project_id, error = %e, "failed to post system message");
        }
    }

    // ── Projects ────────────────────────────────────────────────

    pub async fn create_project(&self, actor: &Actor, draft: &ProjectDraft) -> EngineResult<ProjectRow> {
        actor.require(Role::Client)?;
        draft.validate()?;
        let project = self.db.insert_project(actor.user_id, draft).await?;
        info!(project_id = %project.id, status = %project.status, "project created");
        Ok(project)
    }

    pub async fn publish_project(&self, actor: &Actor, project_id: Uuid) -> EngineResult<ProjectRow> {
        let project = self.load_project(project_id).await?;
        require_client_of(actor, &project)?;
        self.db.publish_project(project_id).await
    }

    pub async fn cancel_project(
        &self,
        actor: &Actor,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<ProjectRow> {
        let project = self.load_project(project_id).await?;
        if !actor.is_admin() {
            require_client_of(actor, &project)?;
        }
        let cancelled = self
            .db
            .cancel_project(project_id, actor.is_admin(), now)
            .await?;
        info!(project_id = %project_id, previous = %project.status, "project cancelled");
        Ok(cancelled)
    }

    // ── Proposals ───────────────────────────────────────────────

    pub async fn submit_proposal(
        &self,
        actor: &Actor,
        project_id: Uuid,
        draft: &ProposalDraft,
    ) -> EngineResult<ProposalRow> {
        actor.require(Role::Analyst)?;
        draft.validate(&self.config)?;
        let proposal = self.db.insert_proposal(project_id, actor.user_id, draft).await?;
        info!(
            project_id = %project_id,
            proposal_id = %proposal.id,
            milestones = proposal.milestones.0.len(),
            "proposal submitted"
        );
        Ok(proposal)
    }

    pub async fn reject_proposal(
        &self,
        actor: &Actor,
        project_id: Uuid,
        proposal_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<ProposalRow> {
        let project = self.load_project(project_id).await?;
        require_client_of(actor, &project)?;
        self.db.reject_proposal(project_id, proposal_id, now).await
    }

    /// Engagement formation. The conversation between client and analyst is
    /// opened after the formation has committed.
    pub async fn accept_proposal(
        &self,
        actor: &Actor,
        project_id: Uuid,
        proposal_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<Engagement> {
        let project = self.load_project(project_id).await?;
        require_client_of(actor, &project)?;
        let engagement = self
            .db
            .form_engagement(project_id, proposal_id, self.config.default_revision_limit, now)
            .await?;
        info!(
            project_id = %project_id,
            proposal_id = %proposal_id,
            analyst_id = %engagement.proposal.analyst_id,
            milestones = engagement.milestones.len(),
            rejected = engagement.rejected_proposals,
            "engagement formed"
        );
        self.notify(
            project_id,
            &[project.client_id, engagement.proposal.analyst_id],
            messaging::engagement_opened(&engagement.project.title, engagement.milestones.len()),
        )
        .await;
        Ok(engagement)
    }

    // ── Milestones ──────────────────────────────────────────────

    pub async fn get_milestone(&self, actor: &Actor, milestone_id: Uuid) -> EngineResult<MilestoneView> {
        let (milestone, project) = self.load_milestone(milestone_id).await?;
        if !actor.is_admin() && !project.is_participant(actor.user_id) {
            return Err(EngineError::Forbidden(
                "only project participants can view this milestone".into(),
            ));
        }
        let escrow = self.db.get_escrow_for_milestone(milestone_id).await?;
        Ok(MilestoneView {
            milestone,
            escrow: escrow.as_ref().map(EscrowSummary::from),
        })
    }

    pub async fn submit_milestone(
        &self,
        actor: &Actor,
        milestone_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<MilestoneRow> {
        let (_, project) = self.load_milestone(milestone_id).await?;
        require_hired_analyst(actor, &project)?;
        let row = self
            .db
            .submit_milestone(milestone_id, now, self.config.review_window())
            .await?;
        info!(
            milestone_id = %milestone_id,
            auto_release_at = ?row.auto_release_at,
            "milestone submitted"
        );
        Ok(row)
    }

    /// Client approval. Approving and releasing the escrow are one unit. A
    /// milestone that is already APPROVED (for instance because the sweep
    /// released it first) comes back as [`Approval::AlreadyApproved`].
    pub async fn approve_milestone(
        &self,
        actor: &Actor,
        milestone_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<Approval> {
        let (_, project) = self.load_milestone(milestone_id).await?;
        require_client_of(actor, &project)?;
        match self
            .db
            .approve_and_release(milestone_id, now, self.config.security_hold())
            .await?
        {
            ApprovalOutcome::Settled(settlement) => {
                self.after_settlement(&settlement, false).await;
                Ok(Approval::Settled(settlement))
            }
            ApprovalOutcome::NotSubmitted(MilestoneStatus::Approved) => {
                info!(milestone_id = %milestone_id, "approval found milestone already approved");
                let view = self.get_milestone(actor, milestone_id).await?;
                Ok(Approval::AlreadyApproved(view))
            }
            ApprovalOutcome::NotSubmitted(status) => Err(EngineError::precondition(format!(
                "milestone is {}, not SUBMITTED",
                status
            ))),
            ApprovalOutcome::NotFunded(status) => Err(EngineError::precondition(format!(
                "milestone payment is not in escrow ({})",
                status.map_or("no payment", |s| s.as_str())
            ))),
            ApprovalOutcome::ProjectClosed(status) => Err(EngineError::precondition(format!(
                "project is {}, milestones are frozen",
                status
            ))),
        }
    }

    /// The sweep's approval of one overdue milestone. A lost race comes back
    /// as `NotSubmitted`, not as an error.
    pub async fn auto_release(
        &self,
        milestone_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<ApprovalOutcome> {
        let outcome = self
            .db
            .approve_and_release(milestone_id, now, self.config.security_hold())
            .await?;
        if let ApprovalOutcome::Settled(settlement) = &outcome {
            self.metrics.auto_released.inc();
            self.after_settlement(settlement, true).await;
        }
        Ok(outcome)
    }

    /// Post-commit effects of a release. Reads nothing back from storage.
    async fn after_settlement(&self, settlement: &Settlement, automatic: bool) {
        self.metrics.escrow_released.inc();
        info!(
            milestone_id = %settlement.milestone.id,
            escrow_id = %settlement.escrow.id,
            net = settlement.escrow.net_amount,
            available_at = ?settlement.escrow.available_at,
            automatic,
            next_milestone = ?settlement.next_milestone.as_ref().map(|m| m.id),
            project_completed = settlement.project_completed,
            "milestone approved and escrow released"
        );
        let project_id = settlement.escrow.project_id;
        let participants = [settlement.escrow.client_id, settlement.escrow.analyst_id];
        let text = if automatic {
            messaging::milestone_auto_released(
                &settlement.milestone.title,
                self.config.review_window_days,
            )
        } else {
            messaging::milestone_approved(&settlement.milestone.title, settlement.escrow.net_amount)
        };
        self.notify(project_id, &participants, text).await;
        if settlement.project_completed {
            self.notify(
                project_id,
                &participants,
                messaging::project_completed(&settlement.project_title),
            )
            .await;
        }
    }

    pub async fn request_revision(
        &self,
        actor: &Actor,
        milestone_id: Uuid,
        note: Option<&str>,
    ) -> EngineResult<MilestoneRow> {
        let (_, project) = self.load_milestone(milestone_id).await?;
        require_client_of(actor, &project)?;
        let row = self.db.request_revision(milestone_id).await?;
        info!(
            milestone_id = %milestone_id,
            revision_count = row.revision_count,
            revision_limit = row.revision_limit,
            "revision requested"
        );
        let participants: Vec<Uuid> = std::iter::once(project.client_id)
            .chain(project.hired_analyst_id)
            .collect();
        self.notify(
            project.id,
            &participants,
            messaging::revision_requested(&row.title, note, row.revisions().remaining()),
        )
        .await;
        Ok(row)
    }

    pub async fn escalate_dispute(&self, actor: &Actor, milestone_id: Uuid) -> EngineResult<MilestoneRow> {
        actor.require_admin()?;
        let row = self.db.escalate_dispute(milestone_id).await?;
        warn!(milestone_id = %milestone_id, project_id = %row.project_id, "milestone escalated to dispute");
        Ok(row)
    }

    // ── Payments ────────────────────────────────────────────────

    /// Open a new charge attempt for a milestone.
    ///
    /// The attempt is committed before the gateway is called, so a
    /// notification for its order reference always finds a row. A gateway
    /// failure leaves the attempt PENDING without a token; the next call
    /// supersedes it with a fresh reference.
    pub async fn initiate_payment(
        &self,
        actor: &Actor,
        milestone_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<PaymentSession> {
        let (milestone, project) = self.load_milestone(milestone_id).await?;
        require_client_of(actor, &project)?;
        if project.status != ProjectStatus::InProgress {
            return Err(EngineError::precondition(format!(
                "project is {}, milestones cannot be funded",
                project.status
            )));
        }
        let split = ledger::split_fee(milestone.amount, self.config.commission())?;
        let prepared = self.db.prepare_charge(&project, milestone_id, split, now).await?;

        let request = ChargeRequest {
            order_ref: prepared.order_ref.clone(),
            gross_amount: split.gross,
            item_id: milestone.id.to_string(),
            item_name: format!("{} - {}", project.title, milestone.title),
            payer: actor.payer(),
        };
        let session = match self.gateway.create_charge(&request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    order_ref = %prepared.order_ref,
                    error = %e,
                    "gateway refused charge; attempt left pending"
                );
                return Err(e);
            }
        };
        if !self
            .db
            .record_charge_session(prepared.escrow.id, prepared.attempt, &session)
            .await?
        {
            warn!(order_ref = %prepared.order_ref, "charge attempt superseded before session was stored");
        }
        info!(
            milestone_id = %milestone_id,
            order_ref = %prepared.order_ref,
            attempt = prepared.attempt,
            gross = split.gross,
            fee = split.fee,
            "charge opened"
        );
        Ok(PaymentSession {
            escrow_id: prepared.escrow.id,
            order_ref: prepared.order_ref,
            attempt: prepared.attempt,
            gross_amount: split.gross,
            platform_fee: split.fee,
            net_amount: split.net,
            token: session.token,
            redirect_url: session.redirect_url,
        })
    }

    /// Process one gateway notification. The signature is checked before
    /// any field is trusted; replays are absorbed by the escrow's state.
    pub async fn handle_notification(
        &self,
        notification: &GatewayNotification,
        now: DateTime<Utc>,
    ) -> EngineResult<CallbackOutcome> {
        if !self.gateway.verify_notification(notification) {
            self.metrics.webhook_rejected("invalid_signature");
            warn!(order_ref = %notification.order_id, "gateway notification with invalid signature");
            return Err(EngineError::InvalidSignature);
        }
        let Some(gross_amount) = escrow::parse_gross_amount(&notification.gross_amount) else {
            self.metrics.webhook_rejected("malformed_amount");
            warn!(
                order_ref = %notification.order_id,
                gross_amount = %notification.gross_amount,
                "gateway notification with malformed amount"
            );
            return Err(EngineError::validation("gross_amount is not a whole rupiah amount"));
        };
        let outcome = escrow::classify(
            &notification.transaction_status,
            notification.fraud_status.as_deref(),
        );
        let details = NotificationDetails {
            gross_amount,
            payment_method: notification.payment_type.clone(),
            gateway_transaction_id: notification.transaction_id.clone(),
        };

        let result = self
            .db
            .apply_gateway_notification(&notification.order_id, outcome, &details, now)
            .await;
        let applied = match result {
            Ok(applied) => applied,
            Err(e @ EngineError::UnknownOrderReference(_)) => {
                self.metrics.webhook_rejected("unknown_order");
                warn!(order_ref = %notification.order_id, "gateway notification for unknown order");
                return Err(e);
            }
            Err(e @ EngineError::PreconditionFailed(_)) => {
                self.metrics.webhook_rejected("amount_mismatch");
                warn!(order_ref = %notification.order_id, error = %e, "gateway notification rejected");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        match &applied {
            CallbackOutcome::Applied {
                escrow,
                previous,
                started_milestone,
            } => {
                info!(
                    order_ref = %notification.order_id,
                    transaction_status = %notification.transaction_status,
                    from = %previous,
                    to = %escrow.status,
                    started_milestone = ?started_milestone,
                    "escrow updated from gateway"
                );
                if escrow.status == EscrowStatus::Escrowed {
                    if let Some(m) = self.db.get_milestone(escrow.milestone_id).await? {
                        self.notify(
                            escrow.project_id,
                            &[escrow.client_id, escrow.analyst_id],
                            messaging::payment_escrowed(&m.title, escrow.gross_amount),
                        )
                        .await;
                    }
                }
            }
            CallbackOutcome::NoOp { escrow, reason } => {
                if *reason == escrow::REFUND_AFTER_RELEASE {
                    warn!(
                        order_ref = %notification.order_id,
                        escrow_id = %escrow.id,
                        "refund reported for released escrow; needs manual reconciliation"
                    );
                } else {
                    info!(
                        order_ref = %notification.order_id,
                        transaction_status = %notification.transaction_status,
                        status = %escrow.status,
                        reason,
                        "gateway notification ignored"
                    );
                }
            }
        }
        Ok(applied)
    }

    /// Release the escrow of an APPROVED milestone whose release did not
    /// happen with its approval. Idempotent on an already released escrow.
    pub async fn release_payment(
        &self,
        actor: &Actor,
        milestone_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<ReleaseOutcome> {
        let (_, project) = self.load_milestone(milestone_id).await?;
        if !actor.is_admin() {
            require_client_of(actor, &project)?;
        }
        let outcome = self
            .db
            .release_escrow(milestone_id, now, self.config.security_hold())
            .await?;
        if let ReleaseOutcome::Released(escrow) = &outcome {
            self.metrics.escrow_released.inc();
            info!(milestone_id = %milestone_id, escrow_id = %escrow.id, net = escrow.net_amount, "escrow released");
        }
        Ok(outcome)
    }

    // ── Balance and withdrawals ─────────────────────────────────

    pub async fn balance(&self, actor: &Actor, now: DateTime<Utc>) -> EngineResult<AnalystBalance> {
        actor.require(Role::Analyst)?;
        self.db.analyst_balance(actor.user_id, now).await
    }

    /// Balance of any analyst, for operators.
    pub async fn balance_of(&self, analyst_id: Uuid, now: DateTime<Utc>) -> EngineResult<AnalystBalance> {
        self.db.analyst_balance(analyst_id, now).await
    }

    pub async fn set_payout_details(
        &self,
        actor: &Actor,
        details: &PayoutDetails,
    ) -> EngineResult<AnalystProfileRow> {
        actor.require(Role::Analyst)?;
        details.validate()?;
        self.db.set_payout_details(actor.user_id, details).await
    }

    pub async fn request_withdrawal(
        &self,
        actor: &Actor,
        amount: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<WithdrawalRow> {
        actor.require(Role::Analyst)?;
        let row = self
            .db
            .request_withdrawal(actor.user_id, amount, self.config.min_withdrawal, now)
            .await?;
        self.metrics.withdrawals_requested.inc();
        info!(withdrawal_id = %row.id, analyst_id = %actor.user_id, amount, "withdrawal requested");
        Ok(row)
    }

    pub async fn my_withdrawals(&self, actor: &Actor) -> EngineResult<Vec<WithdrawalRow>> {
        actor.require(Role::Analyst)?;
        self.db.list_withdrawals_for_analyst(actor.user_id).await
    }

    pub async fn list_withdrawals(
        &self,
        actor: &Actor,
        filter: &WithdrawalFilter,
    ) -> EngineResult<Vec<WithdrawalRow>> {
        actor.require_admin()?;
        self.db.list_withdrawals(filter).await
    }

    pub async fn process_withdrawal(
        &self,
        actor: &Actor,
        withdrawal_id: Uuid,
        action: WithdrawalAction,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<WithdrawalRow> {
        actor.require_admin()?;
        let row = self
            .db
            .transition_withdrawal(withdrawal_id, action, reason, now)
            .await?;
        info!(
            withdrawal_id = %withdrawal_id,
            action = ?action,
            status = %row.status,
            admin_id = %actor.user_id,
            "withdrawal updated"
        );
        Ok(row)
    }

    // ── Audit ───────────────────────────────────────────────────

    /// Check the settle-in-order rule over every running project.
    pub async fn audit(&self) -> EngineResult<Vec<AuditFinding>> {
        let mut findings = Vec::new();
        for project_id in self
            .db
            .list_project_ids_by_status(ProjectStatus::InProgress)
            .await?
        {
            let statuses: Vec<MilestoneStatus> = self
                .db
                .list_milestones(project_id)
                .await?
                .iter()
                .map(|m| m.status)
                .collect();
            if let Err(violation) = milestone::check_sequence(ProjectStatus::InProgress, &statuses) {
                warn!(project_id = %project_id, violation = %violation, "milestone sequence violated");
                findings.push(AuditFinding::new(project_id, violation));
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(client: Uuid, analyst: Option<Uuid>) -> ProjectRow {
        ProjectRow {
            id: Uuid::new_v4(),
            client_id: client,
            title: "Retail demand forecast".into(),
            description: String::new(),
            status: if analyst.is_some() {
                ProjectStatus::InProgress
            } else {
                ProjectStatus::Open
            },
            budget_min: 500_000,
            budget_max: 2_000_000,
            deadline: None,
            hired_analyst_id: analyst,
            hired_at: None,
            completed_at: None,
            cancelled_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn role_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Analyst).unwrap(), "\"analyst\"");
        let role: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, Role::Admin);
        assert!(serde_json::from_str::<Role>("\"ADMIN\"").is_err());
    }

    #[test]
    fn only_the_owning_client_passes() {
        let client = Uuid::new_v4();
        let p = project(client, None);
        assert!(require_client_of(&Actor::new(client, Role::Client), &p).is_ok());
        assert!(matches!(
            require_client_of(&Actor::new(Uuid::new_v4(), Role::Client), &p),
            Err(EngineError::Forbidden(_))
        ));
        // Same id but wrong role.
        assert!(matches!(
            require_client_of(&Actor::new(client, Role::Analyst), &p),
            Err(EngineError::Forbidden(_))
        ));
    }

    #[test]
    fn only_the_hired_analyst_passes() {
        let analyst = Uuid::new_v4();
        let p = project(Uuid::new_v4(), Some(analyst));
        assert!(require_hired_analyst(&Actor::new(analyst, Role::Analyst), &p).is_ok());
        assert!(require_hired_analyst(&Actor::new(Uuid::new_v4(), Role::Analyst), &p).is_err());
        let unhired = project(Uuid::new_v4(), None);
        assert!(require_hired_analyst(&Actor::new(analyst, Role::Analyst), &unhired).is_err());
    }

    #[test]
    fn payer_falls_back_when_claims_are_sparse() {
        let mut actor = Actor::new(Uuid::new_v4(), Role::Client);
        assert_eq!(actor.payer().name, "Client");
        assert_eq!(actor.payer().email, "");
        actor.name = Some("Budi Santoso".into());
        actor.email = Some("budi@example.com".into());
        let payer = actor.payer();
        assert_eq!(payer.name, "Budi Santoso");
        assert_eq!(payer.email, "budi@example.com");
    }

    #[test]
    fn escrow_summary_copies_amounts() {
        let row = EscrowRow {
            id: Uuid::new_v4(),
            milestone_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            analyst_id: Uuid::new_v4(),
            gross_amount: 1_000_000,
            platform_fee: 100_000,
            net_amount: 900_000,
            status: EscrowStatus::Escrowed,
            attempt: 2,
            order_ref: "DP-0000abcd-0000ef01-2".into(),
            snap_token: Some("tok".into()),
            redirect_url: None,
            payment_method: Some("bank_transfer".into()),
            gateway_transaction_id: None,
            escrowed_at: Some(Utc::now()),
            released_at: None,
            available_at: None,
            failed_at: None,
            refunded_at: None,
            created_at: Utc::now(),
        };
        let summary = EscrowSummary::from(&row);
        assert_eq!(summary.platform_fee + summary.net_amount, summary.gross_amount);
        assert_eq!(summary.status, EscrowStatus::Escrowed);
        assert_eq!(summary.order_ref, row.order_ref);
    }
}
