//! # Escrow Transaction
//!
//! One escrow row per milestone. Its lifecycle:
//!
//! ```text
//!            ┌──retry──┐
//!            ▼         │
//! PENDING ──fund──▶ ESCROWED ──release──▶ RELEASED
//!    │       ▲         │
//!   fail     │       refund
//!    ▼       │         ▼
//!  FAILED ──fund   REFUNDED
//! ```
//!
//! Gateway notifications arrive at least once and in any order. Each one is
//! classified into a [`GatewayOutcome`] and folded into the current status by
//! [`apply_outcome`]; anything that is not a legal forward step is a no-op,
//! which makes replaying a notification harmless.
//!
//! Every charge attempt gets its own order reference. A payment may settle on
//! an older attempt after the client retried, so a success for any recorded
//! attempt escrows the funds, while a failure only counts for the latest one.

use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

status_enum! {
    pub enum EscrowStatus {
        Pending => "PENDING",
        Escrowed => "ESCROWED",
        Released => "RELEASED",
        Failed => "FAILED",
        Refunded => "REFUNDED",
    }
}

impl EscrowStatus {
    /// Funds have been received from the client.
    pub fn is_paid(self) -> bool {
        matches!(self, EscrowStatus::Escrowed | EscrowStatus::Released)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowEvent {
    /// A new charge attempt is started.
    Retried,
    Funded,
    Failed,
    Refunded,
    Released,
}

pub fn transition(from: EscrowStatus, event: EscrowEvent) -> EngineResult<EscrowStatus> {
    use EscrowEvent as E;
    use EscrowStatus as S;
    match (from, event) {
        (S::Pending | S::Failed | S::Refunded, E::Retried) => Ok(S::Pending),
        (S::Pending | S::Failed, E::Funded) => Ok(S::Escrowed),
        (S::Pending, E::Failed) => Ok(S::Failed),
        (S::Escrowed, E::Refunded) => Ok(S::Refunded),
        (S::Escrowed, E::Released) => Ok(S::Released),
        (from, event) => Err(EngineError::precondition(format!(
            "escrow cannot take {:?} while {}",
            event, from
        ))),
    }
}

/// Gateway transaction status reduced to what the engine acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Success,
    Failure,
    Refund,
    /// Customer has not paid yet.
    AwaitingPayment,
    /// Card capture flagged for manual fraud review.
    FraudReview,
    Ignored,
}

impl GatewayOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayOutcome::Success => "success",
            GatewayOutcome::Failure => "failure",
            GatewayOutcome::Refund => "refund",
            GatewayOutcome::AwaitingPayment => "awaiting_payment",
            GatewayOutcome::FraudReview => "fraud_review",
            GatewayOutcome::Ignored => "ignored",
        }
    }
}

/// Classify a Midtrans `transaction_status` / `fraud_status` pair.
pub fn classify(transaction_status: &str, fraud_status: Option<&str>) -> GatewayOutcome {
    match transaction_status {
        "settlement" => GatewayOutcome::Success,
        "capture" => match fraud_status {
            None | Some("accept") => GatewayOutcome::Success,
            Some("deny") => GatewayOutcome::Failure,
            Some(_) => GatewayOutcome::FraudReview,
        },
        "pending" => GatewayOutcome::AwaitingPayment,
        "deny" | "cancel" | "expire" | "failure" => GatewayOutcome::Failure,
        "refund" | "partial_refund" | "chargeback" | "partial_chargeback" => GatewayOutcome::Refund,
        _ => GatewayOutcome::Ignored,
    }
}

pub const REFUND_AFTER_RELEASE: &str = "refund after release needs manual reconciliation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackDecision {
    Apply(EscrowStatus),
    NoOp(&'static str),
}

/// Fold a classified notification into the escrow's current status.
///
/// `is_current_attempt` is false when the notification names an order
/// reference that a later retry has superseded.
pub fn apply_outcome(
    current: EscrowStatus,
    outcome: GatewayOutcome,
    is_current_attempt: bool,
) -> CallbackDecision {
    let event = match outcome {
        GatewayOutcome::Success => EscrowEvent::Funded,
        GatewayOutcome::Failure if !is_current_attempt => {
            return CallbackDecision::NoOp("failure for superseded attempt")
        }
        GatewayOutcome::Failure => EscrowEvent::Failed,
        GatewayOutcome::Refund => EscrowEvent::Refunded,
        GatewayOutcome::AwaitingPayment => return CallbackDecision::NoOp("awaiting payment"),
        GatewayOutcome::FraudReview => return CallbackDecision::NoOp("held for fraud review"),
        GatewayOutcome::Ignored => return CallbackDecision::NoOp("unrecognised status"),
    };
    match transition(current, event) {
        Ok(next) => CallbackDecision::Apply(next),
        Err(_) if current == EscrowStatus::Released && outcome == GatewayOutcome::Refund => {
            CallbackDecision::NoOp(REFUND_AFTER_RELEASE)
        }
        Err(_) => CallbackDecision::NoOp("already settled"),
    }
}

fn tail8(id: &Uuid) -> String {
    let hex = id.simple().to_string();
    hex[hex.len() - 8..].to_string()
}

/// Deterministic gateway order reference for one charge attempt.
pub fn order_reference(project_id: Uuid, milestone_id: Uuid, attempt: i32) -> String {
    format!("DP-{}-{}-{}", tail8(&project_id), tail8(&milestone_id), attempt)
}

/// Parse a gateway `gross_amount` such as `"1000000.00"` into minor units.
/// Fractional rupiah are rejected.
pub fn parse_gross_amount(raw: &str) -> Option<i64> {
    let (whole, frac) = match raw.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (raw, ""),
    };
    if !frac.chars().all(|c| c == '0') {
        return None;
    }
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    whole.parse().ok()
}
