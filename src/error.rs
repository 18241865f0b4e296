//! Error taxonomy for the settlement engine.
//!
//! Every operation in [`crate::engine`] returns `Result<T, EngineError>`.
//! Validation and precondition failures are raised before any write, so a
//! caller can re-fetch state and retry. `Storage` failures abort the whole
//! atomic unit; nothing is resumed mid-way.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    // ── Caller-correctable ───────────────────────────────────────────────
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("access denied: {0}")]
    Forbidden(String),

    // ── Ledger ───────────────────────────────────────────────────────────
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("amount below minimum: minimum {minimum}, requested {requested}")]
    BelowMinimumAmount { minimum: i64, requested: i64 },

    // ── Milestone review ─────────────────────────────────────────────────
    #[error("revision limit of {limit} reached; escalate to a dispute")]
    RevisionLimitExceeded { limit: i32 },

    // ── Escrow / gateway ─────────────────────────────────────────────────
    #[error("milestone is already paid into escrow")]
    AlreadyPaid,

    #[error("invalid gateway notification signature")]
    InvalidSignature,

    #[error("unknown gateway order reference: {0}")]
    UnknownOrderReference(String),

    #[error("external service failure: {0}")]
    ExternalServiceFailure(String),

    // ── Infrastructure ───────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        EngineError::PreconditionFailed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Storage(_) | EngineError::ExternalServiceFailure(_)
        )
    }

    /// Stable machine-readable code used in API error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::PreconditionFailed(_) => "precondition_failed",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::InsufficientBalance { .. } => "insufficient_balance",
            EngineError::BelowMinimumAmount { .. } => "below_minimum_amount",
            EngineError::RevisionLimitExceeded { .. } => "revision_limit_exceeded",
            EngineError::AlreadyPaid => "already_paid",
            EngineError::InvalidSignature => "invalid_signature",
            EngineError::UnknownOrderReference(_) => "unknown_order_reference",
            EngineError::ExternalServiceFailure(_) => "external_service_failure",
            EngineError::Storage(_) => "storage_error",
            EngineError::Migration(_) => "migration_error",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
