//! # Milestone State Machine
//!
//! ```text
//!            start              submit                approve
//! PENDING ─────────▶ IN_PROGRESS ──────▶ SUBMITTED ─────────▶ APPROVED
//!                                        │     ▲
//!                     request_revision   │     │ submit
//!                                        ▼     │
//!                                  REVISION_REQUESTED
//!
//! IN_PROGRESS | SUBMITTED | REVISION_REQUESTED ──dispute──▶ DISPUTED
//! ```
//!
//! [`transition`] is the only place a milestone status is decided. The
//! database layer applies its result with a compare-and-swap on the
//! previous status, so two actors racing on the same milestone cannot both
//! win.
//!
//! ## Sequencing
//!
//! Milestones settle strictly in sort order. While a project is IN_PROGRESS
//! exactly one milestone holds the active slot (IN_PROGRESS, SUBMITTED,
//! REVISION_REQUESTED, or DISPUTED), every earlier one is APPROVED and every
//! later one is PENDING. [`check_sequence`] verifies this for a project.

use chrono::{DateTime, Duration, Utc};

use crate::error::{EngineError, EngineResult};
use crate::project::ProjectStatus;

status_enum! {
    pub enum MilestoneStatus {
        Pending => "PENDING",
        InProgress => "IN_PROGRESS",
        Submitted => "SUBMITTED",
        RevisionRequested => "REVISION_REQUESTED",
        Approved => "APPROVED",
        Disputed => "DISPUTED",
    }
}

impl MilestoneStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MilestoneStatus::Approved | MilestoneStatus::Disputed)
    }

    /// Work is underway: the analyst or client has a move to make.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            MilestoneStatus::InProgress
                | MilestoneStatus::Submitted
                | MilestoneStatus::RevisionRequested
        )
    }

    /// Holds the project's single active slot. A dispute freezes the slot.
    pub fn occupies_active_slot(self) -> bool {
        self.is_active() || self == MilestoneStatus::Disputed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneAction {
    /// Funding landed or the previous milestone was approved.
    Start,
    Submit,
    /// Client approval or auto-release.
    Approve,
    RequestRevision,
    /// Out-of-band escalation by an administrator.
    Dispute,
}

/// Revision counters carried by the milestone row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revisions {
    pub count: i32,
    pub limit: i32,
}

impl Revisions {
    pub fn remaining(&self) -> i32 {
        (self.limit - self.count).max(0)
    }
}

pub fn transition(
    from: MilestoneStatus,
    action: MilestoneAction,
    revisions: Revisions,
) -> EngineResult<MilestoneStatus> {
    use MilestoneAction::*;
    use MilestoneStatus::*;
    match (from, action) {
        (Pending, Start) => Ok(InProgress),
        (InProgress | RevisionRequested, Submit) => Ok(Submitted),
        (Submitted, Approve) => Ok(Approved),
        (Submitted, RequestRevision) => {
            if revisions.count >= revisions.limit {
                Err(EngineError::RevisionLimitExceeded {
                    limit: revisions.limit,
                })
            } else {
                Ok(RevisionRequested)
            }
        }
        (InProgress | Submitted | RevisionRequested, Dispute) => Ok(Disputed),
        (from, action) => Err(EngineError::precondition(format!(
            "milestone cannot {:?} while {}",
            action, from
        ))),
    }
}

/// Deadline after which an unreviewed submission is auto-released.
pub fn auto_release_deadline(submitted_at: DateTime<Utc>, review_window: Duration) -> DateTime<Utc> {
    submitted_at + review_window
}

/// Whether the milestone at `index` is next in line, i.e. every earlier
/// milestone is APPROVED.
pub fn is_next_in_order(ordered: &[MilestoneStatus], index: usize) -> bool {
    index < ordered.len()
        && ordered[..index]
            .iter()
            .all(|s| *s == MilestoneStatus::Approved)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceViolation {
    #[error("in-progress project has no active milestone")]
    NoActiveMilestone,
    #[error("{count} milestones hold the active slot")]
    MultipleActive { count: usize },
    #[error("milestone {index} precedes the active one but is {status}")]
    UnsettledBefore { index: usize, status: MilestoneStatus },
    #[error("milestone {index} follows the active one but is {status}")]
    StartedAfter { index: usize, status: MilestoneStatus },
    #[error("completed project has milestone {index} in {status}")]
    IncompleteOnCompletion { index: usize, status: MilestoneStatus },
    #[error("{status} project already has milestones")]
    PrematureMilestones { status: ProjectStatus },
}

/// Verify the sequencing rule over a project's milestones in sort order.
pub fn check_sequence(
    project: ProjectStatus,
    ordered: &[MilestoneStatus],
) -> Result<(), SequenceViolation> {
    match project {
        ProjectStatus::Draft | ProjectStatus::Open => {
            if ordered.is_empty() {
                Ok(())
            } else {
                Err(SequenceViolation::PrematureMilestones { status: project })
            }
        }
        ProjectStatus::Completed => {
            match ordered
                .iter()
                .enumerate()
                .find(|(_, s)| **s != MilestoneStatus::Approved)
            {
                Some((index, status)) => Err(SequenceViolation::IncompleteOnCompletion {
                    index,
                    status: *status,
                }),
                None => Ok(()),
            }
        }
        // Cancellation freezes whatever state the milestones were in.
        ProjectStatus::Cancelled => Ok(()),
        ProjectStatus::InProgress => {
            let active: Vec<usize> = ordered
                .iter()
                .enumerate()
                .filter(|(_, s)| s.occupies_active_slot())
                .map(|(i, _)| i)
                .collect();
            let slot = match active.as_slice() {
                [] => return Err(SequenceViolation::NoActiveMilestone),
                [one] => *one,
                many => return Err(SequenceViolation::MultipleActive { count: many.len() }),
            };
            for (index, status) in ordered.iter().enumerate() {
                if index < slot && *status != MilestoneStatus::Approved {
                    return Err(SequenceViolation::UnsettledBefore {
                        index,
                        status: *status,
                    });
                }
                if index > slot && *status != MilestoneStatus::Pending {
                    return Err(SequenceViolation::StartedAfter {
                        index,
                        status: *status,
                    });
                }
            }
            Ok(())
        }
    }
}
