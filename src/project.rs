//! Project lifecycle.
//!
//! ```text
//! DRAFT ──publish──▶ OPEN ──hire──▶ IN_PROGRESS ──complete──▶ COMPLETED
//!   │                 │                 │
//!   └─────cancel──────┴─────cancel──────┴──▶ CANCELLED
//! ```
//!
//! `hire` is only ever driven by engagement formation and `complete` only by
//! approval of the last milestone. A hired analyst is recorded exactly while
//! the project is IN_PROGRESS or COMPLETED.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

status_enum! {
    pub enum ProjectStatus {
        Draft => "DRAFT",
        Open => "OPEN",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

impl ProjectStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }

    /// Whether a project in this status must carry a hired analyst.
    pub fn requires_hired_analyst(self) -> bool {
        matches!(self, ProjectStatus::InProgress | ProjectStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectEvent {
    Publish,
    Hire,
    Complete,
    Cancel,
}

/// The single authoritative project transition table.
pub fn transition(from: ProjectStatus, event: ProjectEvent) -> EngineResult<ProjectStatus> {
    use ProjectEvent::*;
    use ProjectStatus::*;
    match (from, event) {
        (Draft, Publish) => Ok(Open),
        (Open, Hire) => Ok(InProgress),
        (InProgress, Complete) => Ok(Completed),
        (Draft | Open | InProgress, Cancel) => Ok(Cancelled),
        (from, event) => Err(EngineError::precondition(format!(
            "project cannot {:?} from {}",
            event, from
        ))),
    }
}

/// Client-supplied fields of a new project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub budget_min: i64,
    pub budget_max: i64,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    /// Create straight into OPEN rather than DRAFT.
    #[serde(default = "default_publish")]
    pub publish: bool,
}

fn default_publish() -> bool {
    true
}

impl ProjectDraft {
    pub fn validate(&self) -> EngineResult<()> {
        if self.title.trim().is_empty() {
            return Err(EngineError::validation("project title is required"));
        }
        if self.budget_min <= 0 || self.budget_max <= 0 {
            return Err(EngineError::validation("budget range must be positive"));
        }
        if self.budget_min > self.budget_max {
            return Err(EngineError::validation(format!(
                "budget_min {} exceeds budget_max {}",
                self.budget_min, self.budget_max
            )));
        }
        Ok(())
    }

    pub fn initial_status(&self) -> ProjectStatus {
        if self.publish {
            ProjectStatus::Open
        } else {
            ProjectStatus::Draft
        }
    }
}

/// `hired_analyst_id` is set iff the status requires one.
pub fn hire_invariant_holds(status: ProjectStatus, hired_analyst: Option<uuid::Uuid>) -> bool {
    status.requires_hired_analyst() == hired_analyst.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ProjectDraft {
        ProjectDraft {
            title: "Churn dashboard".into(),
            description: String::new(),
            budget_min: 500_000,
            budget_max: 2_000_000,
            deadline: None,
            publish: true,
        }
    }

    #[test]
    fn happy_path_lifecycle() {
        let s = transition(ProjectStatus::Draft, ProjectEvent::Publish).unwrap();
        let s = transition(s, ProjectEvent::Hire).unwrap();
        let s = transition(s, ProjectEvent::Complete).unwrap();
        assert_eq!(s, ProjectStatus::Completed);
    }

    #[test]
    fn hire_requires_open() {
        for from in [
            ProjectStatus::Draft,
            ProjectStatus::InProgress,
            ProjectStatus::Completed,
            ProjectStatus::Cancelled,
        ] {
            assert!(
                matches!(
                    transition(from, ProjectEvent::Hire),
                    Err(EngineError::PreconditionFailed(_))
                ),
                "hire from {} must fail",
                from
            );
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        for from in [ProjectStatus::Completed, ProjectStatus::Cancelled] {
            assert!(from.is_terminal());
            for event in [
                ProjectEvent::Publish,
                ProjectEvent::Hire,
                ProjectEvent::Complete,
                ProjectEvent::Cancel,
            ] {
                assert!(transition(from, event).is_err());
            }
        }
    }

    #[test]
    fn hire_invariant() {
        let analyst = Some(uuid::Uuid::new_v4());
        assert!(hire_invariant_holds(ProjectStatus::Open, None));
        assert!(hire_invariant_holds(ProjectStatus::InProgress, analyst));
        assert!(hire_invariant_holds(ProjectStatus::Completed, analyst));
        assert!(!hire_invariant_holds(ProjectStatus::InProgress, None));
        assert!(!hire_invariant_holds(ProjectStatus::Cancelled, analyst));
    }

    #[test]
    fn draft_validation() {
        assert!(draft().validate().is_ok());
        let mut d = draft();
        d.budget_min = 3_000_000;
        assert!(matches!(d.validate(), Err(EngineError::Validation(_))));
        let mut d = draft();
        d.title = "   ".into();
        assert!(d.validate().is_err());
        let mut d = draft();
        d.budget_min = 0;
        assert!(d.validate().is_err());
    }

    #[test]
    fn publish_flag_picks_initial_status() {
        let mut d = draft();
        assert_eq!(d.initial_status(), ProjectStatus::Open);
        d.publish = false;
        assert_eq!(d.initial_status(), ProjectStatus::Draft);
    }
}
