//! Analyst proposals and the milestone plan they carry.
//!
//! A proposal is validated once, at submission. Engagement formation copies
//! the descriptors verbatim into milestones, so the amounts must already sum
//! exactly to the proposed budget here.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::checked_total;

status_enum! {
    pub enum ProposalStatus {
        Pending => "PENDING",
        Accepted => "ACCEPTED",
        Rejected => "REJECTED",
    }
}

/// One planned milestone inside a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneDescriptor {
    pub title: String,
    pub description: String,
    pub amount: i64,
    #[serde(default)]
    pub due_date: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalDraft {
    pub cover_letter: String,
    pub proposed_budget: i64,
    pub proposed_days: i32,
    pub milestones: Vec<MilestoneDescriptor>,
}

impl ProposalDraft {
    pub fn validate(&self, policy: &EngineConfig) -> EngineResult<()> {
        let letter_len = self.cover_letter.trim().chars().count();
        if letter_len < policy.min_cover_letter_chars {
            return Err(EngineError::validation(format!(
                "cover letter must be at least {} characters, got {}",
                policy.min_cover_letter_chars, letter_len
            )));
        }
        if self.proposed_budget < policy.min_proposal_budget {
            return Err(EngineError::validation(format!(
                "proposed budget must be at least {}, got {}",
                policy.min_proposal_budget, self.proposed_budget
            )));
        }
        if self.proposed_days < 1 {
            return Err(EngineError::validation("proposed duration must be at least one day"));
        }
        if self.milestones.is_empty() {
            return Err(EngineError::validation("at least one milestone is required"));
        }
        for (i, m) in self.milestones.iter().enumerate() {
            if m.title.trim().is_empty() || m.description.trim().is_empty() {
                return Err(EngineError::validation(format!(
                    "milestone {} needs a title and description",
                    i + 1
                )));
            }
            if m.amount <= 0 {
                return Err(EngineError::validation(format!(
                    "milestone {} amount must be positive",
                    i + 1
                )));
            }
        }
        let total = checked_total(self.milestones.iter().map(|m| m.amount))
            .ok_or_else(|| EngineError::validation("milestone amounts overflow"))?;
        if total != self.proposed_budget {
            return Err(EngineError::validation(format!(
                "milestone amounts sum to {} but proposed budget is {}",
                total, self.proposed_budget
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn milestone(amount: i64) -> MilestoneDescriptor {
        MilestoneDescriptor {
            title: "Data cleaning".into(),
            description: "Deduplicate and normalise the sales export".into(),
            amount,
            due_date: None,
        }
    }

    fn draft(amounts: &[i64], budget: i64) -> ProposalDraft {
        ProposalDraft {
            cover_letter: "I have six years of retail analytics experience with Python and SQL."
                .into(),
            proposed_budget: budget,
            proposed_days: 14,
            milestones: amounts.iter().copied().map(milestone).collect(),
        }
    }

    #[test]
    fn accepts_exact_sum() {
        let policy = EngineConfig::default();
        assert!(draft(&[400_000, 600_000], 1_000_000).validate(&policy).is_ok());
    }

    #[test]
    fn rejects_mismatched_sum() {
        let policy = EngineConfig::default();
        let err = draft(&[400_000, 500_000], 1_000_000)
            .validate(&policy)
            .unwrap_err();
        assert!(err.to_string().contains("sum to 900000"));
    }

    #[test]
    fn rejects_overflowing_amounts() {
        let policy = EngineConfig::default();
        let err = draft(&[i64::MAX, 1], 1_000_000).validate(&policy).unwrap_err();
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn rejects_short_cover_letter_and_low_budget() {
        let policy = EngineConfig::default();
        let mut d = draft(&[600_000], 600_000);
        d.cover_letter = "Hire me".into();
        assert!(matches!(d.validate(&policy), Err(EngineError::Validation(_))));

        let d = draft(&[100_000], 100_000);
        assert!(d.validate(&policy).is_err());
    }

    #[test]
    fn rejects_empty_plan_and_zero_amounts() {
        let policy = EngineConfig::default();
        assert!(draft(&[], 600_000).validate(&policy).is_err());
        assert!(draft(&[600_000, 0], 600_000).validate(&policy).is_err());
    }

    #[test]
    fn rejects_zero_days() {
        let policy = EngineConfig::default();
        let mut d = draft(&[600_000], 600_000);
        d.proposed_days = 0;
        assert!(d.validate(&policy).is_err());
    }
}
