use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::domain::{ActorId, Agreement, AgreementId, RentalStatus};
use super::lifecycle::RentalAction;
use super::repository::{Notifier, RentalRepository};
use super::service::{notice, RentalError, RentalLifecycleService, Staged};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverdueOutcome {
    BecameOverdue,
    NoLongerOverdue,
    Unchanged,
}

impl OverdueOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            Self::BecameOverdue => "became_overdue",
            Self::NoLongerOverdue => "no_longer_overdue",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Past its expected end date by calendar day with no actual end recorded.
fn past_due(agreement: &Agreement, now: DateTime<Utc>) -> bool {
    agreement.actual_end_date.is_none() && now.date_naive() > agreement.expected_end_date
}

/// Decide, without side effects, which flip (if any) `now` calls for.
pub fn evaluate_overdue(agreement: &Agreement, now: DateTime<Utc>) -> OverdueOutcome {
    match agreement.status {
        RentalStatus::Active | RentalStatus::PaymentPending if past_due(agreement, now) => {
            OverdueOutcome::BecameOverdue
        }
        RentalStatus::Overdue if !past_due(agreement, now) => OverdueOutcome::NoLongerOverdue,
        _ => OverdueOutcome::Unchanged,
    }
}

impl<R, N> RentalLifecycleService<R, N>
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    /// Flip an agreement into or out of `overdue` as of `now`. Repeated calls
    /// with the same inputs change nothing after the first.
    pub fn check_overdue_status(
        &self,
        agreement_id: &AgreementId,
        now: DateTime<Utc>,
    ) -> Result<OverdueOutcome, RentalError> {
        let system = ActorId::system();
        let outcome = self.mutate(agreement_id, |record, _| {
            let outcome = evaluate_overdue(&record.agreement, now);
            let (action, template) = match outcome {
                OverdueOutcome::BecameOverdue => (RentalAction::FlagOverdue, "overdue"),
                OverdueOutcome::NoLongerOverdue => {
                    (RentalAction::ClearOverdue, "overdue_cleared")
                }
                OverdueOutcome::Unchanged => return Ok(Staged::unchanged(outcome)),
            };

            let staged = self.stage_transition(record, action, &system, now, |changes, _| {
                let agreement = &changes.agreement;
                let mut details = BTreeMap::new();
                details.insert(
                    "expected_end_date".to_string(),
                    agreement.expected_end_date.to_string(),
                );
                changes.note = Some(match outcome {
                    OverdueOutcome::BecameOverdue => format!(
                        "Past expected end date {}",
                        agreement.expected_end_date
                    ),
                    _ => format!(
                        "Expected end date {} no longer passed",
                        agreement.expected_end_date
                    ),
                });
                let notice = notice(template, agreement, details);
                changes.notices.push(notice);
                Ok(())
            })?;
            Ok(staged.with_output(outcome))
        })?;

        if outcome != OverdueOutcome::Unchanged {
            info!(
                agreement_id = %agreement_id,
                outcome = outcome.label(),
                "overdue status changed"
            );
        }
        Ok(outcome)
    }
}
