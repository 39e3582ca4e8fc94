//! Extension requests against an agreement's expected end date.
//!
//! Requests are resolved independently of the lifecycle: approval moves the
//! agreement's `expected_end_date`, rejection leaves it alone, and neither
//! changes the agreement status. Each event is written to the status log.

use chrono::NaiveDate;
use tracing::info;

use super::audit::{LoggedEvent, StatusLogEntry};
use super::domain::{
    ActorId, AgreementId, ExtensionId, ExtensionRequest, ExtensionStatus, RentalStatus,
};
use super::repository::{Notifier, RentalRepository};
use super::service::{next_extension_id, Changes, RentalError, RentalLifecycleService, Staged};

/// Outcome of resolving a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Approve,
    Reject,
}

impl Resolution {
    fn operation(self) -> &'static str {
        match self {
            Self::Approve => "approve_extension",
            Self::Reject => "reject_extension",
        }
    }
}

impl<R, N> RentalLifecycleService<R, N>
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    pub fn request_extension(
        &self,
        agreement_id: &AgreementId,
        new_end_date: NaiveDate,
        reason: &str,
        actor: &ActorId,
    ) -> Result<ExtensionRequest, RentalError> {
        let reason = reason.trim();
        let minimum = self.policy.min_extension_reason_len;
        if reason.chars().count() < minimum {
            return Err(RentalError::Validation(format!(
                "extension reason must be at least {minimum} characters"
            )));
        }

        let request = self.mutate(agreement_id, |record, now| {
            let agreement = record.agreement;
            if agreement.status.is_terminal() {
                return Err(RentalError::invalid_transition(
                    "request_extension",
                    agreement.status,
                    &RentalStatus::OPEN,
                ));
            }
            if new_end_date <= agreement.expected_end_date {
                return Err(RentalError::Validation(format!(
                    "new end date {new_end_date} must be after the current expected end date {}",
                    agreement.expected_end_date
                )));
            }
            if let Some(pending) = &agreement.pending_extension {
                return Err(RentalError::Conflict(format!(
                    "extension {pending} is already pending for rental {agreement_id}"
                )));
            }

            let request = ExtensionRequest {
                id: next_extension_id(),
                agreement_id: agreement.id.clone(),
                previous_end_date: agreement.expected_end_date,
                new_end_date,
                reason: reason.to_string(),
                status: ExtensionStatus::Pending,
                requested_by: actor.clone(),
                requested_at: now,
                resolved_by: None,
                resolved_at: None,
                rejection_reason: None,
            };

            let mut changes = Changes::new(agreement);
            changes.agreement.pending_extension = Some(request.id.clone());
            changes.log_entries.push(StatusLogEntry::extension(
                &changes.agreement.id,
                changes.agreement.status,
                LoggedEvent::ExtensionRequested,
                actor.clone(),
                now,
                Some(reason.to_string()),
            ));
            changes.extension = Some(request.clone());
            Ok(Staged::commit(request, changes))
        })?;

        info!(
            agreement_id = %agreement_id,
            extension_id = %request.id,
            new_end_date = %request.new_end_date,
            actor = %actor,
            "extension requested"
        );
        Ok(request)
    }

    pub fn approve_extension(
        &self,
        extension_id: &ExtensionId,
        actor: &ActorId,
    ) -> Result<ExtensionRequest, RentalError> {
        self.resolve_extension(extension_id, actor, Resolution::Approve, None)
    }

    pub fn reject_extension(
        &self,
        extension_id: &ExtensionId,
        actor: &ActorId,
        reason: &str,
    ) -> Result<ExtensionRequest, RentalError> {
        let reason = reason.trim();
        let minimum = self.policy.min_rejection_reason_len;
        if reason.chars().count() < minimum {
            return Err(RentalError::Validation(format!(
                "rejection reason must be at least {minimum} characters"
            )));
        }
        self.resolve_extension(extension_id, actor, Resolution::Reject, Some(reason))
    }

    /// Every request filed against an agreement, oldest first.
    pub fn extensions(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<ExtensionRequest>, RentalError> {
        self.load(agreement_id)?;
        Ok(self.repository.extensions(agreement_id)?)
    }

    fn resolve_extension(
        &self,
        extension_id: &ExtensionId,
        actor: &ActorId,
        resolution: Resolution,
        rejection_reason: Option<&str>,
    ) -> Result<ExtensionRequest, RentalError> {
        let agreement_id = self.fetch_extension(extension_id)?.agreement_id;

        let resolved = self.mutate(&agreement_id, |record, now| {
            // Re-read inside the cycle so a concurrent resolution is observed.
            let mut request = self.fetch_extension(extension_id)?;
            if request.status != ExtensionStatus::Pending {
                return Err(RentalError::InvalidExtensionTransition {
                    operation: resolution.operation(),
                    extension_id: extension_id.clone(),
                    current: request.status,
                });
            }

            let mut agreement = record.agreement;
            let event = match resolution {
                Resolution::Approve => {
                    if agreement.status.is_terminal() {
                        return Err(RentalError::invalid_transition(
                            resolution.operation(),
                            agreement.status,
                            &RentalStatus::OPEN,
                        ));
                    }
                    request.status = ExtensionStatus::Approved;
                    agreement.expected_end_date = request.new_end_date;
                    LoggedEvent::ExtensionApproved
                }
                Resolution::Reject => {
                    request.status = ExtensionStatus::Rejected;
                    request.rejection_reason = rejection_reason.map(str::to_string);
                    LoggedEvent::ExtensionRejected
                }
            };
            request.resolved_by = Some(actor.clone());
            request.resolved_at = Some(now);
            if agreement.pending_extension.as_ref() == Some(&request.id) {
                agreement.pending_extension = None;
            }

            let note = match resolution {
                Resolution::Approve => format!(
                    "Expected end date moved from {} to {}",
                    request.previous_end_date, request.new_end_date
                ),
                Resolution::Reject => rejection_reason.unwrap_or_default().to_string(),
            };
            let mut changes = Changes::new(agreement);
            changes.log_entries.push(StatusLogEntry::extension(
                &changes.agreement.id,
                changes.agreement.status,
                event,
                actor.clone(),
                now,
                Some(note),
            ));
            changes.extension = Some(request.clone());
            Ok(Staged::commit(request, changes))
        })?;

        info!(
            agreement_id = %agreement_id,
            extension_id = %extension_id,
            status = %resolved.status,
            actor = %actor,
            "extension resolved"
        );
        Ok(resolved)
    }

    fn fetch_extension(&self, extension_id: &ExtensionId) -> Result<ExtensionRequest, RentalError> {
        self.repository
            .fetch_extension(extension_id)?
            .ok_or_else(|| RentalError::not_found("extension request", extension_id))
    }
}
