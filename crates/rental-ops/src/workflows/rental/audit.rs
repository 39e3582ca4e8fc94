use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ActorId, AgreementId, RentalStatus};

/// What a status log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum LoggedEvent {
    /// The agreement's lifecycle status was written.
    Status(RentalStatus),
    ExtensionRequested,
    ExtensionApproved,
    ExtensionRejected,
}

impl LoggedEvent {
    /// The status value persisted on the entry.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Status(status) => status.label(),
            Self::ExtensionRequested => "extension_requested",
            Self::ExtensionApproved => "extension_approved",
            Self::ExtensionRejected => "extension_rejected",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Status(status) => status.display_name(),
            Self::ExtensionRequested => "Extension Requested",
            Self::ExtensionApproved => "Extension Approved",
            Self::ExtensionRejected => "Extension Rejected",
        }
    }
}

/// Append-only audit record; one per committed transition or extension event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub agreement_id: AgreementId,
    /// Lifecycle status before the write; `None` for the creation entry.
    pub from_status: Option<RentalStatus>,
    pub event: LoggedEvent,
    pub actor: ActorId,
    pub recorded_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl StatusLogEntry {
    pub fn created(agreement_id: &AgreementId, actor: ActorId, at: DateTime<Utc>) -> Self {
        Self {
            agreement_id: agreement_id.clone(),
            from_status: None,
            event: LoggedEvent::Status(RentalStatus::Pending),
            actor,
            recorded_at: at,
            note: Some("Rental created".to_string()),
        }
    }

    pub fn transition(
        agreement_id: &AgreementId,
        from: RentalStatus,
        to: RentalStatus,
        actor: ActorId,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> Self {
        Self {
            agreement_id: agreement_id.clone(),
            from_status: Some(from),
            event: LoggedEvent::Status(to),
            actor,
            recorded_at: at,
            note,
        }
    }

    /// Extension events leave the lifecycle status where it was.
    pub fn extension(
        agreement_id: &AgreementId,
        current: RentalStatus,
        event: LoggedEvent,
        actor: ActorId,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> Self {
        Self {
            agreement_id: agreement_id.clone(),
            from_status: Some(current),
            event,
            actor,
            recorded_at: at,
            note,
        }
    }

    pub fn status(&self) -> &'static str {
        self.event.label()
    }
}

/// Presentation row for an agreement's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowHistoryEntry {
    pub sequence: usize,
    pub from_status: Option<&'static str>,
    pub to_status: &'static str,
    pub action: &'static str,
    pub changed_by: ActorId,
    pub date: DateTime<Utc>,
    pub description: Option<String>,
}

/// Order entries chronologically (stable for equal timestamps) and number them.
pub fn workflow_history(entries: &[StatusLogEntry]) -> Vec<WorkflowHistoryEntry> {
    let mut ordered: Vec<&StatusLogEntry> = entries.iter().collect();
    ordered.sort_by_key(|entry| entry.recorded_at);

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, entry)| WorkflowHistoryEntry {
            sequence: index + 1,
            from_status: entry.from_status.map(RentalStatus::label),
            to_status: entry.status(),
            action: entry.event.display_name(),
            changed_by: entry.actor.clone(),
            date: entry.recorded_at,
            description: entry.note.clone(),
        })
        .collect()
}
