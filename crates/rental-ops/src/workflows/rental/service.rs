use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::audit::{workflow_history, StatusLogEntry, WorkflowHistoryEntry};
use super::domain::{
    ActorId, Agreement, AgreementId, Approval, ExtensionId, ExtensionRequest, ExtensionStatus,
    InvoiceId, InvoiceSnapshot, NewAgreement, QuotationId, QuotationSnapshot, RentalStatus,
    Totals,
};
use super::lifecycle::{self, RentalAction, RentalCommand};
use super::pricing::{PricingError, RecalculationEngine};
use super::repository::{
    AgreementRecord, Notifier, RentalCommit, RentalNotice, RentalRepository, RepositoryError,
};
use crate::config::LifecyclePolicy;

/// Source of the current instant, injectable so tests can pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

static RENTAL_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static LINE_ITEM_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static QUOTATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static INVOICE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static EXTENSION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next(sequence: &AtomicU64) -> u64 {
    sequence.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn next_line_item_seq() -> u64 {
    next(&LINE_ITEM_SEQUENCE)
}

pub(crate) fn next_extension_id() -> ExtensionId {
    ExtensionId(format!("ext-{:06}", next(&EXTENSION_SEQUENCE)))
}

fn document_number(prefix: &str, at: DateTime<Utc>, sequence: u64) -> String {
    format!("{prefix}-{}-{sequence:05}", at.year())
}

/// Writes staged by one read-validate-compute pass over an agreement.
pub(crate) struct Changes {
    pub(crate) agreement: Agreement,
    pub(crate) log_entries: Vec<StatusLogEntry>,
    pub(crate) quotation: Option<QuotationSnapshot>,
    pub(crate) invoice: Option<InvoiceSnapshot>,
    pub(crate) extension: Option<ExtensionRequest>,
    pub(crate) notices: Vec<RentalNotice>,
    /// Note for the transition's log entry; effects may replace it.
    pub(crate) note: Option<String>,
}

impl Changes {
    pub(crate) fn new(agreement: Agreement) -> Self {
        Self {
            agreement,
            log_entries: Vec::new(),
            quotation: None,
            invoice: None,
            extension: None,
            notices: Vec::new(),
            note: None,
        }
    }
}

pub(crate) struct Staged<T> {
    output: T,
    changes: Option<Changes>,
}

impl<T> Staged<T> {
    pub(crate) fn commit(output: T, changes: Changes) -> Self {
        Self {
            output,
            changes: Some(changes),
        }
    }

    pub(crate) fn unchanged(output: T) -> Self {
        Self {
            output,
            changes: None,
        }
    }

    pub(crate) fn with_output<U>(self, output: U) -> Staged<U> {
        Staged {
            output,
            changes: self.changes,
        }
    }
}

/// Lifecycle engine for rental agreements.
///
/// Every mutation is a read-validate-compute-commit cycle against the
/// repository's revision token; a lost race re-reads and re-validates, up to
/// the policy's attempt limit.
pub struct RentalLifecycleService<R, N> {
    pub(crate) repository: Arc<R>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    pub(crate) engine: RecalculationEngine,
    pub(crate) policy: LifecyclePolicy,
}

impl<R, N> RentalLifecycleService<R, N>
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    pub fn new(repository: Arc<R>, notifier: Arc<N>, policy: LifecyclePolicy) -> Self {
        Self::with_clock(repository, notifier, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repository: Arc<R>,
        notifier: Arc<N>,
        policy: LifecyclePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = RecalculationEngine::new(&policy);
        Self {
            repository,
            notifier,
            clock,
            engine,
            policy,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Register a new agreement in `pending` with its initial ledger.
    pub fn open_agreement(
        &self,
        request: NewAgreement,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        let NewAgreement {
            customer_ref,
            start_date,
            expected_end_date,
            discount_percentage,
            tax_percentage,
            payment_terms,
            line_items,
        } = request;

        if customer_ref.trim().is_empty() {
            return Err(RentalError::Validation(
                "customer reference is required".to_string(),
            ));
        }
        if let Some(start) = start_date {
            if expected_end_date < start {
                return Err(RentalError::Validation(format!(
                    "expected end date {expected_end_date} precedes start date {start}"
                )));
            }
        }
        super::ledger::validate_percentage("discount_percentage", discount_percentage)?;
        super::ledger::validate_percentage("tax_percentage", tax_percentage)?;
        let line_items = line_items
            .into_iter()
            .map(super::ledger::build_line_item)
            .collect::<Result<Vec<_>, _>>()?;

        let now = self.clock.now();
        let sequence = next(&RENTAL_SEQUENCE);
        let mut agreement = Agreement {
            id: AgreementId(format!("rent-{sequence:06}")),
            rental_number: document_number("RENT", now, sequence),
            customer_ref,
            line_items,
            status: RentalStatus::Pending,
            start_date,
            expected_end_date,
            actual_end_date: None,
            discount_percentage,
            tax_percentage,
            totals: Totals::default(),
            payment_terms: payment_terms.unwrap_or(self.policy.default_payment_terms),
            quotation_id: None,
            quotation_approval: None,
            invoice_ids: Vec::new(),
            invoice_date: None,
            payment_due_date: None,
            pending_extension: None,
            created_by: actor.clone(),
            created_at: now,
        };
        self.engine.recalculate(&mut agreement)?;

        let entry = StatusLogEntry::created(&agreement.id, actor.clone(), now);
        let record = self.repository.insert(agreement, entry)?;
        info!(
            agreement_id = %record.agreement.id,
            rental_number = %record.agreement.rental_number,
            actor = %actor,
            "rental agreement opened"
        );
        Ok(record.agreement)
    }

    /// Fetch an agreement and its revision for API responses.
    pub fn get(&self, agreement_id: &AgreementId) -> Result<AgreementRecord, RentalError> {
        self.load(agreement_id)
    }

    pub fn available_actions(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<RentalAction>, RentalError> {
        let record = self.load(agreement_id)?;
        Ok(lifecycle::available_actions(record.agreement.status))
    }

    pub fn status_log(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<StatusLogEntry>, RentalError> {
        self.load(agreement_id)?;
        Ok(self.repository.status_log(agreement_id)?)
    }

    pub fn history(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<WorkflowHistoryEntry>, RentalError> {
        let entries = self.status_log(agreement_id)?;
        Ok(workflow_history(&entries))
    }

    pub fn quotation(&self, agreement_id: &AgreementId) -> Result<QuotationSnapshot, RentalError> {
        let record = self.load(agreement_id)?;
        let missing = || RentalError::not_found("quotation for rental", agreement_id);
        let quotation_id = record.agreement.quotation_id.ok_or_else(missing)?;
        self.repository.quotation(&quotation_id)?.ok_or_else(missing)
    }

    pub fn invoices(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<InvoiceSnapshot>, RentalError> {
        self.load(agreement_id)?;
        Ok(self.repository.invoices(agreement_id)?)
    }

    /// Execute a caller-issued transition.
    pub fn apply(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
        command: RentalCommand,
    ) -> Result<Agreement, RentalError> {
        let action = command.action();
        match command {
            RentalCommand::GenerateQuotation => {
                self.transition(agreement_id, actor, action, |changes, now| {
                    self.stage_quotation(changes, actor, now)
                })
            }
            RentalCommand::ApproveQuotation => {
                self.transition(agreement_id, actor, action, |changes, now| {
                    changes.agreement.quotation_approval = Some(Approval {
                        actor: actor.clone(),
                        at: now,
                    });
                    changes.note = Some("Quotation approved".to_string());
                    Ok(())
                })
            }
            RentalCommand::StartMobilization
            | RentalCommand::CompleteMobilization
            | RentalCommand::MarkClosed => {
                self.transition(agreement_id, actor, action, |_, _| Ok(()))
            }
            RentalCommand::StartRental => {
                self.transition(agreement_id, actor, action, |changes, now| {
                    changes
                        .agreement
                        .start_date
                        .get_or_insert(now.date_naive());
                    Ok(())
                })
            }
            RentalCommand::CompleteRental => {
                self.transition(agreement_id, actor, action, |changes, now| {
                    changes.agreement.actual_end_date = Some(now.date_naive());
                    Ok(())
                })
            }
            RentalCommand::CreateInvoice => {
                self.transition(agreement_id, actor, action, |changes, now| {
                    self.stage_invoice(changes, actor, now)
                })
            }
            RentalCommand::MarkPaymentPending => {
                self.transition(agreement_id, actor, action, |changes, _| {
                    let agreement = &changes.agreement;
                    let mut details = BTreeMap::new();
                    details.insert(
                        "total_amount".to_string(),
                        agreement.totals.total_amount.to_string(),
                    );
                    if let Some(due) = agreement.payment_due_date {
                        details.insert("payment_due_date".to_string(), due.to_string());
                    }
                    let notice = notice("payment_pending", agreement, details);
                    changes.notices.push(notice);
                    Ok(())
                })
            }
            RentalCommand::Cancel { reason } => {
                self.transition(agreement_id, actor, action, |changes, _| {
                    let reason = reason.trim();
                    if reason.is_empty() {
                        return Err(RentalError::Validation(
                            "a cancellation reason is required".to_string(),
                        ));
                    }
                    changes.note = Some(reason.to_string());
                    Ok(())
                })
            }
        }
    }

    pub fn generate_quotation(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        self.apply(agreement_id, actor, RentalCommand::GenerateQuotation)
    }

    pub fn approve_quotation(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        self.apply(agreement_id, actor, RentalCommand::ApproveQuotation)
    }

    pub fn start_mobilization(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        self.apply(agreement_id, actor, RentalCommand::StartMobilization)
    }

    pub fn complete_mobilization(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        self.apply(agreement_id, actor, RentalCommand::CompleteMobilization)
    }

    pub fn start_rental(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        self.apply(agreement_id, actor, RentalCommand::StartRental)
    }

    pub fn complete_rental(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        self.apply(agreement_id, actor, RentalCommand::CompleteRental)
    }

    pub fn create_invoice(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        self.apply(agreement_id, actor, RentalCommand::CreateInvoice)
    }

    pub fn mark_payment_pending(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        self.apply(agreement_id, actor, RentalCommand::MarkPaymentPending)
    }

    pub fn mark_closed(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        self.apply(agreement_id, actor, RentalCommand::MarkClosed)
    }

    pub fn cancel(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
        reason: &str,
    ) -> Result<Agreement, RentalError> {
        self.apply(
            agreement_id,
            actor,
            RentalCommand::Cancel {
                reason: reason.to_string(),
            },
        )
    }

    pub(crate) fn load(&self, agreement_id: &AgreementId) -> Result<AgreementRecord, RentalError> {
        self.repository
            .fetch(agreement_id)?
            .ok_or_else(|| RentalError::not_found("rental", agreement_id))
    }

    /// Optimistic read-validate-commit loop shared by every mutating operation.
    pub(crate) fn mutate<T, F>(
        &self,
        agreement_id: &AgreementId,
        mut stage: F,
    ) -> Result<T, RentalError>
    where
        F: FnMut(AgreementRecord, DateTime<Utc>) -> Result<Staged<T>, RentalError>,
    {
        let attempts = self.policy.max_commit_attempts.max(1);
        for attempt in 1..=attempts {
            let record = self.load(agreement_id)?;
            let expected_version = record.version;
            let staged = stage(record, self.clock.now())?;
            let Some(changes) = staged.changes else {
                return Ok(staged.output);
            };

            let Changes {
                agreement,
                log_entries,
                quotation,
                invoice,
                extension,
                notices,
                note: _,
            } = changes;
            let commit = RentalCommit {
                expected_version,
                agreement,
                log_entries,
                quotation,
                invoice,
                extension,
            };

            match self.repository.commit(commit) {
                Ok(_) => {
                    self.dispatch(notices);
                    return Ok(staged.output);
                }
                Err(RepositoryError::VersionMismatch { expected, actual }) => {
                    debug!(
                        agreement_id = %agreement_id,
                        attempt,
                        expected,
                        actual,
                        "rental modified concurrently; retrying"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(
            agreement_id = %agreement_id,
            attempts,
            "giving up after repeated version conflicts"
        );
        Err(RentalError::ConcurrentModification {
            agreement_id: agreement_id.clone(),
            attempts,
        })
    }

    /// Validate `action` against the table, run its side effect and stage the
    /// status write plus its log entry.
    pub(crate) fn stage_transition<F>(
        &self,
        record: AgreementRecord,
        action: RentalAction,
        actor: &ActorId,
        at: DateTime<Utc>,
        effect: F,
    ) -> Result<Staged<(RentalStatus, Agreement)>, RentalError>
    where
        F: FnOnce(&mut Changes, DateTime<Utc>) -> Result<(), RentalError>,
    {
        let from = record.agreement.status;
        if !action.permits(from) {
            return Err(RentalError::invalid_transition(
                action.label(),
                from,
                action.sources(),
            ));
        }

        let mut changes = Changes::new(record.agreement);
        effect(&mut changes, at)?;

        let to = action.target();
        changes.agreement.status = to;
        let entry = StatusLogEntry::transition(
            &changes.agreement.id,
            from,
            to,
            actor.clone(),
            at,
            changes.note.take(),
        );
        changes.log_entries.push(entry);

        let output = (from, changes.agreement.clone());
        Ok(Staged::commit(output, changes))
    }

    fn transition<F>(
        &self,
        agreement_id: &AgreementId,
        actor: &ActorId,
        action: RentalAction,
        effect: F,
    ) -> Result<Agreement, RentalError>
    where
        F: Fn(&mut Changes, DateTime<Utc>) -> Result<(), RentalError>,
    {
        let (from, agreement) = self.mutate(agreement_id, |record, now| {
            self.stage_transition(record, action, actor, now, &effect)
        })?;

        info!(
            agreement_id = %agreement.id,
            action = action.label(),
            from = %from,
            to = %agreement.status,
            actor = %actor,
            "rental transition committed"
        );
        Ok(agreement)
    }

    fn stage_quotation(
        &self,
        changes: &mut Changes,
        actor: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<(), RentalError> {
        let agreement = &mut changes.agreement;
        if agreement.line_items.is_empty() {
            return Err(RentalError::PreconditionFailed(
                "rental has no line items; add items before generating a quotation".to_string(),
            ));
        }

        let totals = self.engine.recalculate(agreement)?;
        let sequence = next(&QUOTATION_SEQUENCE);
        let issue_date = now.date_naive();
        let quotation = QuotationSnapshot {
            id: QuotationId(format!("quo-{sequence:06}")),
            quotation_number: document_number("QUO", now, sequence),
            agreement_id: agreement.id.clone(),
            customer_ref: agreement.customer_ref.clone(),
            issue_date,
            valid_until: issue_date
                + Duration::days(i64::from(self.policy.quotation_validity_days)),
            line_items: agreement.line_items.clone(),
            discount_percentage: agreement.discount_percentage.unwrap_or(Decimal::ZERO),
            tax_percentage: agreement
                .tax_percentage
                .unwrap_or(self.engine.default_tax_percentage()),
            totals,
            created_by: actor.clone(),
            created_at: now,
        };

        agreement.quotation_id = Some(quotation.id.clone());
        changes.note = Some(format!("Quotation {} generated", quotation.quotation_number));
        changes.quotation = Some(quotation);
        Ok(())
    }

    fn stage_invoice(
        &self,
        changes: &mut Changes,
        actor: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<(), RentalError> {
        let agreement = &mut changes.agreement;
        let totals = self.engine.recalculate(agreement)?;
        let sequence = next(&INVOICE_SEQUENCE);
        let invoice_date = now.date_naive();
        let due_date = invoice_date + Duration::days(i64::from(agreement.payment_terms.days()));
        let invoice = InvoiceSnapshot {
            id: InvoiceId(format!("inv-{sequence:06}")),
            invoice_number: document_number("INV", now, sequence),
            agreement_id: agreement.id.clone(),
            customer_ref: agreement.customer_ref.clone(),
            invoice_date,
            due_date,
            line_items: agreement.line_items.clone(),
            totals,
            balance: totals.total_amount,
            created_by: actor.clone(),
            created_at: now,
        };

        agreement.invoice_ids.push(invoice.id.clone());
        agreement.invoice_date = Some(invoice_date);
        agreement.payment_due_date = Some(due_date);
        changes.note = Some(format!("Invoice {} prepared", invoice.invoice_number));
        changes.invoice = Some(invoice);
        Ok(())
    }

    /// Fire-and-forget: a failed notification never undoes a committed write.
    fn dispatch(&self, notices: Vec<RentalNotice>) {
        for notice in notices {
            let template = notice.template.clone();
            let agreement_id = notice.agreement_id.clone();
            if let Err(error) = self.notifier.notify(notice) {
                warn!(
                    agreement_id = %agreement_id,
                    template = %template,
                    %error,
                    "rental notification failed"
                );
            }
        }
    }
}

pub(crate) fn notice(
    template: &str,
    agreement: &Agreement,
    details: BTreeMap<String, String>,
) -> RentalNotice {
    RentalNotice {
        template: template.to_string(),
        agreement_id: agreement.id.clone(),
        rental_number: agreement.rental_number.clone(),
        details,
    }
}

/// Coarse classification of service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTransition,
    PreconditionFailed,
    Validation,
    Conflict,
    ConcurrentModification,
    NotFound,
    Unavailable,
}

/// Error raised by the rental lifecycle service.
#[derive(Debug, thiserror::Error)]
pub enum RentalError {
    #[error("cannot {operation} while rental is {current}; requires one of: {}", status_list(.required))]
    InvalidTransition {
        operation: &'static str,
        current: RentalStatus,
        required: Vec<RentalStatus>,
    },
    #[error("cannot {operation} extension {extension_id}: request is already {current}")]
    InvalidExtensionTransition {
        operation: &'static str,
        extension_id: ExtensionId,
        current: ExtensionStatus,
    },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rental {agreement_id} was modified concurrently; gave up after {attempts} attempts")]
    ConcurrentModification {
        agreement_id: AgreementId,
        attempts: u32,
    },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("validation failed: {0}")]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl RentalError {
    pub(crate) fn invalid_transition(
        operation: &'static str,
        current: RentalStatus,
        required: &[RentalStatus],
    ) -> Self {
        Self::InvalidTransition {
            operation,
            current,
            required: required.to_vec(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTransition { .. } | Self::InvalidExtensionTransition { .. } => {
                ErrorKind::InvalidTransition
            }
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::Validation(_) | Self::Pricing(_) => ErrorKind::Validation,
            Self::Conflict(_) | Self::Repository(RepositoryError::Conflict(_)) => {
                ErrorKind::Conflict
            }
            Self::ConcurrentModification { .. }
            | Self::Repository(RepositoryError::VersionMismatch { .. }) => {
                ErrorKind::ConcurrentModification
            }
            Self::NotFound { .. } | Self::Repository(RepositoryError::NotFound) => {
                ErrorKind::NotFound
            }
            Self::Repository(RepositoryError::Unavailable(_)) => ErrorKind::Unavailable,
        }
    }
}

fn status_list(statuses: &[RentalStatus]) -> String {
    statuses
        .iter()
        .map(|status| status.label())
        .collect::<Vec<_>>()
        .join(", ")
}
