use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::LifecyclePolicy;
use crate::workflows::rental::audit::StatusLogEntry;
use crate::workflows::rental::domain::{
    ActorId, Agreement, AgreementId, ExtensionId, ExtensionRequest, InvoiceSnapshot,
    NewAgreement, NewLineItem, QuotationId, QuotationSnapshot, RateType, RentalStatus,
};
use crate::workflows::rental::lifecycle::RentalCommand;
use crate::workflows::rental::repository::{
    AgreementRecord, InMemoryRentalRepository, Notifier, NotifyError, RentalCommit,
    RentalNotice, RentalRepository, RepositoryError,
};
use crate::workflows::rental::service::{Clock, RentalLifecycleService};

pub(super) type TestService = RentalLifecycleService<InMemoryRentalRepository, MemoryNotifier>;

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// 2024-03-01 09:00 UTC, the agreement's expected end date in the fixtures.
pub(super) fn opening_time() -> DateTime<Utc> {
    at(2024, 3, 1, 9)
}

pub(super) fn actor() -> ActorId {
    ActorId("dispatcher-7".to_string())
}

pub(super) fn excavator() -> NewLineItem {
    NewLineItem {
        equipment_ref: "EXC-320".to_string(),
        operator_ref: Some("OP-12".to_string()),
        rate: Decimal::from(100),
        rate_type: RateType::Daily,
        quantity: 1,
        days: Some(5),
    }
}

/// Daily line without a stored duration; billed over the agreement period.
pub(super) fn light_tower() -> NewLineItem {
    NewLineItem {
        equipment_ref: "LT-04".to_string(),
        operator_ref: None,
        rate: Decimal::from(40),
        rate_type: RateType::Daily,
        quantity: 2,
        days: None,
    }
}

pub(super) fn new_agreement() -> NewAgreement {
    NewAgreement {
        customer_ref: "CUST-0042".to_string(),
        start_date: Some(date(2024, 2, 26)),
        expected_end_date: date(2024, 3, 1),
        discount_percentage: Some(Decimal::ZERO),
        tax_percentage: Some(Decimal::from(15)),
        payment_terms: None,
        line_items: vec![excavator()],
    }
}

pub(super) struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub(super) fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(super) fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

pub(super) struct Harness<R: RentalRepository + 'static, N: Notifier + 'static> {
    pub(super) service: RentalLifecycleService<R, N>,
    pub(super) repository: Arc<R>,
    pub(super) notifier: Arc<N>,
    pub(super) clock: Arc<FixedClock>,
}

pub(super) fn harness_with<R, N>(repository: R, notifier: N) -> Harness<R, N>
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let repository = Arc::new(repository);
    let notifier = Arc::new(notifier);
    let clock = Arc::new(FixedClock::at(opening_time()));
    let service = RentalLifecycleService::with_clock(
        repository.clone(),
        notifier.clone(),
        LifecyclePolicy::default(),
        clock.clone(),
    );
    Harness {
        service,
        repository,
        notifier,
        clock,
    }
}

pub(super) fn harness() -> Harness<InMemoryRentalRepository, MemoryNotifier> {
    harness_with(InMemoryRentalRepository::default(), MemoryNotifier::default())
}

pub(super) fn happy_path() -> Vec<RentalCommand> {
    vec![
        RentalCommand::GenerateQuotation,
        RentalCommand::ApproveQuotation,
        RentalCommand::StartMobilization,
        RentalCommand::CompleteMobilization,
        RentalCommand::StartRental,
        RentalCommand::CompleteRental,
        RentalCommand::CreateInvoice,
        RentalCommand::MarkPaymentPending,
        RentalCommand::MarkClosed,
    ]
}

pub(super) fn every_command() -> Vec<RentalCommand> {
    let mut commands = happy_path();
    commands.push(RentalCommand::Cancel {
        reason: "customer withdrew".to_string(),
    });
    commands
}

/// Walk a stored agreement forward until it reaches `target`.
pub(super) fn drive_to<R, N>(
    service: &RentalLifecycleService<R, N>,
    agreement_id: &AgreementId,
    target: RentalStatus,
) -> Agreement
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let actor = actor();
    match target {
        RentalStatus::Cancelled => {
            return service
                .cancel(agreement_id, &actor, "customer withdrew")
                .expect("cancel succeeds");
        }
        RentalStatus::Overdue => {
            let agreement = drive_to(service, agreement_id, RentalStatus::Active);
            let noon = agreement
                .expected_end_date
                .and_hms_opt(12, 0, 0)
                .expect("valid");
            let after_end = Utc.from_utc_datetime(&noon) + chrono::Duration::days(1);
            service
                .check_overdue_status(agreement_id, after_end)
                .expect("overdue check succeeds");
            return service.get(agreement_id).expect("agreement exists").agreement;
        }
        _ => {}
    }

    let mut agreement = service.get(agreement_id).expect("agreement exists").agreement;
    for command in happy_path() {
        if agreement.status == target {
            break;
        }
        agreement = service
            .apply(agreement_id, &actor, command)
            .expect("happy path transition succeeds");
    }
    assert_eq!(agreement.status, target);
    agreement
}

pub(super) fn open_at<R, N>(
    service: &RentalLifecycleService<R, N>,
    target: RentalStatus,
) -> Agreement
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let agreement = service
        .open_agreement(new_agreement(), &actor())
        .expect("agreement opens");
    drive_to(service, &agreement.id, target)
}

pub(super) fn assert_totals_invariant(agreement: &Agreement) {
    let totals = agreement.totals;
    assert_eq!(
        totals.total_amount,
        totals.subtotal - totals.discount_amount + totals.tax_amount
    );
}

#[derive(Default, Clone)]
pub(super) struct MemoryNotifier {
    notices: Arc<Mutex<Vec<RentalNotice>>>,
}

impl MemoryNotifier {
    pub(super) fn templates(&self) -> Vec<String> {
        self.notices
            .lock()
            .expect("notifier mutex poisoned")
            .iter()
            .map(|notice| notice.template.clone())
            .collect()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notice: RentalNotice) -> Result<(), NotifyError> {
        self.notices
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&self, _notice: RentalNotice) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp relay offline".to_string()))
    }
}

pub(super) struct UnavailableRepository;

fn offline() -> RepositoryError {
    RepositoryError::Unavailable("database offline".to_string())
}

impl RentalRepository for UnavailableRepository {
    fn insert(
        &self,
        _agreement: Agreement,
        _log_entry: StatusLogEntry,
    ) -> Result<AgreementRecord, RepositoryError> {
        Err(offline())
    }

    fn fetch(&self, _id: &AgreementId) -> Result<Option<AgreementRecord>, RepositoryError> {
        Err(offline())
    }

    fn commit(&self, _commit: RentalCommit) -> Result<AgreementRecord, RepositoryError> {
        Err(offline())
    }

    fn fetch_extension(
        &self,
        _id: &ExtensionId,
    ) -> Result<Option<ExtensionRequest>, RepositoryError> {
        Err(offline())
    }

    fn extensions(
        &self,
        _agreement_id: &AgreementId,
    ) -> Result<Vec<ExtensionRequest>, RepositoryError> {
        Err(offline())
    }

    fn status_log(
        &self,
        _agreement_id: &AgreementId,
    ) -> Result<Vec<StatusLogEntry>, RepositoryError> {
        Err(offline())
    }

    fn quotation(&self, _id: &QuotationId) -> Result<Option<QuotationSnapshot>, RepositoryError> {
        Err(offline())
    }

    fn invoices(
        &self,
        _agreement_id: &AgreementId,
    ) -> Result<Vec<InvoiceSnapshot>, RepositoryError> {
        Err(offline())
    }
}

/// How a wrapped repository misbehaves on commit.
#[derive(Clone, Copy)]
pub(super) enum CommitFault {
    /// Every commit fails as if storage went away mid-transaction.
    Unavailable,
    /// The next `n` commits lose an optimistic-concurrency race.
    VersionConflicts(u32),
}

/// In-memory repository whose commits fail on demand; reads pass through.
pub(super) struct FaultyRepository {
    pub(super) inner: InMemoryRentalRepository,
    fault: CommitFault,
    conflicts_left: AtomicU32,
}

impl FaultyRepository {
    pub(super) fn new(fault: CommitFault) -> Self {
        let conflicts_left = match fault {
            CommitFault::VersionConflicts(count) => count,
            CommitFault::Unavailable => 0,
        };
        Self {
            inner: InMemoryRentalRepository::default(),
            fault,
            conflicts_left: AtomicU32::new(conflicts_left),
        }
    }
}

impl RentalRepository for FaultyRepository {
    fn insert(
        &self,
        agreement: Agreement,
        log_entry: StatusLogEntry,
    ) -> Result<AgreementRecord, RepositoryError> {
        self.inner.insert(agreement, log_entry)
    }

    fn fetch(&self, id: &AgreementId) -> Result<Option<AgreementRecord>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn commit(&self, commit: RentalCommit) -> Result<AgreementRecord, RepositoryError> {
        match self.fault {
            CommitFault::Unavailable => Err(offline()),
            CommitFault::VersionConflicts(_) => {
                let raced = self
                    .conflicts_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                        left.checked_sub(1)
                    })
                    .is_ok();
                if raced {
                    return Err(RepositoryError::VersionMismatch {
                        expected: commit.expected_version,
                        actual: commit.expected_version + 1,
                    });
                }
                self.inner.commit(commit)
            }
        }
    }

    fn fetch_extension(
        &self,
        id: &ExtensionId,
    ) -> Result<Option<ExtensionRequest>, RepositoryError> {
        self.inner.fetch_extension(id)
    }

    fn extensions(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<ExtensionRequest>, RepositoryError> {
        self.inner.extensions(agreement_id)
    }

    fn status_log(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<StatusLogEntry>, RepositoryError> {
        self.inner.status_log(agreement_id)
    }

    fn quotation(&self, id: &QuotationId) -> Result<Option<QuotationSnapshot>, RepositoryError> {
        self.inner.quotation(id)
    }

    fn invoices(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<InvoiceSnapshot>, RepositoryError> {
        self.inner.invoices(agreement_id)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
