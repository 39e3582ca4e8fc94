use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::audit::StatusLogEntry;
use super::domain::{
    Agreement, AgreementId, ExtensionId, ExtensionRequest, InvoiceSnapshot, QuotationId,
    QuotationSnapshot,
};

/// Agreement as read from storage, with the revision token used for optimistic commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementRecord {
    pub agreement: Agreement,
    pub version: u64,
}

/// Everything one operation writes. Repositories apply it all or nothing,
/// and only while the stored version still equals `expected_version`.
#[derive(Debug, Clone)]
pub struct RentalCommit {
    pub expected_version: u64,
    pub agreement: Agreement,
    pub log_entries: Vec<StatusLogEntry>,
    pub quotation: Option<QuotationSnapshot>,
    pub invoice: Option<InvoiceSnapshot>,
    /// Inserted when new, replaced when already known.
    pub extension: Option<ExtensionRequest>,
}

/// Transactional storage for agreements and the records they own.
pub trait RentalRepository: Send + Sync {
    fn insert(
        &self,
        agreement: Agreement,
        log_entry: StatusLogEntry,
    ) -> Result<AgreementRecord, RepositoryError>;
    fn fetch(&self, id: &AgreementId) -> Result<Option<AgreementRecord>, RepositoryError>;
    fn commit(&self, commit: RentalCommit) -> Result<AgreementRecord, RepositoryError>;
    fn fetch_extension(&self, id: &ExtensionId)
        -> Result<Option<ExtensionRequest>, RepositoryError>;
    fn extensions(&self, agreement_id: &AgreementId)
        -> Result<Vec<ExtensionRequest>, RepositoryError>;
    fn status_log(&self, agreement_id: &AgreementId)
        -> Result<Vec<StatusLogEntry>, RepositoryError>;
    fn quotation(&self, id: &QuotationId) -> Result<Option<QuotationSnapshot>, RepositoryError>;
    fn invoices(&self, agreement_id: &AgreementId)
        -> Result<Vec<InvoiceSnapshot>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: u64, actual: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound reminder hook (e-mail, SMS or chat adapters).
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: RentalNotice) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalNotice {
    pub template: String,
    pub agreement_id: AgreementId,
    pub rental_number: String,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    agreements: HashMap<AgreementId, AgreementRecord>,
    logs: HashMap<AgreementId, Vec<StatusLogEntry>>,
    extensions: BTreeMap<ExtensionId, ExtensionRequest>,
    quotations: HashMap<QuotationId, QuotationSnapshot>,
    invoices: Vec<InvoiceSnapshot>,
}

/// Process-local repository; one mutex guards every map so commits are atomic.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRentalRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRentalRepository {
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("rental store mutex poisoned".to_string()))
    }
}

impl RentalRepository for InMemoryRentalRepository {
    fn insert(
        &self,
        agreement: Agreement,
        log_entry: StatusLogEntry,
    ) -> Result<AgreementRecord, RepositoryError> {
        let mut state = self.lock()?;
        if state.agreements.contains_key(&agreement.id) {
            return Err(RepositoryError::Conflict(agreement.id.to_string()));
        }

        let record = AgreementRecord {
            agreement,
            version: 1,
        };
        state
            .logs
            .entry(record.agreement.id.clone())
            .or_default()
            .push(log_entry);
        state
            .agreements
            .insert(record.agreement.id.clone(), record.clone());
        Ok(record)
    }

    fn fetch(&self, id: &AgreementId) -> Result<Option<AgreementRecord>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.agreements.get(id).cloned())
    }

    fn commit(&self, commit: RentalCommit) -> Result<AgreementRecord, RepositoryError> {
        let mut state = self.lock()?;
        let RentalCommit {
            expected_version,
            agreement,
            log_entries,
            quotation,
            invoice,
            extension,
        } = commit;

        let current = state
            .agreements
            .get(&agreement.id)
            .ok_or(RepositoryError::NotFound)?;
        if current.version != expected_version {
            return Err(RepositoryError::VersionMismatch {
                expected: expected_version,
                actual: current.version,
            });
        }

        // Validate every write before touching state so a rejected commit leaves no trace.
        if let Some(quotation) = &quotation {
            if state.quotations.contains_key(&quotation.id) {
                return Err(RepositoryError::Conflict(quotation.id.to_string()));
            }
        }
        if let Some(invoice) = &invoice {
            if state.invoices.iter().any(|stored| stored.id == invoice.id) {
                return Err(RepositoryError::Conflict(invoice.id.to_string()));
            }
        }

        if let Some(quotation) = quotation {
            state.quotations.insert(quotation.id.clone(), quotation);
        }
        if let Some(invoice) = invoice {
            state.invoices.push(invoice);
        }
        if let Some(extension) = extension {
            state.extensions.insert(extension.id.clone(), extension);
        }
        state
            .logs
            .entry(agreement.id.clone())
            .or_default()
            .extend(log_entries);

        let record = AgreementRecord {
            agreement,
            version: expected_version + 1,
        };
        state
            .agreements
            .insert(record.agreement.id.clone(), record.clone());
        Ok(record)
    }

    fn fetch_extension(
        &self,
        id: &ExtensionId,
    ) -> Result<Option<ExtensionRequest>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.extensions.get(id).cloned())
    }

    fn extensions(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<ExtensionRequest>, RepositoryError> {
        let state = self.lock()?;
        let mut requests: Vec<ExtensionRequest> = state
            .extensions
            .values()
            .filter(|request| &request.agreement_id == agreement_id)
            .cloned()
            .collect();
        requests.sort_by_key(|request| request.requested_at);
        Ok(requests)
    }

    fn status_log(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<StatusLogEntry>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.logs.get(agreement_id).cloned().unwrap_or_default())
    }

    fn quotation(&self, id: &QuotationId) -> Result<Option<QuotationSnapshot>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.quotations.get(id).cloned())
    }

    fn invoices(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Vec<InvoiceSnapshot>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .invoices
            .iter()
            .filter(|invoice| &invoice.agreement_id == agreement_id)
            .cloned()
            .collect())
    }
}
