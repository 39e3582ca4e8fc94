//! Equipment rental agreement lifecycle.
//!
//! An agreement moves from intake through quotation, mobilization, the active
//! rental period and invoicing to closure. Every change is validated against
//! the transition table, priced by the recalculation engine and committed
//! atomically together with its audit entries and document snapshots.

pub mod audit;
pub mod domain;
pub mod extension;
pub mod ledger;
pub mod lifecycle;
pub mod overdue;
pub mod pricing;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use audit::{workflow_history, LoggedEvent, StatusLogEntry, WorkflowHistoryEntry};
pub use domain::{
    ActorId, Agreement, AgreementId, Approval, ExtensionId, ExtensionRequest, ExtensionStatus,
    InvoiceId, InvoiceSnapshot, LineItem, LineItemId, NewAgreement, NewLineItem, PaymentTerms,
    QuotationId, QuotationSnapshot, RateType, RentalStatus, Totals,
};
pub use ledger::Adjustments;
pub use lifecycle::{available_actions, RentalAction, RentalCommand};
pub use overdue::{evaluate_overdue, OverdueOutcome};
pub use pricing::{inclusive_days, round_money, PricingError, RecalculationEngine};
pub use repository::{
    AgreementRecord, InMemoryRentalRepository, Notifier, NotifyError, RentalCommit, RentalNotice,
    RentalRepository, RepositoryError,
};
pub use router::{error_response, rental_router, ACTOR_HEADER};
pub use service::{Clock, ErrorKind, RentalError, RentalLifecycleService, SystemClock};
