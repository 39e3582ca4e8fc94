//! Transition table for the rental lifecycle.
//!
//! ```text
//! pending → quotation → quotation_approved → mobilization → mobilization_completed
//!         → active ⇄ overdue → completed → invoice_prepared → payment_pending → closed
//!                                                          └──────────────────→ closed
//! any open status ──cancel──▶ cancelled
//! ```
//!
//! Each action owns a fixed target status and a set of source statuses; the
//! executor in the service consults this table and nothing else.

use serde::{Deserialize, Serialize};

use super::domain::RentalStatus;

/// Every status-changing action the lifecycle understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalAction {
    GenerateQuotation,
    ApproveQuotation,
    StartMobilization,
    CompleteMobilization,
    StartRental,
    CompleteRental,
    CreateInvoice,
    MarkPaymentPending,
    MarkClosed,
    Cancel,
    /// Raised by the overdue evaluator only.
    FlagOverdue,
    /// Raised by the overdue evaluator only.
    ClearOverdue,
}

impl RentalAction {
    pub const ALL: [Self; 12] = [
        Self::GenerateQuotation,
        Self::ApproveQuotation,
        Self::StartMobilization,
        Self::CompleteMobilization,
        Self::StartRental,
        Self::CompleteRental,
        Self::CreateInvoice,
        Self::MarkPaymentPending,
        Self::MarkClosed,
        Self::Cancel,
        Self::FlagOverdue,
        Self::ClearOverdue,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::GenerateQuotation => "generate_quotation",
            Self::ApproveQuotation => "approve_quotation",
            Self::StartMobilization => "start_mobilization",
            Self::CompleteMobilization => "complete_mobilization",
            Self::StartRental => "start_rental",
            Self::CompleteRental => "complete_rental",
            Self::CreateInvoice => "create_invoice",
            Self::MarkPaymentPending => "mark_payment_pending",
            Self::MarkClosed => "mark_closed",
            Self::Cancel => "cancel",
            Self::FlagOverdue => "flag_overdue",
            Self::ClearOverdue => "clear_overdue",
        }
    }

    pub const fn sources(self) -> &'static [RentalStatus] {
        use RentalStatus::*;
        match self {
            Self::GenerateQuotation => &[Pending],
            Self::ApproveQuotation => &[Quotation],
            Self::StartMobilization => &[QuotationApproved],
            Self::CompleteMobilization => &[Mobilization],
            Self::StartRental => &[MobilizationCompleted],
            Self::CompleteRental => &[Active, Overdue],
            Self::CreateInvoice => &[Completed],
            Self::MarkPaymentPending => &[InvoicePrepared],
            Self::MarkClosed => &[InvoicePrepared, PaymentPending, Overdue],
            Self::Cancel => &RentalStatus::OPEN,
            // Completion records `actual_end_date`, so the overdue predicate never
            // holds in `PaymentPending`; the entry is unreachable through the evaluator.
            Self::FlagOverdue => &[Active, PaymentPending],
            Self::ClearOverdue => &[Overdue],
        }
    }

    pub const fn target(self) -> RentalStatus {
        match self {
            Self::GenerateQuotation => RentalStatus::Quotation,
            Self::ApproveQuotation => RentalStatus::QuotationApproved,
            Self::StartMobilization => RentalStatus::Mobilization,
            Self::CompleteMobilization => RentalStatus::MobilizationCompleted,
            Self::StartRental => RentalStatus::Active,
            Self::CompleteRental => RentalStatus::Completed,
            Self::CreateInvoice => RentalStatus::InvoicePrepared,
            Self::MarkPaymentPending => RentalStatus::PaymentPending,
            Self::MarkClosed => RentalStatus::Closed,
            Self::Cancel => RentalStatus::Cancelled,
            Self::FlagOverdue => RentalStatus::Overdue,
            Self::ClearOverdue => RentalStatus::Active,
        }
    }

    pub fn permits(self, current: RentalStatus) -> bool {
        self.sources().contains(&current)
    }

    /// Whether callers may request this action directly.
    pub const fn is_user_invocable(self) -> bool {
        !matches!(self, Self::FlagOverdue | Self::ClearOverdue)
    }
}

/// Actions a caller may take from `status`, in lifecycle order.
pub fn available_actions(status: RentalStatus) -> Vec<RentalAction> {
    RentalAction::ALL
        .into_iter()
        .filter(|action| action.is_user_invocable() && action.permits(status))
        .collect()
}

/// A caller-issued transition together with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RentalCommand {
    GenerateQuotation,
    ApproveQuotation,
    StartMobilization,
    CompleteMobilization,
    StartRental,
    CompleteRental,
    CreateInvoice,
    MarkPaymentPending,
    MarkClosed,
    Cancel { reason: String },
}

impl RentalCommand {
    pub fn action(&self) -> RentalAction {
        match self {
            Self::GenerateQuotation => RentalAction::GenerateQuotation,
            Self::ApproveQuotation => RentalAction::ApproveQuotation,
            Self::StartMobilization => RentalAction::StartMobilization,
            Self::CompleteMobilization => RentalAction::CompleteMobilization,
            Self::StartRental => RentalAction::StartRental,
            Self::CompleteRental => RentalAction::CompleteRental,
            Self::CreateInvoice => RentalAction::CreateInvoice,
            Self::MarkPaymentPending => RentalAction::MarkPaymentPending,
            Self::MarkClosed => RentalAction::MarkClosed,
            Self::Cancel { .. } => RentalAction::Cancel,
        }
    }
}
