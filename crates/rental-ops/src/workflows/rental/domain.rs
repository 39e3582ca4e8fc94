use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for rental agreements.
    AgreementId
);
string_id!(LineItemId);
string_id!(ExtensionId);
string_id!(QuotationId);
string_id!(InvoiceId);
string_id!(
    /// Already-authenticated caller on whose behalf an operation runs.
    ActorId
);

impl ActorId {
    /// Actor recorded for transitions the core performs on its own, such as overdue flips.
    pub fn system() -> Self {
        Self("system".to_string())
    }
}

/// Lifecycle status of a rental agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalStatus {
    Pending,
    Quotation,
    QuotationApproved,
    Mobilization,
    MobilizationCompleted,
    Active,
    Overdue,
    Completed,
    InvoicePrepared,
    PaymentPending,
    Closed,
    Cancelled,
}

impl RentalStatus {
    pub const ALL: [Self; 12] = [
        Self::Pending,
        Self::Quotation,
        Self::QuotationApproved,
        Self::Mobilization,
        Self::MobilizationCompleted,
        Self::Active,
        Self::Overdue,
        Self::Completed,
        Self::InvoicePrepared,
        Self::PaymentPending,
        Self::Closed,
        Self::Cancelled,
    ];

    /// Every status from which the agreement can still move.
    pub const OPEN: [Self; 10] = [
        Self::Pending,
        Self::Quotation,
        Self::QuotationApproved,
        Self::Mobilization,
        Self::MobilizationCompleted,
        Self::Active,
        Self::Overdue,
        Self::Completed,
        Self::InvoicePrepared,
        Self::PaymentPending,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Quotation => "quotation",
            Self::QuotationApproved => "quotation_approved",
            Self::Mobilization => "mobilization",
            Self::MobilizationCompleted => "mobilization_completed",
            Self::Active => "active",
            Self::Overdue => "overdue",
            Self::Completed => "completed",
            Self::InvoicePrepared => "invoice_prepared",
            Self::PaymentPending => "payment_pending",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Quotation => "Quotation",
            Self::QuotationApproved => "Quotation Approved",
            Self::Mobilization => "Mobilization",
            Self::MobilizationCompleted => "Mobilization Completed",
            Self::Active => "Active",
            Self::Overdue => "Overdue",
            Self::Completed => "Completed",
            Self::InvoicePrepared => "Invoice Prepared",
            Self::PaymentPending => "Payment Pending",
            Self::Closed => "Closed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }
}

impl fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Billing unit a line item's rate is quoted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateType {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl RateType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// One billable equipment (and optional operator) entry owned by an agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub equipment_ref: String,
    pub operator_ref: Option<String>,
    pub rate: Decimal,
    pub rate_type: RateType,
    pub quantity: u32,
    /// Duration in `rate_type` units. `None` falls back to the agreement period.
    pub days: Option<u32>,
    pub total_amount: Decimal,
}

/// Caller-supplied line item; the ledger assigns the identity and derived total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub equipment_ref: String,
    #[serde(default)]
    pub operator_ref: Option<String>,
    pub rate: Decimal,
    pub rate_type: RateType,
    pub quantity: u32,
    #[serde(default)]
    pub days: Option<u32>,
}

/// Derived monetary fields, always produced by the recalculation engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTerms {
    Immediate,
    Net(u32),
}

impl PaymentTerms {
    /// Accepts `net_<days>` and `immediate`; anything else means net 30.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized == "immediate" {
            return Self::Immediate;
        }
        normalized
            .strip_prefix("net_")
            .and_then(|days| days.parse::<u32>().ok())
            .map(Self::Net)
            .unwrap_or(Self::Net(30))
    }

    pub const fn days(self) -> u32 {
        match self {
            Self::Immediate => 0,
            Self::Net(days) => days,
        }
    }
}

impl fmt::Display for PaymentTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("immediate"),
            Self::Net(days) => write!(f, "net_{days}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub actor: ActorId,
    pub at: DateTime<Utc>,
}

/// The rental aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: AgreementId,
    pub rental_number: String,
    pub customer_ref: String,
    pub line_items: Vec<LineItem>,
    pub status: RentalStatus,
    pub start_date: Option<NaiveDate>,
    pub expected_end_date: NaiveDate,
    pub actual_end_date: Option<NaiveDate>,
    pub discount_percentage: Option<Decimal>,
    pub tax_percentage: Option<Decimal>,
    #[serde(flatten)]
    pub totals: Totals,
    pub payment_terms: PaymentTerms,
    pub quotation_id: Option<QuotationId>,
    pub quotation_approval: Option<Approval>,
    pub invoice_ids: Vec<InvoiceId>,
    pub invoice_date: Option<NaiveDate>,
    pub payment_due_date: Option<NaiveDate>,
    pub pending_extension: Option<ExtensionId>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

impl Agreement {
    pub fn line_item(&self, id: &LineItemId) -> Option<&LineItem> {
        self.line_items.iter().find(|item| &item.id == id)
    }
}

/// Intake payload for a new agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAgreement {
    pub customer_ref: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    pub expected_end_date: NaiveDate,
    #[serde(default)]
    pub discount_percentage: Option<Decimal>,
    #[serde(default)]
    pub tax_percentage: Option<Decimal>,
    #[serde(default)]
    pub payment_terms: Option<PaymentTerms>,
    #[serde(default)]
    pub line_items: Vec<NewLineItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    Pending,
    Approved,
    Rejected,
}

impl ExtensionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Request to push an agreement's expected end date forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRequest {
    pub id: ExtensionId,
    pub agreement_id: AgreementId,
    pub previous_end_date: NaiveDate,
    pub new_end_date: NaiveDate,
    pub reason: String,
    pub status: ExtensionStatus,
    pub requested_by: ActorId,
    pub requested_at: DateTime<Utc>,
    pub resolved_by: Option<ActorId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl ExtensionRequest {
    pub fn duration_days(&self) -> i64 {
        (self.new_end_date - self.previous_end_date).num_days()
    }
}

/// Immutable copy of an agreement's ledger taken when the quotation is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotationSnapshot {
    pub id: QuotationId,
    pub quotation_number: String,
    pub agreement_id: AgreementId,
    pub customer_ref: String,
    pub issue_date: NaiveDate,
    pub valid_until: NaiveDate,
    pub line_items: Vec<LineItem>,
    pub discount_percentage: Decimal,
    pub tax_percentage: Decimal,
    pub totals: Totals,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

/// Immutable invoice document frozen from the final totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub agreement_id: AgreementId,
    pub customer_ref: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub line_items: Vec<LineItem>,
    pub totals: Totals,
    pub balance: Decimal,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_terms_parse_known_formats() {
        assert_eq!(PaymentTerms::parse("net_15"), PaymentTerms::Net(15));
        assert_eq!(PaymentTerms::parse(" Immediate "), PaymentTerms::Immediate);
        assert_eq!(PaymentTerms::parse("end_of_month"), PaymentTerms::Net(30));
        assert_eq!(PaymentTerms::parse("net_abc"), PaymentTerms::Net(30));
        assert_eq!(PaymentTerms::Net(45).to_string(), "net_45");
    }

    #[test]
    fn open_statuses_exclude_terminal_ones() {
        assert!(RentalStatus::OPEN.iter().all(|status| !status.is_terminal()));
        assert_eq!(
            RentalStatus::ALL
                .iter()
                .filter(|status| status.is_terminal())
                .count(),
            2
        );
    }

    #[test]
    fn extension_duration_counts_days_added() {
        let at = DateTime::<Utc>::from_timestamp(1_709_251_200, 0).expect("valid timestamp");
        let request = ExtensionRequest {
            id: ExtensionId("ext-1".to_string()),
            agreement_id: AgreementId("rent-1".to_string()),
            previous_end_date: NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid"),
            new_end_date: NaiveDate::from_ymd_opt(2024, 3, 10).expect("valid"),
            reason: "need more time for site work".to_string(),
            status: ExtensionStatus::Pending,
            requested_by: ActorId("ops".to_string()),
            requested_at: at,
            resolved_by: None,
            resolved_at: None,
            rejection_reason: None,
        };
        assert_eq!(request.duration_days(), 9);
    }
}
