//! Line-item ledger operations.
//!
//! Every edit recomputes the derived totals before it commits, so the stored
//! agreement always satisfies `total = subtotal - discount + tax`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{
    ActorId, Agreement, AgreementId, LineItem, LineItemId, NewLineItem, RentalStatus, Totals,
};
use super::repository::{AgreementRecord, Notifier, RentalRepository};
use super::service::{next_line_item_seq, Changes, RentalError, RentalLifecycleService, Staged};

/// Discount and tax inputs; `None` clears the agreement's own value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustments {
    #[serde(default)]
    pub discount_percentage: Option<Decimal>,
    #[serde(default)]
    pub tax_percentage: Option<Decimal>,
}

pub(crate) fn validate_percentage(
    field: &str,
    value: Option<Decimal>,
) -> Result<(), RentalError> {
    match value {
        Some(value) if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED => Err(
            RentalError::Validation(format!("{field} must be between 0 and 100, got {value}")),
        ),
        _ => Ok(()),
    }
}

fn validate_line_item(item: &NewLineItem) -> Result<(), RentalError> {
    if item.equipment_ref.trim().is_empty() {
        return Err(RentalError::Validation(
            "equipment reference is required".to_string(),
        ));
    }
    if item.rate < Decimal::ZERO {
        return Err(RentalError::Validation(format!(
            "rate must not be negative, got {}",
            item.rate
        )));
    }
    if item.quantity == 0 {
        return Err(RentalError::Validation(
            "quantity must be at least 1".to_string(),
        ));
    }
    if item.days == Some(0) {
        return Err(RentalError::Validation(
            "days must be at least 1 when provided".to_string(),
        ));
    }
    Ok(())
}

/// Validate caller input and give it an identity. The total is filled in by
/// the recalculation that follows every ledger write.
pub(crate) fn build_line_item(item: NewLineItem) -> Result<LineItem, RentalError> {
    validate_line_item(&item)?;
    let NewLineItem {
        equipment_ref,
        operator_ref,
        rate,
        rate_type,
        quantity,
        days,
    } = item;

    Ok(LineItem {
        id: LineItemId(format!("line-{:06}", next_line_item_seq())),
        equipment_ref,
        operator_ref,
        rate,
        rate_type,
        quantity,
        days,
        total_amount: Decimal::ZERO,
    })
}

fn ensure_editable(agreement: &Agreement, operation: &'static str) -> Result<(), RentalError> {
    if agreement.status.is_terminal() {
        return Err(RentalError::invalid_transition(
            operation,
            agreement.status,
            &RentalStatus::OPEN,
        ));
    }
    Ok(())
}

impl<R, N> RentalLifecycleService<R, N>
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    pub fn add_line_item(
        &self,
        agreement_id: &AgreementId,
        item: NewLineItem,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        validate_line_item(&item)?;
        let agreement = self.edit_ledger(agreement_id, "add_line_item", |agreement| {
            agreement.line_items.push(build_line_item(item.clone())?);
            Ok(())
        })?;
        info!(agreement_id = %agreement_id, actor = %actor, "line item added");
        Ok(agreement)
    }

    /// Replace the caller-editable fields of a line item, keeping its identity.
    pub fn update_line_item(
        &self,
        agreement_id: &AgreementId,
        line_item_id: &LineItemId,
        item: NewLineItem,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        validate_line_item(&item)?;
        let agreement = self.edit_ledger(agreement_id, "update_line_item", |agreement| {
            let existing = agreement
                .line_items
                .iter_mut()
                .find(|existing| &existing.id == line_item_id)
                .ok_or_else(|| RentalError::not_found("line item", line_item_id))?;
            existing.equipment_ref = item.equipment_ref.clone();
            existing.operator_ref = item.operator_ref.clone();
            existing.rate = item.rate;
            existing.rate_type = item.rate_type;
            existing.quantity = item.quantity;
            existing.days = item.days;
            Ok(())
        })?;
        info!(
            agreement_id = %agreement_id,
            line_item_id = %line_item_id,
            actor = %actor,
            "line item updated"
        );
        Ok(agreement)
    }

    pub fn remove_line_item(
        &self,
        agreement_id: &AgreementId,
        line_item_id: &LineItemId,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        let agreement = self.edit_ledger(agreement_id, "remove_line_item", |agreement| {
            let before = agreement.line_items.len();
            agreement.line_items.retain(|item| &item.id != line_item_id);
            if agreement.line_items.len() == before {
                return Err(RentalError::not_found("line item", line_item_id));
            }
            Ok(())
        })?;
        info!(
            agreement_id = %agreement_id,
            line_item_id = %line_item_id,
            actor = %actor,
            "line item removed"
        );
        Ok(agreement)
    }

    pub fn set_adjustments(
        &self,
        agreement_id: &AgreementId,
        adjustments: Adjustments,
        actor: &ActorId,
    ) -> Result<Agreement, RentalError> {
        validate_percentage("discount_percentage", adjustments.discount_percentage)?;
        validate_percentage("tax_percentage", adjustments.tax_percentage)?;
        let agreement = self.edit_ledger(agreement_id, "set_adjustments", |agreement| {
            agreement.discount_percentage = adjustments.discount_percentage;
            agreement.tax_percentage = adjustments.tax_percentage;
            Ok(())
        })?;
        info!(
            agreement_id = %agreement_id,
            actor = %actor,
            total = %agreement.totals.total_amount,
            "rental adjustments updated"
        );
        Ok(agreement)
    }

    /// Recompute derived totals on demand. Writes only when something drifted.
    pub fn refresh_totals(&self, agreement_id: &AgreementId) -> Result<Totals, RentalError> {
        self.mutate(agreement_id, |record: AgreementRecord, _now: DateTime<Utc>| {
            ensure_editable(&record.agreement, "refresh_totals")?;
            let mut agreement = record.agreement;
            let before = agreement.clone();
            let totals = self.engine.recalculate(&mut agreement)?;
            if agreement == before {
                return Ok(Staged::unchanged(totals));
            }
            Ok(Staged::commit(totals, Changes::new(agreement)))
        })
    }

    fn edit_ledger<F>(
        &self,
        agreement_id: &AgreementId,
        operation: &'static str,
        edit: F,
    ) -> Result<Agreement, RentalError>
    where
        F: Fn(&mut Agreement) -> Result<(), RentalError>,
    {
        self.mutate(agreement_id, |record, _now| {
            ensure_editable(&record.agreement, operation)?;
            let mut agreement = record.agreement;
            edit(&mut agreement)?;
            self.engine.recalculate(&mut agreement)?;
            Ok(Staged::commit(agreement.clone(), Changes::new(agreement)))
        })
    }
}
