//! Financial recalculation for the rental ledger.
//!
//! Every derived monetary field on an agreement is produced here. Amounts are
//! rounded half-up to two decimal places at each step so that re-running the
//! engine on unchanged inputs reproduces the stored values exactly.
//!
//! Each line total is rounded to cents before the lines are summed, so the
//! subtotal is the sum of the stored line amounts rather than a rounding of
//! the raw products when a rate carries more than two decimal places.
//!
//! Arithmetic is checked; an amount that would not fit in a `Decimal` is
//! reported as a [`PricingError`] instead of panicking.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use super::domain::{Agreement, LineItem, RateType, Totals};
use crate::config::LifecyclePolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("line total for {equipment_ref} exceeds representable amount")]
    LineOverflow { equipment_ref: String },
    #[error("rental totals exceed representable amount")]
    TotalsOverflow,
}

/// Round a monetary amount to cents, half away from zero, always carrying two decimals.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Inclusive number of calendar days between `start` and `end`, never less than one.
pub fn inclusive_days(start: Option<NaiveDate>, end: NaiveDate) -> u32 {
    let Some(start) = start else {
        return 1;
    };
    let span = (end - start).num_days() + 1;
    u32::try_from(span).unwrap_or(0).max(1)
}

#[derive(Debug, Clone)]
pub struct RecalculationEngine {
    default_tax_percentage: Decimal,
    hours_per_day: u32,
}

impl RecalculationEngine {
    pub fn new(policy: &LifecyclePolicy) -> Self {
        Self {
            default_tax_percentage: policy.default_tax_percentage,
            hours_per_day: policy.hours_per_day.max(1),
        }
    }

    pub fn default_tax_percentage(&self) -> Decimal {
        self.default_tax_percentage
    }

    /// Duration units billed for a line: the stored value when present,
    /// otherwise the agreement period expressed in the line's rate unit.
    pub fn billable_units(&self, item: &LineItem, start: Option<NaiveDate>, end: NaiveDate) -> u32 {
        if let Some(days) = item.days {
            return days.max(1);
        }

        let days = inclusive_days(start, end);
        let units = match item.rate_type {
            RateType::Hourly => days.saturating_mul(self.hours_per_day),
            RateType::Daily => days,
            RateType::Weekly => days.div_ceil(7),
            RateType::Monthly => days.div_ceil(30),
        };
        units.max(1)
    }

    pub fn line_total(
        &self,
        item: &LineItem,
        start: Option<NaiveDate>,
        end: NaiveDate,
    ) -> Result<Decimal, PricingError> {
        let units = self.billable_units(item, start, end);
        item.rate
            .checked_mul(Decimal::from(item.quantity))
            .and_then(|amount| amount.checked_mul(Decimal::from(units)))
            .map(round_money)
            .ok_or_else(|| PricingError::LineOverflow {
                equipment_ref: item.equipment_ref.clone(),
            })
    }

    /// Pure computation of the four derived fields for an agreement.
    pub fn totals(&self, agreement: &Agreement) -> Result<Totals, PricingError> {
        let mut subtotal = Decimal::ZERO;
        for item in &agreement.line_items {
            let line = self.line_total(item, agreement.start_date, agreement.expected_end_date)?;
            subtotal = subtotal
                .checked_add(line)
                .ok_or(PricingError::TotalsOverflow)?;
        }

        self.apply_adjustments(
            subtotal,
            agreement.discount_percentage,
            agreement.tax_percentage,
        )
    }

    pub fn apply_adjustments(
        &self,
        subtotal: Decimal,
        discount_percentage: Option<Decimal>,
        tax_percentage: Option<Decimal>,
    ) -> Result<Totals, PricingError> {
        let subtotal = round_money(subtotal);
        let discount_percentage = discount_percentage.unwrap_or(Decimal::ZERO);
        let tax_percentage = tax_percentage.unwrap_or(self.default_tax_percentage);

        let discount_amount = percent_of(subtotal, discount_percentage)?;
        let taxable_base = subtotal
            .checked_sub(discount_amount)
            .ok_or(PricingError::TotalsOverflow)?;
        let tax_amount = percent_of(taxable_base, tax_percentage)?;
        let total_amount = taxable_base
            .checked_add(tax_amount)
            .ok_or(PricingError::TotalsOverflow)?;

        Ok(Totals {
            subtotal,
            discount_amount,
            tax_amount,
            total_amount,
        })
    }

    /// Refresh line totals and the agreement's derived fields in place.
    /// Status and every other field are left untouched.
    /// On error the agreement is left as it was.
    pub fn recalculate(&self, agreement: &mut Agreement) -> Result<Totals, PricingError> {
        let start = agreement.start_date;
        let end = agreement.expected_end_date;
        let line_totals = agreement
            .line_items
            .iter()
            .map(|item| self.line_total(item, start, end))
            .collect::<Result<Vec<_>, _>>()?;
        let totals = self.totals(agreement)?;

        for (item, total) in agreement.line_items.iter_mut().zip(line_totals) {
            item.total_amount = total;
        }
        agreement.totals = totals;
        Ok(totals)
    }
}

fn percent_of(amount: Decimal, percentage: Decimal) -> Result<Decimal, PricingError> {
    amount
        .checked_mul(percentage)
        .and_then(|product| product.checked_div(Decimal::ONE_HUNDRED))
        .map(round_money)
        .ok_or(PricingError::TotalsOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::rental::domain::LineItemId;

    fn engine() -> RecalculationEngine {
        RecalculationEngine::new(&LifecyclePolicy::default())
    }

    fn item(rate: Decimal, rate_type: RateType, quantity: u32, days: Option<u32>) -> LineItem {
        LineItem {
            id: LineItemId("line-1".to_string()),
            equipment_ref: "EXC-200".to_string(),
            operator_ref: None,
            rate,
            rate_type,
            quantity,
            days,
            total_amount: Decimal::ZERO,
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn single_line_with_default_tax() {
        let engine = engine();
        let line = item(Decimal::from(100), RateType::Daily, 1, Some(5));
        let subtotal = engine
            .line_total(&line, None, date(2024, 3, 1))
            .expect("line fits");
        let totals = engine
            .apply_adjustments(subtotal, Some(Decimal::ZERO), Some(Decimal::from(15)))
            .expect("totals fit");

        assert_eq!(totals.subtotal, Decimal::new(50000, 2));
        assert_eq!(totals.discount_amount, Decimal::new(0, 2));
        assert_eq!(totals.tax_amount, Decimal::new(7500, 2));
        assert_eq!(totals.total_amount, Decimal::new(57500, 2));
    }

    #[test]
    fn discount_is_applied_before_tax() {
        let totals = engine()
            .apply_adjustments(Decimal::from(1000), Some(Decimal::from(10)), None)
            .expect("totals fit");
        assert_eq!(totals.discount_amount, Decimal::from(100));
        assert_eq!(totals.tax_amount, Decimal::from(135));
        assert_eq!(totals.total_amount, Decimal::from(1035));
        assert_eq!(
            totals.total_amount,
            totals.subtotal - totals.discount_amount + totals.tax_amount
        );
    }

    #[test]
    fn rounds_half_up_to_cents() {
        assert_eq!(round_money(Decimal::new(10005, 3)), Decimal::new(1001, 2));
        assert_eq!(round_money(Decimal::new(10004, 3)), Decimal::new(1000, 2));
        assert_eq!(round_money(Decimal::from(575)).to_string(), "575.00");
        let totals = engine()
            .apply_adjustments(Decimal::new(3333, 2), None, Some(Decimal::new(75, 1)))
            .expect("totals fit");
        // 33.33 * 7.5% = 2.49975
        assert_eq!(totals.tax_amount, Decimal::new(250, 2));
        assert_eq!(totals.total_amount, Decimal::new(3583, 2));
    }

    #[test]
    fn lines_are_rounded_before_they_are_summed() {
        let engine = engine();
        let line = item(Decimal::new(3335, 3), RateType::Daily, 1, Some(1));
        let line_total = engine
            .line_total(&line, None, date(2024, 1, 1))
            .expect("line fits");
        assert_eq!(line_total, Decimal::new(334, 2));

        // Three 3.335 lines bill 10.02, not round(10.005) = 10.01.
        let subtotal = line_total * Decimal::from(3);
        let totals = engine
            .apply_adjustments(subtotal, None, Some(Decimal::ZERO))
            .expect("totals fit");
        assert_eq!(totals.subtotal, Decimal::new(1002, 2));
    }

    #[test]
    fn oversized_line_reports_overflow() {
        let engine = engine();
        let line = item(Decimal::from(10_u128.pow(20)), RateType::Daily, 1_000_000_000, Some(1));
        assert_eq!(
            engine.line_total(&line, None, date(2024, 1, 1)),
            Err(PricingError::LineOverflow {
                equipment_ref: "EXC-200".to_string(),
            })
        );

        let near_max = Decimal::MAX - Decimal::ONE;
        assert_eq!(
            engine.apply_adjustments(near_max, None, Some(Decimal::from(50))),
            Err(PricingError::TotalsOverflow)
        );
    }

    #[test]
    fn stored_days_take_precedence_over_period() {
        let engine = engine();
        let line = item(Decimal::from(50), RateType::Daily, 2, Some(3));
        assert_eq!(
            engine.billable_units(&line, Some(date(2024, 1, 1)), date(2024, 1, 31)),
            3
        );
    }

    #[test]
    fn period_fallback_converts_to_rate_units() {
        let engine = engine();
        let start = Some(date(2024, 1, 1));
        let end = date(2024, 1, 10);

        let units = |rate_type| {
            engine.billable_units(&item(Decimal::ONE, rate_type, 1, None), start, end)
        };

        assert_eq!(inclusive_days(start, end), 10);
        assert_eq!(units(RateType::Daily), 10);
        assert_eq!(units(RateType::Weekly), 2);
        assert_eq!(units(RateType::Monthly), 1);
        assert_eq!(units(RateType::Hourly), 80);
    }

    #[test]
    fn period_fallback_never_drops_below_one_day() {
        assert_eq!(inclusive_days(None, date(2024, 1, 1)), 1);
        assert_eq!(inclusive_days(Some(date(2024, 2, 1)), date(2024, 1, 1)), 1);
        assert_eq!(inclusive_days(Some(date(2024, 1, 1)), date(2024, 1, 1)), 1);
    }
}
