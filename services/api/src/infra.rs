use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use rental_ops::workflows::rental::{Notifier, NotifyError, RentalNotice};
use rust_decimal::Decimal;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Writes every notice to the log; stands in for the e-mail/SMS adapters.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify(&self, notice: RentalNotice) -> Result<(), NotifyError> {
        info!(
            template = %notice.template,
            agreement_id = %notice.agreement_id,
            rental_number = %notice.rental_number,
            details = ?notice.details,
            "rental notice dispatched"
        );
        Ok(())
    }
}

/// Keeps notices in memory so the demo can print what would have been sent.
#[derive(Debug, Default, Clone)]
pub(crate) struct CollectingNotifier {
    notices: Arc<Mutex<Vec<RentalNotice>>>,
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notice: RentalNotice) -> Result<(), NotifyError> {
        self.notices
            .lock()
            .map_err(|_| NotifyError::Transport("notice buffer poisoned".to_string()))?
            .push(notice);
        Ok(())
    }
}

impl CollectingNotifier {
    pub(crate) fn notices(&self) -> Vec<RentalNotice> {
        self.notices
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

pub(crate) fn parse_percentage(raw: &str) -> Result<Decimal, String> {
    let value: Decimal = raw
        .trim()
        .trim_end_matches('%')
        .parse()
        .map_err(|err| format!("failed to parse '{raw}' as a percentage ({err})"))?;
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(format!("percentage {value} must lie between 0 and 100"));
    }
    Ok(value)
}
