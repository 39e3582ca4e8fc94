use crate::infra::{parse_date, parse_percentage, CollectingNotifier};
use chrono::{Days, NaiveDate, NaiveTime, Utc};
use clap::Args;
use rental_ops::config::LifecyclePolicy;
use rental_ops::error::AppError;
use rental_ops::workflows::rental::{
    ActorId, Agreement, InMemoryRentalRepository, NewAgreement, NewLineItem, OverdueOutcome,
    PaymentTerms, RateType, RentalCommand, RentalLifecycleService, Totals,
};
use rust_decimal::Decimal;
use std::sync::Arc;

type DemoService = RentalLifecycleService<InMemoryRentalRepository, CollectingNotifier>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Planned rental start (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) start: Option<NaiveDate>,
    /// Length of the planned rental period in days.
    #[arg(long, default_value_t = 14)]
    pub(crate) days: u64,
    /// Discount applied to the subtotal, e.g. `5` or `5%`.
    #[arg(long, value_parser = parse_percentage)]
    pub(crate) discount: Option<Decimal>,
    /// Days the expected end date is pushed out by the extension request.
    #[arg(long, default_value_t = 3)]
    pub(crate) extend_by: u64,
    /// Let the equipment come back late so the overdue check flips the agreement.
    #[arg(long)]
    pub(crate) late: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        start,
        days,
        discount,
        extend_by,
        late,
    } = args;
    let start = start.unwrap_or_else(|| Utc::now().date_naive());
    let expected_end = start
        .checked_add_days(Days::new(days.max(1) - 1))
        .unwrap_or(start);

    // First morning after the planned return.
    let now = expected_end
        .checked_add_days(Days::new(1))
        .unwrap_or(expected_end)
        .and_time(NaiveTime::MIN)
        .and_utc();

    let notifier = Arc::new(CollectingNotifier::default());
    let service: DemoService = RentalLifecycleService::new(
        Arc::new(InMemoryRentalRepository::default()),
        notifier.clone(),
        LifecyclePolicy::default(),
    );
    let sales = ActorId("sales-desk".to_string());
    let dispatcher = ActorId("dispatcher".to_string());
    let manager = ActorId("branch-manager".to_string());

    println!("Equipment rental lifecycle demo");
    let agreement =
        service.open_agreement(demo_agreement(start, expected_end, discount), &sales)?;
    println!(
        "- Opened {} for {} ({} -> {}, {} line items)",
        agreement.rental_number,
        agreement.customer_ref,
        start,
        agreement.expected_end_date,
        agreement.line_items.len()
    );
    print_ledger(&agreement);

    for command in [
        RentalCommand::GenerateQuotation,
        RentalCommand::ApproveQuotation,
        RentalCommand::StartMobilization,
        RentalCommand::CompleteMobilization,
        RentalCommand::StartRental,
    ] {
        let updated = service.apply(&agreement.id, &dispatcher, command)?;
        println!("- {} -> {}", updated.rental_number, updated.status.display_name());
    }

    let quotation = service.quotation(&agreement.id)?;
    println!(
        "  Quotation {} issued {} valid until {} for {}",
        quotation.quotation_number,
        quotation.issue_date,
        quotation.valid_until,
        quotation.totals.total_amount
    );

    if late {
        let outcome = service.check_overdue_status(&agreement.id, now)?;
        println!("- Overdue check at {}: {}", now.date_naive(), outcome.label());
    }

    let new_end = expected_end
        .checked_add_days(Days::new(extend_by.max(1)))
        .unwrap_or(expected_end);
    let request = service.request_extension(
        &agreement.id,
        new_end,
        "Site works delayed by weather",
        &dispatcher,
    )?;
    println!(
        "- Extension {} requested: {} -> {} ({} days)",
        request.id,
        request.previous_end_date,
        request.new_end_date,
        request.duration_days()
    );
    let approved = service.approve_extension(&request.id, &manager)?;
    println!("  Extension {} {}", approved.id, approved.status);

    if late {
        let outcome = service.check_overdue_status(&agreement.id, now)?;
        if outcome != OverdueOutcome::Unchanged {
            println!("  Overdue re-check after extension: {}", outcome.label());
        }
    }

    let totals = service.refresh_totals(&agreement.id)?;
    println!("- Totals refreshed for the extended period");
    print_totals(&totals);

    for command in [
        RentalCommand::CompleteRental,
        RentalCommand::CreateInvoice,
        RentalCommand::MarkPaymentPending,
        RentalCommand::MarkClosed,
    ] {
        let updated = service.apply(&agreement.id, &dispatcher, command)?;
        println!("- {} -> {}", updated.rental_number, updated.status.display_name());
    }

    for invoice in service.invoices(&agreement.id)? {
        println!(
            "  Invoice {} dated {} due {} balance {}",
            invoice.invoice_number, invoice.invoice_date, invoice.due_date, invoice.balance
        );
    }

    println!("Workflow history:");
    for entry in service.history(&agreement.id)? {
        println!(
            "  {:>2}. {} -> {} by {} ({})",
            entry.sequence,
            entry.from_status.unwrap_or("-"),
            entry.to_status,
            entry.changed_by,
            entry.description.as_deref().unwrap_or("no note")
        );
    }

    let notices = notifier.notices();
    if notices.is_empty() {
        println!("Notifications: none dispatched");
    } else {
        println!("Notifications:");
        for notice in notices {
            println!("  - template={} -> {}", notice.template, notice.rental_number);
        }
    }

    Ok(())
}

fn demo_agreement(
    start: NaiveDate,
    expected_end: NaiveDate,
    discount: Option<Decimal>,
) -> NewAgreement {
    NewAgreement {
        customer_ref: "CUST-HARBOUR-WORKS".to_string(),
        start_date: Some(start),
        expected_end_date: expected_end,
        discount_percentage: discount,
        tax_percentage: None,
        payment_terms: Some(PaymentTerms::Net(15)),
        line_items: vec![
            NewLineItem {
                equipment_ref: "EXC-20T".to_string(),
                operator_ref: Some("OP-114".to_string()),
                rate: Decimal::new(98000, 2),
                rate_type: RateType::Weekly,
                quantity: 1,
                days: None,
            },
            NewLineItem {
                equipment_ref: "LIGHT-TOWER".to_string(),
                operator_ref: None,
                rate: Decimal::new(3500, 2),
                rate_type: RateType::Daily,
                quantity: 3,
                days: None,
            },
        ],
    }
}

fn print_ledger(agreement: &Agreement) {
    for item in &agreement.line_items {
        println!(
            "  {} x{} @ {} {} = {}",
            item.equipment_ref,
            item.quantity,
            item.rate,
            item.rate_type.label(),
            item.total_amount
        );
    }
    print_totals(&agreement.totals);
}

fn print_totals(totals: &Totals) {
    println!(
        "  Subtotal {} | discount {} | tax {} | total {}",
        totals.subtotal, totals.discount_amount, totals.tax_amount, totals.total_amount
    );
}
