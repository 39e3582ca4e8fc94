use super::common::*;

use crate::workflows::rental::domain::{ActorId, ExtensionId, ExtensionStatus, RentalStatus};
use crate::workflows::rental::service::{ErrorKind, RentalError};

const REASON: &str = "need more time for site work";

fn approver() -> ActorId {
    ActorId("branch-manager".to_string())
}

#[test]
fn approved_extension_moves_the_expected_end_date() {
    let harness = harness();
    let service = &harness.service;
    let agreement = open_at(service, RentalStatus::Active);
    assert_eq!(agreement.expected_end_date, date(2024, 3, 1));

    let request = service
        .request_extension(&agreement.id, date(2024, 3, 10), REASON, &actor())
        .expect("request accepted");
    assert_eq!(request.status, ExtensionStatus::Pending);
    assert_eq!(request.previous_end_date, date(2024, 3, 1));
    assert_eq!(request.new_end_date, date(2024, 3, 10));
    assert_eq!(request.duration_days(), 9);

    let pending = service.get(&agreement.id).expect("readable").agreement;
    assert_eq!(pending.pending_extension, Some(request.id.clone()));
    assert_eq!(pending.expected_end_date, date(2024, 3, 1));

    let approved = service
        .approve_extension(&request.id, &approver())
        .expect("approval succeeds");
    assert_eq!(approved.status, ExtensionStatus::Approved);
    assert_eq!(approved.resolved_by, Some(approver()));
    assert_eq!(approved.resolved_at, Some(opening_time()));

    let stored = service.get(&agreement.id).expect("readable").agreement;
    assert_eq!(stored.expected_end_date, date(2024, 3, 10));
    assert_eq!(stored.status, RentalStatus::Active);
    assert_eq!(stored.pending_extension, None);
    // Stored durations are unaffected, so totals are unchanged.
    assert_eq!(stored.totals, agreement.totals);

    let history = service.history(&agreement.id).expect("history readable");
    let tail: Vec<(Option<&str>, &str)> = history
        .iter()
        .rev()
        .take(2)
        .map(|entry| (entry.from_status, entry.to_status))
        .collect();
    assert_eq!(
        tail,
        vec![
            (Some("active"), "extension_approved"),
            (Some("active"), "extension_requested"),
        ]
    );
}

#[test]
fn second_request_while_pending_conflicts() {
    let harness = harness();
    let service = &harness.service;
    let agreement = open_at(service, RentalStatus::Active);

    service
        .request_extension(&agreement.id, date(2024, 3, 10), REASON, &actor())
        .expect("first request accepted");
    let error = service
        .request_extension(&agreement.id, date(2024, 3, 12), REASON, &actor())
        .expect_err("second request conflicts");
    assert!(matches!(error, RentalError::Conflict(_)));
    assert_eq!(
        service.extensions(&agreement.id).expect("readable").len(),
        1
    );
}

#[test]
fn requests_are_validated_before_anything_is_written() {
    let harness = harness();
    let service = &harness.service;
    let agreement = open_at(service, RentalStatus::Active);

    let short = service
        .request_extension(&agreement.id, date(2024, 3, 10), "late", &actor())
        .expect_err("reason too short");
    assert_eq!(short.kind(), ErrorKind::Validation);

    for new_end in [date(2024, 3, 1), date(2024, 2, 28)] {
        let error = service
            .request_extension(&agreement.id, new_end, REASON, &actor())
            .expect_err("end date must move forward");
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    let stored = service.get(&agreement.id).expect("readable");
    assert_eq!(stored.agreement.pending_extension, None);
    assert!(service.extensions(&agreement.id).expect("readable").is_empty());
}

#[test]
fn rejection_keeps_dates_and_frees_the_slot() {
    let harness = harness();
    let service = &harness.service;
    let agreement = open_at(service, RentalStatus::Mobilization);
    let request = service
        .request_extension(&agreement.id, date(2024, 3, 10), REASON, &actor())
        .expect("request accepted");

    let short = service
        .reject_extension(&request.id, &approver(), "no")
        .expect_err("rejection reason too short");
    assert_eq!(short.kind(), ErrorKind::Validation);

    let rejected = service
        .reject_extension(&request.id, &approver(), "Fleet already booked")
        .expect("rejection succeeds");
    assert_eq!(rejected.status, ExtensionStatus::Rejected);
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("Fleet already booked")
    );

    let stored = service.get(&agreement.id).expect("readable").agreement;
    assert_eq!(stored.expected_end_date, date(2024, 3, 1));
    assert_eq!(stored.pending_extension, None);
    assert_eq!(stored.status, RentalStatus::Mobilization);

    let history = service.history(&agreement.id).expect("history readable");
    let last = history.last().expect("history not empty");
    assert_eq!(last.to_status, "extension_rejected");
    assert_eq!(last.description.as_deref(), Some("Fleet already booked"));

    let retry = service
        .request_extension(&agreement.id, date(2024, 3, 5), REASON, &actor())
        .expect("a new request may follow a rejection");
    let all = service.extensions(&agreement.id).expect("readable");
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|entry| entry.id == retry.id));
}

#[test]
fn resolved_requests_cannot_be_resolved_again() {
    let harness = harness();
    let service = &harness.service;
    let agreement = open_at(service, RentalStatus::Active);
    let request = service
        .request_extension(&agreement.id, date(2024, 3, 10), REASON, &actor())
        .expect("request accepted");
    service
        .approve_extension(&request.id, &approver())
        .expect("approval succeeds");

    match service.approve_extension(&request.id, &approver()) {
        Err(RentalError::InvalidExtensionTransition { current, .. }) => {
            assert_eq!(current, ExtensionStatus::Approved)
        }
        other => panic!("expected invalid extension transition, got {other:?}"),
    }
    let error = service
        .reject_extension(&request.id, &approver(), "changed my mind")
        .expect_err("already approved");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);

    let stored = service.get(&agreement.id).expect("readable").agreement;
    assert_eq!(stored.expected_end_date, date(2024, 3, 10));
}

#[test]
fn unknown_extensions_are_not_found() {
    let harness = harness();
    let missing = ExtensionId("ext-missing".to_string());
    let error = harness
        .service
        .approve_extension(&missing, &approver())
        .expect_err("unknown extension");
    assert_eq!(error.kind(), ErrorKind::NotFound);
}

#[test]
fn terminal_agreements_take_no_new_extensions() {
    let harness = harness();
    let service = &harness.service;
    let agreement = open_at(service, RentalStatus::Active);
    let request = service
        .request_extension(&agreement.id, date(2024, 3, 10), REASON, &actor())
        .expect("request accepted");
    service
        .cancel(&agreement.id, &actor(), "equipment failure")
        .expect("cancel succeeds");

    let error = service
        .request_extension(&agreement.id, date(2024, 3, 20), REASON, &actor())
        .expect_err("cancelled agreements take no requests");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);

    let error = service
        .approve_extension(&request.id, &approver())
        .expect_err("cannot extend a cancelled agreement");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);

    // A dangling request may still be closed out.
    let rejected = service
        .reject_extension(&request.id, &approver(), "Rental cancelled")
        .expect("rejection succeeds");
    assert_eq!(rejected.status, ExtensionStatus::Rejected);
    let stored = service.get(&agreement.id).expect("readable").agreement;
    assert_eq!(stored.status, RentalStatus::Cancelled);
    assert_eq!(stored.expected_end_date, date(2024, 3, 1));
}
