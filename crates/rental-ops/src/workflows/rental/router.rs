use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{ActorId, AgreementId, ExtensionId, LineItemId, NewAgreement, NewLineItem};
use super::ledger::Adjustments;
use super::lifecycle::RentalCommand;
use super::repository::{Notifier, RentalRepository};
use super::service::{ErrorKind, RentalError, RentalLifecycleService};

/// Header carrying the already-authenticated caller identity.
pub const ACTOR_HEADER: &str = "x-actor-id";

type SharedService<R, N> = Arc<RentalLifecycleService<R, N>>;

/// Router builder exposing the rental lifecycle as JSON endpoints.
pub fn rental_router<R, N>(service: SharedService<R, N>) -> Router
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    Router::new()
        .route("/api/v1/rentals", post(open_handler::<R, N>))
        .route("/api/v1/rentals/:agreement_id", get(get_handler::<R, N>))
        .route(
            "/api/v1/rentals/:agreement_id/actions",
            get(actions_handler::<R, N>),
        )
        .route(
            "/api/v1/rentals/:agreement_id/history",
            get(history_handler::<R, N>),
        )
        .route(
            "/api/v1/rentals/:agreement_id/transitions",
            post(transition_handler::<R, N>),
        )
        .route(
            "/api/v1/rentals/:agreement_id/items",
            post(add_item_handler::<R, N>),
        )
        .route(
            "/api/v1/rentals/:agreement_id/items/:line_item_id",
            put(update_item_handler::<R, N>).delete(remove_item_handler::<R, N>),
        )
        .route(
            "/api/v1/rentals/:agreement_id/adjustments",
            put(adjustments_handler::<R, N>),
        )
        .route(
            "/api/v1/rentals/:agreement_id/totals/refresh",
            post(refresh_totals_handler::<R, N>),
        )
        .route(
            "/api/v1/rentals/:agreement_id/overdue-check",
            post(overdue_check_handler::<R, N>),
        )
        .route(
            "/api/v1/rentals/:agreement_id/extensions",
            post(request_extension_handler::<R, N>).get(list_extensions_handler::<R, N>),
        )
        .route(
            "/api/v1/rentals/:agreement_id/quotation",
            get(quotation_handler::<R, N>),
        )
        .route(
            "/api/v1/rentals/:agreement_id/invoices",
            get(invoices_handler::<R, N>),
        )
        .route(
            "/api/v1/extensions/:extension_id/approve",
            post(approve_extension_handler::<R, N>),
        )
        .route(
            "/api/v1/extensions/:extension_id/reject",
            post(reject_extension_handler::<R, N>),
        )
        .with_state(service)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionPayload {
    pub new_end_date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverdueCheckQuery {
    /// Evaluation instant; the service clock when absent.
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

/// Map a service failure onto an HTTP status and JSON body.
pub fn error_response(error: RentalError) -> Response {
    let kind = error.kind();
    let status = match kind {
        ErrorKind::InvalidTransition
        | ErrorKind::Conflict
        | ErrorKind::ConcurrentModification => StatusCode::CONFLICT,
        ErrorKind::PreconditionFailed | ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };

    let mut payload = json!({
        "error": error.to_string(),
        "kind": kind,
    });
    match &error {
        RentalError::InvalidTransition {
            operation,
            current,
            required,
        } => {
            payload["operation"] = json!(operation);
            payload["current_status"] = json!(current);
            payload["required_statuses"] = json!(required);
        }
        RentalError::InvalidExtensionTransition { current, .. } => {
            payload["current_status"] = json!(current);
        }
        _ => {}
    }
    (status, Json(payload)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, RentalError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

fn actor_from(headers: &HeaderMap) -> Result<ActorId, Response> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| ActorId(value.to_string()))
        .ok_or_else(|| {
            let payload = json!({
                "error": format!("missing {ACTOR_HEADER} header"),
            });
            (StatusCode::BAD_REQUEST, Json(payload)).into_response()
        })
}

pub(crate) async fn open_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    headers: HeaderMap,
    Json(request): Json<NewAgreement>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(StatusCode::CREATED, service.open_agreement(request, &actor))
}

pub(crate) async fn get_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.get(&AgreementId(agreement_id)))
}

pub(crate) async fn actions_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let id = AgreementId(agreement_id);
    match service.get(&id) {
        Ok(record) => {
            let actions = super::lifecycle::available_actions(record.agreement.status);
            let payload = json!({
                "agreement_id": id,
                "status": record.agreement.status,
                "available_actions": actions,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn history_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.history(&AgreementId(agreement_id)))
}

pub(crate) async fn transition_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
    headers: HeaderMap,
    Json(command): Json<RentalCommand>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.apply(&AgreementId(agreement_id), &actor, command),
    )
}

pub(crate) async fn add_item_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
    headers: HeaderMap,
    Json(item): Json<NewLineItem>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        service.add_line_item(&AgreementId(agreement_id), item, &actor),
    )
}

pub(crate) async fn update_item_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path((agreement_id, line_item_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(item): Json<NewLineItem>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.update_line_item(
            &AgreementId(agreement_id),
            &LineItemId(line_item_id),
            item,
            &actor,
        ),
    )
}

pub(crate) async fn remove_item_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path((agreement_id, line_item_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.remove_line_item(&AgreementId(agreement_id), &LineItemId(line_item_id), &actor),
    )
}

pub(crate) async fn adjustments_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
    headers: HeaderMap,
    Json(adjustments): Json<Adjustments>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.set_adjustments(&AgreementId(agreement_id), adjustments, &actor),
    )
}

pub(crate) async fn refresh_totals_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service.refresh_totals(&AgreementId(agreement_id)),
    )
}

pub(crate) async fn overdue_check_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
    Query(query): Query<OverdueCheckQuery>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let id = AgreementId(agreement_id);
    let now = query.as_of.unwrap_or_else(|| service.now());
    match service.check_overdue_status(&id, now) {
        Ok(outcome) => {
            let payload = json!({
                "agreement_id": id,
                "outcome": outcome,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn request_extension_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ExtensionPayload>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        service.request_extension(
            &AgreementId(agreement_id),
            payload.new_end_date,
            &payload.reason,
            &actor,
        ),
    )
}

pub(crate) async fn list_extensions_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let id = AgreementId(agreement_id);
    match service.extensions(&id) {
        Ok(requests) => {
            let items: Vec<_> = requests
                .into_iter()
                .map(|request| {
                    json!({
                        "duration_days": request.duration_days(),
                        "request": request,
                    })
                })
                .collect();
            (StatusCode::OK, Json(json!({ "extensions": items }))).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn quotation_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.quotation(&AgreementId(agreement_id)))
}

pub(crate) async fn invoices_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agreement_id): Path<String>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.invoices(&AgreementId(agreement_id)))
}

pub(crate) async fn approve_extension_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(extension_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.approve_extension(&ExtensionId(extension_id), &actor),
    )
}

pub(crate) async fn reject_extension_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(extension_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<RejectionPayload>,
) -> Response
where
    R: RentalRepository + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.reject_extension(&ExtensionId(extension_id), &actor, &payload.reason),
    )
}
