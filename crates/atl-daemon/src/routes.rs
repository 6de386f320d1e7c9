//! Axum router and all HTTP handlers for atl-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are thin: extract identity and body, call one
//! workflow operation, render the result.

use std::{convert::Infallible, sync::Arc};

use atl_notify::RoutedEvent;
use atl_schemas::{Commande, Fourniture, Notification, User};
use atl_workflow::{
    CommandeDetail, ControlVerdict, CreateCommande, NewFourniture, NewMeasurements, NewPayment,
    NewUser, Receipt, UpdateCommande,
};
use axum::{
    async_trait,
    extract::{FromRequest, Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, patch, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    api_types::{
        AssignControleurRequest, AvailabilityRequest, HealthResponse, NotificationsQuery,
        PushTokenRequest, RoleRequest,
    },
    error::{ApiError, ApiResult},
    identity::{CurrentUser, MaybeUser},
    state::{uptime_secs, AppState},
};

/// Default page size of `GET /v1/me/notifications`.
const DEFAULT_NOTIFICATION_LIMIT: u32 = 50;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/commandes", post(create_commande))
        .route(
            "/v1/commandes/:id",
            get(commande_detail)
                .patch(update_commande)
                .delete(delete_commande),
        )
        .route("/v1/commandes/:id/accept", post(accept))
        .route("/v1/commandes/:id/measurements", post(measurements))
        .route("/v1/commandes/:id/confirm-preparation", post(confirm_preparation))
        .route("/v1/commandes/:id/ready-for-control", post(ready_for_control))
        .route("/v1/commandes/:id/controleur", post(assign_controleur))
        .route("/v1/commandes/:id/control", post(control))
        .route("/v1/commandes/:id/deliver", post(deliver))
        .route("/v1/commandes/:id/payments", post(register_payment))
        .route(
            "/v1/commandes/:id/fournitures",
            get(list_fournitures).post(add_fourniture),
        )
        .route("/v1/me/commandes", get(my_commandes))
        .route("/v1/me/notifications", get(my_notifications))
        .route("/v1/me/stream", get(stream))
        .route("/v1/users", post(register_user))
        .route("/v1/users/:id/role", patch(change_role))
        .route("/v1/users/:id/availability", patch(set_availability))
        .route("/v1/users/:id/push-token", patch(set_push_token))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON bodies
// ---------------------------------------------------------------------------

/// `Json<T>` whose rejection uses the API error body.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(v)) => Ok(ApiJson(v)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}

fn created<T: serde::Serialize>(v: T) -> Response {
    (StatusCode::CREATED, Json(v)).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            uptime_secs: uptime_secs(),
            config_hash: st.config_hash.clone(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

pub(crate) async fn create_commande(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    ApiJson(req): ApiJson<CreateCommande>,
) -> ApiResult<Response> {
    Ok(created(st.workflow.create_commande(&actor, req).await?))
}

pub(crate) async fn commande_detail(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CommandeDetail>> {
    Ok(Json(st.workflow.commande_detail(&actor, id).await?))
}

pub(crate) async fn update_commande(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(patch): ApiJson<UpdateCommande>,
) -> ApiResult<Json<Receipt>> {
    Ok(Json(st.workflow.update_commande(&actor, id, patch).await?))
}

pub(crate) async fn delete_commande(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    st.workflow.delete_commande(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn register_payment(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<NewPayment>,
) -> ApiResult<Response> {
    Ok(created(st.workflow.register_payment(&actor, id, req).await?))
}

pub(crate) async fn add_fourniture(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<NewFourniture>,
) -> ApiResult<Response> {
    Ok(created(st.workflow.add_fourniture(&actor, id, req).await?))
}

pub(crate) async fn list_fournitures(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Fourniture>>> {
    Ok(Json(st.workflow.list_fournitures(&actor, id).await?))
}

// ---------------------------------------------------------------------------
// Lifecycle transitions
// ---------------------------------------------------------------------------

pub(crate) async fn accept(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Receipt>> {
    Ok(Json(st.workflow.accept_commande(&actor, id).await?))
}

pub(crate) async fn measurements(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<NewMeasurements>,
) -> ApiResult<Response> {
    Ok(created(st.workflow.record_measurements(&actor, id, req).await?))
}

pub(crate) async fn confirm_preparation(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Receipt>> {
    Ok(Json(st.workflow.confirm_preparation(&actor, id).await?))
}

pub(crate) async fn ready_for_control(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Receipt>> {
    Ok(Json(st.workflow.mark_ready_for_control(&actor, id).await?))
}

pub(crate) async fn assign_controleur(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<AssignControleurRequest>,
) -> ApiResult<Json<Receipt>> {
    Ok(Json(
        st.workflow
            .assign_controleur(&actor, id, req.controleur_id)
            .await?,
    ))
}

pub(crate) async fn control(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(verdict): ApiJson<ControlVerdict>,
) -> ApiResult<Json<Receipt>> {
    Ok(Json(st.workflow.perform_control(&actor, id, verdict).await?))
}

pub(crate) async fn deliver(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Receipt>> {
    Ok(Json(st.workflow.deliver_commande(&actor, id).await?))
}

// ---------------------------------------------------------------------------
// /v1/me
// ---------------------------------------------------------------------------

pub(crate) async fn my_commandes(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
) -> ApiResult<Json<Vec<Commande>>> {
    Ok(Json(st.workflow.my_commandes(&actor).await?))
}

pub(crate) async fn my_notifications(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Query(q): Query<NotificationsQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    let limit = q.limit.unwrap_or(DEFAULT_NOTIFICATION_LIMIT);
    Ok(Json(st.workflow.my_notifications(&actor, limit).await?))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub(crate) async fn register_user(
    State(st): State<Arc<AppState>>,
    MaybeUser(actor): MaybeUser,
    ApiJson(req): ApiJson<NewUser>,
) -> ApiResult<Response> {
    Ok(created(st.workflow.register_user(actor.as_ref(), req).await?))
}

pub(crate) async fn change_role(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<RoleRequest>,
) -> ApiResult<Json<User>> {
    Ok(Json(st.workflow.change_role(&actor, id, req.role).await?))
}

pub(crate) async fn set_availability(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<AvailabilityRequest>,
) -> ApiResult<Json<User>> {
    Ok(Json(
        st.workflow
            .set_availability(&actor, id, req.disponibilite)
            .await?,
    ))
}

pub(crate) async fn set_push_token(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<PushTokenRequest>,
) -> ApiResult<Json<User>> {
    Ok(Json(st.workflow.set_push_token(&actor, id, req.token).await?))
}

// ---------------------------------------------------------------------------
// GET /v1/me/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(
    State(st): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.realtime.subscribe();
    let events = topic_to_sse(rx, actor.user_id);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

/// Only events for `user_id`'s topic (and broadcasts) reach the client.
fn topic_to_sse(
    rx: broadcast::Receiver<RoutedEvent>,
    user_id: Uuid,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(move |msg| async move {
        match msg {
            Ok(routed) if routed.is_for(user_id) => {
                let data = serde_json::to_string(&routed.event).ok()?;
                Some(Ok(Event::default()
                    .event(routed.event.sse_event_name())
                    .data(data)))
            }
            Ok(_) => None,
            Err(_) => None, // lagged / closed
        }
    })
}
