//! Booking API routes.
//!
//! Public endpoints:
//! - `GET  /api/bots/{bot_id}/available-slots?date=`          — open slots for a bot
//! - `GET  /api/resources/{resource_id}/available-slots?date=` — open slots for a resource
//! - `POST /api/bookings`                                      — create a booking
//! - `GET  /api/bookings/{id}`                                 — fetch a booking
//! - `POST /api/bookings/{id}/reschedule`                      — move a booking
//! - `POST /api/bookings/{id}/cancel`                          — cancel a booking
//!
//! Admin endpoints:
//! - `GET  /api/bots/{bot_id}/bookings?status=&date=` — list a bot's bookings
//! - `POST /api/resources`                    — create a bookable resource
//! - `GET  /api/resources?bot_id=`            — list a bot's resources
//! - `PUT  /api/resources/{id}`               — update a resource
//! - `DELETE /api/resources/{id}`             — deactivate (never hard-deletes)
//! - `POST /api/resources/{id}/schedules`     — add a schedule window
//! - `GET  /api/resources/{id}/schedules`     — list schedule windows
//! - `DELETE /api/schedules/{id}`             — remove a schedule window
//! - `GET/PUT /api/bots/{bot_id}/booking-policy`

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use bookline_booking::{BookingService, CreateBookingRequest, RescheduleRequest};
use bookline_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, BotId, OrgId,
};
use bookline_core::domain::policy::{BookingPolicy, PolicyWindow};
use bookline_core::domain::resource::{Resource, ResourceId, ResourceType};
use bookline_core::domain::schedule::{
    weekday_from_index, ScheduleId, ScheduleRule, ScheduleWindow,
};
use bookline_core::errors::BookingError;
use bookline_db::repositories::{
    PolicyRepository, RepositoryError, ResourceRepository, ScheduleRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BookingService>,
    pub resources: Arc<dyn ResourceRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub policies: Arc<dyn PolicyRepository>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/bots/{bot_id}/available-slots", get(bot_available_slots))
        .route("/api/resources/{resource_id}/available-slots", get(resource_available_slots))
        .route("/api/bookings", post(create_booking))
        .route("/api/bookings/{id}", get(get_booking))
        .route("/api/bookings/{id}/reschedule", post(reschedule_booking))
        .route("/api/bookings/{id}/cancel", post(cancel_booking))
        .route("/api/bots/{bot_id}/bookings", get(list_bookings))
        .route("/api/resources", post(create_resource).get(list_resources))
        .route("/api/resources/{id}", delete(deactivate_resource).put(update_resource))
        .route("/api/resources/{id}/schedules", post(add_schedule).get(list_schedules))
        .route("/api/schedules/{id}", delete(remove_schedule))
        .route(
            "/api/bots/{bot_id}/booking-policy",
            get(get_booking_policy).put(put_booking_policy),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<BookingError> for ApiError {
    fn from(error: BookingError) -> Self {
        let status = match &error {
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BookingError::SlotUnavailable(_)
            | BookingError::InvalidState { .. }
            | BookingError::PastSlot
            | BookingError::DuplicateBooking => StatusCode::CONFLICT,
            BookingError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status == StatusCode::SERVICE_UNAVAILABLE {
            error!(event_name = "api.storage_error", error = %error, "storage failure");
        }
        Self { status, message: error.to_string() }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        ApiError::from(BookingError::Storage(error.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiErrorBody { error: self.message })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Availability
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    pub date: NaiveDate,
    pub slots: Vec<bookline_core::availability::Slot>,
}

async fn bot_available_slots(
    Path(bot_id): Path<String>,
    Query(query): Query<SlotsQuery>,
    State(state): State<AppState>,
) -> Result<Json<SlotsResponse>, ApiError> {
    let slots =
        state.service.compute_available_slots(&BotId(bot_id), None, query.date).await?;
    Ok(Json(SlotsResponse { date: query.date, slots }))
}

async fn resource_available_slots(
    Path(resource_id): Path<String>,
    Query(query): Query<SlotsQuery>,
    State(state): State<AppState>,
) -> Result<Json<SlotsResponse>, ApiError> {
    let resource_id = ResourceId(resource_id);
    let resource = state
        .resources
        .find_by_id(&resource_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("resource `{}` not found", resource_id.0)))?;

    let slots = state
        .service
        .compute_available_slots(&resource.bot_id, Some(&resource_id), query.date)
        .await?;
    Ok(Json(SlotsResponse { date: query.date, slots }))
}

// ---------------------------------------------------------------------------
// Bookings
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateBookingBody {
    pub org_id: String,
    pub bot_id: String,
    pub resource_id: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    #[serde(default)]
    pub form_data: serde_json::Value,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleBody {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub resource_id: Option<String>,
    pub form_data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    pub appointment: Appointment,
    pub calendar_synced: bool,
    pub calendar_warning: Option<String>,
}

async fn create_booking(
    State(state): State<AppState>,
    Json(body): Json<CreateBookingBody>,
) -> Result<(StatusCode, Json<ReceiptResponse>), ApiError> {
    let receipt = state
        .service
        .create_booking(CreateBookingRequest {
            org_id: OrgId(body.org_id),
            bot_id: BotId(body.bot_id),
            resource_id: body.resource_id.map(ResourceId),
            customer_name: body.customer_name,
            customer_email: body.customer_email,
            customer_phone: body.customer_phone,
            date: body.date,
            start_time: body.start_time,
            form_data: body.form_data,
            notes: body.notes,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ReceiptResponse {
            appointment: receipt.appointment,
            calendar_synced: receipt.calendar_synced,
            calendar_warning: receipt.calendar_warning,
        }),
    ))
}

async fn get_booking(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Appointment>, ApiError> {
    let appointment = state.service.get_booking(&AppointmentId(id)).await?;
    Ok(Json(appointment))
}

async fn reschedule_booking(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<RescheduleBody>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let receipt = state
        .service
        .reschedule_booking(
            &AppointmentId(id),
            RescheduleRequest {
                date: body.date,
                start_time: body.start_time,
                resource_id: body.resource_id.map(ResourceId),
                form_data: body.form_data,
            },
        )
        .await?;

    Ok(Json(ReceiptResponse {
        appointment: receipt.appointment,
        calendar_synced: receipt.calendar_synced,
        calendar_warning: receipt.calendar_warning,
    }))
}

async fn cancel_booking(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let receipt = state.service.cancel_booking(&AppointmentId(id)).await?;
    Ok(Json(ReceiptResponse {
        appointment: receipt.appointment,
        calendar_synced: receipt.calendar_synced,
        calendar_warning: receipt.calendar_warning,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListBookingsQuery {
    pub status: Option<String>,
    pub date: Option<NaiveDate>,
}

async fn list_bookings(
    Path(bot_id): Path<String>,
    Query(query): Query<ListBookingsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            AppointmentStatus::parse(raw).ok_or_else(|| {
                ApiError::bad_request(format!(
                    "unknown booking status `{raw}` \
                     (expected pending|confirmed|completed|cancelled|rejected)"
                ))
            })
        })
        .transpose()?;

    let bookings = state.service.list_bookings(&BotId(bot_id), status, query.date).await?;
    Ok(Json(bookings))
}

// ---------------------------------------------------------------------------
// Resource administration
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateResourceBody {
    pub org_id: String,
    pub bot_id: String,
    pub name: String,
    pub resource_type: String,
    pub capacity_per_slot: u32,
}

#[derive(Debug, Deserialize)]
pub struct ListResourcesQuery {
    pub bot_id: String,
    #[serde(default)]
    pub include_inactive: bool,
}

async fn create_resource(
    State(state): State<AppState>,
    Json(body): Json<CreateResourceBody>,
) -> Result<(StatusCode, Json<Resource>), ApiError> {
    let resource_type = ResourceType::parse(&body.resource_type).ok_or_else(|| {
        ApiError::bad_request(format!(
            "unknown resource type `{}` (expected person|room|equipment|other)",
            body.resource_type
        ))
    })?;

    let now = Utc::now();
    let resource = Resource {
        id: ResourceId(format!("res-{}", &Uuid::new_v4().simple().to_string()[..12])),
        org_id: OrgId(body.org_id),
        bot_id: BotId(body.bot_id),
        name: body.name,
        resource_type,
        capacity_per_slot: body.capacity_per_slot,
        active: true,
        created_at: now,
        updated_at: now,
    };
    resource.validate().map_err(|violation| ApiError::bad_request(violation.to_string()))?;

    state.resources.save(resource.clone()).await?;
    info!(
        event_name = "api.resource.created",
        resource_id = %resource.id.0,
        bot_id = %resource.bot_id.0,
        "resource created"
    );
    Ok((StatusCode::CREATED, Json(resource)))
}

async fn list_resources(
    Query(query): Query<ListResourcesQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Resource>>, ApiError> {
    let resources =
        state.resources.list_for_bot(&BotId(query.bot_id), !query.include_inactive).await?;
    Ok(Json(resources))
}

#[derive(Debug, Deserialize)]
pub struct UpdateResourceBody {
    pub name: Option<String>,
    pub resource_type: Option<String>,
    pub capacity_per_slot: Option<u32>,
    pub active: Option<bool>,
}

async fn update_resource(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<UpdateResourceBody>,
) -> Result<Json<Resource>, ApiError> {
    let resource_id = ResourceId(id);
    let mut resource = state
        .resources
        .find_by_id(&resource_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("resource `{}` not found", resource_id.0)))?;

    if let Some(name) = body.name {
        resource.name = name;
    }
    if let Some(raw) = body.resource_type {
        resource.resource_type = ResourceType::parse(&raw).ok_or_else(|| {
            ApiError::bad_request(format!(
                "unknown resource type `{raw}` (expected person|room|equipment|other)"
            ))
        })?;
    }
    if let Some(capacity) = body.capacity_per_slot {
        resource.capacity_per_slot = capacity;
    }
    if let Some(active) = body.active {
        resource.active = active;
    }
    resource.updated_at = Utc::now();
    resource.validate().map_err(|violation| ApiError::bad_request(violation.to_string()))?;

    state.resources.save(resource.clone()).await?;
    info!(event_name = "api.resource.updated", resource_id = %resource.id.0, "resource updated");
    Ok(Json(resource))
}

/// Soft deactivation: historical appointments keep their resource reference.
async fn deactivate_resource(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Resource>, ApiError> {
    let resource_id = ResourceId(id);
    let mut resource = state
        .resources
        .find_by_id(&resource_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("resource `{}` not found", resource_id.0)))?;

    resource.active = false;
    resource.updated_at = Utc::now();
    state.resources.save(resource.clone()).await?;
    info!(event_name = "api.resource.deactivated", resource_id = %resource.id.0, "resource deactivated");
    Ok(Json(resource))
}

// ---------------------------------------------------------------------------
// Schedule administration
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateScheduleBody {
    /// 0 = Monday .. 6 = Sunday. Exactly one of `weekday` and `date`.
    pub weekday: Option<u8>,
    pub date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_minutes: u32,
    #[serde(default = "default_true")]
    pub available: bool,
}

fn default_true() -> bool {
    true
}

async fn add_schedule(
    Path(resource_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<CreateScheduleBody>,
) -> Result<(StatusCode, Json<ScheduleWindow>), ApiError> {
    let resource_id = ResourceId(resource_id);
    state
        .resources
        .find_by_id(&resource_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("resource `{}` not found", resource_id.0)))?;

    let rule = match (body.weekday, body.date) {
        (Some(index), None) => {
            let weekday = weekday_from_index(index).ok_or_else(|| {
                ApiError::bad_request(format!("weekday must be 0..=6, got {index}"))
            })?;
            ScheduleRule::Weekly(weekday)
        }
        (None, Some(date)) => ScheduleRule::Date(date),
        _ => {
            return Err(ApiError::bad_request(
                "exactly one of `weekday` and `date` must be set",
            ))
        }
    };

    let window = ScheduleWindow {
        id: ScheduleId(format!("sch-{}", &Uuid::new_v4().simple().to_string()[..12])),
        resource_id,
        rule,
        start_time: body.start_time,
        end_time: body.end_time,
        slot_minutes: body.slot_minutes,
        available: body.available,
        created_at: Utc::now(),
    };
    window.validate().map_err(|violation| ApiError::bad_request(violation.to_string()))?;

    state.schedules.save(window.clone()).await?;
    Ok((StatusCode::CREATED, Json(window)))
}

async fn list_schedules(
    Path(resource_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ScheduleWindow>>, ApiError> {
    let windows = state.schedules.list_for_resource(&ResourceId(resource_id)).await?;
    Ok(Json(windows))
}

async fn remove_schedule(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let removed = state.schedules.delete(&ScheduleId(id.clone())).await?;
    if !removed {
        return Err(ApiError::not_found(format!("schedule window `{id}` not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Booking policy administration
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PutPolicyBody {
    pub timezone: Option<String>,
    pub slot_minutes: Option<u32>,
    pub capacity_per_slot: Option<u32>,
    pub min_notice_minutes: Option<u32>,
    /// `Some(None)` clears the horizon (unlimited), absent leaves it alone.
    #[serde(default, with = "double_option")]
    pub max_future_days: Option<Option<u32>>,
    pub windows: Option<Vec<PolicyWindow>>,
    pub required_fields: Option<Vec<String>>,
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

async fn get_booking_policy(
    Path(bot_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BookingPolicy>, ApiError> {
    let bot_id = BotId(bot_id);
    let policy = state
        .policies
        .find_for_bot(&bot_id)
        .await?
        .unwrap_or_else(|| BookingPolicy::defaults(OrgId(bot_id.0.clone()), bot_id));
    Ok(Json(policy))
}

async fn put_booking_policy(
    Path(bot_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<PutPolicyBody>,
) -> Result<Json<BookingPolicy>, ApiError> {
    let bot_id = BotId(bot_id);
    let mut policy = state
        .policies
        .find_for_bot(&bot_id)
        .await?
        .unwrap_or_else(|| BookingPolicy::defaults(OrgId(bot_id.0.clone()), bot_id));

    if let Some(timezone) = body.timezone {
        policy.timezone = timezone.parse::<Tz>().map_err(|_| {
            ApiError::bad_request(format!("unknown IANA timezone `{timezone}`"))
        })?;
    }
    if let Some(slot_minutes) = body.slot_minutes {
        policy.slot_minutes = slot_minutes;
    }
    if let Some(capacity) = body.capacity_per_slot {
        policy.capacity_per_slot = capacity;
    }
    if let Some(notice) = body.min_notice_minutes {
        policy.min_notice_minutes = notice;
    }
    if let Some(horizon) = body.max_future_days {
        policy.max_future_days = horizon;
    }
    if let Some(windows) = body.windows {
        policy.windows = windows;
    }
    if let Some(required_fields) = body.required_fields {
        policy.required_fields = required_fields;
    }
    policy.updated_at = Utc::now();
    policy.validate().map_err(|violation| ApiError::bad_request(violation.to_string()))?;

    state.policies.save(policy.clone()).await?;
    info!(event_name = "api.policy.updated", bot_id = %policy.bot_id.0, "booking policy updated");
    Ok(Json(policy))
}
