use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::{MultiPolygon, ServiceType};
use uuid::Uuid;

use crate::availability::{AvailabilityResolver, DayAvailability};
use crate::coverage::CoverageResolver;
use crate::error::ZoneError;
use crate::models::{Schedule, Zone};
use crate::registry::{
    NewZoneInput, Page, Pagination, SortOrder, UpdateZoneInput, ZoneFilter, ZoneRegistry,
};
use crate::schedules::{ScheduleDayPatch, ScheduleEntry, ScheduleManager};

#[derive(Clone)]
pub struct AppState {
    pub registry: ZoneRegistry,
    pub schedules: ScheduleManager,
    pub availability: AvailabilityResolver,
    pub coverage: CoverageResolver,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ZoneError {
    fn into_response(self) -> Response {
        let status = match &self {
            ZoneError::NotFound(_) => StatusCode::NOT_FOUND,
            ZoneError::Conflict(_) => StatusCode::CONFLICT,
            ZoneError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ZoneError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ListZonesQuery {
    pub status: Option<bool>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateZoneRequest {
    #[serde(flatten)]
    pub fields: UpdateZoneInput,
    pub expected_version: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGeometryRequest {
    pub geometry: MultiPolygon,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: String,
    pub service_type: ServiceType,
}

#[derive(Debug, Deserialize)]
pub struct WeekdayQuery {
    pub service_type: ServiceType,
}

#[derive(Debug, Deserialize)]
pub struct CoverageQuery {
    pub lat: f64,
    pub lon: f64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/zones", post(create_zone).get(list_zones))
        .route(
            "/zones/:id",
            get(get_zone).patch(update_zone).delete(delete_zone),
        )
        .route("/zones/:id/geometry", put(update_geometry))
        .route("/zones/:id/deactivate", post(deactivate_zone))
        .route(
            "/zones/:id/schedules",
            put(replace_schedules).get(list_schedules),
        )
        .route("/zones/:id/schedules/:weekday", put(upsert_schedule))
        .route("/zones/:id/availability", get(availability_for_date))
        .route("/zones/by-weekday/:weekday", get(zones_by_weekday))
        .route("/coverage", get(resolve_point))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

/// Authentication happens upstream; the already-authorized actor identity
/// arrives as an opaque header value used only for audit stamping.
fn actor_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-actor-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn create_zone(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<NewZoneInput>,
) -> Result<(StatusCode, Json<Zone>), ZoneError> {
    let zone = state.registry.create(input, actor_from(&headers)).await?;
    Ok((StatusCode::CREATED, Json(zone)))
}

async fn list_zones(
    State(state): State<AppState>,
    Query(query): Query<ListZonesQuery>,
) -> Result<Json<Page<Zone>>, ZoneError> {
    let filter = ZoneFilter {
        status: query.status,
        search: query.search,
    };
    let defaults = Pagination::default();
    let pagination = Pagination {
        page: query.page.unwrap_or(defaults.page),
        limit: query.limit.unwrap_or(defaults.limit),
        sort_by: query.sort_by,
        sort_order: query.sort_order.unwrap_or_default(),
    };
    let page = state.registry.find_all_paginated(filter, pagination).await?;
    Ok(Json(page))
}

async fn get_zone(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Zone>, ZoneError> {
    let zone = state.registry.find_by_id(id).await?;
    Ok(Json(zone))
}

async fn update_zone(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateZoneRequest>,
) -> Result<Json<Zone>, ZoneError> {
    let zone = state
        .registry
        .update(
            id,
            request.fields,
            request.expected_version,
            actor_from(&headers),
        )
        .await?;
    Ok(Json(zone))
}

async fn update_geometry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateGeometryRequest>,
) -> Result<Json<Zone>, ZoneError> {
    let zone = state
        .registry
        .update_geometry(id, request.geometry, actor_from(&headers))
        .await?;
    Ok(Json(zone))
}

async fn deactivate_zone(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Zone>, ZoneError> {
    let zone = state.registry.deactivate(id, actor_from(&headers)).await?;
    Ok(Json(zone))
}

async fn delete_zone(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ZoneError> {
    let actor = actor_from(&headers).ok_or_else(|| {
        ZoneError::InvalidArgument("x-actor-id header is required for deletion".to_string())
    })?;
    state.registry.soft_delete(id, actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn replace_schedules(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(entries): Json<Vec<ScheduleEntry>>,
) -> Result<Json<Vec<Schedule>>, ZoneError> {
    let schedules = state
        .schedules
        .replace_for_zone(id, entries, actor_from(&headers))
        .await?;
    Ok(Json(schedules))
}

async fn upsert_schedule(
    State(state): State<AppState>,
    Path((id, weekday)): Path<(Uuid, i32)>,
    headers: HeaderMap,
    Json(patch): Json<ScheduleDayPatch>,
) -> Result<Json<Schedule>, ZoneError> {
    let schedule = state
        .schedules
        .upsert_for_zone_day(id, weekday, patch, actor_from(&headers))
        .await?;
    Ok(Json(schedule))
}

async fn list_schedules(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Schedule>>, ZoneError> {
    let schedules = state.schedules.find_by_zone(id).await?;
    Ok(Json(schedules))
}

async fn availability_for_date(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<DayAvailability>, ZoneError> {
    let availability = state
        .availability
        .for_date(id, &query.date, query.service_type)
        .await?;
    Ok(Json(availability))
}

async fn zones_by_weekday(
    State(state): State<AppState>,
    Path(weekday): Path<i32>,
    Query(query): Query<WeekdayQuery>,
) -> Result<Json<Vec<Zone>>, ZoneError> {
    let zones = state
        .schedules
        .zones_by_weekday(weekday, query.service_type)
        .await?;
    Ok(Json(zones))
}

async fn resolve_point(
    State(state): State<AppState>,
    Query(query): Query<CoverageQuery>,
) -> Result<Json<Option<Zone>>, ZoneError> {
    let zone = state.coverage.find_zone_by_point(query.lat, query.lon).await?;
    Ok(Json(zone))
}

async fn health_check() -> &'static str {
    "OK"
}
