use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Selectable, QueryableByName, Serialize)]
#[diesel(table_name = crate::schema::zones)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Zone {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    /// GeoJSON MultiPolygon document, EPSG:4326.
    pub geometry: Option<serde_json::Value>,
    pub version: i32,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::zones)]
pub struct NewZone {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub geometry: Option<serde_json::Value>,
    pub version: i32,
    pub created_by: Option<String>,
}

/// Partial field merge for zone updates. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = crate::schema::zones)]
pub struct ZoneChanges {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::zone_schedules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Schedule {
    pub id: Uuid,
    pub zone_id: Uuid,
    pub weekday: i32,
    pub deliveries_enabled: bool,
    pub visits_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::zone_schedules)]
pub struct NewSchedule {
    pub id: Uuid,
    pub zone_id: Uuid,
    pub weekday: i32,
    pub deliveries_enabled: bool,
    pub visits_enabled: bool,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEventRow {
    pub id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub aggregate_key: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
}

/// `created_at` is intentionally absent: it is assigned by the database
/// transaction clock so outbox ordering follows commit order.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub aggregate_key: Uuid,
    pub payload: serde_json::Value,
    pub attempts: i32,
}

impl From<OutboxEventRow> for shared::OutboxMessage {
    fn from(row: OutboxEventRow) -> Self {
        Self {
            id: row.id,
            aggregate_type: row.aggregate_type,
            event_type: row.event_type,
            aggregate_key: row.aggregate_key,
            payload: row.payload,
            created_at: row.created_at,
            processed_at: row.processed_at,
            attempts: row.attempts,
        }
    }
}
