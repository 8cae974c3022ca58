use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const AGGREGATE_ZONE: &str = "zone";

pub const EVENT_ZONE_CREATED: &str = "ZoneCreated";
pub const EVENT_ZONE_UPDATED: &str = "ZoneUpdated";
pub const EVENT_ZONE_DEACTIVATED: &str = "ZoneDeactivated";
pub const EVENT_ZONE_DELETED: &str = "ZoneDeleted";
pub const EVENT_SCHEDULES_REPLACED: &str = "SchedulesReplacedForZone";
pub const EVENT_SCHEDULE_UPSERTED: &str = "ScheduleUpsertedForZone";

/// Outbox row as the external relay reads it. Field names are the contract;
/// the relay polls rows with `processed_at` unset in `created_at` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub aggregate_key: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneCreatedPayload {
    pub zone_id: Uuid,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneUpdatedPayload {
    pub zone_id: Uuid,
    pub version: i32,
    pub changed_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneDeactivatedPayload {
    pub zone_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneDeletedPayload {
    pub zone_id: Uuid,
    pub deleted_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulesReplacedPayload {
    pub zone_id: Uuid,
    pub schedule_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleUpsertedPayload {
    pub zone_id: Uuid,
    pub weekday: i32,
    pub deliveries_enabled: bool,
    pub visits_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Delivery,
    Visit,
}

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("geometry type must be \"MultiPolygon\", got \"{0}\"")]
    WrongKind(String),
    #[error("multi-polygon must contain at least one polygon")]
    Empty,
    #[error("polygon {0} has no rings")]
    NoRings(usize),
    #[error("ring has {0} positions, a closed ring needs at least 4")]
    ShortRing(usize),
    #[error("ring is not closed (first and last positions differ)")]
    OpenRing,
    #[error("position ({0}, {1}) is outside WGS84 bounds")]
    OutOfBounds(f64, f64),
}

/// GeoJSON MultiPolygon in EPSG:4326. Positions are `[longitude, latitude]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiPolygon {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<Vec<[f64; 2]>>>,
}

impl MultiPolygon {
    pub fn new(coordinates: Vec<Vec<Vec<[f64; 2]>>>) -> Self {
        Self {
            kind: "MultiPolygon".to_string(),
            coordinates,
        }
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.kind != "MultiPolygon" {
            return Err(GeometryError::WrongKind(self.kind.clone()));
        }
        if self.coordinates.is_empty() {
            return Err(GeometryError::Empty);
        }
        for (i, polygon) in self.coordinates.iter().enumerate() {
            if polygon.is_empty() {
                return Err(GeometryError::NoRings(i));
            }
            for ring in polygon {
                if ring.len() < 4 {
                    return Err(GeometryError::ShortRing(ring.len()));
                }
                if ring.first() != ring.last() {
                    return Err(GeometryError::OpenRing);
                }
                for &[lon, lat] in ring {
                    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                        return Err(GeometryError::OutOfBounds(lon, lat));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Weekday index for schedule rows: 0 = Monday .. 6 = Sunday,
/// matching chrono's `num_days_from_monday`.
pub fn weekday_of(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_monday() as i32
}

pub fn is_valid_weekday(weekday: i32) -> bool {
    (0..=6).contains(&weekday)
}
