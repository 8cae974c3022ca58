use chrono::NaiveDate;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;
use shared::{weekday_of, ServiceType};
use uuid::Uuid;

use crate::error::{Result, ZoneError};
use crate::models::Schedule;
use crate::registry::require_active_zone;
use crate::schema::zone_schedules;
use crate::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayAvailability {
    pub available: bool,
    pub deliveries_enabled: bool,
    pub visits_enabled: bool,
}

/// A weekday without a schedule row reads as unavailable across the board.
/// Absence of configuration means closed, not open.
fn derive(row: Option<&Schedule>, service_type: ServiceType) -> DayAvailability {
    match row {
        None => DayAvailability {
            available: false,
            deliveries_enabled: false,
            visits_enabled: false,
        },
        Some(schedule) => DayAvailability {
            available: match service_type {
                ServiceType::Delivery => schedule.deliveries_enabled,
                ServiceType::Visit => schedule.visits_enabled,
            },
            deliveries_enabled: schedule.deliveries_enabled,
            visits_enabled: schedule.visits_enabled,
        },
    }
}

fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ZoneError::InvalidArgument(format!("invalid date: {}", date)))
}

#[derive(Clone)]
pub struct AvailabilityResolver {
    pool: DbPool,
}

impl AvailabilityResolver {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Resolves whether the zone serves the given calendar date. The weekday
    /// comes straight from the civil date; no timezone shifting beyond what
    /// the date string itself encodes.
    pub async fn for_date(
        &self,
        zone_id: Uuid,
        date: &str,
        service_type: ServiceType,
    ) -> Result<DayAvailability> {
        let date = parse_date(date)?;
        let weekday = weekday_of(date);

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ZoneError::Internal(e.to_string()))?;
        require_active_zone(&mut conn, zone_id).await?;

        let row: Option<Schedule> = zone_schedules::table
            .filter(zone_schedules::zone_id.eq(zone_id))
            .filter(zone_schedules::weekday.eq(weekday))
            .select(Schedule::as_select())
            .first::<Schedule>(&mut conn)
            .await
            .optional()?;

        Ok(derive(row.as_ref(), service_type))
    }
}
