use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Deserialize;
use shared::{
    is_valid_weekday, SchedulesReplacedPayload, ScheduleUpsertedPayload, ServiceType,
    AGGREGATE_ZONE, EVENT_SCHEDULES_REPLACED, EVENT_SCHEDULE_UPSERTED,
};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, ZoneError};
use crate::models::{NewSchedule, Schedule, Zone};
use crate::registry::require_active_zone;
use crate::schema::{zone_schedules, zones};
use crate::{outbox, DbPool};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleEntry {
    pub weekday: i32,
    #[serde(default = "default_true")]
    pub deliveries_enabled: bool,
    #[serde(default = "default_true")]
    pub visits_enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleDayPatch {
    pub deliveries_enabled: Option<bool>,
    pub visits_enabled: Option<bool>,
}

/// Flag resolution for `upsert_for_zone_day`: omitted fields default to true
/// only when the row is being created; on an existing row they keep their
/// current value instead of silently resetting.
fn resolve_flags(existing: Option<(bool, bool)>, patch: &ScheduleDayPatch) -> (bool, bool) {
    let (deliveries, visits) = existing.unwrap_or((true, true));
    (
        patch.deliveries_enabled.unwrap_or(deliveries),
        patch.visits_enabled.unwrap_or(visits),
    )
}

fn ensure_weekday(weekday: i32) -> Result<()> {
    if !is_valid_weekday(weekday) {
        return Err(ZoneError::InvalidArgument(format!(
            "weekday must be between 0 and 6, got {}",
            weekday
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ScheduleManager {
    pool: DbPool,
}

impl ScheduleManager {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Atomically swaps the zone's weekly schedule for the supplied entries.
    ///
    /// Delete and insert run in one transaction, so a failure anywhere (a
    /// duplicate weekday in the input included, surfacing as Conflict from
    /// the unique pair constraint) leaves the previous schedule intact.
    pub async fn replace_for_zone(
        &self,
        zone_id: Uuid,
        entries: Vec<ScheduleEntry>,
        actor: Option<String>,
    ) -> Result<Vec<Schedule>> {
        for entry in &entries {
            ensure_weekday(entry.weekday)?;
        }

        let mut conn = self.conn().await?;
        let schedules = conn
            .transaction::<Vec<Schedule>, ZoneError, _>(|conn| {
                Box::pin(async move {
                    require_active_zone(conn, zone_id).await?;

                    diesel::delete(zone_schedules::table.filter(zone_schedules::zone_id.eq(zone_id)))
                        .execute(conn)
                        .await?;

                    let rows: Vec<NewSchedule> = entries
                        .iter()
                        .map(|entry| NewSchedule {
                            id: Uuid::new_v4(),
                            zone_id,
                            weekday: entry.weekday,
                            deliveries_enabled: entry.deliveries_enabled,
                            visits_enabled: entry.visits_enabled,
                            created_by: actor.clone(),
                        })
                        .collect();
                    let mut schedules: Vec<Schedule> = diesel::insert_into(zone_schedules::table)
                        .values(&rows)
                        .returning(Schedule::as_returning())
                        .get_results(conn)
                        .await?;
                    schedules.sort_by_key(|s| s.weekday);

                    outbox::append(
                        conn,
                        AGGREGATE_ZONE,
                        EVENT_SCHEDULES_REPLACED,
                        zone_id,
                        &SchedulesReplacedPayload {
                            zone_id,
                            schedule_count: schedules.len(),
                        },
                    )
                    .await?;

                    Ok(schedules)
                })
            })
            .await?;

        info!(
            "replaced schedules for zone {} ({} entries)",
            zone_id,
            schedules.len()
        );
        Ok(schedules)
    }

    pub async fn upsert_for_zone_day(
        &self,
        zone_id: Uuid,
        weekday: i32,
        patch: ScheduleDayPatch,
        actor: Option<String>,
    ) -> Result<Schedule> {
        ensure_weekday(weekday)?;

        let mut conn = self.conn().await?;
        let schedule = conn
            .transaction::<Schedule, ZoneError, _>(|conn| {
                Box::pin(async move {
                    require_active_zone(conn, zone_id).await?;

                    let existing: Option<Schedule> = zone_schedules::table
                        .filter(zone_schedules::zone_id.eq(zone_id))
                        .filter(zone_schedules::weekday.eq(weekday))
                        .select(Schedule::as_select())
                        .first::<Schedule>(conn)
                        .await
                        .optional()?;

                    let (deliveries_enabled, visits_enabled) = resolve_flags(
                        existing
                            .as_ref()
                            .map(|s| (s.deliveries_enabled, s.visits_enabled)),
                        &patch,
                    );

                    let schedule: Schedule = match existing {
                        Some(row) => {
                            diesel::update(zone_schedules::table.filter(zone_schedules::id.eq(row.id)))
                                .set((
                                    zone_schedules::deliveries_enabled.eq(deliveries_enabled),
                                    zone_schedules::visits_enabled.eq(visits_enabled),
                                ))
                                .returning(Schedule::as_returning())
                                .get_result(conn)
                                .await?
                        }
                        None => {
                            diesel::insert_into(zone_schedules::table)
                                .values(&NewSchedule {
                                    id: Uuid::new_v4(),
                                    zone_id,
                                    weekday,
                                    deliveries_enabled,
                                    visits_enabled,
                                    created_by: actor,
                                })
                                .returning(Schedule::as_returning())
                                .get_result(conn)
                                .await?
                        }
                    };

                    outbox::append(
                        conn,
                        AGGREGATE_ZONE,
                        EVENT_SCHEDULE_UPSERTED,
                        zone_id,
                        &ScheduleUpsertedPayload {
                            zone_id,
                            weekday,
                            deliveries_enabled,
                            visits_enabled,
                        },
                    )
                    .await?;

                    Ok(schedule)
                })
            })
            .await?;

        info!("upserted schedule for zone {} weekday {}", zone_id, weekday);
        Ok(schedule)
    }

    pub async fn find_by_zone(&self, zone_id: Uuid) -> Result<Vec<Schedule>> {
        let mut conn = self.conn().await?;
        let schedules = zone_schedules::table
            .filter(zone_schedules::zone_id.eq(zone_id))
            .order(zone_schedules::weekday.asc())
            .select(Schedule::as_select())
            .load::<Schedule>(&mut conn)
            .await?;
        Ok(schedules)
    }

    /// Active zones configured for the given weekday with the matching
    /// service flag enabled, ordered by code.
    pub async fn zones_by_weekday(
        &self,
        weekday: i32,
        service_type: ServiceType,
    ) -> Result<Vec<Zone>> {
        ensure_weekday(weekday)?;

        let mut conn = self.conn().await?;
        let mut query = zones::table
            .inner_join(zone_schedules::table)
            .filter(zones::deleted_at.is_null())
            .filter(zones::active.eq(true))
            .filter(zone_schedules::weekday.eq(weekday))
            .select(Zone::as_select())
            .into_boxed();
        query = match service_type {
            ServiceType::Delivery => query.filter(zone_schedules::deliveries_enabled.eq(true)),
            ServiceType::Visit => query.filter(zone_schedules::visits_enabled.eq(true)),
        };
        let zones = query
            .order(zones::code.asc())
            .load::<Zone>(&mut conn)
            .await?;
        Ok(zones)
    }

    async fn conn(
        &self,
    ) -> Result<
        diesel_async::pooled_connection::bb8::PooledConnection<
            '_,
            diesel_async::AsyncPgConnection,
        >,
    > {
        self.pool
            .get()
            .await
            .map_err(|e| ZoneError::Internal(e.to_string()))
    }
}
