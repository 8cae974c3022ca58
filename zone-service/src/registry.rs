use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::{
    MultiPolygon, ZoneCreatedPayload, ZoneDeactivatedPayload, ZoneDeletedPayload,
    ZoneUpdatedPayload, AGGREGATE_ZONE, EVENT_ZONE_CREATED, EVENT_ZONE_DEACTIVATED,
    EVENT_ZONE_DELETED, EVENT_ZONE_UPDATED,
};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, ZoneError};
use crate::models::{NewZone, Zone, ZoneChanges};
use crate::schema::zones;
use crate::{outbox, DbPool};

pub const MAX_CODE_LEN: usize = 20;
pub const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct NewZoneInput {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub geometry: Option<MultiPolygon>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateZoneInput {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoneFilter {
    /// Filters on the business `active` flag; soft-deleted zones are never listed.
    pub status: Option<bool>,
    /// Case-insensitive substring match over code or name.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            sort_by: None,
            sort_order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Clone)]
pub struct ZoneRegistry {
    pool: DbPool,
}

impl ZoneRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: NewZoneInput, actor: Option<String>) -> Result<Zone> {
        let code = normalize_code(&input.code)?;
        validate_name(&input.name)?;
        let geometry = match &input.geometry {
            Some(geom) => {
                geom.validate()?;
                Some(serde_json::to_value(geom)?)
            }
            None => None,
        };

        let name = input.name;
        let description = input.description;
        let mut conn = self.conn().await?;
        let zone = conn
            .transaction::<Zone, ZoneError, _>(|conn| {
                Box::pin(async move {
                    // Pre-check for a friendly error; the partial unique index on
                    // upper(code) settles concurrent creates as Conflict.
                    let duplicate = zones::table
                        .filter(zones::deleted_at.is_null())
                        .filter(zones::code.eq(&code))
                        .select(zones::id)
                        .first::<Uuid>(conn)
                        .await
                        .optional()?;
                    if duplicate.is_some() {
                        return Err(ZoneError::Conflict(format!(
                            "zone code {} is already in use",
                            code
                        )));
                    }

                    if let Some(geom) = &geometry {
                        ensure_no_overlap(conn, None, geom).await?;
                    }

                    let new_zone = NewZone {
                        id: Uuid::new_v4(),
                        code,
                        name,
                        description,
                        active: true,
                        geometry,
                        version: 1,
                        created_by: actor,
                    };
                    let zone: Zone = diesel::insert_into(zones::table)
                        .values(&new_zone)
                        .returning(Zone::as_returning())
                        .get_result(conn)
                        .await?;

                    outbox::append(
                        conn,
                        AGGREGATE_ZONE,
                        EVENT_ZONE_CREATED,
                        zone.id,
                        &ZoneCreatedPayload {
                            zone_id: zone.id,
                            code: zone.code.clone(),
                            name: zone.name.clone(),
                        },
                    )
                    .await?;

                    Ok(zone)
                })
            })
            .await?;

        info!("created zone {} ({})", zone.code, zone.id);
        Ok(zone)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Zone> {
        let mut conn = self.conn().await?;
        load_zone(&mut conn, id).await
    }

    pub async fn find_all_paginated(
        &self,
        filter: ZoneFilter,
        pagination: Pagination,
    ) -> Result<Page<Zone>> {
        let page = pagination.page.max(1);
        let limit = pagination.limit.max(1);
        let order_col = pagination.sort_by.as_deref().unwrap_or("created_at");
        if !matches!(order_col, "code" | "name" | "created_at" | "updated_at") {
            return Err(ZoneError::InvalidArgument(format!(
                "cannot sort by {}",
                order_col
            )));
        }

        let mut conn = self.conn().await?;

        let mut count_query = zones::table
            .filter(zones::deleted_at.is_null())
            .select(diesel::dsl::count_star())
            .into_boxed();
        if let Some(active) = filter.status {
            count_query = count_query.filter(zones::active.eq(active));
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search);
            count_query = count_query
                .filter(zones::code.ilike(pattern.clone()).or(zones::name.ilike(pattern)));
        }
        let total: i64 = count_query.first(&mut conn).await?;

        let mut query = zones::table
            .filter(zones::deleted_at.is_null())
            .into_boxed();
        if let Some(active) = filter.status {
            query = query.filter(zones::active.eq(active));
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search);
            query = query.filter(zones::code.ilike(pattern.clone()).or(zones::name.ilike(pattern)));
        }
        let query = match (order_col, pagination.sort_order) {
            ("code", SortOrder::Asc) => query.order(zones::code.asc()),
            ("code", SortOrder::Desc) => query.order(zones::code.desc()),
            ("name", SortOrder::Asc) => query.order(zones::name.asc()),
            ("name", SortOrder::Desc) => query.order(zones::name.desc()),
            ("updated_at", SortOrder::Asc) => query.order(zones::updated_at.asc()),
            ("updated_at", SortOrder::Desc) => query.order(zones::updated_at.desc()),
            (_, SortOrder::Asc) => query.order(zones::created_at.asc()),
            (_, SortOrder::Desc) => query.order(zones::created_at.desc()),
        };
        let items = query
            .offset((page - 1) * limit)
            .limit(limit)
            .load::<Zone>(&mut conn)
            .await?;

        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }

    /// Merges the supplied fields into the zone and bumps its version.
    ///
    /// With `expected_version` set, the write only applies if the stored
    /// version still matches; a stale expectation fails with Conflict and
    /// leaves the row untouched. Without it the version is audit-only.
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateZoneInput,
        expected_version: Option<i32>,
        actor: Option<String>,
    ) -> Result<Zone> {
        let code = match &input.code {
            Some(code) => Some(normalize_code(code)?),
            None => None,
        };
        if let Some(name) = &input.name {
            validate_name(name)?;
        }

        let mut changed_fields = Vec::new();
        if code.is_some() {
            changed_fields.push("code".to_string());
        }
        if input.name.is_some() {
            changed_fields.push("name".to_string());
        }
        if input.description.is_some() {
            changed_fields.push("description".to_string());
        }
        if input.active.is_some() {
            changed_fields.push("active".to_string());
        }

        let changes = ZoneChanges {
            code: code.clone(),
            name: input.name,
            description: input.description,
            active: input.active,
        };

        let mut conn = self.conn().await?;
        let zone = conn
            .transaction::<Zone, ZoneError, _>(|conn| {
                Box::pin(async move {
                    let current = load_zone(conn, id).await?;

                    if let Some(code) = &code {
                        if *code != current.code {
                            let collision = zones::table
                                .filter(zones::deleted_at.is_null())
                                .filter(zones::code.eq(code))
                                .filter(zones::id.ne(id))
                                .select(zones::id)
                                .first::<Uuid>(conn)
                                .await
                                .optional()?;
                            if collision.is_some() {
                                return Err(ZoneError::Conflict(format!(
                                    "zone code {} is already in use",
                                    code
                                )));
                            }
                        }
                    }

                    // The version filter makes the optimistic check race-free:
                    // zero rows affected on an existing zone means the caller's
                    // expectation went stale between read and write.
                    let updated: Option<Zone> = match expected_version {
                        Some(expected) => {
                            diesel::update(
                                zones::table
                                    .filter(zones::id.eq(id))
                                    .filter(zones::deleted_at.is_null())
                                    .filter(zones::version.eq(expected)),
                            )
                            .set((
                                &changes,
                                zones::version.eq(zones::version + 1),
                                zones::updated_at.eq(diesel::dsl::now),
                                zones::updated_by.eq(actor),
                            ))
                            .returning(Zone::as_returning())
                            .get_result(conn)
                            .await
                            .optional()?
                        }
                        None => {
                            diesel::update(
                                zones::table
                                    .filter(zones::id.eq(id))
                                    .filter(zones::deleted_at.is_null()),
                            )
                            .set((
                                &changes,
                                zones::version.eq(zones::version + 1),
                                zones::updated_at.eq(diesel::dsl::now),
                                zones::updated_by.eq(actor),
                            ))
                            .returning(Zone::as_returning())
                            .get_result(conn)
                            .await
                            .optional()?
                        }
                    };
                    let zone = updated.ok_or_else(|| stale_or_gone(id, expected_version))?;

                    outbox::append(
                        conn,
                        AGGREGATE_ZONE,
                        EVENT_ZONE_UPDATED,
                        zone.id,
                        &ZoneUpdatedPayload {
                            zone_id: zone.id,
                            version: zone.version,
                            changed_fields,
                        },
                    )
                    .await?;

                    Ok(zone)
                })
            })
            .await?;

        info!("updated zone {} to version {}", zone.id, zone.version);
        Ok(zone)
    }

    /// Wholesale geometry replacement. Partial edits are not supported.
    pub async fn update_geometry(
        &self,
        id: Uuid,
        geometry: MultiPolygon,
        actor: Option<String>,
    ) -> Result<Zone> {
        geometry.validate()?;
        let geometry = serde_json::to_value(&geometry)?;

        let mut conn = self.conn().await?;
        let zone = conn
            .transaction::<Zone, ZoneError, _>(|conn| {
                Box::pin(async move {
                    load_zone(conn, id).await?;
                    ensure_no_overlap(conn, Some(id), &geometry).await?;

                    let zone: Zone = diesel::update(
                        zones::table
                            .filter(zones::id.eq(id))
                            .filter(zones::deleted_at.is_null()),
                    )
                    .set((
                        zones::geometry.eq(Some(geometry)),
                        zones::version.eq(zones::version + 1),
                        zones::updated_at.eq(diesel::dsl::now),
                        zones::updated_by.eq(actor),
                    ))
                    .returning(Zone::as_returning())
                    .get_result(conn)
                    .await?;

                    outbox::append(
                        conn,
                        AGGREGATE_ZONE,
                        EVENT_ZONE_UPDATED,
                        zone.id,
                        &ZoneUpdatedPayload {
                            zone_id: zone.id,
                            version: zone.version,
                            changed_fields: vec!["geometry".to_string()],
                        },
                    )
                    .await?;

                    Ok(zone)
                })
            })
            .await?;

        info!("replaced geometry of zone {}", zone.id);
        Ok(zone)
    }

    /// Disables the zone. Repeated calls are allowed and each emits an event;
    /// identical states are not deduplicated.
    pub async fn deactivate(&self, id: Uuid, actor: Option<String>) -> Result<Zone> {
        let mut conn = self.conn().await?;
        let zone = conn
            .transaction::<Zone, ZoneError, _>(|conn| {
                Box::pin(async move {
                    load_zone(conn, id).await?;

                    let zone: Zone = diesel::update(
                        zones::table
                            .filter(zones::id.eq(id))
                            .filter(zones::deleted_at.is_null()),
                    )
                    .set((
                        zones::active.eq(false),
                        zones::version.eq(zones::version + 1),
                        zones::updated_at.eq(diesel::dsl::now),
                        zones::updated_by.eq(actor),
                    ))
                    .returning(Zone::as_returning())
                    .get_result(conn)
                    .await?;

                    outbox::append(
                        conn,
                        AGGREGATE_ZONE,
                        EVENT_ZONE_DEACTIVATED,
                        zone.id,
                        &ZoneDeactivatedPayload { zone_id: zone.id },
                    )
                    .await?;

                    Ok(zone)
                })
            })
            .await?;

        info!("deactivated zone {}", zone.id);
        Ok(zone)
    }

    /// Marks the zone deleted and leaves the row for audit. Schedules go with
    /// it via the foreign-key cascade. The code becomes reusable immediately.
    pub async fn soft_delete(&self, id: Uuid, actor: String) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.transaction::<(), ZoneError, _>(|conn| {
            Box::pin(async move {
                load_zone(conn, id).await?;

                diesel::update(
                    zones::table
                        .filter(zones::id.eq(id))
                        .filter(zones::deleted_at.is_null()),
                )
                .set((
                    zones::deleted_at.eq(diesel::dsl::now),
                    zones::version.eq(zones::version + 1),
                    zones::updated_at.eq(diesel::dsl::now),
                    zones::updated_by.eq(Some(actor.clone())),
                ))
                .execute(conn)
                .await?;

                outbox::append(
                    conn,
                    AGGREGATE_ZONE,
                    EVENT_ZONE_DELETED,
                    id,
                    &ZoneDeletedPayload {
                        zone_id: id,
                        deleted_by: actor,
                    },
                )
                .await?;

                Ok(())
            })
        })
        .await?;

        info!("soft-deleted zone {}", id);
        Ok(())
    }

    async fn conn(
        &self,
    ) -> Result<diesel_async::pooled_connection::bb8::PooledConnection<'_, AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| ZoneError::Internal(e.to_string()))
    }
}

fn stale_or_gone(id: Uuid, expected_version: Option<i32>) -> ZoneError {
    match expected_version {
        Some(version) => ZoneError::Conflict(format!(
            "zone {} changed concurrently (expected version {})",
            id, version
        )),
        None => ZoneError::zone_not_found(id),
    }
}

pub fn normalize_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(ZoneError::InvalidArgument("zone code must not be empty".to_string()));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(ZoneError::InvalidArgument(format!(
            "zone code must be at most {} characters",
            MAX_CODE_LEN
        )));
    }
    Ok(code.to_uppercase())
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ZoneError::InvalidArgument("zone name must not be empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ZoneError::InvalidArgument(format!(
            "zone name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Loads a zone regardless of its `active` flag; soft-deleted rows read as absent.
pub(crate) async fn load_zone(conn: &mut AsyncPgConnection, id: Uuid) -> Result<Zone> {
    zones::table
        .filter(zones::id.eq(id))
        .filter(zones::deleted_at.is_null())
        .select(Zone::as_select())
        .first::<Zone>(conn)
        .await
        .optional()?
        .ok_or_else(|| ZoneError::zone_not_found(id))
}

/// Loads a zone that is both live and active; anything else reads as absent.
pub(crate) async fn require_active_zone(conn: &mut AsyncPgConnection, id: Uuid) -> Result<Zone> {
    let zone = load_zone(conn, id).await?;
    if !zone.active {
        return Err(ZoneError::zone_not_found(id));
    }
    Ok(zone)
}

#[derive(QueryableByName)]
struct OverlapProbe {
    #[diesel(sql_type = diesel::sql_types::Bool)]
    overlapping: bool,
}

/// Rejects a geometry whose interior intersects another active zone's
/// geometry. Shared boundaries are fine; interior overlap is not, keeping the
/// at-most-one guarantee of point resolution intact at write time.
async fn ensure_no_overlap(
    conn: &mut AsyncPgConnection,
    exclude: Option<Uuid>,
    geometry: &serde_json::Value,
) -> Result<()> {
    let probe: OverlapProbe = diesel::sql_query(
        "SELECT EXISTS ( \
            SELECT 1 FROM zones \
            WHERE deleted_at IS NULL \
              AND active \
              AND geometry IS NOT NULL \
              AND id IS DISTINCT FROM $1 \
              AND ST_Relate( \
                    ST_GeomFromGeoJSON(geometry), \
                    ST_GeomFromGeoJSON($2), \
                    '2********') \
        ) AS overlapping",
    )
    .bind::<Nullable<diesel::sql_types::Uuid>, _>(exclude)
    .bind::<Text, _>(geometry.to_string())
    .get_result(conn)
    .await?;

    if probe.overlapping {
        return Err(ZoneError::Conflict(
            "geometry overlaps another active zone".to_string(),
        ));
    }
    Ok(())
}
