use diesel::sql_types::Double;
use diesel_async::RunQueryDsl;
use diesel::OptionalExtension;

use crate::error::{Result, ZoneError};
use crate::models::Zone;
use crate::DbPool;

pub fn validate_coordinates(lat: f64, lon: f64) -> Result<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(ZoneError::InvalidArgument(format!(
            "latitude must be between -90 and 90, got {}",
            lat
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(ZoneError::InvalidArgument(format!(
            "longitude must be between -180 and 180, got {}",
            lon
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CoverageResolver {
    pool: DbPool,
}

impl CoverageResolver {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Finds the active zone whose geometry contains the coordinate, if any.
    ///
    /// Containment is the storage engine's predicate; inactive, deleted and
    /// geometry-less zones never match. Active geometries are kept
    /// non-overlapping at write time, so at most one row is expected; the
    /// `ORDER BY id` tie-break keeps the result stable should pre-existing
    /// data violate that.
    pub async fn find_zone_by_point(&self, lat: f64, lon: f64) -> Result<Option<Zone>> {
        validate_coordinates(lat, lon)?;

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ZoneError::Internal(e.to_string()))?;
        let zone: Option<Zone> = diesel::sql_query(
            "SELECT * FROM zones \
             WHERE deleted_at IS NULL \
               AND active \
               AND geometry IS NOT NULL \
               AND ST_Contains( \
                     ST_SetSRID(ST_GeomFromGeoJSON(geometry), 4326), \
                     ST_SetSRID(ST_MakePoint($1, $2), 4326)) \
             ORDER BY id \
             LIMIT 1",
        )
        .bind::<Double, _>(lon)
        .bind::<Double, _>(lat)
        .get_result::<Zone>(&mut conn)
        .await
        .optional()?;

        Ok(zone)
    }
}
