//! End-to-end scenarios against a live PostgreSQL with PostGIS.
//!
//! Run with `cargo test -- --ignored` and `TEST_DATABASE_URL` pointing at a
//! database where `CREATE EXTENSION postgis` is permitted.

use diesel::prelude::*;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::MultiPolygon;
use uuid::Uuid;

use zone_service::availability::AvailabilityResolver;
use zone_service::coverage::CoverageResolver;
use zone_service::error::ZoneError;
use zone_service::models::OutboxEventRow;
use zone_service::registry::{NewZoneInput, UpdateZoneInput, ZoneRegistry};
use zone_service::schedules::{ScheduleDayPatch, ScheduleEntry, ScheduleManager};
use zone_service::schema::outbox_events;
use zone_service::DbPool;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

async fn setup() -> DbPool {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must point at a PostGIS-enabled database");
    let mut conn = PgConnection::establish(&url).expect("connect for migrations");
    conn.run_pending_migrations(MIGRATIONS).expect("run migrations");

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&url);
    Pool::builder().build(config).await.expect("build pool")
}

fn unique_code() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("Z{}", &suffix[..8])
}

fn zone_input(code: &str) -> NewZoneInput {
    NewZoneInput {
        code: code.to_string(),
        name: "Test zone".to_string(),
        description: None,
        geometry: None,
    }
}

/// A small square inside a pseudo-random grid cell, so concurrent tests and
/// earlier runs land on disjoint patches of the globe.
fn square_at(lon: f64, lat: f64, size: f64) -> MultiPolygon {
    MultiPolygon::new(vec![vec![vec![
        [lon, lat],
        [lon + size, lat],
        [lon + size, lat + size],
        [lon, lat + size],
        [lon, lat],
    ]]])
}

fn random_cell() -> (f64, f64) {
    let bytes = *Uuid::new_v4().as_bytes();
    let lon = -170.0 + f64::from(bytes[0]);
    let lat = -80.0 + f64::from(bytes[1]) * 0.5;
    (lon, lat)
}

async fn outbox_for(pool: &DbPool, zone_id: Uuid) -> Vec<OutboxEventRow> {
    let mut conn = pool.get().await.unwrap();
    outbox_events::table
        .filter(outbox_events::aggregate_key.eq(zone_id))
        .order(outbox_events::created_at.asc())
        .select(OutboxEventRow::as_select())
        .load(&mut conn)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore]
async fn duplicate_code_conflicts_until_soft_deleted() {
    let pool = setup().await;
    let registry = ZoneRegistry::new(pool.clone());
    let code = unique_code();

    let first = registry.create(zone_input(&code), None).await.unwrap();
    assert_eq!(first.version, 1);
    assert!(first.active);

    // Case-normalized collision while the first zone is live.
    let err = registry
        .create(zone_input(&code.to_lowercase()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ZoneError::Conflict(_)));

    registry
        .soft_delete(first.id, "tester".to_string())
        .await
        .unwrap();

    // The code is reusable once the holder is soft-deleted.
    let second = registry.create(zone_input(&code), None).await.unwrap();
    assert_ne!(second.id, first.id);

    let err = registry.find_by_id(first.id).await.unwrap_err();
    assert!(matches!(err, ZoneError::NotFound(_)));
}

#[tokio::test]
#[ignore]
async fn replace_is_atomic_when_input_has_duplicate_weekday() {
    let pool = setup().await;
    let registry = ZoneRegistry::new(pool.clone());
    let schedules = ScheduleManager::new(pool.clone());

    let zone = registry.create(zone_input(&unique_code()), None).await.unwrap();

    let entries = |weekdays: &[i32]| {
        weekdays
            .iter()
            .map(|&weekday| ScheduleEntry {
                weekday,
                deliveries_enabled: true,
                visits_enabled: true,
            })
            .collect::<Vec<_>>()
    };

    schedules
        .replace_for_zone(zone.id, entries(&[0, 1, 2]), None)
        .await
        .unwrap();

    let err = schedules
        .replace_for_zone(zone.id, entries(&[3, 3]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ZoneError::Conflict(_)));

    // Failed replace must leave the previous schedule untouched.
    let rows = schedules.find_by_zone(zone.id).await.unwrap();
    let weekdays: Vec<i32> = rows.iter().map(|s| s.weekday).collect();
    assert_eq!(weekdays, vec![0, 1, 2]);
}

#[tokio::test]
#[ignore]
async fn availability_fails_closed_and_follows_service_flags() {
    let pool = setup().await;
    let registry = ZoneRegistry::new(pool.clone());
    let schedules = ScheduleManager::new(pool.clone());
    let availability = AvailabilityResolver::new(pool.clone());

    let zone = registry.create(zone_input(&unique_code()), None).await.unwrap();

    // 2024-01-01 is a Monday, weekday 0.
    schedules
        .replace_for_zone(
            zone.id,
            vec![ScheduleEntry {
                weekday: 0,
                deliveries_enabled: true,
                visits_enabled: false,
            }],
            None,
        )
        .await
        .unwrap();

    let monday = availability
        .for_date(zone.id, "2024-01-01", shared::ServiceType::Delivery)
        .await
        .unwrap();
    assert!(monday.available);
    assert!(monday.deliveries_enabled);
    assert!(!monday.visits_enabled);

    let monday_visit = availability
        .for_date(zone.id, "2024-01-01", shared::ServiceType::Visit)
        .await
        .unwrap();
    assert!(!monday_visit.available);

    // Tuesday has no row: closed for everything.
    let tuesday = availability
        .for_date(zone.id, "2024-01-02", shared::ServiceType::Delivery)
        .await
        .unwrap();
    assert!(!tuesday.available);
    assert!(!tuesday.deliveries_enabled);
    assert!(!tuesday.visits_enabled);

    let err = availability
        .for_date(zone.id, "not-a-date", shared::ServiceType::Delivery)
        .await
        .unwrap_err();
    assert!(matches!(err, ZoneError::InvalidArgument(_)));

    registry.deactivate(zone.id, None).await.unwrap();
    let err = availability
        .for_date(zone.id, "2024-01-01", shared::ServiceType::Delivery)
        .await
        .unwrap_err();
    assert!(matches!(err, ZoneError::NotFound(_)));
}

#[tokio::test]
#[ignore]
async fn upsert_round_trip_preserves_omitted_flags() {
    let pool = setup().await;
    let registry = ZoneRegistry::new(pool.clone());
    let schedules = ScheduleManager::new(pool.clone());

    let zone = registry.create(zone_input(&unique_code()), None).await.unwrap();

    schedules
        .upsert_for_zone_day(
            zone.id,
            3,
            ScheduleDayPatch {
                deliveries_enabled: Some(false),
                visits_enabled: None,
            },
            None,
        )
        .await
        .unwrap();

    let rows = schedules.find_by_zone(zone.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].weekday, 3);
    assert!(!rows[0].deliveries_enabled);
    assert!(rows[0].visits_enabled);

    // Patching the other flag must not reset the first one.
    schedules
        .upsert_for_zone_day(
            zone.id,
            3,
            ScheduleDayPatch {
                deliveries_enabled: None,
                visits_enabled: Some(false),
            },
            None,
        )
        .await
        .unwrap();

    let rows = schedules.find_by_zone(zone.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].deliveries_enabled);
    assert!(!rows[0].visits_enabled);
}

#[tokio::test]
#[ignore]
async fn every_mutation_appends_exactly_one_outbox_event() {
    let pool = setup().await;
    let registry = ZoneRegistry::new(pool.clone());

    let zone = registry.create(zone_input(&unique_code()), None).await.unwrap();
    assert_eq!(outbox_for(&pool, zone.id).await.len(), 1);

    let updated = registry
        .update(
            zone.id,
            UpdateZoneInput {
                name: Some("North Zone".to_string()),
                ..Default::default()
            },
            None,
            Some("tester".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert!(updated.updated_at > zone.updated_at);

    registry.deactivate(zone.id, None).await.unwrap();

    let events = outbox_for(&pool, zone.id).await;
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec!["ZoneCreated", "ZoneUpdated", "ZoneDeactivated"]
    );
    assert!(events.iter().all(|e| e.processed_at.is_none() && e.attempts == 0));
    assert!(events.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test]
#[ignore]
async fn stale_expected_version_conflicts_without_writing() {
    let pool = setup().await;
    let registry = ZoneRegistry::new(pool.clone());

    let zone = registry.create(zone_input(&unique_code()), None).await.unwrap();
    let renamed = registry
        .update(
            zone.id,
            UpdateZoneInput {
                name: Some("Renamed".to_string()),
                ..Default::default()
            },
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(renamed.version, 2);

    let err = registry
        .update(
            zone.id,
            UpdateZoneInput {
                name: Some("Stale write".to_string()),
                ..Default::default()
            },
            Some(1),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ZoneError::Conflict(_)));

    let current = registry.find_by_id(zone.id).await.unwrap();
    assert_eq!(current.name, "Renamed");
    assert_eq!(current.version, 2);

    let accepted = registry
        .update(
            zone.id,
            UpdateZoneInput {
                name: Some("Fresh write".to_string()),
                ..Default::default()
            },
            Some(2),
            None,
        )
        .await
        .unwrap();
    assert_eq!(accepted.version, 3);
}

#[tokio::test]
#[ignore]
async fn point_resolution_matches_only_active_zones_with_geometry() {
    let pool = setup().await;
    let registry = ZoneRegistry::new(pool.clone());
    let coverage = CoverageResolver::new(pool.clone());

    let (lon, lat) = random_cell();
    let mut input = zone_input(&unique_code());
    input.geometry = Some(square_at(lon, lat, 0.2));
    let zone = registry.create(input, None).await.unwrap();

    let hit = coverage
        .find_zone_by_point(lat + 0.1, lon + 0.1)
        .await
        .unwrap();
    assert_eq!(hit.map(|z| z.id), Some(zone.id));

    let miss = coverage
        .find_zone_by_point(lat + 0.3, lon + 0.3)
        .await
        .unwrap();
    assert!(miss.is_none());

    registry.deactivate(zone.id, None).await.unwrap();
    let inactive = coverage
        .find_zone_by_point(lat + 0.1, lon + 0.1)
        .await
        .unwrap();
    assert!(inactive.is_none());

    let err = coverage.find_zone_by_point(91.0, 0.0).await.unwrap_err();
    assert!(matches!(err, ZoneError::InvalidArgument(_)));

    registry
        .soft_delete(zone.id, "tester".to_string())
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn overlapping_active_geometry_is_rejected_at_write_time() {
    let pool = setup().await;
    let registry = ZoneRegistry::new(pool.clone());

    let (lon, lat) = random_cell();
    let mut first = zone_input(&unique_code());
    first.geometry = Some(square_at(lon, lat, 0.2));
    let first = registry.create(first, None).await.unwrap();

    let mut overlapping = zone_input(&unique_code());
    overlapping.geometry = Some(square_at(lon + 0.1, lat + 0.1, 0.2));
    let err = registry.create(overlapping, None).await.unwrap_err();
    assert!(matches!(err, ZoneError::Conflict(_)));

    // A shared edge is not an overlap; adjacent zones tile cleanly.
    let mut adjacent = zone_input(&unique_code());
    adjacent.geometry = Some(square_at(lon + 0.2, lat, 0.2));
    let adjacent = registry.create(adjacent, None).await.unwrap();

    registry.soft_delete(first.id, "tester".to_string()).await.unwrap();
    registry
        .soft_delete(adjacent.id, "tester".to_string())
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn schedule_replace_emits_event_and_cascades_with_zone() {
    let pool = setup().await;
    let registry = ZoneRegistry::new(pool.clone());
    let schedules = ScheduleManager::new(pool.clone());

    let zone = registry.create(zone_input(&unique_code()), None).await.unwrap();
    let replaced = schedules
        .replace_for_zone(
            zone.id,
            vec![
                ScheduleEntry {
                    weekday: 5,
                    deliveries_enabled: true,
                    visits_enabled: true,
                },
                ScheduleEntry {
                    weekday: 1,
                    deliveries_enabled: false,
                    visits_enabled: true,
                },
            ],
            Some("tester".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(
        replaced.iter().map(|s| s.weekday).collect::<Vec<_>>(),
        vec![1, 5]
    );

    let events = outbox_for(&pool, zone.id).await;
    let replaced_event = events
        .iter()
        .find(|e| e.event_type == "SchedulesReplacedForZone")
        .expect("replace event");
    assert_eq!(replaced_event.payload["scheduleCount"], 2);
    assert_eq!(replaced_event.aggregate_type, "zone");

    let weekday_zones = schedules
        .zones_by_weekday(1, shared::ServiceType::Visit)
        .await
        .unwrap();
    assert!(weekday_zones.iter().any(|z| z.id == zone.id));
    let weekday_zones = schedules
        .zones_by_weekday(1, shared::ServiceType::Delivery)
        .await
        .unwrap();
    assert!(!weekday_zones.iter().any(|z| z.id == zone.id));
}
