use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::NewOutboxEvent;
use crate::schema::outbox_events;

/// Appends a domain event row on the caller's connection.
///
/// Must be invoked inside an already-open transaction: the row commits or
/// rolls back together with the business mutation that produced it, with no
/// independent success path. `created_at` is left to the database default so
/// the relay observes events in commit order. The relay marks rows processed;
/// this service never touches a row after insertion.
pub async fn append<P: Serialize>(
    conn: &mut AsyncPgConnection,
    aggregate_type: &str,
    event_type: &str,
    aggregate_key: Uuid,
    payload: &P,
) -> Result<Uuid> {
    let event = NewOutboxEvent {
        id: Uuid::new_v4(),
        aggregate_type: aggregate_type.to_string(),
        event_type: event_type.to_string(),
        aggregate_key,
        payload: serde_json::to_value(payload)?,
        attempts: 0,
    };

    diesel::insert_into(outbox_events::table)
        .values(&event)
        .execute(conn)
        .await?;

    Ok(event.id)
}
