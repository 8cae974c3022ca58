pub mod api;
pub mod availability;
pub mod coverage;
pub mod error;
pub mod models;
pub mod outbox;
pub mod registry;
pub mod schedules;
pub mod schema;

use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};

pub type DbPool = Pool<AsyncPgConnection>;
