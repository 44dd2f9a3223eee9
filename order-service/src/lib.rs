pub mod api;
pub mod auth;
pub mod config;
pub mod coupons;
pub mod delivery;
pub mod error;
pub mod inventory;
pub mod lifecycle;
pub mod models;
pub mod outbox;
pub mod payment_events;
pub mod reservations;
pub mod schedulers;
pub mod schema;

use diesel::{Connection, PgConnection};
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub use config::EngineConfig;
pub use error::EngineError;
pub use lifecycle::OrderLifecycle;

pub type DbPool = Pool<AsyncPgConnection>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies pending migrations over a blocking connection.
pub fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    let mut conn = PgConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    Ok(())
}

pub async fn connect_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let manager =
        diesel_async::pooled_connection::AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Ok(Pool::builder().build(manager).await?)
}
