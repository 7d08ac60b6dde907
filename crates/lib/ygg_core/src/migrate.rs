//! Database migration support.
//!
//! Embeds and runs the native schema from `ygg_core/migrations/`. The legacy
//! backend uses the site's existing tables and is never migrated.

use sqlx::PgPool;

/// Run all embedded database migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
