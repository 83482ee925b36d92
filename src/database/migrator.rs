//! Embedded schema migrations.
//!
//! ```rust,ignore
//! #[sqlx::test(migrator = "taskforge_core::database::migrator::MIGRATOR")]
//! async fn test_feature(pool: PgPool) { /* ... */ }
//! ```

/// All migrations from the crate's `migrations/` directory.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
