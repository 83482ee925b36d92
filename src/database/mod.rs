//! # Database Layer
//!
//! The [`TaskStore`] trait is the engine's only view of persistence. Two
//! implementations ship with the crate:
//!
//! - [`PgTaskStore`] - PostgreSQL via sqlx, row-level locking with
//!   `FOR UPDATE SKIP LOCKED`
//! - [`InMemoryTaskStore`] - mutex-guarded maps for tests and embedding
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use taskforge_core::config::DatabaseConfig;
//! use taskforge_core::database::{PgTaskStore, TaskStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgTaskStore::connect(&DatabaseConfig::default()).await?;
//! let types = store.task_types().await?;
//! println!("{} task types registered", types.len());
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod migrator;
pub mod postgres;
pub mod store;

pub use memory::InMemoryTaskStore;
pub use postgres::PgTaskStore;
pub use store::TaskStore;
