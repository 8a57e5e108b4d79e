//! Pooled SQLite connection

use crate::config::Settings;
use di::inject;
use di::injectable;
use log::info;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::ops::{Deref, DerefMut};
use std::sync::{PoisonError, RwLock};

/// Pool handed to every `DatabaseConnection` the container creates while set.
/// The container cannot be given a pre-built pool, so integration tests park
/// their in-memory pool here.
static TEST_POOL: RwLock<Option<SqlitePool>> = RwLock::new(None);

pub struct DatabaseConnection {
    connection: SqlitePool,
}

#[injectable]
impl DatabaseConnection {
    #[inject]
    pub fn create() -> DatabaseConnection {
        if let Some(pool) = TEST_POOL
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return DatabaseConnection::from_pool(pool);
        }

        let settings = Settings::from_env();
        info!("opening database {}", settings.database_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.database_max_connections)
            .connect_lazy(&settings.database_url)
            .expect("DATABASE_URL is not a valid SQLite connection string");

        DatabaseConnection { connection: pool }
    }
}

impl DatabaseConnection {
    pub fn from_pool(pool: SqlitePool) -> DatabaseConnection {
        DatabaseConnection { connection: pool }
    }

    pub fn set_test_pool(pool: SqlitePool) {
        *TEST_POOL.write().unwrap_or_else(PoisonError::into_inner) = Some(pool);
    }

    pub fn clear_test_pool() {
        *TEST_POOL.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.connection).await
    }
}

impl Deref for DatabaseConnection {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for DatabaseConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}
