//! SQLite output store for the active user statistics

mod schema;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

use crate::aggregate::{ActiveUserSink, DailyCountryCount};
use crate::error::{JobError, Result};

/// Date format of the `active_users.date` column
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct OutputStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl OutputStore {
    /// Open the store, creating the file if it does not exist
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        // One connection, so every insert reuses the same prepared statement
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| JobError::OutputStore {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop and recreate the active_users table and its index
    pub async fn reset(&self) -> Result<()> {
        for statement in [
            schema::DROP_ACTIVE_USERS,
            schema::CREATE_ACTIVE_USERS,
            schema::CREATE_INDEX_DATE,
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|source| JobError::OutputStore {
                    path: self.path.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Close the pool, finalizing cached statements
    pub async fn close(self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub async fn fetch_all(&self) -> Vec<(String, String, i64)> {
        sqlx::query_as("SELECT date, country, users FROM active_users ORDER BY date, country")
            .fetch_all(&self.pool)
            .await
            .unwrap()
    }
}

#[async_trait]
impl ActiveUserSink for OutputStore {
    async fn insert(&mut self, row: &DailyCountryCount) -> Result<u64> {
        let result = sqlx::query(schema::INSERT_ACTIVE_USERS)
            .bind(row.date.format(DATE_FORMAT).to_string())
            .bind(&row.country)
            .bind(row.users)
            .execute(&self.pool)
            .await
            .map_err(|source| JobError::InsertFailed {
                date: row.date,
                country: row.country.clone(),
                source,
            })?;

        Ok(result.rows_affected())
    }
}
