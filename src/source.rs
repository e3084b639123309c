//! PostgreSQL download log access

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{Postgres, Transaction};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::config::PgConfig;
use crate::error::{JobError, Result};

/// Request path logged for downloads of the current release
pub const CURRENT_RELEASE: &str = "/currentrelease";

/// Country code recorded when the client location is unknown
pub const UNKNOWN_COUNTRY: &str = "ZZZ";

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

// Sessions run in UTC, so `timestamp` columns read as UTC and `::timestamptz`
// decodes the same way for either column type.
const SESSION_TIME_ZONE: &str = "UTC";

const FIRST_REQUEST_TIME: &str = r#"
SELECT request_time::timestamptz
FROM download_log
WHERE request = $1
    AND client_country IS NOT NULL
    AND client_country != $2
    AND client_country != ''
ORDER BY request_time ASC
LIMIT 1
"#;

const LAST_REQUEST_TIME: &str = r#"
SELECT request_time::timestamptz
FROM download_log
WHERE request = $1
    AND client_country IS NOT NULL
    AND client_country != $2
    AND client_country != ''
ORDER BY request_time DESC
LIMIT 1
"#;

const COUNTRY_COUNTS: &str = r#"
SELECT client_country, count(*)
FROM download_log
WHERE request_time >= $3
    AND request_time < $4
    AND request = $1
    AND client_country IS NOT NULL
    AND client_country != $2
    AND client_country != ''
GROUP BY client_country
ORDER BY client_country ASC
"#;

/// Read-only view of the qualifying download log records
#[async_trait]
pub trait DownloadLog: Send {
    /// Timestamp of the earliest qualifying record, if any
    async fn first_request_time(&mut self) -> Result<Option<DateTime<Utc>>>;

    /// Timestamp of the latest qualifying record, if any
    async fn last_request_time(&mut self) -> Result<Option<DateTime<Utc>>>;

    /// Qualifying record counts per country for `from <= request_time < to`
    async fn country_counts(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<String, i64>>;
}

/// Connection options described by the `[pg]` section
pub fn connect_options(config: &PgConfig) -> PgConnectOptions {
    // `Require` encrypts without verifying the server certificate
    let ssl_mode = if config.ssl {
        PgSslMode::Require
    } else {
        PgSslMode::Disable
    };

    PgConnectOptions::new()
        .host(&config.server)
        .port(config.port)
        .username(&config.username)
        .password(&config.password)
        .database(&config.database)
        .ssl_mode(ssl_mode)
}

/// Open the connection pool described by the `[pg]` section
pub async fn connect(config: &PgConfig) -> Result<PgPool> {
    connect_with(connect_options(config), config.num_connections).await
}

pub async fn connect_with(options: PgConnectOptions, max_connections: u32) -> Result<PgPool> {
    let server = options.get_host().to_string();
    let options = options.options([("timezone", SESSION_TIME_ZONE)]);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|source| JobError::Connect { server, source })
}

/// Download log read through a single transaction that is never committed
pub struct PgDownloadLog {
    tx: Transaction<'static, Postgres>,
}

impl PgDownloadLog {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        let tx = pool
            .begin()
            .await
            .map_err(JobError::query("failed to begin source transaction"))?;
        Ok(Self { tx })
    }

    /// Nothing is written to the source, so ending the transaction is always a rollback
    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(JobError::query("failed to roll back source transaction"))
    }

    async fn request_time(&mut self, query: &'static str) -> Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar::<_, DateTime<Utc>>(query)
            .bind(CURRENT_RELEASE)
            .bind(UNKNOWN_COUNTRY)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(JobError::query("error retrieving the reporting window bounds"))
    }
}

#[async_trait]
impl DownloadLog for PgDownloadLog {
    async fn first_request_time(&mut self) -> Result<Option<DateTime<Utc>>> {
        self.request_time(FIRST_REQUEST_TIME).await
    }

    async fn last_request_time(&mut self) -> Result<Option<DateTime<Utc>>> {
        self.request_time(LAST_REQUEST_TIME).await
    }

    async fn country_counts(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<String, i64>> {
        let mut rows = sqlx::query_as::<_, (String, i64)>(COUNTRY_COUNTS)
            .bind(CURRENT_RELEASE)
            .bind(UNKNOWN_COUNTRY)
            .bind(from)
            .bind(to)
            .fetch(&mut *self.tx);

        let mut counts = BTreeMap::new();
        while let Some((country, users)) = rows.try_next().await.map_err(|source| JobError::Query {
            context: format!("error reading country counts from {}", from),
            source,
        })? {
            counts.insert(country, users);
        }

        debug!("{} countries with downloads from {} to {}", counts.len(), from, to);
        Ok(counts)
    }
}
