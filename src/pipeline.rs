//! Job orchestration
//!
//! Resources are acquired in order (source pool, output store, source
//! transaction) and released in reverse on every exit path. Release failures
//! are logged and never replace the job's own result.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::aggregate::{aggregate_window, ActiveUserSink, JobSummary};
use crate::config::Config;
use crate::db::OutputStore;
use crate::error::Result;
use crate::source::{self, DownloadLog, PgDownloadLog};
use crate::window::{resolve_window, ReportingWindow};

/// Resolve the reporting window and aggregate every day in it
pub async fn run<L, S>(log: &mut L, sink: &mut S, progress: bool) -> Result<(ReportingWindow, JobSummary)>
where
    L: DownloadLog + ?Sized,
    S: ActiveUserSink + ?Sized,
{
    let window = resolve_window(log).await?;
    info!("Reporting window: {} ({} days)", window, window.num_days());

    let summary = aggregate_window(log, sink, &window, progress).await?;
    Ok((window, summary))
}

/// Run the whole job against the configured source and output store
pub async fn execute(config: &Config) -> Result<JobSummary> {
    let pool = source::connect(&config.pg).await?;
    info!("Connected to PostgreSQL server: {}", config.pg.server);

    let result = with_output_store(&pool, config).await;

    pool.close().await;
    result
}

async fn with_output_store(pool: &PgPool, config: &Config) -> Result<JobSummary> {
    let mut store = OutputStore::open(&config.output.path).await?;
    info!("Created country stats database: {}", store.path().display());

    let result = with_source_transaction(pool, &mut store, config).await;

    store.close().await;
    result
}

async fn with_source_transaction(
    pool: &PgPool,
    store: &mut OutputStore,
    config: &Config,
) -> Result<JobSummary> {
    store.reset().await?;

    let mut log = PgDownloadLog::begin(pool).await?;
    let result = run(&mut log, store, config.logging.debug).await;

    if let Err(e) = log.rollback().await {
        warn!("{:#}", anyhow::Error::new(e));
    }

    result.map(|(_, summary)| summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::source::testing::{LogRecord, MemoryLog};
    use chrono::{NaiveDate, TimeZone, Utc};
    use sqlx::postgres::PgConnectOptions;
    use std::path::{Path, PathBuf};

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("country_stats_{}.sqlite", uuid::Uuid::new_v4()))
    }

    fn scenario_log() -> MemoryLog {
        let at = |d, h| Utc.with_ymd_and_hms(2020, 1, d, h, 0, 0).unwrap();
        MemoryLog::new(vec![
            LogRecord::download(at(5, 2), "US"),
            LogRecord::download(at(5, 10), "DE"),
            LogRecord::download(at(5, 11), "US"),
            LogRecord::download(at(5, 20), "US"),
            LogRecord::download(at(6, 3), "ZZZ"),
            LogRecord::download(at(7, 8), "US"),
            LogRecord::download(at(7, 9), "US"),
        ])
    }

    fn expected_rows() -> Vec<(String, String, i64)> {
        vec![
            ("2020-01-05".to_string(), "DE".to_string(), 1),
            ("2020-01-05".to_string(), "US".to_string(), 3),
            ("2020-01-07".to_string(), "US".to_string(), 2),
        ]
    }

    async fn run_once(path: &Path, log: &mut MemoryLog) -> Result<(ReportingWindow, JobSummary)> {
        let mut store = OutputStore::open(path).await?;
        store.reset().await?;
        let result = run(log, &mut store, true).await;
        store.close().await;
        result
    }

    #[tokio::test]
    async fn two_day_scenario_end_to_end() {
        let path = temp_db_path();
        let mut log = scenario_log();

        let (window, summary) = run_once(&path, &mut log).await.unwrap();

        assert_eq!(window.start, NaiveDate::from_ymd_opt(2020, 1, 5).unwrap());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2020, 1, 8).unwrap());
        assert_eq!(summary.days, 3);
        assert_eq!(summary.rows, 3);

        let store = OutputStore::open(&path).await.unwrap();
        assert_eq!(store.fetch_all().await, expected_rows());
        store.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn rerun_produces_identical_table() {
        let path = temp_db_path();

        run_once(&path, &mut scenario_log()).await.unwrap();
        run_once(&path, &mut scenario_log()).await.unwrap();

        let store = OutputStore::open(&path).await.unwrap();
        assert_eq!(store.fetch_all().await, expected_rows());
        store.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn empty_source_leaves_empty_table() {
        let path = temp_db_path();
        let mut log = MemoryLog::default();

        let err = run_once(&path, &mut log).await.unwrap_err();
        assert!(matches!(err, JobError::EmptySource(_)));

        let store = OutputStore::open(&path).await.unwrap();
        assert!(store.fetch_all().await.is_empty());
        store.close().await;
        let _ = std::fs::remove_file(&path);
    }

    /// Rows of the two-day scenario plus records every filter must drop
    const DOWNLOAD_LOG_ROWS: &[(&str, &str, Option<&str>)] = &[
        ("/currentrelease", "2020-01-05 02:00:00", Some("US")),
        ("/currentrelease", "2020-01-05 10:00:00", Some("DE")),
        ("/currentrelease", "2020-01-05 11:00:00", Some("US")),
        ("/currentrelease", "2020-01-05 20:00:00", Some("US")),
        ("/currentrelease", "2020-01-07 08:00:00", Some("US")),
        ("/currentrelease", "2020-01-07 09:00:00", Some("US")),
        ("/currentrelease", "2020-01-03 12:00:00", None),
        ("/currentrelease", "2020-01-04 12:00:00", Some("")),
        ("/currentrelease", "2020-01-06 03:00:00", Some("ZZZ")),
        ("/currentrelease", "2020-01-09 12:00:00", Some("ZZZ")),
        ("/DB.Browser.for.SQLite-3.12.0-win64.msi", "2020-01-02 12:00:00", Some("US")),
        ("/DB.Browser.for.SQLite-3.12.0-win64.msi", "2020-01-10 12:00:00", Some("GB")),
    ];

    async fn insert_download(
        pool: &PgPool,
        column_type: &str,
        (request, request_time, country): (&str, &str, Option<&str>),
    ) -> std::result::Result<(), sqlx::Error> {
        let insert = format!(
            "INSERT INTO download_log (request, request_time, client_country) VALUES ($1, $2::{}, $3)",
            column_type
        );
        sqlx::query(&insert)
            .bind(request)
            .bind(request_time)
            .bind(country)
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn seed_download_log(pool: &PgPool, column_type: &str) -> std::result::Result<(), sqlx::Error> {
        sqlx::query("DROP TABLE IF EXISTS download_log").execute(pool).await?;
        let create = format!(
            "CREATE TABLE download_log (request TEXT NOT NULL, request_time {} NOT NULL, client_country TEXT)",
            column_type
        );
        sqlx::query(&create).execute(pool).await?;

        for row in DOWNLOAD_LOG_ROWS {
            insert_download(pool, column_type, *row).await?;
        }
        Ok(())
    }

    fn test_config(output: &Path) -> Config {
        let contents = format!(
            r#"
[pg]
database = "unused"
num_connections = 1
port = 5432
password = ""
server = "unused"
ssl = false
username = "unused"

[output]
path = "{}"
"#,
            output.display()
        );
        Config::from_toml(&contents).unwrap()
    }

    #[tokio::test]
    async fn postgres_download_log_end_to_end() {
        let dsn = match std::env::var("PG_TEST_DSN") {
            Ok(value) => value,
            Err(_) => {
                eprintln!("skipping postgres_download_log_end_to_end; set PG_TEST_DSN to run");
                return;
            }
        };

        let options: PgConnectOptions = dsn.parse().unwrap();
        // A single connection also shows the source transaction is released after every run
        let pool = source::connect_with(options, 1).await.unwrap();

        for column_type in ["timestamptz", "timestamp"] {
            seed_download_log(&pool, column_type).await.unwrap();
            let path = temp_db_path();
            let config = test_config(&path);

            let mut log = PgDownloadLog::begin(&pool).await.unwrap();
            let window = resolve_window(&mut log).await.unwrap();
            log.rollback().await.unwrap();
            assert_eq!(window.start, NaiveDate::from_ymd_opt(2020, 1, 5).unwrap());
            assert_eq!(window.end, NaiveDate::from_ymd_opt(2020, 1, 8).unwrap());

            let summary = with_output_store(&pool, &config).await.unwrap();
            assert_eq!(
                summary,
                JobSummary {
                    days: 3,
                    rows: 3,
                    users: 6
                }
            );
            let store = OutputStore::open(&path).await.unwrap();
            assert_eq!(store.fetch_all().await, expected_rows(), "column type {}", column_type);
            store.close().await;

            // A download at exactly midnight counts for the day it starts
            insert_download(
                &pool,
                column_type,
                ("/currentrelease", "2020-01-06 00:00:00", Some("FR")),
            )
            .await
            .unwrap();
            with_output_store(&pool, &config).await.unwrap();
            let store = OutputStore::open(&path).await.unwrap();
            let rows = store.fetch_all().await;
            store.close().await;
            assert_eq!(rows.len(), 4);
            assert!(rows.contains(&("2020-01-06".to_string(), "FR".to_string(), 1)));

            sqlx::query("DELETE FROM download_log WHERE client_country IN ('US', 'DE', 'FR')")
                .execute(&pool)
                .await
                .unwrap();
            let err = with_output_store(&pool, &config).await.unwrap_err();
            assert!(matches!(err, JobError::EmptySource(_)));
            let store = OutputStore::open(&path).await.unwrap();
            assert!(store.fetch_all().await.is_empty());
            store.close().await;

            let _ = std::fs::remove_file(&path);
        }

        sqlx::query("DROP TABLE IF EXISTS download_log")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    }
}
