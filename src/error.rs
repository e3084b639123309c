//! Errors raised by the statistics pipeline

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to connect to PostgreSQL server {server}")]
    Connect {
        server: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("output store {}", path.display())]
    OutputStore {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("{context}")]
    Query {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("no qualifying download records found, cannot determine the {0} date")]
    EmptySource(&'static str),

    #[error("inserting {country} for {date} into the output store failed")]
    InsertFailed {
        date: NaiveDate,
        country: String,
        #[source]
        source: sqlx::Error,
    },

    /// The output table has no uniqueness constraint, so anything other than
    /// one new row means the store did not do what was asked.
    #[error("inserting {country} for {date} affected {affected} rows instead of 1")]
    InsertCount {
        date: NaiveDate,
        country: String,
        affected: u64,
    },

    #[error("date {0} has no following calendar day")]
    DateOutOfRange(NaiveDate),
}

impl JobError {
    pub fn query(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let context = context.into();
        move |source| JobError::Query { context, source }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
