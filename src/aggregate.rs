//! Daily active user aggregation

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::{JobError, Result};
use crate::source::DownloadLog;
use crate::window::{midnight, next_day, ReportingWindow};

/// Active users from one country on one day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyCountryCount {
    pub date: NaiveDate,
    pub country: String,
    pub users: i64,
}

/// Destination for daily country counts
#[async_trait]
pub trait ActiveUserSink: Send {
    /// Store one row, returning the number of rows affected
    async fn insert(&mut self, row: &DailyCountryCount) -> Result<u64>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobSummary {
    pub days: u64,
    pub rows: u64,
    pub users: i64,
}

/// Count and store the active users for a single day
pub async fn aggregate_day<L, S>(
    log: &mut L,
    sink: &mut S,
    day: NaiveDate,
    progress: bool,
) -> Result<JobSummary>
where
    L: DownloadLog + ?Sized,
    S: ActiveUserSink + ?Sized,
{
    if progress {
        info!("Generating active user data for: {}", day);
    }
    let from = midnight(day);
    let to = midnight(next_day(day)?);
    let counts = log.country_counts(from, to).await?;

    if progress {
        info!("Inserting into SQLite database for: {}", day);
    }

    let mut summary = JobSummary {
        days: 1,
        ..Default::default()
    };
    for (country, users) in counts {
        let row = DailyCountryCount {
            date: day,
            country,
            users,
        };
        let affected = sink.insert(&row).await?;
        if affected != 1 {
            return Err(JobError::InsertCount {
                date: row.date,
                country: row.country,
                affected,
            });
        }
        summary.rows += 1;
        summary.users += row.users;
    }

    debug!("{}: {} countries, {} users", day, summary.rows, summary.users);
    Ok(summary)
}

/// Aggregate every day of the window in ascending order, stopping at the first error
pub async fn aggregate_window<L, S>(
    log: &mut L,
    sink: &mut S,
    window: &ReportingWindow,
    progress: bool,
) -> Result<JobSummary>
where
    L: DownloadLog + ?Sized,
    S: ActiveUserSink + ?Sized,
{
    let mut total = JobSummary::default();
    for day in window.days() {
        let summary = aggregate_day(log, sink, day, progress).await?;

        total.days += summary.days;
        total.rows += summary.rows;
        total.users += summary.users;
    }
    Ok(total)
}
