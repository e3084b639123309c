//! Reporting window resolution

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use std::fmt;
use tracing::info;

use crate::error::{JobError, Result};
use crate::source::DownloadLog;

/// Half-open range of UTC calendar days, `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportingWindow {
    /// Days in ascending order, excluding `end`
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day < end)
    }

    pub fn num_days(&self) -> u64 {
        (self.end - self.start).num_days().max(0) as u64
    }
}

impl fmt::Display for ReportingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The following calendar day
pub fn next_day(day: NaiveDate) -> Result<NaiveDate> {
    day.checked_add_days(Days::new(1))
        .ok_or(JobError::DateOutOfRange(day))
}

/// UTC midnight at the start of `day`
pub fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Window covering every day with a qualifying download record
pub async fn resolve_window<L: DownloadLog + ?Sized>(log: &mut L) -> Result<ReportingWindow> {
    let first = log
        .first_request_time()
        .await?
        .ok_or(JobError::EmptySource("start"))?;
    let start = first.date_naive();
    info!("Start date is: {}", start);

    let last = log
        .last_request_time()
        .await?
        .ok_or(JobError::EmptySource("end"))?;
    let end = next_day(last.date_naive())?;
    info!("End date is: {} (exclusive)", end);

    Ok(ReportingWindow { start, end })
}
