//! In-process scheduler for the two recurring batches.
//!
//! Weekly: Sunday 23:59 UTC, aggregate the current ISO week.
//! Monthly: last day of the month 23:00 UTC, train every diagnosis code.

use crate::config::Config;
use crate::services::aggregate::{self, AggregationTarget};
use crate::services::train::{self, TrainOptions};
use crate::stop::StopHandle;
use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use log::{error, info};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    WeeklyAggregation,
    MonthlyTraining,
}

impl Display for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::WeeklyAggregation => write!(f, "weekly aggregation"),
            Job::MonthlyTraining => write!(f, "monthly training"),
        }
    }
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&date.and_time(time))
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// First Sunday 23:59 UTC strictly after `after`.
pub fn next_weekly_run(after: DateTime<Utc>) -> DateTime<Utc> {
    let today = after.date_naive();
    let to_sunday = 6 - u64::from(today.weekday().num_days_from_monday());
    let sunday = today.checked_add_days(Days::new(to_sunday)).unwrap_or(today);
    let candidate = at(sunday, 23, 59);
    if candidate > after {
        candidate
    } else {
        candidate + Duration::days(7)
    }
}

/// First last-day-of-month 23:00 UTC strictly after `after`.
pub fn next_monthly_run(after: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = at(last_day_of_month(after.year(), after.month()), 23, 0);
    if candidate > after {
        return candidate;
    }
    let (year, month) = if after.month() == 12 {
        (after.year() + 1, 1)
    } else {
        (after.year(), after.month() + 1)
    };
    at(last_day_of_month(year, month), 23, 0)
}

/// Owns the configuration and the stop flag shared with running batches.
#[derive(Debug)]
pub struct Scheduler {
    cfg: Config,
    stop: StopHandle,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(cfg: Config) -> Self {
        Scheduler {
            cfg,
            stop: StopHandle::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that stops the loop and any batch it is running.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn next_runs(&self, now: DateTime<Utc>) -> [(Job, DateTime<Utc>); 2] {
        [
            (Job::WeeklyAggregation, next_weekly_run(now)),
            (Job::MonthlyTraining, next_monthly_run(now)),
        ]
    }

    /// Run jobs as they come due until stopped. Blocks the calling thread.
    /// A stopped scheduler stays stopped; build a new one to start again.
    pub fn start(&self) -> Result<(), String> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err("scheduler is already running".to_string());
        }

        let now = Utc::now();
        let mut weekly_due = next_weekly_run(now);
        let mut monthly_due = next_monthly_run(now);
        info!(
            "Scheduler: started (next weekly={}, next monthly={}, poll={}s)",
            weekly_due,
            monthly_due,
            self.cfg.scheduler_poll.as_secs()
        );

        while !self.stop.is_stopped() {
            let now = Utc::now();
            if now >= weekly_due {
                self.run_logged(Job::WeeklyAggregation, now);
                weekly_due = next_weekly_run(now);
                info!("Scheduler: next weekly aggregation at {}", weekly_due);
            }
            if !self.stop.is_stopped() && now >= monthly_due {
                self.run_logged(Job::MonthlyTraining, now);
                monthly_due = next_monthly_run(now);
                info!("Scheduler: next monthly training at {}", monthly_due);
            }

            let until_due = (weekly_due.min(monthly_due) - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            thread::sleep(self.cfg.scheduler_poll.min(until_due));
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler: stopped");
        Ok(())
    }

    fn run_logged(&self, job: Job, now: DateTime<Utc>) {
        info!("Scheduler: running {}", job);
        if let Err(e) = self.run_job(job, now) {
            error!("Scheduler: {} failed: {}", job, e);
        }
    }

    /// Run one job immediately, outside the schedule.
    pub fn trigger(&self, job: Job) -> Result<(), String> {
        self.run_job(job, Utc::now())
    }

    fn run_job(&self, job: Job, now: DateTime<Utc>) -> Result<(), String> {
        let mut conn =
            PgConnection::establish(&self.cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
        let today = now.date_naive();
        match job {
            Job::WeeklyAggregation => {
                let summary = aggregate::run(&mut conn, AggregationTarget::Current, today, &self.stop)
                    .map_err(|e| e.to_string())?;
                info!(
                    "Scheduler: {} processed {} week(s), skipped {}, cancelled={}",
                    job,
                    summary.processed.len(),
                    summary.skipped.len(),
                    summary.cancelled
                );
            }
            Job::MonthlyTraining => {
                let opts = TrainOptions::from_config(&self.cfg, today);
                let summary = train::run(&mut conn, &opts, &self.stop).map_err(|e| e.to_string())?;
                info!(
                    "Scheduler: {} trained {} code(s), skipped {}, cancelled={}",
                    job,
                    summary.trained.len(),
                    summary.skipped.len(),
                    summary.cancelled
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn weekly_run_is_the_coming_sunday_evening() {
        assert_eq!(next_weekly_run(utc(2025, 1, 8, 10, 0)), utc(2025, 1, 12, 23, 59));
        assert_eq!(next_weekly_run(utc(2025, 1, 12, 12, 0)), utc(2025, 1, 12, 23, 59));
        assert_eq!(next_weekly_run(utc(2025, 1, 12, 23, 59)), utc(2025, 1, 19, 23, 59));
        assert_eq!(next_weekly_run(utc(2024, 12, 30, 0, 0)), utc(2025, 1, 5, 23, 59));
    }

    #[test]
    fn monthly_run_is_the_last_day_of_the_month() {
        assert_eq!(next_monthly_run(utc(2024, 2, 10, 0, 0)), utc(2024, 2, 29, 23, 0));
        assert_eq!(next_monthly_run(utc(2025, 2, 10, 0, 0)), utc(2025, 2, 28, 23, 0));
        assert_eq!(next_monthly_run(utc(2024, 2, 29, 23, 0)), utc(2024, 3, 31, 23, 0));
        assert_eq!(next_monthly_run(utc(2024, 12, 31, 23, 30)), utc(2025, 1, 31, 23, 0));
        assert_eq!(next_monthly_run(utc(2025, 4, 1, 0, 0)), utc(2025, 4, 30, 23, 0));
    }

    #[test]
    fn next_runs_lists_both_jobs() {
        let scheduler = Scheduler::new(Config::default());
        let runs = scheduler.next_runs(utc(2025, 1, 8, 10, 0));
        assert_eq!(runs[0], (Job::WeeklyAggregation, utc(2025, 1, 12, 23, 59)));
        assert_eq!(runs[1], (Job::MonthlyTraining, utc(2025, 1, 31, 23, 0)));
    }

    #[test]
    fn start_returns_once_stopped() {
        let mut cfg = Config::default();
        cfg.scheduler_poll = std::time::Duration::from_millis(10);
        let scheduler = Arc::new(Scheduler::new(cfg));
        let worker = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || scheduler.start())
        };
        for _ in 0..500 {
            if scheduler.is_running() {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(2));
        }
        assert!(scheduler.is_running());
        assert!(scheduler.start().is_err());

        scheduler.stop_handle().stop();
        assert!(worker.join().unwrap().is_ok());
        assert!(!scheduler.is_running());
    }
}
