//! Weekly aggregation of daily case reports.
//!
//! Each target week is reconciled on its own: the desired totals are computed
//! from `daily_case`, compared with what `weekly_case` holds, and only the
//! difference is written. All rows of one week commit together or not at all.

use crate::db::models::{NewWeeklyCase, WeeklyCase};
use crate::schema;
use crate::stop::StopHandle;
use crate::yearweek::YearWeek;
use chrono::{NaiveDate, Utc};
use core::fmt;
use diesel::PgConnection;
use diesel::dsl::max;
use diesel::prelude::*;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationTarget {
    /// Every week with a (week, diagnosis code) pair missing from `weekly_case`.
    Unprocessed,
    Week(YearWeek),
    /// Week of the most recent `report_date`.
    Latest,
    /// Week containing `today`.
    Current,
}

/// Fatal errors; the batch stops and the caller decides about retries.
#[derive(Debug)]
pub enum AggregateError {
    Database(diesel::result::Error),
}

impl Display for AggregateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AggregateError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl Error for AggregateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AggregateError::Database(e) => Some(e),
        }
    }
}

impl From<diesel::result::Error> for AggregateError {
    fn from(value: diesel::result::Error) -> Self {
        AggregateError::Database(value)
    }
}

/// Outcome of one week. Only `Database` aborts the batch.
#[derive(Debug)]
pub enum WeekError {
    NoDailyCases(YearWeek),
    Database(diesel::result::Error),
}

impl Display for WeekError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WeekError::NoDailyCases(yw) => write!(f, "no daily cases reported in week {}", yw),
            WeekError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl Error for WeekError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WeekError::Database(e) => Some(e),
            WeekError::NoDailyCases(_) => None,
        }
    }
}

impl From<diesel::result::Error> for WeekError {
    fn from(value: diesel::result::Error) -> Self {
        WeekError::Database(value)
    }
}

/// What reconciling one week would change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeekPlan {
    pub inserts: Vec<NewWeeklyCase>,
    pub updates: Vec<NewWeeklyCase>,
    pub unchanged: usize,
    /// Stored codes with no daily rows left. Reported, never deleted.
    pub stale: Vec<String>,
}

impl WeekPlan {
    pub fn writes(&self) -> impl Iterator<Item = &NewWeeklyCase> {
        self.inserts.iter().chain(self.updates.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekOutcome {
    pub yearweek: YearWeek,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Default)]
pub struct AggregationSummary {
    pub processed: Vec<WeekOutcome>,
    pub skipped: Vec<(YearWeek, String)>,
    pub cancelled: bool,
}

/// Sum case counts per diagnosis code.
pub fn summarize_cases<'a>(rows: impl IntoIterator<Item = (&'a str, i32)>) -> BTreeMap<String, i64> {
    let mut totals = BTreeMap::new();
    for (code, cases) in rows {
        *totals.entry(code.to_string()).or_insert(0i64) += i64::from(cases);
    }
    totals
}

/// Compare desired totals for `yearweek` with the stored rows.
pub fn plan_week(yearweek: YearWeek, desired: &BTreeMap<String, i64>, stored: &[WeeklyCase]) -> WeekPlan {
    let week_start = yearweek.monday();
    let week_label = yearweek.to_string();
    let stored_by_code: BTreeMap<&str, &WeeklyCase> =
        stored.iter().map(|row| (row.diagnosis_code.as_str(), row)).collect();

    let mut plan = WeekPlan::default();
    for (code, total) in desired {
        let row = NewWeeklyCase {
            yearweek: week_label.clone(),
            diagnosis_code: code.clone(),
            week_start_date: week_start,
            total_cases: *total,
        };
        match stored_by_code.get(code.as_str()) {
            None => plan.inserts.push(row),
            Some(existing) if existing.total_cases == *total && existing.week_start_date == week_start => {
                plan.unchanged += 1
            }
            Some(_) => plan.updates.push(row),
        }
    }
    plan.stale = stored
        .iter()
        .filter(|row| !desired.contains_key(&row.diagnosis_code))
        .map(|row| row.diagnosis_code.clone())
        .collect();
    plan
}

/// Weeks in which some (week, code) pair from the daily reports has no weekly row.
pub fn unprocessed_weeks(daily: &[(NaiveDate, String)], weekly: &[(String, String)]) -> Vec<YearWeek> {
    let done: BTreeSet<(&str, &str)> = weekly.iter().map(|(yw, code)| (yw.as_str(), code.as_str())).collect();
    let mut pending = BTreeSet::new();
    for (date, code) in daily {
        let yw = YearWeek::from_date(*date);
        if !done.contains(&(yw.to_string().as_str(), code.as_str())) {
            pending.insert(yw);
        }
    }
    pending.into_iter().collect()
}

pub fn resolve_targets(
    conn: &mut PgConnection,
    target: AggregationTarget,
    today: NaiveDate,
) -> Result<Vec<YearWeek>, AggregateError> {
    use schema::daily_case::dsl as D;
    use schema::weekly_case::dsl as W;

    match target {
        AggregationTarget::Week(yw) => Ok(vec![yw]),
        AggregationTarget::Current => Ok(vec![YearWeek::from_date(today)]),
        AggregationTarget::Latest => {
            let latest: Option<NaiveDate> = D::daily_case.select(max(D::report_date)).first(conn)?;
            Ok(latest.map(YearWeek::from_date).into_iter().collect())
        }
        AggregationTarget::Unprocessed => {
            let daily: Vec<(NaiveDate, String)> = D::daily_case
                .select((D::report_date, D::diagnosis_code))
                .distinct()
                .load(conn)?;
            let weekly: Vec<(String, String)> = W::weekly_case.select((W::yearweek, W::diagnosis_code)).load(conn)?;
            Ok(unprocessed_weeks(&daily, &weekly))
        }
    }
}

/// Reconcile one week inside a transaction.
pub fn aggregate_week(conn: &mut PgConnection, yearweek: YearWeek) -> Result<WeekOutcome, WeekError> {
    use schema::daily_case::dsl as D;
    use schema::weekly_case::dsl as W;

    let (week_start, next_week_start) = yearweek.date_range();

    conn.transaction::<_, WeekError, _>(|conn| {
        let rows: Vec<(String, i32)> = D::daily_case
            .filter(D::report_date.ge(week_start).and(D::report_date.lt(next_week_start)))
            .select((D::diagnosis_code, D::cases))
            .load(conn)?;
        if rows.is_empty() {
            return Err(WeekError::NoDailyCases(yearweek));
        }
        let desired = summarize_cases(rows.iter().map(|(code, cases)| (code.as_str(), *cases)));

        let stored: Vec<WeeklyCase> = W::weekly_case
            .filter(W::yearweek.eq(yearweek.to_string()))
            .select(WeeklyCase::as_select())
            .load(conn)?;

        let plan = plan_week(yearweek, &desired, &stored);
        for code in &plan.stale {
            warn!(
                "Aggregate: week {} code {} has a weekly total but no daily reports; leaving it untouched",
                yearweek, code
            );
        }

        for row in plan.writes() {
            diesel::insert_into(W::weekly_case)
                .values(row)
                .on_conflict((W::yearweek, W::diagnosis_code))
                .do_update()
                .set((
                    W::week_start_date.eq(row.week_start_date),
                    W::total_cases.eq(row.total_cases),
                    W::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
        }

        Ok(WeekOutcome {
            yearweek,
            inserted: plan.inserts.len(),
            updated: plan.updates.len(),
            unchanged: plan.unchanged,
        })
    })
}

/// Aggregate every week selected by `target`.
pub fn run(
    conn: &mut PgConnection,
    target: AggregationTarget,
    today: NaiveDate,
    stop: &StopHandle,
) -> Result<AggregationSummary, AggregateError> {
    let weeks = resolve_targets(conn, target, today)?;
    if weeks.is_empty() {
        warn!("Aggregate: no weeks to process for {:?}", target);
    } else {
        info!("Aggregate: {} week(s) to process for {:?}", weeks.len(), target);
    }
    aggregate_weeks(conn, &weeks, stop)
}

/// Reconcile `weeks` in order. Weeks without daily reports are skipped; a
/// database error ends the batch.
pub fn aggregate_weeks(
    conn: &mut PgConnection,
    weeks: &[YearWeek],
    stop: &StopHandle,
) -> Result<AggregationSummary, AggregateError> {
    let mut summary = AggregationSummary::default();
    for &yw in weeks {
        if stop.is_stopped() {
            info!("Aggregate: stop requested; not starting week {}", yw);
            summary.cancelled = true;
            break;
        }
        match aggregate_week(conn, yw) {
            Ok(outcome) => {
                debug!(
                    "Aggregate: week {} inserted={} updated={} unchanged={}",
                    yw, outcome.inserted, outcome.updated, outcome.unchanged
                );
                summary.processed.push(outcome);
            }
            Err(WeekError::Database(e)) => return Err(AggregateError::Database(e)),
            Err(e @ WeekError::NoDailyCases(_)) => {
                warn!("Aggregate: skipping week {}: {}", yw, e);
                summary.skipped.push((yw, e.to_string()));
            }
        }
    }

    let (inserted, updated) = summary
        .processed
        .iter()
        .fold((0, 0), |(i, u), o| (i + o.inserted, u + o.updated));
    info!(
        "Aggregate: done (weeks={}, skipped={}, inserted={}, updated={})",
        summary.processed.len(),
        summary.skipped.len(),
        inserted,
        updated
    );
    Ok(summary)
}
