//! Per-diagnosis model training and forecasting.
//!
//! Every diagnosis code is handled independently: a short, constant or
//! otherwise unfittable series is logged and skipped, and only a database
//! failure stops the batch.

use crate::config::Config;
use crate::forecast::{self, FitError, FittedSarima};
use crate::schema;
use crate::services::predict::{self, SavedModel};
use crate::stop::StopHandle;
use crate::versioning::ModelVersion;
use crate::yearweek::YearWeek;
use chrono::{NaiveDate, Utc};
use core::fmt;
use diesel::PgConnection;
use diesel::prelude::*;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub forecast_steps: usize,
    /// Restrict the run to these codes; `None` trains every code in `weekly_case`.
    pub codes: Option<Vec<String>>,
    pub training_date: NaiveDate,
    pub min_history_weeks: usize,
    pub max_seasonal_period: usize,
    pub confidence_level: f64,
    pub model_dir: Option<PathBuf>,
}

impl TrainOptions {
    pub fn from_config(cfg: &Config, training_date: NaiveDate) -> Self {
        TrainOptions {
            forecast_steps: cfg.forecast_steps.get(),
            codes: None,
            training_date,
            min_history_weeks: cfg.min_history_weeks,
            max_seasonal_period: cfg.max_seasonal_period,
            confidence_level: cfg.confidence_level,
            model_dir: cfg.model_dir.clone(),
        }
    }
}

#[derive(Debug)]
pub enum TrainError {
    NoHistory,
    InsufficientData { observations: usize, required: usize },
    Fit(FitError),
    Database(diesel::result::Error),
}

impl TrainError {
    /// Whether the batch can move on to the next diagnosis code.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TrainError::Database(_))
    }
}

impl Display for TrainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TrainError::NoHistory => write!(f, "no weekly history"),
            TrainError::InsufficientData { observations, required } => write!(
                f,
                "insufficient data: {} week(s) of history, {} required",
                observations, required
            ),
            TrainError::Fit(e) => write!(f, "model fit failed: {}", e),
            TrainError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl Error for TrainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainError::Fit(e) => Some(e),
            TrainError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<diesel::result::Error> for TrainError {
    fn from(value: diesel::result::Error) -> Self {
        TrainError::Database(value)
    }
}

impl From<FitError> for TrainError {
    fn from(value: FitError) -> Self {
        match value {
            FitError::InsufficientData { observations, required } => {
                TrainError::InsufficientData { observations, required }
            }
            other => TrainError::Fit(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeOutcome {
    pub diagnosis_code: String,
    pub model_version: String,
    pub seasonal_period: usize,
    pub predictions_written: usize,
    pub saved_to: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct TrainSummary {
    pub trained: Vec<CodeOutcome>,
    pub skipped: Vec<(String, String)>,
    pub cancelled: bool,
}

/// Contiguous weekly series from the first to the last observed week.
/// Weeks without a weekly row count as zero cases.
pub fn densify_history(observed: &[(YearWeek, i64)]) -> Option<(YearWeek, Vec<f64>)> {
    let by_week: BTreeMap<YearWeek, i64> = observed.iter().copied().collect();
    let first = *by_week.keys().next()?;
    let last = *by_week.keys().next_back()?;
    let series = first
        .through(last)
        .into_iter()
        .map(|w| by_week.get(&w).copied().unwrap_or(0) as f64)
        .collect();
    Some((last, series))
}

pub fn diagnosis_codes(conn: &mut PgConnection) -> Result<Vec<String>, diesel::result::Error> {
    use schema::weekly_case::dsl as W;

    W::weekly_case
        .select(W::diagnosis_code)
        .distinct()
        .order(W::diagnosis_code.asc())
        .load(conn)
}

pub fn load_history(conn: &mut PgConnection, code: &str) -> Result<Vec<(YearWeek, i64)>, diesel::result::Error> {
    use schema::weekly_case::dsl as W;

    let rows: Vec<(String, i64)> = W::weekly_case
        .filter(W::diagnosis_code.eq(code))
        .select((W::yearweek, W::total_cases))
        .order(W::yearweek.asc())
        .load(conn)?;

    let mut history = Vec::with_capacity(rows.len());
    for (label, total) in rows {
        match label.parse::<YearWeek>() {
            Ok(week) => history.push((week, total)),
            Err(e) => warn!("Train: {} ignoring weekly row: {}", code, e),
        }
    }
    Ok(history)
}

/// Fit, forecast and store predictions for one diagnosis code.
pub fn train_code(conn: &mut PgConnection, code: &str, opts: &TrainOptions) -> Result<CodeOutcome, TrainError> {
    let history = load_history(conn, code)?;
    let (last_week, series) = densify_history(&history).ok_or(TrainError::NoHistory)?;

    let period = forecast::seasonal_period(series.len(), opts.max_seasonal_period);
    let required = forecast::minimum_history(opts.min_history_weeks, period);
    if series.len() < required {
        return Err(TrainError::InsufficientData {
            observations: series.len(),
            required,
        });
    }

    let model = FittedSarima::fit(&series, period)?;
    debug!(
        "Train: {} fitted period={} phi=({:.4}, {:.4}) seasonal_theta={:.4} sigma2={:.4} iterations={}",
        code, period, model.phi[0], model.phi[1], model.seasonal_theta, model.sigma2, model.iterations
    );
    let points = model.forecast(opts.forecast_steps, opts.confidence_level)?;

    let version = ModelVersion::new(code, opts.training_date, series.len()).to_string();
    let trained_at = Utc::now();
    let rows = predict::forecast_rows(code, &version, last_week, &points, trained_at);
    let written = predict::write_predictions(conn, &rows)?;

    let saved_to = opts.model_dir.as_deref().and_then(|dir| {
        let saved = SavedModel {
            diagnosis_code: code.to_string(),
            model_version: version.clone(),
            last_yearweek: last_week,
            trained_at,
            model,
        };
        match predict::save_model(dir, &saved) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Train: {} model {} not saved: {}", code, version, e);
                None
            }
        }
    });

    Ok(CodeOutcome {
        diagnosis_code: code.to_string(),
        model_version: version,
        seasonal_period: period,
        predictions_written: written,
        saved_to,
    })
}

pub fn run(conn: &mut PgConnection, opts: &TrainOptions, stop: &StopHandle) -> Result<TrainSummary, TrainError> {
    let codes = match &opts.codes {
        Some(codes) => codes.clone(),
        None => diagnosis_codes(conn)?,
    };
    info!(
        "Train: {} diagnosis code(s) to process (steps={}, training_date={})",
        codes.len(),
        opts.forecast_steps,
        opts.training_date
    );

    let mut summary = TrainSummary::default();
    for code in codes {
        if stop.is_stopped() {
            info!("Train: stop requested; not starting {}", code);
            summary.cancelled = true;
            break;
        }
        match train_code(conn, &code, opts) {
            Ok(outcome) => {
                info!(
                    "Train: {} version {} (period={}) wrote {} prediction(s)",
                    code, outcome.model_version, outcome.seasonal_period, outcome.predictions_written
                );
                summary.trained.push(outcome);
            }
            Err(e) if e.is_recoverable() => {
                warn!("Train: skipping {}: {}", code, e);
                summary.skipped.push((code, e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        "Train: done (trained={}, skipped={})",
        summary.trained.len(),
        summary.skipped.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NewWeeklyCase, Prediction, prediction_kind};

    fn yw(s: &str) -> YearWeek {
        s.parse().unwrap()
    }

    #[test]
    fn densify_fills_missing_weeks_with_zero() {
        let observed = vec![(yw("202451"), 5), (yw("202502"), 7), (yw("202452"), 6)];
        let (last, series) = densify_history(&observed).unwrap();
        assert_eq!(last, yw("202502"));
        assert_eq!(series, vec![5.0, 6.0, 0.0, 7.0]);
    }

    #[test]
    fn densify_of_nothing_is_none() {
        assert!(densify_history(&[]).is_none());
    }

    #[test]
    fn fit_errors_map_to_train_errors() {
        let e: TrainError = FitError::InsufficientData {
            observations: 3,
            required: 10,
        }
        .into();
        assert!(matches!(e, TrainError::InsufficientData { observations: 3, required: 10 }));
        assert!(e.is_recoverable());
        let e: TrainError = FitError::NonConvergence { iterations: 2000 }.into();
        assert!(e.is_recoverable());
        assert!(!TrainError::Database(diesel::result::Error::NotFound).is_recoverable());
    }

    fn seed_weekly(conn: &mut PgConnection, code: &str, first: YearWeek, totals: &[i64]) {
        use schema::weekly_case::dsl as W;
        let mut week = first;
        for total in totals {
            let row = NewWeeklyCase {
                yearweek: week.to_string(),
                diagnosis_code: code.to_string(),
                week_start_date: week.monday(),
                total_cases: *total,
            };
            diesel::insert_into(W::weekly_case).values(&row).execute(conn).unwrap();
            week = week.succ();
        }
    }

    fn test_options() -> TrainOptions {
        TrainOptions {
            forecast_steps: 4,
            codes: None,
            training_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            min_history_weeks: 12,
            max_seasonal_period: 52,
            confidence_level: 0.95,
            model_dir: None,
        }
    }

    #[test]
    #[ignore = "needs TEST_DATABASE_URL"]
    fn sixty_cycling_weeks_give_four_ordered_forecasts() {
        let mut conn = crate::db::testing::connection();
        let shape = [10, 20, 30, 40, 50, 40, 30, 20];
        let totals: Vec<i64> = (0..60).map(|i| shape[i % shape.len()] + (i as i64 % 3)).collect();
        seed_weekly(&mut conn, "ZZ-A90", yw("202401"), &totals);

        let outcome = train_code(&mut conn, "ZZ-A90", &test_options()).unwrap();
        assert_eq!(outcome.model_version, "ZZ-A90_20250131_60");
        assert_eq!(outcome.predictions_written, 4);

        // rerun on the same day with the same data overwrites
        train_code(&mut conn, "ZZ-A90", &test_options()).unwrap();

        use schema::predictions::dsl as P;
        let rows: Vec<Prediction> = P::predictions
            .filter(P::diagnosis_code.eq("ZZ-A90"))
            .order(P::yearweek.asc())
            .select(Prediction::as_select())
            .load(&mut conn)
            .unwrap();
        assert_eq!(rows.len(), 4);
        let last_observed = yw("202401").following(59).pop().unwrap();
        let expected: Vec<String> = last_observed.following(4).iter().map(|w| w.to_string()).collect();
        let got: Vec<String> = rows.iter().map(|r| r.yearweek.clone()).collect();
        assert_eq!(got, expected);
        for row in &rows {
            assert_eq!(row.is_actual, prediction_kind::FORECAST);
            assert!(row.confidence_lower <= row.predicted_cases && row.predicted_cases <= row.confidence_upper);
        }
    }

    #[test]
    #[ignore = "needs TEST_DATABASE_URL"]
    fn short_history_is_skipped_without_touching_other_codes() {
        let mut conn = crate::db::testing::connection();
        seed_weekly(&mut conn, "ZZ-SHORT", yw("202440"), &[3, 4, 5, 6, 7]);
        let shape = [5, 9, 14, 9];
        let totals: Vec<i64> = (0..40).map(|i| shape[i % 4] + (i as i64 % 5)).collect();
        seed_weekly(&mut conn, "ZZ-LONG", yw("202401"), &totals);

        let mut opts = test_options();
        opts.codes = Some(vec!["ZZ-SHORT".into(), "ZZ-LONG".into()]);
        let summary = run(&mut conn, &opts, &StopHandle::new()).unwrap();
        assert_eq!(summary.trained.len(), 1);
        assert_eq!(summary.trained[0].diagnosis_code, "ZZ-LONG");
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].0, "ZZ-SHORT");

        use schema::predictions::dsl as P;
        let short_rows: i64 = P::predictions
            .filter(P::diagnosis_code.eq("ZZ-SHORT"))
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(short_rows, 0);
    }

    #[test]
    #[ignore = "needs TEST_DATABASE_URL"]
    fn stopped_batch_trains_nothing() {
        let mut conn = crate::db::testing::connection();
        let shape = [5, 9, 14, 9];
        let totals: Vec<i64> = (0..40).map(|i| shape[i % 4] + (i as i64 % 5)).collect();
        seed_weekly(&mut conn, "ZZ-STOP", yw("202401"), &totals);

        let mut opts = test_options();
        opts.codes = Some(vec!["ZZ-STOP".into()]);
        let stop = StopHandle::new();
        stop.stop();
        let summary = run(&mut conn, &opts, &stop).unwrap();
        assert!(summary.cancelled);
        assert!(summary.trained.is_empty());
        assert!(summary.skipped.is_empty());

        use schema::predictions::dsl as P;
        let rows: i64 = P::predictions
            .filter(P::diagnosis_code.eq("ZZ-STOP"))
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(rows, 0);
    }
}
