//! Anomaly notifications: a forecast well above what the same ISO week
//! looked like in earlier years raises one notification per code and week.

use crate::db::models::{NewNotification, Prediction, prediction_kind};
use crate::schema;
use crate::yearweek::YearWeek;
use diesel::PgConnection;
use diesel::dsl::max;
use diesel::prelude::*;
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Mean and sample standard deviation (zero for a single value).
pub fn mean_and_stddev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return Some((mean, 0.0));
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt()))
}

pub fn anomaly_threshold(history: &[f64], multiplier: f64) -> Option<f64> {
    mean_and_stddev(history).map(|(mean, sd)| mean + multiplier * sd)
}

/// Latest forecast per diagnosis code (by creation time, then key).
pub fn latest_per_code(rows: Vec<Prediction>) -> Vec<Prediction> {
    let mut latest: BTreeMap<String, Prediction> = BTreeMap::new();
    for row in rows {
        let newer = match latest.get(&row.diagnosis_code) {
            None => true,
            Some(cur) => (row.created_at, &row.prediction_pk) > (cur.created_at, &cur.prediction_pk),
        };
        if newer {
            latest.insert(row.diagnosis_code.clone(), row);
        }
    }
    latest.into_values().collect()
}

pub fn message(yearweek: YearWeek, code: &str, predicted: f64, threshold: f64, multiplier: f64) -> String {
    format!(
        "Predicted anomaly for week {}: {} predicted_cases={:.2} exceeds mean+{}*stddev of earlier years ({:.2})",
        yearweek, code, predicted, multiplier, threshold
    )
}

/// Check the forecasts of `target` (default: the latest forecast week).
/// Returns the number of notifications newly created.
pub fn run(conn: &mut PgConnection, target: Option<YearWeek>, multiplier: f64) -> Result<usize, String> {
    use schema::notifications::dsl as N;
    use schema::predictions::dsl as P;
    use schema::weekly_case::dsl as W;

    let target = match target {
        Some(week) => week,
        None => {
            let latest: Option<String> = P::predictions
                .filter(P::is_actual.eq(prediction_kind::FORECAST))
                .select(max(P::yearweek))
                .first(conn)
                .map_err(|e| format!("query latest forecast week failed: {}", e))?;
            match latest {
                Some(label) => label.parse().map_err(|e| format!("stored forecast week: {}", e))?,
                None => {
                    info!("Notify: no forecasts stored; nothing to check");
                    return Ok(0);
                }
            }
        }
    };

    let forecasts: Vec<Prediction> = P::predictions
        .filter(P::yearweek.eq(target.to_string()))
        .filter(P::is_actual.eq(prediction_kind::FORECAST))
        .select(Prediction::as_select())
        .load(conn)
        .map_err(|e| format!("load forecasts for {} failed: {}", target, e))?;
    let forecasts = latest_per_code(forecasts);
    info!("Notify: week {} has forecasts for {} code(s)", target, forecasts.len());

    let week_suffix = format!("{:02}", target.week());
    let mut created = 0;
    for forecast in forecasts {
        let history: Vec<(String, i64)> = W::weekly_case
            .filter(W::diagnosis_code.eq(&forecast.diagnosis_code))
            .filter(W::yearweek.like(format!("%{}", week_suffix)))
            .filter(W::yearweek.lt(format!("{:04}00", target.year())))
            .select((W::yearweek, W::total_cases))
            .load(conn)
            .map_err(|e| format!("load history for {} failed: {}", forecast.diagnosis_code, e))?;
        let values: Vec<f64> = history.iter().map(|(_, total)| *total as f64).collect();

        let Some(threshold) = anomaly_threshold(&values, multiplier) else {
            debug!(
                "Notify: {} has no history for week {} in earlier years",
                forecast.diagnosis_code, week_suffix
            );
            continue;
        };
        if forecast.predicted_cases <= threshold {
            continue;
        }

        let row = NewNotification {
            diagnosis_code: forecast.diagnosis_code.clone(),
            yearweek: target.to_string(),
            model_version: forecast.model_version.clone(),
            predicted_cases: forecast.predicted_cases,
            threshold,
            message: message(
                target,
                &forecast.diagnosis_code,
                forecast.predicted_cases,
                threshold,
                multiplier,
            ),
        };
        let inserted = diesel::insert_into(N::notifications)
            .values(&row)
            .on_conflict((N::diagnosis_code, N::yearweek))
            .do_nothing()
            .execute(conn)
            .map_err(|e| format!("insert notification failed: {}", e))?;
        if inserted > 0 {
            warn!("Notify: {}", row.message);
        }
        created += inserted;
    }

    info!("Notify: {} notification(s) created for week {}", created, target);
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn prediction(code: &str, version: &str, hour: u32, cases: f64) -> Prediction {
        Prediction {
            prediction_pk: format!("{}/202510/{}", code, version),
            diagnosis_code: code.to_string(),
            yearweek: "202510".to_string(),
            predicted_cases: cases,
            confidence_lower: cases - 1.0,
            confidence_upper: cases + 1.0,
            model_version: version.to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 2, 28, hour, 0, 0).unwrap(),
            is_actual: prediction_kind::FORECAST,
        }
    }

    #[test]
    fn sample_stddev() {
        let (mean, sd) = mean_and_stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((sd - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(mean_and_stddev(&[3.0]), Some((3.0, 0.0)));
        assert_eq!(mean_and_stddev(&[]), None);
    }

    #[test]
    fn threshold_is_mean_plus_k_sigma() {
        let t = anomaly_threshold(&[10.0, 20.0], 2.0).unwrap();
        assert!((t - (15.0 + 2.0 * 50.0f64.sqrt())).abs() < 1e-12);
        assert_eq!(anomaly_threshold(&[], 2.0), None);
    }

    #[test]
    fn keeps_most_recent_forecast_per_code() {
        let rows = vec![
            prediction("A90", "A90_20250131_60", 1, 10.0),
            prediction("A90", "A90_20250228_64", 23, 30.0),
            prediction("J11", "J11_20250228_64", 23, 5.0),
        ];
        let latest = latest_per_code(rows);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].model_version, "A90_20250228_64");
        assert_eq!(latest[1].diagnosis_code, "J11");
    }

    #[test]
    fn message_names_week_and_code() {
        let m = message("202510".parse().unwrap(), "A90", 42.0, 30.5, 2.0);
        assert!(m.contains("202510"));
        assert!(m.contains("A90"));
        assert!(m.contains("42.00"));
    }

    #[test]
    #[ignore = "needs TEST_DATABASE_URL"]
    fn one_notification_per_code_and_week_across_reruns() {
        use crate::db::models::{NewPrediction, NewWeeklyCase};
        use crate::services::predict::write_predictions;

        let mut conn = crate::db::testing::connection();
        use schema::weekly_case::dsl as W;
        let earlier: Vec<NewWeeklyCase> = [("202310", "ZZ-HOT", 10), ("202410", "ZZ-HOT", 12), ("202410", "ZZ-CALM", 40)]
            .iter()
            .map(|(w, c, n)| NewWeeklyCase {
                yearweek: w.to_string(),
                diagnosis_code: c.to_string(),
                week_start_date: w.parse::<YearWeek>().unwrap().monday(),
                total_cases: *n,
            })
            .collect();
        diesel::insert_into(W::weekly_case).values(&earlier).execute(&mut conn).unwrap();

        let forecast = |code: &str, cases: f64| NewPrediction {
            prediction_pk: format!("{}/202510/{}_20250228_64", code, code),
            diagnosis_code: code.to_string(),
            yearweek: "202510".to_string(),
            predicted_cases: cases,
            confidence_lower: cases - 5.0,
            confidence_upper: cases + 5.0,
            model_version: format!("{}_20250228_64", code),
            created_at: Utc.with_ymd_and_hms(2025, 2, 28, 23, 0, 0).unwrap(),
            is_actual: prediction_kind::FORECAST,
        };
        write_predictions(&mut conn, &[forecast("ZZ-HOT", 100.0), forecast("ZZ-CALM", 20.0)]).unwrap();

        let week: YearWeek = "202510".parse().unwrap();
        assert_eq!(run(&mut conn, Some(week), 2.0).unwrap(), 1);
        assert_eq!(run(&mut conn, Some(week), 2.0).unwrap(), 0);

        use schema::notifications::dsl as N;
        let codes: Vec<String> = N::notifications
            .filter(N::yearweek.eq("202510"))
            .select(N::diagnosis_code)
            .load(&mut conn)
            .unwrap();
        assert_eq!(codes, vec!["ZZ-HOT".to_string()]);
    }
}
