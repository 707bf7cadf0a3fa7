//! Forecast accuracy against the weekly totals that later arrived.

use crate::db::models::{NewPrediction, Prediction, prediction_kind};
use crate::schema;
use crate::services::predict::write_predictions;
use crate::versioning::ACTUAL_VERSION;
use chrono::Utc;
use diesel::PgConnection;
use diesel::prelude::*;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionScore {
    pub diagnosis_code: String,
    pub model_version: String,
    /// Forecast weeks that now have an actual total.
    pub compared_weeks: usize,
    pub mean_absolute_error: f64,
    /// Share of actuals inside [confidence_lower, confidence_upper].
    pub interval_coverage: f64,
}

/// Score forecast/actual pairs per model version.
pub fn score(pairs: &[(Prediction, i64)]) -> Vec<VersionScore> {
    let mut grouped: BTreeMap<(&str, &str), Vec<&(Prediction, i64)>> = BTreeMap::new();
    for pair in pairs {
        grouped
            .entry((pair.0.diagnosis_code.as_str(), pair.0.model_version.as_str()))
            .or_default()
            .push(pair);
    }
    grouped
        .into_iter()
        .map(|((code, version), items)| {
            let n = items.len() as f64;
            let abs_error: f64 = items.iter().map(|(p, actual)| (p.predicted_cases - *actual as f64).abs()).sum();
            let covered = items
                .iter()
                .filter(|(p, actual)| {
                    let a = *actual as f64;
                    p.confidence_lower <= a && a <= p.confidence_upper
                })
                .count() as f64;
            VersionScore {
                diagnosis_code: code.to_string(),
                model_version: version.to_string(),
                compared_weeks: items.len(),
                mean_absolute_error: abs_error / n,
                interval_coverage: covered / n,
            }
        })
        .collect()
}

/// Realized rows (`is_actual = 1`) next to the forecasts they resolve.
pub fn actual_rows(pairs: &[(Prediction, i64)]) -> Vec<NewPrediction> {
    let now = Utc::now();
    let mut rows: BTreeMap<String, NewPrediction> = BTreeMap::new();
    for (p, actual) in pairs {
        let pk = format!("{}/{}/{}", p.diagnosis_code, p.yearweek, ACTUAL_VERSION);
        let value = *actual as f64;
        rows.entry(pk.clone()).or_insert_with(|| NewPrediction {
            prediction_pk: pk,
            diagnosis_code: p.diagnosis_code.clone(),
            yearweek: p.yearweek.clone(),
            predicted_cases: value,
            confidence_lower: value,
            confidence_upper: value,
            model_version: ACTUAL_VERSION.to_string(),
            created_at: now,
            is_actual: prediction_kind::ACTUAL,
        });
    }
    rows.into_values().collect()
}

pub fn run(
    conn: &mut PgConnection,
    code: Option<&str>,
    version: Option<&str>,
    record_actuals: bool,
) -> Result<Vec<VersionScore>, String> {
    use schema::predictions::dsl as P;
    use schema::weekly_case::dsl as W;

    let mut query = P::predictions
        .inner_join(
            W::weekly_case.on(W::diagnosis_code
                .eq(P::diagnosis_code)
                .and(W::yearweek.eq(P::yearweek))),
        )
        .filter(P::is_actual.eq(prediction_kind::FORECAST))
        .select((Prediction::as_select(), W::total_cases))
        .into_boxed();
    if let Some(code) = code {
        query = query.filter(P::diagnosis_code.eq(code.to_string()));
    }
    if let Some(version) = version {
        query = query.filter(P::model_version.eq(version.to_string()));
    }
    let pairs: Vec<(Prediction, i64)> = query
        .order((P::diagnosis_code.asc(), P::model_version.asc(), P::yearweek.asc()))
        .load(conn)
        .map_err(|e| format!("load forecasts with actuals failed: {}", e))?;

    let scores = score(&pairs);
    info!(
        "Evaluate: {} forecast week(s) with actuals across {} model version(s)",
        pairs.len(),
        scores.len()
    );

    if record_actuals {
        let rows = actual_rows(&pairs);
        let written = write_predictions(conn, &rows).map_err(|e| format!("write actual rows failed: {}", e))?;
        info!("Evaluate: {} realized row(s) upserted", written);
    }
    Ok(scores)
}
