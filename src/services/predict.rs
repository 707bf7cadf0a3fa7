//! Turning a fitted model into stored prediction rows, and saved models.

use crate::db::models::{NewPrediction, prediction_kind};
use crate::forecast::{FitError, FittedSarima, ForecastPoint};
use crate::schema;
use crate::versioning::prediction_key;
use crate::yearweek::YearWeek;
use chrono::{DateTime, Utc};
use diesel::PgConnection;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A fitted model as written to `MODEL_DIR`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedModel {
    pub diagnosis_code: String,
    pub model_version: String,
    /// Last observed week; forecasts start right after it.
    pub last_yearweek: YearWeek,
    pub trained_at: DateTime<Utc>,
    pub model: FittedSarima,
}

/// Percent-encode everything outside `[A-Za-z0-9._-]`, so distinct labels
/// never share a file name.
fn file_component(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for b in label.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// `<code>_<model_version>.json` under `dir`.
pub fn model_path(dir: &Path, diagnosis_code: &str, model_version: &str) -> PathBuf {
    dir.join(format!("{}_{}.json", file_component(diagnosis_code), file_component(model_version)))
}

pub fn save_model(dir: &Path, saved: &SavedModel) -> Result<PathBuf, String> {
    fs::create_dir_all(dir).map_err(|e| format!("create {} failed: {}", dir.display(), e))?;
    let path = model_path(dir, &saved.diagnosis_code, &saved.model_version);
    let json = serde_json::to_vec_pretty(saved).map_err(|e| format!("serialize model failed: {}", e))?;
    fs::write(&path, json).map_err(|e| format!("write {} failed: {}", path.display(), e))?;
    Ok(path)
}

pub fn load_model(dir: &Path, diagnosis_code: &str, model_version: &str) -> Result<SavedModel, String> {
    let path = model_path(dir, diagnosis_code, model_version);
    let bytes = fs::read(&path).map_err(|e| format!("read {} failed: {}", path.display(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("parse {} failed: {}", path.display(), e))
}

/// One forecast row per step, labelled with the weeks following `last_observed`.
pub fn forecast_rows(
    diagnosis_code: &str,
    model_version: &str,
    last_observed: YearWeek,
    points: &[ForecastPoint],
    created_at: DateTime<Utc>,
) -> Vec<NewPrediction> {
    last_observed
        .following(points.len())
        .into_iter()
        .zip(points)
        .map(|(week, point)| NewPrediction {
            prediction_pk: prediction_key(diagnosis_code, week, model_version),
            diagnosis_code: diagnosis_code.to_string(),
            yearweek: week.to_string(),
            predicted_cases: point.mean,
            confidence_lower: point.lower,
            confidence_upper: point.upper,
            model_version: model_version.to_string(),
            created_at,
            is_actual: prediction_kind::FORECAST,
        })
        .collect()
}

/// Upsert prediction rows in one transaction; an existing key is replaced.
pub fn write_predictions(conn: &mut PgConnection, rows: &[NewPrediction]) -> Result<usize, diesel::result::Error> {
    use schema::predictions::dsl as P;

    conn.transaction(|conn| {
        let mut written = 0;
        for row in rows {
            written += diesel::insert_into(P::predictions)
                .values(row)
                .on_conflict(P::prediction_pk)
                .do_update()
                .set((
                    P::predicted_cases.eq(row.predicted_cases),
                    P::confidence_lower.eq(row.confidence_lower),
                    P::confidence_upper.eq(row.confidence_upper),
                    P::created_at.eq(row.created_at),
                    P::is_actual.eq(row.is_actual),
                ))
                .execute(conn)?;
        }
        Ok(written)
    })
}

/// Re-issue the forecasts of a saved model, e.g. with a different horizon.
pub fn repredict(
    conn: &mut PgConnection,
    model_dir: &Path,
    diagnosis_code: &str,
    model_version: &str,
    steps: usize,
    confidence_level: f64,
) -> Result<usize, String> {
    let saved = load_model(model_dir, diagnosis_code, model_version)?;
    let points = saved
        .model
        .forecast(steps, confidence_level)
        .map_err(|e: FitError| format!("forecast from {} failed: {}", model_version, e))?;
    let rows = forecast_rows(
        &saved.diagnosis_code,
        &saved.model_version,
        saved.last_yearweek,
        &points,
        Utc::now(),
    );
    let written = write_predictions(conn, &rows).map_err(|e| format!("write predictions failed: {}", e))?;
    info!(
        "Predict: {} row(s) written for {} from saved model {}",
        written, saved.diagnosis_code, saved.model_version
    );
    Ok(written)
}
