//! Diesel model structs for the case store.
//!
//! `daily_case` is raw truth and is only ever inserted into. `weekly_case`
//! and `predictions` are derived and written with upserts, never deleted.

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

/// Values of `predictions.is_actual`.
pub mod prediction_kind {
    pub const FORECAST: i16 = 0;
    pub const ACTUAL: i16 = 1;
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::diseases)]
pub struct NewDisease {
    pub diagnosis_code: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::daily_case)]
pub struct NewDailyCase {
    pub report_date: NaiveDate,
    pub diagnosis_code: String,
    pub patient_identifier: Option<String>,
    pub facility_code: Option<String>,
    pub cases: i32,
}

impl NewDailyCase {
    /// A single-case report.
    pub fn new(report_date: NaiveDate, diagnosis_code: &str) -> Self {
        NewDailyCase {
            report_date,
            diagnosis_code: diagnosis_code.to_string(),
            patient_identifier: None,
            facility_code: None,
            cases: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::weekly_case)]
#[diesel(primary_key(yearweek, diagnosis_code))]
pub struct WeeklyCase {
    pub yearweek: String,
    pub diagnosis_code: String,
    pub week_start_date: NaiveDate,
    pub total_cases: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::weekly_case)]
pub struct NewWeeklyCase {
    pub yearweek: String,
    pub diagnosis_code: String,
    pub week_start_date: NaiveDate,
    pub total_cases: i64,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::predictions)]
#[diesel(primary_key(prediction_pk))]
pub struct Prediction {
    pub prediction_pk: String,
    pub diagnosis_code: String,
    pub yearweek: String,
    pub predicted_cases: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub is_actual: i16,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::predictions)]
pub struct NewPrediction {
    pub prediction_pk: String,
    pub diagnosis_code: String,
    pub yearweek: String,
    pub predicted_cases: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub is_actual: i16,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::notifications)]
pub struct NewNotification {
    pub diagnosis_code: String,
    pub yearweek: String,
    pub model_version: String,
    pub predicted_cases: f64,
    pub threshold: f64,
    pub message: String,
}
