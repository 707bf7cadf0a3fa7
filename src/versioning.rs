//! Model version identifiers and prediction keys.
//!
//! A model version is `<diagnosis_code>_<YYYYMMDD>_<n_observations>`: two
//! trainings of the same code on the same day with the same amount of history
//! share a version and therefore overwrite each other's prediction rows.
//! Prediction keys (`<diagnosis_code>/<yearweek>/<model_version>`) are read by
//! the dashboard and must not change shape.

use crate::yearweek::YearWeek;
use chrono::NaiveDate;
use core::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Version label used for realized (`is_actual = 1`) rows.
pub const ACTUAL_VERSION: &str = "actual";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelVersion {
    pub diagnosis_code: String,
    pub training_date: NaiveDate,
    pub n_observations: usize,
}

impl ModelVersion {
    pub fn new(diagnosis_code: &str, training_date: NaiveDate, n_observations: usize) -> Self {
        ModelVersion {
            diagnosis_code: diagnosis_code.to_string(),
            training_date,
            n_observations,
        }
    }
}

impl Display for ModelVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.diagnosis_code,
            self.training_date.format("%Y%m%d"),
            self.n_observations
        )
    }
}

impl FromStr for ModelVersion {
    type Err = String;

    /// Splits from the right so codes containing `_` still parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, '_');
        let n = parts.next();
        let date = parts.next();
        let code = parts.next();
        match (code, date, n) {
            (Some(code), Some(date), Some(n)) if !code.is_empty() => {
                let training_date = NaiveDate::parse_from_str(date, "%Y%m%d")
                    .map_err(|_| format!("model version {:?} has an invalid training date", s))?;
                let n_observations = n
                    .parse::<usize>()
                    .map_err(|_| format!("model version {:?} has an invalid observation count", s))?;
                Ok(ModelVersion {
                    diagnosis_code: code.to_string(),
                    training_date,
                    n_observations,
                })
            }
            _ => Err(format!("model version {:?} is not <code>_<YYYYMMDD>_<n>", s)),
        }
    }
}

pub fn prediction_key(diagnosis_code: &str, yearweek: YearWeek, model_version: &str) -> String {
    format!("{}/{}/{}", diagnosis_code, yearweek, model_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_encodes_code_date_and_size() {
        let v = ModelVersion::new("A90", NaiveDate::from_ymd_opt(2025, 7, 14).unwrap(), 284);
        assert_eq!(v.to_string(), "A90_20250714_284");
    }

    #[test]
    fn same_inputs_give_the_same_version() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        assert_eq!(
            ModelVersion::new("J11", d, 60).to_string(),
            ModelVersion::new("J11", d, 60).to_string()
        );
        assert_ne!(
            ModelVersion::new("J11", d, 60).to_string(),
            ModelVersion::new("J11", d, 61).to_string()
        );
    }

    #[test]
    fn parses_back_including_underscored_codes() {
        let v: ModelVersion = "A90, A91_20250714_284".parse().unwrap();
        assert_eq!(v.diagnosis_code, "A90, A91");
        assert_eq!(v.n_observations, 284);

        let v: ModelVersion = "A_90_20250101_12".parse().unwrap();
        assert_eq!(v.diagnosis_code, "A_90");
        assert_eq!(v.training_date, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn rejects_garbage_versions() {
        assert!("A90".parse::<ModelVersion>().is_err());
        assert!("A90_2025_12".parse::<ModelVersion>().is_err());
        assert!("A90_20250101_x".parse::<ModelVersion>().is_err());
        assert!("_20250101_4".parse::<ModelVersion>().is_err());
    }

    #[test]
    fn prediction_key_shape() {
        let yw: YearWeek = "202503".parse().unwrap();
        assert_eq!(prediction_key("A90", yw, "A90_20250114_60"), "A90/202503/A90_20250114_60");
    }
}
