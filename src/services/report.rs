//! Read-only listings for the `stats` and `predictions` commands.

use crate::db::models::Prediction;
use crate::schema;
use crate::yearweek::YearWeek;
use diesel::PgConnection;
use diesel::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyStat {
    pub yearweek: String,
    pub diagnosis_code: String,
    /// `None` when the code has no row in `diseases`.
    pub disease_name: Option<String>,
    pub total_cases: i64,
}

/// Weekly totals with disease names, newest week first, busiest code first.
pub fn weekly_stats(conn: &mut PgConnection, week: Option<YearWeek>) -> Result<Vec<WeeklyStat>, String> {
    use schema::diseases::dsl as DS;
    use schema::weekly_case::dsl as W;

    let mut query = W::weekly_case
        .left_join(DS::diseases.on(DS::diagnosis_code.eq(W::diagnosis_code)))
        .select((W::yearweek, W::diagnosis_code, DS::name.nullable(), W::total_cases))
        .into_boxed();
    if let Some(week) = week {
        query = query.filter(W::yearweek.eq(week.to_string()));
    }
    let rows: Vec<(String, String, Option<String>, i64)> = query
        .order((W::yearweek.desc(), W::total_cases.desc(), W::diagnosis_code.asc()))
        .load(conn)
        .map_err(|e| format!("load weekly stats failed: {}", e))?;

    Ok(rows
        .into_iter()
        .map(|(yearweek, diagnosis_code, disease_name, total_cases)| WeeklyStat {
            yearweek,
            diagnosis_code,
            disease_name,
            total_cases,
        })
        .collect())
}

pub fn list_predictions(
    conn: &mut PgConnection,
    code: Option<&str>,
    version: Option<&str>,
) -> Result<Vec<Prediction>, String> {
    use schema::predictions::dsl as P;

    let mut query = P::predictions.select(Prediction::as_select()).into_boxed();
    if let Some(code) = code {
        query = query.filter(P::diagnosis_code.eq(code.to_string()));
    }
    if let Some(version) = version {
        query = query.filter(P::model_version.eq(version.to_string()));
    }
    query
        .order((P::yearweek.asc(), P::diagnosis_code.asc(), P::model_version.asc()))
        .load(conn)
        .map_err(|e| format!("load predictions failed: {}", e))
}

pub fn format_stat(stat: &WeeklyStat) -> String {
    format!(
        "{}  {:<8} {:>7}  {}",
        stat.yearweek,
        stat.diagnosis_code,
        stat.total_cases,
        stat.disease_name.as_deref().unwrap_or("-")
    )
}

pub fn format_prediction(p: &Prediction) -> String {
    format!(
        "{}  {:<8} {:>10.2} [{:.2}, {:.2}]  {}",
        p.yearweek, p.diagnosis_code, p.predicted_cases, p.confidence_lower, p.confidence_upper, p.model_version
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_line_falls_back_for_unknown_disease() {
        let stat = WeeklyStat {
            yearweek: "202505".into(),
            diagnosis_code: "Z99".into(),
            disease_name: None,
            total_cases: 12,
        };
        let line = format_stat(&stat);
        assert!(line.starts_with("202505  Z99"));
        assert!(line.ends_with("  -"));
    }

    #[test]
    #[ignore = "needs TEST_DATABASE_URL"]
    fn stats_order_and_names() {
        use crate::db::models::NewWeeklyCase;
        use schema::diseases::dsl as DS;
        use schema::weekly_case::dsl as W;

        let mut conn = crate::db::testing::connection();
        diesel::insert_into(DS::diseases)
            .values((DS::diagnosis_code.eq("T01"), DS::name.eq("Test fever")))
            .execute(&mut conn)
            .unwrap();
        let rows: Vec<NewWeeklyCase> = [("209901", "T01", 3), ("209901", "T02", 9), ("209902", "T01", 1)]
            .iter()
            .map(|(w, c, n)| NewWeeklyCase {
                yearweek: w.to_string(),
                diagnosis_code: c.to_string(),
                week_start_date: w.parse::<YearWeek>().unwrap().monday(),
                total_cases: *n,
            })
            .collect();
        diesel::insert_into(W::weekly_case).values(&rows).execute(&mut conn).unwrap();

        let stats = weekly_stats(&mut conn, Some("209901".parse().unwrap())).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].diagnosis_code, "T02");
        assert_eq!(stats[0].disease_name, None);
        assert_eq!(stats[1].disease_name.as_deref(), Some("Test fever"));
    }
}
