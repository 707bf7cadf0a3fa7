use crate::db::models::NewDailyCase;
use crate::schema;
use crate::yearweek::YearWeek;
use diesel::PgConnection;
use diesel::prelude::*;

/// Insert one daily report and return its id.
pub fn insert_daily_case(conn: &mut PgConnection, row: &NewDailyCase) -> Result<i64, String> {
    validate(row)?;

    use schema::daily_case::dsl as D;

    diesel::insert_into(D::daily_case)
        .values(row)
        .returning(D::id)
        .get_result(conn)
        .map_err(|e| format!("insert daily case failed: {}", e))
}

/// Bulk insert, used by the seeder.
pub fn insert_daily_cases(conn: &mut PgConnection, rows: &[NewDailyCase]) -> Result<usize, String> {
    if rows.is_empty() {
        return Ok(0);
    }
    for row in rows {
        validate(row)?;
    }

    use schema::daily_case::dsl as D;

    diesel::insert_into(D::daily_case)
        .values(rows)
        .execute(conn)
        .map_err(|e| format!("insert daily cases failed: {}", e))
}

fn validate(row: &NewDailyCase) -> Result<(), String> {
    if row.diagnosis_code.trim().is_empty() {
        return Err("daily case needs a diagnosis code".to_string());
    }
    if row.cases < 1 {
        return Err(format!(
            "daily case for {} on {} must count at least one case (got {})",
            row.diagnosis_code, row.report_date, row.cases
        ));
    }
    YearWeek::try_from_date(row.report_date)
        .map_err(|e| format!("daily case for {} has report date {}: {}", row.diagnosis_code, row.report_date, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn validation_rejects_empty_code_and_zero_counts() {
        let day = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap();
        assert!(validate(&NewDailyCase::new(day, "A90")).is_ok());
        assert!(validate(&NewDailyCase::new(day, "  ")).is_err());
        let mut zero = NewDailyCase::new(day, "A90");
        zero.cases = 0;
        assert!(validate(&zero).is_err());
    }

    #[test]
    fn validation_rejects_dates_without_a_six_digit_week() {
        let typo = NaiveDate::from_ymd_opt(20250, 2, 3).unwrap();
        assert!(validate(&NewDailyCase::new(typo, "A90")).is_err());
        let ancient = NaiveDate::from_ymd_opt(999, 6, 1).unwrap();
        assert!(validate(&NewDailyCase::new(ancient, "A90")).is_err());
        let last = NaiveDate::from_ymd_opt(9999, 12, 1).unwrap();
        assert!(validate(&NewDailyCase::new(last, "A90")).is_ok());
    }
}
