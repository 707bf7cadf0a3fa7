use crate::db::models::{NewDailyCase, NewDisease};
use crate::schema;
use crate::services::ingest::insert_daily_cases;
use crate::yearweek::YearWeek;
use chrono::{Datelike, Days, NaiveDate};
use diesel::PgConnection;
use diesel::dsl::count_star;
use diesel::prelude::*;
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

pub const SEED_FACILITY: &str = "SEED-FAC";
const RNG_SEED: u64 = 0x0A90_2025_CA5E_F0CA;
const INSERT_CHUNK: usize = 1_000;

struct SeedDisease {
    code: &'static str,
    name: &'static str,
    description: &'static str,
    /// Mean daily cases.
    base: f64,
    /// Relative swing of the yearly cycle.
    amplitude: f64,
    /// Week of year with the most cases.
    peak_week: f64,
}

const DISEASES: [SeedDisease; 4] = [
    SeedDisease {
        code: "A90",
        name: "Dengue fever",
        description: "Classical dengue",
        base: 6.0,
        amplitude: 0.8,
        peak_week: 30.0,
    },
    SeedDisease {
        code: "A91",
        name: "Dengue haemorrhagic fever",
        description: "Severe dengue",
        base: 1.5,
        amplitude: 0.9,
        peak_week: 31.0,
    },
    SeedDisease {
        code: "A01",
        name: "Typhoid and paratyphoid fevers",
        description: "Enteric fever",
        base: 2.5,
        amplitude: 0.4,
        peak_week: 20.0,
    },
    SeedDisease {
        code: "J11",
        name: "Influenza, virus not identified",
        description: "Clinically diagnosed influenza",
        base: 9.0,
        amplitude: 0.7,
        peak_week: 3.0,
    },
];

/// Insert reference diseases and `weeks` full ISO weeks of synthetic daily
/// reports ending with the week before `today`.
pub fn run(conn: &mut PgConnection, weeks: usize, today: NaiveDate) -> Result<(), String> {
    ensure_diseases(conn)?;

    use schema::daily_case::dsl as D;
    let existing: i64 = D::daily_case
        .filter(D::facility_code.eq(SEED_FACILITY))
        .select(count_star())
        .first(conn)
        .map_err(|e| format!("count seed rows failed: {}", e))?;
    if existing > 0 {
        info!(
            "Fake data: {} seeded daily report(s) already present; skipping generation",
            existing
        );
        return Ok(());
    }

    let current_monday = YearWeek::from_date(today).monday();
    let start = current_monday
        .checked_sub_days(Days::new(7 * weeks as u64))
        .ok_or_else(|| format!("cannot seed {} week(s) before {}", weeks, today))?;
    info!(
        "Fake data: generating {} week(s) of daily reports from {} for {} disease(s)",
        weeks,
        start,
        DISEASES.len()
    );

    let mut rng = SmallRng::seed_from_u64(RNG_SEED);
    let rows = synthetic_cases(start, weeks * 7, &mut rng);
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
        inserted += insert_daily_cases(conn, chunk)?;
    }

    info!(
        "Fake data: complete (rows={}, cases={})",
        inserted,
        rows.iter().map(|r| i64::from(r.cases)).sum::<i64>()
    );
    Ok(())
}

fn ensure_diseases(conn: &mut PgConnection) -> Result<(), String> {
    use schema::diseases::dsl as DS;

    for d in &DISEASES {
        let row = NewDisease {
            diagnosis_code: d.code.to_string(),
            name: d.name.to_string(),
            description: Some(d.description.to_string()),
        };
        diesel::insert_into(DS::diseases)
            .values(&row)
            .on_conflict(DS::diagnosis_code)
            .do_update()
            .set((DS::name.eq(row.name.clone()), DS::description.eq(row.description.clone())))
            .execute(conn)
            .map_err(|e| format!("upsert disease {} failed: {}", d.code, e))?;
    }
    Ok(())
}

/// Daily reports for `days` days from `start`. Days without cases produce no row.
pub fn synthetic_cases(start: NaiveDate, days: usize, rng: &mut SmallRng) -> Vec<NewDailyCase> {
    let mut rows = Vec::new();
    for offset in 0..days {
        let Some(day) = start.checked_add_days(Days::new(offset as u64)) else {
            break;
        };
        let week_of_year = f64::from(day.iso_week().week());
        for d in &DISEASES {
            let cases = expected_cases(d, week_of_year, rng).round();
            if cases < 1.0 {
                continue;
            }
            let mut row = NewDailyCase::new(day, d.code);
            row.facility_code = Some(SEED_FACILITY.to_string());
            row.cases = cases as i32;
            rows.push(row);
        }
    }
    rows
}

fn expected_cases(d: &SeedDisease, week_of_year: f64, rng: &mut SmallRng) -> f64 {
    let seasonal = ((week_of_year - d.peak_week) / 52.0 * 2.0 * PI).cos() * d.amplitude;
    let noise = rng.random_range(-0.35..=0.35);
    let outbreak = if rng.random_bool(0.01) { rng.random_range(1.5..=3.0) } else { 1.0 };
    (d.base * (1.0 + seasonal + noise) * outbreak).max(0.0)
}
