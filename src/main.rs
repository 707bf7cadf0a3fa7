pub mod config;
pub mod db {
    pub mod models;
    #[cfg(test)]
    pub mod testing;
}
pub mod forecast;
pub mod schema;
pub mod stop;
pub mod versioning;
pub mod yearweek;
pub mod services {
    pub mod aggregate;
    pub mod evaluate;
    pub mod fake_data;
    pub mod ingest;
    pub mod notify;
    pub mod predict;
    pub mod report;
    pub mod schedule;
    pub mod train;
}

use crate::config::Config;
use crate::db::models::NewDailyCase;
use crate::services::aggregate::{self, AggregationTarget};
use crate::services::schedule::{Job, Scheduler};
use crate::services::train::{self, TrainOptions};
use crate::services::{evaluate, fake_data, ingest, notify, predict, report};
use crate::stop::StopHandle;
use crate::versioning::ModelVersion;
use crate::yearweek::YearWeek;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use diesel::PgConnection;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{error, info};
use serde::Serialize;
use std::num::NonZeroUsize;
use std::path::PathBuf;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Parser)]
#[command(name = "case-forecast", version, about = "Weekly disease case aggregation and forecasting")]
struct Cli {
    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending database migrations and exit
    Migrate,
    /// Record one daily case report
    Submit {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        code: String,
        #[arg(long, default_value_t = 1)]
        cases: i32,
        #[arg(long)]
        patient: Option<String>,
        #[arg(long)]
        facility: Option<String>,
    },
    /// Aggregate daily reports into weekly totals (default: all unprocessed weeks)
    Aggregate(AggregateArgs),
    /// Fit models per diagnosis code and write forecasts
    Train {
        #[arg(long)]
        steps: Option<NonZeroUsize>,
        /// Restrict training to this code (repeatable)
        #[arg(long = "code", value_name = "CODE")]
        codes: Vec<String>,
        /// Training date used in the model version (default: today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Re-issue forecasts from a saved model
    Predict {
        #[arg(long)]
        code: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        steps: Option<NonZeroUsize>,
    },
    /// Raise notifications for anomalously high forecasts
    Notify {
        #[arg(long)]
        week: Option<YearWeek>,
    },
    /// Compare stored forecasts with the weekly totals that arrived since
    Evaluate {
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        version: Option<String>,
        /// Also store realized totals as `actual` prediction rows
        #[arg(long)]
        record_actuals: bool,
    },
    /// Weekly totals with disease names
    Stats {
        #[arg(long)]
        week: Option<YearWeek>,
        #[arg(long)]
        json: bool,
    },
    /// List stored predictions
    Predictions {
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Run or inspect the weekly/monthly scheduler
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// Insert reference diseases and synthetic daily reports
    Seed {
        #[arg(long, default_value_t = 156)]
        weeks: usize,
    },
}

#[derive(Debug, Args)]
#[group(multiple = false)]
struct AggregateArgs {
    /// One explicit ISO week, e.g. 202503
    #[arg(long)]
    week: Option<YearWeek>,
    /// Week of the most recent report date
    #[arg(long)]
    latest: bool,
    /// Week containing today (UTC)
    #[arg(long)]
    current: bool,
}

impl AggregateArgs {
    fn target(&self) -> AggregationTarget {
        match (self.week, self.latest, self.current) {
            (Some(week), _, _) => AggregationTarget::Week(week),
            (None, true, _) => AggregationTarget::Latest,
            (None, false, true) => AggregationTarget::Current,
            (None, false, false) => AggregationTarget::Unprocessed,
        }
    }
}

#[derive(Debug, Subcommand)]
enum ScheduleCommand {
    /// Block and run jobs as they come due
    Start,
    /// Show the next run of each job
    Status,
    /// Run one job now
    Trigger {
        #[arg(value_enum)]
        job: JobArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JobArg {
    Weekly,
    Monthly,
}

impl From<JobArg> for Job {
    fn from(arg: JobArg) -> Self {
        match arg {
            JobArg::Weekly => Job::WeeklyAggregation,
            JobArg::Monthly => Job::MonthlyTraining,
        }
    }
}

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| format!("serialize output failed: {}", e))?;
    println!("{}", out);
    Ok(())
}

fn run(command: Command) -> Result<(), String> {
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (forecast_steps={}, min_history_weeks={}, max_seasonal_period={}, confidence_level={}, model_dir={}, anomaly_stddev_multiplier={}, scheduler_poll={}s)",
        cfg.forecast_steps,
        cfg.min_history_weeks,
        cfg.max_seasonal_period,
        cfg.confidence_level,
        cfg.model_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string()),
        cfg.anomaly_stddev_multiplier,
        cfg.scheduler_poll.as_secs()
    );

    let mut conn = PgConnection::establish(&cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");
    apply_database_migrations(&mut conn)?;

    let today = Utc::now().date_naive();
    match command {
        Command::Migrate => {}
        Command::Submit {
            date,
            code,
            cases,
            patient,
            facility,
        } => {
            let mut row = NewDailyCase::new(date, code.trim());
            row.cases = cases;
            row.patient_identifier = patient;
            row.facility_code = facility;
            let id = ingest::insert_daily_case(&mut conn, &row)?;
            info!(
                "Recorded daily case {} ({} x{} on {}, week {})",
                id,
                row.diagnosis_code,
                row.cases,
                date,
                YearWeek::from_date(date)
            );
        }
        Command::Aggregate(args) => {
            let summary = aggregate::run(&mut conn, args.target(), today, &StopHandle::new())
                .map_err(|e| e.to_string())?;
            for outcome in &summary.processed {
                println!(
                    "{}  inserted={} updated={} unchanged={}",
                    outcome.yearweek, outcome.inserted, outcome.updated, outcome.unchanged
                );
            }
        }
        Command::Train { steps, codes, date } => {
            let mut opts = TrainOptions::from_config(&cfg, date.unwrap_or(today));
            if let Some(steps) = steps {
                opts.forecast_steps = steps.get();
            }
            if !codes.is_empty() {
                opts.codes = Some(codes);
            }
            let summary = train::run(&mut conn, &opts, &StopHandle::new()).map_err(|e| e.to_string())?;
            for outcome in &summary.trained {
                println!(
                    "{}  {}  period={} predictions={} saved={}",
                    outcome.diagnosis_code,
                    outcome.model_version,
                    outcome.seasonal_period,
                    outcome.predictions_written,
                    outcome
                        .saved_to
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            for (code, reason) in &summary.skipped {
                println!("{}  skipped: {}", code, reason);
            }
        }
        Command::Predict { code, version, steps } => {
            let parsed: ModelVersion = version.parse().map_err(|e| format!("--version: {}", e))?;
            if parsed.diagnosis_code != code {
                return Err(format!("model version {} does not belong to code {}", version, code));
            }
            let model_dir = cfg
                .model_dir
                .as_deref()
                .ok_or_else(|| "MODEL_DIR is empty; no saved models to predict from".to_string())?;
            let steps = steps.unwrap_or(cfg.forecast_steps).get();
            predict::repredict(&mut conn, model_dir, &code, &version, steps, cfg.confidence_level)?;
        }
        Command::Notify { week } => {
            notify::run(&mut conn, week, cfg.anomaly_stddev_multiplier)?;
        }
        Command::Evaluate {
            code,
            version,
            record_actuals,
        } => {
            let scores = evaluate::run(&mut conn, code.as_deref(), version.as_deref(), record_actuals)?;
            for s in &scores {
                println!(
                    "{}  {}  weeks={} mae={:.2} coverage={:.0}%",
                    s.diagnosis_code,
                    s.model_version,
                    s.compared_weeks,
                    s.mean_absolute_error,
                    s.interval_coverage * 100.0
                );
            }
        }
        Command::Stats { week, json } => {
            let stats = report::weekly_stats(&mut conn, week)?;
            if json {
                print_json(&stats)?;
            } else {
                stats.iter().for_each(|s| println!("{}", report::format_stat(s)));
            }
        }
        Command::Predictions { code, version, json } => {
            let rows = report::list_predictions(&mut conn, code.as_deref(), version.as_deref())?;
            if json {
                print_json(&rows)?;
            } else {
                rows.iter().for_each(|p| println!("{}", report::format_prediction(p)));
            }
        }
        Command::Schedule(sub) => {
            // Jobs open their own connections.
            drop(conn);
            let scheduler = Scheduler::new(cfg);
            match sub {
                ScheduleCommand::Start => scheduler.start()?,
                ScheduleCommand::Status => {
                    for (job, at) in scheduler.next_runs(Utc::now()) {
                        println!("{}: next run at {}", job, at);
                    }
                }
                ScheduleCommand::Trigger { job } => scheduler.trigger(job.into())?,
            }
        }
        Command::Seed { weeks } => {
            fake_data::run(&mut conn, weeks, today)?;
        }
    }
    Ok(())
}

fn load_environment(explicit: Option<&PathBuf>) -> Result<Option<(PathBuf, bool, usize)>, String> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        let applied = config::load_env_file(path)?;
        return Ok(Some((path.clone(), true, applied)));
    }
    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if default_path.is_file() {
        let applied = config::load_env_file(&default_path)?;
        Ok(Some((default_path, false, applied)))
    } else {
        Ok(None)
    }
}

fn main() {
    let cli = Cli::parse();
    let loaded_env = match load_environment(cli.env_file.as_ref()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some((path, explicit, applied)) = loaded_env.as_ref() {
        let origin = if *explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s) applied)",
            origin,
            path.display(),
            applied
        );
    }

    info!(
        "case-forecast {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
