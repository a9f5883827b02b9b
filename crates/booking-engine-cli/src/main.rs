use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use booking_engine::materialize::CreateContractRequest;
use booking_engine::temporal::{parse_wire_date, parse_wire_time};
use booking_engine::{
    plan_bulk, AvailabilityOracle, BlockedDaySet, BulkDates, BulkRequest, ContractDraft,
    ContractMaterializer, DateRange, EngineConfig, Frequency, MaterializationReport,
    OccupancyMap, OccurrenceFlags, PatientInfo, PracticeClock, RecurrencePattern,
    RecurrenceSession, Resolution, SessionView,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod fixture;
mod store;

use fixture::{Fixture, FixtureOracle};
use store::DryRunStore;

#[derive(Parser)]
#[command(name = "booking")]
#[command(about = "Preview, resolve and plan recurring appointment contracts", version)]
struct Cli {
    /// Practice configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log engine decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and classify the occurrences of a recurring contract
    Preview {
        /// Anchor date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_wire_date)]
        anchor: NaiveDate,
        /// Session time (HH:mm)
        #[arg(long, value_parser = parse_wire_time)]
        time: NaiveTime,
        /// individual, weekly, biweekly or monthly
        #[arg(long)]
        frequency: Frequency,
        /// Number of sessions in the contract
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Override the practice-local date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_wire_date)]
        today: Option<NaiveDate>,
        /// Existing slot the contract grows from
        #[arg(long)]
        anchor_slot: Option<String>,
        /// Availability fixture (JSON)
        #[arg(long)]
        fixture: Option<PathBuf>,
    },
    /// Apply a list of resolutions to a generated session
    Plan {
        /// Session file (JSON)
        #[arg(long)]
        session: PathBuf,
    },
    /// Resolve a session and materialize it against a dry-run store
    Commit {
        /// Session file (JSON)
        #[arg(long)]
        session: PathBuf,
        /// Patient and per-date flags (JSON)
        #[arg(long)]
        draft: PathBuf,
    },
    /// Classify a bulk personal-activity request
    Bulk {
        /// Bulk request file (JSON)
        #[arg(long)]
        request: PathBuf,
        /// Override the practice-local date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_wire_date)]
        today: Option<NaiveDate>,
        /// Availability fixture (JSON)
        #[arg(long)]
        fixture: Option<PathBuf>,
    },
}

/// Input of `booking plan`.
#[derive(Debug, Deserialize)]
struct PlanFile {
    pattern: RecurrencePattern,
    #[serde(default)]
    today: Option<NaiveDate>,
    #[serde(default)]
    anchor_slot: Option<String>,
    #[serde(default)]
    resolutions: Vec<Resolution>,
    #[serde(flatten)]
    fixture: Fixture,
}

/// Input of `booking commit --draft`.
#[derive(Debug, Deserialize)]
struct DraftFile {
    patient: PatientInfo,
    #[serde(default)]
    reminders: bool,
    #[serde(default)]
    flags: BTreeMap<NaiveDate, OccurrenceFlags>,
}

#[derive(Debug, Serialize)]
struct CommitOutput {
    request: Option<CreateContractRequest>,
    report: MaterializationReport,
}

#[derive(Debug, Serialize)]
struct RejectedResolution {
    occurrence_index: u32,
    error: String,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    #[serde(flatten)]
    session: SessionView,
    rejected: Vec<RejectedResolution>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let clock = config.validate()?;

    match cli.command {
        Commands::Preview {
            anchor,
            time,
            frequency,
            count,
            today,
            anchor_slot,
            fixture,
        } => {
            let fixture = load_fixture(fixture.as_deref())?;
            let today = today.unwrap_or_else(|| clock.today(Utc::now()));
            let pattern = RecurrencePattern::new(frequency, anchor, time, count)?;
            let mut session = RecurrenceSession::new(pattern, today, config.clone())?;
            if let Some(slot) = anchor_slot {
                session = session.with_anchor_slot(slot);
            }
            let oracle = FixtureOracle::new(fixture, clock, config);
            session.refresh(&oracle).await?;
            print_json(&session.view())
        }
        Commands::Plan { session } => {
            let plan: PlanFile = read_json(&session, "session")?;
            let (session, rejected) = build_session(plan, clock, config).await?;
            print_json(&PlanOutput {
                session: session.view(),
                rejected,
            })
        }
        Commands::Commit { session, draft } => {
            let plan: PlanFile = read_json(&session, "session")?;
            let draft_file: DraftFile = read_json(&draft, "draft")?;
            let (session, rejected) = build_session(plan, clock, config).await?;
            if let Some(first) = rejected.first() {
                anyhow::bail!(
                    "resolution for occurrence {} rejected: {}",
                    first.occurrence_index,
                    first.error
                );
            }

            let commit = session.commit_set()?;
            let mut draft = ContractDraft::from_commit(&commit, draft_file.patient);
            draft.set_reminders(draft_file.reminders);
            for (date, flags) in draft_file.flags {
                let slot = draft.flags_mut(date).with_context(|| {
                    format!("flags given for {date}, which is not in the schedule")
                })?;
                *slot = flags;
            }

            let materializer = ContractMaterializer::new(DryRunStore::default());
            let report = materializer.materialize(&commit, &draft).await?;
            print_json(&CommitOutput {
                request: materializer.store().sent(),
                report,
            })
        }
        Commands::Bulk {
            request,
            today,
            fixture,
        } => {
            let request: BulkRequest = read_json(&request, "request")?;
            let fixture = load_fixture(fixture.as_deref())?;
            let today = today.unwrap_or_else(|| clock.today(Utc::now()));

            let (occupancy, blocked) = match bulk_range(&request.dates) {
                Some(range) => {
                    let oracle = FixtureOracle::new(fixture, clock, config.clone());
                    let intervals = oracle.occupied_intervals(range).await?;
                    let blocked: BlockedDaySet =
                        oracle.blocked_days(range).await?.into_iter().collect();
                    (
                        OccupancyMap::from_intervals(&intervals, &clock, &config, None),
                        blocked,
                    )
                }
                None => (OccupancyMap::new(config.slot_step_minutes), BlockedDaySet::default()),
            };

            let plan = plan_bulk(&request, &occupancy, &blocked, today, config.occurrence_cap)?;
            print_json(&plan)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "booking_engine=debug,booking=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: EngineConfig =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

fn load_fixture(path: Option<&Path>) -> anyhow::Result<Fixture> {
    path.map(Fixture::load)
        .transpose()
        .map(Option::unwrap_or_default)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {what} {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {what} {}", path.display()))
}

/// Generate, classify and apply the resolutions of a session file.
async fn build_session(
    plan: PlanFile,
    clock: PracticeClock,
    config: EngineConfig,
) -> anyhow::Result<(RecurrenceSession, Vec<RejectedResolution>)> {
    let p = plan.pattern;
    let pattern =
        RecurrencePattern::new(p.frequency, p.anchor_date, p.anchor_time, p.occurrence_count)?;
    let today = plan.today.unwrap_or_else(|| clock.today(Utc::now()));
    let mut session = RecurrenceSession::new(pattern, today, config.clone())?;
    if let Some(slot) = plan.anchor_slot {
        session = session.with_anchor_slot(slot);
    }

    let oracle = FixtureOracle::new(plan.fixture, clock, config);
    session.refresh(&oracle).await?;

    let mut rejected = Vec::new();
    for resolution in plan.resolutions {
        let index = resolution.occurrence_index;
        if let Err(err) = session.apply(resolution) {
            tracing::warn!(occurrence = index, %err, "resolution rejected");
            rejected.push(RejectedResolution {
                occurrence_index: index,
                error: err.to_string(),
            });
        }
        // a skip can push the trailing occurrence past the fetched range
        if session.needs_refresh() {
            session.refresh(&oracle).await?;
        }
    }

    Ok((session, rejected))
}

/// Dates a bulk request can touch, for the availability fetch.
fn bulk_range(dates: &BulkDates) -> Option<DateRange> {
    match dates {
        BulkDates::Explicit { dates } => {
            let start = dates.iter().min()?;
            let end = dates.iter().max()?;
            DateRange::new(*start, *end).ok()
        }
        BulkDates::Range { start, end, .. } => DateRange::new(*start, *end).ok(),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
