use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use health_tracker::config::AppConfig;
use health_tracker::import::ImportBatch;
use health_tracker::models::CustomerTimeline;
use health_tracker::scoring::{ScoringConfig, ScoringEngine};
use health_tracker::survey::{self, SurveyResponse};
use health_tracker::trend::{self, CohortFilter};
use health_tracker::{db, import, notify, report, telemetry};

#[derive(Parser)]
#[command(name = "health-tracker")]
#[command(about = "Customer health scoring and trend reporting for account managers", long_about = None)]
struct Cli {
    /// JSON file overriding the built-in scoring weights and thresholds
    #[arg(long, global = true)]
    scoring_config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct CohortArgs {
    #[arg(long)]
    owner: Option<String>,
    #[arg(long)]
    segment: Option<String>,
    /// Read history from a spreadsheet export instead of the database
    #[arg(long)]
    from_csv: Option<PathBuf>,
}

impl CohortArgs {
    fn filter(&self) -> CohortFilter {
        CohortFilter {
            owner: self.owner.clone(),
            segment: self.segment.clone(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TrendFormat {
    Table,
    Csv,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample customers with history
    Seed,
    /// Import historical snapshots from a spreadsheet export
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Score current customer records
    Score {
        #[command(flatten)]
        cohort: CohortArgs,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List the owners and segments available as cohort filters
    Cohorts {
        /// Read customers from a spreadsheet export instead of the database
        #[arg(long)]
        from_csv: Option<PathBuf>,
    },
    /// Show one customer's snapshots and the score at each date
    History {
        /// Customer id, or the customer name when reading an export
        #[arg(long)]
        customer: String,
        /// Read history from a spreadsheet export instead of the database
        #[arg(long)]
        from_csv: Option<PathBuf>,
    },
    /// Print the monthly label distribution
    Trend {
        #[command(flatten)]
        cohort: CohortArgs,
        #[arg(long, value_enum, default_value_t = TrendFormat::Table)]
        format: TrendFormat,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        cohort: CohortArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Record survey ratings for one customer
    Survey {
        #[arg(long)]
        customer: Uuid,
        /// Ratings as SLOT=VALUE, e.g. roi_established=High
        #[arg(long = "rating", required = true)]
        ratings: Vec<String>,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Post the monthly survey reminder to the team webhook
    Remind {
        /// Print the message instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
}

fn load_engine(path: Option<&Path>) -> anyhow::Result<ScoringEngine> {
    let Some(path) = path else {
        return Ok(ScoringEngine::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scoring config {}", path.display()))?;
    let config = ScoringConfig::from_json(&raw)?;
    Ok(ScoringEngine::new(config)?)
}

fn read_import(path: &Path) -> anyhow::Result<ImportBatch> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import::parse_import(&text).with_context(|| {
        format!("could not import {}; re-export the sheet and try again", path.display())
    })
}

async fn load_timelines(
    config: &AppConfig,
    cohort: &CohortArgs,
) -> anyhow::Result<Vec<CustomerTimeline>> {
    if let Some(path) = &cohort.from_csv {
        return Ok(read_import(path)?.into_timelines());
    }
    let pool = connect(config).await?;
    db::fetch_timelines(&pool, cohort.owner.as_deref()).await
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let database_url = config
        .database
        .require_url()
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let engine = load_engine(cli.scoring_config.as_deref())?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&config).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let batch = read_import(&csv)?;

            let pool = connect(&config).await?;
            let summary = db::apply_import(&pool, &batch).await?;
            println!(
                "Created {} customers with {} historical snapshots from {} ({} rows not imported).",
                summary.customers_created,
                summary.history_created,
                csv.display(),
                batch.rows_skipped
            );
        }
        Commands::Score { cohort, limit } => {
            let filter = cohort.filter();
            let timelines = load_timelines(&config, &cohort).await?;
            let scores = report::score_customers(&engine, &timelines, &filter);

            if scores.is_empty() {
                println!("No customers match this cohort.");
                return Ok(());
            }

            println!("Customers by health score ({}):", filter.title());
            for score in scores.iter().take(limit) {
                let value = score
                    .score
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "- {} ({}, segment {}) score {} [{}]",
                    score.name, score.owner, score.segment, value, score.label
                );
            }
        }
        Commands::Cohorts { from_csv } => {
            let customers: Vec<_> = match from_csv {
                Some(path) => read_import(&path)?
                    .into_timelines()
                    .into_iter()
                    .map(|t| t.customer)
                    .collect(),
                None => {
                    let pool = connect(&config).await?;
                    db::fetch_customers(&pool, None).await?
                }
            };
            let (owners, segments) = trend::cohort_options(&customers);
            println!("Owners: {}", owners.join(", "));
            println!("Segments: {}", segments.join(", "));
        }
        Commands::History { customer, from_csv } => {
            let timeline = match from_csv {
                Some(path) => {
                    let name = customer.trim();
                    read_import(&path)?
                        .into_timelines()
                        .into_iter()
                        .find(|t| t.customer.name.eq_ignore_ascii_case(name))
                        .with_context(|| format!("no customer named {name} in {}", path.display()))?
                }
                None => {
                    let id = Uuid::parse_str(customer.trim())
                        .context("--customer must be a customer id when reading the database")?;
                    let pool = connect(&config).await?;
                    db::fetch_timeline(&pool, id)
                        .await?
                        .with_context(|| format!("customer {id} not found"))?
                }
            };
            print!("{}", report::render_history(&engine, &timeline));
        }
        Commands::Trend { cohort, format } => {
            let filter = cohort.filter();
            let timelines = load_timelines(&config, &cohort).await?;
            let series = trend::aggregate_monthly(&engine, &timelines, &filter);
            info!(months = series.len(), cohort = %filter.title(), "aggregated trend");

            if series.is_empty() && matches!(format, TrendFormat::Table) {
                println!("No historical data available for the selected filters.");
                return Ok(());
            }

            match format {
                TrendFormat::Table => {
                    println!("{}", filter.title());
                    print!("{}", report::render_trend_table(&series));
                }
                TrendFormat::Csv => print!("{}", report::render_trend_csv(&series)?),
                TrendFormat::Json => println!("{}", serde_json::to_string_pretty(&series)?),
            }
        }
        Commands::Report { cohort, out } => {
            let filter = cohort.filter();
            let timelines = load_timelines(&config, &cohort).await?;
            let report = report::build_report(&engine, &timelines, &filter);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Survey {
            customer,
            ratings,
            notes,
        } => {
            let metrics = survey::parse_ratings(&ratings)?;
            let response = SurveyResponse {
                customer_id: customer,
                metrics,
                notes,
            };
            let plans = survey::plan_submission(&engine, &[response], Utc::now().date_naive())?;

            let pool = connect(&config).await?;
            let record = db::fetch_customer(&pool, customer)
                .await?
                .with_context(|| format!("customer {customer} not found"))?;
            db::apply_submission(&pool, &plans).await?;
            let result = engine.weighted_risk_score(&metrics);
            println!(
                "Saved survey for {}; score {} [{}].",
                record.name,
                result.score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                result.label
            );
        }
        Commands::Remind { dry_run } => {
            let pool = connect(&config).await?;
            let customers = db::fetch_customers(&pool, None).await?;
            let counts = notify::owner_counts(&customers);
            let month = Utc::now().format("%B %Y").to_string();

            let Some(message) = notify::build_reminder(&counts, &config.notify.base_url, &month)
            else {
                println!("No owners with active customers; nothing to send.");
                return Ok(());
            };

            if dry_run {
                println!("{message}");
            } else {
                let webhook = config.notify.require_webhook()?;
                notify::send_reminder(webhook, &message).await?;
                println!("Notified {} owners about their surveys.", counts.len());
            }
        }
    }

    Ok(())
}
