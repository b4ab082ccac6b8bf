mod cli;
mod config;
mod db;
mod error;
mod models;
mod services;
mod utils;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prophet")]
#[command(about = "Opponent-adjusted college basketball ratings and game predictions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    InitDb,
    /// Load a demo conference with two seasons of data
    Seed,
    /// Import box scores from a CSV file (one row per team per game)
    ImportGames {
        #[arg(short, long)]
        file: String,
        #[arg(short, long)]
        season: Option<i32>,
    },
    /// Import bookmaker lines from a CSV file and store the consensus per game
    ImportOdds {
        #[arg(short, long)]
        file: String,
        #[arg(short, long)]
        season: Option<i32>,
    },
    /// Import offseason profiles (recruiting, returning minutes, home boosts)
    ImportOffseason {
        #[arg(short, long)]
        file: String,
        #[arg(short, long)]
        season: Option<i32>,
    },
    /// Seed preseason ratings from the prior season and offseason profiles
    Preseason {
        #[arg(short, long)]
        season: Option<i32>,
    },
    /// Rate every team as of a date and show the table
    Ratings {
        #[arg(short, long)]
        season: Option<i32>,
        /// Defaults to today
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(short, long, default_value = "25")]
        top: usize,
    },
    /// Replay a season day by day: rate, snapshot, predict, finalize
    Backfill {
        #[arg(short, long)]
        season: Option<i32>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Discard prior outputs for this config version and start from preseason
        #[arg(long)]
        fresh: bool,
    },
    /// Predict the games on a date from the latest snapshots
    Predict {
        #[arg(short, long)]
        season: Option<i32>,
        #[arg(short, long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "1.0")]
        upset_modifier: f64,
    },
    /// Monte Carlo simulation of a single matchup
    Simulate {
        #[arg(long)]
        home: String,
        #[arg(long)]
        away: String,
        #[arg(long)]
        neutral: bool,
        #[arg(short, long, default_value = "10000")]
        iterations: usize,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(short, long)]
        date: Option<NaiveDate>,
        #[arg(short, long)]
        season: Option<i32>,
        #[arg(long, default_value = "1.0")]
        upset_modifier: f64,
    },
    /// Compare predictions with market odds and store bet recommendations
    Recommend {
        #[arg(short, long)]
        season: Option<i32>,
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Grade stored recommendations against final scores
    Settle {
        #[arg(short, long)]
        season: Option<i32>,
    },
    /// Report prediction accuracy for a season
    Evaluate {
        #[arg(short, long)]
        season: Option<i32>,
        /// Write per-team pace residuals to this CSV file
        #[arg(long)]
        residuals: Option<String>,
    },
    /// Query team ratings and schedule
    Team {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        season: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            tracing::info!("Initializing database...");
            cli::init_db().await?;
        }
        Commands::Seed => cli::seed().await?,
        Commands::ImportGames { file, season } => {
            tracing::info!("Importing games from {}", file);
            cli::import_games(&file, season).await?;
        }
        Commands::ImportOdds { file, season } => {
            tracing::info!("Importing odds from {}", file);
            cli::import_odds(&file, season).await?;
        }
        Commands::ImportOffseason { file, season } => {
            tracing::info!("Importing offseason profiles from {}", file);
            cli::import_offseason(&file, season).await?;
        }
        Commands::Preseason { season } => cli::preseason(season).await?,
        Commands::Ratings { season, as_of, top } => cli::ratings(season, as_of, top).await?,
        Commands::Backfill {
            season,
            start,
            end,
            fresh,
        } => cli::backfill(season, start, end, fresh).await?,
        Commands::Predict {
            season,
            date,
            upset_modifier,
        } => {
            tracing::info!("Generating predictions...");
            cli::predict(season, date, upset_modifier).await?;
        }
        Commands::Simulate {
            home,
            away,
            neutral,
            iterations,
            seed,
            date,
            season,
            upset_modifier,
        } => cli::simulate(&home, &away, neutral, iterations, seed, date, season, upset_modifier).await?,
        Commands::Recommend { season, date } => cli::recommend(season, date).await?,
        Commands::Settle { season } => cli::settle(season).await?,
        Commands::Evaluate { season, residuals } => cli::evaluate(season, residuals.as_deref()).await?,
        Commands::Team { name, season } => {
            tracing::info!("Querying team: {}", name);
            cli::query_team(&name, season).await?;
        }
    }

    Ok(())
}
