pub mod seed;
pub use seed::seed_data;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::env;
use std::str::FromStr;

use crate::config::RatingsConfig;
use crate::error::RatingsError;
use crate::models::*;

pub async fn create_pool() -> Result<SqlitePool> {
    let database_url = env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:data/prophet.db".to_string());

    // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
    let file_path = database_url
        .strip_prefix("sqlite:///")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(&database_url);

    if let Some(parent) = std::path::Path::new(file_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
    }

    let options = SqliteConnectOptions::from_str(&database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
#[cfg(test)]
pub async fn memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_database_with_pool(&pool).await?;
    Ok(pool)
}

/// Called from the CLI where no pool exists yet.
pub async fn init_database() -> Result<()> {
    let pool = create_pool().await?;
    init_database_with_pool(&pool).await
}

pub async fn init_database_with_pool(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS seasons (
            id TEXT PRIMARY KEY,
            year INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            average_efficiency REAL,
            average_pace REAL,
            efficiency_std_deviation REAL,
            pace_std_deviation REAL,
            current INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            location TEXT,
            home_venue TEXT,
            aliases TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS team_seasons (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL,
            season_id TEXT NOT NULL,
            adj_offensive_efficiency REAL NOT NULL,
            adj_defensive_efficiency REAL NOT NULL,
            adj_pace REAL NOT NULL,
            rating REAL NOT NULL,
            preseason_adj_offensive_efficiency REAL,
            preseason_adj_defensive_efficiency REAL,
            preseason_adj_pace REAL,
            offensive_efficiency_volatility REAL,
            defensive_efficiency_volatility REAL,
            pace_volatility REAL,
            home_offense_boost REAL,
            home_defense_boost REAL,
            wins INTEGER NOT NULL DEFAULT 0,
            losses INTEGER NOT NULL DEFAULT 0,
            raw_stats TEXT NOT NULL DEFAULT '{}',
            adjusted_stats TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL,
            UNIQUE (team_id, season_id),
            FOREIGN KEY (team_id) REFERENCES teams (id),
            FOREIGN KEY (season_id) REFERENCES seasons (id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS games (
            id TEXT PRIMARY KEY,
            season_id TEXT NOT NULL,
            start_time TEXT NOT NULL,
            home_team_id TEXT NOT NULL,
            away_team_id TEXT NOT NULL,
            home_team_name TEXT NOT NULL,
            away_team_name TEXT NOT NULL,
            home_team_score INTEGER,
            away_team_score INTEGER,
            location TEXT,
            neutral INTEGER,
            status TEXT NOT NULL DEFAULT 'scheduled',
            possessions REAL,
            minutes REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (season_id) REFERENCES seasons (id),
            FOREIGN KEY (home_team_id) REFERENCES teams (id),
            FOREIGN KEY (away_team_id) REFERENCES teams (id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS team_games (
            id TEXT PRIMARY KEY,
            game_id TEXT NOT NULL,
            team_id TEXT NOT NULL,
            team_season_id TEXT NOT NULL,
            opponent_team_season_id TEXT,
            home INTEGER NOT NULL,
            box_score TEXT NOT NULL,
            rates TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            UNIQUE (game_id, team_id),
            FOREIGN KEY (game_id) REFERENCES games (id),
            FOREIGN KEY (team_season_id) REFERENCES team_seasons (id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS ratings_config_versions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            config TEXT NOT NULL,
            current INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS team_rating_snapshots (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL,
            season_id TEXT NOT NULL,
            team_season_id TEXT NOT NULL,
            ratings_config_version_id TEXT NOT NULL,
            snapshot_date TEXT NOT NULL,
            rating REAL NOT NULL,
            adj_offensive_efficiency REAL NOT NULL,
            adj_defensive_efficiency REAL NOT NULL,
            adj_pace REAL NOT NULL,
            offensive_efficiency_volatility REAL,
            defensive_efficiency_volatility REAL,
            pace_volatility REAL,
            home_offense_boost REAL,
            home_defense_boost REAL,
            wins INTEGER NOT NULL,
            losses INTEGER NOT NULL,
            factors TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            UNIQUE (team_id, snapshot_date, ratings_config_version_id),
            FOREIGN KEY (team_season_id) REFERENCES team_seasons (id),
            FOREIGN KEY (ratings_config_version_id) REFERENCES ratings_config_versions (id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            id TEXT PRIMARY KEY,
            game_id TEXT NOT NULL,
            ratings_config_version_id TEXT NOT NULL,
            home_team_snapshot_id TEXT NOT NULL,
            away_team_snapshot_id TEXT NOT NULL,
            home_offensive_efficiency REAL NOT NULL,
            away_offensive_efficiency REAL NOT NULL,
            home_defensive_efficiency REAL NOT NULL,
            away_defensive_efficiency REAL NOT NULL,
            pace REAL NOT NULL,
            home_score REAL NOT NULL,
            away_score REAL NOT NULL,
            home_win_probability REAL NOT NULL,
            margin_std_deviation REAL NOT NULL,
            confidence_level TEXT NOT NULL,
            home_offensive_efficiency_error REAL,
            away_offensive_efficiency_error REAL,
            home_defensive_efficiency_error REAL,
            away_defensive_efficiency_error REAL,
            pace_error REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (game_id, home_team_snapshot_id, away_team_snapshot_id),
            FOREIGN KEY (game_id) REFERENCES games (id),
            FOREIGN KEY (home_team_snapshot_id) REFERENCES team_rating_snapshots (id),
            FOREIGN KEY (away_team_snapshot_id) REFERENCES team_rating_snapshots (id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS game_odds (
            id TEXT PRIMARY KEY,
            game_id TEXT NOT NULL UNIQUE,
            fetched_at TEXT NOT NULL,
            moneyline_home INTEGER,
            moneyline_away INTEGER,
            spread_point REAL,
            spread_home_odds INTEGER,
            spread_away_odds INTEGER,
            total_points REAL,
            total_over_odds INTEGER,
            total_under_odds INTEGER,
            FOREIGN KEY (game_id) REFERENCES games (id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS bet_recommendations (
            id TEXT PRIMARY KEY,
            game_id TEXT NOT NULL,
            prediction_id TEXT NOT NULL,
            game_odd_id TEXT NOT NULL,
            ratings_config_version_id TEXT NOT NULL,
            bet_type TEXT NOT NULL,
            team TEXT,
            vegas_line REAL,
            vegas_odds INTEGER,
            model_value REAL NOT NULL,
            probability REAL NOT NULL,
            ev REAL NOT NULL,
            recommended INTEGER NOT NULL DEFAULT 0,
            result TEXT,
            payout REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (prediction_id, game_odd_id, bet_type),
            FOREIGN KEY (game_id) REFERENCES games (id),
            FOREIGN KEY (prediction_id) REFERENCES predictions (id),
            FOREIGN KEY (game_odd_id) REFERENCES game_odds (id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS team_offseason_profiles (
            id TEXT PRIMARY KEY,
            team_season_id TEXT NOT NULL UNIQUE,
            recruiting_score REAL,
            returning_minutes_pct REAL,
            manual_adjustment REAL,
            FOREIGN KEY (team_season_id) REFERENCES team_seasons (id)
        )
        "#,
        // One row per completed backfill date; a date present here is never reprocessed
        r#"
        CREATE TABLE IF NOT EXISTS backfill_progress (
            season_id TEXT NOT NULL,
            ratings_config_version_id TEXT NOT NULL,
            date TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY (season_id, ratings_config_version_id, date)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_games_season_start ON games(season_id, start_time)",
        "CREATE INDEX IF NOT EXISTS idx_team_games_team_season ON team_games(team_season_id)",
        "CREATE INDEX IF NOT EXISTS idx_snapshots_version_date ON team_rating_snapshots(ratings_config_version_id, snapshot_date)",
        "CREATE INDEX IF NOT EXISTS idx_predictions_version ON predictions(ratings_config_version_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database initialized successfully");
    Ok(())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(value, "%Y-%m-%d")?)
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// Season operations

fn season_from_row(row: &SqliteRow) -> Result<Season> {
    Ok(Season {
        id: row.get("id"),
        year: row.get("year"),
        name: row.get("name"),
        start_date: parse_date(&row.get::<String, _>("start_date"))?,
        end_date: parse_date(&row.get::<String, _>("end_date"))?,
        average_efficiency: row.get("average_efficiency"),
        average_pace: row.get("average_pace"),
        efficiency_std_deviation: row.get("efficiency_std_deviation"),
        pace_std_deviation: row.get("pace_std_deviation"),
        current: row.get("current"),
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

pub async fn upsert_season(pool: &SqlitePool, season: &Season) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO seasons
        (id, year, name, start_date, end_date, average_efficiency, average_pace,
         efficiency_std_deviation, pace_std_deviation, current, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(year) DO UPDATE SET
            name = excluded.name,
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            average_efficiency = excluded.average_efficiency,
            average_pace = excluded.average_pace,
            efficiency_std_deviation = excluded.efficiency_std_deviation,
            pace_std_deviation = excluded.pace_std_deviation,
            current = excluded.current,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&season.id)
    .bind(season.year)
    .bind(&season.name)
    .bind(date_key(season.start_date))
    .bind(date_key(season.end_date))
    .bind(season.average_efficiency)
    .bind(season.average_pace)
    .bind(season.efficiency_std_deviation)
    .bind(season.pace_std_deviation)
    .bind(season.current)
    .bind(season.created_at.to_rfc3339())
    .bind(season.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_season_by_year(pool: &SqlitePool, year: i32) -> Result<Option<Season>> {
    let row = sqlx::query("SELECT * FROM seasons WHERE year = ?")
        .bind(year)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(season_from_row).transpose()
}

pub async fn get_season(pool: &SqlitePool, season_id: &str) -> Result<Option<Season>> {
    let row = sqlx::query("SELECT * FROM seasons WHERE id = ?")
        .bind(season_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(season_from_row).transpose()
}

/// The season flagged current, else the latest by year.
pub async fn get_current_season(pool: &SqlitePool) -> Result<Option<Season>> {
    let row = sqlx::query("SELECT * FROM seasons ORDER BY current DESC, year DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(season_from_row).transpose()
}

/// Resolve a season by year, falling back to the current one.
pub async fn resolve_season(pool: &SqlitePool, year: Option<i32>) -> Result<Season> {
    let season = match year {
        Some(year) => get_season_by_year(pool, year).await?,
        None => get_current_season(pool).await?,
    };
    season.ok_or_else(|| anyhow!("No season found; run `seed` or import games first"))
}

// Team operations

fn team_from_row(row: &SqliteRow) -> Result<Team> {
    Ok(Team {
        id: row.get("id"),
        name: row.get("name"),
        location: row.get("location"),
        home_venue: row.get("home_venue"),
        aliases: serde_json::from_str(&row.get::<String, _>("aliases"))?,
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

pub async fn upsert_team(pool: &SqlitePool, team: &Team) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO teams (id, name, location, home_venue, aliases, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            location = COALESCE(excluded.location, teams.location),
            home_venue = COALESCE(excluded.home_venue, teams.home_venue),
            aliases = excluded.aliases,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&team.id)
    .bind(&team.name)
    .bind(&team.location)
    .bind(&team.home_venue)
    .bind(serde_json::to_string(&team.aliases)?)
    .bind(team.created_at.to_rfc3339())
    .bind(team.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_all_teams(pool: &SqlitePool) -> Result<Vec<Team>> {
    let rows = sqlx::query("SELECT * FROM teams ORDER BY name")
        .fetch_all(pool)
        .await?;
    rows.iter().map(team_from_row).collect()
}

// Team season operations

fn team_season_from_row(row: &SqliteRow) -> Result<TeamSeason> {
    Ok(TeamSeason {
        id: row.get("id"),
        team_id: row.get("team_id"),
        season_id: row.get("season_id"),
        adj_offensive_efficiency: row.get("adj_offensive_efficiency"),
        adj_defensive_efficiency: row.get("adj_defensive_efficiency"),
        adj_pace: row.get("adj_pace"),
        rating: row.get("rating"),
        preseason_adj_offensive_efficiency: row.get("preseason_adj_offensive_efficiency"),
        preseason_adj_defensive_efficiency: row.get("preseason_adj_defensive_efficiency"),
        preseason_adj_pace: row.get("preseason_adj_pace"),
        offensive_efficiency_volatility: row.get("offensive_efficiency_volatility"),
        defensive_efficiency_volatility: row.get("defensive_efficiency_volatility"),
        pace_volatility: row.get("pace_volatility"),
        home_offense_boost: row.get("home_offense_boost"),
        home_defense_boost: row.get("home_defense_boost"),
        wins: row.get("wins"),
        losses: row.get("losses"),
        raw: serde_json::from_str(&row.get::<String, _>("raw_stats"))?,
        adjusted: serde_json::from_str(&row.get::<String, _>("adjusted_stats"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

pub async fn upsert_team_season(pool: &SqlitePool, ts: &TeamSeason) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO team_seasons
        (id, team_id, season_id, adj_offensive_efficiency, adj_defensive_efficiency, adj_pace, rating,
         preseason_adj_offensive_efficiency, preseason_adj_defensive_efficiency, preseason_adj_pace,
         offensive_efficiency_volatility, defensive_efficiency_volatility, pace_volatility,
         home_offense_boost, home_defense_boost, wins, losses, raw_stats, adjusted_stats, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(team_id, season_id) DO UPDATE SET
            adj_offensive_efficiency = excluded.adj_offensive_efficiency,
            adj_defensive_efficiency = excluded.adj_defensive_efficiency,
            adj_pace = excluded.adj_pace,
            rating = excluded.rating,
            preseason_adj_offensive_efficiency = excluded.preseason_adj_offensive_efficiency,
            preseason_adj_defensive_efficiency = excluded.preseason_adj_defensive_efficiency,
            preseason_adj_pace = excluded.preseason_adj_pace,
            offensive_efficiency_volatility = excluded.offensive_efficiency_volatility,
            defensive_efficiency_volatility = excluded.defensive_efficiency_volatility,
            pace_volatility = excluded.pace_volatility,
            home_offense_boost = excluded.home_offense_boost,
            home_defense_boost = excluded.home_defense_boost,
            wins = excluded.wins,
            losses = excluded.losses,
            raw_stats = excluded.raw_stats,
            adjusted_stats = excluded.adjusted_stats,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&ts.id)
    .bind(&ts.team_id)
    .bind(&ts.season_id)
    .bind(ts.adj_offensive_efficiency)
    .bind(ts.adj_defensive_efficiency)
    .bind(ts.adj_pace)
    .bind(ts.rating)
    .bind(ts.preseason_adj_offensive_efficiency)
    .bind(ts.preseason_adj_defensive_efficiency)
    .bind(ts.preseason_adj_pace)
    .bind(ts.offensive_efficiency_volatility)
    .bind(ts.defensive_efficiency_volatility)
    .bind(ts.pace_volatility)
    .bind(ts.home_offense_boost)
    .bind(ts.home_defense_boost)
    .bind(ts.wins)
    .bind(ts.losses)
    .bind(serde_json::to_string(&ts.raw)?)
    .bind(serde_json::to_string(&ts.adjusted)?)
    .bind(ts.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_team_seasons(pool: &SqlitePool, season_id: &str) -> Result<Vec<TeamSeason>> {
    let rows = sqlx::query("SELECT * FROM team_seasons WHERE season_id = ?")
        .bind(season_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(team_season_from_row).collect()
}

/// Existing team season for (team, season), or a fresh one seeded from defaults.
pub async fn ensure_team_season(
    pool: &SqlitePool,
    team_id: &str,
    season_id: &str,
    config: &RatingsConfig,
) -> Result<TeamSeason> {
    let row = sqlx::query("SELECT * FROM team_seasons WHERE team_id = ? AND season_id = ?")
        .bind(team_id)
        .bind(season_id)
        .fetch_optional(pool)
        .await?;
    if let Some(row) = row {
        return team_season_from_row(&row);
    }

    let team_season = TeamSeason::new(team_id, season_id, &config.season_defaults);
    upsert_team_season(pool, &team_season).await?;
    Ok(team_season)
}

/// Persist the season averages and every team season the engine touched.
pub async fn save_ratings(pool: &SqlitePool, slate: &SeasonSlate) -> Result<()> {
    upsert_season(pool, &slate.season).await?;
    for team_season in &slate.team_seasons {
        upsert_team_season(pool, team_season).await?;
    }
    Ok(())
}

// Game operations

fn game_from_row(row: &SqliteRow) -> Result<Game> {
    let status: String = row.get("status");
    Ok(Game {
        id: row.get("id"),
        season_id: row.get("season_id"),
        start_time: parse_time(&row.get::<String, _>("start_time"))?,
        home_team_id: row.get("home_team_id"),
        away_team_id: row.get("away_team_id"),
        home_team_name: row.get("home_team_name"),
        away_team_name: row.get("away_team_name"),
        home_team_score: row.get("home_team_score"),
        away_team_score: row.get("away_team_score"),
        location: row.get("location"),
        neutral: row.get("neutral"),
        status: GameStatus::parse(&status).ok_or_else(|| anyhow!("Unknown game status '{}'", status))?,
        possessions: row.get("possessions"),
        minutes: row.get("minutes"),
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

pub async fn upsert_game(pool: &SqlitePool, game: &Game) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO games
        (id, season_id, start_time, home_team_id, away_team_id, home_team_name, away_team_name,
         home_team_score, away_team_score, location, neutral, status, possessions, minutes,
         created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            start_time = excluded.start_time,
            home_team_score = excluded.home_team_score,
            away_team_score = excluded.away_team_score,
            location = excluded.location,
            neutral = excluded.neutral,
            status = excluded.status,
            possessions = excluded.possessions,
            minutes = excluded.minutes,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&game.id)
    .bind(&game.season_id)
    .bind(game.start_time.to_rfc3339())
    .bind(&game.home_team_id)
    .bind(&game.away_team_id)
    .bind(&game.home_team_name)
    .bind(&game.away_team_name)
    .bind(game.home_team_score)
    .bind(game.away_team_score)
    .bind(&game.location)
    .bind(game.neutral)
    .bind(game.status.as_str())
    .bind(game.possessions)
    .bind(game.minutes)
    .bind(game.created_at.to_rfc3339())
    .bind(game.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_games(pool: &SqlitePool, season_id: &str) -> Result<Vec<Game>> {
    let rows = sqlx::query("SELECT * FROM games WHERE season_id = ? ORDER BY start_time ASC")
        .bind(season_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(game_from_row).collect()
}

pub async fn get_game(pool: &SqlitePool, game_id: &str) -> Result<Option<Game>> {
    let row = sqlx::query("SELECT * FROM games WHERE id = ?")
        .bind(game_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(game_from_row).transpose()
}

fn team_game_from_row(row: &SqliteRow) -> Result<TeamGame> {
    Ok(TeamGame {
        id: row.get("id"),
        game_id: row.get("game_id"),
        team_id: row.get("team_id"),
        team_season_id: row.get("team_season_id"),
        opponent_team_season_id: row.get("opponent_team_season_id"),
        home: row.get("home"),
        box_score: serde_json::from_str(&row.get::<String, _>("box_score"))?,
        rates: serde_json::from_str(&row.get::<String, _>("rates"))?,
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
    })
}

pub async fn upsert_team_game(pool: &SqlitePool, team_game: &TeamGame) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO team_games
        (id, game_id, team_id, team_season_id, opponent_team_season_id, home, box_score, rates, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(game_id, team_id) DO UPDATE SET
            opponent_team_season_id = excluded.opponent_team_season_id,
            box_score = excluded.box_score,
            rates = excluded.rates
        "#,
    )
    .bind(&team_game.id)
    .bind(&team_game.game_id)
    .bind(&team_game.team_id)
    .bind(&team_game.team_season_id)
    .bind(&team_game.opponent_team_season_id)
    .bind(team_game.home)
    .bind(serde_json::to_string(&team_game.box_score)?)
    .bind(serde_json::to_string(&team_game.rates)?)
    .bind(team_game.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_team_games(pool: &SqlitePool, season_id: &str) -> Result<Vec<TeamGame>> {
    let rows = sqlx::query(
        r#"SELECT tg.* FROM team_games tg
           JOIN games g ON g.id = tg.game_id
           WHERE g.season_id = ?
           ORDER BY g.start_time ASC"#,
    )
    .bind(season_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(team_game_from_row).collect()
}

/// Write back a game and both of its box-score rows after finalization.
pub async fn save_finalized_game(pool: &SqlitePool, slate: &SeasonSlate, game_id: &str) -> Result<()> {
    let game = slate
        .games
        .iter()
        .find(|g| g.id == game_id)
        .ok_or_else(|| RatingsError::UnknownGame(game_id.to_string()))?;
    upsert_game(pool, game).await?;
    for team_game in slate.team_games.iter().filter(|tg| tg.game_id == game_id) {
        upsert_team_game(pool, team_game).await?;
    }
    Ok(())
}

// Ratings config versions

fn config_version_from_row(row: &SqliteRow) -> Result<RatingsConfigVersion> {
    Ok(RatingsConfigVersion {
        id: row.get("id"),
        name: row.get("name"),
        config: serde_json::from_str(&row.get::<String, _>("config"))?,
        current: row.get("current"),
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
    })
}

pub async fn count_snapshots(pool: &SqlitePool, config_version_id: &str) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM team_rating_snapshots WHERE ratings_config_version_id = ?")
        .bind(config_version_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("count"))
}

/// Register `config` under its bundle name and mark it current.
///
/// A name that already has snapshots is frozen: registering different
/// contents under it fails with `FrozenConfigVersion`.
pub async fn register_config_version(pool: &SqlitePool, config: &RatingsConfig) -> Result<RatingsConfigVersion> {
    let existing = sqlx::query("SELECT * FROM ratings_config_versions WHERE name = ?")
        .bind(&config.bundle_name)
        .fetch_optional(pool)
        .await?;

    let version = match existing {
        Some(row) => {
            let mut version = config_version_from_row(&row)?;
            if version.config != *config {
                if count_snapshots(pool, &version.id).await? > 0 {
                    return Err(RatingsError::FrozenConfigVersion(version.name).into());
                }
                sqlx::query("UPDATE ratings_config_versions SET config = ? WHERE id = ?")
                    .bind(serde_json::to_string(config)?)
                    .bind(&version.id)
                    .execute(pool)
                    .await?;
                tracing::info!("Updated unused ratings config version '{}'", version.name);
                version.config = config.clone();
            }
            version
        }
        None => {
            let version = RatingsConfigVersion {
                id: uuid::Uuid::new_v4().to_string(),
                name: config.bundle_name.clone(),
                config: config.clone(),
                current: true,
                created_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO ratings_config_versions (id, name, config, current, created_at) VALUES (?, ?, ?, 0, ?)",
            )
            .bind(&version.id)
            .bind(&version.name)
            .bind(serde_json::to_string(&version.config)?)
            .bind(version.created_at.to_rfc3339())
            .execute(pool)
            .await?;
            tracing::info!("Registered ratings config version '{}'", version.name);
            version
        }
    };

    sqlx::query("UPDATE ratings_config_versions SET current = (id = ?)")
        .bind(&version.id)
        .execute(pool)
        .await?;

    Ok(RatingsConfigVersion {
        current: true,
        ..version
    })
}

// Snapshot operations

fn snapshot_from_row(row: &SqliteRow) -> Result<TeamRatingSnapshot> {
    Ok(TeamRatingSnapshot {
        id: row.get("id"),
        team_id: row.get("team_id"),
        season_id: row.get("season_id"),
        team_season_id: row.get("team_season_id"),
        ratings_config_version_id: row.get("ratings_config_version_id"),
        snapshot_date: parse_date(&row.get::<String, _>("snapshot_date"))?,
        rating: row.get("rating"),
        adj_offensive_efficiency: row.get("adj_offensive_efficiency"),
        adj_defensive_efficiency: row.get("adj_defensive_efficiency"),
        adj_pace: row.get("adj_pace"),
        offensive_efficiency_volatility: row.get("offensive_efficiency_volatility"),
        defensive_efficiency_volatility: row.get("defensive_efficiency_volatility"),
        pace_volatility: row.get("pace_volatility"),
        home_offense_boost: row.get("home_offense_boost"),
        home_defense_boost: row.get("home_defense_boost"),
        wins: row.get("wins"),
        losses: row.get("losses"),
        factors: serde_json::from_str(&row.get::<String, _>("factors"))?,
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
    })
}

/// Idempotent per (team, date, version). Returns the id of the stored row,
/// which is the existing id when the snapshot already existed.
pub async fn upsert_snapshot(pool: &SqlitePool, snapshot: &TeamRatingSnapshot) -> Result<String> {
    let row = sqlx::query(
        r#"
        INSERT INTO team_rating_snapshots
        (id, team_id, season_id, team_season_id, ratings_config_version_id, snapshot_date, rating,
         adj_offensive_efficiency, adj_defensive_efficiency, adj_pace,
         offensive_efficiency_volatility, defensive_efficiency_volatility, pace_volatility,
         home_offense_boost, home_defense_boost, wins, losses, factors, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(team_id, snapshot_date, ratings_config_version_id) DO UPDATE SET
            rating = excluded.rating,
            adj_offensive_efficiency = excluded.adj_offensive_efficiency,
            adj_defensive_efficiency = excluded.adj_defensive_efficiency,
            adj_pace = excluded.adj_pace,
            offensive_efficiency_volatility = excluded.offensive_efficiency_volatility,
            defensive_efficiency_volatility = excluded.defensive_efficiency_volatility,
            pace_volatility = excluded.pace_volatility,
            home_offense_boost = excluded.home_offense_boost,
            home_defense_boost = excluded.home_defense_boost,
            wins = excluded.wins,
            losses = excluded.losses,
            factors = excluded.factors
        RETURNING id
        "#,
    )
    .bind(&snapshot.id)
    .bind(&snapshot.team_id)
    .bind(&snapshot.season_id)
    .bind(&snapshot.team_season_id)
    .bind(&snapshot.ratings_config_version_id)
    .bind(date_key(snapshot.snapshot_date))
    .bind(snapshot.rating)
    .bind(snapshot.adj_offensive_efficiency)
    .bind(snapshot.adj_defensive_efficiency)
    .bind(snapshot.adj_pace)
    .bind(snapshot.offensive_efficiency_volatility)
    .bind(snapshot.defensive_efficiency_volatility)
    .bind(snapshot.pace_volatility)
    .bind(snapshot.home_offense_boost)
    .bind(snapshot.home_defense_boost)
    .bind(snapshot.wins)
    .bind(snapshot.losses)
    .bind(serde_json::to_string(&snapshot.factors)?)
    .bind(snapshot.created_at.to_rfc3339())
    .fetch_one(pool)
    .await?;

    Ok(row.get("id"))
}

pub async fn get_snapshots(pool: &SqlitePool, season_id: &str, config_version_id: &str) -> Result<Vec<TeamRatingSnapshot>> {
    let rows = sqlx::query(
        r#"SELECT * FROM team_rating_snapshots
           WHERE season_id = ? AND ratings_config_version_id = ?
           ORDER BY snapshot_date ASC, team_id ASC"#,
    )
    .bind(season_id)
    .bind(config_version_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(snapshot_from_row).collect()
}

/// Latest snapshot for a team dated on or before `date` under one version.
pub async fn get_latest_snapshot(
    pool: &SqlitePool,
    team_id: &str,
    config_version_id: &str,
    date: NaiveDate,
) -> Result<Option<TeamRatingSnapshot>> {
    let row = sqlx::query(
        r#"SELECT * FROM team_rating_snapshots
           WHERE team_id = ? AND ratings_config_version_id = ? AND snapshot_date <= ?
           ORDER BY snapshot_date DESC LIMIT 1"#,
    )
    .bind(team_id)
    .bind(config_version_id)
    .bind(date_key(date))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(snapshot_from_row).transpose()
}

// Prediction operations

fn prediction_from_row(row: &SqliteRow) -> Result<Prediction> {
    Ok(Prediction {
        id: row.get("id"),
        game_id: row.get("game_id"),
        ratings_config_version_id: row.get("ratings_config_version_id"),
        home_team_snapshot_id: row.get("home_team_snapshot_id"),
        away_team_snapshot_id: row.get("away_team_snapshot_id"),
        home_offensive_efficiency: row.get("home_offensive_efficiency"),
        away_offensive_efficiency: row.get("away_offensive_efficiency"),
        home_defensive_efficiency: row.get("home_defensive_efficiency"),
        away_defensive_efficiency: row.get("away_defensive_efficiency"),
        pace: row.get("pace"),
        home_score: row.get("home_score"),
        away_score: row.get("away_score"),
        home_win_probability: row.get("home_win_probability"),
        margin_std_deviation: row.get("margin_std_deviation"),
        confidence_level: row.get("confidence_level"),
        home_offensive_efficiency_error: row.get("home_offensive_efficiency_error"),
        away_offensive_efficiency_error: row.get("away_offensive_efficiency_error"),
        home_defensive_efficiency_error: row.get("home_defensive_efficiency_error"),
        away_defensive_efficiency_error: row.get("away_defensive_efficiency_error"),
        pace_error: row.get("pace_error"),
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

/// Idempotent per (game, home snapshot, away snapshot); returns the stored id.
/// Error columns are only ever filled in, and once a game has been graded
/// (`pace_error` set) the predicted values stay as they were.
pub async fn upsert_prediction(pool: &SqlitePool, prediction: &Prediction) -> Result<String> {
    let row = sqlx::query(
        r#"
        INSERT INTO predictions
        (id, game_id, ratings_config_version_id, home_team_snapshot_id, away_team_snapshot_id,
         home_offensive_efficiency, away_offensive_efficiency, home_defensive_efficiency,
         away_defensive_efficiency, pace, home_score, away_score, home_win_probability,
         margin_std_deviation, confidence_level, home_offensive_efficiency_error,
         away_offensive_efficiency_error, home_defensive_efficiency_error,
         away_defensive_efficiency_error, pace_error, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(game_id, home_team_snapshot_id, away_team_snapshot_id) DO UPDATE SET
            home_offensive_efficiency = CASE WHEN predictions.pace_error IS NULL THEN excluded.home_offensive_efficiency ELSE predictions.home_offensive_efficiency END,
            away_offensive_efficiency = CASE WHEN predictions.pace_error IS NULL THEN excluded.away_offensive_efficiency ELSE predictions.away_offensive_efficiency END,
            home_defensive_efficiency = CASE WHEN predictions.pace_error IS NULL THEN excluded.home_defensive_efficiency ELSE predictions.home_defensive_efficiency END,
            away_defensive_efficiency = CASE WHEN predictions.pace_error IS NULL THEN excluded.away_defensive_efficiency ELSE predictions.away_defensive_efficiency END,
            pace = CASE WHEN predictions.pace_error IS NULL THEN excluded.pace ELSE predictions.pace END,
            home_score = CASE WHEN predictions.pace_error IS NULL THEN excluded.home_score ELSE predictions.home_score END,
            away_score = CASE WHEN predictions.pace_error IS NULL THEN excluded.away_score ELSE predictions.away_score END,
            home_win_probability = CASE WHEN predictions.pace_error IS NULL THEN excluded.home_win_probability ELSE predictions.home_win_probability END,
            margin_std_deviation = CASE WHEN predictions.pace_error IS NULL THEN excluded.margin_std_deviation ELSE predictions.margin_std_deviation END,
            confidence_level = CASE WHEN predictions.pace_error IS NULL THEN excluded.confidence_level ELSE predictions.confidence_level END,
            home_offensive_efficiency_error = COALESCE(excluded.home_offensive_efficiency_error, predictions.home_offensive_efficiency_error),
            away_offensive_efficiency_error = COALESCE(excluded.away_offensive_efficiency_error, predictions.away_offensive_efficiency_error),
            home_defensive_efficiency_error = COALESCE(excluded.home_defensive_efficiency_error, predictions.home_defensive_efficiency_error),
            away_defensive_efficiency_error = COALESCE(excluded.away_defensive_efficiency_error, predictions.away_defensive_efficiency_error),
            pace_error = COALESCE(excluded.pace_error, predictions.pace_error),
            updated_at = CASE WHEN predictions.pace_error IS NULL OR excluded.pace_error IS NOT NULL
                THEN excluded.updated_at ELSE predictions.updated_at END
        RETURNING id
        "#,
    )
    .bind(&prediction.id)
    .bind(&prediction.game_id)
    .bind(&prediction.ratings_config_version_id)
    .bind(&prediction.home_team_snapshot_id)
    .bind(&prediction.away_team_snapshot_id)
    .bind(prediction.home_offensive_efficiency)
    .bind(prediction.away_offensive_efficiency)
    .bind(prediction.home_defensive_efficiency)
    .bind(prediction.away_defensive_efficiency)
    .bind(prediction.pace)
    .bind(prediction.home_score)
    .bind(prediction.away_score)
    .bind(prediction.home_win_probability)
    .bind(prediction.margin_std_deviation)
    .bind(&prediction.confidence_level)
    .bind(prediction.home_offensive_efficiency_error)
    .bind(prediction.away_offensive_efficiency_error)
    .bind(prediction.home_defensive_efficiency_error)
    .bind(prediction.away_defensive_efficiency_error)
    .bind(prediction.pace_error)
    .bind(prediction.created_at.to_rfc3339())
    .bind(prediction.updated_at.to_rfc3339())
    .fetch_one(pool)
    .await?;

    Ok(row.get("id"))
}

pub async fn get_predictions(pool: &SqlitePool, season_id: &str) -> Result<Vec<Prediction>> {
    let rows = sqlx::query(
        r#"SELECT p.* FROM predictions p
           JOIN games g ON g.id = p.game_id
           WHERE g.season_id = ?
           ORDER BY g.start_time ASC"#,
    )
    .bind(season_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(prediction_from_row).collect()
}

/// The prediction built from the latest snapshots under a version.
pub async fn get_latest_prediction(pool: &SqlitePool, game_id: &str, config_version_id: &str) -> Result<Option<Prediction>> {
    let row = sqlx::query(
        r#"SELECT * FROM predictions
           WHERE game_id = ? AND ratings_config_version_id = ?
           ORDER BY updated_at DESC LIMIT 1"#,
    )
    .bind(game_id)
    .bind(config_version_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(prediction_from_row).transpose()
}

// Market odds operations

fn game_odd_from_row(row: &SqliteRow) -> Result<GameOdd> {
    Ok(GameOdd {
        id: row.get("id"),
        game_id: row.get("game_id"),
        fetched_at: parse_time(&row.get::<String, _>("fetched_at"))?,
        moneyline_home: row.get("moneyline_home"),
        moneyline_away: row.get("moneyline_away"),
        spread_point: row.get("spread_point"),
        spread_home_odds: row.get("spread_home_odds"),
        spread_away_odds: row.get("spread_away_odds"),
        total_points: row.get("total_points"),
        total_over_odds: row.get("total_over_odds"),
        total_under_odds: row.get("total_under_odds"),
    })
}

/// One consensus line per game; returns the stored id.
pub async fn upsert_game_odd(pool: &SqlitePool, odd: &GameOdd) -> Result<String> {
    let row = sqlx::query(
        r#"
        INSERT INTO game_odds
        (id, game_id, fetched_at, moneyline_home, moneyline_away, spread_point, spread_home_odds,
         spread_away_odds, total_points, total_over_odds, total_under_odds)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(game_id) DO UPDATE SET
            fetched_at = excluded.fetched_at,
            moneyline_home = excluded.moneyline_home,
            moneyline_away = excluded.moneyline_away,
            spread_point = excluded.spread_point,
            spread_home_odds = excluded.spread_home_odds,
            spread_away_odds = excluded.spread_away_odds,
            total_points = excluded.total_points,
            total_over_odds = excluded.total_over_odds,
            total_under_odds = excluded.total_under_odds
        RETURNING id
        "#,
    )
    .bind(&odd.id)
    .bind(&odd.game_id)
    .bind(odd.fetched_at.to_rfc3339())
    .bind(odd.moneyline_home)
    .bind(odd.moneyline_away)
    .bind(odd.spread_point)
    .bind(odd.spread_home_odds)
    .bind(odd.spread_away_odds)
    .bind(odd.total_points)
    .bind(odd.total_over_odds)
    .bind(odd.total_under_odds)
    .fetch_one(pool)
    .await?;

    Ok(row.get("id"))
}

pub async fn get_game_odd(pool: &SqlitePool, game_id: &str) -> Result<Option<GameOdd>> {
    let row = sqlx::query("SELECT * FROM game_odds WHERE game_id = ?")
        .bind(game_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(game_odd_from_row).transpose()
}

// Bet recommendation operations

fn recommendation_from_row(row: &SqliteRow) -> Result<BetRecommendation> {
    let bet_type: String = row.get("bet_type");
    Ok(BetRecommendation {
        id: row.get("id"),
        game_id: row.get("game_id"),
        prediction_id: row.get("prediction_id"),
        game_odd_id: row.get("game_odd_id"),
        ratings_config_version_id: row.get("ratings_config_version_id"),
        bet_type: BetType::parse(&bet_type).ok_or_else(|| anyhow!("Unknown bet type '{}'", bet_type))?,
        team: row.get::<Option<String>, _>("team").as_deref().and_then(BetSide::parse),
        vegas_line: row.get("vegas_line"),
        vegas_odds: row.get("vegas_odds"),
        model_value: row.get("model_value"),
        probability: row.get("probability"),
        ev: row.get("ev"),
        recommended: row.get("recommended"),
        result: row.get::<Option<String>, _>("result").as_deref().and_then(BetResult::parse),
        payout: row.get("payout"),
        created_at: parse_time(&row.get::<String, _>("created_at"))?,
        updated_at: parse_time(&row.get::<String, _>("updated_at"))?,
    })
}

/// Regenerating for the same (prediction, odds, bet type) overwrites the row.
pub async fn upsert_recommendation(pool: &SqlitePool, rec: &BetRecommendation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bet_recommendations
        (id, game_id, prediction_id, game_odd_id, ratings_config_version_id, bet_type, team,
         vegas_line, vegas_odds, model_value, probability, ev, recommended, result, payout,
         created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(prediction_id, game_odd_id, bet_type) DO UPDATE SET
            team = excluded.team,
            vegas_line = excluded.vegas_line,
            vegas_odds = excluded.vegas_odds,
            model_value = excluded.model_value,
            probability = excluded.probability,
            ev = excluded.ev,
            recommended = excluded.recommended,
            result = excluded.result,
            payout = excluded.payout,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&rec.id)
    .bind(&rec.game_id)
    .bind(&rec.prediction_id)
    .bind(&rec.game_odd_id)
    .bind(&rec.ratings_config_version_id)
    .bind(rec.bet_type.as_str())
    .bind(rec.team.map(|side| side.as_str()))
    .bind(rec.vegas_line)
    .bind(rec.vegas_odds)
    .bind(rec.model_value)
    .bind(rec.probability)
    .bind(rec.ev)
    .bind(rec.recommended)
    .bind(rec.result.map(|result| result.as_str()))
    .bind(rec.payout)
    .bind(rec.created_at.to_rfc3339())
    .bind(rec.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_recommendations(pool: &SqlitePool, game_id: &str) -> Result<Vec<BetRecommendation>> {
    let rows = sqlx::query("SELECT * FROM bet_recommendations WHERE game_id = ? ORDER BY bet_type")
        .bind(game_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(recommendation_from_row).collect()
}

// Offseason profiles

pub async fn upsert_offseason_profile(pool: &SqlitePool, profile: &TeamOffseasonProfile) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO team_offseason_profiles
        (id, team_season_id, recruiting_score, returning_minutes_pct, manual_adjustment)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(team_season_id) DO UPDATE SET
            recruiting_score = excluded.recruiting_score,
            returning_minutes_pct = excluded.returning_minutes_pct,
            manual_adjustment = excluded.manual_adjustment
        "#,
    )
    .bind(&profile.id)
    .bind(&profile.team_season_id)
    .bind(profile.recruiting_score)
    .bind(profile.returning_minutes_pct)
    .bind(profile.manual_adjustment)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_offseason_profiles(pool: &SqlitePool, season_id: &str) -> Result<Vec<TeamOffseasonProfile>> {
    let rows = sqlx::query(
        r#"SELECT p.* FROM team_offseason_profiles p
           JOIN team_seasons ts ON ts.id = p.team_season_id
           WHERE ts.season_id = ?"#,
    )
    .bind(season_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| TeamOffseasonProfile {
            id: row.get("id"),
            team_season_id: row.get("team_season_id"),
            recruiting_score: row.get("recruiting_score"),
            returning_minutes_pct: row.get("returning_minutes_pct"),
            manual_adjustment: row.get("manual_adjustment"),
        })
        .collect())
}

// Slate loading

/// Read everything the engine needs for one season in a single pass.
pub async fn load_slate(pool: &SqlitePool, season_id: &str) -> Result<SeasonSlate> {
    let season = get_season(pool, season_id)
        .await?
        .ok_or_else(|| anyhow!("Unknown season {}", season_id))?;

    Ok(SeasonSlate {
        season,
        teams: get_all_teams(pool).await?,
        team_seasons: get_team_seasons(pool, season_id).await?,
        games: get_games(pool, season_id).await?,
        team_games: get_team_games(pool, season_id).await?,
        predictions: get_predictions(pool, season_id).await?,
    })
}

// Backfill progress

pub async fn mark_date_complete(pool: &SqlitePool, season_id: &str, config_version_id: &str, date: NaiveDate) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO backfill_progress (season_id, ratings_config_version_id, date, completed_at)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(season_id, ratings_config_version_id, date) DO UPDATE SET
               completed_at = excluded.completed_at"#,
    )
    .bind(season_id)
    .bind(config_version_id)
    .bind(date_key(date))
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn last_completed_date(pool: &SqlitePool, season_id: &str, config_version_id: &str) -> Result<Option<NaiveDate>> {
    let row = sqlx::query(
        "SELECT MAX(date) AS last_date FROM backfill_progress WHERE season_id = ? AND ratings_config_version_id = ?",
    )
    .bind(season_id)
    .bind(config_version_id)
    .fetch_one(pool)
    .await?;

    row.get::<Option<String>, _>("last_date")
        .as_deref()
        .map(parse_date)
        .transpose()
}

/// Delete every output of one config version for a season.
pub async fn clear_version_outputs(pool: &SqlitePool, season_id: &str, config_version_id: &str) -> Result<()> {
    sqlx::query(
        r#"DELETE FROM bet_recommendations
           WHERE ratings_config_version_id = ?
             AND game_id IN (SELECT id FROM games WHERE season_id = ?)"#,
    )
    .bind(config_version_id)
    .bind(season_id)
    .execute(pool)
    .await?;
    sqlx::query(
        r#"DELETE FROM predictions
           WHERE ratings_config_version_id = ?
             AND game_id IN (SELECT id FROM games WHERE season_id = ?)"#,
    )
    .bind(config_version_id)
    .bind(season_id)
    .execute(pool)
    .await?;
    sqlx::query("DELETE FROM team_rating_snapshots WHERE ratings_config_version_id = ? AND season_id = ?")
        .bind(config_version_id)
        .bind(season_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM backfill_progress WHERE ratings_config_version_id = ? AND season_id = ?")
        .bind(config_version_id)
        .bind(season_id)
        .execute(pool)
        .await?;

    tracing::info!("Cleared snapshots, predictions and progress for season {}", season_id);
    Ok(())
}

pub async fn clear_all_data(pool: &SqlitePool) -> Result<()> {
    for table in [
        "bet_recommendations",
        "game_odds",
        "predictions",
        "team_rating_snapshots",
        "backfill_progress",
        "team_games",
        "games",
        "team_offseason_profiles",
        "team_seasons",
        "ratings_config_versions",
        "teams",
        "seasons",
    ] {
        sqlx::query(&format!("DELETE FROM {}", table)).execute(pool).await?;
    }
    tracing::info!("All data cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_pool() -> (SqlitePool, RatingsConfigVersion) {
        let pool = memory_pool().await.unwrap();
        seed_data(&pool).await.unwrap();
        let version = register_config_version(&pool, &RatingsConfig::default()).await.unwrap();
        (pool, version)
    }

    #[tokio::test]
    async fn test_snapshot_upsert_keeps_one_row() {
        let (pool, version) = seeded_pool().await;
        let season = resolve_season(&pool, None).await.unwrap();
        let team_season = get_team_seasons(&pool, &season.id).await.unwrap().remove(0);
        let date = season.start_date;

        let mut first = crate::services::SnapshotBuilder::build(&team_season, date, &version.id);
        let first_id = upsert_snapshot(&pool, &first).await.unwrap();
        first.adj_pace += 1.0;
        let second = crate::services::SnapshotBuilder::build(&team_season, date, &version.id);
        let second_id = upsert_snapshot(&pool, &second).await.unwrap();

        assert_eq!(first_id, second_id);
        let stored = get_snapshots(&pool, &season.id, &version.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(count_snapshots(&pool, &version.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_config_version_freezes_once_used() {
        let (pool, version) = seeded_pool().await;
        let season = resolve_season(&pool, None).await.unwrap();

        // Unused versions may still change
        let mut config = RatingsConfig::default();
        config.home_court_advantage = 2.0;
        let updated = register_config_version(&pool, &config).await.unwrap();
        assert_eq!(updated.id, version.id);
        assert_eq!(updated.config.home_court_advantage, 2.0);

        let team_season = get_team_seasons(&pool, &season.id).await.unwrap().remove(0);
        let snapshot = crate::services::SnapshotBuilder::build(&team_season, season.start_date, &version.id);
        upsert_snapshot(&pool, &snapshot).await.unwrap();

        config.home_court_advantage = 3.0;
        let err = register_config_version(&pool, &config).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RatingsError>(),
            Some(RatingsError::FrozenConfigVersion(_))
        ));

        // Re-registering identical contents is fine
        config.home_court_advantage = 2.0;
        assert!(register_config_version(&pool, &config).await.is_ok());
    }

    #[tokio::test]
    async fn test_load_slate_round_trips_seed() {
        let (pool, _) = seeded_pool().await;
        let season = resolve_season(&pool, None).await.unwrap();
        let slate = load_slate(&pool, &season.id).await.unwrap();

        assert!(!slate.teams.is_empty());
        assert_eq!(slate.team_seasons.len(), slate.teams.len());
        assert!(slate.games.iter().all(|g| g.status == GameStatus::Scheduled));
        for game in &slate.games {
            let rows = slate.team_games.iter().filter(|tg| tg.game_id == game.id).count();
            assert!(rows == 0 || rows == 2, "game {} has {} box scores", game.id, rows);
        }
        assert_eq!(slate.teams[0].aliases.is_empty(), false);
    }

    /// Snapshot both teams of the first game that has market odds and store
    /// a prediction for it.
    async fn predicted_game_with_odds(pool: &SqlitePool, version: &RatingsConfigVersion) -> (Game, GameOdd, Prediction) {
        let season = resolve_season(pool, None).await.unwrap();
        let mut priced = None;
        for game in get_games(pool, &season.id).await.unwrap() {
            if let Some(odds) = get_game_odd(pool, &game.id).await.unwrap() {
                priced = Some((game, odds));
                break;
            }
        }
        let (game, odds) = priced.unwrap();

        let team_seasons = get_team_seasons(pool, &season.id).await.unwrap();
        let date = game.game_date();
        let snapshot_for = |team_id: &str| {
            let ts = team_seasons.iter().find(|ts| ts.team_id == team_id).unwrap();
            crate::services::SnapshotBuilder::build(ts, date, &version.id)
        };
        let (home, away) = (snapshot_for(&game.home_team_id), snapshot_for(&game.away_team_id));
        upsert_snapshot(pool, &home).await.unwrap();
        upsert_snapshot(pool, &away).await.unwrap();

        let config = &version.config;
        let averages = SeasonAverages::defaults(&config.season_defaults, &config.baseline);
        let bundle = crate::services::GamePredictor::new(config, averages)
            .predict(Some(&home), Some(&away), game.is_neutral(), 1.0)
            .unwrap();
        let mut prediction = crate::services::PredictionBuilder::build(&game, &version.id, &bundle);
        prediction.id = upsert_prediction(pool, &prediction).await.unwrap();
        (game, odds, prediction)
    }

    #[tokio::test]
    async fn test_graded_prediction_is_not_overwritten() {
        let (pool, version) = seeded_pool().await;
        let (game, _, prediction) = predicted_game_with_odds(&pool, &version).await;

        // Ungraded rows still refresh in place
        let mut refreshed = prediction.clone();
        refreshed.id = uuid::Uuid::new_v4().to_string();
        refreshed.home_score += 1.0;
        assert_eq!(upsert_prediction(&pool, &refreshed).await.unwrap(), prediction.id);
        let stored = get_latest_prediction(&pool, &game.id, &version.id).await.unwrap().unwrap();
        assert_eq!(stored.home_score, refreshed.home_score);

        let mut graded = refreshed.clone();
        graded.home_offensive_efficiency_error = Some(-2.5);
        graded.pace_error = Some(1.25);
        upsert_prediction(&pool, &graded).await.unwrap();
        let graded_at = get_latest_prediction(&pool, &game.id, &version.id).await.unwrap().unwrap().updated_at;

        let mut rebuilt = prediction.clone();
        rebuilt.home_score = 10.0;
        rebuilt.home_win_probability = 0.01;
        rebuilt.updated_at = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(upsert_prediction(&pool, &rebuilt).await.unwrap(), prediction.id);

        let stored = get_latest_prediction(&pool, &game.id, &version.id).await.unwrap().unwrap();
        assert_eq!(stored.home_score, refreshed.home_score);
        assert_eq!(stored.home_win_probability, prediction.home_win_probability);
        assert_eq!(stored.home_offensive_efficiency_error, Some(-2.5));
        assert_eq!(stored.pace_error, Some(1.25));
        assert_eq!(stored.updated_at, graded_at);
        assert_eq!(get_predictions(&pool, &game.season_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_regenerated_recommendations_overwrite() {
        let (pool, version) = seeded_pool().await;
        let (game, odds, prediction) = predicted_game_with_odds(&pool, &version).await;
        let generator = crate::services::BetRecommendationGenerator::new(&version.config);

        let first = generator.generate(&prediction, &odds, &version.id);
        assert_eq!(first.len(), 3);
        for rec in &first {
            upsert_recommendation(&pool, rec).await.unwrap();
        }

        let mut shifted = prediction.clone();
        shifted.home_score += 6.0;
        shifted.home_win_probability = 1.0 - prediction.home_win_probability;
        let second = generator.generate(&shifted, &odds, &version.id);
        for rec in &second {
            upsert_recommendation(&pool, rec).await.unwrap();
        }

        let stored = get_recommendations(&pool, &game.id).await.unwrap();
        assert_eq!(stored.len(), 3);
        for rec in &second {
            let row = stored.iter().find(|r| r.bet_type == rec.bet_type).unwrap();
            assert_eq!(row.model_value, rec.model_value);
            assert_eq!(row.probability, rec.probability);
            assert_eq!(row.team, rec.team);
            assert_eq!(row.ev, rec.ev);
        }
    }

    #[tokio::test]
    async fn test_backfill_progress() {
        let (pool, version) = seeded_pool().await;
        let season = resolve_season(&pool, None).await.unwrap();
        assert_eq!(last_completed_date(&pool, &season.id, &version.id).await.unwrap(), None);

        let day = season.start_date;
        mark_date_complete(&pool, &season.id, &version.id, day).await.unwrap();
        mark_date_complete(&pool, &season.id, &version.id, day.succ_opt().unwrap()).await.unwrap();
        mark_date_complete(&pool, &season.id, &version.id, day).await.unwrap();
        assert_eq!(
            last_completed_date(&pool, &season.id, &version.id).await.unwrap(),
            day.succ_opt()
        );

        clear_version_outputs(&pool, &season.id, &version.id).await.unwrap();
        assert_eq!(last_completed_date(&pool, &season.id, &version.id).await.unwrap(), None);
    }
}
