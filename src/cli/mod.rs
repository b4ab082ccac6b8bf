use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::fs::File;
use uuid::Uuid;

use crate::config::RatingsConfig;
use crate::db;
use crate::models::*;
use crate::services::backfill::rate_slate;
use crate::services::stats_aggregator::TeamSeasonStatsAggregator;
use crate::services::team_matcher::MatchKind;
use crate::services::{
    cutoff_for, BackfillMode, BetRecommendationGenerator, BetSettlement, BookmakerLine, GameFinalizer, GamePredictor,
    GameSimulator, OddsConsensus, PredictionBuilder, PredictionBundle, PredictionEvaluator, RandSource, SeasonBackfill,
    SnapshotBuilder, TeamMatcher,
};
use crate::utils::{calculate_win_percentage, format_signed, implied_probability, normalize_name};

/// Tip time used when a feed only gives the game date.
const DATE_ONLY_TIP_HOUR: u32 = 12;

async fn open() -> Result<SqlitePool> {
    let pool = db::create_pool().await?;
    db::init_database_with_pool(&pool).await?;
    Ok(pool)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// League averages as of midnight on `date`. A season that has never been
/// rated has no stored averages, and that is an error here.
fn averages_as_of(slate: &SeasonSlate, config: &RatingsConfig, date: NaiveDate) -> Result<SeasonAverages> {
    SeasonAverages::from_season(&slate.season, config)?;
    Ok(TeamSeasonStatsAggregator::new(config).averages_as_of(slate, cutoff_for(date)))
}

async fn load_config(pool: &SqlitePool) -> Result<(RatingsConfig, RatingsConfigVersion)> {
    let config = RatingsConfig::load()?;
    let version = db::register_config_version(pool, &config).await?;
    Ok((config, version))
}

fn parse_start_time(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Unrecognized start time '{}'", value))?;
    date.and_hms_opt(DATE_ONLY_TIP_HOUR, 0, 0)
        .map(|time| time.and_utc())
        .ok_or_else(|| anyhow!("Unrecognized start time '{}'", value))
}

/// Match a feed name to a known team, creating the team when nothing matches.
async fn resolve_or_create_team(pool: &SqlitePool, teams: &mut Vec<Team>, name: &str) -> Result<Team> {
    if let Some(found) = TeamMatcher::new(teams.as_slice()).find(name) {
        if found.kind == MatchKind::Fuzzy {
            tracing::info!("Matched '{}' to {} (similarity {:.3})", name, found.team.name, found.score);
        }
        return Ok(found.team.clone());
    }

    let now = Utc::now();
    let team = Team {
        id: Uuid::new_v4().to_string(),
        name: name.trim().to_string(),
        location: None,
        home_venue: None,
        aliases: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    db::upsert_team(pool, &team).await?;
    tracing::info!("Created team '{}'", team.name);
    teams.push(team.clone());
    Ok(team)
}

pub async fn init_db() -> Result<()> {
    db::init_database().await?;
    println!("✅ Database initialized");
    Ok(())
}

pub async fn seed() -> Result<()> {
    let pool = open().await?;
    println!("🌱 Seeding demo season...");
    db::seed_data(&pool).await?;

    let season = db::resolve_season(&pool, None).await?;
    let teams = db::get_all_teams(&pool).await?;
    println!("✅ {} teams ready for the {} season", teams.len(), season.name);
    println!("💡 Next: prophet backfill --fresh");
    Ok(())
}

/// One side of one game, as exported by box-score feeds.
#[derive(Debug, Deserialize)]
struct BoxScoreRecord {
    game_id: String,
    start_time: String,
    team: String,
    opponent: String,
    home: bool,
    location: Option<String>,
    neutral: Option<bool>,
    points: i32,
    field_goals_made: i32,
    field_goals_attempted: i32,
    three_pt_made: i32,
    three_pt_attempted: i32,
    free_throws_made: i32,
    free_throws_attempted: i32,
    offensive_rebounds: i32,
    defensive_rebounds: i32,
    turnovers: i32,
    minutes: Option<i32>,
}

impl BoxScoreRecord {
    fn box_score(&self) -> BoxScore {
        BoxScore {
            points: self.points,
            field_goals_made: self.field_goals_made,
            field_goals_attempted: self.field_goals_attempted,
            three_pt_made: self.three_pt_made,
            three_pt_attempted: self.three_pt_attempted,
            free_throws_made: self.free_throws_made,
            free_throws_attempted: self.free_throws_attempted,
            offensive_rebounds: self.offensive_rebounds,
            defensive_rebounds: self.defensive_rebounds,
            turnovers: self.turnovers,
            minutes: self.minutes,
        }
    }
}

pub async fn import_games(path: &str, season_year: Option<i32>) -> Result<()> {
    let pool = open().await?;
    let config = RatingsConfig::load()?;
    let season = db::resolve_season(&pool, season_year).await?;
    let mut teams = db::get_all_teams(&pool).await?;

    println!("📥 Importing box scores from {} into {}...", path, season.name);

    let mut reader = csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path))?;
    let mut by_game: BTreeMap<String, Vec<BoxScoreRecord>> = BTreeMap::new();
    for record in reader.deserialize() {
        let record: BoxScoreRecord = record?;
        by_game.entry(record.game_id.clone()).or_default().push(record);
    }

    let mut imported = 0;
    let mut skipped = 0;
    for (game_id, sides) in &by_game {
        let (Some(home), Some(away)) = (sides.iter().find(|r| r.home), sides.iter().find(|r| !r.home)) else {
            tracing::warn!("Game {} needs one home and one away row; skipping", game_id);
            skipped += 1;
            continue;
        };

        let existing = db::get_game(&pool, game_id).await?;
        if let Some(game) = existing.as_ref().filter(|g| g.status != GameStatus::Scheduled) {
            tracing::info!("Game {} is already {}; skipping", game_id, game.status);
            skipped += 1;
            continue;
        }

        let home_team = resolve_or_create_team(&pool, &mut teams, &home.team).await?;
        let away_team = resolve_or_create_team(&pool, &mut teams, &away.team).await?;
        if normalize_name(&away.opponent) != normalize_name(&home.team) {
            tracing::warn!("Game {}: away row names opponent '{}', expected '{}'", game_id, away.opponent, home.team);
        }
        let home_season = db::ensure_team_season(&pool, &home_team.id, &season.id, &config).await?;
        let away_season = db::ensure_team_season(&pool, &away_team.id, &season.id, &config).await?;

        let now = Utc::now();
        let game = Game {
            id: game_id.clone(),
            season_id: season.id.clone(),
            start_time: parse_start_time(&home.start_time)?,
            home_team_id: home_team.id.clone(),
            away_team_id: away_team.id.clone(),
            home_team_name: home_team.name.clone(),
            away_team_name: away_team.name.clone(),
            home_team_score: None,
            away_team_score: None,
            location: home.location.clone(),
            neutral: home.neutral,
            status: GameStatus::Scheduled,
            possessions: None,
            minutes: None,
            created_at: existing.as_ref().map_or(now, |g| g.created_at),
            updated_at: now,
        };
        db::upsert_game(&pool, &game).await?;

        for (record, own, opponent) in [(home, &home_season, &away_season), (away, &away_season, &home_season)] {
            let row = TeamGame {
                id: Uuid::new_v4().to_string(),
                game_id: game.id.clone(),
                team_id: own.team_id.clone(),
                team_season_id: own.id.clone(),
                opponent_team_season_id: Some(opponent.id.clone()),
                home: record.home,
                box_score: record.box_score(),
                rates: GameRates::default(),
                created_at: now,
            };
            db::upsert_team_game(&pool, &row).await?;
        }
        imported += 1;
    }

    println!("✅ Imported {} games ({} skipped)", imported, skipped);
    Ok(())
}

/// One bookmaker's prices for one game; spread points are quoted for the home side.
#[derive(Debug, Deserialize)]
struct OddsRecord {
    date: NaiveDate,
    home_team: String,
    away_team: String,
    bookmaker: String,
    moneyline_home: Option<i32>,
    moneyline_away: Option<i32>,
    spread_point: Option<f64>,
    spread_home_odds: Option<i32>,
    spread_away_odds: Option<i32>,
    total_points: Option<f64>,
    total_over_odds: Option<i32>,
    total_under_odds: Option<i32>,
}

impl OddsRecord {
    fn line(&self) -> BookmakerLine {
        BookmakerLine {
            bookmaker: self.bookmaker.clone(),
            moneyline_home: self.moneyline_home,
            moneyline_away: self.moneyline_away,
            spread_point: self.spread_point,
            spread_home_odds: self.spread_home_odds,
            spread_away_odds: self.spread_away_odds,
            total_points: self.total_points,
            total_over_odds: self.total_over_odds,
            total_under_odds: self.total_under_odds,
        }
    }
}

pub async fn import_odds(path: &str, season_year: Option<i32>) -> Result<()> {
    let pool = open().await?;
    let season = db::resolve_season(&pool, season_year).await?;
    let teams = db::get_all_teams(&pool).await?;
    let games = db::get_games(&pool, &season.id).await?;
    let matcher = TeamMatcher::new(&teams);

    println!("💱 Importing bookmaker lines from {}...", path);

    let mut reader = csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path))?;
    let mut lines: BTreeMap<String, Vec<BookmakerLine>> = BTreeMap::new();
    let mut unmatched = 0;
    for record in reader.deserialize() {
        let record: OddsRecord = record?;
        let game = match (matcher.team(&record.home_team), matcher.team(&record.away_team)) {
            (Some(home), Some(away)) => games.iter().find(|g| {
                g.home_team_id == home.id && g.away_team_id == away.id && g.game_date() == record.date
            }),
            _ => None,
        };
        match game {
            Some(game) => lines.entry(game.id.clone()).or_default().push(record.line()),
            None => {
                tracing::warn!(
                    "No game for {} vs {} on {} ({})",
                    record.home_team,
                    record.away_team,
                    record.date,
                    record.bookmaker
                );
                unmatched += 1;
            }
        }
    }

    let fetched_at = Utc::now();
    for (game_id, book_lines) in &lines {
        let odd = OddsConsensus::consensus(game_id, book_lines, fetched_at);
        db::upsert_game_odd(&pool, &odd).await?;
    }

    println!("✅ Consensus lines stored for {} games ({} rows unmatched)", lines.len(), unmatched);
    Ok(())
}

#[derive(Debug, Deserialize)]
struct OffseasonRecord {
    team: String,
    recruiting_score: Option<f64>,
    returning_minutes_pct: Option<f64>,
    manual_adjustment: Option<f64>,
    home_offense_boost: Option<f64>,
    home_defense_boost: Option<f64>,
}

pub async fn import_offseason(path: &str, season_year: Option<i32>) -> Result<()> {
    let pool = open().await?;
    let config = RatingsConfig::load()?;
    let season = db::resolve_season(&pool, season_year).await?;
    let teams = db::get_all_teams(&pool).await?;
    let matcher = TeamMatcher::new(&teams);

    println!("📋 Importing offseason profiles for {}...", season.name);

    let mut reader = csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path))?;
    let mut imported = 0;
    for record in reader.deserialize() {
        let record: OffseasonRecord = record?;
        let Some(team) = matcher.team(&record.team) else {
            println!("   ⚠️  Unknown team '{}'", record.team);
            continue;
        };

        let mut team_season = db::ensure_team_season(&pool, &team.id, &season.id, &config).await?;
        let profile = TeamOffseasonProfile {
            id: Uuid::new_v4().to_string(),
            team_season_id: team_season.id.clone(),
            recruiting_score: record.recruiting_score,
            returning_minutes_pct: record.returning_minutes_pct,
            manual_adjustment: record.manual_adjustment,
        };
        db::upsert_offseason_profile(&pool, &profile).await?;

        if record.home_offense_boost.is_some() || record.home_defense_boost.is_some() {
            team_season.home_offense_boost = record.home_offense_boost.or(team_season.home_offense_boost);
            team_season.home_defense_boost = record.home_defense_boost.or(team_season.home_defense_boost);
            team_season.updated_at = Utc::now();
            db::upsert_team_season(&pool, &team_season).await?;
        }
        imported += 1;
    }

    println!("✅ Stored {} offseason profiles", imported);
    Ok(())
}

pub async fn preseason(season_year: Option<i32>) -> Result<()> {
    let pool = open().await?;
    let (config, version) = load_config(&pool).await?;
    let season = db::resolve_season(&pool, season_year).await?;

    println!("🧮 Seeding preseason ratings for {}...", season.name);
    SeasonBackfill::new(&pool, &config, &version)
        .initialize_preseason(&season.id)
        .await?;

    let slate = db::load_slate(&pool, &season.id).await?;
    print_ratings_table(&slate, usize::MAX);
    Ok(())
}

pub async fn ratings(season_year: Option<i32>, as_of: Option<NaiveDate>, top: usize) -> Result<()> {
    let pool = open().await?;
    let (config, version) = load_config(&pool).await?;
    let season = db::resolve_season(&pool, season_year).await?;
    let date = as_of.unwrap_or_else(today);
    let cutoff = cutoff_for(date);

    let mut slate = db::load_slate(&pool, &season.id).await?;
    slate
        .predictions
        .retain(|p| p.ratings_config_version_id == version.id);

    // Games played before the cutoff but never finalized
    let pending: Vec<String> = slate
        .games
        .iter()
        .filter(|g| g.status == GameStatus::Scheduled && g.start_time <= cutoff)
        .filter(|g| slate.team_games.iter().filter(|tg| tg.game_id == g.id).count() == 2)
        .map(|g| g.id.clone())
        .collect();
    let mut finalized = 0;
    for game_id in &pending {
        match GameFinalizer::finalize(&mut slate, game_id, None) {
            Ok(_) => {
                db::save_finalized_game(&pool, &slate, game_id).await?;
                finalized += 1;
            }
            Err(e) => println!("   ⚠️  {}", e),
        }
    }
    if finalized > 0 {
        println!("🏁 Finalized {} games", finalized);
    }

    let (averages, engine_ran) = rate_slate(&config, &mut slate, cutoff)?;
    db::save_ratings(&pool, &slate).await?;
    for snapshot in SnapshotBuilder::build_all(&slate.team_seasons, date, &version.id) {
        db::upsert_snapshot(&pool, &snapshot).await?;
    }

    println!(
        "📊 {} ratings as of {} (avg efficiency {:.1}, avg pace {:.1}){}",
        season.name,
        date,
        averages.average_efficiency,
        averages.average_pace,
        if engine_ran { "" } else { " - preseason seeds" }
    );
    print_ratings_table(&slate, top);
    Ok(())
}

fn print_ratings_table(slate: &SeasonSlate, top: usize) {
    let mut rows: Vec<&TeamSeason> = slate.team_seasons.iter().collect();
    rows.sort_by(|a, b| b.rating.total_cmp(&a.rating));

    println!("\n{:>3}  {:<24} {:>7} {:>7} {:>6} {:>7} {:>6}", "#", "Team", "AdjO", "AdjD", "Pace", "Net", "W-L");
    for (rank, ts) in rows.iter().take(top).enumerate() {
        println!(
            "{:>3}  {:<24} {:>7.1} {:>7.1} {:>6.1} {:>7} {:>6}",
            rank + 1,
            slate.team_name(&ts.team_id).unwrap_or("?"),
            ts.adj_offensive_efficiency,
            ts.adj_defensive_efficiency,
            ts.adj_pace,
            format_signed(ts.rating),
            format!("{}-{}", ts.wins, ts.losses)
        );
    }
}

pub async fn backfill(
    season_year: Option<i32>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    fresh: bool,
) -> Result<()> {
    let pool = open().await?;
    let (config, version) = load_config(&pool).await?;
    let season = db::resolve_season(&pool, season_year).await?;
    let mode = if fresh {
        BackfillMode::Fresh
    } else {
        BackfillMode::Resume
    };

    println!("⏪ Backfilling {} with '{}' ({:?})...", season.name, version.name, mode);
    let summary = SeasonBackfill::new(&pool, &config, &version)
        .run(&season.id, start, end, mode)
        .await?;

    println!("✅ Backfill complete:");
    println!("   Dates processed:   {}", summary.dates_processed);
    println!("   Engine runs:       {}", summary.engine_runs);
    println!("   Snapshots written: {}", summary.snapshots_written);
    println!("   Predictions:       {}", summary.predictions_written);
    println!("   Games finalized:   {}", summary.games_finalized);
    if summary.games_skipped > 0 {
        println!("   Games skipped:     {}", summary.games_skipped);
    }
    if summary.bets_settled > 0 {
        println!("   Bets settled:      {}", summary.bets_settled);
    }
    Ok(())
}

/// Predict every scheduled game on `date` from the snapshots dated on or
/// before it and store the predictions. Games already final keep the
/// prediction they were graded against.
async fn predict_games(
    pool: &SqlitePool,
    config: &RatingsConfig,
    version: &RatingsConfigVersion,
    slate: &SeasonSlate,
    date: NaiveDate,
    upset_modifier: f64,
) -> Result<Vec<(Game, PredictionBundle)>> {
    let predictor = GamePredictor::new(config, averages_as_of(slate, config, date)?);

    let mut predicted = Vec::new();
    for game in slate
        .games
        .iter()
        .filter(|g| g.game_date() == date && g.status == GameStatus::Scheduled)
    {
        let home = db::get_latest_snapshot(pool, &game.home_team_id, &version.id, date).await?;
        let away = db::get_latest_snapshot(pool, &game.away_team_id, &version.id, date).await?;
        let bundle = match predictor.predict(home.as_ref(), away.as_ref(), game.is_neutral(), upset_modifier) {
            Ok(bundle) => bundle,
            Err(e) => {
                println!("⚠️  {} at {}: {}", game.away_team_name, game.home_team_name, e);
                continue;
            }
        };

        let prediction = PredictionBuilder::build(game, &version.id, &bundle);
        db::upsert_prediction(pool, &prediction).await?;
        predicted.push((game.clone(), bundle));
    }
    Ok(predicted)
}

pub async fn predict(season_year: Option<i32>, date: Option<NaiveDate>, upset_modifier: f64) -> Result<()> {
    let pool = open().await?;
    let (config, version) = load_config(&pool).await?;
    let season = db::resolve_season(&pool, season_year).await?;
    let date = date.unwrap_or_else(today);
    let slate = db::load_slate(&pool, &season.id).await?;

    let predicted = predict_games(&pool, &config, &version, &slate, date, upset_modifier).await?;

    println!("🔮 Predictions for {} ({} games)\n", date, predicted.len());
    if predicted.is_empty() {
        println!("📭 No scheduled games on {}", date);
        return Ok(());
    }

    for (game, bundle) in &predicted {
        println!(
            "{} {} {:.1} - {} {:.1}",
            if bundle.neutral { "🏟️ " } else { "🏠" },
            game.home_team_name,
            bundle.home_expected_score,
            game.away_team_name,
            bundle.away_expected_score
        );
        println!(
            "   Home win: {:.1}% | Total: {:.1} | Pace: {:.1} | Confidence: {}",
            bundle.win_probability_home * 100.0,
            bundle.expected_total(),
            bundle.meta.expected_pace,
            bundle.confidence_level.as_str()
        );
        println!("   {}\n", bundle.explanation(&game.home_team_name, &game.away_team_name));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn simulate(
    home: &str,
    away: &str,
    neutral: bool,
    iterations: usize,
    seed: Option<u64>,
    date: Option<NaiveDate>,
    season_year: Option<i32>,
    upset_modifier: f64,
) -> Result<()> {
    let pool = open().await?;
    let (config, version) = load_config(&pool).await?;
    let season = db::resolve_season(&pool, season_year).await?;
    let date = date.unwrap_or_else(today);
    let slate = db::load_slate(&pool, &season.id).await?;
    let averages = averages_as_of(&slate, &config, date)?;
    let matcher = TeamMatcher::new(&slate.teams);

    let home_team = matcher
        .team(home)
        .ok_or_else(|| crate::error::RatingsError::UnknownTeam(home.to_string()))?;
    let away_team = matcher
        .team(away)
        .ok_or_else(|| crate::error::RatingsError::UnknownTeam(away.to_string()))?;
    let home_snapshot = db::get_latest_snapshot(&pool, &home_team.id, &version.id, date).await?;
    let away_snapshot = db::get_latest_snapshot(&pool, &away_team.id, &version.id, date).await?;

    let uniform = match seed {
        Some(seed) => RandSource::seeded(seed),
        None => RandSource::from_entropy(),
    };
    let mut simulator = GameSimulator::new(&config, averages, uniform);
    let summary = simulator.run(
        home_snapshot.as_ref(),
        away_snapshot.as_ref(),
        neutral,
        upset_modifier,
        iterations,
    )?;
    let deterministic = GamePredictor::new(&config, averages).predict(
        home_snapshot.as_ref(),
        away_snapshot.as_ref(),
        neutral,
        upset_modifier,
    )?;

    println!("🎲 {} simulations: {} vs {}", summary.iterations, home_team.name, away_team.name);
    println!(
        "   Mean score: {} {:.1} - {} {:.1}",
        home_team.name, summary.mean_home_score, away_team.name, summary.mean_away_score
    );
    println!(
        "   Home win share: {:.1}% (model {:.1}%)",
        summary.home_win_share * 100.0,
        deterministic.win_probability_home * 100.0
    );
    println!(
        "   Margin: {:+.1} ± {:.1} (model {:+.1} ± {:.1})",
        summary.mean_margin,
        summary.margin_std_deviation,
        deterministic.expected_margin,
        deterministic.margin_std_deviation
    );
    Ok(())
}

pub async fn recommend(season_year: Option<i32>, date: Option<NaiveDate>) -> Result<()> {
    let pool = open().await?;
    let (config, version) = load_config(&pool).await?;
    let season = db::resolve_season(&pool, season_year).await?;
    let date = date.unwrap_or_else(today);
    let generator = BetRecommendationGenerator::new(&config);

    let games: Vec<Game> = db::get_games(&pool, &season.id)
        .await?
        .into_iter()
        .filter(|g| g.game_date() == date && g.status == GameStatus::Scheduled)
        .collect();

    println!("💰 Bet recommendations for {} (EV threshold {:.1}%)\n", date, config.ev_threshold * 100.0);

    let mut recommended = 0;
    for game in &games {
        let Some(prediction) = db::get_latest_prediction(&pool, &game.id, &version.id).await? else {
            println!("⚠️  {} at {}: no prediction; run `predict` first", game.away_team_name, game.home_team_name);
            continue;
        };
        let Some(odds) = db::get_game_odd(&pool, &game.id).await? else {
            println!("⚠️  {} at {}: no market odds", game.away_team_name, game.home_team_name);
            continue;
        };

        println!("{} at {}:", game.away_team_name, game.home_team_name);
        for rec in generator.generate(&prediction, &odds, &version.id) {
            db::upsert_recommendation(&pool, &rec).await?;
            let side = rec.team.map_or("-", |side| side.as_str());
            println!(
                "   {} {:<9} {:<5} line {:>6} odds {:>5} model {:>7.2} p {:.1}% (market {}) EV {:+.3}",
                if rec.recommended { "✅" } else { "  " },
                rec.bet_type.as_str(),
                side,
                rec.vegas_line.map_or("-".to_string(), |line| format!("{:+.1}", line)),
                rec.vegas_odds.map_or("-".to_string(), |odds| format!("{:+}", odds)),
                rec.model_value,
                rec.probability * 100.0,
                rec.vegas_odds
                    .and_then(implied_probability)
                    .map_or("-".to_string(), |p| format!("{:.1}%", p * 100.0)),
                rec.ev
            );
            if rec.recommended {
                recommended += 1;
            }
        }
    }

    println!("\n🎯 {} bets clear the threshold", recommended);
    Ok(())
}

pub async fn settle(season_year: Option<i32>) -> Result<()> {
    let pool = open().await?;
    let season = db::resolve_season(&pool, season_year).await?;
    let games = db::get_games(&pool, &season.id).await?;

    let mut settled = 0;
    let (mut wins, mut losses, mut pushes) = (0, 0, 0);
    let mut units = 0.0;
    for game in games.iter().filter(|g| g.is_final()) {
        let mut recommendations = db::get_recommendations(&pool, &game.id).await?;
        settled += BetSettlement::settle(game, &mut recommendations);
        for rec in recommendations.iter().filter(|r| r.result.is_some()) {
            db::upsert_recommendation(&pool, rec).await?;
            if !rec.recommended {
                continue;
            }
            match rec.result {
                Some(BetResult::Win) => wins += 1,
                Some(BetResult::Loss) => losses += 1,
                Some(BetResult::Push) => pushes += 1,
                None => {}
            }
            units += rec.payout.unwrap_or(0.0);
        }
    }

    println!("🧾 Settled {} bets for {}", settled, season.name);
    println!("   Recommended record: {}-{}-{} ({:+.2} units)", wins, losses, pushes, units);
    Ok(())
}

pub async fn evaluate(season_year: Option<i32>, residuals_path: Option<&str>) -> Result<()> {
    let pool = open().await?;
    let (_, version) = load_config(&pool).await?;
    let season = db::resolve_season(&pool, season_year).await?;
    let slate = db::load_slate(&pool, &season.id).await?;
    let evaluator = PredictionEvaluator::new(&slate, &version.id);
    let report = evaluator.evaluate();

    println!("📈 Prediction accuracy for {} ('{}')\n", season.name, version.name);
    for (label, summary) in [
        ("Pace", &report.pace),
        ("Home offense", &report.home_offense),
        ("Away offense", &report.away_offense),
    ] {
        println!(
            "   {:<13} n={:<4} MAE {:>6} bias {:>6} sd {:>6}",
            label,
            summary.count,
            summary.mae.map_or("-".to_string(), |v| format!("{:.2}", v)),
            summary.bias.map_or("-".to_string(), |v| format!("{:+.2}", v)),
            summary.std_deviation.map_or("-".to_string(), |v| format!("{:.2}", v))
        );
    }
    match report.accuracy.accuracy {
        Some(accuracy) => println!(
            "   Winners picked: {}/{} ({:.1}%)",
            report.accuracy.correct_predictions,
            report.accuracy.total_predictions,
            accuracy * 100.0
        ),
        None => println!("   Winners picked: no decided games yet"),
    }

    if let Some(path) = residuals_path {
        let file = File::create(path).with_context(|| format!("Failed to create {}", path))?;
        let rows = evaluator.write_team_residuals(file)?;
        println!("\n💾 Wrote {} team pace residuals to {}", rows, path);
    }
    Ok(())
}

pub async fn query_team(team_name: &str, season_year: Option<i32>) -> Result<()> {
    let pool = open().await?;
    let (_, version) = load_config(&pool).await?;
    let season = db::resolve_season(&pool, season_year).await?;
    let slate = db::load_slate(&pool, &season.id).await?;

    println!("🔍 Searching for team: {}", team_name);

    let matcher = TeamMatcher::new(&slate.teams);
    let Some(found) = matcher.find(team_name) else {
        println!("❌ No team found matching '{}'", team_name);
        println!("\n💡 Available teams:");
        for team in slate.teams.iter().take(10) {
            println!("   • {}", team.name);
        }
        return Ok(());
    };
    let team = found.team;
    if found.kind != MatchKind::Exact {
        println!("   Matched '{}' to {}", team_name, team.name);
    }

    println!("\n📊 Team Details:");
    println!("   Name: {}", team.name);
    if let Some(location) = &team.location {
        println!("   Location: {}", location);
    }
    if let Some(venue) = &team.home_venue {
        println!("   Home venue: {}", venue);
    }

    if let Some(ts) = slate.team_season_for(&team.id) {
        println!(
            "   Record: {}-{} ({:.1}%)",
            ts.wins,
            ts.losses,
            calculate_win_percentage(ts.wins, ts.losses)
        );
        println!(
            "   Adjusted: O {:.1} | D {:.1} | Pace {:.1} | Net {}",
            ts.adj_offensive_efficiency,
            ts.adj_defensive_efficiency,
            ts.adj_pace,
            format_signed(ts.rating)
        );
        if let (Some(offense), Some(defense)) = (ts.preseason_adj_offensive_efficiency, ts.preseason_adj_defensive_efficiency) {
            println!("   Preseason: O {:.1} | D {:.1}", offense, defense);
        }
    }

    if let Some(snapshot) = db::get_latest_snapshot(&pool, &team.id, &version.id, today()).await? {
        println!(
            "   Latest snapshot: {} (net {}, volatility O {} / D {})",
            snapshot.snapshot_date,
            format_signed(snapshot.rating),
            snapshot
                .offensive_efficiency_volatility
                .map_or("-".to_string(), |v| format!("{:.1}", v)),
            snapshot
                .defensive_efficiency_volatility
                .map_or("-".to_string(), |v| format!("{:.1}", v))
        );
    }

    let involved = |g: &&Game| g.home_team_id == team.id || g.away_team_id == team.id;

    println!("\n📅 Recent Games:");
    let mut recent: Vec<&Game> = slate.games.iter().filter(involved).filter(|g| g.is_final()).collect();
    recent.sort_by_key(|g| std::cmp::Reverse(g.start_time));
    if recent.is_empty() {
        println!("   No finalized games");
    }
    for game in recent.iter().take(5) {
        let is_home = game.home_team_id == team.id;
        let opponent = if is_home { &game.away_team_name } else { &game.home_team_name };
        let result = match game.home_won() {
            Some(home_won) if home_won == is_home => "W",
            Some(_) => "L",
            None => "?",
        };
        println!(
            "   {} {} {} ({}-{}) {}{}",
            game.start_time.format("%m/%d"),
            if game.is_neutral() { "vs*" } else if is_home { "vs" } else { "at" },
            opponent,
            game.home_team_score.unwrap_or_default(),
            game.away_team_score.unwrap_or_default(),
            result,
            if game.overtimes() > 0 { format!(" ({}OT)", game.overtimes()) } else { String::new() }
        );
    }

    println!("\n📅 Upcoming Games:");
    let upcoming: Vec<&Game> = slate
        .games
        .iter()
        .filter(involved)
        .filter(|g| g.status == GameStatus::Scheduled)
        .take(5)
        .collect();
    if upcoming.is_empty() {
        println!("   No scheduled games");
    }
    for game in upcoming {
        let is_home = game.home_team_id == team.id;
        let opponent = if is_home { &game.away_team_name } else { &game.home_team_name };
        let venue = if is_home { "vs" } else { "at" };
        match slate
            .predictions
            .iter()
            .filter(|p| p.game_id == game.id && p.ratings_config_version_id == version.id)
            .max_by_key(|p| p.updated_at)
        {
            Some(prediction) => {
                let win = if is_home {
                    prediction.home_win_probability
                } else {
                    1.0 - prediction.home_win_probability
                };
                println!(
                    "   {} {} {} - Win probability: {:.1}%",
                    game.start_time.format("%m/%d %H:%M"),
                    venue,
                    opponent,
                    win * 100.0
                );
            }
            None => println!("   {} {} {}", game.start_time.format("%m/%d %H:%M"), venue, opponent),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RatingsError;
    use std::collections::BTreeSet;

    async fn seeded() -> (SqlitePool, RatingsConfig, RatingsConfigVersion, Season) {
        let pool = db::memory_pool().await.unwrap();
        db::seed_data(&pool).await.unwrap();
        let config = RatingsConfig::default();
        let version = db::register_config_version(&pool, &config).await.unwrap();
        let season = db::resolve_season(&pool, None).await.unwrap();
        (pool, config, version, season)
    }

    fn by_id(mut predictions: Vec<Prediction>) -> Vec<Prediction> {
        predictions.sort_by(|a, b| a.id.cmp(&b.id));
        predictions
    }

    #[tokio::test]
    async fn test_predict_before_any_rating_fails() {
        let (pool, config, version, season) = seeded().await;
        let slate = db::load_slate(&pool, &season.id).await.unwrap();

        let err = predict_games(&pool, &config, &version, &slate, season.start_date, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RatingsError>(),
            Some(RatingsError::MissingSeasonAverages(_))
        ));
    }

    #[tokio::test]
    async fn test_predict_keeps_backfilled_predictions() {
        let (pool, config, version, season) = seeded().await;
        let end = season.start_date + chrono::Duration::days(20);
        SeasonBackfill::new(&pool, &config, &version)
            .run(&season.id, None, Some(end), BackfillMode::Fresh)
            .await
            .unwrap();

        let before = by_id(db::get_predictions(&pool, &season.id).await.unwrap());
        assert!(before.iter().any(|p| p.pace_error.is_some()));

        let slate = db::load_slate(&pool, &season.id).await.unwrap();
        let played: BTreeSet<NaiveDate> = slate.games.iter().filter(|g| g.is_final()).map(|g| g.game_date()).collect();
        assert!(played.contains(&season.start_date) && played.contains(&end));
        for date in played {
            let predicted = predict_games(&pool, &config, &version, &slate, date, 1.0).await.unwrap();
            assert!(predicted.is_empty(), "{} games re-predicted on {}", predicted.len(), date);
        }

        let after = by_id(db::get_predictions(&pool, &season.id).await.unwrap());
        assert_eq!(after.len(), before.len());
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(new.id, old.id);
            assert_eq!(new.home_score, old.home_score);
            assert_eq!(new.away_score, old.away_score);
            assert_eq!(new.home_win_probability, old.home_win_probability);
            assert_eq!(new.pace_error, old.pace_error);
            assert_eq!(new.home_offensive_efficiency_error, old.home_offensive_efficiency_error);
            assert_eq!(new.updated_at, old.updated_at);
        }

        // The next slate of scheduled games predicts from the latest snapshots
        let next = slate
            .games
            .iter()
            .filter(|g| g.status == GameStatus::Scheduled && g.game_date() > end)
            .map(|g| g.game_date())
            .min()
            .unwrap();
        let predicted = predict_games(&pool, &config, &version, &slate, next, 1.0).await.unwrap();
        assert!(!predicted.is_empty());
        let again = predict_games(&pool, &config, &version, &slate, next, 1.0).await.unwrap();
        assert_eq!(
            db::get_predictions(&pool, &season.id).await.unwrap().len(),
            before.len() + predicted.len()
        );
        for ((_, first), (_, second)) in predicted.iter().zip(&again) {
            assert_eq!(first.home_expected_score, second.home_expected_score);
        }
    }

    #[test]
    fn test_parse_start_time() {
        let time = parse_start_time("2025-01-18T03:30:00Z").unwrap();
        assert_eq!(time.to_rfc3339(), "2025-01-18T03:30:00+00:00");

        let date_only = parse_start_time("2025-01-18").unwrap();
        assert_eq!(date_only.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 18).unwrap());
        assert!(cutoff_for(date_only.date_naive()) < date_only);

        assert!(parse_start_time("Jan 18").is_err());
    }

    #[test]
    fn test_box_score_record_from_csv() {
        let data = "\
game_id,start_time,team,opponent,home,location,neutral,points,field_goals_made,field_goals_attempted,three_pt_made,three_pt_attempted,free_throws_made,free_throws_attempted,offensive_rebounds,defensive_rebounds,turnovers,minutes
g1,2025-01-18,Gonzaga,Santa Clara,true,Spokane WA,,81,29,60,9,24,14,18,10,27,11,200
g1,2025-01-18,Santa Clara,Gonzaga,false,Spokane WA,,70,25,58,8,22,12,16,8,24,13,
";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let rows: Vec<BoxScoreRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows[0].home);
        assert_eq!(rows[0].neutral, None);
        assert_eq!(rows[0].box_score().minutes, Some(200));
        assert_eq!(rows[1].box_score().minutes, None);
        assert_eq!(rows[1].box_score().points, 70);
    }

    #[test]
    fn test_odds_record_line() {
        let data = "\
date,home_team,away_team,bookmaker,moneyline_home,moneyline_away,spread_point,spread_home_odds,spread_away_odds,total_points,total_over_odds,total_under_odds
2025-01-18,Gonzaga,Santa Clara,book_a,-450,340,-9.5,-110,-110,152.5,-110,-110
";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let row: OddsRecord = reader.deserialize().next().unwrap().unwrap();
        let line = row.line();
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2025, 1, 18).unwrap());
        assert_eq!(line.spread_point, Some(-9.5));
        assert_eq!(line.moneyline_away, Some(340));
    }
}
