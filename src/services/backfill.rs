use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::config::RatingsConfig;
use crate::db;
use crate::error::RatingsError;
use crate::models::{
    AdjustedFactors, GameStatus, RatingsConfigVersion, SeasonAverages, SeasonSlate, TeamRatingSnapshot,
};
use crate::services::bet_recommendation::BetSettlement;
use crate::services::game_finalizer::GameFinalizer;
use crate::services::game_predictor::GamePredictor;
use crate::services::overall_ratings::OverallRatingsCalculator;
use crate::services::preseason::{PreseasonInitializer, PriorSeason};
use crate::services::season_games::cutoff_for;
use crate::services::snapshot_builder::{PredictionBuilder, SnapshotBuilder};
use crate::services::stats_aggregator::TeamSeasonStatsAggregator;
use crate::utils::date_range;

const NO_UPSET_MODIFIER: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillMode {
    /// Drop this version's outputs and start again from preseason seeds.
    Fresh,
    /// Continue after the last completed date.
    Resume,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub dates_processed: usize,
    pub engine_runs: usize,
    pub snapshots_written: usize,
    pub predictions_written: usize,
    pub games_finalized: usize,
    pub games_skipped: usize,
    pub bets_settled: usize,
}

/// Replays a season one date at a time under a single config version.
///
/// Each date rates the league as of midnight, snapshots every team, predicts
/// that day's games from those snapshots and then finalizes them, so no
/// prediction ever sees its own result.
pub struct SeasonBackfill<'a> {
    pool: &'a SqlitePool,
    config: &'a RatingsConfig,
    version: &'a RatingsConfigVersion,
}

impl<'a> SeasonBackfill<'a> {
    pub fn new(pool: &'a SqlitePool, config: &'a RatingsConfig, version: &'a RatingsConfigVersion) -> Self {
        Self { pool, config, version }
    }

    pub async fn run(
        &self,
        season_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        mode: BackfillMode,
    ) -> Result<BackfillSummary> {
        let season = db::get_season(self.pool, season_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Unknown season {}", season_id))?;

        let mut start = start.unwrap_or(season.start_date);
        let end = end.unwrap_or_else(|| season.end_date.min(Utc::now().date_naive()));

        match mode {
            BackfillMode::Fresh => {
                db::clear_version_outputs(self.pool, season_id, &self.version.id).await?;
                self.initialize_preseason(season_id).await?;
            }
            BackfillMode::Resume => {
                if let Some(last) = db::last_completed_date(self.pool, season_id, &self.version.id).await? {
                    if let Some(next) = last.succ_opt() {
                        start = start.max(next);
                    }
                }
            }
        }

        let dates = date_range(start, end);
        tracing::info!(
            "Backfilling {} from {} to {} ({} dates, version '{}')",
            season.name,
            start,
            end,
            dates.len(),
            self.version.name
        );

        let mut summary = BackfillSummary::default();
        for date in dates {
            self.process_date(season_id, date, &mut summary).await?;
            db::mark_date_complete(self.pool, season_id, &self.version.id, date).await?;
            summary.dates_processed += 1;
            tracing::info!("Backfill {} complete", date);
        }

        Ok(summary)
    }

    /// Seed every team season from the prior year and offseason profiles.
    pub async fn initialize_preseason(&self, season_id: &str) -> Result<()> {
        let mut slate = db::load_slate(self.pool, season_id).await?;

        let prior_season = db::get_season_by_year(self.pool, slate.season.year - 1).await?;
        let prior_team_seasons = match &prior_season {
            Some(prior) => db::get_team_seasons(self.pool, &prior.id).await?,
            None => Vec::new(),
        };
        let prior = prior_season.as_ref().map(|season| PriorSeason {
            season,
            team_seasons: &prior_team_seasons,
        });
        let profiles = db::get_offseason_profiles(self.pool, season_id).await?;

        for team_season in &mut slate.team_seasons {
            team_season.adjusted = AdjustedFactors::default();
        }
        PreseasonInitializer::new(self.config).run(&mut slate, prior, &profiles);
        db::save_ratings(self.pool, &slate).await
    }

    async fn process_date(&self, season_id: &str, date: NaiveDate, summary: &mut BackfillSummary) -> Result<()> {
        let mut slate = db::load_slate(self.pool, season_id).await?;
        slate
            .predictions
            .retain(|p| p.ratings_config_version_id == self.version.id);
        let (averages, engine_ran) = rate_slate(self.config, &mut slate, cutoff_for(date))?;
        if engine_ran {
            summary.engine_runs += 1;
        }

        let snapshots = self.write_snapshots(&slate, date).await?;
        summary.snapshots_written += snapshots.len();

        let predictor = GamePredictor::new(self.config, averages);
        let day_games: Vec<String> = slate
            .games
            .iter()
            .filter(|g| g.game_date() == date && g.status != GameStatus::Canceled)
            .map(|g| g.id.clone())
            .collect();

        for game_id in &day_games {
            let Some(game) = slate.games.iter().find(|g| &g.id == game_id) else {
                continue;
            };
            let bundle = match predictor.predict(
                snapshots.get(&game.home_team_id),
                snapshots.get(&game.away_team_id),
                game.is_neutral(),
                NO_UPSET_MODIFIER,
            ) {
                Ok(bundle) => bundle,
                Err(e) => {
                    tracing::warn!("Skipping prediction for game {}: {}", game_id, e);
                    summary.games_skipped += 1;
                    continue;
                }
            };

            let mut prediction = PredictionBuilder::build(game, &self.version.id, &bundle);
            prediction.id = db::upsert_prediction(self.pool, &prediction).await?;
            slate.predictions.retain(|p| {
                !(p.game_id == prediction.game_id
                    && p.home_team_snapshot_id == prediction.home_team_snapshot_id
                    && p.away_team_snapshot_id == prediction.away_team_snapshot_id)
            });
            slate.predictions.push(prediction);
            summary.predictions_written += 1;

            if self.finalize(&mut slate, game_id, &bundle.home_snapshot_id, &bundle.away_snapshot_id).await? {
                summary.games_finalized += 1;
            }
            summary.bets_settled += self.settle(&slate, game_id).await?;
        }

        db::save_ratings(self.pool, &slate).await
    }

    /// Upsert one snapshot per team and return them keyed by team id,
    /// carrying the ids actually stored.
    async fn write_snapshots(
        &self,
        slate: &SeasonSlate,
        date: NaiveDate,
    ) -> Result<HashMap<String, TeamRatingSnapshot>> {
        let mut snapshots = HashMap::new();
        for mut snapshot in SnapshotBuilder::build_all(&slate.team_seasons, date, &self.version.id) {
            snapshot.id = db::upsert_snapshot(self.pool, &snapshot).await?;
            snapshots.insert(snapshot.team_id.clone(), snapshot);
        }
        Ok(snapshots)
    }

    /// Finalize a scheduled game that has both box scores, or back-fill the
    /// prediction errors of one that is already final. Returns whether the
    /// game moved to final here.
    async fn finalize(&self, slate: &mut SeasonSlate, game_id: &str, home_snapshot: &str, away_snapshot: &str) -> Result<bool> {
        let Some(status) = slate.games.iter().find(|g| g.id == game_id).map(|g| g.status) else {
            return Ok(false);
        };

        let (finalized, prediction_id) = match status {
            GameStatus::Scheduled => {
                let rows = slate.team_games.iter().filter(|tg| tg.game_id == game_id).count();
                if rows < 2 {
                    return Ok(false);
                }
                match GameFinalizer::finalize(slate, game_id, Some((home_snapshot, away_snapshot))) {
                    Ok(outcome) => {
                        db::save_finalized_game(self.pool, slate, game_id).await?;
                        (true, outcome.prediction_id)
                    }
                    Err(e) => {
                        tracing::warn!("{}", e);
                        return Ok(false);
                    }
                }
            }
            GameStatus::Final => (false, backfill_errors(slate, game_id, home_snapshot, away_snapshot)),
            GameStatus::Canceled => return Ok(false),
        };

        if let Some(prediction) = prediction_id.and_then(|id| slate.predictions.iter().find(|p| p.id == id)) {
            db::upsert_prediction(self.pool, prediction).await?;
        }
        Ok(finalized)
    }

    async fn settle(&self, slate: &SeasonSlate, game_id: &str) -> Result<usize> {
        let Some(game) = slate.games.iter().find(|g| g.id == game_id) else {
            return Ok(0);
        };
        if !game.is_final() {
            return Ok(0);
        }

        let mut recommendations = db::get_recommendations(self.pool, game_id).await?;
        let settled = BetSettlement::settle(game, &mut recommendations);
        for rec in recommendations.iter().filter(|r| r.result.is_some()) {
            db::upsert_recommendation(self.pool, rec).await?;
        }
        Ok(settled)
    }
}

/// Rate the slate as of `cutoff`. While the gate is closed only the season
/// stats are refreshed and the preseason ratings stand. Returns the league
/// averages and whether the engine ran.
pub fn rate_slate(
    config: &RatingsConfig,
    slate: &mut SeasonSlate,
    cutoff: DateTime<Utc>,
) -> Result<(SeasonAverages, bool), RatingsError> {
    if OverallRatingsCalculator::gate_passes(slate, cutoff) {
        let outcome = OverallRatingsCalculator::new(config).run(slate, cutoff)?;
        Ok((outcome.averages, true))
    } else {
        tracing::debug!("Gate closed as of {}; keeping preseason ratings", cutoff);
        Ok((TeamSeasonStatsAggregator::new(config).run(slate, cutoff), false))
    }
}

fn backfill_errors(slate: &mut SeasonSlate, game_id: &str, home_snapshot: &str, away_snapshot: &str) -> Option<String> {
    let game = slate.games.iter().find(|g| g.id == game_id)?;
    let home_row = slate.team_games.iter().find(|tg| tg.game_id == game_id && tg.home)?;
    let away_row = slate.team_games.iter().find(|tg| tg.game_id == game_id && !tg.home)?;
    let prediction = slate.predictions.iter_mut().find(|p| {
        p.game_id == game_id && p.home_team_snapshot_id == home_snapshot && p.away_team_snapshot_id == away_snapshot
    })?;
    GameFinalizer::fill_prediction_errors(prediction, game, home_row, away_row);
    Some(prediction.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (SqlitePool, RatingsConfig, RatingsConfigVersion) {
        let pool = db::memory_pool().await.unwrap();
        db::seed_data(&pool).await.unwrap();
        let config = RatingsConfig::default();
        let version = db::register_config_version(&pool, &config).await.unwrap();
        (pool, config, version)
    }

    fn ratings(snapshots: &[TeamRatingSnapshot]) -> Vec<(String, NaiveDate, f64, f64, f64)> {
        snapshots
            .iter()
            .map(|s| {
                (
                    s.team_id.clone(),
                    s.snapshot_date,
                    s.adj_offensive_efficiency,
                    s.adj_defensive_efficiency,
                    s.adj_pace,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fresh_backfill_is_repeatable() {
        let (pool, config, version) = seeded().await;
        let season = db::resolve_season(&pool, None).await.unwrap();
        let end = season.start_date + chrono::Duration::days(20);
        let backfill = SeasonBackfill::new(&pool, &config, &version);

        let first = backfill.run(&season.id, None, Some(end), BackfillMode::Fresh).await.unwrap();
        let first_snapshots = db::get_snapshots(&pool, &season.id, &version.id).await.unwrap();
        let second = backfill.run(&season.id, None, Some(end), BackfillMode::Fresh).await.unwrap();
        let second_snapshots = db::get_snapshots(&pool, &season.id, &version.id).await.unwrap();

        assert_eq!(first.dates_processed, 21);
        assert!(first.games_finalized > 0);
        assert_eq!(second.games_finalized, 0);
        assert_eq!(ratings(&first_snapshots), ratings(&second_snapshots));
    }

    #[tokio::test]
    async fn test_predictions_never_see_their_own_game() {
        let (pool, config, version) = seeded().await;
        let season = db::resolve_season(&pool, None).await.unwrap();
        let end = season.start_date + chrono::Duration::days(20);
        SeasonBackfill::new(&pool, &config, &version)
            .run(&season.id, None, Some(end), BackfillMode::Fresh)
            .await
            .unwrap();

        let slate = db::load_slate(&pool, &season.id).await.unwrap();
        let snapshots = db::get_snapshots(&pool, &season.id, &version.id).await.unwrap();
        assert!(!slate.predictions.is_empty());
        for prediction in &slate.predictions {
            let game = slate.games.iter().find(|g| g.id == prediction.game_id).unwrap();
            let home = snapshots.iter().find(|s| s.id == prediction.home_team_snapshot_id).unwrap();
            assert_eq!(home.snapshot_date, game.game_date());
            assert!(prediction.pace_error.is_some());
        }
    }

    #[tokio::test]
    async fn test_resume_skips_completed_dates() {
        let (pool, config, version) = seeded().await;
        let season = db::resolve_season(&pool, None).await.unwrap();
        let backfill = SeasonBackfill::new(&pool, &config, &version);
        let midway = season.start_date + chrono::Duration::days(5);
        let end = season.start_date + chrono::Duration::days(9);

        backfill.run(&season.id, None, Some(midway), BackfillMode::Fresh).await.unwrap();
        let resumed = backfill.run(&season.id, None, Some(end), BackfillMode::Resume).await.unwrap();

        assert_eq!(resumed.dates_processed, 4);
        assert_eq!(
            db::last_completed_date(&pool, &season.id, &version.id).await.unwrap(),
            Some(end)
        );
    }
}
