use chrono::{NaiveDate, Utc};

use crate::models::{Game, Prediction, TeamRatingSnapshot, TeamSeason};
use crate::services::game_predictor::PredictionBundle;

/// Freezes a team season's live ratings into a dated snapshot.
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    pub fn build(team_season: &TeamSeason, snapshot_date: NaiveDate, config_version_id: &str) -> TeamRatingSnapshot {
        TeamRatingSnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            team_id: team_season.team_id.clone(),
            season_id: team_season.season_id.clone(),
            team_season_id: team_season.id.clone(),
            ratings_config_version_id: config_version_id.to_string(),
            snapshot_date,
            rating: team_season.rating,
            adj_offensive_efficiency: team_season.adj_offensive_efficiency,
            adj_defensive_efficiency: team_season.adj_defensive_efficiency,
            adj_pace: team_season.adj_pace,
            offensive_efficiency_volatility: team_season.offensive_efficiency_volatility,
            defensive_efficiency_volatility: team_season.defensive_efficiency_volatility,
            pace_volatility: team_season.pace_volatility,
            home_offense_boost: team_season.home_offense_boost,
            home_defense_boost: team_season.home_defense_boost,
            wins: team_season.wins,
            losses: team_season.losses,
            factors: team_season.adjusted.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn build_all(team_seasons: &[TeamSeason], snapshot_date: NaiveDate, config_version_id: &str) -> Vec<TeamRatingSnapshot> {
        team_seasons
            .iter()
            .map(|ts| Self::build(ts, snapshot_date, config_version_id))
            .collect()
    }

    /// Latest snapshot for `team_id` dated on or before `date` under one version.
    pub fn latest_on_or_before<'a>(
        snapshots: &'a [TeamRatingSnapshot],
        team_id: &str,
        config_version_id: &str,
        date: NaiveDate,
    ) -> Option<&'a TeamRatingSnapshot> {
        snapshots
            .iter()
            .filter(|s| {
                s.team_id == team_id && s.ratings_config_version_id == config_version_id && s.snapshot_date <= date
            })
            .max_by_key(|s| s.snapshot_date)
    }
}

/// Turns a predictor bundle into the persisted prediction row.
pub struct PredictionBuilder;

impl PredictionBuilder {
    pub fn build(game: &Game, config_version_id: &str, bundle: &PredictionBundle) -> Prediction {
        let now = Utc::now();
        Prediction {
            id: uuid::Uuid::new_v4().to_string(),
            game_id: game.id.clone(),
            ratings_config_version_id: config_version_id.to_string(),
            home_team_snapshot_id: bundle.home_snapshot_id.clone(),
            away_team_snapshot_id: bundle.away_snapshot_id.clone(),
            home_offensive_efficiency: bundle.meta.home_expected_ortg,
            away_offensive_efficiency: bundle.meta.away_expected_ortg,
            // A side's defensive efficiency is what the other side is expected to score
            home_defensive_efficiency: bundle.meta.away_expected_ortg,
            away_defensive_efficiency: bundle.meta.home_expected_ortg,
            pace: bundle.meta.expected_pace,
            home_score: bundle.home_expected_score,
            away_score: bundle.away_expected_score,
            home_win_probability: bundle.win_probability_home,
            margin_std_deviation: bundle.margin_std_deviation,
            confidence_level: bundle.confidence_level.to_string(),
            home_offensive_efficiency_error: None,
            away_offensive_efficiency_error: None,
            home_defensive_efficiency_error: None,
            away_defensive_efficiency_error: None,
            pace_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
