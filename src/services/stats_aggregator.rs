use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::RatingsConfig;
use crate::models::{RawAggregates, SeasonAverages, SeasonSlate, TeamGame};
use crate::services::season_games::SeasonGames;
use crate::services::stat_formulae::RATE_STATS;
use crate::services::statistics::{mean, sample_stddev};

/// Season roll-up for one team, computed before anything is written back.
#[derive(Debug, Clone, Default)]
pub struct TeamAggregate {
    pub team_season_id: String,
    pub wins: i32,
    pub losses: i32,
    pub raw: RawAggregates,
    pub offensive_efficiency_volatility: Option<f64>,
    pub defensive_efficiency_volatility: Option<f64>,
    pub pace_volatility: Option<f64>,
}

/// Rolls finalized box scores into per-team aggregates and league averages.
pub struct TeamSeasonStatsAggregator<'a> {
    config: &'a RatingsConfig,
}

impl<'a> TeamSeasonStatsAggregator<'a> {
    pub fn new(config: &'a RatingsConfig) -> Self {
        Self { config }
    }

    /// Aggregate every team as of `cutoff`, write the results into the slate's
    /// team seasons and season row, and return the league averages.
    pub fn run(&self, slate: &mut SeasonSlate, cutoff: DateTime<Utc>) -> SeasonAverages {
        let (aggregates, averages) = {
            let games = SeasonGames::as_of(slate, cutoff);
            let aggregates = self.team_aggregates(slate, &games);
            let averages = self.season_averages(&aggregates, &games);
            (aggregates, averages)
        };

        let mut by_id: HashMap<String, TeamAggregate> = aggregates
            .into_iter()
            .map(|agg| (agg.team_season_id.clone(), agg))
            .collect();
        for team_season in &mut slate.team_seasons {
            if let Some(agg) = by_id.remove(&team_season.id) {
                team_season.wins = agg.wins;
                team_season.losses = agg.losses;
                team_season.raw = agg.raw;
                team_season.offensive_efficiency_volatility = agg.offensive_efficiency_volatility;
                team_season.defensive_efficiency_volatility = agg.defensive_efficiency_volatility;
                team_season.pace_volatility = agg.pace_volatility;
            }
        }
        slate.season.apply_averages(&averages);

        tracing::debug!(
            "Aggregated {} teams as of {}: avg efficiency {:.2}, avg pace {:.2}",
            slate.team_seasons.len(),
            cutoff,
            averages.average_efficiency,
            averages.average_pace
        );
        averages
    }

    /// League averages as of `cutoff`, leaving the slate untouched. Matches
    /// what `run` returns for the same cutoff.
    pub fn averages_as_of(&self, slate: &SeasonSlate, cutoff: DateTime<Utc>) -> SeasonAverages {
        let games = SeasonGames::as_of(slate, cutoff);
        let aggregates = self.team_aggregates(slate, &games);
        self.season_averages(&aggregates, &games)
    }

    pub fn team_aggregates(&self, slate: &SeasonSlate, games: &SeasonGames<'_>) -> Vec<TeamAggregate> {
        slate
            .team_seasons
            .iter()
            .map(|team_season| {
                let rows = games.team_games(&team_season.id);
                let (wins, losses) = record(rows, games);
                let (off_vol, def_vol, pace_vol) =
                    prediction_error_volatilities(slate, games, &team_season.team_id);

                TeamAggregate {
                    team_season_id: team_season.id.clone(),
                    wins,
                    losses,
                    raw: raw_aggregates(rows, games),
                    offensive_efficiency_volatility: off_vol,
                    defensive_efficiency_volatility: def_vol,
                    pace_volatility: pace_vol,
                }
            })
            .collect()
    }

    /// League averages over team means; any unknown value falls back to config.
    pub fn season_averages(&self, aggregates: &[TeamAggregate], games: &SeasonGames<'_>) -> SeasonAverages {
        let fallback = SeasonAverages::defaults(&self.config.season_defaults, &self.config.baseline);

        let efficiencies: Vec<f64> = aggregates
            .iter()
            .filter_map(|agg| agg.raw.offensive_efficiency)
            .collect();
        let paces: Vec<f64> = aggregates.iter().filter_map(|agg| agg.raw.pace).collect();
        let efficiency_stddevs: Vec<f64> = aggregates
            .iter()
            .filter_map(|agg| agg.raw.offensive_efficiency_std_dev)
            .collect();
        let game_paces: Vec<f64> = games.games().filter_map(|game| game.pace()).collect();

        SeasonAverages {
            average_efficiency: mean(&efficiencies).unwrap_or(fallback.average_efficiency),
            average_pace: mean(&paces).unwrap_or(fallback.average_pace),
            efficiency_std_deviation: mean(&efficiency_stddevs)
                .unwrap_or(fallback.efficiency_std_deviation),
            pace_std_deviation: sample_stddev(&game_paces).unwrap_or(fallback.pace_std_deviation),
        }
    }
}

fn record(rows: &[&TeamGame], games: &SeasonGames<'_>) -> (i32, i32) {
    let mut wins = 0;
    let mut losses = 0;
    for row in rows {
        match games.game(&row.game_id).and_then(|game| game.home_won()) {
            Some(home_won) if home_won == row.home => wins += 1,
            Some(_) => losses += 1,
            None => {}
        }
    }
    (wins, losses)
}

fn raw_aggregates(rows: &[&TeamGame], games: &SeasonGames<'_>) -> RawAggregates {
    let mut raw = RawAggregates::default();

    for columns in RATE_STATS {
        let values: Vec<f64> = rows.iter().filter_map(|row| (columns.observed)(row)).collect();
        *(columns.raw)(&mut raw) = mean(&values);
    }

    let defensive: Vec<f64> = rows.iter().filter_map(|row| row.rates.defensive_efficiency).collect();
    raw.defensive_efficiency = mean(&defensive);

    let paces: Vec<f64> = rows
        .iter()
        .filter_map(|row| games.game(&row.game_id).and_then(|game| game.pace()))
        .collect();
    raw.pace = mean(&paces);

    // eFG% from season totals rather than the mean of per-game rates.
    let (fgm, fga, three_pm) = rows.iter().fold((0, 0, 0), |(fgm, fga, tpm), row| {
        (
            fgm + row.box_score.field_goals_made,
            fga + row.box_score.field_goals_attempted,
            tpm + row.box_score.three_pt_made,
        )
    });
    raw.effective_fg_percentage = if fga == 0 {
        None
    } else {
        Some((fgm as f64 + 0.5 * three_pm as f64) / fga as f64)
    };

    let offensive: Vec<f64> = rows.iter().filter_map(|row| row.rates.offensive_efficiency).collect();
    raw.offensive_efficiency_std_dev = sample_stddev(&offensive);
    raw.defensive_efficiency_std_dev = sample_stddev(&defensive);

    raw
}

/// Sample stddev of a team's back-filled prediction errors up to the cutoff.
fn prediction_error_volatilities(
    slate: &SeasonSlate,
    games: &SeasonGames<'_>,
    team_id: &str,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let mut offense = Vec::new();
    let mut defense = Vec::new();
    let mut pace = Vec::new();

    for prediction in &slate.predictions {
        let Some(game) = games.game(&prediction.game_id) else {
            continue;
        };
        let (off_err, def_err) = if game.home_team_id == team_id {
            (
                prediction.home_offensive_efficiency_error,
                prediction.home_defensive_efficiency_error,
            )
        } else if game.away_team_id == team_id {
            (
                prediction.away_offensive_efficiency_error,
                prediction.away_defensive_efficiency_error,
            )
        } else {
            continue;
        };
        offense.extend(off_err);
        defense.extend(def_err);
        pace.extend(prediction.pace_error);
    }

    (
        sample_stddev(&offense),
        sample_stddev(&defense),
        sample_stddev(&pace),
    )
}
