use std::collections::HashMap;

use crate::config::RatingsConfig;
use crate::error::RatingsError;
use crate::models::SeasonSlate;
use crate::services::season_games::SeasonGames;
use crate::services::stat_formulae::StatColumns;
use crate::services::statistics::{mean, solve_least_squares};

/// Solved effects for one team, already shifted back by the league average.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedStat {
    pub team_season_id: String,
    pub offense: f64,
    pub allowed: f64,
}

/// Opponent-adjusts a single rate stat with a weighted least-squares fit of
/// `observed = league_average + offense(team) + defense(opponent)`.
pub struct AdjustedStatCalculator<'a> {
    config: &'a RatingsConfig,
}

impl<'a> AdjustedStatCalculator<'a> {
    pub fn new(config: &'a RatingsConfig) -> Self {
        Self { config }
    }

    /// League average of the stat over the teams' raw season means.
    pub fn league_average(slate: &SeasonSlate, columns: &StatColumns) -> Option<f64> {
        let values: Vec<f64> = slate
            .team_seasons
            .iter()
            .filter_map(|ts| {
                let mut raw = ts.raw.clone();
                *(columns.raw)(&mut raw)
            })
            .collect();
        mean(&values)
    }

    /// Returns an empty result when no team-game carries the stat.
    pub fn solve(
        &self,
        slate: &SeasonSlate,
        games: &SeasonGames<'_>,
        columns: &StatColumns,
        league_average: f64,
    ) -> Result<Vec<AdjustedStat>, RatingsError> {
        let qualified: Vec<&str> = slate
            .team_seasons
            .iter()
            .filter(|ts| games.games_played(&ts.id) >= 2)
            .map(|ts| ts.id.as_str())
            .collect();
        let index: HashMap<&str, usize> = qualified
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        let n = qualified.len();

        let mut rows = Vec::new();
        let mut targets = Vec::new();
        let mut weights = Vec::new();

        for team_season_id in &qualified {
            let team_games = games.team_games(team_season_id);
            let played = team_games.len();
            for (position, team_game) in team_games.iter().enumerate() {
                let Some(opponent) = team_game
                    .opponent_team_season_id
                    .as_deref()
                    .and_then(|id| index.get(id))
                else {
                    continue;
                };
                let Some(observed) = (columns.observed)(team_game) else {
                    continue;
                };

                let mut row = vec![0.0; 2 * n];
                row[index[team_season_id]] = 1.0;
                row[n + opponent] = 1.0;
                rows.push(row);
                targets.push(observed - league_average);
                weights.push(self.config.recency_weight(played - 1 - position));
            }
        }

        if rows.is_empty() {
            tracing::warn!("No valid rows generated for {}", columns.name);
            return Ok(Vec::new());
        }

        tracing::debug!(
            "Solving {} adjustment with {} rows and {} columns",
            columns.name,
            rows.len(),
            2 * n
        );
        let x = solve_least_squares(&rows, &targets, Some(&weights), self.config.ridge_alpha)?;

        Ok(qualified
            .iter()
            .enumerate()
            .map(|(i, id)| AdjustedStat {
                team_season_id: id.to_string(),
                offense: x[i] + league_average,
                allowed: x[n + i] + league_average,
            })
            .collect())
    }

    /// Solve one of the four-factor stats. Stats the engine owns, or without a
    /// league average yet, yield nothing.
    pub fn adjust(
        &self,
        slate: &SeasonSlate,
        games: &SeasonGames<'_>,
        columns: &StatColumns,
    ) -> Result<Vec<AdjustedStat>, RatingsError> {
        if columns.adjusted.is_none() {
            return Ok(Vec::new());
        }
        let Some(league_average) = Self::league_average(slate, columns) else {
            tracing::warn!("No league average for {}, skipping adjustment", columns.name);
            return Ok(Vec::new());
        };
        self.solve(slate, games, columns, league_average)
    }

    /// Write solved offense/allowed pairs into the team seasons.
    pub fn apply(slate: &mut SeasonSlate, columns: &StatColumns, solved: &[AdjustedStat]) {
        let Some((offense_field, allowed_field)) = columns.adjusted else {
            return;
        };
        for stat in solved {
            if let Some(ts) = slate
                .team_seasons
                .iter_mut()
                .find(|ts| ts.id == stat.team_season_id)
            {
                *offense_field(&mut ts.adjusted) = Some(stat.offense);
                *allowed_field(&mut ts.adjusted) = Some(stat.allowed);
            }
        }
    }
}
