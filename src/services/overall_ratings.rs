use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::RatingsConfig;
use crate::error::RatingsError;
use crate::models::{SeasonAverages, SeasonSlate, TeamSeason};
use crate::services::adjusted_stat_calculator::{AdjustedStat, AdjustedStatCalculator};
use crate::services::game_predictor::{expected_pace, expected_rating, HomeCourtTerms};
use crate::services::season_games::SeasonGames;
use crate::services::stat_formulae::{StatColumns, RATE_STATS};
use crate::services::statistics::weighted_mean;
use crate::services::stats_aggregator::TeamSeasonStatsAggregator;

/// Minimum teams, each with the minimum finalized games, before any pass runs.
const MIN_QUALIFIED_TEAMS: usize = 2;
const MIN_GAMES_PLAYED: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeamRatings {
    pub offense: f64,
    pub defense: f64,
    pub pace: f64,
    /// Always `offense - defense`.
    pub rating: f64,
}

impl TeamRatings {
    pub fn new(offense: f64, defense: f64, pace: f64) -> Self {
        Self {
            offense,
            defense,
            pace,
            rating: offense - defense,
        }
    }

    fn step(&mut self, step_size: f64, errors: &RatingErrors) {
        *self = Self::new(
            self.offense + step_size * errors.offense,
            self.defense + step_size * errors.defense,
            self.pace + step_size * errors.pace,
        );
    }
}

/// Weighted average errors for one team in one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RatingErrors {
    offense: f64,
    defense: f64,
    pace: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOutcome {
    pub averages: SeasonAverages,
    pub passes_run: usize,
}

/// The convergence engine.
///
/// Every team starts at the league average. Each pass derives all teams'
/// deltas from the previous pass's ratings, then applies them together.
pub struct OverallRatingsCalculator<'a> {
    config: &'a RatingsConfig,
}

impl<'a> OverallRatingsCalculator<'a> {
    pub fn new(config: &'a RatingsConfig) -> Self {
        Self { config }
    }

    /// At least two teams must each have two finalized games before the cutoff.
    pub fn gate_passes(slate: &SeasonSlate, cutoff: DateTime<Utc>) -> bool {
        SeasonGames::as_of(slate, cutoff).teams_with_at_least(MIN_GAMES_PLAYED) >= MIN_QUALIFIED_TEAMS
    }

    /// Aggregate, seed, converge and adjust the four factors as of `cutoff`.
    /// Overwrites the live team seasons; callers snapshot afterward.
    pub fn run(&self, slate: &mut SeasonSlate, cutoff: DateTime<Utc>) -> Result<EngineOutcome, RatingsError> {
        let averages = TeamSeasonStatsAggregator::new(self.config).run(slate, cutoff);
        tracing::info!(
            "Calculating ratings for {} as of {} (avg efficiency {:.2}, avg pace {:.2})",
            slate.season.name,
            cutoff.date_naive(),
            averages.average_efficiency,
            averages.average_pace
        );

        let seed = TeamRatings::new(averages.average_efficiency, averages.average_efficiency, averages.average_pace);
        for team_season in &mut slate.team_seasons {
            team_season.set_ratings(seed.offense, seed.defense, seed.pace);
        }

        if !Self::gate_passes(slate, cutoff) {
            tracing::info!("Fewer than {} teams with {} games; ratings stay at the seed", MIN_QUALIFIED_TEAMS, MIN_GAMES_PLAYED);
            return Ok(EngineOutcome {
                averages,
                passes_run: 0,
            });
        }

        let (ratings, factors) = {
            let games = SeasonGames::as_of(slate, cutoff);
            let ratings = self.converge(slate, &games, &averages);
            let factors = self.adjust_factors(slate, &games)?;
            (ratings, factors)
        };

        for team_season in &mut slate.team_seasons {
            if let Some(r) = ratings.get(&team_season.id) {
                team_season.set_ratings(r.offense, r.defense, r.pace);
            }
        }
        for (columns, solved) in &factors {
            AdjustedStatCalculator::apply(slate, columns, solved);
        }

        tracing::info!("Ratings converged after {} passes", self.config.iterations);
        Ok(EngineOutcome {
            averages,
            passes_run: self.config.iterations,
        })
    }

    /// Runs the configured passes over an immutable copy of the ratings.
    pub fn converge(
        &self,
        slate: &SeasonSlate,
        games: &SeasonGames<'_>,
        averages: &SeasonAverages,
    ) -> HashMap<String, TeamRatings> {
        let mut ratings: HashMap<String, TeamRatings> = slate
            .team_seasons
            .iter()
            .map(|ts| {
                (
                    ts.id.clone(),
                    TeamRatings::new(ts.adj_offensive_efficiency, ts.adj_defensive_efficiency, ts.adj_pace),
                )
            })
            .collect();

        for pass in 0..self.config.iterations {
            let deltas: Vec<(String, RatingErrors)> = slate
                .team_seasons
                .iter()
                .filter_map(|ts| {
                    self.weighted_errors(ts, slate, games, averages, &ratings)
                        .map(|errors| (ts.id.clone(), errors))
                })
                .collect();

            for (id, errors) in &deltas {
                if let Some(r) = ratings.get_mut(id) {
                    r.step(self.config.step_size, errors);
                }
            }
            tracing::debug!("Pass {} applied deltas to {} teams", pass + 1, deltas.len());
        }

        ratings
    }

    /// `None` when the team has no game against a known opponent.
    fn weighted_errors(
        &self,
        team_season: &TeamSeason,
        slate: &SeasonSlate,
        games: &SeasonGames<'_>,
        averages: &SeasonAverages,
        ratings: &HashMap<String, TeamRatings>,
    ) -> Option<RatingErrors> {
        let own = ratings.get(&team_season.id)?;
        let rows = games.team_games(&team_season.id);
        let played = rows.len();

        let mut offense = Vec::new();
        let mut defense = Vec::new();
        let mut pace = Vec::new();

        for (position, row) in rows.iter().enumerate() {
            let Some(game) = games.game(&row.game_id) else {
                continue;
            };
            let Some(opponent_id) = row.opponent_team_season_id.as_deref() else {
                continue;
            };
            let Some(opponent) = ratings.get(opponent_id) else {
                continue;
            };
            let weight = self.config.recency_weight(played - 1 - position);

            let home_season = if row.home {
                Some(team_season)
            } else {
                slate.team_seasons.iter().find(|ts| ts.id == opponent_id)
            };
            let home_court = HomeCourtTerms::resolve(
                self.config,
                home_season.and_then(|ts| ts.home_offense_boost),
                home_season.and_then(|ts| ts.home_defense_boost),
                game.is_neutral(),
            );
            let (own_term, opponent_term) = if row.home {
                (home_court.offense, home_court.defense)
            } else {
                (home_court.defense, home_court.offense)
            };

            if let Some(observed) = row.rates.offensive_efficiency {
                let predicted = expected_rating(own.offense, opponent.defense, averages.average_efficiency, own_term);
                offense.push((observed - predicted, weight));
            }
            if let Some(observed) = row.rates.defensive_efficiency {
                let predicted = expected_rating(opponent.offense, own.defense, averages.average_efficiency, opponent_term);
                defense.push((observed - predicted, weight));
            }
            if let Some(observed) = game.pace() {
                let predicted = expected_pace(own.pace, opponent.pace, averages.average_pace);
                pace.push((observed - predicted, weight));
            }
        }

        if offense.is_empty() && defense.is_empty() && pace.is_empty() {
            return None;
        }
        Some(RatingErrors {
            offense: weighted_mean(&offense).unwrap_or(0.0),
            defense: weighted_mean(&defense).unwrap_or(0.0),
            pace: weighted_mean(&pace).unwrap_or(0.0),
        })
    }

    fn adjust_factors(
        &self,
        slate: &SeasonSlate,
        games: &SeasonGames<'_>,
    ) -> Result<Vec<(&'static StatColumns, Vec<AdjustedStat>)>, RatingsError> {
        let calculator = AdjustedStatCalculator::new(self.config);
        let mut factors = Vec::new();
        for columns in RATE_STATS.iter().filter(|c| c.adjusted.is_some()) {
            factors.push((columns, calculator.adjust(slate, games, columns)?));
        }
        Ok(factors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::season_games::cutoff_for;
    use crate::services::test_support::*;

    #[test]
    fn test_no_games_leaves_league_average() {
        let config = RatingsConfig::default();
        let mut slate = slate(&["a", "b", "c"]);
        let outcome = OverallRatingsCalculator::new(&config)
            .run(&mut slate, cutoff_for(date(20)))
            .unwrap();

        assert_eq!(outcome.passes_run, 0);
        for ts in &slate.team_seasons {
            assert_eq!(ts.adj_offensive_efficiency, 105.5);
            assert_eq!(ts.adj_defensive_efficiency, 105.5);
            assert_eq!(ts.adj_pace, 69.5);
            assert_eq!(ts.rating, 0.0);
        }
    }

    #[test]
    fn test_gate_requires_two_teams_with_two_games() {
        let mut slate = slate(&["a", "b", "c"]);
        add_result(&mut slate, "a", "b", 2, 110.0, 100.0, 70.0);
        assert!(!OverallRatingsCalculator::gate_passes(&slate, cutoff_for(date(20))));

        add_result(&mut slate, "a", "c", 3, 110.0, 100.0, 70.0);
        // a has two games, b and c one each
        assert!(!OverallRatingsCalculator::gate_passes(&slate, cutoff_for(date(20))));

        add_result(&mut slate, "b", "c", 4, 100.0, 100.0, 70.0);
        assert!(OverallRatingsCalculator::gate_passes(&slate, cutoff_for(date(20))));
    }

    #[test]
    fn test_ratings_separate_strong_and_weak_teams() {
        let config = RatingsConfig::default();
        let mut slate = slate(&["strong", "weak", "mid"]);
        let mut day = 1;
        for _ in 0..3 {
            add_result(&mut slate, "strong", "weak", day, 118.0, 94.0, 68.0);
            add_result(&mut slate, "mid", "strong", day + 1, 100.0, 112.0, 68.0);
            add_result(&mut slate, "weak", "mid", day + 2, 98.0, 106.0, 68.0);
            day += 3;
        }

        let outcome = OverallRatingsCalculator::new(&config)
            .run(&mut slate, cutoff_for(date(28)))
            .unwrap();
        assert_eq!(outcome.passes_run, 5);

        let strong = slate.team_season_for("t-strong").unwrap();
        let weak = slate.team_season_for("t-weak").unwrap();
        let mid = slate.team_season_for("t-mid").unwrap();
        assert!(strong.rating > mid.rating);
        assert!(mid.rating > weak.rating);
        for ts in &slate.team_seasons {
            assert_eq!(ts.rating, ts.adj_offensive_efficiency - ts.adj_defensive_efficiency);
        }
        assert!(strong.adjusted.adj_turnover_rate.is_some());
    }

    #[test]
    fn test_rating_is_net_efficiency_after_every_pass_count() {
        let mut slate = slate(&["strong", "weak", "mid"]);
        let mut day = 1;
        for _ in 0..2 {
            add_result(&mut slate, "strong", "weak", day, 121.0, 92.0, 71.0);
            add_result(&mut slate, "mid", "strong", day + 1, 99.0, 113.0, 66.0);
            add_result(&mut slate, "weak", "mid", day + 2, 97.0, 108.0, 69.0);
            day += 3;
        }

        let mut previous: Option<HashMap<String, TeamRatings>> = None;
        for passes in [1, 3, 5] {
            let config = RatingsConfig {
                iterations: passes,
                ..RatingsConfig::default()
            };
            let mut rated = slate.clone();
            let outcome = OverallRatingsCalculator::new(&config)
                .run(&mut rated, cutoff_for(date(20)))
                .unwrap();
            assert_eq!(outcome.passes_run, passes);

            let games = SeasonGames::as_of(&rated, cutoff_for(date(20)));
            let mut seeded = rated.clone();
            for ts in &mut seeded.team_seasons {
                ts.set_ratings(outcome.averages.average_efficiency, outcome.averages.average_efficiency, outcome.averages.average_pace);
            }
            let ratings = OverallRatingsCalculator::new(&config).converge(&seeded, &games, &outcome.averages);
            for ts in &rated.team_seasons {
                let r = ratings[&ts.id];
                assert_eq!(r.rating, r.offense - r.defense);
                assert_eq!(ts.rating, r.rating);
                assert_eq!(ts.rating, ts.adj_offensive_efficiency - ts.adj_defensive_efficiency);
            }
            if let Some(previous) = &previous {
                assert!(ratings.iter().any(|(id, r)| previous[id] != *r));
            }
            previous = Some(ratings);
        }
    }

    #[test]
    fn test_identical_results_stay_at_average() {
        let config = RatingsConfig::default();
        let mut slate = slate(&["a", "b", "c", "d"]);
        let names = ["a", "b", "c", "d"];
        let mut day = 1;
        for home in names {
            for away in names {
                if home != away {
                    add_result(&mut slate, home, away, day, 104.0, 104.0, 70.0);
                    day += 1;
                }
            }
        }

        let outcome = OverallRatingsCalculator::new(&config)
            .run(&mut slate, cutoff_for(date(28)))
            .unwrap();
        for ts in &slate.team_seasons {
            assert!((ts.adj_offensive_efficiency - outcome.averages.average_efficiency).abs() < 1e-9);
            assert!((ts.adj_defensive_efficiency - outcome.averages.average_efficiency).abs() < 1e-9);
            assert!(ts.rating.abs() < 1e-9);
        }
    }
}
