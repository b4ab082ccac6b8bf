use serde::Serialize;

use crate::config::RatingsConfig;
use crate::error::RatingsError;
use crate::models::{SeasonAverages, TeamRatingSnapshot};
use crate::services::game_predictor::GamePredictor;
use crate::services::gaussian::{GaussianSampler, UniformSource};
use crate::services::statistics::{mean, sample_stddev};
use crate::services::volatility_calculator::VolatilityCalculator;
use crate::utils::round_to;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulatedGame {
    pub pace: f64,
    pub home_score: f64,
    pub away_score: f64,
}

impl SimulatedGame {
    pub fn margin(&self) -> f64 {
        self.home_score - self.away_score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSummary {
    pub iterations: usize,
    /// Ties count as half a win.
    pub home_win_share: f64,
    pub mean_home_score: f64,
    pub mean_away_score: f64,
    pub mean_margin: f64,
    pub margin_std_deviation: f64,
}

/// Draws game outcomes around the deterministic prediction.
///
/// Owns its sampler and therefore its cached normal draw; use one instance
/// per simulation thread.
pub struct GameSimulator<'a, U: UniformSource> {
    predictor: GamePredictor<'a>,
    sampler: GaussianSampler<U>,
}

impl<'a, U: UniformSource> GameSimulator<'a, U> {
    pub fn new(config: &'a RatingsConfig, averages: SeasonAverages, uniform: U) -> Self {
        Self {
            predictor: GamePredictor::new(config, averages),
            sampler: GaussianSampler::new(uniform),
        }
    }

    pub fn simulate_once(
        &mut self,
        home: Option<&TeamRatingSnapshot>,
        away: Option<&TeamRatingSnapshot>,
        neutral: bool,
        upset_modifier: f64,
    ) -> Result<SimulatedGame, RatingsError> {
        let home = home.ok_or(RatingsError::MissingSnapshot { side: "home" })?;
        let away = away.ok_or(RatingsError::MissingSnapshot { side: "away" })?;

        let bundle = self.predictor.predict(Some(home), Some(away), neutral, upset_modifier)?;
        let volatility = VolatilityCalculator::new(home, away, self.predictor.averages(), upset_modifier);

        let pace = self
            .sampler
            .sample(bundle.meta.expected_pace, volatility.total_pace_volatility());
        let home_ortg = self
            .sampler
            .sample(bundle.meta.home_expected_ortg, volatility.total_home_volatility());
        let away_ortg = self
            .sampler
            .sample(bundle.meta.away_expected_ortg, volatility.total_away_volatility());

        Ok(SimulatedGame {
            pace,
            home_score: round_to(pace * home_ortg / 100.0, 2),
            away_score: round_to(pace * away_ortg / 100.0, 2),
        })
    }

    /// Monte Carlo summary over `iterations` independent draws.
    pub fn run(
        &mut self,
        home: Option<&TeamRatingSnapshot>,
        away: Option<&TeamRatingSnapshot>,
        neutral: bool,
        upset_modifier: f64,
        iterations: usize,
    ) -> Result<SimulationSummary, RatingsError> {
        let mut draws = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            draws.push(self.simulate_once(home, away, neutral, upset_modifier)?);
        }

        let home_wins: f64 = draws
            .iter()
            .map(|d| match d.home_score.partial_cmp(&d.away_score) {
                Some(std::cmp::Ordering::Greater) => 1.0,
                Some(std::cmp::Ordering::Equal) => 0.5,
                _ => 0.0,
            })
            .sum();
        let home_scores: Vec<f64> = draws.iter().map(|d| d.home_score).collect();
        let away_scores: Vec<f64> = draws.iter().map(|d| d.away_score).collect();
        let margins: Vec<f64> = draws.iter().map(SimulatedGame::margin).collect();

        Ok(SimulationSummary {
            iterations,
            home_win_share: if iterations == 0 {
                0.0
            } else {
                home_wins / iterations as f64
            },
            mean_home_score: mean(&home_scores).unwrap_or(0.0),
            mean_away_score: mean(&away_scores).unwrap_or(0.0),
            mean_margin: mean(&margins).unwrap_or(0.0),
            margin_std_deviation: sample_stddev(&margins).unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gaussian::RandSource;
    use crate::services::test_support::{season_averages, snapshot};

    #[test]
    fn test_zero_noise_matches_prediction() {
        let config = RatingsConfig::default();
        // u = 0 for every draw makes each normal exactly zero
        let mut simulator = GameSimulator::new(&config, season_averages(105.0, 68.0), || 0.0);
        let home = snapshot("home", 112.0, 100.0, 67.0);
        let away = snapshot("away", 108.0, 104.0, 69.0);

        let game = simulator.simulate_once(Some(&home), Some(&away), false, 1.0).unwrap();
        assert_eq!(game.home_score, 76.5);
        assert_eq!(game.away_score, 69.02);
    }

    #[test]
    fn test_missing_snapshot() {
        let config = RatingsConfig::default();
        let mut simulator = GameSimulator::new(&config, season_averages(105.0, 68.0), || 0.5);
        let away = snapshot("away", 108.0, 104.0, 69.0);
        assert!(simulator.simulate_once(None, Some(&away), false, 1.0).is_err());
    }

    #[test]
    fn test_monte_carlo_centres_on_prediction() {
        let config = RatingsConfig::default();
        let averages = season_averages(105.0, 68.0);
        let mut simulator = GameSimulator::new(&config, averages, RandSource::seeded(42));
        let home = snapshot("home", 112.0, 100.0, 67.0);
        let away = snapshot("away", 108.0, 104.0, 69.0);

        let summary = simulator.run(Some(&home), Some(&away), false, 1.0, 5_000).unwrap();
        assert_eq!(summary.iterations, 5_000);
        assert!((summary.mean_margin - 7.48).abs() < 1.0);
        assert!(summary.home_win_share > 0.5);

        let predicted = GamePredictor::new(&config, averages)
            .predict(Some(&home), Some(&away), false, 1.0)
            .unwrap();
        assert!((summary.home_win_share - predicted.win_probability_home).abs() < 0.05);
    }
}
