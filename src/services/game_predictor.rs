use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::{HomeCourt, RatingsConfig};
use crate::error::RatingsError;
use crate::models::{SeasonAverages, TeamRatingSnapshot};
use crate::services::statistics::{cover_probability, quadrature};
use crate::services::volatility_calculator::{ConfidenceLevel, VolatilityCalculator};
use crate::utils::round_to;

/// Efficiency points added to the home offense (`offense`) and to the away
/// offense (`defense`, normally negative).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomeCourtTerms {
    pub offense: f64,
    pub defense: f64,
}

impl HomeCourtTerms {
    pub const NEUTRAL: HomeCourtTerms = HomeCourtTerms {
        offense: 0.0,
        defense: 0.0,
    };

    pub fn resolve(
        config: &RatingsConfig,
        offense_boost: Option<f64>,
        defense_boost: Option<f64>,
        neutral: bool,
    ) -> Self {
        if neutral {
            return Self::NEUTRAL;
        }
        let flat = config.home_court_advantage;
        match config.home_court {
            HomeCourt::Flat => Self {
                offense: flat,
                defense: -flat,
            },
            HomeCourt::PerTeam => Self {
                offense: offense_boost.unwrap_or(flat),
                defense: defense_boost.unwrap_or(-flat),
            },
        }
    }
}

/// Expected points per 100 possessions for one offense against one defense.
pub fn expected_rating(own_offense: f64, opponent_defense: f64, average_efficiency: f64, home_term: f64) -> f64 {
    (own_offense - average_efficiency) + (opponent_defense - average_efficiency) + average_efficiency + home_term
}

pub fn expected_pace(home_pace: f64, away_pace: f64, average_pace: f64) -> f64 {
    (home_pace - average_pace) + (away_pace - average_pace) + average_pace
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMeta {
    pub expected_pace: f64,
    pub home_expected_ortg: f64,
    pub away_expected_ortg: f64,
    pub home_offensive_volatility: f64,
    pub away_offensive_volatility: f64,
    pub home_defensive_volatility: f64,
    pub away_defensive_volatility: f64,
    pub pace_volatility: f64,
    pub home_score_volatility: f64,
    pub away_score_volatility: f64,
}

/// Deterministic estimate for one matchup; persisted as a `Prediction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBundle {
    pub home_team_id: String,
    pub away_team_id: String,
    pub home_snapshot_id: String,
    pub away_snapshot_id: String,
    /// `None` when the expected scores are level.
    pub favorite_team_id: Option<String>,
    pub home_expected_score: f64,
    pub away_expected_score: f64,
    pub expected_margin: f64,
    pub win_probability_home: f64,
    /// Stddev of the margin, also used for the game total.
    pub margin_std_deviation: f64,
    pub confidence_level: ConfidenceLevel,
    pub neutral: bool,
    pub meta: PredictionMeta,
}

impl PredictionBundle {
    pub fn expected_total(&self) -> f64 {
        self.home_expected_score + self.away_expected_score
    }

    pub fn explanation(&self, home_name: &str, away_name: &str) -> String {
        let Some(favorite_id) = self.favorite_team_id.as_deref() else {
            return format!(
                "Based on adjusted efficiencies, expected pace, and volatility, {} and {} are dead even.",
                home_name, away_name
            );
        };
        let favorite = if favorite_id == self.home_team_id {
            home_name
        } else {
            away_name
        };
        format!(
            "Based on adjusted efficiencies, expected pace, and volatility, {} is favored by {:.2} points.",
            favorite,
            self.expected_margin.abs()
        )
    }
}

pub struct GamePredictor<'a> {
    config: &'a RatingsConfig,
    averages: SeasonAverages,
}

impl<'a> GamePredictor<'a> {
    pub fn new(config: &'a RatingsConfig, averages: SeasonAverages) -> Self {
        Self { config, averages }
    }

    pub fn averages(&self) -> &SeasonAverages {
        &self.averages
    }

    pub fn predict(
        &self,
        home: Option<&TeamRatingSnapshot>,
        away: Option<&TeamRatingSnapshot>,
        neutral: bool,
        upset_modifier: f64,
    ) -> Result<PredictionBundle, RatingsError> {
        let home = home.ok_or(RatingsError::MissingSnapshot { side: "home" })?;
        let away = away.ok_or(RatingsError::MissingSnapshot { side: "away" })?;

        let home_court = HomeCourtTerms::resolve(
            self.config,
            home.home_offense_boost,
            home.home_defense_boost,
            neutral,
        );
        let average_efficiency = self.averages.average_efficiency;

        let home_ortg = expected_rating(
            home.adj_offensive_efficiency,
            away.adj_defensive_efficiency,
            average_efficiency,
            home_court.offense,
        );
        let away_ortg = expected_rating(
            away.adj_offensive_efficiency,
            home.adj_defensive_efficiency,
            average_efficiency,
            home_court.defense,
        );
        let pace = expected_pace(home.adj_pace, away.adj_pace, self.averages.average_pace);

        let home_score = round_to(home_ortg * pace / 100.0, 2);
        let away_score = round_to(away_ortg * pace / 100.0, 2);
        let margin = round_to(home_score - away_score, 2);

        let volatility = VolatilityCalculator::new(home, away, &self.averages, upset_modifier);
        let home_score_volatility = volatility.total_home_volatility() * pace / 100.0;
        let away_score_volatility = volatility.total_away_volatility() * pace / 100.0;
        let margin_std_deviation = quadrature(home_score_volatility, away_score_volatility);
        let win_probability = round_to(cover_probability(margin, 0.0, margin_std_deviation), 4);

        let favorite = match home_score.partial_cmp(&away_score) {
            Some(Ordering::Greater) => Some(home.team_id.clone()),
            Some(Ordering::Less) => Some(away.team_id.clone()),
            _ => None,
        };

        Ok(PredictionBundle {
            home_team_id: home.team_id.clone(),
            away_team_id: away.team_id.clone(),
            home_snapshot_id: home.id.clone(),
            away_snapshot_id: away.id.clone(),
            favorite_team_id: favorite,
            home_expected_score: home_score,
            away_expected_score: away_score,
            expected_margin: margin,
            win_probability_home: win_probability,
            margin_std_deviation,
            confidence_level: volatility.confidence_level(&self.config.confidence_levels),
            neutral,
            meta: PredictionMeta {
                expected_pace: pace,
                home_expected_ortg: home_ortg,
                away_expected_ortg: away_ortg,
                home_offensive_volatility: volatility.home_offensive,
                away_offensive_volatility: volatility.away_offensive,
                home_defensive_volatility: volatility.home_defensive,
                away_defensive_volatility: volatility.away_defensive,
                pace_volatility: volatility.total_pace_volatility(),
                home_score_volatility,
                away_score_volatility,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{season_averages, snapshot};

    #[test]
    fn test_reference_matchup() {
        let config = RatingsConfig::default();
        let predictor = GamePredictor::new(&config, season_averages(105.0, 68.0));
        let home = snapshot("home", 112.0, 100.0, 67.0);
        let away = snapshot("away", 108.0, 104.0, 69.0);

        let bundle = predictor.predict(Some(&home), Some(&away), false, 1.0).unwrap();

        assert!((bundle.meta.home_expected_ortg - 112.5).abs() < 1e-9);
        assert!((bundle.meta.away_expected_ortg - 101.5).abs() < 1e-9);
        assert!((bundle.meta.expected_pace - 68.0).abs() < 1e-9);
        assert_eq!(bundle.home_expected_score, 76.5);
        assert_eq!(bundle.away_expected_score, 69.02);
        assert_eq!(bundle.expected_margin, 7.48);
        assert_eq!(bundle.favorite_team_id.as_deref(), Some("t-home"));
        assert!(bundle.win_probability_home > 0.5 && bundle.win_probability_home < 1.0);
        assert_eq!(bundle.confidence_level, ConfidenceLevel::High);
    }

    #[test]
    fn test_neutral_site_is_symmetric() {
        let config = RatingsConfig::default();
        let predictor = GamePredictor::new(&config, season_averages(105.0, 68.0));
        let a = snapshot("a", 113.7, 99.1, 66.3);
        let b = snapshot("b", 104.2, 101.9, 71.6);

        let forward = predictor.predict(Some(&a), Some(&b), true, 1.0).unwrap();
        let reverse = predictor.predict(Some(&b), Some(&a), true, 1.0).unwrap();

        assert_eq!(forward.home_expected_score, reverse.away_expected_score);
        assert_eq!(forward.away_expected_score, reverse.home_expected_score);
        assert_eq!(forward.favorite_team_id, reverse.favorite_team_id);
    }

    #[test]
    fn test_level_neutral_matchup_has_no_favorite() {
        let config = RatingsConfig::default();
        let predictor = GamePredictor::new(&config, season_averages(105.0, 68.0));
        let a = snapshot("a", 108.4, 101.2, 68.5);
        let b = snapshot("b", 108.4, 101.2, 68.5);

        let forward = predictor.predict(Some(&a), Some(&b), true, 1.0).unwrap();
        let reverse = predictor.predict(Some(&b), Some(&a), true, 1.0).unwrap();

        assert_eq!(forward.expected_margin, 0.0);
        assert_eq!(forward.win_probability_home, 0.5);
        assert_eq!(forward.favorite_team_id, None);
        assert_eq!(reverse.favorite_team_id, None);
        assert!(forward.explanation("A", "B").contains("dead even"));
    }

    #[test]
    fn test_missing_snapshot_fails_fast() {
        let config = RatingsConfig::default();
        let predictor = GamePredictor::new(&config, season_averages(105.0, 68.0));
        let home = snapshot("home", 112.0, 100.0, 67.0);

        let err = predictor.predict(Some(&home), None, false, 1.0).unwrap_err();
        assert!(matches!(err, RatingsError::MissingSnapshot { side: "away" }));
    }

    #[test]
    fn test_per_team_home_court_uses_snapshot_boosts() {
        let mut config = RatingsConfig::default();
        config.home_court = HomeCourt::PerTeam;
        let terms = HomeCourtTerms::resolve(&config, Some(3.0), None, false);
        assert_eq!(terms.offense, 3.0);
        assert_eq!(terms.defense, -1.5);
        assert_eq!(HomeCourtTerms::resolve(&config, Some(3.0), Some(-2.0), true), HomeCourtTerms::NEUTRAL);
    }
}
