use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfidenceThresholds;
use crate::models::{SeasonAverages, TeamRatingSnapshot};
use crate::services::statistics::quadrature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::Low => "Low",
        }
    }

    pub fn from_gap(gap: f64, thresholds: &ConfidenceThresholds) -> Self {
        if gap < thresholds.high_max {
            ConfidenceLevel::High
        } else if gap < thresholds.medium_max {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-side efficiency and pace volatility for one matchup.
///
/// Each component is the team's own prediction-error stddev when its snapshot
/// carries one, else the league-wide stddev for the season.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilityCalculator {
    pub home_offensive: f64,
    pub home_defensive: f64,
    pub away_offensive: f64,
    pub away_defensive: f64,
    pub home_pace: f64,
    pub away_pace: f64,
    upset_modifier: f64,
}

impl VolatilityCalculator {
    pub fn new(
        home: &TeamRatingSnapshot,
        away: &TeamRatingSnapshot,
        averages: &SeasonAverages,
        upset_modifier: f64,
    ) -> Self {
        let efficiency = |own: Option<f64>| own.unwrap_or(averages.efficiency_std_deviation).max(0.0);
        let pace = |own: Option<f64>| own.unwrap_or(averages.pace_std_deviation).max(0.0);

        Self {
            home_offensive: efficiency(home.offensive_efficiency_volatility),
            home_defensive: efficiency(home.defensive_efficiency_volatility),
            away_offensive: efficiency(away.offensive_efficiency_volatility),
            away_defensive: efficiency(away.defensive_efficiency_volatility),
            home_pace: pace(home.pace_volatility),
            away_pace: pace(away.pace_volatility),
            upset_modifier: upset_modifier.max(0.0),
        }
    }

    /// Home offense against away defense.
    pub fn total_home_volatility(&self) -> f64 {
        quadrature(self.home_offensive, self.away_defensive) * self.upset_modifier
    }

    pub fn total_away_volatility(&self) -> f64 {
        quadrature(self.away_offensive, self.home_defensive) * self.upset_modifier
    }

    /// Not scaled by the upset modifier.
    pub fn total_pace_volatility(&self) -> f64 {
        quadrature(self.home_pace, self.away_pace)
    }

    pub fn confidence_level(&self, thresholds: &ConfidenceThresholds) -> ConfidenceLevel {
        let gap = (self.total_home_volatility() - self.total_away_volatility()).abs();
        ConfidenceLevel::from_gap(gap, thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{season_averages, snapshot};

    #[test]
    fn test_falls_back_to_league_stddev() {
        let home = snapshot("home", 110.0, 100.0, 68.0);
        let mut away = snapshot("away", 105.0, 105.0, 70.0);
        away.defensive_efficiency_volatility = Some(9.0);

        let vol = VolatilityCalculator::new(&home, &away, &season_averages(105.0, 68.0), 1.0);
        assert_eq!(vol.home_offensive, 11.0);
        assert_eq!(vol.away_defensive, 9.0);
        assert_eq!(vol.home_pace, 4.5);
        assert!((vol.total_home_volatility() - (121.0_f64 + 81.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_combined_never_below_components() {
        let mut home = snapshot("home", 110.0, 100.0, 68.0);
        let mut away = snapshot("away", 105.0, 105.0, 70.0);
        home.offensive_efficiency_volatility = Some(0.0);
        away.defensive_efficiency_volatility = Some(-3.0);
        home.pace_volatility = Some(2.0);
        away.pace_volatility = Some(6.0);

        let vol = VolatilityCalculator::new(&home, &away, &season_averages(105.0, 68.0), 1.0);
        assert_eq!(vol.away_defensive, 0.0);
        assert!(vol.total_home_volatility() >= 0.0);
        assert!(vol.total_pace_volatility() >= 6.0);
        assert!(vol.total_away_volatility() >= vol.away_offensive.max(vol.home_defensive));
    }

    #[test]
    fn test_upset_modifier_skips_pace() {
        let home = snapshot("home", 110.0, 100.0, 68.0);
        let away = snapshot("away", 105.0, 105.0, 70.0);
        let averages = season_averages(105.0, 68.0);
        let base = VolatilityCalculator::new(&home, &away, &averages, 1.0);
        let boosted = VolatilityCalculator::new(&home, &away, &averages, 1.5);

        assert!((boosted.total_home_volatility() - 1.5 * base.total_home_volatility()).abs() < 1e-12);
        assert_eq!(boosted.total_pace_volatility(), base.total_pace_volatility());
    }

    #[test]
    fn test_confidence_buckets() {
        let thresholds = ConfidenceThresholds::default();
        assert_eq!(ConfidenceLevel::from_gap(0.5, &thresholds), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_gap(2.0, &thresholds), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_gap(4.0, &thresholds), ConfidenceLevel::Low);
    }
}
