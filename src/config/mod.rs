use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

/// The tunable constants behind one generation of ratings and predictions.
///
/// A bundle is registered as a `RatingsConfigVersion` under `bundle_name`;
/// every snapshot, prediction and recommendation is scoped to exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingsConfig {
    pub bundle_name: String,
    pub home_court_advantage: f64,
    pub home_court: HomeCourt,
    /// Number of convergence passes run by the overall ratings engine.
    pub iterations: usize,
    /// Fraction of the weighted average error applied per pass.
    pub step_size: f64,
    pub ridge_alpha: f64,
    pub weighting: RecencyWeighting,
    pub confidence_levels: ConfidenceThresholds,
    pub ev_threshold: f64,
    pub baseline: BaselineVolatility,
    pub season_defaults: SeasonDefaults,
    pub preseason: PreseasonWeights,
}

/// How the home-court term of a prediction is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeCourt {
    /// Flat `home_court_advantage` for every home team.
    Flat,
    /// The home snapshot's own offense/defense boosts, falling back to the flat value.
    PerTeam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecencyWeighting {
    pub recent_games: usize,
    pub recent_weight: f64,
    pub base_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    pub high_max: f64,
    pub medium_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineVolatility {
    pub efficiency_volatility: f64,
    pub pace_volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonDefaults {
    pub average_efficiency: f64,
    pub average_pace: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreseasonWeights {
    pub league_weight: f64,
    pub prior_weight: f64,
}

impl Default for RatingsConfig {
    fn default() -> Self {
        Self {
            bundle_name: "prophet_v1".to_string(),
            home_court_advantage: 1.5,
            home_court: HomeCourt::Flat,
            iterations: 5,
            step_size: 0.5,
            ridge_alpha: 0.0,
            weighting: RecencyWeighting::default(),
            confidence_levels: ConfidenceThresholds::default(),
            ev_threshold: 0.05,
            baseline: BaselineVolatility::default(),
            season_defaults: SeasonDefaults::default(),
            preseason: PreseasonWeights::default(),
        }
    }
}

impl Default for RecencyWeighting {
    fn default() -> Self {
        Self {
            recent_games: 5,
            recent_weight: 1.2,
            base_weight: 1.0,
        }
    }
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high_max: 2.0,
            medium_max: 4.0,
        }
    }
}

impl Default for BaselineVolatility {
    fn default() -> Self {
        Self {
            efficiency_volatility: 11.0,
            pace_volatility: 4.5,
        }
    }
}

impl Default for SeasonDefaults {
    fn default() -> Self {
        Self {
            average_efficiency: 105.5,
            average_pace: 69.5,
        }
    }
}

impl Default for PreseasonWeights {
    fn default() -> Self {
        Self {
            league_weight: 0.15,
            prior_weight: 0.85,
        }
    }
}

impl RatingsConfig {
    /// Load the bundle named by `RATINGS_CONFIG`, or the built-in defaults.
    pub fn load() -> Result<Self> {
        match env::var("RATINGS_CONFIG") {
            Ok(path) => Self::from_file(&path),
            Err(_) => {
                tracing::debug!("RATINGS_CONFIG not set, using default ratings bundle");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read ratings config {}", path))?;
        Self::from_toml(&raw).with_context(|| format!("Failed to parse ratings config {}", path))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: RatingsConfig = toml::from_str(raw)?;
        Ok(config)
    }

    /// Weight of a team's game given its position counted back from the most recent.
    pub fn recency_weight(&self, games_ago: usize) -> f64 {
        if games_ago < self.weighting.recent_games {
            self.weighting.recent_weight
        } else {
            self.weighting.base_weight
        }
    }
}
