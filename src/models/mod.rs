use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{BaselineVolatility, RatingsConfig, SeasonDefaults};
use crate::error::RatingsError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Season {
    pub id: String,
    pub year: i32,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub average_efficiency: Option<f64>,
    pub average_pace: Option<f64>,
    pub efficiency_std_deviation: Option<f64>,
    pub pace_std_deviation: Option<f64>,
    pub current: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Season {
    pub fn apply_averages(&mut self, averages: &SeasonAverages) {
        self.average_efficiency = Some(averages.average_efficiency);
        self.average_pace = Some(averages.average_pace);
        self.efficiency_std_deviation = Some(averages.efficiency_std_deviation);
        self.pace_std_deviation = Some(averages.pace_std_deviation);
        self.updated_at = Utc::now();
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

/// League-wide averages for one engine invocation.
///
/// Computed once and passed down by value; nothing downstream re-reads or
/// writes the season row while a pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeasonAverages {
    pub average_efficiency: f64,
    pub average_pace: f64,
    pub efficiency_std_deviation: f64,
    pub pace_std_deviation: f64,
}

impl SeasonAverages {
    /// Averages for a season with no finalized games yet.
    pub fn defaults(defaults: &SeasonDefaults, baseline: &BaselineVolatility) -> Self {
        Self {
            average_efficiency: defaults.average_efficiency,
            average_pace: defaults.average_pace,
            efficiency_std_deviation: baseline.efficiency_volatility,
            pace_std_deviation: baseline.pace_volatility,
        }
    }

    /// Read the persisted averages of a season; stddevs fall back to the baseline.
    pub fn from_season(season: &Season, config: &RatingsConfig) -> Result<Self, RatingsError> {
        let (Some(average_efficiency), Some(average_pace)) =
            (season.average_efficiency, season.average_pace)
        else {
            return Err(RatingsError::MissingSeasonAverages(season.name.clone()));
        };

        Ok(Self {
            average_efficiency,
            average_pace,
            efficiency_std_deviation: season
                .efficiency_std_deviation
                .unwrap_or(config.baseline.efficiency_volatility),
            pace_std_deviation: season
                .pace_std_deviation
                .unwrap_or(config.baseline.pace_volatility),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub home_venue: Option<String>,
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-team averages of the raw box-score rates, as of the last aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAggregates {
    pub offensive_efficiency: Option<f64>,
    pub defensive_efficiency: Option<f64>,
    pub pace: Option<f64>,
    pub effective_fg_percentage: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub offensive_rebound_rate: Option<f64>,
    pub free_throw_rate: Option<f64>,
    pub three_pt_attempt_rate: Option<f64>,
    pub offensive_efficiency_std_dev: Option<f64>,
    pub defensive_efficiency_std_dev: Option<f64>,
}

/// Opponent-adjusted four-factor stats, offense and the matching "allowed" side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdjustedFactors {
    pub adj_effective_fg_percentage: Option<f64>,
    pub adj_effective_fg_percentage_allowed: Option<f64>,
    pub adj_turnover_rate: Option<f64>,
    pub adj_turnover_rate_forced: Option<f64>,
    pub adj_offensive_rebound_rate: Option<f64>,
    pub adj_offensive_rebound_rate_allowed: Option<f64>,
    pub adj_free_throw_rate: Option<f64>,
    pub adj_free_throw_rate_allowed: Option<f64>,
    pub adj_three_pt_attempt_rate: Option<f64>,
    pub adj_three_pt_attempt_rate_allowed: Option<f64>,
}

/// One team's live state within a season. Overwritten by every engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSeason {
    pub id: String,
    pub team_id: String,
    pub season_id: String,
    pub adj_offensive_efficiency: f64,
    pub adj_defensive_efficiency: f64,
    pub adj_pace: f64,
    pub rating: f64,
    pub preseason_adj_offensive_efficiency: Option<f64>,
    pub preseason_adj_defensive_efficiency: Option<f64>,
    pub preseason_adj_pace: Option<f64>,
    pub offensive_efficiency_volatility: Option<f64>,
    pub defensive_efficiency_volatility: Option<f64>,
    pub pace_volatility: Option<f64>,
    pub home_offense_boost: Option<f64>,
    pub home_defense_boost: Option<f64>,
    pub wins: i32,
    pub losses: i32,
    pub raw: RawAggregates,
    pub adjusted: AdjustedFactors,
    pub updated_at: DateTime<Utc>,
}

impl TeamSeason {
    pub fn new(team_id: &str, season_id: &str, defaults: &SeasonDefaults) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            team_id: team_id.to_string(),
            season_id: season_id.to_string(),
            adj_offensive_efficiency: defaults.average_efficiency,
            adj_defensive_efficiency: defaults.average_efficiency,
            adj_pace: defaults.average_pace,
            rating: 0.0,
            preseason_adj_offensive_efficiency: None,
            preseason_adj_defensive_efficiency: None,
            preseason_adj_pace: None,
            offensive_efficiency_volatility: None,
            defensive_efficiency_volatility: None,
            pace_volatility: None,
            home_offense_boost: None,
            home_defense_boost: None,
            wins: 0,
            losses: 0,
            raw: RawAggregates::default(),
            adjusted: AdjustedFactors::default(),
            updated_at: Utc::now(),
        }
    }

    /// Overwrite the adjusted ratings; `rating` is always derived, never set directly.
    pub fn set_ratings(&mut self, offense: f64, defense: f64, pace: f64) {
        self.adj_offensive_efficiency = offense;
        self.adj_defensive_efficiency = defense;
        self.adj_pace = pace;
        self.rating = offense - defense;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    Final,
    Canceled,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::Final => "final",
            GameStatus::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(GameStatus::Scheduled),
            "final" => Some(GameStatus::Final),
            "canceled" => Some(GameStatus::Canceled),
            _ => None,
        }
    }

    /// `final` and `canceled` are terminal.
    pub fn can_transition_to(&self, next: GameStatus) -> bool {
        matches!(
            (self, next),
            (GameStatus::Scheduled, GameStatus::Final) | (GameStatus::Scheduled, GameStatus::Canceled)
        )
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub season_id: String,
    pub start_time: DateTime<Utc>,
    pub home_team_id: String,
    pub away_team_id: String,
    pub home_team_name: String,
    pub away_team_name: String,
    pub home_team_score: Option<i32>,
    pub away_team_score: Option<i32>,
    pub location: Option<String>,
    /// Supplied by the source when known; otherwise derived on finalization.
    pub neutral: Option<bool>,
    pub status: GameStatus,
    pub possessions: Option<f64>,
    pub minutes: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    pub fn game_date(&self) -> NaiveDate {
        self.start_time.date_naive()
    }

    pub fn is_neutral(&self) -> bool {
        self.neutral.unwrap_or(false)
    }

    pub fn is_final(&self) -> bool {
        self.status == GameStatus::Final
    }

    /// Possessions per 40 minutes; unknown until both inputs are present.
    pub fn pace(&self) -> Option<f64> {
        match (self.possessions, self.minutes) {
            (Some(possessions), Some(minutes)) if minutes > 0.0 => Some(possessions / minutes * 40.0),
            _ => None,
        }
    }

    pub fn overtimes(&self) -> i32 {
        self.minutes
            .map(|minutes| ((minutes - 40.0) / 5.0).round().max(0.0) as i32)
            .unwrap_or(0)
    }

    pub fn transition(&mut self, next: GameStatus) -> Result<(), RatingsError> {
        if !self.status.can_transition_to(next) {
            return Err(RatingsError::InvalidTransition {
                game_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn home_won(&self) -> Option<bool> {
        match (self.home_team_score, self.away_team_score) {
            (Some(home), Some(away)) if home != away => Some(home > away),
            _ => None,
        }
    }
}

/// Raw counting stats for one side of one game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxScore {
    pub points: i32,
    pub field_goals_made: i32,
    pub field_goals_attempted: i32,
    pub three_pt_made: i32,
    pub three_pt_attempted: i32,
    pub free_throws_made: i32,
    pub free_throws_attempted: i32,
    pub offensive_rebounds: i32,
    pub defensive_rebounds: i32,
    pub turnovers: i32,
    /// Total player-minutes (200 in regulation).
    pub minutes: Option<i32>,
}

/// Per-game rates derived from both box scores on finalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameRates {
    pub possessions: Option<f64>,
    pub offensive_efficiency: Option<f64>,
    pub defensive_efficiency: Option<f64>,
    pub effective_fg_percentage: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub offensive_rebound_rate: Option<f64>,
    pub defensive_rebound_rate: Option<f64>,
    pub free_throw_rate: Option<f64>,
    pub three_pt_attempt_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamGame {
    pub id: String,
    pub game_id: String,
    pub team_id: String,
    pub team_season_id: String,
    pub opponent_team_season_id: Option<String>,
    pub home: bool,
    pub box_score: BoxScore,
    pub rates: GameRates,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRatingSnapshot {
    pub id: String,
    pub team_id: String,
    pub season_id: String,
    pub team_season_id: String,
    pub ratings_config_version_id: String,
    pub snapshot_date: NaiveDate,
    pub rating: f64,
    pub adj_offensive_efficiency: f64,
    pub adj_defensive_efficiency: f64,
    pub adj_pace: f64,
    pub offensive_efficiency_volatility: Option<f64>,
    pub defensive_efficiency_volatility: Option<f64>,
    pub pace_volatility: Option<f64>,
    pub home_offense_boost: Option<f64>,
    pub home_defense_boost: Option<f64>,
    pub wins: i32,
    pub losses: i32,
    pub factors: AdjustedFactors,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingsConfigVersion {
    pub id: String,
    pub name: String,
    pub config: RatingsConfig,
    pub current: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub game_id: String,
    pub ratings_config_version_id: String,
    pub home_team_snapshot_id: String,
    pub away_team_snapshot_id: String,
    pub home_offensive_efficiency: f64,
    pub away_offensive_efficiency: f64,
    pub home_defensive_efficiency: f64,
    pub away_defensive_efficiency: f64,
    pub pace: f64,
    pub home_score: f64,
    pub away_score: f64,
    pub home_win_probability: f64,
    pub margin_std_deviation: f64,
    pub confidence_level: String,
    pub home_offensive_efficiency_error: Option<f64>,
    pub away_offensive_efficiency_error: Option<f64>,
    pub home_defensive_efficiency_error: Option<f64>,
    pub away_defensive_efficiency_error: Option<f64>,
    pub pace_error: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prediction {
    pub fn margin(&self) -> f64 {
        self.home_score - self.away_score
    }

    pub fn total(&self) -> f64 {
        self.home_score + self.away_score
    }

    pub fn has_errors(&self) -> bool {
        self.pace_error.is_some()
    }

    /// Whether the favored side won; `None` until the game has a decisive result.
    pub fn is_correct(&self, game: &Game) -> Option<bool> {
        game.home_won()
            .map(|home_won| (self.home_win_probability >= 0.5) == home_won)
    }
}

/// Consensus market line for one game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOdd {
    pub id: String,
    pub game_id: String,
    pub fetched_at: DateTime<Utc>,
    pub moneyline_home: Option<i32>,
    pub moneyline_away: Option<i32>,
    /// Home team's spread, negative when the home team is favored.
    pub spread_point: Option<f64>,
    pub spread_home_odds: Option<i32>,
    pub spread_away_odds: Option<i32>,
    pub total_points: Option<f64>,
    pub total_over_odds: Option<i32>,
    pub total_under_odds: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetType {
    Moneyline,
    Spread,
    Total,
}

impl BetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetType::Moneyline => "moneyline",
            BetType::Spread => "spread",
            BetType::Total => "total",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "moneyline" => Some(BetType::Moneyline),
            "spread" => Some(BetType::Spread),
            "total" => Some(BetType::Total),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetSide {
    Home,
    Away,
    Over,
    Under,
}

impl BetSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetSide::Home => "home",
            BetSide::Away => "away",
            BetSide::Over => "over",
            BetSide::Under => "under",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "home" => Some(BetSide::Home),
            "away" => Some(BetSide::Away),
            "over" => Some(BetSide::Over),
            "under" => Some(BetSide::Under),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetResult {
    Win,
    Loss,
    Push,
}

impl BetResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetResult::Win => "win",
            BetResult::Loss => "loss",
            BetResult::Push => "push",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "win" => Some(BetResult::Win),
            "loss" => Some(BetResult::Loss),
            "push" => Some(BetResult::Push),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRecommendation {
    pub id: String,
    pub game_id: String,
    pub prediction_id: String,
    pub game_odd_id: String,
    pub ratings_config_version_id: String,
    pub bet_type: BetType,
    /// The actionable side; `None` when the edge is below the EV threshold.
    pub team: Option<BetSide>,
    pub vegas_line: Option<f64>,
    pub vegas_odds: Option<i32>,
    pub model_value: f64,
    pub probability: f64,
    pub ev: f64,
    pub recommended: bool,
    pub result: Option<BetResult>,
    pub payout: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamOffseasonProfile {
    pub id: String,
    pub team_season_id: String,
    pub recruiting_score: Option<f64>,
    pub returning_minutes_pct: Option<f64>,
    pub manual_adjustment: Option<f64>,
}

impl TeamOffseasonProfile {
    /// Efficiency points added to offense and removed from defense.
    pub fn efficiency_adjustment(&self) -> f64 {
        self.recruitment_component() - self.attrition_component()
            + self.manual_adjustment.unwrap_or(0.0)
    }

    fn recruitment_component(&self) -> f64 {
        self.recruiting_score.map_or(3.0, |score| score * 0.1)
    }

    fn attrition_component(&self) -> f64 {
        self.returning_minutes_pct
            .map_or(3.0, |returning| 5.0 * (1.0 - returning))
    }
}

/// Everything the engine needs for one season, read once per invocation.
#[derive(Debug, Clone)]
pub struct SeasonSlate {
    pub season: Season,
    pub teams: Vec<Team>,
    pub team_seasons: Vec<TeamSeason>,
    pub games: Vec<Game>,
    pub team_games: Vec<TeamGame>,
    pub predictions: Vec<Prediction>,
}

impl SeasonSlate {
    pub fn team_name(&self, team_id: &str) -> Option<&str> {
        self.teams
            .iter()
            .find(|team| team.id == team_id)
            .map(|team| team.name.as_str())
    }

    pub fn team_season_for(&self, team_id: &str) -> Option<&TeamSeason> {
        self.team_seasons.iter().find(|ts| ts.team_id == team_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_terminal() {
        assert!(GameStatus::Scheduled.can_transition_to(GameStatus::Final));
        assert!(GameStatus::Scheduled.can_transition_to(GameStatus::Canceled));
        assert!(!GameStatus::Final.can_transition_to(GameStatus::Scheduled));
        assert!(!GameStatus::Final.can_transition_to(GameStatus::Canceled));
        assert!(!GameStatus::Canceled.can_transition_to(GameStatus::Final));
    }

    #[test]
    fn test_offseason_adjustment_defaults() {
        let profile = TeamOffseasonProfile {
            id: "p".to_string(),
            team_season_id: "ts".to_string(),
            recruiting_score: None,
            returning_minutes_pct: None,
            manual_adjustment: None,
        };
        assert_eq!(profile.efficiency_adjustment(), 0.0);

        let profile = TeamOffseasonProfile {
            recruiting_score: Some(50.0),
            returning_minutes_pct: Some(0.8),
            manual_adjustment: Some(-1.0),
            ..profile
        };
        // 5.0 - 1.0 - 1.0
        assert!((profile.efficiency_adjustment() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_ratings_keeps_rating_derived() {
        let mut ts = TeamSeason::new("t", "s", &SeasonDefaults::default());
        ts.set_ratings(112.0, 100.0, 67.0);
        assert_eq!(ts.rating, 12.0);
    }
}
