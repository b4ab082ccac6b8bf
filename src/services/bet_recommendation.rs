use chrono::Utc;
use std::cmp::Ordering;

use crate::config::RatingsConfig;
use crate::models::{BetRecommendation, BetResult, BetSide, BetType, Game, GameOdd, Prediction};
use crate::services::statistics::cover_probability;
use crate::utils::{expected_value, payout_per_unit, round_to};

/// One priced side of a market before it becomes a row.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MarketPick {
    side: BetSide,
    line: Option<f64>,
    odds: i32,
    model_value: f64,
    probability: f64,
}

/// Prices a prediction against the consensus market, one row per bet type.
pub struct BetRecommendationGenerator<'a> {
    config: &'a RatingsConfig,
}

impl<'a> BetRecommendationGenerator<'a> {
    pub fn new(config: &'a RatingsConfig) -> Self {
        Self { config }
    }

    /// Up to three recommendations; a bet type is skipped when its market is incomplete.
    pub fn generate(&self, prediction: &Prediction, odds: &GameOdd, config_version_id: &str) -> Vec<BetRecommendation> {
        [
            (BetType::Moneyline, Self::moneyline(prediction, odds)),
            (BetType::Spread, Self::spread(prediction, odds)),
            (BetType::Total, Self::total(prediction, odds)),
        ]
        .into_iter()
        .filter_map(|(bet_type, pick)| pick.map(|p| self.recommendation(prediction, odds, config_version_id, bet_type, p)))
        .collect()
    }

    fn moneyline(prediction: &Prediction, odds: &GameOdd) -> Option<MarketPick> {
        let home_probability = prediction.home_win_probability;
        let (side, probability, price) = if home_probability >= 0.5 {
            (BetSide::Home, home_probability, odds.moneyline_home?)
        } else {
            (BetSide::Away, 1.0 - home_probability, odds.moneyline_away?)
        };
        Some(MarketPick {
            side,
            line: None,
            odds: price,
            model_value: home_probability,
            probability,
        })
    }

    fn spread(prediction: &Prediction, odds: &GameOdd) -> Option<MarketPick> {
        let spread_point = odds.spread_point?;
        let model_margin = prediction.margin();
        // A home spread of -4.5 prices the home side as a 4.5 point favorite
        let home_cover = cover_probability(model_margin, -spread_point, prediction.margin_std_deviation);
        let (side, probability, price) = if home_cover >= 0.5 {
            (BetSide::Home, home_cover, odds.spread_home_odds?)
        } else {
            (BetSide::Away, 1.0 - home_cover, odds.spread_away_odds?)
        };
        Some(MarketPick {
            side,
            line: Some(spread_point),
            odds: price,
            model_value: model_margin,
            probability,
        })
    }

    fn total(prediction: &Prediction, odds: &GameOdd) -> Option<MarketPick> {
        let total_points = odds.total_points?;
        let model_total = prediction.total();
        let over = cover_probability(model_total, total_points, prediction.margin_std_deviation);
        let (side, probability, price) = if over >= 0.5 {
            (BetSide::Over, over, odds.total_over_odds?)
        } else {
            (BetSide::Under, 1.0 - over, odds.total_under_odds?)
        };
        Some(MarketPick {
            side,
            line: Some(total_points),
            odds: price,
            model_value: model_total,
            probability,
        })
    }

    fn recommendation(
        &self,
        prediction: &Prediction,
        odds: &GameOdd,
        config_version_id: &str,
        bet_type: BetType,
        pick: MarketPick,
    ) -> BetRecommendation {
        let ev = round_to(expected_value(pick.probability, pick.odds), 4);
        let recommended = ev >= self.config.ev_threshold;
        let now = Utc::now();

        BetRecommendation {
            id: uuid::Uuid::new_v4().to_string(),
            game_id: prediction.game_id.clone(),
            prediction_id: prediction.id.clone(),
            game_odd_id: odds.id.clone(),
            ratings_config_version_id: config_version_id.to_string(),
            bet_type,
            team: recommended.then_some(pick.side),
            vegas_line: pick.line,
            vegas_odds: Some(pick.odds),
            model_value: round_to(pick.model_value, 4),
            probability: round_to(pick.probability, 4),
            ev,
            recommended,
            result: None,
            payout: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Grades recommendations once their game is final.
pub struct BetSettlement;

impl BetSettlement {
    /// Outcome of one side of one market; `None` until the game has both scores.
    pub fn outcome(game: &Game, bet_type: BetType, side: BetSide, line: Option<f64>) -> Option<BetResult> {
        let home = f64::from(game.home_team_score?);
        let away = f64::from(game.away_team_score?);

        let (value, threshold) = match (bet_type, side) {
            (BetType::Moneyline, BetSide::Home) => (home - away, 0.0),
            (BetType::Moneyline, BetSide::Away) => (away - home, 0.0),
            (BetType::Spread, BetSide::Home) => (home - away + line?, 0.0),
            (BetType::Spread, BetSide::Away) => (away - home - line?, 0.0),
            (BetType::Total, BetSide::Over) => (home + away, line?),
            (BetType::Total, BetSide::Under) => (line?, home + away),
            _ => return None,
        };

        Some(match value.partial_cmp(&threshold)? {
            Ordering::Greater => BetResult::Win,
            Ordering::Less => BetResult::Loss,
            Ordering::Equal => BetResult::Push,
        })
    }

    /// Units returned on a one-unit stake.
    pub fn payout(result: BetResult, american_odds: i32) -> f64 {
        match result {
            BetResult::Win => round_to(payout_per_unit(american_odds), 4),
            BetResult::Loss => -1.0,
            BetResult::Push => 0.0,
        }
    }

    /// Fill `result` and `payout` on every actionable row for a final game.
    /// Returns how many rows were settled.
    pub fn settle(game: &Game, recommendations: &mut [BetRecommendation]) -> usize {
        if !game.is_final() {
            return 0;
        }

        let mut settled = 0;
        for rec in recommendations.iter_mut().filter(|r| r.game_id == game.id) {
            let (Some(side), Some(odds)) = (rec.team, rec.vegas_odds) else {
                continue;
            };
            let Some(result) = Self::outcome(game, rec.bet_type, side, rec.vegas_line) else {
                continue;
            };
            rec.result = Some(result);
            rec.payout = Some(Self::payout(result, odds));
            rec.updated_at = Utc::now();
            settled += 1;
        }
        settled
    }
}
