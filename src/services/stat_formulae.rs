//! Box-score formulas and the table of rate stats the engine regresses.
//!
//! Every ratio returns `None` on a zero denominator; callers must treat an
//! unknown rate as missing, not as zero.

use crate::models::{AdjustedFactors, BoxScore, GameRates, RawAggregates, TeamGame};

const FREE_THROW_POSSESSION_FACTOR: f64 = 0.475;

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !denominator.is_finite() {
        None
    } else {
        Some(numerator / denominator)
    }
}

pub fn possessions(b: &BoxScore) -> f64 {
    let raw = b.field_goals_attempted as f64 - b.offensive_rebounds as f64
        + b.turnovers as f64
        + FREE_THROW_POSSESSION_FACTOR * b.free_throws_attempted as f64;
    (raw * 10.0).round() / 10.0
}

pub fn offensive_rating(b: &BoxScore) -> Option<f64> {
    ratio(100.0 * b.points as f64, possessions(b))
}

pub fn effective_fg_percentage(b: &BoxScore) -> Option<f64> {
    ratio(
        b.field_goals_made as f64 + 0.5 * b.three_pt_made as f64,
        b.field_goals_attempted as f64,
    )
}

pub fn turnover_rate(b: &BoxScore) -> Option<f64> {
    ratio(b.turnovers as f64, possessions(b))
}

pub fn free_throw_rate(b: &BoxScore) -> Option<f64> {
    ratio(b.free_throws_attempted as f64, b.field_goals_attempted as f64)
}

pub fn three_pt_attempt_rate(b: &BoxScore) -> Option<f64> {
    ratio(b.three_pt_attempted as f64, b.field_goals_attempted as f64)
}

pub fn offensive_rebound_rate(own: &BoxScore, opponent: &BoxScore) -> Option<f64> {
    ratio(
        own.offensive_rebounds as f64,
        (own.offensive_rebounds + opponent.defensive_rebounds) as f64,
    )
}

pub fn defensive_rebound_rate(own: &BoxScore, opponent: &BoxScore) -> Option<f64> {
    ratio(
        own.defensive_rebounds as f64,
        (own.defensive_rebounds + opponent.offensive_rebounds) as f64,
    )
}

/// All per-game rates for one side, given both box scores.
pub fn game_rates(own: &BoxScore, opponent: &BoxScore) -> GameRates {
    GameRates {
        possessions: Some(possessions(own)),
        offensive_efficiency: offensive_rating(own),
        defensive_efficiency: offensive_rating(opponent),
        effective_fg_percentage: effective_fg_percentage(own),
        turnover_rate: turnover_rate(own),
        offensive_rebound_rate: offensive_rebound_rate(own, opponent),
        defensive_rebound_rate: defensive_rebound_rate(own, opponent),
        free_throw_rate: free_throw_rate(own),
        three_pt_attempt_rate: three_pt_attempt_rate(own),
    }
}

/// Rate stats that are averaged per team and opponent-adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateStat {
    OffensiveEfficiency,
    EffectiveFgPercentage,
    TurnoverRate,
    OffensiveReboundRate,
    FreeThrowRate,
    ThreePtAttemptRate,
}

/// Accessors tying one `RateStat` to the fields it reads and writes.
pub struct StatColumns {
    pub stat: RateStat,
    pub name: &'static str,
    pub observed: fn(&TeamGame) -> Option<f64>,
    pub raw: fn(&mut RawAggregates) -> &mut Option<f64>,
    /// Adjusted offense and adjusted "allowed"; `None` for stats the
    /// convergence engine owns directly.
    pub adjusted: Option<(
        fn(&mut AdjustedFactors) -> &mut Option<f64>,
        fn(&mut AdjustedFactors) -> &mut Option<f64>,
    )>,
}

pub const RATE_STATS: &[StatColumns] = &[
    StatColumns {
        stat: RateStat::OffensiveEfficiency,
        name: "offensive_efficiency",
        observed: |g| g.rates.offensive_efficiency,
        raw: |r| &mut r.offensive_efficiency,
        adjusted: None,
    },
    StatColumns {
        stat: RateStat::EffectiveFgPercentage,
        name: "effective_fg_percentage",
        observed: |g| g.rates.effective_fg_percentage,
        raw: |r| &mut r.effective_fg_percentage,
        adjusted: Some((
            |a| &mut a.adj_effective_fg_percentage,
            |a| &mut a.adj_effective_fg_percentage_allowed,
        )),
    },
    StatColumns {
        stat: RateStat::TurnoverRate,
        name: "turnover_rate",
        observed: |g| g.rates.turnover_rate,
        raw: |r| &mut r.turnover_rate,
        adjusted: Some((
            |a| &mut a.adj_turnover_rate,
            |a| &mut a.adj_turnover_rate_forced,
        )),
    },
    StatColumns {
        stat: RateStat::OffensiveReboundRate,
        name: "offensive_rebound_rate",
        observed: |g| g.rates.offensive_rebound_rate,
        raw: |r| &mut r.offensive_rebound_rate,
        adjusted: Some((
            |a| &mut a.adj_offensive_rebound_rate,
            |a| &mut a.adj_offensive_rebound_rate_allowed,
        )),
    },
    StatColumns {
        stat: RateStat::FreeThrowRate,
        name: "free_throw_rate",
        observed: |g| g.rates.free_throw_rate,
        raw: |r| &mut r.free_throw_rate,
        adjusted: Some((
            |a| &mut a.adj_free_throw_rate,
            |a| &mut a.adj_free_throw_rate_allowed,
        )),
    },
    StatColumns {
        stat: RateStat::ThreePtAttemptRate,
        name: "three_pt_attempt_rate",
        observed: |g| g.rates.three_pt_attempt_rate,
        raw: |r| &mut r.three_pt_attempt_rate,
        adjusted: Some((
            |a| &mut a.adj_three_pt_attempt_rate,
            |a| &mut a.adj_three_pt_attempt_rate_allowed,
        )),
    },
];

pub fn columns(stat: RateStat) -> &'static StatColumns {
    RATE_STATS
        .iter()
        .find(|c| c.stat == stat)
        .unwrap_or(&RATE_STATS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_score() -> BoxScore {
        BoxScore {
            points: 75,
            field_goals_made: 27,
            field_goals_attempted: 60,
            three_pt_made: 8,
            three_pt_attempted: 22,
            free_throws_made: 13,
            free_throws_attempted: 16,
            offensive_rebounds: 10,
            defensive_rebounds: 24,
            turnovers: 12,
            minutes: Some(200),
        }
    }

    #[test]
    fn test_possessions_and_rating() {
        let b = box_score();
        // 60 - 10 + 12 + 0.475 * 16 = 69.6
        assert!((possessions(&b) - 69.6).abs() < 1e-9);
        let ortg = offensive_rating(&b).unwrap();
        assert!((ortg - 7500.0 / 69.6).abs() < 1e-9);
    }

    #[test]
    fn test_zero_denominators_are_unknown() {
        let empty = BoxScore::default();
        assert_eq!(offensive_rating(&empty), None);
        assert_eq!(effective_fg_percentage(&empty), None);
        assert_eq!(free_throw_rate(&empty), None);
        assert_eq!(offensive_rebound_rate(&empty, &empty), None);
    }

    #[test]
    fn test_rebound_rates_use_opponent() {
        let own = box_score();
        let mut opp = box_score();
        opp.defensive_rebounds = 30;
        opp.offensive_rebounds = 6;
        assert!((offensive_rebound_rate(&own, &opp).unwrap() - 0.25).abs() < 1e-9);
        assert!((defensive_rebound_rate(&own, &opp).unwrap() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_stat_table_routes_to_fields() {
        let mut factors = AdjustedFactors::default();
        let (offense, allowed) = columns(RateStat::TurnoverRate).adjusted.unwrap();
        *offense(&mut factors) = Some(0.18);
        *allowed(&mut factors) = Some(0.21);
        assert_eq!(factors.adj_turnover_rate, Some(0.18));
        assert_eq!(factors.adj_turnover_rate_forced, Some(0.21));
        assert!(columns(RateStat::OffensiveEfficiency).adjusted.is_none());
    }
}
