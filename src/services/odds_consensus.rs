use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::GameOdd;
use crate::services::statistics::mean;

/// One bookmaker's prices for one game. Spread points are quoted for the home side.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BookmakerLine {
    pub bookmaker: String,
    pub moneyline_home: Option<i32>,
    pub moneyline_away: Option<i32>,
    pub spread_point: Option<f64>,
    pub spread_home_odds: Option<i32>,
    pub spread_away_odds: Option<i32>,
    pub total_points: Option<f64>,
    pub total_over_odds: Option<i32>,
    pub total_under_odds: Option<i32>,
}

/// Collapses several books into one market: mean prices, most common points.
pub struct OddsConsensus;

impl OddsConsensus {
    pub fn consensus(game_id: &str, lines: &[BookmakerLine], fetched_at: DateTime<Utc>) -> GameOdd {
        GameOdd {
            id: uuid::Uuid::new_v4().to_string(),
            game_id: game_id.to_string(),
            fetched_at,
            moneyline_home: average_price(lines, |l| l.moneyline_home),
            moneyline_away: average_price(lines, |l| l.moneyline_away),
            spread_point: mode(lines.iter().filter_map(|l| l.spread_point)),
            spread_home_odds: average_price(lines, |l| l.spread_home_odds),
            spread_away_odds: average_price(lines, |l| l.spread_away_odds),
            total_points: mode(lines.iter().filter_map(|l| l.total_points)),
            total_over_odds: average_price(lines, |l| l.total_over_odds),
            total_under_odds: average_price(lines, |l| l.total_under_odds),
        }
    }
}

fn average_price(lines: &[BookmakerLine], price: impl Fn(&BookmakerLine) -> Option<i32>) -> Option<i32> {
    let prices: Vec<f64> = lines.iter().filter_map(&price).map(f64::from).collect();
    mean(&prices).map(|avg| avg.round() as i32)
}

/// Most frequent value; ties go to the value seen first.
fn mode(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut counts: Vec<(f64, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(f64, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}
