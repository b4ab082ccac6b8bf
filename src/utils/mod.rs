use chrono::NaiveDate;

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Units won per unit staked at American odds.
pub fn payout_per_unit(american_odds: i32) -> f64 {
    if american_odds > 0 {
        american_odds as f64 / 100.0
    } else if american_odds < 0 {
        100.0 / american_odds.unsigned_abs() as f64
    } else {
        0.0
    }
}

/// Expected value of a one-unit stake.
pub fn expected_value(probability: f64, american_odds: i32) -> f64 {
    probability * payout_per_unit(american_odds) - (1.0 - probability)
}

/// Break-even probability implied by American odds.
pub fn implied_probability(american_odds: i32) -> Option<f64> {
    let payout = payout_per_unit(american_odds);
    if payout <= 0.0 {
        return None;
    }
    Some(1.0 / (1.0 + payout))
}

/// Lowercase alphanumerics only, for comparing team names across sources.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Every date from `start` to `end`, inclusive.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|date| *date <= end)
        .collect()
}

/// Calculate win percentage from wins and losses
pub fn calculate_win_percentage(wins: i32, losses: i32) -> f64 {
    let total_games = wins + losses;
    if total_games == 0 {
        return 0.0;
    }
    wins as f64 / total_games as f64 * 100.0
}

/// Format a signed rating for display, e.g. "+12.4".
pub fn format_signed(value: f64) -> String {
    format!("{:+.1}", value)
}
