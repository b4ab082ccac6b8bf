//! Slate builders shared by the service tests.

use chrono::{NaiveDate, TimeZone, Utc};

use crate::config::SeasonDefaults;
use crate::models::*;

pub fn team_id(name: &str) -> String {
    format!("t-{}", name)
}

pub fn team_season_id(name: &str) -> String {
    format!("ts-{}", name)
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 11, day).unwrap()
}

pub fn slate(names: &[&str]) -> SeasonSlate {
    let now = Utc::now();
    let defaults = SeasonDefaults::default();
    SeasonSlate {
        season: Season {
            id: "s-2025".to_string(),
            year: 2025,
            name: "2024-25".to_string(),
            start_date: date(1),
            end_date: NaiveDate::from_ymd_opt(2025, 4, 10).unwrap(),
            average_efficiency: None,
            average_pace: None,
            efficiency_std_deviation: None,
            pace_std_deviation: None,
            current: true,
            created_at: now,
            updated_at: now,
        },
        teams: names
            .iter()
            .map(|name| Team {
                id: team_id(name),
                name: name.to_string(),
                location: None,
                home_venue: None,
                aliases: Vec::new(),
                created_at: now,
                updated_at: now,
            })
            .collect(),
        team_seasons: names
            .iter()
            .map(|name| {
                let mut ts = TeamSeason::new(&team_id(name), "s-2025", &defaults);
                ts.id = team_season_id(name);
                ts
            })
            .collect(),
        games: Vec::new(),
        team_games: Vec::new(),
        predictions: Vec::new(),
    }
}

fn team_game(game_id: &str, own: &str, opponent: &str, home: bool, ortg: f64, drtg: f64, pace: f64) -> TeamGame {
    TeamGame {
        id: format!("{}-{}", game_id, own),
        game_id: game_id.to_string(),
        team_id: team_id(own),
        team_season_id: team_season_id(own),
        opponent_team_season_id: Some(team_season_id(opponent)),
        home,
        box_score: BoxScore {
            points: (ortg * pace / 100.0).round() as i32,
            field_goals_made: 25,
            field_goals_attempted: 55,
            three_pt_made: 7,
            three_pt_attempted: 20,
            free_throws_made: 12,
            free_throws_attempted: 16,
            offensive_rebounds: 9,
            defensive_rebounds: 24,
            turnovers: 12,
            minutes: Some(200),
        },
        rates: GameRates {
            possessions: Some(pace),
            offensive_efficiency: Some(ortg),
            defensive_efficiency: Some(drtg),
            effective_fg_percentage: Some(0.5),
            turnover_rate: Some(0.18),
            offensive_rebound_rate: Some(0.3),
            defensive_rebound_rate: Some(0.7),
            free_throw_rate: Some(0.3),
            three_pt_attempt_rate: Some(0.36),
        },
        created_at: Utc::now(),
    }
}

/// Add a finalized 40-minute game on `day` with the given per-100 ratings.
pub fn add_result(
    slate: &mut SeasonSlate,
    home: &str,
    away: &str,
    day: u32,
    home_ortg: f64,
    away_ortg: f64,
    pace: f64,
) -> String {
    let game_id = format!("g-{}-{}-{}", home, away, day);
    let start_time = Utc.with_ymd_and_hms(2024, 11, day, 19, 0, 0).unwrap();
    slate.games.push(Game {
        id: game_id.clone(),
        season_id: slate.season.id.clone(),
        start_time,
        home_team_id: team_id(home),
        away_team_id: team_id(away),
        home_team_name: home.to_string(),
        away_team_name: away.to_string(),
        home_team_score: Some((home_ortg * pace / 100.0).round() as i32),
        away_team_score: Some((away_ortg * pace / 100.0).round() as i32),
        location: None,
        neutral: Some(true),
        status: GameStatus::Final,
        possessions: Some(pace),
        minutes: Some(40.0),
        created_at: start_time,
        updated_at: start_time,
    });
    slate
        .team_games
        .push(team_game(&game_id, home, away, true, home_ortg, away_ortg, pace));
    slate
        .team_games
        .push(team_game(&game_id, away, home, false, away_ortg, home_ortg, pace));
    game_id
}

pub fn add_scheduled(slate: &mut SeasonSlate, home: &str, away: &str, day: u32) -> String {
    let game_id = format!("g-{}-{}-{}", home, away, day);
    let start_time = Utc.with_ymd_and_hms(2024, 11, day, 19, 0, 0).unwrap();
    slate.games.push(Game {
        id: game_id.clone(),
        season_id: slate.season.id.clone(),
        start_time,
        home_team_id: team_id(home),
        away_team_id: team_id(away),
        home_team_name: home.to_string(),
        away_team_name: away.to_string(),
        home_team_score: None,
        away_team_score: None,
        location: None,
        neutral: None,
        status: GameStatus::Scheduled,
        possessions: None,
        minutes: None,
        created_at: start_time,
        updated_at: start_time,
    });
    game_id
}

pub fn snapshot(name: &str, off: f64, def: f64, pace: f64) -> TeamRatingSnapshot {
    TeamRatingSnapshot {
        id: format!("snap-{}", name),
        team_id: team_id(name),
        season_id: "s-2025".to_string(),
        team_season_id: team_season_id(name),
        ratings_config_version_id: "v1".to_string(),
        snapshot_date: date(1),
        rating: off - def,
        adj_offensive_efficiency: off,
        adj_defensive_efficiency: def,
        adj_pace: pace,
        offensive_efficiency_volatility: None,
        defensive_efficiency_volatility: None,
        pace_volatility: None,
        home_offense_boost: None,
        home_defense_boost: None,
        wins: 0,
        losses: 0,
        factors: AdjustedFactors::default(),
        created_at: Utc::now(),
    }
}

pub fn season_averages(efficiency: f64, pace: f64) -> SeasonAverages {
    SeasonAverages {
        average_efficiency: efficiency,
        average_pace: pace,
        efficiency_std_deviation: 11.0,
        pace_std_deviation: 4.5,
    }
}
