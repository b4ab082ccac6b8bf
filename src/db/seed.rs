use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::RatingsConfig;
use crate::models::*;

use super::{
    upsert_game, upsert_game_odd, upsert_offseason_profile, upsert_season, upsert_team, upsert_team_game,
    upsert_team_season,
};

/// Demo strength for one team: (offense, defense, pace) per 100 possessions.
struct DemoTeam {
    id: &'static str,
    name: &'static str,
    location: &'static str,
    venue: &'static str,
    aliases: &'static [&'static str],
    offense: f64,
    defense: f64,
    pace: f64,
}

const DEMO_TEAMS: &[DemoTeam] = &[
    DemoTeam { id: "team_gonzaga", name: "Gonzaga", location: "Spokane, WA", venue: "McCarthey Athletic Center", aliases: &["Gonzaga Bulldogs", "Zags"], offense: 119.0, defense: 97.0, pace: 71.5 },
    DemoTeam { id: "team_saint_marys", name: "Saint Mary's", location: "Moraga, CA", venue: "University Credit Union Pavilion", aliases: &["St. Mary's (CA)", "Saint Mary's Gaels"], offense: 112.0, defense: 94.5, pace: 63.5 },
    DemoTeam { id: "team_san_francisco", name: "San Francisco", location: "San Francisco, CA", venue: "War Memorial Gymnasium", aliases: &["USF", "San Francisco Dons"], offense: 110.0, defense: 101.0, pace: 68.0 },
    DemoTeam { id: "team_santa_clara", name: "Santa Clara", location: "Santa Clara, CA", venue: "Leavey Center", aliases: &["Santa Clara Broncos"], offense: 111.5, defense: 103.0, pace: 69.0 },
    DemoTeam { id: "team_oregon_state", name: "Oregon State", location: "Corvallis, OR", venue: "Gill Coliseum", aliases: &["Oregon St.", "Oregon State Beavers"], offense: 108.0, defense: 104.5, pace: 66.5 },
    DemoTeam { id: "team_washington_state", name: "Washington State", location: "Pullman, WA", venue: "Beasley Coliseum", aliases: &["Washington St.", "Wazzu"], offense: 106.5, defense: 105.0, pace: 70.0 },
    DemoTeam { id: "team_loyola_marymount", name: "Loyola Marymount", location: "Los Angeles, CA", venue: "Gersten Pavilion", aliases: &["LMU", "Loyola Marymount Lions"], offense: 103.0, defense: 106.0, pace: 67.0 },
    DemoTeam { id: "team_pepperdine", name: "Pepperdine", location: "Malibu, CA", venue: "Firestone Fieldhouse", aliases: &["Pepperdine Waves"], offense: 101.0, defense: 110.0, pace: 70.5 },
];

const HOME_EDGE: f64 = 1.5;
const DAYS_BETWEEN_ROUNDS: i64 = 2;
/// Rounds at the end of the schedule left without box scores.
const UNPLAYED_ROUNDS: usize = 2;

pub async fn seed_data(pool: &SqlitePool) -> Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams")
        .fetch_one(pool)
        .await?;

    if count > 0 {
        tracing::info!("Database already seeded ({} teams found), skipping.", count);
        return Ok(());
    }

    tracing::info!("Seeding database with a demo conference season...");

    let config = RatingsConfig::default();
    seed_teams(pool).await?;
    seed_prior_season(pool, &config).await?;
    let games = seed_current_season(pool, &config).await?;

    tracing::info!("Database seeded successfully: {} teams, {} games.", DEMO_TEAMS.len(), games);
    Ok(())
}

async fn seed_teams(pool: &SqlitePool) -> Result<()> {
    let now = Utc::now();
    for demo in DEMO_TEAMS {
        let team = Team {
            id: demo.id.to_string(),
            name: demo.name.to_string(),
            location: Some(demo.location.to_string()),
            home_venue: Some(demo.venue.to_string()),
            aliases: demo.aliases.iter().map(|a| a.to_string()).collect(),
            created_at: now,
            updated_at: now,
        };
        upsert_team(pool, &team).await?;
    }
    Ok(())
}

fn season(year: i32, start: NaiveDate, end: NaiveDate, current: bool) -> Season {
    let now = Utc::now();
    Season {
        id: format!("season_{}", year),
        year,
        name: format!("{}-{:02}", year - 1, year % 100),
        start_date: start,
        end_date: end,
        average_efficiency: None,
        average_pace: None,
        efficiency_std_deviation: None,
        pace_std_deviation: None,
        current,
        created_at: now,
        updated_at: now,
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| anyhow::anyhow!("Invalid date {}-{}-{}", year, month, day))
}

/// Final ratings only; the prior year feeds preseason seeding.
async fn seed_prior_season(pool: &SqlitePool, config: &RatingsConfig) -> Result<()> {
    let mut prior = season(2024, ymd(2023, 11, 6)?, ymd(2024, 4, 8)?, false);
    prior.average_efficiency = Some(106.2);
    prior.average_pace = Some(68.4);
    prior.efficiency_std_deviation = Some(10.8);
    prior.pace_std_deviation = Some(4.1);
    upsert_season(pool, &prior).await?;

    for (i, demo) in DEMO_TEAMS.iter().enumerate() {
        // Last year's table is a little more compressed than this year's
        let drift = (i as f64 - 3.5) * 0.6;
        let mut team_season = TeamSeason::new(demo.id, &prior.id, &config.season_defaults);
        team_season.set_ratings(demo.offense - drift, demo.defense + drift * 0.5, demo.pace - 0.5);
        upsert_team_season(pool, &team_season).await?;
    }
    Ok(())
}

async fn seed_current_season(pool: &SqlitePool, config: &RatingsConfig) -> Result<usize> {
    let current = season(2025, ymd(2024, 11, 4)?, ymd(2025, 4, 7)?, true);
    upsert_season(pool, &current).await?;

    let mut team_seasons = Vec::new();
    for (i, demo) in DEMO_TEAMS.iter().enumerate() {
        let mut team_season = TeamSeason::new(demo.id, &current.id, &config.season_defaults);
        if demo.id == "team_gonzaga" || demo.id == "team_saint_marys" {
            team_season.home_offense_boost = Some(2.5);
            team_season.home_defense_boost = Some(-2.0);
        }
        upsert_team_season(pool, &team_season).await?;

        let profile = TeamOffseasonProfile {
            id: Uuid::new_v4().to_string(),
            team_season_id: team_season.id.clone(),
            recruiting_score: Some(40.0 - i as f64 * 3.0),
            returning_minutes_pct: Some(0.45 + (i % 4) as f64 * 0.1),
            manual_adjustment: None,
        };
        upsert_offseason_profile(pool, &profile).await?;
        team_seasons.push(team_season);
    }

    let mut rng = StdRng::seed_from_u64(2025);
    let rounds = double_round_robin(DEMO_TEAMS.len());
    let played_rounds = rounds.len().saturating_sub(UNPLAYED_ROUNDS);
    let mut game_count = 0;

    for (round, pairings) in rounds.iter().enumerate() {
        let day = current.start_date + Duration::days(round as i64 * DAYS_BETWEEN_ROUNDS);
        for (slot, &(home, away)) in pairings.iter().enumerate() {
            let home_team = &DEMO_TEAMS[home];
            let away_team = &DEMO_TEAMS[away];
            let start_time = day
                .and_hms_opt(19 + slot as u32, 0, 0)
                .ok_or_else(|| anyhow::anyhow!("Invalid tip time for round {}", round))?
                .and_utc();
            // One early-season tournament game in Las Vegas
            let neutral_site = round == 1 && slot == 0;
            let now = Utc::now();

            let game = Game {
                id: format!("game_{:03}", game_count + 1),
                season_id: current.id.clone(),
                start_time,
                home_team_id: home_team.id.to_string(),
                away_team_id: away_team.id.to_string(),
                home_team_name: home_team.name.to_string(),
                away_team_name: away_team.name.to_string(),
                home_team_score: None,
                away_team_score: None,
                location: Some(if neutral_site {
                    "T-Mobile Arena, Las Vegas, NV".to_string()
                } else {
                    home_team.venue.to_string()
                }),
                neutral: None,
                status: GameStatus::Scheduled,
                possessions: None,
                minutes: None,
                created_at: now,
                updated_at: now,
            };
            upsert_game(pool, &game).await?;
            game_count += 1;

            if round >= played_rounds {
                upsert_game_odd(pool, &demo_odds(&game, home_team, away_team, neutral_site)).await?;
                continue;
            }

            let possessions = (home_team.pace + away_team.pace) / 2.0 + rng.gen_range(-4.0..4.0);
            let edge = if neutral_site { 0.0 } else { HOME_EDGE };
            let minutes = if rng.gen_range(0.0..1.0) < 0.08 { 225 } else { 200 };
            let overtime_scale = minutes as f64 / 200.0;

            let home_ortg = home_team.offense + away_team.defense - 105.5 + edge + rng.gen_range(-9.0..9.0);
            let away_ortg = away_team.offense + home_team.defense - 105.5 - edge + rng.gen_range(-9.0..9.0);

            let home_box = box_score(home_ortg, possessions * overtime_scale, minutes, &mut rng);
            let away_box = box_score(away_ortg, possessions * overtime_scale, minutes, &mut rng);

            let home_season = &team_seasons[home];
            let away_season = &team_seasons[away];
            for (team_season, opponent, box_score, is_home) in [
                (home_season, away_season, home_box, true),
                (away_season, home_season, away_box, false),
            ] {
                let row = TeamGame {
                    id: Uuid::new_v4().to_string(),
                    game_id: game.id.clone(),
                    team_id: team_season.team_id.clone(),
                    team_season_id: team_season.id.clone(),
                    opponent_team_season_id: Some(opponent.id.clone()),
                    home: is_home,
                    box_score,
                    rates: GameRates::default(),
                    created_at: now,
                };
                upsert_team_game(pool, &row).await?;
            }
        }
    }

    Ok(game_count)
}

/// Circle-method schedule: every pair meets twice, once at each venue.
fn double_round_robin(teams: usize) -> Vec<Vec<(usize, usize)>> {
    let mut order: Vec<usize> = (0..teams).collect();
    let mut first_half = Vec::new();
    for round in 0..teams - 1 {
        let pairings = (0..teams / 2)
            .map(|i| {
                let (a, b) = (order[i], order[teams - 1 - i]);
                if (round + i) % 2 == 0 {
                    (a, b)
                } else {
                    (b, a)
                }
            })
            .collect();
        first_half.push(pairings);
        order[1..].rotate_right(1);
    }

    let second_half: Vec<Vec<(usize, usize)>> = first_half
        .iter()
        .map(|round: &Vec<(usize, usize)>| round.iter().map(|&(home, away)| (away, home)).collect())
        .collect();
    first_half.into_iter().chain(second_half).collect()
}

/// Counting stats that land close to the requested efficiency and possessions.
fn box_score(ortg: f64, possessions: f64, minutes: i32, rng: &mut StdRng) -> BoxScore {
    let target_points = (ortg * possessions / 100.0).round().max(40.0) as i32;
    let free_throws_attempted = (possessions * rng.gen_range(0.24..0.36)).round() as i32;
    let turnovers = (possessions * rng.gen_range(0.14..0.20)).round() as i32;
    let offensive_rebounds = rng.gen_range(6..14);
    let field_goals_attempted =
        (possessions + offensive_rebounds as f64 - turnovers as f64 - 0.475 * free_throws_attempted as f64).round() as i32;
    let three_pt_attempted = (field_goals_attempted as f64 * rng.gen_range(0.30..0.45)).round() as i32;
    let three_pt_made = (three_pt_attempted as f64 * rng.gen_range(0.28..0.40)).round() as i32;

    let mut free_throws_made = (free_throws_attempted as f64 * 0.72).round() as i32;
    // points = 2 * FGM + 3PM + FTM, so the remainder must be even
    if (target_points - three_pt_made - free_throws_made) % 2 != 0 {
        free_throws_made -= 1;
    }
    let field_goals_made = ((target_points - three_pt_made - free_throws_made) / 2)
        .clamp(three_pt_made, field_goals_attempted);

    BoxScore {
        points: 2 * field_goals_made + three_pt_made + free_throws_made,
        field_goals_made,
        field_goals_attempted,
        three_pt_made,
        three_pt_attempted,
        free_throws_made,
        free_throws_attempted,
        offensive_rebounds,
        defensive_rebounds: rng.gen_range(20..30),
        turnovers,
        minutes: Some(minutes),
    }
}

/// A plausible consensus line for an unplayed game.
fn demo_odds(game: &Game, home: &DemoTeam, away: &DemoTeam, neutral: bool) -> GameOdd {
    let edge = if neutral { 0.0 } else { HOME_EDGE };
    let pace = (home.pace + away.pace) / 2.0;
    let home_points = (home.offense + away.defense - 105.5 + edge) * pace / 100.0;
    let away_points = (away.offense + home.defense - 105.5 - edge) * pace / 100.0;
    let spread = ((away_points - home_points) * 2.0).round() / 2.0;
    let total = ((home_points + away_points) * 2.0).round() / 2.0;
    let (moneyline_home, moneyline_away) = if spread <= 0.0 {
        (-(110 + (spread.abs() * 25.0) as i32), 100 + (spread.abs() * 20.0) as i32)
    } else {
        (100 + (spread * 20.0) as i32, -(110 + (spread * 25.0) as i32))
    };

    GameOdd {
        id: Uuid::new_v4().to_string(),
        game_id: game.id.clone(),
        fetched_at: Utc::now(),
        moneyline_home: Some(moneyline_home),
        moneyline_away: Some(moneyline_away),
        spread_point: Some(spread),
        spread_home_odds: Some(-110),
        spread_away_odds: Some(-110),
        total_points: Some(total),
        total_over_odds: Some(-110),
        total_under_odds: Some(-110),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::stat_formulae::possessions;

    #[test]
    fn test_schedule_meets_every_pair_twice() {
        let rounds = double_round_robin(8);
        assert_eq!(rounds.len(), 14);
        for round in &rounds {
            let mut seen: Vec<usize> = round.iter().flat_map(|&(h, a)| [h, a]).collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..8).collect::<Vec<_>>());
        }
        for home in 0..8 {
            for away in (0..8).filter(|a| *a != home) {
                let count = rounds.iter().flatten().filter(|&&p| p == (home, away)).count();
                assert_eq!(count, 1, "{} hosting {}", home, away);
            }
        }
    }

    #[test]
    fn test_box_score_is_consistent() {
        let mut rng = StdRng::seed_from_u64(7);
        let box_score = box_score(110.0, 70.0, 200, &mut rng);
        assert_eq!(
            box_score.points,
            2 * box_score.field_goals_made + box_score.three_pt_made + box_score.free_throws_made
        );
        assert!((possessions(&box_score) - 70.0).abs() < 1.0);
        assert!((box_score.points - 77).abs() <= 2);
    }
}
