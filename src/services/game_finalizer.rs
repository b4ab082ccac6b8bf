use crate::error::RatingsError;
use crate::models::{Game, GameStatus, Prediction, SeasonSlate, Team, TeamGame};
use crate::services::stat_formulae::{game_rates, possessions};
use crate::services::statistics::mean;

/// Result of finalizing one game inside a slate.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeOutcome {
    pub game_id: String,
    pub pace: f64,
    pub neutral: bool,
    /// Id of the prediction whose error fields were back-filled.
    pub prediction_id: Option<String>,
}

/// Moves a game to `final` and derives everything that depends on the result.
pub struct GameFinalizer;

impl GameFinalizer {
    /// Finalize `game_id` in place. `snapshot_ids` names the (home, away)
    /// snapshots whose prediction gets its errors back-filled.
    pub fn finalize(
        slate: &mut SeasonSlate,
        game_id: &str,
        snapshot_ids: Option<(&str, &str)>,
    ) -> Result<FinalizeOutcome, RatingsError> {
        let game_index = slate
            .games
            .iter()
            .position(|g| g.id == game_id)
            .ok_or_else(|| RatingsError::UnknownGame(game_id.to_string()))?;
        let home_index = side_index(&slate.team_games, &slate.games[game_index], true)?;
        let away_index = side_index(&slate.team_games, &slate.games[game_index], false)?;
        let home_team = slate
            .teams
            .iter()
            .find(|t| t.id == slate.games[game_index].home_team_id)
            .cloned();

        let game = &mut slate.games[game_index];
        let (home_row, away_row) = pair_mut(&mut slate.team_games, home_index, away_index);
        Self::finalize_game(game, home_team.as_ref(), home_row, away_row)?;

        let game = &slate.games[game_index];
        let home_row = &slate.team_games[home_index];
        let away_row = &slate.team_games[away_index];

        let mut prediction_id = None;
        if let Some((home_snapshot, away_snapshot)) = snapshot_ids {
            if let Some(prediction) = slate.predictions.iter_mut().find(|p| {
                p.game_id == game.id
                    && p.home_team_snapshot_id == home_snapshot
                    && p.away_team_snapshot_id == away_snapshot
            }) {
                Self::fill_prediction_errors(prediction, game, home_row, away_row);
                prediction_id = Some(prediction.id.clone());
            }
        }

        Ok(FinalizeOutcome {
            game_id: game.id.clone(),
            pace: game.pace().unwrap_or_default(),
            neutral: game.is_neutral(),
            prediction_id,
        })
    }

    /// Derive possessions, minutes, neutrality and per-side rates, then mark
    /// the game final. Nothing is written unless every step succeeds.
    pub fn finalize_game(
        game: &mut Game,
        home_team: Option<&Team>,
        home_row: &mut TeamGame,
        away_row: &mut TeamGame,
    ) -> Result<(), RatingsError> {
        if !game.status.can_transition_to(GameStatus::Final) {
            return Err(RatingsError::InvalidTransition {
                game_id: game.id.clone(),
                from: game.status.to_string(),
                to: GameStatus::Final.to_string(),
            });
        }

        let game_possessions = mean(&[possessions(&home_row.box_score), possessions(&away_row.box_score)]);
        let player_minutes: Vec<f64> = [home_row.box_score.minutes, away_row.box_score.minutes]
            .into_iter()
            .flatten()
            .map(f64::from)
            .collect();
        let minutes = mean(&player_minutes).map(|m| m / 5.0);

        let mut missing_inputs = Vec::new();
        if !minutes.is_some_and(|m| m > 0.0) {
            missing_inputs.push("minutes");
        }
        if !game_possessions.is_some_and(|p| p > 0.0) {
            missing_inputs.push("possessions");
        }
        if !missing_inputs.is_empty() {
            return Err(RatingsError::MissingDerivedStats {
                game_id: game.id.clone(),
                missing: missing_inputs.join(" and "),
            });
        }

        let home_rates = game_rates(&home_row.box_score, &away_row.box_score);
        let away_rates = game_rates(&away_row.box_score, &home_row.box_score);

        game.possessions = game_possessions;
        game.minutes = minutes;
        if game.neutral.is_none() {
            game.neutral = derive_neutrality(game.location.as_deref(), home_team);
        }
        game.home_team_score.get_or_insert(home_row.box_score.points);
        game.away_team_score.get_or_insert(away_row.box_score.points);
        home_row.rates = home_rates;
        away_row.rates = away_rates;
        game.transition(GameStatus::Final)
    }

    /// Errors are predicted minus actual; unknown actuals leave the field empty.
    pub fn fill_prediction_errors(prediction: &mut Prediction, game: &Game, home_row: &TeamGame, away_row: &TeamGame) {
        let error = |predicted: f64, actual: Option<f64>| actual.map(|a| predicted - a);

        prediction.home_offensive_efficiency_error =
            error(prediction.home_offensive_efficiency, home_row.rates.offensive_efficiency);
        prediction.away_offensive_efficiency_error =
            error(prediction.away_offensive_efficiency, away_row.rates.offensive_efficiency);
        prediction.home_defensive_efficiency_error =
            error(prediction.home_defensive_efficiency, home_row.rates.defensive_efficiency);
        prediction.away_defensive_efficiency_error =
            error(prediction.away_defensive_efficiency, away_row.rates.defensive_efficiency);
        prediction.pace_error = error(prediction.pace, game.pace());
        prediction.updated_at = chrono::Utc::now();
    }
}

/// Neutral when the venue names neither the home team's location nor its arena.
fn derive_neutrality(location: Option<&str>, home_team: Option<&Team>) -> Option<bool> {
    let home_location = home_team?.location.as_deref()?;
    let location = location?;
    let at_home_venue = home_team
        .and_then(|t| t.home_venue.as_deref())
        .is_some_and(|venue| venue == location);
    Some(!location.contains(home_location) && !at_home_venue)
}

fn side_index(team_games: &[TeamGame], game: &Game, home: bool) -> Result<usize, RatingsError> {
    team_games
        .iter()
        .position(|tg| tg.game_id == game.id && tg.home == home)
        .ok_or_else(|| RatingsError::MissingDerivedStats {
            game_id: game.id.clone(),
            missing: if home { "home box score" } else { "away box score" }.to_string(),
        })
}

fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoxScore;
    use crate::services::test_support::*;

    fn scheduled_with_box_scores() -> (SeasonSlate, String) {
        let mut slate = slate(&["home", "away"]);
        let game_id = add_scheduled(&mut slate, "home", "away", 5);
        for (team, home, points) in [("home", true, 80), ("away", false, 70)] {
            slate.team_games.push(TeamGame {
                id: format!("{}-{}", game_id, team),
                game_id: game_id.clone(),
                team_id: team_id(team),
                team_season_id: team_season_id(team),
                opponent_team_season_id: Some(team_season_id(if home { "away" } else { "home" })),
                home,
                box_score: BoxScore {
                    points,
                    field_goals_made: 28,
                    field_goals_attempted: 60,
                    three_pt_made: 8,
                    three_pt_attempted: 22,
                    free_throws_made: 12,
                    free_throws_attempted: 16,
                    offensive_rebounds: 10,
                    defensive_rebounds: 24,
                    turnovers: 12,
                    minutes: Some(200),
                },
                rates: Default::default(),
                created_at: chrono::Utc::now(),
            });
        }
        (slate, game_id)
    }

    #[test]
    fn test_finalize_derives_pace_and_rates() {
        let (mut slate, game_id) = scheduled_with_box_scores();
        slate.teams[0].location = Some("Durham".to_string());
        slate.games[0].location = Some("Cameron Indoor Stadium, Durham, NC".to_string());

        let outcome = GameFinalizer::finalize(&mut slate, &game_id, None).unwrap();

        let game = &slate.games[0];
        assert_eq!(game.status, GameStatus::Final);
        // 60 - 10 + 12 + 0.475 * 16 = 69.6 per side
        assert!((game.possessions.unwrap() - 69.6).abs() < 1e-9);
        assert_eq!(game.minutes, Some(40.0));
        assert!((outcome.pace - 69.6).abs() < 1e-9);
        assert!(!outcome.neutral);
        assert_eq!(game.home_team_score, Some(80));

        let home_row = slate.team_games.iter().find(|tg| tg.home).unwrap();
        assert!((home_row.rates.offensive_efficiency.unwrap() - 8000.0 / 69.6).abs() < 1e-9);
        assert!((home_row.rates.defensive_efficiency.unwrap() - 7000.0 / 69.6).abs() < 1e-9);
    }

    #[test]
    fn test_neutrality_from_location() {
        let (mut slate, game_id) = scheduled_with_box_scores();
        slate.teams[0].location = Some("Durham".to_string());
        slate.games[0].location = Some("Madison Square Garden, New York".to_string());

        let outcome = GameFinalizer::finalize(&mut slate, &game_id, None).unwrap();
        assert!(outcome.neutral);
    }

    #[test]
    fn test_missing_minutes_is_rejected_without_changes() {
        let (mut slate, game_id) = scheduled_with_box_scores();
        for row in &mut slate.team_games {
            row.box_score.minutes = None;
        }

        let err = GameFinalizer::finalize(&mut slate, &game_id, None).unwrap_err();
        assert!(matches!(err, RatingsError::MissingDerivedStats { ref missing, .. } if missing == "minutes"));
        assert_eq!(slate.games[0].status, GameStatus::Scheduled);
        assert!(slate.games[0].possessions.is_none());
    }

    #[test]
    fn test_final_is_terminal() {
        let (mut slate, game_id) = scheduled_with_box_scores();
        GameFinalizer::finalize(&mut slate, &game_id, None).unwrap();
        let err = GameFinalizer::finalize(&mut slate, &game_id, None).unwrap_err();
        assert!(matches!(err, RatingsError::InvalidTransition { .. }));
    }

    #[test]
    fn test_prediction_errors_are_predicted_minus_actual() {
        let (mut slate, game_id) = scheduled_with_box_scores();
        let now = chrono::Utc::now();
        slate.predictions.push(Prediction {
            id: "p1".to_string(),
            game_id: game_id.clone(),
            ratings_config_version_id: "v1".to_string(),
            home_team_snapshot_id: "snap-home".to_string(),
            away_team_snapshot_id: "snap-away".to_string(),
            home_offensive_efficiency: 110.0,
            away_offensive_efficiency: 100.0,
            home_defensive_efficiency: 100.0,
            away_defensive_efficiency: 110.0,
            pace: 70.0,
            home_score: 77.0,
            away_score: 70.0,
            home_win_probability: 0.7,
            margin_std_deviation: 10.0,
            confidence_level: "High".to_string(),
            home_offensive_efficiency_error: None,
            away_offensive_efficiency_error: None,
            home_defensive_efficiency_error: None,
            away_defensive_efficiency_error: None,
            pace_error: None,
            created_at: now,
            updated_at: now,
        });

        let outcome = GameFinalizer::finalize(&mut slate, &game_id, Some(("snap-home", "snap-away"))).unwrap();
        assert_eq!(outcome.prediction_id.as_deref(), Some("p1"));

        let prediction = &slate.predictions[0];
        assert!((prediction.pace_error.unwrap() - 0.4).abs() < 1e-9);
        assert!((prediction.home_offensive_efficiency_error.unwrap() - (110.0 - 8000.0 / 69.6)).abs() < 1e-9);
        assert!(prediction.has_errors());
    }
}
