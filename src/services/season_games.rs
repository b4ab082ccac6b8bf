use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;

use crate::models::{Game, SeasonSlate, TeamGame};

/// Ratings "as of" a date see every game that started before that day began (UTC).
pub fn cutoff_for(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Read-only index over the finalized games of a slate up to a cutoff.
pub struct SeasonGames<'a> {
    pub cutoff: DateTime<Utc>,
    games: HashMap<&'a str, &'a Game>,
    by_team_season: HashMap<&'a str, Vec<&'a TeamGame>>,
}

impl<'a> SeasonGames<'a> {
    pub fn as_of(slate: &'a SeasonSlate, cutoff: DateTime<Utc>) -> Self {
        let games: HashMap<&str, &Game> = slate
            .games
            .iter()
            .filter(|game| game.is_final() && game.start_time <= cutoff)
            .map(|game| (game.id.as_str(), game))
            .collect();

        let mut by_team_season: HashMap<&str, Vec<&TeamGame>> = HashMap::new();
        for team_game in &slate.team_games {
            if games.contains_key(team_game.game_id.as_str()) {
                by_team_season
                    .entry(team_game.team_season_id.as_str())
                    .or_default()
                    .push(team_game);
            }
        }
        for rows in by_team_season.values_mut() {
            rows.sort_by_key(|tg| games.get(tg.game_id.as_str()).map(|g| g.start_time));
        }

        Self {
            cutoff,
            games,
            by_team_season,
        }
    }

    pub fn game(&self, game_id: &str) -> Option<&'a Game> {
        self.games.get(game_id).copied()
    }

    pub fn games(&self) -> impl Iterator<Item = &'a Game> + '_ {
        self.games.values().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// A team season's finalized box scores, oldest first.
    pub fn team_games(&self, team_season_id: &str) -> &[&'a TeamGame] {
        self.by_team_season
            .get(team_season_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn games_played(&self, team_season_id: &str) -> usize {
        self.team_games(team_season_id).len()
    }

    pub fn teams_with_at_least(&self, min_games: usize) -> usize {
        self.by_team_season
            .values()
            .filter(|rows| rows.len() >= min_games)
            .count()
    }
}
