use std::collections::HashMap;
use strsim::jaro_winkler;

use crate::models::Team;
use crate::utils::normalize_name;

/// Minimum Jaro-Winkler similarity for a fuzzy match.
const FUZZY_THRESHOLD: f64 = 0.92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    Fuzzy,
    Alias,
    Exact,
}

#[derive(Debug, Clone, Copy)]
pub struct TeamMatch<'a> {
    pub team: &'a Team,
    pub kind: MatchKind,
    pub score: f64,
}

/// Resolves team names from box-score and odds feeds to known teams.
pub struct TeamMatcher<'a> {
    teams: &'a [Team],
    aliases: HashMap<String, &'a Team>,
}

impl<'a> TeamMatcher<'a> {
    pub fn new(teams: &'a [Team]) -> Self {
        let mut aliases = HashMap::new();
        for team in teams {
            for alias in &team.aliases {
                aliases.insert(normalize_name(alias), team);
            }
        }
        Self { teams, aliases }
    }

    /// Exact name, then normalized alias, then the closest fuzzy name.
    pub fn find(&self, input: &str) -> Option<TeamMatch<'a>> {
        if let Some(team) = self.teams.iter().find(|t| t.name.eq_ignore_ascii_case(input)) {
            return Some(TeamMatch {
                team,
                kind: MatchKind::Exact,
                score: 1.0,
            });
        }

        let normalized = normalize_name(input);
        if let Some(team) = self.aliases.get(&normalized) {
            return Some(TeamMatch {
                team,
                kind: MatchKind::Alias,
                score: 1.0,
            });
        }

        let mut best: Option<TeamMatch<'a>> = None;
        for team in self.teams {
            for name in std::iter::once(&team.name).chain(team.aliases.iter()) {
                let score = jaro_winkler(&normalized, &normalize_name(name));
                if score > FUZZY_THRESHOLD && best.map_or(true, |b| score > b.score) {
                    best = Some(TeamMatch {
                        team,
                        kind: MatchKind::Fuzzy,
                        score,
                    });
                }
            }
        }

        if best.is_none() {
            tracing::debug!("No team match for '{}'", input);
        }
        best
    }

    pub fn team(&self, input: &str) -> Option<&'a Team> {
        self.find(input).map(|m| m.team)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn team(id: &str, name: &str, aliases: &[&str]) -> Team {
        Team {
            id: id.to_string(),
            name: name.to_string(),
            location: None,
            home_venue: None,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn teams() -> Vec<Team> {
        vec![
            team("1", "Connecticut", &["UConn", "Connecticut Huskies"]),
            team("2", "Saint Mary's", &["St. Mary's (CA)"]),
            team("3", "Gonzaga", &[]),
        ]
    }

    #[test]
    fn test_exact_is_case_insensitive() {
        let teams = teams();
        let found = TeamMatcher::new(&teams).find("GONZAGA").unwrap();
        assert_eq!(found.team.id, "3");
        assert_eq!(found.kind, MatchKind::Exact);
    }

    #[test]
    fn test_alias_ignores_punctuation() {
        let teams = teams();
        let matcher = TeamMatcher::new(&teams);
        assert_eq!(matcher.team("uconn").unwrap().id, "1");
        let found = matcher.find("St Marys CA").unwrap();
        assert_eq!(found.team.id, "2");
        assert_eq!(found.kind, MatchKind::Alias);
    }

    #[test]
    fn test_fuzzy_needs_a_close_name() {
        let teams = teams();
        let matcher = TeamMatcher::new(&teams);
        let found = matcher.find("Gonzga").unwrap();
        assert_eq!(found.team.id, "3");
        assert_eq!(found.kind, MatchKind::Fuzzy);
        assert!(matcher.find("Kentucky").is_none());
    }
}
