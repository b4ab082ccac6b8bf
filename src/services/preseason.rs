use std::collections::HashMap;

use crate::config::RatingsConfig;
use crate::models::{Season, SeasonSlate, TeamOffseasonProfile, TeamSeason};
use crate::services::overall_ratings::TeamRatings;

/// The season before the one being seeded, when it exists.
#[derive(Debug, Clone, Copy)]
pub struct PriorSeason<'a> {
    pub season: &'a Season,
    pub team_seasons: &'a [TeamSeason],
}

/// Season bootstrap: blends each team's final prior-season ratings toward
/// the prior league average and applies its offseason delta.
pub struct PreseasonRatingsCalculator<'a> {
    config: &'a RatingsConfig,
}

impl<'a> PreseasonRatingsCalculator<'a> {
    pub fn new(config: &'a RatingsConfig) -> Self {
        Self { config }
    }

    pub fn calculate(
        &self,
        team_season: &TeamSeason,
        prior: Option<PriorSeason<'_>>,
        profile: Option<&TeamOffseasonProfile>,
    ) -> TeamRatings {
        let defaults = &self.config.season_defaults;
        let league_efficiency = prior
            .and_then(|p| p.season.average_efficiency)
            .unwrap_or(defaults.average_efficiency);
        let league_pace = prior
            .and_then(|p| p.season.average_pace)
            .unwrap_or(defaults.average_pace);
        let previous = prior.and_then(|p| {
            p.team_seasons
                .iter()
                .find(|ts| ts.team_id == team_season.team_id)
        });

        let blend = |league: f64, previous: Option<f64>| match previous {
            Some(value) => self.config.preseason.league_weight * league + self.config.preseason.prior_weight * value,
            None => league,
        };
        let delta = profile.map_or(0.0, TeamOffseasonProfile::efficiency_adjustment);

        TeamRatings::new(
            blend(league_efficiency, previous.map(|ts| ts.adj_offensive_efficiency)) + delta,
            blend(league_efficiency, previous.map(|ts| ts.adj_defensive_efficiency)) - delta,
            blend(league_pace, previous.map(|ts| ts.adj_pace)),
        )
    }

    /// Write preseason ratings for every team season in the slate.
    pub fn run(&self, slate: &mut SeasonSlate, prior: Option<PriorSeason<'_>>, profiles: &[TeamOffseasonProfile]) {
        let profiles: HashMap<&str, &TeamOffseasonProfile> = profiles
            .iter()
            .map(|p| (p.team_season_id.as_str(), p))
            .collect();

        for team_season in &mut slate.team_seasons {
            let ratings = self.calculate(team_season, prior, profiles.get(team_season.id.as_str()).copied());
            team_season.preseason_adj_offensive_efficiency = Some(ratings.offense);
            team_season.preseason_adj_defensive_efficiency = Some(ratings.defense);
            team_season.preseason_adj_pace = Some(ratings.pace);
        }
        tracing::info!("Calculated preseason ratings for {} teams", slate.team_seasons.len());
    }
}

/// Copies preseason ratings into the live adjusted fields.
pub struct PreseasonInitializer<'a> {
    calculator: PreseasonRatingsCalculator<'a>,
}

impl<'a> PreseasonInitializer<'a> {
    pub fn new(config: &'a RatingsConfig) -> Self {
        Self {
            calculator: PreseasonRatingsCalculator::new(config),
        }
    }

    pub fn run(&self, slate: &mut SeasonSlate, prior: Option<PriorSeason<'_>>, profiles: &[TeamOffseasonProfile]) {
        self.calculator.run(slate, prior, profiles);
        for ts in &mut slate.team_seasons {
            if let (Some(offense), Some(defense), Some(pace)) = (
                ts.preseason_adj_offensive_efficiency,
                ts.preseason_adj_defensive_efficiency,
                ts.preseason_adj_pace,
            ) {
                ts.set_ratings(offense, defense, pace);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;

    fn profile(team_season_id: &str, recruiting: f64, returning: f64) -> TeamOffseasonProfile {
        TeamOffseasonProfile {
            id: format!("p-{}", team_season_id),
            team_season_id: team_season_id.to_string(),
            recruiting_score: Some(recruiting),
            returning_minutes_pct: Some(returning),
            manual_adjustment: None,
        }
    }

    #[test]
    fn test_no_prior_season_uses_defaults() {
        let config = RatingsConfig::default();
        let mut slate = slate(&["a"]);
        PreseasonInitializer::new(&config).run(&mut slate, None, &[]);

        let a = &slate.team_seasons[0];
        // No profile, no offseason delta
        assert_eq!(a.preseason_adj_offensive_efficiency, Some(105.5));
        assert_eq!(a.adj_pace, 69.5);
        assert_eq!(a.rating, 0.0);
    }

    #[test]
    fn test_blend_and_offseason_delta() {
        let config = RatingsConfig::default();
        let mut prior = slate(&["a", "b"]);
        prior.season.average_efficiency = Some(100.0);
        prior.season.average_pace = Some(70.0);
        prior.team_seasons[0].set_ratings(120.0, 90.0, 60.0);

        let mut current = slate(&["a", "b"]);
        let profiles = vec![profile("ts-a", 50.0, 0.6)];
        let prior_view = PriorSeason {
            season: &prior.season,
            team_seasons: &prior.team_seasons,
        };
        PreseasonInitializer::new(&config).run(&mut current, Some(prior_view), &profiles);

        let a = current.team_season_for("t-a").unwrap();
        // blend: 0.15 * 100 + 0.85 * 120 = 117, delta: 5.0 - 2.0 = 3.0
        assert!((a.adj_offensive_efficiency - 120.0).abs() < 1e-9);
        // 0.15 * 100 + 0.85 * 90 = 91.5, minus 3.0
        assert!((a.adj_defensive_efficiency - 88.5).abs() < 1e-9);
        // pace gets no offseason delta: 0.15 * 70 + 0.85 * 60
        assert!((a.adj_pace - 61.5).abs() < 1e-9);
        assert!((a.rating - 31.5).abs() < 1e-9);

        // b exists in the prior season at its seed values
        let b = current.team_season_for("t-b").unwrap();
        assert!((b.adj_offensive_efficiency - (15.0 + 0.85 * 105.5)).abs() < 1e-9);
    }
}
