use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;

use crate::models::{Game, Prediction, SeasonSlate};
use crate::services::statistics::{mean, mean_absolute_error, sample_stddev};
use crate::utils::round_to;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub count: usize,
    pub mae: Option<f64>,
    /// Mean signed error; positive means the model over-predicted.
    pub bias: Option<f64>,
    pub std_deviation: Option<f64>,
}

impl ErrorSummary {
    fn from_errors(errors: &[f64]) -> Self {
        Self {
            count: errors.len(),
            mae: mean_absolute_error(errors),
            bias: mean(errors),
            std_deviation: sample_stddev(errors),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AccuracySummary {
    pub total_predictions: usize,
    pub correct_predictions: usize,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub pace: ErrorSummary,
    pub home_offense: ErrorSummary,
    pub away_offense: ErrorSummary,
    pub accuracy: AccuracySummary,
}

/// Per-team pace residuals (actual minus predicted), one CSV row per team.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamResidual {
    pub team: String,
    pub games: usize,
    pub avg_pace_residual: f64,
    pub stddev_pace_residual: Option<f64>,
}

/// Scores back-filled predictions for one config version.
pub struct PredictionEvaluator<'a> {
    slate: &'a SeasonSlate,
    config_version_id: &'a str,
}

impl<'a> PredictionEvaluator<'a> {
    pub fn new(slate: &'a SeasonSlate, config_version_id: &'a str) -> Self {
        Self {
            slate,
            config_version_id,
        }
    }

    fn evaluated(&self) -> impl Iterator<Item = (&'a Prediction, &'a Game)> + '_ {
        self.slate
            .predictions
            .iter()
            .filter(|p| p.ratings_config_version_id == self.config_version_id && p.has_errors())
            .filter_map(|p| {
                self.slate
                    .games
                    .iter()
                    .find(|g| g.id == p.game_id)
                    .map(|g| (p, g))
            })
    }

    pub fn evaluate(&self) -> EvaluationReport {
        let mut pace = Vec::new();
        let mut home_offense = Vec::new();
        let mut away_offense = Vec::new();
        let mut accuracy = AccuracySummary::default();

        for (prediction, game) in self.evaluated() {
            pace.extend(prediction.pace_error);
            home_offense.extend(prediction.home_offensive_efficiency_error);
            away_offense.extend(prediction.away_offensive_efficiency_error);

            if let Some(correct) = prediction.is_correct(game) {
                accuracy.total_predictions += 1;
                if correct {
                    accuracy.correct_predictions += 1;
                }
            }
        }

        if accuracy.total_predictions > 0 {
            accuracy.accuracy = Some(accuracy.correct_predictions as f64 / accuracy.total_predictions as f64);
        }

        EvaluationReport {
            pace: ErrorSummary::from_errors(&pace),
            home_offense: ErrorSummary::from_errors(&home_offense),
            away_offense: ErrorSummary::from_errors(&away_offense),
            accuracy,
        }
    }

    /// Home teams take the residual as-is, away teams its negation.
    pub fn team_residuals(&self) -> Vec<TeamResidual> {
        let mut by_team: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for (prediction, game) in self.evaluated() {
            let Some(actual) = game.pace() else {
                continue;
            };
            let residual = actual - prediction.pace;
            let home = self.slate.team_name(&game.home_team_id).unwrap_or(game.home_team_name.as_str());
            let away = self.slate.team_name(&game.away_team_id).unwrap_or(game.away_team_name.as_str());
            by_team.entry(home).or_default().push(residual);
            by_team.entry(away).or_default().push(-residual);
        }

        by_team
            .into_iter()
            .filter_map(|(team, residuals)| {
                Some(TeamResidual {
                    team: team.to_string(),
                    games: residuals.len(),
                    avg_pace_residual: round_to(mean(&residuals)?, 2),
                    stddev_pace_residual: sample_stddev(&residuals).map(|s| round_to(s, 2)),
                })
            })
            .collect()
    }

    pub fn write_team_residuals<W: io::Write>(&self, writer: W) -> Result<usize> {
        let rows = self.team_residuals();
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in &rows {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;
    use chrono::Utc;

    fn scored_prediction(game_id: &str, pace: f64, home_win_probability: f64, pace_error: f64, off_error: f64) -> Prediction {
        let now = Utc::now();
        Prediction {
            id: format!("p-{}", game_id),
            game_id: game_id.to_string(),
            ratings_config_version_id: "v1".to_string(),
            home_team_snapshot_id: "snap-home".to_string(),
            away_team_snapshot_id: "snap-away".to_string(),
            home_offensive_efficiency: 105.0,
            away_offensive_efficiency: 105.0,
            home_defensive_efficiency: 105.0,
            away_defensive_efficiency: 105.0,
            pace,
            home_score: 72.0,
            away_score: 70.0,
            home_win_probability,
            margin_std_deviation: 10.0,
            confidence_level: "Medium".to_string(),
            home_offensive_efficiency_error: Some(off_error),
            away_offensive_efficiency_error: Some(-off_error),
            home_defensive_efficiency_error: Some(-off_error),
            away_defensive_efficiency_error: Some(off_error),
            pace_error: Some(pace_error),
            created_at: now,
            updated_at: now,
        }
    }

    fn evaluated_slate() -> SeasonSlate {
        let mut slate = slate(&["a", "b"]);
        let first = add_result(&mut slate, "a", "b", 2, 110.0, 100.0, 70.0);
        let second = add_result(&mut slate, "b", "a", 3, 110.0, 100.0, 66.0);
        // First game picks the home winner, second picks the home loser wrong
        slate.predictions.push(scored_prediction(&first, 68.0, 0.6, -2.0, 4.0));
        slate.predictions.push(scored_prediction(&second, 68.0, 0.3, 2.0, -2.0));
        slate
    }

    #[test]
    fn test_summary_statistics() {
        let slate = evaluated_slate();
        let report = PredictionEvaluator::new(&slate, "v1").evaluate();

        assert_eq!(report.pace.count, 2);
        assert_eq!(report.pace.mae, Some(2.0));
        assert_eq!(report.pace.bias, Some(0.0));
        assert_eq!(report.home_offense.bias, Some(1.0));
        assert_eq!(report.accuracy.total_predictions, 2);
        assert_eq!(report.accuracy.correct_predictions, 1);
        assert_eq!(report.accuracy.accuracy, Some(0.5));
    }

    #[test]
    fn test_other_versions_are_ignored() {
        let slate = evaluated_slate();
        let report = PredictionEvaluator::new(&slate, "v2").evaluate();
        assert_eq!(report.pace.count, 0);
        assert_eq!(report.pace.mae, None);
        assert_eq!(report.accuracy.accuracy, None);
    }

    #[test]
    fn test_team_residual_csv() {
        let slate = evaluated_slate();
        let evaluator = PredictionEvaluator::new(&slate, "v1");

        let residuals = evaluator.team_residuals();
        let a = residuals.iter().find(|r| r.team == "a").unwrap();
        // +2 at home in game one, -(-2) away in game two
        assert_eq!(a.games, 2);
        assert_eq!(a.avg_pace_residual, 2.0);

        let mut buffer = Vec::new();
        let rows = evaluator.write_team_residuals(&mut buffer).unwrap();
        assert_eq!(rows, 2);
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("team,games,avg_pace_residual,stddev_pace_residual\n"));
        assert!(text.contains("a,2,2.0,0.0"));
    }
}
