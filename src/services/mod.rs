pub mod adjusted_stat_calculator;
pub mod backfill;
pub mod bet_recommendation;
pub mod game_finalizer;
pub mod game_predictor;
pub mod game_simulator;
pub mod gaussian;
pub mod odds_consensus;
pub mod overall_ratings;
pub mod prediction_evaluator;
pub mod preseason;
pub mod season_games;
pub mod snapshot_builder;
pub mod stat_formulae;
pub mod statistics;
pub mod stats_aggregator;
pub mod team_matcher;
pub mod volatility_calculator;

#[cfg(test)]
pub mod test_support;

pub use backfill::{BackfillMode, BackfillSummary, SeasonBackfill};
pub use bet_recommendation::{BetRecommendationGenerator, BetSettlement};
pub use game_finalizer::{FinalizeOutcome, GameFinalizer};
pub use game_predictor::{GamePredictor, PredictionBundle};
pub use game_simulator::{GameSimulator, SimulationSummary};
pub use gaussian::RandSource;
pub use odds_consensus::{BookmakerLine, OddsConsensus};
pub use overall_ratings::OverallRatingsCalculator;
pub use prediction_evaluator::PredictionEvaluator;
pub use preseason::{PreseasonInitializer, PriorSeason};
pub use season_games::cutoff_for;
pub use snapshot_builder::{PredictionBuilder, SnapshotBuilder};
pub use team_matcher::TeamMatcher;
