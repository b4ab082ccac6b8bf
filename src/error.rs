use thiserror::Error;

/// Domain failures raised by the ratings engine and its collaborators.
///
/// Numeric edge cases (empty samples, zero denominators) never surface here;
/// they resolve locally to `None` or a documented fallback.
#[derive(Error, Debug)]
pub enum RatingsError {
    #[error("Missing rating snapshot for {side} team")]
    MissingSnapshot { side: &'static str },

    #[error("Season {0} has no league averages; run the stats aggregator first")]
    MissingSeasonAverages(String),

    #[error("Game {game_id} cannot move from {from} to {to}")]
    InvalidTransition {
        game_id: String,
        from: String,
        to: String,
    },

    #[error("Cannot finalize game {game_id}: missing valid {missing} required to compute pace")]
    MissingDerivedStats { game_id: String, missing: String },

    #[error("Ratings config version '{0}' already has snapshots and cannot be changed")]
    FrozenConfigVersion(String),

    #[error("Unknown game: {0}")]
    UnknownGame(String),

    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    #[error("Least squares solver failed: {0}")]
    Solver(String),
}
