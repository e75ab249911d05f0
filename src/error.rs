use thiserror::Error;

/// Data-integrity failures that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{} label row(s) matched no player-season: {}", misses.len(), misses.join("; "))]
    JoinMiss { misses: Vec<String> },

    #[error("label key {key} matched {count} player-seasons")]
    AmbiguousJoin { key: String, count: usize },

    #[error("vote share {share} for {player} ({season}) is outside [0, 1]")]
    InvalidShare {
        player: String,
        season: i32,
        share: f64,
    },

    #[error("no team game count for {team} in {season}")]
    MissingTeamGames { team: String, season: i32 },

    #[error("season {season} has zero variance in every standardized stat ({cohort} cohort)")]
    DegenerateCohort { season: i32, cohort: &'static str },

    #[error("{cohort} cohort has {rows} row(s); need at least {needed} to fit")]
    EmptyCohort {
        cohort: &'static str,
        rows: usize,
        needed: usize,
    },

    #[error("{model} fit failed: {reason}")]
    SingularFit { model: &'static str, reason: String },
}
