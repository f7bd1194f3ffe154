use thiserror::Error;

/// Why a candidate team layout was rejected by a composition validator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("expected {expected} teams, got {actual}")]
    TeamCount { expected: usize, actual: usize },

    #[error("team {team} has {count} players, minimum is {min}")]
    TooFewPlayers { team: usize, count: usize, min: usize },

    #[error("team {team} has {count} players, maximum is {max}")]
    TooManyPlayers { team: usize, count: usize, max: usize },

    #[error("team {team} has {count} players with role '{role}', allowed range is [{min}, {max}]")]
    RoleQuota {
        team: usize,
        role: String,
        count: usize,
        min: usize,
        max: usize,
    },

    #[error("team {team} contains player {player} together with blocked player {blocked}")]
    BlockedPlayer { team: usize, player: u64, blocked: u64 },

    #[error("{0}")]
    Custom(String),
}

/// Errors raised inside the rebalancing core.
///
/// None of these escape `Rebalancer::rebalance`: a failed rebalance logs the
/// error and hands back the layout it was given. The JSON entry points do
/// return them.
#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error("locked party {party} sits in team {team} but the rule only allows {team_count} teams")]
    LockedTeamOutOfRange {
        party: u64,
        team: usize,
        team_count: usize,
    },

    #[error("{existing} pre-placed partitions given for a search over {partition_count} partitions")]
    TooManyExistingPartitions {
        existing: usize,
        partition_count: usize,
    },

    #[error("partition count must be at least 1")]
    NoPartitions,

    #[error("{count} players exceed the combination limit of {limit}")]
    TooManyPlayers { count: usize, limit: usize },

    #[error("{count} parties exceed the combination limit of {limit}")]
    TooManyParties { count: usize, limit: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RebalanceError>;
