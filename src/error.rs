// Error taxonomy for the game core and its collaborators.

use serde::Serialize;
use thiserror::Error;

use crate::engine::model::PlayerId;

/// Where a client should navigate after a failure it cannot continue from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    Consent,
    Lobby,
    TruthInputs,
    Loading,
    Round,
    RoundLeaderboard,
    GameStats,
}

/// Errors raised by the game engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("round has no statement tagged as the lie")]
    MissingLie,
    #[error("chameleon {0} is not part of the roster")]
    MissingChameleon(PlayerId),
    #[error("malformed round {index}: {reason}")]
    MalformedRound { index: usize, reason: String },
    #[error("vote from player {player_id} points at statement {statement_index}, which does not exist")]
    InvalidVote {
        player_id: PlayerId,
        statement_index: usize,
    },
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("round is frozen, votes are no longer accepted")]
    RoundFrozen,
    #[error("no round is active")]
    NoActiveRound,
    #[error("current round has not been revealed yet")]
    RoundInProgress,
    #[error("all rounds have been played")]
    GameOver,
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("consent must be given before playing")]
    ConsentRequired,
    #[error("manual end of round requires confirmation")]
    ConfirmationRequired,
    #[error("every player must submit their truths first")]
    TruthsIncomplete,
    #[error("no round could be built from the submitted truths")]
    NoRoundsBuilt,
}

impl GameError {
    /// The navigation target a client should fall back to for this error.
    pub fn recovery(&self) -> Recovery {
        match self {
            GameError::MissingLie
            | GameError::MissingChameleon(_)
            | GameError::MalformedRound { .. }
            | GameError::InvalidVote { .. }
            | GameError::InvalidSettings(_) => Recovery::Lobby,
            GameError::UnknownPlayer(_)
            | GameError::RoundFrozen
            | GameError::ConfirmationRequired => Recovery::Round,
            GameError::ConsentRequired => Recovery::Consent,
            GameError::TruthsIncomplete => Recovery::TruthInputs,
            GameError::NoActiveRound | GameError::NoRoundsBuilt => Recovery::Loading,
            GameError::RoundInProgress => Recovery::Round,
            GameError::GameOver => Recovery::GameStats,
        }
    }

    /// Data-integrity errors mean the stored game cannot be scored at all.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            GameError::MissingLie
                | GameError::MissingChameleon(_)
                | GameError::MalformedRound { .. }
                | GameError::InvalidVote { .. }
        )
    }
}

/// Errors from the lie-generation collaborator.
#[derive(Debug, Error)]
pub enum LieError {
    #[error("relay response is malformed: {0}")]
    MalformedResponse(String),
    #[error("fallback lie pool is unavailable: {0}")]
    FallbackUnavailable(String),
}

/// Anything a session command can fail with.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Game(#[from] GameError),
    #[error(transparent)]
    Lies(#[from] LieError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    pub fn recovery(&self) -> Option<Recovery> {
        match self {
            SessionError::Game(e) => Some(e.recovery()),
            SessionError::Lies(_) => Some(Recovery::Loading),
            SessionError::Store(_) => None,
        }
    }
}

/// Errors from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("archive error: {0}")]
    Archive(#[from] std::io::Error),
}
