// Game progression store: roster, rounds, current round pointer.

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Recovery};
use crate::lies::AiModel;

use super::config::*;
use super::model::{Player, PlayerId, Round, RoundResults, TruthSet};

/// Lobby choices made before truths are collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySettings {
    pub num_players: usize,
    pub num_rounds: usize,
    /// Seconds per round.
    pub round_length: u32,
    #[serde(default)]
    pub ai_model: AiModel,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            num_players: DEFAULT_PLAYERS,
            num_rounds: DEFAULT_ROUNDS,
            round_length: DEFAULT_ROUND_LENGTH_SECS,
            ai_model: AiModel::default(),
        }
    }
}

impl LobbySettings {
    pub fn validate(&self) -> Result<(), GameError> {
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&self.num_players) {
            return Err(GameError::InvalidSettings(format!(
                "players must be between {MIN_PLAYERS} and {MAX_PLAYERS}"
            )));
        }
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&self.num_rounds) {
            return Err(GameError::InvalidSettings(format!(
                "rounds must be between {MIN_ROUNDS} and {MAX_ROUNDS}"
            )));
        }
        if self.num_rounds < self.num_players {
            return Err(GameError::InvalidSettings(
                "every player needs at least one round as chameleon".into(),
            ));
        }
        if !(MIN_ROUND_LENGTH_SECS..=MAX_ROUND_LENGTH_SECS).contains(&self.round_length)
            || self.round_length % ROUND_LENGTH_STEP_SECS != 0
        {
            return Err(GameError::InvalidSettings(format!(
                "round length must be {MIN_ROUND_LENGTH_SECS}-{MAX_ROUND_LENGTH_SECS}s in steps of {ROUND_LENGTH_STEP_SECS}s"
            )));
        }
        Ok(())
    }

    /// Truth sets each player submits so every round has material.
    pub fn sets_per_player(&self) -> usize {
        self.num_rounds.div_ceil(self.num_players.max(1))
    }
}

/// Everything one playthrough needs. Lives for a game; `reset` starts the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub players: Vec<Player>,
    pub rounds: Vec<Round>,
    pub current_round: usize,
    pub settings: LobbySettings,
    pub consent_given: bool,
    #[serde(default)]
    pub lies_generated: bool,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        Self {
            players: Vec::new(),
            rounds: Vec::new(),
            current_round: 0,
            settings: LobbySettings::default(),
            consent_given: false,
            lies_generated: false,
        }
    }

    pub fn give_consent(&mut self) {
        self.consent_given = true;
    }

    /// Gameplay is closed until consent is given.
    pub fn ensure_consent(&self) -> Result<(), GameError> {
        if self.consent_given {
            Ok(())
        } else {
            Err(GameError::ConsentRequired)
        }
    }

    /// Seat `num_players` fresh players and forget any previous rounds.
    pub fn initialize(&mut self, settings: LobbySettings) -> Result<(), GameError> {
        settings.validate()?;
        self.players = (1..=settings.num_players as PlayerId)
            .map(|id| Player::new(id, &format!("Player {id}")))
            .collect();
        self.rounds.clear();
        self.current_round = 0;
        self.lies_generated = false;
        self.settings = settings;
        tracing::info!(
            players = self.settings.num_players,
            rounds = self.settings.num_rounds,
            round_length = self.settings.round_length,
            "Game initialized"
        );
        Ok(())
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    fn player_mut(&mut self, id: PlayerId) -> Result<&mut Player, GameError> {
        self.players
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(GameError::UnknownPlayer(id))
    }

    pub fn update_player(
        &mut self,
        id: PlayerId,
        name: Option<String>,
        icon: Option<String>,
    ) -> Result<&Player, GameError> {
        let player = self.player_mut(id)?;
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            player.name = name.trim().to_string();
        }
        if icon.is_some() {
            player.icon = icon;
        }
        Ok(player)
    }

    /// Store a player's truth sets. Every set must hold two non-empty truths.
    pub fn set_truth_sets(&mut self, id: PlayerId, sets: Vec<TruthSet>) -> Result<(), GameError> {
        let required = self.settings.sets_per_player();
        if sets.len() < required {
            return Err(GameError::InvalidSettings(format!(
                "player {id} needs {required} truth sets, got {}",
                sets.len()
            )));
        }
        if let Some(bad) = sets.iter().find(|s| !s.is_complete()) {
            return Err(GameError::InvalidSettings(format!(
                "truth set {} of player {id} is incomplete",
                bad.set_number
            )));
        }
        let player = self.player_mut(id)?;
        player.truth_sets = sets;
        Ok(())
    }

    pub fn truths_complete(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(|p| !p.truth_sets.is_empty())
    }

    /// Install freshly built rounds and point at the first.
    pub fn set_rounds(&mut self, rounds: Vec<Round>) {
        self.rounds = rounds;
        self.current_round = 0;
        self.lies_generated = true;
    }

    pub fn current(&self) -> Option<&Round> {
        self.rounds.get(self.current_round)
    }

    pub fn current_mut(&mut self) -> Option<&mut Round> {
        self.rounds.get_mut(self.current_round)
    }

    /// Merge a revealed round into cumulative scores and streaks.
    pub fn apply_round_results(&mut self, results: &RoundResults) {
        for player in &mut self.players {
            if let Some(result) = results.player_results.get(&player.id) {
                player.score += result.total;
                player.streak = result.new_streak;
            }
        }
    }

    /// Move to the next round. The pointer stops at `rounds.len()`, which means game over.
    pub fn advance(&mut self) -> Result<usize, GameError> {
        let round = self.rounds.get(self.current_round).ok_or(GameError::GameOver)?;
        if !round.is_resolved() {
            return Err(GameError::RoundInProgress);
        }
        self.current_round += 1;
        tracing::info!(
            round = self.current_round,
            total = self.rounds.len(),
            "Advanced to next round"
        );
        Ok(self.current_round)
    }

    pub fn is_finished(&self) -> bool {
        !self.rounds.is_empty() && self.rounds.iter().all(Round::is_resolved)
    }

    /// Start over, keeping consent and the lobby choices.
    pub fn reset(&mut self) {
        *self = GameState {
            consent_given: self.consent_given,
            settings: self.settings.clone(),
            ..GameState::new()
        };
    }

    /// Screen a reloaded session should land on.
    pub fn resume_target(&self) -> Recovery {
        if !self.consent_given {
            return Recovery::Consent;
        }
        if self.players.is_empty() {
            return Recovery::Lobby;
        }
        if !self.truths_complete() {
            return Recovery::TruthInputs;
        }
        if !self.lies_generated || self.rounds.is_empty() {
            return Recovery::Loading;
        }
        if self.is_finished() {
            return Recovery::GameStats;
        }
        match self.current() {
            Some(round) if round.is_resolved() => {
                if self.current_round + 1 >= self.rounds.len() {
                    Recovery::GameStats
                } else {
                    Recovery::RoundLeaderboard
                }
            }
            Some(_) => Recovery::Round,
            None => Recovery::GameStats,
        }
    }
}
