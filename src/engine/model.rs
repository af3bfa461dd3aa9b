// Game data model shared by the engine, the persistence layer and the API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::votes::Votes;

pub type PlayerId = u32;

/// A seat at the table. Scores and streaks only change by applying round results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    pub truth_sets: Vec<TruthSet>,
}

impl Player {
    pub fn new(id: PlayerId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            icon: None,
            score: 0,
            streak: 0,
            truth_sets: Vec::new(),
        }
    }
}

/// Two true statements submitted together by one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruthSet {
    #[serde(default)]
    pub set_number: u32,
    pub truth1: String,
    pub truth2: String,
}

impl TruthSet {
    pub fn is_complete(&self) -> bool {
        !self.truth1.trim().is_empty() && !self.truth2.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Truth,
    Lie,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: StatementKind,
    pub player_id: PlayerId,
}

impl Statement {
    pub fn truth(text: &str, player_id: PlayerId) -> Self {
        Self {
            text: text.to_string(),
            kind: StatementKind::Truth,
            player_id,
        }
    }

    pub fn lie(text: &str, player_id: PlayerId) -> Self {
        Self {
            text: text.to_string(),
            kind: StatementKind::Lie,
            player_id,
        }
    }
}

/// What closed the voting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevealTrigger {
    Timer,
    Manual,
}

impl RevealTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RevealTrigger::Timer => "timer",
            RevealTrigger::Manual => "manual",
        }
    }
}

/// Per-component points for one player in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Breakdown {
    Guesser {
        flat: u32,
        speed: u32,
        first_guess: u32,
        streak: u32,
    },
    Chameleon {
        trickery_bonus: u32,
        time_bonus: u32,
    },
}

impl Breakdown {
    pub fn empty_guesser() -> Self {
        Breakdown::Guesser {
            flat: 0,
            speed: 0,
            first_guess: 0,
            streak: 0,
        }
    }

    pub fn first_guess(&self) -> u32 {
        match self {
            Breakdown::Guesser { first_guess, .. } => *first_guess,
            Breakdown::Chameleon { .. } => 0,
        }
    }

    pub fn streak(&self) -> u32 {
        match self {
            Breakdown::Guesser { streak, .. } => *streak,
            Breakdown::Chameleon { .. } => 0,
        }
    }
}

/// A guesser who voted for a truth, and the time bonus that earns the chameleon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FooledPlayer {
    pub player_id: PlayerId,
    pub time_bonus: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub total: u32,
    pub breakdown: Breakdown,
    pub correct: bool,
    #[serde(default)]
    pub is_chameleon: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fooled_players: Vec<FooledPlayer>,
    pub new_streak: u32,
}

/// Output of the round result calculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub lie_index: usize,
    pub player_results: BTreeMap<PlayerId, PlayerResult>,
}

/// A calculator outcome frozen into a round, with how and when it was revealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResults {
    pub lie_index: usize,
    pub player_results: BTreeMap<PlayerId, PlayerResult>,
    pub trigger: RevealTrigger,
    pub completed_at: i64,
}

impl RoundResults {
    pub fn new(outcome: RoundOutcome, trigger: RevealTrigger, completed_at: i64) -> Self {
        Self {
            lie_index: outcome.lie_index,
            player_results: outcome.player_results,
            trigger,
            completed_at,
        }
    }

    /// Guessers the chameleon fooled this round.
    pub fn fooled_count(&self) -> usize {
        self.player_results
            .values()
            .find(|r| r.is_chameleon)
            .map(|r| r.fooled_players.len())
            .unwrap_or(0)
    }
}

/// One round: the chameleon's two truths plus one lie, and everything voted on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub chameleon_id: PlayerId,
    /// Which of the chameleon's truth sets fed this round.
    pub set_number: u32,
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub votes: Votes,
    /// Epoch milliseconds when the countdown started.
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub results: Option<RoundResults>,
}

impl Round {
    pub fn lie_index(&self) -> Option<usize> {
        self.statements
            .iter()
            .position(|s| s.kind == StatementKind::Lie)
    }

    pub fn is_resolved(&self) -> bool {
        self.results.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_serializes_type_tag() {
        let json = serde_json::to_value(Statement::lie("I met an astronaut", 1)).unwrap();
        assert_eq!(json["type"], "lie");
        assert_eq!(json["player_id"], 1);
    }

    #[test]
    fn test_round_lie_index() {
        let round = Round {
            chameleon_id: 1,
            set_number: 1,
            statements: vec![
                Statement::truth("a", 1),
                Statement::lie("b", 1),
                Statement::truth("c", 1),
            ],
            votes: Votes::default(),
            started_at: None,
            results: None,
        };
        assert_eq!(round.lie_index(), Some(1));
        assert!(!round.is_resolved());
    }

    #[test]
    fn test_round_deserializes_without_runtime_fields() {
        let json = r#"{
            "chameleon_id": 2,
            "set_number": 1,
            "statements": [
                {"text": "x", "type": "truth", "player_id": 2},
                {"text": "y", "type": "truth", "player_id": 2},
                {"text": "z", "type": "lie", "player_id": 2}
            ]
        }"#;
        let round: Round = serde_json::from_str(json).unwrap();
        assert_eq!(round.lie_index(), Some(2));
        assert!(round.votes.is_empty());
        assert!(round.started_at.is_none());
    }

    #[test]
    fn test_breakdown_role_tag() {
        let json = serde_json::to_value(Breakdown::Chameleon {
            trickery_bonus: 25,
            time_bonus: 5,
        })
        .unwrap();
        assert_eq!(json["role"], "chameleon");
        assert_eq!(json["trickery_bonus"], 25);
    }
}
