// Vote store: one vote per player per round.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::model::PlayerId;

/// A submitted vote: which statement, and how many seconds were left on the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredVote")]
pub struct Vote {
    pub statement_index: usize,
    pub time_remaining: u32,
}

impl Vote {
    pub fn new(statement_index: usize, time_remaining: u32) -> Self {
        Self {
            statement_index,
            time_remaining,
        }
    }
}

/// Shapes a vote may have in saved sessions: older saves stored a bare
/// statement index, newer ones a structured object (possibly camelCased).
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredVote {
    Structured {
        #[serde(alias = "statementIndex")]
        statement_index: usize,
        #[serde(default, alias = "timeRemaining")]
        time_remaining: Option<f64>,
    },
    Bare(usize),
}

impl From<StoredVote> for Vote {
    fn from(stored: StoredVote) -> Self {
        match stored {
            StoredVote::Structured {
                statement_index,
                time_remaining,
            } => {
                let secs = time_remaining
                    .filter(|t| t.is_finite() && *t > 0.0)
                    .map(|t| t.round() as u32)
                    .unwrap_or(0);
                Vote::new(statement_index, secs)
            }
            StoredVote::Bare(statement_index) => Vote::new(statement_index, 0),
        }
    }
}

/// Votes of one round keyed by player. Pure data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Votes(BTreeMap<PlayerId, Vote>);

impl Votes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, player_id: PlayerId) -> Option<&Vote> {
        self.0.get(&player_id)
    }

    /// Record a vote, returning the one it replaced.
    pub fn set(&mut self, player_id: PlayerId, vote: Vote) -> Option<Vote> {
        self.0.insert(player_id, vote)
    }

    pub fn remove(&mut self, player_id: PlayerId) -> Option<Vote> {
        self.0.remove(&player_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlayerId, &Vote)> {
        self.0.iter().map(|(id, v)| (*id, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_overwrites_previous_vote() {
        let mut votes = Votes::new();
        assert!(votes.set(2, Vote::new(0, 20)).is_none());
        let previous = votes.set(2, Vote::new(1, 18));
        assert_eq!(previous, Some(Vote::new(0, 20)));
        assert_eq!(votes.get(2), Some(&Vote::new(1, 18)));
        assert_eq!(votes.len(), 1);
    }

    #[test]
    fn test_structured_votes_serialize_with_player_keys() {
        let mut votes = Votes::new();
        votes.set(3, Vote::new(2, 12));
        let json = serde_json::to_value(&votes).unwrap();
        assert_eq!(json["3"]["statement_index"], 2);
        assert_eq!(json["3"]["time_remaining"], 12);

        let back: Votes = serde_json::from_value(json).unwrap();
        assert_eq!(back, votes);
    }

    #[test]
    fn test_historical_vote_shapes_normalize() {
        let json = r#"{
            "1": 2,
            "2": {"statementIndex": 0, "timeRemaining": 17},
            "3": {"statement_index": 1},
            "4": {"statementIndex": 1, "timeRemaining": 9.6}
        }"#;
        let votes: Votes = serde_json::from_str(json).unwrap();
        assert_eq!(votes.get(1), Some(&Vote::new(2, 0)));
        assert_eq!(votes.get(2), Some(&Vote::new(0, 17)));
        assert_eq!(votes.get(3), Some(&Vote::new(1, 0)));
        assert_eq!(votes.get(4), Some(&Vote::new(1, 10)));
    }

    #[test]
    fn test_negative_time_remaining_clamps_to_zero() {
        let vote: Vote = serde_json::from_str(r#"{"statementIndex": 1, "timeRemaining": -4}"#).unwrap();
        assert_eq!(vote, Vote::new(1, 0));
    }
}
