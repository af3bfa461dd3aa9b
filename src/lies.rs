// Lie-generation contract: what goes to the relay, what comes back, and the
// sample pool used when the relay fails.

use std::collections::HashMap;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::engine::config::MAX_TRUTH_CHARS;
use crate::engine::model::{Player, PlayerId};
use crate::error::LieError;
use crate::metrics;

/// Models the relay may be asked to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum AiModel {
    #[default]
    #[serde(rename = "gpt-5-nano")]
    Gpt5Nano,
    #[serde(rename = "gpt-4.1-mini")]
    Gpt41Mini,
    #[serde(rename = "gpt-35-turbo")]
    Gpt35Turbo,
}

impl AiModel {
    pub const ALL: [AiModel; 3] = [AiModel::Gpt5Nano, AiModel::Gpt41Mini, AiModel::Gpt35Turbo];

    pub fn as_str(self) -> &'static str {
        match self {
            AiModel::Gpt5Nano => "gpt-5-nano",
            AiModel::Gpt41Mini => "gpt-4.1-mini",
            AiModel::Gpt35Turbo => "gpt-35-turbo",
        }
    }

    /// Anything outside the allow-list selects the default model.
    pub fn parse_lenient(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == name.trim())
            .unwrap_or_default()
    }
}

impl<'de> Deserialize<'de> for AiModel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(name.map(|n| Self::parse_lenient(&n)).unwrap_or_default())
    }
}

/// Flatten a truth to one line of at most `MAX_TRUTH_CHARS` characters.
pub fn sanitize_truth(truth: &str) -> String {
    truth
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_TRUTH_CHARS)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerTruths {
    pub id: PlayerId,
    pub name: String,
    /// Two consecutive entries per truth set, in set order.
    pub truths: Vec<String>,
}

/// Payload for the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LieRequest {
    pub players: Vec<PlayerTruths>,
    pub ai_model: AiModel,
}

impl LieRequest {
    pub fn from_players(players: &[Player], ai_model: AiModel) -> Self {
        let players = players
            .iter()
            .map(|p| PlayerTruths {
                id: p.id,
                name: p.name.clone(),
                truths: p
                    .truth_sets
                    .iter()
                    .flat_map(|s| [sanitize_truth(&s.truth1), sanitize_truth(&s.truth2)])
                    .filter(|t| !t.is_empty())
                    .collect(),
            })
            .collect();
        Self { players, ai_model }
    }

    /// Lies expected back: one per complete pair of truths.
    pub fn expected_lies(&self) -> usize {
        self.players.iter().map(|p| p.truths.len() / 2).sum()
    }
}

/// Lies per player, one per truth set in set order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LieBook(HashMap<PlayerId, Vec<String>>);

impl LieBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, player_id: PlayerId, lies: Vec<String>) {
        self.0.insert(player_id, lies);
    }

    /// Lie for a player's set, 1-based like set numbers.
    pub fn lie_for(&self, player_id: PlayerId, set_number: u32) -> Option<&str> {
        let index = (set_number as usize).checked_sub(1)?;
        self.0
            .get(&player_id)?
            .get(index)
            .map(String::as_str)
            .filter(|l| !l.trim().is_empty())
    }

    pub fn lies(&self, player_id: PlayerId) -> &[String] {
        self.0.get(&player_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Split a flat list of lies over players in request order, one per truth pair.
    pub fn from_flat(request: &LieRequest, lies: Vec<String>) -> Self {
        let expected = request.expected_lies();
        if lies.len() != expected {
            tracing::warn!(expected, received = lies.len(), "Relay returned an unexpected number of lies");
        }
        let mut remaining = lies.into_iter();
        let mut book = Self::new();
        for player in &request.players {
            let take = player.truths.len() / 2;
            book.insert(player.id, remaining.by_ref().take(take).collect());
        }
        book
    }

    /// Read a relay response: `{"lies": {"<id>": [...]}}`, or a flat
    /// `{"lies": [...]}` list distributed with the request's shape.
    pub fn from_relay_response(request: &LieRequest, response: &Value) -> Result<Self, LieError> {
        let lies = response
            .get("lies")
            .ok_or_else(|| LieError::MalformedResponse("missing `lies` field".into()))?;
        match lies {
            Value::Object(map) => {
                let mut book = Self::new();
                for (key, value) in map {
                    let id: PlayerId = key.parse().map_err(|_| {
                        LieError::MalformedResponse(format!("`{key}` is not a player id"))
                    })?;
                    let entries: Vec<String> = serde_json::from_value(value.clone())
                        .map_err(|e| LieError::MalformedResponse(e.to_string()))?;
                    book.insert(id, entries.iter().map(|l| l.trim().to_string()).collect());
                }
                Ok(book)
            }
            Value::Array(_) => {
                let entries: Vec<String> = serde_json::from_value(lies.clone())
                    .map_err(|e| LieError::MalformedResponse(e.to_string()))?;
                let entries = entries
                    .into_iter()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect();
                Ok(Self::from_flat(request, entries))
            }
            other => Err(LieError::MalformedResponse(format!(
                "`lies` must be an object or array, got {other}"
            ))),
        }
    }
}

#[derive(Deserialize)]
struct PoolEntry {
    lies: Vec<String>,
}

const BUILTIN_LIES: &[&str] = &[
    "I once won a regional spelling bee with the word \"onomatopoeia\".",
    "I have been skydiving twice, both times in New Zealand.",
    "I can solve a Rubik's cube in under two minutes.",
    "I was an extra in a car commercial when I was twelve.",
    "I have never broken a bone, even after falling off a roof.",
    "I taught myself to juggle during a week-long power outage.",
    "My grandmother was a professional ballroom dancer.",
    "I used to keep bees on my apartment balcony.",
    "I once shook hands with a famous astronaut at an airport.",
    "I speak enough Icelandic to order dinner.",
    "I ran a half marathon without training for it.",
    "I have a scar from a goose that chased me at a park.",
    "I was born during a snowstorm in April.",
    "I learned to drive in a tractor before a car.",
    "I have visited every country in Central America.",
    "I once got locked inside a museum after closing time.",
    "I collected over three hundred bottle caps as a kid.",
    "I can play the national anthem on a harmonica.",
    "I worked one summer as a lifeguard at a water park.",
    "I have a fear of butterflies but love moths.",
];

/// Canned lies drawn without replacement when the relay is unavailable.
#[derive(Debug, Clone)]
pub struct FallbackPool {
    lies: Vec<String>,
}

impl Default for FallbackPool {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FallbackPool {
    pub fn builtin() -> Self {
        Self {
            lies: BUILTIN_LIES.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn from_lies(lies: Vec<String>) -> Self {
        Self { lies }
    }

    /// Load a pool file shaped `[{"lies": [...]}]`.
    pub fn load(path: &Path) -> Result<Self, LieError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LieError::FallbackUnavailable(format!("{}: {e}", path.display())))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, LieError> {
        let entries: Vec<PoolEntry> = serde_json::from_str(raw)
            .map_err(|e| LieError::FallbackUnavailable(e.to_string()))?;
        let lies: Vec<String> = entries
            .into_iter()
            .flat_map(|e| e.lies)
            .filter(|l| !l.trim().is_empty())
            .collect();
        if lies.is_empty() {
            return Err(LieError::FallbackUnavailable("pool has no lies".into()));
        }
        Ok(Self { lies })
    }

    pub fn len(&self) -> usize {
        self.lies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lies.is_empty()
    }

    /// Up to `count` distinct lies. Fewer come back if the pool is smaller.
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<String> {
        self.lies
            .choose_multiple(rng, count)
            .cloned()
            .collect()
    }

    /// One lie per truth set for every player, at least one each. Each player
    /// draws independently, so two players may receive the same canned lie.
    pub fn lie_book_for<R: Rng + ?Sized>(
        &self,
        players: &[Player],
        rng: &mut R,
    ) -> Result<LieBook, LieError> {
        if self.lies.is_empty() {
            return Err(LieError::FallbackUnavailable("pool has no lies".into()));
        }
        metrics::LIE_FALLBACKS_TOTAL.inc();
        let mut book = LieBook::new();
        for player in players {
            let needed = player.truth_sets.len().max(1);
            let lies = self.sample(needed, rng);
            if lies.len() < needed {
                tracing::warn!(
                    player_id = player.id,
                    needed,
                    available = lies.len(),
                    "Fallback pool too small for every truth set"
                );
            }
            book.insert(player.id, lies);
        }
        tracing::warn!(players = players.len(), "Using fallback lies");
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::TruthSet;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use std::collections::HashSet;

    fn player(id: PlayerId, sets: u32) -> Player {
        let mut p = Player::new(id, &format!("Player {id}"));
        p.truth_sets = (1..=sets)
            .map(|n| TruthSet {
                set_number: n,
                truth1: format!("p{id} s{n} first"),
                truth2: format!("p{id} s{n} second"),
            })
            .collect();
        p
    }

    #[test]
    fn test_sanitize_truth() {
        assert_eq!(sanitize_truth("  I have\n two\t\tcats  "), "I have two cats");
        let long = "a".repeat(250);
        assert_eq!(sanitize_truth(&long).len(), 200);
        assert_eq!(sanitize_truth("ñ".repeat(201).as_str()).chars().count(), 200);
    }

    #[test]
    fn test_model_allow_list() {
        assert_eq!(AiModel::parse_lenient("gpt-4.1-mini"), AiModel::Gpt41Mini);
        assert_eq!(AiModel::parse_lenient("gpt-9000"), AiModel::Gpt5Nano);
        let model: AiModel = serde_json::from_value(json!("gpt-35-turbo")).unwrap();
        assert_eq!(model, AiModel::Gpt35Turbo);
        let model: AiModel = serde_json::from_value(json!("mystery")).unwrap();
        assert_eq!(model, AiModel::Gpt5Nano);
        assert_eq!(serde_json::to_value(AiModel::Gpt41Mini).unwrap(), json!("gpt-4.1-mini"));
    }

    #[test]
    fn test_request_flattens_truth_pairs() {
        let mut p = player(1, 2);
        p.truth_sets[1].truth1 = "line\nbreak".into();
        let request = LieRequest::from_players(&[p, player(2, 1)], AiModel::default());
        assert_eq!(request.players[0].truths.len(), 4);
        assert_eq!(request.players[0].truths[2], "line break");
        assert_eq!(request.expected_lies(), 3);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["aiModel"], "gpt-5-nano");
    }

    #[test]
    fn test_flat_response_is_split_per_player() {
        let request = LieRequest::from_players(&[player(1, 2), player(2, 1)], AiModel::default());
        let response = json!({"lies": ["l1", " l2 ", "", "l3"]});
        let book = LieBook::from_relay_response(&request, &response).unwrap();
        assert_eq!(book.lies(1), ["l1", "l2"]);
        assert_eq!(book.lies(2), ["l3"]);
        assert_eq!(book.lie_for(1, 2), Some("l2"));
        assert_eq!(book.lie_for(1, 3), None);
        assert_eq!(book.lie_for(1, 0), None);
    }

    #[test]
    fn test_short_flat_response_degrades() {
        let request = LieRequest::from_players(&[player(1, 2), player(2, 2)], AiModel::default());
        let book = LieBook::from_flat(&request, vec!["only".into(), "two".into(), "three".into()]);
        assert_eq!(book.lies(1).len(), 2);
        assert_eq!(book.lies(2), ["three"]);
        assert_eq!(book.lie_for(2, 2), None);
    }

    #[test]
    fn test_keyed_response() {
        let request = LieRequest::from_players(&[player(1, 1)], AiModel::default());
        let response = json!({"lies": {"1": ["a lie"], "2": []}});
        let book = LieBook::from_relay_response(&request, &response).unwrap();
        assert_eq!(book.lie_for(1, 1), Some("a lie"));
        assert_eq!(book.total(), 1);

        assert!(matches!(
            LieBook::from_relay_response(&request, &json!({"lies": {"x": []}})),
            Err(LieError::MalformedResponse(_))
        ));
        assert!(LieBook::from_relay_response(&request, &json!({"error": "boom"})).is_err());
        assert!(LieBook::from_relay_response(&request, &json!({"lies": 3})).is_err());
    }

    #[test]
    fn test_pool_samples_without_replacement() {
        let pool = FallbackPool::builtin();
        let mut rng = StdRng::seed_from_u64(7);
        let sample = pool.sample(10, &mut rng);
        let unique: HashSet<_> = sample.iter().collect();
        assert_eq!(sample.len(), 10);
        assert_eq!(unique.len(), 10);
        assert_eq!(pool.sample(100, &mut rng).len(), pool.len());
    }

    #[test]
    fn test_pool_covers_every_set() {
        let pool = FallbackPool::builtin();
        let mut rng = StdRng::seed_from_u64(3);
        let players = vec![player(1, 3), player(2, 0)];
        let book = pool.lie_book_for(&players, &mut rng).unwrap();
        assert_eq!(book.lies(1).len(), 3);
        assert_eq!(book.lies(2).len(), 1);
    }

    #[test]
    fn test_pool_file_shape() {
        let pool = FallbackPool::parse(r#"[{"lies": ["one", "two"]}, {"lies": [" "]}]"#).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(matches!(
            FallbackPool::parse(r#"[{"lies": []}]"#),
            Err(LieError::FallbackUnavailable(_))
        ));
        assert!(FallbackPool::parse("not json").is_err());
        assert!(FallbackPool::load(Path::new("/nonexistent/sample-lies.json")).is_err());

        let empty = FallbackPool::from_lies(vec![]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(empty.lie_book_for(&[player(1, 1)], &mut rng).is_err());
    }
}
