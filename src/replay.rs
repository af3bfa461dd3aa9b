// Game archive: the final game state plus the round events that led to it,
// gzip-compressed for storage once a game finishes.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};

use crate::engine::progression::GameState;
use crate::engine::round::RoundEvent;
use crate::error::StoreError;

#[derive(Debug, Serialize, Deserialize)]
pub struct GameArchive {
    pub game: GameState,
    pub events: Vec<Value>,
}

/// Collects round events during a game. Per-second ticks are not kept.
#[derive(Debug, Default)]
pub struct GameRecorder {
    events: Vec<Value>,
}

impl GameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &RoundEvent) -> Result<(), StoreError> {
        if matches!(event, RoundEvent::Tick { .. }) {
            return Ok(());
        }
        self.events.push(serde_json::to_value(event)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Compress the recorded events together with the finished game.
    pub fn finish(self, game: &GameState) -> Result<Vec<u8>, StoreError> {
        let archive = GameArchive {
            game: game.clone(),
            events: self.events,
        };
        let json = serde_json::to_vec(&archive)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }
}

/// Decompress an archive back to its JSON text.
pub fn decompress_archive(data: &[u8]) -> Result<String, std::io::Error> {
    let mut decoder = GzDecoder::new(data);
    let mut result = String::new();
    decoder.read_to_string(&mut result)?;
    Ok(result)
}

pub fn read_archive(data: &[u8]) -> Result<GameArchive, StoreError> {
    let json = decompress_archive(data)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::round::Tempo;

    #[test]
    fn test_record_and_decompress() {
        let mut recorder = GameRecorder::new();
        recorder
            .record(&RoundEvent::Started {
                round_index: 0,
                round_length: 30,
                time_remaining: 30,
            })
            .unwrap();
        recorder
            .record(&RoundEvent::Tick {
                round_index: 0,
                time_remaining: 29,
            })
            .unwrap();
        recorder
            .record(&RoundEvent::TempoChanged {
                round_index: 0,
                tempo: Tempo::SpeedUp,
            })
            .unwrap();
        assert_eq!(recorder.len(), 2);

        let compressed = recorder.finish(&GameState::new()).unwrap();
        assert!(!compressed.is_empty());

        let archive = read_archive(&compressed).unwrap();
        assert_eq!(archive.events[0]["type"], "started");
        assert_eq!(archive.events[1]["tempo"], "speed_up");
        assert!(archive.game.rounds.is_empty());
    }

    #[test]
    fn test_empty_recorder() {
        let recorder = GameRecorder::new();
        assert!(recorder.is_empty());
        let compressed = recorder.finish(&GameState::new()).unwrap();
        let json: Value = serde_json::from_str(&decompress_archive(&compressed).unwrap()).unwrap();
        assert_eq!(json["events"], serde_json::json!([]));
    }

    #[test]
    fn test_corrupt_archive_is_an_error() {
        assert!(decompress_archive(b"not gzip").is_err());
        assert!(matches!(read_archive(b"nope"), Err(StoreError::Archive(_))));
    }
}
