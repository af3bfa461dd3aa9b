// End-of-game highlights and leaderboards, derived from revealed rounds only.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::engine::model::{PlayerId, Round, RoundResults, StatementKind};
use crate::engine::progression::GameState;
use crate::error::GameError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LieHighlight {
    pub text: String,
    pub fooled: usize,
    /// 1-based.
    pub round_number: usize,
    pub chameleon_id: PlayerId,
    pub chameleon_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TruthHighlight {
    pub text: String,
    pub votes: usize,
    pub round_number: usize,
    pub chameleon_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChameleonHighlight {
    pub player_id: PlayerId,
    pub name: String,
    pub fooled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FastestGuess {
    pub player_id: PlayerId,
    pub name: String,
    /// Seconds from round start to the vote.
    pub seconds: u32,
    pub round_number: usize,
    pub statement: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GameStats {
    pub most_believable_lie: Option<LieHighlight>,
    pub truth_that_tricked: Option<TruthHighlight>,
    pub sneakiest_chameleon: Option<ChameleonHighlight>,
    pub fastest_guess: Option<FastestGuess>,
}

fn revealed(game: &GameState) -> impl Iterator<Item = (usize, &Round, &RoundResults)> {
    game.rounds
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.results.as_ref().map(|res| (i, r, res)))
}

fn player_name(game: &GameState, id: PlayerId) -> String {
    game.player(id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| format!("Player {id}"))
}

/// Highlights over every revealed round. Ties go to the earliest round or player.
pub fn compute(game: &GameState) -> GameStats {
    let round_length = game.settings.round_length;
    let mut stats = GameStats::default();
    let mut fooled_by_chameleon: BTreeMap<PlayerId, usize> = BTreeMap::new();

    for (index, round, results) in revealed(game) {
        let round_number = index + 1;
        let fooled = results.fooled_count();
        *fooled_by_chameleon.entry(round.chameleon_id).or_default() += fooled;

        let lie_text = round
            .statements
            .get(results.lie_index)
            .map(|s| s.text.clone())
            .unwrap_or_default();

        if fooled > 0
            && stats
                .most_believable_lie
                .as_ref()
                .map_or(true, |best| fooled > best.fooled)
        {
            stats.most_believable_lie = Some(LieHighlight {
                text: lie_text.clone(),
                fooled,
                round_number,
                chameleon_id: round.chameleon_id,
                chameleon_name: player_name(game, round.chameleon_id),
            });
        }

        for (statement_index, statement) in round.statements.iter().enumerate() {
            if statement.kind != StatementKind::Truth {
                continue;
            }
            let votes = round
                .votes
                .iter()
                .filter(|(id, v)| *id != round.chameleon_id && v.statement_index == statement_index)
                .count();
            if votes > 0
                && stats
                    .truth_that_tricked
                    .as_ref()
                    .map_or(true, |best| votes > best.votes)
            {
                stats.truth_that_tricked = Some(TruthHighlight {
                    text: statement.text.clone(),
                    votes,
                    round_number,
                    chameleon_id: round.chameleon_id,
                });
            }
        }

        for (player_id, vote) in round.votes.iter() {
            if player_id == round.chameleon_id || vote.statement_index != results.lie_index {
                continue;
            }
            let seconds = round_length.saturating_sub(vote.time_remaining);
            if stats
                .fastest_guess
                .as_ref()
                .map_or(true, |best| seconds < best.seconds)
            {
                stats.fastest_guess = Some(FastestGuess {
                    player_id,
                    name: player_name(game, player_id),
                    seconds,
                    round_number,
                    statement: lie_text.clone(),
                });
            }
        }
    }

    stats.sneakiest_chameleon = fooled_by_chameleon
        .into_iter()
        .filter(|(_, fooled)| *fooled > 0)
        .fold(None, |best: Option<(PlayerId, usize)>, (id, fooled)| match best {
            Some((_, top)) if top >= fooled => best,
            _ => Some((id, fooled)),
        })
        .map(|(player_id, fooled)| ChameleonHighlight {
            player_id,
            name: player_name(game, player_id),
            fooled,
        });

    stats
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// Shared by tied scores (1, 1, 3).
    pub rank: usize,
    pub player_id: PlayerId,
    pub name: String,
    pub icon: Option<String>,
    pub score: u32,
    pub streak: u32,
    pub lies_detected: usize,
    /// Revealed rounds this player guessed in.
    pub rounds_guessed: usize,
}

/// Players by score, highest first.
pub fn final_leaderboard(game: &GameState) -> Vec<LeaderboardEntry> {
    let mut players: Vec<_> = game.players.iter().collect();
    players.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));

    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(players.len());
    for (position, player) in players.into_iter().enumerate() {
        let rank = match entries.last() {
            Some(prev) if prev.score == player.score => prev.rank,
            _ => position + 1,
        };
        let (lies_detected, rounds_guessed) = revealed(game)
            .filter(|(_, round, _)| round.chameleon_id != player.id)
            .fold((0, 0), |(hits, played), (_, _, results)| {
                let hit = results
                    .player_results
                    .get(&player.id)
                    .is_some_and(|r| r.correct);
                (hits + usize::from(hit), played + 1)
            });
        entries.push(LeaderboardEntry {
            rank,
            player_id: player.id,
            name: player.name.clone(),
            icon: player.icon.clone(),
            score: player.score,
            streak: player.streak,
            lies_detected,
            rounds_guessed,
        });
    }
    entries
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundStanding {
    #[serde(flatten)]
    pub entry: LeaderboardEntry,
    pub points_this_round: u32,
    pub correct: bool,
    pub is_chameleon: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundLeaderboard {
    pub round_number: usize,
    pub total_rounds: usize,
    pub lie: String,
    pub chameleon_id: PlayerId,
    pub standings: Vec<RoundStanding>,
    pub is_last_round: bool,
}

/// Standings after a revealed round, with what each player earned in it.
pub fn round_leaderboard(game: &GameState, round_index: usize) -> Result<RoundLeaderboard, GameError> {
    let round = game.rounds.get(round_index).ok_or(GameError::NoActiveRound)?;
    let results = round.results.as_ref().ok_or(GameError::RoundInProgress)?;

    let standings = final_leaderboard(game)
        .into_iter()
        .map(|entry| {
            let result = results.player_results.get(&entry.player_id);
            RoundStanding {
                points_this_round: result.map_or(0, |r| r.total),
                correct: result.is_some_and(|r| r.correct),
                is_chameleon: entry.player_id == round.chameleon_id,
                entry,
            }
        })
        .collect();

    Ok(RoundLeaderboard {
        round_number: round_index + 1,
        total_rounds: game.rounds.len(),
        lie: round
            .statements
            .get(results.lie_index)
            .map(|s| s.text.clone())
            .unwrap_or_default(),
        chameleon_id: round.chameleon_id,
        standings,
        is_last_round: round_index + 1 >= game.rounds.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{RevealTrigger, Statement, TruthSet};
    use crate::engine::progression::LobbySettings;
    use crate::engine::scoring::compute_round_results;
    use crate::engine::votes::{Vote, Votes};

    fn round(chameleon: PlayerId, tag: &str) -> Round {
        Round {
            chameleon_id: chameleon,
            set_number: 1,
            statements: vec![
                Statement::truth(&format!("{tag} truth a"), chameleon),
                Statement::lie(&format!("{tag} lie"), chameleon),
                Statement::truth(&format!("{tag} truth b"), chameleon),
            ],
            votes: Votes::new(),
            started_at: Some(0),
            results: None,
        }
    }

    fn play(game: &mut GameState, index: usize, votes: &[(PlayerId, usize, u32)]) {
        for &(id, statement, left) in votes {
            game.rounds[index].votes.set(id, Vote::new(statement, left));
        }
        let round = &game.rounds[index];
        let outcome =
            compute_round_results(&game.players, &round.votes, &round.statements, round.chameleon_id)
                .unwrap();
        let results = RoundResults::new(outcome, RevealTrigger::Timer, 0);
        game.rounds[index].results = Some(results.clone());
        game.apply_round_results(&results);
    }

    fn game() -> GameState {
        let mut game = GameState::new();
        game.initialize(LobbySettings {
            num_players: 3,
            num_rounds: 3,
            round_length: 30,
            ..LobbySettings::default()
        })
        .unwrap();
        for p in &mut game.players {
            p.truth_sets = vec![TruthSet {
                set_number: 1,
                truth1: "a".into(),
                truth2: "b".into(),
            }];
        }
        game.set_rounds(vec![round(1, "r1"), round(2, "r2"), round(3, "r3")]);
        game
    }

    #[test]
    fn test_highlights() {
        let mut game = game();
        // Round 1: 2 finds the lie with 20s left, 3 is fooled by truth a.
        play(&mut game, 0, &[(2, 1, 20), (3, 0, 10)]);
        // Round 2: both guessers fooled, by truth a and truth b.
        play(&mut game, 1, &[(1, 0, 25), (3, 2, 5)]);
        // Round 3: 1 finds the lie with 28s left.
        play(&mut game, 2, &[(1, 1, 28), (2, 1, 3)]);

        let stats = compute(&game);
        let lie = stats.most_believable_lie.unwrap();
        assert_eq!(lie.text, "r2 lie");
        assert_eq!(lie.fooled, 2);
        assert_eq!(lie.round_number, 2);
        assert_eq!(lie.chameleon_name, "Player 2");

        let truth = stats.truth_that_tricked.unwrap();
        assert_eq!(truth.text, "r1 truth a");
        assert_eq!(truth.votes, 1);

        let sneaky = stats.sneakiest_chameleon.unwrap();
        assert_eq!(sneaky.player_id, 2);
        assert_eq!(sneaky.fooled, 2);

        let fastest = stats.fastest_guess.unwrap();
        assert_eq!(fastest.player_id, 1);
        assert_eq!(fastest.seconds, 2);
        assert_eq!(fastest.round_number, 3);
    }

    #[test]
    fn test_empty_game_has_no_highlights() {
        let game = game();
        assert_eq!(compute(&game), GameStats::default());
    }

    #[test]
    fn test_final_leaderboard_ranks_and_detection() {
        let mut game = game();
        play(&mut game, 0, &[(2, 1, 20), (3, 1, 20)]);
        play(&mut game, 1, &[(1, 1, 0), (3, 0, 0)]);

        let board = final_leaderboard(&game);
        let order: Vec<_> = board.iter().map(|e| (e.player_id, e.rank)).collect();
        // 2 and 3 tie on 95 after round 1; 2 then scores as chameleon while 3 is fooled.
        assert_eq!(order[0].0, 2);
        assert_eq!(board[0].lies_detected, 1);
        assert_eq!(board[0].rounds_guessed, 1);

        let three = board.iter().find(|e| e.player_id == 3).unwrap();
        assert_eq!(three.lies_detected, 1);
        assert_eq!(three.rounds_guessed, 2);
        let scores: Vec<_> = board.iter().map(|e| e.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_tied_scores_share_rank() {
        let mut game = game();
        play(&mut game, 0, &[(2, 1, 20), (3, 1, 20)]);
        let board = final_leaderboard(&game);
        let ranks: Vec<_> = board.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3]);
    }

    #[test]
    fn test_round_leaderboard() {
        let mut game = game();
        assert_eq!(
            round_leaderboard(&game, 0).unwrap_err(),
            GameError::RoundInProgress
        );
        play(&mut game, 0, &[(2, 1, 20), (3, 0, 10)]);
        let board = round_leaderboard(&game, 0).unwrap();
        assert_eq!(board.lie, "r1 lie");
        assert!(!board.is_last_round);
        let chameleon = board.standings.iter().find(|s| s.is_chameleon).unwrap();
        assert_eq!(chameleon.entry.player_id, 1);
        assert_eq!(chameleon.points_this_round, 30);
        assert_eq!(board.standings[0].entry.player_id, 2);
        assert_eq!(board.standings[0].points_this_round, 95);
        assert_eq!(round_leaderboard(&game, 9).unwrap_err(), GameError::NoActiveRound);
    }
}
