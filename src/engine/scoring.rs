// Round result calculator.
//
// Pure: takes the roster, the round's votes, its statements and the chameleon,
// and returns every player's points and new streak. Nothing is mutated here;
// the progression store applies the outcome.

use std::collections::{BTreeMap, HashSet};

use crate::error::GameError;

use super::config::*;
use super::model::{
    Breakdown, FooledPlayer, Player, PlayerId, PlayerResult, RoundOutcome, Statement,
    StatementKind,
};
use super::votes::Votes;

/// Half a point per second left on the clock, rounded half-up.
pub fn speed_points(time_remaining: u32) -> u32 {
    (time_remaining + SPEED_DIVISOR / 2) / SPEED_DIVISOR
}

/// Position of the lie among the round's statements.
pub fn find_lie_index(statements: &[Statement]) -> Result<usize, GameError> {
    statements
        .iter()
        .position(|s| s.kind == StatementKind::Lie)
        .ok_or(GameError::MissingLie)
}

/// Score one round.
pub fn compute_round_results(
    players: &[Player],
    votes: &Votes,
    statements: &[Statement],
    chameleon_id: PlayerId,
) -> Result<RoundOutcome, GameError> {
    let lie_index = find_lie_index(statements)?;
    let chameleon = players
        .iter()
        .find(|p| p.id == chameleon_id)
        .ok_or(GameError::MissingChameleon(chameleon_id))?;

    let guessers: Vec<&Player> = players.iter().filter(|p| p.id != chameleon_id).collect();

    for guesser in &guessers {
        if let Some(vote) = votes.get(guesser.id) {
            if vote.statement_index >= statements.len() {
                return Err(GameError::InvalidVote {
                    player_id: guesser.id,
                    statement_index: vote.statement_index,
                });
            }
        }
    }

    let bonuses_enabled = players.len() >= MIN_PLAYERS_FOR_BONUSES;

    // Fastest correct vote is the one with the most time left; ties share the bonus.
    let correct_times: Vec<(PlayerId, u32)> = guessers
        .iter()
        .filter_map(|g| {
            votes
                .get(g.id)
                .filter(|v| v.statement_index == lie_index)
                .map(|v| (g.id, v.time_remaining))
        })
        .collect();
    let first_guessers: HashSet<PlayerId> = match correct_times.iter().map(|(_, t)| *t).max() {
        Some(best) if bonuses_enabled => correct_times
            .iter()
            .filter(|(_, t)| *t == best)
            .map(|(id, _)| *id)
            .collect(),
        _ => HashSet::new(),
    };

    let mut results = BTreeMap::new();
    let mut fooled_players = Vec::new();

    for guesser in &guessers {
        let result = match votes.get(guesser.id) {
            Some(vote) if vote.statement_index == lie_index => {
                let flat = FLAT_CORRECT_BONUS;
                let speed = speed_points(vote.time_remaining);
                let first_guess = if first_guessers.contains(&guesser.id) {
                    FIRST_GUESS_BONUS
                } else {
                    0
                };
                let new_streak = guesser.streak + 1;
                let streak = if bonuses_enabled {
                    new_streak * STREAK_STEP
                } else {
                    0
                };
                PlayerResult {
                    total: flat + speed + first_guess + streak,
                    breakdown: Breakdown::Guesser {
                        flat,
                        speed,
                        first_guess,
                        streak,
                    },
                    correct: true,
                    is_chameleon: false,
                    fooled_players: Vec::new(),
                    new_streak,
                }
            }
            Some(vote) => {
                fooled_players.push(FooledPlayer {
                    player_id: guesser.id,
                    time_bonus: speed_points(vote.time_remaining),
                });
                missed_guess()
            }
            // Silence is a miss, but it does not count as being fooled.
            None => missed_guess(),
        };
        results.insert(guesser.id, result);
    }

    let trickery_bonus = fooled_players.len() as u32 * TRICKERY_BONUS;
    let time_bonus = fooled_players.iter().map(|f| f.time_bonus).sum::<u32>();
    results.insert(
        chameleon.id,
        PlayerResult {
            total: trickery_bonus + time_bonus,
            breakdown: Breakdown::Chameleon {
                trickery_bonus,
                time_bonus,
            },
            correct: false,
            is_chameleon: true,
            fooled_players,
            new_streak: chameleon.streak,
        },
    );

    Ok(RoundOutcome {
        lie_index,
        player_results: results,
    })
}

fn missed_guess() -> PlayerResult {
    PlayerResult {
        total: 0,
        breakdown: Breakdown::empty_guesser(),
        correct: false,
        is_chameleon: false,
        fooled_players: Vec::new(),
        new_streak: 0,
    }
}
