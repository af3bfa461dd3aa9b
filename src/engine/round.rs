// Round lifecycle controller.
//
// collecting -> revealing -> complete. The reveal fires exactly once, from
// either the countdown reaching zero or a confirmed manual early end; whoever
// gets there first wins and later attempts are no-ops. The clock is derived
// from the persisted start timestamp, so a reload resumes instead of restarting.

use serde::Serialize;

use crate::error::GameError;
use crate::metrics;

use super::config::*;
use super::model::{PlayerId, RevealTrigger, Round, RoundResults, StatementKind};
use super::progression::GameState;
use super::scoring::compute_round_results;
use super::votes::Vote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Collecting,
    Revealing,
    Complete,
}

/// Pace signal for ambient audio: faster once the clock is nearly out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tempo {
    Normal,
    SpeedUp,
}

/// Events emitted while a round runs, broadcast to observers as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    Started {
        round_index: usize,
        round_length: u32,
        time_remaining: u32,
    },
    Tick {
        round_index: usize,
        time_remaining: u32,
    },
    TempoChanged {
        round_index: usize,
        tempo: Tempo,
    },
    VoteRecorded {
        round_index: usize,
        player_id: PlayerId,
        votes_cast: usize,
    },
    Revealed {
        round_index: usize,
        trigger: RevealTrigger,
        results: RoundResults,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RevealOutcome {
    Revealed(RoundResults),
    /// Someone else already revealed this round; nothing was recomputed.
    AlreadyRevealed,
}

/// What a client may see of the running round. The lie stays hidden until reveal.
#[derive(Debug, Clone, Serialize)]
pub struct RoundView {
    pub round_index: usize,
    pub total_rounds: usize,
    pub chameleon_id: PlayerId,
    pub statements: Vec<String>,
    pub started: bool,
    pub phase: RoundPhase,
    pub time_remaining: u32,
    pub round_length: u32,
    pub tempo: Tempo,
    pub voted: Vec<PlayerId>,
    pub results: Option<RoundResults>,
}

impl RoundView {
    fn build(
        game: &GameState,
        round_index: usize,
        round: &Round,
        phase: RoundPhase,
        time_remaining: u32,
        tempo: Tempo,
    ) -> Self {
        Self {
            round_index,
            total_rounds: game.rounds.len(),
            chameleon_id: round.chameleon_id,
            statements: round.statements.iter().map(|s| s.text.clone()).collect(),
            started: round.started_at.is_some(),
            phase,
            time_remaining,
            round_length: game.settings.round_length,
            tempo,
            voted: round.votes.iter().map(|(id, _)| id).collect(),
            results: round.results.clone(),
        }
    }

    /// View of the current round when no controller drives it: either not
    /// started yet or already revealed.
    pub fn idle(game: &GameState) -> Option<Self> {
        let round = game.current()?;
        let (phase, time_remaining) = if round.is_resolved() {
            (RoundPhase::Complete, 0)
        } else {
            (RoundPhase::Collecting, game.settings.round_length)
        };
        Some(Self::build(
            game,
            game.current_round,
            round,
            phase,
            time_remaining,
            Tempo::Normal,
        ))
    }
}

/// Whole seconds left, recomputed from wall-clock time.
pub fn remaining_secs(round_length: u32, started_at: i64, now: i64) -> u32 {
    let elapsed_secs = (now - started_at).max(0) / 1000;
    let elapsed_secs = u32::try_from(elapsed_secs).unwrap_or(u32::MAX);
    round_length.saturating_sub(elapsed_secs)
}

fn tempo_for(time_remaining: u32) -> Tempo {
    if time_remaining <= SPEED_UP_THRESHOLD_SECS {
        Tempo::SpeedUp
    } else {
        Tempo::Normal
    }
}

/// Reject rounds that cannot be scored before any of them is played.
pub fn validate_round(round: &Round, index: usize, game: &GameState) -> Result<(), GameError> {
    if round.statements.len() != STATEMENTS_PER_ROUND {
        return Err(GameError::MalformedRound {
            index,
            reason: format!(
                "expected {STATEMENTS_PER_ROUND} statements, found {}",
                round.statements.len()
            ),
        });
    }
    match round
        .statements
        .iter()
        .filter(|s| s.kind == StatementKind::Lie)
        .count()
    {
        0 => return Err(GameError::MissingLie),
        1 => {}
        n => {
            return Err(GameError::MalformedRound {
                index,
                reason: format!("{n} statements are tagged as the lie"),
            })
        }
    }
    if game.player(round.chameleon_id).is_none() {
        return Err(GameError::MissingChameleon(round.chameleon_id));
    }
    Ok(())
}

/// Drives the current round of a game through its lifecycle.
#[derive(Debug, Clone)]
pub struct RoundController {
    round_index: usize,
    round_length: u32,
    started_at: i64,
    time_remaining: u32,
    tempo: Tempo,
    phase: RoundPhase,
    reveal_started: bool,
}

impl RoundController {
    /// Take control of the game's current round, starting its clock or
    /// resuming it from the stored start time.
    pub fn start(game: &mut GameState, now: i64) -> Result<(Self, Vec<RoundEvent>), GameError> {
        let round_index = game.current_round;
        let round_length = game.settings.round_length;
        let round = match game.rounds.get(round_index) {
            Some(r) => r,
            None if game.rounds.is_empty() => return Err(GameError::NoActiveRound),
            None => return Err(GameError::GameOver),
        };
        validate_round(round, round_index, game)?;

        if round.is_resolved() {
            let controller = Self {
                round_index,
                round_length,
                started_at: round.started_at.unwrap_or(now),
                time_remaining: 0,
                tempo: Tempo::Normal,
                phase: RoundPhase::Complete,
                reveal_started: true,
            };
            return Ok((controller, Vec::new()));
        }

        let resumed = round.started_at.is_some();
        let started_at = round.started_at.unwrap_or(now);
        if let Some(round) = game.current_mut() {
            round.started_at = Some(started_at);
        }

        let time_remaining = remaining_secs(round_length, started_at, now);
        let tempo = tempo_for(time_remaining);
        let controller = Self {
            round_index,
            round_length,
            started_at,
            time_remaining,
            tempo,
            phase: RoundPhase::Collecting,
            reveal_started: false,
        };

        if resumed {
            tracing::info!(round = round_index, time_remaining, "Round resumed");
        } else {
            tracing::info!(round = round_index, round_length, "Round started");
            metrics::ROUNDS_STARTED_TOTAL.inc();
        }

        let mut events = vec![RoundEvent::Started {
            round_index,
            round_length,
            time_remaining,
        }];
        if tempo == Tempo::SpeedUp {
            events.push(RoundEvent::TempoChanged { round_index, tempo });
        }
        Ok((controller, events))
    }

    pub fn round_index(&self) -> usize {
        self.round_index
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn time_remaining(&self) -> u32 {
        self.time_remaining
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn is_revealed(&self) -> bool {
        self.reveal_started
    }

    fn round<'a>(&self, game: &'a GameState) -> Result<&'a Round, GameError> {
        if game.current_round != self.round_index {
            return Err(GameError::NoActiveRound);
        }
        game.rounds
            .get(self.round_index)
            .ok_or(GameError::NoActiveRound)
    }

    fn set_tempo(&mut self, tempo: Tempo, events: &mut Vec<RoundEvent>) {
        if self.tempo != tempo {
            self.tempo = tempo;
            events.push(RoundEvent::TempoChanged {
                round_index: self.round_index,
                tempo,
            });
        }
    }

    /// Advance the clock to `now`. Reveals by timer when it runs out.
    pub fn tick(&mut self, game: &mut GameState, now: i64) -> Result<Vec<RoundEvent>, GameError> {
        let mut events = Vec::new();
        if self.phase != RoundPhase::Collecting || self.reveal_started {
            return Ok(events);
        }
        self.round(game)?;

        let remaining = remaining_secs(self.round_length, self.started_at, now);
        if remaining != self.time_remaining {
            self.time_remaining = remaining;
            events.push(RoundEvent::Tick {
                round_index: self.round_index,
                time_remaining: remaining,
            });
        }
        self.set_tempo(tempo_for(remaining), &mut events);

        if remaining == 0 {
            events.extend(self.reveal_with_events(game, RevealTrigger::Timer, now)?);
        }
        Ok(events)
    }

    /// Record (or replace) a player's vote, stamped with the time left on the clock.
    pub fn submit_vote(
        &mut self,
        game: &mut GameState,
        player_id: PlayerId,
        statement_index: usize,
        now: i64,
    ) -> Result<RoundEvent, GameError> {
        if self.reveal_started || self.phase != RoundPhase::Collecting {
            return Err(GameError::RoundFrozen);
        }
        let round = self.round(game)?;
        if game.player(player_id).is_none() {
            return Err(GameError::UnknownPlayer(player_id));
        }
        if statement_index >= round.statements.len() {
            return Err(GameError::InvalidVote {
                player_id,
                statement_index,
            });
        }

        let time_remaining = remaining_secs(self.round_length, self.started_at, now);
        if time_remaining == 0 {
            // The timer owns the expiry reveal; late votes are simply refused.
            return Err(GameError::RoundFrozen);
        }

        let round_index = self.round_index;
        let round = game.current_mut().ok_or(GameError::NoActiveRound)?;
        round
            .votes
            .set(player_id, Vote::new(statement_index, time_remaining));
        metrics::VOTES_SUBMITTED_TOTAL.inc();
        tracing::debug!(round = round_index, player_id, time_remaining, "Vote recorded");

        Ok(RoundEvent::VoteRecorded {
            round_index,
            player_id,
            votes_cast: round.votes.len(),
        })
    }

    /// End the round before the timer does. Needs an explicit confirmation.
    pub fn end_early(
        &mut self,
        game: &mut GameState,
        confirmed: bool,
        now: i64,
    ) -> Result<Vec<RoundEvent>, GameError> {
        if !confirmed {
            return Err(GameError::ConfirmationRequired);
        }
        self.reveal_with_events(game, RevealTrigger::Manual, now)
    }

    fn reveal_with_events(
        &mut self,
        game: &mut GameState,
        trigger: RevealTrigger,
        now: i64,
    ) -> Result<Vec<RoundEvent>, GameError> {
        let mut events = Vec::new();
        if let RevealOutcome::Revealed(results) = self.reveal(game, trigger, now)? {
            self.set_tempo(Tempo::Normal, &mut events);
            events.push(RoundEvent::Revealed {
                round_index: self.round_index,
                trigger,
                results,
            });
        }
        Ok(events)
    }

    /// The single collecting -> revealing -> complete transition.
    pub fn reveal(
        &mut self,
        game: &mut GameState,
        trigger: RevealTrigger,
        now: i64,
    ) -> Result<RevealOutcome, GameError> {
        if self.reveal_started {
            metrics::REVEALS_SUPPRESSED_TOTAL.inc();
            tracing::debug!(round = self.round_index, trigger = trigger.as_str(), "Reveal already done");
            return Ok(RevealOutcome::AlreadyRevealed);
        }
        let round = self.round(game)?;
        if round.is_resolved() {
            self.reveal_started = true;
            self.phase = RoundPhase::Complete;
            metrics::REVEALS_SUPPRESSED_TOTAL.inc();
            return Ok(RevealOutcome::AlreadyRevealed);
        }
        // A scoring failure leaves the round collecting, so it can be retried.
        let outcome = compute_round_results(
            &game.players,
            &round.votes,
            &round.statements,
            round.chameleon_id,
        )?;
        self.reveal_started = true;
        self.phase = RoundPhase::Revealing;
        let results = RoundResults::new(outcome, trigger, now);

        let round = game.current_mut().ok_or(GameError::NoActiveRound)?;
        round.results = Some(results.clone());
        game.apply_round_results(&results);

        self.time_remaining = 0;
        self.phase = RoundPhase::Complete;
        metrics::REVEALS_TOTAL
            .with_label_values(&[trigger.as_str()])
            .inc();
        tracing::info!(
            round = self.round_index,
            trigger = trigger.as_str(),
            fooled = results.fooled_count(),
            "Round revealed"
        );
        Ok(RevealOutcome::Revealed(results))
    }

    pub fn view(&self, game: &GameState) -> Result<RoundView, GameError> {
        let round = self.round(game)?;
        Ok(RoundView::build(
            game,
            self.round_index,
            round,
            self.phase,
            self.time_remaining,
            self.tempo,
        ))
    }
}
