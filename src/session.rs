// Live game sessions.
//
// Each session is one game with a single writer: every command takes the
// session lock, runs the engine, persists and then fans events out to
// WebSocket observers. Sessions evicted from memory are reloaded from the
// store on demand, and a round that was running resumes its countdown.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::Database;
use crate::engine::assignment::build_rounds;
use crate::engine::model::{PlayerId, TruthSet};
use crate::engine::progression::{GameState, LobbySettings};
use crate::engine::round::{RoundController, RoundEvent, RoundPhase, RoundView};
use crate::error::{GameError, Recovery, SessionError, StoreError};
use crate::lies::{sanitize_truth, FallbackPool, LieBook, LieRequest};
use crate::metrics;
use crate::replay::GameRecorder;
use crate::stats::{self, GameStats, LeaderboardEntry, RoundLeaderboard};
use crate::store::{SessionStore, TruthDrafts};
use crate::timer;

/// Wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Session-level notifications, sent alongside round events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    LobbyConfigured { num_players: usize, num_rounds: usize },
    RoundsReady { total_rounds: usize },
    Advanced { current_round: usize, finished: bool },
    GameReset,
    /// The timer could not reveal the round; it stays open for a manual end.
    RevealFailed {
        round_index: usize,
        error: String,
        recovery: Recovery,
    },
}

/// Where session data goes besides memory.
#[derive(Clone)]
pub struct Persistence {
    pub store: SessionStore,
    /// Round results and game archives are only kept when a database is attached.
    pub db: Option<Arc<Database>>,
}

/// What a client may see of a player. Truth sets stay private.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub icon: Option<String>,
    pub score: u32,
    pub streak: u32,
    pub truth_sets_submitted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub resume_target: Recovery,
    pub consent_given: bool,
    pub settings: LobbySettings,
    pub sets_per_player: usize,
    pub players: Vec<PlayerView>,
    pub current_round: usize,
    pub total_rounds: usize,
    pub round: Option<RoundView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TruthDraftsView {
    pub drafts: TruthDrafts,
    pub current_player: usize,
}

struct Session {
    game: GameState,
    controller: Option<RoundController>,
    recorder: GameRecorder,
    timer: Option<JoinHandle<()>>,
}

impl Session {
    fn new(game: GameState) -> Self {
        Self {
            game,
            controller: None,
            recorder: GameRecorder::new(),
            timer: None,
        }
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Cheap, cloneable handle to one live session.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    state: Arc<Mutex<Session>>,
    events: broadcast::Sender<String>,
    persistence: Persistence,
}

impl SessionHandle {
    fn new(id: Uuid, game: GameState, persistence: Persistence) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            id,
            state: Arc::new(Mutex::new(Session::new(game))),
            events,
            persistence,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subscribe to this session's events as JSON strings.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    fn publish<T: Serialize>(&self, event: &T) {
        match serde_json::to_string(event) {
            // No subscribers is fine.
            Ok(json) => {
                let _ = self.events.send(json);
            }
            Err(e) => tracing::error!(session = %self.id, "Failed to serialize event: {e}"),
        }
    }

    async fn save(&self, game: &GameState) -> Result<(), SessionError> {
        self.persistence
            .store
            .save_game(self.id, game)
            .await
            .map_err(|e| {
                tracing::error!(session = %self.id, "Failed to save game state: {e}");
                SessionError::from(e)
            })
    }

    /// Drop the logged results of earlier games so the next game's rounds
    /// are not shadowed by the `(session, round)` uniqueness guard.
    async fn clear_round_results(&self) -> Result<(), SessionError> {
        if let Some(db) = &self.persistence.db {
            let removed = db
                .delete_round_results(self.id)
                .await
                .map_err(StoreError::from)?;
            if removed > 0 {
                tracing::debug!(session = %self.id, removed, "Cleared logged round results");
            }
        }
        Ok(())
    }

    fn spawn_timer(&self, session: &mut Session) {
        session.stop_timer();
        session.timer = Some(timer::spawn_round_timer(self.clone()));
    }

    /// Record, persist and broadcast the events a controller produced.
    async fn handle_events(
        &self,
        session: &mut Session,
        events: &[RoundEvent],
    ) -> Result<(), SessionError> {
        let mut revealed = false;
        for event in events {
            if let Err(e) = session.recorder.record(event) {
                tracing::warn!(session = %self.id, "Event not recorded: {e}");
            }
            if let RoundEvent::Revealed {
                round_index,
                results,
                ..
            } = event
            {
                revealed = true;
                if let Some(db) = &self.persistence.db {
                    let chameleon_id = session
                        .game
                        .rounds
                        .get(*round_index)
                        .map(|r| r.chameleon_id)
                        .unwrap_or_default();
                    if let Err(e) = db
                        .record_round_result(self.id, *round_index, chameleon_id, results)
                        .await
                    {
                        tracing::error!(session = %self.id, round = round_index, "Failed to record round result: {e}");
                    }
                }
            }
            self.publish(event);
        }

        if revealed {
            self.save(&session.game).await?;
            if session.game.is_finished() {
                self.archive(session).await;
            }
        }
        Ok(())
    }

    async fn archive(&self, session: &mut Session) {
        metrics::GAMES_COMPLETED_TOTAL.inc();
        let Some(db) = &self.persistence.db else {
            return;
        };
        let recorder = std::mem::take(&mut session.recorder);
        let data = match recorder.finish(&session.game) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(session = %self.id, "Failed to build game archive: {e}");
                return;
            }
        };
        match db
            .archive_game(
                self.id,
                session.game.players.len(),
                session.game.rounds.len(),
                &data,
            )
            .await
        {
            Ok(archive_id) => {
                tracing::info!(session = %self.id, archive_id, bytes = data.len(), "Game archived")
            }
            Err(e) => tracing::error!(session = %self.id, "Failed to store game archive: {e}"),
        }
    }

    // ── Views ─────────────────────────────────────────────────────────

    fn view_of(&self, session: &Session) -> SessionView {
        let game = &session.game;
        let round = session
            .controller
            .as_ref()
            .filter(|c| c.round_index() == game.current_round)
            .and_then(|c| c.view(game).ok())
            .or_else(|| RoundView::idle(game));
        SessionView {
            id: self.id,
            resume_target: game.resume_target(),
            consent_given: game.consent_given,
            settings: game.settings.clone(),
            sets_per_player: game.settings.sets_per_player(),
            players: game
                .players
                .iter()
                .map(|p| PlayerView {
                    id: p.id,
                    name: p.name.clone(),
                    icon: p.icon.clone(),
                    score: p.score,
                    streak: p.streak,
                    truth_sets_submitted: p.truth_sets.len(),
                })
                .collect(),
            current_round: game.current_round,
            total_rounds: game.rounds.len(),
            round,
        }
    }

    pub async fn view(&self) -> SessionView {
        let session = self.state.lock().await;
        self.view_of(&session)
    }

    /// A copy of the full game state, lies included.
    pub async fn game(&self) -> GameState {
        self.state.lock().await.game.clone()
    }

    pub async fn stats(&self) -> GameStats {
        stats::compute(&self.state.lock().await.game)
    }

    pub async fn final_leaderboard(&self) -> Vec<LeaderboardEntry> {
        stats::final_leaderboard(&self.state.lock().await.game)
    }

    /// Standings after the most recently revealed round.
    pub async fn round_leaderboard(&self) -> Result<RoundLeaderboard, SessionError> {
        let session = self.state.lock().await;
        let game = &session.game;
        let latest = game
            .rounds
            .iter()
            .take(game.current_round + 1)
            .rposition(|r| r.is_resolved())
            .ok_or(GameError::RoundInProgress)?;
        Ok(stats::round_leaderboard(game, latest)?)
    }

    // ── Setup ─────────────────────────────────────────────────────────

    pub async fn give_consent(&self) -> Result<SessionView, SessionError> {
        let mut session = self.state.lock().await;
        session.game.give_consent();
        self.save(&session.game).await?;
        Ok(self.view_of(&session))
    }

    /// Seat players for a new game with the given lobby choices.
    pub async fn configure_lobby(&self, settings: LobbySettings) -> Result<SessionView, SessionError> {
        let mut guard = self.state.lock().await;
        let session = &mut *guard;
        session.game.ensure_consent()?;
        session.game.initialize(settings.clone())?;
        session.stop_timer();
        session.controller = None;
        session.recorder = GameRecorder::new();

        self.clear_round_results().await?;
        let store = &self.persistence.store;
        store.save_lobby_settings(&settings).await?;
        store.clear_drafts(self.id).await?;
        self.save(&session.game).await?;
        self.publish(&SessionEvent::LobbyConfigured {
            num_players: settings.num_players,
            num_rounds: settings.num_rounds,
        });
        Ok(self.view_of(session))
    }

    pub async fn update_player(
        &self,
        player_id: PlayerId,
        name: Option<String>,
        icon: Option<String>,
    ) -> Result<SessionView, SessionError> {
        let mut session = self.state.lock().await;
        session.game.ensure_consent()?;
        session.game.update_player(player_id, name, icon)?;
        self.save(&session.game).await?;
        Ok(self.view_of(&session))
    }

    /// Store a player's truth sets, sanitized and numbered in submission order.
    pub async fn submit_truths(
        &self,
        player_id: PlayerId,
        sets: Vec<TruthSet>,
    ) -> Result<SessionView, SessionError> {
        let mut session = self.state.lock().await;
        session.game.ensure_consent()?;
        if !session.game.rounds.is_empty() {
            return Err(GameError::InvalidSettings(
                "truths cannot change once rounds are built".into(),
            )
            .into());
        }
        let sets = sets
            .into_iter()
            .enumerate()
            .map(|(i, set)| TruthSet {
                set_number: i as u32 + 1,
                truth1: sanitize_truth(&set.truth1),
                truth2: sanitize_truth(&set.truth2),
            })
            .collect();
        session.game.set_truth_sets(player_id, sets)?;
        self.save(&session.game).await?;
        Ok(self.view_of(&session))
    }

    pub async fn truth_drafts(&self) -> Result<TruthDraftsView, SessionError> {
        let store = &self.persistence.store;
        Ok(TruthDraftsView {
            drafts: store.load_truth_drafts(self.id).await?,
            current_player: store.load_draft_player(self.id).await?,
        })
    }

    pub async fn save_truth_drafts(
        &self,
        drafts: TruthDrafts,
        current_player: usize,
    ) -> Result<(), SessionError> {
        let store = &self.persistence.store;
        store.save_truth_drafts(self.id, &drafts).await?;
        store.save_draft_player(self.id, current_player).await?;
        Ok(())
    }

    /// Payload to send to the lie relay.
    pub async fn lie_request(&self) -> Result<LieRequest, SessionError> {
        let session = self.state.lock().await;
        session.game.ensure_consent()?;
        if !session.game.truths_complete() {
            return Err(GameError::TruthsIncomplete.into());
        }
        Ok(LieRequest::from_players(
            &session.game.players,
            session.game.settings.ai_model,
        ))
    }

    /// Build the game's rounds from the relay's lies, or from the fallback
    /// pool when there is no usable relay response. Returns the round count.
    pub async fn generate_rounds(
        &self,
        relay_response: Option<&Value>,
        fallback: &FallbackPool,
    ) -> Result<usize, SessionError> {
        let mut guard = self.state.lock().await;
        let session = &mut *guard;
        session.game.ensure_consent()?;
        if !session.game.truths_complete() {
            return Err(GameError::TruthsIncomplete.into());
        }
        if session.game.lies_generated && !session.game.rounds.is_empty() {
            return Ok(session.game.rounds.len());
        }

        let game = &session.game;
        let mut rng = StdRng::from_entropy();
        let request = LieRequest::from_players(&game.players, game.settings.ai_model);
        let relay_book = match relay_response.map(|r| LieBook::from_relay_response(&request, r)) {
            Some(Ok(book)) if book.total() > 0 => Some(book),
            Some(Ok(_)) => {
                tracing::warn!(session = %self.id, "Relay returned no lies");
                None
            }
            Some(Err(e)) => {
                tracing::warn!(session = %self.id, "Relay response rejected: {e}");
                None
            }
            None => None,
        };
        let book = match relay_book {
            Some(book) => book,
            None => fallback.lie_book_for(&game.players, &mut rng)?,
        };

        let rounds = build_rounds(&game.players, &book, game.settings.num_rounds, &mut rng);
        if rounds.is_empty() {
            return Err(GameError::NoRoundsBuilt.into());
        }
        let total_rounds = rounds.len();
        session.game.set_rounds(rounds);
        session.controller = None;
        session.recorder = GameRecorder::new();

        self.persistence.store.clear_drafts(self.id).await?;
        self.save(&session.game).await?;
        self.publish(&SessionEvent::RoundsReady { total_rounds });
        Ok(total_rounds)
    }

    // ── Round commands ────────────────────────────────────────────────

    /// Start the current round's countdown, or resume it if it already runs.
    pub async fn start_round(&self, now: i64) -> Result<RoundView, SessionError> {
        let mut guard = self.state.lock().await;
        let session = &mut *guard;
        session.game.ensure_consent()?;
        let current = session.game.current_round;
        if let Some(controller) = session
            .controller
            .as_ref()
            .filter(|c| c.round_index() == current)
        {
            return Ok(controller.view(&session.game)?);
        }

        let (controller, events) = RoundController::start(&mut session.game, now)?;
        let collecting = controller.phase() == RoundPhase::Collecting;
        let view = controller.view(&session.game)?;
        session.controller = Some(controller);

        self.save(&session.game).await?;
        self.handle_events(session, &events).await?;
        if collecting {
            self.spawn_timer(session);
        }
        Ok(view)
    }

    pub async fn submit_vote(
        &self,
        player_id: PlayerId,
        statement_index: usize,
        now: i64,
    ) -> Result<RoundEvent, SessionError> {
        let mut guard = self.state.lock().await;
        let session = &mut *guard;
        session.game.ensure_consent()?;
        let current = session.game.current_round;
        let controller = session
            .controller
            .as_mut()
            .filter(|c| c.round_index() == current)
            .ok_or(GameError::NoActiveRound)?;
        let event = controller.submit_vote(&mut session.game, player_id, statement_index, now)?;

        self.save(&session.game).await?;
        self.handle_events(session, std::slice::from_ref(&event)).await?;
        Ok(event)
    }

    /// Manual early end. Empty when the timer already revealed the round.
    pub async fn end_early(&self, confirmed: bool, now: i64) -> Result<Vec<RoundEvent>, SessionError> {
        let mut guard = self.state.lock().await;
        let session = &mut *guard;
        session.game.ensure_consent()?;
        let current = session.game.current_round;
        let controller = session
            .controller
            .as_mut()
            .filter(|c| c.round_index() == current)
            .ok_or(GameError::NoActiveRound)?;
        let events = controller.end_early(&mut session.game, confirmed, now)?;
        if controller.phase() != RoundPhase::Collecting {
            session.stop_timer();
        }
        self.handle_events(session, &events).await?;
        Ok(events)
    }

    /// One timer wake-up. Returns whether the countdown should keep running.
    pub async fn tick(&self, now: i64) -> Result<bool, SessionError> {
        let mut guard = self.state.lock().await;
        let session = &mut *guard;
        let current = session.game.current_round;
        let Some(controller) = session
            .controller
            .as_mut()
            .filter(|c| c.round_index() == current)
        else {
            return Ok(false);
        };
        let events = match controller.tick(&mut session.game, now) {
            Ok(events) => events,
            Err(e) => {
                session.timer = None;
                self.publish(&SessionEvent::RevealFailed {
                    round_index: current,
                    error: e.to_string(),
                    recovery: e.recovery(),
                });
                return Err(e.into());
            }
        };
        let running = controller.phase() == RoundPhase::Collecting;
        if !running {
            // Dropping our own handle detaches the task; it exits on return.
            session.timer = None;
        }
        self.handle_events(session, &events).await?;
        Ok(running)
    }

    pub async fn next_round(&self) -> Result<SessionView, SessionError> {
        let mut guard = self.state.lock().await;
        let session = &mut *guard;
        session.game.ensure_consent()?;
        let current_round = session.game.advance()?;
        session.controller = None;
        session.stop_timer();

        self.save(&session.game).await?;
        self.publish(&SessionEvent::Advanced {
            current_round,
            finished: current_round >= session.game.rounds.len(),
        });
        Ok(self.view_of(session))
    }

    /// Start over with the same consent and lobby choices.
    pub async fn reset(&self) -> Result<SessionView, SessionError> {
        let mut guard = self.state.lock().await;
        let session = &mut *guard;
        session.stop_timer();
        session.game.reset();
        session.controller = None;
        session.recorder = GameRecorder::new();

        self.clear_round_results().await?;
        self.persistence.store.clear_drafts(self.id).await?;
        self.save(&session.game).await?;
        self.publish(&SessionEvent::GameReset);
        tracing::info!(session = %self.id, "Game reset");
        Ok(self.view_of(session))
    }

    /// Pick a reloaded session's running round back up.
    async fn resume(&self, now: i64) -> Result<(), SessionError> {
        let mut guard = self.state.lock().await;
        let session = &mut *guard;
        let running = session
            .game
            .current()
            .is_some_and(|r| r.started_at.is_some() && !r.is_resolved());
        if !running || session.controller.is_some() {
            return Ok(());
        }
        let (controller, events) = RoundController::start(&mut session.game, now)?;
        session.controller = Some(controller);
        self.handle_events(session, &events).await?;
        self.spawn_timer(session);
        Ok(())
    }
}

/// All sessions this process knows about.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
    persistence: Persistence,
}

impl SessionRegistry {
    pub fn new(persistence: Persistence) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            persistence,
        }
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// New session, pre-filled with the last lobby choices made on this install.
    pub async fn create(&self) -> Result<SessionHandle, SessionError> {
        let id = Uuid::new_v4();
        let mut game = GameState::new();
        if let Some(settings) = self.persistence.store.load_lobby_settings().await? {
            game.settings = settings;
        }
        self.persistence.store.save_game(id, &game).await?;

        let handle = SessionHandle::new(id, game, self.persistence.clone());
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, handle.clone());
        metrics::SESSIONS_CREATED_TOTAL.inc();
        metrics::ACTIVE_SESSIONS.set(sessions.len() as i64);
        tracing::info!(session = %id, "Session created");
        Ok(handle)
    }

    /// Look a session up, reloading it from the store if needed.
    pub async fn get(&self, id: Uuid) -> Result<Option<SessionHandle>, SessionError> {
        if let Some(handle) = self.sessions.read().await.get(&id) {
            return Ok(Some(handle.clone()));
        }

        let mut sessions = self.sessions.write().await;
        if let Some(handle) = sessions.get(&id) {
            return Ok(Some(handle.clone()));
        }
        let Some(game) = self.persistence.store.load_game(id).await? else {
            return Ok(None);
        };
        let handle = SessionHandle::new(id, game, self.persistence.clone());
        sessions.insert(id, handle.clone());
        metrics::ACTIVE_SESSIONS.set(sessions.len() as i64);
        drop(sessions);

        tracing::info!(session = %id, "Session reloaded from store");
        if let Err(e) = handle.resume(now_ms()).await {
            tracing::warn!(session = %id, "Could not resume running round: {e}");
        }
        Ok(Some(handle))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop a session from memory. Its stored state stays.
    pub async fn evict(&self, id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&id);
        metrics::ACTIVE_SESSIONS.set(sessions.len() as i64);
        if let Some(handle) = &removed {
            handle.state.lock().await.stop_timer();
        }
        removed.is_some()
    }

    /// Forget a session entirely: memory, stored state and logged results.
    /// Archives of finished games are kept.
    pub async fn delete(&self, id: Uuid) -> Result<bool, SessionError> {
        let evicted = self.evict(id).await;
        let store = &self.persistence.store;
        let stored = store.load_game(id).await?.is_some();
        if !evicted && !stored {
            return Ok(false);
        }
        store.clear_session(id).await?;
        if let Some(db) = &self.persistence.db {
            db.delete_round_results(id).await.map_err(StoreError::from)?;
        }
        tracing::info!(session = %id, "Session deleted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::RevealTrigger;
    use crate::engine::votes::Vote;
    use serde_json::json;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Persistence {
            store: SessionStore::in_memory(),
            db: None,
        })
    }

    fn sets(player: PlayerId, count: u32) -> Vec<TruthSet> {
        (1..=count)
            .map(|n| TruthSet {
                set_number: n,
                truth1: format!("p{player} truth {n}a"),
                truth2: format!("p{player} truth {n}b"),
            })
            .collect()
    }

    async fn ready_session(registry: &SessionRegistry, players: usize, rounds: usize) -> SessionHandle {
        let handle = registry.create().await.unwrap();
        handle.give_consent().await.unwrap();
        let settings = LobbySettings {
            num_players: players,
            num_rounds: rounds,
            ..LobbySettings::default()
        };
        let per_player = settings.sets_per_player() as u32;
        handle.configure_lobby(settings).await.unwrap();
        for id in 1..=players as PlayerId {
            handle.submit_truths(id, sets(id, per_player)).await.unwrap();
        }
        handle
    }

    #[tokio::test]
    async fn test_session_flow_with_relay_lies() {
        let registry = registry();
        let handle = ready_session(&registry, 2, 2).await;
        assert_eq!(handle.view().await.resume_target, Recovery::Loading);

        let request = handle.lie_request().await.unwrap();
        assert_eq!(request.expected_lies(), 2);
        let relay = json!({"lies": {"1": ["p1 lie"], "2": ["p2 lie"]}});
        let total = handle
            .generate_rounds(Some(&relay), &FallbackPool::builtin())
            .await
            .unwrap();
        assert_eq!(total, 2);

        let t0 = now_ms();
        let view = handle.start_round(t0).await.unwrap();
        assert_eq!(view.time_remaining, 30);
        let game = handle.game().await;
        let round = &game.rounds[0];
        let guesser = if round.chameleon_id == 1 { 2 } else { 1 };
        let lie = round.lie_index().unwrap();

        handle.submit_vote(guesser, lie, t0 + 10_000).await.unwrap();
        let events = handle.end_early(true, t0 + 11_000).await.unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            RoundEvent::Revealed { trigger: RevealTrigger::Manual, .. }
        )));
        // A late timer wake-up finds nothing left to do.
        assert!(!handle.tick(t0 + 31_000).await.unwrap());
        assert!(handle.end_early(true, t0 + 32_000).await.unwrap().is_empty());

        let board = handle.round_leaderboard().await.unwrap();
        let guesser_row = board
            .standings
            .iter()
            .find(|s| s.entry.player_id == guesser)
            .unwrap();
        // Two players: flat 50 plus round(20 / 2), no first-guess or streak bonus.
        assert_eq!(guesser_row.points_this_round, 60);

        let view = handle.next_round().await.unwrap();
        assert_eq!(view.current_round, 1);
        assert_eq!(view.resume_target, Recovery::Round);
    }

    #[tokio::test]
    async fn test_generate_rounds_falls_back_on_bad_relay() {
        let registry = registry();
        let handle = ready_session(&registry, 3, 3).await;
        let total = handle
            .generate_rounds(Some(&json!({"error": "Error generating lies"})), &FallbackPool::builtin())
            .await
            .unwrap();
        assert_eq!(total, 3);
        let game = handle.game().await;
        assert!(game.rounds.iter().all(|r| r.lie_index().is_some()));

        // Generating again keeps the rounds already built.
        let again = handle.generate_rounds(None, &FallbackPool::builtin()).await.unwrap();
        assert_eq!(again, 3);
        assert_eq!(handle.game().await.rounds, game.rounds);
    }

    #[tokio::test]
    async fn test_generate_rounds_requires_truths() {
        let registry = registry();
        let handle = registry.create().await.unwrap();
        handle.give_consent().await.unwrap();
        handle.configure_lobby(LobbySettings::default()).await.unwrap();
        let err = handle
            .generate_rounds(None, &FallbackPool::builtin())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Game(GameError::TruthsIncomplete)));
        assert_eq!(err.recovery(), Some(Recovery::TruthInputs));
    }

    #[tokio::test]
    async fn test_empty_fallback_pool_escalates() {
        let registry = registry();
        let handle = ready_session(&registry, 2, 2).await;
        let err = handle
            .generate_rounds(None, &FallbackPool::from_lies(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Lies(_)));
    }

    #[tokio::test]
    async fn test_vote_without_started_round() {
        let registry = registry();
        let handle = ready_session(&registry, 2, 2).await;
        handle.generate_rounds(None, &FallbackPool::builtin()).await.unwrap();
        let err = handle.submit_vote(1, 0, now_ms()).await.unwrap_err();
        assert!(matches!(err, SessionError::Game(GameError::NoActiveRound)));
    }

    #[tokio::test]
    async fn test_reload_resumes_running_round() {
        let registry = registry();
        let handle = ready_session(&registry, 2, 2).await;
        handle.generate_rounds(None, &FallbackPool::builtin()).await.unwrap();
        let now = now_ms();
        handle.start_round(now).await.unwrap();
        let id = handle.id();

        assert!(registry.evict(id).await);
        let reloaded = registry.get(id).await.unwrap().unwrap();
        let view = reloaded.view().await;
        let round = view.round.unwrap();
        assert!(round.started);
        assert_eq!(round.phase, RoundPhase::Collecting);
        assert!(round.time_remaining <= 30);
        registry.evict(id).await;
    }

    #[tokio::test]
    async fn test_reset_keeps_consent() {
        let registry = registry();
        let handle = ready_session(&registry, 2, 2).await;
        handle.generate_rounds(None, &FallbackPool::builtin()).await.unwrap();
        let view = handle.reset().await.unwrap();
        assert!(view.consent_given);
        assert!(view.players.is_empty());
        assert_eq!(view.resume_target, Recovery::Lobby);
    }

    #[tokio::test]
    async fn test_new_sessions_reuse_last_lobby_settings() {
        let registry = registry();
        let first = registry.create().await.unwrap();
        first.give_consent().await.unwrap();
        let settings = LobbySettings {
            num_players: 4,
            num_rounds: 8,
            round_length: 60,
            ..LobbySettings::default()
        };
        first.configure_lobby(settings.clone()).await.unwrap();

        let second = registry.create().await.unwrap();
        assert_eq!(second.view().await.settings, settings);
        assert!(registry.get(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_truths_are_sanitized_and_renumbered() {
        let registry = registry();
        let handle = registry.create().await.unwrap();
        handle.give_consent().await.unwrap();
        handle.configure_lobby(LobbySettings::default()).await.unwrap();
        handle
            .submit_truths(
                1,
                vec![TruthSet {
                    set_number: 7,
                    truth1: "I  have\na cat".into(),
                    truth2: "I like tea".into(),
                }],
            )
            .await
            .unwrap();
        let game = handle.game().await;
        let set = &game.players[0].truth_sets[0];
        assert_eq!(set.set_number, 1);
        assert_eq!(set.truth1, "I have a cat");
    }

    #[tokio::test]
    async fn test_gameplay_refused_until_consent() {
        let registry = registry();
        let handle = registry.create().await.unwrap();
        assert_eq!(handle.view().await.resume_target, Recovery::Consent);

        let err = handle
            .configure_lobby(LobbySettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Game(GameError::ConsentRequired)));
        assert_eq!(err.recovery(), Some(Recovery::Consent));
        let err = handle.submit_truths(1, sets(1, 1)).await.unwrap_err();
        assert!(matches!(err, SessionError::Game(GameError::ConsentRequired)));
        let err = handle
            .generate_rounds(None, &FallbackPool::builtin())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Game(GameError::ConsentRequired)));
        let err = handle.start_round(now_ms()).await.unwrap_err();
        assert!(matches!(err, SessionError::Game(GameError::ConsentRequired)));
        assert!(handle.game().await.players.is_empty());

        handle.give_consent().await.unwrap();
        let view = handle.configure_lobby(LobbySettings::default()).await.unwrap();
        assert_eq!(view.resume_target, Recovery::TruthInputs);
    }

    #[tokio::test]
    async fn test_delete_forgets_stored_session() {
        let registry = registry();
        let handle = ready_session(&registry, 2, 2).await;
        let id = handle.id();

        assert!(registry.delete(id).await.unwrap());
        assert!(registry.get(id).await.unwrap().is_none());
        assert!(registry.persistence().store.load_game(id).await.unwrap().is_none());
        assert!(!registry.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_timer_reveal_is_announced() {
        let registry = registry();
        let handle = ready_session(&registry, 2, 2).await;
        handle.generate_rounds(None, &FallbackPool::builtin()).await.unwrap();
        let mut rx = handle.subscribe();
        let t0 = now_ms();
        handle.start_round(t0).await.unwrap();

        let guesser = {
            let mut session = handle.state.lock().await;
            let round = &mut session.game.rounds[0];
            let guesser = if round.chameleon_id == 1 { 2 } else { 1 };
            round.votes.set(guesser, Vote::new(7, 20));
            guesser
        };

        let err = handle.tick(t0 + 31_000).await.unwrap_err();
        assert!(matches!(err, SessionError::Game(GameError::InvalidVote { .. })));
        let mut announced = None;
        while let Ok(msg) = rx.try_recv() {
            let value: Value = serde_json::from_str(&msg).unwrap();
            if value["type"] == "reveal_failed" {
                announced = Some(value);
            }
        }
        let announced = announced.unwrap();
        assert_eq!(announced["round_index"], 0);
        assert_eq!(announced["recovery"], "lobby");
        assert_eq!(
            handle.view().await.round.unwrap().phase,
            RoundPhase::Collecting
        );

        handle.state.lock().await.game.rounds[0].votes.remove(guesser);
        let events = handle.end_early(true, t0 + 32_000).await.unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, RoundEvent::Revealed { trigger: RevealTrigger::Manual, .. })));
        registry.evict(handle.id()).await;
    }
}
