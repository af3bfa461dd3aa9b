// Background countdown driver for a session's running round.

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::engine::config::TICK_INTERVAL_MS;
use crate::metrics;
use crate::session::{now_ms, SessionHandle};

struct ActiveTimer;

impl ActiveTimer {
    fn new() -> Self {
        metrics::ACTIVE_ROUND_TIMERS.inc();
        Self
    }
}

impl Drop for ActiveTimer {
    fn drop(&mut self) {
        metrics::ACTIVE_ROUND_TIMERS.dec();
    }
}

/// Wake the session once per tick until its round is revealed. The clock
/// itself comes from the round's start timestamp, so late wake-ups only
/// delay the next event.
pub fn spawn_round_timer(session: SessionHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _active = ActiveTimer::new();
        let mut ticker = interval(Duration::from_millis(TICK_INTERVAL_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match session.tick(now_ms()).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::error!(session = %session.id(), "Round timer stopped: {e}");
                    break;
                }
            }
        }
        tracing::debug!(session = %session.id(), "Round timer finished");
    })
}
