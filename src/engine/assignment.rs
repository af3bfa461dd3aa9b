// Round assignment builder: turns players' truth sets plus lies into rounds.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::lies::LieBook;

use super::model::{Player, PlayerId, Round, Statement};
use super::votes::Votes;

/// Indices into each player's truth sets not yet used in the current cycle.
struct Inventory {
    available: BTreeMap<PlayerId, Vec<usize>>,
}

impl Inventory {
    fn full(players: &[Player]) -> Self {
        let available = players
            .iter()
            .map(|p| (p.id, (0..p.truth_sets.len()).collect()))
            .collect();
        Self { available }
    }

    fn is_exhausted(&self) -> bool {
        self.available.values().all(Vec::is_empty)
    }

    fn has_sets(&self, player_id: PlayerId) -> bool {
        self.available
            .get(&player_id)
            .is_some_and(|sets| !sets.is_empty())
    }

    fn take<R: Rng + ?Sized>(&mut self, player_id: PlayerId, rng: &mut R) -> Option<usize> {
        let sets = self.available.get_mut(&player_id)?;
        if sets.is_empty() {
            return None;
        }
        let pick = rng.gen_range(0..sets.len());
        Some(sets.swap_remove(pick))
    }
}

/// Build up to `total_rounds` rounds.
///
/// Each pass visits players in a fresh random order and gives everyone with an
/// unused set one round. A player's sets are not reused until all of them have
/// been played; once every player is out of sets the inventory refills. Sets
/// without a lie are skipped with a warning, so the result may come up short.
pub fn build_rounds<R: Rng + ?Sized>(
    players: &[Player],
    lies: &LieBook,
    total_rounds: usize,
    rng: &mut R,
) -> Vec<Round> {
    let mut rounds = Vec::with_capacity(total_rounds);
    let mut inventory = Inventory::full(players);
    let mut built_since_refill = 0usize;
    let mut order: Vec<&Player> = players.iter().collect();

    while rounds.len() < total_rounds {
        if inventory.is_exhausted() {
            if built_since_refill == 0 {
                tracing::warn!(
                    requested = total_rounds,
                    built = rounds.len(),
                    "No usable truth sets left, stopping round assignment"
                );
                break;
            }
            tracing::debug!(built = rounds.len(), "Truth sets exhausted, refilling");
            inventory = Inventory::full(players);
            built_since_refill = 0;
        }

        order.shuffle(rng);
        for player in &order {
            if rounds.len() >= total_rounds {
                break;
            }
            if !inventory.has_sets(player.id) {
                continue;
            }
            let Some(set_index) = inventory.take(player.id, rng) else {
                continue;
            };
            let set = &player.truth_sets[set_index];
            let Some(lie) = lies.lie_for(player.id, set.set_number) else {
                tracing::warn!(
                    player_id = player.id,
                    set_number = set.set_number,
                    "No lie for truth set, skipping"
                );
                continue;
            };

            let mut statements = vec![
                Statement::truth(&set.truth1, player.id),
                Statement::truth(&set.truth2, player.id),
                Statement::lie(lie, player.id),
            ];
            statements.shuffle(rng);

            rounds.push(Round {
                chameleon_id: player.id,
                set_number: set.set_number,
                statements,
                votes: Votes::new(),
                started_at: None,
                results: None,
            });
            built_since_refill += 1;
        }
    }

    tracing::info!(requested = total_rounds, built = rounds.len(), "Rounds assigned");
    rounds
}
