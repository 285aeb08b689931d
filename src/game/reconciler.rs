//! Input reconciliation: per-player sequence tracking and intent replacement

use super::{InputIntent, PlayerId, World};

/// What happened to a submitted input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    /// Intent replaced and sequence advanced
    Applied,
    /// No live player with that id
    UnknownPlayer,
    /// Sequence not newer than the last applied one
    Stale { last_applied: u64 },
}

pub struct InputReconciler;

impl InputReconciler {
    /// Apply an input if it is strictly newer than anything already applied
    /// for that player. Sequences may skip values; they only have to increase.
    pub fn apply(world: &mut World, player_id: PlayerId, seq: u64, intent: InputIntent) -> InputOutcome {
        let Some(player) = world.players.get_mut(&player_id) else {
            return InputOutcome::UnknownPlayer;
        };

        if seq <= player.last_input_seq {
            return InputOutcome::Stale {
                last_applied: player.last_input_seq,
            };
        }

        player.last_input_seq = seq;
        player.intent = intent;
        InputOutcome::Applied
    }
}
