//! Consensus storage data model
//!
//! Messages are keyed by `"{round}-{validator consensus pubkey hex}"`, so
//! there's at most one message of each kind per validator per round: a
//! second write for the same validator and round overwrites the first one.
//!
//! Values are the canonical wire encoding of the message, decoded back with
//! a [`MessageFactory`](tbft_consensus_core::factory::MessageFactory).
//!
//! All the tables only ever hold data for the current, uncommitted height
//! and are cleared once it's committed.
use std::sync::Arc;

use tbft_consensus_core::state::ConsensusStateData;
use tbft_db::def_table;

/// The only key used in [`cons_state`]
pub const CONSENSUS_STATE_KEY: &str = "consensus-state";

def_table! {
    /// Proposals received (or made) at the current height
    cons_proposals: String => Arc<[u8]>
}

def_table! {
    /// Prevotes received (or made) at the current height
    cons_prevotes: String => Arc<[u8]>
}

def_table! {
    /// Precommits received (or made) at the current height
    cons_precommits: String => Arc<[u8]>
}

def_table! {
    /// Consensus cursor, a single row under [`CONSENSUS_STATE_KEY`]
    ///
    /// Always overwritten, there's no history.
    cons_state: String => ConsensusStateData
}
