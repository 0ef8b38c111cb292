// SPDX-License-Identifier: MIT

//! Consensus message pipeline of a Tendermint-style BFT consensus
//!
//! Inbound proposals, prevotes and precommits go through their
//! [`processor`], which validates them, accumulates them in the
//! [`round_state::RoundState`] of their height and round, persists them in
//! [`ConsensusStorage`](tbft_consensus_storage::ConsensusStorage) and lets
//! the [`service::ConsensusService`] react.
//!
//! The round progression itself (steps, timeouts) is left to the
//! [`service::ConsensusService`] implementation.
pub mod bootstrap;
pub mod commit_lock;
pub mod config;
pub mod processor;
pub mod proposer;
pub mod round_state;
pub mod service;

#[cfg(test)]
mod fixture;
