// SPDX-License-Identifier: MIT

//! Durable storage of in-flight consensus data
//!
//! Persists proposals, prevotes, precommits and the consensus cursor
//! ([`ConsensusStateData`]) of the current height, so a restarted node can
//! rebuild its round states and resume where it stopped.
//!
//! See [`tables`] for the data model.
pub mod tables;

use std::sync::Arc;

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tbft_consensus_core::factory::MessageFactory;
use tbft_consensus_core::height::Round;
use tbft_consensus_core::msg::{
    ConsensusMessage, MessageDecodeError, MessageDecodeResult, Precommit, Prevote, Proposal,
};
use tbft_consensus_core::state::ConsensusStateData;
use tbft_consensus_core::validator::{ConsensusPublicKey, ValidatorIdx, ValidatorSet};
use tbft_db::Database;
use tbft_db::error::{DbError, DbResult};
use tbft_db::redb_bincode::{ReadTransaction, ReadableTable as _, WriteTransaction};
use tracing::{debug, instrument};

use crate::tables::{
    CONSENSUS_STATE_KEY, cons_precommits, cons_prevotes, cons_proposals, cons_state,
};

const LOG_TARGET: &str = "tbft::consensus::storage";

#[derive(Debug, Snafu)]
pub enum ConsensusStorageError {
    #[snafu(transparent)]
    Db { source: DbError },
    #[snafu(display("Unknown validator {validator_index}"))]
    UnknownValidator { validator_index: ValidatorIdx },
    #[snafu(display("Corrupted record {key} in {table}"))]
    CorruptedRecord {
        table: &'static str,
        key: String,
        source: MessageDecodeError,
    },
}

pub type ConsensusStorageResult<T> = Result<T, ConsensusStorageError>;

/// Key of a message record
pub fn message_key(round: Round, public_key: &ConsensusPublicKey) -> String {
    format!("{round}-{}", public_key.to_hex())
}

pub struct ConsensusStorage {
    db: Arc<Database>,
    validator_set: Arc<dyn ValidatorSet>,
    message_factory: Arc<dyn MessageFactory>,
}

impl ConsensusStorage {
    /// Open consensus storage in `db`, creating the tables if needed
    pub async fn open(
        db: Arc<Database>,
        validator_set: Arc<dyn ValidatorSet>,
        message_factory: Arc<dyn MessageFactory>,
    ) -> ConsensusStorageResult<Self> {
        db.write_with(Self::init_tables_tx).await?;

        Ok(Self {
            db,
            validator_set,
            message_factory,
        })
    }

    fn init_tables_tx(dbtx: &WriteTransaction) -> DbResult<()> {
        dbtx.open_table(&cons_proposals::TABLE)?;
        dbtx.open_table(&cons_prevotes::TABLE)?;
        dbtx.open_table(&cons_precommits::TABLE)?;
        dbtx.open_table(&cons_state::TABLE)?;
        Ok(())
    }

    /// Get the consensus cursor, `None` on a fresh node
    pub async fn get_state(&self) -> ConsensusStorageResult<Option<ConsensusStateData>> {
        Ok(self
            .db
            .read_with(|dbtx| {
                let tbl = dbtx.open_table(&cons_state::TABLE)?;
                Ok(tbl.get(&CONSENSUS_STATE_KEY.to_string())?.map(|g| g.value()))
            })
            .await?)
    }

    /// Overwrite the consensus cursor
    ///
    /// Only the state of the current, uncommitted height matters, so any
    /// previous one is just replaced.
    #[instrument(skip_all, fields(height = %state.height, round = %state.round, step = %state.step))]
    pub async fn save_state(&self, state: &ConsensusStateData) -> ConsensusStorageResult<()> {
        self.db
            .write_with(|dbtx| {
                let mut tbl = dbtx.open_table(&cons_state::TABLE)?;
                tbl.insert(&CONSENSUS_STATE_KEY.to_string(), state)?;
                Ok(())
            })
            .await?;
        debug!(target: LOG_TARGET, "Saved consensus state");
        Ok(())
    }

    pub async fn save_proposals(&self, proposals: &[Proposal]) -> ConsensusStorageResult<()> {
        self.save_messages(&cons_proposals::TABLE, cons_proposals::NAME, proposals)
            .await
    }

    pub async fn save_prevotes(&self, prevotes: &[Prevote]) -> ConsensusStorageResult<()> {
        self.save_messages(&cons_prevotes::TABLE, cons_prevotes::NAME, prevotes)
            .await
    }

    pub async fn save_precommits(&self, precommits: &[Precommit]) -> ConsensusStorageResult<()> {
        self.save_messages(&cons_precommits::TABLE, cons_precommits::NAME, precommits)
            .await
    }

    pub async fn save_proposal(&self, proposal: &Proposal) -> ConsensusStorageResult<()> {
        self.save_proposals(std::slice::from_ref(proposal)).await
    }

    pub async fn save_prevote(&self, prevote: &Prevote) -> ConsensusStorageResult<()> {
        self.save_prevotes(std::slice::from_ref(prevote)).await
    }

    pub async fn save_precommit(&self, precommit: &Precommit) -> ConsensusStorageResult<()> {
        self.save_precommits(std::slice::from_ref(precommit)).await
    }

    pub async fn get_proposals(&self) -> ConsensusStorageResult<Vec<Proposal>> {
        self.get_messages(&cons_proposals::TABLE, cons_proposals::NAME, |bytes| {
            self.message_factory.make_proposal_from_bytes(bytes)
        })
        .await
    }

    pub async fn get_prevotes(&self) -> ConsensusStorageResult<Vec<Prevote>> {
        self.get_messages(&cons_prevotes::TABLE, cons_prevotes::NAME, |bytes| {
            self.message_factory.make_prevote_from_bytes(bytes)
        })
        .await
    }

    pub async fn get_precommits(&self) -> ConsensusStorageResult<Vec<Precommit>> {
        self.get_messages(&cons_precommits::TABLE, cons_precommits::NAME, |bytes| {
            self.message_factory.make_precommit_from_bytes(bytes)
        })
        .await
    }

    /// Remove everything, called once the current height is committed
    pub async fn clear(&self) -> ConsensusStorageResult<()> {
        self.db
            .write_with(|dbtx| {
                dbtx.open_table(&cons_proposals::TABLE)?
                    .retain(|_, _| false)?;
                dbtx.open_table(&cons_prevotes::TABLE)?
                    .retain(|_, _| false)?;
                dbtx.open_table(&cons_precommits::TABLE)?
                    .retain(|_, _| false)?;
                dbtx.open_table(&cons_state::TABLE)?.retain(|_, _| false)?;
                Ok(())
            })
            .await?;
        debug!(target: LOG_TARGET, "Cleared consensus storage");
        Ok(())
    }

    /// Write all `messages` in a single transaction
    ///
    /// Keys are resolved upfront, so an unknown validator fails the whole
    /// batch before anything is written.
    async fn save_messages<M>(
        &self,
        table: &cons_proposals::Definition<'static>,
        table_name: &'static str,
        messages: &[M],
    ) -> ConsensusStorageResult<()>
    where
        M: ConsensusMessage,
    {
        let records = messages
            .iter()
            .map(|msg| {
                let validator_index = msg.validator_index();
                let validator = self
                    .validator_set
                    .get_validator(validator_index)
                    .context(UnknownValidatorSnafu { validator_index })?;
                Ok((
                    message_key(msg.round(), &validator.consensus_public_key()),
                    msg.serialized().clone(),
                ))
            })
            .collect::<ConsensusStorageResult<Vec<_>>>()?;

        self.db
            .write_with(|dbtx| {
                let mut tbl = dbtx.open_table(table)?;
                for (key, value) in &records {
                    tbl.insert(key, value)?;
                }
                Ok(())
            })
            .await?;

        debug!(target: LOG_TARGET, table = %table_name, len = records.len(), "Saved messages");
        Ok(())
    }

    async fn get_messages<M>(
        &self,
        table: &cons_proposals::Definition<'static>,
        table_name: &'static str,
        decode: impl Fn(&[u8]) -> MessageDecodeResult<M>,
    ) -> ConsensusStorageResult<Vec<M>> {
        let records = self
            .db
            .read_with(|dbtx| Self::get_records_tx(dbtx, table))
            .await?;

        records
            .into_iter()
            .map(|(key, value)| {
                decode(&value).context(CorruptedRecordSnafu {
                    table: table_name,
                    key,
                })
            })
            .collect()
    }

    fn get_records_tx(
        dbtx: &ReadTransaction,
        table: &cons_proposals::Definition<'static>,
    ) -> DbResult<Vec<(String, Arc<[u8]>)>> {
        let tbl = dbtx.open_table(table)?;
        tbl.range::<String>(..)?
            .map(|kv| {
                let (k, v) = kv?;
                Ok((k.value(), v.value()))
            })
            .collect()
    }
}
