// SPDX-License-Identifier: MIT

//! Thin async wrapper around an embedded [`redb`](redb_bincode::redb)
//! database
//!
//! Every write goes through a single transaction that is committed with
//! redb's default (immediate) durability, so once [`Database::write_with`]
//! returns `Ok` the data is on disk.
pub mod error;

use std::path::PathBuf;

use error::{BeginTransactionSnafu, CommitSnafu, DbResult, InvalidPathSnafu, JoinSnafu, OpenSnafu};
pub use redb_bincode;
use redb_bincode::{ReadTransaction, WriteTransaction, redb};
use snafu::{OptionExt as _, ResultExt as _};
use tbft_util_error::fmt::FmtCompact as _;
use tracing::{debug, instrument, warn};

const LOG_TARGET: &str = "tbft::db";

/// Define a typed table
///
/// Creates a module `$name` with `Key`, `Value` and `TABLE` definitions,
/// the table name in the database being `$name` itself.
#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = $crate::redb_bincode::TableDefinition<'a, Key, Value>;
            pub type Table<'a> = $crate::redb_bincode::Table<'a, Key, Value>;
            pub const NAME: &str = stringify!($name);
            pub const TABLE: Definition = $crate::redb_bincode::TableDefinition::new(NAME);
        }
    };
}

#[derive(Debug)]
pub struct Database {
    inner: redb_bincode::Database,
    ephemeral: bool,
}

impl Database {
    pub async fn new_in_memory() -> DbResult<Database> {
        debug!(target: LOG_TARGET, "Opening in-memory database");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(OpenSnafu)?;
        Ok(Self::open_inner(inner, true))
    }

    pub async fn open(path: impl Into<PathBuf>) -> DbResult<Database> {
        let path = path.into();
        tokio::fs::create_dir_all(path.parent().context(InvalidPathSnafu)?).await?;
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database…");

        let inner = tokio::task::spawn_blocking(move || {
            let mut db = redb::Database::create(path)?;
            let _ = db.compact().inspect_err(|err| {
                warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Failed to compact database");
            });
            Ok(db)
        })
        .await
        .context(JoinSnafu)?
        .context(OpenSnafu)?;

        Ok(Self::open_inner(inner, false))
    }

    #[instrument(skip_all)]
    fn open_inner(inner: redb::Database, ephemeral: bool) -> Database {
        Self {
            inner: redb_bincode::Database::from(inner),
            ephemeral,
        }
    }

    /// Run `f` inside a write transaction and commit it
    ///
    /// Nothing is written if `f` returns an error.
    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_write().context(BeginTransactionSnafu)?;
            let res = f(&dbtx)?;

            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_read().context(BeginTransactionSnafu)?;

            f(&dbtx)
        })
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }
}
