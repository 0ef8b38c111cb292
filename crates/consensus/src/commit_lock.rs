//! Lock serializing block commits with proposal processing
use std::future::Future;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reader/writer lock between proposal processing and block commit
///
/// Any number of proposals can be processed at the same time, holding the
/// lock in shared mode, while committing a block takes it exclusively.
#[derive(Debug, Default)]
pub struct CommitLock(RwLock<()>);

impl CommitLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` holding the lock in shared mode
    pub async fn run_non_exclusive<F>(&self, f: F) -> F::Output
    where
        F: Future,
    {
        let _guard = self.0.read().await;
        f.await
    }

    /// Run `f` holding the lock exclusively
    pub async fn run_exclusive<F>(&self, f: F) -> F::Output
    where
        F: Future,
    {
        let _guard = self.0.write().await;
        f.await
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write().await
    }
}
