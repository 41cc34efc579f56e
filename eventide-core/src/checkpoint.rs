//! Durable subscription progress.
//!
//! A checkpoint is the sequence number of the last event a named subscriber
//! has fully handled. Subscriptions resume strictly after it, so 0 (the value
//! for unknown names) means "start from the beginning".

use std::{
    collections::HashMap,
    convert::Infallible,
    future::Future,
    sync::{Arc, RwLock},
};

use crate::version::SequenceNumber;

/// Store of per-subscriber checkpoints.
pub trait Checkpointer: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Last stored checkpoint for `name`, or 0 when none was ever written.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn read(&self, name: &str) -> impl Future<Output = Result<SequenceNumber, Self::Error>> + Send;

    /// Store a checkpoint for `name`. The last write wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn write(
        &self,
        name: &str,
        sequence_number: SequenceNumber,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Checkpointer that forgets everything: every read is 0.
///
/// Subscriptions using it replay the whole store on each start.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCheckpoint;

impl Checkpointer for NoCheckpoint {
    type Error = Infallible;

    async fn read(&self, _name: &str) -> Result<SequenceNumber, Infallible> {
        Ok(0)
    }

    async fn write(&self, _name: &str, _sequence_number: SequenceNumber) -> Result<(), Infallible> {
        Ok(())
    }
}

/// In-memory checkpointer. Clones share the same table.
#[derive(Clone, Debug, Default)]
pub struct InMemory {
    checkpoints: Arc<RwLock<HashMap<String, SequenceNumber>>>,
}

impl InMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read, handy for assertions and diagnostics.
    #[must_use]
    pub fn get(&self, name: &str) -> SequenceNumber {
        self.checkpoints
            .read()
            .expect("checkpoint lock poisoned")
            .get(name)
            .copied()
            .unwrap_or_default()
    }
}

impl Checkpointer for InMemory {
    type Error = Infallible;

    async fn read(&self, name: &str) -> Result<SequenceNumber, Infallible> {
        Ok(self.get(name))
    }

    #[tracing::instrument(skip(self))]
    async fn write(&self, name: &str, sequence_number: SequenceNumber) -> Result<(), Infallible> {
        self.checkpoints
            .write()
            .expect("checkpoint lock poisoned")
            .insert(name.to_string(), sequence_number);
        tracing::trace!("checkpoint stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_names_read_zero() {
        assert_eq!(InMemory::new().read("projector").await.unwrap(), 0);
        assert_eq!(NoCheckpoint.read("projector").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn last_write_wins_per_name() {
        let checkpoints = InMemory::new();
        checkpoints.write("a", 7).await.unwrap();
        checkpoints.write("a", 3).await.unwrap();
        checkpoints.write("b", 9).await.unwrap();

        assert_eq!(checkpoints.read("a").await.unwrap(), 3);
        assert_eq!(checkpoints.clone().read("b").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn no_checkpoint_discards_writes() {
        NoCheckpoint.write("a", 7).await.unwrap();
        assert_eq!(NoCheckpoint.read("a").await.unwrap(), 0);
    }
}
