//! In-memory snapshot store.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde::{Serialize, de::DeserializeOwned};

use super::{Snapshot, SnapshotStore};
use crate::{store::StreamId, version::Version};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),
}

type SnapshotMap = HashMap<StreamId, Snapshot<serde_json::Value>>;

/// Latest snapshot per stream, kept as JSON values.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct Store {
    snapshots: Arc<RwLock<SnapshotMap>>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams with a stored snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots
            .read()
            .expect("snapshot store lock poisoned")
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version of the stored snapshot for a stream, if any.
    #[must_use]
    pub fn version_of(&self, stream_id: &StreamId) -> Option<Version> {
        self.snapshots
            .read()
            .expect("snapshot store lock poisoned")
            .get(stream_id)
            .map(|snapshot| snapshot.version)
    }
}

impl SnapshotStore for Store {
    type Error = Error;

    #[tracing::instrument(skip(self, stream_id), fields(stream_id = %stream_id))]
    async fn load<T>(&self, stream_id: &StreamId) -> Result<Option<Snapshot<T>>, Error>
    where
        T: DeserializeOwned + Send,
    {
        let stored = {
            let snapshots = self.snapshots.read().expect("snapshot store lock poisoned");
            snapshots.get(stream_id).cloned()
        };
        let snapshot = stored
            .map(|snapshot| {
                serde_json::from_value(snapshot.state).map(|state| Snapshot {
                    version: snapshot.version,
                    state,
                })
            })
            .transpose()
            .map_err(Error::Deserialization)?;
        tracing::trace!(found = snapshot.is_some(), "snapshot lookup");
        Ok(snapshot)
    }

    #[tracing::instrument(
        skip(self, stream_id, snapshot),
        fields(stream_id = %stream_id, version = snapshot.version)
    )]
    async fn record<T>(&self, stream_id: &StreamId, snapshot: Snapshot<&T>) -> Result<(), Error>
    where
        T: Serialize + Sync,
    {
        let state = serde_json::to_value(snapshot.state).map_err(Error::Serialization)?;
        self.snapshots
            .write()
            .expect("snapshot store lock poisoned")
            .insert(
                stream_id.clone(),
                Snapshot {
                    version: snapshot.version,
                    state,
                },
            );
        tracing::trace!("snapshot stored");
        Ok(())
    }
}
