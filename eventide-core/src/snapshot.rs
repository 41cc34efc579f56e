//! Snapshot support for faster aggregate loading.
//!
//! A snapshot is a cached copy of an aggregate's state at some version. It is
//! never authoritative: dropping every snapshot only makes loads slower.
//!
//! - [`Snapshot`] - state plus the version it was taken at
//! - [`SnapshotStore`] - persistence for the latest snapshot per stream
//! - [`Policy`] - decides after each save whether a new snapshot is due
//! - [`NoSnapshots`] - the repository default: load from scratch, never record
//! - [`Snapshots`] - a store and policy pair, installed with
//!   [`Repository::with_snapshots`](crate::repository::Repository::with_snapshots)

use std::{convert::Infallible, future::Future};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    aggregate::{Aggregate, Root},
    store::StreamId,
    version::Version,
};

pub mod inmemory;
pub mod policy;

pub use policy::Policy;

/// Point-in-time aggregate state.
///
/// Loading resumes the stream at `version + 1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub version: Version,
    pub state: T,
}

/// Persistence for the latest snapshot of each stream.
///
/// Implementations keep at most one snapshot per stream; recording replaces
/// whatever was there. A snapshot store never talks to the event store.
pub trait SnapshotStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Latest snapshot for a stream, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the stored state does not
    /// deserialize into `T`.
    fn load<T>(
        &self,
        stream_id: &StreamId,
    ) -> impl Future<Output = Result<Option<Snapshot<T>>, Self::Error>> + Send
    where
        T: DeserializeOwned + Send;

    /// Store a snapshot, replacing the previous one for the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized or stored.
    fn record<T>(
        &self,
        stream_id: &StreamId,
        snapshot: Snapshot<&T>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send
    where
        T: Serialize + Sync;
}

/// How a repository restores and captures snapshots for aggregate `A`.
///
/// Implemented by [`NoSnapshots`] and [`Snapshots`]; the repository is
/// generic over it so aggregates without serde support still work with the
/// default.
pub trait SnapshotStrategy<A: Aggregate>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Starting point for rehydration: a root restored from the latest
    /// snapshot, or an unborn root.
    fn restore(&self, stream_id: &StreamId, id: A::Id) -> impl Future<Output = Root<A>> + Send;

    /// Offer a freshly saved root for snapshotting.
    ///
    /// Returns whether a snapshot was recorded.
    ///
    /// # Errors
    ///
    /// Returns the snapshot store's error if recording fails.
    fn capture(
        &self,
        stream_id: &StreamId,
        root: &Root<A>,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}

/// Snapshotting disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSnapshots;

impl<A: Aggregate> SnapshotStrategy<A> for NoSnapshots {
    type Error = Infallible;

    async fn restore(&self, _stream_id: &StreamId, id: A::Id) -> Root<A> {
        Root::new(id)
    }

    async fn capture(&self, _stream_id: &StreamId, _root: &Root<A>) -> Result<bool, Infallible> {
        Ok(false)
    }
}

/// A snapshot store paired with the policy deciding when to write to it.
#[derive(Clone, Debug)]
pub struct Snapshots<SS, P> {
    store: SS,
    policy: P,
}

impl<SS, P> Snapshots<SS, P> {
    #[must_use]
    pub const fn new(store: SS, policy: P) -> Self {
        Self { store, policy }
    }

    #[must_use]
    pub const fn store(&self) -> &SS {
        &self.store
    }

    #[must_use]
    pub const fn policy(&self) -> &P {
        &self.policy
    }
}

impl<A, SS, P> SnapshotStrategy<A> for Snapshots<SS, P>
where
    A: Aggregate + Serialize + DeserializeOwned,
    SS: SnapshotStore,
    P: Policy,
{
    type Error = SS::Error;

    async fn restore(&self, stream_id: &StreamId, id: A::Id) -> Root<A> {
        match self.store.load::<A>(stream_id).await {
            Ok(Some(snapshot)) => {
                tracing::debug!(%stream_id, version = snapshot.version, "restored from snapshot");
                Root::from_snapshot(id, snapshot.version, snapshot.state)
            }
            Ok(None) => Root::new(id),
            Err(error) => {
                tracing::warn!(%stream_id, %error, "snapshot load failed, replaying full stream");
                Root::new(id)
            }
        }
    }

    async fn capture(&self, stream_id: &StreamId, root: &Root<A>) -> Result<bool, SS::Error> {
        let version = root.version();
        if !self.policy.should_record(version) {
            return Ok(false);
        }
        self.store
            .record(
                stream_id,
                Snapshot {
                    version,
                    state: root.state(),
                },
            )
            .await?;
        self.policy.record(version);
        tracing::debug!(%stream_id, version, "snapshot recorded");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Message;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Bumped;

    impl Message for Bumped {
        fn name(&self) -> &'static str {
            "bumped"
        }
    }

    #[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Gauge {
        level: u32,
    }

    impl Aggregate for Gauge {
        const KIND: &'static str = "gauge";
        type Error = Infallible;
        type Event = Bumped;
        type Id = String;

        fn apply(&mut self, _event: &Bumped) -> Result<(), Infallible> {
            self.level += 1;
            Ok(())
        }
    }

    fn root_at(version: u32) -> Root<Gauge> {
        let mut root = Root::new("g-1".to_string());
        root.record_that((0..version).map(|_| Bumped)).unwrap();
        root.flush();
        root
    }

    #[tokio::test]
    async fn no_snapshots_restores_unborn_and_never_captures() {
        let id = StreamId::new("gauge", "g-1");
        let root: Root<Gauge> = NoSnapshots.restore(&id, "g-1".to_string()).await;
        assert_eq!(root.version(), 0);
        assert!(!NoSnapshots.capture(&id, &root_at(3)).await.unwrap());
    }

    #[tokio::test]
    async fn capture_consults_policy_and_restore_resumes() {
        let snapshots = Snapshots::new(inmemory::Store::new(), policy::EveryN::new(2));
        let id = StreamId::new("gauge", "g-1");

        assert!(!snapshots.capture(&id, &root_at(1)).await.unwrap());
        assert!(snapshots.capture(&id, &root_at(2)).await.unwrap());

        let restored: Root<Gauge> = snapshots.restore(&id, "g-1".to_string()).await;
        assert_eq!(restored.version(), 2);
        assert_eq!(restored.state().level, 2);
        assert!(restored.uncommitted().is_empty());
    }

    #[tokio::test]
    async fn unreadable_snapshot_falls_back_to_unborn_root() {
        let store = inmemory::Store::new();
        let id = StreamId::new("gauge", "g-1");
        store
            .record(
                &id,
                Snapshot {
                    version: 4,
                    state: &"not a gauge",
                },
            )
            .await
            .unwrap();

        let snapshots = Snapshots::new(store, policy::Always);
        let root: Root<Gauge> = snapshots.restore(&id, "g-1".to_string()).await;
        assert_eq!(root.version(), 0);
    }
}
