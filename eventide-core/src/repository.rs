//! Application service orchestration.
//!
//! [`Repository`] bridges aggregates and the event store: [`Repository::get`]
//! rehydrates a [`Root`] by streaming its history, [`Repository::save`]
//! appends the root's uncommitted events under an optimistic concurrency
//! check, and [`Repository::execute`] runs a whole load, handle, save cycle.
//!
//! Snapshot support is opt-in via [`Repository::with_snapshots`]. The default
//! repository does no snapshot work and places no serde bounds on aggregate
//! state.

use std::convert::Infallible;

use nonempty::NonEmpty;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::{Aggregate, Handle, Root},
    snapshot::{NoSnapshots, Policy, SnapshotStore, SnapshotStrategy, Snapshots},
    store::{
        AppendError, Appender, EventStore, Persisted, StreamError, StreamId, Streamer,
        VersionSelect,
    },
    version::{ConflictError, ExpectedVersion, Version},
};

/// Default capacity of the channel between the stream reader and the
/// aggregate being rebuilt.
pub const DEFAULT_BUFFER: usize = 64;

/// Conversion between an aggregate's event type and the store's message type.
///
/// Blanket-implemented for every event that converts into the store message
/// and can be recovered from it with `TryFrom`, including the identity case
/// where the store holds the aggregate's own event enum.
pub trait FromStore<M>: Sized {
    type Error: std::error::Error + Send + Sync + 'static;

    /// # Errors
    ///
    /// Returns an error if `message` belongs to a different event type.
    fn from_stored(message: M) -> Result<Self, Self::Error>;

    fn into_stored(self) -> M;
}

impl<E, M> FromStore<M> for E
where
    E: TryFrom<M> + Into<M>,
    <E as TryFrom<M>>::Error: std::error::Error + Send + Sync + 'static,
{
    type Error = <E as TryFrom<M>>::Error;

    fn from_stored(message: M) -> Result<Self, Self::Error> {
        Self::try_from(message)
    }

    fn into_stored(self) -> M {
        self.into()
    }
}

/// Error returned by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError<StoreError, AggregateError, SnapshotError = Infallible>
where
    StoreError: std::error::Error + 'static,
    AggregateError: std::error::Error + 'static,
    SnapshotError: std::error::Error + 'static,
{
    /// The stream has no events (and no snapshot).
    #[error("stream {stream_id} not found")]
    NotFound { stream_id: StreamId },
    /// Another writer appended to the stream first.
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error("store error on stream {stream_id}: {source}")]
    Store {
        stream_id: StreamId,
        #[source]
        source: StoreError,
    },
    /// A stored event could not be applied during rehydration.
    #[error("failed to apply event {version} of stream {stream_id}: {source}")]
    Apply {
        stream_id: StreamId,
        version: Version,
        #[source]
        source: AggregateError,
    },
    /// A stored message was not an event of the aggregate being loaded.
    #[error("event {version} of stream {stream_id} has an unexpected type: {source}")]
    Convert {
        stream_id: StreamId,
        version: Version,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    /// The aggregate rejected the command.
    #[error("aggregate rejected command: {0}")]
    Rejected(AggregateError),
    /// Events were committed but the snapshot could not be written.
    #[error("snapshot write failed for stream {stream_id}: {source}")]
    Snapshot {
        stream_id: StreamId,
        #[source]
        source: SnapshotError,
    },
    #[error("operation cancelled")]
    Cancelled,
}

impl<StoreError, AggregateError, SnapshotError>
    RepositoryError<StoreError, AggregateError, SnapshotError>
where
    StoreError: std::error::Error + 'static,
    AggregateError: std::error::Error + 'static,
    SnapshotError: std::error::Error + 'static,
{
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Error of repository operations on aggregate `A`, for store `S` and
/// snapshot strategy `M`.
pub type ErrorFor<S, A, M> = RepositoryError<
    <S as EventStore>::Error,
    <A as Aggregate>::Error,
    <M as SnapshotStrategy<A>>::Error,
>;

/// Loads and saves aggregate roots.
#[derive(Clone, Debug)]
pub struct Repository<S, M = NoSnapshots> {
    store: S,
    snapshots: M,
    buffer: usize,
}

impl<S> Repository<S> {
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store,
            snapshots: NoSnapshots,
            buffer: DEFAULT_BUFFER,
        }
    }
}

impl<S, M> Repository<S, M> {
    /// Capacity of the channel used while rehydrating. Clamped to at least 1.
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Load from the latest snapshot and record new ones when `policy` says so.
    #[must_use]
    pub fn with_snapshots<SS, P>(self, store: SS, policy: P) -> Repository<S, Snapshots<SS, P>>
    where
        SS: SnapshotStore,
        P: Policy,
    {
        Repository {
            store: self.store,
            snapshots: Snapshots::new(store, policy),
            buffer: self.buffer,
        }
    }

    #[must_use]
    pub const fn event_store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn snapshots(&self) -> &M {
        &self.snapshots
    }
}

impl<S, M> Repository<S, M>
where
    S: EventStore,
{
    /// Rehydrate an aggregate from its stream.
    ///
    /// Starts from the latest snapshot when snapshots are enabled, then applies
    /// every later event in version order. The store streams into a bounded
    /// channel while the root consumes from it; whichever side fails first
    /// cancels the other.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NotFound`] if the stream has no events
    /// - [`RepositoryError::Apply`] / [`RepositoryError::Convert`] if a stored
    ///   event cannot be applied; reported in preference to the resulting
    ///   stream cancellation
    /// - [`RepositoryError::Store`] if reading fails
    /// - [`RepositoryError::Cancelled`] if `cancel` fires
    #[tracing::instrument(skip(self, id, cancel), fields(kind = A::KIND, id = %id))]
    pub async fn get<A>(
        &self,
        id: &A::Id,
        cancel: &CancellationToken,
    ) -> Result<Root<A>, ErrorFor<S, A, M>>
    where
        S: Streamer,
        A: Aggregate,
        A::Event: FromStore<S::Message>,
        M: SnapshotStrategy<A>,
    {
        let stream_id = StreamId::new(A::KIND, id.to_string());
        let mut root = self.snapshots.restore(&stream_id, id.clone()).await;
        let select = VersionSelect::From(root.version() + 1);

        let cancel = cancel.child_token();
        let (tx, mut rx) = mpsc::channel::<Persisted<S::Message>>(self.buffer);

        let producer = async {
            let result = self.store.stream(&stream_id, select, tx, &cancel).await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        };

        let consumer = async {
            while let Some(event) = rx.recv().await {
                let Persisted {
                    version, envelope, ..
                } = event;
                let message = match A::Event::from_stored(envelope.message) {
                    Ok(message) => message,
                    Err(source) => {
                        cancel.cancel();
                        return Err(RepositoryError::Convert {
                            stream_id: stream_id.clone(),
                            version,
                            source: Box::new(source),
                        });
                    }
                };
                if let Err(source) = root.replay(version, &message) {
                    cancel.cancel();
                    return Err(RepositoryError::Apply {
                        stream_id: stream_id.clone(),
                        version,
                        source,
                    });
                }
            }
            Ok::<(), ErrorFor<S, A, M>>(())
        };

        let (produced, consumed) = tokio::join!(producer, consumer);
        consumed?;
        match produced {
            Ok(()) => {}
            Err(StreamError::Cancelled) => return Err(RepositoryError::Cancelled),
            Err(StreamError::Store(source)) => {
                return Err(RepositoryError::Store { stream_id, source });
            }
        }

        if root.version() == 0 {
            return Err(RepositoryError::NotFound { stream_id });
        }
        tracing::debug!(version = root.version(), "aggregate rehydrated");
        Ok(root)
    }

    /// Append the root's uncommitted events.
    ///
    /// The batch is written with `ExpectedVersion::Exact(version - n)`, the
    /// version the root had before recording. An empty root is a no-op that
    /// never touches the store. Conflicts are returned as they are: reload
    /// and retry, or use [`Repository::execute_with_retry`].
    ///
    /// The uncommitted events are flushed before the append, so a failed save
    /// leaves the root unusable for a second attempt.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Conflict`] if the stream moved since loading
    /// - [`RepositoryError::Store`] if the append fails
    /// - [`RepositoryError::Snapshot`] if the events were committed but the
    ///   due snapshot could not be recorded
    #[tracing::instrument(skip(self, root), fields(kind = A::KIND, id = %root.id()))]
    pub async fn save<A>(&self, root: &mut Root<A>) -> Result<(), ErrorFor<S, A, M>>
    where
        S: Appender,
        A: Aggregate,
        A::Event: FromStore<S::Message>,
        M: SnapshotStrategy<A>,
    {
        let Some(events) = NonEmpty::from_vec(root.flush()) else {
            tracing::trace!("nothing to save");
            return Ok(());
        };

        let stream_id = root.stream_id();
        let expected = root.version() - events.len() as Version;
        let events =
            events.map(|envelope| envelope.map(<A::Event as FromStore<S::Message>>::into_stored));

        let version = match self
            .store
            .append(&stream_id, ExpectedVersion::Exact(expected), events)
            .await
        {
            Ok(version) => version,
            Err(AppendError::Conflict(conflict)) => return Err(RepositoryError::Conflict(conflict)),
            Err(AppendError::Store(source)) => {
                return Err(RepositoryError::Store { stream_id, source });
            }
        };
        tracing::debug!(expected, version, "aggregate saved");

        match self.snapshots.capture(&stream_id, root).await {
            Ok(_) => Ok(()),
            Err(source) => Err(RepositoryError::Snapshot { stream_id, source }),
        }
    }

    /// Load (or start) an aggregate, handle a command and save the result.
    ///
    /// A stream with no events yields an unborn root, so creation commands go
    /// through the same path; the aggregate decides whether a command is valid
    /// for an unborn instance.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Rejected`] when the aggregate refuses the
    /// command, plus every error of [`Repository::get`] (other than
    /// `NotFound`) and [`Repository::save`].
    pub async fn execute<A, C>(
        &self,
        id: &A::Id,
        command: &C,
        cancel: &CancellationToken,
    ) -> Result<Root<A>, ErrorFor<S, A, M>>
    where
        S: Appender + Streamer,
        A: Handle<C>,
        A::Event: FromStore<S::Message>,
        M: SnapshotStrategy<A>,
        C: Sync,
    {
        let mut root = match self.get::<A>(id, cancel).await {
            Ok(root) => root,
            Err(RepositoryError::NotFound { .. }) => Root::new(id.clone()),
            Err(err) => return Err(err),
        };
        if let Err(rejection) = root.handle(command) {
            return Err(RepositoryError::Rejected(rejection));
        }
        self.save(&mut root).await?;
        Ok(root)
    }

    /// [`Repository::execute`], reloading and retrying on version conflicts.
    ///
    /// Makes at most `max_attempts` attempts (at least one). Only
    /// [`RepositoryError::Conflict`] is retried.
    ///
    /// # Errors
    ///
    /// Returns the last conflict once attempts run out, or any other error
    /// immediately.
    pub async fn execute_with_retry<A, C>(
        &self,
        id: &A::Id,
        command: &C,
        max_attempts: usize,
        cancel: &CancellationToken,
    ) -> Result<Root<A>, ErrorFor<S, A, M>>
    where
        S: Appender + Streamer,
        A: Handle<C>,
        A::Event: FromStore<S::Message>,
        M: SnapshotStrategy<A>,
        C: Sync,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.execute::<A, C>(id, command, cancel).await {
                Err(RepositoryError::Conflict(conflict)) if attempt < max_attempts => {
                    tracing::debug!(attempt, %conflict, "conflict, retrying command");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
