//! Persistence layer abstractions.
//!
//! The storage contract is split by capability so callers only ask for what
//! they use:
//!
//! - [`Appender`] writes batches under an [`ExpectedVersion`] check;
//! - [`Streamer`] replays one stream in version order;
//! - [`SequenceStreamer`] replays the whole store (or one stream kind) in
//!   global sequence order, which is what catch-up subscriptions pull from.
//!
//! All three share the associated types declared on [`EventStore`]. Readers
//! deliver into a bounded [`EventSink`] and observe a [`CancellationToken`] at
//! every send, so a slow consumer applies backpressure and a cancelled one
//! stops the producer promptly.

use std::{fmt, future::Future};

pub use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    event::{Envelope, Message, Metadata},
    version::{ConflictError, ExpectedVersion, SequenceNumber, Version},
};

pub mod inmemory;

/// Address of one ordered log partition: a stream kind plus an instance name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    kind: String,
    name: String,
}

impl StreamId {
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.name)
    }
}

/// An envelope plus the coordinates the store assigned to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Persisted<M> {
    pub stream_id: StreamId,
    pub version: Version,
    pub sequence_number: SequenceNumber,
    pub envelope: Envelope<M>,
}

impl<M> Persisted<M> {
    #[must_use]
    pub const fn message(&self) -> &M {
        &self.envelope.message
    }

    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.envelope.metadata
    }
}

impl<M: Message> Persisted<M> {
    /// Stable type name of the carried message.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.envelope.message.name()
    }
}

/// Slice of a stream selected by [`Streamer::stream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VersionSelect {
    /// Every event of the stream.
    #[default]
    All,
    /// Events with a version greater than or equal to this one.
    From(Version),
}

impl VersionSelect {
    /// Lowest version included by this selection.
    #[must_use]
    pub const fn lower_bound(self) -> Version {
        match self {
            Self::All => 1,
            Self::From(version) if version == 0 => 1,
            Self::From(version) => version,
        }
    }
}

/// Which part of the store a [`SequenceStreamer`] replays.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamTarget {
    /// Every stream in the store.
    #[default]
    All,
    /// Only streams of one kind (e.g. every `user` stream).
    Kind(String),
}

impl StreamTarget {
    #[must_use]
    pub fn kind(kind: impl Into<String>) -> Self {
        Self::Kind(kind.into())
    }

    #[must_use]
    pub fn matches(&self, stream_id: &StreamId) -> bool {
        match self {
            Self::All => true,
            Self::Kind(kind) => stream_id.kind() == kind,
        }
    }
}

/// Bounded channel half that readers deliver persisted events into.
pub type EventSink<M> = mpsc::Sender<Persisted<M>>;

/// Error from append operations.
#[derive(Debug, Error)]
pub enum AppendError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    /// Another writer moved the stream since the caller read it.
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Error from streaming operations.
#[derive(Debug, Error)]
pub enum StreamError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    /// The cancellation token fired or the receiving side went away.
    #[error("stream cancelled")]
    Cancelled,
    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl<StoreError: std::error::Error + 'static> StreamError<StoreError> {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Types shared by every storage capability.
pub trait EventStore: Send + Sync {
    /// Payload type kept in the store's envelopes.
    type Message: Send + Sync + 'static;

    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;
}

/// Append capability.
pub trait Appender: EventStore {
    /// Current version of a stream; 0 when it has no events.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the lookup fails.
    fn stream_version<'a>(
        &'a self,
        stream_id: &'a StreamId,
    ) -> impl Future<Output = Result<Version, Self::Error>> + Send + 'a;

    /// Append a batch atomically.
    ///
    /// With [`ExpectedVersion::Exact`], the batch is rejected with a
    /// [`ConflictError`] and nothing is persisted unless the stream is
    /// currently at exactly that version. On success the events receive
    /// consecutive versions and one sequence number each; the last new version
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::Conflict`] on a version mismatch, or
    /// [`AppendError::Store`] if persistence fails.
    fn append<'a>(
        &'a self,
        stream_id: &'a StreamId,
        expected: ExpectedVersion,
        events: NonEmpty<Envelope<Self::Message>>,
    ) -> impl Future<Output = Result<Version, AppendError<Self::Error>>> + Send + 'a;
}

/// Per-stream read capability.
pub trait Streamer: EventStore {
    /// Deliver the selected slice of a stream into `sink`, in version order.
    ///
    /// Returns once every matching event has been sent; `sink` is dropped on
    /// return, which closes the channel. An empty or missing stream is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Cancelled`] if `cancel` fires or the receiver is
    /// dropped before delivery completes, or [`StreamError::Store`] if reading
    /// fails.
    fn stream<'a>(
        &'a self,
        stream_id: &'a StreamId,
        select: VersionSelect,
        sink: EventSink<Self::Message>,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<(), StreamError<Self::Error>>> + Send + 'a;
}

/// Store-wide read capability used by catch-up subscriptions.
pub trait SequenceStreamer: EventStore {
    /// Deliver every event of `target` with a sequence number strictly greater
    /// than `after`, in sequence order.
    ///
    /// # Errors
    ///
    /// Same contract as [`Streamer::stream`].
    fn stream_all<'a>(
        &'a self,
        target: &'a StreamTarget,
        after: SequenceNumber,
        sink: EventSink<Self::Message>,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<(), StreamError<Self::Error>>> + Send + 'a;
}

/// Send one event into a sink, giving up as soon as `cancel` fires.
///
/// Store implementations use this for every delivery so a producer blocked on
/// a full channel still observes cancellation.
///
/// # Errors
///
/// Returns [`StreamError::Cancelled`] if the token fires first or the receiver
/// has been dropped.
pub async fn forward<M, E>(
    sink: &EventSink<M>,
    event: Persisted<M>,
    cancel: &CancellationToken,
) -> Result<(), StreamError<E>>
where
    E: std::error::Error + 'static,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StreamError::Cancelled),
        sent = sink.send(event) => sent.map_err(|_| StreamError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, time::Duration};

    use super::*;

    fn persisted(sequence_number: SequenceNumber) -> Persisted<&'static str> {
        Persisted {
            stream_id: StreamId::new("user", "1"),
            version: sequence_number,
            sequence_number,
            envelope: Envelope::new("created"),
        }
    }

    #[test]
    fn stream_id_displays_kind_and_name() {
        let id = StreamId::new("user", "1");
        assert_eq!(id.to_string(), "user-1");
        assert_eq!(id.kind(), "user");
        assert_eq!(id.name(), "1");
    }

    #[test]
    fn version_select_lower_bound_starts_at_one() {
        assert_eq!(VersionSelect::All.lower_bound(), 1);
        assert_eq!(VersionSelect::From(0).lower_bound(), 1);
        assert_eq!(VersionSelect::From(4).lower_bound(), 4);
    }

    #[test]
    fn stream_target_matches_by_kind() {
        let user = StreamId::new("user", "1");
        let order = StreamId::new("order", "1");

        assert!(StreamTarget::All.matches(&order));
        assert!(StreamTarget::kind("user").matches(&user));
        assert!(!StreamTarget::kind("user").matches(&order));
    }

    #[tokio::test]
    async fn forward_delivers_when_capacity_allows() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        forward::<_, Infallible>(&tx, persisted(1), &cancel)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().sequence_number, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forward_observes_cancellation_on_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        forward::<_, Infallible>(&tx, persisted(1), &cancel)
            .await
            .unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = forward::<_, Infallible>(&tx, persisted(2), &cancel).await;
        assert!(matches!(result, Err(StreamError::Cancelled)));
    }

    #[tokio::test]
    async fn forward_fails_when_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = forward::<_, Infallible>(&tx, persisted(1), &CancellationToken::new()).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
