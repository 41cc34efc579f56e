//! In-memory event store implementation.
//!
//! This module provides [`Store`], the reference implementation every backing
//! store must behave like. It is thread-safe and suitable for unit tests,
//! examples and single-process deployments.
//!
//! # Example
//!
//! ```
//! use eventide_core::store::inmemory;
//!
//! let store: inmemory::Store<String> = inmemory::Store::new();
//! assert!(store.is_empty());
//! ```

use std::{
    collections::HashMap,
    convert::Infallible,
    fmt,
    sync::{Arc, RwLock},
};

use nonempty::NonEmpty;
use tokio_util::sync::CancellationToken;

use crate::{
    event::Envelope,
    store::{
        AppendError, Appender, EventSink, EventStore, Persisted, SequenceStreamer, StreamError,
        StreamId, StreamTarget, Streamer, VersionSelect, forward,
    },
    version::{ExpectedVersion, SequenceNumber, Version},
};

/// In-memory event store backed by a single global append log.
///
/// Two indexes hold offsets into the log, one per stream kind and one per
/// stream, so reads never copy more than they deliver and always come out in
/// insertion order. One reader/writer lock covers the log and both indexes.
///
/// The store is a cheap handle: clones share the same log.
pub struct Store<M> {
    inner: Arc<RwLock<Inner<M>>>,
}

struct Inner<M> {
    log: Vec<Persisted<M>>,
    by_kind: HashMap<String, Vec<usize>>,
    by_stream: HashMap<StreamId, Vec<usize>>,
}

impl<M> Store<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                log: Vec::new(),
                by_kind: HashMap::new(),
                by_stream: HashMap::new(),
            })),
        }
    }

    /// Number of events in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("in-memory store lock poisoned")
            .log
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number of the most recent event; 0 for an empty store.
    #[must_use]
    pub fn last_sequence_number(&self) -> SequenceNumber {
        self.len() as SequenceNumber
    }
}

impl<M> Default for Store<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for Store<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> fmt::Debug for Store<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("events", &self.len()).finish()
    }
}

impl<M> Inner<M> {
    fn stream_version(&self, stream_id: &StreamId) -> Version {
        self.by_stream
            .get(stream_id)
            .map_or(0, |offsets| offsets.len() as Version)
    }

    fn push(&mut self, stream_id: &StreamId, version: Version, envelope: Envelope<M>) {
        let offset = self.log.len();
        self.log.push(Persisted {
            stream_id: stream_id.clone(),
            version,
            sequence_number: offset as SequenceNumber + 1,
            envelope,
        });
        self.by_kind
            .entry(stream_id.kind().to_string())
            .or_default()
            .push(offset);
        self.by_stream
            .entry(stream_id.clone())
            .or_default()
            .push(offset);
    }
}

impl<M: Clone> Inner<M> {
    fn collect(&self, offsets: &[usize]) -> Vec<Persisted<M>> {
        offsets
            .iter()
            .map(|&offset| self.log[offset].clone())
            .collect()
    }
}

impl<M> EventStore for Store<M>
where
    M: Clone + Send + Sync + 'static,
{
    type Error = Infallible;
    type Message = M;
}

impl<M> Appender for Store<M>
where
    M: Clone + Send + Sync + 'static,
{
    #[tracing::instrument(skip(self, stream_id), fields(stream_id = %stream_id))]
    fn stream_version<'a>(
        &'a self,
        stream_id: &'a StreamId,
    ) -> impl Future<Output = Result<Version, Self::Error>> + Send + 'a {
        let version = self
            .inner
            .read()
            .expect("in-memory store lock poisoned")
            .stream_version(stream_id);
        tracing::trace!(version, "retrieved stream version");
        std::future::ready(Ok(version))
    }

    #[tracing::instrument(
        skip(self, stream_id, events),
        fields(stream_id = %stream_id, event_count = events.len())
    )]
    fn append<'a>(
        &'a self,
        stream_id: &'a StreamId,
        expected: ExpectedVersion,
        events: NonEmpty<Envelope<Self::Message>>,
    ) -> impl Future<Output = Result<Version, AppendError<Self::Error>>> + Send + 'a {
        let result = (|| {
            let mut inner = self.inner.write().expect("in-memory store lock poisoned");
            let current = inner.stream_version(stream_id);

            if let Err(conflict) = expected.check(current) {
                tracing::debug!(?expected, current, "version mismatch, rejecting append");
                return Err(AppendError::Conflict(conflict));
            }

            let mut version = current;
            for envelope in events {
                version += 1;
                inner.push(stream_id, version, envelope);
            }
            drop(inner);

            tracing::debug!(version, "events appended to stream");
            Ok(version)
        })();

        std::future::ready(result)
    }
}

impl<M> Streamer for Store<M>
where
    M: Clone + Send + Sync + 'static,
{
    #[tracing::instrument(skip(self, stream_id, sink, cancel), fields(stream_id = %stream_id))]
    fn stream<'a>(
        &'a self,
        stream_id: &'a StreamId,
        select: VersionSelect,
        sink: EventSink<Self::Message>,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<(), StreamError<Self::Error>>> + Send + 'a {
        async move {
            let events = {
                let inner = self.inner.read().expect("in-memory store lock poisoned");
                // Version `v` lives at index `v - 1` of the stream index.
                let skip = usize::try_from(select.lower_bound() - 1).unwrap_or(usize::MAX);
                inner
                    .by_stream
                    .get(stream_id)
                    .and_then(|offsets| offsets.get(skip..))
                    .map(|offsets| inner.collect(offsets))
                    .unwrap_or_default()
            };

            tracing::trace!(events = events.len(), "streaming events");
            for event in events {
                forward(&sink, event, cancel).await?;
            }
            Ok(())
        }
    }
}

impl<M> SequenceStreamer for Store<M>
where
    M: Clone + Send + Sync + 'static,
{
    #[tracing::instrument(skip(self, sink, cancel))]
    fn stream_all<'a>(
        &'a self,
        target: &'a StreamTarget,
        after: SequenceNumber,
        sink: EventSink<Self::Message>,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<(), StreamError<Self::Error>>> + Send + 'a {
        async move {
            let events = {
                let inner = self.inner.read().expect("in-memory store lock poisoned");
                // Sequence number `n` lives at log offset `n - 1`.
                let first = usize::try_from(after).unwrap_or(usize::MAX);
                match target {
                    StreamTarget::All => inner
                        .log
                        .get(first..)
                        .map(<[Persisted<M>]>::to_vec)
                        .unwrap_or_default(),
                    StreamTarget::Kind(kind) => inner
                        .by_kind
                        .get(kind)
                        .map(|offsets| {
                            let start = offsets.partition_point(|&offset| offset < first);
                            inner.collect(&offsets[start..])
                        })
                        .unwrap_or_default(),
                }
            };

            tracing::trace!(events = events.len(), "streaming events by sequence number");
            for event in events {
                forward(&sink, event, cancel).await?;
            }
            Ok(())
        }
    }
}
