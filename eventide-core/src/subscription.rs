//! Resumable catch-up subscriptions.
//!
//! A subscription pulls events from the store in global sequence order and
//! pushes them into a bounded sink. It resumes after the checkpoint stored
//! under its name and keeps polling (with exponential backoff while the store
//! is quiet) until cancelled.
//!
//! The pull loop never writes checkpoints itself: consumers call
//! [`Subscription::checkpoint`] once they have durably handled an event, which
//! is what gives at-least-once delivery across restarts. The
//! [`Runner`](crate::projection::Runner) wires this up.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::{Backoff, BackoffConfig},
    checkpoint::Checkpointer,
    store::{EventSink, Persisted, SequenceStreamer, StreamError, StreamTarget, forward},
    version::SequenceNumber,
};

/// Default capacity of the channel between the store and the subscription.
pub const DEFAULT_BUFFER: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Capacity of the per-pull channel from the store. Clamped to at least 1.
    pub buffer: usize,
    pub backoff: BackoffConfig,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_BUFFER,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SubscriptionConfig {
    #[must_use]
    pub const fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Errors raised by [`CatchUp`].
#[derive(Debug, Error)]
pub enum SubscriptionError<StoreError, CheckpointError>
where
    StoreError: std::error::Error + 'static,
    CheckpointError: std::error::Error + 'static,
{
    #[error("subscription {name}: failed to read checkpoint: {source}")]
    ReadCheckpoint {
        name: String,
        #[source]
        source: CheckpointError,
    },
    #[error("subscription {name}: failed to write checkpoint {sequence_number}: {source}")]
    WriteCheckpoint {
        name: String,
        sequence_number: SequenceNumber,
        #[source]
        source: CheckpointError,
    },
    #[error("subscription {name}: store error reading after {after}: {source}")]
    Store {
        name: String,
        after: SequenceNumber,
        #[source]
        source: StoreError,
    },
}

/// A named, resumable source of persisted events.
pub trait Subscription: Send + Sync {
    type Message: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name the subscription's checkpoint is stored under.
    fn name(&self) -> &str;

    /// Deliver events into `sink` until `cancel` fires.
    ///
    /// Cancellation, and the receiving side going away, end the subscription
    /// with `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be read or the store fails.
    fn start(
        &self,
        sink: EventSink<Self::Message>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Record `event` as handled; a restart resumes after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be written.
    fn checkpoint(
        &self,
        event: &Persisted<Self::Message>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Polling catch-up subscription over a [`SequenceStreamer`].
#[derive(Debug, Clone)]
pub struct CatchUp<S, C> {
    name: String,
    target: StreamTarget,
    store: S,
    checkpointer: C,
    config: SubscriptionConfig,
}

impl<S, C> CatchUp<S, C> {
    /// Subscribe to every stream in `store`.
    #[must_use]
    pub fn new(name: impl Into<String>, store: S, checkpointer: C) -> Self {
        Self {
            name: name.into(),
            target: StreamTarget::All,
            store,
            checkpointer,
            config: SubscriptionConfig::default(),
        }
    }

    /// Restrict the subscription, e.g. to one stream kind.
    #[must_use]
    pub fn with_target(mut self, target: StreamTarget) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub const fn with_config(mut self, config: SubscriptionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn target(&self) -> &StreamTarget {
        &self.target
    }

    #[must_use]
    pub const fn checkpointer(&self) -> &C {
        &self.checkpointer
    }
}

/// Outcome of one pull from the store.
enum Pull {
    /// Number of events delivered; the loop keeps going.
    Delivered(usize),
    /// Cancelled, or nobody is listening anymore.
    Stopped,
}

impl<S, C> CatchUp<S, C>
where
    S: SequenceStreamer,
    C: Checkpointer,
{
    /// Move every event after `*last` into `sink`, advancing `*last` as each
    /// one is handed over.
    async fn pull(
        &self,
        last: &mut SequenceNumber,
        sink: &EventSink<S::Message>,
        cancel: &CancellationToken,
    ) -> Result<Pull, SubscriptionError<S::Error, C::Error>> {
        let after = *last;
        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));

        let read = self.store.stream_all(&self.target, after, tx, cancel);
        let relay = async {
            // Owning the receiver means an early return unblocks the reader.
            let mut rx = rx;
            let mut delivered = 0;
            while let Some(event) = rx.recv().await {
                let sequence_number = event.sequence_number;
                forward::<_, S::Error>(sink, event, cancel).await?;
                *last = sequence_number;
                delivered += 1;
            }
            Ok::<_, StreamError<S::Error>>(delivered)
        };

        let (read, relayed) = tokio::join!(read, relay);
        let Ok(delivered) = relayed else {
            return Ok(Pull::Stopped);
        };
        match read {
            Ok(()) => Ok(Pull::Delivered(delivered)),
            Err(StreamError::Cancelled) => Ok(Pull::Stopped),
            Err(StreamError::Store(source)) => Err(SubscriptionError::Store {
                name: self.name.clone(),
                after,
                source,
            }),
        }
    }
}

impl<S, C> Subscription for CatchUp<S, C>
where
    S: SequenceStreamer,
    C: Checkpointer,
{
    type Error = SubscriptionError<S::Error, C::Error>;
    type Message = S::Message;

    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip_all, fields(subscription = %self.name))]
    async fn start(
        &self,
        sink: EventSink<S::Message>,
        cancel: &CancellationToken,
    ) -> Result<(), Self::Error> {
        let mut last = match self.checkpointer.read(&self.name).await {
            Ok(sequence_number) => sequence_number,
            Err(source) => {
                return Err(SubscriptionError::ReadCheckpoint {
                    name: self.name.clone(),
                    source,
                });
            }
        };
        tracing::debug!(after = last, target = ?self.target, "subscription starting");

        let mut backoff = Backoff::new(self.config.backoff);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sink.closed() => break,
                () = tokio::time::sleep(backoff.delay()) => {}
            }

            match self.pull(&mut last, &sink, cancel).await? {
                Pull::Delivered(0) => backoff.grow(),
                Pull::Delivered(delivered) => {
                    tracing::trace!(delivered, last, "caught up");
                    backoff.reset();
                }
                Pull::Stopped => break,
            }
        }

        tracing::debug!(last, "subscription stopped");
        Ok(())
    }

    async fn checkpoint(&self, event: &Persisted<S::Message>) -> Result<(), Self::Error> {
        self.checkpointer
            .write(&self.name, event.sequence_number)
            .await
            .map_err(|source| SubscriptionError::WriteCheckpoint {
                name: self.name.clone(),
                sequence_number: event.sequence_number,
                source,
            })
    }
}
