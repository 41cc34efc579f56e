//! Read-side projection runner.
//!
//! A [`Runner`] connects a [`Subscription`] to a [`Processor`] with three
//! stages joined on the current task:
//!
//! 1. the subscription pushes events into a bounded `events` channel;
//! 2. the processor handles them one at a time and forwards the ones it wants
//!    checkpointed into a bounded `to_checkpoint` channel;
//! 3. the checkpoint stage records each forwarded event.
//!
//! An event is only checkpointed after the processor succeeded on it, so a
//! restart never skips unprocessed work. Events may be processed twice after a
//! crash; processors should be idempotent.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    store::{Persisted, StreamId},
    subscription::Subscription,
    version::{SequenceNumber, Version},
};

/// What the runner should do with an event after processing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Record the event's sequence number as the resume point.
    Checkpoint,
    /// Leave the checkpoint where it is.
    Skip,
}

/// Handles events delivered by a runner.
pub trait Processor: Send {
    type Message: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// # Errors
    ///
    /// Returning an error stops the runner; the event is not checkpointed.
    fn process(
        &mut self,
        event: &Persisted<Self::Message>,
    ) -> impl Future<Output = Result<Progress, Self::Error>> + Send;
}

/// Error returned by [`Runner::run`], naming the stage that failed.
#[derive(Debug, Error)]
pub enum RunnerError<SubscriptionError, ProcessError>
where
    SubscriptionError: std::error::Error + 'static,
    ProcessError: std::error::Error + 'static,
{
    #[error("subscription failed: {0}")]
    Subscription(#[source] SubscriptionError),
    #[error(
        "processing event {version} of stream {stream_id} (sequence {sequence_number}) failed: \
         {source}"
    )]
    Process {
        stream_id: StreamId,
        version: Version,
        sequence_number: SequenceNumber,
        #[source]
        source: ProcessError,
    },
    #[error("checkpointing sequence {sequence_number} failed: {source}")]
    Checkpoint {
        sequence_number: SequenceNumber,
        #[source]
        source: SubscriptionError,
    },
}

/// Default capacity of the runner's internal channels.
pub const DEFAULT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Capacity of the `events` and `to_checkpoint` channels. Clamped to at
    /// least 1.
    pub buffer: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_BUFFER,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub const fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }
}

/// Drives a processor from a subscription.
#[derive(Debug)]
pub struct Runner<Sub, P> {
    subscription: Sub,
    processor: P,
    config: RunnerConfig,
}

impl<Sub, P> Runner<Sub, P> {
    #[must_use]
    pub fn new(subscription: Sub, processor: P) -> Self {
        Self {
            subscription,
            processor,
            config: RunnerConfig::default(),
        }
    }

    #[must_use]
    pub const fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn subscription(&self) -> &Sub {
        &self.subscription
    }

    #[must_use]
    pub const fn processor(&self) -> &P {
        &self.processor
    }

    pub fn into_processor(self) -> P {
        self.processor
    }
}

impl<Sub, P> Runner<Sub, P>
where
    Sub: Subscription,
    P: Processor<Message = Sub::Message>,
{
    /// Run until `cancel` fires or a stage fails.
    ///
    /// Cancellation is a normal stop and returns `Ok(())`. Events already
    /// processed are still checkpointed while the checkpointer keeps up; a
    /// write still pending once `cancel` fires is dropped.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure; the other stages are stopped.
    #[tracing::instrument(skip_all, fields(subscription = self.subscription.name()))]
    pub async fn run(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(), RunnerError<Sub::Error, P::Error>> {
        let Self {
            subscription,
            processor,
            config,
        } = self;
        let subscription = &*subscription;
        let buffer = config.buffer.max(1);

        let cancel = cancel.child_token();
        let cancel = &cancel;
        let (events_tx, events_rx) = mpsc::channel::<Persisted<Sub::Message>>(buffer);
        let (checkpoint_tx, checkpoint_rx) = mpsc::channel::<Persisted<Sub::Message>>(buffer);

        let subscribe = async {
            subscription
                .start(events_tx, cancel)
                .await
                .map_err(RunnerError::Subscription)
        };

        let process = async move {
            let mut events_rx = events_rx;
            loop {
                let event = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                let progress = match processor.process(&event).await {
                    Ok(progress) => progress,
                    Err(source) => {
                        return Err(RunnerError::Process {
                            stream_id: event.stream_id,
                            version: event.version,
                            sequence_number: event.sequence_number,
                            source,
                        });
                    }
                };
                match progress {
                    Progress::Checkpoint => {
                        let sent = tokio::select! {
                            biased;
                            sent = checkpoint_tx.send(event) => sent,
                            () = cancel.cancelled() => break,
                        };
                        if sent.is_err() {
                            break;
                        }
                    }
                    Progress::Skip => {
                        tracing::trace!(sequence_number = event.sequence_number, "skipped");
                    }
                }
            }
            Ok(())
        };

        let checkpoint = async move {
            let mut checkpoint_rx = checkpoint_rx;
            while let Some(event) = checkpoint_rx.recv().await {
                // A write that has not finished by the time `cancel` fires is
                // abandoned; the event is replayed on the next start.
                let written = tokio::select! {
                    biased;
                    written = subscription.checkpoint(&event) => written,
                    () = cancel.cancelled() => {
                        tracing::debug!(
                            sequence_number = event.sequence_number,
                            "checkpoint abandoned"
                        );
                        break;
                    }
                };
                if let Err(source) = written {
                    return Err(RunnerError::Checkpoint {
                        sequence_number: event.sequence_number,
                        source,
                    });
                }
            }
            Ok(())
        };

        let outcome = tokio::try_join!(subscribe, process, checkpoint);
        match &outcome {
            Ok(_) => tracing::debug!("runner stopped"),
            Err(error) => {
                cancel.cancel();
                tracing::error!(%error, "runner failed");
            }
        }
        outcome.map(|_| ())
    }
}
