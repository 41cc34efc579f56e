#![doc = include_str!("../README.md")]

#[cfg(feature = "test-util")]
pub use eventide_core::test;
pub use eventide_core::{
    aggregate,
    aggregate::{Aggregate, Handle, Root},
    backoff,
    backoff::BackoffConfig,
    checkpoint,
    checkpoint::Checkpointer,
    codec,
    codec::{Codec, JsonCodec, Registry},
    event,
    event::{DomainEvent, Envelope, Message, Metadata},
    projection,
    projection::{Processor, Progress, Runner, RunnerConfig, RunnerError},
    repository,
    repository::{FromStore, Repository, RepositoryError},
    subscription,
    subscription::{CatchUp, Subscription, SubscriptionConfig, SubscriptionError},
    version,
    version::{ConflictError, ExpectedVersion, SequenceNumber, Version},
};

pub mod store {
    pub use eventide_core::store::{
        AppendError, Appender, EventSink, EventStore, NonEmpty, Persisted, SequenceStreamer,
        StreamError, StreamId, StreamTarget, Streamer, VersionSelect, forward,
    };

    pub use eventide_core::store::inmemory;
}

pub mod snapshot {
    pub use eventide_core::snapshot::{
        NoSnapshots, Policy, Snapshot, SnapshotStore, SnapshotStrategy, Snapshots,
    };

    pub use eventide_core::snapshot::{inmemory, policy};
}
