//! Integration tests for projection runners.

#![cfg(feature = "test-util")]

mod common;

use std::{collections::BTreeMap, time::Duration};

use common::{User, UserEvent, change_email, init_tracing, register};
use eventide::{
    CatchUp, Processor, Progress, Repository, Runner, RunnerError, SequenceNumber, checkpoint,
    store::{Persisted, StreamTarget, inmemory},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
#[error("index unavailable")]
struct IndexUnavailable;

/// Read model: current email per user id.
#[derive(Default)]
struct EmailIndex {
    emails: BTreeMap<String, String>,
    processed: Vec<SequenceNumber>,
    offline_at: Option<SequenceNumber>,
    stop_at: Option<SequenceNumber>,
    cancel: CancellationToken,
}

impl EmailIndex {
    fn new(cancel: &CancellationToken) -> Self {
        Self {
            cancel: cancel.clone(),
            ..Self::default()
        }
    }
}

impl Processor for EmailIndex {
    type Error = IndexUnavailable;
    type Message = UserEvent;

    async fn process(
        &mut self,
        event: &Persisted<UserEvent>,
    ) -> Result<Progress, IndexUnavailable> {
        if self.offline_at == Some(event.sequence_number) {
            return Err(IndexUnavailable);
        }
        let (UserEvent::Created { email } | UserEvent::EmailChanged { email }) = event.message();
        self.emails
            .insert(event.stream_id.name().to_string(), email.clone());
        self.processed.push(event.sequence_number);
        if self.stop_at == Some(event.sequence_number) {
            self.cancel.cancel();
        }
        Ok(Progress::Checkpoint)
    }
}

async fn seeded_users() -> inmemory::Store<UserEvent> {
    let store = inmemory::Store::new();
    let repo = Repository::new(store.clone());
    let cancel = CancellationToken::new();
    for id in ["1", "2", "3"] {
        repo.execute::<User, _>(&id.to_string(), &register(&format!("{id}@example.com")), &cancel)
            .await
            .unwrap();
    }
    repo.execute::<User, _>(&"1".to_string(), &change_email("one@example.com"), &cancel)
        .await
        .unwrap();
    repo.execute::<User, _>(&"2".to_string(), &change_email("two@example.com"), &cancel)
        .await
        .unwrap();
    store
}

#[tokio::test(start_paused = true)]
async fn failed_event_is_never_checkpointed_and_is_retried_on_restart() {
    init_tracing();
    let store = seeded_users().await;
    let checkpoints = checkpoint::InMemory::new();
    let subscription = CatchUp::new("email-index", store, checkpoints.clone())
        .with_target(StreamTarget::kind("user"));

    let cancel = CancellationToken::new();
    let mut index = EmailIndex::new(&cancel);
    index.offline_at = Some(4);
    let mut runner = Runner::new(subscription.clone(), index);
    let err = tokio::time::timeout(Duration::from_secs(60), runner.run(&cancel))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(
        err,
        RunnerError::Process {
            sequence_number: 4,
            ..
        }
    ));
    assert!(err.to_string().contains("user-1"));
    assert_eq!(runner.processor().processed, vec![1, 2, 3]);
    let after_failure = checkpoints.get("email-index");
    assert!(after_failure <= 3);

    let cancel = CancellationToken::new();
    let mut index = EmailIndex::new(&cancel);
    index.stop_at = Some(5);
    let mut runner = Runner::new(subscription, index);
    tokio::time::timeout(Duration::from_secs(60), runner.run(&cancel))
        .await
        .unwrap()
        .unwrap();

    let index = runner.into_processor();
    assert_eq!(index.processed.first(), Some(&(after_failure + 1)));
    assert_eq!(index.processed.last(), Some(&5));
    assert_eq!(index.emails.get("1").map(String::as_str), Some("one@example.com"));
    assert_eq!(index.emails.get("2").map(String::as_str), Some("two@example.com"));
    assert_eq!(checkpoints.get("email-index"), 5);
}
