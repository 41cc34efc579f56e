//! Command-side domain primitives.
//!
//! An [`Aggregate`] is plain domain state plus an `apply` function folding one
//! event into it. A [`Root`] wraps that state with the bookkeeping the engine
//! needs: the stream identity, the version reached so far and the events
//! recorded since the last save.

use std::{fmt, mem};

use crate::{
    event::{Envelope, Message, Metadata},
    store::StreamId,
    version::Version,
};

/// Command-side entity whose whole state is derived by folding its events.
///
/// `apply` runs identically while rehydrating history and while recording new
/// events, so it must only mutate `self`: no I/O, no further events.
///
/// ```
/// use eventide_core::{aggregate::Aggregate, event::Message};
///
/// #[derive(Debug, Clone, PartialEq)]
/// enum CounterEvent { Incremented }
///
/// impl Message for CounterEvent {
///     fn name(&self) -> &'static str { "incremented" }
/// }
///
/// #[derive(Default)]
/// struct Counter { value: u64 }
///
/// impl Aggregate for Counter {
///     const KIND: &'static str = "counter";
///     type Id = String;
///     type Event = CounterEvent;
///     type Error = std::convert::Infallible;
///
///     fn apply(&mut self, event: &CounterEvent) -> Result<(), Self::Error> {
///         match event {
///             CounterEvent::Incremented => self.value += 1,
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Aggregate: Default + Send + Sync {
    /// Stream kind used for every instance of this aggregate.
    ///
    /// Combined with the instance id into a [`StreamId`]. Use lowercase,
    /// kebab-case: `"user"`, `"bank-account"`.
    const KIND: &'static str;

    type Id: Clone + fmt::Display + Send + Sync;
    type Event: Message + Clone + Send + Sync;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fold one event into the state.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if the event is not valid for the current state.
    fn apply(&mut self, event: &Self::Event) -> Result<(), Self::Error>;
}

/// Entry point for command handling.
///
/// Handlers inspect the current state and decide which events to record;
/// they never mutate state directly.
pub trait Handle<C>: Aggregate {
    /// # Errors
    ///
    /// Returns `Self::Error` if the command is invalid for the current state.
    fn handle(&self, command: &C) -> Result<Vec<Self::Event>, Self::Error>;
}

/// An aggregate instance plus its version and pending events.
///
/// A root at version 0 is unborn: nothing has been recorded or loaded yet.
pub struct Root<A: Aggregate> {
    id: A::Id,
    version: Version,
    state: A,
    uncommitted: Vec<Envelope<A::Event>>,
}

impl<A: Aggregate> Root<A> {
    /// An unborn root with default state.
    #[must_use]
    pub fn new(id: A::Id) -> Self {
        Self::from_snapshot(id, 0, A::default())
    }

    pub(crate) fn from_snapshot(id: A::Id, version: Version, state: A) -> Self {
        Self {
            id,
            version,
            state,
            uncommitted: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &A::Id {
        &self.id
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        StreamId::new(A::KIND, self.id.to_string())
    }

    /// Count of events ever applied, loaded and recorded.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub const fn state(&self) -> &A {
        &self.state
    }

    /// Events recorded since construction or the last [`Root::flush`].
    #[must_use]
    pub fn uncommitted(&self) -> &[Envelope<A::Event>] {
        &self.uncommitted
    }

    /// Record new events.
    ///
    /// Each event is applied, then buffered and counted. The first failing
    /// event stops the batch; events before it stay applied and recorded.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Aggregate::apply`].
    pub fn record_that(
        &mut self,
        events: impl IntoIterator<Item = A::Event>,
    ) -> Result<(), A::Error> {
        events
            .into_iter()
            .try_for_each(|event| self.record(Envelope::new(event)))
    }

    /// Record new events, attaching `metadata` to each envelope.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Aggregate::apply`].
    pub fn record_that_with_metadata(
        &mut self,
        events: impl IntoIterator<Item = A::Event>,
        metadata: &Metadata,
    ) -> Result<(), A::Error> {
        events
            .into_iter()
            .try_for_each(|event| self.record(Envelope::new(event).with_metadata_map(metadata)))
    }

    /// Record a single envelope.
    ///
    /// # Errors
    ///
    /// Returns the error from [`Aggregate::apply`]; nothing is recorded then.
    pub fn record(&mut self, envelope: Envelope<A::Event>) -> Result<(), A::Error> {
        self.state.apply(&envelope.message)?;
        tracing::trace!(
            kind = A::KIND,
            event = envelope.message.name(),
            "event recorded"
        );
        self.uncommitted.push(envelope);
        self.version += 1;
        Ok(())
    }

    /// Run a command handler and record the events it produced.
    ///
    /// # Errors
    ///
    /// Returns the handler's rejection, or the first `apply` failure.
    pub fn handle<C>(&mut self, command: &C) -> Result<(), A::Error>
    where
        A: Handle<C>,
    {
        let events = self.state.handle(command)?;
        self.record_that(events)
    }

    /// Take the uncommitted events, leaving the buffer empty.
    ///
    /// Not idempotent: a second call returns nothing. The version is left
    /// untouched.
    pub fn flush(&mut self) -> Vec<Envelope<A::Event>> {
        mem::take(&mut self.uncommitted)
    }

    /// Apply a stored event during rehydration, adopting its version.
    pub(crate) fn replay(&mut self, version: Version, event: &A::Event) -> Result<(), A::Error> {
        self.state.apply(event)?;
        self.version = version;
        Ok(())
    }
}

impl<A> fmt::Debug for Root<A>
where
    A: Aggregate + fmt::Debug,
    A::Id: fmt::Debug,
    A::Event: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("uncommitted", &self.uncommitted)
            .finish()
    }
}

impl<A> Clone for Root<A>
where
    A: Aggregate + Clone,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            version: self.version,
            state: self.state.clone(),
            uncommitted: self.uncommitted.clone(),
        }
    }
}

impl<A> PartialEq for Root<A>
where
    A: Aggregate + PartialEq,
    A::Id: PartialEq,
    A::Event: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.version == other.version
            && self.state == other.state
            && self.uncommitted == other.uncommitted
    }
}

#[cfg(test)]
mod tests {
    use thiserror::Error;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TallyEvent {
        Added(u32),
        Closed,
    }

    impl Message for TallyEvent {
        fn name(&self) -> &'static str {
            match self {
                Self::Added(_) => "tally-added",
                Self::Closed => "tally-closed",
            }
        }
    }

    #[derive(Debug, Error, PartialEq, Eq)]
    #[error("tally is closed")]
    struct TallyClosed;

    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    struct Tally {
        total: u32,
        closed: bool,
    }

    impl Aggregate for Tally {
        const KIND: &'static str = "tally";
        type Error = TallyClosed;
        type Event = TallyEvent;
        type Id = String;

        fn apply(&mut self, event: &TallyEvent) -> Result<(), TallyClosed> {
            if self.closed {
                return Err(TallyClosed);
            }
            match event {
                TallyEvent::Added(n) => self.total += n,
                TallyEvent::Closed => self.closed = true,
            }
            Ok(())
        }
    }

    struct Add(u32);

    impl Handle<Add> for Tally {
        fn handle(&self, command: &Add) -> Result<Vec<TallyEvent>, TallyClosed> {
            if self.closed {
                return Err(TallyClosed);
            }
            Ok(vec![TallyEvent::Added(command.0)])
        }
    }

    #[test]
    fn new_root_is_unborn() {
        let root = Root::<Tally>::new("t-1".to_string());
        assert_eq!(root.version(), 0);
        assert!(root.uncommitted().is_empty());
        assert_eq!(root.stream_id(), StreamId::new("tally", "t-1"));
    }

    #[test]
    fn recording_applies_and_counts_each_event() {
        let mut root = Root::<Tally>::new("t-1".to_string());
        root.record_that([TallyEvent::Added(2), TallyEvent::Added(3)])
            .unwrap();

        assert_eq!(root.version(), 2);
        assert_eq!(root.state().total, 5);
        assert_eq!(root.uncommitted().len(), 2);
    }

    #[test]
    fn failing_event_stops_the_batch_but_keeps_earlier_ones() {
        let mut root = Root::<Tally>::new("t-1".to_string());
        let result = root.record_that([
            TallyEvent::Added(1),
            TallyEvent::Closed,
            TallyEvent::Added(5),
            TallyEvent::Added(7),
        ]);

        assert_eq!(result, Err(TallyClosed));
        assert_eq!(root.version(), 2);
        assert_eq!(root.state().total, 1);
        assert!(root.state().closed);
        assert_eq!(
            root.uncommitted()
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>(),
            vec![TallyEvent::Added(1), TallyEvent::Closed]
        );
    }

    #[test]
    fn flush_is_destructive() {
        let mut root = Root::<Tally>::new("t-1".to_string());
        root.record_that([TallyEvent::Added(1)]).unwrap();

        let first = root.flush();
        let second = root.flush();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(root.version(), 1);
    }

    #[test]
    fn metadata_is_attached_to_every_recorded_event() {
        let mut metadata = Metadata::new();
        metadata.insert("actor".into(), "bob".into());

        let mut root = Root::<Tally>::new("t-1".to_string());
        root.record_that_with_metadata([TallyEvent::Added(1), TallyEvent::Added(2)], &metadata)
            .unwrap();

        assert!(root.uncommitted().iter().all(|e| e.metadata["actor"] == "bob"));
    }

    #[test]
    fn handle_records_produced_events() {
        let mut root = Root::<Tally>::new("t-1".to_string());
        root.handle(&Add(4)).unwrap();
        assert_eq!(root.state().total, 4);
        assert_eq!(root.version(), 1);

        root.record_that([TallyEvent::Closed]).unwrap();
        assert_eq!(root.handle(&Add(1)), Err(TallyClosed));
        assert_eq!(root.version(), 2);
    }

    #[test]
    fn replay_adopts_the_stored_version() {
        let mut root = Root::<Tally>::from_snapshot("t-1".to_string(), 10, Tally::default());
        root.replay(11, &TallyEvent::Added(1)).unwrap();
        assert_eq!(root.version(), 11);
        assert!(root.uncommitted().is_empty());
    }
}
