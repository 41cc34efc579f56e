//! Messages and envelopes.
//!
//! A [`Message`] is any payload exposing a stable type name. Event stores keep
//! messages wrapped in an [`Envelope`], which carries string-keyed
//! [`Metadata`] (correlation ids, actors, timestamps) alongside the payload.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// String-keyed metadata attached to every envelope.
pub type Metadata = HashMap<String, String>;

/// A payload with a stable type name.
///
/// The name is what network-backed stores persist next to the encoded payload
/// and what a [`Registry`](crate::codec::Registry) uses to pick a decoder. It
/// must not change once events carrying it have been stored.
///
/// Event enums implement this directly with a `match`; single-struct events
/// usually implement [`DomainEvent`] instead and get `Message` for free.
pub trait Message {
    fn name(&self) -> &'static str;
}

/// Marker for concrete event structs with a compile-time name.
///
/// ```
/// use eventide_core::event::{DomainEvent, Message};
///
/// struct UserCreated;
///
/// impl DomainEvent for UserCreated {
///     const NAME: &'static str = "user-created";
/// }
///
/// assert_eq!(UserCreated.name(), "user-created");
/// ```
pub trait DomainEvent {
    const NAME: &'static str;
}

impl<T: DomainEvent> Message for T {
    fn name(&self) -> &'static str {
        T::NAME
    }
}

/// A message plus its metadata: the unit stored per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<M> {
    pub message: M,
    #[serde(default)]
    pub metadata: Metadata,
}

impl<M> Envelope<M> {
    /// Wrap a message with empty metadata.
    #[must_use]
    pub fn new(message: M) -> Self {
        Self {
            message,
            metadata: Metadata::new(),
        }
    }

    /// Add a metadata entry, replacing any previous value under `key`.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a whole metadata map into the envelope.
    #[must_use]
    pub fn with_metadata_map(mut self, metadata: &Metadata) -> Self {
        self.metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Convert the payload, keeping the metadata.
    pub fn map<N>(self, f: impl FnOnce(M) -> N) -> Envelope<N> {
        Envelope {
            message: f(self.message),
            metadata: self.metadata,
        }
    }

    /// Fallible version of [`Envelope::map`].
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn try_map<N, E>(self, f: impl FnOnce(M) -> Result<N, E>) -> Result<Envelope<N>, E> {
        Ok(Envelope {
            message: f(self.message)?,
            metadata: self.metadata,
        })
    }
}

impl<M> From<M> for Envelope<M> {
    fn from(message: M) -> Self {
        Self::new(message)
    }
}
