//! Serialization boundary for stores and snapshot stores that persist bytes.
//!
//! The in-memory event store keeps typed messages and never touches this
//! module. Adapters over a real persistence medium encode payloads with a
//! [`Codec`] and turn stored `(name, bytes)` pairs back into messages with a
//! [`Registry`]: an explicit table from type name to decoder closure, built
//! once at startup.

use std::{collections::HashMap, fmt};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::event::DomainEvent;

/// Serialization strategy for payloads and snapshot state.
pub trait Codec: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// # Errors
    ///
    /// Returns a codec error if the value cannot be encoded.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize + ?Sized;

    /// # Errors
    ///
    /// Returns a codec error if `data` is not a valid encoding of `T`.
    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Error = serde_json::Error;

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value)
    }

    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(data)
    }
}

/// Error returned when decoding a stored payload fails.
#[derive(Debug, Error)]
pub enum DecodeError<CodecError>
where
    CodecError: std::error::Error + 'static,
{
    /// No decoder was registered under this name.
    #[error("unknown message name `{name}`, expected one of {expected:?}")]
    UnknownName {
        name: String,
        expected: Vec<&'static str>,
    },
    /// The decoder for this name rejected the payload.
    #[error("failed to decode `{name}`: {source}")]
    Codec {
        name: String,
        #[source]
        source: CodecError,
    },
}

type Decoder<M, C> = Box<dyn Fn(&C, &[u8]) -> Result<M, <C as Codec>::Error> + Send + Sync>;

/// Decoder table mapping stable message names to concrete payload types.
///
/// ```
/// use eventide_core::{codec::{JsonCodec, Registry}, event::DomainEvent};
/// use serde::Deserialize;
///
/// #[derive(Debug, PartialEq, Deserialize)]
/// struct Deposited { amount: u64 }
///
/// impl DomainEvent for Deposited {
///     const NAME: &'static str = "deposited";
/// }
///
/// #[derive(Debug, PartialEq)]
/// enum AccountEvent { Deposited(Deposited) }
///
/// impl From<Deposited> for AccountEvent {
///     fn from(event: Deposited) -> Self { Self::Deposited(event) }
/// }
///
/// let registry = Registry::<AccountEvent>::new(JsonCodec).register::<Deposited>();
/// let event = registry.decode("deposited", br#"{"amount":10}"#).unwrap();
/// assert_eq!(event, AccountEvent::Deposited(Deposited { amount: 10 }));
/// ```
pub struct Registry<M, C: Codec = JsonCodec> {
    codec: C,
    decoders: HashMap<&'static str, Decoder<M, C>>,
}

impl<M, C: Codec> Registry<M, C> {
    #[must_use]
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            decoders: HashMap::new(),
        }
    }

    /// Register a [`DomainEvent`] under its `NAME`, converting it into `M`.
    #[must_use]
    pub fn register<E>(self) -> Self
    where
        E: DomainEvent + DeserializeOwned + Into<M> + 'static,
        M: 'static,
        C: 'static,
    {
        self.register_with(E::NAME, |codec, data| {
            codec.deserialize::<E>(data).map(Into::into)
        })
    }

    /// Register an arbitrary decoder under `name`.
    ///
    /// Useful for enum variants without a dedicated struct, or for upcasting
    /// old payload shapes. A later registration for the same name replaces
    /// the earlier one.
    #[must_use]
    pub fn register_with<F>(mut self, name: &'static str, decoder: F) -> Self
    where
        F: Fn(&C, &[u8]) -> Result<M, C::Error> + Send + Sync + 'static,
    {
        if self.decoders.insert(name, Box::new(decoder)).is_some() {
            tracing::warn!(name, "decoder registered twice, keeping the latest");
        }
        self
    }

    /// Decode a stored payload by name.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownName`] for unregistered names and
    /// [`DecodeError::Codec`] when the payload does not decode.
    pub fn decode(&self, name: &str, data: &[u8]) -> Result<M, DecodeError<C::Error>> {
        let Some(decoder) = self.decoders.get(name) else {
            return Err(DecodeError::UnknownName {
                name: name.to_string(),
                expected: self.names(),
            });
        };
        decoder(&self.codec, data).map_err(|source| DecodeError::Codec {
            name: name.to_string(),
            source,
        })
    }

    /// Encode a payload with the registry's codec.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the value cannot be encoded.
    pub fn encode<T>(&self, value: &T) -> Result<Vec<u8>, C::Error>
    where
        T: Serialize + ?Sized,
    {
        self.codec.serialize(value)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.decoders.keys().copied().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }
}

impl<M, C: Codec + fmt::Debug> fmt::Debug for Registry<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("codec", &self.codec)
            .field("names", &self.names())
            .finish()
    }
}
