//! Core traits and types for the eventide event-sourcing engine.
//!
//! - [`version`] - Stream versions, sequence numbers and optimistic concurrency
//! - [`event`] - Message naming and envelopes with metadata
//! - [`codec`] - Name-keyed payload serialization (`Codec`, `Registry`)
//! - [`store`] - Storage capabilities (`Appender`, `Streamer`, `SequenceStreamer`)
//! - [`aggregate`] - Command-side primitives (`Aggregate`, `Handle`, `Root`)
//! - [`repository`] - Aggregate load, save and command execution (`Repository`)
//! - [`snapshot`] - Snapshot storage and recording policies
//! - [`checkpoint`] - Per-subscriber resume points (`Checkpointer`)
//! - [`subscription`] - Catch-up subscriptions over the global log (`CatchUp`)
//! - [`projection`] - Read-side runner coupling processing and checkpoints
//!
//! # Example
//!
//! ```
//! use eventide_core::{repository::Repository, store::inmemory};
//!
//! let store: inmemory::Store<String> = inmemory::Store::new();
//! let repo = Repository::new(store);
//! assert!(repo.event_store().is_empty());
//! ```
//!
//! Most users should depend on the `eventide` crate, which re-exports these
//! types with a flatter API surface.

pub mod aggregate;
pub mod backoff;
pub mod checkpoint;
pub mod codec;
pub mod event;
pub mod projection;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod subscription;
pub mod version;
