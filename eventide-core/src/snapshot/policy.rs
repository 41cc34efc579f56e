//! When to take snapshots.
//!
//! A [`Policy`] is asked after every successful save whether the root's new
//! version deserves a snapshot, and is told via [`Policy::record`] once one
//! has actually been written.
//!
//! - [`Always`]: snapshot after every save (cheap loads, more writes)
//! - [`EveryN`]: snapshot when the version crosses a multiple of `n`
//! - [`Interval`]: snapshot at most once per wall-clock interval
//! - [`Never`]: load-only, for replicas reading snapshots made elsewhere

use std::{sync::Mutex, time::Duration};

use tokio::time::Instant;

use crate::version::Version;

/// Decides when a snapshot is due.
pub trait Policy: Send + Sync {
    /// Whether a root that just reached `version` should be snapshotted.
    fn should_record(&self, version: Version) -> bool;

    /// Acknowledge that a snapshot at `version` was stored.
    fn record(&self, version: Version);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Never;

impl Policy for Never {
    fn should_record(&self, _version: Version) -> bool {
        false
    }

    fn record(&self, _version: Version) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Always;

impl Policy for Always {
    fn should_record(&self, _version: Version) -> bool {
        true
    }

    fn record(&self, _version: Version) {}
}

/// Snapshot whenever the version is a multiple of `n`.
///
/// Saves append whole batches, so a version that jumps over a multiple
/// (say from 9 to 11 with `n = 5`) does not trigger; the next landing on a
/// multiple will.
#[derive(Clone, Copy, Debug)]
pub struct EveryN {
    n: Version,
}

impl EveryN {
    /// `n = 0` is treated as 1.
    #[must_use]
    pub const fn new(n: Version) -> Self {
        Self {
            n: if n == 0 { 1 } else { n },
        }
    }
}

impl Policy for EveryN {
    fn should_record(&self, version: Version) -> bool {
        version % self.n == 0
    }

    fn record(&self, _version: Version) {}
}

/// Snapshot at most once per `period`, across every stream the policy serves.
///
/// The clock starts at the first acknowledged snapshot, so a policy that has
/// never recorded one always says yes.
///
/// There is a single clock per policy value, not one per stream: a
/// repository that saves several streams snapshots whichever stream is saved
/// first after the period elapses, and every other stream saved in that
/// period waits. Give each stream its own repository and policy value when
/// every stream needs its own cadence.
#[derive(Debug)]
pub struct Interval {
    period: Duration,
    last: Mutex<Option<Instant>>,
}

impl Interval {
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            last: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

impl Policy for Interval {
    fn should_record(&self, _version: Version) -> bool {
        let last = *self.last.lock().expect("snapshot policy lock poisoned");
        last.is_none_or(|at| at.elapsed() >= self.period)
    }

    fn record(&self, _version: Version) {
        *self.last.lock().expect("snapshot policy lock poisoned") = Some(Instant::now());
    }
}
