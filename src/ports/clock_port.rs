//! Time source and cooperative waits.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::shutdown::Shutdown;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Backoff delay between retry attempts.
    fn sleep(&self, duration: Duration);

    /// Blocks until `deadline` or until `shutdown` fires. Returns `true` if cancelled.
    fn wait_until(&self, deadline: DateTime<Utc>, shutdown: &Shutdown) -> bool;
}
