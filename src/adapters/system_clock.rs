//! Wall-clock implementation of [`Clock`].

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::shutdown::Shutdown;
use crate::ports::clock_port::Clock;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn wait_until(&self, deadline: DateTime<Utc>, shutdown: &Shutdown) -> bool {
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        shutdown.wait_timeout(remaining)
    }
}
