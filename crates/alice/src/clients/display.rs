//! Per-client display power: awake, asleep, and the motion dim lock.

use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Used when the client settings carry no `dimafter`.
pub const DEFAULT_DIM_AFTER: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Unknown,
    Awake { since: Instant },
    Asleep { since: Instant },
}

#[derive(Debug)]
pub struct DisplayPower {
    state: PowerState,
    dim_lock_until: Option<Instant>,
    dim_after: Duration,
}

impl DisplayPower {
    pub fn new(dim_after: Duration) -> Self {
        Self {
            state: PowerState::Unknown,
            dim_lock_until: None,
            dim_after,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn is_asleep(&self) -> bool {
        matches!(self.state, PowerState::Asleep { .. })
    }

    /// True if the display should be told to sleep.
    pub fn sleep(&mut self, now: Instant, force: bool) -> bool {
        match self.state {
            PowerState::Asleep { .. } if !force => return false,
            PowerState::Awake { since } => {
                info!(awake_secs = now.saturating_duration_since(since).as_secs(), "display going to sleep");
            }
            _ => info!("display going to sleep"),
        }
        self.state = PowerState::Asleep { since: now };
        true
    }

    /// True if the display should be told to wake.
    pub fn wake(&mut self, now: Instant, force: bool) -> bool {
        match self.state {
            PowerState::Awake { .. } if !force => return false,
            PowerState::Asleep { since } => {
                info!(asleep_secs = now.saturating_duration_since(since).as_secs(), "display waking up");
            }
            _ => info!("display waking up"),
        }
        self.state = PowerState::Awake { since: now };
        true
    }

    /// Motion holds the display awake for `dim_after`.
    pub fn on_motion(&mut self, now: Instant) -> bool {
        self.dim_lock_until = Some(now + self.dim_after);
        self.wake(now, false)
    }

    /// Stillness sleeps the display once the dim lock has run out.
    pub fn on_still(&mut self, now: Instant) -> bool {
        if let Some(until) = self.dim_lock_until {
            if until > now {
                debug!(locked_secs = (until - now).as_secs(), "still lockout");
                return false;
            }
            self.dim_lock_until = None;
        }
        self.sleep(now, false)
    }
}

impl Default for DisplayPower {
    fn default() -> Self {
        Self::new(DEFAULT_DIM_AFTER)
    }
}
