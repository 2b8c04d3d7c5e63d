//! Arbitration between the push channel and polling.
//!
//! [`FallbackController`] is re-evaluated on every health change, every push
//! snapshot and every expiry of its arming timer. It never touches timers or
//! the poll loop itself; the owning session reads [`FallbackController::wants_polling`]
//! and [`FallbackController::arming_deadline`] after each call and reconciles.

use std::time::Duration;

use tokio::time::Instant;

use crate::models::job::ConnectionHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    /// Waiting for the channel to prove itself; polling off until `deadline`.
    Arming { deadline: Instant },
    /// Push is live; polling off.
    PushOnly,
    /// Push is down or silent; polling on.
    Polling,
}

pub struct FallbackController {
    activation_delay: Duration,
    state: FallbackState,
    last_push_at: Option<Instant>,
}

impl FallbackController {
    /// Start arming from `now`; the channel is still connecting.
    pub fn new(activation_delay: Duration, now: Instant) -> Self {
        Self {
            activation_delay,
            state: FallbackState::Arming {
                deadline: now + activation_delay,
            },
            last_push_at: None,
        }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    pub fn wants_polling(&self) -> bool {
        self.state == FallbackState::Polling
    }

    pub fn arming_deadline(&self) -> Option<Instant> {
        match self.state {
            FallbackState::Arming { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn last_push_at(&self) -> Option<Instant> {
        self.last_push_at
    }

    pub fn on_health(&mut self, health: ConnectionHealth, now: Instant) -> FallbackState {
        match (health, self.state) {
            (ConnectionHealth::Disconnected, _) => self.state = FallbackState::Polling,
            // A fresh connection gets the full delay to deliver its first update.
            (ConnectionHealth::Connected, FallbackState::Arming { .. }) => {
                self.state = FallbackState::Arming {
                    deadline: now + self.activation_delay,
                }
            }
            // After a reconnect polling keeps running until push delivers again.
            (ConnectionHealth::Connected, _) | (ConnectionHealth::Connecting, _) => {}
        }
        self.state
    }

    pub fn on_push_snapshot(&mut self, now: Instant) -> FallbackState {
        self.last_push_at = Some(now);
        self.state = FallbackState::PushOnly;
        self.state
    }

    /// Called when the arming timer may have expired.
    pub fn on_timer(&mut self, now: Instant) -> FallbackState {
        if let FallbackState::Arming { deadline } = self.state {
            if now >= deadline {
                self.state = FallbackState::Polling;
            }
        }
        self.state
    }
}
