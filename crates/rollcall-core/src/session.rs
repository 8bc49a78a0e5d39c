//! Session lifecycle: start, stop, and identifier/PIN generation.
//!
//! A session only tracks its own identity and activity. Resetting the
//! ledger on start is the caller's job; [`crate::Classroom`] does both
//! under one operation.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

pub const SESSION_ID_PREFIX: &str = "SES-";
const SESSION_ID_LEN: usize = 6;
const PIN_MIN: u32 = 100_000;
const PIN_MAX: u32 = 999_999;

/// The attendance-taking window.
///
/// When `active` is true, `id`, `start_time` and `pin` are all set.
/// Stopping keeps them so the export can still be named after the session.
/// Fields are only written by [`Session::start`] and [`Session::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    pub(crate) id: Option<String>,
    pub(crate) active: bool,
    pub(crate) start_time: Option<DateTime<Utc>>,
    pub(crate) pin: Option<String>,
}

impl Session {
    /// A live session with a fresh id and PIN.
    pub fn start<R: Rng>(rng: &mut R, now: DateTime<Utc>) -> Self {
        Self {
            id: Some(generate_session_id(rng)),
            active: true,
            start_time: Some(now),
            pin: Some(generate_pin(rng)),
        }
    }

    /// Deactivate, keeping id, start time and PIN. Stopping twice is a no-op.
    pub fn stop(&mut self) {
        if self.active {
            self.active = false;
            tracing::info!(session = ?self.id, "session stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Id of the current or most recent session.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn pin(&self) -> Option<&str> {
        self.pin.as_deref()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Start time of the live session, `None` when inactive.
    pub fn active_since(&self) -> Option<DateTime<Utc>> {
        if self.active {
            self.start_time
        } else {
            None
        }
    }
}

/// `SES-` followed by six uppercase alphanumerics.
pub fn generate_session_id<R: Rng>(rng: &mut R) -> String {
    let suffix: String = (0..SESSION_ID_LEN)
        .map(|_| (rng.sample(Alphanumeric) as char).to_ascii_uppercase())
        .collect();
    format!("{SESSION_ID_PREFIX}{suffix}")
}

/// Six-digit PIN, uniform over 100000..=999999.
pub fn generate_pin<R: Rng>(rng: &mut R) -> String {
    rng.gen_range(PIN_MIN..=PIN_MAX).to_string()
}
