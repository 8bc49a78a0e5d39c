//! The classroom aggregate: roster, current session and ledger.
//!
//! All attendance state lives here and every change goes through these
//! operations. Callers pass the current time in, which keeps lateness
//! classification deterministic under test.

use crate::arbiter::{self, Accepted, CheckInPolicy};
use crate::credential::{self, QrPayload};
use crate::error::AttendanceError;
use crate::export;
use crate::ledger::Ledger;
use crate::session::Session;
use crate::types::{Method, Stats, Student};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub struct Classroom {
    roster: Vec<Student>,
    session: Session,
    ledger: Ledger,
    policy: CheckInPolicy,
    rng: StdRng,
}

impl Classroom {
    pub fn new(roster: Vec<Student>, policy: CheckInPolicy) -> Self {
        Self::with_rng(roster, policy, StdRng::from_entropy())
    }

    /// Build with a caller-supplied generator for session ids and PINs.
    pub fn with_rng(roster: Vec<Student>, policy: CheckInPolicy, rng: StdRng) -> Self {
        let ledger = Ledger::new(&roster);
        Self {
            roster,
            session: Session::default(),
            ledger,
            policy,
            rng,
        }
    }

    /// Open a new session and reset every record to absent.
    ///
    /// Refuses while a session is live; replacing one is [`restart`](Self::restart).
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<&Session, AttendanceError> {
        if self.session.is_active() {
            return Err(AttendanceError::SessionAlreadyActive);
        }
        Ok(self.open(now))
    }

    /// Open a new session, discarding the live one if there is one.
    pub fn restart(&mut self, now: DateTime<Utc>) -> &Session {
        if self.session.is_active() {
            tracing::warn!(
                session = ?self.session.id,
                "replacing live session; its attendance is discarded"
            );
        }
        self.open(now)
    }

    fn open(&mut self, now: DateTime<Utc>) -> &Session {
        self.session = Session::start(&mut self.rng, now);
        self.ledger.reset(&self.roster);
        tracing::info!(
            session = ?self.session.id,
            students = self.roster.len(),
            "session started"
        );
        &self.session
    }

    /// Deactivate the session. No-op when already stopped.
    pub fn stop(&mut self) -> &Session {
        self.session.stop();
        &self.session
    }

    pub fn check_in(
        &mut self,
        student_id: &str,
        method: Method,
        now: DateTime<Utc>,
    ) -> Result<Accepted, AttendanceError> {
        arbiter::submit(
            &self.session,
            &mut self.ledger,
            student_id,
            method,
            now,
            &self.policy,
        )
    }

    /// Verify a pasted QR payload and PIN, then check the student in.
    pub fn check_in_qr(
        &mut self,
        student_id: &str,
        raw_payload: &str,
        pin: &str,
        now: DateTime<Utc>,
    ) -> Result<Accepted, AttendanceError> {
        credential::verify(raw_payload, pin, &self.session)?;
        self.check_in(student_id, Method::Qr, now)
    }

    /// Fails with `NoActiveSession` or `UnknownStudent` exactly as a
    /// check-in would, without touching the ledger.
    pub fn ensure_can_check_in(&self, student_id: &str) -> Result<(), AttendanceError> {
        if !self.session.is_active() {
            return Err(AttendanceError::NoActiveSession);
        }
        self.student(student_id)
            .map(|_| ())
            .ok_or_else(|| AttendanceError::UnknownStudent(student_id.to_string()))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn roster(&self) -> &[Student] {
        &self.roster
    }

    pub fn student(&self, student_id: &str) -> Option<&Student> {
        self.roster.iter().find(|s| s.id == student_id)
    }

    pub fn policy(&self) -> &CheckInPolicy {
        &self.policy
    }

    pub fn stats(&self) -> Stats {
        self.ledger.stats()
    }

    pub fn attendance_pct(&self) -> u32 {
        self.ledger.attendance_pct()
    }

    /// QR payload for the live session. `None` when no session is active.
    pub fn qr_payload(&self) -> Option<QrPayload> {
        if !self.session.is_active() {
            return None;
        }
        QrPayload::for_session(&self.session)
    }

    pub fn export_csv(&self) -> String {
        export::to_csv(&self.ledger)
    }

    pub fn export_tsv(&self) -> String {
        export::to_tsv(&self.ledger)
    }

    pub fn export_file_name(&self) -> String {
        export::file_name(&self.session)
    }
}
