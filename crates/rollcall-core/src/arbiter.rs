//! Check-in arbitration: the only place attendance records change.

use crate::error::AttendanceError;
use crate::ledger::Ledger;
use crate::session::Session;
use crate::types::{Method, Status};
use chrono::{DateTime, Duration, Utc};

/// Grace period after session start before check-ins count as late.
pub const DEFAULT_LATE_AFTER_SECS: i64 = 10 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckInPolicy {
    pub late_after: Duration,
}

impl Default for CheckInPolicy {
    fn default() -> Self {
        Self {
            late_after: Duration::seconds(DEFAULT_LATE_AFTER_SECS),
        }
    }
}

/// An accepted check-in. Duplicates are accepted and flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub status: Status,
    pub duplicate: bool,
}

/// Classify a check-in made at `now` for a session started at `start`.
pub fn classify(start: DateTime<Utc>, now: DateTime<Utc>, policy: &CheckInPolicy) -> Status {
    if now - start > policy.late_after {
        Status::Late
    } else {
        Status::Present
    }
}

/// Record a check-in for `student_id`.
///
/// Rejects when the session is inactive or the student is not on the
/// ledger; in both cases the ledger is left untouched. A second check-in
/// for the same student overwrites the record and comes back flagged as
/// a duplicate.
pub fn submit(
    session: &Session,
    ledger: &mut Ledger,
    student_id: &str,
    method: Method,
    now: DateTime<Utc>,
    policy: &CheckInPolicy,
) -> Result<Accepted, AttendanceError> {
    let start = session
        .active_since()
        .ok_or(AttendanceError::NoActiveSession)?;
    let record = ledger
        .get_mut(student_id)
        .ok_or_else(|| AttendanceError::UnknownStudent(student_id.to_string()))?;

    let status = classify(start, now, policy);
    let duplicate = record.status != Status::Absent;

    record.status = status;
    record.method = Some(method);
    record.check_in_time = Some(now);
    record.duplicate = duplicate;

    tracing::info!(
        student = student_id,
        %method,
        %status,
        duplicate,
        "check-in accepted"
    );

    Ok(Accepted { status, duplicate })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::default_roster;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn live_session() -> (Session, Ledger, DateTime<Utc>) {
        let mut rng = StdRng::seed_from_u64(42);
        let t0 = Utc::now();
        (Session::start(&mut rng, t0), Ledger::new(&default_roster()), t0)
    }

    #[test]
    fn test_on_time_check_in_is_present() {
        let (session, mut ledger, t0) = live_session();
        let policy = CheckInPolicy::default();
        let now = t0 + Duration::minutes(2);
        let accepted = submit(&session, &mut ledger, "S002", Method::Qr, now, &policy).unwrap();
        assert_eq!(
            accepted,
            Accepted {
                status: Status::Present,
                duplicate: false
            }
        );
        let record = ledger.get("S002").unwrap();
        assert_eq!(record.method, Some(Method::Qr));
        assert_eq!(record.check_in_time, Some(now));
    }

    #[test]
    fn test_second_check_in_is_flagged_and_overwrites() {
        let (session, mut ledger, t0) = live_session();
        let policy = CheckInPolicy::default();
        submit(&session, &mut ledger, "S002", Method::Qr, t0 + Duration::minutes(2), &policy)
            .unwrap();
        let later = t0 + Duration::minutes(5);
        let accepted =
            submit(&session, &mut ledger, "S002", Method::Face, later, &policy).unwrap();
        assert_eq!(accepted.status, Status::Present);
        assert!(accepted.duplicate);
        let record = ledger.get("S002").unwrap();
        assert_eq!(record.method, Some(Method::Face));
        assert_eq!(record.check_in_time, Some(later));
        assert!(record.duplicate);
    }

    #[test]
    fn test_after_grace_period_is_late() {
        let (session, mut ledger, t0) = live_session();
        let accepted = submit(
            &session,
            &mut ledger,
            "S003",
            Method::Face,
            t0 + Duration::minutes(12),
            &CheckInPolicy::default(),
        )
        .unwrap();
        assert_eq!(accepted.status, Status::Late);
        assert!(!accepted.duplicate);
        assert_eq!(ledger.stats().late, 1);
    }

    #[test]
    fn test_exactly_at_grace_period_is_present() {
        let t0 = Utc::now();
        let policy = CheckInPolicy::default();
        assert_eq!(classify(t0, t0 + Duration::minutes(10), &policy), Status::Present);
        assert_eq!(
            classify(t0, t0 + Duration::minutes(10) + Duration::milliseconds(1), &policy),
            Status::Late
        );
    }

    #[test]
    fn test_late_then_on_time_duplicate_keeps_new_status() {
        let (session, mut ledger, t0) = live_session();
        let policy = CheckInPolicy {
            late_after: Duration::minutes(1),
        };
        submit(&session, &mut ledger, "S001", Method::Qr, t0 + Duration::minutes(3), &policy)
            .unwrap();
        let again =
            submit(&session, &mut ledger, "S001", Method::Qr, t0 + Duration::minutes(4), &policy)
                .unwrap();
        assert_eq!(again.status, Status::Late);
        assert!(again.duplicate);
    }

    #[test]
    fn test_unknown_student_rejected() {
        let (session, mut ledger, t0) = live_session();
        let before = ledger.records().to_vec();
        let err = submit(&session, &mut ledger, "S999", Method::Qr, t0, &CheckInPolicy::default())
            .unwrap_err();
        assert_eq!(err, AttendanceError::UnknownStudent("S999".into()));
        assert_eq!(ledger.records(), before.as_slice());
    }

    #[test]
    fn test_inactive_session_rejected_and_ledger_unchanged() {
        let (mut session, mut ledger, t0) = live_session();
        session.stop();
        let before = ledger.records().to_vec();
        let err = submit(&session, &mut ledger, "S001", Method::Face, t0, &CheckInPolicy::default())
            .unwrap_err();
        assert_eq!(err, AttendanceError::NoActiveSession);
        assert_eq!(ledger.records(), before.as_slice());
    }

    #[test]
    fn test_never_started_session_rejected() {
        let mut ledger = Ledger::new(&default_roster());
        let err = submit(
            &Session::default(),
            &mut ledger,
            "S001",
            Method::Qr,
            Utc::now(),
            &CheckInPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(err, AttendanceError::NoActiveSession);
    }
}
