//! CSV and tab-separated exports of the attendance ledger.

use crate::ledger::Ledger;
use crate::session::Session;
use crate::types::AttendanceRecord;
use chrono::{DateTime, Local, Utc};

pub const HEADERS: [&str; 5] = ["Student ID", "Name", "Status", "Method", "Check-In Time"];

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// File name for a CSV export: the session id, or `attendance`.
pub fn file_name(session: &Session) -> String {
    format!("{}.csv", session.id().unwrap_or("attendance"))
}

/// Quoted CSV, one row per student sorted by name.
pub fn to_csv(ledger: &Ledger) -> String {
    render(ledger, |row| {
        row.iter()
            .map(|cell| format!("\"{}\"", cell.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(",")
    })
}

/// Tab-separated text for pasting into a spreadsheet. No quoting.
pub fn to_tsv(ledger: &Ledger) -> String {
    render(ledger, |row| row.join("\t"))
}

fn render(ledger: &Ledger, line: impl Fn(&[String]) -> String) -> String {
    let header: Vec<String> = HEADERS.iter().map(|h| h.to_string()).collect();
    std::iter::once(header)
        .chain(ledger.sorted_by_name().into_iter().map(row))
        .map(|r| line(r.as_slice()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn row(record: &AttendanceRecord) -> Vec<String> {
    vec![
        record.id.clone(),
        record.name.clone(),
        record.status.to_string(),
        record.method.map(|m| m.to_string()).unwrap_or_default(),
        record
            .check_in_time
            .map(format_time)
            .unwrap_or_default(),
    ]
}

fn format_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format(TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::{submit, CheckInPolicy};
    use crate::types::{Method, Student};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn roster() -> Vec<Student> {
        vec![
            Student::new("S2", "Zoe \"Z\" Park"),
            Student::new("S1", "Adam, Jr."),
        ]
    }

    #[test]
    fn test_file_name_defaults() {
        assert_eq!(file_name(&Session::default()), "attendance.csv");
        let mut session = Session::default();
        session.id = Some("SES-ABC123".into());
        assert_eq!(file_name(&session), "SES-ABC123.csv");
    }

    #[test]
    fn test_csv_quotes_and_sorts() {
        let ledger = Ledger::new(&roster());
        let csv = to_csv(&ledger);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#""Student ID","Name","Status","Method","Check-In Time""#,
                r#""S1","Adam, Jr.","absent","","""#,
                r#""S2","Zoe ""Z"" Park","absent","","""#,
            ]
        );
    }

    #[test]
    fn test_tsv_has_no_quoting() {
        let ledger = Ledger::new(&roster());
        let tsv = to_tsv(&ledger);
        let lines: Vec<&str> = tsv.lines().collect();
        assert_eq!(lines[0], "Student ID\tName\tStatus\tMethod\tCheck-In Time");
        assert_eq!(lines[1], "S1\tAdam, Jr.\tabsent\t\t");
        assert_eq!(lines[2], "S2\tZoe \"Z\" Park\tabsent\t\t");
    }

    #[test]
    fn test_checked_in_row_has_method_and_time() {
        let roster = roster();
        let mut ledger = Ledger::new(&roster);
        let t0 = Utc::now();
        let session = Session::start(&mut StdRng::seed_from_u64(1), t0);
        submit(&session, &mut ledger, "S1", Method::Qr, t0, &CheckInPolicy::default()).unwrap();

        let tsv = to_tsv(&ledger);
        let cells: Vec<&str> = tsv.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(cells[2], "present");
        assert_eq!(cells[3], "qr");
        assert_eq!(cells[4], format_time(t0));
    }

    #[test]
    fn test_empty_ledger_is_header_only() {
        assert_eq!(to_tsv(&Ledger::new(&[])).lines().count(), 1);
    }
}
