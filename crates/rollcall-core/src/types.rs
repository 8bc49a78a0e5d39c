use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A roster entry. Created at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
}

impl Student {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The roster used when no roster file is configured.
pub fn default_roster() -> Vec<Student> {
    vec![
        Student::new("S001", "Ava Johnson"),
        Student::new("S002", "Liam Smith"),
        Student::new("S003", "Noah Williams"),
        Student::new("S004", "Emma Brown"),
        Student::new("S005", "Olivia Jones"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Absent,
    Present,
    Late,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Absent => "absent",
            Status::Present => "present",
            Status::Late => "late",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a student checked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Face,
    Qr,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Face => "face",
            Method::Qr => "qr",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-student attendance state for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub method: Option<Method>,
    pub check_in_time: Option<DateTime<Utc>>,
    pub duplicate: bool,
}

impl AttendanceRecord {
    /// A fresh record: absent, no method, no time, not duplicate.
    pub fn absent(student: &Student) -> Self {
        Self {
            id: student.id.clone(),
            name: student.name.clone(),
            status: Status::Absent,
            method: None,
            check_in_time: None,
            duplicate: false,
        }
    }
}

/// Aggregate counts derived from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Records with any non-absent status (late included).
    pub present: usize,
    pub late: usize,
    pub absent: usize,
}
