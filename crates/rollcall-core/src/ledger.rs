//! Attendance ledger: one record per roster student, plus derived stats.

use crate::types::{AttendanceRecord, Stats, Status, Student};

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: Vec<AttendanceRecord>,
}

impl Ledger {
    /// A ledger with every roster student absent.
    pub fn new(roster: &[Student]) -> Self {
        let mut ledger = Self::default();
        ledger.reset(roster);
        ledger
    }

    /// Replace all records with fresh absent entries, in roster order.
    pub fn reset(&mut self, roster: &[Student]) {
        self.records = roster.iter().map(AttendanceRecord::absent).collect();
    }

    pub fn get(&self, student_id: &str) -> Option<&AttendanceRecord> {
        self.records.iter().find(|r| r.id == student_id)
    }

    /// Only the arbiter writes through this.
    pub(crate) fn get_mut(&mut self, student_id: &str) -> Option<&mut AttendanceRecord> {
        self.records.iter_mut().find(|r| r.id == student_id)
    }

    /// Records in roster order.
    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    /// Records ordered by student name, as shown on the dashboard.
    pub fn sorted_by_name(&self) -> Vec<&AttendanceRecord> {
        let mut sorted: Vec<&AttendanceRecord> = self.records.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        sorted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> Stats {
        let present = self
            .records
            .iter()
            .filter(|r| r.status != Status::Absent)
            .count();
        let late = self
            .records
            .iter()
            .filter(|r| r.status == Status::Late)
            .count();
        Stats {
            present,
            late,
            absent: self.records.len() - present,
        }
    }

    /// Percentage of the roster checked in, rounded to the nearest integer.
    ///
    /// An empty roster reports 0.
    pub fn attendance_pct(&self) -> u32 {
        let total = self.records.len().max(1);
        (100.0 * self.stats().present as f64 / total as f64).round() as u32
    }
}
