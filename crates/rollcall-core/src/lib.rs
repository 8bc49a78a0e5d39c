//! rollcall-core — Classroom attendance state machine.
//!
//! Session lifecycle, check-in arbitration with late/duplicate
//! classification, the attendance ledger, and the pixel-difference
//! heuristics that gate face check-ins.

pub mod arbiter;
pub mod classroom;
pub mod credential;
pub mod error;
pub mod export;
pub mod ledger;
pub mod session;
pub mod similarity;
pub mod templates;
pub mod types;

pub use arbiter::{Accepted, CheckInPolicy};
pub use classroom::Classroom;
pub use credential::QrPayload;
pub use error::AttendanceError;
pub use ledger::Ledger;
pub use session::Session;
pub use similarity::SimilarityPolicy;
pub use templates::{MemoryTemplateStore, StoreError, TemplateStore, TEMPLATE_NAMESPACE};
pub use types::{default_roster, AttendanceRecord, Method, Stats, Status, Student};
