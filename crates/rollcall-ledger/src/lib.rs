//! rollcall-ledger: Attendance ledger on SQLite.
//!
//! Holds the registry (groups, identities, sessions), enrolled descriptors
//! and attendance rows. Check-ins go through [`resolve_checkin`]; absences
//! only ever exist in [`report`] output.

pub mod error;
pub mod model;
pub mod report;
pub mod resolver;
pub mod store;

pub use error::LedgerError;
pub use model::{
    parse_group_list, AttendanceRecord, AttendanceStatus, Group, GroupFilter, Identity, KeyScheme, LedgerStats,
    ReportRow, ReportScope, ReportStatus, Session,
};
pub use report::report;
pub use resolver::{resolve_checkin, CheckinContext, Resolution, SkipReason, DEFAULT_LATE_AFTER_MINUTES};
pub use store::{Gallery, Ledger};
