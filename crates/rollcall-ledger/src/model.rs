//! Ledger data types.

use crate::error::LedgerError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How attendance rows are keyed. Fixed when the ledger is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// One row per (identity, group, date).
    #[default]
    GroupDate,
    /// One row per (identity, session).
    Session,
}

impl KeyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScheme::GroupDate => "group_date",
            KeyScheme::Session => "session",
        }
    }
}

impl fmt::Display for KeyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyScheme {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "group_date" => Ok(KeyScheme::GroupDate),
            "session" => Ok(KeyScheme::Session),
            other => Err(LedgerError::InvalidValue {
                kind: "key scheme",
                value: other.to_string(),
            }),
        }
    }
}

/// Status stored on an attendance row. Absence is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    OnTime,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::OnTime => "ON_TIME",
            AttendanceStatus::Late => "LATE",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRESENT" => Ok(AttendanceStatus::Present),
            "ON_TIME" => Ok(AttendanceStatus::OnTime),
            "LATE" => Ok(AttendanceStatus::Late),
            other => Err(LedgerError::InvalidValue {
                kind: "attendance status",
                value: other.to_string(),
            }),
        }
    }
}

impl ToSql for AttendanceStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttendanceStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: LedgerError| FromSqlError::Other(Box::new(e)))
    }
}

/// Status as shown in a report, where absences are synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Present,
    OnTime,
    Late,
    Absent,
}

impl From<AttendanceStatus> for ReportStatus {
    fn from(status: AttendanceStatus) -> Self {
        match status {
            AttendanceStatus::Present => ReportStatus::Present,
            AttendanceStatus::OnTime => ReportStatus::OnTime,
            AttendanceStatus::Late => ReportStatus::Late,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub group_id: String,
    pub name: String,
}

/// An enrolled (or enrollable) person. Membership is by home group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub identity_id: String,
    pub name: String,
    pub email: Option<String>,
    pub home_group: Option<String>,
}

/// A scheduled window, attended by one or more groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub session_id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    /// Associated group ids, ascending.
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub record_id: String,
    pub identity_id: String,
    pub group_id: String,
    pub session_id: Option<i64>,
    pub attendance_date: NaiveDate,
    pub first_checkin: NaiveDateTime,
    pub checkin_time: NaiveDateTime,
    pub status: AttendanceStatus,
    pub confidence: f32,
}

/// Values for one attendance write.
#[derive(Debug, Clone)]
pub struct AttendanceWrite {
    pub identity_id: String,
    pub group_id: String,
    pub session_id: Option<i64>,
    pub attendance_date: NaiveDate,
    pub at: NaiveDateTime,
    pub status: AttendanceStatus,
    pub confidence: f32,
}

/// Caller-supplied group restriction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GroupFilter {
    #[default]
    Any,
    Single(String),
    List(Vec<String>),
}

impl GroupFilter {
    /// Build from a single group id and/or a comma-separated list. A
    /// non-empty list wins over the single id.
    pub fn from_params(single: Option<&str>, list: Option<&str>) -> Self {
        let groups = list.map(parse_group_list).unwrap_or_default();
        if !groups.is_empty() {
            return GroupFilter::List(groups);
        }
        match single.map(str::trim) {
            Some(g) if !g.is_empty() => GroupFilter::Single(g.to_string()),
            _ => GroupFilter::Any,
        }
    }

    /// Explicit groups without repeats, first occurrence first, or `None`
    /// when unrestricted.
    pub fn groups(&self) -> Option<Vec<String>> {
        match self {
            GroupFilter::Any => None,
            GroupFilter::Single(g) => Some(vec![g.clone()]),
            GroupFilter::List(gs) => Some(dedup_groups(gs.iter().cloned())),
        }
    }
}

/// Drop repeated group ids, keeping first-seen order.
pub fn dedup_groups(groups: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for group in groups {
        if !out.contains(&group) {
            out.push(group);
        }
    }
    out
}

/// Split a comma-separated list, trimming entries, dropping empties and
/// duplicates, first occurrence first.
pub fn parse_group_list(raw: &str) -> Vec<String> {
    dedup_groups(
        raw.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportScope {
    Session(i64),
    Date(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub identity_id: String,
    pub name: String,
    pub group_id: String,
    pub status: ReportStatus,
    pub checkin_time: Option<NaiveDateTime>,
    pub confidence: Option<f32>,
}

/// Row counts and metadata for the `status` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub key_scheme: KeyScheme,
    pub gallery_version: u64,
    pub groups: u64,
    pub identities: u64,
    pub enrolled: u64,
    pub sessions: u64,
    pub records: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_list_trims_and_dedupes() {
        assert_eq!(parse_group_list(" CS1, CS2 ,,CS1, CS3 "), vec!["CS1", "CS2", "CS3"]);
        assert!(parse_group_list(" , ,").is_empty());
    }

    #[test]
    fn test_group_filter_precedence() {
        assert_eq!(
            GroupFilter::from_params(Some("A"), Some("B, C")),
            GroupFilter::List(vec!["B".into(), "C".into()])
        );
        assert_eq!(GroupFilter::from_params(Some(" A "), Some(" , ")), GroupFilter::Single("A".into()));
        assert_eq!(GroupFilter::from_params(Some(""), None), GroupFilter::Any);
        assert_eq!(GroupFilter::from_params(None, None).groups(), None);
    }

    #[test]
    fn test_list_filter_drops_repeats() {
        let filter = GroupFilter::List(vec!["CS2".into(), "CS1".into(), "CS2".into()]);
        assert_eq!(filter.groups(), Some(vec!["CS2".to_string(), "CS1".to_string()]));
    }

    #[test]
    fn test_status_strings() {
        for s in [AttendanceStatus::Present, AttendanceStatus::OnTime, AttendanceStatus::Late] {
            assert_eq!(s.as_str().parse::<AttendanceStatus>().unwrap(), s);
        }
        assert!("ABSENT".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn test_key_scheme_parse() {
        assert_eq!("session".parse::<KeyScheme>().unwrap(), KeyScheme::Session);
        assert_eq!(" group_date ".parse::<KeyScheme>().unwrap(), KeyScheme::GroupDate);
        assert!("by_week".parse::<KeyScheme>().is_err());
    }

    #[test]
    fn test_report_status_serializes_upper() {
        assert_eq!(serde_json::to_string(&ReportStatus::OnTime).unwrap(), "\"ON_TIME\"");
        assert_eq!(serde_json::to_string(&KeyScheme::GroupDate).unwrap(), "\"group_date\"");
        assert_eq!(ReportStatus::from(AttendanceStatus::Late), ReportStatus::Late);
    }
}
