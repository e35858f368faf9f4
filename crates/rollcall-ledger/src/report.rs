//! Attendance reports with synthesized absences.

use crate::error::{LedgerError, Result};
use crate::model::{dedup_groups, AttendanceRecord, GroupFilter, KeyScheme, ReportRow, ReportScope, ReportStatus};
use crate::store::Ledger;
use std::collections::HashMap;

/// One row per identity in the reported groups. Identities with no record
/// for the scope appear once as ABSENT.
pub fn report(ledger: &Ledger, scope: ReportScope, filter: &GroupFilter) -> Result<Vec<ReportRow>> {
    let session = match scope {
        ReportScope::Session(id) => Some(ledger.session(id)?.ok_or(LedgerError::UnknownSession(id))?),
        ReportScope::Date(_) => None,
    };

    let groups = dedup_groups(match (filter.groups(), &session) {
        (Some(groups), _) => groups,
        (None, Some(session)) => session.groups.clone(),
        (None, None) => ledger.groups()?.into_iter().map(|g| g.group_id).collect(),
    });
    if groups.is_empty() {
        return Err(LedgerError::NoEligibleGroups);
    }

    let records = match (&session, scope) {
        (Some(s), _) if ledger.scheme() == KeyScheme::Session => ledger.records_for_session(s.session_id)?,
        (Some(s), _) => ledger.records_on_date(s.date)?,
        (None, ReportScope::Date(date)) => ledger.records_on_date(date)?,
        (None, ReportScope::Session(id)) => return Err(LedgerError::UnknownSession(id)),
    };

    // Latest check-in wins when a date spans several session rows.
    let mut latest: HashMap<(&str, &str), &AttendanceRecord> = HashMap::new();
    for record in &records {
        latest
            .entry((record.identity_id.as_str(), record.group_id.as_str()))
            .and_modify(|kept| {
                if record.checkin_time > kept.checkin_time {
                    *kept = record;
                }
            })
            .or_insert(record);
    }

    let identities = ledger.identities_in_groups(&groups)?;
    let mut rows = Vec::with_capacity(identities.len());
    for identity in identities {
        let Some(group_id) = identity.home_group else {
            continue;
        };
        let found = latest
            .get(&(identity.identity_id.as_str(), group_id.as_str()))
            .copied();
        let row = match found {
            Some(record) => ReportRow {
                status: ReportStatus::from(record.status),
                checkin_time: Some(record.checkin_time),
                confidence: Some(record.confidence),
                identity_id: identity.identity_id,
                name: identity.name,
                group_id,
            },
            None => ReportRow {
                identity_id: identity.identity_id,
                name: identity.name,
                group_id,
                status: ReportStatus::Absent,
                checkin_time: None,
                confidence: None,
            },
        };
        rows.push(row);
    }

    tracing::debug!(
        groups = groups.len(),
        rows = rows.len(),
        absent = rows.iter().filter(|r| r.status == ReportStatus::Absent).count(),
        "report built"
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Session;
    use crate::resolver::{resolve_checkin, CheckinContext};
    use crate::store::tests::{at, date, seeded};
    use chrono::NaiveTime;
    use std::collections::HashSet;

    fn session(ledger: &Ledger, groups: &[&str]) -> Session {
        let groups: Vec<String> = groups.iter().map(|g| g.to_string()).collect();
        ledger
            .add_session("Morning", date("2026-03-02"), NaiveTime::from_hms_opt(8, 0, 0), None, &groups)
            .unwrap()
    }

    fn check_in(ledger: &Ledger, id: &str, session: Option<&Session>, when: &str) {
        let identity = ledger.identity(id).unwrap().unwrap();
        let ctx = CheckinContext::new(session.cloned(), GroupFilter::Any, at(when));
        resolve_checkin(ledger, &identity, &ctx, 0.8).unwrap();
    }

    fn status_of<'a>(rows: &'a [ReportRow], id: &str) -> &'a ReportStatus {
        &rows.iter().find(|r| r.identity_id == id).unwrap().status
    }

    #[test]
    fn test_absent_completeness() {
        let ledger = seeded(KeyScheme::GroupDate);
        let s = session(&ledger, &["CS1", "CS2"]);
        check_in(&ledger, "s1", Some(&s), "2026-03-02 08:05:00");
        check_in(&ledger, "s3", Some(&s), "2026-03-02 08:40:00");

        let rows = report(&ledger, ReportScope::Session(s.session_id), &GroupFilter::Any).unwrap();
        assert_eq!(rows.len(), 4);
        let ids: HashSet<&str> = rows.iter().map(|r| r.identity_id.as_str()).collect();
        assert_eq!(ids.len(), 4, "duplicate rows: {rows:?}");

        assert_eq!(status_of(&rows, "s1"), &ReportStatus::OnTime);
        assert_eq!(status_of(&rows, "s2"), &ReportStatus::Absent);
        assert_eq!(status_of(&rows, "s3"), &ReportStatus::Late);
        assert_eq!(status_of(&rows, "s4"), &ReportStatus::Absent);

        let absent = rows.iter().find(|r| r.identity_id == "s2").unwrap();
        assert_eq!(absent.confidence, None);
        assert_eq!(absent.checkin_time, None);
    }

    #[test]
    fn test_repeated_checkins_single_row() {
        let ledger = seeded(KeyScheme::GroupDate);
        let s = session(&ledger, &["CS1"]);
        for _ in 0..3 {
            check_in(&ledger, "s2", Some(&s), "2026-03-02 08:01:00");
        }
        let rows = report(&ledger, ReportScope::Session(s.session_id), &GroupFilter::Any).unwrap();
        assert_eq!(rows.iter().filter(|r| r.identity_id == "s2").count(), 1);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_filter_overrides_session_groups() {
        let ledger = seeded(KeyScheme::GroupDate);
        let s = session(&ledger, &["CS1", "CS2"]);
        let rows = report(
            &ledger,
            ReportScope::Session(s.session_id),
            &GroupFilter::from_params(None, Some("CS2")),
        )
        .unwrap();
        assert!(rows.iter().all(|r| r.group_id == "CS2"));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_date_scope_covers_all_groups() {
        let ledger = seeded(KeyScheme::GroupDate);
        check_in(&ledger, "s4", None, "2026-03-05 11:00:00");
        let rows = report(&ledger, ReportScope::Date(date("2026-03-05")), &GroupFilter::Any).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(status_of(&rows, "s4"), &ReportStatus::Present);

        let other_day = report(&ledger, ReportScope::Date(date("2026-03-06")), &GroupFilter::Any).unwrap();
        assert!(other_day.iter().all(|r| r.status == ReportStatus::Absent));
    }

    #[test]
    fn test_session_keyed_report_uses_session_rows() {
        let ledger = seeded(KeyScheme::Session);
        let first = session(&ledger, &["CS1"]);
        let second = session(&ledger, &["CS1"]);
        check_in(&ledger, "s1", Some(&first), "2026-03-02 08:05:00");

        let rows = report(&ledger, ReportScope::Session(second.session_id), &GroupFilter::Any).unwrap();
        assert_eq!(status_of(&rows, "s1"), &ReportStatus::Absent);
        let rows = report(&ledger, ReportScope::Session(first.session_id), &GroupFilter::Any).unwrap();
        assert_eq!(status_of(&rows, "s1"), &ReportStatus::OnTime);
    }

    #[test]
    fn test_session_without_groups() {
        let ledger = seeded(KeyScheme::GroupDate);
        let s = session(&ledger, &[]);
        let err = report(&ledger, ReportScope::Session(s.session_id), &GroupFilter::Any).unwrap_err();
        assert!(matches!(err, LedgerError::NoEligibleGroups));
    }

    #[test]
    fn test_repeated_group_ids_report_each_identity_once() {
        let ledger = seeded(KeyScheme::GroupDate);
        check_in(&ledger, "s1", None, "2026-03-02 08:05:00");
        let filter = GroupFilter::List(vec!["CS1".into(), "CS1".into(), "CS2".into(), "CS1".into()]);
        let rows = report(&ledger, ReportScope::Date(date("2026-03-02")), &filter).unwrap();

        assert_eq!(rows.len(), 4);
        for id in ["s1", "s2", "s3", "s4"] {
            assert_eq!(rows.iter().filter(|r| r.identity_id == id).count(), 1, "{id} in {rows:?}");
        }
        assert_eq!(status_of(&rows, "s1"), &ReportStatus::Present);
        assert_eq!(rows[0].group_id, "CS1");
    }

    #[test]
    fn test_unknown_session() {
        let ledger = seeded(KeyScheme::GroupDate);
        let err = report(&ledger, ReportScope::Session(42), &GroupFilter::Any).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownSession(42)));
    }
}
