//! Attendance resolution: turns a recognized identity plus check-in context
//! into an idempotent ledger write.

use crate::error::{LedgerError, Result};
use crate::model::{
    dedup_groups, AttendanceRecord, AttendanceStatus, AttendanceWrite, GroupFilter, Identity, KeyScheme, Session,
};
use crate::store::Ledger;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

/// Minutes after a session's start during which a check-in is on time.
pub const DEFAULT_LATE_AFTER_MINUTES: i64 = 15;

/// Where and when a check-in happens.
#[derive(Debug, Clone)]
pub struct CheckinContext {
    pub session: Option<Session>,
    pub filter: GroupFilter,
    pub at: NaiveDateTime,
    pub late_after: Duration,
}

impl CheckinContext {
    pub fn new(session: Option<Session>, filter: GroupFilter, at: NaiveDateTime) -> Self {
        Self {
            session,
            filter,
            at,
            late_after: Duration::minutes(DEFAULT_LATE_AFTER_MINUTES),
        }
    }

    pub fn with_late_after(mut self, late_after: Duration) -> Self {
        self.late_after = late_after;
        self
    }

    /// Explicit list, then single group, then the session's groups. Empty
    /// means the identity's own home group is accepted.
    pub fn eligible_groups(&self) -> Vec<String> {
        if let Some(groups) = self.filter.groups() {
            return groups;
        }
        dedup_groups(self.session.iter().flat_map(|s| s.groups.iter().cloned()))
    }

    /// A session-keyed ledger cannot key a check-in that has no session.
    pub fn ensure_keyable(&self, scheme: KeyScheme) -> Result<()> {
        if scheme == KeyScheme::Session && self.session.is_none() {
            return Err(LedgerError::KeyingMismatch(
                "session-keyed ledger requires a session for check-in".to_string(),
            ));
        }
        Ok(())
    }

    /// ON_TIME up to and including start + grace, LATE afterwards, PRESENT
    /// when there is no session start to compare against.
    pub fn status(&self) -> AttendanceStatus {
        let Some(session) = &self.session else {
            return AttendanceStatus::Present;
        };
        let Some(start) = session.start_time else {
            return AttendanceStatus::Present;
        };
        if self.at <= session.date.and_time(start) + self.late_after {
            AttendanceStatus::OnTime
        } else {
            AttendanceStatus::Late
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoHomeGroup,
    NotInEligibleGroups,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Recorded(AttendanceRecord),
    Skipped { identity_id: String, reason: SkipReason },
}

/// Record a check-in for `identity`. Identities outside the eligible groups
/// are skipped, not rejected. Repeating a check-in updates the same row.
pub fn resolve_checkin(
    ledger: &Ledger,
    identity: &Identity,
    ctx: &CheckinContext,
    confidence: f32,
) -> Result<Resolution> {
    ctx.ensure_keyable(ledger.scheme())?;

    let Some(home) = identity.home_group.as_deref() else {
        tracing::debug!(identity = %identity.identity_id, "identity has no home group, skipping");
        return Ok(Resolution::Skipped {
            identity_id: identity.identity_id.clone(),
            reason: SkipReason::NoHomeGroup,
        });
    };

    let eligible = ctx.eligible_groups();
    if !eligible.is_empty() && !eligible.iter().any(|g| g == home) {
        tracing::debug!(
            identity = %identity.identity_id,
            home,
            eligible = ?eligible,
            "identity not in an eligible group, skipping"
        );
        return Ok(Resolution::Skipped {
            identity_id: identity.identity_id.clone(),
            reason: SkipReason::NotInEligibleGroups,
        });
    }

    let status = ctx.status();
    let record = ledger.upsert_attendance(&AttendanceWrite {
        identity_id: identity.identity_id.clone(),
        group_id: home.to_string(),
        session_id: ctx.session.as_ref().map(|s| s.session_id),
        attendance_date: ctx.at.date(),
        at: ctx.at,
        status,
        confidence,
    })?;

    tracing::info!(
        identity = %record.identity_id,
        group = %record.group_id,
        status = %record.status,
        confidence,
        "attendance recorded"
    );
    Ok(Resolution::Recorded(record))
}
