//! SQLite-backed ledger: registry tables, enrolled descriptors and
//! attendance rows.

use crate::error::{LedgerError, Result};
use crate::model::{
    AttendanceRecord, AttendanceWrite, Group, Identity, KeyScheme, LedgerStats, Session,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use rollcall_core::{Descriptor, GalleryEntry};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ledger_meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS groups (
        group_id TEXT PRIMARY KEY,
        name     TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS identities (
        identity_id        TEXT PRIMARY KEY,
        name               TEXT NOT NULL,
        email              TEXT,
        home_group         TEXT REFERENCES groups(group_id),
        descriptor         BLOB,
        descriptor_version TEXT,
        reference_image    BLOB,
        created_at         TEXT NOT NULL,
        updated_at         TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS identities_home_group ON identities(home_group);
    CREATE TABLE IF NOT EXISTS sessions (
        session_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        name         TEXT NOT NULL,
        session_date TEXT NOT NULL,
        start_time   TEXT,
        end_time     TEXT
    );
    CREATE TABLE IF NOT EXISTS session_groups (
        session_id INTEGER NOT NULL REFERENCES sessions(session_id),
        group_id   TEXT NOT NULL REFERENCES groups(group_id),
        PRIMARY KEY (session_id, group_id)
    );
    CREATE TABLE IF NOT EXISTS attendance (
        record_id       TEXT PRIMARY KEY,
        identity_id     TEXT NOT NULL REFERENCES identities(identity_id),
        group_id        TEXT NOT NULL REFERENCES groups(group_id),
        session_id      INTEGER REFERENCES sessions(session_id),
        attendance_date TEXT NOT NULL,
        first_checkin   TEXT NOT NULL,
        checkin_time    TEXT NOT NULL,
        status          TEXT NOT NULL CHECK (status IN ('PRESENT', 'ON_TIME', 'LATE')),
        confidence      REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS attendance_date ON attendance(attendance_date);
";

const META_KEY_SCHEME: &str = "key_scheme";
const META_GALLERY_VERSION: &str = "gallery_version";

const RECORD_COLUMNS: &str = "record_id, identity_id, group_id, session_id, attendance_date, \
     first_checkin, checkin_time, status, confidence";

/// Enrolled descriptors of one extractor version, plus the identities they
/// belong to as they were when the gallery was read.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    pub version: u64,
    pub entries: Vec<GalleryEntry>,
    pub identities: HashMap<String, Identity>,
}

pub struct Ledger {
    conn: Connection,
    scheme: KeyScheme,
}

impl Ledger {
    /// Open (creating if needed) the ledger at `path`. The key scheme is
    /// recorded on first open; later opens must agree with it.
    pub fn open(path: impl AsRef<Path>, scheme: KeyScheme) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), scheme = %scheme, "opening ledger");
        Self::init(conn, scheme)
    }

    pub fn open_in_memory(scheme: KeyScheme) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, scheme)
    }

    fn init(conn: Connection, scheme: KeyScheme) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM ledger_meta WHERE key = ?1",
                [META_KEY_SCHEME],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(stored) if stored != scheme.as_str() => {
                return Err(LedgerError::KeyingMismatch(format!(
                    "configured scheme {scheme} but ledger is keyed by {stored}"
                )));
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT INTO ledger_meta (key, value) VALUES (?1, ?2)",
                    params![META_KEY_SCHEME, scheme.as_str()],
                )?;
                tracing::info!(scheme = %scheme, "new ledger keyed");
            }
        }

        conn.execute(
            "INSERT OR IGNORE INTO ledger_meta (key, value) VALUES (?1, '0')",
            [META_GALLERY_VERSION],
        )?;
        conn.execute_batch(match scheme {
            KeyScheme::GroupDate => {
                "CREATE UNIQUE INDEX IF NOT EXISTS attendance_key \
                 ON attendance(identity_id, group_id, attendance_date);"
            }
            KeyScheme::Session => {
                "CREATE UNIQUE INDEX IF NOT EXISTS attendance_key \
                 ON attendance(identity_id, session_id);"
            }
        })?;

        Ok(Self { conn, scheme })
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    // ---------------------- registry ----------------------

    pub fn add_group(&self, group_id: &str, name: &str) -> Result<Group> {
        self.conn.execute(
            "INSERT INTO groups (group_id, name) VALUES (?1, ?2)
             ON CONFLICT (group_id) DO UPDATE SET name = excluded.name",
            params![group_id, name],
        )?;
        Ok(Group {
            group_id: group_id.to_string(),
            name: name.to_string(),
        })
    }

    pub fn groups(&self) -> Result<Vec<Group>> {
        let mut stmt = self
            .conn
            .prepare("SELECT group_id, name FROM groups ORDER BY group_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Group {
                group_id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn require_group(&self, group_id: &str) -> Result<()> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM groups WHERE group_id = ?1", [group_id], |row| row.get(0))
            .optional()?;
        match found {
            Some(_) => Ok(()),
            None => Err(LedgerError::UnknownGroup(group_id.to_string())),
        }
    }

    /// Insert or update an identity. An existing descriptor is kept.
    pub fn add_identity(&self, identity: &Identity) -> Result<()> {
        if let Some(group) = &identity.home_group {
            self.require_group(group)?;
        }
        let now = Utc::now().naive_utc();
        self.conn.execute(
            "INSERT INTO identities (identity_id, name, email, home_group, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (identity_id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                home_group = excluded.home_group,
                updated_at = excluded.updated_at",
            params![identity.identity_id, identity.name, identity.email, identity.home_group, now],
        )?;
        Ok(())
    }

    fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
        Ok(Identity {
            identity_id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            home_group: row.get(3)?,
        })
    }

    pub fn identity(&self, identity_id: &str) -> Result<Option<Identity>> {
        Ok(self
            .conn
            .query_row(
                "SELECT identity_id, name, email, home_group FROM identities WHERE identity_id = ?1",
                [identity_id],
                Self::identity_from_row,
            )
            .optional()?)
    }

    /// Identities whose home group is one of `groups`, in group order then
    /// by name.
    pub fn identities_in_groups(&self, groups: &[String]) -> Result<Vec<Identity>> {
        let mut stmt = self.conn.prepare(
            "SELECT identity_id, name, email, home_group FROM identities
             WHERE home_group = ?1 ORDER BY name, identity_id",
        )?;
        let mut out = Vec::new();
        for group in groups {
            let rows = stmt.query_map([group], Self::identity_from_row)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    pub fn add_session(
        &self,
        name: &str,
        date: NaiveDate,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
        groups: &[String],
    ) -> Result<Session> {
        for group in groups {
            self.require_group(group)?;
        }
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO sessions (name, session_date, start_time, end_time) VALUES (?1, ?2, ?3, ?4)",
            params![name, date, start_time, end_time],
        )?;
        let session_id = tx.last_insert_rowid();
        for group in groups {
            tx.execute(
                "INSERT OR IGNORE INTO session_groups (session_id, group_id) VALUES (?1, ?2)",
                params![session_id, group],
            )?;
        }
        tx.commit()?;

        self.session(session_id)?
            .ok_or(LedgerError::UnknownSession(session_id))
    }

    pub fn session(&self, session_id: i64) -> Result<Option<Session>> {
        let session = self
            .conn
            .query_row(
                "SELECT session_id, name, session_date, start_time, end_time
                 FROM sessions WHERE session_id = ?1",
                [session_id],
                |row| {
                    Ok(Session {
                        session_id: row.get(0)?,
                        name: row.get(1)?,
                        date: row.get(2)?,
                        start_time: row.get(3)?,
                        end_time: row.get(4)?,
                        groups: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut session) = session else {
            return Ok(None);
        };
        let mut stmt = self
            .conn
            .prepare("SELECT group_id FROM session_groups WHERE session_id = ?1 ORDER BY group_id")?;
        session.groups = stmt
            .query_map([session_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(Some(session))
    }

    // ---------------------- gallery ----------------------

    pub fn gallery_version(&self) -> Result<u64> {
        let raw: String = self.conn.query_row(
            "SELECT value FROM ledger_meta WHERE key = ?1",
            [META_GALLERY_VERSION],
            |row| row.get(0),
        )?;
        raw.trim().parse().map_err(|_| LedgerError::InvalidValue {
            kind: "gallery version",
            value: raw,
        })
    }

    /// Store (or overwrite) an identity's descriptor and reference image and
    /// bump the gallery version. Returns the new version.
    pub fn enroll_descriptor(
        &self,
        identity_id: &str,
        descriptor: &Descriptor,
        reference_image: Option<&[u8]>,
    ) -> Result<u64> {
        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE identities
             SET descriptor = ?2, descriptor_version = ?3, reference_image = ?4, updated_at = ?5
             WHERE identity_id = ?1",
            params![
                identity_id,
                descriptor.to_bytes(),
                descriptor.version,
                reference_image,
                Utc::now().naive_utc()
            ],
        )?;
        if updated == 0 {
            return Err(LedgerError::UnknownIdentity(identity_id.to_string()));
        }
        tx.execute(
            "UPDATE ledger_meta SET value = CAST(value AS INTEGER) + 1 WHERE key = ?1",
            [META_GALLERY_VERSION],
        )?;
        tx.commit()?;

        let version = self.gallery_version()?;
        tracing::info!(identity = identity_id, gallery_version = version, "descriptor enrolled");
        Ok(version)
    }

    /// Forget an identity's descriptor and reference image and bump the
    /// gallery version. The identity and its attendance rows are kept.
    /// Returns the new version.
    pub fn remove_descriptor(&self, identity_id: &str) -> Result<u64> {
        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE identities
             SET descriptor = NULL, descriptor_version = NULL, reference_image = NULL, updated_at = ?2
             WHERE identity_id = ?1",
            params![identity_id, Utc::now().naive_utc()],
        )?;
        if updated == 0 {
            return Err(LedgerError::UnknownIdentity(identity_id.to_string()));
        }
        tx.execute(
            "UPDATE ledger_meta SET value = CAST(value AS INTEGER) + 1 WHERE key = ?1",
            [META_GALLERY_VERSION],
        )?;
        tx.commit()?;

        let version = self.gallery_version()?;
        tracing::info!(identity = identity_id, gallery_version = version, "descriptor removed");
        Ok(version)
    }

    /// Read every enrolled descriptor stamped with `descriptor_version`.
    /// Descriptors of other versions are left out.
    pub fn load_gallery(&self, descriptor_version: &str) -> Result<Gallery> {
        let version = self.gallery_version()?;
        let mut stmt = self.conn.prepare(
            "SELECT identity_id, name, email, home_group, descriptor, descriptor_version
             FROM identities WHERE descriptor IS NOT NULL ORDER BY identity_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let identity = Self::identity_from_row(row)?;
            let bytes: Vec<u8> = row.get(4)?;
            let stored_version: Option<String> = row.get(5)?;
            Ok((identity, bytes, stored_version))
        })?;

        let mut gallery = Gallery {
            version,
            ..Default::default()
        };
        for row in rows {
            let (identity, bytes, stored_version) = row?;
            if stored_version.as_deref() != Some(descriptor_version) {
                tracing::debug!(
                    identity = %identity.identity_id,
                    stored = ?stored_version,
                    "skipping descriptor from another extractor version"
                );
                continue;
            }
            let Some(descriptor) = Descriptor::from_bytes(&bytes, descriptor_version) else {
                tracing::warn!(identity = %identity.identity_id, len = bytes.len(), "corrupt descriptor blob");
                continue;
            };
            gallery.entries.push(GalleryEntry {
                identity_id: identity.identity_id.clone(),
                label: identity.name.clone(),
                descriptor,
            });
            gallery.identities.insert(identity.identity_id.clone(), identity);
        }
        tracing::debug!(entries = gallery.entries.len(), version, "gallery loaded");
        Ok(gallery)
    }

    // ---------------------- attendance ----------------------

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
        Ok(AttendanceRecord {
            record_id: row.get(0)?,
            identity_id: row.get(1)?,
            group_id: row.get(2)?,
            session_id: row.get(3)?,
            attendance_date: row.get(4)?,
            first_checkin: row.get(5)?,
            checkin_time: row.get(6)?,
            status: row.get(7)?,
            confidence: row.get::<_, f64>(8)? as f32,
        })
    }

    /// Insert the row for this key, or update the latest check-in time,
    /// status and confidence of the existing one. A later check-in that
    /// names a session also moves the row to that session.
    pub fn upsert_attendance(&self, write: &AttendanceWrite) -> Result<AttendanceRecord> {
        let conflict = match self.scheme {
            KeyScheme::GroupDate => "(identity_id, group_id, attendance_date)",
            KeyScheme::Session => "(identity_id, session_id)",
        };
        let sql = format!(
            "INSERT INTO attendance ({RECORD_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8)
             ON CONFLICT {conflict} DO UPDATE SET
                session_id = COALESCE(excluded.session_id, attendance.session_id),
                checkin_time = excluded.checkin_time,
                status = excluded.status,
                confidence = excluded.confidence
             RETURNING {RECORD_COLUMNS}"
        );
        let record = self.conn.query_row(
            &sql,
            params![
                uuid::Uuid::new_v4().to_string(),
                write.identity_id,
                write.group_id,
                write.session_id,
                write.attendance_date,
                write.at,
                write.status,
                write.confidence as f64,
            ],
            Self::record_from_row,
        )?;
        Ok(record)
    }

    fn query_records(&self, sql: &str, args: Vec<rusqlite::types::Value>) -> Result<Vec<AttendanceRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args), Self::record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[cfg(test)]
    pub(crate) fn records_for_identity(&self, identity_id: &str) -> Result<Vec<AttendanceRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM attendance WHERE identity_id = ?1
                 ORDER BY attendance_date, checkin_time"
            ),
            vec![identity_id.to_string().into()],
        )
    }

    pub fn records_on_date(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM attendance WHERE attendance_date = ?1
                 ORDER BY checkin_time"
            ),
            vec![date.format("%F").to_string().into()],
        )
    }

    pub fn records_for_session(&self, session_id: i64) -> Result<Vec<AttendanceRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM attendance WHERE session_id = ?1
                 ORDER BY checkin_time"
            ),
            vec![session_id.into()],
        )
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(LedgerStats {
            key_scheme: self.scheme,
            gallery_version: self.gallery_version()?,
            groups: count("SELECT COUNT(*) FROM groups")?,
            identities: count("SELECT COUNT(*) FROM identities")?,
            enrolled: count("SELECT COUNT(*) FROM identities WHERE descriptor IS NOT NULL")?,
            sessions: count("SELECT COUNT(*) FROM sessions")?,
            records: count("SELECT COUNT(*) FROM attendance")?,
        })
    }
}
