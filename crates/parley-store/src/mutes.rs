use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::UserId;

use crate::database::{conversion_error, decode_ts, encode_ts, Database};
use crate::error::Result;
use crate::models::MuteRecord;

impl Database {
    /// Insert or overwrite the mute for a user (last write wins).
    pub fn upsert_mute(&self, record: &MuteRecord) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO mutes (user_id, mute_end, reason, escalation_level, is_admin, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.user_id.as_str(),
                encode_ts(&record.mute_end),
                record.reason,
                record.escalation_level,
                record.is_admin as i32,
                encode_ts(&record.created_at),
            ],
        )?;
        Ok(())
    }

    /// Fetch the stored mute for a user, expired or not.
    pub fn get_mute(&self, user: &UserId) -> Result<Option<MuteRecord>> {
        let record = self
            .conn()
            .query_row(
                "SELECT user_id, mute_end, reason, escalation_level, is_admin, created_at
                 FROM mutes WHERE user_id = ?1",
                params![user.as_str()],
                row_to_mute,
            )
            .optional()?;
        Ok(record)
    }

    pub fn delete_mute(&self, user: &UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM mutes WHERE user_id = ?1", params![user.as_str()])?;
        Ok(affected > 0)
    }

    /// Delete every mute whose end is at or before `now`.
    pub fn purge_expired_mutes(&self, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM mutes WHERE mute_end <= ?1",
            params![encode_ts(&now)],
        )?;
        Ok(affected)
    }
}

fn row_to_mute(row: &rusqlite::Row<'_>) -> rusqlite::Result<MuteRecord> {
    let user_str: String = row.get(0)?;
    let end_str: String = row.get(1)?;
    let reason: String = row.get(2)?;
    let escalation_level: u32 = row.get(3)?;
    let is_admin_int: i32 = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(MuteRecord {
        user_id: UserId::new(user_str).map_err(|e| conversion_error(0, e))?,
        mute_end: decode_ts(1, &end_str)?,
        reason,
        escalation_level,
        is_admin: is_admin_int != 0,
        created_at: decode_ts(5, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn mute(user: &str, end: DateTime<Utc>, admin: bool) -> MuteRecord {
        MuteRecord {
            user_id: UserId::new(user).unwrap(),
            mute_end: end,
            reason: "spam".to_string(),
            escalation_level: 1,
            is_admin: admin,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_overwrites() {
        let (db, _dir) = open();
        let now = Utc::now();
        let long = mute("alice", now + Duration::hours(1), false);
        let short = mute("alice", now + Duration::minutes(1), true);

        db.upsert_mute(&long).unwrap();
        db.upsert_mute(&short).unwrap();

        let stored = db.get_mute(&long.user_id).unwrap().unwrap();
        assert_eq!(stored, short);
        let rows: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM mutes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn purge_only_expired() {
        let (db, _dir) = open();
        let now = Utc::now();
        db.upsert_mute(&mute("alice", now - Duration::seconds(1), false))
            .unwrap();
        db.upsert_mute(&mute("bob", now, false)).unwrap();
        db.upsert_mute(&mute("carol", now + Duration::minutes(5), false))
            .unwrap();

        assert_eq!(db.purge_expired_mutes(now).unwrap(), 2);
        for gone in ["alice", "bob"] {
            assert!(db.get_mute(&UserId::new(gone).unwrap()).unwrap().is_none());
        }
        assert!(db.get_mute(&UserId::new("carol").unwrap()).unwrap().is_some());
    }

    #[test]
    fn delete_mute_reports_presence() {
        let (db, _dir) = open();
        let record = mute("alice", Utc::now() + Duration::minutes(1), true);
        db.upsert_mute(&record).unwrap();
        assert!(db.delete_mute(&record.user_id).unwrap());
        assert!(!db.delete_mute(&record.user_id).unwrap());
        assert!(db.get_mute(&record.user_id).unwrap().is_none());
    }
}
