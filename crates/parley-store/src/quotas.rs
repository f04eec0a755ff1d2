use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::{UploadCategory, UserId};

use crate::database::{conversion_error, decode_ts, encode_ts, Database};
use crate::error::Result;
use crate::models::QuotaRecord;

const META_LAST_QUOTA_RESET: &str = "quota_last_reset_date";

impl Database {
    /// Load the full quota ledger entry for a user.  Users that never
    /// uploaded get an empty record.
    pub fn load_quota_record(&self, user: &UserId) -> Result<QuotaRecord> {
        let mut record = QuotaRecord::default();

        {
            let mut stmt = self.conn().prepare(
                "SELECT category, last_upload_at FROM quota_state WHERE user_id = ?1",
            )?;
            let rows = stmt.query_map(params![user.as_str()], |row| {
                let category_str: String = row.get(0)?;
                let last_str: String = row.get(1)?;
                let category: UploadCategory =
                    category_str.parse().map_err(|e| conversion_error(0, e))?;
                Ok((category, decode_ts(1, &last_str)?))
            })?;
            for row in rows {
                let (category, last) = row?;
                record.usage_mut(category).last_upload_at = Some(last);
            }
        }

        let mut stmt = self.conn().prepare(
            "SELECT category, uploaded_at FROM quota_uploads
             WHERE user_id = ?1
             ORDER BY uploaded_at ASC",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            let category_str: String = row.get(0)?;
            let at_str: String = row.get(1)?;
            let category: UploadCategory =
                category_str.parse().map_err(|e| conversion_error(0, e))?;
            Ok((category, decode_ts(1, &at_str)?))
        })?;
        for row in rows {
            let (category, at) = row?;
            record.usage_mut(category).daily_uploads.push(at);
        }

        Ok(record)
    }

    /// Drop uploads of one category recorded before `cutoff`.
    pub fn prune_quota_uploads(
        &self,
        user: &UserId,
        category: UploadCategory,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM quota_uploads
             WHERE user_id = ?1 AND category = ?2 AND uploaded_at < ?3",
            params![user.as_str(), category.as_str(), encode_ts(&cutoff)],
        )?;
        Ok(affected)
    }

    /// Record an admitted upload: appends to the daily list and moves the
    /// category's last upload time, in one transaction.
    pub fn record_upload(
        &mut self,
        user: &UserId,
        category: UploadCategory,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO quota_uploads (user_id, category, uploaded_at) VALUES (?1, ?2, ?3)",
            params![user.as_str(), category.as_str(), encode_ts(&at)],
        )?;
        tx.execute(
            "INSERT INTO quota_state (user_id, category, last_upload_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, category) DO UPDATE SET last_upload_at = excluded.last_upload_at",
            params![user.as_str(), category.as_str(), encode_ts(&at)],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn last_quota_reset(&self) -> Result<Option<NaiveDate>> {
        let raw = self.get_meta(META_LAST_QUOTA_RESET)?;
        let date = raw
            .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
            .transpose()?;
        Ok(date)
    }

    /// Clear the daily lists and record `today` as the reset date, in one
    /// transaction.
    pub fn reset_daily_quotas(&mut self, today: NaiveDate) -> Result<usize> {
        let tx = self.conn_mut().transaction()?;
        let cleared = tx.execute("DELETE FROM quota_uploads", [])?;
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![META_LAST_QUOTA_RESET, today.format("%Y-%m-%d").to_string()],
        )?;
        tx.commit()?;
        Ok(cleared)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }
}
