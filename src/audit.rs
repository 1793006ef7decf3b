use std::path::{Path, PathBuf};

use rusqlite::{Connection, params_from_iter};

use crate::error::ShareError;
use crate::record::{MetadataRecord, SHORT_NAME};
use crate::upload::UploadOutcome;

pub const AUDIT_FILE: &str = "metadata.sqlite";

/// Local record of every shared run: the submitted row plus both upload
/// outcomes.
pub struct AuditLog {
    path: PathBuf,
    dry_run: bool,
}

impl AuditLog {
    pub fn open(dir: &Path, dry_run: bool) -> Self {
        Self {
            path: dir.join(AUDIT_FILE),
            dry_run,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The table is created from the first row's keys when the database file
    /// does not exist yet.
    pub fn append(
        &self,
        record: &MetadataRecord,
        metadata: &UploadOutcome,
        archive: Option<&UploadOutcome>,
    ) -> Result<(), ShareError> {
        let row = audit_row(record, metadata, archive);
        if self.dry_run {
            let payload = serde_json::to_string(&row).unwrap_or_default();
            tracing::info!(path = %self.path.display(), %payload, "dry run, audit row not written");
            return Ok(());
        }

        let fresh = !self.path.exists();
        let conn = Connection::open(&self.path).map_err(audit_err)?;
        let columns = row.keys().map(|key| format!("\"{key}\"")).collect::<Vec<_>>();
        if fresh {
            let definitions = columns
                .iter()
                .map(|column| format!("{column} TEXT"))
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute_batch(&format!(
                "CREATE TABLE {SHORT_NAME} (id INTEGER PRIMARY KEY, {definitions});"
            ))
            .map_err(audit_err)?;
        }

        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {SHORT_NAME} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        conn.execute(&sql, params_from_iter(row.fields().iter().map(|(_, value)| value)))
            .map_err(audit_err)?;
        tracing::debug!(path = %self.path.display(), "audit row written");
        Ok(())
    }
}

fn audit_row(
    record: &MetadataRecord,
    metadata: &UploadOutcome,
    archive: Option<&UploadOutcome>,
) -> MetadataRecord {
    let mut row = record.clone();
    row.push("miNDA_ok", flag(metadata.ok));
    row.push("miNDA_msg", strip_quotes(&metadata.message));
    match archive {
        Some(archive) => {
            row.push("s3_ok", flag(archive.ok));
            row.push("s3_msg", strip_quotes(&archive.message));
        }
        None => {
            row.push("s3_ok", "");
            row.push("s3_msg", "AWS-s3 not attempted because miNDA upload failed");
        }
    }
    row
}

fn flag(ok: bool) -> &'static str {
    if ok { "True" } else { "False" }
}

fn strip_quotes(message: &str) -> String {
    message.replace(['"', '\''], "")
}

fn audit_err(err: rusqlite::Error) -> ShareError {
    ShareError::Audit(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MetadataRecord {
        let mut record = MetadataRecord::default();
        record.push("subjectkey", "NDAR_INVAAA");
        record.push("qc_outcome", "pass");
        record
    }

    #[test]
    fn creates_table_then_appends() {
        let temp = tempfile::tempdir().unwrap();
        let log = AuditLog::open(temp.path(), false);
        let ok = UploadOutcome::success("{\"status\":\"it's fine\"}");
        log.append(&record(), &ok, Some(&ok)).unwrap();
        log.append(&record(), &UploadOutcome::failure("401"), None).unwrap();

        let conn = Connection::open(log.path()).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM fmriresults01", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let (message, s3_ok): (String, String) = conn
            .query_row(
                "SELECT miNDA_msg, s3_ok FROM fmriresults01 WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(message, "{status:its fine}");
        assert_eq!(s3_ok, "True");

        let skipped: String = conn
            .query_row("SELECT s3_msg FROM fmriresults01 WHERE id = 2", [], |row| row.get(0))
            .unwrap();
        assert_eq!(skipped, "AWS-s3 not attempted because miNDA upload failed");
    }

    #[test]
    fn dry_run_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let log = AuditLog::open(temp.path(), true);
        let ok = UploadOutcome::success("done");
        log.append(&record(), &ok, Some(&ok)).unwrap();
        assert!(!log.path().exists());
    }
}
