use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::{fs, path::Path};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    models::{OutputRecord, RowCounts, Task, TaskStatus, UploadRecord},
};

/// SQLite-backed trail of uploads, tasks and outputs.
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS uploads (
                id TEXT PRIMARY KEY,
                original_name TEXT NOT NULL,
                stored_path TEXT NOT NULL,
                total_rows INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                upload_id TEXT NOT NULL REFERENCES uploads(id),
                status TEXT NOT NULL,
                input_file TEXT NOT NULL,
                output_file TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE TABLE IF NOT EXISTS outputs (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL UNIQUE REFERENCES tasks(id),
                stored_path TEXT NOT NULL,
                total_processed INTEGER NOT NULL,
                total_failed INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn insert_upload(
        &self,
        original_name: &str,
        stored_reference: &str,
        total_row_count: usize,
    ) -> Result<UploadRecord> {
        let record = UploadRecord {
            id: Uuid::new_v4(),
            original_name: original_name.to_string(),
            stored_reference: stored_reference.to_string(),
            total_row_count,
            created_at: Utc::now(),
        };
        self.conn.execute(
            "
            INSERT INTO uploads (id, original_name, stored_path, total_rows, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                record.id.to_string(),
                record.original_name,
                record.stored_reference,
                record.total_row_count as i64,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(record)
    }

    pub fn get_upload(&self, id: Uuid) -> Result<Option<UploadRecord>> {
        let record = self
            .conn
            .query_row(
                "
                SELECT id, original_name, stored_path, total_rows, created_at
                FROM uploads WHERE id = ?1
                ",
                [id.to_string()],
                |row| {
                    Ok(UploadRecord {
                        id: uuid_col(row, 0)?,
                        original_name: row.get(1)?,
                        stored_reference: row.get(2)?,
                        total_row_count: row.get::<_, i64>(3)? as usize,
                        created_at: time_col(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn insert_task(&self, upload_id: Uuid, input_reference: &str) -> Result<Task> {
        let task = Task {
            id: Uuid::new_v4(),
            upload_id,
            status: TaskStatus::Processing,
            input_reference: input_reference.to_string(),
            output_reference: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.conn.execute(
            "
            INSERT INTO tasks (id, upload_id, status, input_file, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                task.id.to_string(),
                task.upload_id.to_string(),
                task.status.as_str(),
                task.input_reference,
                task.created_at.to_rfc3339(),
            ],
        )?;
        Ok(task)
    }

    pub fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let task = self
            .conn
            .query_row(
                "
                SELECT id, upload_id, status, input_file, output_file, error_message,
                       created_at, completed_at
                FROM tasks WHERE id = ?1
                ",
                [id.to_string()],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Marks a processing task completed and records its output in one transaction.
    pub fn complete_task(
        &mut self,
        task_id: Uuid,
        output_reference: &str,
        counts: RowCounts,
    ) -> Result<OutputRecord> {
        let now = Utc::now();
        let record = OutputRecord {
            id: Uuid::new_v4(),
            task_id,
            stored_reference: output_reference.to_string(),
            total_processed: counts.total_processed,
            total_failed: counts.total_failed,
            created_at: now,
        };

        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "
            UPDATE tasks
            SET status = ?2, output_file = ?3, completed_at = ?4
            WHERE id = ?1 AND status = ?5
            ",
            params![
                task_id.to_string(),
                TaskStatus::Completed.as_str(),
                output_reference,
                now.to_rfc3339(),
                TaskStatus::Processing.as_str(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("processing task {task_id}")));
        }
        tx.execute(
            "
            INSERT INTO outputs (id, task_id, stored_path, total_processed, total_failed, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                record.id.to_string(),
                task_id.to_string(),
                record.stored_reference,
                record.total_processed as i64,
                record.total_failed as i64,
                now.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(record)
    }

    pub fn fail_task(&self, task_id: Uuid, reason: &str) -> Result<()> {
        let updated = self.conn.execute(
            "
            UPDATE tasks
            SET status = ?2, error_message = ?3, completed_at = ?4
            WHERE id = ?1 AND status = ?5
            ",
            params![
                task_id.to_string(),
                TaskStatus::Failed.as_str(),
                reason,
                Utc::now().to_rfc3339(),
                TaskStatus::Processing.as_str(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("processing task {task_id}")));
        }
        Ok(())
    }

    pub fn get_output_for_task(&self, task_id: Uuid) -> Result<Option<OutputRecord>> {
        let record = self
            .conn
            .query_row(
                "
                SELECT id, task_id, stored_path, total_processed, total_failed, created_at
                FROM outputs WHERE task_id = ?1
                ",
                [task_id.to_string()],
                |row| {
                    Ok(OutputRecord {
                        id: uuid_col(row, 0)?,
                        task_id: uuid_col(row, 1)?,
                        stored_reference: row.get(2)?,
                        total_processed: row.get::<_, i64>(3)? as usize,
                        total_failed: row.get::<_, i64>(4)? as usize,
                        created_at: time_col(row, 5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(2)?;
    let status = TaskStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown task status {status:?}").into(),
        )
    })?;
    let completed_at: Option<String> = row.get(7)?;

    Ok(Task {
        id: uuid_col(row, 0)?,
        upload_id: uuid_col(row, 1)?,
        status,
        input_reference: row.get(3)?,
        output_reference: row.get(4)?,
        error: row.get(5)?,
        created_at: time_col(row, 6)?,
        completed_at: completed_at
            .map(|value| parse_time(7, &value))
            .transpose()?,
    })
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let value: String = row.get(idx)?;
    Uuid::parse_str(&value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_time(idx, &value)
}

fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_task() -> (RecordStore, Task) {
        let store = RecordStore::open_in_memory().unwrap();
        let upload = store
            .insert_upload("names.csv", "uploads/names_abc123.csv", 3)
            .unwrap();
        let task = store.insert_task(upload.id, &upload.stored_reference).unwrap();
        (store, task)
    }

    #[test]
    fn upload_record_round_trips() {
        let store = RecordStore::open_in_memory().unwrap();
        let upload = store.insert_upload("names.csv", "uploads/x.csv", 42).unwrap();
        let loaded = store.get_upload(upload.id).unwrap().unwrap();
        assert_eq!(loaded.original_name, "names.csv");
        assert_eq!(loaded.total_row_count, 42);
    }

    #[test]
    fn new_task_is_processing() {
        let (store, task) = store_with_task();
        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Processing);
        assert_eq!(loaded.output_reference, None);
        assert_eq!(loaded.completed_at, None);
    }

    #[test]
    fn complete_sets_output_and_counts() {
        let (mut store, task) = store_with_task();
        let counts = RowCounts {
            total_processed: 5,
            total_failed: 1,
        };
        store
            .complete_task(task.id, "outputs/names_abc123.csv", counts)
            .unwrap();

        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(
            loaded.output_reference.as_deref(),
            Some("outputs/names_abc123.csv")
        );
        assert!(loaded.completed_at.is_some());

        let output = store.get_output_for_task(task.id).unwrap().unwrap();
        assert_eq!(output.total_processed, 5);
        assert_eq!(output.total_failed, 1);
    }

    #[test]
    fn completed_task_cannot_complete_or_fail_again() {
        let (mut store, task) = store_with_task();
        store
            .complete_task(task.id, "out.csv", RowCounts::default())
            .unwrap();
        assert!(matches!(
            store.complete_task(task.id, "out.csv", RowCounts::default()),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.fail_task(task.id, "late"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn fail_records_reason_without_output() {
        let (store, task) = store_with_task();
        store.fail_task(task.id, "disk full").unwrap();

        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("disk full"));
        assert_eq!(loaded.output_reference, None);
        assert!(store.get_output_for_task(task.id).unwrap().is_none());
    }

    #[test]
    fn unknown_task_is_none() {
        let store = RecordStore::open_in_memory().unwrap();
        assert!(store.get_task(Uuid::new_v4()).unwrap().is_none());
    }
}
