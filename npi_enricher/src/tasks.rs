use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    models::{OutputRecord, RowCounts, Task, TaskStatusView, UploadRecord},
    store::RecordStore,
};

/// Owns task state transitions: `processing` to `completed` or `failed`.
#[derive(Clone)]
pub struct TaskManager {
    store: Arc<Mutex<RecordStore>>,
}

impl TaskManager {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub async fn record_upload(
        &self,
        original_name: &str,
        stored_reference: &str,
        total_row_count: usize,
    ) -> Result<UploadRecord> {
        let store = self.store.lock().await;
        store.insert_upload(original_name, stored_reference, total_row_count)
    }

    pub async fn create(&self, upload_id: Uuid, input_reference: &str) -> Result<Task> {
        let store = self.store.lock().await;
        let task = store.insert_task(upload_id, input_reference)?;
        tracing::info!(task_id = %task.id, input = input_reference, "Task created");
        Ok(task)
    }

    pub async fn complete(
        &self,
        task_id: Uuid,
        output_reference: &str,
        counts: RowCounts,
    ) -> Result<OutputRecord> {
        let mut store = self.store.lock().await;
        let record = store.complete_task(task_id, output_reference, counts)?;
        tracing::info!(
            task_id = %task_id,
            output = output_reference,
            total_processed = counts.total_processed,
            total_failed = counts.total_failed,
            "Task completed"
        );
        Ok(record)
    }

    pub async fn fail(&self, task_id: Uuid, reason: &str) -> Result<()> {
        let store = self.store.lock().await;
        store.fail_task(task_id, reason)?;
        tracing::error!(task_id = %task_id, reason, "Task failed");
        Ok(())
    }

    /// Current status of a task. Ids that are not UUIDs are reported as not found.
    pub async fn get_status(&self, task_id: &str) -> Result<TaskStatusView> {
        let not_found = || Error::NotFound(format!("task {task_id}"));
        let id = Uuid::parse_str(task_id.trim()).map_err(|_| not_found())?;
        let store = self.store.lock().await;
        let task = store.get_task(id)?.ok_or_else(not_found)?;
        Ok(TaskStatusView::from(&task))
    }

    pub async fn get_output(&self, task_id: Uuid) -> Result<Option<OutputRecord>> {
        self.store.lock().await.get_output_for_task(task_id)
    }
}
