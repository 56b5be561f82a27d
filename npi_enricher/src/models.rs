use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One practitioner row read from an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputRow {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub state: Option<String>,
}

impl InputRow {
    pub fn new(first_name: &str, last_name: &str, state: &str) -> Self {
        Self {
            first_name: non_empty(first_name),
            last_name: non_empty(last_name),
            state: non_empty(state),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowStatus {
    Success,
    #[serde(rename = "No Match")]
    NoMatch,
    Failed,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Success => "Success",
            RowStatus::NoMatch => "No Match",
            RowStatus::Failed => "Failed",
        }
    }
}

/// One enriched row. Field order is the output column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRow {
    #[serde(rename = "First_Name")]
    pub first_name: Option<String>,
    #[serde(rename = "Last_Name")]
    pub last_name: Option<String>,
    #[serde(rename = "State")]
    pub state: Option<String>,
    #[serde(rename = "Found_First_Name")]
    pub found_first_name: Option<String>,
    #[serde(rename = "Found_Last_Name")]
    pub found_last_name: Option<String>,
    #[serde(rename = "Found_State")]
    pub found_state: Option<String>,
    #[serde(rename = "Full_Name")]
    pub full_name: Option<String>,
    #[serde(rename = "NPI")]
    pub npi_number: Option<String>,
    #[serde(rename = "Mailing_Address")]
    pub mailing_address: Option<String>,
    #[serde(rename = "Primary_Practice_Address")]
    pub primary_practice_address: Option<String>,
    #[serde(rename = "Secondary_Practice_Address")]
    pub secondary_practice_address: Option<String>,
    #[serde(rename = "Taxonomy")]
    pub taxonomy: Option<String>,
    #[serde(rename = "Specialty")]
    pub specialty: Option<String>,
    #[serde(rename = "License")]
    pub license: Option<String>,
    #[serde(rename = "Status")]
    pub status: RowStatus,
}

impl OutputRow {
    /// A row carrying only the input fields, used for `No Match` and `Failed`.
    pub fn bare(input: &InputRow, status: RowStatus) -> Self {
        Self {
            first_name: input.first_name.clone(),
            last_name: input.last_name.clone(),
            state: input.state.clone(),
            found_first_name: None,
            found_last_name: None,
            found_state: None,
            full_name: None,
            npi_number: None,
            mailing_address: None,
            primary_practice_address: None,
            secondary_practice_address: None,
            taxonomy: None,
            specialty: None,
            license: None,
            status,
        }
    }

    /// Cell values in output column order.
    pub fn cells(&self) -> [Option<&str>; 15] {
        [
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            self.state.as_deref(),
            self.found_first_name.as_deref(),
            self.found_last_name.as_deref(),
            self.found_state.as_deref(),
            self.full_name.as_deref(),
            self.npi_number.as_deref(),
            self.mailing_address.as_deref(),
            self.primary_practice_address.as_deref(),
            self.secondary_practice_address.as_deref(),
            self.taxonomy.as_deref(),
            self.specialty.as_deref(),
            self.license.as_deref(),
            Some(self.status.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub total_processed: usize,
    pub total_failed: usize,
}

impl RowCounts {
    pub fn tally(rows: &[OutputRow]) -> Self {
        Self {
            total_processed: rows.len(),
            total_failed: rows
                .iter()
                .filter(|row| row.status == RowStatus::Failed)
                .count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub status: TaskStatus,
    pub input_reference: String,
    pub output_reference: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub id: Uuid,
    pub original_name: String,
    pub stored_reference: String,
    pub total_row_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub stored_reference: String,
    pub total_processed: usize,
    pub total_failed: usize,
    pub created_at: DateTime<Utc>,
}

/// What a poller sees for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatusView {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub output_file: Option<String>,
    pub error: Option<String>,
}

impl From<&Task> for TaskStatusView {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            output_file: task.output_reference.clone(),
            error: task.error.clone(),
        }
    }
}

/// Trims `value` and drops it if nothing is left.
pub fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
