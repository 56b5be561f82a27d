use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::spreadsheet::SheetFormat;

#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub uploads_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub db_path: PathBuf,
}

/// Stored names for one submission, sharing a short random suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFiles {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir: PathBuf = data_dir.into();
        Self {
            uploads_dir: data_dir.join("uploads"),
            outputs_dir: data_dir.join("outputs"),
            db_path: data_dir.join("npi_enricher.sqlite"),
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.uploads_dir)?;
        std::fs::create_dir_all(&self.outputs_dir)?;
        Ok(())
    }

    /// `<stem>_<6 hex>.<ext>` under both the uploads and outputs directories.
    pub fn task_files(&self, original_name: &str, format: SheetFormat) -> TaskFiles {
        let stem = Path::new(original_name)
            .file_stem()
            .and_then(|x| x.to_str())
            .map(sanitize_stem)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "upload".to_string());
        let short_id = &Uuid::new_v4().simple().to_string()[..6];
        let file_name = format!("{stem}_{short_id}.{}", format.extension());

        TaskFiles {
            input: self.uploads_dir.join(&file_name),
            output: self.outputs_dir.join(&file_name),
        }
    }
}

fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
